// ============================================================================
// Backing Store Contract - Partitioned Key-Range Storage
// ============================================================================
//
// The repository consumes a store; it never implements one. Any backend must
// provide:
// 1. Atomic "insert iff absent" keyed on the exact partition + sort key
// 2. Paginated range scans within one partition, ascending by sort key
//
// The conditional-check signal is reported as StoreError::ConditionalCheckFailed
// so the writer can tell a lost race apart from every other failure.
//
// ============================================================================

pub mod memory;
pub mod scylla_store;

pub use memory::InMemoryStore;
pub use scylla_store::ScyllaStore;

use async_trait::async_trait;
use futures_util::stream::{self, TryStream};

use super::core::{AggregateConfig, KeyCondition, Record, WriteCondition, SEQUENCE_ATTRIBUTE};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conditional check failed")]
    ConditionalCheckFailed,

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("transport failure: {0}")]
    Transport(#[source] BoxError),
}

impl StoreError {
    pub fn transport<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Transport(err.into())
    }

    /// Timeouts, throttling and transport failures may succeed if repeated.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Timeout(_) | StoreError::Throttled(_) | StoreError::Transport(_)
        )
    }
}

/// Key layout of one aggregate table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub partition_key: String,
    pub sort_key: String,
}

impl TableSchema {
    pub fn new(
        table: impl Into<String>,
        partition_key: impl Into<String>,
        sort_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
        }
    }

    pub fn for_aggregate(config: &AggregateConfig) -> Self {
        Self::new(
            &config.physical_location,
            &config.identity_field,
            SEQUENCE_ATTRIBUTE,
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PutRequest {
    pub table: String,
    pub item: Record,
    pub condition: Option<WriteCondition>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryRequest {
    pub table: String,
    pub key_condition: KeyCondition,
}

/// One page of a range scan. `next` is None on the last page.
#[derive(Debug)]
pub struct QueryPage<C> {
    pub items: Vec<Record>,
    pub next: Option<C>,
}

#[async_trait]
pub trait StoreClient: Send + Sync {
    /// Opaque position from which the next page continues.
    type Cursor: Send + Sync + 'static;

    async fn put_item(&self, request: PutRequest) -> Result<(), StoreError>;

    /// Fetch one page, ascending by sort key, starting at `start` (or the
    /// beginning of the range when None).
    async fn query_page(
        &self,
        request: &QueryRequest,
        start: Option<Self::Cursor>,
    ) -> Result<QueryPage<Self::Cursor>, StoreError>;
}

// ============================================================================
// Pagination - Drive query_page to completion as a stream of pages
// ============================================================================

enum Position<C> {
    Start,
    After(C),
    Exhausted,
}

struct Pager<C> {
    request: QueryRequest,
    position: Position<C>,
}

async fn next_page<S>(
    store: &S,
    pager: Pager<S::Cursor>,
) -> Result<Option<(Vec<Record>, Pager<S::Cursor>)>, StoreError>
where
    S: StoreClient + ?Sized,
{
    let Pager { request, position } = pager;
    let start = match position {
        Position::Start => None,
        Position::After(cursor) => Some(cursor),
        Position::Exhausted => return Ok(None),
    };

    let page = store.query_page(&request, start).await?;

    tracing::debug!(
        table = %request.table,
        items = page.items.len(),
        more = page.next.is_some(),
        "Fetched query page"
    );

    let position = match page.next {
        Some(cursor) => Position::After(cursor),
        None => Position::Exhausted,
    };

    Ok(Some((page.items, Pager { request, position })))
}

/// Every page of `request`, in order. The stream ends after the page that
/// reports no continuation.
pub fn paginate<S>(
    store: &S,
    request: QueryRequest,
) -> impl TryStream<Ok = Vec<Record>, Error = StoreError> + Send + '_
where
    S: StoreClient + ?Sized,
{
    let pager = Pager {
        request,
        position: Position::Start,
    };
    stream::try_unfold(pager, move |pager| next_page(store, pager))
}
