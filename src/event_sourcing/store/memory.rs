use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use super::{PutRequest, QueryPage, QueryRequest, StoreClient, StoreError, TableSchema};
use crate::event_sourcing::core::{AggregateRegistry, Record, TIMESTAMP_ATTRIBUTE};

// ============================================================================
// In-Memory Key-Range Store
// ============================================================================
//
// Emulates the backing store contract in-process for tests and local
// development:
// - tables must be created before use (ResourceNotFound otherwise)
// - conditional puts are evaluated atomically under the write lock
// - queries are paginated, ascending by sort key
// - the write-time timestamp is assigned when the insert commits and never
//   moves backwards
// - failures can be injected to exercise error propagation
//
// ============================================================================

const DEFAULT_PAGE_SIZE: usize = 100;

struct MemoryTable {
    schema: TableSchema,
    partitions: HashMap<String, BTreeMap<i64, Record>>,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, MemoryTable>,
    last_timestamp: i64,
}

impl State {
    fn next_timestamp(&mut self) -> i64 {
        self.last_timestamp = Utc::now().timestamp_millis().max(self.last_timestamp);
        self.last_timestamp
    }
}

pub struct InMemoryStore {
    state: RwLock<State>,
    faults: Mutex<VecDeque<StoreError>>,
    page_size: usize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            faults: Mutex::new(VecDeque::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Store with one table per registered aggregate.
    pub fn for_registry(registry: &AggregateRegistry) -> Self {
        registry
            .iter()
            .fold(Self::new(), |store, (_, config)| {
                store.with_table(TableSchema::for_aggregate(config))
            })
    }

    pub fn with_table(mut self, schema: TableSchema) -> Self {
        Self::insert_table(self.state.get_mut(), schema);
        self
    }

    /// Maximum number of items returned per query page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub async fn create_table(&self, schema: TableSchema) {
        Self::insert_table(&mut *self.state.write().await, schema);
    }

    /// The next store operation fails with `err` instead of executing.
    pub async fn inject_failure(&self, err: StoreError) {
        self.faults.lock().await.push_back(err);
    }

    /// Number of records stored in one partition.
    pub async fn partition_len(&self, table: &str, partition: &str) -> usize {
        let state = self.state.read().await;
        state
            .tables
            .get(table)
            .and_then(|t| t.partitions.get(partition))
            .map_or(0, BTreeMap::len)
    }

    fn insert_table(state: &mut State, schema: TableSchema) {
        tracing::debug!(
            table = %schema.table,
            partition_key = %schema.partition_key,
            sort_key = %schema.sort_key,
            "Created in-memory table"
        );
        state.tables.entry(schema.table.clone()).or_insert(MemoryTable {
            schema,
            partitions: HashMap::new(),
        });
    }

    async fn take_fault(&self) -> Result<(), StoreError> {
        match self.faults.lock().await.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn string_key<'a>(value: Option<&'a Value>, attribute: &str) -> Result<&'a str, StoreError> {
    value.and_then(Value::as_str).ok_or_else(|| {
        StoreError::MalformedRequest(format!("key attribute {attribute} must be a string"))
    })
}

fn numeric_key(value: Option<&Value>, attribute: &str) -> Result<i64, StoreError> {
    value.and_then(Value::as_i64).ok_or_else(|| {
        StoreError::MalformedRequest(format!("key attribute {attribute} must be an integer"))
    })
}

#[async_trait]
impl StoreClient for InMemoryStore {
    /// Sort key of the last item returned.
    type Cursor = i64;

    async fn put_item(&self, request: PutRequest) -> Result<(), StoreError> {
        self.take_fault().await?;

        let mut state = self.state.write().await;
        let timestamp = state.next_timestamp();
        let table = state
            .tables
            .get_mut(&request.table)
            .ok_or_else(|| StoreError::ResourceNotFound(request.table.clone()))?;

        let schema = &table.schema;
        let partition = string_key(request.item.get(&schema.partition_key), &schema.partition_key)?.to_string();
        let sort = numeric_key(request.item.get(&schema.sort_key), &schema.sort_key)?;

        let rows = table.partitions.entry(partition).or_default();

        if let Some(condition) = &request.condition {
            let occupied = rows
                .get(&sort)
                .is_some_and(|existing| existing.contains_key(condition.absent_attribute()));
            if occupied {
                return Err(StoreError::ConditionalCheckFailed);
            }
        }

        let mut item = request.item;
        item.insert(TIMESTAMP_ATTRIBUTE.to_string(), Value::from(timestamp));
        rows.insert(sort, item);

        Ok(())
    }

    async fn query_page(
        &self,
        request: &QueryRequest,
        start: Option<i64>,
    ) -> Result<QueryPage<i64>, StoreError> {
        self.take_fault().await?;

        let state = self.state.read().await;
        let table = state
            .tables
            .get(&request.table)
            .ok_or_else(|| StoreError::ResourceNotFound(request.table.clone()))?;
        let schema = &table.schema;

        let partition = request.key_condition.partition_key();
        if partition.attribute != schema.partition_key {
            return Err(StoreError::MalformedRequest(format!(
                "key condition must target partition key {}",
                schema.partition_key
            )));
        }
        let partition_value = string_key(Some(partition.value), partition.attribute)?;

        let bound = match request.key_condition.sort_bound() {
            Some(sort) if sort.attribute == schema.sort_key => {
                Some((sort.op, numeric_key(Some(sort.value), sort.attribute)?))
            }
            Some(sort) => {
                return Err(StoreError::MalformedRequest(format!(
                    "{} is not the sort key of {}",
                    sort.attribute, schema.table
                )))
            }
            None => None,
        };

        let Some(rows) = table.partitions.get(partition_value) else {
            return Ok(QueryPage { items: Vec::new(), next: None });
        };

        let lower = start.map_or(Bound::Unbounded, Bound::Excluded);
        let mut matching = rows
            .range((lower, Bound::Unbounded))
            .filter(|(sequence, _)| bound.map_or(true, |(op, value)| op.holds(**sequence, value)));

        let mut items = Vec::with_capacity(self.page_size.min(rows.len()));
        let mut last = None;
        for (sequence, record) in matching.by_ref().take(self.page_size) {
            items.push(record.clone());
            last = Some(*sequence);
        }
        let next = if matching.next().is_some() { last } else { None };

        Ok(QueryPage { items, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{KeyCondition, WriteCondition};
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("bookEvent", "bookId", "sequenceNumber")
    }

    fn put(book: &str, sequence: i64, conditional: bool) -> PutRequest {
        let mut item = Record::new();
        item.insert("bookId".into(), json!(book));
        item.insert("sequenceNumber".into(), json!(sequence));
        item.insert("type".into(), json!(format!("E{sequence}")));
        PutRequest {
            table: "bookEvent".into(),
            item,
            condition: conditional.then(|| WriteCondition::attribute_not_exists("bookId")),
        }
    }

    fn query(book: &str, at_least: i64) -> QueryRequest {
        QueryRequest {
            table: "bookEvent".into(),
            key_condition: KeyCondition::partition("bookId", book).sort_at_least("sequenceNumber", at_least),
        }
    }

    #[tokio::test]
    async fn test_conditional_put_rejects_occupied_key() {
        let store = InMemoryStore::new().with_table(schema());

        store.put_item(put("b-1", 1, true)).await.unwrap();
        let second = store.put_item(put("b-1", 1, true)).await;

        assert!(matches!(second, Err(StoreError::ConditionalCheckFailed)));
        assert_eq!(store.partition_len("bookEvent", "b-1").await, 1);
    }

    #[tokio::test]
    async fn test_unconditional_put_overwrites() {
        let store = InMemoryStore::new().with_table(schema());

        store.put_item(put("b-1", 1, false)).await.unwrap();
        store.put_item(put("b-1", 1, false)).await.unwrap();

        assert_eq!(store.partition_len("bookEvent", "b-1").await, 1);
    }

    #[tokio::test]
    async fn test_unknown_table_is_resource_not_found() {
        let store = InMemoryStore::new();
        let result = store.put_item(put("b-1", 1, true)).await;
        assert!(matches!(result, Err(StoreError::ResourceNotFound(t)) if t == "bookEvent"));
    }

    #[tokio::test]
    async fn test_put_assigns_timestamp() {
        let store = InMemoryStore::new().with_table(schema());
        let before = Utc::now().timestamp_millis();

        store.put_item(put("b-1", 1, true)).await.unwrap();

        let page = store.query_page(&query("b-1", 1), None).await.unwrap();
        let timestamp = page.items[0][TIMESTAMP_ATTRIBUTE].as_i64().unwrap();
        assert!(timestamp >= before);
    }

    #[tokio::test]
    async fn test_query_pages_ascending_with_cursor() {
        let store = InMemoryStore::new().with_table(schema()).with_page_size(2);
        for sequence in [3, 1, 5, 2, 4] {
            store.put_item(put("b-1", sequence, true)).await.unwrap();
        }
        store.put_item(put("b-2", 1, true)).await.unwrap();

        let first = store.query_page(&query("b-1", 2), None).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.next, Some(3));

        let second = store.query_page(&query("b-1", 2), first.next).await.unwrap();
        assert_eq!(second.items[0]["sequenceNumber"], 4);
        assert_eq!(second.items[1]["sequenceNumber"], 5);
        assert_eq!(second.next, None);
    }

    #[tokio::test]
    async fn test_query_missing_partition_is_empty() {
        let store = InMemoryStore::new().with_table(schema());
        let page = store.query_page(&query("nobody", 1), None).await.unwrap();
        assert!(page.items.is_empty());
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn test_query_rejects_non_key_attribute() {
        let store = InMemoryStore::new().with_table(schema());
        let request = QueryRequest {
            table: "bookEvent".into(),
            key_condition: KeyCondition::partition("authorId", "a-1"),
        };
        assert!(matches!(
            store.query_page(&request, None).await,
            Err(StoreError::MalformedRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_failure_consumed_once() {
        let store = InMemoryStore::new().with_table(schema());
        store.inject_failure(StoreError::Throttled("slow down".into())).await;

        assert!(matches!(
            store.put_item(put("b-1", 1, true)).await,
            Err(StoreError::Throttled(_))
        ));
        assert!(store.put_item(put("b-1", 1, true)).await.is_ok());
    }

    #[tokio::test]
    async fn test_put_rejects_non_string_partition_key() {
        let store = InMemoryStore::new().with_table(schema());
        let mut request = put("b-1", 1, true);
        request.item.insert("bookId".into(), json!(42));

        assert!(matches!(
            store.put_item(request).await,
            Err(StoreError::MalformedRequest(_))
        ));
    }
}
