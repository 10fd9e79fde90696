use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use async_trait::async_trait;
use scylla::client::session::Session;
use scylla::errors::{DbError, ExecutionError, RequestAttemptError};
use scylla::response::PagingState;
use scylla::statement::unprepared::Statement;
use scylla::value::{CqlValue, Row};
use serde_json::Value;

use super::{PutRequest, QueryPage, QueryRequest, StoreClient, StoreError, TableSchema};
use crate::event_sourcing::core::{
    quote_identifier, AggregateRegistry, Record, ResolvedComparison,
    TIMESTAMP_ATTRIBUTE,
};

// ============================================================================
// ScyllaDB Backend
// ============================================================================
//
// Physical layout per aggregate table:
//
//   CREATE TABLE "<table>" (
//       "<identity>" text, "sequenceNumber" bigint,
//       "eventId" text, "type" text, "metadata" text, "payload" text,
//       PRIMARY KEY (("<identity>"), "sequenceNumber")
//   ) WITH CLUSTERING ORDER BY ("sequenceNumber" ASC)
//
// - Conditional puts map to lightweight transactions (INSERT ... IF NOT
//   EXISTS); `[applied] = false` is the conditional-check signal
// - metadata/payload hold JSON documents
// - eventTimestamp is the cell write time (WRITETIME, microseconds) in ms
//
// ============================================================================

const DEFAULT_PAGE_SIZE: i32 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColumnKind {
    Text,
    BigInt,
    Document,
}

impl ColumnKind {
    fn cql_type(self) -> &'static str {
        match self {
            ColumnKind::Text | ColumnKind::Document => "text",
            ColumnKind::BigInt => "bigint",
        }
    }
}

/// Non-key columns of every event table, in select order.
const EVENT_COLUMNS: &[(&str, ColumnKind)] = &[
    ("eventId", ColumnKind::Text),
    ("type", ColumnKind::Text),
    ("metadata", ColumnKind::Document),
    ("payload", ColumnKind::Document),
];

/// Column whose write time is reported as the event timestamp.
const WRITETIME_COLUMN: &str = "eventId";

pub struct ScyllaStore {
    session: Arc<Session>,
    keyspace: Option<String>,
    tables: HashMap<String, TableSchema>,
    page_size: i32,
}

impl ScyllaStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            keyspace: None,
            tables: HashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Store with one table per registered aggregate.
    pub fn for_registry(session: Arc<Session>, registry: &AggregateRegistry) -> Self {
        registry
            .iter()
            .fold(Self::new(session), |store, (_, config)| {
                store.with_table(TableSchema::for_aggregate(config))
            })
    }

    /// Qualify table names with a keyspace instead of the session default.
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.tables.insert(schema.table.clone(), schema);
        self
    }

    pub fn with_page_size(mut self, page_size: i32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Create a keyspace if it does not exist yet (development setups).
    pub async fn ensure_keyspace(&self, keyspace: &str, replication_factor: u32) -> Result<(), StoreError> {
        let cql = format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH REPLICATION = \
             {{'class': 'SimpleStrategy', 'replication_factor': {}}}",
            quote_identifier(keyspace),
            replication_factor
        );
        self.session.query_unpaged(cql, ()).await.map_err(classify)?;
        Ok(())
    }

    /// Create every registered table that does not exist yet. Existing
    /// tables are left untouched.
    pub async fn ensure_tables(&self) -> Result<(), StoreError> {
        for schema in self.tables.values() {
            self.session
                .query_unpaged(create_table_cql(&self.qualified(&schema.table), schema), ())
                .await
                .map_err(classify)?;

            tracing::info!(table = %schema.table, "Ensured event table exists");
        }
        Ok(())
    }

    fn qualified(&self, table: &str) -> String {
        match &self.keyspace {
            Some(keyspace) => format!("{}.{}", quote_identifier(keyspace), quote_identifier(table)),
            None => quote_identifier(table),
        }
    }

    fn schema(&self, table: &str) -> Result<&TableSchema, StoreError> {
        self.tables
            .get(table)
            .ok_or_else(|| StoreError::ResourceNotFound(table.to_string()))
    }
}

fn create_table_cql(qualified: &str, schema: &TableSchema) -> String {
    let mut columns = vec![
        format!("{} text", quote_identifier(&schema.partition_key)),
        format!("{} bigint", quote_identifier(&schema.sort_key)),
    ];
    columns.extend(
        EVENT_COLUMNS
            .iter()
            .map(|(name, kind)| format!("{} {}", quote_identifier(name), kind.cql_type())),
    );

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY (({}), {})) \
         WITH CLUSTERING ORDER BY ({} ASC)",
        qualified,
        columns.join(", "),
        quote_identifier(&schema.partition_key),
        quote_identifier(&schema.sort_key),
        quote_identifier(&schema.sort_key),
    )
}

fn column_kind(schema: &TableSchema, column: &str) -> Option<ColumnKind> {
    if column == schema.partition_key {
        return Some(ColumnKind::Text);
    }
    if column == schema.sort_key {
        return Some(ColumnKind::BigInt);
    }
    EVENT_COLUMNS
        .iter()
        .find(|(name, _)| *name == column)
        .map(|(_, kind)| *kind)
}

// ============================================================================
// Marshalling - JSON attribute values <-> CQL values
// ============================================================================

fn marshal(column: &str, kind: ColumnKind, value: &Value) -> Result<CqlValue, StoreError> {
    let mismatch = || {
        StoreError::MalformedRequest(format!(
            "column {column} expects {}, got {value}",
            kind.cql_type()
        ))
    };

    match kind {
        ColumnKind::Text => value.as_str().map(|s| CqlValue::Text(s.to_string())).ok_or_else(mismatch),
        ColumnKind::BigInt => value.as_i64().map(CqlValue::BigInt).ok_or_else(mismatch),
        ColumnKind::Document => Ok(CqlValue::Text(value.to_string())),
    }
}

fn unmarshal(column: &str, kind: ColumnKind, value: CqlValue) -> Result<Value, StoreError> {
    let unexpected = |value: &CqlValue| {
        StoreError::MalformedRequest(format!("unexpected value in column {column}: {value:?}"))
    };

    match (kind, value) {
        (ColumnKind::Text, CqlValue::Text(s) | CqlValue::Ascii(s)) => Ok(Value::String(s)),
        (ColumnKind::BigInt, CqlValue::BigInt(n)) => Ok(Value::from(n)),
        (ColumnKind::Document, CqlValue::Text(json)) => serde_json::from_str(&json).map_err(|e| {
            StoreError::MalformedRequest(format!("column {column} holds invalid JSON: {e}"))
        }),
        (_, other) => Err(unexpected(&other)),
    }
}

fn bind_key(comparison: &ResolvedComparison<'_>, kind: ColumnKind) -> Result<CqlValue, StoreError> {
    marshal(comparison.attribute, kind, comparison.value)
}

// ============================================================================
// Error Classification
// ============================================================================

fn classify(err: ExecutionError) -> StoreError {
    let variant: Option<fn(String) -> StoreError> = match &err {
        ExecutionError::RequestTimeout(..) => Some(StoreError::Timeout),
        ExecutionError::BadQuery(..) => Some(StoreError::MalformedRequest),
        ExecutionError::LastAttemptError(RequestAttemptError::DbError(db_error, ..)) => match db_error {
            DbError::Unauthorized { .. } => Some(StoreError::PermissionDenied),
            DbError::Overloaded { .. } | DbError::RateLimitReached { .. } => Some(StoreError::Throttled),
            DbError::ReadTimeout { .. } | DbError::WriteTimeout { .. } => Some(StoreError::Timeout),
            DbError::Invalid { .. } | DbError::SyntaxError { .. } => Some(StoreError::MalformedRequest),
            _ => None,
        },
        _ => None,
    };

    match variant {
        Some(variant) => variant(err.to_string()),
        None => StoreError::transport(err),
    }
}

#[async_trait]
impl StoreClient for ScyllaStore {
    type Cursor = PagingState;

    async fn put_item(&self, request: PutRequest) -> Result<(), StoreError> {
        let schema = self.schema(&request.table)?;

        let mut columns = Vec::with_capacity(request.item.len());
        let mut values = Vec::with_capacity(request.item.len());
        for (column, value) in &request.item {
            if value.is_null() {
                continue;
            }
            let kind = column_kind(schema, column).ok_or_else(|| {
                StoreError::MalformedRequest(format!("{} has no column {column}", schema.table))
            })?;
            columns.push(quote_identifier(column));
            values.push(marshal(column, kind, value)?);
        }

        let lwt = match &request.condition {
            None => "",
            Some(condition) => {
                let absent = condition.absent_attribute();
                if absent != schema.partition_key && absent != schema.sort_key {
                    return Err(StoreError::MalformedRequest(format!(
                        "conditional insert requires a key attribute, got {absent}"
                    )));
                }
                " IF NOT EXISTS"
            }
        };

        let cql = format!(
            "INSERT INTO {} ({}) VALUES ({}){}",
            self.qualified(&schema.table),
            columns.join(", "),
            vec!["?"; values.len()].join(", "),
            lwt
        );

        let result = self.session.query_unpaged(cql, values).await.map_err(classify)?;

        if request.condition.is_some() {
            let applied = result
                .into_rows_result()
                .map_err(StoreError::transport)?
                .maybe_first_row::<Row>()
                .map_err(StoreError::transport)?
                .and_then(|row| row.columns.into_iter().next().flatten());

            match applied {
                Some(CqlValue::Boolean(true)) => {}
                Some(CqlValue::Boolean(false)) => return Err(StoreError::ConditionalCheckFailed),
                other => {
                    return Err(StoreError::MalformedRequest(format!(
                        "unexpected [applied] column: {other:?}"
                    )))
                }
            }
        }

        Ok(())
    }

    async fn query_page(
        &self,
        request: &QueryRequest,
        start: Option<PagingState>,
    ) -> Result<QueryPage<PagingState>, StoreError> {
        let schema = self.schema(&request.table)?;

        let partition = request.key_condition.partition_key();
        if partition.attribute != schema.partition_key {
            return Err(StoreError::MalformedRequest(format!(
                "key condition must target partition key {}",
                schema.partition_key
            )));
        }

        let mut binds = vec![bind_key(&partition, ColumnKind::Text)?];
        let mut predicate = format!("{} = ?", quote_identifier(partition.attribute));

        if let Some(sort) = request.key_condition.sort_bound() {
            if sort.attribute != schema.sort_key {
                return Err(StoreError::MalformedRequest(format!(
                    "{} is not the sort key of {}",
                    sort.attribute, schema.table
                )));
            }
            predicate.push_str(&format!(" AND {} {} ?", quote_identifier(sort.attribute), sort.op.as_str()));
            binds.push(bind_key(&sort, ColumnKind::BigInt)?);
        }

        let mut selected: Vec<(&str, ColumnKind)> = vec![
            (schema.partition_key.as_str(), ColumnKind::Text),
            (schema.sort_key.as_str(), ColumnKind::BigInt),
        ];
        selected.extend_from_slice(EVENT_COLUMNS);

        let projection: Vec<String> = selected.iter().map(|(name, _)| quote_identifier(name)).collect();
        let cql = format!(
            "SELECT {}, WRITETIME({}) FROM {} WHERE {} ORDER BY {} ASC",
            projection.join(", "),
            quote_identifier(WRITETIME_COLUMN),
            self.qualified(&schema.table),
            predicate,
            quote_identifier(&schema.sort_key),
        );

        let mut statement = Statement::new(cql);
        statement.set_page_size(self.page_size);

        let (result, paging) = self
            .session
            .query_single_page(statement, binds, start.unwrap_or_else(PagingState::start))
            .await
            .map_err(classify)?;

        let rows_result = result.into_rows_result().map_err(StoreError::transport)?;
        let mut items = Vec::new();
        for row in rows_result.rows::<Row>().map_err(StoreError::transport)? {
            let row = row.map_err(StoreError::transport)?;
            let mut cells = row.columns.into_iter();

            let mut record = Record::new();
            for ((column, kind), cell) in selected.iter().zip(cells.by_ref()) {
                if let Some(cell) = cell {
                    record.insert(column.to_string(), unmarshal(column, *kind, cell)?);
                }
            }
            if let Some(Some(CqlValue::BigInt(micros))) = cells.next() {
                record.insert(TIMESTAMP_ATTRIBUTE.to_string(), Value::from(micros / 1000));
            }

            items.push(record);
        }

        let next = match paging.into_paging_control_flow() {
            ControlFlow::Continue(state) => Some(state),
            ControlFlow::Break(()) => None,
        };

        Ok(QueryPage { items, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> TableSchema {
        TableSchema::new("bookEvent", "bookId", "sequenceNumber")
    }

    #[test]
    fn test_create_table_cql_quotes_identifiers() {
        let cql = create_table_cql("\"ks\".\"bookEvent\"", &schema());

        assert!(cql.starts_with("CREATE TABLE IF NOT EXISTS \"ks\".\"bookEvent\""));
        assert!(cql.contains("\"bookId\" text"));
        assert!(cql.contains("\"sequenceNumber\" bigint"));
        assert!(cql.contains("\"type\" text"));
        assert!(cql.contains("PRIMARY KEY ((\"bookId\"), \"sequenceNumber\")"));
        assert!(cql.ends_with("WITH CLUSTERING ORDER BY (\"sequenceNumber\" ASC)"));
    }

    #[test]
    fn test_column_kinds_follow_schema() {
        let schema = schema();
        assert_eq!(column_kind(&schema, "bookId"), Some(ColumnKind::Text));
        assert_eq!(column_kind(&schema, "sequenceNumber"), Some(ColumnKind::BigInt));
        assert_eq!(column_kind(&schema, "payload"), Some(ColumnKind::Document));
        assert_eq!(column_kind(&schema, "authorId"), None);
    }

    #[test]
    fn test_documents_round_trip_through_text() {
        let metadata = json!({ "user": { "username": "foo", "groups": {} } });

        let cell = marshal("metadata", ColumnKind::Document, &metadata).unwrap();
        assert!(matches!(cell, CqlValue::Text(_)));
        assert_eq!(unmarshal("metadata", ColumnKind::Document, cell).unwrap(), metadata);
    }

    #[test]
    fn test_marshal_rejects_type_mismatch() {
        assert!(matches!(
            marshal("sequenceNumber", ColumnKind::BigInt, &json!("one")),
            Err(StoreError::MalformedRequest(_))
        ));
        assert!(matches!(
            marshal("bookId", ColumnKind::Text, &json!(1)),
            Err(StoreError::MalformedRequest(_))
        ));
    }

    #[test]
    fn test_unmarshal_scalars() {
        assert_eq!(
            unmarshal("sequenceNumber", ColumnKind::BigInt, CqlValue::BigInt(7)).unwrap(),
            json!(7)
        );
        assert_eq!(
            unmarshal("type", ColumnKind::Text, CqlValue::Text("TITLE_SET".into())).unwrap(),
            json!("TITLE_SET")
        );
        assert!(unmarshal("type", ColumnKind::Text, CqlValue::Int(1)).is_err());
    }

    #[test]
    fn test_classify_maps_driver_failures() {
        let db = |error: DbError| {
            classify(ExecutionError::LastAttemptError(RequestAttemptError::DbError(
                error,
                "coordinator said no".into(),
            )))
        };

        assert!(matches!(
            classify(ExecutionError::RequestTimeout(std::time::Duration::from_secs(1))),
            StoreError::Timeout(_)
        ));
        assert!(matches!(db(DbError::Overloaded), StoreError::Throttled(_)));
        assert!(matches!(db(DbError::Unauthorized), StoreError::PermissionDenied(_)));
        assert!(matches!(db(DbError::Invalid), StoreError::MalformedRequest(_)));
        assert!(matches!(db(DbError::ServerError), StoreError::Transport(_)));
    }
}
