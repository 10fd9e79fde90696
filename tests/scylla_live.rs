use std::sync::Arc;

use chrono::Utc;
use futures_util::TryStreamExt;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use uuid::Uuid;

use keyrange_eventstore::{AggregateRegistry, Event, EventRepository, RepositoryError, ScyllaStore};

// ============================================================================
// Repository behaviour against a running ScyllaDB
// ============================================================================
//
// Skipped unless EVENTSTORE_LIVE_SCYLLA_TEST is set. Contact points come from
// SCYLLA_NODES (default 127.0.0.1:9042); tables are created in
// EVENTSTORE_TEST_KEYSPACE (default eventstore_test_ks). Every test writes
// under fresh aggregate ids, so runs never collide.
//
//   docker run -d -p 9042:9042 scylladb/scylla --smp 1
//   EVENTSTORE_LIVE_SCYLLA_TEST=1 cargo test --test scylla_live
//
// ============================================================================

// Concurrent CREATE ... IF NOT EXISTS can race on schema agreement.
static PROVISIONED: OnceCell<()> = OnceCell::const_new();

fn live() -> bool {
    std::env::var("EVENTSTORE_LIVE_SCYLLA_TEST").is_ok()
}

fn aggregates() -> Value {
    json!({ "book": { "tableName": "book_event_test", "aggregateIdField": "bookId" } })
}

async fn connect() -> Arc<Session> {
    let nodes: Vec<String> = std::env::var("SCYLLA_NODES")
        .unwrap_or_else(|_| "127.0.0.1:9042".to_string())
        .split(',')
        .map(|node| node.trim().to_string())
        .collect();

    let session = SessionBuilder::new()
        .known_nodes(&nodes)
        .build()
        .await
        .expect("connect to ScyllaDB");
    Arc::new(session)
}

async fn make_repo(page_size: i32) -> EventRepository<ScyllaStore> {
    let keyspace =
        std::env::var("EVENTSTORE_TEST_KEYSPACE").unwrap_or_else(|_| "eventstore_test_ks".to_string());
    let registry = AggregateRegistry::from_value(&aggregates()).unwrap();

    let store = ScyllaStore::for_registry(connect().await, &registry)
        .with_keyspace(&keyspace)
        .with_page_size(page_size);
    PROVISIONED
        .get_or_init(|| async {
            store.ensure_keyspace(&keyspace, 1).await.unwrap();
            store.ensure_tables().await.unwrap();
        })
        .await;

    EventRepository::builder()
        .store(Arc::new(store))
        .aggregates_value(aggregates())
        .build()
        .unwrap()
}

fn set_author(book_id: &str, sequence_number: i64) -> Event {
    Event::new("book", book_id, "AUTHOR_SET", sequence_number)
        .with_metadata("userId", json!(1234))
        .with_payload("author", json!("Fitzgerald"))
}

fn set_title(book_id: &str, sequence_number: i64) -> Event {
    Event::new("book", book_id, "TITLE_SET", sequence_number)
        .with_metadata("user", json!({ "username": "foo", "groups": {} }))
        .with_payload("title", json!("The Great Gatsby"))
}

fn remove_timestamps(events: Vec<Event>) -> Vec<Event> {
    events.iter().map(Event::without_timestamp).collect()
}

#[tokio::test]
async fn test_live_events_are_written_in_order() {
    if !live() {
        return;
    }
    let repo = make_repo(100).await;
    let id = Uuid::new_v4().to_string();

    let events = vec![set_author(&id, 1), set_title(&id, 2)];
    for event in &events {
        assert!(repo.append(event).await.unwrap());
    }

    let written = repo.list_from("book", &id).await.unwrap();
    assert_eq!(remove_timestamps(written), events);
}

#[tokio::test]
async fn test_live_stale_sequence_number_returns_false() {
    if !live() {
        return;
    }
    let repo = make_repo(100).await;
    let id = Uuid::new_v4().to_string();

    let first = set_author(&id, 1);
    assert!(repo.append(&first).await.unwrap());
    assert!(!repo.append(&set_title(&id, 1)).await.unwrap());

    let written = repo.list_from("book", &id).await.unwrap();
    assert_eq!(remove_timestamps(written), vec![first]);
}

#[tokio::test]
async fn test_live_list_respects_minimum_sequence_number() {
    if !live() {
        return;
    }
    let repo = make_repo(100).await;
    let id = Uuid::new_v4().to_string();

    let third = set_title(&id, 3);
    repo.append(&set_author(&id, 1)).await.unwrap();
    repo.append(&set_title(&id, 2)).await.unwrap();
    repo.append(&third).await.unwrap();

    let above_two = repo.list("book", &id, 2).await.unwrap();
    assert_eq!(remove_timestamps(above_two), vec![third]);
    assert!(repo.list("book", &id, 3).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_live_pagination_is_transparent() {
    if !live() {
        return;
    }
    let repo = make_repo(2).await;
    let id = Uuid::new_v4().to_string();

    for sequence_number in 1..=5 {
        assert!(repo.append(&set_title(&id, sequence_number)).await.unwrap());
    }

    let sequence: Vec<i64> = repo
        .list_from("book", &id)
        .await
        .unwrap()
        .iter()
        .map(|e| e.sequence_number)
        .collect();
    assert_eq!(sequence, vec![1, 2, 3, 4, 5]);

    let streamed: Vec<Event> = repo.stream("book", &id, 1).try_collect().await.unwrap();
    assert_eq!(streamed.len(), 4);
    assert_eq!(streamed[0].sequence_number, 2);
}

#[tokio::test]
async fn test_live_timestamp_added_on_write() {
    if !live() {
        return;
    }
    let repo = make_repo(100).await;
    let start = Utc::now().timestamp_millis();
    let id = Uuid::new_v4().to_string();

    assert!(repo.append(&set_author(&id, 1)).await.unwrap());

    let written = repo.list_from("book", &id).await.unwrap();
    let timestamp = written[0].event_timestamp.expect("event read with eventTimestamp");
    assert!(timestamp >= start && timestamp <= start + 2000);
}

#[tokio::test]
async fn test_live_unregistered_table_is_a_store_error() {
    if !live() {
        return;
    }
    let registry = AggregateRegistry::from_value(&aggregates()).unwrap();
    // a store that knows no tables, so the lookup fails before any CQL runs
    let store = ScyllaStore::new(connect().await);
    let repo = EventRepository::new(Arc::new(store), registry);

    let result = repo.append(&set_author(&Uuid::new_v4().to_string(), 1)).await;
    assert!(matches!(result, Err(RepositoryError::Store(_))));
}
