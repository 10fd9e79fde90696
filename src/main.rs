use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keyrange_eventstore::config::StoreSettings;
use keyrange_eventstore::metrics::{self, RepositoryMetrics};
use keyrange_eventstore::{AggregateRegistry, Event, EventRepository, ScyllaStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,keyrange_eventstore=debug")),
        )
        .init();

    let settings = StoreSettings::from_env()?;
    tracing::info!(nodes = ?settings.nodes, keyspace = %settings.keyspace, "Starting event store demo");

    // === 1. Create ScyllaDB Session ===
    let session: Session = SessionBuilder::new()
        .known_nodes(&settings.nodes)
        .build()
        .await?;
    let session = Arc::new(session);

    // === 2. Validate aggregates and provision tables ===
    let registry = AggregateRegistry::from_value(&settings.aggregates)?;
    let store = ScyllaStore::for_registry(session.clone(), &registry)
        .with_keyspace(&settings.keyspace)
        .with_page_size(settings.page_size);
    store
        .ensure_keyspace(&settings.keyspace, settings.replication_factor)
        .await?;
    store.ensure_tables().await?;

    // === 3. Metrics ===
    let metrics = Arc::new(RepositoryMetrics::new()?);
    let served_metrics = metrics.clone();
    let metrics_port = settings.metrics_port;
    std::thread::spawn(move || {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(rt) => rt,
            Err(e) => {
                tracing::error!("Metrics runtime error: {}", e);
                return;
            }
        };
        rt.block_on(async {
            if let Err(e) = metrics::start_metrics_server(served_metrics, metrics_port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    });

    // === 4. Repository ===
    let repository = EventRepository::builder()
        .store(Arc::new(store))
        .aggregates_value(settings.aggregates.clone())
        .metrics(metrics)
        .build()?;

    // === 5. Append a short stream ===
    let book_id = uuid::Uuid::new_v4().to_string();
    let events = [
        Event::new("book", &book_id, "AUTHOR_SET", 1)
            .with_metadata("userId", json!(1234))
            .with_payload("author", json!("Fitzgerald")),
        Event::new("book", &book_id, "TITLE_SET", 2)
            .with_metadata("userId", json!(1234))
            .with_payload("title", json!("The Great Gatsby")),
    ];
    for event in &events {
        let appended = repository.append(event).await?;
        tracing::info!(sequence_number = event.sequence_number, appended, "Append result");
    }

    // === 6. Lose a concurrency race on purpose ===
    let stale = Event::new("book", &book_id, "PUBLISHER_SET", 2)
        .with_payload("publisherId", json!("scribner"));
    if !repository.append(&stale).await? {
        tracing::warn!("Sequence number 2 already taken; re-read the stream and retry at 3");
        let next = repository.list_from("book", &book_id).await?.len() as i64 + 1;
        let retried = Event { sequence_number: next, ..stale };
        repository.append(&retried).await?;
    }

    // === 7. Read the stream back ===
    for event in repository.list_from("book", &book_id).await? {
        tracing::info!(
            sequence_number = event.sequence_number,
            event_type = %event.event_type,
            event_timestamp = ?event.event_timestamp,
            payload = %serde_json::Value::Object(event.payload.clone()),
            "Stored event"
        );
    }

    let tail = repository.list("book", &book_id, 2).await?;
    tracing::info!(events = tail.len(), "Events after sequence number 2");

    tracing::info!("Demo complete");
    Ok(())
}
