//! Event-store adapter for event-sourced aggregates on a partitioned
//! key-range store (ScyllaDB, or an in-memory emulation).
//!
//! Events are appended with optimistic concurrency keyed on
//! `(aggregate id, sequence number)` and read back as ordered streams:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use keyrange_eventstore::{Event, EventRepository, InMemoryStore, AggregateRegistry};
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let aggregates = serde_json::json!({
//!     "book": { "tableName": "bookEvent", "aggregateIdField": "bookId" }
//! });
//! let registry = AggregateRegistry::from_value(&aggregates)?;
//! let store = Arc::new(InMemoryStore::for_registry(&registry));
//! let repository = EventRepository::new(store, registry);
//!
//! let event = Event::new("book", "book-1", "TITLE_SET", 1);
//! assert!(repository.append(&event).await?);
//! assert!(!repository.append(&event).await?); // slot already taken
//!
//! let stream = repository.list("book", "book-1", 0).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod event_sourcing;
pub mod metrics;

pub use event_sourcing::*;
pub use metrics::RepositoryMetrics;
