// ============================================================================
// Event Repository - Append / List Facade
// ============================================================================
//
// Owns a store client, the aggregate registry, the event validator and
// (optionally) metrics. Cheap to clone; share it across tasks freely. The
// repository holds no mutable state: serialization of concurrent writers is
// left entirely to the store's conditional insert.
//
// ============================================================================

mod reader;
mod writer;

pub use reader::EventReader;
pub use writer::EventWriter;

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::BoxStream;
use serde_json::Value;

use super::core::{AggregateConfig, AggregateRegistry, Event, EventValidator, SchemaValidator};
use super::error::{ConfigError, RepositoryError};
use super::store::StoreClient;
use crate::metrics::RepositoryMetrics;

pub struct EventRepository<S> {
    registry: Arc<AggregateRegistry>,
    writer: EventWriter<S>,
    reader: EventReader<S>,
}

impl<S> Clone for EventRepository<S> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            writer: self.writer.clone(),
            reader: self.reader.clone(),
        }
    }
}

impl<S: StoreClient> EventRepository<S> {
    pub fn builder() -> EventRepositoryBuilder<S> {
        EventRepositoryBuilder::default()
    }

    /// Repository with the default schema validator and no metrics.
    pub fn new(store: Arc<S>, registry: AggregateRegistry) -> Self {
        Self::assemble(store, Arc::new(registry), Arc::new(SchemaValidator), None)
    }

    fn assemble(
        store: Arc<S>,
        registry: Arc<AggregateRegistry>,
        validator: Arc<dyn EventValidator>,
        metrics: Option<Arc<RepositoryMetrics>>,
    ) -> Self {
        Self {
            writer: EventWriter::new(store.clone(), registry.clone(), validator, metrics.clone()),
            reader: EventReader::new(store, registry.clone(), metrics),
            registry,
        }
    }

    pub fn registry(&self) -> &AggregateRegistry {
        &self.registry
    }

    pub fn writer(&self) -> &EventWriter<S> {
        &self.writer
    }

    pub fn reader(&self) -> &EventReader<S> {
        &self.reader
    }

    /// Append one event. `Ok(false)` means its sequence number is already
    /// taken for that aggregate instance.
    pub async fn append(&self, event: &Event) -> Result<bool, RepositoryError> {
        self.writer.append(event).await
    }

    /// Events with `sequenceNumber > greater_than`, ascending.
    pub async fn list(
        &self,
        aggregate_name: &str,
        aggregate_id: &str,
        greater_than: i64,
    ) -> Result<Vec<Event>, RepositoryError> {
        self.reader.list(aggregate_name, aggregate_id, greater_than).await
    }

    /// The whole stream of an aggregate instance.
    pub async fn list_from(
        &self,
        aggregate_name: &str,
        aggregate_id: &str,
    ) -> Result<Vec<Event>, RepositoryError> {
        self.list(aggregate_name, aggregate_id, 0).await
    }

    pub fn stream(
        &self,
        aggregate_name: &str,
        aggregate_id: &str,
        greater_than: i64,
    ) -> BoxStream<'_, Result<Event, RepositoryError>> {
        self.reader.stream(aggregate_name, aggregate_id, greater_than)
    }
}

// ============================================================================
// Builder
// ============================================================================

enum AggregateSource {
    Typed(HashMap<String, AggregateConfig>),
    Loose(Value),
}

pub struct EventRepositoryBuilder<S> {
    store: Option<Arc<S>>,
    aggregates: Option<AggregateSource>,
    validator: Option<Arc<dyn EventValidator>>,
    metrics: Option<Arc<RepositoryMetrics>>,
}

impl<S> Default for EventRepositoryBuilder<S> {
    fn default() -> Self {
        Self {
            store: None,
            aggregates: None,
            validator: None,
            metrics: None,
        }
    }
}

impl<S: StoreClient> EventRepositoryBuilder<S> {
    pub fn store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn aggregates(mut self, aggregates: HashMap<String, AggregateConfig>) -> Self {
        self.aggregates = Some(AggregateSource::Typed(aggregates));
        self
    }

    /// Aggregate mapping in its loose JSON form, validated on build.
    pub fn aggregates_value(mut self, aggregates: Value) -> Self {
        self.aggregates = Some(AggregateSource::Loose(aggregates));
        self
    }

    pub fn validator(mut self, validator: impl EventValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn metrics(mut self, metrics: Arc<RepositoryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<EventRepository<S>, ConfigError> {
        let registry = match self.aggregates {
            None => return Err(ConfigError::MissingAggregates),
            Some(AggregateSource::Typed(aggregates)) => AggregateRegistry::new(aggregates)?,
            Some(AggregateSource::Loose(value)) => AggregateRegistry::from_value(&value)?,
        };
        let store = self.store.ok_or(ConfigError::MissingStore)?;
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(SchemaValidator) as Arc<dyn EventValidator>);

        tracing::info!(
            aggregates = ?registry.aggregate_names(),
            "Event repository configured"
        );

        Ok(EventRepository::assemble(store, Arc::new(registry), validator, self.metrics))
    }
}
