use std::sync::Arc;
use std::time::Instant;

use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::event_sourcing::core::{
    from_record, AggregateRegistry, Event, KeyCondition, Record, SEQUENCE_ATTRIBUTE,
};
use crate::event_sourcing::error::RepositoryError;
use crate::event_sourcing::store::{paginate, QueryRequest, StoreClient, StoreError};
use crate::metrics::RepositoryMetrics;

// ============================================================================
// Event Reader - Ordered Stream Retrieval
// ============================================================================
//
// Returns the events of one aggregate instance with
// sequenceNumber > greater_than, ascending. The store orders records by sort
// key within a partition, so no sorting happens here. Pagination is driven to
// completion internally; callers never see pages.
//
// ============================================================================

pub struct EventReader<S> {
    store: Arc<S>,
    registry: Arc<AggregateRegistry>,
    metrics: Option<Arc<RepositoryMetrics>>,
}

impl<S> Clone for EventReader<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: StoreClient> EventReader<S> {
    pub(crate) fn new(
        store: Arc<S>,
        registry: Arc<AggregateRegistry>,
        metrics: Option<Arc<RepositoryMetrics>>,
    ) -> Self {
        Self {
            store,
            registry,
            metrics,
        }
    }

    fn request(
        &self,
        operation: &'static str,
        aggregate_name: &str,
        aggregate_id: &str,
        greater_than: i64,
    ) -> Result<(QueryRequest, String), RepositoryError> {
        let config = self.registry.resolve(operation, aggregate_name)?;
        if aggregate_id.is_empty() {
            return Err(RepositoryError::MissingAggregateId { operation });
        }
        let key_condition = KeyCondition::partition(&config.identity_field, aggregate_id)
            .sort_at_least(SEQUENCE_ATTRIBUTE, greater_than.saturating_add(1));

        let request = QueryRequest {
            table: config.physical_location.clone(),
            key_condition,
        };
        Ok((request, config.identity_field.clone()))
    }

    /// All events above `greater_than`, fully materialized.
    pub async fn list(
        &self,
        aggregate_name: &str,
        aggregate_id: &str,
        greater_than: i64,
    ) -> Result<Vec<Event>, RepositoryError> {
        let started = Instant::now();
        let events: Vec<Event> = self
            .events("list", aggregate_name, aggregate_id, greater_than)
            .try_collect()
            .await
            .inspect_err(|err| {
                if let (Some(metrics), RepositoryError::Store(_)) = (&self.metrics, err) {
                    metrics.record_store_error(aggregate_name, "list");
                }
            })?;

        tracing::debug!(
            aggregate = %aggregate_name,
            aggregate_id = %aggregate_id,
            greater_than = greater_than,
            events = events.len(),
            "Listed events"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_list(aggregate_name, events.len(), started.elapsed().as_secs_f64());
        }

        Ok(events)
    }

    /// Lazy variant of [`list`](Self::list): pages are fetched as the
    /// stream is polled. Errors are tagged `list` like the eager form.
    pub fn stream(
        &self,
        aggregate_name: &str,
        aggregate_id: &str,
        greater_than: i64,
    ) -> BoxStream<'_, Result<Event, RepositoryError>> {
        self.events("list", aggregate_name, aggregate_id, greater_than)
    }

    fn events(
        &self,
        operation: &'static str,
        aggregate_name: &str,
        aggregate_id: &str,
        greater_than: i64,
    ) -> BoxStream<'_, Result<Event, RepositoryError>> {
        let (request, identity_field) =
            match self.request(operation, aggregate_name, aggregate_id, greater_than) {
                Ok(parts) => parts,
                Err(err) => return stream::once(async move { Err(err) }).boxed(),
            };
        let aggregate_name = aggregate_name.to_string();

        paginate(self.store.as_ref(), request)
            .map_ok(|records| stream::iter(records.into_iter().map(Ok::<Record, StoreError>)))
            .try_flatten()
            .map_err(RepositoryError::from)
            .and_then(move |record| future::ready(from_record(record, &aggregate_name, &identity_field)))
            .boxed()
    }
}
