use std::sync::Arc;

use crate::event_sourcing::core::{to_record, AggregateRegistry, Event, EventValidator, WriteCondition};
use crate::event_sourcing::error::RepositoryError;
use crate::event_sourcing::store::{PutRequest, StoreClient, StoreError};
use crate::metrics::RepositoryMetrics;

// ============================================================================
// Event Writer - Append With Optimistic Concurrency
// ============================================================================
//
// The store's atomic "insert iff absent" on (identity, sequenceNumber) is the
// only concurrency control. Outcomes:
// - Ok(true)  -> the event now occupies its slot
// - Ok(false) -> the slot was taken (stale/duplicate sequenceNumber); the
//                caller re-derives the next sequence number and retries
// - Err(_)    -> anything else, propagated as-is
//
// ============================================================================

pub struct EventWriter<S> {
    store: Arc<S>,
    registry: Arc<AggregateRegistry>,
    validator: Arc<dyn EventValidator>,
    metrics: Option<Arc<RepositoryMetrics>>,
}

impl<S> Clone for EventWriter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            registry: self.registry.clone(),
            validator: self.validator.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<S: StoreClient> EventWriter<S> {
    pub(crate) fn new(
        store: Arc<S>,
        registry: Arc<AggregateRegistry>,
        validator: Arc<dyn EventValidator>,
        metrics: Option<Arc<RepositoryMetrics>>,
    ) -> Self {
        Self {
            store,
            registry,
            validator,
            metrics,
        }
    }

    pub async fn append(&self, event: &Event) -> Result<bool, RepositoryError> {
        let config = self.registry.resolve("append", &event.aggregate_name)?;
        self.validator.validate(event)?;

        let item = to_record(event, &config.identity_field)?;
        let request = PutRequest {
            table: config.physical_location.clone(),
            item,
            condition: Some(WriteCondition::attribute_not_exists(&config.identity_field)),
        };

        match self.store.put_item(request).await {
            Ok(()) => {
                tracing::info!(
                    aggregate = %event.aggregate_name,
                    aggregate_id = %event.aggregate_id,
                    sequence_number = event.sequence_number,
                    event_type = %event.event_type,
                    table = %config.physical_location,
                    "Appended event"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_append(&event.aggregate_name);
                }
                Ok(true)
            }
            Err(StoreError::ConditionalCheckFailed) => {
                tracing::warn!(
                    aggregate = %event.aggregate_name,
                    aggregate_id = %event.aggregate_id,
                    sequence_number = event.sequence_number,
                    "Sequence number already taken, append rejected"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_conflict(&event.aggregate_name);
                }
                Ok(false)
            }
            Err(err) => {
                tracing::error!(
                    aggregate = %event.aggregate_name,
                    aggregate_id = %event.aggregate_id,
                    sequence_number = event.sequence_number,
                    error = %err,
                    "Failed to append event"
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_store_error(&event.aggregate_name, "append");
                }
                Err(err.into())
            }
        }
    }
}
