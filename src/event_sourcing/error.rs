use super::core::InvalidEventError;
use super::store::StoreError;

// ============================================================================
// Repository Errors
// ============================================================================
//
// A lost optimistic-concurrency race is NOT an error: append() reports it as
// Ok(false). Everything here is a hard failure for the caller.
//
// ============================================================================

/// Malformed constructor input. Fatal, never retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("event repository: storeConnection required")]
    MissingStore,

    #[error("event repository: aggregates required")]
    MissingAggregates,

    #[error("event repository: aggregates must be a plain object")]
    AggregatesNotObject,

    #[error("event repository: aggregates must not be empty")]
    EmptyAggregates,

    #[error("event repository: invalid aggregate configuration for \"{name}\": {reason}")]
    InvalidAggregate { name: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid_aggregate(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAggregate {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("event repository: {operation}: unknown aggregate \"{aggregate}\"")]
    UnknownAggregate {
        operation: &'static str,
        aggregate: String,
    },

    #[error("event repository: {operation}: aggregateId required")]
    MissingAggregateId { operation: &'static str },

    #[error("invalid event: {0}")]
    InvalidEvent(#[from] InvalidEventError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("malformed stored record: {0}")]
    MalformedRecord(String),
}

impl RepositoryError {
    /// Whether the failure is a transient store condition a caller-side
    /// policy may retry. The repository itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(err) => err.is_transient(),
            _ => false,
        }
    }
}
