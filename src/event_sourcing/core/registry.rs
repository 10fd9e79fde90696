use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::event_sourcing::error::{ConfigError, RepositoryError};

// ============================================================================
// Aggregate Registry - Aggregate Name -> Physical Location
// ============================================================================
//
// Built once when the repository is constructed and never mutated afterwards.
// Every entry is validated eagerly; the first defect (in name order) fails
// construction with an error naming the aggregate.
//
// ============================================================================

/// Attributes every physical record carries besides the identity field.
/// An identity field may not shadow any of them.
const RESERVED_ATTRIBUTES: &[&str] = &[
    "eventId",
    "type",
    "metadata",
    "payload",
    "sequenceNumber",
    "eventTimestamp",
    "aggregateName",
    "aggregateId",
];

/// Loose form keys are `tableName` / `aggregateIdField`, with
/// `physicalLocation` / `identityField` accepted as well.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateConfig {
    /// Table holding this aggregate's events.
    pub physical_location: String,
    /// Partition key attribute holding the aggregate id.
    pub identity_field: String,
}

impl AggregateConfig {
    pub fn new(physical_location: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self {
            physical_location: physical_location.into(),
            identity_field: identity_field.into(),
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.physical_location.is_empty() {
            return Err(ConfigError::invalid_aggregate(name, "bad/missing tableName"));
        }
        if self.identity_field.is_empty() {
            return Err(ConfigError::invalid_aggregate(name, "bad/missing aggregateIdField"));
        }
        if RESERVED_ATTRIBUTES.contains(&self.identity_field.as_str()) {
            return Err(ConfigError::invalid_aggregate(
                name,
                format!("aggregateIdField \"{}\" collides with an event attribute", self.identity_field),
            ));
        }
        Ok(())
    }

    fn from_value(name: &str, value: &Value) -> Result<Self, ConfigError> {
        let Value::Object(fields) = value else {
            return Err(ConfigError::invalid_aggregate(name, "must be a plain object"));
        };

        let string_field = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| fields.get(*key))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let physical_location = string_field(&["tableName", "physicalLocation"])
            .ok_or_else(|| ConfigError::invalid_aggregate(name, "bad/missing tableName"))?;
        let identity_field = string_field(&["aggregateIdField", "identityField"])
            .ok_or_else(|| ConfigError::invalid_aggregate(name, "bad/missing aggregateIdField"))?;

        let config = Self {
            physical_location,
            identity_field,
        };
        config.validate(name)?;
        Ok(config)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateRegistry {
    aggregates: HashMap<String, AggregateConfig>,
}

impl AggregateRegistry {
    pub fn new(aggregates: HashMap<String, AggregateConfig>) -> Result<Self, ConfigError> {
        if aggregates.is_empty() {
            return Err(ConfigError::EmptyAggregates);
        }

        let mut names: Vec<&String> = aggregates.keys().collect();
        names.sort();
        for name in names {
            aggregates[name].validate(name)?;
        }

        Ok(Self { aggregates })
    }

    /// Build from loosely-typed configuration, e.g. a parsed JSON file:
    /// `{ "book": { "tableName": "bookEvent", "aggregateIdField": "bookId" } }`
    pub fn from_value(value: &Value) -> Result<Self, ConfigError> {
        let entries = match value {
            Value::Null => return Err(ConfigError::MissingAggregates),
            Value::Object(entries) => entries,
            _ => return Err(ConfigError::AggregatesNotObject),
        };

        // Sorted so the reported defect does not depend on map ordering.
        let sorted: BTreeMap<&String, &Value> = entries.iter().collect();
        let mut aggregates = HashMap::with_capacity(sorted.len());
        for (name, entry) in sorted {
            aggregates.insert(name.clone(), AggregateConfig::from_value(name, entry)?);
        }

        Self::new(aggregates)
    }

    /// Look up an aggregate, tagging a miss with the calling operation.
    pub fn resolve(
        &self,
        operation: &'static str,
        aggregate_name: &str,
    ) -> Result<&AggregateConfig, RepositoryError> {
        self.aggregates
            .get(aggregate_name)
            .ok_or_else(|| RepositoryError::UnknownAggregate {
                operation,
                aggregate: aggregate_name.to_string(),
            })
    }

    pub fn aggregate_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.aggregates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AggregateConfig)> {
        self.aggregates.iter().map(|(name, config)| (name.as_str(), config))
    }

    pub fn len(&self) -> usize {
        self.aggregates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}
