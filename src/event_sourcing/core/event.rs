use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Event - The Unit of Persistence
// ============================================================================
//
// Events are built by command handlers outside this crate, checked by an
// EventValidator, and handed to the repository. Once written they are never
// updated or deleted.
//
// Wire shape (camelCase):
//   { aggregateName, aggregateId, eventId, type, metadata, payload,
//     sequenceNumber, eventTimestamp? }
//
// ============================================================================

/// A domain event belonging to one aggregate instance's stream.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub aggregate_name: String,
    pub aggregate_id: String,
    pub event_id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub payload: Map<String, Value>,

    /// 1-based position in the aggregate's stream; also the concurrency token.
    pub sequence_number: i64,

    /// Milliseconds since the Unix epoch, assigned by the store on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_timestamp: Option<i64>,
}

impl Event {
    pub fn new(
        aggregate_name: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        sequence_number: i64,
    ) -> Self {
        Self {
            aggregate_name: aggregate_name.into(),
            aggregate_id: aggregate_id.into(),
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            metadata: Map::new(),
            payload: Map::new(),
            sequence_number,
            event_timestamp: None,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = event_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// Copy of this event without the store-assigned timestamp.
    pub fn without_timestamp(&self) -> Self {
        Self {
            event_timestamp: None,
            ..self.clone()
        }
    }

    /// Decode a loosely-typed candidate event, reporting the first missing
    /// or malformed field.
    pub fn from_value(value: Value) -> Result<Self, InvalidEventError> {
        let Value::Object(fields) = &value else {
            return Err(InvalidEventError::NotAnObject);
        };

        for field in REQUIRED_FIELDS {
            if !fields.contains_key(*field) {
                return Err(InvalidEventError::MissingField(field));
            }
        }

        serde_json::from_value(value).map_err(|e| InvalidEventError::Malformed(e.to_string()))
    }
}

const REQUIRED_FIELDS: &[&str] = &[
    "aggregateName",
    "aggregateId",
    "eventId",
    "type",
    "metadata",
    "payload",
    "sequenceNumber",
];

// ============================================================================
// Event Validation - External Collaborator Contract
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvalidEventError {
    #[error("event must be an object")]
    NotAnObject,

    #[error("event missing required field: {0}")]
    MissingField(&'static str),

    #[error("event field {field} is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("malformed event: {0}")]
    Malformed(String),
}

/// Inspects a candidate event before any write is attempted.
pub trait EventValidator: Send + Sync {
    fn validate(&self, event: &Event) -> Result<(), InvalidEventError>;
}

impl<F> EventValidator for F
where
    F: Fn(&Event) -> Result<(), InvalidEventError> + Send + Sync,
{
    fn validate(&self, event: &Event) -> Result<(), InvalidEventError> {
        self(event)
    }
}

/// Structural checks every persisted event must pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl EventValidator for SchemaValidator {
    fn validate(&self, event: &Event) -> Result<(), InvalidEventError> {
        let required = [
            ("aggregateName", &event.aggregate_name),
            ("aggregateId", &event.aggregate_id),
            ("eventId", &event.event_id),
            ("type", &event.event_type),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(InvalidEventError::MissingField(field));
            }
        }

        if event.sequence_number < 1 {
            return Err(InvalidEventError::InvalidField {
                field: "sequenceNumber",
                reason: format!("must be >= 1, got {}", event.sequence_number),
            });
        }

        if event.event_timestamp.is_some() {
            return Err(InvalidEventError::InvalidField {
                field: "eventTimestamp",
                reason: "assigned by the store, must not be supplied".to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn author_set(sequence_number: i64) -> Event {
        Event::new("book", "book-1", "AUTHOR_SET", sequence_number)
            .with_metadata("userId", json!(1234))
            .with_payload("author", json!("Fitzgerald"))
    }

    #[test]
    fn test_wire_shape_uses_camel_case_and_type() {
        let value = serde_json::to_value(author_set(1)).unwrap();

        assert_eq!(value["aggregateName"], "book");
        assert_eq!(value["type"], "AUTHOR_SET");
        assert_eq!(value["sequenceNumber"], 1);
        assert!(value.get("eventTimestamp").is_none());
    }

    #[test]
    fn test_from_value_reports_missing_type() {
        let candidate = json!({
            "aggregateName": "book",
            "aggregateId": "book-1",
            "eventId": "e-1",
            "metadata": {},
            "payload": {},
            "sequenceNumber": 1,
        });

        assert_eq!(
            Event::from_value(candidate),
            Err(InvalidEventError::MissingField("type"))
        );
    }

    #[test]
    fn test_from_value_rejects_non_object_metadata() {
        let candidate = json!({
            "aggregateName": "book",
            "aggregateId": "book-1",
            "eventId": "e-1",
            "type": "TITLE_SET",
            "metadata": "nope",
            "payload": {},
            "sequenceNumber": 1,
        });

        assert!(matches!(
            Event::from_value(candidate),
            Err(InvalidEventError::Malformed(_))
        ));
    }

    #[test]
    fn test_schema_validator_accepts_well_formed_event() {
        assert!(SchemaValidator.validate(&author_set(1)).is_ok());
    }

    #[test]
    fn test_schema_validator_rejects_blank_type_and_zero_sequence() {
        let mut event = author_set(1);
        event.event_type = String::new();
        assert_eq!(
            SchemaValidator.validate(&event),
            Err(InvalidEventError::MissingField("type"))
        );

        let event = author_set(0);
        assert!(matches!(
            SchemaValidator.validate(&event),
            Err(InvalidEventError::InvalidField { field: "sequenceNumber", .. })
        ));
    }

    #[test]
    fn test_closure_is_a_validator() {
        let reject_all = |_: &Event| -> Result<(), InvalidEventError> {
            Err(InvalidEventError::Malformed("closed".into()))
        };
        assert!(reject_all.validate(&author_set(1)).is_err());
    }
}
