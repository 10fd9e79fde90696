use serde_json::{Map, Value};

use super::event::Event;
use crate::event_sourcing::error::RepositoryError;

/// A physical item as exchanged with the backing store.
pub type Record = Map<String, Value>;

/// Sort key attribute of every aggregate table.
pub const SEQUENCE_ATTRIBUTE: &str = "sequenceNumber";

/// Attribute under which stores report the write-time timestamp.
pub const TIMESTAMP_ATTRIBUTE: &str = "eventTimestamp";

const AGGREGATE_NAME: &str = "aggregateName";
const AGGREGATE_ID: &str = "aggregateId";

/// Event -> physical record: the aggregate id moves under the aggregate's
/// identity field and the aggregate name is dropped (the table implies it).
pub fn to_record(event: &Event, identity_field: &str) -> Result<Record, RepositoryError> {
    let Value::Object(mut record) = serde_json::to_value(event)
        .map_err(|e| RepositoryError::MalformedRecord(e.to_string()))?
    else {
        return Err(RepositoryError::MalformedRecord(
            "event did not serialize to an object".to_string(),
        ));
    };

    record.remove(AGGREGATE_NAME);
    record.remove(AGGREGATE_ID);
    record.remove(TIMESTAMP_ATTRIBUTE);
    record.insert(identity_field.to_string(), Value::String(event.aggregate_id.clone()));

    Ok(record)
}

/// Physical record -> Event: the identity field is lifted back into
/// `aggregateId` and the aggregate name reattached.
pub fn from_record(
    mut record: Record,
    aggregate_name: &str,
    identity_field: &str,
) -> Result<Event, RepositoryError> {
    let aggregate_id = match record.remove(identity_field) {
        Some(Value::String(id)) => id,
        Some(other) => {
            return Err(RepositoryError::MalformedRecord(format!(
                "identity field {identity_field} is not a string: {other}"
            )))
        }
        None => {
            return Err(RepositoryError::MalformedRecord(format!(
                "record missing identity field {identity_field}"
            )))
        }
    };

    record.insert(AGGREGATE_NAME.to_string(), Value::String(aggregate_name.to_string()));
    record.insert(AGGREGATE_ID.to_string(), Value::String(aggregate_id));

    serde_json::from_value(Value::Object(record))
        .map_err(|e| RepositoryError::MalformedRecord(e.to_string()))
}
