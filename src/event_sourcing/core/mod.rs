// ============================================================================
// Event Sourcing Core - Pure Building Blocks
// ============================================================================
//
// No I/O lives here: the event shape and its validation contract, the
// aggregate registry, key expressions, and the record transformer.
//
// ============================================================================

pub mod event;
pub mod expression;
pub mod registry;
pub mod transform;

pub use event::{Event, EventValidator, InvalidEventError, SchemaValidator};
pub use expression::{
    quote_identifier, ComparisonOp, ExpressionAttributes, KeyCondition, ResolvedComparison,
    WriteCondition,
};
pub use registry::{AggregateConfig, AggregateRegistry};
pub use transform::{from_record, to_record, Record, SEQUENCE_ATTRIBUTE, TIMESTAMP_ATTRIBUTE};
