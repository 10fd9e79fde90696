use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

// ============================================================================
// Key Expressions - Parameterized Conditions With Binding Tables
// ============================================================================
//
// Field names never appear in expression text. They are bound to `#n<i>`
// placeholders and values to `:v<i>` placeholders, so reserved words such as
// `type` or odd identifiers cannot be confused with syntax. Backends resolve
// placeholders through the binding table when they build a native request.
//
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExpressionAttributes {
    names: BTreeMap<String, String>,
    values: BTreeMap<String, Value>,
}

impl ExpressionAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an attribute name, reusing the placeholder if already bound.
    pub fn add_name(&mut self, name: &str) -> String {
        if let Some((placeholder, _)) = self.names.iter().find(|(_, bound)| *bound == name) {
            return placeholder.clone();
        }
        let placeholder = format!("#n{}", self.names.len());
        self.names.insert(placeholder.clone(), name.to_string());
        placeholder
    }

    pub fn add_value(&mut self, value: impl Into<Value>) -> String {
        let placeholder = format!(":v{}", self.values.len());
        self.values.insert(placeholder.clone(), value.into());
        placeholder
    }

    pub fn names(&self) -> &BTreeMap<String, String> {
        &self.names
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    fn name<'a>(&'a self, placeholder: &'a str) -> &'a str {
        self.names.get(placeholder).map(String::as_str).unwrap_or(placeholder)
    }

    fn value(&self, placeholder: &str) -> &Value {
        self.values.get(placeholder).unwrap_or(&Value::Null)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::Eq => "=",
            ComparisonOp::Gt => ">",
            ComparisonOp::Ge => ">=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Le => "<=",
        }
    }

    /// Whether `lhs <op> rhs` holds.
    pub fn holds(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            ComparisonOp::Eq => lhs == rhs,
            ComparisonOp::Gt => lhs > rhs,
            ComparisonOp::Ge => lhs >= rhs,
            ComparisonOp::Lt => lhs < rhs,
            ComparisonOp::Le => lhs <= rhs,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct Comparison {
    name: String,
    op: ComparisonOp,
    value: String,
}

/// A comparison with its placeholders resolved.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolvedComparison<'a> {
    pub attribute: &'a str,
    pub op: ComparisonOp,
    pub value: &'a Value,
}

// ============================================================================
// Key Condition (reads)
// ============================================================================

/// Partition-key equality plus an optional sort-key bound.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyCondition {
    partition: Comparison,
    sort: Option<Comparison>,
    attributes: ExpressionAttributes,
}

impl KeyCondition {
    pub fn partition(attribute: &str, value: impl Into<Value>) -> Self {
        let mut attributes = ExpressionAttributes::new();
        let partition = Comparison {
            name: attributes.add_name(attribute),
            op: ComparisonOp::Eq,
            value: attributes.add_value(value),
        };
        Self {
            partition,
            sort: None,
            attributes,
        }
    }

    pub fn sort_key(mut self, attribute: &str, op: ComparisonOp, value: impl Into<Value>) -> Self {
        let name = self.attributes.add_name(attribute);
        let value = self.attributes.add_value(value);
        self.sort = Some(Comparison { name, op, value });
        self
    }

    pub fn sort_at_least(self, attribute: &str, value: impl Into<Value>) -> Self {
        self.sort_key(attribute, ComparisonOp::Ge, value)
    }

    pub fn attributes(&self) -> &ExpressionAttributes {
        &self.attributes
    }

    pub fn partition_key(&self) -> ResolvedComparison<'_> {
        self.resolve(&self.partition)
    }

    pub fn sort_bound(&self) -> Option<ResolvedComparison<'_>> {
        self.sort.as_ref().map(|sort| self.resolve(sort))
    }

    fn resolve<'a>(&'a self, comparison: &'a Comparison) -> ResolvedComparison<'a> {
        ResolvedComparison {
            attribute: self.attributes.name(&comparison.name),
            op: comparison.op,
            value: self.attributes.value(&comparison.value),
        }
    }
}

impl fmt::Display for KeyCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.partition;
        write!(f, "{} {} {}", p.name, p.op.as_str(), p.value)?;
        if let Some(s) = &self.sort {
            write!(f, " AND {} {} {}", s.name, s.op.as_str(), s.value)?;
        }
        Ok(())
    }
}

// ============================================================================
// Write Condition (conditional inserts)
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct WriteCondition {
    absent: String,
    attributes: ExpressionAttributes,
}

impl WriteCondition {
    /// Succeeds only if no record at the target key carries `attribute`.
    /// Naming the partition key makes this "insert iff absent".
    pub fn attribute_not_exists(attribute: &str) -> Self {
        let mut attributes = ExpressionAttributes::new();
        let absent = attributes.add_name(attribute);
        Self { absent, attributes }
    }

    pub fn attributes(&self) -> &ExpressionAttributes {
        &self.attributes
    }

    pub fn absent_attribute(&self) -> &str {
        self.attributes.name(&self.absent)
    }
}

impl fmt::Display for WriteCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "attribute_not_exists({})", self.absent)
    }
}

/// Quote a CQL identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
