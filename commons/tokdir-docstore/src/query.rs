use std::cmp::Ordering;

use serde_json::Value;

/// A single predicate over a top-level document field
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// The field is an array holding an element equal to `value`
    ArrayContains { field: String, value: Value },
    /// The field is a number strictly greater than `value`
    GreaterThan { field: String, value: Value },
    /// The field equals `value`
    Equal { field: String, value: Value },
}

impl Filter {
    pub fn field(&self) -> &str {
        match self {
            Filter::ArrayContains { field, .. }
            | Filter::GreaterThan { field, .. }
            | Filter::Equal { field, .. } => field,
        }
    }

    pub fn matches(&self, body: &Value) -> bool {
        let Some(actual) = body.get(self.field()) else {
            return false;
        };
        match self {
            Filter::ArrayContains { value, .. } => actual
                .as_array()
                .is_some_and(|items| items.iter().any(|v| v == value)),
            Filter::GreaterThan { value, .. } => {
                compare_numbers(actual, value) == Some(Ordering::Greater)
            }
            Filter::Equal { value, .. } => actual == value,
        }
    }
}

fn compare_numbers(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// Conjunction of filters; results are returned in document id order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn array_contains(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn greater_than(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::GreaterThan {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn equal(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::Equal {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, body: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(body))
    }

    /// First string-valued containment filter, usable against an array index
    pub fn indexed_lookup(&self) -> Option<(&str, &str)> {
        self.filters.iter().find_map(|f| match f {
            Filter::ArrayContains {
                field,
                value: Value::String(s),
            } => Some((field.as_str(), s.as_str())),
            _ => None,
        })
    }
}
