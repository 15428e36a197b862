//! # Query Request Model
//!
//! The immutable value handed to the synthesizer: filters, grouping,
//! ordering, field selection and pagination. Built once per incoming HTTP
//! request; compilation is a pure function of this value and the
//! [`OrganismContext`](crate::OrganismContext).
//!
//! Filter keys ending in `From`/`To` denote inclusive range bounds on the
//! field obtained by stripping the suffix. `random` and `count` are
//! pseudo-fields valid only in `order_by`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A filter value as it arrives from the request layer.
///
/// Lists expand to `IN` clauses; everything else binds as a single
/// parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
}

impl FilterValue {
    /// Converts a JSON body value into a filter value.
    ///
    /// Returns `None` for nulls and for shapes that cannot act as a filter
    /// (nested objects, mixed arrays), which the request layer drops —
    /// mirroring how absent query parameters are simply not filters.
    pub fn from_json(value: &serde_json::Value) -> Option<FilterValue> {
        match value {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(FilterValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(FilterValue::Int(i))
                } else {
                    n.as_f64().map(FilterValue::Float)
                }
            }
            serde_json::Value::String(s) => Some(FilterValue::String(s.clone())),
            serde_json::Value::Array(items) => {
                let mut list = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        serde_json::Value::String(s) => list.push(s.clone()),
                        serde_json::Value::Number(n) => list.push(n.to_string()),
                        _ => return None,
                    }
                }
                Some(FilterValue::List(list))
            }
            serde_json::Value::Object(_) => None,
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::String(s.to_string())
    }
}

/// Sort direction for an order-by directive. Ascending when omitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDirection {
    #[default]
    Ascending,
    Descending,
}

/// One order-by directive: a bare field name (ascending) or an explicit
/// `{"field": ..., "type": "descending"}` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderByField {
    Name(String),
    Directed {
        field: String,
        #[serde(rename = "type", default)]
        direction: OrderDirection,
    },
}

impl OrderByField {
    pub fn ascending(field: impl Into<String>) -> Self {
        OrderByField::Name(field.into())
    }

    pub fn descending(field: impl Into<String>) -> Self {
        OrderByField::Directed {
            field: field.into(),
            direction: OrderDirection::Descending,
        }
    }

    pub fn field(&self) -> &str {
        match self {
            OrderByField::Name(name) => name,
            OrderByField::Directed { field, .. } => field,
        }
    }

    pub fn direction(&self) -> OrderDirection {
        match self {
            OrderByField::Name(_) => OrderDirection::Ascending,
            OrderByField::Directed { direction, .. } => *direction,
        }
    }
}

/// A parsed query request, immutable once constructed.
///
/// `filters` is a `BTreeMap` so that compilation walks the filters in a
/// stable order and the same request always compiles to byte-identical SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRequest {
    pub filters: BTreeMap<String, FilterValue>,
    pub group_by: Vec<String>,
    pub order_by: Vec<OrderByField>,
    /// `None` means "all known fields for the organism's schema plus the
    /// fixed computed set".
    pub selected_fields: Option<Vec<String>>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl QueryRequest {
    pub fn new() -> Self {
        QueryRequest::default()
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        self.filters.insert(field.into(), value.into());
        self
    }

    pub fn with_group_by(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.group_by = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_selected_fields(
        mut self,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.selected_fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_order_by(mut self, order_by: Vec<OrderByField>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::String(s)
    }
}

impl From<Vec<String>> for FilterValue {
    fn from(list: Vec<String>) -> Self {
        FilterValue::List(list)
    }
}

impl From<i64> for FilterValue {
    fn from(i: i64) -> Self {
        FilterValue::Int(i)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        FilterValue::Bool(b)
    }
}
