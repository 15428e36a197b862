//! # Parameter Binder
//!
//! Turns filter values into named bind parameters. Filter *values* never
//! appear as literal text in the generated SQL; field *names* come only
//! from the closed registry or an escaped metadata-JSON key.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::request::FilterValue;
use crate::resolve::FilterOp;

/// A typed value bound to one named parameter, so the execution layer can
/// bind without guessing at types.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BindValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

/// Accumulates bind parameters while the synthesizer renders clauses.
///
/// Parameter names are the field name with non-alphanumeric characters
/// replaced by `_`, prefixed with `filter_`; list values expand to indexed
/// names. Names are unique within one statement.
#[derive(Debug, Default)]
pub struct ParamBinder {
    params: BTreeMap<String, BindValue>,
}

impl ParamBinder {
    pub fn new() -> Self {
        ParamBinder::default()
    }

    /// Binds a fixed, caller-controlled parameter such as `:organism`.
    pub fn bind_constant(&mut self, name: &str, value: BindValue) {
        self.params.insert(name.to_string(), value);
    }

    /// Renders `<expr> <op> :param` (or an `IN` list) for one filter and
    /// records the parameter value(s). Returns the SQL fragment.
    pub fn render_filter(
        &mut self,
        expr: &str,
        filter_key: &str,
        base_field: &str,
        op: FilterOp,
        value: &FilterValue,
    ) -> String {
        let name = self.claim_name(filter_key);
        match value {
            FilterValue::List(items) => {
                let mut placeholders = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let indexed = format!("{name}_{i}");
                    self.params
                        .insert(indexed.clone(), convert(base_field, &FilterValue::String(item.clone())));
                    placeholders.push(format!(":{indexed}"));
                }
                format!("{expr} IN ({})", placeholders.join(", "))
            }
            scalar => {
                self.params.insert(name.clone(), convert(base_field, scalar));
                format!("{expr} {} :{name}", op.sql())
            }
        }
    }

    fn claim_name(&self, filter_key: &str) -> String {
        let base = sanitize_param_name(filter_key);
        if !self.taken(&base) {
            return base;
        }
        // Distinct filter keys can sanitize to the same name; disambiguate.
        let mut i = 2;
        loop {
            let candidate = format!("{base}_{i}");
            if !self.taken(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }

    // A list filter only inserts its indexed names, so probe those too.
    fn taken(&self, name: &str) -> bool {
        self.params.contains_key(name) || self.params.contains_key(&format!("{name}_0"))
    }

    pub fn into_params(self) -> BTreeMap<String, BindValue> {
        self.params
    }
}

fn sanitize_param_name(filter_key: &str) -> String {
    let cleaned: String = filter_key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("filter_{cleaned}")
}

/// Normalizes a filter value for binding. Boolean-looking strings for the
/// `isRevocation` filter become real booleans.
fn convert(base_field: &str, value: &FilterValue) -> BindValue {
    if base_field == "isRevocation" {
        if let FilterValue::String(s) = value {
            return BindValue::Bool(s.eq_ignore_ascii_case("true"));
        }
    }
    match value {
        FilterValue::Bool(b) => BindValue::Bool(*b),
        FilterValue::Int(i) => BindValue::Int(*i),
        FilterValue::Float(f) => BindValue::Float(*f),
        FilterValue::String(s) => BindValue::Text(s.clone()),
        FilterValue::List(_) => unreachable!("lists are expanded before conversion"),
    }
}
