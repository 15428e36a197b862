//! # Filter/Ordering Resolver
//!
//! Decides, for one request, which base fields are touched, whether any of
//! them forces the staged (CTE) query shape, and which joins the query
//! needs.

use std::collections::BTreeSet;

use crate::fields::{registry, Join};
use crate::request::{FilterValue, OrderByField, QueryRequest};
use crate::schema::OrganismContext;

/// Comparison operator a filter key resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    In,
    Gte,
    Lte,
}

impl FilterOp {
    pub fn sql(self) -> &'static str {
        match self {
            FilterOp::Eq => "=",
            FilterOp::In => "IN",
            FilterOp::Gte => ">=",
            FilterOp::Lte => "<=",
        }
    }
}

/// Pseudo-fields valid only in `order_by`; they resolve to no definition.
pub fn is_pseudo_order_field(name: &str) -> bool {
    name == "random" || name == "count"
}

/// Strips the `From`/`To` range suffix from a filter key.
///
/// `lengthFrom` filters `length` with `>=`, `lengthTo` with `<=`; anything
/// else is an exact match, upgraded to `IN` for list values. A key that is
/// nothing but a suffix (`"From"`) is left alone.
pub fn resolve_filter_key<'a>(key: &'a str, value: &FilterValue) -> (&'a str, FilterOp) {
    if let Some(base) = key.strip_suffix("From") {
        if !base.is_empty() {
            return (base, FilterOp::Gte);
        }
    }
    if let Some(base) = key.strip_suffix("To") {
        if !base.is_empty() {
            return (base, FilterOp::Lte);
        }
    }
    let op = match value {
        FilterValue::List(_) => FilterOp::In,
        _ => FilterOp::Eq,
    };
    (key, op)
}

/// Base fields touched by the request's filters.
pub fn filter_base_fields(request: &QueryRequest) -> BTreeSet<String> {
    request
        .filters
        .iter()
        .map(|(key, value)| resolve_filter_key(key, value).0.to_string())
        .collect()
}

/// Fields an ORDER BY pulls in, expanded through each definition's order
/// dependencies (e.g. `accessionVersion` pulls in `accession` and
/// `version`). Pseudo-fields contribute nothing.
pub fn order_by_fields(order_by: &[OrderByField]) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    for entry in order_by {
        let name = entry.field();
        if is_pseudo_order_field(name) {
            continue;
        }
        let def = registry().resolve(name);
        if def.order_dependencies.is_empty() {
            fields.insert(name.to_string());
        } else {
            for dep in def.order_dependencies {
                fields.insert((*dep).to_string());
            }
        }
    }
    fields
}

/// True iff any of the candidate fields requires the staged query shape.
pub fn needs_staging<'a>(candidates: impl IntoIterator<Item = &'a String>) -> bool {
    candidates
        .into_iter()
        .any(|name| registry().resolve(name).requires_staging)
}

/// Union of the joins the candidate fields need, in canonical order.
pub fn collect_joins<'a>(
    candidates: impl IntoIterator<Item = &'a String>,
    ctx: &OrganismContext,
) -> BTreeSet<Join> {
    let mut joins = BTreeSet::new();
    for name in candidates {
        joins.extend(registry().resolve(name).joins(ctx).iter().copied());
    }
    joins
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::OrderByField;

    #[test]
    fn test_range_suffix_resolution() {
        let v = FilterValue::String("10000".into());
        assert_eq!(resolve_filter_key("lengthFrom", &v), ("length", FilterOp::Gte));
        assert_eq!(resolve_filter_key("lengthTo", &v), ("length", FilterOp::Lte));
        assert_eq!(resolve_filter_key("length", &v), ("length", FilterOp::Eq));
    }

    #[test]
    fn test_bare_suffix_is_not_a_range() {
        let v = FilterValue::String("x".into());
        assert_eq!(resolve_filter_key("From", &v), ("From", FilterOp::Eq));
        assert_eq!(resolve_filter_key("To", &v), ("To", FilterOp::Eq));
    }

    #[test]
    fn test_list_value_upgrades_to_in() {
        let v = FilterValue::List(vec!["A".into(), "B".into()]);
        assert_eq!(resolve_filter_key("lineage", &v), ("lineage", FilterOp::In));
    }

    #[test]
    fn test_staging_verdict() {
        let plain = vec!["accession".to_string(), "geoLocCountry".to_string()];
        assert!(!needs_staging(&plain));

        let staged = vec!["accession".to_string(), "versionStatus".to_string()];
        assert!(needs_staging(&staged));
    }

    #[test]
    fn test_order_by_dependency_closure() {
        let order = vec![
            OrderByField::ascending("accessionVersion"),
            OrderByField::descending("random"),
        ];
        let fields = order_by_fields(&order);
        assert!(fields.contains("accession"));
        assert!(fields.contains("version"));
        assert!(!fields.contains("accessionVersion"));
        assert!(!fields.contains("random"));
    }

    #[test]
    fn test_join_collection_dedupes_in_canonical_order() {
        let mut ctx = OrganismContext::new("west-nile");
        ctx.data_use_terms.enabled = true;
        let fields = vec![
            "dataUseTerms".to_string(),
            "groupName".to_string(),
            "dataUseTermsUrl".to_string(),
        ];
        let joins: Vec<Join> = collect_joins(&fields, &ctx).into_iter().collect();
        assert_eq!(joins, vec![Join::Groups, Join::DataUseTerms]);
    }
}
