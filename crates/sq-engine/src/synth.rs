//! # Query Synthesizer
//!
//! Assembles the final SQL text for each query shape: aggregated
//! count/group-by, detail projection, compressed-sequence extraction, plus
//! the aligned-metadata and insertion shapes the mutation and insertion
//! endpoints run on.
//!
//! Each shape has two paths. The simple path is a single flat query. The
//! staged path materializes every candidate field in a `computed_fields`
//! CTE first, because window-function-dependent fields (`versionStatus`,
//! `earliestReleaseDate`) cannot be referenced in WHERE or GROUP BY until
//! they exist as columns. Non-staging filters run inside the CTE; filters
//! on staging fields re-apply against the aliases outside.
//!
//! Compilation is pure and total: it performs no I/O, never fails, and the
//! same request always compiles to byte-identical SQL and parameters.

use std::collections::{BTreeMap, BTreeSet};

use crate::bind::{BindValue, ParamBinder};
use crate::fields::{escape_json_key, quote_ident, registry, Join, BASE_TABLE, DISPLAY_FIELDS};
use crate::request::{OrderByField, OrderDirection, QueryRequest};
use crate::resolve;
use crate::schema::OrganismContext;

/// One compiled statement: SQL text plus named bind parameters. The caller
/// executes it; the synthesizer never touches the database.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: BTreeMap<String, BindValue>,
}

/// Which JSONB document a sequence-extraction query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceSource {
    AlignedNucleotide,
    UnalignedNucleotide,
    AminoAcid,
}

impl SequenceSource {
    fn json_root(self) -> &'static str {
        match self {
            SequenceSource::AlignedNucleotide => "alignedNucleotideSequences",
            SequenceSource::UnalignedNucleotide => "unalignedNucleotideSequences",
            SequenceSource::AminoAcid => "alignedAminoAcidSequences",
        }
    }
}

/// A segment or gene within one of the sequence documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceSelector {
    pub source: SequenceSource,
    pub key: String,
}

impl SequenceSelector {
    pub fn aligned_nucleotide(segment: impl Into<String>) -> Self {
        SequenceSelector {
            source: SequenceSource::AlignedNucleotide,
            key: segment.into(),
        }
    }

    pub fn unaligned_nucleotide(segment: impl Into<String>) -> Self {
        SequenceSelector {
            source: SequenceSource::UnalignedNucleotide,
            key: segment.into(),
        }
    }

    pub fn amino_acid(gene: impl Into<String>) -> Self {
        SequenceSelector {
            source: SequenceSource::AminoAcid,
            key: gene.into(),
        }
    }

    /// JSONB path to the per-segment (or per-gene) object.
    pub fn json_path(&self) -> String {
        format!(
            "joint_metadata -> '{}' -> '{}'",
            self.source.json_root(),
            escape_json_key(&self.key)
        )
    }
}

/// Which insertion document an insertion query expands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertionKind {
    Nucleotide,
    AminoAcid,
}

impl InsertionKind {
    fn json_root(self) -> &'static str {
        match self {
            InsertionKind::Nucleotide => "nucleotideInsertions",
            InsertionKind::AminoAcid => "aminoAcidInsertions",
        }
    }
}

//-----------------------------------------------------------------------------
// Aggregated
//-----------------------------------------------------------------------------

/// Compiles a count query, optionally grouped by metadata or computed
/// fields. Grouped results default to `ORDER BY count DESC`.
pub fn build_aggregated_query(request: &QueryRequest, ctx: &OrganismContext) -> CompiledQuery {
    let mut binder = new_binder(ctx);

    let mut candidates: BTreeSet<String> = request.group_by.iter().cloned().collect();
    candidates.extend(resolve::filter_base_fields(request));
    candidates.extend(resolve::order_by_fields(&request.order_by));

    let staged = resolve::needs_staging(&candidates);
    let (simple_filters, staged_filters) = render_filters(request, ctx, &mut binder);

    let order_clause = if !request.order_by.is_empty() {
        build_order_by_clause(&request.order_by, ctx, staged, true)
    } else if !request.group_by.is_empty() {
        Some("count DESC".to_string())
    } else {
        None
    };

    let mut lines: Vec<String> = Vec::new();
    if staged {
        push_computed_fields_cte(
            &mut lines,
            &candidate_select_exprs(&candidates, ctx),
            &resolve::collect_joins(&candidates, ctx),
            &simple_filters,
            None,
        );
        let mut select: Vec<String> = request.group_by.iter().map(|f| quote_ident(f)).collect();
        select.push("COUNT(*) AS count".to_string());
        lines.push(format!("SELECT {}", select.join(", ")));
        lines.push("FROM computed_fields".to_string());
        push_outer_where(&mut lines, &staged_filters);
        if !request.group_by.is_empty() {
            let group: Vec<String> = request.group_by.iter().map(|f| quote_ident(f)).collect();
            lines.push(format!("GROUP BY {}", group.join(", ")));
        }
    } else {
        let mut select = Vec::new();
        for field in &request.group_by {
            select.push(registry().resolve(field).select_expr(ctx));
        }
        select.push("COUNT(*) AS count".to_string());
        lines.push(format!("SELECT {}", select.join(", ")));
        push_from(&mut lines, &resolve::collect_joins(&candidates, ctx));
        push_base_where(&mut lines, &simple_filters, None);
        if !request.group_by.is_empty() {
            let group: Vec<String> = request
                .group_by
                .iter()
                .map(|f| registry().resolve(f).group_expr(ctx))
                .collect();
            lines.push(format!("GROUP BY {}", group.join(", ")));
        }
    }
    if let Some(order) = order_clause {
        lines.push(format!("ORDER BY {order}"));
    }
    push_pagination(&mut lines, request);

    CompiledQuery {
        sql: lines.join("\n"),
        params: binder.into_params(),
    }
}

//-----------------------------------------------------------------------------
// Details
//-----------------------------------------------------------------------------

/// Compiles a row-projection query. `selected_fields = None` (or empty)
/// means all schema metadata fields plus the fixed computed set.
pub fn build_details_query(request: &QueryRequest, ctx: &OrganismContext) -> CompiledQuery {
    let mut binder = new_binder(ctx);

    let select_all = request
        .selected_fields
        .as_ref()
        .map_or(true, |fields| fields.is_empty());
    let fields: Vec<String> = if select_all {
        all_details_fields(ctx)
    } else {
        request.selected_fields.clone().unwrap_or_default()
    };

    let effective_order: Vec<OrderByField> = if request.order_by.is_empty() {
        vec![OrderByField::ascending("accession")]
    } else {
        request.order_by.clone()
    };

    let mut candidates: BTreeSet<String> = fields.iter().cloned().collect();
    candidates.extend(resolve::filter_base_fields(request));
    candidates.extend(resolve::order_by_fields(&effective_order));

    let staged = resolve::needs_staging(&candidates);
    let (simple_filters, staged_filters) = render_filters(request, ctx, &mut binder);
    let order_clause = build_order_by_clause(&effective_order, ctx, staged, false);

    let mut lines: Vec<String> = Vec::new();
    if staged {
        push_computed_fields_cte(
            &mut lines,
            &candidate_select_exprs(&candidates, ctx),
            &resolve::collect_joins(&candidates, ctx),
            &simple_filters,
            None,
        );
        let select = if select_all {
            "*".to_string()
        } else {
            fields
                .iter()
                .map(|f| quote_ident(f))
                .collect::<Vec<_>>()
                .join(", ")
        };
        lines.push(format!("SELECT {select}"));
        lines.push("FROM computed_fields".to_string());
        push_outer_where(&mut lines, &staged_filters);
    } else {
        let select: Vec<String> = fields
            .iter()
            .map(|f| registry().resolve(f).select_expr(ctx))
            .collect();
        lines.push(format!("SELECT {}", select.join(", ")));
        push_from(&mut lines, &resolve::collect_joins(&candidates, ctx));
        push_base_where(&mut lines, &simple_filters, None);
    }
    if let Some(order) = order_clause {
        lines.push(format!("ORDER BY {order}"));
    }
    push_pagination(&mut lines, request);

    CompiledQuery {
        sql: lines.join("\n"),
        params: binder.into_params(),
    }
}

/// The full projection a details query falls back to: the fixed computed
/// set followed by the organism's schema metadata fields.
pub fn all_details_fields(ctx: &OrganismContext) -> Vec<String> {
    let mut fields: Vec<String> = DISPLAY_FIELDS.iter().map(|f| f.to_string()).collect();
    for field in &ctx.metadata_fields {
        if !fields.iter().any(|f| f == field) {
            fields.push(field.clone());
        }
    }
    fields
}

//-----------------------------------------------------------------------------
// Sequence extraction
//-----------------------------------------------------------------------------

/// Compiles a compressed-sequence extraction query for one segment or
/// gene. Ordering is always `(accession, version)` ascending. Staging is
/// triggered only when a filter touches a staging field.
pub fn build_sequence_query(
    request: &QueryRequest,
    ctx: &OrganismContext,
    selector: &SequenceSelector,
) -> CompiledQuery {
    let mut binder = new_binder(ctx);

    let path = selector.json_path();
    let compressed = format!("{path} ->> 'compressedSequence' AS compressed_seq");
    let not_null = format!("{path} IS NOT NULL");

    let candidates = resolve::filter_base_fields(request);
    let staged = resolve::needs_staging(&candidates);
    let (simple_filters, staged_filters) = render_filters(request, ctx, &mut binder);

    let mut lines: Vec<String> = Vec::new();
    if staged {
        let mut select = vec!["accession".to_string(), "version".to_string()];
        select.extend(staging_select_exprs(&candidates, ctx));
        select.push(compressed);
        push_computed_fields_cte(
            &mut lines,
            &select,
            &resolve::collect_joins(&candidates, ctx),
            &simple_filters,
            Some(&not_null),
        );
        lines.push("SELECT accession, version, compressed_seq".to_string());
        lines.push("FROM computed_fields".to_string());
        push_outer_where(&mut lines, &staged_filters);
    } else {
        lines.push(format!("SELECT accession, version, {compressed}"));
        push_from(&mut lines, &resolve::collect_joins(&candidates, ctx));
        push_base_where(&mut lines, &simple_filters, Some(&not_null));
    }
    lines.push("ORDER BY accession, version".to_string());
    push_pagination(&mut lines, request);

    CompiledQuery {
        sql: lines.join("\n"),
        params: binder.into_params(),
    }
}

/// Compiles the query feeding the mutation caller: accession, version and
/// the full aligned nucleotide and amino-acid JSONB documents.
pub fn build_aligned_metadata_query(
    request: &QueryRequest,
    ctx: &OrganismContext,
) -> CompiledQuery {
    let mut binder = new_binder(ctx);

    let projections = [
        "joint_metadata -> 'alignedNucleotideSequences' AS aligned_sequences",
        "joint_metadata -> 'alignedAminoAcidSequences' AS amino_acid_sequences",
    ];

    let candidates = resolve::filter_base_fields(request);
    let staged = resolve::needs_staging(&candidates);
    let (simple_filters, staged_filters) = render_filters(request, ctx, &mut binder);

    let mut lines: Vec<String> = Vec::new();
    if staged {
        let mut select = vec!["accession".to_string(), "version".to_string()];
        select.extend(staging_select_exprs(&candidates, ctx));
        select.extend(projections.iter().map(|p| p.to_string()));
        push_computed_fields_cte(
            &mut lines,
            &select,
            &resolve::collect_joins(&candidates, ctx),
            &simple_filters,
            None,
        );
        lines.push(
            "SELECT accession, version, aligned_sequences, amino_acid_sequences".to_string(),
        );
        lines.push("FROM computed_fields".to_string());
        push_outer_where(&mut lines, &staged_filters);
    } else {
        lines.push(format!(
            "SELECT accession, version, {}",
            projections.join(", ")
        ));
        push_from(&mut lines, &resolve::collect_joins(&candidates, ctx));
        push_base_where(&mut lines, &simple_filters, None);
    }
    lines.push("ORDER BY accession, version".to_string());
    push_pagination(&mut lines, request);

    CompiledQuery {
        sql: lines.join("\n"),
        params: binder.into_params(),
    }
}

//-----------------------------------------------------------------------------
// Insertions
//-----------------------------------------------------------------------------

/// Compiles the insertion-aggregation query: expands the per-segment (or
/// per-gene) insertion arrays with LATERAL `jsonb_each`, parses the
/// `position:symbols` strings, and groups them into counted rows.
pub fn build_insertions_query(
    request: &QueryRequest,
    ctx: &OrganismContext,
    kind: InsertionKind,
) -> CompiledQuery {
    let mut binder = new_binder(ctx);

    let document = format!("joint_metadata -> '{}'", kind.json_root());
    let not_null = format!("{document} IS NOT NULL");

    let candidates = resolve::filter_base_fields(request);
    let staged = resolve::needs_staging(&candidates);
    let (simple_filters, staged_filters) = render_filters(request, ctx, &mut binder);
    let joins = resolve::collect_joins(&candidates, ctx);

    let mut lines: Vec<String> = Vec::new();
    if staged {
        // Filter rows through the computed CTE first, then expand.
        let mut select = staging_select_exprs(&candidates, ctx);
        select.push(format!("{document} AS insertions_document"));
        push_computed_fields_cte(&mut lines, &select, &joins, &simple_filters, Some(&not_null));
        lines.push(", filtered_entries AS (".to_string());
        lines.push("    SELECT insertions_document".to_string());
        lines.push("    FROM computed_fields".to_string());
        if !staged_filters.is_empty() {
            lines.push(format!("    WHERE {}", staged_filters.join("\n      AND ")));
        }
        lines.push(")".to_string());
        lines.push(", segments_expanded AS (".to_string());
        lines.push("    SELECT segment_name, insertions_array".to_string());
        lines.push("    FROM filtered_entries,".to_string());
        lines.push(
            "    LATERAL jsonb_each(insertions_document) AS segments(segment_name, insertions_array)"
                .to_string(),
        );
        lines.push("    WHERE jsonb_typeof(insertions_array) = 'array'".to_string());
        lines.push(")".to_string());
    } else {
        lines.push("WITH segments_expanded AS (".to_string());
        lines.push("    SELECT segment_name, insertions_array".to_string());
        lines.push(format!("    FROM {BASE_TABLE},"));
        lines.push(format!(
            "    LATERAL jsonb_each({document}) AS segments(segment_name, insertions_array)"
        ));
        for join in &joins {
            lines.push(format!("    {}", join.clause()));
        }
        lines.push("    WHERE organism = :organism".to_string());
        lines.push("      AND released_at IS NOT NULL".to_string());
        lines.push(format!("      AND {not_null}"));
        lines.push("      AND jsonb_typeof(insertions_array) = 'array'".to_string());
        for clause in &simple_filters {
            lines.push(format!("      AND {clause}"));
        }
        lines.push(")".to_string());
    }

    lines.push(", insertions_data AS (".to_string());
    lines.push(
        "    SELECT segment_name, jsonb_array_elements_text(insertions_array) AS insertion_str"
            .to_string(),
    );
    lines.push("    FROM segments_expanded".to_string());
    lines.push(")".to_string());
    lines.push(", parsed_insertions AS (".to_string());
    lines.push("    SELECT segment_name,".to_string());
    lines.push("           split_part(insertion_str, ':', 1)::int AS position,".to_string());
    lines.push("           split_part(insertion_str, ':', 2) AS inserted_symbols".to_string());
    lines.push("    FROM insertions_data".to_string());
    lines.push(")".to_string());
    lines.push(
        "SELECT 'ins_' || segment_name || ':' || position || ':' || inserted_symbols AS insertion,"
            .to_string(),
    );
    lines.push("       COUNT(*) AS count,".to_string());
    lines.push("       inserted_symbols,".to_string());
    lines.push("       position,".to_string());
    lines.push("       segment_name AS sequence_name".to_string());
    lines.push("FROM parsed_insertions".to_string());
    lines.push("GROUP BY segment_name, position, inserted_symbols".to_string());
    match kind {
        InsertionKind::Nucleotide => {
            lines.push("ORDER BY count DESC, position ASC".to_string());
        }
        InsertionKind::AminoAcid => {
            lines.push("ORDER BY count DESC, segment_name ASC, position ASC".to_string());
        }
    }

    CompiledQuery {
        sql: lines.join("\n"),
        params: binder.into_params(),
    }
}

//-----------------------------------------------------------------------------
// Shared assembly
//-----------------------------------------------------------------------------

fn new_binder(ctx: &OrganismContext) -> ParamBinder {
    let mut binder = ParamBinder::new();
    binder.bind_constant("organism", BindValue::Text(ctx.organism.clone()));
    binder
}

/// Renders every filter, splitting clauses into (inner, outer) halves:
/// non-staging filters compare raw expressions inside the base query or
/// CTE; staging-field filters compare the quoted alias in the outer query.
fn render_filters(
    request: &QueryRequest,
    ctx: &OrganismContext,
    binder: &mut ParamBinder,
) -> (Vec<String>, Vec<String>) {
    let mut simple = Vec::new();
    let mut staged = Vec::new();
    for (key, value) in &request.filters {
        let (base, op) = resolve::resolve_filter_key(key, value);
        let def = registry().resolve(base);
        if def.requires_staging {
            let clause = binder.render_filter(&quote_ident(base), key, base, op, value);
            staged.push(clause);
        } else {
            let clause = binder.render_filter(&def.filter_expr(ctx), key, base, op, value);
            simple.push(clause);
        }
    }
    (simple, staged)
}

fn candidate_select_exprs(candidates: &BTreeSet<String>, ctx: &OrganismContext) -> Vec<String> {
    candidates
        .iter()
        .map(|f| registry().resolve(f).select_expr(ctx))
        .collect()
}

fn staging_select_exprs(candidates: &BTreeSet<String>, ctx: &OrganismContext) -> Vec<String> {
    candidates
        .iter()
        .map(|f| registry().resolve(f))
        .filter(|def| def.requires_staging)
        .map(|def| def.select_expr(ctx))
        .collect()
}

fn push_from(lines: &mut Vec<String>, joins: &BTreeSet<Join>) {
    lines.push(format!("FROM {BASE_TABLE}"));
    for join in joins {
        lines.push(join.clause().to_string());
    }
}

fn push_base_where(lines: &mut Vec<String>, filters: &[String], extra: Option<&str>) {
    lines.push("WHERE organism = :organism".to_string());
    lines.push("  AND released_at IS NOT NULL".to_string());
    if let Some(extra) = extra {
        lines.push(format!("  AND {extra}"));
    }
    for clause in filters {
        lines.push(format!("  AND {clause}"));
    }
}

fn push_outer_where(lines: &mut Vec<String>, filters: &[String]) {
    if filters.is_empty() {
        return;
    }
    lines.push(format!("WHERE {}", filters.join("\n  AND ")));
}

/// Emits `WITH computed_fields AS (...)`, the first half of every staged
/// query.
fn push_computed_fields_cte(
    lines: &mut Vec<String>,
    select: &[String],
    joins: &BTreeSet<Join>,
    simple_filters: &[String],
    extra_predicate: Option<&str>,
) {
    lines.push("WITH computed_fields AS (".to_string());
    lines.push(format!("    SELECT {}", select.join(", ")));
    lines.push(format!("    FROM {BASE_TABLE}"));
    for join in joins {
        lines.push(format!("    {}", join.clause()));
    }
    lines.push("    WHERE organism = :organism".to_string());
    lines.push("      AND released_at IS NOT NULL".to_string());
    if let Some(extra) = extra_predicate {
        lines.push(format!("      AND {extra}"));
    }
    for clause in simple_filters {
        lines.push(format!("      AND {clause}"));
    }
    lines.push(")".to_string());
}

fn push_pagination(lines: &mut Vec<String>, request: &QueryRequest) {
    if let Some(limit) = request.limit {
        lines.push(format!("LIMIT {limit}"));
    }
    if request.offset > 0 {
        lines.push(format!("OFFSET {}", request.offset));
    }
}

/// Resolves the ORDER BY clause text. `random` becomes `RANDOM()`; `count`
/// orders by the aggregated count; any other field uses its definition's
/// fragments — alias form inside staged queries, raw form otherwise.
/// NULL placement follows Postgres defaults and is deliberately not forced.
fn build_order_by_clause(
    order_by: &[OrderByField],
    ctx: &OrganismContext,
    alias_form: bool,
    aggregated: bool,
) -> Option<String> {
    if order_by.is_empty() {
        return None;
    }
    let mut fragments = Vec::new();
    for entry in order_by {
        let field = entry.field();
        let parts: Vec<String> = if field == "random" {
            vec!["RANDOM()".to_string()]
        } else if field == "count" && aggregated {
            vec!["count".to_string()]
        } else {
            let def = registry().resolve(field);
            if alias_form {
                def.order_fragments_alias()
            } else {
                def.order_fragments_base(ctx)
            }
        };
        for part in parts {
            fragments.push(match entry.direction() {
                OrderDirection::Ascending => part,
                OrderDirection::Descending => format!("{part} DESC"),
            });
        }
    }
    Some(fragments.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::FilterValue;
    use crate::schema::{DataUseTermsPolicy, OrganismContext};

    fn ctx() -> OrganismContext {
        OrganismContext {
            organism: "west-nile".to_string(),
            metadata_fields: vec![
                "geoLocCountry".to_string(),
                "lineage".to_string(),
                "length".to_string(),
            ],
            earliest_release_date: Default::default(),
            data_use_terms: DataUseTermsPolicy {
                enabled: true,
                open_url: Some("https://example.org/terms/open".to_string()),
                restricted_url: Some("https://example.org/terms/restricted".to_string()),
            },
        }
    }

    #[test]
    fn test_simple_grouped_aggregation() {
        let request = QueryRequest::new()
            .with_group_by(["geoLocCountry"])
            .with_filter("geoLocCountry", "USA");
        let compiled = build_aggregated_query(&request, &ctx());

        assert!(!compiled.sql.contains("WITH"));
        assert!(compiled
            .sql
            .contains("joint_metadata -> 'metadata' ->> 'geoLocCountry' AS \"geoLocCountry\""));
        assert!(compiled
            .sql
            .contains("GROUP BY joint_metadata -> 'metadata' ->> 'geoLocCountry'"));
        assert!(compiled.sql.contains("ORDER BY count DESC"));
        assert_eq!(
            compiled.params["filter_geoLocCountry"],
            BindValue::Text("USA".into())
        );
        assert!(!compiled.sql.contains("USA"));
    }

    #[test]
    fn test_ungrouped_count_has_no_order_or_group() {
        let request = QueryRequest::new();
        let compiled = build_aggregated_query(&request, &ctx());
        assert!(compiled.sql.starts_with("SELECT COUNT(*) AS count"));
        assert!(!compiled.sql.contains("GROUP BY"));
        assert!(!compiled.sql.contains("ORDER BY"));
    }

    #[test]
    fn test_staging_field_forces_cte_in_aggregation() {
        let request = QueryRequest::new().with_group_by(["versionStatus"]);
        let compiled = build_aggregated_query(&request, &ctx());
        assert!(compiled.sql.starts_with("WITH computed_fields AS ("));
        assert!(compiled.sql.contains("GROUP BY \"versionStatus\""));
    }

    #[test]
    fn test_staged_details_filter_uses_alias_not_raw_expression() {
        let request = QueryRequest::new()
            .with_selected_fields(["accession", "versionStatus"])
            .with_filter("versionStatus", "REVISED");
        let compiled = build_details_query(&request, &ctx());

        assert!(compiled.sql.starts_with("WITH computed_fields AS ("));
        // The outer WHERE filters on the alias, never the CASE expression.
        let outer_start = compiled.sql.rfind("FROM computed_fields").unwrap();
        let outer_sql = &compiled.sql[outer_start..];
        assert!(outer_sql.contains("WHERE \"versionStatus\" = :filter_versionStatus"));
        assert!(!outer_sql.contains("CASE"));
    }

    #[test]
    fn test_no_staging_field_means_no_cte() {
        let request = QueryRequest::new()
            .with_selected_fields(["accession", "geoLocCountry"])
            .with_filter("lineage", "1A");
        let compiled = build_details_query(&request, &ctx());
        assert!(!compiled.sql.contains("WITH"));
    }

    #[test]
    fn test_staging_via_order_by_dependency() {
        let request = QueryRequest::new()
            .with_selected_fields(["accession"])
            .with_order_by(vec![OrderByField::ascending("earliestReleaseDate")]);
        let compiled = build_details_query(&request, &ctx());
        assert!(compiled.sql.starts_with("WITH computed_fields AS ("));
        assert!(compiled.sql.contains("ORDER BY \"earliestReleaseDate\""));
    }

    #[test]
    fn test_compilation_is_idempotent() {
        let request = QueryRequest::new()
            .with_group_by(["lineage"])
            .with_filter("versionStatus", "REVOKED")
            .with_filter("geoLocCountry", "USA")
            .with_limit(100)
            .with_offset(20);
        let first = build_aggregated_query(&request, &ctx());
        let second = build_aggregated_query(&request, &ctx());
        assert_eq!(first, second);
    }

    #[test]
    fn test_joins_are_deduplicated_in_canonical_order() {
        let request = QueryRequest::new().with_selected_fields([
            "groupName",
            "dataUseTerms",
            "dataUseTermsUrl",
        ]);
        let compiled = build_details_query(&request, &ctx());

        let groups = compiled.sql.matches("LEFT JOIN groups_table").count();
        let dut = compiled.sql.matches("LEFT JOIN data_use_terms_table").count();
        assert_eq!(groups, 1);
        assert_eq!(dut, 1);
        let groups_pos = compiled.sql.find("LEFT JOIN groups_table").unwrap();
        let dut_pos = compiled.sql.find("LEFT JOIN data_use_terms_table").unwrap();
        assert!(groups_pos < dut_pos);
    }

    #[test]
    fn test_range_filters_share_the_underlying_expression() {
        let request = QueryRequest::new()
            .with_filter("lengthFrom", "10000")
            .with_filter("lengthTo", "11000");
        let compiled = build_details_query(&request, &ctx());

        let expr = "joint_metadata -> 'metadata' ->> 'length'";
        assert!(compiled
            .sql
            .contains(&format!("{expr} >= :filter_lengthFrom")));
        assert!(compiled
            .sql
            .contains(&format!("{expr} <= :filter_lengthTo")));
    }

    #[test]
    fn test_lower_bound_alone_omits_upper_clause() {
        let request = QueryRequest::new().with_filter("lengthFrom", "10000");
        let compiled = build_details_query(&request, &ctx());
        assert!(compiled.sql.contains(">= :filter_lengthFrom"));
        assert!(!compiled.sql.contains("<="));
    }

    #[test]
    fn test_list_filter_expands_and_binds_every_element() {
        let request = QueryRequest::new().with_filter(
            "lineage",
            FilterValue::List(vec!["1A".into(), "1B".into()]),
        );
        let compiled = build_details_query(&request, &ctx());
        assert!(compiled
            .sql
            .contains("IN (:filter_lineage_0, :filter_lineage_1)"));
        assert_eq!(compiled.params["filter_lineage_0"], BindValue::Text("1A".into()));
        assert_eq!(compiled.params["filter_lineage_1"], BindValue::Text("1B".into()));
        assert!(!compiled.sql.contains("1A"));
    }

    #[test]
    fn test_descending_order_by() {
        let request = QueryRequest::new()
            .with_group_by(["geoLocCountry"])
            .with_order_by(vec![OrderByField::descending("geoLocCountry")]);
        let compiled = build_aggregated_query(&request, &ctx());
        assert!(compiled
            .sql
            .contains("ORDER BY joint_metadata -> 'metadata' ->> 'geoLocCountry' DESC"));
    }

    #[test]
    fn test_order_by_random_and_count() {
        let request = QueryRequest::new()
            .with_group_by(["lineage"])
            .with_order_by(vec![
                OrderByField::descending("count"),
                OrderByField::ascending("random"),
            ]);
        let compiled = build_aggregated_query(&request, &ctx());
        assert!(compiled.sql.contains("ORDER BY count DESC, RANDOM()"));
    }

    #[test]
    fn test_order_by_accession_version_expands_to_pair() {
        let request = QueryRequest::new()
            .with_selected_fields(["accessionVersion"])
            .with_order_by(vec![OrderByField::ascending("accessionVersion")]);
        let compiled = build_details_query(&request, &ctx());
        assert!(compiled.sql.contains("ORDER BY accession, version"));
    }

    #[test]
    fn test_details_default_order_is_accession_ascending() {
        let request = QueryRequest::new().with_selected_fields(["geoLocCountry"]);
        let compiled = build_details_query(&request, &ctx());
        assert!(compiled.sql.ends_with("ORDER BY accession"));
    }

    #[test]
    fn test_details_select_all_goes_through_cte() {
        let request = QueryRequest::new().with_limit(10);
        let compiled = build_details_query(&request, &ctx());
        // The fixed computed set contains staging fields, so "all fields"
        // always stages and projects the CTE wholesale.
        assert!(compiled.sql.starts_with("WITH computed_fields AS ("));
        assert!(compiled.sql.contains("SELECT *"));
        assert!(compiled.sql.contains("\"earliestReleaseDate\""));
        assert!(compiled.sql.ends_with("LIMIT 10"));
    }

    #[test]
    fn test_sequence_query_simple_shape() {
        let request = QueryRequest::new().with_filter("geoLocCountry", "USA");
        let selector = SequenceSelector::unaligned_nucleotide("main");
        let compiled = build_sequence_query(&request, &ctx(), &selector);

        let path = "joint_metadata -> 'unalignedNucleotideSequences' -> 'main'";
        assert!(!compiled.sql.contains("WITH"));
        assert!(compiled.sql.contains(&format!(
            "SELECT accession, version, {path} ->> 'compressedSequence' AS compressed_seq"
        )));
        assert!(compiled.sql.contains(&format!("AND {path} IS NOT NULL")));
        assert!(compiled.sql.contains("ORDER BY accession, version"));
    }

    #[test]
    fn test_sequence_query_stages_only_for_staging_filters() {
        let request = QueryRequest::new().with_filter("versionStatus", "LATEST_VERSION");
        let selector = SequenceSelector::amino_acid("E");
        let compiled = build_sequence_query(&request, &ctx(), &selector);

        assert!(compiled.sql.starts_with("WITH computed_fields AS ("));
        assert!(compiled.sql.contains("SELECT accession, version, compressed_seq"));
        assert!(compiled
            .sql
            .contains("WHERE \"versionStatus\" = :filter_versionStatus"));
    }

    #[test]
    fn test_aggregated_staged_applies_simple_filters_inside_cte() {
        let request = QueryRequest::new()
            .with_group_by(["versionStatus"])
            .with_filter("geoLocCountry", "USA");
        let compiled = build_aggregated_query(&request, &ctx());

        let cte_end = compiled.sql.find("\n)").unwrap();
        let cte = &compiled.sql[..cte_end];
        assert!(cte.contains(":filter_geoLocCountry"));
        let outer = &compiled.sql[cte_end..];
        assert!(!outer.contains(":filter_geoLocCountry"));
    }

    #[test]
    fn test_insertions_query_shapes() {
        let simple = build_insertions_query(
            &QueryRequest::new().with_filter("geoLocCountry", "USA"),
            &ctx(),
            InsertionKind::Nucleotide,
        );
        assert!(simple.sql.starts_with("WITH segments_expanded AS ("));
        assert!(simple.sql.contains("jsonb_each(joint_metadata -> 'nucleotideInsertions')"));
        assert!(simple.sql.contains("ORDER BY count DESC, position ASC"));

        let staged = build_insertions_query(
            &QueryRequest::new().with_filter("versionStatus", "LATEST_VERSION"),
            &ctx(),
            InsertionKind::AminoAcid,
        );
        assert!(staged.sql.starts_with("WITH computed_fields AS ("));
        assert!(staged.sql.contains("filtered_entries"));
        assert!(staged
            .sql
            .contains("ORDER BY count DESC, segment_name ASC, position ASC"));
    }

    #[test]
    fn test_every_scalar_filter_binds_exactly_one_parameter() {
        let request = QueryRequest::new()
            .with_filter("geoLocCountry", "USA")
            .with_filter("lineage", "1A")
            .with_filter("versionStatus", "REVISED");
        let compiled = build_details_query(&request, &ctx());
        // organism + three filters
        assert_eq!(compiled.params.len(), 4);
    }

    #[test]
    fn test_aligned_metadata_query_projects_both_documents() {
        let request = QueryRequest::new().with_filter("geoLocCountry", "USA");
        let compiled = build_aligned_metadata_query(&request, &ctx());
        assert!(compiled
            .sql
            .contains("joint_metadata -> 'alignedNucleotideSequences' AS aligned_sequences"));
        assert!(compiled
            .sql
            .contains("joint_metadata -> 'alignedAminoAcidSequences' AS amino_acid_sequences"));
        assert!(compiled.sql.contains("ORDER BY accession, version"));
    }
}
