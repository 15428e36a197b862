//! # API Handlers
//!
//! Axum handlers for the LAPIS-compatible sample endpoints. Every handler
//! parses the request into the engine's `QueryRequest`, compiles the
//! matching query shape, executes it, and wraps the result in the
//! `{data, info}` envelope (or TSV/FASTA when asked).
//!
//! GET endpoints take query parameters; POST endpoints take the same
//! parameters as a JSON body. Keys that are not reserved options are
//! metadata filters.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};
use uuid::Uuid;

use sq_engine::{
    build_aggregated_query, build_aligned_metadata_query, build_details_query,
    build_insertions_query, build_sequence_query, FilterValue, InsertionKind, OrderByField,
    QueryRequest, SequenceSelector,
};

use crate::db;
use crate::error::HubError;
use crate::formats::{self, SequenceRecord};
use crate::mutations;
use crate::AppState;

/// Reserved keys that are query options, never metadata filters.
const RESERVED_KEYS: &[&str] = &[
    "fields",
    "limit",
    "offset",
    "orderBy",
    "dataFormat",
    "downloadAsFile",
    "downloadFileBasename",
    "nucleotideMutations",
    "aminoAcidMutations",
    "nucleotideInsertions",
    "aminoAcidInsertions",
];

// =============================================================================
// Request parsing
// =============================================================================

#[derive(Debug, Default)]
struct ParsedQuery {
    fields: Vec<String>,
    order_by: Vec<OrderByField>,
    filters: BTreeMap<String, FilterValue>,
    limit: Option<i64>,
    offset: i64,
    data_format: String,
    download_as_file: bool,
    download_basename: Option<String>,
}

impl ParsedQuery {
    fn into_request(self) -> (QueryRequest, ResponseOptions) {
        let request = QueryRequest {
            filters: self.filters,
            group_by: Vec::new(),
            order_by: self.order_by,
            selected_fields: None,
            limit: self.limit,
            offset: self.offset,
        };
        let options = ResponseOptions {
            data_format: self.data_format,
            download_as_file: self.download_as_file,
            download_basename: self.download_basename,
        };
        (request, options)
    }
}

#[derive(Debug)]
struct ResponseOptions {
    data_format: String,
    download_as_file: bool,
    download_basename: Option<String>,
}

fn parse_get_params(params: &[(String, String)], default_format: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery {
        data_format: default_format.to_string(),
        ..Default::default()
    };
    for (key, value) in params {
        match key.as_str() {
            "fields" => {
                parsed.fields = value
                    .split(',')
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
            }
            // GET order-by values are bare field names, repeatable.
            "orderBy" => parsed.order_by.push(OrderByField::ascending(value.clone())),
            "limit" => parsed.limit = value.parse().ok(),
            "offset" => parsed.offset = value.parse().unwrap_or(0),
            "dataFormat" => parsed.data_format = value.clone(),
            "downloadAsFile" => parsed.download_as_file = value.eq_ignore_ascii_case("true"),
            "downloadFileBasename" => parsed.download_basename = Some(value.clone()),
            key if RESERVED_KEYS.contains(&key) => {}
            _ => add_get_filter(&mut parsed.filters, key, value),
        }
    }
    parsed
}

/// A repeated filter parameter widens to a list (compiled as `IN`).
fn add_get_filter(filters: &mut BTreeMap<String, FilterValue>, key: &str, value: &str) {
    let merged = match filters.remove(key) {
        None => FilterValue::String(value.to_string()),
        Some(FilterValue::String(prev)) => FilterValue::List(vec![prev, value.to_string()]),
        Some(FilterValue::List(mut list)) => {
            list.push(value.to_string());
            FilterValue::List(list)
        }
        Some(other) => other,
    };
    filters.insert(key.to_string(), merged);
}

fn parse_post_body(body: &Value, default_format: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery {
        data_format: default_format.to_string(),
        ..Default::default()
    };
    let Some(obj) = body.as_object() else {
        return parsed;
    };
    if let Some(fields) = obj.get("fields").and_then(Value::as_array) {
        parsed.fields = fields
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
    }
    match obj.get("orderBy") {
        Some(Value::String(field)) => parsed.order_by.push(OrderByField::ascending(field.clone())),
        Some(Value::Array(items)) => {
            for item in items {
                if let Ok(entry) = serde_json::from_value::<OrderByField>(item.clone()) {
                    parsed.order_by.push(entry);
                }
            }
        }
        _ => {}
    }
    parsed.limit = obj.get("limit").and_then(Value::as_i64);
    parsed.offset = obj.get("offset").and_then(Value::as_i64).unwrap_or(0);
    if let Some(format) = obj.get("dataFormat").and_then(Value::as_str) {
        parsed.data_format = format.to_string();
    }
    parsed.download_as_file = obj
        .get("downloadAsFile")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    parsed.download_basename = obj
        .get("downloadFileBasename")
        .and_then(Value::as_str)
        .map(str::to_string);
    for (key, value) in obj {
        if RESERVED_KEYS.contains(&key.as_str()) {
            continue;
        }
        if let Some(filter) = FilterValue::from_json(value) {
            parsed.filters.insert(key.clone(), filter);
        }
    }
    parsed
}

// =============================================================================
// Response assembly
// =============================================================================

fn envelope(data: Value, organism_name: &str, query_info: &str) -> Json<Value> {
    Json(json!({
        "data": data,
        "info": {
            "dataVersion": "0",
            "requestId": Uuid::new_v4().to_string(),
            "requestInfo": format!("{organism_name} on sequela"),
            "queryInfo": query_info,
        }
    }))
}

fn organism_name(state: &AppState, organism: &str) -> Result<String, HubError> {
    Ok(state.config.organism(organism)?.schema.organism_name.clone())
}

fn tsv_response(tsv: String) -> Response {
    (
        [(header::CONTENT_TYPE, "text/tab-separated-values")],
        tsv,
    )
        .into_response()
}

fn with_attachment(
    mut response: Response,
    options: &ResponseOptions,
    default_base: &str,
) -> Result<Response, HubError> {
    if options.download_as_file {
        let filename = formats::attachment_filename(
            options.download_basename.as_deref(),
            &options.data_format,
            default_base,
        );
        let value = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .map_err(|e| HubError::Internal(format!("invalid download filename: {e}")))?;
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}

// =============================================================================
// Root / Health / Ready
// =============================================================================

pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "name": "SEQUELA",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Direct PostgreSQL-backed LAPIS API replacement",
        "organisms": state.config.organisms.keys().collect::<Vec<_>>(),
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let healthy = match db::health_check(&state.pool).await {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("database health check failed: {e}");
            false
        }
    };
    Json(json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "database": if healthy { "connected" } else { "disconnected" },
    }))
}

pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    match db::health_check(&state.pool).await {
        Ok(()) => Json(json!({"status": "ready"})).into_response(),
        Err(e) => {
            tracing::error!("database readiness check failed: {e}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"status": "not ready", "reason": "database not connected"})),
            )
                .into_response()
        }
    }
}

// =============================================================================
// Aggregated
// =============================================================================

pub async fn get_aggregated(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, HubError> {
    let parsed = parse_get_params(&params, "JSON");
    aggregated_impl(&state, &organism, parsed).await
}

pub async fn post_aggregated(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Response, HubError> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let parsed = parse_post_body(&body, "JSON");
    aggregated_impl(&state, &organism, parsed).await
}

async fn aggregated_impl(
    state: &AppState,
    organism: &str,
    parsed: ParsedQuery,
) -> Result<Response, HubError> {
    let ctx = state.config.organism_context(organism)?;
    let name = organism_name(state, organism)?;

    let group_by = parsed.fields.clone();
    let (mut request, options) = parsed.into_request();
    request.group_by = group_by.clone();

    let compiled = build_aggregated_query(&request, &ctx);
    let rows = db::fetch_rows(&state.pool, &compiled).await?;

    let data: Vec<_> = if group_by.is_empty() {
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .cloned()
            .unwrap_or_else(|| json!(0));
        vec![serde_json::Map::from_iter([("count".to_string(), count)])]
    } else {
        rows
    };

    if options.data_format.eq_ignore_ascii_case("TSV") {
        let mut columns = group_by;
        columns.push("count".to_string());
        return Ok(tsv_response(formats::rows_to_tsv(&data, Some(&columns))));
    }
    Ok(envelope(json!(data), &name, "Aggregated query").into_response())
}

// =============================================================================
// Details
// =============================================================================

pub async fn get_details(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, HubError> {
    let parsed = parse_get_params(&params, "JSON");
    details_impl(&state, &organism, parsed).await
}

pub async fn post_details(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Response, HubError> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let parsed = parse_post_body(&body, "JSON");
    details_impl(&state, &organism, parsed).await
}

async fn details_impl(
    state: &AppState,
    organism: &str,
    parsed: ParsedQuery,
) -> Result<Response, HubError> {
    let ctx = state.config.organism_context(organism)?;
    let name = organism_name(state, organism)?;

    let selected = if parsed.fields.is_empty() {
        None
    } else {
        Some(parsed.fields.clone())
    };
    let (mut request, options) = parsed.into_request();
    request.selected_fields = selected;

    let compiled = build_details_query(&request, &ctx);
    let rows = db::fetch_rows(&state.pool, &compiled).await?;

    if options.data_format.eq_ignore_ascii_case("TSV") {
        return Ok(tsv_response(formats::rows_to_tsv(&rows, None)));
    }
    Ok(envelope(json!(rows), &name, "Details query").into_response())
}

// =============================================================================
// Sequences
// =============================================================================

pub async fn get_aligned_nucleotide_sequences(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, HubError> {
    let parsed = parse_get_params(&params, "FASTA");
    let selector = SequenceSelector::aligned_nucleotide("main");
    sequence_impl(&state, &organism, &selector, parsed).await
}

pub async fn post_aligned_nucleotide_sequences(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Response, HubError> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let parsed = parse_post_body(&body, "FASTA");
    let selector = SequenceSelector::aligned_nucleotide("main");
    sequence_impl(&state, &organism, &selector, parsed).await
}

pub async fn get_unaligned_nucleotide_sequences(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, HubError> {
    let parsed = parse_get_params(&params, "FASTA");
    let selector = SequenceSelector::unaligned_nucleotide("main");
    sequence_impl(&state, &organism, &selector, parsed).await
}

pub async fn post_unaligned_nucleotide_sequences(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Response, HubError> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let parsed = parse_post_body(&body, "FASTA");
    let selector = SequenceSelector::unaligned_nucleotide("main");
    sequence_impl(&state, &organism, &selector, parsed).await
}

pub async fn post_unaligned_nucleotide_sequences_segment(
    State(state): State<Arc<AppState>>,
    Path((organism, segment)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> Result<Response, HubError> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let parsed = parse_post_body(&body, "FASTA");
    let selector = SequenceSelector::unaligned_nucleotide(segment);
    sequence_impl(&state, &organism, &selector, parsed).await
}

pub async fn get_amino_acid_sequences(
    State(state): State<Arc<AppState>>,
    Path((organism, gene)): Path<(String, String)>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, HubError> {
    let parsed = parse_get_params(&params, "FASTA");
    let selector = SequenceSelector::amino_acid(gene);
    sequence_impl(&state, &organism, &selector, parsed).await
}

pub async fn post_amino_acid_sequences(
    State(state): State<Arc<AppState>>,
    Path((organism, gene)): Path<(String, String)>,
    body: Option<Json<Value>>,
) -> Result<Response, HubError> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let parsed = parse_post_body(&body, "FASTA");
    let selector = SequenceSelector::amino_acid(gene);
    sequence_impl(&state, &organism, &selector, parsed).await
}

async fn sequence_impl(
    state: &AppState,
    organism: &str,
    selector: &SequenceSelector,
    parsed: ParsedQuery,
) -> Result<Response, HubError> {
    let ctx = state.config.organism_context(organism)?;
    let (request, options) = parsed.into_request();

    let compiled = build_sequence_query(&request, &ctx, selector);
    let rows = db::fetch_rows(&state.pool, &compiled).await?;

    let amino = matches!(selector.source, sq_engine::SequenceSource::AminoAcid);
    let mut records: Vec<SequenceRecord> = Vec::with_capacity(rows.len());
    for row in &rows {
        let Some(av) = accession_version(row) else {
            continue;
        };
        let Some(compressed) = row.get("compressed_seq").and_then(Value::as_str) else {
            continue;
        };
        let result = if amino {
            state
                .compression
                .decompress_amino_acid(compressed, organism, &selector.key)
        } else {
            state
                .compression
                .decompress_nucleotide(compressed, organism, &selector.key)
        };
        match result {
            Ok(sequence) => records.push(SequenceRecord {
                accession_version: av,
                sequence,
            }),
            Err(e) => tracing::error!("error decompressing {av}: {e}"),
        }
    }

    let response = if options.data_format.eq_ignore_ascii_case("JSON") {
        let payload: Vec<Value> = records
            .iter()
            .map(|r| {
                let mut obj = serde_json::Map::new();
                obj.insert("accessionVersion".to_string(), json!(r.accession_version));
                obj.insert(selector.key.clone(), json!(r.sequence));
                Value::Object(obj)
            })
            .collect();
        Json(payload).into_response()
    } else {
        (
            [(header::CONTENT_TYPE, "text/x-fasta")],
            formats::to_fasta(&records),
        )
            .into_response()
    };
    with_attachment(response, &options, &format!("{organism}_sequences"))
}

fn accession_version(row: &serde_json::Map<String, Value>) -> Option<String> {
    let accession = row.get("accession").and_then(Value::as_str)?;
    let version = row.get("version").and_then(Value::as_i64)?;
    Some(format!("{accession}.{version}"))
}

// =============================================================================
// Mutations
// =============================================================================

pub async fn get_nucleotide_mutations(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, HubError> {
    let parsed = parse_get_params(&params, "JSON");
    mutations_impl(&state, &organism, parsed, false).await
}

pub async fn post_nucleotide_mutations(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    body: Option<Json<Value>>,
) -> Result<Response, HubError> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let parsed = merge_post_over_get(&params, &body);
    mutations_impl(&state, &organism, parsed, false).await
}

pub async fn get_amino_acid_mutations(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Response, HubError> {
    let parsed = parse_get_params(&params, "JSON");
    mutations_impl(&state, &organism, parsed, true).await
}

pub async fn post_amino_acid_mutations(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    Query(params): Query<Vec<(String, String)>>,
    body: Option<Json<Value>>,
) -> Result<Response, HubError> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let parsed = merge_post_over_get(&params, &body);
    mutations_impl(&state, &organism, parsed, true).await
}

/// POST mutation endpoints accept filters in both the query string and the
/// body; body values win.
fn merge_post_over_get(params: &[(String, String)], body: &Value) -> ParsedQuery {
    let mut parsed = parse_get_params(params, "JSON");
    let from_body = parse_post_body(body, &parsed.data_format);
    if !from_body.fields.is_empty() {
        parsed.fields = from_body.fields;
    }
    if !from_body.order_by.is_empty() {
        parsed.order_by = from_body.order_by;
    }
    if from_body.limit.is_some() {
        parsed.limit = from_body.limit;
    }
    if from_body.offset != 0 {
        parsed.offset = from_body.offset;
    }
    parsed.data_format = from_body.data_format;
    parsed.filters.extend(from_body.filters);
    parsed
}

async fn mutations_impl(
    state: &AppState,
    organism: &str,
    parsed: ParsedQuery,
    amino: bool,
) -> Result<Response, HubError> {
    let ctx = state.config.organism_context(organism)?;
    let name = organism_name(state, organism)?;
    let genome = &state.config.organism(organism)?.reference_genome;

    let (mut request, _options) = parsed.into_request();
    // Mutation calling always walks the full match set.
    request.limit = None;
    request.offset = 0;

    let compiled = build_aligned_metadata_query(&request, &ctx);
    let rows = db::fetch_rows(&state.pool, &compiled).await?;

    let document_key = if amino {
        "amino_acid_sequences"
    } else {
        "aligned_sequences"
    };

    let mut all_mutations: Vec<mutations::Mutation> = Vec::new();
    for row in &rows {
        let Some(sequences) = row.get(document_key).and_then(Value::as_object) else {
            continue;
        };
        for (key, seq_data) in sequences {
            let Some(compressed) = seq_data.get("compressedSequence").and_then(Value::as_str)
            else {
                continue;
            };
            let decompressed = if amino {
                state.compression.decompress_amino_acid(compressed, organism, key)
            } else {
                state.compression.decompress_nucleotide(compressed, organism, key)
            };
            let sequence = match decompressed {
                Ok(s) => s,
                Err(e) => {
                    let av = accession_version(row).unwrap_or_default();
                    tracing::error!("error calculating mutations for {av}: {e}");
                    continue;
                }
            };
            let reference = if amino {
                genome.gene_sequence(key)
            } else {
                genome.nucleotide_sequence(key)
            };
            let Some(reference) = reference else {
                continue;
            };
            if amino {
                all_mutations.extend(mutations::amino_acid_mutations(reference, &sequence, key));
            } else {
                all_mutations.extend(mutations::nucleotide_mutations(reference, &sequence));
            }
        }
    }

    let query_info = if amino {
        "Amino acid mutations query"
    } else {
        "Nucleotide mutations query"
    };
    Ok(envelope(json!(all_mutations), &name, query_info).into_response())
}

// =============================================================================
// Insertions
// =============================================================================

pub async fn post_nucleotide_insertions(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Response, HubError> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let parsed = parse_post_body(&body, "JSON");
    insertions_impl(&state, &organism, parsed, InsertionKind::Nucleotide).await
}

pub async fn post_amino_acid_insertions(
    State(state): State<Arc<AppState>>,
    Path(organism): Path<String>,
    body: Option<Json<Value>>,
) -> Result<Response, HubError> {
    let body = body.map(|Json(b)| b).unwrap_or_else(|| json!({}));
    let parsed = parse_post_body(&body, "JSON");
    insertions_impl(&state, &organism, parsed, InsertionKind::AminoAcid).await
}

async fn insertions_impl(
    state: &AppState,
    organism: &str,
    parsed: ParsedQuery,
    kind: InsertionKind,
) -> Result<Response, HubError> {
    let ctx = state.config.organism_context(organism)?;
    let name = organism_name(state, organism)?;

    let (request, _options) = parsed.into_request();
    let compiled = build_insertions_query(&request, &ctx, kind);
    let rows = db::fetch_rows(&state.pool, &compiled).await?;

    let query_info = match kind {
        InsertionKind::Nucleotide => "Nucleotide insertions query",
        InsertionKind::AminoAcid => "Amino acid insertions query",
    };
    Ok(envelope(json!(rows), &name, query_info).into_response())
}
