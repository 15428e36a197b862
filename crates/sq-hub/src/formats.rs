//! # Response Formatting
//!
//! TSV and FASTA renderings of query results, plus download-attachment
//! filenames. JSON stays with serde in the handlers.

use serde_json::{Map, Value};

/// One decompressed sequence keyed by `accession.version`.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceRecord {
    pub accession_version: String,
    pub sequence: String,
}

/// Renders rows as TSV. Column order comes from `explicit_columns` when
/// given, otherwise from the first row. Nulls render empty; nested JSON
/// values render as compact JSON.
pub fn rows_to_tsv(rows: &[Map<String, Value>], explicit_columns: Option<&[String]>) -> String {
    if rows.is_empty() {
        return String::new();
    }
    let columns: Vec<String> = match explicit_columns {
        Some(cols) => cols.to_vec(),
        None => rows[0].keys().cloned().collect(),
    };
    let mut lines = vec![columns.join("\t")];
    for row in rows {
        let values: Vec<String> = columns
            .iter()
            .map(|col| match row.get(col) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        lines.push(values.join("\t"));
    }
    lines.join("\n")
}

pub fn to_fasta(records: &[SequenceRecord]) -> String {
    let mut lines = Vec::with_capacity(records.len() * 2);
    for record in records {
        lines.push(format!(">{}", record.accession_version));
        lines.push(record.sequence.clone());
    }
    lines.join("\n")
}

/// Filename for a `Content-Disposition: attachment` header.
pub fn attachment_filename(basename: Option<&str>, data_format: &str, default_base: &str) -> String {
    let base = basename.unwrap_or(default_base);
    let extension = match data_format.to_ascii_uppercase().as_str() {
        "JSON" => "json",
        "TSV" => "tsv",
        _ => "fasta",
    };
    format!("{base}.{extension}")
}
