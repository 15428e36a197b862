//! # Database Layer
//!
//! Postgres access via sqlx. The engine emits named `:param` placeholders;
//! sqlx speaks positional `$n`, so [`to_positional`] rewrites the statement
//! (leaving `::type` casts and quoted literals untouched) and lines the bind
//! values up in first-appearance order. Result rows are decoded into JSON
//! objects by column type so handlers never deal with `PgRow` directly.

use std::collections::HashMap;

use serde_json::{Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};

use sq_engine::{BindValue, CompiledQuery};

use crate::error::HubError;

pub async fn connect(url: &str, pool_size: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(pool_size)
        .connect(url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Executes a compiled query and decodes every row into a JSON object.
pub async fn fetch_rows(
    pool: &PgPool,
    compiled: &CompiledQuery,
) -> Result<Vec<Map<String, Value>>, HubError> {
    let (sql, values) = to_positional(compiled)?;
    let mut query = sqlx::query(&sql);
    for value in values {
        query = match value {
            BindValue::Text(s) => query.bind(s.clone()),
            BindValue::Int(i) => query.bind(*i),
            BindValue::Float(f) => query.bind(*f),
            BindValue::Bool(b) => query.bind(*b),
        };
    }
    let rows = query.fetch_all(pool).await?;
    rows.iter().map(row_to_json).collect()
}

/// Rewrites named `:param` placeholders to positional `$n`.
///
/// `::` casts and the contents of single-quoted literals pass through
/// unchanged; a repeated name reuses its first index. A placeholder with no
/// matching parameter is a bug in the compiler, reported as internal.
pub fn to_positional(compiled: &CompiledQuery) -> Result<(String, Vec<&BindValue>), HubError> {
    let sql = &compiled.sql;
    let mut out = String::with_capacity(sql.len() + 16);
    let mut values: Vec<&BindValue> = Vec::new();
    let mut indices: HashMap<&str, usize> = HashMap::new();

    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            // Quoted literal: copy verbatim through the closing quote.
            // Doubled quotes inside stay part of the literal.
            '\'' => {
                out.push('\'');
                while let Some(lc) = chars.next() {
                    out.push(lc);
                    if lc == '\'' {
                        if chars.peek() == Some(&'\'') {
                            out.push('\'');
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            ':' => {
                if chars.peek() == Some(&':') {
                    out.push_str("::");
                    chars.next();
                    continue;
                }
                let mut name = String::new();
                while let Some(&nc) = chars.peek() {
                    if nc.is_ascii_alphanumeric() || nc == '_' {
                        name.push(nc);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    out.push(':');
                    continue;
                }
                let index = match indices.get(name.as_str()) {
                    Some(&i) => i,
                    None => {
                        let (key, value) = compiled
                            .params
                            .get_key_value(&name)
                            .ok_or_else(|| {
                                HubError::Internal(format!("unbound placeholder :{name}"))
                            })?;
                        values.push(value);
                        let i = values.len();
                        indices.insert(key.as_str(), i);
                        i
                    }
                };
                out.push('$');
                out.push_str(&index.to_string());
            }
            _ => out.push(c),
        }
    }
    Ok((out, values))
}

/// Decodes one row into a JSON object, keyed by column name, dispatching on
/// the Postgres type name.
pub fn row_to_json(row: &PgRow) -> Result<Map<String, Value>, HubError> {
    let mut map = Map::new();
    for column in row.columns() {
        let i = column.ordinal();
        let value = match column.type_info().name() {
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => row
                .try_get::<Option<String>, _>(i)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "INT8" => row
                .try_get::<Option<i64>, _>(i)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "INT4" => row
                .try_get::<Option<i32>, _>(i)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "INT2" => row
                .try_get::<Option<i16>, _>(i)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "FLOAT8" | "FLOAT4" => row
                .try_get::<Option<f64>, _>(i)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "BOOL" => row
                .try_get::<Option<bool>, _>(i)?
                .map(Value::from)
                .unwrap_or(Value::Null),
            "JSON" | "JSONB" => row
                .try_get::<Option<Value>, _>(i)?
                .unwrap_or(Value::Null),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map(|ts| Value::from(ts.to_rfc3339()))
                .unwrap_or(Value::Null),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)?
                .map(|d| Value::from(d.to_string()))
                .unwrap_or(Value::Null),
            other => {
                tracing::warn!(column = column.name(), r#type = other, "undecodable column type");
                Value::Null
            }
        };
        map.insert(column.name().to_string(), value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn compiled(sql: &str, params: &[(&str, BindValue)]) -> CompiledQuery {
        CompiledQuery {
            sql: sql.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_named_placeholders_become_positional() {
        let q = compiled(
            "SELECT 1 WHERE a = :organism AND b = :filter_x",
            &[
                ("organism", BindValue::Text("west-nile".into())),
                ("filter_x", BindValue::Text("y".into())),
            ],
        );
        let (sql, values) = to_positional(&q).unwrap();
        assert_eq!(sql, "SELECT 1 WHERE a = $1 AND b = $2");
        assert_eq!(values, vec![
            &BindValue::Text("west-nile".into()),
            &BindValue::Text("y".into())
        ]);
    }

    #[test]
    fn test_casts_are_not_placeholders() {
        let q = compiled(
            "SELECT x::int WHERE a = :organism",
            &[("organism", BindValue::Text("o".into()))],
        );
        let (sql, _) = to_positional(&q).unwrap();
        assert_eq!(sql, "SELECT x::int WHERE a = $1");
    }

    #[test]
    fn test_colons_inside_string_literals_survive() {
        let q = compiled(
            "SELECT split_part(s, ':', 1), 'it''s :organism' WHERE a = :organism",
            &[("organism", BindValue::Text("o".into()))],
        );
        let (sql, values) = to_positional(&q).unwrap();
        assert_eq!(
            sql,
            "SELECT split_part(s, ':', 1), 'it''s :organism' WHERE a = $1"
        );
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_repeated_name_reuses_index() {
        let q = compiled(
            "SELECT 1 WHERE a = :p AND b = :p",
            &[("p", BindValue::Int(7))],
        );
        let (sql, values) = to_positional(&q).unwrap();
        assert_eq!(sql, "SELECT 1 WHERE a = $1 AND b = $1");
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_unbound_placeholder_is_an_internal_error() {
        let q = compiled("SELECT :missing", &[]);
        assert!(matches!(to_positional(&q), Err(HubError::Internal(_))));
    }
}
