//! Cypher parameter encoding and result-set decoding.
//!
//! FalkorDB takes parameters as a `CYPHER name=value ...` header in front of
//! the query text, and answers in verbose mode with `[header, rows, stats]`.
//! Nodes arrive as `[["id", ..], ["labels", [..]], ["properties", [[k, v], ..]]]`
//! and are decoded into JSON objects so the formatter never sees wire frames.

use graphmind_core::QueryParams;
use serde_json::{Map, Number, Value};

use crate::error::{PoolError, Result};
use crate::resp::Frame;

/// One result row keyed by column name.
pub type Row = Map<String, Value>;

/// A decoded reply to a graph query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub statistics: Vec<String>,
    /// Server-reported execution time, when present in the statistics.
    pub execution_time_ms: Option<f64>,
}

/// Labels, relationship types, and property keys present in a tenant graph.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SchemaSummary {
    pub labels: Vec<String>,
    pub relationship_types: Vec<String>,
    pub property_keys: Vec<String>,
}

impl SchemaSummary {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty() && self.relationship_types.is_empty() && self.property_keys.is_empty()
    }

    /// Compact text form for prompts.
    pub fn describe(&self) -> String {
        format!(
            "Node labels: {}\nRelationship types: {}\nProperty keys: {}",
            join_or_none(&self.labels),
            join_or_none(&self.relationship_types),
            join_or_none(&self.property_keys),
        )
    }
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

// ── Parameter Encoding ───────────────────────────────────────────

/// Prefix `text` with the `CYPHER` parameter header.
pub fn request_text(text: &str, params: &QueryParams) -> String {
    if params.is_empty() {
        return text.to_string();
    }
    let mut out = String::from("CYPHER");
    for (name, value) in params {
        out.push(' ');
        out.push_str(name);
        out.push('=');
        out.push_str(&cypher_literal(value));
    }
    out.push(' ');
    out.push_str(text);
    out
}

/// Render a JSON value as a Cypher literal.
pub fn cypher_literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(cypher_literal).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", map_key(k), cypher_literal(v)))
                .collect();
            format!("{{{}}}", inner.join(", "))
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

fn map_key(k: &str) -> String {
    let plain = !k.is_empty()
        && k.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !k.starts_with(|c: char| c.is_ascii_digit());
    if plain {
        k.to_string()
    } else {
        format!("`{}`", k.replace('`', "``"))
    }
}

// ── Result-Set Decoding ──────────────────────────────────────────

/// Decode a `GRAPH.QUERY`/`GRAPH.RO_QUERY` reply.
///
/// Error elements anywhere in the reply are application errors (`Query`),
/// shapes that are not a result set are `Protocol` errors.
pub fn decode_result_set(frame: Frame) -> Result<QueryResponse> {
    let parts = match frame {
        Frame::Error(msg) => return Err(PoolError::Query(msg)),
        Frame::Array(parts) => parts,
        other => {
            return Err(PoolError::Protocol(format!(
                "expected result-set array, got {other:?}"
            )))
        }
    };

    let (header, rows, stats) = match parts.len() {
        1 => (None, None, parts.into_iter().next()),
        3 => {
            let mut it = parts.into_iter();
            (it.next(), it.next(), it.next())
        }
        n => {
            return Err(PoolError::Protocol(format!(
                "result set has {n} sections, expected 1 or 3"
            )))
        }
    };

    let statistics = match stats {
        Some(Frame::Array(lines)) => lines
            .into_iter()
            .map(|f| match f {
                Frame::Error(msg) => Err(PoolError::Query(msg)),
                other => other
                    .as_text()
                    .map(str::to_string)
                    .ok_or_else(|| PoolError::Protocol("non-text statistics line".into())),
            })
            .collect::<Result<Vec<_>>>()?,
        Some(Frame::Error(msg)) => return Err(PoolError::Query(msg)),
        _ => return Err(PoolError::Protocol("missing statistics section".into())),
    };

    let columns = match header {
        None => Vec::new(),
        Some(Frame::Array(cols)) => cols.iter().map(column_name).collect::<Result<Vec<_>>>()?,
        Some(_) => return Err(PoolError::Protocol("header is not an array".into())),
    };

    let rows = match rows {
        None => Vec::new(),
        Some(Frame::Array(raw_rows)) => {
            let mut out = Vec::with_capacity(raw_rows.len());
            for raw in raw_rows {
                let Frame::Array(values) = raw else {
                    return Err(PoolError::Protocol("row is not an array".into()));
                };
                if values.len() != columns.len() {
                    return Err(PoolError::Protocol(format!(
                        "row has {} values for {} columns",
                        values.len(),
                        columns.len()
                    )));
                }
                let mut row = Row::new();
                for (col, value) in columns.iter().zip(values) {
                    row.insert(col.clone(), frame_to_json(value)?);
                }
                out.push(row);
            }
            out
        }
        Some(Frame::Error(msg)) => return Err(PoolError::Query(msg)),
        Some(_) => return Err(PoolError::Protocol("rows section is not an array".into())),
    };

    let execution_time_ms = statistics.iter().find_map(|line| parse_execution_time(line));

    Ok(QueryResponse {
        columns,
        rows,
        statistics,
        execution_time_ms,
    })
}

/// Verbose headers are plain names; compact headers are `[type, name]` pairs.
fn column_name(frame: &Frame) -> Result<String> {
    if let Some(text) = frame.as_text() {
        return Ok(text.to_string());
    }
    if let Frame::Array(pair) = frame {
        if let Some(name) = pair.get(1).and_then(Frame::as_text) {
            return Ok(name.to_string());
        }
    }
    Err(PoolError::Protocol(format!("invalid column header {frame:?}")))
}

/// Convert a verbose-mode value to JSON.
pub fn frame_to_json(frame: Frame) -> Result<Value> {
    match frame {
        Frame::Null => Ok(Value::Null),
        Frame::Integer(i) => Ok(Value::Number(Number::from(i))),
        Frame::Simple(s) => Ok(Value::String(s)),
        Frame::Bulk(bytes) => Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned())),
        Frame::Error(msg) => Err(PoolError::Query(msg)),
        Frame::Array(items) => {
            if is_pair_list(&items) {
                let mut map = Map::new();
                for item in items {
                    let Frame::Array(mut pair) = item else {
                        continue;
                    };
                    let value = pair.pop().map(frame_to_json).transpose()?.unwrap_or(Value::Null);
                    let key = pair
                        .pop()
                        .and_then(|k| k.as_text().map(str::to_string))
                        .unwrap_or_default();
                    let value = match value {
                        Value::Array(a) if a.is_empty() && key == "properties" => {
                            Value::Object(Map::new())
                        }
                        other => other,
                    };
                    map.insert(key, value);
                }
                Ok(Value::Object(map))
            } else {
                items
                    .into_iter()
                    .map(frame_to_json)
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array)
            }
        }
    }
}

fn is_pair_list(items: &[Frame]) -> bool {
    !items.is_empty()
        && items.iter().all(|item| match item {
            Frame::Array(pair) => pair.len() == 2 && pair[0].as_text().is_some(),
            _ => false,
        })
}

/// Parse `Query internal execution time: 0.52 milliseconds`.
fn parse_execution_time(line: &str) -> Option<f64> {
    let rest = line.strip_prefix("Query internal execution time:")?;
    rest.trim()
        .split_whitespace()
        .next()
        .and_then(|n| n.parse::<f64>().ok())
}

/// First column of every row as a string (for `CALL db.labels()` and friends).
pub fn first_column_strings(response: &QueryResponse) -> Vec<String> {
    response
        .rows
        .iter()
        .filter_map(|row| row.values().next())
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bulk(s: &str) -> Frame {
        Frame::Bulk(s.as_bytes().to_vec())
    }

    fn pair(k: &str, v: Frame) -> Frame {
        Frame::Array(vec![bulk(k), v])
    }

    fn node(id: i64, label: &str, name: &str) -> Frame {
        Frame::Array(vec![
            pair("id", Frame::Integer(id)),
            pair("labels", Frame::Array(vec![bulk(label)])),
            pair(
                "properties",
                Frame::Array(vec![pair("name", bulk(name))]),
            ),
        ])
    }

    #[test]
    fn test_request_text_without_params() {
        assert_eq!(request_text("RETURN 1", &QueryParams::new()), "RETURN 1");
    }

    #[test]
    fn test_request_text_with_params_is_ordered_and_escaped() {
        let mut params = QueryParams::new();
        params.insert("name".into(), json!("O\"Brien \\ x"));
        params.insert("limit".into(), json!(10));
        params.insert("tags".into(), json!(["a", true, null]));
        let text = request_text("MATCH (n) RETURN n", &params);
        assert_eq!(
            text,
            r#"CYPHER limit=10 name="O\"Brien \\ x" tags=["a", true, null] MATCH (n) RETURN n"#
        );
    }

    #[test]
    fn test_cypher_literal_map_keys() {
        let v = json!({"plain": 1, "needs space": "x"});
        let lit = cypher_literal(&v);
        assert!(lit.contains("plain: 1"));
        assert!(lit.contains("`needs space`: \"x\""));
    }

    #[test]
    fn test_decode_node_rows() {
        let reply = Frame::Array(vec![
            Frame::Array(vec![bulk("e")]),
            Frame::Array(vec![Frame::Array(vec![node(3, "Person", "Sarah Johnson")])]),
            Frame::Array(vec![
                bulk("Cached execution: 0"),
                bulk("Query internal execution time: 0.25 milliseconds"),
            ]),
        ]);
        let response = decode_result_set(reply).unwrap();
        assert_eq!(response.columns, vec!["e"]);
        assert_eq!(response.rows.len(), 1);
        assert_eq!(
            response.rows[0]["e"],
            json!({"id": 3, "labels": ["Person"], "properties": {"name": "Sarah Johnson"}})
        );
        assert_eq!(response.execution_time_ms, Some(0.25));
    }

    #[test]
    fn test_decode_edge_with_empty_properties() {
        let edge = Frame::Array(vec![
            pair("id", Frame::Integer(9)),
            pair("type", bulk("KNOWS")),
            pair("src_node", Frame::Integer(1)),
            pair("dest_node", Frame::Integer(2)),
            pair("properties", Frame::Array(vec![])),
        ]);
        let value = frame_to_json(edge).unwrap();
        assert_eq!(value["type"], "KNOWS");
        assert_eq!(value["properties"], json!({}));
    }

    #[test]
    fn test_decode_stats_only_reply() {
        let reply = Frame::Array(vec![Frame::Array(vec![bulk(
            "Query internal execution time: 1.5 milliseconds",
        )])]);
        let response = decode_result_set(reply).unwrap();
        assert!(response.rows.is_empty());
        assert_eq!(response.execution_time_ms, Some(1.5));
    }

    #[test]
    fn test_error_reply_is_query_error() {
        let err = decode_result_set(Frame::Error("errMsg: Invalid input".into())).unwrap_err();
        assert!(matches!(err, PoolError::Query(_)));
        assert!(!err.is_transport());

        let nested = Frame::Array(vec![
            Frame::Array(vec![bulk("x")]),
            Frame::Array(vec![]),
            Frame::Error("Type mismatch".into()),
        ]);
        assert!(matches!(
            decode_result_set(nested).unwrap_err(),
            PoolError::Query(_)
        ));
    }

    #[test]
    fn test_malformed_reply_is_protocol_error() {
        let err = decode_result_set(Frame::Integer(1)).unwrap_err();
        assert!(err.is_transport());

        let short_row = Frame::Array(vec![
            Frame::Array(vec![bulk("a"), bulk("b")]),
            Frame::Array(vec![Frame::Array(vec![Frame::Integer(1)])]),
            Frame::Array(vec![]),
        ]);
        assert!(matches!(
            decode_result_set(short_row).unwrap_err(),
            PoolError::Protocol(_)
        ));
    }

    #[test]
    fn test_schema_summary_describe() {
        let summary = SchemaSummary {
            labels: vec!["Person".into(), "Project".into()],
            relationship_types: vec![],
            property_keys: vec!["name".into()],
        };
        let text = summary.describe();
        assert!(text.contains("Node labels: Person, Project"));
        assert!(text.contains("Relationship types: (none)"));
    }
}
