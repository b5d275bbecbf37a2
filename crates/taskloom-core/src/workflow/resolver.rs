//! Variable resolution for task parameters.
//!
//! String values may carry `${head.seg1.seg2}` placeholders. `head` names a
//! key of the execution's variables (a seed variable or a completed task id)
//! and the segments project into the stored value: object keys, or numeric
//! indices into arrays.
//!
//! A string that is exactly one placeholder is replaced by the projected value
//! with its JSON type intact; placeholders embedded in longer text are
//! interpolated as strings. Maps and arrays are resolved recursively.

use std::fmt;
use std::ops::Range;

use serde_json::{Map, Value};
use taskloom_types::workflow::Parameters;
use thiserror::Error;

/// Segment that addresses a task's own output (`${nav.output.url}`).
const OUTPUT_SEGMENT: &str = "output";

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A placeholder that could not be resolved. Always a validation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("unknown variable '{head}' in '${{{reference}}}'")]
    UnknownVariable { head: String, reference: String },

    #[error("field '{segment}' not found in '${{{reference}}}'")]
    MissingField { segment: String, reference: String },

    #[error("malformed placeholder '{0}'")]
    Malformed(String),
}

// ---------------------------------------------------------------------------
// Placeholder parsing
// ---------------------------------------------------------------------------

/// A parsed `${head.path...}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub head: String,
    pub path: Vec<String>,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.head)?;
        for seg in &self.path {
            write!(f, ".{seg}")?;
        }
        Ok(())
    }
}

/// Find every placeholder in `text`, with its byte range.
///
/// An opening `${` without a closing `}` is literal text. A closed
/// placeholder whose body is empty or has an empty segment is malformed.
pub fn scan(text: &str) -> Result<Vec<(Range<usize>, Reference)>, ResolveError> {
    let mut found = Vec::new();
    let mut cursor = 0;

    while let Some(offset) = text[cursor..].find("${") {
        let start = cursor + offset;
        let body_start = start + 2;
        let Some(len) = text[body_start..].find('}') else {
            break;
        };
        let end = body_start + len + 1;
        let body = &text[body_start..body_start + len];

        let segments: Vec<&str> = body.split('.').collect();
        if segments
            .iter()
            .any(|s| s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '{' || c == '$'))
        {
            return Err(ResolveError::Malformed(text[start..end].to_string()));
        }

        found.push((
            start..end,
            Reference {
                head: segments[0].to_string(),
                path: segments[1..].iter().map(|s| s.to_string()).collect(),
            },
        ));
        cursor = end;
    }

    Ok(found)
}

/// Collect every placeholder reference in a parameter map (recursively).
pub fn references(parameters: &Parameters) -> Result<Vec<Reference>, ResolveError> {
    let mut refs = Vec::new();
    for value in parameters.values() {
        collect_references(value, &mut refs)?;
    }
    Ok(refs)
}

fn collect_references(value: &Value, refs: &mut Vec<Reference>) -> Result<(), ResolveError> {
    match value {
        Value::String(s) => refs.extend(scan(s)?.into_iter().map(|(_, r)| r)),
        Value::Array(items) => {
            for item in items {
                collect_references(item, refs)?;
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_references(item, refs)?;
            }
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Substitute every placeholder in `parameters` using `variables`.
///
/// Pure: neither input is modified.
pub fn resolve(
    parameters: &Parameters,
    variables: &Map<String, Value>,
) -> Result<Parameters, ResolveError> {
    parameters
        .iter()
        .map(|(key, value)| Ok((key.clone(), resolve_value(value, variables)?)))
        .collect()
}

fn resolve_value(value: &Value, variables: &Map<String, Value>) -> Result<Value, ResolveError> {
    match value {
        Value::String(s) => resolve_string(s, variables),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_value(item, variables))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), resolve_value(v, variables)?)))
            .collect::<Result<Map<_, _>, _>>()
            .map(Value::Object),
        other => Ok(other.clone()),
    }
}

fn resolve_string(text: &str, variables: &Map<String, Value>) -> Result<Value, ResolveError> {
    let placeholders = scan(text)?;
    if placeholders.is_empty() {
        return Ok(Value::String(text.to_string()));
    }

    // Whole-string placeholder keeps the JSON type
    if let [(range, reference)] = placeholders.as_slice() {
        if range.start == 0 && range.end == text.len() {
            return lookup(reference, variables).cloned();
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (range, reference) in &placeholders {
        out.push_str(&text[last..range.start]);
        out.push_str(&value_to_string(lookup(reference, variables)?));
        last = range.end;
    }
    out.push_str(&text[last..]);
    Ok(Value::String(out))
}

/// Project a reference out of the variables map.
pub fn lookup<'a>(
    reference: &Reference,
    variables: &'a Map<String, Value>,
) -> Result<&'a Value, ResolveError> {
    let mut current = variables
        .get(&reference.head)
        .ok_or_else(|| ResolveError::UnknownVariable {
            head: reference.head.clone(),
            reference: reference.to_string(),
        })?;

    let mut path = reference.path.as_slice();
    if let Some((first, rest)) = path.split_first() {
        let has_output_key = current.get(OUTPUT_SEGMENT).is_some();
        if first == OUTPUT_SEGMENT && !has_output_key {
            path = rest;
        }
    }

    for segment in path {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        current = next.ok_or_else(|| ResolveError::MissingField {
            segment: segment.clone(),
            reference: reference.to_string(),
        })?;
    }

    Ok(current)
}

/// Convert a JSON value to text for interpolation.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // Objects and arrays interpolate as compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap()
    }

    fn vars() -> Map<String, Value> {
        params(json!({
            "nav": {"url": "https://shop.example/item", "status": 200},
            "extract": {"prices": [{"amount": 9.5}, {"amount": 12}], "output": {"raw": true}},
            "query": "laptop",
        }))
    }

    #[test]
    fn test_whole_placeholder_preserves_type() {
        let resolved = resolve(
            &params(json!({"code": "${nav.status}", "second": "${extract.prices.1.amount}"})),
            &vars(),
        )
        .unwrap();
        assert_eq!(resolved["code"], json!(200));
        assert_eq!(resolved["second"], json!(12));
    }

    #[test]
    fn test_output_segment_is_skipped() {
        let resolved = resolve(&params(json!({"url": "${nav.output.url}"})), &vars()).unwrap();
        assert_eq!(resolved["url"], "https://shop.example/item");
    }

    #[test]
    fn test_literal_output_key_wins() {
        let resolved = resolve(&params(json!({"raw": "${extract.output.raw}"})), &vars()).unwrap();
        assert_eq!(resolved["raw"], json!(true));
    }

    #[test]
    fn test_embedded_placeholders_interpolate() {
        let resolved = resolve(
            &params(json!({"text": "search ${query} at ${nav.url} (${nav.status})"})),
            &vars(),
        )
        .unwrap();
        assert_eq!(
            resolved["text"],
            "search laptop at https://shop.example/item (200)"
        );
    }

    #[test]
    fn test_nested_structures_resolved() {
        let resolved = resolve(
            &params(json!({"form": {"fields": ["${query}", 3, {"q": "${nav.status}"}]}})),
            &vars(),
        )
        .unwrap();
        assert_eq!(resolved["form"]["fields"], json!(["laptop", 3, {"q": 200}]));
    }

    #[test]
    fn test_non_placeholders_pass_through() {
        let input = params(json!({"n": 1, "s": "plain $text {x}", "open": "${never closed"}));
        assert_eq!(resolve(&input, &vars()).unwrap(), input);
    }

    #[test]
    fn test_unknown_variable() {
        let err = resolve(&params(json!({"x": "${missingTask.output.x}"})), &vars()).unwrap_err();
        assert!(matches!(err, ResolveError::UnknownVariable { ref head, .. } if head == "missingTask"));
        assert!(err.to_string().contains("${missingTask.output.x}"));
    }

    #[test]
    fn test_missing_field_and_bad_index() {
        let err = resolve(&params(json!({"x": "${nav.title}"})), &vars()).unwrap_err();
        assert!(matches!(err, ResolveError::MissingField { ref segment, .. } if segment == "title"));

        let err = resolve(&params(json!({"x": "${extract.prices.7}"})), &vars()).unwrap_err();
        assert!(matches!(err, ResolveError::MissingField { .. }));
    }

    #[test]
    fn test_malformed_placeholder() {
        let err = resolve(&params(json!({"x": "${nav..url}"})), &vars()).unwrap_err();
        assert_eq!(err, ResolveError::Malformed("${nav..url}".to_string()));
        assert!(resolve(&params(json!({"x": "${}"})), &vars()).is_err());
    }

    #[test]
    fn test_references_collects_heads() {
        let refs = references(&params(json!({
            "a": "${nav.url}",
            "b": ["x ${query}", {"c": "${extract.prices.0}"}],
        })))
        .unwrap();
        let heads: Vec<_> = refs.iter().map(|r| r.head.as_str()).collect();
        assert_eq!(heads, vec!["nav", "query", "extract"]);
        assert_eq!(refs[2].to_string(), "extract.prices.0");
    }
}
