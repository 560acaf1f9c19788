//! Reference Resolver
//!
//! Substitutes `$ref:op_id.path` tokens in batch parameter trees with
//! values from previously completed operations. A string that is exactly
//! one reference is replaced by the referenced value with its type
//! preserved; a reference embedded in surrounding text interpolates the
//! value's string form. Resolution walks nested maps and arrays and
//! always produces a new tree.

use serde_json::{Map, Value};

use crate::error::{AppResult, ApplicationError};

const REF_PREFIX: &str = "$ref:";

/// Resolves references against the results accumulated so far.
///
/// `results` maps op-id → per-operation record with `status` and, for
/// completed operations, `data`.
pub struct ReferenceResolver<'a> {
    results: &'a Map<String, Value>,
}

impl<'a> ReferenceResolver<'a> {
    pub fn new(results: &'a Map<String, Value>) -> Self {
        Self { results }
    }

    /// Resolve every reference in a parameter map, returning a new tree
    pub fn resolve_parameters(&self, params: &Map<String, Value>) -> AppResult<Map<String, Value>> {
        let mut resolved = Map::new();
        for (key, value) in params {
            resolved.insert(key.clone(), self.resolve_value(value)?);
        }
        Ok(resolved)
    }

    fn resolve_value(&self, value: &Value) -> AppResult<Value> {
        match value {
            Value::String(text) => self.resolve_string(text),
            Value::Object(map) => {
                let mut resolved = Map::new();
                for (key, nested) in map {
                    resolved.insert(key.clone(), self.resolve_value(nested)?);
                }
                Ok(Value::Object(resolved))
            }
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(self.resolve_value(item)?);
                }
                Ok(Value::Array(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(&self, text: &str) -> AppResult<Value> {
        // A string that is exactly one token keeps the referenced type
        if text.starts_with(REF_PREFIX) && !text[REF_PREFIX.len()..].contains(char::is_whitespace)
        {
            if let Some(token) = parse_single_token(text) {
                return self.lookup(token);
            }
        }

        if !text.contains(REF_PREFIX) {
            return Ok(Value::String(text.to_string()));
        }

        // Embedded references interpolate their string form
        let mut output = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find(REF_PREFIX) {
            output.push_str(&rest[..start]);
            let token_text = &rest[start..];
            let token_end = token_text[REF_PREFIX.len()..]
                .find(|c: char| c.is_whitespace())
                .map(|i| i + REF_PREFIX.len())
                .unwrap_or(token_text.len());

            let token = parse_single_token(&token_text[..token_end]).ok_or_else(|| {
                ApplicationError::bad_request(format!(
                    "malformed reference '{}'",
                    &token_text[..token_end]
                ))
            })?;
            let value = self.lookup(token)?;
            output.push_str(&stringify(&value));

            rest = &token_text[token_end..];
        }
        output.push_str(rest);
        Ok(Value::String(output))
    }

    fn lookup(&self, token: RefToken<'_>) -> AppResult<Value> {
        let record = self.results.get(token.op_id).ok_or_else(|| {
            ApplicationError::bad_request(format!(
                "reference to unknown operation '{}'",
                token.op_id
            ))
        })?;

        let status = record.get("status").and_then(|s| s.as_str()).unwrap_or("");
        if status != "completed" {
            return Err(ApplicationError::bad_request(format!(
                "reference to operation '{}' which has not completed (status: {})",
                token.op_id,
                if status.is_empty() { "unknown" } else { status }
            )));
        }

        let mut current = record.get("data").cloned().unwrap_or(Value::Null);
        let mut walked = String::new();
        for segment in &token.path {
            walked.push_str(segment);
            current = match &current {
                Value::Object(map) => map.get(*segment).cloned().ok_or_else(|| {
                    let available: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
                    ApplicationError::bad_request(format!(
                        "property not found at '{}' in result of '{}'; available: [{}]",
                        walked,
                        token.op_id,
                        available.join(", ")
                    ))
                })?,
                Value::Array(items) => {
                    let index: usize = segment.parse().map_err(|_| {
                        ApplicationError::bad_request(format!(
                            "property not found at '{}' in result of '{}'; expected an array index",
                            walked, token.op_id
                        ))
                    })?;
                    items.get(index).cloned().ok_or_else(|| {
                        ApplicationError::bad_request(format!(
                            "index {} out of bounds at '{}' in result of '{}' ({} elements)",
                            index,
                            walked,
                            token.op_id,
                            items.len()
                        ))
                    })?
                }
                _ => {
                    return Err(ApplicationError::bad_request(format!(
                        "property not found at '{}' in result of '{}'; value is a scalar",
                        walked, token.op_id
                    )))
                }
            };
            walked.push('.');
        }
        Ok(current)
    }
}

/// Collect every op-id referenced anywhere in a parameter tree
pub fn referenced_operations(params: &Map<String, Value>) -> Vec<String> {
    let mut ids = Vec::new();
    for value in params.values() {
        collect_refs(value, &mut ids);
    }
    ids
}

fn collect_refs(value: &Value, ids: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            let mut rest = text.as_str();
            while let Some(start) = rest.find(REF_PREFIX) {
                let token_text = &rest[start + REF_PREFIX.len()..];
                let end = token_text
                    .find(|c: char| c.is_whitespace())
                    .unwrap_or(token_text.len());
                if let Some(op_id) = token_text[..end].split('.').next() {
                    if !op_id.is_empty() && !ids.contains(&op_id.to_string()) {
                        ids.push(op_id.to_string());
                    }
                }
                rest = &token_text[end..];
            }
        }
        Value::Object(map) => {
            for nested in map.values() {
                collect_refs(nested, ids);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, ids);
            }
        }
        _ => {}
    }
}

struct RefToken<'a> {
    op_id: &'a str,
    path: Vec<&'a str>,
}

/// Parse `$ref:op_id.seg(.seg)*`; returns None on a bare `$ref:`
fn parse_single_token(text: &str) -> Option<RefToken<'_>> {
    let body = text.strip_prefix(REF_PREFIX)?;
    let mut segments = body.split('.');
    let op_id = segments.next().filter(|s| !s.is_empty())?;
    let path: Vec<&str> = segments.collect();
    if path.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(RefToken { op_id, path })
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
