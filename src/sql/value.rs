//! Bind Values
//!
//! Every user-supplied scalar travels to the driver as a `SqlValue` bound
//! at a placeholder position. Nothing user-controlled is ever spliced into
//! SQL text. Conversion to and from JSON is guided by the property's
//! declared semantic type so that `"24"` arriving as a query-string value
//! binds as an integer when the column is an integer.

use chrono::{DateTime, NaiveDate};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppResult, ApplicationError};
use crate::model::types::{PropertyDescriptor, PropertyType};

/// A typed bind value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// Convert to JSON for response marshaling
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Bool(b) => Value::Bool(*b),
            SqlValue::Int(i) => Value::from(*i),
            SqlValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s.clone()),
        }
    }

    /// Untyped conversion from JSON, for custom SQL binds where no
    /// property descriptor is in play
    pub fn from_json(value: &Value) -> AppResult<Self> {
        match value {
            Value::Null => Ok(SqlValue::Null),
            Value::Bool(b) => Ok(SqlValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(SqlValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(SqlValue::Float(f))
                } else {
                    Err(ApplicationError::bad_request(format!(
                        "numeric value out of range: {}",
                        n
                    )))
                }
            }
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Err(ApplicationError::bad_request(
                "arrays and objects cannot be bound as scalar values",
            )),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

/// Convert a JSON store/query value to a bind value for the given property.
///
/// Strings are coerced to the declared type (query-string values always
/// arrive as strings); mismatched non-string values are rejected.
pub fn to_db_value(property: &PropertyDescriptor, value: &Value) -> AppResult<SqlValue> {
    if value.is_null() {
        return Ok(SqlValue::Null);
    }

    let type_error = |actual: &str| {
        ApplicationError::bad_request(format!(
            "property '{}' expects {}, got {}",
            property.api_name,
            property.api_type.as_str(),
            actual
        ))
    };

    match property.api_type {
        PropertyType::Integer => match value {
            Value::Number(n) => n.as_i64().map(SqlValue::Int).ok_or_else(|| type_error("number")),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(SqlValue::Int)
                .map_err(|_| type_error(&format!("'{}'", s))),
            _ => Err(type_error(json_type_name(value))),
        },
        PropertyType::Number => match value {
            Value::Number(n) => n.as_f64().map(SqlValue::Float).ok_or_else(|| type_error("number")),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(SqlValue::Float)
                .map_err(|_| type_error(&format!("'{}'", s))),
            _ => Err(type_error(json_type_name(value))),
        },
        PropertyType::Boolean => match value {
            Value::Bool(b) => Ok(SqlValue::Bool(*b)),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(SqlValue::Bool(true)),
                "false" | "0" => Ok(SqlValue::Bool(false)),
                _ => Err(type_error(&format!("'{}'", s))),
            },
            _ => Err(type_error(json_type_name(value))),
        },
        PropertyType::String => match value {
            Value::String(s) => {
                if let Some(max) = property.max_length {
                    if s.chars().count() > max {
                        return Err(ApplicationError::bad_request(format!(
                            "property '{}' exceeds max length {}",
                            property.api_name, max
                        )));
                    }
                }
                Ok(SqlValue::Text(s.clone()))
            }
            Value::Number(n) => Ok(SqlValue::Text(n.to_string())),
            Value::Bool(b) => Ok(SqlValue::Text(b.to_string())),
            _ => Err(type_error(json_type_name(value))),
        },
        PropertyType::DateTime => match value {
            Value::String(s) => {
                // Accept RFC3339 and bare dates; bind as text, the driver
                // casts against the column type
                if DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
                    || chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S").is_ok()
                {
                    Ok(SqlValue::Text(s.clone()))
                } else {
                    Err(type_error(&format!("'{}'", s)))
                }
            }
            _ => Err(type_error(json_type_name(value))),
        },
        PropertyType::Uuid => match value {
            Value::String(s) => Uuid::parse_str(s)
                .map(|_| SqlValue::Text(s.clone()))
                .map_err(|_| type_error(&format!("'{}'", s))),
            _ => Err(type_error(json_type_name(value))),
        },
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
