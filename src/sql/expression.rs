//! Filter Expressions
//!
//! Query-parameter values carry an optional operator prefix:
//! `<op>::<operand>` with op one of eq, ne, lt, le, gt, ge, in, not-in,
//! between, not-between, like. No prefix means eq. List operators split
//! their operand on commas. Every operand binds as a parameter; operands
//! never appear in the SQL text.

use serde_json::Value;

use crate::error::{AppResult, ApplicationError};
use crate::model::types::PropertyDescriptor;
use crate::sql::binder::ParamBinder;
use crate::sql::value::{to_db_value, SqlValue};

/// Relational operators accepted in query parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Between,
    NotBetween,
    Like,
}

impl FilterOperator {
    fn parse(token: &str) -> AppResult<Self> {
        match token {
            "eq" => Ok(Self::Eq),
            "ne" => Ok(Self::Ne),
            "lt" => Ok(Self::Lt),
            "le" => Ok(Self::Le),
            "gt" => Ok(Self::Gt),
            "ge" => Ok(Self::Ge),
            "in" => Ok(Self::In),
            "not-in" => Ok(Self::NotIn),
            "between" => Ok(Self::Between),
            "not-between" => Ok(Self::NotBetween),
            "like" => Ok(Self::Like),
            other => Err(ApplicationError::bad_request(format!(
                "unknown filter operator: {}",
                other
            ))),
        }
    }

    fn sql_symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::In | Self::NotIn | Self::Between | Self::NotBetween => {
                unreachable!("list operators render their own clause")
            }
        }
    }
}

/// A parsed filter: operator plus raw operand text
#[derive(Debug, Clone)]
pub struct FilterExpression {
    pub operator: FilterOperator,
    operand: Value,
}

impl FilterExpression {
    /// Parse a query-parameter value. String values may carry an operator
    /// prefix; non-string JSON values are equality matches as-is.
    pub fn parse(value: &Value) -> AppResult<Self> {
        let text = match value {
            Value::String(s) => s,
            other => {
                return Ok(Self {
                    operator: FilterOperator::Eq,
                    operand: other.clone(),
                })
            }
        };

        match text.split_once("::") {
            Some((op, operand)) => Ok(Self {
                operator: FilterOperator::parse(op)?,
                operand: Value::String(operand.to_string()),
            }),
            None => Ok(Self {
                operator: FilterOperator::Eq,
                operand: Value::String(text.clone()),
            }),
        }
    }

    /// Render the condition for a column, binding all operands.
    ///
    /// `column` is the alias-qualified column expression. A null equality
    /// compiles to `IS NULL` rather than `= NULL`.
    pub fn render(
        &self,
        property: &PropertyDescriptor,
        column: &str,
        binder: &mut ParamBinder,
    ) -> AppResult<String> {
        match self.operator {
            FilterOperator::In | FilterOperator::NotIn => {
                let values = self.list_operands(property)?;
                if values.is_empty() {
                    return Err(ApplicationError::bad_request(format!(
                        "empty operand list for '{}'",
                        property.api_name
                    )));
                }
                let placeholders: Vec<String> =
                    values.into_iter().map(|v| binder.bind(v)).collect();
                let keyword = if self.operator == FilterOperator::In {
                    "IN"
                } else {
                    "NOT IN"
                };
                Ok(format!("{} {} ({})", column, keyword, placeholders.join(", ")))
            }
            FilterOperator::Between | FilterOperator::NotBetween => {
                let values = self.list_operands(property)?;
                if values.len() != 2 {
                    return Err(ApplicationError::bad_request(format!(
                        "between requires exactly two comma-separated operands for '{}'",
                        property.api_name
                    )));
                }
                let mut values = values.into_iter();
                let low = binder.bind(values.next().unwrap());
                let high = binder.bind(values.next().unwrap());
                let keyword = if self.operator == FilterOperator::Between {
                    "BETWEEN"
                } else {
                    "NOT BETWEEN"
                };
                Ok(format!("{} {} {} AND {}", column, keyword, low, high))
            }
            FilterOperator::Eq if self.operand.is_null() => Ok(format!("{} IS NULL", column)),
            FilterOperator::Ne if self.operand.is_null() => {
                Ok(format!("{} IS NOT NULL", column))
            }
            operator => {
                let value = to_db_value(property, &self.operand)?;
                let placeholder = binder.bind(value);
                Ok(format!("{} {} {}", column, operator.sql_symbol(), placeholder))
            }
        }
    }

    /// Split a list operand on commas and coerce each element. Null
    /// elements are rejected: SQL IN with NULL silently matches nothing.
    fn list_operands(&self, property: &PropertyDescriptor) -> AppResult<Vec<SqlValue>> {
        let text = self.operand.as_str().ok_or_else(|| {
            ApplicationError::bad_request(format!(
                "list operator for '{}' requires a comma-separated operand",
                property.api_name
            ))
        })?;

        let mut values = Vec::new();
        for part in text.split(',') {
            let part = part.trim();
            if part.is_empty() || part.eq_ignore_ascii_case("null") {
                return Err(ApplicationError::bad_request(format!(
                    "null operand not allowed in list filter for '{}'",
                    property.api_name
                )));
            }
            values.push(to_db_value(property, &Value::String(part.to_string()))?);
        }
        Ok(values)
    }
}
