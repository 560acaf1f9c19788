//! Custom Path Operations
//!
//! Drives a pre-declared named SQL template. The template carries
//! `:name` bind tokens; inputs are validated against the declared
//! descriptors, defaults applied, and each token replaced with a dialect
//! placeholder bound to the caller's value. Output column aliases map to
//! the declared field names.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::core::operation::Operation;
use crate::error::{AppResult, ApplicationError};
use crate::model::types::PathOperation;
use crate::sql::binder::{ParamBinder, SqlStatement};
use crate::sql::dialect::Dialect;
use crate::sql::value::SqlValue;

/// The complete custom-operation plan
#[derive(Debug, Clone)]
pub struct CustomPlan {
    pub statement: SqlStatement,
    /// Output column alias → exposed field name; empty passes columns
    /// through unchanged
    pub outputs: BTreeMap<String, String>,
}

pub struct CustomQueryBuilder<'a> {
    operation: &'a Operation,
    path_operation: &'a PathOperation,
    dialect: Dialect,
}

impl<'a> CustomQueryBuilder<'a> {
    pub fn new(
        operation: &'a Operation,
        path_operation: &'a PathOperation,
        dialect: Dialect,
    ) -> Self {
        Self {
            operation,
            path_operation,
            dialect,
        }
    }

    pub fn build(&self) -> AppResult<CustomPlan> {
        let inputs = self.collect_inputs()?;
        let mut named = serde_json::Map::new();
        for (name, value) in inputs {
            named.insert(name, value);
        }

        Ok(CustomPlan {
            statement: render_named_sql(&self.path_operation.sql, &named, self.dialect)?,
            outputs: self.path_operation.outputs.clone(),
        })
    }

    /// Merge caller parameters with declared defaults; missing required
    /// inputs are rejected before any SQL is assembled
    fn collect_inputs(&self) -> AppResult<BTreeMap<String, Value>> {
        let mut inputs = BTreeMap::new();

        for (name, descriptor) in &self.path_operation.inputs {
            let supplied = self
                .operation
                .query_params
                .get(name)
                .or_else(|| self.operation.store_params.get(name));

            match supplied {
                Some(value) => {
                    inputs.insert(name.clone(), value.clone());
                }
                None => match &descriptor.default {
                    Some(default) => {
                        inputs.insert(name.clone(), default.clone());
                    }
                    None if descriptor.required => {
                        return Err(ApplicationError::bad_request(format!(
                            "missing required input '{}' for operation '{}'",
                            name, self.path_operation.api_name
                        )))
                    }
                    None => {}
                },
            }
        }

        Ok(inputs)
    }

}

/// Replace each `:name` token in a SQL template with a bound
/// placeholder. A doubled colon is a cast, not a bind token. Also serves
/// client-supplied custom SQL carried on an operation.
pub fn render_named_sql(
    template: &str,
    inputs: &serde_json::Map<String, Value>,
    dialect: Dialect,
) -> AppResult<SqlStatement> {
    let mut binder = ParamBinder::new(dialect);
    let bytes = template.as_bytes();
    let mut output = String::with_capacity(template.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b':' {
            // `::` is a SQL cast
            if i + 1 < bytes.len() && bytes[i + 1] == b':' {
                output.push_str("::");
                i += 2;
                continue;
            }

            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
            {
                end += 1;
            }

            if end > start {
                let name = &template[start..end];
                let value = inputs.get(name).ok_or_else(|| {
                    ApplicationError::bad_request(format!(
                        "no value for bind token ':{}'",
                        name
                    ))
                })?;
                output.push_str(&binder.bind(SqlValue::from_json(value)?));
                i = end;
                continue;
            }
        }
        // Advance one UTF-8 character
        let ch_len = utf8_len(bytes[i]);
        output.push_str(&template[i..i + ch_len]);
        i += ch_len;
    }

    Ok(binder.finish(output))
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operation::Action;
    use crate::model::types::InputDescriptor;
    use serde_json::{json, Map};

    fn top_selling() -> PathOperation {
        let mut inputs = BTreeMap::new();
        inputs.insert(
            "start".to_string(),
            InputDescriptor {
                required: true,
                default: None,
            },
        );
        inputs.insert(
            "end".to_string(),
            InputDescriptor {
                required: true,
                default: None,
            },
        );
        inputs.insert(
            "limit".to_string(),
            InputDescriptor {
                required: false,
                default: Some(json!(10)),
            },
        );

        let mut outputs = BTreeMap::new();
        outputs.insert("album_title".to_string(), "title".to_string());
        outputs.insert("total_sold".to_string(), "total_sold".to_string());

        PathOperation {
            api_name: "top_selling_albums".to_string(),
            database: "chinook".to_string(),
            sql: "SELECT a.title AS album_title, COUNT(il.invoice_line_id) AS total_sold \
                  FROM invoice_line il \
                  JOIN invoice i ON il.invoice_id = i.invoice_id \
                  JOIN track t ON il.track_id = t.track_id \
                  JOIN album a ON t.album_id = a.album_id \
                  WHERE i.invoice_date >= :start AND i.invoice_date <= :end \
                  GROUP BY a.title ORDER BY total_sold DESC LIMIT :limit"
                .to_string(),
            inputs,
            outputs,
        }
    }

    fn operation_with_query(params: &[(&str, Value)]) -> Operation {
        let mut query = Map::new();
        for (name, value) in params {
            query.insert(name.to_string(), value.clone());
        }
        Operation::new("top_selling_albums", Action::Custom).with_query_params(query)
    }

    #[test]
    fn test_template_binds_inputs() {
        let path_op = top_selling();
        let op = operation_with_query(&[
            ("start", json!("2022-01-01T00:00:00")),
            ("end", json!("2022-01-07T00:00:00")),
            ("limit", json!(5)),
        ]);

        let plan = CustomQueryBuilder::new(&op, &path_op, Dialect::Postgres)
            .build()
            .unwrap();

        assert!(plan.statement.sql.contains("i.invoice_date >= $1"));
        assert!(plan.statement.sql.contains("i.invoice_date <= $2"));
        assert!(plan.statement.sql.contains("LIMIT $3"));
        assert_eq!(plan.statement.params.len(), 3);
        assert_eq!(plan.statement.params[2], SqlValue::Int(5));
    }

    #[test]
    fn test_default_applied_when_input_missing() {
        let path_op = top_selling();
        let op = operation_with_query(&[
            ("start", json!("2022-01-01T00:00:00")),
            ("end", json!("2022-01-07T00:00:00")),
        ]);

        let plan = CustomQueryBuilder::new(&op, &path_op, Dialect::Postgres)
            .build()
            .unwrap();

        assert_eq!(plan.statement.params[2], SqlValue::Int(10));
    }

    #[test]
    fn test_missing_required_input_rejected() {
        let path_op = top_selling();
        let op = operation_with_query(&[("start", json!("2022-01-01T00:00:00"))]);

        let err = CustomQueryBuilder::new(&op, &path_op, Dialect::Postgres)
            .build()
            .unwrap_err();

        assert_eq!(err.status_code(), 400);
        assert!(err.message().contains("end"));
    }

    #[test]
    fn test_cast_tokens_left_alone() {
        let mut path_op = top_selling();
        path_op.sql = "SELECT total::text FROM invoice WHERE invoice_id = :start".to_string();
        path_op.inputs.remove("end");
        path_op.inputs.remove("limit");

        let op = operation_with_query(&[("start", json!(1))]);
        let plan = CustomQueryBuilder::new(&op, &path_op, Dialect::Postgres)
            .build()
            .unwrap();

        assert_eq!(
            plan.statement.sql,
            "SELECT total::text FROM invoice WHERE invoice_id = $1"
        );
    }

    #[test]
    fn test_output_aliases_carried() {
        let path_op = top_selling();
        let op = operation_with_query(&[
            ("start", json!("2022-01-01T00:00:00")),
            ("end", json!("2022-01-07T00:00:00")),
        ]);

        let plan = CustomQueryBuilder::new(&op, &path_op, Dialect::Postgres)
            .build()
            .unwrap();

        assert_eq!(plan.outputs.get("album_title").unwrap(), "title");
    }
}
