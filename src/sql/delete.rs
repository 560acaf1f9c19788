//! Delete Handler
//!
//! Builds `DELETE FROM <table> WHERE <conditions>`, or an UPDATE writing
//! the deleted state when the entity declares soft-delete markers.
//! Delete requires an allowing rule for the caller's roles; the
//! permission row filter still applies, so a caller can only delete rows
//! the table lets them see. The result is a count record, not the
//! deleted rows.

use crate::core::operation::Operation;
use crate::error::{AppResult, ApplicationError};
use crate::model::permissions::{effective_rule, render_row_filter};
use crate::model::types::EntitySchema;
use crate::sql::binder::{ParamBinder, SqlStatement};
use crate::sql::dialect::Dialect;
use crate::sql::expression::FilterExpression;
use crate::sql::soft_delete::delete_assignments;

/// The complete delete plan
#[derive(Debug, Clone)]
pub struct DeletePlan {
    pub statement: SqlStatement,
}

pub struct DeleteQueryBuilder<'a> {
    operation: &'a Operation,
    entity: &'a EntitySchema,
    dialect: Dialect,
    db_schema: Option<String>,
}

impl<'a> DeleteQueryBuilder<'a> {
    pub fn new(
        operation: &'a Operation,
        entity: &'a EntitySchema,
        dialect: Dialect,
        db_schema: Option<String>,
    ) -> Self {
        Self {
            operation,
            entity,
            dialect,
            db_schema,
        }
    }

    pub fn build(&self) -> AppResult<DeletePlan> {
        let rule = effective_rule(self.entity, self.operation.action, &self.operation.claims)?;
        if !rule.allowed {
            return Err(ApplicationError::forbidden(format!(
                "subject is not allowed to delete {}",
                self.entity.api_name
            )));
        }

        let mut binder = ParamBinder::new(self.dialect);
        let table = self.entity.table_expression(self.db_schema.as_deref());

        // Soft-delete entities mark rows instead of removing them; the
        // SET clause binds first so the conditions follow in order
        let assignments = if self.entity.has_soft_delete() {
            delete_assignments(self.entity, &self.operation.claims, &mut binder)?
        } else {
            Vec::new()
        };

        let mut conditions = Vec::new();
        for (name, raw) in &self.operation.query_params {
            let property = self.entity.properties.get(name).ok_or_else(|| {
                ApplicationError::bad_request(format!(
                    "invalid query parameter, property not found. entity: {}, property: {}",
                    self.entity.api_name, name
                ))
            })?;
            let expression = FilterExpression::parse(raw)?;
            conditions.push(expression.render(property, &property.column_name, &mut binder)?);
        }

        if let Some(row_filter) = render_row_filter(&rule, &self.operation.claims, &mut binder)? {
            conditions.push(row_filter);
        }

        let mut sql = if assignments.is_empty() {
            format!("DELETE FROM {}", table)
        } else {
            format!("UPDATE {} SET {}", table, assignments.join(", "))
        };
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        Ok(DeletePlan {
            statement: binder.finish(sql),
        })
    }
}
