//! Update Handler
//!
//! Builds `UPDATE <table> SET <assignments> WHERE <conditions>` with the
//! updated rows read back. The search condition combines the query
//! parameters, the permission row filter, and, when the client supplies
//! the current concurrency stamp, an equality on that stamp, so a stale
//! client updates zero rows and surfaces as a conflict.

use crate::core::operation::Operation;
use crate::error::{AppResult, ApplicationError};
use crate::model::permissions::{effective_rule, render_row_filter, EffectiveRule};
use crate::model::types::EntitySchema;
use crate::sql::binder::{ParamBinder, SqlStatement};
use crate::sql::dialect::{Dialect, ReturningMode};
use crate::sql::expression::FilterExpression;
use crate::sql::insert::{generated_value, GeneratedValue};
use crate::sql::value::to_db_value;

/// The complete update plan
#[derive(Debug, Clone)]
pub struct UpdatePlan {
    pub statements: Vec<SqlStatement>,
    /// Property names of the returned rows, in select-list order
    pub columns: Vec<String>,
    /// Whether the client supplied the concurrency stamp; decides between
    /// Conflict and NotFound when zero rows match
    pub concurrency_supplied: bool,
}

pub struct UpdateQueryBuilder<'a> {
    operation: &'a Operation,
    entity: &'a EntitySchema,
    dialect: Dialect,
    db_schema: Option<String>,
}

impl<'a> UpdateQueryBuilder<'a> {
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

    pub fn build(&self) -> AppResult<UpdatePlan> {
        let rule = effective_rule(self.entity, self.operation.action, &self.operation.claims)?;
        if !rule.allowed {
            return Err(ApplicationError::forbidden(format!(
                "subject is not allowed to update {}",
                self.entity.api_name
            )));
        }

        self.validate_store_params(&rule)?;

        let concurrency_supplied = match self.entity.concurrency_property.as_deref() {
            Some(name) => self.operation.query_params.contains_key(name),
            None => false,
        };

        let mut binder = ParamBinder::new(self.dialect);

        // SET clause: validated store params, then the concurrency bump
        let mut assignments: Vec<String> = Vec::new();
        for (name, raw) in &self.operation.store_params {
            let property = &self.entity.properties[name];
            let placeholder = binder.bind(to_db_value(property, raw)?);
            assignments.push(format!("{} = {}", property.column_name, placeholder));
        }
        if let Some(concurrency) = self.entity.concurrency_descriptor() {
            let value = match generated_value(concurrency) {
                GeneratedValue::Bound(value) => binder.bind(value),
                GeneratedValue::Expression(expr) => expr.to_string(),
            };
            assignments.push(format!("{} = {}", concurrency.column_name, value));
        }
        if assignments.is_empty() {
            return Err(ApplicationError::bad_request(format!(
                "update on {} requires store parameters",
                self.entity.api_name
            )));
        }

        let conditions = self.search_conditions(&rule, &mut binder, true)?;

        let select_list: Vec<String> = self
            .entity
            .properties
            .values()
            .map(|p| p.column_name.clone())
            .collect();
        let columns: Vec<String> = self.entity.properties.keys().cloned().collect();

        let table = self.entity.table_expression(self.db_schema.as_deref());
        let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        let statements = match self.dialect.returning_mode() {
            ReturningMode::Clause => {
                sql.push_str(&format!(" RETURNING {}", select_list.join(", ")));
                vec![binder.finish(sql)]
            }
            ReturningMode::LastInsertId => {
                // Refetch with the same conditions minus the stamp, which
                // the update just advanced
                let update_statement = binder.finish(sql);
                let mut select_binder = ParamBinder::new(self.dialect);
                let refetch_conditions =
                    self.search_conditions(&rule, &mut select_binder, false)?;

                let mut select = format!("SELECT {} FROM {}", select_list.join(", "), table);
                if !refetch_conditions.is_empty() {
                    select.push_str(" WHERE ");
                    select.push_str(&refetch_conditions.join(" AND "));
                }
                vec![update_statement, select_binder.finish(select)]
            }
        };

        Ok(UpdatePlan {
            statements,
            columns,
            concurrency_supplied,
        })
    }

    fn search_conditions(
        &self,
        rule: &EffectiveRule,
        binder: &mut ParamBinder,
        include_concurrency: bool,
    ) -> AppResult<Vec<String>> {
        let mut conditions = Vec::new();

        for (name, raw) in &self.operation.query_params {
            let is_concurrency =
                self.entity.concurrency_property.as_deref() == Some(name.as_str());
            if is_concurrency && !include_concurrency {
                continue;
            }

            let property = self.entity.properties.get(name).ok_or_else(|| {
                ApplicationError::bad_request(format!(
                    "invalid query parameter, property not found. entity: {}, property: {}",
                    self.entity.api_name, name
                ))
            })?;
            let expression = FilterExpression::parse(raw)?;
            conditions.push(expression.render(property, &property.column_name, binder)?);
        }

        if let Some(row_filter) = render_row_filter(rule, &self.operation.claims, binder)? {
            conditions.push(row_filter);
        }

        Ok(conditions)
    }

    fn validate_store_params(&self, rule: &EffectiveRule) -> AppResult<()> {
        for name in self.operation.store_params.keys() {
            if self.entity.concurrency_property.as_deref() == Some(name.as_str()) {
                return Err(ApplicationError::bad_request(format!(
                    "concurrency property '{}' is system-managed and may not be supplied as a store parameter",
                    name
                )));
            }
            if name == &self.entity.primary_key {
                return Err(ApplicationError::bad_request(format!(
                    "primary key '{}' may not be updated",
                    name
                )));
            }
            if !self.entity.properties.contains_key(name) || !rule.permits(name) {
                return Err(ApplicationError::forbidden(format!(
                    "subject may not write property '{}' of {}",
                    name, self.entity.api_name
                )));
            }
        }
        Ok(())
    }
}
