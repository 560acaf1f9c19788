//! Restore Handler
//!
//! Brings soft-deleted rows back: an UPDATE clearing every soft-delete
//! marker, targeted at rows currently in the deleted state. Restore is
//! gated by the entity's restore rules, falling back to write rules for
//! roles without one. Entities without soft-delete markers have nothing
//! to restore and reject the action.

use crate::core::operation::Operation;
use crate::error::{AppResult, ApplicationError};
use crate::model::permissions::{effective_rule, render_row_filter, EffectiveRule};
use crate::model::types::EntitySchema;
use crate::sql::binder::{ParamBinder, SqlStatement};
use crate::sql::dialect::{Dialect, ReturningMode};
use crate::sql::expression::FilterExpression;
use crate::sql::soft_delete::{deleted_row_condition, restore_assignments};

/// The complete restore plan
#[derive(Debug, Clone)]
pub struct RestorePlan {
    pub statements: Vec<SqlStatement>,
    /// Property names of the returned rows, in select-list order
    pub columns: Vec<String>,
}

pub struct RestoreQueryBuilder<'a> {
    operation: &'a Operation,
    entity: &'a EntitySchema,
    dialect: Dialect,
    db_schema: Option<String>,
}

impl<'a> RestoreQueryBuilder<'a> {
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

    pub fn build(&self) -> AppResult<RestorePlan> {
        let rule = effective_rule(self.entity, self.operation.action, &self.operation.claims)?;
        if !rule.allowed {
            return Err(ApplicationError::forbidden(format!(
                "subject is not allowed to restore {}",
                self.entity.api_name
            )));
        }

        if !self.entity.has_soft_delete() {
            return Err(ApplicationError::bad_request(format!(
                "entity {} does not support restore",
                self.entity.api_name
            )));
        }

        let mut binder = ParamBinder::new(self.dialect);
        let assignments =
            restore_assignments(self.entity, &self.operation.claims, &mut binder)?;
        if assignments.is_empty() {
            return Err(ApplicationError::bad_request(format!(
                "entity {} declares no restorable markers",
                self.entity.api_name
            )));
        }

        // Target rows currently in the deleted state
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
                // Refetch without the deleted-state conditions the update
                // just cleared
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

        Ok(RestorePlan {
            statements,
            columns,
        })
    }

    fn search_conditions(
        &self,
        rule: &EffectiveRule,
        binder: &mut ParamBinder,
        include_deleted_state: bool,
    ) -> AppResult<Vec<String>> {
        let mut conditions = Vec::new();

        for (name, raw) in &self.operation.query_params {
            let property = self.entity.properties.get(name).ok_or_else(|| {
                ApplicationError::bad_request(format!(
                    "invalid query parameter, property not found. entity: {}, property: {}",
                    self.entity.api_name, name
                ))
            })?;
            let expression = FilterExpression::parse(raw)?;
            conditions.push(expression.render(property, &property.column_name, binder)?);
        }

        if include_deleted_state {
            for property in self.entity.soft_delete_properties() {
                if self.operation.query_params.contains_key(&property.api_name) {
                    continue;
                }
                if let Some(condition) =
                    deleted_row_condition(property, &property.column_name, binder)?
                {
                    conditions.push(condition);
                }
            }
        }

        if let Some(row_filter) = render_row_filter(rule, &self.operation.claims, binder)? {
            conditions.push(row_filter);
        }

        Ok(conditions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::claims::ClaimSet;
    use crate::core::operation::Action;
    use crate::model::loader::load_model;
    use crate::model::types::ApiModel;
    use crate::sql::value::SqlValue;
    use serde_json::{json, Map};

    fn model() -> ApiModel {
        let doc = json!({
            "schema_objects": {
                "contract": {
                    "database": "app",
                    "primary-key": "contract_id",
                    "properties": {
                        "contract_id": {"type": "integer", "key": "auto"},
                        "status": {
                            "type": "string",
                            "soft_delete": {
                                "strategy": "exclude_values",
                                "values": ["terminated", "deleted"],
                                "delete_value": "terminated",
                                "restore_value": "active"
                            }
                        },
                        "deleted_at": {
                            "type": "date-time",
                            "soft_delete": {"strategy": "null_check"}
                        },
                        "restored_by": {
                            "type": "string",
                            "soft_delete": {"strategy": "audit_field", "action": "restore"}
                        }
                    }
                },
                "review": {
                    "database": "app",
                    "primary-key": "review_id",
                    "properties": {
                        "review_id": {"type": "integer", "key": "auto"},
                        "active": {
                            "type": "boolean",
                            "soft_delete": {"strategy": "boolean_flag", "active_value": true}
                        }
                    },
                    "permissions": {
                        "user": {"restore": false, "write": ".*"},
                        "admin": {"write": ".*"}
                    }
                },
                "user": {
                    "database": "app",
                    "primary-key": "user_id",
                    "properties": {
                        "user_id": {"type": "integer", "key": "auto"},
                        "email": {"type": "string"}
                    }
                }
            }
        });
        load_model(&doc).unwrap()
    }

    fn build(model: &ApiModel, op: &Operation) -> AppResult<RestorePlan> {
        let entity = model.entity(&op.entity).unwrap();
        RestoreQueryBuilder::new(op, &entity, Dialect::Postgres, None).build()
    }

    #[test]
    fn test_restore_clears_markers_and_targets_deleted_rows() {
        let model = model();
        let mut claims = ClaimSet::default();
        claims.sub = Some("admin-123".to_string());

        let mut query = Map::new();
        query.insert("contract_id".to_string(), json!("7"));

        let op = Operation::new("contract", Action::Restore)
            .with_query_params(query)
            .with_claims(claims);
        let plan = build(&model, &op).unwrap();

        let sql = &plan.statements[0].sql;
        assert!(sql.starts_with("UPDATE contract SET"));
        assert!(sql.contains("deleted_at = NULL"));
        assert!(sql.contains("restored_by = $1"));
        assert!(sql.contains("status = $2"));
        // Only rows currently in the deleted state match
        assert!(sql.contains("deleted_at IS NOT NULL"));
        assert!(sql.contains("status IN ($4, $5)"));
        assert!(sql.contains("contract_id = $3"));
        assert!(sql.ends_with(
            "RETURNING contract_id, deleted_at, restored_by, status"
        ));
        assert_eq!(
            plan.statements[0].params,
            vec![
                SqlValue::Text("admin-123".into()),
                SqlValue::Text("active".into()),
                SqlValue::Int(7),
                SqlValue::Text("terminated".into()),
                SqlValue::Text("deleted".into()),
            ]
        );
    }

    #[test]
    fn test_boolean_flag_restore_binds_active_value() {
        let model = model();
        let mut claims = ClaimSet::default();
        claims.roles = vec!["admin".to_string()];

        let mut query = Map::new();
        query.insert("review_id".to_string(), json!("3"));

        let op = Operation::new("review", Action::Restore)
            .with_query_params(query)
            .with_claims(claims);
        let plan = build(&model, &op).unwrap();

        let sql = &plan.statements[0].sql;
        assert!(sql.contains("SET active = $1"));
        assert_eq!(plan.statements[0].params[0], SqlValue::Bool(true));
        // The deleted-state condition targets the inactive rows
        assert!(sql.contains("active = $3"));
        assert_eq!(plan.statements[0].params[2], SqlValue::Bool(false));
    }

    #[test]
    fn test_explicit_restore_denial_beats_write_rule() {
        let model = model();
        let mut claims = ClaimSet::default();
        claims.roles = vec!["user".to_string()];

        let op = Operation::new("review", Action::Restore).with_claims(claims);
        let err = build(&model, &op).unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[test]
    fn test_restore_falls_back_to_write_rules() {
        let model = model();
        let mut claims = ClaimSet::default();
        claims.roles = vec!["admin".to_string()];

        let op = Operation::new("review", Action::Restore).with_claims(claims);
        assert!(build(&model, &op).is_ok());
    }

    #[test]
    fn test_restore_without_soft_delete_rejected() {
        let model = model();
        let op = Operation::new("user", Action::Restore);

        let err = build(&model, &op).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.message().contains("does not support restore"));
    }
}
