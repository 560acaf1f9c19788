//! Operation DAO
//!
//! Routes an `Operation` to the correct SQL handler, manages cursor
//! lifecycle, and marshals row sets into property-keyed maps following
//! the association metadata. Batch operations defer to the orchestrator
//! through the `OperationExecutor` seam; the DAO itself never commits or
//! rolls back; the transaction boundary belongs to the caller.

pub mod connection;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::batch::orchestrator::BatchOrchestrator;
use crate::config::GatewayConfig;
use crate::core::operation::{Action, Operation};
use crate::dao::connection::{Connection, QueryResult};
use crate::error::{AppResult, ApplicationError};
use crate::logging::Logger;
use crate::model::registry::ModelRegistry;
use crate::model::types::EntitySchema;
use crate::sql::custom::{render_named_sql, CustomQueryBuilder};
use crate::sql::delete::DeleteQueryBuilder;
use crate::sql::insert::InsertQueryBuilder;
use crate::sql::restore::RestoreQueryBuilder;
use crate::sql::select::{ColumnKey, SelectPlan, SelectQueryBuilder};
use crate::sql::update::UpdateQueryBuilder;
use crate::sql::value::SqlValue;

/// Narrow execution seam consumed by the batch orchestrator. The DAO
/// implements it, so batch operations reuse the same dispatch without a
/// dependency cycle.
pub trait OperationExecutor {
    fn execute(&self, connection: &mut dyn Connection, operation: &Operation)
        -> AppResult<Value>;
}

/// Routes operations to handlers and materializes results
pub struct OperationDao {
    registry: Arc<ModelRegistry>,
    config: GatewayConfig,
}

impl OperationDao {
    pub fn new(registry: Arc<ModelRegistry>, config: GatewayConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    fn dispatch(
        &self,
        connection: &mut dyn Connection,
        operation: &Operation,
    ) -> AppResult<Value> {
        if operation.entity == "batch" {
            let orchestrator = BatchOrchestrator::from_operation(operation)?;
            return orchestrator.execute(connection, self);
        }

        // Pre-rendered SQL carried on the operation itself
        if let Some(custom) = &operation.custom_sql {
            let statement = render_named_sql(&custom.sql, &custom.binds, self.config.db_engine)?;
            let result = {
                let mut cursor = connection.cursor()?;
                cursor.execute(&statement.sql, &statement.params)?
            };
            return Ok(Value::Array(materialize_custom(&result, &BTreeMap::new())));
        }

        // Custom path operations shadow the entity namespace
        if let Some(path_operation) = self.registry.path_operation(&operation.entity) {
            let plan = CustomQueryBuilder::new(operation, &path_operation, self.config.db_engine)
                .build()?;
            let result = {
                let mut cursor = connection.cursor()?;
                cursor.execute(&plan.statement.sql, &plan.statement.params)?
            };
            return Ok(Value::Array(materialize_custom(&result, &plan.outputs)));
        }

        let entity = self.registry.entity(&operation.entity)?;

        Logger::trace(
            "OPERATION_DISPATCH",
            &[
                ("entity", operation.entity.as_str()),
                ("action", operation.action.as_str()),
            ],
        );

        match operation.action {
            Action::Read | Action::Custom => self.execute_read(connection, operation, &entity),
            Action::Create => self.execute_create(connection, operation, &entity),
            Action::Update => self.execute_update(connection, operation, &entity),
            Action::Delete => self.execute_delete(connection, operation, &entity),
            Action::Restore => self.execute_restore(connection, operation, &entity),
            Action::Batch => Err(ApplicationError::bad_request(
                "batch action requires the batch entity",
            )),
        }
    }

    fn execute_read(
        &self,
        connection: &mut dyn Connection,
        operation: &Operation,
        entity: &EntitySchema,
    ) -> AppResult<Value> {
        let model = self.registry.model();
        let plan = SelectQueryBuilder::new(
            operation,
            entity,
            &model,
            self.config.db_engine,
            self.config.db_schema.clone(),
            self.config.default_page_size,
        )
        .build()?;

        let result = {
            let mut cursor = connection.cursor()?;
            cursor.execute(&plan.statement.sql, &plan.statement.params)?
        };

        let mut rows = materialize_select(&result, &plan)?;
        self.attach_relations(connection, &plan, &mut rows)?;

        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    }

    /// Execute the keyed follow-up queries for array relations and stitch
    /// the grouped child rows onto the parents
    fn attach_relations(
        &self,
        connection: &mut dyn Connection,
        plan: &SelectPlan,
        rows: &mut [Map<String, Value>],
    ) -> AppResult<()> {
        for sub in &plan.sub_selects {
            // Every parent gets the relation key, even when empty
            for row in rows.iter_mut() {
                row.insert(sub.relation.clone(), Value::Array(Vec::new()));
            }

            let mut keys: Vec<SqlValue> = Vec::new();
            let mut seen: Vec<Value> = Vec::new();
            for row in rows.iter() {
                if let Some(value) = row.get(&sub.parent_property) {
                    if !value.is_null() && !seen.contains(value) {
                        seen.push(value.clone());
                        keys.push(SqlValue::from_json(value)?);
                    }
                }
            }
            if keys.is_empty() {
                continue;
            }

            let statement = sub.statement(self.config.db_engine, keys)?;
            let result = {
                let mut cursor = connection.cursor()?;
                cursor.execute(&statement.sql, &statement.params)?
            };

            // Group child rows by the FK value
            let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
            for child_row in &result.rows {
                if child_row.len() != sub.columns.len() {
                    return Err(ApplicationError::internal(format!(
                        "relation '{}' returned {} columns, expected {}",
                        sub.relation,
                        child_row.len(),
                        sub.columns.len()
                    )));
                }
                let mut child = Map::new();
                for (name, value) in sub.columns.iter().zip(child_row) {
                    child.insert(name.clone(), value.to_json());
                }
                let key = child
                    .get(&sub.child_property)
                    .cloned()
                    .unwrap_or(Value::Null);
                grouped
                    .entry(key.to_string())
                    .or_default()
                    .push(Value::Object(child));
            }

            for row in rows.iter_mut() {
                let key = match row.get(&sub.parent_property) {
                    Some(value) => value.to_string(),
                    None => continue,
                };
                if let Some(children) = grouped.get(&key) {
                    row.insert(sub.relation.clone(), Value::Array(children.clone()));
                }
            }
        }
        Ok(())
    }

    fn execute_create(
        &self,
        connection: &mut dyn Connection,
        operation: &Operation,
        entity: &EntitySchema,
    ) -> AppResult<Value> {
        let plan = InsertQueryBuilder::new(
            operation,
            entity,
            self.config.db_engine,
            self.config.db_schema.clone(),
        )
        .build()?;

        let mut last = QueryResult::empty();
        for statement in &plan.statements {
            let mut cursor = connection.cursor()?;
            last = cursor.execute(&statement.sql, &statement.params)?;
        }

        let rows = materialize_named(&last, &plan.columns)?;
        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    }

    fn execute_update(
        &self,
        connection: &mut dyn Connection,
        operation: &Operation,
        entity: &EntitySchema,
    ) -> AppResult<Value> {
        let plan = UpdateQueryBuilder::new(
            operation,
            entity,
            self.config.db_engine,
            self.config.db_schema.clone(),
        )
        .build()?;

        let first = {
            let mut cursor = connection.cursor()?;
            cursor.execute(&plan.statements[0].sql, &plan.statements[0].params)?
        };

        let affected = if first.rows.is_empty() {
            first.affected
        } else {
            first.rows.len() as u64
        };

        if affected == 0 {
            return if plan.concurrency_supplied {
                Err(ApplicationError::conflict(format!(
                    "concurrency stamp of {} did not match the stored row",
                    entity.api_name
                )))
            } else {
                Err(ApplicationError::not_found(format!(
                    "no matching {} rows to update",
                    entity.api_name
                )))
            };
        }

        let result = if plan.statements.len() > 1 {
            let mut cursor = connection.cursor()?;
            cursor.execute(&plan.statements[1].sql, &plan.statements[1].params)?
        } else {
            first
        };

        let rows = materialize_named(&result, &plan.columns)?;
        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    }

    fn execute_restore(
        &self,
        connection: &mut dyn Connection,
        operation: &Operation,
        entity: &EntitySchema,
    ) -> AppResult<Value> {
        let plan = RestoreQueryBuilder::new(
            operation,
            entity,
            self.config.db_engine,
            self.config.db_schema.clone(),
        )
        .build()?;

        let first = {
            let mut cursor = connection.cursor()?;
            cursor.execute(&plan.statements[0].sql, &plan.statements[0].params)?
        };

        let affected = if first.rows.is_empty() {
            first.affected
        } else {
            first.rows.len() as u64
        };
        if affected == 0 {
            return Err(ApplicationError::not_found(format!(
                "no soft-deleted {} rows to restore",
                entity.api_name
            )));
        }

        let result = if plan.statements.len() > 1 {
            let mut cursor = connection.cursor()?;
            cursor.execute(&plan.statements[1].sql, &plan.statements[1].params)?
        } else {
            first
        };

        let rows = materialize_named(&result, &plan.columns)?;
        Ok(Value::Array(rows.into_iter().map(Value::Object).collect()))
    }

    fn execute_delete(
        &self,
        connection: &mut dyn Connection,
        operation: &Operation,
        entity: &EntitySchema,
    ) -> AppResult<Value> {
        let plan = DeleteQueryBuilder::new(
            operation,
            entity,
            self.config.db_engine,
            self.config.db_schema.clone(),
        )
        .build()?;

        let result = {
            let mut cursor = connection.cursor()?;
            cursor.execute(&plan.statement.sql, &plan.statement.params)?
        };

        Ok(json!({ "deleted": result.affected }))
    }
}

impl OperationExecutor for OperationDao {
    fn execute(
        &self,
        connection: &mut dyn Connection,
        operation: &Operation,
    ) -> AppResult<Value> {
        self.dispatch(connection, operation)
    }
}

/// Zip select-plan columns with row values, nesting object-relation
/// columns under their relation name
fn materialize_select(
    result: &QueryResult,
    plan: &SelectPlan,
) -> AppResult<Vec<Map<String, Value>>> {
    let mut rows = Vec::with_capacity(result.rows.len());
    for raw in &result.rows {
        if raw.len() != plan.columns.len() {
            return Err(ApplicationError::internal(format!(
                "driver returned {} columns, plan expects {}",
                raw.len(),
                plan.columns.len()
            )));
        }
        let mut row = Map::new();
        for (column, value) in plan.columns.iter().zip(raw) {
            match &column.key {
                ColumnKey::Own(name) => {
                    row.insert(name.clone(), value.to_json());
                }
                ColumnKey::Related { relation, property } => {
                    let nested = row
                        .entry(relation.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if let Value::Object(map) = nested {
                        map.insert(property.clone(), value.to_json());
                    }
                }
            }
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Zip a flat property-name list with row values
fn materialize_named(
    result: &QueryResult,
    columns: &[String],
) -> AppResult<Vec<Map<String, Value>>> {
    let mut rows = Vec::with_capacity(result.rows.len());
    for raw in &result.rows {
        if raw.len() != columns.len() {
            return Err(ApplicationError::internal(format!(
                "driver returned {} columns, plan expects {}",
                raw.len(),
                columns.len()
            )));
        }
        let mut row = Map::new();
        for (name, value) in columns.iter().zip(raw) {
            row.insert(name.clone(), value.to_json());
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Materialize custom-operation rows using the driver's column labels,
/// renamed through the declared output aliases
fn materialize_custom(result: &QueryResult, outputs: &BTreeMap<String, String>) -> Vec<Value> {
    result
        .rows
        .iter()
        .map(|raw| {
            let mut row = Map::new();
            for (label, value) in result.columns.iter().zip(raw) {
                let name = outputs.get(label).cloned().unwrap_or_else(|| label.clone());
                row.insert(name, value.to_json());
            }
            Value::Object(row)
        })
        .collect()
}
