//! Soft-Delete SQL Fragments
//!
//! Entities can mark properties with a soft-delete strategy; delete then
//! becomes a state change instead of a row removal. This module renders
//! the shared fragments: the live-row conditions reads append, the
//! deleted-row conditions restore targets, and the SET assignments the
//! delete and restore handlers write. Configured marker values bind as
//! parameters like any other operand.

use crate::core::claims::ClaimSet;
use crate::error::AppResult;
use crate::model::types::{AuditAction, EntitySchema, PropertyDescriptor, SoftDelete};
use crate::sql::binder::ParamBinder;
use crate::sql::value::{to_db_value, SqlValue};

/// Condition selecting rows that are NOT soft-deleted, or `None` when
/// the strategy carries no read filtering
pub fn live_row_condition(
    property: &PropertyDescriptor,
    column: &str,
    binder: &mut ParamBinder,
) -> AppResult<Option<String>> {
    let strategy = match &property.soft_delete {
        Some(strategy) => strategy,
        None => return Ok(None),
    };

    match strategy {
        SoftDelete::NullCheck => Ok(Some(format!("{} IS NULL", column))),
        SoftDelete::BooleanFlag { active_value } => {
            let placeholder = binder.bind(SqlValue::Bool(*active_value));
            Ok(Some(format!("{} = {}", column, placeholder)))
        }
        SoftDelete::ExcludeValues { values, .. } => {
            let mut placeholders = Vec::with_capacity(values.len());
            for value in values {
                placeholders.push(binder.bind(to_db_value(property, value)?));
            }
            Ok(Some(format!(
                "{} NOT IN ({})",
                column,
                placeholders.join(", ")
            )))
        }
        SoftDelete::AuditField { .. } => Ok(None),
    }
}

/// Condition selecting rows that ARE soft-deleted; restore targets these
pub fn deleted_row_condition(
    property: &PropertyDescriptor,
    column: &str,
    binder: &mut ParamBinder,
) -> AppResult<Option<String>> {
    let strategy = match &property.soft_delete {
        Some(strategy) => strategy,
        None => return Ok(None),
    };

    match strategy {
        SoftDelete::NullCheck => Ok(Some(format!("{} IS NOT NULL", column))),
        SoftDelete::BooleanFlag { active_value } => {
            let placeholder = binder.bind(SqlValue::Bool(!active_value));
            Ok(Some(format!("{} = {}", column, placeholder)))
        }
        SoftDelete::ExcludeValues { values, .. } => {
            let mut placeholders = Vec::with_capacity(values.len());
            for value in values {
                placeholders.push(binder.bind(to_db_value(property, value)?));
            }
            Ok(Some(format!("{} IN ({})", column, placeholders.join(", "))))
        }
        SoftDelete::AuditField { .. } => Ok(None),
    }
}

/// SET assignments marking rows deleted, audit columns included
pub fn delete_assignments(
    entity: &EntitySchema,
    claims: &ClaimSet,
    binder: &mut ParamBinder,
) -> AppResult<Vec<String>> {
    let mut assignments = Vec::new();

    for property in entity.properties.values() {
        let strategy = match &property.soft_delete {
            Some(strategy) => strategy,
            None => continue,
        };
        let column = &property.column_name;

        match strategy {
            SoftDelete::NullCheck => {
                assignments.push(format!("{} = CURRENT_TIMESTAMP", column));
            }
            SoftDelete::BooleanFlag { active_value } => {
                let placeholder = binder.bind(SqlValue::Bool(!active_value));
                assignments.push(format!("{} = {}", column, placeholder));
            }
            SoftDelete::ExcludeValues { delete_value, .. } => {
                if let Some(value) = delete_value {
                    let placeholder = binder.bind(to_db_value(property, value)?);
                    assignments.push(format!("{} = {}", column, placeholder));
                }
            }
            SoftDelete::AuditField { action } => {
                if *action == AuditAction::Delete {
                    assignments.push(audit_assignment(property, claims, binder));
                }
            }
        }
    }

    Ok(assignments)
}

/// SET assignments clearing the deleted state, audit columns included
pub fn restore_assignments(
    entity: &EntitySchema,
    claims: &ClaimSet,
    binder: &mut ParamBinder,
) -> AppResult<Vec<String>> {
    let mut assignments = Vec::new();

    for property in entity.properties.values() {
        let strategy = match &property.soft_delete {
            Some(strategy) => strategy,
            None => continue,
        };
        let column = &property.column_name;

        match strategy {
            SoftDelete::NullCheck => {
                assignments.push(format!("{} = NULL", column));
            }
            SoftDelete::BooleanFlag { active_value } => {
                let placeholder = binder.bind(SqlValue::Bool(*active_value));
                assignments.push(format!("{} = {}", column, placeholder));
            }
            SoftDelete::ExcludeValues { restore_value, .. } => {
                if let Some(value) = restore_value {
                    let placeholder = binder.bind(to_db_value(property, value)?);
                    assignments.push(format!("{} = {}", column, placeholder));
                }
            }
            SoftDelete::AuditField { action } => {
                if *action == AuditAction::Restore {
                    assignments.push(audit_assignment(property, claims, binder));
                }
            }
        }
    }

    Ok(assignments)
}

fn audit_assignment(
    property: &PropertyDescriptor,
    claims: &ClaimSet,
    binder: &mut ParamBinder,
) -> String {
    let subject = match &claims.sub {
        Some(sub) => SqlValue::Text(sub.clone()),
        None => SqlValue::Null,
    };
    format!("{} = {}", property.column_name, binder.bind(subject))
}
