//! Model Loader
//!
//! Parses the declarative spec document into a validated `ApiModel`.
//! The document is an object tree with top-level `schema_objects` and
//! `path_operations` maps; entity extensions use the kebab-case keys
//! `database`, `primary-key`, `concurrency-control`, `permissions`,
//! `parent-property`, `child-property`.
//!
//! Loading fails with `SpecError` on the first structural violation:
//! a dangling entity reference, a parent/child property that does not
//! exist, a permission pattern that does not compile, a missing or
//! duplicated primary key, or a dangling concurrency property.

use std::collections::BTreeMap;
use std::sync::Arc;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppResult, ApplicationError};
use crate::model::types::{
    ApiModel, EntitySchema, InputDescriptor, PathOperation, PermissionAction, PermissionTable,
    PropertyDescriptor, PropertyType, RelationDescriptor, RelationKind, Rule, SoftDelete,
};

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    schema_objects: BTreeMap<String, RawEntity>,
    #[serde(default)]
    path_operations: BTreeMap<String, RawPathOperation>,
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    database: String,
    #[serde(default, alias = "table-name")]
    table_name: Option<String>,
    #[serde(rename = "primary-key", alias = "primary_key")]
    primary_key: String,
    #[serde(default, rename = "concurrency-control", alias = "concurrency_property")]
    concurrency_control: Option<String>,
    #[serde(default)]
    properties: BTreeMap<String, PropertyDescriptor>,
    #[serde(default)]
    relations: BTreeMap<String, RelationDescriptor>,
    /// role → action → rule, in any of the three declarative forms
    #[serde(default)]
    permissions: BTreeMap<String, BTreeMap<PermissionAction, RawRule>>,
}

#[derive(Debug, Deserialize)]
struct RawPathOperation {
    #[serde(default)]
    database: Option<String>,
    sql: String,
    #[serde(default)]
    inputs: BTreeMap<String, InputDescriptor>,
    #[serde(default)]
    outputs: BTreeMap<String, String>,
}

/// The three declarative rule forms
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRule {
    Allow(bool),
    Pattern(String),
    Full {
        #[serde(default)]
        properties: Option<String>,
        #[serde(default, rename = "where")]
        where_template: Option<String>,
    },
}

impl RawRule {
    fn normalize(self) -> Rule {
        match self {
            RawRule::Allow(allow) => Rule {
                allow,
                properties: None,
                where_template: None,
            },
            RawRule::Pattern(pattern) => Rule {
                allow: true,
                properties: Some(pattern),
                where_template: None,
            },
            RawRule::Full {
                properties,
                where_template,
            } => Rule {
                allow: true,
                properties,
                where_template,
            },
        }
    }
}

/// Parse and validate a spec document
pub fn load_model(document: &Value) -> AppResult<ApiModel> {
    let raw: RawDocument = serde_json::from_value(document.clone())
        .map_err(|e| ApplicationError::spec(format!("malformed spec document: {}", e)))?;

    let mut entities = BTreeMap::new();
    for (name, raw_entity) in raw.schema_objects {
        let entity = build_entity(&name, raw_entity)?;
        entities.insert(name, Arc::new(entity));
    }

    // Cross-entity validation needs the full set
    for entity in entities.values() {
        validate_relations(entity, &entities)?;
    }

    let mut path_operations = BTreeMap::new();
    for (name, raw_op) in raw.path_operations {
        if raw_op.sql.trim().is_empty() {
            return Err(ApplicationError::spec(format!(
                "path operation '{}' has an empty sql template",
                name
            )));
        }
        path_operations.insert(
            name.clone(),
            Arc::new(PathOperation {
                api_name: name,
                database: raw_op.database.unwrap_or_else(|| "default".to_string()),
                sql: raw_op.sql,
                inputs: raw_op.inputs,
                outputs: raw_op.outputs,
            }),
        );
    }

    Ok(ApiModel {
        entities,
        path_operations,
    })
}

fn build_entity(name: &str, raw: RawEntity) -> AppResult<EntitySchema> {
    let mut properties = BTreeMap::new();
    for (prop_name, mut descriptor) in raw.properties {
        descriptor.api_name = prop_name.clone();
        if descriptor.column_name.is_empty() {
            descriptor.column_name = prop_name.clone();
        }
        properties.insert(prop_name, descriptor);
    }

    if !properties.contains_key(&raw.primary_key) {
        return Err(ApplicationError::spec(format!(
            "entity '{}': primary key '{}' is not a declared property",
            name, raw.primary_key
        )));
    }

    // Exactly one property may carry a key strategy, and it must be the
    // declared primary key
    for (prop_name, descriptor) in &properties {
        if descriptor.key.is_some() && prop_name != &raw.primary_key {
            return Err(ApplicationError::spec(format!(
                "entity '{}': property '{}' declares a key strategy but the primary key is '{}'",
                name, prop_name, raw.primary_key
            )));
        }
    }

    if let Some(concurrency) = &raw.concurrency_control {
        if !properties.contains_key(concurrency) {
            return Err(ApplicationError::spec(format!(
                "entity '{}': concurrency property '{}' is not a declared property",
                name, concurrency
            )));
        }
        if concurrency == &raw.primary_key {
            return Err(ApplicationError::spec(format!(
                "entity '{}': concurrency property may not be the primary key",
                name
            )));
        }
    }

    for (prop_name, descriptor) in &properties {
        match &descriptor.soft_delete {
            Some(SoftDelete::BooleanFlag { .. })
                if descriptor.api_type != PropertyType::Boolean =>
            {
                return Err(ApplicationError::spec(format!(
                    "entity '{}': boolean_flag soft delete requires a boolean property, '{}' is {}",
                    name,
                    prop_name,
                    descriptor.api_type.as_str()
                )))
            }
            Some(SoftDelete::ExcludeValues { values, .. }) if values.is_empty() => {
                return Err(ApplicationError::spec(format!(
                    "entity '{}': exclude_values soft delete on '{}' declares no values",
                    name, prop_name
                )))
            }
            _ => {}
        }
    }

    let mut relations = BTreeMap::new();
    for (rel_name, mut descriptor) in raw.relations {
        descriptor.api_name = rel_name.clone();
        relations.insert(rel_name, descriptor);
    }

    let permissions = normalize_permissions(name, raw.permissions)?;

    Ok(EntitySchema {
        api_name: name.to_string(),
        database: raw.database,
        table_name: raw.table_name.unwrap_or_else(|| name.to_string()),
        primary_key: raw.primary_key,
        concurrency_property: raw.concurrency_control,
        properties,
        relations,
        permissions,
    })
}

/// Decompress the declarative role → action → rule map into the
/// normalized provider → action → role → rule table
fn normalize_permissions(
    entity: &str,
    raw: BTreeMap<String, BTreeMap<PermissionAction, RawRule>>,
) -> AppResult<PermissionTable> {
    let mut by_action: BTreeMap<PermissionAction, BTreeMap<String, Rule>> = BTreeMap::new();

    for (role, actions) in raw {
        for (action, raw_rule) in actions {
            let rule = raw_rule.normalize();

            if let Some(pattern) = &rule.properties {
                Regex::new(&format!("^({})$", pattern)).map_err(|e| {
                    ApplicationError::spec(format!(
                        "entity '{}': permission pattern '{}' for role '{}' does not compile: {}",
                        entity, pattern, role, e
                    ))
                })?;
            }
            if let Some(template) = &rule.where_template {
                validate_where_template(entity, &role, template)?;
            }

            by_action
                .entry(action)
                .or_default()
                .insert(role.clone(), rule);
        }
    }

    let mut providers = BTreeMap::new();
    if !by_action.is_empty() {
        providers.insert("default".to_string(), by_action);
    }
    Ok(PermissionTable { providers })
}

/// Check that every `${...}` token is closed and addresses the claims tree
fn validate_where_template(entity: &str, role: &str, template: &str) -> AppResult<()> {
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or_else(|| {
            ApplicationError::spec(format!(
                "entity '{}': unterminated claim token in where template for role '{}'",
                entity, role
            ))
        })?;
        let path = &after[..end];
        if !path.starts_with("claims.") || path.len() <= "claims.".len() {
            return Err(ApplicationError::spec(format!(
                "entity '{}': where template for role '{}' may only reference ${{claims.PATH}}, got '${{{}}}'",
                entity, role, path
            )));
        }
        rest = &after[end + 1..];
    }
    Ok(())
}

fn validate_relations(
    entity: &EntitySchema,
    entities: &BTreeMap<String, Arc<EntitySchema>>,
) -> AppResult<()> {
    for relation in entity.relations.values() {
        let target = entities.get(&relation.entity).ok_or_else(|| {
            ApplicationError::spec(format!(
                "entity '{}': relation '{}' references unknown entity '{}'",
                entity.api_name, relation.api_name, relation.entity
            ))
        })?;

        if !entity.properties.contains_key(&relation.parent_property) {
            return Err(ApplicationError::spec(format!(
                "entity '{}': relation '{}' parent property '{}' does not exist",
                entity.api_name, relation.api_name, relation.parent_property
            )));
        }

        match relation.kind {
            RelationKind::Object => {
                // The parent FK must point at an existing property on the
                // referenced entity (its primary key)
                if !target.properties.contains_key(&target.primary_key) {
                    return Err(ApplicationError::spec(format!(
                        "entity '{}': relation target '{}' has no primary key property",
                        entity.api_name, relation.entity
                    )));
                }
            }
            RelationKind::Array => {
                let child = relation.child_property.as_deref().ok_or_else(|| {
                    ApplicationError::spec(format!(
                        "entity '{}': array relation '{}' is missing child-property",
                        entity.api_name, relation.api_name
                    ))
                })?;
                if !target.properties.contains_key(child) {
                    return Err(ApplicationError::spec(format!(
                        "entity '{}': relation '{}' child property '{}' does not exist on '{}'",
                        entity.api_name, relation.api_name, child, relation.entity
                    )));
                }
            }
        }
    }
    Ok(())
}
