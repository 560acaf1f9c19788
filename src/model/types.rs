//! API Model Types
//!
//! Parsed, normalized entity/permission/relation metadata. Descriptors are
//! immutable after load; the registry hands out shared snapshots.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppResult, ApplicationError};

/// Semantic property types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "number")]
    Number,
    #[serde(rename = "string")]
    String,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "date-time")]
    DateTime,
    #[serde(rename = "uuid")]
    Uuid,
}

impl PropertyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyType::Integer => "integer",
            PropertyType::Number => "number",
            PropertyType::String => "string",
            PropertyType::Boolean => "boolean",
            PropertyType::DateTime => "date-time",
            PropertyType::Uuid => "uuid",
        }
    }
}

/// Primary key generation strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStrategy {
    /// Database-generated (identity/auto-increment)
    Auto,
    /// Client supplies the key
    Manual,
    /// Gateway generates a v4 UUID
    Uuid,
    /// Database sequence
    Sequence,
}

/// Soft-delete role a property plays.
///
/// Marked properties make delete a state change instead of a row
/// removal: reads filter rows still marked deleted, delete writes the
/// deleted state, and restore writes it back.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SoftDelete {
    /// Live rows hold NULL; delete stamps the current timestamp
    NullCheck,
    /// Live rows hold `active_value`; delete flips it
    BooleanFlag {
        #[serde(default = "default_active_value")]
        active_value: bool,
    },
    /// Live rows hold none of `values`; delete writes `delete_value`,
    /// restore writes `restore_value`
    ExcludeValues {
        values: Vec<Value>,
        #[serde(default)]
        delete_value: Option<Value>,
        #[serde(default)]
        restore_value: Option<Value>,
    },
    /// Audit column stamped with the caller's subject during the named
    /// action; carries no read filtering
    AuditField { action: AuditAction },
}

fn default_active_value() -> bool {
    true
}

impl SoftDelete {
    /// Whether the strategy filters reads (audit columns do not)
    pub fn filters_reads(&self) -> bool {
        !matches!(self, SoftDelete::AuditField { .. })
    }
}

/// Which action an audit column records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Delete,
    Restore,
}

/// A single entity property
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Logical name exposed through the API
    #[serde(default)]
    pub api_name: String,

    /// Storage column name; defaults to the logical name
    #[serde(default, alias = "column-name")]
    pub column_name: String,

    /// Semantic type
    #[serde(rename = "type")]
    pub api_type: PropertyType,

    /// Maximum length for string values
    #[serde(default, alias = "max-length")]
    pub max_length: Option<usize>,

    /// Whether the property must be present on create
    #[serde(default)]
    pub required: bool,

    /// Key generation strategy, present only on the primary key property
    #[serde(default)]
    pub key: Option<KeyStrategy>,

    /// Soft-delete role, if the property participates
    #[serde(default, alias = "soft-delete")]
    pub soft_delete: Option<SoftDelete>,
}

impl PropertyDescriptor {
    pub fn new(api_name: impl Into<String>, api_type: PropertyType) -> Self {
        let api_name = api_name.into();
        Self {
            column_name: api_name.clone(),
            api_name,
            api_type,
            max_length: None,
            required: false,
            key: None,
            soft_delete: None,
        }
    }
}

/// Relation cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    /// 1:1, joined inline
    Object,
    /// 1:many, loaded by a keyed follow-up query
    Array,
}

/// A declared association between two entities
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDescriptor {
    /// Relation name exposed through the API
    #[serde(default)]
    pub api_name: String,

    /// Cardinality
    #[serde(rename = "type", alias = "kind")]
    pub kind: RelationKind,

    /// Referenced entity name
    #[serde(alias = "schema_name")]
    pub entity: String,

    /// For `object`: the FK property on this entity.
    /// For `array`: the property on this entity exposed to the child.
    #[serde(alias = "parent-property")]
    pub parent_property: String,

    /// For `array`: the FK property on the referenced entity
    #[serde(default, alias = "child-property")]
    pub child_property: Option<String>,
}

/// Permission actions; create/update collapse to write. Restore rules
/// are their own action, falling back to write rules when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    Read,
    Write,
    Delete,
    Restore,
}

impl PermissionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionAction::Read => "read",
            PermissionAction::Write => "write",
            PermissionAction::Delete => "delete",
            PermissionAction::Restore => "restore",
        }
    }
}

/// A normalized permission rule.
///
/// The declarative forms decompress at load time: a bare regex string
/// becomes `{allow: true, properties: Some(regex), where: None}` and a
/// boolean becomes `{allow: b, properties: None, where: None}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub allow: bool,
    /// Allowed-property pattern; `None` on an allowing rule means all
    pub properties: Option<String>,
    /// Row-level predicate template with `${claims.PATH}` tokens
    #[serde(rename = "where")]
    pub where_template: Option<String>,
}

impl Rule {
    pub fn allow_all() -> Self {
        Self {
            allow: true,
            properties: Some(".*".to_string()),
            where_template: None,
        }
    }
}

/// Permission table: provider → action → role → rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermissionTable {
    pub providers: BTreeMap<String, BTreeMap<PermissionAction, BTreeMap<String, Rule>>>,
}

impl PermissionTable {
    /// Whether any rules are declared at all. An entity without a
    /// permission table is unrestricted.
    pub fn is_empty(&self) -> bool {
        self.providers.values().all(|actions| actions.is_empty())
    }

    /// Rules for an action under the default provider
    pub fn rules_for(&self, action: PermissionAction) -> Option<&BTreeMap<String, Rule>> {
        self.providers.get("default").and_then(|a| a.get(&action))
    }
}

/// A complete entity schema
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub api_name: String,
    pub database: String,
    pub table_name: String,
    /// Property name of the primary key
    pub primary_key: String,
    /// Property name of the optimistic-concurrency stamp, if any
    pub concurrency_property: Option<String>,
    pub properties: BTreeMap<String, PropertyDescriptor>,
    pub relations: BTreeMap<String, RelationDescriptor>,
    pub permissions: PermissionTable,
}

impl EntitySchema {
    /// Look up a property, failing with BadRequest for unknown names
    pub fn property(&self, name: &str) -> AppResult<&PropertyDescriptor> {
        self.properties.get(name).ok_or_else(|| {
            ApplicationError::bad_request(format!(
                "property not found. entity: {}, property: {}",
                self.api_name, name
            ))
        })
    }

    pub fn pk_descriptor(&self) -> AppResult<&PropertyDescriptor> {
        self.property(&self.primary_key)
    }

    pub fn pk_strategy(&self) -> KeyStrategy {
        self.properties
            .get(&self.primary_key)
            .and_then(|p| p.key)
            .unwrap_or(KeyStrategy::Auto)
    }

    pub fn concurrency_descriptor(&self) -> Option<&PropertyDescriptor> {
        self.concurrency_property
            .as_deref()
            .and_then(|name| self.properties.get(name))
    }

    /// Table expression, qualified with the configured schema when set
    pub fn table_expression(&self, db_schema: Option<&str>) -> String {
        match db_schema {
            Some(schema) => format!("{}.{}", schema, self.table_name),
            None => self.table_name.clone(),
        }
    }

    /// Whether any property carries a read-filtering soft-delete strategy
    pub fn has_soft_delete(&self) -> bool {
        self.properties
            .values()
            .any(|p| p.soft_delete.as_ref().is_some_and(|s| s.filters_reads()))
    }

    /// Properties whose soft-delete strategy filters reads
    pub fn soft_delete_properties(&self) -> impl Iterator<Item = &PropertyDescriptor> {
        self.properties
            .values()
            .filter(|p| p.soft_delete.as_ref().is_some_and(|s| s.filters_reads()))
    }

    /// Audit columns stamped during the given action
    pub fn audit_properties(&self, action: AuditAction) -> impl Iterator<Item = &PropertyDescriptor> + '_ {
        self.properties.values().filter(move |p| {
            matches!(
                p.soft_delete,
                Some(SoftDelete::AuditField { action: a }) if a == action
            )
        })
    }
}

/// Input parameter of a custom path operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputDescriptor {
    #[serde(default)]
    pub required: bool,
    /// Default applied when the caller omits the input
    #[serde(default)]
    pub default: Option<Value>,
}

/// A pre-declared named SQL operation
#[derive(Debug, Clone, Deserialize)]
pub struct PathOperation {
    #[serde(default)]
    pub api_name: String,
    /// Database binding the template runs against
    #[serde(default = "default_database")]
    pub database: String,
    /// SQL template with `:name` bind tokens
    pub sql: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, InputDescriptor>,
    /// Output column alias → exposed field name; empty passes columns through
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

fn default_database() -> String {
    "default".to_string()
}

/// The loaded model: single source of truth, immutable after load
#[derive(Debug, Clone, Default)]
pub struct ApiModel {
    pub entities: BTreeMap<String, Arc<EntitySchema>>,
    pub path_operations: BTreeMap<String, Arc<PathOperation>>,
}

impl ApiModel {
    pub fn entity(&self, name: &str) -> AppResult<Arc<EntitySchema>> {
        self.entities.get(name).cloned().ok_or_else(|| {
            ApplicationError::bad_request(format!("unknown entity: {}", name))
        })
    }

    pub fn path_operation(&self, name: &str) -> Option<Arc<PathOperation>> {
        self.path_operations.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entity() -> EntitySchema {
        let mut properties = BTreeMap::new();
        let mut pk = PropertyDescriptor::new("album_id", PropertyType::Integer);
        pk.key = Some(KeyStrategy::Auto);
        properties.insert("album_id".to_string(), pk);
        properties.insert(
            "title".to_string(),
            PropertyDescriptor::new("title", PropertyType::String),
        );

        EntitySchema {
            api_name: "album".to_string(),
            database: "chinook".to_string(),
            table_name: "album".to_string(),
            primary_key: "album_id".to_string(),
            concurrency_property: None,
            properties,
            relations: BTreeMap::new(),
            permissions: PermissionTable::default(),
        }
    }

    #[test]
    fn test_property_lookup() {
        let entity = sample_entity();
        assert!(entity.property("title").is_ok());
        let err = entity.property("missing").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_pk_strategy() {
        let entity = sample_entity();
        assert_eq!(entity.pk_strategy(), KeyStrategy::Auto);
    }

    #[test]
    fn test_table_expression_with_schema() {
        let entity = sample_entity();
        assert_eq!(entity.table_expression(None), "album");
        assert_eq!(entity.table_expression(Some("public")), "public.album");
    }

    #[test]
    fn test_empty_permission_table_is_unrestricted() {
        let table = PermissionTable::default();
        assert!(table.is_empty());
        assert!(table.rules_for(PermissionAction::Read).is_none());
    }

    #[test]
    fn test_soft_delete_detection() {
        let mut entity = sample_entity();
        assert!(!entity.has_soft_delete());

        let mut stamp = PropertyDescriptor::new("deleted_at", PropertyType::DateTime);
        stamp.soft_delete = Some(SoftDelete::NullCheck);
        entity.properties.insert("deleted_at".to_string(), stamp);

        assert!(entity.has_soft_delete());
        assert_eq!(entity.soft_delete_properties().count(), 1);
    }

    #[test]
    fn test_audit_columns_do_not_filter_reads() {
        let mut entity = sample_entity();
        let mut audit = PropertyDescriptor::new("deleted_by", PropertyType::String);
        audit.soft_delete = Some(SoftDelete::AuditField {
            action: AuditAction::Delete,
        });
        entity.properties.insert("deleted_by".to_string(), audit);

        assert!(!entity.has_soft_delete());
        assert_eq!(entity.audit_properties(AuditAction::Delete).count(), 1);
        assert_eq!(entity.audit_properties(AuditAction::Restore).count(), 0);
    }

    #[test]
    fn test_soft_delete_strategy_parsing() {
        let parsed: SoftDelete = serde_json::from_value(serde_json::json!({
            "strategy": "exclude_values",
            "values": ["terminated", "deleted"],
            "delete_value": "terminated",
            "restore_value": "active"
        }))
        .unwrap();

        match parsed {
            SoftDelete::ExcludeValues {
                values,
                delete_value,
                restore_value,
            } => {
                assert_eq!(values.len(), 2);
                assert_eq!(delete_value, Some(serde_json::json!("terminated")));
                assert_eq!(restore_value, Some(serde_json::json!("active")));
            }
            other => panic!("expected exclude_values, got {:?}", other),
        }
    }
}
