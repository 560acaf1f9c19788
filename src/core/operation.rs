//! Canonical Operation Model
//!
//! Every request is reduced to an `Operation` before touching the SQL
//! layer: the target entity, the action, flat query parameters, a nested
//! store-parameter tree for writes, `__`-prefixed metadata parameters,
//! and the caller's claims. Constructed by the request adapter or a batch
//! plan, consumed by exactly one handler dispatch.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::claims::ClaimSet;
use crate::error::{AppResult, ApplicationError};
use crate::model::types::PermissionAction;

/// Actions an operation can perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
    Restore,
    Custom,
    Batch,
}

impl Action {
    pub fn parse(s: &str) -> AppResult<Self> {
        match s {
            "read" => Ok(Self::Read),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            "restore" => Ok(Self::Restore),
            "custom" => Ok(Self::Custom),
            "batch" => Ok(Self::Batch),
            other => Err(ApplicationError::bad_request(format!(
                "unknown action: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Restore => "restore",
            Self::Custom => "custom",
            Self::Batch => "batch",
        }
    }

    /// HTTP method → action mapping used by the adapter
    pub fn from_method(method: &str) -> AppResult<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Read),
            "POST" => Ok(Self::Create),
            "PUT" | "PATCH" => Ok(Self::Update),
            "DELETE" => Ok(Self::Delete),
            other => Err(ApplicationError::bad_request(format!(
                "unsupported HTTP method: {}",
                other
            ))),
        }
    }

    /// Permission-table action; create and update collapse to write
    pub fn permission_action(&self) -> PermissionAction {
        match self {
            Self::Read | Self::Custom | Self::Batch => PermissionAction::Read,
            Self::Create | Self::Update => PermissionAction::Write,
            Self::Delete => PermissionAction::Delete,
            Self::Restore => PermissionAction::Restore,
        }
    }

    /// Verb used in scope tokens; restore is gated as a write
    pub fn permission_verb(&self) -> &'static str {
        match self.permission_action() {
            PermissionAction::Read => "read",
            PermissionAction::Write | PermissionAction::Restore => "write",
            PermissionAction::Delete => "delete",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::Create | Self::Update | Self::Delete | Self::Restore | Self::Batch
        )
    }
}

/// Pre-rendered SQL for custom path operations
#[derive(Debug, Clone)]
pub struct CustomSql {
    pub sql: String,
    pub binds: Map<String, Value>,
}

/// An action to perform on an entity
#[derive(Debug, Clone)]
pub struct Operation {
    /// Target entity name
    pub entity: String,
    /// Action to perform
    pub action: Action,
    /// Filter expressions selecting the affected records
    pub query_params: Map<String, Value>,
    /// Values to store for create/update; the full batch request for batch
    pub store_params: Map<String, Value>,
    /// `__`-prefixed operational instructions (sort, paging, projection)
    pub metadata_params: Map<String, Value>,
    /// Caller claims
    pub claims: ClaimSet,
    /// Custom SQL text and bindings, for custom-action operations
    pub custom_sql: Option<CustomSql>,
}

impl Operation {
    pub fn new(entity: impl Into<String>, action: Action) -> Self {
        Self {
            entity: entity.into(),
            action,
            query_params: Map::new(),
            store_params: Map::new(),
            metadata_params: Map::new(),
            claims: ClaimSet::default(),
            custom_sql: None,
        }
    }

    pub fn with_query_params(mut self, params: Map<String, Value>) -> Self {
        self.query_params = params;
        self
    }

    pub fn with_store_params(mut self, params: Map<String, Value>) -> Self {
        self.store_params = params;
        self
    }

    pub fn with_metadata_params(mut self, params: Map<String, Value>) -> Self {
        self.metadata_params = params;
        self
    }

    pub fn with_claims(mut self, claims: ClaimSet) -> Self {
        self.claims = claims;
        self
    }

    /// String metadata value, e.g. `__sort`
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata_params.get(key).and_then(|v| v.as_str())
    }

    /// Numeric metadata value, accepting both numbers and numeric strings
    pub fn metadata_u64(&self, key: &str) -> AppResult<Option<u64>> {
        match self.metadata_params.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
                ApplicationError::bad_request(format!("{} must be a non-negative integer", key))
            }),
            Some(Value::String(s)) => s.parse::<u64>().map(Some).map_err(|_| {
                ApplicationError::bad_request(format!("{} must be a non-negative integer", key))
            }),
            Some(_) => Err(ApplicationError::bad_request(format!(
                "{} must be a non-negative integer",
                key
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_mapping() {
        assert_eq!(Action::from_method("GET").unwrap(), Action::Read);
        assert_eq!(Action::from_method("post").unwrap(), Action::Create);
        assert_eq!(Action::from_method("PUT").unwrap(), Action::Update);
        assert_eq!(Action::from_method("PATCH").unwrap(), Action::Update);
        assert_eq!(Action::from_method("DELETE").unwrap(), Action::Delete);
        assert!(Action::from_method("TRACE").is_err());
    }

    #[test]
    fn test_permission_action_collapse() {
        assert_eq!(Action::Create.permission_action(), PermissionAction::Write);
        assert_eq!(Action::Update.permission_action(), PermissionAction::Write);
        assert_eq!(Action::Read.permission_action(), PermissionAction::Read);
        assert_eq!(Action::Delete.permission_action(), PermissionAction::Delete);
        assert_eq!(Action::Restore.permission_action(), PermissionAction::Restore);
        // Restore is gated as a write at the scope level
        assert_eq!(Action::Restore.permission_verb(), "write");
    }

    #[test]
    fn test_metadata_accessors() {
        let mut metadata = Map::new();
        metadata.insert("__limit".to_string(), json!("25"));
        metadata.insert("__offset".to_string(), json!(50));
        metadata.insert("__sort".to_string(), json!("title:asc"));

        let op = Operation::new("album", Action::Read).with_metadata_params(metadata);

        assert_eq!(op.metadata_u64("__limit").unwrap(), Some(25));
        assert_eq!(op.metadata_u64("__offset").unwrap(), Some(50));
        assert_eq!(op.metadata_str("__sort"), Some("title:asc"));
        assert_eq!(op.metadata_u64("__missing").unwrap(), None);
    }

    #[test]
    fn test_negative_limit_rejected() {
        let mut metadata = Map::new();
        metadata.insert("__limit".to_string(), json!("-1"));

        let op = Operation::new("album", Action::Read).with_metadata_params(metadata);
        assert!(op.metadata_u64("__limit").is_err());
    }
}
