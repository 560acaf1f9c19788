//! Model Registry
//!
//! Process-wide holder of the loaded `ApiModel`. The read path clones an
//! `Arc` snapshot; reload swaps the snapshot atomically so in-flight
//! requests keep the model they started with.

use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::error::{AppResult, ApplicationError};
use crate::model::loader::load_model;
use crate::model::types::{ApiModel, EntitySchema, PathOperation};

/// Registry holding one immutable model snapshot
pub struct ModelRegistry {
    snapshot: RwLock<Arc<ApiModel>>,
}

impl ModelRegistry {
    /// Create an empty registry; `load` must run before requests are served
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(ApiModel::default())),
        }
    }

    /// Create a registry directly from a spec document
    pub fn from_document(document: &Value) -> AppResult<Self> {
        let registry = Self::new();
        registry.load(document)?;
        Ok(registry)
    }

    /// Parse, validate, and atomically publish a new model snapshot.
    /// On error the previous snapshot stays in place.
    pub fn load(&self, document: &Value) -> AppResult<()> {
        let model = load_model(document)?;
        let mut guard = self
            .snapshot
            .write()
            .map_err(|_| ApplicationError::internal("model registry lock poisoned"))?;
        *guard = Arc::new(model);
        Ok(())
    }

    /// Current model snapshot
    pub fn model(&self) -> Arc<ApiModel> {
        self.snapshot
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    /// Entity schema by name
    pub fn entity(&self, name: &str) -> AppResult<Arc<EntitySchema>> {
        self.model().entity(name)
    }

    /// Custom path operation by name
    pub fn path_operation(&self, name: &str) -> Option<Arc<PathOperation>> {
        self.model().path_operation(name)
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(table: &str) -> Value {
        json!({
            "schema_objects": {
                "artist": {
                    "database": "chinook",
                    "table-name": table,
                    "primary-key": "artist_id",
                    "properties": {
                        "artist_id": {"type": "integer", "key": "auto"},
                        "name": {"type": "string"}
                    }
                }
            }
        })
    }

    #[test]
    fn test_load_and_get() {
        let registry = ModelRegistry::from_document(&doc("artist")).unwrap();
        let artist = registry.entity("artist").unwrap();
        assert_eq!(artist.table_name, "artist");

        let err = registry.entity("nope").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_reload_replaces_snapshot() {
        let registry = ModelRegistry::from_document(&doc("artist")).unwrap();
        let before = registry.entity("artist").unwrap();

        registry.load(&doc("artist_v2")).unwrap();
        let after = registry.entity("artist").unwrap();

        // The old snapshot is unchanged, the new one reflects the reload
        assert_eq!(before.table_name, "artist");
        assert_eq!(after.table_name, "artist_v2");
    }

    #[test]
    fn test_failed_reload_keeps_previous_snapshot() {
        let registry = ModelRegistry::from_document(&doc("artist")).unwrap();

        let bad = json!({"schema_objects": {"x": {"database": "d", "primary-key": "missing"}}});
        assert!(registry.load(&bad).is_err());

        assert!(registry.entity("artist").is_ok());
    }
}
