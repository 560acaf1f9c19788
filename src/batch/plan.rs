//! Batch Request Model
//!
//! The batch endpoint body: an ordered list of operation specs plus
//! options. Ids are normalized before planning: operations without one
//! get `op_<index>` from their position.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::batch::reference::referenced_operations;
use crate::core::operation::Action;
use crate::error::{AppResult, ApplicationError};

/// Hard ceiling on operations per batch
pub const MAX_BATCH_SIZE: usize = 100;

/// One operation inside a batch
#[derive(Debug, Clone, Deserialize)]
pub struct OperationSpec {
    /// Unique id within the batch; assigned from position when omitted
    #[serde(default)]
    pub id: String,
    pub entity: String,
    pub action: Action,
    #[serde(default)]
    pub query_params: Map<String, Value>,
    #[serde(default)]
    pub store_params: Map<String, Value>,
    #[serde(default)]
    pub metadata_params: Map<String, Value>,
    /// Explicit dependencies; `$ref` targets are added automatically
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Per-operation claims override; the batch claims apply otherwise
    #[serde(default)]
    pub claims: Option<Map<String, Value>>,
}

impl OperationSpec {
    /// Explicit dependencies plus every op-id referenced via `$ref:`
    pub fn all_dependencies(&self) -> Vec<String> {
        let mut ids = self.depends_on.clone();
        for referenced in referenced_operations(&self.query_params) {
            if !ids.contains(&referenced) {
                ids.push(referenced);
            }
        }
        for referenced in referenced_operations(&self.store_params) {
            if !ids.contains(&referenced) {
                ids.push(referenced);
            }
        }
        ids
    }

    #[cfg(test)]
    pub fn for_test(id: &str, entity: &str, action: &str) -> Self {
        Self {
            id: id.to_string(),
            entity: entity.to_string(),
            action: Action::parse(action).expect("valid action"),
            query_params: Map::new(),
            store_params: Map::new(),
            metadata_params: Map::new(),
            depends_on: Vec::new(),
            claims: None,
        }
    }
}

/// Batch execution options
#[derive(Debug, Clone, Deserialize)]
pub struct BatchOptions {
    /// All-or-nothing transaction semantics
    #[serde(default = "default_atomic")]
    pub atomic: bool,
    /// Keep executing after a failed operation
    #[serde(default, alias = "continueOnError")]
    pub continue_on_error: bool,
}

fn default_atomic() -> bool {
    true
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            atomic: true,
            continue_on_error: false,
        }
    }
}

/// A parsed batch request with normalized ids
#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<OperationSpec>,
    #[serde(default)]
    pub options: BatchOptions,
}

impl BatchRequest {
    /// Parse the request body, assign positional ids, and enforce the
    /// size ceiling
    pub fn parse(body: &Map<String, Value>) -> AppResult<Self> {
        let mut request: BatchRequest =
            serde_json::from_value(Value::Object(body.clone())).map_err(|e| {
                ApplicationError::bad_request(format!("malformed batch request: {}", e))
            })?;

        if request.operations.is_empty() {
            return Err(ApplicationError::bad_request(
                "batch request contains no operations",
            ));
        }
        if request.operations.len() > MAX_BATCH_SIZE {
            return Err(ApplicationError::bad_request(format!(
                "batch size {} exceeds the maximum of {} operations",
                request.operations.len(),
                MAX_BATCH_SIZE
            )));
        }

        for (index, spec) in request.operations.iter_mut().enumerate() {
            if spec.id.is_empty() {
                spec.id = format!("op_{}", index);
            }
            if spec.action == Action::Batch || spec.entity == "batch" {
                return Err(ApplicationError::bad_request(
                    "batches may not nest batch operations",
                ));
            }
        }

        Ok(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_ids_assigned_by_position() {
        let request = BatchRequest::parse(&body(json!({
            "operations": [
                {"entity": "album", "action": "create", "store_params": {"title": "A"}},
                {"entity": "artist", "action": "read"}
            ]
        })))
        .unwrap();

        assert_eq!(request.operations[0].id, "op_0");
        assert_eq!(request.operations[1].id, "op_1");
    }

    #[test]
    fn test_explicit_ids_preserved() {
        let request = BatchRequest::parse(&body(json!({
            "operations": [
                {"id": "my_op", "entity": "album", "action": "create"},
                {"entity": "album", "action": "create"},
                {"id": "another_op", "entity": "album", "action": "read"}
            ]
        })))
        .unwrap();

        assert_eq!(request.operations[0].id, "my_op");
        assert_eq!(request.operations[1].id, "op_1");
        assert_eq!(request.operations[2].id, "another_op");
    }

    #[test]
    fn test_options_defaults() {
        let request = BatchRequest::parse(&body(json!({
            "operations": [{"entity": "album", "action": "read"}]
        })))
        .unwrap();

        assert!(request.options.atomic);
        assert!(!request.options.continue_on_error);
    }

    #[test]
    fn test_camel_case_option_alias() {
        let request = BatchRequest::parse(&body(json!({
            "operations": [{"entity": "album", "action": "read"}],
            "options": {"atomic": false, "continueOnError": true}
        })))
        .unwrap();

        assert!(!request.options.atomic);
        assert!(request.options.continue_on_error);
    }

    #[test]
    fn test_size_ceiling() {
        let operations: Vec<Value> = (0..101)
            .map(|_| json!({"entity": "album", "action": "read"}))
            .collect();

        let err = BatchRequest::parse(&body(json!({"operations": operations}))).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(err.message().contains("101"));

        let operations: Vec<Value> = (0..100)
            .map(|_| json!({"entity": "album", "action": "read"}))
            .collect();
        assert!(BatchRequest::parse(&body(json!({"operations": operations}))).is_ok());
    }

    #[test]
    fn test_nested_batch_rejected() {
        let err = BatchRequest::parse(&body(json!({
            "operations": [{"entity": "batch", "action": "create"}]
        })))
        .unwrap_err();

        assert!(err.message().contains("nest"));
    }

    #[test]
    fn test_ref_targets_join_dependencies() {
        let request = BatchRequest::parse(&body(json!({
            "operations": [
                {"entity": "invoice", "action": "create"},
                {
                    "entity": "invoice_line",
                    "action": "create",
                    "depends_on": ["op_0"],
                    "store_params": {"invoice_id": "$ref:op_0.invoice_id", "other": "$ref:op_0.total"}
                }
            ]
        })))
        .unwrap();

        // Explicit + referenced dedupe to a single edge
        assert_eq!(request.operations[1].all_dependencies(), vec!["op_0"]);
    }
}
