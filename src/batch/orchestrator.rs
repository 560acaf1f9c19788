//! Batch Orchestrator
//!
//! Executes a batch plan on one shared connection: operations run
//! strictly in topological order, each seeing the in-transaction writes
//! of its predecessors. Per-operation failures are recorded, never
//! thrown; only structural problems (size, cycles, unknown references)
//! abort before execution. The transaction boundary is here: atomic
//! batches commit only when every operation completed and roll back
//! otherwise; non-atomic batches commit whatever finished.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::batch::dependency::DependencyResolver;
use crate::batch::plan::{BatchRequest, OperationSpec};
use crate::batch::reference::ReferenceResolver;
use crate::core::claims::ClaimSet;
use crate::core::operation::Operation;
use crate::dao::connection::Connection;
use crate::dao::OperationExecutor;
use crate::error::AppResult;
use crate::logging::Logger;

/// Per-operation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpStatus {
    Completed,
    Failed,
    Skipped,
}

pub struct BatchOrchestrator {
    request: BatchRequest,
    claims: ClaimSet,
}

impl BatchOrchestrator {
    /// Build from a `(entity="batch", action="create")` operation whose
    /// store params carry the batch body verbatim
    pub fn from_operation(operation: &Operation) -> AppResult<Self> {
        let request = BatchRequest::parse(&operation.store_params)?;
        Ok(Self {
            request,
            claims: operation.claims.clone(),
        })
    }

    #[cfg(test)]
    pub fn new(request: BatchRequest, claims: ClaimSet) -> Self {
        Self { request, claims }
    }

    /// Execute the plan and settle the transaction
    pub fn execute(
        &self,
        connection: &mut dyn Connection,
        executor: &dyn OperationExecutor,
    ) -> AppResult<Value> {
        let resolver = DependencyResolver::new(&self.request.operations)?;
        let order = resolver.execution_order()?;

        let specs: BTreeMap<&str, &OperationSpec> = self
            .request
            .operations
            .iter()
            .map(|spec| (spec.id.as_str(), spec))
            .collect();

        connection.begin()?;

        let mut results: Map<String, Value> = Map::new();
        let mut statuses: BTreeMap<String, OpStatus> = BTreeMap::new();
        let mut failed_operations: Vec<String> = Vec::new();

        for id in &order {
            let spec = specs[id.as_str()];

            // A failed or skipped dependency anywhere upstream skips this
            // operation; it is recorded, unlike operations past an abort
            let blocked = resolver
                .transitive_dependencies(id)
                .iter()
                .any(|dep| statuses.get(dep) != Some(&OpStatus::Completed));
            if blocked {
                statuses.insert(id.clone(), OpStatus::Skipped);
                results.insert(
                    id.clone(),
                    json!({"status": "skipped", "reason": "dependency failed"}),
                );
                continue;
            }

            match self.run_operation(connection, executor, spec, &results) {
                Ok(data) => {
                    statuses.insert(id.clone(), OpStatus::Completed);
                    results.insert(
                        id.clone(),
                        json!({"status": "completed", "data": data}),
                    );
                }
                Err(error) => {
                    Logger::warn(
                        "BATCH_OPERATION_FAILED",
                        &[("op_id", id.as_str()), ("error", error.message())],
                    );
                    statuses.insert(id.clone(), OpStatus::Failed);
                    results.insert(
                        id.clone(),
                        json!({
                            "status": "failed",
                            "error": error.message(),
                            "status_code": error.status_code()
                        }),
                    );
                    failed_operations.push(id.clone());

                    if self.request.options.atomic && !self.request.options.continue_on_error {
                        break;
                    }
                }
            }
        }

        let all_completed = results.len() == self.request.operations.len()
            && statuses.values().all(|s| *s == OpStatus::Completed);

        if self.request.options.atomic && !failed_operations.is_empty() {
            connection.rollback()?;
        } else {
            connection.commit()?;
        }

        Ok(json!({
            "success": all_completed,
            "results": results,
            "failed_operations": failed_operations
        }))
    }

    fn run_operation(
        &self,
        connection: &mut dyn Connection,
        executor: &dyn OperationExecutor,
        spec: &OperationSpec,
        results: &Map<String, Value>,
    ) -> AppResult<Value> {
        let references = ReferenceResolver::new(results);
        let query_params = references.resolve_parameters(&spec.query_params)?;
        let store_params = references.resolve_parameters(&spec.store_params)?;

        let claims = match &spec.claims {
            Some(authorizer) => ClaimSet::from_authorizer(authorizer),
            None => self.claims.clone(),
        };

        let operation = Operation::new(spec.entity.clone(), spec.action)
            .with_query_params(query_params)
            .with_store_params(store_params)
            .with_metadata_params(spec.metadata_params.clone())
            .with_claims(claims);

        let data = executor.execute(connection, &operation)?;

        // Single-row results unwrap so references address fields directly
        Ok(match data {
            Value::Array(mut rows) if rows.len() == 1 => rows.remove(0),
            other => other,
        })
    }
}
