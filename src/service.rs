//! Transactional Service
//!
//! The entry point behind the adapter: acquires a connection for the
//! target database binding, runs the operation through the DAO, and
//! settles the transaction: commit on success, rollback on error, close
//! always. Batch operations settle their own transaction inside the
//! orchestrator; the service only supplies and closes the connection.

use std::sync::Arc;

use serde_json::Value;

use crate::config::GatewayConfig;
use crate::core::adapter::Service;
use crate::core::operation::Operation;
use crate::dao::connection::ConnectionFactory;
use crate::dao::{OperationDao, OperationExecutor};
use crate::error::{AppResult, ApplicationError};
use crate::logging::Logger;
use crate::model::registry::ModelRegistry;

pub struct TransactionalService {
    factory: Arc<dyn ConnectionFactory>,
    dao: OperationDao,
}

impl TransactionalService {
    pub fn new(
        factory: Arc<dyn ConnectionFactory>,
        registry: Arc<ModelRegistry>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            factory,
            dao: OperationDao::new(registry, config),
        }
    }

    /// Database binding for the operation's target
    fn database_for(&self, operation: &Operation) -> AppResult<String> {
        if operation.entity == "batch" {
            // The whole batch shares one connection; the first operation's
            // entity picks the binding
            let first_entity = operation
                .store_params
                .get("operations")
                .and_then(|ops| ops.as_array())
                .and_then(|ops| ops.first())
                .and_then(|op| op.get("entity"))
                .and_then(|entity| entity.as_str())
                .ok_or_else(|| {
                    ApplicationError::bad_request("batch request contains no operations")
                })?;
            return Ok(self.dao.registry().entity(first_entity)?.database.clone());
        }

        if let Some(path_operation) = self.dao.registry().path_operation(&operation.entity) {
            return Ok(path_operation.database.clone());
        }

        Ok(self.dao.registry().entity(&operation.entity)?.database.clone())
    }
}

impl Service for TransactionalService {
    fn execute(&self, operation: Operation) -> AppResult<Value> {
        let database = self.database_for(&operation)?;
        let mut connection = self.factory.connect(&database)?;

        let batch = operation.entity == "batch";
        if !batch {
            connection.begin()?;
        }

        let result = self.dao.execute(connection.as_mut(), &operation);

        let settled = match result {
            Ok(value) => {
                if batch {
                    // The orchestrator already committed or rolled back
                    Ok(value)
                } else {
                    match connection.commit() {
                        Ok(()) => Ok(value),
                        Err(error) => {
                            let _ = connection.rollback();
                            Err(ApplicationError::internal(format!(
                                "commit failed: {}",
                                error.message()
                            )))
                        }
                    }
                }
            }
            Err(error) => {
                if let Err(rollback_error) = connection.rollback() {
                    Logger::error(
                        "ROLLBACK_FAILED",
                        &[("detail", rollback_error.message())],
                    );
                }
                Err(error)
            }
        };

        if let Err(close_error) = connection.close() {
            Logger::warn("CONNECTION_CLOSE_FAILED", &[("detail", close_error.message())]);
        }

        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::operation::Action;
    use crate::dao::connection::{Connection, MockConnection, QueryResult};
    use crate::sql::value::SqlValue;
    use serde_json::json;
    use std::sync::Mutex;

    /// Factory that hands out pre-scripted mock connections and keeps
    /// them inspectable after the service closes them
    struct SharedMockFactory {
        queue: Mutex<Vec<MockConnection>>,
        finished: Arc<Mutex<Vec<InspectedConnection>>>,
    }

    #[derive(Debug, Clone)]
    struct InspectedConnection {
        commits: usize,
        rollbacks: usize,
        closed: bool,
    }

    struct InspectableConnection {
        inner: MockConnection,
        finished: Arc<Mutex<Vec<InspectedConnection>>>,
    }

    impl Connection for InspectableConnection {
        fn begin(&mut self) -> AppResult<()> {
            self.inner.begin()
        }
        fn cursor(&mut self) -> AppResult<Box<dyn crate::dao::connection::Cursor + '_>> {
            self.inner.cursor()
        }
        fn commit(&mut self) -> AppResult<()> {
            self.inner.commit()
        }
        fn rollback(&mut self) -> AppResult<()> {
            self.inner.rollback()
        }
        fn close(&mut self) -> AppResult<()> {
            self.inner.close()?;
            self.finished.lock().unwrap().push(InspectedConnection {
                commits: self.inner.commits,
                rollbacks: self.inner.rollbacks,
                closed: self.inner.closed,
            });
            Ok(())
        }
    }

    impl ConnectionFactory for SharedMockFactory {
        fn connect(&self, _database: &str) -> AppResult<Box<dyn Connection>> {
            let inner = self
                .queue
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(MockConnection::new);
            Ok(Box::new(InspectableConnection {
                inner,
                finished: Arc::clone(&self.finished),
            }))
        }
    }

    fn service_with(conn: MockConnection) -> (TransactionalService, Arc<Mutex<Vec<InspectedConnection>>>) {
        let doc = json!({
            "schema_objects": {
                "media_type": {
                    "database": "chinook",
                    "primary-key": "media_type_id",
                    "properties": {
                        "media_type_id": {"type": "integer", "key": "auto"},
                        "name": {"type": "string"}
                    }
                }
            }
        });
        let registry = Arc::new(ModelRegistry::from_document(&doc).unwrap());
        let finished = Arc::new(Mutex::new(Vec::new()));
        let factory = SharedMockFactory {
            queue: Mutex::new(vec![conn]),
            finished: Arc::clone(&finished),
        };
        (
            TransactionalService::new(Arc::new(factory), registry, GatewayConfig::default()),
            finished,
        )
    }

    #[test]
    fn test_success_commits_and_closes() {
        let mut conn = MockConnection::new();
        conn.push_result(QueryResult::with_rows(
            vec!["media_type_id", "name"],
            vec![vec![SqlValue::Int(1), SqlValue::Text("MPEG".into())]],
        ));
        let (service, finished) = service_with(conn);

        let op = Operation::new("media_type", Action::Read);
        let result = service.execute(op).unwrap();
        assert_eq!(result[0]["name"], json!("MPEG"));

        let inspected = finished.lock().unwrap();
        assert_eq!(inspected[0].commits, 1);
        assert_eq!(inspected[0].rollbacks, 0);
        assert!(inspected[0].closed);
    }

    #[test]
    fn test_handler_error_rolls_back_and_closes() {
        let mut conn = MockConnection::new();
        conn.push_error(ApplicationError::internal("deadlock"));
        let (service, finished) = service_with(conn);

        let op = Operation::new("media_type", Action::Read);
        let err = service.execute(op).unwrap_err();
        assert_eq!(err.status_code(), 500);

        let inspected = finished.lock().unwrap();
        assert_eq!(inspected[0].commits, 0);
        assert_eq!(inspected[0].rollbacks, 1);
        assert!(inspected[0].closed);
    }

    #[test]
    fn test_unknown_entity_fails_before_connecting() {
        let (service, finished) = service_with(MockConnection::new());

        let op = Operation::new("ghost", Action::Read);
        let err = service.execute(op).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert!(finished.lock().unwrap().is_empty());
    }
}
