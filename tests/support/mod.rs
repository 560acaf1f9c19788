//! Shared fixtures for the integration suites: a chinook-flavored model
//! and a mock connection that stays inspectable after the service closes
//! it.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use querygate::dao::connection::{
    Connection, ConnectionFactory, Cursor, MockConnection, QueryResult,
};
use querygate::error::AppResult;
use querygate::sql::value::SqlValue;

/// The model document used across the integration suites
pub fn chinook_document() -> Value {
    json!({
        "schema_objects": {
            "album": {
                "database": "chinook",
                "primary-key": "album_id",
                "properties": {
                    "album_id": {"type": "integer", "key": "auto"},
                    "artist_id": {"type": "integer"},
                    "title": {"type": "string", "max-length": 160}
                },
                "permissions": {
                    "sales_associate": {"read": "album_id|title", "write": "title|artist_id"},
                    "sales_manager": {"read": ".*", "write": ".*", "delete": true}
                }
            },
            "invoice": {
                "database": "chinook",
                "primary-key": "invoice_id",
                "concurrency-control": "last_updated",
                "properties": {
                    "invoice_id": {"type": "integer", "key": "auto"},
                    "customer_id": {"type": "integer"},
                    "last_updated": {"type": "date-time"},
                    "total": {"type": "number"}
                }
            },
            "invoice_line": {
                "database": "chinook",
                "primary-key": "invoice_line_id",
                "properties": {
                    "invoice_line_id": {"type": "integer", "key": "auto"},
                    "invoice_id": {"type": "integer"},
                    "track_id": {"type": "integer"},
                    "unit_price": {"type": "number"},
                    "quantity": {"type": "integer"}
                }
            },
            "account": {
                "database": "app",
                "primary-key": "id",
                "properties": {
                    "id": {"type": "string"},
                    "display_name": {"type": "string"},
                    "balance": {"type": "number"}
                },
                "permissions": {
                    "user": {
                        "read": {"properties": ".*", "where": "id = ${claims.sub}"}
                    }
                }
            },
            "contract": {
                "database": "app",
                "primary-key": "contract_id",
                "properties": {
                    "contract_id": {"type": "integer", "key": "auto"},
                    "title": {"type": "string"},
                    "deleted_at": {
                        "type": "date-time",
                        "soft_delete": {"strategy": "null_check"}
                    },
                    "deleted_by": {
                        "type": "string",
                        "soft_delete": {"strategy": "audit_field", "action": "delete"}
                    }
                }
            }
        }
    })
}

/// A mock connection shareable between the factory and the test body
#[derive(Clone)]
pub struct SharedConnection {
    inner: Arc<Mutex<MockConnection>>,
}

impl SharedConnection {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockConnection::new())),
        }
    }

    pub fn push_result(&self, result: QueryResult) {
        self.inner.lock().unwrap().push_result(result);
    }

    pub fn push_error(&self, error: querygate::ApplicationError) {
        self.inner.lock().unwrap().push_error(error);
    }

    pub fn executed(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.inner.lock().unwrap().executed.clone()
    }

    pub fn commits(&self) -> usize {
        self.inner.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.inner.lock().unwrap().rollbacks
    }

    pub fn closed(&self) -> bool {
        self.inner.lock().unwrap().closed
    }
}

struct SharedCursor {
    inner: Arc<Mutex<MockConnection>>,
}

impl Cursor for SharedCursor {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> AppResult<QueryResult> {
        let mut connection = self.inner.lock().unwrap();
        let mut cursor = connection.cursor()?;
        cursor.execute(sql, params)
    }
}

impl Connection for SharedConnection {
    fn begin(&mut self) -> AppResult<()> {
        self.inner.lock().unwrap().begin()
    }

    fn cursor(&mut self) -> AppResult<Box<dyn Cursor + '_>> {
        Ok(Box::new(SharedCursor {
            inner: Arc::clone(&self.inner),
        }))
    }

    fn commit(&mut self) -> AppResult<()> {
        self.inner.lock().unwrap().commit()
    }

    fn rollback(&mut self) -> AppResult<()> {
        self.inner.lock().unwrap().rollback()
    }

    fn close(&mut self) -> AppResult<()> {
        self.inner.lock().unwrap().close()
    }
}

/// Factory handing out clones of one shared connection
pub struct SharedFactory {
    connection: SharedConnection,
}

impl SharedFactory {
    pub fn new(connection: SharedConnection) -> Self {
        Self { connection }
    }
}

impl ConnectionFactory for SharedFactory {
    fn connect(&self, _database: &str) -> AppResult<Box<dyn Connection>> {
        Ok(Box::new(self.connection.clone()))
    }
}

/// Rows helper keeping the call sites compact
pub fn int(value: i64) -> SqlValue {
    SqlValue::Int(value)
}

pub fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

pub fn float(value: f64) -> SqlValue {
    SqlValue::Float(value)
}
