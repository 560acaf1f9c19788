//! Connection Capability
//!
//! The core never talks to a driver directly; it requires only an opaque
//! connection with begin/cursor/commit/rollback/close. Drivers adapt to
//! this seam outside the crate. `MockConnection` is the in-crate test
//! double: it records every statement and replays scripted results.

use std::collections::VecDeque;

use crate::error::{AppResult, ApplicationError};
use crate::sql::value::SqlValue;

/// Rows and affected-count from one statement execution
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// Column labels in select-list order
    pub columns: Vec<String>,
    /// Row values, positionally aligned with `columns`
    pub rows: Vec<Vec<SqlValue>>,
    /// Rows affected by INSERT/UPDATE/DELETE
    pub affected: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_rows(columns: Vec<&str>, rows: Vec<Vec<SqlValue>>) -> Self {
        let affected = rows.len() as u64;
        Self {
            columns: columns.into_iter().map(|c| c.to_string()).collect(),
            rows,
            affected,
        }
    }

    pub fn affected_only(affected: u64) -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected,
        }
    }
}

/// Statement execution surface obtained from a connection
pub trait Cursor {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> AppResult<QueryResult>;
}

/// Opaque database connection owned by one request for its lifetime
pub trait Connection {
    fn begin(&mut self) -> AppResult<()>;
    fn cursor(&mut self) -> AppResult<Box<dyn Cursor + '_>>;
    fn commit(&mut self) -> AppResult<()>;
    fn rollback(&mut self) -> AppResult<()>;
    fn close(&mut self) -> AppResult<()>;
}

/// Produces connections for a named database binding
pub trait ConnectionFactory: Send + Sync {
    fn connect(&self, database: &str) -> AppResult<Box<dyn Connection>>;
}

/// In-memory connection double for tests.
///
/// Script results in execution order with `push_result`; each executed
/// statement pops the next scripted result (or an empty result when the
/// script runs dry) and is recorded with its bind values.
#[derive(Debug, Default)]
pub struct MockConnection {
    scripted: VecDeque<AppResult<QueryResult>>,
    /// Every executed statement with its bound parameters
    pub executed: Vec<(String, Vec<SqlValue>)>,
    pub begun: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub closed: bool,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_result(&mut self, result: QueryResult) {
        self.scripted.push_back(Ok(result));
    }

    pub fn push_error(&mut self, error: ApplicationError) {
        self.scripted.push_back(Err(error));
    }

    pub fn with_result(mut self, result: QueryResult) -> Self {
        self.push_result(result);
        self
    }

    fn run(&mut self, sql: &str, params: &[SqlValue]) -> AppResult<QueryResult> {
        self.executed.push((sql.to_string(), params.to_vec()));
        match self.scripted.pop_front() {
            Some(result) => result,
            None => Ok(QueryResult::empty()),
        }
    }
}

struct MockCursor<'a> {
    connection: &'a mut MockConnection,
}

impl<'a> Cursor for MockCursor<'a> {
    fn execute(&mut self, sql: &str, params: &[SqlValue]) -> AppResult<QueryResult> {
        self.connection.run(sql, params)
    }
}

impl Connection for MockConnection {
    fn begin(&mut self) -> AppResult<()> {
        self.begun += 1;
        Ok(())
    }

    fn cursor(&mut self) -> AppResult<Box<dyn Cursor + '_>> {
        Ok(Box::new(MockCursor { connection: self }))
    }

    fn commit(&mut self) -> AppResult<()> {
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) -> AppResult<()> {
        self.rollbacks += 1;
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        self.closed = true;
        Ok(())
    }
}
