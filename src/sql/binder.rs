//! Parameter Binder
//!
//! Collects bind values while SQL text is assembled and hands back the
//! dialect's placeholder for each. Positions are 1-based and assigned in
//! emission order, so the values vector lines up with the placeholders.

use crate::sql::dialect::Dialect;
use crate::sql::value::SqlValue;

/// A finished statement: SQL text plus its bind values in order
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Accumulates bind values during statement assembly
#[derive(Debug)]
pub struct ParamBinder {
    dialect: Dialect,
    values: Vec<SqlValue>,
}

impl ParamBinder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    /// Bind a value, returning the placeholder text to splice into SQL
    pub fn bind(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn finish(self, sql: String) -> SqlStatement {
        SqlStatement {
            sql,
            params: self.values,
        }
    }
}
