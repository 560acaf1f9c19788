//! SQL Dialects
//!
//! The three supported engines differ in placeholder style, identifier
//! quoting, paging clause form, and how an inserted primary key is read
//! back. Everything else in the generated SQL is common.

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ApplicationError};

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dialect {
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres,
    #[serde(rename = "mysql")]
    Mysql,
    #[serde(rename = "oracle")]
    Oracle,
}

/// How the engine returns rows affected by INSERT/UPDATE/DELETE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturningMode {
    /// `RETURNING <select list>` appended to the statement
    Clause,
    /// No RETURNING support: re-select by last inserted id
    LastInsertId,
}

impl Dialect {
    pub fn parse(s: &str) -> AppResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgresql" | "postgres" => Ok(Self::Postgres),
            "mysql" => Ok(Self::Mysql),
            "oracle" => Ok(Self::Oracle),
            other => Err(ApplicationError::spec(format!(
                "unsupported DB_ENGINE '{}', expected postgresql|mysql|oracle",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::Mysql => "mysql",
            Self::Oracle => "oracle",
        }
    }

    /// Placeholder text for the 1-based parameter position
    pub fn placeholder(&self, position: usize) -> String {
        match self {
            Self::Postgres => format!("${}", position),
            Self::Mysql => "?".to_string(),
            Self::Oracle => format!(":{}", position),
        }
    }

    /// Quote an identifier for use in generated SQL
    pub fn quote_ident(&self, name: &str) -> String {
        match self {
            Self::Mysql => format!("`{}`", name),
            Self::Postgres | Self::Oracle => format!("\"{}\"", name),
        }
    }

    /// Paging clause; empty string when neither bound is set
    pub fn limit_clause(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        match self {
            Self::Postgres | Self::Mysql => {
                let mut clause = String::new();
                if let Some(limit) = limit {
                    clause.push_str(&format!(" LIMIT {}", limit));
                }
                if let Some(offset) = offset {
                    clause.push_str(&format!(" OFFSET {}", offset));
                }
                clause
            }
            Self::Oracle => {
                let mut clause = String::new();
                if let Some(offset) = offset {
                    clause.push_str(&format!(" OFFSET {} ROWS", offset));
                }
                if let Some(limit) = limit {
                    clause.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                }
                clause
            }
        }
    }

    pub fn returning_mode(&self) -> ReturningMode {
        match self {
            Self::Postgres | Self::Oracle => ReturningMode::Clause,
            Self::Mysql => ReturningMode::LastInsertId,
        }
    }
}
