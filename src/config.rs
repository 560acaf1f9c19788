//! Gateway Configuration
//!
//! Runtime configuration sourced from the environment. JWT settings are
//! pass-through for the external token validator; the core consults only
//! the database engine, schema, paging, and scope-check settings.

use serde::{Deserialize, Serialize};

use crate::error::{AppResult, ApplicationError};
use crate::sql::dialect::Dialect;

/// How route-level scope checks interact with the permission tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeCheckMode {
    /// Permission tables are the single authority (default)
    Disabled,
    /// Scope gate runs first; permission tables still project and filter
    Additive,
    /// Scope gate replaces table-based route gating. Tables still drive
    /// projection and row filtering, which scopes cannot express.
    Exclusive,
}

impl ScopeCheckMode {
    fn parse(s: &str) -> AppResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" => Ok(Self::Disabled),
            "additive" => Ok(Self::Additive),
            "exclusive" => Ok(Self::Exclusive),
            other => Err(ApplicationError::spec(format!(
                "unknown SCOPE_CHECK_MODE '{}', expected disabled|additive|exclusive",
                other
            ))),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Credential locator in the configured secret store
    #[serde(default)]
    pub db_secret_name: Option<String>,

    /// Target database engine
    #[serde(default = "default_engine")]
    pub db_engine: Dialect,

    /// Database schema qualifying generated table expressions
    #[serde(default)]
    pub db_schema: Option<String>,

    /// Default LIMIT applied to list reads when the client supplies none
    #[serde(default = "default_page_size")]
    pub default_page_size: u64,

    /// Role injected when a request carries no claims at all
    #[serde(default)]
    pub anonymous_role: Option<String>,

    /// Scope enforcement mode
    #[serde(default = "default_scope_mode")]
    pub scope_check_mode: ScopeCheckMode,

    /// Convert snake_case field names to camelCase at the boundary
    #[serde(default)]
    pub camel_case_io: bool,

    /// JWT settings, consumed by the external token validator
    #[serde(default)]
    pub jwks_host: Option<String>,
    #[serde(default)]
    pub jwt_issuer: Option<String>,
    #[serde(default)]
    pub jwt_allowed_audiences: Vec<String>,
    #[serde(default = "default_jwt_algorithms")]
    pub jwt_algorithms: Vec<String>,
}

fn default_engine() -> Dialect {
    Dialect::Postgres
}

fn default_page_size() -> u64 {
    100
}

fn default_scope_mode() -> ScopeCheckMode {
    ScopeCheckMode::Disabled
}

fn default_jwt_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            db_secret_name: None,
            db_engine: default_engine(),
            db_schema: None,
            default_page_size: default_page_size(),
            anonymous_role: None,
            scope_check_mode: default_scope_mode(),
            camel_case_io: false,
            jwks_host: None,
            jwt_issuer: None,
            jwt_allowed_audiences: Vec::new(),
            jwt_algorithms: default_jwt_algorithms(),
        }
    }
}

impl GatewayConfig {
    /// Build configuration from process environment variables
    pub fn from_env() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("DB_SECRET_NAME") {
            config.db_secret_name = Some(v);
        }
        if let Ok(v) = std::env::var("DB_ENGINE") {
            config.db_engine = Dialect::parse(&v)?;
        }
        if let Ok(v) = std::env::var("DB_SCHEMA") {
            if !v.is_empty() {
                config.db_schema = Some(v);
            }
        }
        if let Ok(v) = std::env::var("DEFAULT_PAGE_SIZE") {
            config.default_page_size = v.parse().map_err(|_| {
                ApplicationError::spec(format!("DEFAULT_PAGE_SIZE is not a number: {}", v))
            })?;
        }
        if let Ok(v) = std::env::var("ANONYMOUS_ROLE") {
            if !v.is_empty() {
                config.anonymous_role = Some(v);
            }
        }
        if let Ok(v) = std::env::var("SCOPE_CHECK_MODE") {
            config.scope_check_mode = ScopeCheckMode::parse(&v)?;
        }
        if let Ok(v) = std::env::var("CAMEL_CASE_IO") {
            config.camel_case_io = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Ok(v) = std::env::var("JWKS_HOST") {
            config.jwks_host = Some(v);
        }
        if let Ok(v) = std::env::var("JWT_ISSUER") {
            config.jwt_issuer = Some(v);
        }
        if let Ok(v) = std::env::var("JWT_ALLOWED_AUDIENCES") {
            config.jwt_allowed_audiences = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("JWT_ALGORITHMS") {
            config.jwt_algorithms = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.db_engine, Dialect::Postgres);
        assert_eq!(config.default_page_size, 100);
        assert_eq!(config.scope_check_mode, ScopeCheckMode::Disabled);
        assert!(!config.camel_case_io);
        assert_eq!(config.jwt_algorithms, vec!["RS256".to_string()]);
    }

    #[test]
    fn test_scope_mode_parsing() {
        assert_eq!(
            ScopeCheckMode::parse("additive").unwrap(),
            ScopeCheckMode::Additive
        );
        assert_eq!(
            ScopeCheckMode::parse("EXCLUSIVE").unwrap(),
            ScopeCheckMode::Exclusive
        );
        assert!(ScopeCheckMode::parse("sometimes").is_err());
    }
}
