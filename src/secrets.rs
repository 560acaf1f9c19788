//! Secret Store Seam
//!
//! Database credentials come from an external secret store; the core
//! only needs the fetch capability. `EnvSecretStore` covers local runs
//! by reading the secret JSON straight from an environment variable.

use serde::Deserialize;

use crate::error::{AppResult, ApplicationError};

/// Credentials for one database binding
#[derive(Debug, Clone, Deserialize)]
pub struct DbCredentials {
    pub username: String,
    pub password: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub dbname: String,
}

fn default_port() -> u16 {
    5432
}

/// Fetch capability implemented outside the core
pub trait SecretStore: Send + Sync {
    fn fetch(&self, secret_name: &str) -> AppResult<DbCredentials>;
}

/// Reads the secret JSON from the environment variable named by the
/// secret locator. Intended for local development and tests.
pub struct EnvSecretStore;

impl SecretStore for EnvSecretStore {
    fn fetch(&self, secret_name: &str) -> AppResult<DbCredentials> {
        let raw = std::env::var(secret_name).map_err(|_| {
            ApplicationError::internal(format!("secret '{}' is not set", secret_name))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            ApplicationError::internal(format!("secret '{}' is not valid JSON: {}", secret_name, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_secret_round_trip() {
        std::env::set_var(
            "QUERYGATE_TEST_SECRET",
            r#"{"username":"app","password":"pw","host":"db.local","dbname":"chinook"}"#,
        );

        let credentials = EnvSecretStore.fetch("QUERYGATE_TEST_SECRET").unwrap();
        assert_eq!(credentials.username, "app");
        assert_eq!(credentials.port, 5432);
        assert_eq!(credentials.dbname, "chinook");
    }

    #[test]
    fn test_missing_secret_is_internal_error() {
        let err = EnvSecretStore.fetch("QUERYGATE_ABSENT_SECRET").unwrap_err();
        assert_eq!(err.status_code(), 500);
    }
}
