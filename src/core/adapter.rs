//! Request Adapter
//!
//! Translates a gateway-shaped event into an `Operation` and a result or
//! error back into the response envelope. Field-name case conversion
//! happens here and only here: internal maps are always snake_case to
//! match column names.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::{GatewayConfig, ScopeCheckMode};
use crate::core::claims::ClaimSet;
use crate::core::operation::{Action, Operation};
use crate::error::{AppResult, ApplicationError};
use crate::logging::Logger;

/// Inbound gateway event
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    #[serde(default)]
    pub http_method: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub query_string_parameters: Option<Map<String, Value>>,
    #[serde(default)]
    pub path_parameters: Option<Map<String, Value>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub request_context: EventRequestContext,
}

/// The slice of the request context the adapter consumes
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventRequestContext {
    #[serde(default)]
    pub authorizer: Map<String, Value>,
}

/// Outbound response envelope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub is_base64_encoded: bool,
    pub status_code: u16,
    pub headers: Map<String, Value>,
    pub body: String,
}

/// The service seam the adapter drives
pub trait Service {
    fn execute(&self, operation: Operation) -> AppResult<Value>;
}

/// Translates events to operations and results to envelopes
pub struct GatewayAdapter {
    config: GatewayConfig,
}

impl GatewayAdapter {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }

    /// Full pipeline: unmarshal → execute → marshal
    pub fn process_event(&self, event: &GatewayEvent, service: &dyn Service) -> ResponseEnvelope {
        match self.unmarshal(event).and_then(|op| service.execute(op)) {
            Ok(result) => self.marshal(&result),
            Err(error) => self.marshal_error(&error),
        }
    }

    /// Parse an inbound event into an `Operation`
    pub fn unmarshal(&self, event: &GatewayEvent) -> AppResult<Operation> {
        let mut action = Action::from_method(&event.http_method)?;
        let claims = self.lift_claims(event);

        // POST /<entity>/<pk>/restore brings soft-deleted rows back
        let mut path = event.path.as_str();
        if action == Action::Create {
            if let Some(stripped) = path.strip_suffix("/restore") {
                if !stripped.trim_matches('/').is_empty() {
                    action = Action::Restore;
                    path = stripped;
                }
            }
        }

        let path_parameters = event.path_parameters.clone().unwrap_or_default();
        let entity = extract_entity(path, &path_parameters)?;

        // POST /batch wraps the decoded body for the orchestrator verbatim
        if entity == "batch" {
            if action != Action::Create {
                return Err(ApplicationError::bad_request(
                    "the batch endpoint only accepts POST",
                ));
            }
            let body = self.decode_body(event)?.ok_or_else(|| {
                ApplicationError::bad_request("batch request requires a body")
            })?;
            return Ok(Operation::new("batch", Action::Create)
                .with_store_params(body)
                .with_claims(claims));
        }

        if self.config.scope_check_mode != ScopeCheckMode::Disabled {
            if claims.is_empty() {
                return Err(ApplicationError::unauthorized(
                    "request carries no claims",
                ));
            }
            if !claims.allows_route(action, &entity) {
                return Err(ApplicationError::forbidden(format!(
                    "insufficient scope for {} on {}",
                    action.as_str(),
                    entity
                )));
            }
        }

        // Query-string and path parameters merge; `__`-prefixed names are
        // operational metadata, not filters
        let mut query_params = Map::new();
        let mut metadata_params = Map::new();
        let query_string = event.query_string_parameters.clone().unwrap_or_default();
        for (key, value) in query_string.into_iter().chain(path_parameters) {
            if key.starts_with("__") {
                metadata_params.insert(key, value);
            } else {
                query_params.insert(self.inbound_key(&key), value);
            }
        }

        let store_params = self.decode_body(event)?.unwrap_or_default();

        Ok(Operation::new(entity, action)
            .with_query_params(query_params)
            .with_store_params(store_params)
            .with_metadata_params(metadata_params)
            .with_claims(claims))
    }

    /// Shape a success envelope
    pub fn marshal(&self, result: &Value) -> ResponseEnvelope {
        let body = if self.config.camel_case_io {
            convert_keys(result, &snake_to_camel)
        } else {
            result.clone()
        };
        ResponseEnvelope {
            is_base64_encoded: false,
            status_code: 200,
            headers: json_headers(),
            body: body.to_string(),
        }
    }

    /// Shape an error envelope; server-side details never surface
    pub fn marshal_error(&self, error: &ApplicationError) -> ResponseEnvelope {
        let message = if error.is_client_error() {
            error.message().to_string()
        } else {
            Logger::error(
                "REQUEST_FAILED",
                &[("code", error.code()), ("detail", error.message())],
            );
            "internal server error".to_string()
        };

        ResponseEnvelope {
            is_base64_encoded: false,
            status_code: error.status_code(),
            headers: json_headers(),
            body: serde_json::json!({ "error": message }).to_string(),
        }
    }

    fn lift_claims(&self, event: &GatewayEvent) -> ClaimSet {
        let mut claims = ClaimSet::from_authorizer(&event.request_context.authorizer);
        if claims.is_empty() {
            if let Some(anonymous_role) = &self.config.anonymous_role {
                claims.roles.push(anonymous_role.clone());
            }
        }
        claims
    }

    fn decode_body(&self, event: &GatewayEvent) -> AppResult<Option<Map<String, Value>>> {
        let text = match event.body.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Ok(None),
        };
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ApplicationError::bad_request(format!("invalid request body: {}", e)))?;
        let value = if self.config.camel_case_io {
            convert_keys(&value, &camel_to_snake)
        } else {
            value
        };
        match value {
            Value::Object(map) => Ok(Some(map)),
            _ => Err(ApplicationError::bad_request(
                "request body must be a JSON object",
            )),
        }
    }

    fn inbound_key(&self, key: &str) -> String {
        if self.config.camel_case_io {
            camel_to_snake(key)
        } else {
            key.to_string()
        }
    }
}

/// The entity is the last meaningful path segment; a trailing segment
/// that matches a path-parameter value is the primary key, not the entity
fn extract_entity(path: &str, path_parameters: &Map<String, Value>) -> AppResult<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(ApplicationError::bad_request("request path has no entity"));
    }

    let last = segments[segments.len() - 1];
    let is_pk_segment = path_parameters
        .values()
        .any(|value| matches!(value, Value::String(s) if s == last));

    if is_pk_segment && segments.len() >= 2 {
        Ok(segments[segments.len() - 2].to_string())
    } else {
        Ok(last.to_string())
    }
}

fn json_headers() -> Map<String, Value> {
    let mut headers = Map::new();
    headers.insert(
        "Content-Type".to_string(),
        Value::String("application/json".to_string()),
    );
    headers
}

/// Recursively rename map keys; values are never touched
fn convert_keys(value: &Value, rename: &dyn Fn(&str) -> String) -> Value {
    match value {
        Value::Object(map) => {
            let mut converted = Map::new();
            for (key, nested) in map {
                // Metadata keys keep their prefix
                let renamed = if key.starts_with("__") {
                    key.clone()
                } else {
                    rename(key)
                };
                converted.insert(renamed, convert_keys(nested, rename));
            }
            Value::Object(converted)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| convert_keys(v, rename)).collect())
        }
        other => other.clone(),
    }
}

fn snake_to_camel(name: &str) -> String {
    let mut output = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            output.extend(c.to_uppercase());
            upper_next = false;
        } else {
            output.push(c);
        }
    }
    output
}

fn camel_to_snake(name: &str) -> String {
    let mut output = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_uppercase() {
            output.push('_');
            output.extend(c.to_lowercase());
        } else {
            output.push(c);
        }
    }
    output
}
