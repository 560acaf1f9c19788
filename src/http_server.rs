//! HTTP Server
//!
//! Thin axum surface over the gateway: entity routes and the batch
//! endpoint, each translated into a gateway event and driven through the
//! adapter. Token validation happens upstream; the validated claims
//! arrive in the `x-authorizer` header as JSON.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Method, Response, StatusCode, Uri};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::core::adapter::{GatewayAdapter, GatewayEvent, ResponseEnvelope, Service};
use crate::logging::Logger;
use crate::model::registry::ModelRegistry;

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl HttpServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

struct AppState {
    adapter: GatewayAdapter,
    service: Arc<dyn Service + Send + Sync>,
    registry: Arc<ModelRegistry>,
}

/// HTTP server exposing the generated entity endpoints and `/batch`
pub struct HttpServer {
    config: HttpServerConfig,
    router: Router,
}

impl HttpServer {
    pub fn new(
        config: HttpServerConfig,
        adapter: GatewayAdapter,
        service: Arc<dyn Service + Send + Sync>,
        registry: Arc<ModelRegistry>,
    ) -> Self {
        let state = Arc::new(AppState {
            adapter,
            service,
            registry,
        });

        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        let router = Router::new()
            .route("/batch", post(dispatch))
            .route("/:entity", get(dispatch).post(dispatch))
            .route(
                "/:entity/:pk",
                get(dispatch)
                    .put(dispatch)
                    .patch(dispatch)
                    .delete(dispatch),
            )
            .route("/:entity/:pk/restore", post(dispatch))
            .layer(cors)
            .with_state(state);

        Self { config, router }
    }

    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Router accessor for in-process testing
    pub fn router(self) -> Router {
        self.router
    }

    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self
            .config
            .socket_addr()
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let addr_text = addr.to_string();
        Logger::info("HTTP_SERVER_START", &[("addr", addr_text.as_str())]);

        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, self.router).await
    }
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path(path_params): Path<HashMap<String, String>>,
    Query(query): Query<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response<Body> {
    let event = build_event(&state, &path_params, &query, &method, &uri, &headers, body);
    let envelope = state.adapter.process_event(&event, state.service.as_ref());
    into_response(envelope)
}

fn build_event(
    state: &AppState,
    path_params: &HashMap<String, String>,
    query: &HashMap<String, String>,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: String,
) -> GatewayEvent {
    let mut event = GatewayEvent {
        http_method: method.as_str().to_string(),
        path: uri.path().to_string(),
        ..Default::default()
    };

    if !query.is_empty() {
        let mut map = Map::new();
        for (key, value) in query {
            map.insert(key.clone(), Value::String(value.clone()));
        }
        event.query_string_parameters = Some(map);
    }

    // The pk path segment is keyed by the entity's primary key property
    if let Some(pk) = path_params.get("pk") {
        let mut map = Map::new();
        let key = path_params
            .get("entity")
            .and_then(|entity| state.registry.entity(entity).ok())
            .map(|schema| schema.primary_key.clone())
            .unwrap_or_else(|| "pk".to_string());
        map.insert(key, Value::String(pk.clone()));
        event.path_parameters = Some(map);
    }

    if !body.trim().is_empty() {
        event.body = Some(body);
    }

    // Upstream token validation forwards its claims in x-authorizer
    if let Some(raw) = headers.get("x-authorizer").and_then(|v| v.to_str().ok()) {
        if let Ok(Value::Object(claims)) = serde_json::from_str::<Value>(raw) {
            event.request_context.authorizer = claims;
        }
    }

    event
}

fn into_response(envelope: ResponseEnvelope) -> Response<Body> {
    let status =
        StatusCode::from_u16(envelope.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut builder = Response::builder().status(status);
    for (name, value) in &envelope.headers {
        if let Some(text) = value.as_str() {
            builder = builder.header(name, text);
        }
    }
    builder
        .body(Body::from(envelope.body))
        .unwrap_or_else(|_| Response::new(Body::from("")))
}
