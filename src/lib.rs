//! querygate - a specification-driven query gateway
//!
//! A declarative API model annotated with database-binding, permission,
//! and relationship metadata is compiled, per request, into parameterized
//! SQL with field- and row-level access control. Multiple operations
//! compose into transactional batches with cross-operation references.
//!
//! The crate is the core of the gateway; token validation, connection
//! pooling, and HTTP framing live outside it behind narrow seams
//! (`SecretStore`, `ConnectionFactory`, the `x-authorizer` header).

pub mod batch;
pub mod config;
pub mod core;
pub mod dao;
pub mod error;
pub mod http_server;
pub mod logging;
pub mod model;
pub mod secrets;
pub mod service;
pub mod sql;

pub use crate::config::GatewayConfig;
pub use crate::core::adapter::{GatewayAdapter, GatewayEvent, ResponseEnvelope, Service};
pub use crate::core::operation::{Action, Operation};
pub use crate::error::{AppResult, ApplicationError};
pub use crate::model::registry::ModelRegistry;
pub use crate::service::TransactionalService;
