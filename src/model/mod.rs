//! API Model
//!
//! The declarative spec parsed into immutable entity, relation, and
//! permission metadata, plus the per-request permission projection.

pub mod loader;
pub mod permissions;
pub mod registry;
pub mod types;
