//! Warden Database — SurrealDB connection management and repository
//! implementations.
//!
//! This crate provides:
//! - Connection and startup migration ([`connect`], [`DbConfig`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - Error types ([`DbError`])
//! - Repository implementations for the `warden-core` traits
//!   ([`repository`])

mod connection;
mod error;
pub mod repository;
mod schema;

pub use connection::{DbConfig, connect};
pub use error::DbError;
pub use schema::{run_migrations, schema_v1};
