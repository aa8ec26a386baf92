//! Warden Core — domain models, error types and repository traits
//! shared by the persistence and gating crates.

pub mod error;
pub mod models;
pub mod repository;
