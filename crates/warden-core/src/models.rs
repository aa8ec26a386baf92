//! Domain models for Warden.
//!
//! These are the core types shared across all crates.

pub mod audit;
pub mod booking;
pub mod challenge;
