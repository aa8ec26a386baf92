//! SurrealDB repository implementations.

mod audit;
mod booking;
mod challenge;

pub use audit::SurrealAuditLogRepository;
pub use booking::SurrealBookingRepository;
pub use challenge::SurrealChallengeRepository;
