//! Concrete privileged actions.

pub mod refund;

pub use refund::{REFUND_ACTION_ID, RefundHandler, RefundParams};
