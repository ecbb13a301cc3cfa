//! Retry module: backoff policy and per-issue retry coordination.

mod coordinator;
mod policy;

pub use coordinator::{RetryCoordinator, RetryDecision, RetryState};
pub use policy::RetryPolicy;
