//! Provisioning port - issue 用の compute unit（container）

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ContainerId;

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("provisioning backend error: {0}")]
    Backend(String),

    #[error("provisioning request timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create a compute unit named after `owner_key`.
    ///
    /// `Ok(None)` means the backend declined (no capacity, quota, ...).
    async fn create_compute_unit(&self, owner_key: &str)
    -> Result<Option<ContainerId>, ProvisionError>;

    /// Wait until the unit accepts work. `Ok(false)` on readiness timeout.
    async fn wait_until_ready(
        &self,
        container_id: &ContainerId,
        timeout: Duration,
    ) -> Result<bool, ProvisionError>;
}
