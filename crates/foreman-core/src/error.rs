use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::LifecycleLabel;
use crate::ports::{DelegationError, ProvisionError, StoreError, TrackerError};

/// Operational classification, used to pick a log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Part of normal operation (lock contention, racing label edits).
    Expected,
    /// Worth retrying (provisioning, delegation).
    Transient,
    /// Store or tracker trouble; the cycle is aborted.
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum ForemanError {
    #[error("another scheduler holds the issue locks")]
    Contention,

    #[error("store failure: {0}")]
    Store(StoreError),

    #[error("tracker failure: {0}")]
    Tracker(#[from] TrackerError),

    #[error("provisioning failed: {0}")]
    Provisioning(String),

    #[error("delegation failed: {0}")]
    Delegation(String),

    #[error("transition rejected: {} -> {to}", label_or_none(.from))]
    TransitionRejected {
        from: Option<LifecycleLabel>,
        to: LifecycleLabel,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

fn label_or_none(label: &Option<LifecycleLabel>) -> &'static str {
    label.map_or("(none)", LifecycleLabel::as_str)
}

impl ForemanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForemanError::Contention | ForemanError::TransitionRejected { .. } => {
                ErrorKind::Expected
            }
            ForemanError::Provisioning(_) | ForemanError::Delegation(_) => ErrorKind::Transient,
            ForemanError::Store(_) | ForemanError::Tracker(_) | ForemanError::Config(_) => {
                ErrorKind::Infrastructure
            }
        }
    }
}

impl From<StoreError> for ForemanError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::LockNotAvailable => ForemanError::Contention,
            other => ForemanError::Store(other),
        }
    }
}

impl From<ProvisionError> for ForemanError {
    fn from(err: ProvisionError) -> Self {
        ForemanError::Provisioning(err.to_string())
    }
}

impl From<DelegationError> for ForemanError {
    fn from(err: DelegationError) -> Self {
        ForemanError::Delegation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_failure_becomes_contention() {
        let err: ForemanError = StoreError::LockNotAvailable.into();
        assert!(matches!(err, ForemanError::Contention));
        assert_eq!(err.kind(), ErrorKind::Expected);

        let err: ForemanError = StoreError::Backend("boom".into()).into();
        assert!(matches!(err, ForemanError::Store(_)));
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
    }

    #[test]
    fn transition_message_names_both_ends() {
        let err = ForemanError::TransitionRejected {
            from: None,
            to: LifecycleLabel::Done,
        };
        assert_eq!(err.to_string(), "transition rejected: (none) -> DONE");
    }
}
