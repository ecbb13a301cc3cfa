//! Tracker ports - 外部の issue tracker
//!
//! 書き込み側は任意なので 2 つに分けている。
//! `LabelUpdater` が無い場合、orchestrator は legacy モード（lifecycle label なし）で動く。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{Issue, IssueIid, LabelChange, LifecycleLabel, ProjectId};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker unreachable: {0}")]
    Unreachable(String),

    #[error("issue {iid} not found in {project}")]
    NotFound { project: ProjectId, iid: IssueIid },

    #[error("tracker request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("tracker request failed: {0}")]
    Request(String),
}

/// IssueTracker は tracker の読み取り側
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Connectivity check, called once by `start()`.
    async fn check_connection(&self) -> Result<(), TrackerError>;

    /// Issues updated since `since` carrying at least one of `labels`
    /// (every issue when `labels` is empty).
    async fn fetch_issues_updated_since(
        &self,
        since: DateTime<Utc>,
        labels: &[String],
    ) -> Result<Vec<Issue>, TrackerError>;

    async fn get_issue(&self, project: ProjectId, iid: IssueIid) -> Result<Issue, TrackerError>;

    /// Label-set changes recorded after `since`, oldest first.
    async fn detect_label_changes(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LabelChange>, TrackerError>;
}

/// LabelUpdater は tracker の書き込み側（任意）
#[async_trait]
pub trait LabelUpdater: Send + Sync {
    /// Atomically remove any lifecycle label from `issue` and add `label`.
    async fn update_label(&self, issue: &Issue, label: LifecycleLabel)
    -> Result<(), TrackerError>;

    async fn add_comment(
        &self,
        project: ProjectId,
        iid: IssueIid,
        body: &str,
    ) -> Result<(), TrackerError>;
}
