//! Delegation port - 起動済み container 内の agent へ issue を引き渡す

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ContainerId, Issue, IssueId, IssueIid, ProjectId};

#[derive(Debug, Error)]
pub enum DelegationError {
    #[error("delegation rejected: {0}")]
    Rejected(String),

    #[error("delegation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// What the container receives. The agent's execution semantics are its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationPayload {
    pub issue_id: IssueId,
    pub project_id: ProjectId,
    pub iid: IssueIid,
    pub title: String,
    pub description: String,
}

impl From<&Issue> for DelegationPayload {
    fn from(issue: &Issue) -> Self {
        Self {
            issue_id: issue.id,
            project_id: issue.project_id,
            iid: issue.iid,
            title: issue.title.clone(),
            description: issue.description.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatedTask {
    pub task_id: String,
}

#[async_trait]
pub trait TaskDelegator: Send + Sync {
    async fn delegate(
        &self,
        container_id: &ContainerId,
        payload: &DelegationPayload,
    ) -> Result<DelegatedTask, DelegationError>;
}
