//! Issue model: the orchestrator's read-mostly view of a tracker issue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{IssueId, IssueIid, ProjectId};
use super::label::LifecycleLabel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueState {
    Opened,
    Closed,
}

/// An externally tracked unit of requested work.
///
/// Owned by the tracker; the orchestrator only holds snapshots of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub project_id: ProjectId,
    pub iid: IssueIid,
    pub title: String,
    pub description: String,

    /// Free-form labels, in tracker order.
    pub labels: Vec<String>,

    pub state: IssueState,
    pub confidential: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    pub fn lifecycle_label(&self) -> Option<LifecycleLabel> {
        LifecycleLabel::from_labels(&self.labels)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn is_open(&self) -> bool {
        self.state == IssueState::Opened
    }

    /// Key handed to the provisioning layer to name the compute unit.
    pub fn owner_key(&self) -> String {
        format!("{}-{}", self.project_id.get(), self.iid.get())
    }
}

/// A label-set change observed on the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelChange {
    pub issue: Issue,
    pub previous_labels: Vec<String>,
    pub current_labels: Vec<String>,
    pub changed_at: DateTime<Utc>,
}

impl LabelChange {
    pub fn previous_lifecycle(&self) -> Option<LifecycleLabel> {
        LifecycleLabel::from_labels(&self.previous_labels)
    }

    pub fn current_lifecycle(&self) -> Option<LifecycleLabel> {
        LifecycleLabel::from_labels(&self.current_labels)
    }

    /// Did the lifecycle label move from `from` to `to` in this change?
    pub fn is_move(&self, from: LifecycleLabel, to: LifecycleLabel) -> bool {
        self.previous_lifecycle() == Some(from) && self.current_lifecycle() == Some(to)
    }
}
