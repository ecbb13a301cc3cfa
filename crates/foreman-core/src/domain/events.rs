//! Events - 下流の listener へ fan-out する通知

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::ContainerId;
use super::issue::Issue;

/// Fired when an issue moves CONFIRM_NEEDED -> DONE.
///
/// Carries the stored container identity so listeners can tear the compute
/// unit down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueCompletionEvent {
    pub issue: Issue,
    pub container_id: Option<ContainerId>,
    pub completed_at: DateTime<Utc>,
}
