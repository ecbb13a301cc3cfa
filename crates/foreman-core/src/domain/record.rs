//! Issue record: the persisted projection of an issue plus orchestration metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ContainerId, IssueId, IssueIid, ProjectId};
use super::issue::Issue;
use super::label::LifecycleLabel;

/// One row of the issue table.
///
/// Design:
/// - This is the single source of truth for cross-process exclusion.
/// - Created on first sighting, updated on every scheduling decision or label
///   sync, never deleted.
/// - `processed_at` starts at `created_at`, so "reset" means "as if never
///   scheduled".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueRecord {
    pub issue_id: IssueId,
    pub project_id: ProjectId,
    pub iid: IssueIid,

    /// Label snapshot at the last sync.
    pub labels: Vec<String>,

    /// Creation time of the issue on the tracker.
    pub created_at: DateTime<Utc>,

    /// Last time the scheduler touched this row.
    pub processed_at: DateTime<Utc>,

    /// Set once a compute unit is provisioned for the issue.
    pub container_id: Option<ContainerId>,
}

impl IssueRecord {
    /// Record for an issue seen for the first time.
    pub fn first_sighting(issue: &Issue) -> Self {
        Self {
            issue_id: issue.id,
            project_id: issue.project_id,
            iid: issue.iid,
            labels: issue.labels.clone(),
            created_at: issue.created_at,
            processed_at: issue.created_at,
            container_id: None,
        }
    }

    pub fn lifecycle_label(&self) -> Option<LifecycleLabel> {
        LifecycleLabel::from_labels(&self.labels)
    }

    /// Stamp a scheduling decision.
    pub fn mark_processed(&mut self, now: DateTime<Utc>, container_id: Option<ContainerId>) {
        self.processed_at = now;
        if container_id.is_some() {
            self.container_id = container_id;
        }
    }

    /// Make the row fully eligible again (after REJECT -> TODO).
    pub fn reset_processed_time(&mut self) {
        self.processed_at = self.created_at;
        self.container_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IssueState;
    use chrono::TimeZone;

    fn issue() -> Issue {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        Issue {
            id: IssueId::new(1),
            project_id: ProjectId::new(10),
            iid: IssueIid::new(1),
            title: "t".into(),
            description: String::new(),
            labels: vec!["TODO".into(), "bot".into()],
            state: IssueState::Opened,
            confidential: false,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn first_sighting_starts_at_creation_time() {
        let record = IssueRecord::first_sighting(&issue());
        assert_eq!(record.processed_at, record.created_at);
        assert_eq!(record.container_id, None);
        assert_eq!(record.lifecycle_label(), Some(LifecycleLabel::Todo));
    }

    #[test]
    fn mark_then_reset_restores_pre_selection_shape() {
        let original = IssueRecord::first_sighting(&issue());
        let mut record = original.clone();

        let later = original.created_at + chrono::Duration::hours(3);
        record.mark_processed(later, Some(ContainerId::new("ctr-1")));
        assert_eq!(record.processed_at, later);
        assert_eq!(record.container_id, Some(ContainerId::new("ctr-1")));

        record.reset_processed_time();
        assert_eq!(record, original);
    }

    #[test]
    fn mark_without_container_keeps_existing_one() {
        let mut record = IssueRecord::first_sighting(&issue());
        let t = record.created_at + chrono::Duration::minutes(5);
        record.mark_processed(t, Some(ContainerId::new("ctr-1")));
        record.mark_processed(t, None);
        assert_eq!(record.container_id, Some(ContainerId::new("ctr-1")));
    }
}
