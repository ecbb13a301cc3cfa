//! In-memory issue tracker (tests, demo).
//!
//! Keeps a label-change log like a real tracker's event feed: both external
//! edits (`set_labels`) and orchestrator-made `update_label` calls show up in
//! `detect_label_changes`.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Issue, IssueId, IssueIid, LabelChange, LifecycleLabel, ProjectId};
use crate::ports::{Clock, IssueTracker, LabelUpdater, TrackerError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedComment {
    pub project_id: ProjectId,
    pub iid: IssueIid,
    pub body: String,
}

struct TrackerState {
    issues: BTreeMap<IssueId, Issue>,
    changes: Vec<LabelChange>,
    comments: Vec<PostedComment>,
    label_updates: Vec<(IssueId, LifecycleLabel)>,
    reachable: bool,
}

pub struct InMemoryTracker {
    clock: Arc<dyn Clock>,
    state: Mutex<TrackerState>,
}

impl InMemoryTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(TrackerState {
                issues: BTreeMap::new(),
                changes: Vec::new(),
                comments: Vec::new(),
                label_updates: Vec::new(),
                reachable: true,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_reachable(&self) -> Result<(), TrackerError> {
        if self.state().reachable {
            Ok(())
        } else {
            Err(TrackerError::Unreachable("in-memory tracker switched off".into()))
        }
    }

    pub fn add_issue(&self, issue: Issue) {
        self.state().issues.insert(issue.id, issue);
    }

    pub fn issue(&self, id: IssueId) -> Option<Issue> {
        self.state().issues.get(&id).cloned()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Simulate a human editing the labels of an issue.
    pub fn set_labels(&self, id: IssueId, labels: &[&str]) -> Option<Issue> {
        let labels: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        self.replace_labels(id, labels)
    }

    fn replace_labels(&self, id: IssueId, labels: Vec<String>) -> Option<Issue> {
        let now = self.clock.now();
        let mut state = self.state();
        let issue = state.issues.get_mut(&id)?;

        let previous = std::mem::replace(&mut issue.labels, labels);
        issue.updated_at = now;
        let updated = issue.clone();

        state.changes.push(LabelChange {
            issue: updated.clone(),
            previous_labels: previous,
            current_labels: updated.labels.clone(),
            changed_at: now,
        });
        Some(updated)
    }

    pub fn comments(&self) -> Vec<PostedComment> {
        self.state().comments.clone()
    }

    /// Every `update_label` call, in order.
    pub fn label_updates(&self) -> Vec<(IssueId, LifecycleLabel)> {
        self.state().label_updates.clone()
    }
}

#[async_trait]
impl IssueTracker for InMemoryTracker {
    async fn check_connection(&self) -> Result<(), TrackerError> {
        self.ensure_reachable()
    }

    async fn fetch_issues_updated_since(
        &self,
        since: DateTime<Utc>,
        labels: &[String],
    ) -> Result<Vec<Issue>, TrackerError> {
        self.ensure_reachable()?;
        Ok(self
            .state()
            .issues
            .values()
            .filter(|i| i.updated_at >= since)
            .filter(|i| labels.is_empty() || labels.iter().any(|l| i.has_label(l)))
            .cloned()
            .collect())
    }

    async fn get_issue(&self, project: ProjectId, iid: IssueIid) -> Result<Issue, TrackerError> {
        self.ensure_reachable()?;
        self.state()
            .issues
            .values()
            .find(|i| i.project_id == project && i.iid == iid)
            .cloned()
            .ok_or(TrackerError::NotFound { project, iid })
    }

    async fn detect_label_changes(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LabelChange>, TrackerError> {
        self.ensure_reachable()?;
        Ok(self
            .state()
            .changes
            .iter()
            .filter(|c| c.changed_at > since)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LabelUpdater for InMemoryTracker {
    async fn update_label(
        &self,
        issue: &Issue,
        label: LifecycleLabel,
    ) -> Result<(), TrackerError> {
        self.ensure_reachable()?;
        let current = self
            .issue(issue.id)
            .ok_or(TrackerError::NotFound {
                project: issue.project_id,
                iid: issue.iid,
            })?;

        let mut labels: Vec<String> = current
            .labels
            .into_iter()
            .filter(|l| !LifecycleLabel::is_lifecycle(l))
            .collect();
        labels.push(label.as_str().to_string());

        self.replace_labels(issue.id, labels);
        self.state().label_updates.push((issue.id, label));
        Ok(())
    }

    async fn add_comment(
        &self,
        project: ProjectId,
        iid: IssueIid,
        body: &str,
    ) -> Result<(), TrackerError> {
        self.ensure_reachable()?;
        self.state().comments.push(PostedComment {
            project_id: project,
            iid,
            body: body.to_string(),
        });
        Ok(())
    }
}
