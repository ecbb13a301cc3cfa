//! ContainerWorkflow - 受け入れた issue 1 件の処理
//!
//! # 流れ
//! 1. TODO → WIP へ移動（retry で既に WIP の場合など、不正な遷移はスキップ）
//! 2. compute unit を作成し、ready になるまで待つ
//! 3. issue の行に container を記録
//! 4. container 内の agent に issue を delegate
//!
//! 失敗はすべて retry coordinator を通る。
//! escalate 時は REJECT に移し、tracker にコメントを残す。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{error, info, instrument, warn};

use super::bounded;
use crate::config::ForemanConfig;
use crate::domain::{ContainerId, Issue, LifecycleLabel};
use crate::error::ForemanError;
use crate::lifecycle::LifecycleStateMachine;
use crate::ports::{
    DelegatedTask, DelegationError, DelegationPayload, LabelUpdater, ProvisionError, Provisioner,
    TaskDelegator, TrackerError,
};
use crate::retry::{RetryCoordinator, RetryDecision};
use crate::scheduler::IssueScheduler;

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowOutcome {
    Delegated {
        container_id: ContainerId,
        task_id: String,
    },
    RetryScheduled {
        attempt: u32,
        after: DateTime<Utc>,
    },
    Escalated {
        attempts: u32,
    },
}

pub struct ContainerWorkflow {
    scheduler: Arc<IssueScheduler>,
    labels: Option<Arc<dyn LabelUpdater>>,
    provisioner: Arc<dyn Provisioner>,
    delegator: Arc<dyn TaskDelegator>,
    retry: Arc<RetryCoordinator>,
    lifecycle: LifecycleStateMachine,
    readiness_timeout: Duration,
    request_timeout: Duration,
}

impl ContainerWorkflow {
    pub fn new(
        scheduler: Arc<IssueScheduler>,
        labels: Option<Arc<dyn LabelUpdater>>,
        provisioner: Arc<dyn Provisioner>,
        delegator: Arc<dyn TaskDelegator>,
        retry: Arc<RetryCoordinator>,
        config: &ForemanConfig,
    ) -> Self {
        Self {
            scheduler,
            labels,
            provisioner,
            delegator,
            retry,
            lifecycle: LifecycleStateMachine::new(),
            readiness_timeout: config.readiness_timeout,
            request_timeout: config.request_timeout,
        }
    }

    /// Apply a lifecycle move on the tracker and mirror it into the store.
    ///
    /// Returns the issue with its new label set, or `None` when nothing was
    /// applied: no label updater (legacy mode) or a move outside the
    /// transition table. Rejected moves are logged, never raised.
    pub async fn apply_transition(
        &self,
        issue: &Issue,
        to: LifecycleLabel,
    ) -> Result<Option<Issue>, ForemanError> {
        let Some(updater) = &self.labels else {
            return Ok(None);
        };
        let plan = match self.lifecycle.plan(issue, to) {
            Ok(plan) => plan,
            Err(err) => {
                info!(issue_id = %issue.id, reason = %err, "label transition skipped");
                return Ok(None);
            }
        };

        bounded(
            self.request_timeout,
            updater.update_label(issue, to),
            TrackerError::Timeout,
        )
        .await?;

        // The tracker already moved; the next label sweep repairs the snapshot.
        if let Err(err) = self.scheduler.sync_labels(issue.id, &plan.labels).await {
            warn!(issue_id = %issue.id, error = %err, "label snapshot not updated");
        }

        info!(
            issue_id = %issue.id,
            from = plan.from.map_or("(none)", LifecycleLabel::as_str),
            to = %to,
            "label moved"
        );
        let mut moved = issue.clone();
        moved.labels = plan.labels;
        Ok(Some(moved))
    }

    /// Run the workflow for one admitted issue. Never fails: errors end up
    /// as a retry or an escalation.
    #[instrument(skip(self, issue), fields(issue_id = %issue.id, project_id = %issue.project_id))]
    pub async fn run(&self, issue: &Issue) -> WorkflowOutcome {
        let issue = match self.apply_transition(issue, LifecycleLabel::Wip).await {
            Ok(Some(moved)) => moved,
            Ok(None) => issue.clone(),
            Err(err) => return self.fail(issue, err).await,
        };

        match self.provision_and_delegate(&issue).await {
            Ok((container_id, task)) => {
                self.retry.record_success(issue.id);
                info!(container_id = %container_id, task_id = %task.task_id, "issue delegated");
                WorkflowOutcome::Delegated {
                    container_id,
                    task_id: task.task_id,
                }
            }
            Err(err) => self.fail(&issue, err).await,
        }
    }

    async fn provision_and_delegate(
        &self,
        issue: &Issue,
    ) -> Result<(ContainerId, DelegatedTask), ForemanError> {
        let owner_key = issue.owner_key();
        let container_id = bounded(
            self.request_timeout,
            self.provisioner.create_compute_unit(&owner_key),
            ProvisionError::Timeout,
        )
        .await?
        .ok_or_else(|| {
            ForemanError::Provisioning(format!("no compute unit created for {owner_key}"))
        })?;

        let ready = bounded(
            self.readiness_timeout + self.request_timeout,
            self.provisioner
                .wait_until_ready(&container_id, self.readiness_timeout),
            ProvisionError::Timeout,
        )
        .await?;
        if !ready {
            return Err(ForemanError::Provisioning(format!(
                "{container_id} not ready within {:?}",
                self.readiness_timeout
            )));
        }

        self.scheduler
            .mark_processed(issue, Some(&container_id))
            .await?;

        let payload = DelegationPayload::from(issue);
        let task = bounded(
            self.request_timeout,
            self.delegator.delegate(&container_id, &payload),
            DelegationError::Timeout,
        )
        .await?;
        Ok((container_id, task))
    }

    async fn fail(&self, issue: &Issue, err: ForemanError) -> WorkflowOutcome {
        match self.retry.record_failure(issue.id, err.to_string()) {
            RetryDecision::Retry { attempt, after } => {
                warn!(
                    issue_id = %issue.id,
                    attempt,
                    retry_at = %after,
                    error = %err,
                    "attempt failed, retry scheduled"
                );
                WorkflowOutcome::RetryScheduled { attempt, after }
            }
            RetryDecision::Escalate {
                attempts,
                last_error,
            } => {
                error!(
                    issue_id = %issue.id,
                    attempts,
                    error = %last_error,
                    "attempts exhausted, escalating"
                );
                self.escalate(issue, attempts, &last_error).await;
                WorkflowOutcome::Escalated { attempts }
            }
        }
    }

    async fn escalate(&self, issue: &Issue, attempts: u32, last_error: &str) {
        let Some(updater) = &self.labels else {
            return;
        };
        if let Err(err) = self.apply_transition(issue, LifecycleLabel::Reject).await {
            warn!(issue_id = %issue.id, error = %err, "could not move issue to REJECT");
        }

        let body = escalation_comment(attempts, last_error);
        if let Err(err) = bounded(
            self.request_timeout,
            updater.add_comment(issue.project_id, issue.iid, &body),
            TrackerError::Timeout,
        )
        .await
        {
            warn!(issue_id = %issue.id, error = %err, "escalation comment not posted");
        }
    }
}

pub fn escalation_comment(attempts: u32, last_error: &str) -> String {
    format!(
        "Automatic processing gave up after {attempts} failed attempts.\n\n\
         Last error: {last_error}\n\n\
         Move the issue back to TODO to try again."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IssueId, IssueIid, IssueState, ProjectId};
    use crate::impls::{InMemoryFleet, InMemoryIssueStore, InMemoryTracker};
    use crate::ports::{Clock, FixedClock, IssueStore, UlidGenerator};
    use crate::retry::RetryPolicy;
    use chrono::TimeZone;

    struct Harness {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryIssueStore>,
        tracker: Arc<InMemoryTracker>,
        fleet: Arc<InMemoryFleet>,
        retry: Arc<RetryCoordinator>,
        workflow: ContainerWorkflow,
    }

    fn harness(with_labels: bool) -> Harness {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryIssueStore::new());
        let tracker = Arc::new(InMemoryTracker::new(clock.clone()));
        let fleet = Arc::new(InMemoryFleet::new(UlidGenerator::new(clock.clone())));
        let config = ForemanConfig::default();
        let retry = Arc::new(RetryCoordinator::new(
            RetryPolicy::from_config(&config),
            clock.clone(),
        ));
        let scheduler = Arc::new(IssueScheduler::new(
            store.clone(),
            clock.clone(),
            config.statement_timeout,
        ));
        let labels: Option<Arc<dyn LabelUpdater>> = if with_labels {
            Some(tracker.clone())
        } else {
            None
        };
        let workflow = ContainerWorkflow::new(
            scheduler,
            labels,
            fleet.clone(),
            fleet.clone(),
            retry.clone(),
            &config,
        );
        Harness {
            clock,
            store,
            tracker,
            fleet,
            retry,
            workflow,
        }
    }

    fn todo_issue(h: &Harness) -> Issue {
        let created = h.clock.now() - chrono::Duration::hours(1);
        let issue = Issue {
            id: IssueId::new(1),
            project_id: ProjectId::new(10),
            iid: IssueIid::new(4),
            title: "fix it".into(),
            description: "please".into(),
            labels: vec!["TODO".into(), "bot".into()],
            state: IssueState::Opened,
            confidential: false,
            created_at: created,
            updated_at: created,
        };
        h.tracker.add_issue(issue.clone());
        issue
    }

    #[tokio::test]
    async fn happy_path_moves_to_wip_and_delegates() {
        let h = harness(true);
        let issue = todo_issue(&h);
        h.store.upsert_issue(&issue).await.unwrap();

        let outcome = h.workflow.run(&issue).await;

        let WorkflowOutcome::Delegated { container_id, .. } = outcome.clone() else {
            panic!("expected delegation, got {outcome:?}");
        };
        assert_eq!(h.fleet.create_calls(), 1);
        assert_eq!(h.fleet.created()[0].0, "10-4");
        assert_eq!(h.fleet.delegations()[0].1.title, "fix it");

        let on_tracker = h.tracker.issue(issue.id).unwrap();
        assert_eq!(on_tracker.lifecycle_label(), Some(LifecycleLabel::Wip));

        let row = h.store.find_by_external_id(issue.id).await.unwrap().unwrap();
        assert_eq!(row.container_id, Some(container_id));
        assert_eq!(row.lifecycle_label(), Some(LifecycleLabel::Wip));
        assert!(h.retry.is_empty());
    }

    #[tokio::test]
    async fn declined_unit_schedules_a_retry() {
        let h = harness(true);
        let issue = todo_issue(&h);
        h.fleet.decline_next_creates(1);

        let outcome = h.workflow.run(&issue).await;

        assert_eq!(
            outcome,
            WorkflowOutcome::RetryScheduled {
                attempt: 1,
                after: h.clock.now() + chrono::Duration::minutes(30),
            }
        );
        let state = h.retry.get(issue.id).unwrap();
        assert!(state.last_error.unwrap().contains("no compute unit"));
        assert!(h.tracker.comments().is_empty());
    }

    #[tokio::test]
    async fn readiness_timeout_is_a_provisioning_failure() {
        let h = harness(true);
        let issue = todo_issue(&h);
        h.fleet.time_out_next_readiness(1);

        let outcome = h.workflow.run(&issue).await;

        assert!(matches!(outcome, WorkflowOutcome::RetryScheduled { attempt: 1, .. }));
        assert!(h.fleet.delegations().is_empty());
    }

    #[tokio::test]
    async fn third_failure_escalates_to_reject_with_comment() {
        let h = harness(true);
        let issue = todo_issue(&h);
        h.fleet.reject_next_delegations(3);

        assert!(matches!(h.workflow.run(&issue).await, WorkflowOutcome::RetryScheduled { attempt: 1, .. }));
        // Retries see the issue as WIP now.
        let wip = h.tracker.issue(issue.id).unwrap();
        assert!(matches!(h.workflow.run(&wip).await, WorkflowOutcome::RetryScheduled { attempt: 2, .. }));
        let outcome = h.workflow.run(&wip).await;

        assert_eq!(outcome, WorkflowOutcome::Escalated { attempts: 3 });
        assert_eq!(
            h.tracker.issue(issue.id).unwrap().lifecycle_label(),
            Some(LifecycleLabel::Reject)
        );
        let comments = h.tracker.comments();
        assert_eq!(comments.len(), 1);
        assert!(comments[0].body.contains("3 failed attempts"));
        assert!(h.retry.get(issue.id).is_none());
    }

    #[tokio::test]
    async fn rejected_transition_does_not_stop_provisioning() {
        let h = harness(true);
        let mut issue = todo_issue(&h);
        issue.labels = vec!["WIP".into(), "bot".into()];

        let outcome = h.workflow.run(&issue).await;

        assert!(matches!(outcome, WorkflowOutcome::Delegated { .. }));
        assert!(h.tracker.label_updates().is_empty());
    }

    #[tokio::test]
    async fn legacy_mode_never_touches_labels() {
        let h = harness(false);
        let issue = todo_issue(&h);
        h.fleet.fail_next_creates(3);

        for _ in 0..3 {
            h.workflow.run(&issue).await;
        }

        assert!(h.tracker.label_updates().is_empty());
        assert!(h.tracker.comments().is_empty());
        assert_eq!(h.fleet.create_calls(), 3);
    }
}
