//! PollingOrchestrator - 制御ループ
//!
//! 状態遷移は `Stopped -> Running -> Stopped`。
//! 各 tick で discovery と label / retry sweep を並行に実行する。
//!
//! # 停止
//! - 実行中の tick は必ず最後まで走る
//! - `stop` は次の tick を止めるだけ

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::admission::{AdmissionMode, AdmissionRule};
use super::bounded;
use super::listeners::{CompletionListener, CompletionListeners, ListenerHandle};
use super::workflow::{ContainerWorkflow, WorkflowOutcome};
use crate::config::ForemanConfig;
use crate::domain::{
    ContainerId, Issue, IssueCompletionEvent, IssueRecord, LabelChange, LifecycleLabel,
};
use crate::error::{ErrorKind, ForemanError};
use crate::observability::{CycleReport, OrchestratorStatus};
use crate::ports::{Clock, IssueTracker, TrackerError};
use crate::retry::{RetryCoordinator, RetryState};
use crate::scheduler::{IssueScheduler, SelectionOutcome};

/// Everything a tick needs; shared with the timer task.
pub(crate) struct Engine {
    pub(crate) config: ForemanConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) tracker: Arc<dyn IssueTracker>,
    pub(crate) scheduler: Arc<IssueScheduler>,
    pub(crate) retry: Arc<RetryCoordinator>,
    pub(crate) workflow: ContainerWorkflow,
    pub(crate) admission: AdmissionRule,
    pub(crate) listeners: CompletionListeners,

    /// Lower bound of the next label-change query.
    pub(crate) label_window_start: StdMutex<DateTime<Utc>>,
}

struct Timer {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

pub struct PollingOrchestrator {
    engine: Arc<Engine>,
    timer: Mutex<Option<Timer>>,
    running: AtomicBool,
}

impl PollingOrchestrator {
    pub(crate) fn from_engine(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
            timer: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Check tracker connectivity, run one cycle, then arm the timer.
    ///
    /// Starting while running logs a warning and does nothing.
    pub async fn start(&self) -> Result<(), ForemanError> {
        let mut timer = self.timer.lock().await;
        if timer.is_some() {
            warn!("orchestrator already running, start ignored");
            return Ok(());
        }

        let engine = &self.engine;
        bounded(
            engine.config.request_timeout,
            engine.tracker.check_connection(),
            TrackerError::Timeout,
        )
        .await?;

        self.running.store(true, Ordering::SeqCst);
        info!(
            interval_ms = interval_ms(engine.config.poll_interval),
            mode = ?engine.admission.mode(),
            "orchestrator started"
        );
        engine.run_cycle().await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(tick_loop(
            Arc::clone(&self.engine),
            engine.config.poll_interval,
            shutdown_rx,
        ));
        *timer = Some(Timer { shutdown_tx, join });
        Ok(())
    }

    /// Disarm the timer. Idempotent; a tick in progress finishes on its own.
    pub async fn stop(&self) {
        match self.disarm().await {
            Some(_) => info!("orchestrator stopped"),
            None => debug!("orchestrator not running, stop ignored"),
        }
    }

    /// Like `stop`, then wait for a tick in progress to finish.
    pub async fn shutdown_and_join(&self) {
        if let Some(join) = self.disarm().await {
            let _ = join.await;
            info!("orchestrator stopped, last tick joined");
        }
    }

    async fn disarm(&self) -> Option<JoinHandle<()>> {
        let timer = self.timer.lock().await.take()?;
        let _ = timer.shutdown_tx.send(true);
        self.running.store(false, Ordering::SeqCst);
        Some(timer.join)
    }

    pub fn admission_mode(&self) -> AdmissionMode {
        self.engine.admission.mode()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            running: self.is_running(),
            interval_ms: interval_ms(self.engine.config.poll_interval),
            pending_retries: self.engine.retry.len(),
            listeners: self.engine.listeners.len(),
        }
    }

    /// Run one cycle now, outside the timer.
    pub async fn run_cycle(&self) -> CycleReport {
        self.engine.run_cycle().await
    }

    pub fn on_issue_completion(&self, listener: Arc<dyn CompletionListener>) -> ListenerHandle {
        self.engine.listeners.subscribe(listener)
    }

    pub fn off_issue_completion(&self, handle: ListenerHandle) -> bool {
        self.engine.listeners.unsubscribe(handle)
    }

    pub fn get_issues_ready_for_retry(&self) -> Vec<RetryState> {
        self.engine.retry.due_for_retry(self.engine.clock.now())
    }

    /// The agent in `container_id` finished: move its issue WIP -> CONFIRM_NEEDED.
    ///
    /// Returns false when no issue owns that container or the move was not
    /// applied (legacy mode, or the issue is not in WIP any more).
    pub async fn report_task_completion(
        &self,
        container_id: &ContainerId,
    ) -> Result<bool, ForemanError> {
        let engine = &self.engine;
        let Some(record) = engine.scheduler.find_by_container_id(container_id).await? else {
            warn!(container_id = %container_id, "completion reported for unknown container");
            return Ok(false);
        };
        let issue = engine.fetch(&record).await?;

        let moved = engine
            .workflow
            .apply_transition(&issue, LifecycleLabel::ConfirmNeeded)
            .await?;
        engine.retry.record_success(issue.id);
        Ok(moved.is_some())
    }
}

fn interval_ms(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

async fn tick_loop(engine: Arc<Engine>, period: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    let first = Instant::now().checked_add(period).unwrap_or_else(Instant::now);
    let mut ticker = tokio::time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Err means the orchestrator was dropped.
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if *shutdown_rx.borrow() {
                    break;
                }
                engine.run_cycle().await;
            }
        }
    }
    debug!("tick loop exited");
}

impl Engine {
    /// One tick. Never fails: errors are logged and kept in the report.
    pub(crate) async fn run_cycle(&self) -> CycleReport {
        let (discovery, sweep) = tokio::join!(self.discover(), self.sweep());

        let mut report = discovery;
        report.merge(sweep);
        info!(
            discovered = report.discovered,
            selected = report.selected,
            delegated = report.delegated,
            retry_scheduled = report.retry_scheduled,
            escalated = report.escalated,
            completions = report.completions,
            retried = report.retried,
            contended = report.contended,
            errors = report.errors.len(),
            "cycle finished"
        );
        report
    }

    async fn discover(&self) -> CycleReport {
        let mut report = CycleReport::default();
        if let Err(err) = self.try_discover(&mut report).await {
            record_error(&mut report, "discovery", &err);
        }
        report
    }

    async fn try_discover(&self, report: &mut CycleReport) -> Result<(), ForemanError> {
        let now = self.clock.now();
        let since = match self.scheduler.store().last_check_time().await? {
            Some(at) => at,
            None => lookback_start(&self.config, now),
        };

        let issues = bounded(
            self.config.request_timeout,
            self.tracker
                .fetch_issues_updated_since(since, self.admission.trigger_labels()),
            TrackerError::Timeout,
        )
        .await?;
        report.discovered = issues.len();

        let mut admitted = Vec::new();
        for issue in issues {
            if self.already_claimed(&issue).await? {
                report.skipped += 1;
                continue;
            }
            if let Err(reason) = self.admission.evaluate(&issue, false) {
                debug!(issue_id = %issue.id, %reason, "issue not admitted");
                self.scheduler.mark_processed(&issue, None).await?;
                report.not_admitted += 1;
                continue;
            }
            admitted.push(issue);
        }

        match self.admission.mode() {
            AdmissionMode::Lifecycle => {
                for issue in &admitted {
                    self.scheduler.store().upsert_issue(issue).await?;
                }
                self.select_and_run(report).await
            }
            AdmissionMode::Legacy => {
                for issue in &admitted {
                    // Claim first so the next discovery skips it.
                    self.scheduler.mark_processed(issue, None).await?;
                    let outcome = self.workflow.run(issue).await;
                    report.selected += 1;
                    record_outcome(report, &outcome);
                }
                Ok(())
            }
        }
    }

    /// Re-entry guard for discovery.
    async fn already_claimed(&self, issue: &Issue) -> Result<bool, ForemanError> {
        if self.retry.get(issue.id).is_some() {
            return Ok(true);
        }
        let Some(record) = self.scheduler.find_by_external_id(issue.id).await? else {
            return Ok(false);
        };
        Ok(match self.admission.mode() {
            AdmissionMode::Lifecycle => record
                .lifecycle_label()
                .is_some_and(|label| label != LifecycleLabel::Todo),
            AdmissionMode::Legacy => record.container_id.is_some(),
        })
    }

    async fn select_and_run(&self, report: &mut CycleReport) -> Result<(), ForemanError> {
        let selected = match self.scheduler.select_processable_issues().await? {
            SelectionOutcome::Selected(rows) => rows,
            SelectionOutcome::Contended => {
                report.contended = true;
                return Ok(());
            }
        };
        report.selected = selected.len();

        for record in selected {
            // Per-issue trouble never aborts the batch.
            if let Err(err) = self.run_selected(&record, report).await {
                record_error(report, "selected issue", &err);
            }
        }
        Ok(())
    }

    async fn run_selected(
        &self,
        record: &IssueRecord,
        report: &mut CycleReport,
    ) -> Result<(), ForemanError> {
        // Selection still holds the project; the retry sweep drives the issue.
        if self.retry.get(record.issue_id).is_some() {
            debug!(issue_id = %record.issue_id, "selected issue waits for its retry");
            report.skipped += 1;
            return Ok(());
        }
        let issue = self.fetch(record).await?;
        if let Err(reason) = self.admission.evaluate(&issue, false) {
            info!(issue_id = %issue.id, %reason, "selected issue no longer admissible");
            self.scheduler.mark_processed(&issue, None).await?;
            report.not_admitted += 1;
            return Ok(());
        }
        let outcome = self.workflow.run(&issue).await;
        record_outcome(report, &outcome);
        Ok(())
    }

    async fn sweep(&self) -> CycleReport {
        let mut report = CycleReport::default();
        if let Err(err) = self.sweep_label_changes(&mut report).await {
            record_error(&mut report, "label sweep", &err);
        }
        if let Err(err) = self.sweep_retries(&mut report).await {
            record_error(&mut report, "retry sweep", &err);
        }
        report
    }

    async fn sweep_label_changes(&self, report: &mut CycleReport) -> Result<(), ForemanError> {
        let started = self.clock.now();
        let since = *self
            .label_window_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let changes = bounded(
            self.config.request_timeout,
            self.tracker.detect_label_changes(since),
            TrackerError::Timeout,
        )
        .await?;

        for change in &changes {
            if let Err(err) = self.handle_change(change, report).await {
                record_error(report, "label change", &err);
            }
        }

        *self
            .label_window_start
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = started;
        Ok(())
    }

    async fn handle_change(
        &self,
        change: &LabelChange,
        report: &mut CycleReport,
    ) -> Result<(), ForemanError> {
        let record = self
            .scheduler
            .sync_labels(change.issue.id, &change.current_labels)
            .await?;

        if change.is_move(LifecycleLabel::ConfirmNeeded, LifecycleLabel::Done) {
            let event = IssueCompletionEvent {
                issue: change.issue.clone(),
                container_id: record.and_then(|r| r.container_id),
                completed_at: change.changed_at,
            };
            info!(issue_id = %event.issue.id, "issue completed");
            self.listeners.notify(&event).await;
            report.completions += 1;
        } else if change.is_move(LifecycleLabel::Reject, LifecycleLabel::Todo) {
            info!(issue_id = %change.issue.id, "issue reset to TODO");
            self.retry.reset(change.issue.id);
            self.scheduler.reset_processed_time(change.issue.id).await?;
            report.resets += 1;
        }
        Ok(())
    }

    async fn sweep_retries(&self, report: &mut CycleReport) -> Result<(), ForemanError> {
        let mut due = self.retry.due_for_retry(self.clock.now());
        due.sort_by_key(|s| (s.next_retry_at, s.issue_id));

        for state in due {
            let Some(record) = self.scheduler.find_by_external_id(state.issue_id).await? else {
                warn!(issue_id = %state.issue_id, "retry for unknown issue dropped");
                self.retry.reset(state.issue_id);
                continue;
            };
            if let Err(err) = self.retry_one(&record, report).await {
                record_error(report, "retry", &err);
            }
        }
        Ok(())
    }

    async fn retry_one(
        &self,
        record: &IssueRecord,
        report: &mut CycleReport,
    ) -> Result<(), ForemanError> {
        let issue = self.fetch(record).await?;
        if let Err(reason) = self.admission.evaluate(&issue, true) {
            info!(issue_id = %issue.id, %reason, "retry abandoned");
            self.retry.reset(issue.id);
            self.scheduler.mark_processed(&issue, None).await?;
            return Ok(());
        }
        let outcome = self.workflow.run(&issue).await;
        report.retried += 1;
        record_outcome(report, &outcome);
        Ok(())
    }

    async fn fetch(&self, record: &IssueRecord) -> Result<Issue, ForemanError> {
        bounded(
            self.config.request_timeout,
            self.tracker.get_issue(record.project_id, record.iid),
            TrackerError::Timeout,
        )
        .await
    }
}

/// `now` minus the initial lookback, clamped to the earliest representable time.
pub(crate) fn lookback_start(config: &ForemanConfig, now: DateTime<Utc>) -> DateTime<Utc> {
    chrono::Duration::from_std(config.initial_lookback)
        .ok()
        .and_then(|lookback| now.checked_sub_signed(lookback))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn record_outcome(report: &mut CycleReport, outcome: &WorkflowOutcome) {
    match outcome {
        WorkflowOutcome::Delegated { .. } => report.delegated += 1,
        WorkflowOutcome::RetryScheduled { .. } => report.retry_scheduled += 1,
        WorkflowOutcome::Escalated { .. } => report.escalated += 1,
    }
}

fn record_error(report: &mut CycleReport, stage: &str, err: &ForemanError) {
    match err.kind() {
        ErrorKind::Expected => debug!(stage, error = %err, "cycle step skipped"),
        ErrorKind::Transient => warn!(stage, error = %err, "cycle step failed"),
        ErrorKind::Infrastructure => error!(stage, error = %err, "cycle step failed"),
    }
    report.errors.push(format!("{stage}: {err}"));
}
