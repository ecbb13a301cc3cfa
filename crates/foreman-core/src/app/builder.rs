//! OrchestratorBuilder - ports を `PollingOrchestrator` に組み上げる
//!
//! # Fail-fast
//! - 必須の collaborator が足りなければ `build()` がすべて列挙してエラーにする
//! - 最初の tick まで問題を持ち越さない

use std::sync::{Arc, Mutex};

use super::admission::{AdmissionMode, AdmissionRule};
use super::listeners::CompletionListeners;
use super::orchestrator::{Engine, PollingOrchestrator, lookback_start};
use super::workflow::ContainerWorkflow;
use crate::config::ForemanConfig;
use crate::ports::{
    Clock, IssueStore, IssueTracker, LabelUpdater, Provisioner, SystemClock, TaskDelegator,
};
use crate::retry::{RetryCoordinator, RetryPolicy};
use crate::scheduler::IssueScheduler;

/// # Example
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new(ForemanConfig::from_env()?)
///     .store(store)
///     .tracker(tracker.clone())
///     .label_updater(tracker)
///     .provisioner(fleet.clone())
///     .delegator(fleet)
///     .build()?;
/// ```
///
/// Leaving out `label_updater` selects legacy admission (no lifecycle labels).
pub struct OrchestratorBuilder {
    config: ForemanConfig,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn IssueStore>>,
    tracker: Option<Arc<dyn IssueTracker>>,
    labels: Option<Arc<dyn LabelUpdater>>,
    provisioner: Option<Arc<dyn Provisioner>>,
    delegator: Option<Arc<dyn TaskDelegator>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborators: {0:?}")]
    MissingCollaborators(Vec<&'static str>),
}

impl OrchestratorBuilder {
    pub fn new(config: ForemanConfig) -> Self {
        Self {
            config,
            clock: None,
            store: None,
            tracker: None,
            labels: None,
            provisioner: None,
            delegator: None,
        }
    }

    /// Defaults to `SystemClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn store(mut self, store: Arc<dyn IssueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn tracker(mut self, tracker: Arc<dyn IssueTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn label_updater(mut self, labels: Arc<dyn LabelUpdater>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn provisioner(mut self, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioner = Some(provisioner);
        self
    }

    pub fn delegator(mut self, delegator: Arc<dyn TaskDelegator>) -> Self {
        self.delegator = Some(delegator);
        self
    }

    pub fn build(self) -> Result<PollingOrchestrator, BuildError> {
        let (store, tracker, provisioner, delegator) =
            match (self.store, self.tracker, self.provisioner, self.delegator) {
                (Some(s), Some(t), Some(p), Some(d)) => (s, t, p, d),
                (s, t, p, d) => {
                    return Err(BuildError::MissingCollaborators(missing(
                        s.is_none(),
                        t.is_none(),
                        p.is_none(),
                        d.is_none(),
                    )));
                }
            };

        let config = self.config;
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let mode = if self.labels.is_some() {
            AdmissionMode::Lifecycle
        } else {
            AdmissionMode::Legacy
        };

        let scheduler = Arc::new(IssueScheduler::new(
            store,
            Arc::clone(&clock),
            config.statement_timeout,
        ));
        let retry = Arc::new(RetryCoordinator::new(
            RetryPolicy::from_config(&config),
            Arc::clone(&clock),
        ));
        let workflow = ContainerWorkflow::new(
            Arc::clone(&scheduler),
            self.labels,
            provisioner,
            delegator,
            Arc::clone(&retry),
            &config,
        );
        let window_start = lookback_start(&config, clock.now());

        Ok(PollingOrchestrator::from_engine(Engine {
            admission: AdmissionRule::new(config.trigger_labels.clone(), mode),
            config,
            clock,
            tracker,
            scheduler,
            retry,
            workflow,
            listeners: CompletionListeners::new(),
            label_window_start: Mutex::new(window_start),
        }))
    }
}

fn missing(store: bool, tracker: bool, provisioner: bool, delegator: bool) -> Vec<&'static str> {
    [
        (store, "store"),
        (tracker, "tracker"),
        (provisioner, "provisioner"),
        (delegator, "delegator"),
    ]
    .into_iter()
    .filter_map(|(absent, name)| absent.then_some(name))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::{InMemoryFleet, InMemoryIssueStore, InMemoryTracker};
    use crate::ports::UlidGenerator;

    #[test]
    fn missing_collaborators_are_all_named() {
        let err = OrchestratorBuilder::new(ForemanConfig::default())
            .store(Arc::new(InMemoryIssueStore::new()))
            .build()
            .err()
            .unwrap();

        let BuildError::MissingCollaborators(names) = err;
        assert_eq!(names, vec!["tracker", "provisioner", "delegator"]);
    }

    #[test]
    fn label_updater_selects_the_admission_mode() {
        let tracker = Arc::new(InMemoryTracker::new(Arc::new(SystemClock)));
        let fleet = Arc::new(InMemoryFleet::new(UlidGenerator::new(SystemClock)));
        let base = || {
            OrchestratorBuilder::new(ForemanConfig::default())
                .store(Arc::new(InMemoryIssueStore::new()))
                .tracker(tracker.clone())
                .provisioner(fleet.clone())
                .delegator(fleet.clone())
        };

        let legacy = base().build().unwrap();
        let lifecycle = base().label_updater(tracker.clone()).build().unwrap();

        assert_eq!(legacy.admission_mode(), AdmissionMode::Legacy);
        assert_eq!(lifecycle.admission_mode(), AdmissionMode::Lifecycle);
        assert!(!lifecycle.status().running);
        assert_eq!(lifecycle.status().interval_ms, 5 * 60 * 1000);
    }
}
