//! Retry coordinator: per-issue attempt bookkeeping.
//!
//! Process-local and ephemeral. It only keeps one process from hot-looping on
//! a failing issue; cross-process exclusion is the store's job.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RetryPolicy;
use crate::domain::IssueId;
use crate::ports::Clock;

/// Retry bookkeeping for one issue.
///
/// Created lazily on the first failure, dropped on success, on escalation and
/// on an external REJECT -> TODO reset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryState {
    pub issue_id: IssueId,

    /// Failures recorded so far (1 after the first failure).
    pub current_attempt: u32,
    pub max_attempts: u32,
    pub last_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl RetryState {
    fn new(issue_id: IssueId, max_attempts: u32, now: DateTime<Utc>) -> Self {
        Self {
            issue_id,
            current_attempt: 0,
            max_attempts,
            last_attempt_at: now,
            last_error: None,
            next_retry_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.is_some_and(|at| at <= now)
    }
}

/// What the caller should do after a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// Try again once `after` has passed.
    Retry { attempt: u32, after: DateTime<Utc> },

    /// Give up: move the issue to REJECT. The state has been discarded.
    Escalate {
        attempts: u32,
        last_error: String,
    },
}

/// Owned by one orchestrator instance; tests build isolated ones.
pub struct RetryCoordinator {
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    states: Mutex<HashMap<IssueId, RetryState>>,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            clock,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn states(&self) -> MutexGuard<'_, HashMap<IssueId, RetryState>> {
        self.states.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_failure(&self, issue_id: IssueId, error: impl Into<String>) -> RetryDecision {
        let now = self.clock.now();
        let error = error.into();
        let mut states = self.states();

        let state = states
            .entry(issue_id)
            .or_insert_with(|| RetryState::new(issue_id, self.policy.max_attempts, now));
        state.current_attempt += 1;
        state.last_attempt_at = now;
        state.last_error = Some(error.clone());

        if self.policy.is_exhausted(state.current_attempt) {
            let attempts = state.current_attempt;
            states.remove(&issue_id);
            return RetryDecision::Escalate {
                attempts,
                last_error: error,
            };
        }

        let delay = self.policy.next_delay(state.current_attempt);
        let after = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        state.next_retry_at = Some(after);
        RetryDecision::Retry {
            attempt: state.current_attempt,
            after,
        }
    }

    pub fn record_success(&self, issue_id: IssueId) {
        self.states().remove(&issue_id);
    }

    /// Forget an issue (external REJECT -> TODO reset).
    pub fn reset(&self, issue_id: IssueId) {
        self.states().remove(&issue_id);
    }

    /// States whose `next_retry_at <= now`, in no particular order.
    pub fn due_for_retry(&self, now: DateTime<Utc>) -> Vec<RetryState> {
        self.states()
            .values()
            .filter(|s| s.is_due(now))
            .cloned()
            .collect()
    }

    pub fn get(&self, issue_id: IssueId) -> Option<RetryState> {
        self.states().get(&issue_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.states().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states().is_empty()
    }
}
