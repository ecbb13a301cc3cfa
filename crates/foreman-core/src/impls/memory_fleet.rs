//! In-memory container fleet: provisioning and task delegation (tests, demo).
//!
//! Failures are injected with counters ("fail the next n calls") so tests can
//! walk an issue through retry and escalation.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ContainerId;
use crate::ports::{
    DelegatedTask, DelegationError, DelegationPayload, IdGenerator, ProvisionError, Provisioner,
    TaskDelegator,
};

#[derive(Default)]
struct FleetState {
    created: Vec<(String, ContainerId)>,
    delegated: Vec<(ContainerId, DelegationPayload)>,
    create_calls: usize,

    fail_creates: u32,
    decline_creates: u32,
    not_ready: u32,
    reject_delegations: u32,
}

/// Take one from a failure counter.
fn consume(counter: &mut u32) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

pub struct InMemoryFleet {
    ids: Box<dyn IdGenerator>,
    state: Mutex<FleetState>,
}

impl InMemoryFleet {
    pub fn new(ids: impl IdGenerator + 'static) -> Self {
        Self {
            ids: Box::new(ids),
            state: Mutex::new(FleetState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `n` create calls fail with a backend error.
    pub fn fail_next_creates(&self, n: u32) {
        self.state().fail_creates = n;
    }

    /// The next `n` create calls return no unit.
    pub fn decline_next_creates(&self, n: u32) {
        self.state().decline_creates = n;
    }

    /// The next `n` readiness waits time out.
    pub fn time_out_next_readiness(&self, n: u32) {
        self.state().not_ready = n;
    }

    pub fn reject_next_delegations(&self, n: u32) {
        self.state().reject_delegations = n;
    }

    /// Every create call, successful or not.
    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    /// Units actually created: (owner key, container id).
    pub fn created(&self) -> Vec<(String, ContainerId)> {
        self.state().created.clone()
    }

    pub fn delegations(&self) -> Vec<(ContainerId, DelegationPayload)> {
        self.state().delegated.clone()
    }
}

#[async_trait]
impl Provisioner for InMemoryFleet {
    async fn create_compute_unit(
        &self,
        owner_key: &str,
    ) -> Result<Option<ContainerId>, ProvisionError> {
        let mut state = self.state();
        state.create_calls += 1;
        if consume(&mut state.fail_creates) {
            return Err(ProvisionError::Backend(format!(
                "injected failure creating unit for {owner_key}"
            )));
        }
        if consume(&mut state.decline_creates) {
            return Ok(None);
        }

        let id = self.ids.generate_container_id();
        state.created.push((owner_key.to_string(), id.clone()));
        Ok(Some(id))
    }

    async fn wait_until_ready(
        &self,
        container_id: &ContainerId,
        _timeout: Duration,
    ) -> Result<bool, ProvisionError> {
        let mut state = self.state();
        if !state.created.iter().any(|(_, id)| id == container_id) {
            return Err(ProvisionError::Backend(format!(
                "unknown unit {container_id}"
            )));
        }
        Ok(!consume(&mut state.not_ready))
    }
}

#[async_trait]
impl TaskDelegator for InMemoryFleet {
    async fn delegate(
        &self,
        container_id: &ContainerId,
        payload: &DelegationPayload,
    ) -> Result<DelegatedTask, DelegationError> {
        let mut state = self.state();
        if consume(&mut state.reject_delegations) {
            return Err(DelegationError::Rejected(format!(
                "{container_id} refused the task"
            )));
        }
        state
            .delegated
            .push((container_id.clone(), payload.clone()));
        Ok(DelegatedTask {
            task_id: self.ids.generate_task_id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{SystemClock, UlidGenerator};

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let fleet = InMemoryFleet::new(UlidGenerator::new(SystemClock));
        fleet.fail_next_creates(1);
        fleet.decline_next_creates(1);

        assert!(fleet.create_compute_unit("10-1").await.is_err());
        assert_eq!(fleet.create_compute_unit("10-1").await.unwrap(), None);
        let id = fleet.create_compute_unit("10-1").await.unwrap().unwrap();

        assert_eq!(fleet.create_calls(), 3);
        assert_eq!(fleet.created(), vec![("10-1".to_string(), id.clone())]);

        fleet.time_out_next_readiness(1);
        assert!(!fleet.wait_until_ready(&id, Duration::from_secs(1)).await.unwrap());
        assert!(fleet.wait_until_ready(&id, Duration::from_secs(1)).await.unwrap());
    }

    #[tokio::test]
    async fn readiness_of_unknown_unit_is_an_error() {
        let fleet = InMemoryFleet::new(UlidGenerator::new(SystemClock));
        let err = fleet
            .wait_until_ready(&ContainerId::new("ctr-nope"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::Backend(_)));
    }
}
