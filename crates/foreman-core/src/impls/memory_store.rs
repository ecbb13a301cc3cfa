//! InMemoryIssueStore - issue テーブルの in-memory 版
//!
//! scheduler に必要な範囲でリレーショナルなテーブルを模倣する。
//! - 行はトランザクション単位で NOWAIT ロックされる
//! - トランザクション内の書き込みは commit までバッファされる
//! - drop されたトランザクションは rollback 扱い

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{ContainerId, Issue, IssueId, IssueRecord, LifecycleLabel};
use crate::ports::{IssueStore, StoreError, StoreTransaction};

type TxId = u64;

#[derive(Default)]
struct StoreState {
    /// All rows (never deleted).
    rows: HashMap<IssueId, IssueRecord>,

    /// Row locks: row -> owning transaction.
    locks: HashMap<IssueId, TxId>,

    next_tx: TxId,

    /// Fault injection: every operation fails with a backend error.
    unavailable: bool,
}

impl StoreState {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Backend("store unavailable".to_string()));
        }
        Ok(())
    }

    fn release(&mut self, tx: TxId) {
        self.locks.retain(|_, owner| *owner != tx);
    }
}

fn lock(state: &Mutex<StoreState>) -> MutexGuard<'_, StoreState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct InMemoryIssueStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).unavailable = unavailable;
    }

    pub fn all_records(&self) -> Vec<IssueRecord> {
        let mut rows: Vec<_> = lock(&self.state).rows.values().cloned().collect();
        rows.sort_by_key(|r| r.issue_id);
        rows
    }

    /// Number of rows currently locked by open transactions.
    pub fn locked_rows(&self) -> usize {
        lock(&self.state).locks.len()
    }
}

#[async_trait]
impl IssueStore for InMemoryIssueStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let mut state = lock(&self.state);
        state.check_available()?;
        state.next_tx += 1;
        Ok(Box::new(InMemoryTransaction {
            id: state.next_tx,
            state: Arc::clone(&self.state),
            pending: HashMap::new(),
            finished: false,
        }))
    }

    async fn upsert_issue(&self, issue: &Issue) -> Result<IssueRecord, StoreError> {
        let mut state = lock(&self.state);
        state.check_available()?;
        let record = state
            .rows
            .entry(issue.id)
            .and_modify(|r| r.labels = issue.labels.clone())
            .or_insert_with(|| IssueRecord::first_sighting(issue));
        Ok(record.clone())
    }

    async fn mark_processed(
        &self,
        issue: &Issue,
        container_id: Option<&ContainerId>,
        now: DateTime<Utc>,
    ) -> Result<IssueRecord, StoreError> {
        let mut state = lock(&self.state);
        state.check_available()?;
        let record = state
            .rows
            .entry(issue.id)
            .or_insert_with(|| IssueRecord::first_sighting(issue));
        record.labels = issue.labels.clone();
        record.mark_processed(now, container_id.cloned());
        Ok(record.clone())
    }

    async fn reset_processed_time(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<IssueRecord>, StoreError> {
        let mut state = lock(&self.state);
        state.check_available()?;
        Ok(state.rows.get_mut(&issue_id).map(|r| {
            r.reset_processed_time();
            r.clone()
        }))
    }

    async fn update_labels(
        &self,
        issue_id: IssueId,
        labels: &[String],
    ) -> Result<Option<IssueRecord>, StoreError> {
        let mut state = lock(&self.state);
        state.check_available()?;
        Ok(state.rows.get_mut(&issue_id).map(|r| {
            r.labels = labels.to_vec();
            r.clone()
        }))
    }

    async fn find_by_external_id(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<IssueRecord>, StoreError> {
        let state = lock(&self.state);
        state.check_available()?;
        Ok(state.rows.get(&issue_id).cloned())
    }

    async fn find_by_container_id(
        &self,
        container_id: &ContainerId,
    ) -> Result<Option<IssueRecord>, StoreError> {
        let state = lock(&self.state);
        state.check_available()?;
        Ok(state
            .rows
            .values()
            .find(|r| r.container_id.as_ref() == Some(container_id))
            .cloned())
    }

    async fn last_check_time(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let state = lock(&self.state);
        state.check_available()?;
        Ok(state.rows.values().map(|r| r.processed_at).max())
    }
}

struct InMemoryTransaction {
    id: TxId,
    state: Arc<Mutex<StoreState>>,

    /// Buffered `processed_at` stamps, applied on commit.
    pending: HashMap<IssueId, DateTime<Utc>>,
    finished: bool,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.finished {
            return Err(StoreError::TransactionClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn lock_rows_nowait(
        &mut self,
        labels: &[LifecycleLabel],
    ) -> Result<Vec<IssueRecord>, StoreError> {
        self.ensure_open()?;
        let mut state = lock(&self.state);
        state.check_available()?;

        let targets: Vec<IssueId> = state
            .rows
            .values()
            .filter(|r| r.lifecycle_label().is_some_and(|l| labels.contains(&l)))
            .map(|r| r.issue_id)
            .collect();

        let contended = targets
            .iter()
            .any(|id| state.locks.get(id).is_some_and(|owner| *owner != self.id));
        if contended {
            return Err(StoreError::LockNotAvailable);
        }

        for id in &targets {
            state.locks.insert(*id, self.id);
        }

        let mut snapshot: Vec<IssueRecord> = targets
            .iter()
            .filter_map(|id| state.rows.get(id).cloned())
            .collect();
        snapshot.sort_by_key(|r| (r.project_id, r.created_at, r.issue_id));
        Ok(snapshot)
    }

    async fn stamp_processed(
        &mut self,
        issue_ids: &[IssueId],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.ensure_open()?;
        let state = lock(&self.state);
        state.check_available()?;

        let held: HashSet<&IssueId> = state
            .locks
            .iter()
            .filter(|(_, owner)| **owner == self.id)
            .map(|(id, _)| id)
            .collect();
        if let Some(missing) = issue_ids.iter().find(|id| !held.contains(id)) {
            return Err(StoreError::Backend(format!(
                "{missing} is not locked by this transaction"
            )));
        }
        drop(held);
        drop(state);

        for id in issue_ids {
            self.pending.insert(*id, now);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.ensure_open()?;
        tx.finished = true;

        let mut state = lock(&tx.state);
        let result = state.check_available();
        if result.is_ok() {
            for (id, at) in &tx.pending {
                if let Some(row) = state.rows.get_mut(id) {
                    row.processed_at = *at;
                }
            }
        }
        state.release(tx.id);
        result
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.ensure_open()?;
        tx.finished = true;
        lock(&tx.state).release(tx.id);
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            lock(&self.state).release(self.id);
        }
    }
}
