//! IssueScheduler - project ごとに次の issue を原子的に選ぶ
//!
//! # 排他ルール
//! - 1 project で同時に処理中（WIP / CONFIRM_NEEDED / 選択直後の TODO）の issue は最大 1 件
//! - この排他は store の行ロックで保証する。プロセス内の仕組みには頼らない

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::domain::{ContainerId, Issue, IssueId, IssueRecord, LifecycleLabel, ProjectId};
use crate::error::ForemanError;
use crate::ports::{Clock, IssueStore, StoreError, StoreTransaction};

/// Result of one selection pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectionOutcome {
    /// Rows admitted this pass, `processed_at` already stamped.
    Selected(Vec<IssueRecord>),

    /// Another scheduler holds the locks; try again next cycle.
    Contended,
}

impl SelectionOutcome {
    pub fn into_selected(self) -> Vec<IssueRecord> {
        match self {
            SelectionOutcome::Selected(rows) => rows,
            SelectionOutcome::Contended => Vec::new(),
        }
    }
}

/// Pick the oldest TODO of every project that has nothing in flight.
///
/// Works on the locked snapshot only. Every TODO row is a candidate, stamped
/// or not, so an oldest TODO keeps its project held until it leaves TODO.
/// Output is ordered by project.
pub fn select_per_project(snapshot: &[IssueRecord]) -> Vec<IssueRecord> {
    #[derive(Default)]
    struct ProjectView<'a> {
        blocking: usize,
        oldest_todo: Option<&'a IssueRecord>,
    }

    let mut projects: BTreeMap<ProjectId, ProjectView<'_>> = BTreeMap::new();
    for row in snapshot {
        let view = projects.entry(row.project_id).or_default();
        match row.lifecycle_label() {
            Some(label) if label.is_blocking() => view.blocking += 1,
            Some(LifecycleLabel::Todo) => {
                let older = view
                    .oldest_todo
                    .is_none_or(|cur| (row.created_at, row.issue_id) < (cur.created_at, cur.issue_id));
                if older {
                    view.oldest_todo = Some(row);
                }
            }
            _ => {}
        }
    }

    projects
        .into_values()
        .filter(|view| view.blocking == 0)
        .filter_map(|view| view.oldest_todo.cloned())
        .collect()
}

pub struct IssueScheduler {
    store: Arc<dyn IssueStore>,
    clock: Arc<dyn Clock>,
    statement_timeout: Duration,
}

impl IssueScheduler {
    pub fn new(store: Arc<dyn IssueStore>, clock: Arc<dyn Clock>, statement_timeout: Duration) -> Self {
        Self {
            store,
            clock,
            statement_timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn IssueStore> {
        &self.store
    }

    /// Bound one statement by the configured timeout.
    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.statement_timeout, fut)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.statement_timeout)))
    }

    /// Select the next processable issues in one transaction.
    ///
    /// # Flow
    /// 1. Lock every TODO / WIP / CONFIRM_NEEDED row, NOWAIT.
    /// 2. Per project: count blocking rows, collect TODO candidates.
    /// 3. Unblocked projects admit their oldest TODO.
    /// 4. Stamp `processed_at` on the admitted rows and commit.
    ///
    /// Contention is `Ok(SelectionOutcome::Contended)`, not an error.
    #[instrument(skip(self))]
    pub async fn select_processable_issues(&self) -> Result<SelectionOutcome, ForemanError> {
        let mut tx = self.bounded(self.store.begin()).await?;

        let snapshot = match self
            .bounded(tx.lock_rows_nowait(&LifecycleLabel::ACTIVE))
            .await
        {
            Ok(rows) => rows,
            Err(StoreError::LockNotAvailable) => {
                debug!("issue rows locked by another scheduler, skipping this cycle");
                rollback_quietly(tx).await;
                return Ok(SelectionOutcome::Contended);
            }
            Err(err) => {
                rollback_quietly(tx).await;
                return Err(err.into());
            }
        };

        let mut selected = select_per_project(&snapshot);
        let now = self.clock.now();

        if !selected.is_empty() {
            let ids: Vec<IssueId> = selected.iter().map(|r| r.issue_id).collect();
            if let Err(err) = self.bounded(tx.stamp_processed(&ids, now)).await {
                rollback_quietly(tx).await;
                return Err(err.into());
            }
        }
        self.bounded(tx.commit()).await?;

        for row in &mut selected {
            row.processed_at = now;
        }
        info!(
            locked = snapshot.len(),
            selected = selected.len(),
            "selection pass committed"
        );
        Ok(SelectionOutcome::Selected(selected))
    }

    pub async fn mark_processed(
        &self,
        issue: &Issue,
        container_id: Option<&ContainerId>,
    ) -> Result<IssueRecord, ForemanError> {
        let now = self.clock.now();
        Ok(self.store.mark_processed(issue, container_id, now).await?)
    }

    pub async fn reset_processed_time(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<IssueRecord>, ForemanError> {
        Ok(self.store.reset_processed_time(issue_id).await?)
    }

    /// Refresh the label snapshot of a known row. Unknown issues are ignored.
    pub async fn sync_labels(
        &self,
        issue_id: IssueId,
        labels: &[String],
    ) -> Result<Option<IssueRecord>, ForemanError> {
        Ok(self.store.update_labels(issue_id, labels).await?)
    }

    pub async fn find_by_external_id(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<IssueRecord>, ForemanError> {
        Ok(self.store.find_by_external_id(issue_id).await?)
    }

    pub async fn find_by_container_id(
        &self,
        container_id: &ContainerId,
    ) -> Result<Option<IssueRecord>, ForemanError> {
        Ok(self.store.find_by_container_id(container_id).await?)
    }
}

async fn rollback_quietly(tx: Box<dyn StoreTransaction>) {
    if let Err(err) = tx.rollback().await {
        warn!(error = %err, "rollback failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IssueIid, IssueState};
    use crate::impls::InMemoryIssueStore;
    use crate::ports::FixedClock;
    use chrono::{DateTime, TimeZone, Utc};
    use rstest::rstest;

    fn t(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, minute, 0).unwrap()
    }

    fn issue(id: u64, project: u64, created_minute: u32, labels: &[&str]) -> Issue {
        Issue {
            id: IssueId::new(id),
            project_id: ProjectId::new(project),
            iid: IssueIid::new(id),
            title: format!("issue {id}"),
            description: String::new(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            state: IssueState::Opened,
            confidential: false,
            created_at: t(created_minute),
            updated_at: t(created_minute),
        }
    }

    fn row(id: u64, project: u64, created_minute: u32, label: &str) -> IssueRecord {
        IssueRecord::first_sighting(&issue(id, project, created_minute, &[label]))
    }

    fn processed(mut record: IssueRecord) -> IssueRecord {
        record.processed_at = t(59);
        record
    }

    fn ids(rows: &[IssueRecord]) -> Vec<u64> {
        rows.iter().map(|r| r.issue_id.get()).collect()
    }

    #[rstest]
    #[case::oldest_todo_wins(
        vec![row(2, 10, 5, "TODO"), row(1, 10, 1, "TODO")],
        vec![1]
    )]
    #[case::wip_blocks_project(
        vec![row(1, 10, 1, "TODO"), row(2, 10, 2, "WIP")],
        vec![]
    )]
    #[case::confirm_needed_blocks_project(
        vec![row(1, 10, 1, "CONFIRM_NEEDED"), row(2, 10, 2, "TODO")],
        vec![]
    )]
    #[case::one_per_unblocked_project(
        vec![
            row(1, 10, 3, "TODO"),
            row(2, 10, 1, "TODO"),
            row(3, 20, 2, "TODO"),
            row(4, 30, 1, "WIP"),
            row(5, 30, 0, "TODO"),
        ],
        vec![2, 3]
    )]
    #[case::creation_tie_breaks_on_id(
        vec![row(9, 10, 1, "TODO"), row(4, 10, 1, "TODO")],
        vec![4]
    )]
    #[case::stamped_todo_stays_a_candidate(
        vec![processed(row(1, 10, 1, "TODO")), row(2, 10, 2, "TODO")],
        vec![1]
    )]
    #[case::empty(vec![], vec![])]
    fn selection_rule(#[case] snapshot: Vec<IssueRecord>, #[case] expected: Vec<u64>) {
        assert_eq!(ids(&select_per_project(&snapshot)), expected);
    }

    async fn seeded(issues: &[Issue]) -> (Arc<InMemoryIssueStore>, Arc<FixedClock>, IssueScheduler) {
        let store = Arc::new(InMemoryIssueStore::new());
        for i in issues {
            store.upsert_issue(i).await.unwrap();
        }
        let clock = Arc::new(FixedClock::new(t(30)));
        let scheduler = IssueScheduler::new(store.clone(), clock.clone(), Duration::from_secs(10));
        (store, clock, scheduler)
    }

    #[tokio::test]
    async fn selection_stamps_processed_at_and_returns_new_value() {
        let (store, clock, scheduler) =
            seeded(&[issue(1, 10, 1, &["TODO", "bot"]), issue(2, 10, 2, &["TODO", "bot"])]).await;

        let selected = scheduler
            .select_processable_issues()
            .await
            .unwrap()
            .into_selected();

        assert_eq!(ids(&selected), vec![1]);
        assert_eq!(selected[0].processed_at, clock.now());

        let stored = store.find_by_external_id(IssueId::new(1)).await.unwrap().unwrap();
        assert_eq!(stored.processed_at, clock.now());
        let untouched = store.find_by_external_id(IssueId::new(2)).await.unwrap().unwrap();
        assert_eq!(untouched.processed_at, t(2));
    }

    #[tokio::test]
    async fn contention_is_reported_not_raised() {
        let (store, _clock, scheduler) = seeded(&[issue(1, 10, 1, &["TODO"])]).await;

        let mut other = store.begin().await.unwrap();
        other.lock_rows_nowait(&LifecycleLabel::ACTIVE).await.unwrap();

        let outcome = scheduler.select_processable_issues().await.unwrap();
        assert_eq!(outcome, SelectionOutcome::Contended);

        other.commit().await.unwrap();
        let outcome = scheduler.select_processable_issues().await.unwrap();
        assert_eq!(ids(&outcome.into_selected()), vec![1]);
    }

    #[tokio::test]
    async fn reset_after_selection_restores_the_record() {
        let (store, _clock, scheduler) = seeded(&[issue(1, 10, 1, &["TODO"])]).await;
        let before = store.find_by_external_id(IssueId::new(1)).await.unwrap().unwrap();

        scheduler.select_processable_issues().await.unwrap();
        let after = scheduler.reset_processed_time(IssueId::new(1)).await.unwrap().unwrap();

        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn mark_processed_is_idempotent() {
        let (store, _clock, scheduler) = seeded(&[]).await;
        let i = issue(1, 10, 1, &["TODO"]);
        let ctr = ContainerId::new("ctr-1");

        let once = scheduler.mark_processed(&i, Some(&ctr)).await.unwrap();
        let twice = scheduler.mark_processed(&i, Some(&ctr)).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(store.find_by_container_id(&ctr).await.unwrap(), Some(twice));
    }
}
