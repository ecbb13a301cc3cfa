//! IssueStore port - issue テーブル（source of truth）
//!
//! Store が管理するもの:
//! - これまでに見たすべての issue の永続化された射影（`IssueRecord`）
//! - 行ロックによるプロセス間の排他
//!
//! # 設計原則
//! - 次の issue の選択は 1 トランザクション内で行い、対象の行をすべて
//!   即時失敗のロックで押さえる（SQL でいう `FOR UPDATE NOWAIT`）
//! - ロック競合は専用のエラー（`LockNotAvailable`）で、timeout とは区別する
//! - 行は削除しない

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{ContainerId, Issue, IssueId, IssueRecord, LifecycleLabel};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A targeted row is already locked by another scheduling pass.
    #[error("row lock not available")]
    LockNotAvailable,

    #[error("statement timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("transaction already finished")]
    TransactionClosed,

    #[error("store backend error: {0}")]
    Backend(String),
}

/// StoreTransaction は開いているトランザクション 1 つ
///
/// `commit` せずに drop すると rollback され、ロックはすべて解放される。
#[async_trait]
pub trait StoreTransaction: Send {
    /// Lock every row whose lifecycle label is in `labels`, without waiting.
    ///
    /// Returns the locked rows ordered by project, then creation time.
    /// Fails with `StoreError::LockNotAvailable` if any target row is held by
    /// another transaction.
    async fn lock_rows_nowait(
        &mut self,
        labels: &[LifecycleLabel],
    ) -> Result<Vec<IssueRecord>, StoreError>;

    /// Set `processed_at = now` on rows locked by this transaction.
    async fn stamp_processed(
        &mut self,
        issue_ids: &[IssueId],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait IssueStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Insert on first sighting, otherwise refresh the label snapshot.
    ///
    /// `processed_at` and `container_id` of an existing row are left alone.
    async fn upsert_issue(&self, issue: &Issue) -> Result<IssueRecord, StoreError>;

    /// Upsert by issue identity, stamp `processed_at = now`, set the container
    /// if one is given.
    async fn mark_processed(
        &self,
        issue: &Issue,
        container_id: Option<&ContainerId>,
        now: DateTime<Utc>,
    ) -> Result<IssueRecord, StoreError>;

    /// `processed_at = created_at`, `container_id = NULL`.
    async fn reset_processed_time(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<IssueRecord>, StoreError>;

    /// Replace the label snapshot of a known issue.
    async fn update_labels(
        &self,
        issue_id: IssueId,
        labels: &[String],
    ) -> Result<Option<IssueRecord>, StoreError>;

    async fn find_by_external_id(
        &self,
        issue_id: IssueId,
    ) -> Result<Option<IssueRecord>, StoreError>;

    async fn find_by_container_id(
        &self,
        container_id: &ContainerId,
    ) -> Result<Option<IssueRecord>, StoreError>;

    /// Latest `processed_at` over all rows, `None` when the table is empty.
    async fn last_check_time(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
}
