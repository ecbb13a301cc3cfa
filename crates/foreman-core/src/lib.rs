//! foreman-core
//!
//! Issue スケジューリングとライフサイクル管理の中核。
//! tracker の issue を agent 入りの container に変換する。
//! 1 project あたり同時に処理中の issue は最大 1 件、失敗時は上限付きで retry する。
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, issue, record, lifecycle label, events）
//! - **lifecycle**: ラベル遷移表と state machine
//! - **retry**: backoff ポリシーと issue ごとの retry 管理
//! - **scheduler**: issue store に対する project 単位の原子的な選択
//! - **ports**: 抽象化レイヤー（IssueStore, IssueTracker, Provisioner, TaskDelegator, Clock など）
//! - **app**: アプリケーションロジック（orchestrator, workflow, listeners, builder）
//! - **impls**: in-memory 実装（テスト・デモ用）
//! - **config** / **error** / **observability**: 周辺の基盤

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod lifecycle;
pub mod observability;
pub mod ports;
pub mod retry;
pub mod scheduler;

pub use app::{
    AdmissionMode, CompletionListener, ListenerHandle, OrchestratorBuilder, PollingOrchestrator,
    WorkflowOutcome,
};
pub use config::ForemanConfig;
pub use error::{ErrorKind, ForemanError};
pub use lifecycle::LifecycleStateMachine;
pub use observability::{CycleReport, OrchestratorStatus};
pub use retry::{RetryCoordinator, RetryDecision, RetryPolicy, RetryState};
pub use scheduler::{IssueScheduler, SelectionOutcome};
