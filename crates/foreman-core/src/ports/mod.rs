//! Ports - 外部 collaborator との境界
//!
//! Hexagonal 構成: 各 trait が 1 つの外部システム（issue テーブル、tracker、
//! container fleet、agent endpoint）を隠蔽する。core はこれらとだけ話す。
//!
//! # 原則
//! - プロセス間の排他は issue テーブルが唯一の source of truth
//! - それ以外（retry の記録、listeners）はプロセスローカル

pub mod clock;
pub mod delegation;
pub mod id_generator;
pub mod issue_store;
pub mod provisioning;
pub mod tracker;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::delegation::{DelegatedTask, DelegationError, DelegationPayload, TaskDelegator};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::issue_store::{IssueStore, StoreError, StoreTransaction};
pub use self::provisioning::{ProvisionError, Provisioner};
pub use self::tracker::{IssueTracker, LabelUpdater, TrackerError};
