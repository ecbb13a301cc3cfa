//! Impls - ports の in-memory 実装（開発・テスト・デモ用）
//!
//! # 内容
//! - **InMemoryIssueStore**: NOWAIT 行ロックつきの issue テーブル
//! - **InMemoryTracker**: label 変更フィードつきの issue tracker
//! - **InMemoryFleet**: container の provisioning と task の delegation
//!
//! 本番用 adapter（SQL store、tracker の HTTP client、fleet API）はこの crate の外にある。

pub mod memory_fleet;
pub mod memory_store;
pub mod memory_tracker;

pub use self::memory_fleet::InMemoryFleet;
pub use self::memory_store::InMemoryIssueStore;
pub use self::memory_tracker::{InMemoryTracker, PostedComment};
