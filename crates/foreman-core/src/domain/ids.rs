//! Domain identifiers（型安全な ID）
//!
//! tracker は issue、project、project 内の issue 番号をすべて素の整数で返す。
//! 取り違え（`get_issue(issue_id, project_id)`）を防ぐため、それぞれ別の型にする。
//!
//! ## Phantom type パターン
//! - `NumericId<T>` が共通実装を持つ
//! - `T` はコンパイル時だけ存在するゼロサイズのマーカー
//! - `IssueId` と `ProjectId` は実装を共有しつつ、互いに代入できない
//!
//! container ID は provisioning 層が発行する不透明な文字列なので、別の newtype にする。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// Marker trait for each numeric ID kind.
///
/// Provides the prefix used by `Display` ("issue-", "project-", "#").
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic numeric ID.
#[repr(transparent)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumericId<T: IdMarker> {
    value: u64,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> NumericId<T> {
    pub const fn new(value: u64) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub const fn get(&self) -> u64 {
        self.value
    }
}

// Manual impls: derives would put bounds on `T`, and the markers are
// uninhabited enums that implement nothing.
impl<T: IdMarker> Clone for NumericId<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: IdMarker> Copy for NumericId<T> {}

impl<T: IdMarker> PartialEq for NumericId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: IdMarker> Eq for NumericId<T> {}

impl<T: IdMarker> std::hash::Hash for NumericId<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdMarker> PartialOrd for NumericId<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: IdMarker> Ord for NumericId<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T: IdMarker> From<u64> for NumericId<T> {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl<T: IdMarker> fmt::Debug for NumericId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

impl<T: IdMarker> fmt::Display for NumericId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

// ========================================
// Markers
// ========================================

/// Global issue identity assigned by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Issue {}

impl IdMarker for Issue {
    fn prefix() -> &'static str {
        "issue-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Project {}

impl IdMarker for Project {
    fn prefix() -> &'static str {
        "project-"
    }
}

/// Project-local issue number (what humans type after `#`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Iid {}

impl IdMarker for Iid {
    fn prefix() -> &'static str {
        "#"
    }
}

pub type IssueId = NumericId<Issue>;
pub type ProjectId = NumericId<Project>;
pub type IssueIid = NumericId<Iid>;

/// Identity of a provisioned compute unit (container).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
