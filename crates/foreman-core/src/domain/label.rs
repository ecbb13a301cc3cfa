//! Lifecycle labels: the orchestration status carried on an issue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of an issue, stored on the tracker as a plain label.
///
/// State transitions (see `lifecycle`):
/// - TODO -> WIP -> CONFIRM_NEEDED -> DONE
/// - CONFIRM_NEEDED -> WIP (sent back for more work)
/// - any non-terminal -> REJECT -> TODO (manual reset)
///
/// An issue carrying none of these labels is outside the managed lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleLabel {
    Todo,
    Wip,
    ConfirmNeeded,
    Done,
    Reject,
}

impl LifecycleLabel {
    pub const ALL: [LifecycleLabel; 5] = [
        LifecycleLabel::Todo,
        LifecycleLabel::Wip,
        LifecycleLabel::ConfirmNeeded,
        LifecycleLabel::Done,
        LifecycleLabel::Reject,
    ];

    /// Labels that make a row a candidate for the scheduling lock.
    pub const ACTIVE: [LifecycleLabel; 3] = [
        LifecycleLabel::Todo,
        LifecycleLabel::Wip,
        LifecycleLabel::ConfirmNeeded,
    ];

    /// The label text as it appears on the tracker.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleLabel::Todo => "TODO",
            LifecycleLabel::Wip => "WIP",
            LifecycleLabel::ConfirmNeeded => "CONFIRM_NEEDED",
            LifecycleLabel::Done => "DONE",
            LifecycleLabel::Reject => "REJECT",
        }
    }

    /// Does an issue in this state keep its project busy?
    pub fn is_blocking(self) -> bool {
        matches!(self, LifecycleLabel::Wip | LifecycleLabel::ConfirmNeeded)
    }

    /// Extract "the" lifecycle label from a free-form label set.
    ///
    /// First match in label order wins; `None` means the issue is not managed.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Option<LifecycleLabel> {
        labels.iter().find_map(|l| l.as_ref().parse().ok())
    }

    /// Is `label` one of the lifecycle labels?
    pub fn is_lifecycle(label: &str) -> bool {
        label.parse::<LifecycleLabel>().is_ok()
    }
}

impl fmt::Display for LifecycleLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a lifecycle label: {0}")]
pub struct UnknownLabel(pub String);

impl FromStr for LifecycleLabel {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LifecycleLabel::ALL
            .into_iter()
            .find(|l| l.as_str() == s)
            .ok_or_else(|| UnknownLabel(s.to_string()))
    }
}
