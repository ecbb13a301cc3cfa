//! Lifecycle state machine - issue ラベルの遷移
//!
//! 純粋なロジックのみ: ラベルの移動が正当かどうか、移動後のラベル集合がどうなるかを決める。
//! tracker への適用は呼び出し側の仕事（`app::workflow` を参照）。

use crate::domain::{Issue, LifecycleLabel};
use crate::error::ForemanError;

/// Allowed successors of each lifecycle label.
///
/// - TODO -> WIP | REJECT
/// - WIP -> CONFIRM_NEEDED | REJECT
/// - CONFIRM_NEEDED -> DONE | WIP | REJECT
/// - DONE -> (nothing)
/// - REJECT -> TODO
pub fn successors(from: LifecycleLabel) -> &'static [LifecycleLabel] {
    use crate::domain::LifecycleLabel::{ConfirmNeeded, Done, Reject, Todo, Wip};
    match from {
        Todo => &[Wip, Reject],
        Wip => &[ConfirmNeeded, Reject],
        ConfirmNeeded => &[Done, Wip, Reject],
        Done => &[],
        Reject => &[Todo],
    }
}

/// Entry points for an issue that carries no lifecycle label yet.
const ENTRY_POINTS: [LifecycleLabel; 2] = [LifecycleLabel::Todo, LifecycleLabel::Wip];

/// A validated label move, ready to be sent to the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub from: Option<LifecycleLabel>,
    pub to: LifecycleLabel,

    /// Label set after the move: every lifecycle label removed, `to` appended.
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LifecycleStateMachine;

impl LifecycleStateMachine {
    pub fn new() -> Self {
        Self
    }

    pub fn is_valid_transition(&self, from: Option<LifecycleLabel>, to: LifecycleLabel) -> bool {
        match from {
            Some(from) => successors(from).contains(&to),
            None => ENTRY_POINTS.contains(&to),
        }
    }

    pub fn current_label(&self, issue: &Issue) -> Option<LifecycleLabel> {
        issue.lifecycle_label()
    }

    /// Validate a move of `issue` to `to` and compute the resulting label set.
    pub fn plan(&self, issue: &Issue, to: LifecycleLabel) -> Result<TransitionPlan, ForemanError> {
        let from = self.current_label(issue);
        if !self.is_valid_transition(from, to) {
            return Err(ForemanError::TransitionRejected { from, to });
        }

        let mut labels: Vec<String> = issue
            .labels
            .iter()
            .filter(|l| !LifecycleLabel::is_lifecycle(l))
            .cloned()
            .collect();
        labels.push(to.as_str().to_string());

        Ok(TransitionPlan { from, to, labels })
    }
}
