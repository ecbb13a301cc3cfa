//! Admission rule: which discovered issues the orchestrator may take on.

use thiserror::Error;

use crate::domain::{Issue, LifecycleLabel};

/// How lifecycle labels take part in admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionMode {
    /// A label updater is wired: issues must sit at TODO.
    Lifecycle,
    /// No label updater: trigger label, visibility and state only.
    Legacy,
}

/// Why an issue was turned away.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no trigger label")]
    NoTriggerLabel,

    #[error("issue is confidential")]
    Confidential,

    #[error("issue is closed")]
    Closed,

    #[error("lifecycle label is {}", .0.map_or("(none)", LifecycleLabel::as_str))]
    NotReady(Option<LifecycleLabel>),
}

#[derive(Debug, Clone)]
pub struct AdmissionRule {
    trigger_labels: Vec<String>,
    mode: AdmissionMode,
}

impl AdmissionRule {
    pub fn new(trigger_labels: Vec<String>, mode: AdmissionMode) -> Self {
        Self {
            trigger_labels,
            mode,
        }
    }

    pub fn mode(&self) -> AdmissionMode {
        self.mode
    }

    pub fn trigger_labels(&self) -> &[String] {
        &self.trigger_labels
    }

    /// Check `issue` against the rule.
    ///
    /// `retrying` widens the lifecycle check to WIP: a failed attempt usually
    /// leaves the issue there.
    pub fn evaluate(&self, issue: &Issue, retrying: bool) -> Result<(), Rejection> {
        if !self.trigger_labels.iter().any(|l| issue.has_label(l)) {
            return Err(Rejection::NoTriggerLabel);
        }
        if issue.confidential {
            return Err(Rejection::Confidential);
        }
        if !issue.is_open() {
            return Err(Rejection::Closed);
        }

        if self.mode == AdmissionMode::Lifecycle {
            let label = issue.lifecycle_label();
            let ready = match label {
                Some(LifecycleLabel::Todo) => true,
                Some(LifecycleLabel::Wip) => retrying,
                _ => false,
            };
            if !ready {
                return Err(Rejection::NotReady(label));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IssueId, IssueIid, IssueState, ProjectId};
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    fn issue(labels: &[&str], state: IssueState, confidential: bool) -> Issue {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Issue {
            id: IssueId::new(1),
            project_id: ProjectId::new(10),
            iid: IssueIid::new(1),
            title: "t".into(),
            description: String::new(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            state,
            confidential,
            created_at: at,
            updated_at: at,
        }
    }

    fn rule(mode: AdmissionMode) -> AdmissionRule {
        AdmissionRule::new(vec!["bot".into(), "ai".into()], mode)
    }

    #[rstest]
    #[case::todo_with_trigger(&["bot", "TODO"], IssueState::Opened, false, Ok(()))]
    #[case::any_trigger_matches(&["ai", "TODO"], IssueState::Opened, false, Ok(()))]
    #[case::missing_trigger(&["TODO"], IssueState::Opened, false, Err(Rejection::NoTriggerLabel))]
    #[case::confidential(&["bot", "TODO"], IssueState::Opened, true, Err(Rejection::Confidential))]
    #[case::closed(&["bot", "TODO"], IssueState::Closed, false, Err(Rejection::Closed))]
    #[case::no_lifecycle(&["bot"], IssueState::Opened, false, Err(Rejection::NotReady(None)))]
    #[case::wip(
        &["bot", "WIP"],
        IssueState::Opened,
        false,
        Err(Rejection::NotReady(Some(LifecycleLabel::Wip)))
    )]
    fn lifecycle_mode(
        #[case] labels: &[&str],
        #[case] state: IssueState,
        #[case] confidential: bool,
        #[case] expected: Result<(), Rejection>,
    ) {
        let issue = issue(labels, state, confidential);
        assert_eq!(rule(AdmissionMode::Lifecycle).evaluate(&issue, false), expected);
    }

    #[test]
    fn retries_accept_wip_but_not_later_labels() {
        let rule = rule(AdmissionMode::Lifecycle);
        assert!(rule.evaluate(&issue(&["bot", "WIP"], IssueState::Opened, false), true).is_ok());
        assert!(rule.evaluate(&issue(&["bot", "TODO"], IssueState::Opened, false), true).is_ok());
        assert!(
            rule.evaluate(&issue(&["bot", "DONE"], IssueState::Opened, false), true)
                .is_err()
        );
    }

    #[test]
    fn legacy_mode_ignores_lifecycle_labels() {
        let rule = rule(AdmissionMode::Legacy);
        assert!(rule.evaluate(&issue(&["bot"], IssueState::Opened, false), false).is_ok());
        assert_eq!(
            rule.evaluate(&issue(&["bot"], IssueState::Opened, true), false),
            Err(Rejection::Confidential)
        );
    }

    #[test]
    fn rejection_reads_well_in_logs() {
        assert_eq!(
            Rejection::NotReady(Some(LifecycleLabel::Done)).to_string(),
            "lifecycle label is DONE"
        );
        assert_eq!(Rejection::NotReady(None).to_string(), "lifecycle label is (none)");
    }
}
