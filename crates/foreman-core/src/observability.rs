//! Status views: what a cycle did and what the orchestrator is doing now.

use serde::{Deserialize, Serialize};

/// Counters for one polling cycle (discovery and sweep merged).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Issues returned by the tracker since the last check.
    pub discovered: usize,
    /// Already stored under a non-TODO label, or still owned by a retry.
    pub skipped: usize,
    pub not_admitted: usize,
    pub selected: usize,
    pub delegated: usize,
    pub retry_scheduled: usize,
    pub escalated: usize,
    pub completions: usize,
    pub resets: usize,
    /// Due retries re-run this cycle.
    pub retried: usize,
    /// Selection skipped because another scheduler held the locks.
    pub contended: bool,
    pub errors: Vec<String>,
}

impl CycleReport {
    pub fn merge(&mut self, other: CycleReport) {
        self.discovered += other.discovered;
        self.skipped += other.skipped;
        self.not_admitted += other.not_admitted;
        self.selected += other.selected;
        self.delegated += other.delegated;
        self.retry_scheduled += other.retry_scheduled;
        self.escalated += other.escalated;
        self.completions += other.completions;
        self.resets += other.resets;
        self.retried += other.retried;
        self.contended |= other.contended;
        self.errors.extend(other.errors);
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub interval_ms: u64,
    pub pending_retries: usize,
    pub listeners: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_counters_and_keeps_errors() {
        let mut a = CycleReport {
            discovered: 2,
            selected: 1,
            errors: vec!["tracker down".into()],
            ..CycleReport::default()
        };
        let b = CycleReport {
            completions: 1,
            contended: true,
            errors: vec!["store down".into()],
            ..CycleReport::default()
        };

        a.merge(b);

        assert_eq!(a.discovered, 2);
        assert_eq!(a.completions, 1);
        assert!(a.contended);
        assert_eq!(a.errors, vec!["tracker down", "store down"]);
        assert!(!a.is_clean());
    }

    #[test]
    fn status_serializes_with_snake_case_fields() {
        let status = OrchestratorStatus {
            running: true,
            interval_ms: 300_000,
            pending_retries: 0,
            listeners: 1,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["interval_ms"], 300_000);
        assert_eq!(json["running"], true);
    }
}
