//! Per-target outcomes for a run

use crate::target::FetchTarget;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    Succeeded,
    Failed,
}

/// What happened to one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub target: FetchTarget,
    pub status: FetchStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl FetchOutcome {
    pub fn succeeded(target: FetchTarget, attempts: u32) -> Self {
        Self {
            target,
            status: FetchStatus::Succeeded,
            attempts,
            last_error: None,
        }
    }

    pub fn failed(target: FetchTarget, attempts: u32, error: impl ToString) -> Self {
        Self {
            target,
            status: FetchStatus::Failed,
            attempts,
            last_error: Some(error.to_string()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == FetchStatus::Failed
    }
}

/// Append-only list of failed targets, owned by the orchestrator.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    entries: Vec<FetchOutcome>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep the outcome if it is a failure; successes leave no entry.
    pub fn record(&mut self, outcome: &FetchOutcome) {
        if outcome.is_failed() {
            self.entries.push(outcome.clone());
        }
    }

    pub fn entries(&self) -> &[FetchOutcome] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// File names of failed targets, e.g. for the end-of-run report
    pub fn filenames(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.target.filename()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_failures_in_order() {
        let mut ledger = Ledger::new();
        assert!(ledger.is_empty());
        ledger.record(&FetchOutcome::failed(FetchTarget::new(25, 3), 3, "HTTP 503: busy"));
        ledger.record(&FetchOutcome::succeeded(FetchTarget::new(25, 2), 1));
        ledger.record(&FetchOutcome::failed(FetchTarget::new(25, 1), 1, "HTTP 404: gone"));

        assert_eq!(ledger.len(), 2);
        assert_eq!(
            ledger.filenames(),
            vec!["pubmed25n0003.xml.gz", "pubmed25n0001.xml.gz"]
        );
        let first = &ledger.entries()[0];
        assert_eq!(first.status, FetchStatus::Failed);
        assert_eq!(first.attempts, 3);
        assert_eq!(first.last_error.as_deref(), Some("HTTP 503: busy"));
    }

    #[test]
    fn success_has_no_error() {
        let outcome = FetchOutcome::succeeded(FetchTarget::new(25, 1), 2);
        assert!(!outcome.is_failed());
        assert!(outcome.last_error.is_none());
    }
}
