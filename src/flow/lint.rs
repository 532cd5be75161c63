//! Re-entrancy lint
//!
//! A node that suspends in `wait_user_input` re-executes from its start on
//! resume. Anything it did before the wait (state writes, dispatched
//! responses) happens again. The lint records such nodes as they run.

use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A node that reached a suspension point after side effects
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReentrancyFinding {
    pub node: String,
    /// State mutations made before the wait in the same execution
    pub mutations: usize,
    /// Responses dispatched before the wait in the same execution
    pub dispatches: usize,
}

/// Findings of one runner, at most one per node
#[derive(Debug, Default)]
pub struct ReentrancyLint {
    findings: Mutex<Vec<ReentrancyFinding>>,
}

impl ReentrancyLint {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ReentrancyFinding>> {
        self.findings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a finding. Returns false if the node was already flagged.
    pub fn record(&self, finding: ReentrancyFinding) -> bool {
        let mut findings = self.lock();
        if findings.iter().any(|f| f.node == finding.node) {
            return false;
        }
        tracing::warn!(
            node = %finding.node,
            mutations = finding.mutations,
            dispatches = finding.dispatches,
            "Node waits for user input after side effects; they repeat when the node resumes"
        );
        findings.push(finding);
        true
    }

    pub fn findings(&self) -> Vec<ReentrancyFinding> {
        self.lock().clone()
    }

    pub fn is_clean(&self) -> bool {
        self.lock().is_empty()
    }
}
