//! Investigation outcome types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::finding::{clamp_confidence, Finding};
use crate::domain::query::InvestigationMode;

/// Terminal status of an investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CouncilStatus {
    /// Complete, undegraded result.
    Success,
    /// Degraded but usable: timeouts, cancellation, failed workers, or synthesis failure.
    Partial,
    /// No usable evidence at all.
    Failure,
}

impl std::fmt::Display for CouncilStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CouncilStatus::Success => "success",
            CouncilStatus::Partial => "partial",
            CouncilStatus::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// Why an investigation stopped before its pipeline finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interruption {
    /// External abort (user, budget exhaustion).
    Cancelled,
    /// Global per-investigation timeout elapsed.
    DeadlineExceeded,
}

impl std::fmt::Display for Interruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Interruption::Cancelled => "cancelled",
            Interruption::DeadlineExceeded => "investigation deadline exceeded",
        };
        f.write_str(s)
    }
}

/// One entry of the convergence log, appended after every round.
///
/// Observability only: nothing reads these back to make control decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    pub round_index: u32,
    /// Current minus previous aggregate confidence.
    pub confidence_delta: f64,
    pub duration_ms: u64,
    pub contradiction_count: usize,
    pub gap_count: usize,
    /// The round's synthesis failed even after retry.
    pub synthesis_failed: bool,
}

/// The typed outcome of every investigation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilResult {
    pub investigation_id: Uuid,
    pub mode: InvestigationMode,
    pub narrative: String,
    aggregate_confidence: f64,
    pub contributing_findings: Vec<Finding>,
    pub round_count: u32,
    pub status: CouncilStatus,
    #[serde(default)]
    pub convergence_history: Vec<ConvergenceRecord>,
    #[serde(default)]
    pub interruption: Option<Interruption>,
    pub completed_at: DateTime<Utc>,
}

impl CouncilResult {
    /// Build a result; `aggregate_confidence` is clamped into `[0.0, 1.0]`.
    pub fn new(
        investigation_id: Uuid,
        mode: InvestigationMode,
        narrative: impl Into<String>,
        aggregate_confidence: f64,
        contributing_findings: Vec<Finding>,
        round_count: u32,
        status: CouncilStatus,
    ) -> Self {
        Self {
            investigation_id,
            mode,
            narrative: narrative.into(),
            aggregate_confidence: clamp_confidence(aggregate_confidence),
            contributing_findings,
            round_count,
            status,
            convergence_history: Vec::new(),
            interruption: None,
            completed_at: Utc::now(),
        }
    }

    pub fn aggregate_confidence(&self) -> f64 {
        self.aggregate_confidence
    }

    pub fn with_status(mut self, status: CouncilStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_history(mut self, history: Vec<ConvergenceRecord>) -> Self {
        self.convergence_history = history;
        self
    }

    pub fn with_interruption(mut self, interruption: Interruption) -> Self {
        self.interruption = Some(interruption);
        self.status = CouncilStatus::Partial;
        self
    }

    pub fn with_round_count(mut self, round_count: u32) -> Self {
        self.round_count = round_count;
        self
    }

    /// Number of findings that carry evidence.
    pub fn usable_count(&self) -> usize {
        self.contributing_findings
            .iter()
            .filter(|f| f.is_usable())
            .count()
    }
}
