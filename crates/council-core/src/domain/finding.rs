//! Findings and critique reports: the per-round evidence exchanged on the bus.

use serde::{Deserialize, Serialize};

use crate::domain::query::SignalType;

/// Clamp a proposed confidence into `[0.0, 1.0]`. NaN becomes `0.0`.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Stable identifier of a worker; its reserved key on the evidence bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        WorkerId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SignalType> for WorkerId {
    fn from(signal: SignalType) -> Self {
        WorkerId(signal.as_str().to_string())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a worker concluded about its own domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    /// The domain shows something wrong.
    Anomalous,
    /// The domain looks normal.
    Healthy,
    /// Not enough evidence either way.
    Inconclusive,
}

impl Stance {
    /// `true` when the two stances assert opposite things.
    pub fn opposes(self, other: Stance) -> bool {
        matches!(
            (self, other),
            (Stance::Anomalous, Stance::Healthy) | (Stance::Healthy, Stance::Anomalous)
        )
    }
}

/// Why a finding is a failure placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Tool or reasoning call failed, or the worker task panicked.
    Execution,
    /// The worker's output did not match the required schema.
    InvalidOutput,
    /// The per-worker timeout elapsed.
    Timeout,
    /// The investigation was cancelled or hit its deadline mid-round.
    Cancelled,
}

impl FailureKind {
    /// Timeouts and cancellations say "we ran out of time", not "there is no evidence".
    pub fn is_time_bound(self) -> bool {
        matches!(self, FailureKind::Timeout | FailureKind::Cancelled)
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Execution => "execution error",
            FailureKind::InvalidOutput => "invalid output",
            FailureKind::Timeout => "timed out",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A confidence-scored conclusion produced by exactly one worker in one round.
///
/// Fields are private; a finding is built once through [`Finding::new`] or
/// [`Finding::failed_with`] and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    worker_id: WorkerId,
    summary: String,
    confidence: f64,
    evidence_refs: Vec<String>,
    stance: Stance,
    failed: bool,
    failure: Option<FailureKind>,
    round_index: u32,
}

impl Finding {
    /// A successful finding. `confidence` is clamped into `[0.0, 1.0]`.
    pub fn new(
        worker_id: WorkerId,
        round_index: u32,
        summary: impl Into<String>,
        confidence: f64,
        stance: Stance,
        evidence_refs: Vec<String>,
    ) -> Self {
        Self {
            worker_id,
            summary: summary.into(),
            confidence: clamp_confidence(confidence),
            evidence_refs,
            stance,
            failed: false,
            failure: None,
            round_index,
        }
    }

    /// A failure placeholder: confidence 0, `failed = true`.
    pub fn failed_with(
        worker_id: WorkerId,
        round_index: u32,
        kind: FailureKind,
        detail: impl std::fmt::Display,
    ) -> Self {
        Self {
            summary: format!("{worker_id} worker {kind}: {detail}"),
            worker_id,
            confidence: 0.0,
            evidence_refs: Vec::new(),
            stance: Stance::Inconclusive,
            failed: true,
            failure: Some(kind),
            round_index,
        }
    }

    pub fn worker_id(&self) -> &WorkerId {
        &self.worker_id
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn evidence_refs(&self) -> &[String] {
        &self.evidence_refs
    }

    pub fn stance(&self) -> Stance {
        self.stance
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.failure
    }

    pub fn round_index(&self) -> u32 {
        self.round_index
    }

    /// Usable findings carry evidence; failure placeholders do not.
    pub fn is_usable(&self) -> bool {
        !self.failed
    }
}

/// Two workers whose findings disagree, as reported by the critic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contradiction {
    pub worker_a: WorkerId,
    pub worker_b: WorkerId,
    pub description: String,
}

impl Contradiction {
    /// Unordered pair key used for de-duplication.
    pub fn pair(&self) -> (WorkerId, WorkerId) {
        if self.worker_a <= self.worker_b {
            (self.worker_a.clone(), self.worker_b.clone())
        } else {
            (self.worker_b.clone(), self.worker_a.clone())
        }
    }
}

/// Critic output for one round: contradictions to resolve and domains to revisit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CritiqueReport {
    #[serde(default)]
    pub contradictions: Vec<Contradiction>,
    #[serde(default)]
    pub gaps: Vec<SignalType>,
    pub round_index: u32,
}

impl CritiqueReport {
    pub fn empty(round_index: u32) -> Self {
        Self {
            contradictions: Vec::new(),
            gaps: Vec::new(),
            round_index,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.contradictions.is_empty() && self.gaps.is_empty()
    }
}
