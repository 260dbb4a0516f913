//! Query vocabulary: signal types, routing tiers, investigation modes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// The five observability domains a worker can specialise in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Trace,
    Metrics,
    Logs,
    Alerts,
    Data,
}

impl SignalType {
    /// Fixed tie-break order: earlier entries win exact score ties.
    pub const PRIORITY: [SignalType; 5] = [
        SignalType::Trace,
        SignalType::Metrics,
        SignalType::Logs,
        SignalType::Alerts,
        SignalType::Data,
    ];

    /// Position in [`SignalType::PRIORITY`] (0 = highest priority).
    pub fn priority_rank(self) -> usize {
        match self {
            SignalType::Trace => 0,
            SignalType::Metrics => 1,
            SignalType::Logs => 2,
            SignalType::Alerts => 3,
            SignalType::Data => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignalType::Trace => "trace",
            SignalType::Metrics => "metrics",
            SignalType::Logs => "logs",
            SignalType::Alerts => "alerts",
            SignalType::Data => "data",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "traces" => Ok(SignalType::Trace),
            "metrics" | "metric" => Ok(SignalType::Metrics),
            "logs" | "log" => Ok(SignalType::Logs),
            "alerts" | "alert" => Ok(SignalType::Alerts),
            "data" => Ok(SignalType::Data),
            other => Err(format!("unknown signal type: {other}")),
        }
    }
}

/// Whether the Council engine runs at all for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingTier {
    /// Answer directly, no tools needed.
    Direct,
    /// Hand to a single non-investigative specialist (admin, config, billing).
    Specialist,
    /// Run the Council engine.
    Council,
}

/// Pipeline shape, meaningful only for [`RoutingTier::Council`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationMode {
    /// One worker, no synthesis.
    Fast,
    /// All workers in parallel, then synthesis.
    Standard,
    /// Standard round followed by the bounded critic loop.
    Debate,
}

impl std::fmt::Display for InvestigationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InvestigationMode::Fast => "fast",
            InvestigationMode::Standard => "standard",
            InvestigationMode::Debate => "debate",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for InvestigationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(InvestigationMode::Fast),
            "standard" => Ok(InvestigationMode::Standard),
            "debate" => Ok(InvestigationMode::Debate),
            other => Err(format!("unknown investigation mode: {other}")),
        }
    }
}

/// Alert severity hint supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Remaining token/time budget for an investigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default)]
    pub remaining_tokens: Option<u64>,
    #[serde(default)]
    pub remaining_secs: Option<u64>,
    /// Caller's estimate of the fraction of budget still available (0.0–1.0).
    #[serde(default)]
    pub fraction_remaining: Option<f64>,
}

impl Budget {
    /// Wall-clock the caller still allows, if it said.
    pub fn time_limit(&self) -> Option<Duration> {
        self.remaining_secs.map(Duration::from_secs)
    }

    /// Nothing left in at least one dimension.
    pub fn is_exhausted(&self) -> bool {
        self.remaining_tokens == Some(0) || self.remaining_secs == Some(0)
    }
}

/// Optional scoping context attached to a query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub resource_ids: Vec<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub budget: Option<Budget>,
    /// Signal types resolved on earlier turns of the same session, oldest first.
    #[serde(default)]
    pub history: Vec<SignalType>,
}

/// A free-text investigation request plus scoping context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub context: QueryContext,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            context: QueryContext::default(),
        }
    }

    pub fn with_context(mut self, context: QueryContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.context.severity = Some(severity);
        self
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.context.project_id = Some(project_id.into());
        self
    }
}
