//! Engine configuration.
//!
//! A [`CouncilConfig`] is constructed once at startup (defaults, then
//! environment overrides) and passed by reference into the orchestrator and
//! workers. Nothing in the engine reads the environment after that.
//!
//! Environment variables (all optional):
//! - `COUNCIL_MAX_ROUNDS`: debate round cap (default 3)
//! - `COUNCIL_GATE_THRESHOLD`: confidence gate, 0.0–1.0 (default 0.85)
//! - `COUNCIL_WORKER_TIMEOUT_SECS`: per-worker timeout (default 30)
//! - `COUNCIL_INVESTIGATION_TIMEOUT_SECS`: global deadline (default 300)
//! - `COUNCIL_SYNTHESIS_RETRIES`: extra synthesis attempts (default 1)
//! - `COUNCIL_WORKERS`: comma list of enabled workers (default all five)
//! - `COUNCIL_BUDGET_FLOOR`: budget fraction below which debate is downgraded (default 0.2)

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{ConfigError, SignalType};

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(|e| {
            serde::de::Error::custom(format!("invalid duration {secs}s: {e}"))
        })
    }
}

/// Upper bound accepted for either timeout.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Debate loop bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebatePolicy {
    /// Hard cap on rounds, including the initial round.
    pub max_rounds: u32,
    /// Aggregate confidence at or above which the loop stops early.
    pub gate_threshold: f64,
    /// Consecutive unrecoverable synthesis failures that end the loop.
    pub max_consecutive_synthesis_failures: u32,
}

impl Default for DebatePolicy {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            gate_threshold: 0.85,
            max_consecutive_synthesis_failures: 2,
        }
    }
}

/// Per-round dispatch settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchPolicy {
    /// Bound on a single worker call.
    #[serde(with = "duration_secs")]
    pub worker_timeout: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            worker_timeout: Duration::from_secs(30),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CouncilConfig {
    #[serde(default)]
    pub debate: DebatePolicy,
    #[serde(default)]
    pub dispatch: DispatchPolicy,
    /// Wall-clock bound across all rounds of one investigation.
    #[serde(with = "duration_secs")]
    pub investigation_timeout: Duration,
    /// Extra synthesis attempts after the first failure.
    pub synthesis_retries: u32,
    /// Workers registered for STANDARD/DEBATE rounds, in dispatch order.
    pub enabled_workers: Vec<SignalType>,
    /// Budget fraction below which a debate is downgraded to standard.
    pub budget_floor: f64,
}

impl Default for CouncilConfig {
    fn default() -> Self {
        Self {
            debate: DebatePolicy::default(),
            dispatch: DispatchPolicy::default(),
            investigation_timeout: Duration::from_secs(300),
            synthesis_retries: 1,
            enabled_workers: SignalType::PRIORITY.to_vec(),
            budget_floor: 0.2,
        }
    }
}

impl CouncilConfig {
    /// Defaults with environment overrides applied, then validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`CouncilConfig::from_env`] but reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("COUNCIL_MAX_ROUNDS") {
            config.debate.max_rounds = parse_env("COUNCIL_MAX_ROUNDS", &v)?;
        }
        if let Some(v) = lookup("COUNCIL_GATE_THRESHOLD") {
            config.debate.gate_threshold = parse_env("COUNCIL_GATE_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("COUNCIL_WORKER_TIMEOUT_SECS") {
            let secs: u64 = parse_env("COUNCIL_WORKER_TIMEOUT_SECS", &v)?;
            config.dispatch.worker_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("COUNCIL_INVESTIGATION_TIMEOUT_SECS") {
            let secs: u64 = parse_env("COUNCIL_INVESTIGATION_TIMEOUT_SECS", &v)?;
            config.investigation_timeout = Duration::from_secs(secs);
        }
        if let Some(v) = lookup("COUNCIL_SYNTHESIS_RETRIES") {
            config.synthesis_retries = parse_env("COUNCIL_SYNTHESIS_RETRIES", &v)?;
        }
        if let Some(v) = lookup("COUNCIL_BUDGET_FLOOR") {
            config.budget_floor = parse_env("COUNCIL_BUDGET_FLOOR", &v)?;
        }
        if let Some(v) = lookup("COUNCIL_WORKERS") {
            let mut workers = Vec::new();
            for name in v.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                let signal: SignalType = name.parse().map_err(|reason| ConfigError::InvalidEnv {
                    var: "COUNCIL_WORKERS",
                    value: v.clone(),
                    reason,
                })?;
                if !workers.contains(&signal) {
                    workers.push(signal);
                }
            }
            config.enabled_workers = workers;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debate.max_rounds == 0 {
            return Err(ConfigError::Invalid("max_rounds must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.debate.gate_threshold) {
            return Err(ConfigError::Invalid(format!(
                "gate_threshold {} outside [0.0, 1.0]",
                self.debate.gate_threshold
            )));
        }
        if self.debate.max_consecutive_synthesis_failures == 0 {
            return Err(ConfigError::Invalid(
                "max_consecutive_synthesis_failures must be at least 1".into(),
            ));
        }
        check_timeout("worker_timeout", self.dispatch.worker_timeout)?;
        check_timeout("investigation_timeout", self.investigation_timeout)?;
        if self.enabled_workers.is_empty() {
            return Err(ConfigError::Invalid("at least one worker must be enabled".into()));
        }
        if !(0.0..=1.0).contains(&self.budget_floor) {
            return Err(ConfigError::Invalid(format!(
                "budget_floor {} outside [0.0, 1.0]",
                self.budget_floor
            )));
        }
        Ok(())
    }

    pub fn with_max_rounds(mut self, max_rounds: u32) -> Self {
        self.debate.max_rounds = max_rounds;
        self
    }

    pub fn with_gate_threshold(mut self, threshold: f64) -> Self {
        self.debate.gate_threshold = threshold;
        self
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch.worker_timeout = timeout;
        self
    }

    pub fn with_investigation_timeout(mut self, timeout: Duration) -> Self {
        self.investigation_timeout = timeout;
        self
    }

    pub fn with_synthesis_retries(mut self, retries: u32) -> Self {
        self.synthesis_retries = retries;
        self
    }

    pub fn with_workers(mut self, workers: Vec<SignalType>) -> Self {
        self.enabled_workers = workers;
        self
    }
}

fn check_timeout(name: &str, timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::Invalid(format!("{name} must be non-zero")));
    }
    if timeout > MAX_TIMEOUT {
        return Err(ConfigError::Invalid(format!(
            "{name} {}s exceeds the {}s limit",
            timeout.as_secs(),
            MAX_TIMEOUT.as_secs()
        )));
    }
    Ok(())
}

fn parse_env<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
            reason: e.to_string(),
        })
}
