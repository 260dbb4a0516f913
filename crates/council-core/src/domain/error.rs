//! Error taxonomy for the Council engine.
//!
//! Most of these never reach a caller of `run_investigation`: each has a
//! local recovery (failure finding, empty critique, deterministic fallback,
//! partial result). They exist so the recovery sites can match on cause.

use crate::domain::finding::WorkerId;

/// Failure of the external toolset collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ToolError {
    #[error("tool {tool} unavailable: {reason}")]
    Unavailable { tool: String, reason: String },

    #[error("tool {tool} rejected request: {reason}")]
    BadRequest { tool: String, reason: String },

    #[error("tool {tool} returned malformed data: {reason}")]
    Malformed { tool: String, reason: String },
}

/// Failure of the external reasoning collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ReasoningError {
    #[error("reasoning service unavailable: {0}")]
    Unavailable(String),

    #[error("reasoning service timed out")]
    Timeout,

    #[error("reasoning service refused: {0}")]
    Refused(String),
}

/// Failure of the external session/investigation state store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("state store value for {key} is malformed: {reason}")]
    Malformed { key: String, reason: String },
}

/// Errors raised inside an analysis worker. Always converted to a failure finding.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("toolset call failed: {0}")]
    Tool(#[from] ToolError),

    #[error("reasoning call failed: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("worker output rejected: {0}")]
    InvalidOutput(String),
}

/// Critic output could not be parsed. Recovered as an empty critique.
#[derive(Debug, thiserror::Error)]
pub enum CritiqueParseError {
    #[error("critic returned no structured payload")]
    MissingPayload,

    #[error("critic payload does not match schema: {0}")]
    Schema(#[from] serde_json::Error),
}

/// The synthesizer could not produce a draft. Retried, then surfaced as a partial result.
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    #[error("synthesis reasoning call failed: {0}")]
    Reasoning(#[from] ReasoningError),

    #[error("synthesis produced an empty narrative")]
    EmptyNarrative,

    #[error("synthesis payload does not match schema: {0}")]
    Schema(String),
}

/// Context-augmented classification failed. The deterministic result is used instead.
#[derive(Debug, thiserror::Error)]
pub enum ClassificationError {
    #[error("invalid classification context: {0}")]
    InvalidContext(String),

    #[error("refiner failed: {0}")]
    Refiner(String),
}

/// Evidence bus protocol violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("round {round} already open")]
    RoundAlreadyOpen { round: u32 },

    #[error("round {round} opened out of order (expected {expected})")]
    RoundOutOfOrder { round: u32, expected: u32 },

    #[error("round {round} is not open")]
    RoundNotOpen { round: u32 },

    #[error("round {round} is still in progress")]
    PreviousRoundInProgress { round: u32 },

    #[error("worker {worker} has no reserved key in round {round}")]
    UnreservedKey { round: u32, worker: WorkerId },

    #[error("worker {worker} already wrote its finding for round {round}")]
    DuplicateWrite { round: u32, worker: WorkerId },

    #[error("round {round} is sealed; no further findings accepted")]
    RoundSealed { round: u32 },

    #[error("round {round} has not been sealed")]
    RoundNotSealed { round: u32 },

    #[error("round {round} is incomplete; missing findings from {missing:?}")]
    IncompleteRound { round: u32, missing: Vec<WorkerId> },

    #[error("slot {slot} for round {round} already written")]
    SlotTaken { round: u32, slot: &'static str },
}

/// Invalid configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("environment variable {var} has invalid value {value:?}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for the Council engine's fallible APIs.
#[derive(Debug, thiserror::Error)]
pub enum CouncilError {
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("critique parse error: {0}")]
    CritiqueParse(#[from] CritiqueParseError),

    #[error("classification error: {0}")]
    Classification(#[from] ClassificationError),

    #[error("evidence bus error: {0}")]
    Bus(#[from] BusError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for Council engine operations.
pub type Result<T> = std::result::Result<T, CouncilError>;
