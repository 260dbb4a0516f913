//! Domain models for the Council engine.
//!
//! Canonical definitions for the core entities:
//! - `Query`, `SignalType`, `RoutingTier`, `InvestigationMode`: what is asked
//! - `Finding`, `CritiqueReport`: per-round evidence
//! - `CouncilResult`, `ConvergenceRecord`: what is returned

pub mod error;
pub mod finding;
pub mod query;
pub mod result;

pub use error::{
    BusError, ClassificationError, ConfigError, CouncilError, CritiqueParseError, ReasoningError,
    Result, StoreError, SynthesisError, ToolError, WorkerError,
};
pub use finding::{
    clamp_confidence, Contradiction, CritiqueReport, FailureKind, Finding, Stance, WorkerId,
};
pub use query::{
    Budget, InvestigationMode, Query, QueryContext, RoutingTier, Severity, SignalType,
};
pub use result::{ConvergenceRecord, CouncilResult, CouncilStatus, Interruption};
