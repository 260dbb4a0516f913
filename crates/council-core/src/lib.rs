//! Council Core Library
//!
//! Multi-worker incident-investigation engine: classify a query, fan out to
//! domain-specialist workers, merge their findings, and for high-severity
//! cases run a bounded critic loop gated on aggregate confidence.

pub mod bus;
pub mod classifier;
pub mod config;
pub mod critic;
pub mod debate;
pub mod dispatch;
pub mod domain;
pub mod fakes;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod services;
pub mod synthesizer;
pub mod telemetry;
pub mod worker;

pub use domain::{
    Budget, ConvergenceRecord, CouncilError, CouncilResult, CouncilStatus, CritiqueReport,
    FailureKind, Finding, Interruption, InvestigationMode, Query, QueryContext, Result,
    RoutingTier, Severity, SignalType, Stance, WorkerId,
};

pub use bus::{EvidenceBus, RoundSnapshot};
pub use classifier::{
    classify, Classification, ContextRefiner, IntentClassifier, IntentRefiner, KeywordTable,
};
pub use config::{CouncilConfig, DebatePolicy, DispatchPolicy};
pub use critic::{parse_critique, Critic};
pub use debate::{
    convergence_record, DebateController, DebateOutcome, RoundOutcome, RoundRunner, RoundSummary,
    StopReason,
};
pub use dispatch::{dispatch_round, InvestigationScope, RoundDispatch};
pub use orchestrator::{round_status, Investigator, Orchestrator};
pub use services::{
    CouncilServices, MemoryStateStore, ReasoningRequest, ReasoningResponse, ReasoningRole,
    ReasoningService, StateStore, ToolCall, ToolOutput, ToolsetService,
};
pub use synthesizer::{
    cross_reference, weighted_confidence, CrossReference, Relation, SynthesisDraft, Synthesizer,
};
pub use worker::{AnalysisWorker, WorkerContext, WorkerOutput, WorkerRegistry};

pub use metrics::METRICS;
pub use obs::{
    emit_classified, emit_gate_evaluated, emit_investigation_finished, emit_investigation_started,
    InvestigationSpan,
};
pub use telemetry::{init_tracing, init_with_format, LogFormat};

/// Council version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-exported so callers can build cancellation handles without a direct dependency.
pub use tokio_util::sync::CancellationToken;
