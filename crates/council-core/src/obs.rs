//! Structured observability hooks for the investigation lifecycle.
//!
//! - `InvestigationSpan`: RAII guard entering an investigation-scoped span
//! - `emit_*`: one function per lifecycle event, so event names and field
//!   sets stay consistent across call sites

use tracing::{info, warn};
use uuid::Uuid;

use crate::classifier::Classification;
use crate::domain::{CouncilResult, Finding, InvestigationMode};

/// RAII guard that enters a span tagged with the investigation id.
///
/// Only for synchronous sections; async code uses `#[instrument]`.
pub struct InvestigationSpan {
    _span: tracing::span::EnteredSpan,
}

impl InvestigationSpan {
    pub fn enter(investigation_id: &Uuid) -> Self {
        let span =
            tracing::info_span!("council.investigation", investigation_id = %investigation_id);
        Self {
            _span: span.entered(),
        }
    }
}

pub fn emit_investigation_started(investigation_id: &Uuid, query: &str) {
    info!(
        event = "investigation.started",
        investigation_id = %investigation_id,
        query_len = query.len(),
    );
}

pub fn emit_classified(investigation_id: &Uuid, classification: &Classification) {
    info!(
        event = "investigation.classified",
        investigation_id = %investigation_id,
        tier = ?classification.tier,
        mode = ?classification.mode,
        signal_type = ?classification.signal_type,
    );
}

pub fn emit_round_dispatched(
    investigation_id: &Uuid,
    round: u32,
    mode: InvestigationMode,
    workers: usize,
) {
    info!(
        event = "round.dispatched",
        investigation_id = %investigation_id,
        round,
        mode = %mode,
        workers,
    );
}

pub fn emit_worker_failed(finding: &Finding) {
    warn!(
        event = "worker.failed",
        worker = %finding.worker_id(),
        round = finding.round_index(),
        failure = ?finding.failure(),
    );
}

pub fn emit_round_synthesized(
    investigation_id: &Uuid,
    round: u32,
    aggregate_confidence: f64,
    usable: usize,
) {
    info!(
        event = "round.synthesized",
        investigation_id = %investigation_id,
        round,
        aggregate_confidence,
        usable,
    );
}

pub fn emit_gate_evaluated(
    investigation_id: &Uuid,
    round: u32,
    confidence: f64,
    threshold: f64,
    met: bool,
) {
    info!(
        event = "debate.gate",
        investigation_id = %investigation_id,
        round,
        confidence,
        threshold,
        met,
    );
}

pub fn emit_investigation_finished(result: &CouncilResult, duration_ms: u64) {
    info!(
        event = "investigation.finished",
        investigation_id = %result.investigation_id,
        status = %result.status,
        rounds = result.round_count,
        aggregate_confidence = result.aggregate_confidence(),
        interruption = ?result.interruption,
        duration_ms,
    );
}
