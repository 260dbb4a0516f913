//! Bounded critic → re-analysis → re-synthesis loop.
//!
//! The controller owns only control flow: when to stop, which result wins,
//! and the convergence log. Running a round (critic call, worker dispatch,
//! synthesis, bus writes) is delegated to a [`RoundRunner`] so the loop can
//! be driven by the orchestrator in production and by a scripted runner in
//! tests.
//!
//! **Termination, in priority order:**
//! 1. confidence gate met → `Success`
//! 2. `max_rounds` reached → status of the final round
//! 3. consecutive unrecoverable synthesis failures → last valid result, `Partial`
//!
//! Cancellation or the investigation deadline ends the loop at any point
//! with the best available result marked `Partial`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::DebatePolicy;
use crate::domain::{
    ConvergenceRecord, CouncilResult, CouncilStatus, CritiqueReport, Finding, Interruption,
};
use crate::metrics::METRICS;
use crate::obs;

/// Fresh per-round figures the convergence record is computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundSummary {
    /// `None` when synthesis failed after retry.
    pub aggregate_confidence: Option<f64>,
    pub duration: Duration,
    pub contradiction_count: usize,
    pub gap_count: usize,
}

/// One convergence log entry, computed only from its arguments.
pub fn convergence_record(
    round_index: u32,
    previous_confidence: f64,
    summary: &RoundSummary,
) -> ConvergenceRecord {
    ConvergenceRecord {
        round_index,
        confidence_delta: summary
            .aggregate_confidence
            .map_or(0.0, |current| current - previous_confidence),
        duration_ms: summary.duration.as_millis() as u64,
        contradiction_count: summary.contradiction_count,
        gap_count: summary.gap_count,
        synthesis_failed: summary.aggregate_confidence.is_none(),
    }
}

/// Everything one completed (or interrupted) round produced.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub round_index: u32,
    pub findings: Vec<Finding>,
    /// The round's result. When synthesis failed this is a `Partial`
    /// fallback carrying the raw findings.
    pub result: CouncilResult,
    /// `false` when `result` is the raw-findings fallback.
    pub synthesized: bool,
    pub summary: RoundSummary,
    pub interruption: Option<Interruption>,
}

/// Executes debate rounds on behalf of the controller.
#[async_trait]
pub trait RoundRunner: Send {
    /// Critic review of the sealed `round`.
    async fn critique(&mut self, round: u32) -> Result<CritiqueReport, Interruption>;

    /// Re-dispatch every worker for `round` with `critique` as context, then synthesize.
    async fn run_round(&mut self, round: u32, critique: CritiqueReport) -> RoundOutcome;
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    GateMet,
    MaxRounds,
    SynthesisFailures,
    Interrupted(Interruption),
}

#[derive(Debug, Clone)]
pub struct DebateOutcome {
    /// Final result with `round_count` and `convergence_history` filled in.
    pub result: CouncilResult,
    pub stop: StopReason,
}

/// Drives the debate loop under a [`DebatePolicy`].
#[derive(Debug, Clone)]
pub struct DebateController {
    policy: DebatePolicy,
}

impl DebateController {
    pub fn new(policy: &DebatePolicy) -> Self {
        Self {
            policy: policy.clone(),
        }
    }

    fn gate_met(&self, investigation_id: &Uuid, round: u32, best: Option<&CouncilResult>) -> bool {
        let Some(result) = best else {
            return false;
        };
        let confidence = result.aggregate_confidence();
        let met = confidence >= self.policy.gate_threshold;
        obs::emit_gate_evaluated(
            investigation_id,
            round,
            confidence,
            self.policy.gate_threshold,
            met,
        );
        met
    }

    /// Run rounds 2..=max_rounds after the initial round `first`.
    #[instrument(skip_all, fields(investigation_id = %first.result.investigation_id))]
    pub async fn run<R>(&self, runner: &mut R, first: RoundOutcome) -> DebateOutcome
    where
        R: RoundRunner + ?Sized,
    {
        let investigation_id = first.result.investigation_id;
        let mut history = vec![convergence_record(first.round_index, 0.0, &first.summary)];
        let mut best: Option<CouncilResult> = first.synthesized.then(|| first.result.clone());
        let mut consecutive_failures = u32::from(!first.synthesized);
        let mut rounds = first.round_index;
        let mut last = first;

        let stop = loop {
            if let Some(reason) = last.interruption {
                break StopReason::Interrupted(reason);
            }
            if self.gate_met(&investigation_id, rounds, best.as_ref()) {
                break StopReason::GateMet;
            }
            if rounds >= self.policy.max_rounds {
                break StopReason::MaxRounds;
            }
            if consecutive_failures >= self.policy.max_consecutive_synthesis_failures {
                break StopReason::SynthesisFailures;
            }

            let critique = match runner.critique(rounds).await {
                Ok(c) => c,
                Err(reason) => break StopReason::Interrupted(reason),
            };
            let round = rounds + 1;
            debug!(
                round,
                contradictions = critique.contradictions.len(),
                gaps = critique.gaps.len(),
                "starting debate round"
            );
            METRICS.inc_debate_rounds();

            let outcome = runner.run_round(round, critique).await;
            let previous = best.as_ref().map_or(0.0, CouncilResult::aggregate_confidence);
            history.push(convergence_record(round, previous, &outcome.summary));
            rounds = round;
            if outcome.synthesized {
                best = Some(outcome.result.clone());
                consecutive_failures = 0;
            } else {
                consecutive_failures += 1;
            }
            last = outcome;
        };

        info!(?stop, rounds, "debate loop finished");
        let result = match stop {
            StopReason::GateMet => best
                .unwrap_or_else(|| last.result.clone())
                .with_status(CouncilStatus::Success),
            StopReason::MaxRounds if last.synthesized => last.result.clone(),
            StopReason::MaxRounds | StopReason::SynthesisFailures => match best {
                Some(valid) => valid.with_status(CouncilStatus::Partial),
                None => last.result.clone().with_status(CouncilStatus::Partial),
            },
            StopReason::Interrupted(reason) => best
                .unwrap_or_else(|| last.result.clone())
                .with_interruption(reason),
        };

        DebateOutcome {
            result: result.with_round_count(rounds).with_history(history),
            stop,
        }
    }
}
