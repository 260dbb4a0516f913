//! Adversarial review of a sealed round (debate mode only).
//!
//! The critic never blocks the loop: a reasoning failure or an unparseable
//! reply becomes an empty report, and deterministic contradictions and
//! coverage gaps are merged in so later rounds always get some feedback.

use std::collections::BTreeSet;

use serde::Deserialize;
use tracing::{instrument, warn};

use crate::bus::RoundSnapshot;
use crate::domain::{Contradiction, CritiqueParseError, CritiqueReport, SignalType, WorkerId};
use crate::services::{CouncilServices, ReasoningRequest, ReasoningResponse, ReasoningRole};
use crate::synthesizer::{cross_reference, Relation};

#[derive(Debug, Deserialize)]
struct CritiquePayload {
    #[serde(default)]
    contradictions: Vec<Contradiction>,
    #[serde(default)]
    gaps: Vec<SignalType>,
}

/// Parse the critic's reply for `round`.
///
/// Contradictions naming workers that did not take part in the round are dropped.
pub fn parse_critique(
    round: u32,
    response: &ReasoningResponse,
    workers: &[WorkerId],
) -> Result<CritiqueReport, CritiqueParseError> {
    let value = response.payload().ok_or(CritiqueParseError::MissingPayload)?;
    let payload: CritiquePayload = serde_json::from_value(value)?;

    let contradictions = payload
        .contradictions
        .into_iter()
        .filter(|c| {
            let known = workers.contains(&c.worker_a) && workers.contains(&c.worker_b);
            if !known {
                warn!(
                    a = %c.worker_a,
                    b = %c.worker_b,
                    "dropping contradiction for unknown worker"
                );
            }
            known && c.worker_a != c.worker_b
        })
        .collect();

    let mut gaps = Vec::new();
    for gap in payload.gaps {
        if !gaps.contains(&gap) {
            gaps.push(gap);
        }
    }

    Ok(CritiqueReport {
        contradictions,
        gaps,
        round_index: round,
    })
}

/// Reviews one round's findings for disagreements and blind spots.
#[derive(Debug, Clone, Copy, Default)]
pub struct Critic;

impl Critic {
    pub fn new() -> Self {
        Self
    }

    /// One critique of `snapshot`. Never fails.
    #[instrument(skip_all, fields(round = snapshot.round_index))]
    pub async fn critique(
        &self,
        snapshot: &RoundSnapshot,
        services: &CouncilServices,
    ) -> CritiqueReport {
        let round = snapshot.round_index;
        let request = ReasoningRequest {
            role: ReasoningRole::Critic,
            system: "You are a skeptical incident reviewer. Point out findings that contradict \
                     each other and observability domains that were not examined well enough. \
                     Respond with JSON: {\"contradictions\": [{\"worker_a\": string, \
                     \"worker_b\": string, \"description\": string}], \"gaps\": [signal]}."
                .to_string(),
            prompt: build_prompt(snapshot),
        };

        let parsed = match services.reasoning.complete(&request).await {
            Ok(response) => parse_critique(round, &response, &snapshot.worker_ids())
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        let report = parsed.unwrap_or_else(|reason| {
            warn!(round, %reason, "critic output unusable; substituting empty critique");
            CritiqueReport::empty(round)
        });

        merge_deterministic(report, snapshot)
    }
}

fn build_prompt(snapshot: &RoundSnapshot) -> String {
    let mut prompt = format!("Findings from round {}:\n", snapshot.round_index);
    for f in &snapshot.findings {
        prompt.push_str(&format!(
            "- [{}] stance={:?} confidence={:.2} failed={} evidence={:?}: {}\n",
            f.worker_id(),
            f.stance(),
            f.confidence(),
            f.failed(),
            f.evidence_refs(),
            f.summary()
        ));
    }
    prompt
}

/// Add stance contradictions and failed-worker gaps the model may have missed.
fn merge_deterministic(mut report: CritiqueReport, snapshot: &RoundSnapshot) -> CritiqueReport {
    let mut seen: BTreeSet<(WorkerId, WorkerId)> =
        report.contradictions.iter().map(Contradiction::pair).collect();

    for r in cross_reference(&snapshot.findings) {
        let Relation::Contradicts { stronger } = &r.relation else {
            continue;
        };
        let c = Contradiction {
            worker_a: r.worker_a.clone(),
            worker_b: r.worker_b.clone(),
            description: format!(
                "{} and {} reach opposite conclusions; {} currently has the stronger evidence",
                r.worker_a, r.worker_b, stronger
            ),
        };
        if seen.insert(c.pair()) {
            report.contradictions.push(c);
        }
    }

    for f in snapshot.findings.iter().filter(|f| f.failed()) {
        if let Ok(signal) = f.worker_id().as_str().parse::<SignalType>() {
            if !report.gaps.contains(&signal) {
                report.gaps.push(signal);
            }
        }
    }
    report
}
