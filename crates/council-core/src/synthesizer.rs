//! Cross-referencing and merging of one round's findings.
//!
//! Every pair of usable findings is checked against each other before the
//! reasoning service is asked for a narrative. The arithmetic part (pair
//! relations and the weighted aggregate) is pure and deterministic; only the
//! prose comes from the model.
//!
//! **Merge rules:**
//! - same definite stance, or shared evidence without opposing stances → corroborates
//! - `Anomalous` vs `Healthy` → contradicts; the stronger side is picked by
//!   confidence, then evidence count, then [`SignalType::PRIORITY`]
//! - anything else → independent
//!
//! The narrative always ends with a "Cross-examination" section naming every
//! contradiction, whatever the model wrote.

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::bus::RoundSnapshot;
use crate::domain::{clamp_confidence, Finding, Query, SignalType, Stance, SynthesisError, WorkerId};
use crate::services::{CouncilServices, ReasoningRequest, ReasoningRole};

const CORROBORATION_BONUS: f64 = 0.05;
const MAX_CORROBORATION_BONUS: f64 = 0.15;
const CONTRADICTION_PENALTY: f64 = 0.10;

/// How two findings relate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relation {
    Corroborates,
    Contradicts { stronger: WorkerId },
    Independent,
}

/// The result of checking one pair of findings against each other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossReference {
    pub worker_a: WorkerId,
    pub worker_b: WorkerId,
    pub relation: Relation,
    /// Evidence refs cited by both sides.
    pub shared_evidence: Vec<String>,
}

impl CrossReference {
    pub fn is_contradiction(&self) -> bool {
        matches!(self.relation, Relation::Contradicts { .. })
    }

    /// The weaker side of a contradiction.
    pub fn weaker(&self) -> Option<&WorkerId> {
        match &self.relation {
            Relation::Contradicts { stronger } if *stronger == self.worker_a => {
                Some(&self.worker_b)
            }
            Relation::Contradicts { .. } => Some(&self.worker_a),
            _ => None,
        }
    }
}

fn priority_rank(worker: &WorkerId) -> usize {
    worker
        .as_str()
        .parse::<SignalType>()
        .map(SignalType::priority_rank)
        .unwrap_or(usize::MAX)
}

/// `true` when `a` is the stronger side of a contradiction with `b`.
fn outweighs(a: &Finding, b: &Finding) -> bool {
    if a.confidence() != b.confidence() {
        return a.confidence() > b.confidence();
    }
    if a.evidence_refs().len() != b.evidence_refs().len() {
        return a.evidence_refs().len() > b.evidence_refs().len();
    }
    priority_rank(a.worker_id()) <= priority_rank(b.worker_id())
}

fn relate(a: &Finding, b: &Finding) -> CrossReference {
    let shared_evidence: Vec<String> = a
        .evidence_refs()
        .iter()
        .filter(|r| b.evidence_refs().contains(r))
        .cloned()
        .collect();

    let relation = if a.stance().opposes(b.stance()) {
        let stronger = if outweighs(a, b) { a } else { b };
        Relation::Contradicts {
            stronger: stronger.worker_id().clone(),
        }
    } else if (a.stance() == b.stance() && a.stance() != Stance::Inconclusive)
        || !shared_evidence.is_empty()
    {
        Relation::Corroborates
    } else {
        Relation::Independent
    };

    CrossReference {
        worker_a: a.worker_id().clone(),
        worker_b: b.worker_id().clone(),
        relation,
        shared_evidence,
    }
}

/// Check every unordered pair of usable findings.
pub fn cross_reference(findings: &[Finding]) -> Vec<CrossReference> {
    let usable: Vec<&Finding> = findings.iter().filter(|f| f.is_usable()).collect();
    let mut out = Vec::new();
    for (i, a) in usable.iter().enumerate() {
        for b in &usable[i + 1..] {
            out.push(relate(a, b));
        }
    }
    out
}

/// Confidence-weighted aggregate of a round.
///
/// Σc²/Σc over usable findings, plus a capped bonus per corroborating pair,
/// minus a penalty per contradiction proportional to the weaker side's
/// confidence, scaled by √(usable / dispatched).
pub fn weighted_confidence(findings: &[Finding], refs: &[CrossReference]) -> f64 {
    let usable: Vec<&Finding> = findings.iter().filter(|f| f.is_usable()).collect();
    if usable.is_empty() {
        return 0.0;
    }
    let sum: f64 = usable.iter().map(|f| f.confidence()).sum();
    let base = if sum > 0.0 {
        usable.iter().map(|f| f.confidence().powi(2)).sum::<f64>() / sum
    } else {
        0.0
    };

    let corroborations = refs
        .iter()
        .filter(|r| r.relation == Relation::Corroborates)
        .count();
    let bonus = (corroborations as f64 * CORROBORATION_BONUS).min(MAX_CORROBORATION_BONUS);

    let penalty: f64 = refs
        .iter()
        .filter_map(|r| r.weaker())
        .filter_map(|weaker| usable.iter().find(|f| f.worker_id() == weaker))
        .map(|f| CONTRADICTION_PENALTY * f.confidence())
        .sum();

    let coverage = usable.len() as f64 / findings.len() as f64;
    clamp_confidence((base + bonus - penalty) * coverage.sqrt())
}

/// The synthesizer's output for one round, before the orchestrator wraps it
/// into a `CouncilResult`.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisDraft {
    pub narrative: String,
    pub aggregate_confidence: f64,
    /// The deterministic aggregate, kept even when the model proposed its own.
    pub computed_confidence: f64,
    pub cross_references: Vec<CrossReference>,
    pub usable: usize,
    pub dispatched: usize,
}

#[derive(Debug, Deserialize)]
struct SynthesisPayload {
    narrative: String,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Merges a sealed round into one narrative.
#[derive(Debug, Clone, Copy, Default)]
pub struct Synthesizer;

impl Synthesizer {
    pub fn new() -> Self {
        Self
    }

    #[instrument(
        skip_all,
        fields(round = snapshot.round_index, findings = snapshot.findings.len())
    )]
    pub async fn synthesize(
        &self,
        snapshot: &RoundSnapshot,
        query: &Query,
        services: &CouncilServices,
    ) -> Result<SynthesisDraft, SynthesisError> {
        let refs = cross_reference(&snapshot.findings);
        let computed = weighted_confidence(&snapshot.findings, &refs);
        let usable = snapshot.usable_count();
        let dispatched = snapshot.findings.len();

        if usable == 0 {
            debug!("no usable findings; skipping reasoning call");
            return Ok(SynthesisDraft {
                narrative: no_evidence_narrative(&snapshot.findings),
                aggregate_confidence: 0.0,
                computed_confidence: 0.0,
                cross_references: refs,
                usable,
                dispatched,
            });
        }

        let request = ReasoningRequest {
            role: ReasoningRole::Synthesizer,
            system: "You merge findings from independent observability analysts. Treat each \
                     finding as evidence to weigh, not as ground truth to copy. Name every \
                     disagreement and say which evidence is stronger. Respond with JSON: \
                     {\"narrative\": string, \"confidence\": number 0-1}."
                .to_string(),
            prompt: build_prompt(query, snapshot, &refs, computed),
        };
        let response = services.reasoning.complete(&request).await?;

        let (narrative, proposed) = match &response.structured {
            Some(value) => {
                let payload: SynthesisPayload = serde_json::from_value(value.clone())
                    .map_err(|e| SynthesisError::Schema(e.to_string()))?;
                (payload.narrative, payload.confidence)
            }
            None => match response
                .payload()
                .and_then(|v| serde_json::from_value::<SynthesisPayload>(v).ok())
            {
                Some(payload) => (payload.narrative, payload.confidence),
                None => (response.text.clone(), None),
            },
        };
        let narrative = narrative.trim();
        if narrative.is_empty() {
            return Err(SynthesisError::EmptyNarrative);
        }

        let aggregate = proposed.map_or(computed, clamp_confidence);
        debug!(computed, aggregate, "synthesis complete");
        Ok(SynthesisDraft {
            narrative: format!(
                "{narrative}\n\n{}",
                cross_examination(&snapshot.findings, &refs)
            ),
            aggregate_confidence: aggregate,
            computed_confidence: computed,
            cross_references: refs,
            usable,
            dispatched,
        })
    }
}

fn build_prompt(
    query: &Query,
    snapshot: &RoundSnapshot,
    refs: &[CrossReference],
    computed: f64,
) -> String {
    let mut prompt = format!(
        "Question: {}\n\nFindings (round {}):\n",
        query.text, snapshot.round_index
    );
    for f in &snapshot.findings {
        if f.failed() {
            prompt.push_str(&format!("- [{}] no evidence: {}\n", f.worker_id(), f.summary()));
        } else {
            prompt.push_str(&format!(
                "- [{}] stance={:?} confidence={:.2} evidence={:?}: {}\n",
                f.worker_id(),
                f.stance(),
                f.confidence(),
                f.evidence_refs(),
                f.summary()
            ));
        }
    }
    let contradictions: Vec<&CrossReference> =
        refs.iter().filter(|r| r.is_contradiction()).collect();
    if !contradictions.is_empty() {
        prompt.push_str("\nDisagreements to resolve:\n");
        for r in contradictions {
            prompt.push_str(&format!("- {} vs {}\n", r.worker_a, r.worker_b));
        }
    }
    prompt.push_str(&format!("\nEvidence-weighted confidence so far: {computed:.2}\n"));
    prompt
}

fn no_evidence_narrative(findings: &[Finding]) -> String {
    let mut out = String::from("No worker produced usable evidence this round.\n");
    for f in findings {
        let kind = f
            .failure()
            .map(|k| k.to_string())
            .unwrap_or_else(|| "no result".to_string());
        out.push_str(&format!("- {}: confidence 0.00 ({kind})\n", f.worker_id()));
    }
    out
}

fn cross_examination(findings: &[Finding], refs: &[CrossReference]) -> String {
    let mut out = String::from("Cross-examination:\n");
    let contradictions: Vec<&CrossReference> =
        refs.iter().filter(|r| r.is_contradiction()).collect();
    if contradictions.is_empty() {
        out.push_str("- no contradictions between workers\n");
    }
    for r in contradictions {
        let (Relation::Contradicts { stronger }, Some(weaker)) = (&r.relation, r.weaker()) else {
            continue;
        };
        let conf = |id: &WorkerId| {
            findings
                .iter()
                .find(|f| f.worker_id() == id)
                .map_or(0.0, Finding::confidence)
        };
        out.push_str(&format!(
            "- {} contradicts {}; {} evidence judged stronger ({:.2} vs {:.2})\n",
            r.worker_a,
            r.worker_b,
            stronger,
            conf(stronger),
            conf(weaker)
        ));
    }
    let corroborating = refs
        .iter()
        .filter(|r| r.relation == Relation::Corroborates)
        .count();
    if corroborating > 0 {
        out.push_str(&format!("- {corroborating} corroborating pair(s)\n"));
    }
    let failed: Vec<String> = findings
        .iter()
        .filter(|f| f.failed())
        .map(|f| f.worker_id().to_string())
        .collect();
    if !failed.is_empty() {
        out.push_str(&format!("- no evidence from: {}\n", failed.join(", ")));
    }
    out
}
