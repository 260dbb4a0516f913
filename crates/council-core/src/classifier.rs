//! Intent classification: query text → routing tier, investigation mode, signal type.
//!
//! The deterministic path scores every [`SignalType`] by counting
//! word-boundary keyword matches (never substring matches, so "logs" does not
//! fire on "blogs"). Exact ties go to [`SignalType::PRIORITY`].
//!
//! The context-augmented path ([`IntentClassifier::classify_with_context`])
//! hands the deterministic result to an [`IntentRefiner`]. Any refiner error
//! falls back to the deterministic result; classification never blocks an
//! investigation from starting.
//!
//! This is the only classifier in the crate. The orchestrator, the CLI and
//! external routers all go through it.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{
    Budget, ClassificationError, InvestigationMode, QueryContext, RoutingTier, Severity,
    SignalType,
};

// ---------------------------------------------------------------------------
// Vocabulary
// ---------------------------------------------------------------------------

/// Keyword vocabulary driving the deterministic scorer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordTable {
    pub signals: BTreeMap<SignalType, Vec<String>>,
    /// "Why/what went wrong" cues: rule out FAST mode.
    pub investigation: Vec<String>,
    /// High-severity cues: escalate to DEBATE mode.
    pub severity: Vec<String>,
    /// Administrative requests handled by a non-investigative specialist.
    pub administrative: Vec<String>,
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for KeywordTable {
    fn default() -> Self {
        let mut signals = BTreeMap::new();
        signals.insert(
            SignalType::Trace,
            words(&[
                "trace", "traces", "tracing", "span", "spans", "latency", "slow", "slowness",
                "p50", "p95", "p99", "call graph", "request path",
            ]),
        );
        signals.insert(
            SignalType::Metrics,
            words(&[
                "metric", "metrics", "cpu", "memory", "utilization", "throughput", "qps",
                "saturation", "error rate", "gauge", "timeseries", "time series",
            ]),
        );
        signals.insert(
            SignalType::Logs,
            words(&[
                "log", "logs", "logging", "exception", "exceptions", "stacktrace",
                "stack trace", "stderr", "stdout", "error message", "error messages",
                "log entries",
            ]),
        );
        signals.insert(
            SignalType::Alerts,
            words(&[
                "alert", "alerts", "alerting", "page", "paged", "paging", "pagerduty",
                "on-call", "firing", "fired", "notification", "notifications",
            ]),
        );
        signals.insert(
            SignalType::Data,
            words(&[
                "bigquery", "sql", "table", "tables", "dataset", "datasets", "etl", "rows",
                "schema", "warehouse", "data freshness", "pipeline", "pipelines",
            ]),
        );

        Self {
            signals,
            investigation: words(&[
                "why", "cause", "root cause", "causing", "failing", "failed", "failure",
                "failures", "broken", "investigate", "investigation", "diagnose", "debug",
                "degraded", "spike", "spiking", "regression", "went wrong", "issue", "issues",
                "problem", "problems",
            ]),
            severity: words(&[
                "outage", "sev0", "sev1", "sev 0", "sev 1", "p0", "critical", "emergency",
                "production down", "is down", "went down", "site down", "customer impact",
                "data loss", "major incident",
            ]),
            administrative: words(&[
                "create", "configure", "configuration", "setup", "set up", "install",
                "permission", "permissions", "iam", "billing", "cost", "costs", "quota",
                "quotas", "grant", "enable", "disable",
            ]),
        }
    }
}

/// Build a case-insensitive, word-bounded alternation. Longest phrases first.
fn compile_alternation(keywords: &[String]) -> Option<Regex> {
    let mut sorted: Vec<&String> = keywords.iter().filter(|k| !k.trim().is_empty()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    let body = sorted
        .iter()
        .map(|k| regex::escape(k.trim()))
        .collect::<Vec<_>>()
        .join("|");
    match Regex::new(&format!(r"(?i)\b(?:{body})\b")) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(error = %e, "keyword pattern failed to compile; scoring it as zero");
            None
        }
    }
}

fn count(re: &Option<Regex>, text: &str) -> u32 {
    re.as_ref()
        .map(|r| r.find_iter(text).count() as u32)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Non-signal cue counts observed in the query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CueHits {
    pub investigation: u32,
    pub severity: u32,
    pub administrative: u32,
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub tier: RoutingTier,
    /// Only set when `tier == Council`.
    pub mode: Option<InvestigationMode>,
    /// Highest-scoring signal, `None` when nothing matched.
    pub signal_type: Option<SignalType>,
    pub scores: BTreeMap<SignalType, u32>,
    pub cues: CueHits,
}

impl Classification {
    /// Recompute tier, mode and signal type from `scores` and `cues`.
    fn decide(scores: BTreeMap<SignalType, u32>, cues: CueHits) -> Self {
        let signal_type = top_signal(&scores);
        let matched_signals = scores.values().filter(|s| **s > 0).count();

        let tier = if matched_signals > 0 || cues.investigation > 0 || cues.severity > 0 {
            RoutingTier::Council
        } else if cues.administrative > 0 {
            RoutingTier::Specialist
        } else {
            RoutingTier::Direct
        };

        let mode = (tier == RoutingTier::Council).then(|| {
            if cues.severity > 0 {
                InvestigationMode::Debate
            } else if matched_signals == 1 && cues.investigation == 0 {
                InvestigationMode::Fast
            } else {
                // Zero or several signals, or a "why" question: look broadly.
                InvestigationMode::Standard
            }
        });

        Self {
            tier,
            mode,
            signal_type,
            scores,
            cues,
        }
    }
}

/// Highest score wins; exact ties resolved by [`SignalType::PRIORITY`].
pub fn top_signal(scores: &BTreeMap<SignalType, u32>) -> Option<SignalType> {
    let mut best: Option<(SignalType, u32)> = None;
    for signal in SignalType::PRIORITY {
        let score = scores.get(&signal).copied().unwrap_or(0);
        if score == 0 {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((signal, score)),
        }
    }
    best.map(|(signal, _)| signal)
}

// ---------------------------------------------------------------------------
// Refinement
// ---------------------------------------------------------------------------

/// Re-scores a deterministic classification using extra context.
pub trait IntentRefiner: Send + Sync {
    fn refine(
        &self,
        base: &Classification,
        context: &QueryContext,
    ) -> Result<Classification, ClassificationError>;
}

/// Built-in refiner using session history, severity hint and remaining budget.
#[derive(Debug, Clone)]
pub struct ContextRefiner {
    /// Budget fraction below which a debate is downgraded.
    pub budget_floor: f64,
}

impl Default for ContextRefiner {
    fn default() -> Self {
        Self { budget_floor: 0.2 }
    }
}

impl IntentRefiner for ContextRefiner {
    fn refine(
        &self,
        base: &Classification,
        context: &QueryContext,
    ) -> Result<Classification, ClassificationError> {
        let fraction = context.budget.as_ref().and_then(|b| b.fraction_remaining);
        if let Some(f) = fraction {
            if !f.is_finite() || !(0.0..=1.0).contains(&f) {
                return Err(ClassificationError::InvalidContext(format!(
                    "budget fraction {f} outside [0.0, 1.0]"
                )));
            }
        }

        let mut scores = base.scores.clone();
        // Follow-up turn with no signal words of its own: carry the last signal forward.
        if base.signal_type.is_none() && base.tier != RoutingTier::Specialist {
            if let Some(last) = context.history.last() {
                *scores.entry(*last).or_insert(0) += 1;
            }
        }
        let mut refined = Classification::decide(scores, base.cues);

        if refined.tier == RoutingTier::Council
            && matches!(context.severity, Some(Severity::High | Severity::Critical))
        {
            refined.mode = Some(InvestigationMode::Debate);
        }

        let below_floor = fraction.is_some_and(|f| f < self.budget_floor);
        let exhausted = context.budget.as_ref().is_some_and(Budget::is_exhausted);
        if (below_floor || exhausted) && refined.mode == Some(InvestigationMode::Debate) {
            debug!(
                ?fraction,
                exhausted,
                floor = self.budget_floor,
                "budget low; downgrading debate"
            );
            refined.mode = Some(InvestigationMode::Standard);
        }

        Ok(refined)
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Compiled keyword scorer plus an optional context refiner.
#[derive(Clone)]
pub struct IntentClassifier {
    signals: Vec<(SignalType, Option<Regex>)>,
    investigation: Option<Regex>,
    severity: Option<Regex>,
    administrative: Option<Regex>,
    refiner: Arc<dyn IntentRefiner>,
}

impl std::fmt::Debug for IntentClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntentClassifier")
            .field("signals", &self.signals.len())
            .finish_non_exhaustive()
    }
}

impl Default for IntentClassifier {
    fn default() -> Self {
        Self::new(&KeywordTable::default())
    }
}

impl IntentClassifier {
    pub fn new(table: &KeywordTable) -> Self {
        let signals = SignalType::PRIORITY
            .iter()
            .map(|signal| {
                let keywords = table.signals.get(signal).cloned().unwrap_or_default();
                (*signal, compile_alternation(&keywords))
            })
            .collect();
        Self {
            signals,
            investigation: compile_alternation(&table.investigation),
            severity: compile_alternation(&table.severity),
            administrative: compile_alternation(&table.administrative),
            refiner: Arc::new(ContextRefiner::default()),
        }
    }

    /// Replace the context refiner.
    pub fn with_refiner(mut self, refiner: Arc<dyn IntentRefiner>) -> Self {
        self.refiner = refiner;
        self
    }

    /// Per-signal match counts. Matches from different tables that overlap
    /// claim their span once: leftmost first, then the longest phrase.
    fn score_signals(&self, text: &str) -> BTreeMap<SignalType, u32> {
        let mut hits: Vec<(usize, usize, SignalType)> = Vec::new();
        for (signal, re) in &self.signals {
            if let Some(re) = re {
                hits.extend(re.find_iter(text).map(|m| (m.start(), m.end(), *signal)));
            }
        }
        hits.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)));

        let mut scores: BTreeMap<SignalType, u32> =
            self.signals.iter().map(|(signal, _)| (*signal, 0)).collect();
        let mut claimed_to = 0;
        for (start, end, signal) in hits {
            if start < claimed_to {
                continue;
            }
            *scores.entry(signal).or_insert(0) += 1;
            claimed_to = end;
        }
        scores
    }

    /// Deterministic, pure classification of `text`.
    pub fn classify(&self, text: &str) -> Classification {
        let scores = self.score_signals(text);
        let cues = CueHits {
            investigation: count(&self.investigation, text),
            severity: count(&self.severity, text),
            administrative: count(&self.administrative, text),
        };
        Classification::decide(scores, cues)
    }

    /// Context-augmented classification with deterministic fallback.
    pub fn classify_with_context(&self, text: &str, context: &QueryContext) -> Classification {
        let base = self.classify(text);
        match self.refiner.refine(&base, context) {
            Ok(refined) => refined,
            Err(e) => {
                warn!(error = %e, "context refinement failed; using deterministic classification");
                base
            }
        }
    }
}

static DEFAULT_CLASSIFIER: OnceLock<IntentClassifier> = OnceLock::new();

/// Classify with the built-in vocabulary. Usable standalone by external routers.
pub fn classify(text: &str, context: Option<&QueryContext>) -> Classification {
    let classifier = DEFAULT_CLASSIFIER.get_or_init(IntentClassifier::default);
    match context {
        Some(ctx) => classifier.classify_with_context(text, ctx),
        None => classifier.classify(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> IntentClassifier {
        IntentClassifier::default()
    }

    #[test]
    fn show_me_logs_is_fast_logs() {
        let c = classifier().classify("show me logs for pod X");
        assert_eq!(c.tier, RoutingTier::Council);
        assert_eq!(c.mode, Some(InvestigationMode::Fast));
        assert_eq!(c.signal_type, Some(SignalType::Logs));
    }

    #[test]
    fn why_question_without_signal_is_standard() {
        let c = classifier().classify("why is checkout failing after the last deploy?");
        assert_eq!(c.tier, RoutingTier::Council);
        assert_eq!(c.mode, Some(InvestigationMode::Standard));
        assert_eq!(c.signal_type, None);
    }

    #[test]
    fn classification_is_deterministic() {
        let c = classifier();
        let q = "latency spike and cpu saturation on the payments service";
        let first = c.classify(q);
        for _ in 0..10 {
            assert_eq!(c.classify(q), first);
        }
    }

    #[test]
    fn word_boundary_prevents_substring_matches() {
        let c = classifier().classify("read the engineering blogs catalog");
        assert_eq!(c.scores[&SignalType::Logs], 0);
        assert_eq!(c.signal_type, None);
    }

    #[test]
    fn exact_tie_uses_priority_order() {
        // one trace keyword, one metrics keyword, one logs keyword
        let c = classifier().classify("span cpu logs");
        assert_eq!(c.signal_type, Some(SignalType::Trace));

        let c = classifier().classify("alerts table");
        assert_eq!(c.signal_type, Some(SignalType::Alerts));
    }

    #[test]
    fn highest_score_beats_priority() {
        let c = classifier().classify("trace plus logs and more logs and log entries");
        assert_eq!(c.signal_type, Some(SignalType::Logs));
    }

    #[test]
    fn multiple_signals_are_standard_not_fast() {
        let c = classifier().classify("show cpu metrics and error logs");
        assert_eq!(c.mode, Some(InvestigationMode::Standard));
    }

    #[test]
    fn severity_cue_escalates_to_debate() {
        let c = classifier().classify("sev1 outage on checkout, logs full of exceptions");
        assert_eq!(c.mode, Some(InvestigationMode::Debate));
    }

    #[test]
    fn greeting_is_direct() {
        let c = classifier().classify("hello there, what can you do?");
        assert_eq!(c.tier, RoutingTier::Direct);
        assert_eq!(c.mode, None);
    }

    #[test]
    fn admin_request_is_specialist() {
        let c = classifier().classify("grant my teammate permissions on the project");
        assert_eq!(c.tier, RoutingTier::Specialist);
        assert_eq!(c.mode, None);
    }

    #[test]
    fn history_carries_signal_into_follow_up() {
        let ctx = QueryContext {
            history: vec![SignalType::Metrics],
            ..Default::default()
        };
        let c = classifier().classify_with_context("and what about yesterday?", &ctx);
        assert_eq!(c.tier, RoutingTier::Council);
        assert_eq!(c.signal_type, Some(SignalType::Metrics));
        assert_eq!(c.mode, Some(InvestigationMode::Fast));
    }

    #[test]
    fn critical_severity_hint_escalates() {
        let ctx = QueryContext {
            severity: Some(Severity::Critical),
            ..Default::default()
        };
        let c = classifier().classify_with_context("why is checkout failing?", &ctx);
        assert_eq!(c.mode, Some(InvestigationMode::Debate));
    }

    #[test]
    fn low_budget_downgrades_debate() {
        let ctx = QueryContext {
            severity: Some(Severity::Critical),
            budget: Some(Budget {
                fraction_remaining: Some(0.05),
                ..Default::default()
            }),
            ..Default::default()
        };
        let c = classifier().classify_with_context("why is checkout failing?", &ctx);
        assert_eq!(c.mode, Some(InvestigationMode::Standard));
    }

    #[test]
    fn phrase_spanning_two_tables_scores_once() {
        let c = classifier().classify("show me the stack trace for pod X");
        assert_eq!(c.scores[&SignalType::Logs], 1);
        assert_eq!(c.scores[&SignalType::Trace], 0);
        assert_eq!(c.mode, Some(InvestigationMode::Fast));
        assert_eq!(c.signal_type, Some(SignalType::Logs));

        // A standalone "trace" later in the text still counts.
        let c = classifier().classify("stack trace and the request trace");
        assert_eq!(c.scores[&SignalType::Logs], 1);
        assert_eq!(c.scores[&SignalType::Trace], 1);
    }

    #[test]
    fn exhausted_token_budget_downgrades_debate() {
        let ctx = QueryContext {
            severity: Some(Severity::High),
            budget: Some(Budget {
                remaining_tokens: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        let c = classifier().classify_with_context("why is checkout failing?", &ctx);
        assert_eq!(c.mode, Some(InvestigationMode::Standard));
    }

    #[test]
    fn invalid_context_falls_back_to_deterministic() {
        let ctx = QueryContext {
            severity: Some(Severity::Critical),
            budget: Some(Budget {
                fraction_remaining: Some(f64::NAN),
                ..Default::default()
            }),
            ..Default::default()
        };
        let c = classifier();
        let q = "why is checkout failing?";
        assert_eq!(c.classify_with_context(q, &ctx), c.classify(q));
    }

    struct BrokenRefiner;

    impl IntentRefiner for BrokenRefiner {
        fn refine(
            &self,
            _base: &Classification,
            _context: &QueryContext,
        ) -> Result<Classification, ClassificationError> {
            Err(ClassificationError::Refiner("model offline".into()))
        }
    }

    #[test]
    fn refiner_error_never_blocks_classification() {
        let c = classifier().with_refiner(Arc::new(BrokenRefiner));
        let ctx = QueryContext::default();
        let got = c.classify_with_context("show me logs for pod X", &ctx);
        assert_eq!(got.mode, Some(InvestigationMode::Fast));
        assert_eq!(got.signal_type, Some(SignalType::Logs));
    }

    #[test]
    fn free_function_matches_classifier() {
        let q = "show me logs for pod X";
        assert_eq!(classify(q, None), classifier().classify(q));
    }
}
