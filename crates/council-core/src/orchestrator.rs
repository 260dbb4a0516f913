//! Investigation entry point.
//!
//! CLASSIFY → DISPATCH → {FAST | STANDARD | DEBATE} → COMPLETE. The
//! orchestrator is pure control flow: it resolves the mode, owns the
//! per-investigation [`EvidenceBus`], runs rounds through the dispatch
//! barrier, and turns every outcome (including timeouts, cancellation and
//! synthesis failures) into a typed [`CouncilResult`]. Nothing here returns
//! an error to the caller.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::bus::{EvidenceBus, RoundSnapshot};
use crate::classifier::{Classification, ContextRefiner, IntentClassifier, KeywordTable};
use crate::config::CouncilConfig;
use crate::critic::Critic;
use crate::debate::{convergence_record, DebateController, RoundOutcome, RoundRunner, RoundSummary};
use crate::dispatch::{dispatch_round, InvestigationScope};
use crate::domain::{
    Budget, CouncilResult, CouncilStatus, CritiqueReport, FailureKind, Finding, Interruption,
    InvestigationMode, Query, RoutingTier, SignalType, StoreError, WorkerId,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::services::CouncilServices;
use crate::synthesizer::{cross_reference, weighted_confidence, SynthesisDraft, Synthesizer};
use crate::worker::{AnalysisWorker, WorkerContext, WorkerRegistry};

/// Session history entries kept per session.
const SESSION_HISTORY_LIMIT: usize = 10;

/// Anything that can answer an investigation query.
#[async_trait]
pub trait Investigator: Send + Sync {
    async fn investigate(&self, query: &Query, mode: Option<InvestigationMode>) -> CouncilResult;
}

/// Status of a round's result from its findings.
///
/// `Failure` only when nothing usable came back and nothing ran out of
/// time; `Partial` for any degradation; `Success` otherwise.
pub fn round_status(
    findings: &[Finding],
    synthesized: bool,
    interruption: Option<Interruption>,
) -> CouncilStatus {
    let usable = findings.iter().filter(|f| f.is_usable()).count();
    let time_bound = findings
        .iter()
        .filter_map(Finding::failure)
        .any(|kind| kind.is_time_bound());

    if usable == 0 && !time_bound && interruption.is_none() {
        CouncilStatus::Failure
    } else if interruption.is_some() || !synthesized || findings.iter().any(Finding::failed) {
        CouncilStatus::Partial
    } else {
        CouncilStatus::Success
    }
}

fn session_key(session_id: &str) -> String {
    format!("session:{session_id}:history")
}

/// The Council engine, wired to its collaborators.
pub struct Orchestrator {
    config: CouncilConfig,
    services: CouncilServices,
    classifier: IntentClassifier,
    registry: WorkerRegistry,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(config: CouncilConfig, services: CouncilServices) -> Self {
        let classifier = IntentClassifier::new(&KeywordTable::default()).with_refiner(Arc::new(
            ContextRefiner {
                budget_floor: config.budget_floor,
            },
        ));
        let registry = WorkerRegistry::from_config(&config);
        Self {
            config,
            services,
            classifier,
            registry,
        }
    }

    /// Replace the classifier (custom vocabulary or refiner).
    pub fn with_classifier(mut self, classifier: IntentClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &CouncilConfig {
        &self.config
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Context-aware classification of `query`.
    pub fn classify(&self, query: &Query) -> Classification {
        self.classifier
            .classify_with_context(&query.text, &query.context)
    }

    /// Pick the pipeline for this query.
    ///
    /// FAST needs a classified signal with a registered worker; without one
    /// the query is investigated broadly instead.
    pub fn resolve_mode(
        &self,
        requested: Option<InvestigationMode>,
        classification: &Classification,
    ) -> (InvestigationMode, Option<AnalysisWorker>) {
        let fast_worker = classification
            .signal_type
            .and_then(|signal| self.registry.get(signal));

        let mode = match (requested, classification.mode) {
            (Some(mode), _) => mode,
            (None, Some(mode)) => mode,
            (None, None)
                if classification.tier != RoutingTier::Council && fast_worker.is_some() =>
            {
                InvestigationMode::Fast
            }
            (None, None) => InvestigationMode::Standard,
        };

        match (mode, fast_worker) {
            (InvestigationMode::Fast, Some(worker)) => (InvestigationMode::Fast, Some(worker)),
            (InvestigationMode::Fast, None) => {
                debug!("no classifiable signal for fast mode; running standard");
                (InvestigationMode::Standard, None)
            }
            (other, _) => (other, None),
        }
    }

    /// Run one investigation. Never fails: every path ends in a result.
    pub async fn run_investigation(
        &self,
        query: &Query,
        mode: Option<InvestigationMode>,
    ) -> CouncilResult {
        self.run_investigation_with_cancel(query, mode, CancellationToken::new())
            .await
    }

    /// [`Orchestrator::run_investigation`] with an external cancellation handle.
    #[instrument(skip_all, fields(requested_mode = ?mode))]
    pub async fn run_investigation_with_cancel(
        &self,
        query: &Query,
        mode: Option<InvestigationMode>,
        cancel: CancellationToken,
    ) -> CouncilResult {
        let started = Instant::now();
        let investigation_id = Uuid::new_v4();
        METRICS.inc_investigations();
        obs::emit_investigation_started(&investigation_id, &query.text);

        let budget_limit = query.context.budget.as_ref().and_then(Budget::time_limit);
        let timeout = budget_limit.map_or(self.config.investigation_timeout, |limit| {
            limit.min(self.config.investigation_timeout)
        });
        let scope = InvestigationScope::new(cancel, timeout);
        let classification = {
            let _span = obs::InvestigationSpan::enter(&investigation_id);
            let classification = self.classify(query);
            obs::emit_classified(&investigation_id, &classification);
            classification
        };
        let (mode, fast_worker) = self.resolve_mode(mode, &classification);

        let mut run = InvestigationRun {
            orchestrator: self,
            investigation_id,
            query,
            mode,
            scope,
            bus: EvidenceBus::new(),
            critic: Critic::new(),
            synthesizer: Synthesizer::new(),
        };

        let result = match (mode, fast_worker) {
            (InvestigationMode::Fast, Some(worker)) => run.fast(worker).await,
            (InvestigationMode::Debate, _) => {
                let first = run.execute_round(1, None).await;
                DebateController::new(&self.config.debate)
                    .run(&mut run, first)
                    .await
                    .result
            }
            _ => {
                let first = run.execute_round(1, None).await;
                let history = vec![convergence_record(1, 0.0, &first.summary)];
                first.result.with_history(history)
            }
        };

        obs::emit_investigation_finished(&result, started.elapsed().as_millis() as u64);
        METRICS.flush();
        result
    }

    /// One turn of a multi-turn session.
    ///
    /// Earlier turns' signal types are loaded from the state store and fed to
    /// the classifier; this turn's signal is appended afterwards. Store
    /// failures are logged and the turn runs without history.
    pub async fn run_session_turn(&self, session_id: &str, query: &Query) -> CouncilResult {
        let key = session_key(session_id);
        let mut history: Vec<SignalType> = match self.services.state.get(&key).await {
            Ok(Some(value)) => serde_json::from_value(value)
                .map_err(|e| StoreError::Malformed {
                    key: key.clone(),
                    reason: e.to_string(),
                })
                .unwrap_or_else(|e| {
                    warn!(session_id, error = %e, "ignoring session history");
                    Vec::new()
                }),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(
                    session_id,
                    error = %e,
                    "state store unavailable; continuing without history"
                );
                Vec::new()
            }
        };

        let mut query = query.clone();
        history.extend(query.context.history.iter().copied());
        query.context.history = history.clone();

        let signal = self.classify(&query).signal_type;
        let result = self.run_investigation(&query, None).await;

        if let Some(signal) = signal {
            history.push(signal);
            if history.len() > SESSION_HISTORY_LIMIT {
                history.drain(..history.len() - SESSION_HISTORY_LIMIT);
            }
            match serde_json::to_value(&history) {
                Ok(value) => {
                    if let Err(e) = self.services.state.set(&key, value).await {
                        warn!(session_id, error = %e, "failed to persist session history");
                    }
                }
                Err(e) => warn!(session_id, error = %e, "failed to encode session history"),
            }
        }
        result
    }
}

#[async_trait]
impl Investigator for Orchestrator {
    async fn investigate(&self, query: &Query, mode: Option<InvestigationMode>) -> CouncilResult {
        self.run_investigation(query, mode).await
    }
}

/// State of one running investigation.
struct InvestigationRun<'a> {
    orchestrator: &'a Orchestrator,
    investigation_id: Uuid,
    query: &'a Query,
    mode: InvestigationMode,
    scope: InvestigationScope,
    bus: EvidenceBus,
    critic: Critic,
    synthesizer: Synthesizer,
}

impl InvestigationRun<'_> {
    fn open_round(&mut self, round: u32, workers: &[AnalysisWorker]) {
        let ids: Vec<WorkerId> = workers.iter().map(|w| w.worker_id()).collect();
        if let Err(e) = self.bus.open_round(round, &ids) {
            warn!(round, error = %e, "evidence bus rejected round");
        }
        obs::emit_round_dispatched(&self.investigation_id, round, self.mode, workers.len());
    }

    /// Write the barrier output and seal the round.
    fn seal(&mut self, round: u32, findings: &[Finding]) -> RoundSnapshot {
        for finding in findings {
            if let Err(e) = self.bus.write_finding(finding.clone()) {
                warn!(round, error = %e, "evidence bus rejected finding");
            }
        }
        self.bus.seal_round(round).unwrap_or_else(|e| {
            warn!(round, error = %e, "sealing failed; using barrier output directly");
            RoundSnapshot {
                round_index: round,
                findings: findings.to_vec(),
            }
        })
    }

    fn commit(&mut self, round: u32, result: &CouncilResult, synthesized: bool) {
        let written = if synthesized {
            self.bus.write_result(round, result.clone())
        } else {
            self.bus.close_round(round)
        };
        if let Err(e) = written {
            warn!(round, error = %e, "evidence bus rejected round result");
        }
    }

    fn worker_context(&self, round: u32, critique: Option<CritiqueReport>) -> Arc<WorkerContext> {
        Arc::new(WorkerContext {
            investigation_id: self.investigation_id,
            round_index: round,
            query: self.query.clone(),
            critique,
        })
    }

    /// Single worker, no synthesis.
    async fn fast(&mut self, worker: AnalysisWorker) -> CouncilResult {
        let orchestrator = self.orchestrator;
        let config = &orchestrator.config;
        let services = &orchestrator.services;
        let started = Instant::now();

        self.open_round(1, &[worker]);
        let ctx = self.worker_context(1, None);
        let dispatch =
            dispatch_round(&[worker], ctx, services, &config.dispatch, &self.scope).await;
        let snapshot = self.seal(1, &dispatch.findings);

        let finding = snapshot.findings.first().cloned().unwrap_or_else(|| {
            Finding::failed_with(worker.worker_id(), 1, FailureKind::Execution, "no result")
        });
        let status = round_status(&snapshot.findings, true, dispatch.interruption);
        let confidence = finding.confidence();
        let narrative = finding.summary().to_string();
        let summary = RoundSummary {
            aggregate_confidence: Some(confidence),
            duration: started.elapsed(),
            contradiction_count: 0,
            gap_count: 0,
        };

        let mut result = CouncilResult::new(
            self.investigation_id,
            InvestigationMode::Fast,
            narrative,
            confidence,
            vec![finding],
            1,
            status,
        )
        .with_history(vec![convergence_record(1, 0.0, &summary)]);
        if let Some(reason) = dispatch.interruption {
            result = result.with_interruption(reason);
        }
        self.commit(1, &result, true);
        result
    }

    /// Synthesize with retries. `Ok(None)` when every attempt failed.
    async fn synthesize_with_retry(
        &self,
        snapshot: &RoundSnapshot,
    ) -> Result<Option<SynthesisDraft>, Interruption> {
        let services = &self.orchestrator.services;
        let attempts = 1 + self.orchestrator.config.synthesis_retries;
        for attempt in 0..attempts {
            if attempt > 0 {
                METRICS.inc_synthesis_retries();
            }
            let synth =
                AssertUnwindSafe(self.synthesizer.synthesize(snapshot, self.query, services))
                    .catch_unwind();
            match self.scope.run(synth).await? {
                Ok(Ok(draft)) => return Ok(Some(draft)),
                Ok(Err(e)) => {
                    warn!(round = snapshot.round_index, attempt, error = %e, "synthesis failed")
                }
                Err(_panic) => warn!(round = snapshot.round_index, attempt, "synthesis panicked"),
            }
        }
        Ok(None)
    }

    /// One full round: dispatch every registered worker, barrier, synthesize.
    async fn execute_round(
        &mut self,
        round: u32,
        critique: Option<CritiqueReport>,
    ) -> RoundOutcome {
        let orchestrator = self.orchestrator;
        let started = Instant::now();
        let workers = orchestrator.registry.all();
        let (contradiction_count, gap_count) = critique
            .as_ref()
            .map_or((0, 0), |c| (c.contradictions.len(), c.gaps.len()));

        self.open_round(round, workers);
        let ctx = self.worker_context(round, critique);
        let dispatch = dispatch_round(
            workers,
            ctx,
            &orchestrator.services,
            &orchestrator.config.dispatch,
            &self.scope,
        )
        .await;
        let snapshot = self.seal(round, &dispatch.findings);

        let mut interruption = dispatch.interruption;
        let draft = match self.synthesize_with_retry(&snapshot).await {
            Ok(draft) => draft,
            Err(reason) => {
                interruption.get_or_insert(reason);
                None
            }
        };

        let findings = snapshot.findings.clone();
        let synthesized = draft.is_some();
        let status = round_status(&findings, synthesized, interruption);
        let (narrative, confidence) = match draft {
            Some(d) => (d.narrative, d.aggregate_confidence),
            None => (
                raw_findings_narrative(&findings),
                weighted_confidence(&findings, &cross_reference(&findings)),
            ),
        };
        obs::emit_round_synthesized(
            &self.investigation_id,
            round,
            confidence,
            snapshot.usable_count(),
        );

        let mut result = CouncilResult::new(
            self.investigation_id,
            self.mode,
            narrative,
            confidence,
            findings.clone(),
            round,
            status,
        );
        if let Some(reason) = interruption {
            result = result.with_interruption(reason);
        }
        self.commit(round, &result, synthesized);

        RoundOutcome {
            round_index: round,
            findings,
            result,
            synthesized,
            summary: RoundSummary {
                aggregate_confidence: synthesized.then_some(confidence),
                duration: started.elapsed(),
                contradiction_count,
                gap_count,
            },
            interruption,
        }
    }
}

#[async_trait]
impl<'a> RoundRunner for InvestigationRun<'a> {
    async fn critique(&mut self, round: u32) -> Result<CritiqueReport, Interruption> {
        let snapshot = match self.bus.snapshot(round) {
            Ok(s) => s,
            Err(e) => {
                warn!(round, error = %e, "no sealed snapshot to critique");
                return Ok(CritiqueReport::empty(round));
            }
        };
        let review = AssertUnwindSafe(self.critic.critique(&snapshot, &self.orchestrator.services))
            .catch_unwind();
        let report = match self.scope.run(review).await? {
            Ok(report) => report,
            Err(_panic) => {
                warn!(round, "critic panicked; substituting empty critique");
                CritiqueReport::empty(round)
            }
        };
        if let Err(e) = self.bus.write_critique(report.clone()) {
            warn!(round, error = %e, "evidence bus rejected critique");
        }
        Ok(report)
    }

    async fn run_round(&mut self, round: u32, critique: CritiqueReport) -> RoundOutcome {
        self.execute_round(round, Some(critique)).await
    }
}

/// Narrative used when synthesis is unavailable: the findings themselves.
fn raw_findings_narrative(findings: &[Finding]) -> String {
    let mut out = String::from("Synthesis unavailable; raw findings:\n");
    for f in findings {
        out.push_str(&format!(
            "- [{}] ({:.2}) {}\n",
            f.worker_id(),
            f.confidence(),
            f.summary()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Stance;
    use crate::fakes::{ScriptedReasoning, StaticToolset};
    use crate::services::MemoryStateStore;

    fn f(worker: &str, conf: f64) -> Finding {
        Finding::new(WorkerId::new(worker), 1, "s", conf, Stance::Anomalous, vec![])
    }

    fn failed(worker: &str, kind: FailureKind) -> Finding {
        Finding::failed_with(WorkerId::new(worker), 1, kind, "x")
    }

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(
            CouncilConfig::default(),
            CouncilServices::new(
                Arc::new(StaticToolset::new()),
                Arc::new(ScriptedReasoning::new()),
                Arc::new(MemoryStateStore::new()),
            ),
        )
    }

    #[test]
    fn status_rules() {
        assert_eq!(round_status(&[f("logs", 0.7)], true, None), CouncilStatus::Success);
        assert_eq!(
            round_status(&[f("logs", 0.7), failed("trace", FailureKind::Execution)], true, None),
            CouncilStatus::Partial
        );
        assert_eq!(
            round_status(&[failed("logs", FailureKind::Execution)], true, None),
            CouncilStatus::Failure
        );
        assert_eq!(
            round_status(&[failed("logs", FailureKind::Timeout)], true, None),
            CouncilStatus::Partial
        );
        assert_eq!(round_status(&[f("logs", 0.7)], false, None), CouncilStatus::Partial);
        assert_eq!(
            round_status(&[f("logs", 0.7)], true, Some(Interruption::Cancelled)),
            CouncilStatus::Partial
        );
    }

    #[test]
    fn explicit_fast_without_signal_falls_back_to_standard() {
        let o = orchestrator();
        let c = o.classify(&Query::new("hello there"));
        assert!(c.signal_type.is_none());
        let (mode, worker) = o.resolve_mode(Some(InvestigationMode::Fast), &c);
        assert_eq!(mode, InvestigationMode::Standard);
        assert!(worker.is_none());
    }

    #[test]
    fn classified_fast_picks_signal_worker() {
        let o = orchestrator();
        let c = o.classify(&Query::new("show me logs for pod X"));
        let (mode, worker) = o.resolve_mode(None, &c);
        assert_eq!(mode, InvestigationMode::Fast);
        assert_eq!(worker, Some(AnalysisWorker::Logs));
    }

    #[test]
    fn fast_for_disabled_worker_runs_standard() {
        let o = Orchestrator::new(
            CouncilConfig::default().with_workers(vec![SignalType::Trace, SignalType::Metrics]),
            CouncilServices::new(
                Arc::new(StaticToolset::new()),
                Arc::new(ScriptedReasoning::new()),
                Arc::new(MemoryStateStore::new()),
            ),
        );
        let c = o.classify(&Query::new("show me logs for pod X"));
        let (mode, _) = o.resolve_mode(None, &c);
        assert_eq!(mode, InvestigationMode::Standard);
    }

    #[test]
    fn explicit_debate_is_honoured() {
        let o = orchestrator();
        let c = o.classify(&Query::new("show me logs for pod X"));
        let (mode, worker) = o.resolve_mode(Some(InvestigationMode::Debate), &c);
        assert_eq!(mode, InvestigationMode::Debate);
        assert!(worker.is_none());
    }

    #[test]
    fn raw_narrative_lists_every_finding() {
        let text = raw_findings_narrative(&[f("logs", 0.7), failed("trace", FailureKind::Timeout)]);
        assert!(text.contains("[logs] (0.70)"));
        assert!(text.contains("[trace] (0.00)"));
    }
}
