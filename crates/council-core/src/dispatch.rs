//! Fan-out / fan-in of one round of workers.
//!
//! Every round spawns its workers into one `JoinSet` and joins them at a
//! single barrier. Each worker is bounded by the per-worker timeout; the
//! whole join is bounded by the investigation scope (external cancellation
//! plus the global deadline). Whatever happens, the barrier returns exactly
//! one finding per dispatched worker, in dispatch order.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::config::DispatchPolicy;
use crate::domain::{FailureKind, Finding, Interruption};
use crate::metrics::METRICS;
use crate::obs;
use crate::services::CouncilServices;
use crate::worker::{AnalysisWorker, WorkerContext};

/// Roughly 30 years out; stands in for a deadline that does not fit in an `Instant`.
fn far_future(now: Instant) -> Instant {
    now + Duration::from_secs(86_400 * 365 * 30)
}

/// Cancellation handle plus global deadline shared by every step of one investigation.
#[derive(Debug, Clone)]
pub struct InvestigationScope {
    cancel: CancellationToken,
    deadline: Instant,
}

impl InvestigationScope {
    pub fn new(cancel: CancellationToken, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            cancel,
            deadline: now.checked_add(timeout).unwrap_or_else(|| far_future(now)),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Non-blocking check.
    pub fn interruption(&self) -> Option<Interruption> {
        if self.cancel.is_cancelled() {
            Some(Interruption::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(Interruption::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves when the scope is cancelled or its deadline passes.
    pub async fn interrupted(&self) -> Interruption {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Interruption::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => Interruption::DeadlineExceeded,
        }
    }

    /// Run `fut` unless the scope is interrupted first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interruption> {
        tokio::select! {
            biased;
            reason = self.interrupted() => Err(reason),
            out = fut => Ok(out),
        }
    }
}

/// Barrier output for one round.
#[derive(Debug, Clone)]
pub struct RoundDispatch {
    /// One finding per dispatched worker, in dispatch order.
    pub findings: Vec<Finding>,
    /// Set when the scope interrupted the round before every worker finished.
    pub interruption: Option<Interruption>,
    pub duration: Duration,
}

/// Run `workers` concurrently and wait at the barrier for all of them.
#[instrument(skip_all, fields(round = ctx.round_index, workers = workers.len()))]
pub async fn dispatch_round(
    workers: &[AnalysisWorker],
    ctx: Arc<WorkerContext>,
    services: &CouncilServices,
    policy: &DispatchPolicy,
    scope: &InvestigationScope,
) -> RoundDispatch {
    let started = Instant::now();
    let round = ctx.round_index;
    METRICS.add_workers_dispatched(workers.len() as u64);

    let mut join_set = JoinSet::new();
    for (idx, worker) in workers.iter().copied().enumerate() {
        let ctx = Arc::clone(&ctx);
        let services = services.clone();
        let timeout = policy.worker_timeout;
        join_set.spawn(async move {
            let run = AssertUnwindSafe(worker.analyze(&ctx, &services)).catch_unwind();
            let finding = match tokio::time::timeout(timeout, run).await {
                Ok(Ok(finding)) => finding,
                Ok(Err(_panic)) => Finding::failed_with(
                    worker.worker_id(),
                    ctx.round_index,
                    FailureKind::Execution,
                    "worker panicked",
                ),
                Err(_elapsed) => Finding::failed_with(
                    worker.worker_id(),
                    ctx.round_index,
                    FailureKind::Timeout,
                    format!("no result within {}ms", timeout.as_millis()),
                ),
            };
            (idx, finding)
        });
    }

    let mut slots: Vec<Option<Finding>> = vec![None; workers.len()];
    let mut interruption = None;
    loop {
        tokio::select! {
            biased;
            reason = scope.interrupted() => {
                debug!(?reason, "round interrupted; aborting in-flight workers");
                interruption = Some(reason);
                join_set.abort_all();
                break;
            }
            joined = join_set.join_next() => match joined {
                Some(Ok((idx, finding))) => slots[idx] = Some(finding),
                Some(Err(e)) => warn!(error = %e, "worker task ended abnormally"),
                None => break,
            },
        }
    }

    // Drain aborted tasks; any that finished before the abort keep their finding.
    while let Some(joined) = join_set.join_next().await {
        if let Ok((idx, finding)) = joined {
            slots[idx] = Some(finding);
        }
    }

    let findings: Vec<Finding> = slots
        .into_iter()
        .zip(workers)
        .map(|(slot, worker)| {
            slot.unwrap_or_else(|| match interruption {
                Some(reason) => Finding::failed_with(
                    worker.worker_id(),
                    round,
                    FailureKind::Cancelled,
                    reason,
                ),
                None => Finding::failed_with(
                    worker.worker_id(),
                    round,
                    FailureKind::Execution,
                    "worker task aborted",
                ),
            })
        })
        .collect();

    for finding in findings.iter().filter(|f| f.failed()) {
        METRICS.inc_worker_failures();
        if finding.failure() == Some(FailureKind::Timeout) {
            METRICS.inc_worker_timeouts();
        }
        obs::emit_worker_failed(finding);
    }

    RoundDispatch {
        findings,
        interruption,
        duration: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Query, SignalType};
    use crate::fakes::{ScriptedReasoning, StaticToolset};
    use crate::services::{MemoryStateStore, ReasoningResponse, ReasoningRole};
    use serde_json::json;
    use uuid::Uuid;

    fn ok_reply() -> ReasoningResponse {
        ReasoningResponse::structured(json!({
            "summary": "nothing unusual",
            "confidence": 0.6,
            "stance": "healthy",
            "evidence_refs": []
        }))
    }

    fn setup(reasoning: Arc<ScriptedReasoning>) -> (CouncilServices, Arc<WorkerContext>) {
        for signal in SignalType::PRIORITY {
            reasoning.fallback(ReasoningRole::Worker(signal), Ok(ok_reply()));
        }
        let services = CouncilServices::new(
            Arc::new(StaticToolset::new()),
            reasoning,
            Arc::new(MemoryStateStore::new()),
        );
        let ctx = Arc::new(WorkerContext {
            investigation_id: Uuid::new_v4(),
            round_index: 1,
            query: Query::new("why is checkout failing?"),
            critique: None,
        });
        (services, ctx)
    }

    fn all_workers() -> Vec<AnalysisWorker> {
        SignalType::PRIORITY.iter().copied().map(AnalysisWorker::from).collect()
    }

    fn policy(secs: u64) -> DispatchPolicy {
        DispatchPolicy {
            worker_timeout: Duration::from_secs(secs),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn barrier_returns_one_finding_per_worker_in_order() {
        let reasoning = Arc::new(ScriptedReasoning::new());
        reasoning.delay(ReasoningRole::Worker(SignalType::Trace), Duration::from_secs(3));
        let (services, ctx) = setup(Arc::clone(&reasoning));
        let scope = InvestigationScope::new(CancellationToken::new(), Duration::from_secs(60));

        let out = dispatch_round(&all_workers(), ctx, &services, &policy(10), &scope).await;
        assert_eq!(out.findings.len(), 5);
        assert!(out.interruption.is_none());
        let ids: Vec<&str> = out.findings.iter().map(|f| f.worker_id().as_str()).collect();
        assert_eq!(ids, vec!["trace", "metrics", "logs", "alerts", "data"]);
        assert!(out.findings.iter().all(|f| !f.failed()));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeouts_do_not_overflow() {
        let reasoning = Arc::new(ScriptedReasoning::new());
        let (services, ctx) = setup(Arc::clone(&reasoning));
        let scope = InvestigationScope::new(CancellationToken::new(), Duration::MAX);
        assert!(scope.deadline() > Instant::now());
        assert!(scope.interruption().is_none());

        let policy = DispatchPolicy {
            worker_timeout: Duration::MAX,
        };
        let out = dispatch_round(&all_workers(), ctx, &services, &policy, &scope).await;
        assert_eq!(out.findings.len(), 5);
        assert!(out.interruption.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_worker_times_out_without_stalling_others() {
        let reasoning = Arc::new(ScriptedReasoning::new());
        reasoning.delay(ReasoningRole::Worker(SignalType::Logs), Duration::from_secs(120));
        let (services, ctx) = setup(Arc::clone(&reasoning));
        let scope = InvestigationScope::new(CancellationToken::new(), Duration::from_secs(600));

        let out = dispatch_round(&all_workers(), ctx, &services, &policy(5), &scope).await;
        let logs = &out.findings[2];
        assert_eq!(logs.failure(), Some(FailureKind::Timeout));
        assert_eq!(logs.confidence(), 0.0);
        assert_eq!(out.findings.iter().filter(|f| f.failed()).count(), 1);
        assert!(out.duration < Duration::from_secs(120));
    }

    #[tokio::test]
    async fn panicking_worker_is_isolated() {
        let reasoning = Arc::new(ScriptedReasoning::new());
        reasoning.panic_on(ReasoningRole::Worker(SignalType::Alerts));
        let (services, ctx) = setup(Arc::clone(&reasoning));
        let scope = InvestigationScope::new(CancellationToken::new(), Duration::from_secs(60));

        let out = dispatch_round(&all_workers(), ctx, &services, &policy(10), &scope).await;
        assert_eq!(out.findings.len(), 5);
        assert_eq!(out.findings[3].failure(), Some(FailureKind::Execution));
        assert_eq!(out.findings.iter().filter(|f| f.failed()).count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_in_flight_workers() {
        let reasoning = Arc::new(ScriptedReasoning::new());
        for signal in [SignalType::Metrics, SignalType::Data] {
            reasoning.delay(ReasoningRole::Worker(signal), Duration::from_secs(50));
        }
        let (services, ctx) = setup(Arc::clone(&reasoning));
        let token = CancellationToken::new();
        let scope = InvestigationScope::new(token.clone(), Duration::from_secs(600));

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });
        let out = dispatch_round(&all_workers(), ctx, &services, &policy(100), &scope).await;
        canceller.await.unwrap();

        assert_eq!(out.interruption, Some(Interruption::Cancelled));
        assert_eq!(out.findings.len(), 5);
        assert_eq!(out.findings[1].failure(), Some(FailureKind::Cancelled));
        assert_eq!(out.findings[4].failure(), Some(FailureKind::Cancelled));
        assert!(!out.findings[0].failed());
        assert!(out.duration < Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_round() {
        let reasoning = Arc::new(ScriptedReasoning::new());
        for signal in SignalType::PRIORITY {
            reasoning.delay(ReasoningRole::Worker(signal), Duration::from_secs(30));
        }
        let (services, ctx) = setup(Arc::clone(&reasoning));
        let scope = InvestigationScope::new(CancellationToken::new(), Duration::from_secs(2));

        let out = dispatch_round(&all_workers(), ctx, &services, &policy(100), &scope).await;
        assert_eq!(out.interruption, Some(Interruption::DeadlineExceeded));
        assert!(out
            .findings
            .iter()
            .all(|f| f.failure() == Some(FailureKind::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn scope_run_returns_interruption() {
        let token = CancellationToken::new();
        let scope = InvestigationScope::new(token.clone(), Duration::from_secs(60));
        assert_eq!(scope.run(async { 7 }).await, Ok(7));
        token.cancel();
        assert_eq!(scope.interruption(), Some(Interruption::Cancelled));
        assert_eq!(
            scope.run(tokio::time::sleep(Duration::from_secs(1))).await,
            Err(Interruption::Cancelled)
        );
    }
}
