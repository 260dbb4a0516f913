//! Domain-specialist analysis workers.
//!
//! Workers are a closed set of variants, one per [`SignalType`], selected
//! through a fixed [`WorkerRegistry`]. Each variant owns a fixed domain
//! toolset and system prompt. [`AnalysisWorker::analyze`] always returns
//! exactly one [`Finding`]: tool errors, reasoning errors and schema
//! violations are caught at the worker boundary and turned into a failure
//! finding (confidence 0, `failed = true`).

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::CouncilConfig;
use crate::domain::{
    CritiqueReport, FailureKind, Finding, Query, SignalType, Stance, WorkerError, WorkerId,
};
use crate::services::{CouncilServices, ReasoningRequest, ReasoningRole, ToolCall, ToolOutput};

/// Everything a worker sees for one round.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub investigation_id: Uuid,
    pub round_index: u32,
    pub query: Query,
    /// Critic feedback from the previous round (debate rounds only).
    pub critique: Option<CritiqueReport>,
}

/// The only accepted shape of a worker's reasoning output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerOutput {
    pub summary: String,
    pub confidence: f64,
    pub stance: Stance,
    pub evidence_refs: Vec<String>,
}

/// Validate a reasoning payload against [`WorkerOutput`].
pub fn parse_worker_output(
    payload: Option<serde_json::Value>,
) -> Result<WorkerOutput, WorkerError> {
    let value = payload
        .ok_or_else(|| WorkerError::InvalidOutput("response carries no JSON payload".into()))?;
    let output: WorkerOutput = serde_json::from_value(value)
        .map_err(|e| WorkerError::InvalidOutput(e.to_string()))?;
    if output.summary.trim().is_empty() {
        return Err(WorkerError::InvalidOutput("summary is empty".into()));
    }
    if !output.confidence.is_finite() {
        return Err(WorkerError::InvalidOutput("confidence is not a finite number".into()));
    }
    Ok(output)
}

/// A domain-specialist worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisWorker {
    Trace,
    Metrics,
    Logs,
    Alerts,
    Data,
}

impl From<SignalType> for AnalysisWorker {
    fn from(signal: SignalType) -> Self {
        match signal {
            SignalType::Trace => AnalysisWorker::Trace,
            SignalType::Metrics => AnalysisWorker::Metrics,
            SignalType::Logs => AnalysisWorker::Logs,
            SignalType::Alerts => AnalysisWorker::Alerts,
            SignalType::Data => AnalysisWorker::Data,
        }
    }
}

impl AnalysisWorker {
    pub fn signal(self) -> SignalType {
        match self {
            AnalysisWorker::Trace => SignalType::Trace,
            AnalysisWorker::Metrics => SignalType::Metrics,
            AnalysisWorker::Logs => SignalType::Logs,
            AnalysisWorker::Alerts => SignalType::Alerts,
            AnalysisWorker::Data => SignalType::Data,
        }
    }

    /// Reserved evidence-bus key.
    pub fn worker_id(self) -> WorkerId {
        WorkerId::from(self.signal())
    }

    /// Fixed domain toolset.
    pub fn toolset(self) -> &'static [&'static str] {
        match self {
            AnalysisWorker::Trace => &["search_traces", "summarize_latency"],
            AnalysisWorker::Metrics => &["query_timeseries", "list_metric_anomalies"],
            AnalysisWorker::Logs => &["search_logs", "summarize_error_groups"],
            AnalysisWorker::Alerts => &["list_firing_alerts", "list_recent_incidents"],
            AnalysisWorker::Data => &["list_recent_jobs", "check_table_freshness"],
        }
    }

    fn system_prompt(self) -> &'static str {
        match self {
            AnalysisWorker::Trace => {
                "You are the trace analyst. Use span timings and request paths to locate \
                 where latency or errors originate."
            }
            AnalysisWorker::Metrics => {
                "You are the metrics analyst. Look for saturation, error-rate and throughput \
                 changes and when they started."
            }
            AnalysisWorker::Logs => {
                "You are the logs analyst. Group error messages, find the first occurrence \
                 and correlate with deploys."
            }
            AnalysisWorker::Alerts => {
                "You are the alerts analyst. Relate firing alerts and incidents to the question \
                 and note what did not fire."
            }
            AnalysisWorker::Data => {
                "You are the data analyst. Check job runs, table freshness and row-count \
                 anomalies in the warehouse."
            }
        }
    }

    /// Run one analysis. Never fails: errors become a failure finding.
    #[instrument(
        skip(self, ctx, services),
        fields(worker = %self.worker_id(), round = ctx.round_index)
    )]
    pub async fn analyze(self, ctx: &WorkerContext, services: &CouncilServices) -> Finding {
        match self.try_analyze(ctx, services).await {
            Ok(finding) => finding,
            Err(e) => {
                let kind = match e {
                    WorkerError::InvalidOutput(_) => FailureKind::InvalidOutput,
                    WorkerError::Tool(_) | WorkerError::Reasoning(_) => FailureKind::Execution,
                };
                warn!(
                    worker = %self.worker_id(),
                    error = %e,
                    "worker failed; recording failure finding"
                );
                Finding::failed_with(self.worker_id(), ctx.round_index, kind, e)
            }
        }
    }

    async fn try_analyze(
        self,
        ctx: &WorkerContext,
        services: &CouncilServices,
    ) -> Result<Finding, WorkerError> {
        let scope = serde_json::json!({
            "project_id": ctx.query.context.project_id,
            "resource_ids": ctx.query.context.resource_ids,
        });
        let calls: Vec<ToolCall> = self
            .toolset()
            .iter()
            .map(|tool| ToolCall {
                signal: self.signal(),
                tool: tool.to_string(),
                query: ctx.query.text.clone(),
                scope: scope.clone(),
            })
            .collect();
        let outputs = try_join_all(calls.iter().map(|call| services.toolset.call(call))).await?;
        debug!(tools = outputs.len(), "toolset calls complete");

        let request = ReasoningRequest {
            role: ReasoningRole::Worker(self.signal()),
            system: format!(
                "{} Respond with JSON only: {{\"summary\": string, \
                 \"confidence\": number 0-1, \
                 \"stance\": \"anomalous\"|\"healthy\"|\"inconclusive\", \
                 \"evidence_refs\": [string]}}.",
                self.system_prompt()
            ),
            prompt: self.build_prompt(ctx, &outputs),
        };
        let response = services.reasoning.complete(&request).await?;
        let output = parse_worker_output(response.payload())?;

        Ok(Finding::new(
            self.worker_id(),
            ctx.round_index,
            output.summary,
            output.confidence,
            output.stance,
            output.evidence_refs,
        ))
    }

    fn build_prompt(self, ctx: &WorkerContext, outputs: &[ToolOutput]) -> String {
        let mut prompt = format!("Question: {}\n", ctx.query.text);
        if let Some(severity) = ctx.query.context.severity {
            prompt.push_str(&format!("Severity hint: {severity:?}\n"));
        }
        prompt.push_str("\nTool results:\n");
        for output in outputs {
            prompt.push_str(&format!("- {}: {}\n", output.tool, output.data));
        }

        if let Some(critique) = &ctx.critique {
            let me = self.worker_id();
            let disputes: Vec<&str> = critique
                .contradictions
                .iter()
                .filter(|c| c.worker_a == me || c.worker_b == me)
                .map(|c| c.description.as_str())
                .collect();
            let is_gap = critique.gaps.contains(&self.signal());
            if !disputes.is_empty() || is_gap {
                prompt.push_str(&format!(
                    "\nCritic feedback from round {}:\n",
                    critique.round_index
                ));
                for d in disputes {
                    prompt.push_str(&format!("- disputed: {d}\n"));
                }
                if is_gap {
                    prompt.push_str("- your domain was flagged as a coverage gap; dig deeper\n");
                }
                prompt.push_str("Re-examine your evidence and revise or defend your conclusion.\n");
            }
        }
        prompt
    }
}

/// Fixed registry of enabled workers, keyed by signal type.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerRegistry {
    workers: Vec<AnalysisWorker>,
}

impl WorkerRegistry {
    /// All five workers in priority order.
    pub fn standard() -> Self {
        Self::with_signals(&SignalType::PRIORITY)
    }

    pub fn from_config(config: &CouncilConfig) -> Self {
        Self::with_signals(&config.enabled_workers)
    }

    fn with_signals(signals: &[SignalType]) -> Self {
        let mut workers: Vec<AnalysisWorker> = Vec::with_capacity(signals.len());
        for signal in signals {
            let worker = AnalysisWorker::from(*signal);
            if !workers.contains(&worker) {
                workers.push(worker);
            }
        }
        Self { workers }
    }

    pub fn get(&self, signal: SignalType) -> Option<AnalysisWorker> {
        self.workers.iter().copied().find(|w| w.signal() == signal)
    }

    pub fn all(&self) -> &[AnalysisWorker] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
