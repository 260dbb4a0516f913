use std::sync::Arc;
use std::time::Duration;

use council_core::fakes::{ScriptedReasoning, StaticToolset};
use council_core::{
    Budget, CancellationToken, CouncilConfig, CouncilServices, CouncilStatus, FailureKind,
    Interruption, InvestigationMode, MemoryStateStore, Orchestrator, Query, ReasoningResponse,
    ReasoningRole, Severity, SignalType,
};
use serde_json::json;

fn worker_reply(signal: SignalType, stance: &str, confidence: f64) -> ReasoningResponse {
    ReasoningResponse::structured(json!({
        "summary": format!("{signal} analysis"),
        "confidence": confidence,
        "stance": stance,
        "evidence_refs": [format!("{signal}:ref")]
    }))
}

fn synthesis(confidence: f64) -> ReasoningResponse {
    ReasoningResponse::structured(json!({
        "narrative": format!("synthesis at {confidence}"),
        "confidence": confidence
    }))
}

fn scripted() -> Arc<ScriptedReasoning> {
    let reasoning = Arc::new(ScriptedReasoning::new());
    for signal in SignalType::PRIORITY {
        reasoning.fallback(
            ReasoningRole::Worker(signal),
            Ok(worker_reply(signal, "anomalous", 0.7)),
        );
    }
    reasoning
}

fn orchestrator(config: CouncilConfig, reasoning: Arc<ScriptedReasoning>) -> Orchestrator {
    Orchestrator::new(
        config,
        CouncilServices::new(
            Arc::new(StaticToolset::new()),
            reasoning,
            Arc::new(MemoryStateStore::new()),
        ),
    )
}

fn outage() -> Query {
    Query::new("checkout outage: why are payments failing?").with_severity(Severity::Critical)
}

#[tokio::test]
async fn severity_routes_to_debate() {
    let o = orchestrator(CouncilConfig::default(), scripted());
    let c = o.classify(&outage());
    assert_eq!(c.mode, Some(InvestigationMode::Debate));
}

#[tokio::test]
async fn gate_met_in_round_two_stops_the_loop() {
    let reasoning = scripted();
    reasoning.push_synthesizer(synthesis(0.6));
    reasoning.push_synthesizer(synthesis(0.9));
    reasoning.fallback(ReasoningRole::Synthesizer, Ok(synthesis(0.95)));
    let config = CouncilConfig::default().with_gate_threshold(0.85).with_max_rounds(3);
    let o = orchestrator(config, Arc::clone(&reasoning));

    let result = o.run_investigation(&outage(), None).await;

    assert_eq!(result.mode, InvestigationMode::Debate);
    assert_eq!(result.status, CouncilStatus::Success);
    assert_eq!(result.round_count, 2);
    assert_eq!(result.convergence_history.len(), 2);
    assert_eq!(result.aggregate_confidence(), 0.9);
    assert_eq!(result.narrative.lines().next(), Some("synthesis at 0.9"));
    let deltas: Vec<f64> = result
        .convergence_history
        .iter()
        .map(|r| r.confidence_delta)
        .collect();
    assert!((deltas[0] - 0.6).abs() < 1e-9);
    assert!((deltas[1] - 0.3).abs() < 1e-9);
    assert_eq!(reasoning.requests_for(ReasoningRole::Synthesizer).len(), 2);
    assert_eq!(reasoning.requests_for(ReasoningRole::Critic).len(), 1);
}

#[tokio::test]
async fn confident_first_round_skips_the_critic() {
    let reasoning = scripted();
    reasoning.fallback(ReasoningRole::Synthesizer, Ok(synthesis(0.92)));
    let o = orchestrator(CouncilConfig::default(), Arc::clone(&reasoning));

    let result = o
        .run_investigation(&outage(), Some(InvestigationMode::Debate))
        .await;

    assert_eq!(result.status, CouncilStatus::Success);
    assert_eq!(result.round_count, 1);
    assert_eq!(result.convergence_history.len(), 1);
    assert!(reasoning.requests_for(ReasoningRole::Critic).is_empty());
}

#[tokio::test]
async fn round_count_never_exceeds_max_rounds() {
    for max_rounds in [1, 2, 3, 5] {
        let reasoning = scripted();
        reasoning.fallback(ReasoningRole::Synthesizer, Ok(synthesis(0.3)));
        let config = CouncilConfig::default().with_max_rounds(max_rounds);
        let o = orchestrator(config, Arc::clone(&reasoning));

        let result = o
            .run_investigation(&outage(), Some(InvestigationMode::Debate))
            .await;

        assert_eq!(result.round_count, max_rounds);
        assert_eq!(result.convergence_history.len(), max_rounds as usize);
        assert_eq!(result.status, CouncilStatus::Success);
        assert_eq!(
            reasoning.requests_for(ReasoningRole::Worker(SignalType::Logs)).len(),
            max_rounds as usize
        );
    }
}

#[tokio::test]
async fn critique_reaches_second_round_workers() {
    let reasoning = scripted();
    reasoning.push_worker(SignalType::Metrics, worker_reply(SignalType::Metrics, "healthy", 0.5));
    reasoning.push_critic(ReasoningResponse::structured(json!({
        "contradictions": [],
        "gaps": ["data"]
    })));
    reasoning.fallback(ReasoningRole::Synthesizer, Ok(synthesis(0.5)));
    let o = orchestrator(CouncilConfig::default().with_max_rounds(2), Arc::clone(&reasoning));

    let result = o
        .run_investigation(&outage(), Some(InvestigationMode::Debate))
        .await;
    assert_eq!(result.round_count, 2);

    let metrics_prompts = reasoning.requests_for(ReasoningRole::Worker(SignalType::Metrics));
    assert!(!metrics_prompts[0].prompt.contains("Critic feedback"));
    assert!(metrics_prompts[1].prompt.contains("Critic feedback from round 1"));

    let data_prompts = reasoning.requests_for(ReasoningRole::Worker(SignalType::Data));
    assert!(data_prompts[1].prompt.contains("coverage gap"));

    // metrics (healthy) vs the anomalous majority: deterministic contradictions are counted.
    let round_two = &result.convergence_history[1];
    assert_eq!(round_two.contradiction_count, 4);
    assert_eq!(round_two.gap_count, 1);
}

#[tokio::test]
async fn malformed_critic_output_does_not_abort_the_loop() {
    let reasoning = scripted();
    reasoning.fallback(
        ReasoningRole::Critic,
        Ok(ReasoningResponse::text("I have concerns but no JSON")),
    );
    reasoning.fallback(ReasoningRole::Synthesizer, Ok(synthesis(0.4)));
    let o = orchestrator(CouncilConfig::default(), Arc::clone(&reasoning));

    let result = o
        .run_investigation(&outage(), Some(InvestigationMode::Debate))
        .await;

    assert_eq!(result.round_count, 3);
    assert_eq!(reasoning.requests_for(ReasoningRole::Critic).len(), 2);
    assert!(result.convergence_history.iter().all(|r| r.contradiction_count == 0));
}

#[tokio::test]
async fn repeated_synthesis_failures_return_last_valid_result() {
    let reasoning = scripted();
    reasoning.push_synthesizer(synthesis(0.5));
    reasoning.fallback(ReasoningRole::Synthesizer, Ok(ReasoningResponse::text("")));
    let o = orchestrator(CouncilConfig::default().with_max_rounds(5), Arc::clone(&reasoning));

    let result = o
        .run_investigation(&outage(), Some(InvestigationMode::Debate))
        .await;

    assert_eq!(result.status, CouncilStatus::Partial);
    assert_eq!(result.round_count, 3);
    assert_eq!(result.aggregate_confidence(), 0.5);
    assert!(result.narrative.starts_with("synthesis at 0.5"));
    let failed: Vec<bool> = result
        .convergence_history
        .iter()
        .map(|r| r.synthesis_failed)
        .collect();
    assert_eq!(failed, vec![false, true, true]);
}

#[tokio::test(start_paused = true)]
async fn cancellation_returns_partial_result() {
    let reasoning = scripted();
    reasoning.fallback(ReasoningRole::Synthesizer, Ok(synthesis(0.4)));
    reasoning.delay(ReasoningRole::Critic, Duration::from_secs(20));
    let o = orchestrator(CouncilConfig::default(), Arc::clone(&reasoning));
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            token.cancel();
        })
    };
    let result = o
        .run_investigation_with_cancel(&outage(), Some(InvestigationMode::Debate), token)
        .await;
    canceller.await.unwrap();

    assert_eq!(result.status, CouncilStatus::Partial);
    assert_eq!(result.interruption, Some(Interruption::Cancelled));
    assert_eq!(result.round_count, 1);
    assert_eq!(result.aggregate_confidence(), 0.4);
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_round_cancels_in_flight_workers() {
    let reasoning = scripted();
    reasoning.delay(ReasoningRole::Worker(SignalType::Data), Duration::from_secs(25));
    reasoning.fallback(ReasoningRole::Synthesizer, Ok(synthesis(0.4)));
    let o = orchestrator(CouncilConfig::default(), Arc::clone(&reasoning));
    let token = CancellationToken::new();
    token.cancel();

    let result = o
        .run_investigation_with_cancel(&outage(), Some(InvestigationMode::Standard), token)
        .await;

    assert_eq!(result.status, CouncilStatus::Partial);
    assert_eq!(result.interruption, Some(Interruption::Cancelled));
    assert!(result
        .contributing_findings
        .iter()
        .any(|f| f.failure() == Some(FailureKind::Cancelled)));
}

#[tokio::test(start_paused = true)]
async fn investigation_deadline_bounds_all_rounds() {
    let reasoning = scripted();
    for signal in SignalType::PRIORITY {
        reasoning.delay(ReasoningRole::Worker(signal), Duration::from_secs(20));
    }
    reasoning.fallback(ReasoningRole::Synthesizer, Ok(synthesis(0.3)));
    let config = CouncilConfig::default()
        .with_worker_timeout(Duration::from_secs(30))
        .with_investigation_timeout(Duration::from_secs(50));
    let o = orchestrator(config, Arc::clone(&reasoning));

    let started = tokio::time::Instant::now();
    let result = o
        .run_investigation(&outage(), Some(InvestigationMode::Debate))
        .await;

    assert!(started.elapsed() <= Duration::from_secs(51));
    assert_eq!(result.status, CouncilStatus::Partial);
    assert_eq!(result.interruption, Some(Interruption::DeadlineExceeded));
    assert!(result.round_count <= 3);
}

#[tokio::test(start_paused = true)]
async fn remaining_time_budget_tightens_the_deadline() {
    let reasoning = scripted();
    for signal in SignalType::PRIORITY {
        reasoning.delay(ReasoningRole::Worker(signal), Duration::from_secs(20));
    }
    reasoning.fallback(ReasoningRole::Synthesizer, Ok(synthesis(0.3)));
    let config = CouncilConfig::default().with_worker_timeout(Duration::from_secs(30));
    let o = orchestrator(config, Arc::clone(&reasoning));
    let mut query = outage();
    query.context.budget = Some(Budget {
        remaining_secs: Some(30),
        ..Default::default()
    });

    let started = tokio::time::Instant::now();
    let result = o
        .run_investigation(&query, Some(InvestigationMode::Debate))
        .await;

    assert!(started.elapsed() <= Duration::from_secs(31));
    assert_eq!(result.status, CouncilStatus::Partial);
    assert_eq!(result.interruption, Some(Interruption::DeadlineExceeded));
}

#[tokio::test]
async fn unbounded_investigation_timeout_does_not_panic() {
    let reasoning = scripted();
    reasoning.fallback(ReasoningRole::Synthesizer, Ok(synthesis(0.9)));
    let config = CouncilConfig::default()
        .with_investigation_timeout(Duration::from_secs(u64::MAX))
        .with_worker_timeout(Duration::MAX);
    let o = orchestrator(config, reasoning);

    let result = o
        .run_investigation(&outage(), Some(InvestigationMode::Debate))
        .await;

    assert_eq!(result.status, CouncilStatus::Success);
    assert!(result.interruption.is_none());
}
