//! Scripted fakes for the external collaborators (testing and offline runs).
//!
//! Provides `StaticToolset`, `ScriptedReasoning` and `ScriptFixture` that
//! satisfy the service contracts without any network access.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ReasoningError, SignalType, ToolError};
use crate::services::{
    CouncilServices, MemoryStateStore, ReasoningRequest, ReasoningResponse, ReasoningRole,
    ReasoningService, ToolCall, ToolOutput, ToolsetService,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// StaticToolset
// ---------------------------------------------------------------------------

/// Toolset returning canned JSON per signal type.
#[derive(Debug, Default)]
pub struct StaticToolset {
    data: BTreeMap<SignalType, serde_json::Value>,
    failing: HashSet<SignalType>,
    calls: Mutex<Vec<ToolCall>>,
}

impl StaticToolset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every tool of `signal` returns `data`.
    pub fn with_data(mut self, signal: SignalType, data: serde_json::Value) -> Self {
        self.data.insert(signal, data);
        self
    }

    /// Every tool of `signal` fails.
    pub fn failing(mut self, signal: SignalType) -> Self {
        self.failing.insert(signal);
        self
    }

    pub fn calls(&self) -> Vec<ToolCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ToolsetService for StaticToolset {
    async fn call(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        lock(&self.calls).push(call.clone());
        if self.failing.contains(&call.signal) {
            return Err(ToolError::Unavailable {
                tool: call.tool.clone(),
                reason: "scripted failure".to_string(),
            });
        }
        let data = self
            .data
            .get(&call.signal)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "rows": [] }));
        Ok(ToolOutput {
            tool: call.tool.clone(),
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedReasoning
// ---------------------------------------------------------------------------

type Reply = Result<ReasoningResponse, ReasoningError>;

#[derive(Debug, Default)]
struct Script {
    queues: HashMap<ReasoningRole, VecDeque<Reply>>,
    fallbacks: HashMap<ReasoningRole, Reply>,
    delays: HashMap<ReasoningRole, Duration>,
    panics: HashSet<ReasoningRole>,
    log: Vec<ReasoningRequest>,
}

/// Reasoning service answering from per-role queues.
///
/// Each role pops its queue first, then falls back to its repeating
/// fallback reply. With neither, the call fails with
/// `ReasoningError::Unavailable`.
#[derive(Debug, Default)]
pub struct ScriptedReasoning {
    script: Mutex<Script>,
}

impl ScriptedReasoning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, role: ReasoningRole, reply: Reply) -> &Self {
        lock(&self.script)
            .queues
            .entry(role)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn push_worker(&self, signal: SignalType, response: ReasoningResponse) -> &Self {
        self.push(ReasoningRole::Worker(signal), Ok(response))
    }

    pub fn push_synthesizer(&self, response: ReasoningResponse) -> &Self {
        self.push(ReasoningRole::Synthesizer, Ok(response))
    }

    pub fn push_critic(&self, response: ReasoningResponse) -> &Self {
        self.push(ReasoningRole::Critic, Ok(response))
    }

    /// Reply used whenever `role`'s queue is empty.
    pub fn fallback(&self, role: ReasoningRole, reply: Reply) -> &Self {
        lock(&self.script).fallbacks.insert(role, reply);
        self
    }

    /// Sleep before answering `role`.
    pub fn delay(&self, role: ReasoningRole, delay: Duration) -> &Self {
        lock(&self.script).delays.insert(role, delay);
        self
    }

    /// Panic when `role` is called.
    pub fn panic_on(&self, role: ReasoningRole) -> &Self {
        lock(&self.script).panics.insert(role);
        self
    }

    /// Every request received so far, in arrival order.
    pub fn requests(&self) -> Vec<ReasoningRequest> {
        lock(&self.script).log.clone()
    }

    /// Requests received for `role`.
    pub fn requests_for(&self, role: ReasoningRole) -> Vec<ReasoningRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.role == role)
            .collect()
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn complete(
        &self,
        request: &ReasoningRequest,
    ) -> Result<ReasoningResponse, ReasoningError> {
        let role = request.role;
        let (delay, should_panic) = {
            let mut script = lock(&self.script);
            script.log.push(request.clone());
            (script.delays.get(&role).copied(), script.panics.contains(&role))
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if should_panic {
            panic!("scripted panic for {role}");
        }

        let mut script = lock(&self.script);
        if let Some(reply) = script.queues.get_mut(&role).and_then(|q| q.pop_front()) {
            return reply;
        }
        script
            .fallbacks
            .get(&role)
            .cloned()
            .unwrap_or_else(|| Err(ReasoningError::Unavailable(format!("no script for {role}"))))
    }
}

// ---------------------------------------------------------------------------
// ScriptFixture
// ---------------------------------------------------------------------------

/// JSON description of an offline investigation.
///
/// Reply entries that are JSON objects become structured responses; strings
/// become plain-text responses. The last entry of each list repeats.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptFixture {
    #[serde(default)]
    pub tools: BTreeMap<SignalType, serde_json::Value>,
    #[serde(default)]
    pub workers: BTreeMap<SignalType, Vec<serde_json::Value>>,
    #[serde(default)]
    pub synthesizer: Vec<serde_json::Value>,
    #[serde(default)]
    pub critic: Vec<serde_json::Value>,
}

fn to_response(value: serde_json::Value) -> ReasoningResponse {
    match value {
        serde_json::Value::String(text) => ReasoningResponse::text(text),
        other => ReasoningResponse::structured(other),
    }
}

fn load_replies(
    reasoning: &ScriptedReasoning,
    role: ReasoningRole,
    replies: Vec<serde_json::Value>,
) {
    let mut replies = replies;
    if let Some(last) = replies.pop() {
        for reply in replies {
            reasoning.push(role, Ok(to_response(reply)));
        }
        reasoning.fallback(role, Ok(to_response(last)));
    }
}

impl ScriptFixture {
    /// Build the toolset/reasoning fakes plus an in-memory state store.
    pub fn into_services(self) -> CouncilServices {
        let mut toolset = StaticToolset::new();
        for (signal, data) in self.tools {
            toolset = toolset.with_data(signal, data);
        }
        let reasoning = ScriptedReasoning::new();
        for (signal, replies) in self.workers {
            load_replies(&reasoning, ReasoningRole::Worker(signal), replies);
        }
        load_replies(&reasoning, ReasoningRole::Synthesizer, self.synthesizer);
        load_replies(&reasoning, ReasoningRole::Critic, self.critic);

        CouncilServices::new(
            Arc::new(toolset),
            Arc::new(reasoning),
            Arc::new(MemoryStateStore::new()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(role: ReasoningRole) -> ReasoningRequest {
        ReasoningRequest {
            role,
            system: String::new(),
            prompt: String::new(),
        }
    }

    #[tokio::test]
    async fn queue_then_fallback_then_error() {
        let r = ScriptedReasoning::new();
        r.push_critic(ReasoningResponse::text("first"));
        r.fallback(ReasoningRole::Critic, Ok(ReasoningResponse::text("again")));

        let req = request(ReasoningRole::Critic);
        assert_eq!(r.complete(&req).await.unwrap().text, "first");
        assert_eq!(r.complete(&req).await.unwrap().text, "again");
        assert_eq!(r.complete(&req).await.unwrap().text, "again");
        assert!(r.complete(&request(ReasoningRole::Synthesizer)).await.is_err());
        assert_eq!(r.requests_for(ReasoningRole::Critic).len(), 3);
    }

    #[tokio::test]
    async fn failing_toolset_returns_error() {
        let t = StaticToolset::new().failing(SignalType::Data);
        let call = ToolCall {
            signal: SignalType::Data,
            tool: "list_recent_jobs".into(),
            query: "q".into(),
            scope: json!({}),
        };
        assert!(t.call(&call).await.is_err());
        assert_eq!(t.calls().len(), 1);
    }

    #[test]
    fn fixture_parses_signal_keyed_maps() {
        let fixture: ScriptFixture = serde_json::from_value(json!({
            "tools": {"logs": {"rows": [1]}},
            "workers": {
                "logs": [{
                    "summary": "s",
                    "confidence": 0.5,
                    "stance": "healthy",
                    "evidence_refs": []
                }]
            },
            "synthesizer": ["plain narrative"]
        }))
        .unwrap();
        assert_eq!(fixture.workers[&SignalType::Logs].len(), 1);
        assert_eq!(fixture.synthesizer.len(), 1);
        assert!(fixture.critic.is_empty());
    }
}
