//! External collaborator contracts.
//!
//! The engine talks to three opaque async services:
//! - `ToolsetService`: per-domain observability data (called by workers only)
//! - `ReasoningService`: prompt in, text (and optionally structured JSON) out
//! - `StateStore`: cross-turn session state with `get`/`set` semantics
//!
//! All traits are backend-agnostic. Scripted fakes for tests live in
//! [`crate::fakes`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ReasoningError, SignalType, StoreError, ToolError};

// ---------------------------------------------------------------------------
// Toolset
// ---------------------------------------------------------------------------

/// A single call into a domain toolset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub signal: SignalType,
    pub tool: String,
    pub query: String,
    /// Project/resource scoping forwarded from the query context.
    pub scope: serde_json::Value,
}

/// Structured observability data returned by a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool: String,
    pub data: serde_json::Value,
}

/// Per-domain observability tools (traces, metrics, logs, alerts, data).
#[async_trait]
pub trait ToolsetService: Send + Sync {
    async fn call(&self, call: &ToolCall) -> Result<ToolOutput, ToolError>;
}

// ---------------------------------------------------------------------------
// Reasoning
// ---------------------------------------------------------------------------

/// Which engine component is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", content = "signal", rename_all = "snake_case")]
pub enum ReasoningRole {
    Worker(SignalType),
    Synthesizer,
    Critic,
}

impl std::fmt::Display for ReasoningRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasoningRole::Worker(signal) => write!(f, "worker:{signal}"),
            ReasoningRole::Synthesizer => f.write_str("synthesizer"),
            ReasoningRole::Critic => f.write_str("critic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningRequest {
    pub role: ReasoningRole,
    pub system: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningResponse {
    pub text: String,
    /// Structured fields when the backend supports them.
    #[serde(default)]
    pub structured: Option<serde_json::Value>,
}

impl ReasoningResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
        }
    }

    pub fn structured(value: serde_json::Value) -> Self {
        Self {
            text: value.to_string(),
            structured: Some(value),
        }
    }

    /// The structured payload, or the text parsed as JSON when none was attached.
    pub fn payload(&self) -> Option<serde_json::Value> {
        if let Some(v) = &self.structured {
            return Some(v.clone());
        }
        serde_json::from_str(extract_json_block(&self.text)).ok()
    }
}

/// Strip a surrounding ```json fence if present.
fn extract_json_block(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// A language-model backed reasoning backend.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn complete(&self, request: &ReasoningRequest)
        -> Result<ReasoningResponse, ReasoningError>;
}

// ---------------------------------------------------------------------------
// State store
// ---------------------------------------------------------------------------

/// Cross-turn session state. The engine does not own its lifecycle.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError>;
}

/// In-memory state store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<(), StoreError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Bundle
// ---------------------------------------------------------------------------

/// The collaborators one orchestrator is wired to. Cheap to clone.
#[derive(Clone)]
pub struct CouncilServices {
    pub toolset: Arc<dyn ToolsetService>,
    pub reasoning: Arc<dyn ReasoningService>,
    pub state: Arc<dyn StateStore>,
}

impl CouncilServices {
    pub fn new(
        toolset: Arc<dyn ToolsetService>,
        reasoning: Arc<dyn ReasoningService>,
        state: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            toolset,
            reasoning,
            state,
        }
    }
}

impl std::fmt::Debug for CouncilServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouncilServices").finish_non_exhaustive()
    }
}
