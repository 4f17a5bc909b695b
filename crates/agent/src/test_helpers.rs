//! Shared test helpers for engine and service tests.

use async_trait::async_trait;
use scribeloop_core::error::CapabilityError;
use scribeloop_core::tool::{Capability, CapabilityKind, ToolOutput, ToolRegistry};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// A capability that replays a script of results.
///
/// Call `n` returns script entry `n`; once the script runs out the last entry
/// repeats. An optional per-call delay is applied before returning.
pub struct ScriptedCapability {
    kind: CapabilityKind,
    script: Vec<Result<ToolOutput, CapabilityError>>,
    delays: Vec<Duration>,
    calls: Mutex<usize>,
    arguments: Mutex<Vec<serde_json::Value>>,
}

impl ScriptedCapability {
    pub fn new(kind: CapabilityKind, script: Vec<Result<ToolOutput, CapabilityError>>) -> Self {
        assert!(!script.is_empty(), "script must have at least one entry");
        Self {
            kind,
            script,
            delays: Vec::new(),
            calls: Mutex::new(0),
            arguments: Mutex::new(Vec::new()),
        }
    }

    pub fn retrieval(script: Vec<Result<ToolOutput, CapabilityError>>) -> Self {
        Self::new(CapabilityKind::Retrieval, script)
    }

    /// Delay for call `n`; calls beyond the list return immediately.
    pub fn with_delays(mut self, delays: Vec<Duration>) -> Self {
        self.delays = delays;
        self
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    /// Arguments of every call so far.
    pub fn arguments(&self) -> Vec<serde_json::Value> {
        self.arguments.lock().unwrap().clone()
    }
}

#[async_trait]
impl Capability for ScriptedCapability {
    fn kind(&self) -> CapabilityKind {
        self.kind.clone()
    }

    fn description(&self) -> &str {
        "Scripted test capability"
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolOutput, CapabilityError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls - 1
        };
        self.arguments.lock().unwrap().push(arguments);

        if let Some(delay) = self.delays.get(n) {
            tokio::time::sleep(*delay).await;
        }

        let idx = n.min(self.script.len() - 1);
        self.script[idx].clone()
    }
}

/// A retrieval capability that always returns `text`.
pub fn echo_retrieval(text: &str) -> Arc<ScriptedCapability> {
    Arc::new(ScriptedCapability::retrieval(vec![Ok(ToolOutput::text(text))]))
}

pub fn registry_with(tools: Vec<(&str, Arc<ScriptedCapability>)>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for (name, tool) in tools {
        registry.register(name, tool).unwrap();
    }
    registry
}
