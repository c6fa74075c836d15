//! Shared test helpers: a scripted provider and a configurable tool invoker.

use async_trait::async_trait;
use openorca_core::{
    ChunkReceiver, Message, Provider, ProviderError, ProviderRequest, ProviderResponse, RiskLevel,
    StreamChunk, ToolCallDelta, ToolDefinition, ToolInvoker, ToolOutcome, Usage,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one `stream()` call produces.
pub enum StreamScript {
    /// Send these chunks, then close.
    Chunks(Vec<StreamChunk>),
    /// `stream()` itself fails.
    Fail(ProviderError),
    /// Send these chunks, then an error item.
    Interrupted(Vec<StreamChunk>, ProviderError),
    /// Send these chunks and keep the stream open forever.
    Stall(Vec<StreamChunk>),
}

fn usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

fn done_chunk() -> StreamChunk {
    StreamChunk {
        done: true,
        usage: Some(usage()),
        ..StreamChunk::default()
    }
}

/// Text fragments followed by a done chunk.
pub fn text_stream(fragments: &[&str]) -> StreamScript {
    let mut chunks: Vec<StreamChunk> = fragments.iter().map(|f| StreamChunk::text(*f)).collect();
    chunks.push(done_chunk());
    StreamScript::Chunks(chunks)
}

/// Optional text plus structured calls delivered in the final chunk.
pub fn native_stream(text: &str, calls: Vec<ToolCallDelta>) -> StreamScript {
    let mut chunks = Vec::new();
    if !text.is_empty() {
        chunks.push(StreamChunk::text(text));
    }
    chunks.push(StreamChunk {
        tool_calls: calls,
        ..done_chunk()
    });
    StreamScript::Chunks(chunks)
}

/// A stream that finishes without any content item.
pub fn empty_stream() -> StreamScript {
    StreamScript::Chunks(vec![done_chunk()])
}

pub fn delta(id: &str, name: &str, arguments: &str) -> ToolCallDelta {
    ToolCallDelta {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(usage()),
        model: "mock-model".into(),
    }
}

/// A provider that replays scripted streams and completions in order.
///
/// Panics if more calls are made than scripts provided.
#[derive(Default)]
pub struct ScriptedProvider {
    streams: Mutex<VecDeque<StreamScript>>,
    completions: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    stream_requests: Mutex<Vec<ProviderRequest>>,
    completion_requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream_with(self, script: StreamScript) -> Self {
        self.streams.lock().unwrap().push_back(script);
        self
    }

    pub fn complete_with(self, response: Result<ProviderResponse, ProviderError>) -> Self {
        self.completions.lock().unwrap().push_back(response);
        self
    }

    pub fn stream_requests(&self) -> Vec<ProviderRequest> {
        self.stream_requests.lock().unwrap().clone()
    }

    pub fn completion_requests(&self) -> Vec<ProviderRequest> {
        self.completion_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.completion_requests.lock().unwrap().push(request);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more scripted completions")
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        let call = {
            let mut requests = self.stream_requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let script = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no more scripted streams (call #{call})"));

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let (chunks, tail, stall) = match script {
            StreamScript::Fail(e) => return Err(e),
            StreamScript::Chunks(c) => (c, None, false),
            StreamScript::Interrupted(c, e) => (c, Some(e), false),
            StreamScript::Stall(c) => (c, None, true),
        };
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            if let Some(e) = tail {
                let _ = tx.send(Err(e)).await;
            }
            if stall {
                tx.closed().await;
            }
        });
        Ok(rx)
    }
}

/// A tool invoker whose behaviour is configured per tool name.
///
/// Unconfigured tools are read-only and succeed immediately with
/// `"<name> ok: <arguments>"`.
#[derive(Default)]
pub struct MockInvoker {
    risks: HashMap<String, RiskLevel>,
    delays: HashMap<String, Duration>,
    failures: HashMap<String, String>,
    panics: HashSet<String>,
    definitions: Vec<ToolDefinition>,
    invocations: Arc<Mutex<Vec<String>>>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl MockInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_risk(mut self, name: &str, risk: RiskLevel) -> Self {
        self.risks.insert(name.into(), risk);
        self
    }

    pub fn with_delay(mut self, name: &str, delay: Duration) -> Self {
        self.delays.insert(name.into(), delay);
        self
    }

    pub fn with_failure(mut self, name: &str, error: &str) -> Self {
        self.failures.insert(name.into(), error.into());
        self
    }

    pub fn with_panic(mut self, name: &str) -> Self {
        self.panics.insert(name.into());
        self
    }

    pub fn with_definition(mut self, name: &str, required: &[&str]) -> Self {
        self.definitions.push(ToolDefinition {
            name: name.into(),
            description: format!("The {name} tool"),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": required,
            }),
        });
        self
    }

    /// Names of invoked tools, in invocation order.
    pub fn invocations(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.invocations)
    }

    pub fn peak_concurrency(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.peak)
    }
}

#[async_trait]
impl ToolInvoker for MockInvoker {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }

    fn risk_of(&self, name: &str) -> RiskLevel {
        self.risks.get(name).copied().unwrap_or(RiskLevel::ReadOnly)
    }

    fn requires_arguments(&self, name: &str) -> bool {
        self.definitions
            .iter()
            .any(|d| d.name == name && d.has_required_parameters())
    }

    fn contains(&self, _name: &str) -> bool {
        true
    }

    async fn invoke(&self, name: &str, arguments: &str, _cancel: CancellationToken) -> ToolOutcome {
        self.invocations.lock().unwrap().push(name.to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delays.get(name) {
            tokio::time::sleep(*delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panics.contains(name) {
            panic!("{name} exploded");
        }
        match self.failures.get(name) {
            Some(error) => ToolOutcome::error(error.clone()),
            None => ToolOutcome::ok(format!("{name} ok: {arguments}")),
        }
    }
}
