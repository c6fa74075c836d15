//! The agent turn loop.
//!
//! One call to [`AgentLoop::run_turn`] drives the model until it stops
//! asking for tools:
//!
//! 1. **Compact** the conversation if it is close to the context window
//! 2. **Stream** a response through the reasoning and tool-call filters
//! 3. **Classify**: native calls, text-encoded calls, or a final answer
//! 4. **Execute** the calls as one batch, or **recover** (retry, downgrade,
//!    continue-smaller, nudge)
//! 5. **Loop** until no calls remain, the iteration cap is hit, the circuit
//!    breaker trips, or the generation is cancelled
//!
//! Native tool calling degrades to text-based `<tool_call>` parsing for the
//! rest of the turn when the model shows it cannot handle the structured
//! channel. The downgrade never reverses within a turn.

use crate::compaction;
use crate::prompts;
use crate::retry_tracker::RetryFailureTracker;
use crate::stream_event::{AgentStreamEvent, EventSink};
use crate::tag_filter::{FilterOutput, TagFilter};
use crate::tool_call_parser::{
    generate_call_id, has_unterminated_tool_call, parse_tool_calls, should_nudge,
};
use crate::tool_executor::{BatchCancelled, ExecutorSettings, ToolExecutor};
use openorca_config::AppConfig;
use openorca_core::{
    Conversation, Message, Provider, ProviderError, ProviderRequest, Role, ToolCall,
    ToolCallDelta, ToolInvoker, Usage,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Identical failures that end the turn.
const CIRCUIT_BREAKER_FAILURES: u32 = 4;
/// Identical failures that trigger a redirect instruction.
const REDIRECT_FAILURES: u32 = 3;

/// Knobs for one agent loop.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub context_window: usize,
    pub max_iterations: usize,
    pub native_tool_calling: bool,
    /// Fraction of `context_window` above which compaction runs.
    pub compaction_threshold: f32,
    pub keep_recent_turns: usize,
    pub show_thinking: bool,
    pub max_truncation_retries: usize,
    pub max_nudges: usize,
    pub thinking_detection_budget: usize,
    pub executor: ExecutorSettings,
}

impl LoopSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let agent = &config.agent;
        Self {
            model: config.provider.model.clone(),
            temperature: config.provider.temperature,
            max_tokens: Some(config.provider.max_tokens),
            context_window: config.provider.context_window,
            max_iterations: agent.max_iterations,
            native_tool_calling: agent.native_tool_calling,
            compaction_threshold: agent.compaction_threshold,
            keep_recent_turns: agent.keep_recent_turns,
            show_thinking: agent.show_thinking,
            max_truncation_retries: agent.max_truncation_retries,
            max_nudges: agent.max_nudges,
            thinking_detection_budget: agent.thinking_detection_budget,
            executor: ExecutorSettings::from_config(agent),
        }
    }
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Why a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The model answered without requesting tools.
    Completed,
    MaxIterations,
    /// Repeated identical tool failures.
    CircuitBreaker,
    Cancelled,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::MaxIterations => "max_iterations",
            Self::CircuitBreaker => "circuit_breaker",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub stop: StopReason,
    /// Visible text of the last model response.
    pub final_text: String,
    pub iterations: usize,
    pub tool_calls_made: usize,
    pub usage: Usage,
}

/// Read-only view of the loop for status lines.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TurnStatus {
    /// Session totals reported by the provider.
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Estimated size of the conversation at the last check.
    pub context_tokens: usize,
    pub iterations: usize,
    pub show_thinking: bool,
    pub native_tools: bool,
    pub generating: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Request to {provider} (model {model}) failed: {source}")]
    Transport {
        provider: String,
        model: String,
        #[source]
        source: ProviderError,
    },
}

enum StreamFailure {
    Cancelled,
    /// `shown` is the visible text already emitted as chunks.
    Transport { error: ProviderError, shown: String },
}

/// One model response after filtering.
#[derive(Debug, Default)]
struct Assembled {
    /// Unfiltered text, used for call parsing.
    raw: String,
    /// Text shown to the user: no reasoning, no call markup.
    visible: String,
    thinking: String,
    native_calls: Vec<ToolCall>,
    content_items: usize,
    usage: Option<Usage>,
}

struct Filters {
    reasoning: TagFilter,
    calls: TagFilter,
    /// Collect visible text without emitting chunk events.
    quiet: bool,
}

struct TurnState {
    native: bool,
    omit_tools_once: bool,
    empty_retry_used: bool,
    truncation_retries: usize,
    nudges: usize,
    tool_calls_made: usize,
    usage: Usage,
}

impl TurnState {
    fn new(native: bool) -> Self {
        Self {
            native,
            omit_tools_once: false,
            empty_retry_used: false,
            truncation_retries: 0,
            nudges: 0,
            tool_calls_made: 0,
            usage: Usage::default(),
        }
    }

    fn add_usage(&mut self, usage: Option<Usage>) {
        if let Some(u) = usage {
            self.usage.prompt_tokens += u.prompt_tokens;
            self.usage.completion_tokens += u.completion_tokens;
            self.usage.total_tokens += u.total_tokens;
        }
    }

    fn finish(&self, stop: StopReason, final_text: String, iterations: usize) -> TurnOutcome {
        TurnOutcome {
            stop,
            final_text,
            iterations,
            tool_calls_made: self.tool_calls_made,
            usage: self.usage,
        }
    }
}

/// The core agent loop that orchestrates streaming, parsing and tool execution.
pub struct AgentLoop {
    provider: Arc<dyn Provider>,
    invoker: Arc<dyn ToolInvoker>,
    executor: ToolExecutor,
    tracker: Arc<RetryFailureTracker>,
    settings: LoopSettings,
    events: EventSink,
    show_thinking: AtomicBool,
    /// Token of the in-flight turn, if any.
    generation: Mutex<Option<CancellationToken>>,
    status: Mutex<TurnStatus>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AgentLoop {
    pub fn new(
        provider: Arc<dyn Provider>,
        invoker: Arc<dyn ToolInvoker>,
        settings: LoopSettings,
    ) -> Self {
        let tracker = Arc::new(RetryFailureTracker::new());
        let executor = ToolExecutor::new(
            Arc::clone(&invoker),
            Arc::clone(&tracker),
            settings.executor.clone(),
        );
        let status = TurnStatus {
            show_thinking: settings.show_thinking,
            native_tools: settings.native_tool_calling,
            ..TurnStatus::default()
        };
        Self {
            provider,
            invoker,
            executor,
            tracker,
            show_thinking: AtomicBool::new(settings.show_thinking),
            settings,
            events: EventSink::disabled(),
            generation: Mutex::new(None),
            status: Mutex::new(status),
        }
    }

    /// Report progress over `sender`.
    pub fn with_events(mut self, sender: mpsc::Sender<AgentStreamEvent>) -> Self {
        self.events = EventSink::new(sender);
        self
    }

    pub fn settings(&self) -> &LoopSettings {
        &self.settings
    }

    pub fn set_show_thinking(&self, show: bool) {
        self.show_thinking.store(show, Ordering::Relaxed);
    }

    /// Cancel the in-flight generation only. The caller's token is left
    /// alone, so the process keeps running. Returns false when idle.
    pub fn cancel_current_generation(&self) -> bool {
        match lock(&self.generation).as_ref() {
            Some(token) => {
                info!("Cancelling current generation");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> TurnStatus {
        let mut status = lock(&self.status).clone();
        status.show_thinking = self.show_thinking.load(Ordering::Relaxed);
        status
    }

    fn update_status(&self, f: impl FnOnce(&mut TurnStatus)) {
        f(&mut lock(&self.status));
    }

    /// Process the conversation until the model stops requesting tools.
    ///
    /// Cancellation ends the turn with [`StopReason::Cancelled`]; only a
    /// transport failure that survives the non-streaming fallback is an error.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let generation = cancel.child_token();
        *lock(&self.generation) = Some(generation.clone());
        self.tracker.reset();
        self.update_status(|s| {
            s.generating = true;
            s.iterations = 0;
            s.native_tools = self.settings.native_tool_calling;
        });
        info!(
            conversation_id = %conversation.id,
            messages = conversation.len(),
            "Starting turn"
        );

        let result = self.drive(conversation, &generation).await;

        *lock(&self.generation) = None;
        let context_tokens = conversation.estimated_tokens();
        self.update_status(|s| {
            s.generating = false;
            s.context_tokens = context_tokens;
        });

        match &result {
            Ok(outcome) => {
                info!(
                    stop = %outcome.stop,
                    iterations = outcome.iterations,
                    tool_calls = outcome.tool_calls_made,
                    "Turn finished"
                );
                self.events
                    .emit(AgentStreamEvent::Done {
                        conversation_id: conversation.id.to_string(),
                        usage: Some(outcome.usage),
                        iterations: outcome.iterations,
                        tool_calls_made: outcome.tool_calls_made,
                        stop_reason: outcome.stop.to_string(),
                    })
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "Turn failed");
                self.events
                    .emit(AgentStreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        result
    }

    async fn drive(
        &self,
        conversation: &mut Conversation,
        generation: &CancellationToken,
    ) -> Result<TurnOutcome, AgentError> {
        let mut state = TurnState::new(self.settings.native_tool_calling);
        let mut final_text = String::new();

        for iteration in 1..=self.settings.max_iterations {
            if generation.is_cancelled() {
                return Ok(state.finish(StopReason::Cancelled, final_text, iteration - 1));
            }
            self.update_status(|s| s.iterations = iteration);
            debug!(iteration, native = state.native, "Agent loop iteration");

            self.maybe_compact(conversation, generation).await;

            let include_tools = state.native && !state.omit_tools_once;
            let downgrade_after = state.omit_tools_once;
            state.omit_tools_once = false;
            let request = self.build_request(conversation, state.native, include_tools);

            let mut response = match self.stream_response(request.clone(), generation).await {
                Ok(r) => r,
                Err(StreamFailure::Cancelled) => {
                    return Ok(state.finish(StopReason::Cancelled, final_text, iteration));
                }
                Err(StreamFailure::Transport { error: e, shown }) => {
                    warn!(error = %e, "Streaming failed, retrying without streaming");
                    self.events
                        .notice(format!("Streaming failed ({e}); retrying without streaming"))
                        .await;
                    match self.complete_once(request.clone(), generation, &shown).await {
                        Ok(Some(r)) => r,
                        Ok(None) => {
                            return Ok(state.finish(StopReason::Cancelled, final_text, iteration));
                        }
                        Err(source) => return Err(self.transport_error(source)),
                    }
                }
            };
            if downgrade_after {
                self.downgrade(&mut state);
            }
            state.add_usage(response.usage);
            self.record_usage(response.usage);

            if response.content_items == 0 {
                if state.native && !state.empty_retry_used {
                    state.empty_retry_used = true;
                    state.omit_tools_once = true;
                    warn!("Empty response with native tools, retrying without tool definitions");
                    self.events
                        .notice("Model returned an empty response; retrying without tool definitions")
                        .await;
                    continue;
                }
                // The streaming transport may have swallowed a server error.
                debug!("Empty stream, sending a non-streaming probe");
                match self.complete_once(request, generation, "").await {
                    Ok(Some(probe)) if probe.content_items > 0 => {
                        state.add_usage(probe.usage);
                        response = probe;
                    }
                    Ok(Some(_)) => {
                        warn!("Model returned an empty response");
                        self.events.notice("Model returned an empty response").await;
                        return Ok(state.finish(StopReason::Completed, final_text, iteration));
                    }
                    Ok(None) => {
                        return Ok(state.finish(StopReason::Cancelled, final_text, iteration));
                    }
                    Err(source) => return Err(self.transport_error(source)),
                }
            }

            final_text = response.visible.trim().to_string();

            let calls = if response.native_calls.is_empty() {
                parse_tool_calls(&response.raw)
            } else {
                let bare = response
                    .native_calls
                    .iter()
                    .find(|c| blank_arguments(&c.arguments) && self.invoker.requires_arguments(&c.name));
                if let Some(call) = bare {
                    warn!(tool = %call.name, "Native call without required arguments, switching to text mode");
                    self.events
                        .notice(format!(
                            "{} was called without its required arguments; switching to text-based tool calls",
                            call.name
                        ))
                        .await;
                    self.downgrade(&mut state);
                    continue;
                }
                std::mem::take(&mut response.native_calls)
            };

            if calls.is_empty() {
                if state.truncation_retries < self.settings.max_truncation_retries
                    && has_unterminated_tool_call(&response.raw)
                {
                    state.truncation_retries += 1;
                    info!(attempt = state.truncation_retries, "Tool call truncated, asking for smaller calls");
                    self.events
                        .notice("Response was cut off inside a tool call; asking for smaller calls")
                        .await;
                    push_visible(conversation, &response);
                    conversation.push(Message::user(prompts::CONTINUE_SMALLER));
                    continue;
                }
                if state.nudges < self.settings.max_nudges && should_nudge(&response.raw) {
                    state.nudges += 1;
                    info!("Response describes an action without a tool call, nudging");
                    self.events
                        .notice("Model described an action without calling a tool; nudging")
                        .await;
                    push_visible(conversation, &response);
                    conversation.push(Message::user(prompts::NUDGE));
                    continue;
                }
                push_visible(conversation, &response);
                return Ok(state.finish(StopReason::Completed, final_text, iteration));
            }

            let calls: Vec<ToolCall> = calls
                .into_iter()
                .map(|mut c| {
                    if c.id.is_empty() {
                        c.id = generate_call_id();
                    }
                    c
                })
                .collect();
            let assistant = Message::assistant_with_calls(
                final_text.clone(),
                calls
                    .iter()
                    .map(|c| (c.id.clone(), c.name.clone(), c.arguments.clone())),
            );
            state.tool_calls_made += calls.len();
            info!(iteration, count = calls.len(), "Executing tool calls");

            let report = match self
                .executor
                .execute_batch(assistant, calls, conversation, generation, &self.events)
                .await
            {
                Ok(report) => report,
                Err(BatchCancelled) => {
                    return Ok(state.finish(StopReason::Cancelled, final_text, iteration));
                }
            };

            if report.max_failure_count >= CIRCUIT_BREAKER_FAILURES {
                warn!(failures = report.max_failure_count, "Circuit breaker tripped");
                self.events
                    .notice(format!(
                        "The same tool call failed {} times in a row; ending this turn",
                        report.max_failure_count
                    ))
                    .await;
                return Ok(state.finish(StopReason::CircuitBreaker, final_text, iteration));
            }
            if report.max_failure_count >= REDIRECT_FAILURES {
                info!(failures = report.max_failure_count, "Injecting redirect");
                self.events
                    .notice("Repeated identical tool failures; asking the model to change approach")
                    .await;
                conversation.push(Message::user(prompts::REDIRECT));
            }
        }

        warn!(max = self.settings.max_iterations, "Max iterations reached");
        self.events
            .notice(format!(
                "Reached the limit of {} iterations for this turn",
                self.settings.max_iterations
            ))
            .await;
        Ok(state.finish(
            StopReason::MaxIterations,
            final_text,
            self.settings.max_iterations,
        ))
    }

    fn downgrade(&self, state: &mut TurnState) {
        if state.native {
            info!("Downgrading to text-based tool calling for this turn");
            state.native = false;
            self.update_status(|s| s.native_tools = false);
        }
    }

    fn record_usage(&self, usage: Option<Usage>) {
        if let Some(u) = usage {
            self.update_status(|s| {
                s.prompt_tokens += u64::from(u.prompt_tokens);
                s.completion_tokens += u64::from(u.completion_tokens);
            });
        }
    }

    fn transport_error(&self, source: ProviderError) -> AgentError {
        AgentError::Transport {
            provider: self.provider.name().to_string(),
            model: self.settings.model.clone(),
            source,
        }
    }

    async fn maybe_compact(&self, conversation: &mut Conversation, generation: &CancellationToken) {
        let estimated = conversation.estimated_tokens();
        self.update_status(|s| s.context_tokens = estimated);
        let limit =
            (self.settings.context_window as f64 * f64::from(self.settings.compaction_threshold)) as usize;
        if estimated <= limit {
            return;
        }
        info!(estimated, limit, "Context above threshold, compacting");
        if let Some(report) = compaction::compact(
            self.provider.as_ref(),
            &self.settings.model,
            conversation,
            self.settings.keep_recent_turns,
            generation,
        )
        .await
        {
            self.events
                .notice(format!(
                    "Compacted {} messages ({} -> {} estimated tokens)",
                    report.removed, report.tokens_before, report.tokens_after
                ))
                .await;
            self.update_status(|s| s.context_tokens = report.tokens_after);
        }
    }

    fn build_request(
        &self,
        conversation: &Conversation,
        native: bool,
        include_tools: bool,
    ) -> ProviderRequest {
        let messages = if native {
            conversation.messages().to_vec()
        } else {
            let instructions = prompts::tool_instructions(&self.invoker.definitions());
            text_mode_messages(conversation.messages(), &instructions)
        };
        ProviderRequest {
            model: self.settings.model.clone(),
            messages,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
            tools: if include_tools {
                self.invoker.definitions()
            } else {
                Vec::new()
            },
            stream: true,
        }
    }

    fn filters(&self) -> Filters {
        Filters {
            reasoning: TagFilter::reasoning_with_budget(self.settings.thinking_detection_budget),
            calls: TagFilter::tool_calls(),
            quiet: false,
        }
    }

    async fn stream_response(
        &self,
        request: ProviderRequest,
        generation: &CancellationToken,
    ) -> Result<Assembled, StreamFailure> {
        let mut rx = tokio::select! {
            r = self.provider.stream(request) => r.map_err(|error| StreamFailure::Transport {
                error,
                shown: String::new(),
            })?,
            _ = generation.cancelled() => return Err(StreamFailure::Cancelled),
        };

        let mut filters = self.filters();
        let mut out = Assembled::default();
        loop {
            let item = tokio::select! {
                item = rx.recv() => item,
                _ = generation.cancelled() => return Err(StreamFailure::Cancelled),
            };
            let chunk = match item {
                None => break,
                Some(Err(error)) => {
                    return Err(StreamFailure::Transport {
                        error,
                        shown: out.visible,
                    });
                }
                Some(Ok(chunk)) => chunk,
            };
            if chunk.has_content() {
                out.content_items += 1;
            }
            if let Some(text) = chunk.content.as_deref()
                && !text.is_empty()
            {
                self.feed(&mut filters, &mut out, text).await;
            }
            for delta in chunk.tool_calls {
                merge_delta(&mut out.native_calls, delta);
            }
            if chunk.usage.is_some() {
                out.usage = chunk.usage;
            }
            if chunk.done {
                break;
            }
        }
        self.flush(&mut filters, &mut out).await;
        Ok(out)
    }

    /// One non-streaming request. `Ok(None)` means cancelled. Visible text
    /// starting with `shown` only emits the part the user has not seen.
    async fn complete_once(
        &self,
        mut request: ProviderRequest,
        generation: &CancellationToken,
        shown: &str,
    ) -> Result<Option<Assembled>, ProviderError> {
        request.stream = false;
        let response = tokio::select! {
            r = self.provider.complete(request) => r?,
            _ = generation.cancelled() => return Ok(None),
        };

        let mut filters = self.filters();
        filters.quiet = true;
        let mut out = Assembled::default();
        let text = response.message.text();
        if !text.is_empty() {
            out.content_items += 1;
            self.feed(&mut filters, &mut out, &text).await;
        }
        for (id, name, arguments) in response.message.tool_calls() {
            out.content_items += 1;
            out.native_calls.push(ToolCall::new(id, name, arguments));
        }
        self.flush(&mut filters, &mut out).await;
        out.usage = response.usage;

        let fresh = match out.visible.strip_prefix(shown) {
            Some(rest) => rest,
            None => {
                self.events
                    .notice("Discarding the interrupted partial response")
                    .await;
                out.visible.as_str()
            }
        };
        self.events.chunk(fresh).await;
        Ok(Some(out))
    }

    async fn feed(&self, filters: &mut Filters, out: &mut Assembled, text: &str) {
        out.raw.push_str(text);
        let split = filters.reasoning.push(text);
        self.route(filters, out, split).await;
    }

    async fn flush(&self, filters: &mut Filters, out: &mut Assembled) {
        let split = filters.reasoning.finish();
        self.route(filters, out, split).await;
        let tail = filters.calls.finish();
        out.visible.push_str(&tail.visible);
        if !filters.quiet {
            self.events.chunk(tail.visible).await;
        }
    }

    /// Send captured reasoning and visible text to their destinations.
    async fn route(&self, filters: &mut Filters, out: &mut Assembled, split: FilterOutput) {
        if !split.captured.is_empty() {
            out.thinking.push_str(&split.captured);
            if self.show_thinking.load(Ordering::Relaxed) {
                self.events
                    .emit(AgentStreamEvent::Thinking {
                        content: split.captured,
                    })
                    .await;
            }
        }
        let shown = filters.calls.push(&split.visible).visible;
        out.visible.push_str(&shown);
        if !filters.quiet {
            self.events.chunk(shown).await;
        }
    }
}

/// Commit a response that carries no calls. Responses with no visible text
/// (only reasoning, only markup) leave no message behind.
fn push_visible(conversation: &mut Conversation, response: &Assembled) {
    let text = response.visible.trim();
    if !text.is_empty() {
        conversation.push(Message::assistant(text));
    }
}

fn blank_arguments(arguments: &str) -> bool {
    matches!(arguments.trim(), "" | "{}" | "null")
}

/// Fold a streamed call fragment into the calls seen so far. An empty id
/// continues the most recent call.
fn merge_delta(calls: &mut Vec<ToolCall>, delta: ToolCallDelta) {
    let existing = if delta.id.is_empty() {
        calls.last_mut()
    } else {
        calls.iter_mut().find(|c| c.id == delta.id)
    };
    match existing {
        Some(call) => {
            if !delta.name.is_empty() {
                call.name = delta.name;
            }
            call.arguments.push_str(&delta.arguments);
        }
        None => {
            let id = if delta.id.is_empty() {
                generate_call_id()
            } else {
                delta.id
            };
            calls.push(ToolCall::new(id, delta.name, delta.arguments));
        }
    }
}

/// Render the conversation for a model without native tool calling: calls
/// become `<tool_call>` text, results become user messages, and the tool
/// protocol joins the system prompt.
fn text_mode_messages(messages: &[Message], instructions: &str) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len() + 1);
    let mut names: HashMap<&str, &str> = HashMap::new();
    let mut results: Vec<String> = Vec::new();

    for msg in messages {
        if let Some((call_id, content, is_error)) = msg.tool_result_part() {
            let name = names.get(call_id).copied().unwrap_or("tool");
            let label = if is_error { "error" } else { "result" };
            results.push(format!("[Tool {label}: {name} ({call_id})]\n{content}"));
            continue;
        }
        flush_results(&mut out, &mut results);

        if msg.role == Role::Assistant && msg.tool_calls().next().is_some() {
            let mut text = msg.text();
            for (id, name, arguments) in msg.tool_calls() {
                names.insert(id, name);
                let arguments = if arguments.trim().is_empty() { "{}" } else { arguments };
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&format!(
                    "<tool_call>{{\"name\":{},\"arguments\":{arguments}}}</tool_call>",
                    serde_json::Value::from(name)
                ));
            }
            out.push(Message::assistant(text));
        } else {
            out.push(msg.clone());
        }
    }
    flush_results(&mut out, &mut results);

    match out.first() {
        Some(first) if first.role == Role::System => {
            out[0] = Message::system(format!("{}\n\n{instructions}", first.text()));
        }
        _ => out.insert(0, Message::system(instructions)),
    }
    out
}

fn flush_results(out: &mut Vec<Message>, results: &mut Vec<String>) {
    if !results.is_empty() {
        out.push(Message::user(results.join("\n\n")));
        results.clear();
    }
}
