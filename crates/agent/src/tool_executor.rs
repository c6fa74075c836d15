//! Batch execution of tool calls.
//!
//! A batch runs in three phases:
//!
//! 1. **Gate** (sequential): announce every call, then pre-resolve the ones
//!    that must not run (oversized arguments, plan mode, sandbox mode).
//! 2. **Execute** (bounded parallel): the rest run in a `JoinSet` under a
//!    semaphore, each racing its timeout against the generation token.
//! 3. **Commit** (sequential, request order): escalate repeated failures and
//!    append the assistant message plus one result per call.
//!
//! Nothing is written to the conversation until phase 3, so a cancelled
//! batch leaves it untouched.

use crate::retry_tracker::{RetryFailureTracker, escalate};
use crate::stream_event::{AgentStreamEvent, EventSink};
use futures::FutureExt;
use openorca_config::AgentConfig;
use openorca_core::{
    Conversation, Message, RiskLevel, ToolCall, ToolError, ToolInvoker, ToolOutcome,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub max_concurrency: usize,
    pub timeout: Duration,
    pub max_argument_bytes: usize,
    /// Only read-only tools run while planning.
    pub plan_mode: bool,
    /// Only read-only tools run in the sandbox.
    pub sandbox_mode: bool,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

impl ExecutorSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_concurrency: config.max_parallel_tools.max(1),
            timeout: Duration::from_secs(config.tool_timeout_secs),
            max_argument_bytes: config.max_tool_argument_bytes,
            plan_mode: config.plan_mode,
            sandbox_mode: config.sandbox_mode,
        }
    }
}

/// Result of one call after escalation.
#[derive(Debug, Clone)]
pub struct CallResult {
    pub call: ToolCall,
    pub outcome: ToolOutcome,
    /// Consecutive identical failures, 0 for successes and gated calls.
    pub failure_count: u32,
    /// False when the call was pre-resolved without invoking the tool.
    pub executed: bool,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub results: Vec<CallResult>,
    /// Highest identical-failure count across all tracked calls.
    pub max_failure_count: u32,
}

/// The generation was cancelled while the batch ran; nothing was committed.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("tool batch cancelled")]
pub struct BatchCancelled;

pub struct ToolExecutor {
    invoker: Arc<dyn ToolInvoker>,
    tracker: Arc<RetryFailureTracker>,
    settings: ExecutorSettings,
}

impl ToolExecutor {
    pub fn new(
        invoker: Arc<dyn ToolInvoker>,
        tracker: Arc<RetryFailureTracker>,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            invoker,
            tracker,
            settings,
        }
    }

    /// Run `calls` and commit `assistant` followed by their results.
    pub async fn execute_batch(
        &self,
        assistant: Message,
        calls: Vec<ToolCall>,
        conversation: &mut Conversation,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Result<BatchReport, BatchCancelled> {
        let mut outcomes: Vec<Option<ToolOutcome>> = vec![None; calls.len()];
        let mut gated = vec![false; calls.len()];
        let mut counts = vec![0u32; calls.len()];

        // Phase 1: announce and gate
        for (idx, call) in calls.iter().enumerate() {
            events
                .emit(AgentStreamEvent::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call
                        .arguments_value()
                        .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone())),
                })
                .await;
            if let Some(reason) = self.gate(call) {
                debug!(tool = %call.name, "Tool call pre-resolved");
                outcomes[idx] = Some(ToolOutcome::error(reason));
                gated[idx] = true;
            }
        }

        // Phase 2: execute the rest
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let mut set = JoinSet::new();
        for (idx, call) in calls.iter().enumerate() {
            if gated[idx] {
                continue;
            }
            set.spawn(run_call(
                idx,
                call.name.clone(),
                call.arguments.clone(),
                Arc::clone(&self.invoker),
                Arc::clone(&self.tracker),
                Arc::clone(&semaphore),
                cancel.clone(),
                self.settings.timeout,
            ));
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some((idx, outcome, count))) => {
                    outcomes[idx] = Some(outcome);
                    counts[idx] = count;
                }
                Ok(None) => {
                    set.abort_all();
                    info!("Tool batch cancelled, nothing committed");
                    return Err(BatchCancelled);
                }
                Err(e) => warn!(error = %e, "Tool task did not complete"),
            }
        }
        if cancel.is_cancelled() {
            return Err(BatchCancelled);
        }

        // Phase 3: commit in request order
        let mut results = Vec::with_capacity(calls.len());
        for (((call, outcome), count), gated) in
            calls.into_iter().zip(outcomes).zip(counts).zip(gated)
        {
            let executed = !gated && outcome.is_some();
            let outcome = outcome.unwrap_or_else(|| {
                ToolOutcome::error(format!("Tool {} did not return a result", call.name))
            });
            let outcome = if executed { escalate(&call.name, outcome, count) } else { outcome };
            events
                .emit(AgentStreamEvent::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    output: outcome.output.clone(),
                    success: !outcome.is_error,
                })
                .await;
            results.push(CallResult {
                call,
                outcome,
                failure_count: count,
                executed,
            });
        }

        conversation.push(assistant);
        for result in &results {
            conversation.push(Message::tool_result(
                result.call.id.clone(),
                result.outcome.output.clone(),
                result.outcome.is_error,
            ));
        }

        Ok(BatchReport {
            results,
            max_failure_count: self.tracker.max_count(),
        })
    }

    /// Reason a call must not run, if any.
    fn gate(&self, call: &ToolCall) -> Option<String> {
        let size = call.arguments.len();
        if size > self.settings.max_argument_bytes {
            return Some(format!(
                "Arguments for {} are {size} bytes, over the {}-byte limit. \
                 Split the work into smaller calls (for example, write a large file in several parts).",
                call.name, self.settings.max_argument_bytes
            ));
        }
        let risk = self.invoker.risk_of(&call.name);
        if risk == RiskLevel::ReadOnly {
            return None;
        }
        let reason = if self.settings.plan_mode {
            format!(
                "Plan mode is active and {risk} tools are not executed. Only read-only tools may \
                 run while planning. Describe the change you would make instead."
            )
        } else if self.settings.sandbox_mode {
            format!("Sandbox mode is active and {risk} tools are blocked. Only read-only tools are available.")
        } else {
            return None;
        };
        Some(
            ToolError::PermissionDenied {
                tool_name: call.name.clone(),
                reason,
            }
            .to_string(),
        )
    }
}

/// One call inside the task group. `None` means the generation was cancelled.
#[allow(clippy::too_many_arguments)]
async fn run_call(
    idx: usize,
    name: String,
    arguments: String,
    invoker: Arc<dyn ToolInvoker>,
    tracker: Arc<RetryFailureTracker>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    timeout: Duration,
) -> Option<(usize, ToolOutcome, u32)> {
    let _permit = tokio::select! {
        permit = semaphore.acquire_owned() => permit.ok()?,
        _ = cancel.cancelled() => return None,
    };

    let call_token = cancel.child_token();
    let invocation = AssertUnwindSafe(invoker.invoke(&name, &arguments, call_token.clone()))
        .catch_unwind();

    let outcome = tokio::select! {
        result = tokio::time::timeout(timeout, invocation) => match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => {
                warn!(tool = %name, "Tool panicked");
                ToolOutcome::error(format!(
                    "Tool {name} failed unexpectedly: {}",
                    panic_message(panic.as_ref())
                ))
            }
            Err(_) => {
                call_token.cancel();
                warn!(tool = %name, timeout_secs = timeout.as_secs(), "Tool timed out");
                let err = ToolError::Timeout {
                    tool_name: name.clone(),
                    timeout_secs: timeout.as_secs(),
                };
                ToolOutcome::error(format!(
                    "{err}. For long-running commands such as servers or watchers, start them in \
                     the background (e.g. `cmd > out.log 2>&1 &`) and check their output afterwards."
                ))
            }
        },
        _ = cancel.cancelled() => return None,
    };

    let count = tracker.record(&name, &arguments, &outcome);
    debug!(tool = %name, is_error = outcome.is_error, failures = count, "Tool finished");
    Some((idx, outcome, count))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
