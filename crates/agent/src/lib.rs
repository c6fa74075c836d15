//! The OpenOrca agent loop and its streaming tool-call protocol engine.
//!
//! A turn runs **Stream → Filter → Parse → Execute → Loop**:
//!
//! 1. Stream the model response, splitting reasoning from visible text
//!    with a [`TagFilter`]
//! 2. Extract tool calls from native deltas or from tagged text
//! 3. Execute the calls as one batch with bounded concurrency
//! 4. Feed the results back and repeat until the model answers
//!
//! [`AgentLoop`] owns the turn. The other modules are usable on their own.

pub mod compaction;
pub mod loop_runner;
pub mod prompts;
pub mod retry_tracker;
pub mod stream_event;
pub mod tag_filter;
pub mod tool_call_parser;
pub mod tool_executor;

#[cfg(test)]
mod test_helpers;

pub use compaction::CompactionReport;
pub use loop_runner::{AgentError, AgentLoop, LoopSettings, StopReason, TurnOutcome, TurnStatus};
pub use retry_tracker::RetryFailureTracker;
pub use stream_event::{AgentStreamEvent, EventSink};
pub use tag_filter::{FilterOutput, RegionMode, TagFilter, TagSpec};
pub use tool_call_parser::parse_tool_calls;
pub use tool_executor::{BatchCancelled, BatchReport, CallResult, ExecutorSettings, ToolExecutor};
