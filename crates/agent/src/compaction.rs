//! Context compaction.
//!
//! When the conversation grows past the configured share of the context
//! window, everything before the most recent turns is replaced by one
//! summary message. The summary comes from a non-streaming request to the
//! same model; if that fails, a clipped transcript stands in for it.

use crate::prompts::{SUMMARIZER_SYSTEM, summarizer_request};
use openorca_core::{ContentPart, Conversation, Message, Provider, ProviderRequest};
use std::fmt::Write;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_SOURCE_CHARS: usize = 12_000;
const MAX_SUMMARY_CHARS: usize = 2_000;
const FALLBACK_LINE_CHARS: usize = 200;
const FALLBACK_LINES: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionReport {
    pub removed: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    /// False when the deterministic fallback was used.
    pub summarized: bool,
}

/// Summarize everything before the last `keep_recent_turns` turns.
///
/// Returns `None` when there is nothing to compact or the generation was
/// cancelled before the summary arrived.
pub async fn compact(
    provider: &dyn Provider,
    model: &str,
    conversation: &mut Conversation,
    keep_recent_turns: usize,
    cancel: &CancellationToken,
) -> Option<CompactionReport> {
    let range = conversation.compactable_range(keep_recent_turns)?;
    let tokens_before = conversation.estimated_tokens();
    let transcript = build_transcript(&conversation.messages()[range.clone()]);

    let request = ProviderRequest {
        model: model.to_string(),
        messages: vec![
            Message::system(SUMMARIZER_SYSTEM),
            Message::user(summarizer_request(&truncate_chars(&transcript, MAX_SOURCE_CHARS))),
        ],
        temperature: 0.2,
        max_tokens: Some(1024),
        tools: Vec::new(),
        stream: false,
    };

    let response = tokio::select! {
        r = provider.complete(request) => r,
        _ = cancel.cancelled() => return None,
    };
    let (summary, summarized) = match response {
        Ok(resp) if !resp.message.text().trim().is_empty() => (resp.message.text(), true),
        Ok(_) => {
            warn!("Summarizer returned nothing, using truncated transcript");
            (fallback_summary(&transcript), false)
        }
        Err(e) => {
            warn!(error = %e, "Summarizer failed, using truncated transcript");
            (fallback_summary(&transcript), false)
        }
    };

    let removed = conversation
        .compact_with_summary(range, &truncate_chars(&summary, MAX_SUMMARY_CHARS));
    let tokens_after = conversation.estimated_tokens();
    info!(removed, tokens_before, tokens_after, summarized, "Compacted conversation");
    Some(CompactionReport {
        removed,
        tokens_before,
        tokens_after,
        summarized,
    })
}

/// One `ROLE: content` line per part.
pub fn build_transcript(messages: &[Message]) -> String {
    let mut transcript = String::new();
    for msg in messages {
        let role = msg.role.to_string().to_uppercase();
        for part in &msg.parts {
            let _ = match part {
                ContentPart::Text { text } => writeln!(transcript, "{role}: {}", text.trim()),
                ContentPart::ToolCall {
                    name, arguments, ..
                } => writeln!(transcript, "{role}: [called {name} {arguments}]"),
                ContentPart::ToolResult {
                    content, is_error, ..
                } => {
                    let label = if *is_error { "tool error" } else { "tool result" };
                    writeln!(transcript, "{role}: [{label}] {}", content.trim())
                }
            };
        }
    }
    transcript
}

/// Last lines of the transcript, each clipped.
fn fallback_summary(transcript: &str) -> String {
    let lines: Vec<String> = transcript
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| truncate_chars(l, FALLBACK_LINE_CHARS))
        .collect();
    let skip = lines.len().saturating_sub(FALLBACK_LINES);
    lines[skip..].join("\n")
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
