//! Repeated-failure detection for tool calls.
//!
//! Keyed by tool name plus the exact argument JSON. Concurrent tasks of one
//! batch record into the same tracker, so updates go through the `DashMap`
//! entry API rather than a read followed by a write.

use dashmap::DashMap;
use openorca_core::ToolOutcome;

#[derive(Debug, Clone)]
struct FailureEntry {
    last_error: String,
    count: u32,
}

#[derive(Debug, Default)]
pub struct RetryFailureTracker {
    failures: DashMap<(String, String), FailureEntry>,
}

impl RetryFailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outcome and return the consecutive identical-failure count
    /// for this call (0 after a success).
    pub fn record(&self, tool: &str, arguments: &str, outcome: &ToolOutcome) -> u32 {
        let key = (tool.to_string(), arguments.to_string());
        if !outcome.is_error {
            self.failures.remove(&key);
            return 0;
        }
        let mut entry = self.failures.entry(key).or_insert_with(|| FailureEntry {
            last_error: outcome.output.clone(),
            count: 0,
        });
        if entry.last_error == outcome.output {
            entry.count += 1;
        } else {
            entry.last_error = outcome.output.clone();
            entry.count = 1;
        }
        entry.count
    }

    pub fn count(&self, tool: &str, arguments: &str) -> u32 {
        self.failures
            .get(&(tool.to_string(), arguments.to_string()))
            .map_or(0, |e| e.count)
    }

    /// Highest count across all keys.
    pub fn max_count(&self) -> u32 {
        self.failures.iter().map(|e| e.count).max().unwrap_or(0)
    }

    pub fn reset(&self) {
        self.failures.clear();
    }
}

/// Rewrite a failed result according to how often it has repeated.
pub fn escalate(tool: &str, outcome: ToolOutcome, count: u32) -> ToolOutcome {
    match count {
        0 | 1 => outcome,
        2 => ToolOutcome::error(format!(
            "{}\n\n[WARNING] This exact call to {tool} has now failed twice with the same error. \
             Do not retry it with identical arguments. Change the arguments or try another approach.",
            outcome.output
        )),
        n => ToolOutcome::error(format!(
            "[STOP] {tool} has failed {n} times with identical arguments and the same error:\n{}\n\n\
             Do not call {tool} with these arguments again. Use a different tool or approach, \
             or explain the problem to the user.",
            outcome.output
        )),
    }
}
