//! Repeated-result detection for the tool loop.
//!
//! When the model keeps issuing searches that come back with the same
//! result, the guard produces a system hint telling it to stop.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Tracks the streak of identical tool results.
#[derive(Debug)]
pub struct LoopGuard {
    /// (tool name, result fingerprint) of the last call
    last: Option<(String, u64)>,
    /// Consecutive identical results including the last one
    streak: usize,
    /// Streak length that triggers the hint
    threshold: usize,
}

impl LoopGuard {
    /// Create a guard that fires after `threshold` identical results
    pub fn new(threshold: usize) -> Self {
        Self {
            last: None,
            streak: 0,
            threshold: threshold.max(1),
        }
    }

    /// Record a tool result. Returns a hint when the streak reaches the
    /// threshold; the streak then starts over.
    pub fn record(&mut self, tool_name: &str, result: &str) -> Option<String> {
        let fingerprint = Self::fingerprint(result);

        let repeated = self
            .last
            .as_ref()
            .is_some_and(|(name, fp)| name == tool_name && *fp == fingerprint);
        self.streak = if repeated { self.streak + 1 } else { 1 };
        self.last = Some((tool_name.to_string(), fingerprint));

        if self.streak < self.threshold {
            return None;
        }

        self.reset();
        Some(format!(
            "The tool '{}' returned the same result {} times in a row. \
             Do not call it again with a similar query. \
             Answer the user with the information you already have.",
            tool_name, self.threshold
        ))
    }

    /// Forget the current streak
    pub fn reset(&mut self) {
        self.last = None;
        self.streak = 0;
    }

    fn fingerprint(result: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        result.trim().hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(3)
    }
}
