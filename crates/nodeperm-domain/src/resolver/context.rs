//! Internal traversal state for the inheritance resolver.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

/// Per-resolution state, owned by a single call and never shared.
#[derive(Debug)]
pub(crate) struct TraversalContext {
    /// Instant expiry is evaluated against for the whole resolution.
    pub(crate) now: DateTime<Utc>,
    /// Group names already expanded (cycle and duplicate guard).
    visited: HashSet<String>,
    /// Global insertion counter used as the final ordering tie-break.
    next_seq: u64,
}

impl TraversalContext {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            visited: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Marks a group visited; returns false if it already was.
    pub(crate) fn mark_visited(&mut self, group: &str) -> bool {
        if self.visited.contains(group) {
            return false;
        }
        self.visited.insert(group.to_string())
    }

    pub(crate) fn is_visited(&self, group: &str) -> bool {
        self.visited.contains(group)
    }

    pub(crate) fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}
