//! Shared cache of compiled regex permission patterns.

use std::sync::Arc;

use dashmap::DashMap;
use regex::{Regex, RegexBuilder};
use tracing::debug;

/// Compiles each pattern once; invalid patterns are remembered as `None`.
///
/// Owned by the engine and shared by every calculator it builds.
#[derive(Debug, Default)]
pub struct PatternCache {
    patterns: DashMap<String, Option<Arc<Regex>>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the full-match regex for `pattern`, or `None` if it is invalid.
    ///
    /// Matching ignores case, since checked permissions are lowercased.
    pub fn compile(&self, pattern: &str) -> Option<Arc<Regex>> {
        if let Some(compiled) = self.patterns.get(pattern) {
            return compiled.clone();
        }
        self.patterns
            .entry(pattern.to_string())
            .or_insert_with(|| match RegexBuilder::new(&format!("^(?:{pattern})$"))
                .case_insensitive(true)
                .build()
            {
                Ok(regex) => Some(Arc::new(regex)),
                Err(err) => {
                    debug!(pattern, error = %err, "ignoring invalid regex permission");
                    None
                }
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
