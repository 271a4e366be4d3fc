//! Tristate permission calculator.
//!
//! A calculator is built from one resolution and answers any number of
//! checks against it. Processors run in order (direct, regex, wildcard) and
//! the first definitive result wins, so an exact node always beats a
//! wildcard regardless of where either sits in the resolved order.

mod pattern_cache;
mod processor;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::{DomainError, DomainResult};
use crate::node::Node;
use crate::resolver::ResolvedNodes;

pub use pattern_cache::PatternCache;
pub use processor::{
    DirectProcessor, PermissionProcessor, ProcessorKind, RegexProcessor, WildcardProcessor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tristate {
    True,
    False,
    Undefined,
}

impl Tristate {
    /// Returns the boolean value, or `default` when undefined.
    pub fn as_bool_or(self, default: bool) -> bool {
        match self {
            Tristate::True => true,
            Tristate::False => false,
            Tristate::Undefined => default,
        }
    }

    pub fn is_defined(self) -> bool {
        self != Tristate::Undefined
    }
}

impl From<bool> for Tristate {
    fn from(value: bool) -> Self {
        if value {
            Tristate::True
        } else {
            Tristate::False
        }
    }
}

impl fmt::Display for Tristate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tristate::True => f.write_str("true"),
            Tristate::False => f.write_str("false"),
            Tristate::Undefined => f.write_str("undefined"),
        }
    }
}

/// A check result with the node and processor that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TristateResult {
    pub result: Tristate,
    pub node: Option<Node>,
    pub processor: Option<ProcessorKind>,
}

impl TristateResult {
    pub const UNDEFINED: TristateResult = TristateResult {
        result: Tristate::Undefined,
        node: None,
        processor: None,
    };
}

/// Which optional processors are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalculatorSettings {
    pub apply_wildcards: bool,
    pub apply_regex: bool,
}

impl Default for CalculatorSettings {
    fn default() -> Self {
        Self {
            apply_wildcards: true,
            apply_regex: true,
        }
    }
}

/// Permission calculator over a fixed set of resolved nodes.
#[derive(Debug)]
pub struct PermissionCalculator {
    processors: Vec<Box<dyn PermissionProcessor>>,
    lookup_cache: DashMap<String, TristateResult>,
}

impl PermissionCalculator {
    pub fn new(resolved: &ResolvedNodes, settings: CalculatorSettings, patterns: &PatternCache) -> Self {
        // First occurrence of each key, in resolver order.
        let mut ordered: Vec<Node> = Vec::new();
        let mut source: HashMap<String, Node> = HashMap::new();
        for resolved in resolved.iter() {
            if !source.contains_key(resolved.node.key()) {
                source.insert(resolved.node.key().to_string(), resolved.node.clone());
                ordered.push(resolved.node.clone());
            }
        }

        let mut processors: Vec<Box<dyn PermissionProcessor>> = Vec::with_capacity(3);
        if settings.apply_regex {
            processors.push(Box::new(RegexProcessor::new(&ordered, patterns)));
        }
        if settings.apply_wildcards {
            processors.push(Box::new(WildcardProcessor::new(&source)));
        }
        processors.insert(0, Box::new(DirectProcessor::new(Arc::new(source))));

        Self::with_processors(processors)
    }

    /// Builds a calculator from an explicit processor pipeline.
    pub fn with_processors(processors: Vec<Box<dyn PermissionProcessor>>) -> Self {
        Self {
            processors,
            lookup_cache: DashMap::new(),
        }
    }

    /// Checks `permission` (case-insensitive). An empty key is rejected.
    pub fn check_permission(&self, permission: &str) -> DomainResult<TristateResult> {
        let permission = permission.trim().to_lowercase();
        if permission.is_empty() {
            return Err(DomainError::InvalidPermission { value: permission });
        }
        if let Some(cached) = self.lookup_cache.get(&permission) {
            return Ok(cached.clone());
        }

        let result = self
            .processors
            .iter()
            .map(|processor| processor.has_permission(&permission))
            .find(|result| result.result.is_defined())
            .unwrap_or(TristateResult::UNDEFINED);
        self.lookup_cache.insert(permission, result.clone());
        Ok(result)
    }

    /// Number of distinct keys checked so far.
    pub fn cached_lookups(&self) -> usize {
        self.lookup_cache.len()
    }
}
