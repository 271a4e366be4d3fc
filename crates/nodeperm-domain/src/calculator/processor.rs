//! Permission processors: the stages of the calculator pipeline.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;

use super::{PatternCache, Tristate, TristateResult};
use crate::node::{Node, NodeKind};

/// Which processor produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    Direct,
    Regex,
    Wildcard,
}

/// One stage of the calculator. Returns `Undefined` to defer to the next stage.
pub trait PermissionProcessor: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProcessorKind;

    /// `permission` is already lowercased.
    fn has_permission(&self, permission: &str) -> TristateResult;
}

fn defined(node: &Node, kind: ProcessorKind) -> TristateResult {
    TristateResult {
        result: Tristate::from(node.value()),
        node: Some(node.clone()),
        processor: Some(kind),
    }
}

/// Exact key lookup.
#[derive(Debug)]
pub struct DirectProcessor {
    source: Arc<HashMap<String, Node>>,
}

impl DirectProcessor {
    pub fn new(source: Arc<HashMap<String, Node>>) -> Self {
        Self { source }
    }
}

impl PermissionProcessor for DirectProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Direct
    }

    fn has_permission(&self, permission: &str) -> TristateResult {
        match self.source.get(permission) {
            Some(node) => defined(node, self.kind()),
            None => TristateResult::UNDEFINED,
        }
    }
}

/// `r=<pattern>` nodes, first full match in resolver order.
#[derive(Debug)]
pub struct RegexProcessor {
    patterns: Vec<(Arc<Regex>, Node)>,
}

impl RegexProcessor {
    pub fn new(ordered: &[Node], cache: &PatternCache) -> Self {
        let patterns = ordered
            .iter()
            .filter_map(|node| match node.kind() {
                NodeKind::RegexPermission { pattern } => {
                    cache.compile(pattern).map(|regex| (regex, node.clone()))
                }
                _ => None,
            })
            .collect();
        Self { patterns }
    }
}

impl PermissionProcessor for RegexProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Regex
    }

    fn has_permission(&self, permission: &str) -> TristateResult {
        self.patterns
            .iter()
            .find(|(regex, _)| regex.is_match(permission))
            .map_or(TristateResult::UNDEFINED, |(_, node)| defined(node, self.kind()))
    }
}

/// `a.b.*` style wildcards, tried from the most specific parent to `*`.
#[derive(Debug)]
pub struct WildcardProcessor {
    wildcards: HashMap<String, Node>,
}

impl WildcardProcessor {
    pub fn new(source: &HashMap<String, Node>) -> Self {
        let wildcards = source
            .iter()
            .filter(|(_, node)| node.is_wildcard())
            .map(|(key, node)| (key.clone(), node.clone()))
            .collect();
        Self { wildcards }
    }
}

impl PermissionProcessor for WildcardProcessor {
    fn kind(&self) -> ProcessorKind {
        ProcessorKind::Wildcard
    }

    fn has_permission(&self, permission: &str) -> TristateResult {
        let mut remaining = permission;
        while let Some(idx) = remaining.rfind('.') {
            remaining = &remaining[..idx];
            if let Some(node) = self.wildcards.get(&format!("{remaining}.*")) {
                return defined(node, self.kind());
            }
        }
        match self.wildcards.get("*") {
            Some(node) => defined(node, self.kind()),
            None => TristateResult::UNDEFINED,
        }
    }
}
