//! Meta stacks: ordered, deduplicated prefix/suffix/meta accumulation.

mod accumulator;
mod element;

use std::str::FromStr;

use tracing::warn;

use crate::error::{DomainError, DomainResult};
use crate::holder::HolderIdentifier;
use crate::node::{ChatMetaType, NodeKind};
use crate::resolver::{ResolvedNode, ResolvedNodes};

pub use accumulator::{MetaAccumulator, MetaData, PRIMARY_GROUP_META_KEY, WEIGHT_META_KEY};
pub use element::StackElement;

/// The node family a stack is built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetaFamily {
    Prefix,
    Suffix,
    /// `meta.<key>.<value>` nodes for one key; all have priority 0.
    Meta(String),
}

impl MetaFamily {
    fn extract<'a>(&self, resolved: &'a ResolvedNode) -> Option<(i32, &'a str)> {
        let node = &resolved.node;
        if !node.value() {
            return None;
        }
        match (self, node.kind()) {
            (MetaFamily::Meta(wanted), NodeKind::Meta { key, value }) if key == wanted => {
                Some((0, value.as_str()))
            }
            (MetaFamily::Prefix | MetaFamily::Suffix, kind) => {
                let (chat_type, priority, value) = kind.chat_meta()?;
                let wanted = match self {
                    MetaFamily::Prefix => ChatMetaType::Prefix,
                    _ => ChatMetaType::Suffix,
                };
                (chat_type == wanted).then_some((priority, value))
            }
            _ => None,
        }
    }
}

impl From<ChatMetaType> for MetaFamily {
    fn from(chat_type: ChatMetaType) -> Self {
        match chat_type {
            ChatMetaType::Prefix => MetaFamily::Prefix,
            ChatMetaType::Suffix => MetaFamily::Suffix,
        }
    }
}

/// Policy for entries with equal values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DuplicateRemoval {
    RetainAll,
    #[default]
    FirstOnly,
    LastOnly,
}

impl FromStr for DuplicateRemoval {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "retain-all" | "none" => Ok(DuplicateRemoval::RetainAll),
            "first-only" => Ok(DuplicateRemoval::FirstOnly),
            "last-only" => Ok(DuplicateRemoval::LastOnly),
            _ => Err(DomainError::InvalidStackElement {
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaStackDefinition {
    pub elements: Vec<StackElement>,
    pub duplicates: DuplicateRemoval,
    pub start_spacer: String,
    pub middle_spacer: String,
    pub end_spacer: String,
}

impl Default for MetaStackDefinition {
    fn default() -> Self {
        Self {
            elements: vec![StackElement::Highest],
            duplicates: DuplicateRemoval::FirstOnly,
            start_spacer: String::new(),
            middle_spacer: " ".to_string(),
            end_spacer: String::new(),
        }
    }
}

impl MetaStackDefinition {
    /// Parses element strings. Track-based elements are skipped with a warning.
    pub fn parse_elements<S: AsRef<str>>(format: &[S]) -> DomainResult<Vec<StackElement>> {
        let mut elements = Vec::with_capacity(format.len());
        for raw in format {
            let raw = raw.as_ref();
            if StackElement::is_track_element(raw) {
                warn!(element = raw, "track-based meta stack elements are not supported, skipping");
                continue;
            }
            elements.push(raw.parse()?);
        }
        Ok(elements)
    }
}

/// An entry of a built stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaStackEntry {
    pub priority: i32,
    pub value: String,
    pub origin: HolderIdentifier,
}

pub struct MetaStack;

impl MetaStack {
    /// Builds the stack for `family` from resolved nodes.
    ///
    /// Each element contributes at most one entry; ties on priority keep the
    /// earlier node in resolver order. Duplicate values are then removed per
    /// the definition and survivors are stably sorted by priority, highest first.
    pub fn build(
        resolved: &ResolvedNodes,
        definition: &MetaStackDefinition,
        family: &MetaFamily,
    ) -> Vec<MetaStackEntry> {
        let candidates: Vec<(i32, &str, &ResolvedNode)> = resolved
            .iter()
            .filter_map(|r| family.extract(r).map(|(priority, value)| (priority, value, r)))
            .collect();

        let mut entries: Vec<MetaStackEntry> = definition
            .elements
            .iter()
            .filter_map(|element| {
                let higher = element.prefers_higher();
                candidates
                    .iter()
                    .filter(|(_, _, r)| element.accepts(r))
                    .fold(None, |best: Option<&(i32, &str, &ResolvedNode)>, candidate| match best {
                        Some(b) if (higher && candidate.0 <= b.0) || (!higher && candidate.0 >= b.0) => {
                            Some(b)
                        }
                        _ => Some(candidate),
                    })
                    .map(|(priority, value, r)| MetaStackEntry {
                        priority: *priority,
                        value: value.to_string(),
                        origin: r.origin.clone(),
                    })
            })
            .collect();

        match definition.duplicates {
            DuplicateRemoval::RetainAll => {}
            DuplicateRemoval::FirstOnly => {
                let mut seen = Vec::new();
                entries.retain(|e| {
                    if seen.contains(&e.value) {
                        false
                    } else {
                        seen.push(e.value.clone());
                        true
                    }
                });
            }
            DuplicateRemoval::LastOnly => {
                let mut kept: Vec<MetaStackEntry> = Vec::new();
                for entry in entries.into_iter().rev() {
                    if !kept.iter().any(|k| k.value == entry.value) {
                        kept.push(entry);
                    }
                }
                kept.reverse();
                entries = kept;
            }
        }

        entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        entries
    }

    /// Joins entry values with the definition's spacers; `None` when empty.
    pub fn collapse(entries: &[MetaStackEntry], definition: &MetaStackDefinition) -> Option<String> {
        if entries.is_empty() {
            return None;
        }
        let middle = entries
            .iter()
            .map(|e| e.value.as_str())
            .collect::<Vec<_>>()
            .join(&definition.middle_spacer);
        Some(format!(
            "{}{}{}",
            definition.start_spacer, middle, definition.end_spacer
        ))
    }
}
