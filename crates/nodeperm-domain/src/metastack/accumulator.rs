//! Accumulates resolved nodes into [`MetaData`].

use std::collections::BTreeMap;

use super::{MetaFamily, MetaStack, MetaStackDefinition, MetaStackEntry};
use crate::node::NodeKind;
use crate::resolver::ResolvedNodes;

/// Meta key holding the accumulated weight, unless set explicitly.
pub const WEIGHT_META_KEY: &str = "weight";
/// Meta key holding the primary group, unless set explicitly.
pub const PRIMARY_GROUP_META_KEY: &str = "primarygroup";

/// Computed meta for one holder under one set of query options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetaData {
    prefixes: Vec<(i32, String)>,
    suffixes: Vec<(i32, String)>,
    meta: BTreeMap<String, Vec<String>>,
    weight: i32,
    display_name: Option<String>,
    primary_group: Option<String>,
    prefix: Option<String>,
    suffix: Option<String>,
    prefix_entries: Vec<MetaStackEntry>,
    suffix_entries: Vec<MetaStackEntry>,
}

impl MetaData {
    /// The collapsed prefix stack.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// The collapsed suffix stack.
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }

    /// Prefixes by priority, highest first; the first node per priority wins.
    pub fn prefixes(&self) -> &[(i32, String)] {
        &self.prefixes
    }

    pub fn suffixes(&self) -> &[(i32, String)] {
        &self.suffixes
    }

    pub fn prefix_stack(&self) -> &[MetaStackEntry] {
        &self.prefix_entries
    }

    pub fn suffix_stack(&self) -> &[MetaStackEntry] {
        &self.suffix_entries
    }

    /// First value recorded for `key`, in resolver order.
    pub fn meta_value(&self, key: &str) -> Option<&str> {
        self.meta
            .get(&key.to_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn meta_values(&self, key: &str) -> &[String] {
        self.meta
            .get(&key.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn meta(&self) -> &BTreeMap<String, Vec<String>> {
        &self.meta
    }

    /// Highest weight among resolved weight nodes; 0 when none.
    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn primary_group(&self) -> Option<&str> {
        self.primary_group.as_deref()
    }
}

/// Builds [`MetaData`] with fixed prefix and suffix stack definitions.
#[derive(Debug, Clone, Default)]
pub struct MetaAccumulator {
    prefix_stack: MetaStackDefinition,
    suffix_stack: MetaStackDefinition,
}

impl MetaAccumulator {
    pub fn new(prefix_stack: MetaStackDefinition, suffix_stack: MetaStackDefinition) -> Self {
        Self {
            prefix_stack,
            suffix_stack,
        }
    }

    pub fn accumulate(&self, resolved: &ResolvedNodes, primary_group: Option<String>) -> MetaData {
        let mut data = MetaData {
            primary_group,
            ..MetaData::default()
        };

        for node in resolved.iter().map(|r| &r.node).filter(|n| n.value()) {
            match node.kind() {
                NodeKind::Prefix { priority, value } => {
                    push_if_absent(&mut data.prefixes, *priority, value);
                }
                NodeKind::Suffix { priority, value } => {
                    push_if_absent(&mut data.suffixes, *priority, value);
                }
                NodeKind::Meta { key, value } => {
                    data.meta.entry(key.clone()).or_default().push(value.clone());
                }
                NodeKind::Weight { weight } => {
                    data.weight = data.weight.max(*weight);
                }
                NodeKind::DisplayName { name } => {
                    if data.display_name.is_none() {
                        data.display_name = Some(name.clone());
                    }
                }
                NodeKind::Permission
                | NodeKind::RegexPermission { .. }
                | NodeKind::Inheritance { .. } => {}
            }
        }
        data.prefixes.sort_by(|a, b| b.0.cmp(&a.0));
        data.suffixes.sort_by(|a, b| b.0.cmp(&a.0));

        if data.weight != 0 && !data.meta.contains_key(WEIGHT_META_KEY) {
            data.meta
                .insert(WEIGHT_META_KEY.to_string(), vec![data.weight.to_string()]);
        }
        if let Some(group) = &data.primary_group {
            if !data.meta.contains_key(PRIMARY_GROUP_META_KEY) {
                data.meta
                    .insert(PRIMARY_GROUP_META_KEY.to_string(), vec![group.clone()]);
            }
        }

        data.prefix_entries = MetaStack::build(resolved, &self.prefix_stack, &MetaFamily::Prefix);
        data.suffix_entries = MetaStack::build(resolved, &self.suffix_stack, &MetaFamily::Suffix);
        data.prefix = MetaStack::collapse(&data.prefix_entries, &self.prefix_stack);
        data.suffix = MetaStack::collapse(&data.suffix_entries, &self.suffix_stack);
        data
    }
}

fn push_if_absent(entries: &mut Vec<(i32, String)>, priority: i32, value: &str) {
    if !entries.iter().any(|(p, _)| *p == priority) {
        entries.push((priority, value.to_string()));
    }
}
