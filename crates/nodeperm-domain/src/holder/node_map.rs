//! Per-holder node storage for one [`DataType`].
//!
//! The map is a copy-on-write snapshot: readers clone an `Arc` to the current
//! state and never block writers for longer than that clone; writers mutate a
//! private copy (or the shared one, when no reader holds it) under the write
//! lock. A reader therefore observes either the state before or after a
//! mutation, never a partially applied one.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::trace;

use super::{DataMutateResult, DataType};
use crate::context::{ContextSatisfyMode, ContextSet, SERVER_KEY, WORLD_KEY};
use crate::node::Node;
use crate::query::{Flag, QueryMode, QueryOptions};

#[derive(Debug, Clone)]
struct Entry {
    node: Node,
    seq: u64,
}

#[derive(Debug, Clone, Default)]
struct NodeMapState {
    /// All nodes, bucketed by their exact context set (most specific first).
    buckets: BTreeMap<ContextSet, Vec<Entry>>,
    /// `value=true` inheritance nodes, bucketed the same way.
    inheritance: BTreeMap<ContextSet, Vec<Entry>>,
    next_seq: u64,
}

impl NodeMapState {
    fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.buckets.values().flatten().map(|e| &e.node)
    }

    fn contains_exact(&self, node: &Node) -> bool {
        self.buckets
            .get(node.contexts())
            .is_some_and(|bucket| bucket.iter().any(|e| &e.node == node))
    }

    fn insert(&mut self, node: Node) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if node.value() && node.inherited_group().is_some() {
            self.inheritance
                .entry(node.contexts().clone())
                .or_default()
                .push(Entry {
                    node: node.clone(),
                    seq,
                });
        }
        self.buckets
            .entry(node.contexts().clone())
            .or_default()
            .push(Entry { node, seq });
    }

    /// Removes every node matching `pred`, optionally limited to one bucket.
    fn remove_where(
        &mut self,
        bucket: Option<&ContextSet>,
        mut pred: impl FnMut(&Node) -> bool,
    ) -> Vec<Node> {
        let mut removed = Vec::new();
        let mut removed_seqs = Vec::new();
        for (contexts, entries) in self.buckets.iter_mut() {
            if bucket.is_some_and(|b| b != contexts) {
                continue;
            }
            entries.retain(|e| {
                if pred(&e.node) {
                    removed_seqs.push(e.seq);
                    removed.push(e.node.clone());
                    false
                } else {
                    true
                }
            });
        }
        if !removed.is_empty() {
            for entries in self.inheritance.values_mut() {
                entries.retain(|e| !removed_seqs.contains(&e.seq));
            }
            self.buckets.retain(|_, entries| !entries.is_empty());
            self.inheritance.retain(|_, entries| !entries.is_empty());
        }
        removed
    }
}

/// Returns true when the include flag is unset and the set lacks the key.
fn flag_excludes(options: &QueryOptions, flag: Flag, key: &str, contexts: &ContextSet) -> bool {
    !options.flag(flag) && !contexts.contains_key(key)
}

fn normal_nodes_excluded(options: &QueryOptions, contexts: &ContextSet) -> bool {
    flag_excludes(options, Flag::IncludeNodesWithoutServerContext, SERVER_KEY, contexts)
        || flag_excludes(options, Flag::IncludeNodesWithoutWorldContext, WORLD_KEY, contexts)
}

fn inheritance_nodes_included(options: &QueryOptions, contexts: &ContextSet) -> bool {
    !flag_excludes(
        options,
        Flag::ApplyInheritanceNodesWithoutServerContext,
        SERVER_KEY,
        contexts,
    ) && !flag_excludes(
        options,
        Flag::ApplyInheritanceNodesWithoutWorldContext,
        WORLD_KEY,
        contexts,
    )
}

fn bucket_satisfied(options: &QueryOptions, contexts: &ContextSet, mode: ContextSatisfyMode) -> bool {
    match options.mode() {
        QueryMode::NonContextual => true,
        QueryMode::Contextual => contexts.is_satisfied_by(options.context(), mode),
    }
}

/// Context-indexed node storage with atomic snapshot reads.
#[derive(Debug)]
pub struct NodeMap {
    data_type: DataType,
    state: RwLock<Arc<NodeMapState>>,
}

impl NodeMap {
    pub fn new(data_type: DataType) -> Self {
        Self {
            data_type,
            state: RwLock::new(Arc::new(NodeMapState::default())),
        }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    fn state(&self) -> Arc<NodeMapState> {
        Arc::clone(&self.state.read())
    }

    /// The current state, for several reads that must agree with each other.
    pub fn snapshot(&self) -> NodeMapSnapshot {
        NodeMapSnapshot {
            data_type: self.data_type,
            state: self.state(),
        }
    }

    // ------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------

    /// Adds a node, replacing any node with the same key and contexts.
    pub fn add(&self, node: Node) -> DataMutateResult {
        if node.has_expired(Utc::now()) {
            return DataMutateResult::Fail;
        }
        let mut guard = self.state.write();
        if guard.contains_exact(&node) {
            return DataMutateResult::FailAlreadyHas;
        }
        let state = Arc::make_mut(&mut *guard);
        let replaced = state.remove_where(Some(node.contexts()), |n| {
            n.matches_ignoring_value_and_expiry(&node)
        });
        trace!(key = node.key(), replaced = replaced.len(), data_type = ?self.data_type, "node added");
        state.insert(node);
        DataMutateResult::Success
    }

    /// Removes nodes with the same key and contexts, whatever their value or expiry.
    pub fn remove(&self, node: &Node) -> DataMutateResult {
        self.remove_in(Some(node.contexts()), |n| n.matches_ignoring_value_and_expiry(node))
    }

    /// Removes only a node equal in every field.
    pub fn remove_exact(&self, node: &Node) -> DataMutateResult {
        self.remove_in(Some(node.contexts()), |n| n == node)
    }

    pub fn remove_if(&self, pred: impl FnMut(&Node) -> bool) -> DataMutateResult {
        self.remove_in(None, pred)
    }

    pub fn clear(&self) -> DataMutateResult {
        self.remove_in(None, |_| true)
    }

    pub fn clear_in_context(&self, contexts: &ContextSet) -> DataMutateResult {
        self.remove_in(Some(contexts), |_| true)
    }

    /// Replaces the whole content under a single write lock. Expired nodes
    /// are dropped; a later node replaces an earlier one with the same key
    /// and contexts. Returns `FailAlreadyHas` when nothing would change.
    pub fn set_content(&self, nodes: impl IntoIterator<Item = Node>) -> DataMutateResult {
        let now = Utc::now();
        let mut next = NodeMapState::default();
        for node in nodes {
            if node.has_expired(now) {
                trace!(key = node.key(), data_type = ?self.data_type, "expired node dropped");
                continue;
            }
            next.remove_where(Some(node.contexts()), |n| {
                n.matches_ignoring_value_and_expiry(&node)
            });
            next.insert(node);
        }

        let mut guard = self.state.write();
        if guard.nodes().eq(next.nodes()) {
            return DataMutateResult::FailAlreadyHas;
        }
        *guard = Arc::new(next);
        DataMutateResult::Success
    }

    fn remove_in(
        &self,
        bucket: Option<&ContextSet>,
        mut pred: impl FnMut(&Node) -> bool,
    ) -> DataMutateResult {
        let mut guard = self.state.write();
        let any = match bucket {
            Some(contexts) => guard
                .buckets
                .get(contexts)
                .is_some_and(|entries| entries.iter().any(|e| pred(&e.node))),
            None => guard.buckets.values().flatten().any(|e| pred(&e.node)),
        };
        if !any {
            return DataMutateResult::FailLacks;
        }
        Arc::make_mut(&mut *guard).remove_where(bucket, pred);
        DataMutateResult::Success
    }

    /// Drops nodes whose expiry has passed and returns them.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Vec<Node> {
        let mut guard = self.state.write();
        if !guard.buckets.values().flatten().any(|e| e.node.has_expired(now)) {
            return Vec::new();
        }
        Arc::make_mut(&mut *guard).remove_where(None, |n| n.has_expired(now))
    }

    // ------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------

    pub fn len(&self) -> usize {
        self.state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().buckets.is_empty()
    }

    pub fn contains(&self, node: &Node) -> bool {
        self.state().contains_exact(node)
    }

    /// Every node, most specific contexts first, insertion order within a context.
    pub fn as_list(&self) -> Vec<Node> {
        self.state()
            .buckets
            .values()
            .flatten()
            .map(|e| e.node.clone())
            .collect()
    }

    /// Nodes whose context set is exactly `contexts`.
    pub fn nodes_in_context(&self, contexts: &ContextSet) -> Vec<Node> {
        self.state()
            .buckets
            .get(contexts)
            .map(|entries| entries.iter().map(|e| e.node.clone()).collect())
            .unwrap_or_default()
    }

    /// See [`NodeMapSnapshot::applicable`].
    pub fn applicable(
        &self,
        options: &QueryOptions,
        mode: ContextSatisfyMode,
        now: DateTime<Utc>,
    ) -> Vec<Node> {
        self.snapshot().applicable(options, mode, now)
    }

    pub fn applicable_inheritance(
        &self,
        options: &QueryOptions,
        mode: ContextSatisfyMode,
        now: DateTime<Utc>,
    ) -> Vec<Node> {
        self.snapshot().applicable_inheritance(options, mode, now)
    }
}

/// One immutable state of a [`NodeMap`]. Later mutations of the map are
/// not visible through it.
#[derive(Debug, Clone)]
pub struct NodeMapSnapshot {
    data_type: DataType,
    state: Arc<NodeMapState>,
}

impl NodeMapSnapshot {
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.buckets.is_empty()
    }

    pub fn as_list(&self) -> Vec<Node> {
        self.state.nodes().cloned().collect()
    }

    /// Nodes that apply under `options`, skipping those expired at `now`.
    ///
    /// A bucket lacking a `server` or `world` key is only included when the
    /// matching include flag is set; inheritance nodes from an excluded bucket
    /// still apply when the inheritance flags allow them.
    pub fn applicable(
        &self,
        options: &QueryOptions,
        mode: ContextSatisfyMode,
        now: DateTime<Utc>,
    ) -> Vec<Node> {
        let state = &self.state;
        let mut out = Vec::new();
        for (contexts, entries) in &state.buckets {
            if !bucket_satisfied(options, contexts, mode) {
                continue;
            }
            let source = if normal_nodes_excluded(options, contexts) {
                if !inheritance_nodes_included(options, contexts) {
                    continue;
                }
                match state.inheritance.get(contexts) {
                    Some(entries) => entries,
                    None => continue,
                }
            } else {
                entries
            };
            out.extend(
                source
                    .iter()
                    .filter(|e| !e.node.has_expired(now))
                    .map(|e| e.node.clone()),
            );
        }
        out
    }

    /// `value=true` inheritance nodes that apply under `options`.
    pub fn applicable_inheritance(
        &self,
        options: &QueryOptions,
        mode: ContextSatisfyMode,
        now: DateTime<Utc>,
    ) -> Vec<Node> {
        self.state
            .inheritance
            .iter()
            .filter(|(contexts, _)| {
                bucket_satisfied(options, contexts, mode)
                    && inheritance_nodes_included(options, contexts)
            })
            .flat_map(|(_, entries)| entries.iter())
            .filter(|e| !e.node.has_expired(now))
            .map(|e| e.node.clone())
            .collect()
    }
}
