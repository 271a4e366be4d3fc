//! Inheritance resolver.
//!
//! Walks a holder's own nodes and its group-inheritance graph and produces
//! the ordered list of effective nodes the calculator and meta stack consume.
//!
//! # Ordering
//!
//! Nodes are sorted by rank (descending), then BFS distance from the root
//! (ascending), then insertion order. The root's own nodes have rank
//! [`Rank::Own`], which outranks every group weight. Groups reached only
//! through a user's implicit primary-group edge sort after explicitly
//! inherited groups of the same weight.
//!
//! Each holder's node maps are read through one snapshot, so a resolution
//! never mixes a holder's state before and after a mutation.
//!
//! # Graph anomalies
//!
//! - **Cycles**: a visited set of group names is carried through the
//!   traversal, so each group contributes at most once whatever the shape
//!   of the graph.
//! - **Dangling edges**: a group that is not loaded is skipped. The resolver
//!   never performs I/O.

mod context;

#[cfg(test)]
mod tests;

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use tracing::trace;

use crate::context::ContextSatisfyMode;
use crate::error::DomainResult;
use crate::holder::{DataType, Group, HolderIdentifier, HolderRef, HolderSnapshot};
use crate::node::Node;
use crate::query::{Flag, QueryOptions};

use context::TraversalContext;

/// Resolves group names to loaded groups during traversal.
///
/// Implementations must not block on I/O: an unknown name is `Ok(None)`.
pub trait GroupLookup: Send + Sync {
    fn group(&self, name: &str) -> DomainResult<Option<Arc<Group>>>;
}

/// Authority of a resolved node. `Own` outranks every finite weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Rank {
    Weight(i32),
    Own,
}

/// A node together with where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    pub node: Node,
    pub origin: HolderIdentifier,
    pub data_type: DataType,
    pub rank: Rank,
    /// Inheritance distance from the root; 0 for the root's own nodes.
    pub distance: u32,
    /// Reached only through the implicit primary-group edge.
    pub implicit: bool,
    pub(crate) seq: u64,
}

impl ResolvedNode {
    fn tier(&self) -> Tier {
        Tier {
            rank: self.rank,
            implicit: self.implicit,
        }
    }

    /// Returns whether the node belongs to the holder the resolution started at.
    pub fn is_own(&self) -> bool {
        self.distance == 0
    }
}

/// A group the root effectively inherits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedGroup {
    pub name: String,
    pub weight: i32,
    pub distance: u32,
    pub implicit: bool,
    seq: u64,
}

impl InheritedGroup {
    fn tier(&self) -> Tier {
        Tier {
            rank: Rank::Weight(self.weight),
            implicit: self.implicit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedNodes {
    nodes: Vec<ResolvedNode>,
    groups: Vec<InheritedGroup>,
}

impl ResolvedNodes {
    pub fn nodes(&self) -> &[ResolvedNode] {
        &self.nodes
    }

    /// Effective group memberships, in the same order as the nodes.
    pub fn groups(&self) -> &[InheritedGroup] {
        &self.groups
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResolvedNode> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_nodes(nodes: Vec<ResolvedNode>) -> Self {
        Self {
            nodes,
            groups: Vec::new(),
        }
    }
}

/// Ordering bucket ahead of distance: rank first, then explicit before
/// implicit, so at equal weight the primary group ranks below every
/// explicitly inherited group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tier {
    rank: Rank,
    implicit: bool,
}

fn resolution_order(a: (Tier, u32, u64), b: (Tier, u32, u64)) -> Ordering {
    b.0.rank
        .cmp(&a.0.rank)
        .then(a.0.implicit.cmp(&b.0.implicit))
        .then(a.1.cmp(&b.1))
        .then(a.2.cmp(&b.2))
}

/// Breadth-first inheritance resolver.
#[derive(Debug, Clone, Copy, Default)]
pub struct InheritanceResolver {
    satisfy_mode: ContextSatisfyMode,
}

impl InheritanceResolver {
    pub fn new(satisfy_mode: ContextSatisfyMode) -> Self {
        Self { satisfy_mode }
    }

    /// Produces the ordered effective nodes of `root` under `options`.
    ///
    /// Only errors from `lookup` are returned; cycles and unloaded groups
    /// are skipped.
    pub fn resolve(
        &self,
        root: &HolderRef,
        options: &QueryOptions,
        lookup: &dyn GroupLookup,
    ) -> DomainResult<ResolvedNodes> {
        let mut ctx = TraversalContext::new(Utc::now());
        let mut nodes = Vec::new();
        let mut groups = Vec::new();

        if let HolderRef::Group(group) = root {
            ctx.mark_visited(group.name());
        }
        let snapshot = root.holder().snapshot();
        let origin = root.identifier();
        let tier = Tier { rank: Rank::Own, implicit: false };
        self.collect(&snapshot, origin, tier, 0, options, &mut ctx, &mut nodes);

        if options.flag(Flag::ResolveInheritance) {
            let parents = self.parents(&snapshot, options, &ctx);

            // Walked only after every explicit path, so a group reachable
            // both ways keeps its explicit position.
            let mut implicit_edge = match root {
                HolderRef::User(user) if options.flag(Flag::ApplyPrimaryGroupImplicitly) => {
                    let primary = user.primary_group();
                    (!parents.contains(&primary)).then_some(primary)
                }
                _ => None,
            };

            let mut queue: VecDeque<(String, u32, bool)> =
                parents.into_iter().map(|name| (name, 1, false)).collect();

            loop {
                let (name, distance, implicit) = match queue.pop_front() {
                    Some(entry) => entry,
                    None => match implicit_edge.take() {
                        Some(name) => (name, 1, true),
                        None => break,
                    },
                };
                if !ctx.mark_visited(&name) {
                    trace!(group = %name, "group already visited, skipping");
                    continue;
                }
                let Some(group) = lookup.group(&name)? else {
                    trace!(group = %name, "inherited group not loaded, skipping");
                    continue;
                };

                let snapshot = group.holder().snapshot();
                let weight = snapshot.weight().unwrap_or(0);
                groups.push(InheritedGroup {
                    name,
                    weight,
                    distance,
                    implicit,
                    seq: ctx.next_seq(),
                });
                let tier = Tier { rank: Rank::Weight(weight), implicit };
                self.collect(
                    &snapshot,
                    group.holder().identifier(),
                    tier,
                    distance,
                    options,
                    &mut ctx,
                    &mut nodes,
                );
                for parent in self.parents(&snapshot, options, &ctx) {
                    if !ctx.is_visited(&parent) {
                        queue.push_back((parent, distance + 1, implicit));
                    }
                }
            }
        }

        nodes.sort_by(|a, b| {
            resolution_order(
                (a.tier(), a.distance, a.seq),
                (b.tier(), b.distance, b.seq),
            )
        });
        groups.sort_by(|a, b| {
            resolution_order(
                (a.tier(), a.distance, a.seq),
                (b.tier(), b.distance, b.seq),
            )
        });

        Ok(ResolvedNodes { nodes, groups })
    }

    #[allow(clippy::too_many_arguments)]
    fn collect(
        &self,
        snapshot: &HolderSnapshot,
        origin: &HolderIdentifier,
        tier: Tier,
        distance: u32,
        options: &QueryOptions,
        ctx: &mut TraversalContext,
        out: &mut Vec<ResolvedNode>,
    ) {
        for (data_type, node) in snapshot.applicable_nodes(options, self.satisfy_mode, ctx.now) {
            out.push(ResolvedNode {
                node,
                origin: origin.clone(),
                data_type,
                rank: tier.rank,
                distance,
                implicit: tier.implicit,
                seq: ctx.next_seq(),
            });
        }
    }

    /// Names of the groups `holder` directly inherits, in edge order, deduplicated.
    fn parents(
        &self,
        snapshot: &HolderSnapshot,
        options: &QueryOptions,
        ctx: &TraversalContext,
    ) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for node in snapshot.applicable_inheritance(options, self.satisfy_mode, ctx.now) {
            if let Some(group) = node.inherited_group() {
                if !names.iter().any(|n| n == group) {
                    names.push(group.to_string());
                }
            }
        }
        names
    }
}
