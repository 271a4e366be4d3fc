//! Nodes: immutable permission and meta assertions.
//!
//! A node is a key, a boolean value, an optional expiry and a [`ContextSet`].
//! The key determines the node's [`NodeKind`]; structured families such as
//! `group.<name>` or `prefix.<priority>.<value>` are decoded once, at build
//! time, so consumers pattern-match on the kind instead of re-parsing keys.

mod kind;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{ContextSet, MutableContextSet};
use crate::error::{DomainError, DomainResult};

pub use kind::{escape, unescape, ChatMetaType, NodeKind};

/// An immutable permission assertion.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawNode", into = "RawNode")]
pub struct Node {
    key: String,
    value: bool,
    expiry: Option<DateTime<Utc>>,
    contexts: ContextSet,
    kind: NodeKind,
}

impl Node {
    /// Starts a builder for an arbitrary key; the family is inferred.
    pub fn builder(key: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(key.into())
    }

    pub fn permission(key: impl Into<String>) -> NodeBuilder {
        Self::builder(key)
    }

    pub fn inheritance(group: &str) -> NodeBuilder {
        Self::builder(
            NodeKind::Inheritance {
                group: group.trim().to_lowercase(),
            }
            .to_key(),
        )
    }

    pub fn prefix(value: &str, priority: i32) -> NodeBuilder {
        Self::builder(
            NodeKind::Prefix {
                priority,
                value: value.to_string(),
            }
            .to_key(),
        )
    }

    pub fn suffix(value: &str, priority: i32) -> NodeBuilder {
        Self::builder(
            NodeKind::Suffix {
                priority,
                value: value.to_string(),
            }
            .to_key(),
        )
    }

    pub fn meta(key: &str, value: &str) -> NodeBuilder {
        Self::builder(
            NodeKind::Meta {
                key: key.to_lowercase(),
                value: value.to_string(),
            }
            .to_key(),
        )
    }

    pub fn weight(weight: i32) -> NodeBuilder {
        Self::builder(NodeKind::Weight { weight }.to_key())
    }

    pub fn display_name(name: &str) -> NodeBuilder {
        Self::builder(
            NodeKind::DisplayName {
                name: name.to_string(),
            }
            .to_key(),
        )
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> bool {
        self.value
    }

    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    pub fn contexts(&self) -> &ContextSet {
        &self.contexts
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_temporary(&self) -> bool {
        self.expiry.is_some()
    }

    /// Returns whether the node's expiry is at or before `now`.
    pub fn has_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }

    /// Returns the group name if this is an inheritance node.
    pub fn inherited_group(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Inheritance { group } => Some(group),
            _ => None,
        }
    }

    /// Returns whether this is a wildcard permission (`*` or `a.b.*`).
    pub fn is_wildcard(&self) -> bool {
        matches!(self.kind, NodeKind::Permission)
            && (self.key == "*" || self.key.ends_with(".*"))
    }

    /// Same key and contexts; value and expiry are ignored.
    ///
    /// This is the identity used by mutations: setting a node replaces any
    /// node that matches it this way.
    pub fn matches_ignoring_value_and_expiry(&self, other: &Node) -> bool {
        self.key == other.key && self.contexts == other.contexts
    }

    /// Returns a builder pre-populated with this node's fields.
    pub fn to_builder(&self) -> NodeBuilder {
        NodeBuilder {
            key: self.key.clone(),
            value: self.value,
            expiry: self.expiry,
            contexts: self.contexts.to_mutable(),
        }
    }
}

/// Builder for [`Node`]. Never fails until [`NodeBuilder::build`].
#[derive(Debug, Clone)]
pub struct NodeBuilder {
    key: String,
    value: bool,
    expiry: Option<DateTime<Utc>>,
    contexts: MutableContextSet,
}

impl NodeBuilder {
    fn new(key: String) -> Self {
        Self {
            key,
            value: true,
            expiry: None,
            contexts: MutableContextSet::new(),
        }
    }

    pub fn value(mut self, value: bool) -> Self {
        self.value = value;
        self
    }

    pub fn expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Sets the expiry relative to the current time.
    pub fn expiry_after(mut self, duration: Duration) -> Self {
        self.expiry = Some(Utc::now() + duration);
        self
    }

    pub fn clear_expiry(mut self) -> Self {
        self.expiry = None;
        self
    }

    pub fn context(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.contexts.add(key, value);
        self
    }

    pub fn contexts(mut self, contexts: &ContextSet) -> Self {
        self.contexts.add_all(contexts);
        self
    }

    /// Validates and freezes the node.
    pub fn build(self) -> DomainResult<Node> {
        if self.key.trim().is_empty() {
            return Err(DomainError::InvalidNodeKey {
                key: self.key,
                reason: "key is empty".to_string(),
            });
        }

        let (key, kind) = NodeKind::parse(&self.key);
        if let NodeKind::Inheritance { group } = &kind {
            if group.is_empty() {
                return Err(DomainError::InvalidNodeKey {
                    key,
                    reason: "group name is empty".to_string(),
                });
            }
        }

        let contexts = self.contexts.freeze();
        contexts.validate()?;

        Ok(Node {
            key,
            value: self.value,
            expiry: self.expiry,
            contexts,
            kind,
        })
    }
}

/// Wire form of a node; the kind is re-derived from the key on load.
#[derive(Debug, Serialize, Deserialize)]
struct RawNode {
    key: String,
    #[serde(default = "default_value")]
    value: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    contexts: ContextSet,
}

fn default_value() -> bool {
    true
}

impl TryFrom<RawNode> for Node {
    type Error = DomainError;

    fn try_from(raw: RawNode) -> Result<Self, Self::Error> {
        let builder = Node::builder(raw.key)
            .value(raw.value)
            .contexts(&raw.contexts);
        match raw.expiry {
            Some(expiry) => builder.expiry(expiry).build(),
            None => builder.build(),
        }
    }
}

impl From<Node> for RawNode {
    fn from(node: Node) -> Self {
        RawNode {
            key: node.key,
            value: node.value,
            expiry: node.expiry,
            contexts: node.contexts,
        }
    }
}
