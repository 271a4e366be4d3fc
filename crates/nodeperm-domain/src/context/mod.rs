//! Context sets: the key/value qualifiers that nodes and queries are scoped to.
//!
//! A [`ContextSet`] is an immutable multimap (`server=survival`,
//! `world=nether`, ...). Keys and values are normalised to lowercase, entries
//! are kept sorted and deduplicated, so equality and hashing are value-based
//! and independent of insertion order. Sets are backed by an `Arc<[Context]>`
//! and can be shared across threads freely.
//!
//! [`MutableContextSet`] is the accumulating builder; it must be frozen before
//! it is attached to a node or used in query options.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DomainError, DomainResult};

#[cfg(test)]
mod set_proptest;

/// Context key naming the server a node applies on.
pub const SERVER_KEY: &str = "server";
/// Context key naming the world a node applies in.
pub const WORLD_KEY: &str = "world";

/// A single key/value context pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Context {
    key: String,
    value: String,
}

impl Context {
    /// Creates a context pair, normalising both parts to trimmed lowercase.
    pub fn new(key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        Self {
            key: normalize(key.as_ref()),
            value: normalize(value.as_ref()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Rejects pairs with an empty key or value.
    pub fn validate(&self) -> DomainResult<()> {
        if self.key.is_empty() || self.value.is_empty() {
            return Err(DomainError::InvalidContext {
                key: self.key.clone(),
                value: self.value.clone(),
            });
        }
        Ok(())
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// How a node's context set is matched against a query context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ContextSatisfyMode {
    /// Every pair of the node's set must be present in the query.
    #[default]
    AllValuesPerKey,
    /// For every key of the node's set, at least one of its values must be
    /// present in the query.
    AtLeastOneValuePerKey,
}

/// An immutable, value-compared set of contexts.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ContextSet {
    entries: Arc<[Context]>,
}

impl ContextSet {
    /// Returns the empty ("global") context set.
    pub fn empty() -> Self {
        Self {
            entries: Arc::from(Vec::new()),
        }
    }

    /// Returns a set holding a single pair.
    pub fn of(key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        Self::from_contexts(vec![Context::new(key, value)])
    }

    /// Builds a set from `(key, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        Self::from_contexts(pairs.into_iter().map(|(k, v)| Context::new(k, v)).collect())
    }

    /// Starts a mutable builder.
    pub fn builder() -> MutableContextSet {
        MutableContextSet::new()
    }

    fn from_contexts(mut contexts: Vec<Context>) -> Self {
        contexts.sort();
        contexts.dedup();
        Self {
            entries: Arc::from(contexts),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Context> {
        self.entries.iter()
    }

    /// Returns whether the exact pair is present.
    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.contains_context(&Context::new(key, value))
    }

    fn contains_context(&self, context: &Context) -> bool {
        self.entries.binary_search(context).is_ok()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let key = normalize(key);
        self.entries.iter().any(|c| c.key == key)
    }

    /// Returns the values recorded for `key`, in sorted order.
    pub fn values<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> + 'a {
        let key = normalize(key);
        self.entries
            .iter()
            .filter(move |c| c.key == key)
            .map(|c| c.value.as_str())
    }

    /// Returns the distinct keys, in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        let mut last: Option<&str> = None;
        self.entries.iter().filter_map(move |c| {
            if last == Some(c.key.as_str()) {
                None
            } else {
                last = Some(c.key.as_str());
                last
            }
        })
    }

    /// Returns a set containing the pairs of both sets.
    pub fn union(&self, other: &ContextSet) -> ContextSet {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        Self::from_contexts(self.entries.iter().chain(other.entries.iter()).cloned().collect())
    }

    /// Returns whether every pair of `subset` is present in this set.
    pub fn contains_all(&self, subset: &ContextSet) -> bool {
        subset.entries.iter().all(|c| self.contains_context(c))
    }

    /// Returns whether this set (a node's contexts) is satisfied by `query`.
    ///
    /// An empty set is satisfied by every query.
    pub fn is_satisfied_by(&self, query: &ContextSet, mode: ContextSatisfyMode) -> bool {
        if self.is_empty() {
            return true;
        }
        match mode {
            ContextSatisfyMode::AllValuesPerKey => query.contains_all(self),
            ContextSatisfyMode::AtLeastOneValuePerKey => self
                .keys()
                .all(|key| self.values(key).any(|value| query.contains(key, value))),
        }
    }

    /// Copies this set into a mutable builder.
    pub fn to_mutable(&self) -> MutableContextSet {
        MutableContextSet {
            entries: self.entries.iter().cloned().collect(),
        }
    }

    pub(crate) fn validate(&self) -> DomainResult<()> {
        self.entries.iter().try_for_each(Context::validate)
    }
}

impl Default for ContextSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// Orders sets by specificity: sets with a `server` key first, then sets with
/// a `world` key, then larger sets, then by entries. Consistent with `Eq`.
impl Ord for ContextSet {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.entries == other.entries {
            return Ordering::Equal;
        }
        other
            .contains_key(SERVER_KEY)
            .cmp(&self.contains_key(SERVER_KEY))
            .then_with(|| {
                other
                    .contains_key(WORLD_KEY)
                    .cmp(&self.contains_key(WORLD_KEY))
            })
            .then_with(|| other.len().cmp(&self.len()))
            .then_with(|| self.entries.cmp(&other.entries))
    }
}

impl PartialOrd for ContextSet {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, c) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", c.key, c.value)?;
        }
        f.write_str("}")
    }
}

impl fmt::Debug for ContextSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextSet{self}")
    }
}

impl Serialize for ContextSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.entries.iter().map(|c| (&c.key, &c.value)))
    }
}

impl<'de> Deserialize<'de> for ContextSet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let pairs = Vec::<(String, String)>::deserialize(deserializer)?;
        Ok(ContextSet::from_pairs(pairs))
    }
}

/// Mutable accumulator for contexts, frozen into a [`ContextSet`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutableContextSet {
    entries: BTreeSet<Context>,
}

impl MutableContextSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> &mut Self {
        self.entries.insert(Context::new(key, value));
        self
    }

    pub fn add_all(&mut self, other: &ContextSet) -> &mut Self {
        self.entries.extend(other.iter().cloned());
        self
    }

    pub fn remove(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> &mut Self {
        self.entries.remove(&Context::new(key, value));
        self
    }

    /// Removes every value recorded for `key`.
    pub fn remove_all(&mut self, key: impl AsRef<str>) -> &mut Self {
        let key = normalize(key.as_ref());
        self.entries.retain(|c| c.key != key);
        self
    }

    pub fn clear(&mut self) -> &mut Self {
        self.entries.clear();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Converts the accumulated pairs into an immutable set.
    pub fn freeze(&self) -> ContextSet {
        ContextSet {
            entries: self.entries.iter().cloned().collect(),
        }
    }
}
