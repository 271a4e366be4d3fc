//! Permission holders: users and groups, each owning two node maps.

mod node_map;

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::cache::{CachedDataConfig, CachedDataManager};
use crate::context::ContextSatisfyMode;
use crate::node::{Node, NodeKind};
use crate::query::QueryOptions;

pub use node_map::{NodeMap, NodeMapSnapshot};

/// Group every user belongs to unless told otherwise.
pub const DEFAULT_GROUP: &str = "default";

/// Which of a holder's node maps an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    /// Persisted nodes.
    Normal,
    /// Session-only nodes; never persisted.
    Transient,
}

/// Outcome of a node map mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMutateResult {
    Success,
    Fail,
    FailAlreadyHas,
    FailLacks,
}

impl DataMutateResult {
    pub fn was_successful(self) -> bool {
        self == DataMutateResult::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderType {
    User,
    Group,
}

/// Stable identity of a holder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HolderIdentifier {
    User(Uuid),
    Group(String),
}

impl HolderIdentifier {
    pub fn holder_type(&self) -> HolderType {
        match self {
            HolderIdentifier::User(_) => HolderType::User,
            HolderIdentifier::Group(_) => HolderType::Group,
        }
    }
}

impl fmt::Display for HolderIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HolderIdentifier::User(uuid) => write!(f, "user:{uuid}"),
            HolderIdentifier::Group(name) => write!(f, "group:{name}"),
        }
    }
}

/// State shared by users and groups.
///
/// The effective node set is transient ∪ normal, transient first.
#[derive(Debug)]
pub struct PermissionHolder {
    identifier: HolderIdentifier,
    normal: NodeMap,
    transient: NodeMap,
    cached_data: CachedDataManager,
}

impl PermissionHolder {
    fn new(identifier: HolderIdentifier, cache: &CachedDataConfig) -> Self {
        Self {
            identifier,
            normal: NodeMap::new(DataType::Normal),
            transient: NodeMap::new(DataType::Transient),
            cached_data: CachedDataManager::new(cache),
        }
    }

    pub fn identifier(&self) -> &HolderIdentifier {
        &self.identifier
    }

    pub fn data(&self, data_type: DataType) -> &NodeMap {
        match data_type {
            DataType::Normal => &self.normal,
            DataType::Transient => &self.transient,
        }
    }

    pub fn normal_data(&self) -> &NodeMap {
        &self.normal
    }

    pub fn transient_data(&self) -> &NodeMap {
        &self.transient
    }

    pub fn cached_data(&self) -> &CachedDataManager {
        &self.cached_data
    }

    /// Both node maps as of now. Every read made through the snapshot sees
    /// the same state, whatever mutations land meanwhile.
    pub fn snapshot(&self) -> HolderSnapshot {
        HolderSnapshot {
            transient: self.transient.snapshot(),
            normal: self.normal.snapshot(),
        }
    }

    /// Own applicable nodes, transient data first.
    pub fn applicable_nodes(
        &self,
        options: &QueryOptions,
        mode: ContextSatisfyMode,
        now: DateTime<Utc>,
    ) -> Vec<(DataType, Node)> {
        self.snapshot().applicable_nodes(options, mode, now)
    }

    /// Every node of both maps, transient first.
    pub fn all_nodes(&self) -> Vec<Node> {
        let mut nodes = self.transient.as_list();
        nodes.extend(self.normal.as_list());
        nodes
    }
}

/// A consistent view of one holder's normal and transient data.
#[derive(Debug, Clone)]
pub struct HolderSnapshot {
    transient: NodeMapSnapshot,
    normal: NodeMapSnapshot,
}

impl HolderSnapshot {
    pub fn applicable_nodes(
        &self,
        options: &QueryOptions,
        mode: ContextSatisfyMode,
        now: DateTime<Utc>,
    ) -> Vec<(DataType, Node)> {
        [&self.transient, &self.normal]
            .into_iter()
            .flat_map(|map| {
                map.applicable(options, mode, now)
                    .into_iter()
                    .map(move |node| (map.data_type(), node))
            })
            .collect()
    }

    /// Applicable `value=true` inheritance nodes, transient data first.
    pub fn applicable_inheritance(
        &self,
        options: &QueryOptions,
        mode: ContextSatisfyMode,
        now: DateTime<Utc>,
    ) -> Vec<Node> {
        let mut nodes = self.transient.applicable_inheritance(options, mode, now);
        nodes.extend(self.normal.applicable_inheritance(options, mode, now));
        nodes
    }

    /// Highest `weight.<n>` node in the normal data, in any context.
    pub fn weight(&self) -> Option<i32> {
        self.normal
            .as_list()
            .iter()
            .filter_map(|node| match node.kind() {
                NodeKind::Weight { weight } if node.value() => Some(*weight),
                _ => None,
            })
            .max()
    }
}

#[derive(Debug)]
pub struct User {
    holder: PermissionHolder,
    uuid: Uuid,
    username: Option<String>,
    primary_group: RwLock<String>,
}

impl User {
    pub(crate) fn new(uuid: Uuid, username: Option<String>, cache: &CachedDataConfig) -> Self {
        Self {
            holder: PermissionHolder::new(HolderIdentifier::User(uuid), cache),
            uuid,
            username,
            primary_group: RwLock::new(DEFAULT_GROUP.to_string()),
        }
    }

    pub fn holder(&self) -> &PermissionHolder {
        &self.holder
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// The stored primary group name.
    pub fn primary_group(&self) -> String {
        self.primary_group.read().clone()
    }

    /// Replaces the stored primary group. Callers must invalidate the
    /// user's cached data afterwards.
    pub(crate) fn set_primary_group(&self, group: &str) {
        *self.primary_group.write() = group.trim().to_lowercase();
    }
}

#[derive(Debug)]
pub struct Group {
    holder: PermissionHolder,
    name: String,
}

impl Group {
    pub(crate) fn new(name: &str, cache: &CachedDataConfig) -> Self {
        let name = name.trim().to_lowercase();
        Self {
            holder: PermissionHolder::new(HolderIdentifier::Group(name.clone()), cache),
            name,
        }
    }

    pub fn holder(&self) -> &PermissionHolder {
        &self.holder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Highest `weight.<n>` node in the normal data, in any context.
    pub fn weight(&self) -> Option<i32> {
        self.holder.snapshot().weight()
    }

    /// First context-free `displayname.<name>` node in the normal data.
    pub fn display_name(&self) -> Option<String> {
        self.holder
            .normal
            .nodes_in_context(&Default::default())
            .into_iter()
            .find_map(|node| match node.kind() {
                NodeKind::DisplayName { name } if node.value() => Some(name.clone()),
                _ => None,
            })
    }
}

/// A loaded user or group.
#[derive(Debug, Clone)]
pub enum HolderRef {
    User(Arc<User>),
    Group(Arc<Group>),
}

impl HolderRef {
    pub fn holder(&self) -> &PermissionHolder {
        match self {
            HolderRef::User(user) => user.holder(),
            HolderRef::Group(group) => group.holder(),
        }
    }

    pub fn identifier(&self) -> &HolderIdentifier {
        self.holder().identifier()
    }

    pub fn as_user(&self) -> Option<&Arc<User>> {
        match self {
            HolderRef::User(user) => Some(user),
            HolderRef::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&Arc<Group>> {
        match self {
            HolderRef::Group(group) => Some(group),
            HolderRef::User(_) => None,
        }
    }
}

impl From<Arc<User>> for HolderRef {
    fn from(user: Arc<User>) -> Self {
        HolderRef::User(user)
    }
}

impl From<Arc<Group>> for HolderRef {
    fn from(group: Arc<Group>) -> Self {
        HolderRef::Group(group)
    }
}
