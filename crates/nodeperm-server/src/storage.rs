//! Storage seam for holder data.
//!
//! Only normal nodes are persisted; transient nodes live and die with the
//! loaded holder. Backends implement [`HolderStorage`]; [`MemoryStorage`] is
//! the in-process implementation used by tests and embedders without a
//! database.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::instrument;
use uuid::Uuid;

use nodeperm_domain::holder::DEFAULT_GROUP;
use nodeperm_domain::Node;

/// Persisted user data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uuid: Uuid,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_primary_group")]
    pub primary_group: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl UserRecord {
    /// A record for a user with no data yet.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            username: None,
            primary_group: default_primary_group(),
            nodes: Vec::new(),
        }
    }
}

fn default_primary_group() -> String {
    DEFAULT_GROUP.to_string()
}

/// Persisted group data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// Storage-specific errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend connection error.
    #[error("storage connection error: {message}")]
    ConnectionError { message: String },

    /// Backend query error.
    #[error("storage query error: {message}")]
    QueryError { message: String },

    /// A stored record could not be decoded.
    #[error("serialization error: {message}")]
    SerializationError { message: String },
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Loads and saves holder records.
///
/// Implementations must be safe to call concurrently. Saving replaces the
/// whole record.
#[async_trait]
pub trait HolderStorage: Send + Sync + 'static {
    async fn load_user(&self, uuid: Uuid) -> StorageResult<Option<UserRecord>>;

    async fn save_user(&self, record: UserRecord) -> StorageResult<()>;

    /// Loads a group by name, case-insensitively.
    async fn load_group(&self, name: &str) -> StorageResult<Option<GroupRecord>>;

    async fn save_group(&self, record: GroupRecord) -> StorageResult<()>;

    async fn load_all_groups(&self) -> StorageResult<Vec<GroupRecord>>;
}

/// In-memory implementation of [`HolderStorage`].
#[derive(Debug, Default)]
pub struct MemoryStorage {
    users: DashMap<Uuid, UserRecord>,
    groups: DashMap<String, GroupRecord>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn group_key(name: &str) -> String {
    name.trim().to_lowercase()
}

#[async_trait]
impl HolderStorage for MemoryStorage {
    #[instrument(skip(self))]
    async fn load_user(&self, uuid: Uuid) -> StorageResult<Option<UserRecord>> {
        Ok(self.users.get(&uuid).map(|r| r.value().clone()))
    }

    #[instrument(skip(self, record), fields(uuid = %record.uuid))]
    async fn save_user(&self, record: UserRecord) -> StorageResult<()> {
        self.users.insert(record.uuid, record);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_group(&self, name: &str) -> StorageResult<Option<GroupRecord>> {
        Ok(self.groups.get(&group_key(name)).map(|r| r.value().clone()))
    }

    #[instrument(skip(self, record), fields(group = %record.name))]
    async fn save_group(&self, mut record: GroupRecord) -> StorageResult<()> {
        record.name = group_key(&record.name);
        self.groups.insert(record.name.clone(), record);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_all_groups(&self) -> StorageResult<Vec<GroupRecord>> {
        let mut groups: Vec<_> = self.groups.iter().map(|r| r.value().clone()).collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }
}
