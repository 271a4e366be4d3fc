//! In-process service facade.
//!
//! [`PermissionService`] ties the engine to a [`HolderStorage`]: it loads
//! holders from storage, answers checks for loaded users under a context,
//! and writes normal-data mutations back. Transient nodes are never
//! persisted.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use nodeperm_domain::{
    ContextSet, DataMutateResult, DataType, DomainError, Group, HolderRef, MetaData, Node,
    PermissionEngine, Tristate, User,
};

use crate::config::{ConfigLoadError, EngineConfig};
use crate::storage::{GroupRecord, HolderStorage, StorageError, UserRecord};
use crate::telemetry::register_metrics;

/// Maximum number of checks in one batch.
pub const MAX_BATCH_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Config(#[from] ConfigLoadError),

    #[error("user not loaded: {uuid}")]
    UserNotLoaded { uuid: Uuid },

    #[error("invalid batch: {message}")]
    InvalidBatch { message: String },
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// One check of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCheckItem {
    pub permission: String,
    pub context: ContextSet,
}

impl BatchCheckItem {
    pub fn new(permission: impl Into<String>, context: ContextSet) -> Self {
        Self {
            permission: permission.into(),
            context,
        }
    }
}

/// Identifies checks that must produce the same result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CheckKey {
    permission: String,
    context: ContextSet,
}

impl CheckKey {
    fn new(item: &BatchCheckItem) -> Self {
        Self {
            permission: item.permission.trim().to_lowercase(),
            context: item.context.clone(),
        }
    }
}

/// Permission service over a storage backend.
pub struct PermissionService<S: HolderStorage> {
    engine: Arc<PermissionEngine>,
    storage: Arc<S>,
    config: EngineConfig,
}

impl<S: HolderStorage> PermissionService<S> {
    pub fn new(config: EngineConfig, storage: Arc<S>) -> ServiceResult<Self> {
        let settings = config.to_engine_settings()?;
        register_metrics();
        Ok(Self {
            engine: Arc::new(PermissionEngine::new(settings)),
            storage,
            config,
        })
    }

    pub fn engine(&self) -> &Arc<PermissionEngine> {
        &self.engine
    }

    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Loads every stored group, replacing the normal data of groups
    /// already loaded. Returns the number of groups loaded.
    #[instrument(skip(self))]
    pub async fn load_all_groups(&self) -> ServiceResult<usize> {
        let records = self.storage.load_all_groups().await?;
        let manager = self.engine.manager();
        for record in &records {
            let group = manager.get_or_create_group(&record.name);
            let result = group.holder().normal_data().set_content(record.nodes.iter().cloned());
            debug!(group = group.name(), ?result, "group data replaced");
        }
        manager.invalidate_all_user_caches();
        manager.invalidate_all_group_caches();
        debug!(count = records.len(), "groups loaded");
        Ok(records.len())
    }

    /// Loads a user, creating an empty record when none is stored.
    #[instrument(skip(self))]
    pub async fn load_user(&self, uuid: Uuid, username: Option<&str>) -> ServiceResult<Arc<User>> {
        let record = self
            .storage
            .load_user(uuid)
            .await?
            .unwrap_or_else(|| UserRecord::new(uuid));
        let username = username.or(record.username.as_deref());
        let user = self.engine.manager().get_or_create_user(uuid, username);

        self.engine.set_content(
            &HolderRef::User(Arc::clone(&user)),
            DataType::Normal,
            record.nodes,
        )?;
        self.engine.set_primary_group(&user, &record.primary_group)?;
        user.holder().cached_data().invalidate();
        Ok(user)
    }

    pub fn unload_user(&self, uuid: Uuid) -> bool {
        self.engine.manager().unload_user(uuid).is_some()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    #[instrument(skip(self, context), fields(context = %context))]
    pub fn check(&self, uuid: Uuid, permission: &str, context: &ContextSet) -> ServiceResult<Tristate> {
        let user = self.loaded_user(uuid)?;
        metrics::counter!("nodeperm_check_requests_total").increment(1);
        let options = self.config.query_options(context.clone());
        let result = self
            .engine
            .check_permission(&HolderRef::User(user), permission, &options)?;
        Ok(result.result)
    }

    /// Like [`check`](Self::check), with undefined treated as denied.
    pub fn has_permission(
        &self,
        uuid: Uuid,
        permission: &str,
        context: &ContextSet,
    ) -> ServiceResult<bool> {
        Ok(self.check(uuid, permission, context)?.as_bool_or(false))
    }

    /// Runs several checks for one user. Identical checks run once; results
    /// are returned in request order.
    #[instrument(skip(self, items), fields(batch_size = items.len()))]
    pub fn batch_check(&self, uuid: Uuid, items: &[BatchCheckItem]) -> ServiceResult<Vec<Tristate>> {
        if items.is_empty() {
            return Err(ServiceError::InvalidBatch {
                message: "batch must contain at least one check".to_string(),
            });
        }
        if items.len() > MAX_BATCH_SIZE {
            return Err(ServiceError::InvalidBatch {
                message: format!(
                    "batch size {} exceeds maximum of {MAX_BATCH_SIZE}",
                    items.len()
                ),
            });
        }

        let mut unique: Vec<&BatchCheckItem> = Vec::new();
        let mut key_to_index: HashMap<CheckKey, usize> = HashMap::new();
        let mut position_to_unique: Vec<usize> = Vec::with_capacity(items.len());
        for item in items {
            let index = *key_to_index.entry(CheckKey::new(item)).or_insert_with(|| {
                unique.push(item);
                unique.len() - 1
            });
            position_to_unique.push(index);
        }
        debug!(total = items.len(), unique = unique.len(), "batch deduplicated");

        let results = unique
            .iter()
            .map(|item| self.check(uuid, &item.permission, &item.context))
            .collect::<ServiceResult<Vec<_>>>()?;

        Ok(position_to_unique.into_iter().map(|i| results[i]).collect())
    }

    #[instrument(skip(self, context), fields(context = %context))]
    pub fn meta(&self, uuid: Uuid, context: &ContextSet) -> ServiceResult<Arc<MetaData>> {
        let user = self.loaded_user(uuid)?;
        let options = self.config.query_options(context.clone());
        Ok(self.engine.meta_data(&HolderRef::User(user), &options)?)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    #[instrument(skip(self, node), fields(node = node.key()))]
    pub async fn set_user_node(
        &self,
        uuid: Uuid,
        node: Node,
        data_type: DataType,
    ) -> ServiceResult<DataMutateResult> {
        let user = self.loaded_user(uuid)?;
        let result = self
            .engine
            .set_node(&HolderRef::User(Arc::clone(&user)), data_type, node)?;
        self.persist_user(&user, data_type, result).await?;
        Ok(result)
    }

    #[instrument(skip(self, node), fields(node = node.key()))]
    pub async fn unset_user_node(
        &self,
        uuid: Uuid,
        node: &Node,
        data_type: DataType,
    ) -> ServiceResult<DataMutateResult> {
        let user = self.loaded_user(uuid)?;
        let result = self
            .engine
            .unset_node(&HolderRef::User(Arc::clone(&user)), data_type, node)?;
        self.persist_user(&user, data_type, result).await?;
        Ok(result)
    }

    #[instrument(skip(self))]
    pub async fn set_primary_group(&self, uuid: Uuid, group: &str) -> ServiceResult<DataMutateResult> {
        let user = self.loaded_user(uuid)?;
        let result = self.engine.set_primary_group(&user, group)?;
        self.persist_user(&user, DataType::Normal, result).await?;
        Ok(result)
    }

    /// Sets a node on a group, creating the group if it is not loaded.
    #[instrument(skip(self, node), fields(node = node.key()))]
    pub async fn set_group_node(
        &self,
        group: &str,
        node: Node,
        data_type: DataType,
    ) -> ServiceResult<DataMutateResult> {
        let group = self.engine.manager().get_or_create_group(group);
        let result = self
            .engine
            .set_node(&HolderRef::Group(Arc::clone(&group)), data_type, node)?;
        self.persist_group(&group, data_type, result).await?;
        Ok(result)
    }

    #[instrument(skip(self, node), fields(node = node.key()))]
    pub async fn unset_group_node(
        &self,
        group: &str,
        node: &Node,
        data_type: DataType,
    ) -> ServiceResult<DataMutateResult> {
        let Some(group) = self.engine.manager().group(group) else {
            return Ok(DataMutateResult::FailLacks);
        };
        let result = self
            .engine
            .unset_node(&HolderRef::Group(Arc::clone(&group)), data_type, node)?;
        self.persist_group(&group, data_type, result).await?;
        Ok(result)
    }

    fn loaded_user(&self, uuid: Uuid) -> ServiceResult<Arc<User>> {
        self.engine
            .manager()
            .user(uuid)
            .ok_or(ServiceError::UserNotLoaded { uuid })
    }

    async fn persist_user(
        &self,
        user: &User,
        data_type: DataType,
        result: DataMutateResult,
    ) -> ServiceResult<()> {
        if data_type != DataType::Normal || !result.was_successful() {
            return Ok(());
        }
        let record = UserRecord {
            uuid: user.uuid(),
            username: user.username().map(str::to_string),
            primary_group: user.primary_group(),
            nodes: user.holder().normal_data().as_list(),
        };
        self.storage.save_user(record).await?;
        Ok(())
    }

    async fn persist_group(
        &self,
        group: &Group,
        data_type: DataType,
        result: DataMutateResult,
    ) -> ServiceResult<()> {
        if data_type != DataType::Normal || !result.was_successful() {
            return Ok(());
        }
        let record = GroupRecord {
            name: group.name().to_string(),
            nodes: group.holder().normal_data().as_list(),
        };
        self.storage.save_group(record).await?;
        Ok(())
    }
}
