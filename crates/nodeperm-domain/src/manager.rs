//! Registry of loaded users and groups.
//!
//! The manager owns every live [`User`] and [`Group`] instance. Inheritance is
//! resolved by group name through the manager, so an unloaded group simply
//! drops out of every resolution until it is loaded again.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::cache::CachedDataConfig;
use crate::error::DomainResult;
use crate::holder::{Group, HolderRef, User};
use crate::resolver::GroupLookup;

/// Loaded holders, keyed by uuid and lowercase group name.
#[derive(Debug, Default)]
pub struct HolderManager {
    users: DashMap<Uuid, Arc<User>>,
    groups: DashMap<String, Arc<Group>>,
    cache_config: CachedDataConfig,
}

impl HolderManager {
    pub fn new(cache_config: CachedDataConfig) -> Self {
        Self {
            users: DashMap::new(),
            groups: DashMap::new(),
            cache_config,
        }
    }

    /// Returns the loaded user, creating an empty one if absent.
    ///
    /// An existing user keeps its original username.
    pub fn get_or_create_user(&self, uuid: Uuid, username: Option<&str>) -> Arc<User> {
        let entry = self.users.entry(uuid).or_insert_with(|| {
            debug!(%uuid, "loading user");
            Arc::new(User::new(
                uuid,
                username.map(str::to_string),
                &self.cache_config,
            ))
        });
        Arc::clone(entry.value())
    }

    /// Returns the loaded group, creating an empty one if absent.
    pub fn get_or_create_group(&self, name: &str) -> Arc<Group> {
        let key = name.trim().to_lowercase();
        let entry = self.groups.entry(key).or_insert_with(|| {
            debug!(group = %name, "loading group");
            Arc::new(Group::new(name, &self.cache_config))
        });
        Arc::clone(entry.value())
    }

    pub fn user(&self, uuid: Uuid) -> Option<Arc<User>> {
        self.users.get(&uuid).map(|u| Arc::clone(u.value()))
    }

    pub fn group(&self, name: &str) -> Option<Arc<Group>> {
        self.groups
            .get(&name.trim().to_lowercase())
            .map(|g| Arc::clone(g.value()))
    }

    pub fn unload_user(&self, uuid: Uuid) -> Option<Arc<User>> {
        self.users.remove(&uuid).map(|(_, user)| user)
    }

    /// Unloads a group and invalidates every cache, since any holder may
    /// have inherited from it.
    pub fn unload_group(&self, name: &str) -> Option<Arc<Group>> {
        let removed = self
            .groups
            .remove(&name.trim().to_lowercase())
            .map(|(_, group)| group);
        if removed.is_some() {
            self.invalidate_all_user_caches();
            self.invalidate_all_group_caches();
        }
        removed
    }

    pub fn users(&self) -> Vec<Arc<User>> {
        self.users.iter().map(|u| Arc::clone(u.value())).collect()
    }

    /// Loaded groups, sorted by name.
    pub fn groups(&self) -> Vec<Arc<Group>> {
        let mut groups: Vec<_> = self.groups.iter().map(|g| Arc::clone(g.value())).collect();
        groups.sort_by(|a, b| a.name().cmp(b.name()));
        groups
    }

    /// Whether `holder` is the very instance this manager has loaded.
    pub fn is_loaded(&self, holder: &HolderRef) -> bool {
        match holder {
            HolderRef::User(user) => self
                .user(user.uuid())
                .is_some_and(|loaded| Arc::ptr_eq(&loaded, user)),
            HolderRef::Group(group) => self
                .group(group.name())
                .is_some_and(|loaded| Arc::ptr_eq(&loaded, group)),
        }
    }

    pub fn invalidate_all_user_caches(&self) {
        trace!(count = self.users.len(), "invalidating all user caches");
        for user in self.users.iter() {
            user.holder().cached_data().invalidate();
        }
    }

    pub fn invalidate_all_group_caches(&self) {
        trace!(count = self.groups.len(), "invalidating all group caches");
        for group in self.groups.iter() {
            group.holder().cached_data().invalidate();
        }
    }
}

impl GroupLookup for HolderManager {
    fn group(&self, name: &str) -> DomainResult<Option<Arc<Group>>> {
        Ok(HolderManager::group(self, name))
    }
}
