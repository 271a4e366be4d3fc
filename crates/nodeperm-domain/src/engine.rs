//! Public entry points: queries through the cached-data layer and mutations
//! that keep it coherent.
//!
//! Every query for a holder goes through that holder's
//! [`CachedDataManager`](crate::cache::CachedDataManager): the first request
//! for a set of query options runs resolver, calculator and meta accumulation
//! once, and later requests share the result until the holder is mutated.
//!
//! Mutating a group invalidates every loaded holder, since any of them may
//! inherit from it.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use crate::cache::{CachedDataConfig, PermissionData};
use crate::calculator::{CalculatorSettings, PatternCache, PermissionCalculator, TristateResult};
use crate::context::{ContextSatisfyMode, ContextSet};
use crate::error::{DomainError, DomainResult};
use crate::holder::{DataMutateResult, DataType, HolderRef, User};
use crate::manager::HolderManager;
use crate::metastack::{MetaAccumulator, MetaData, MetaStackDefinition};
use crate::node::Node;
use crate::query::{Flag, QueryOptions};
use crate::resolver::{InheritanceResolver, InheritedGroup, ResolvedNodes};

/// How a user's effective primary group is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimaryGroupCalculation {
    /// The stored primary group.
    #[default]
    Stored,
    /// The heaviest directly inherited group, else the stored one.
    ParentsByWeight,
    /// The heaviest group anywhere in the inheritance tree, else the stored one.
    AllParentsByWeight,
}

/// Engine-wide settings.
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub satisfy_mode: ContextSatisfyMode,
    pub calculator: CalculatorSettings,
    pub prefix_stack: MetaStackDefinition,
    pub suffix_stack: MetaStackDefinition,
    pub primary_group_calculation: PrimaryGroupCalculation,
    pub cache: CachedDataConfig,
}

/// The permission engine.
#[derive(Debug)]
pub struct PermissionEngine {
    manager: Arc<HolderManager>,
    resolver: InheritanceResolver,
    accumulator: MetaAccumulator,
    patterns: PatternCache,
    settings: EngineSettings,
}

impl Default for PermissionEngine {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl PermissionEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            manager: Arc::new(HolderManager::new(settings.cache.clone())),
            resolver: InheritanceResolver::new(settings.satisfy_mode),
            accumulator: MetaAccumulator::new(
                settings.prefix_stack.clone(),
                settings.suffix_stack.clone(),
            ),
            patterns: PatternCache::new(),
            settings,
        }
    }

    pub fn manager(&self) -> &Arc<HolderManager> {
        &self.manager
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Resolves the holder's effective nodes, bypassing the cache.
    pub fn resolve_inherited_nodes(
        &self,
        holder: &HolderRef,
        options: &QueryOptions,
    ) -> DomainResult<ResolvedNodes> {
        self.resolver.resolve(holder, options, self.manager.as_ref())
    }

    pub fn permission_data(
        &self,
        holder: &HolderRef,
        options: &QueryOptions,
    ) -> DomainResult<Arc<PermissionData>> {
        holder.holder().cached_data().permission_data(options, || {
            let resolved = self.resolve_inherited_nodes(holder, options)?;
            let calculator =
                PermissionCalculator::new(&resolved, self.settings.calculator, &self.patterns);
            Ok(PermissionData::new(calculator, options.clone()))
        })
    }

    pub fn meta_data(
        &self,
        holder: &HolderRef,
        options: &QueryOptions,
    ) -> DomainResult<Arc<MetaData>> {
        holder.holder().cached_data().meta_data(options, || {
            let resolved = self.resolve_inherited_nodes(holder, options)?;
            let primary_group = match holder {
                HolderRef::User(user) => Some(self.primary_group(user, options)?),
                HolderRef::Group(_) => None,
            };
            Ok(self.accumulator.accumulate(&resolved, primary_group))
        })
    }

    pub fn check_permission(
        &self,
        holder: &HolderRef,
        permission: &str,
        options: &QueryOptions,
    ) -> DomainResult<TristateResult> {
        self.permission_data(holder, options)?
            .check_permission(permission)
    }

    /// Groups the holder effectively inherits, heaviest first.
    pub fn inherited_groups(
        &self,
        holder: &HolderRef,
        options: &QueryOptions,
    ) -> DomainResult<Vec<InheritedGroup>> {
        Ok(self
            .resolve_inherited_nodes(holder, options)?
            .groups()
            .to_vec())
    }

    /// The user's effective primary group under the configured calculation.
    pub fn primary_group(&self, user: &Arc<User>, options: &QueryOptions) -> DomainResult<String> {
        let stored = user.primary_group();
        let max_distance = match self.settings.primary_group_calculation {
            PrimaryGroupCalculation::Stored => return Ok(stored),
            PrimaryGroupCalculation::ParentsByWeight => Some(1),
            PrimaryGroupCalculation::AllParentsByWeight => None,
        };

        // The implicit edge to the stored group would always be a candidate.
        let options = options
            .clone()
            .with_flag(Flag::ApplyPrimaryGroupImplicitly, false);
        let resolved = self.resolve_inherited_nodes(&HolderRef::User(Arc::clone(user)), &options)?;

        // Groups are ordered heaviest first; ties keep the nearest.
        Ok(resolved
            .groups()
            .iter()
            .find(|g| max_distance.map_or(true, |max| g.distance <= max))
            .map(|g| g.name.clone())
            .unwrap_or(stored))
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub fn set_node(
        &self,
        holder: &HolderRef,
        data_type: DataType,
        node: Node,
    ) -> DomainResult<DataMutateResult> {
        self.ensure_loaded(holder)?;
        let result = holder.holder().data(data_type).add(node);
        self.after_mutation(holder, "set_node", result);
        Ok(result)
    }

    /// Removes nodes equal to `node`, ignoring value and expiry.
    pub fn unset_node(
        &self,
        holder: &HolderRef,
        data_type: DataType,
        node: &Node,
    ) -> DomainResult<DataMutateResult> {
        self.ensure_loaded(holder)?;
        let result = holder.holder().data(data_type).remove(node);
        self.after_mutation(holder, "unset_node", result);
        Ok(result)
    }

    pub fn unset_node_exact(
        &self,
        holder: &HolderRef,
        data_type: DataType,
        node: &Node,
    ) -> DomainResult<DataMutateResult> {
        self.ensure_loaded(holder)?;
        let result = holder.holder().data(data_type).remove_exact(node);
        self.after_mutation(holder, "unset_node_exact", result);
        Ok(result)
    }

    /// Clears the data map, or only the nodes in exactly `contexts`.
    pub fn clear_nodes(
        &self,
        holder: &HolderRef,
        data_type: DataType,
        contexts: Option<&ContextSet>,
    ) -> DomainResult<DataMutateResult> {
        self.ensure_loaded(holder)?;
        let map = holder.holder().data(data_type);
        let result = match contexts {
            Some(contexts) => map.clear_in_context(contexts),
            None => map.clear(),
        };
        self.after_mutation(holder, "clear_nodes", result);
        Ok(result)
    }

    /// Replaces the whole data map in one step, as when reloading a holder
    /// from storage. Readers see either the old content or the new one.
    pub fn set_content(
        &self,
        holder: &HolderRef,
        data_type: DataType,
        nodes: impl IntoIterator<Item = Node>,
    ) -> DomainResult<DataMutateResult> {
        self.ensure_loaded(holder)?;
        let result = holder.holder().data(data_type).set_content(nodes);
        self.after_mutation(holder, "set_content", result);
        Ok(result)
    }

    /// Drops expired nodes from both maps and returns them.
    pub fn remove_expired_nodes(&self, holder: &HolderRef) -> DomainResult<Vec<Node>> {
        self.ensure_loaded(holder)?;
        let now = Utc::now();
        let mut removed = holder.holder().transient_data().remove_expired(now);
        removed.extend(holder.holder().normal_data().remove_expired(now));

        let result = if removed.is_empty() {
            DataMutateResult::FailLacks
        } else {
            DataMutateResult::Success
        };
        self.after_mutation(holder, "remove_expired_nodes", result);
        Ok(removed)
    }

    pub fn set_primary_group(&self, user: &Arc<User>, group: &str) -> DomainResult<DataMutateResult> {
        let holder = HolderRef::User(Arc::clone(user));
        self.ensure_loaded(&holder)?;
        let group = group.trim().to_lowercase();
        if group.is_empty() {
            return Err(DomainError::InvalidNodeKey {
                key: group,
                reason: "primary group name is empty".to_string(),
            });
        }

        let result = if user.primary_group() == group {
            DataMutateResult::FailAlreadyHas
        } else {
            user.set_primary_group(&group);
            DataMutateResult::Success
        };
        self.after_mutation(&holder, "set_primary_group", result);
        Ok(result)
    }

    fn ensure_loaded(&self, holder: &HolderRef) -> DomainResult<()> {
        if self.manager.is_loaded(holder) {
            Ok(())
        } else {
            Err(DomainError::HolderNotLoaded {
                identifier: holder.identifier().to_string(),
            })
        }
    }

    fn after_mutation(&self, holder: &HolderRef, operation: &str, result: DataMutateResult) {
        debug!(holder = %holder.identifier(), operation, ?result, "node mutation");
        if !result.was_successful() {
            return;
        }
        holder.holder().cached_data().invalidate();
        if let HolderRef::Group(_) = holder {
            self.manager.invalidate_all_user_caches();
            self.manager.invalidate_all_group_caches();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use uuid::Uuid;

    use super::*;
    use crate::calculator::Tristate;
    use crate::metastack::PRIMARY_GROUP_META_KEY;

    fn user(engine: &PermissionEngine) -> HolderRef {
        HolderRef::User(engine.manager().get_or_create_user(Uuid::new_v4(), Some("steve")))
    }

    fn group(engine: &PermissionEngine, name: &str) -> HolderRef {
        HolderRef::Group(engine.manager().get_or_create_group(name))
    }

    fn set(engine: &PermissionEngine, holder: &HolderRef, node: Node) {
        let result = engine.set_node(holder, DataType::Normal, node).unwrap();
        assert_eq!(result, DataMutateResult::Success);
    }

    fn check(engine: &PermissionEngine, holder: &HolderRef, permission: &str) -> Tristate {
        engine
            .check_permission(holder, permission, &QueryOptions::non_contextual())
            .unwrap()
            .result
    }

    // ==========================================================
    // Section 1: End-to-end resolution
    // ==========================================================

    #[test]
    fn test_muted_group_outweighs_default() {
        // Arrange
        let engine = PermissionEngine::default();
        let default = group(&engine, "default");
        let muted = group(&engine, "muted");
        set(&engine, &default, Node::permission("chat.speak").build().unwrap());
        set(&engine, &muted, Node::weight(5).build().unwrap());
        set(&engine, &muted, Node::permission("chat.speak").value(false).build().unwrap());

        let user = user(&engine);
        set(&engine, &user, Node::inheritance("default").build().unwrap());
        set(&engine, &user, Node::inheritance("muted").build().unwrap());

        // Act / Assert
        assert_eq!(check(&engine, &user, "chat.speak"), Tristate::False);
        let contextual = QueryOptions::contextual(ContextSet::of("server", "lobby"));
        assert_eq!(
            engine
                .check_permission(&user, "chat.speak", &contextual)
                .unwrap()
                .result,
            Tristate::False
        );

        let result = engine
            .unset_node(&user, DataType::Normal, &Node::inheritance("muted").build().unwrap())
            .unwrap();
        assert_eq!(result, DataMutateResult::Success);
        assert_eq!(check(&engine, &user, "chat.speak"), Tristate::True);
    }

    #[test]
    fn test_heavier_group_wins_conflict() {
        let engine = PermissionEngine::default();
        let low = group(&engine, "low");
        let high = group(&engine, "high");
        set(&engine, &low, Node::weight(10).build().unwrap());
        set(&engine, &low, Node::permission("build.place").build().unwrap());
        set(&engine, &high, Node::weight(20).build().unwrap());
        set(&engine, &high, Node::permission("build.place").value(false).build().unwrap());

        let user = user(&engine);
        set(&engine, &user, Node::inheritance("low").build().unwrap());
        set(&engine, &user, Node::inheritance("high").build().unwrap());

        assert_eq!(check(&engine, &user, "build.place"), Tristate::False);
        let groups = engine
            .inherited_groups(&user, &QueryOptions::non_contextual())
            .unwrap();
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["high", "low"]);
    }

    #[test]
    fn test_own_node_overrides_inherited() {
        let engine = PermissionEngine::default();
        let admin = group(&engine, "admin");
        set(&engine, &admin, Node::weight(100).build().unwrap());
        set(&engine, &admin, Node::permission("*").build().unwrap());

        let user = user(&engine);
        set(&engine, &user, Node::inheritance("admin").build().unwrap());
        set(&engine, &user, Node::permission("server.stop").value(false).build().unwrap());

        assert_eq!(check(&engine, &user, "server.stop"), Tristate::False);
        assert_eq!(check(&engine, &user, "server.restart"), Tristate::True);
    }

    #[test]
    fn test_empty_permission_is_rejected() {
        let engine = PermissionEngine::default();
        let user = user(&engine);

        let err = engine
            .check_permission(&user, "  ", &QueryOptions::non_contextual())
            .unwrap_err();

        assert!(matches!(err, DomainError::InvalidPermission { .. }));
    }

    // ==========================================================
    // Section 2: Cache coherency
    // ==========================================================

    #[test]
    fn test_permission_data_is_shared_until_mutation() {
        // Arrange
        let engine = PermissionEngine::default();
        let user = user(&engine);
        let options = QueryOptions::non_contextual();

        // Act
        let first = engine.permission_data(&user, &options).unwrap();
        let second = engine.permission_data(&user, &options).unwrap();
        set(&engine, &user, Node::permission("fly").build().unwrap());
        let third = engine.permission_data(&user, &options).unwrap();

        // Assert
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.check_permission("fly").unwrap().result, Tristate::True);
    }

    #[test]
    fn test_group_mutation_reaches_inheriting_users() {
        let engine = PermissionEngine::default();
        let staff = group(&engine, "staff");
        let user = user(&engine);
        set(&engine, &user, Node::inheritance("staff").build().unwrap());
        assert_eq!(check(&engine, &user, "kick"), Tristate::Undefined);

        set(&engine, &staff, Node::permission("kick").build().unwrap());

        assert_eq!(check(&engine, &user, "kick"), Tristate::True);
    }

    #[test]
    fn test_failed_mutation_keeps_cache() {
        let engine = PermissionEngine::default();
        let user = user(&engine);
        set(&engine, &user, Node::permission("fly").build().unwrap());
        let before = user.holder().cached_data().generation();

        let result = engine
            .set_node(&user, DataType::Normal, Node::permission("fly").build().unwrap())
            .unwrap();

        assert_eq!(result, DataMutateResult::FailAlreadyHas);
        assert_eq!(user.holder().cached_data().generation(), before);
    }

    #[test]
    fn test_transient_nodes_apply() {
        let engine = PermissionEngine::default();
        let user = user(&engine);
        set(&engine, &user, Node::permission("fly").build().unwrap());

        engine
            .set_node(&user, DataType::Transient, Node::permission("fly").value(false).build().unwrap())
            .unwrap();

        assert_eq!(check(&engine, &user, "fly"), Tristate::False);

        engine.clear_nodes(&user, DataType::Transient, None).unwrap();
        assert_eq!(check(&engine, &user, "fly"), Tristate::True);
    }

    #[test]
    fn test_clear_nodes_in_context_only() {
        let engine = PermissionEngine::default();
        let user = user(&engine);
        let lobby = ContextSet::of("server", "lobby");
        set(&engine, &user, Node::permission("fly").build().unwrap());
        set(&engine, &user, Node::permission("warp").contexts(&lobby).build().unwrap());

        engine
            .clear_nodes(&user, DataType::Normal, Some(&lobby))
            .unwrap();

        let remaining = user.holder().normal_data().as_list();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key(), "fly");
    }

    #[test]
    fn test_remove_expired_nodes() {
        let engine = PermissionEngine::default();
        let user = user(&engine);
        set(
            &engine,
            &user,
            Node::permission("vip.temp")
                .expiry_after(chrono::Duration::milliseconds(20))
                .build()
                .unwrap(),
        );
        set(&engine, &user, Node::permission("vip.perm").build().unwrap());

        thread::sleep(std::time::Duration::from_millis(60));
        let removed = engine.remove_expired_nodes(&user).unwrap();

        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].key(), "vip.temp");
        assert!(engine.remove_expired_nodes(&user).unwrap().is_empty());
    }

    #[test]
    fn test_mutating_unloaded_holder_fails() {
        let engine = PermissionEngine::default();
        let user = user(&engine);
        if let HolderRef::User(u) = &user {
            engine.manager().unload_user(u.uuid());
        }

        let err = engine
            .set_node(&user, DataType::Normal, Node::permission("fly").build().unwrap())
            .unwrap_err();

        assert!(matches!(err, DomainError::HolderNotLoaded { .. }));
    }

    #[test]
    fn test_concurrent_checks_see_whole_mutations() {
        // Arrange: muted denies chat.speak and marks itself; default grants it
        let engine = Arc::new(PermissionEngine::default());
        let default = group(&engine, "default");
        set(&engine, &default, Node::permission("chat.speak").build().unwrap());
        let muted = group(&engine, "muted");
        set(&engine, &muted, Node::weight(5).build().unwrap());
        set(&engine, &muted, Node::permission("chat.speak").value(false).build().unwrap());
        set(&engine, &muted, Node::permission("muted.marker").build().unwrap());
        let user = user(&engine);
        for i in 0..500 {
            set(&engine, &user, Node::permission(format!("perm.{i}")).build().unwrap());
        }
        let edge = Node::inheritance("muted").build().unwrap();
        let barrier = Arc::new(Barrier::new(5));

        // Act
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let engine = Arc::clone(&engine);
                let user = user.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (0..200)
                        .map(|_| {
                            let data = engine
                                .permission_data(&user, &QueryOptions::non_contextual())
                                .unwrap();
                            let speak = data.check_permission("chat.speak").unwrap().result;
                            let marker = data.check_permission("muted.marker").unwrap().result;
                            (speak, marker)
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        barrier.wait();
        for _ in 0..50 {
            engine.set_node(&user, DataType::Normal, edge.clone()).unwrap();
            engine.unset_node(&user, DataType::Normal, &edge).unwrap();
        }

        // Assert: muted either contributed both nodes or neither
        for reader in readers {
            for (speak, marker) in reader.join().unwrap() {
                match marker {
                    Tristate::True => assert_eq!(speak, Tristate::False),
                    _ => assert_eq!(speak, Tristate::True),
                }
            }
        }
        assert_eq!(check(&engine, &user, "chat.speak"), Tristate::True);
    }

    #[test]
    fn test_set_content_swaps_data_for_concurrent_readers() {
        // Arrange
        let engine = Arc::new(PermissionEngine::default());
        let user = user(&engine);
        let content: Vec<Node> = (0..1000)
            .map(|i| Node::permission(format!("perm.{i}")).build().unwrap())
            .chain([Node::permission("zz.last").build().unwrap()])
            .collect();
        engine.set_content(&user, DataType::Normal, content.clone()).unwrap();
        let barrier = Arc::new(Barrier::new(2));

        // Act
        let reader = {
            let engine = Arc::clone(&engine);
            let user = user.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..500)
                    .map(|_| check(&engine, &user, "zz.last"))
                    .collect::<Vec<_>>()
            })
        };
        barrier.wait();
        for i in 0..30 {
            let reload = if i % 2 == 0 {
                content.iter().rev().cloned().collect::<Vec<_>>()
            } else {
                content.clone()
            };
            engine.set_content(&user, DataType::Normal, reload).unwrap();
        }

        // Assert
        assert!(reader.join().unwrap().iter().all(|r| *r == Tristate::True));
        assert_eq!(
            engine.set_content(&user, DataType::Normal, content).unwrap(),
            DataMutateResult::FailAlreadyHas
        );
    }

    // ==========================================================
    // Section 3: Meta and primary group
    // ==========================================================

    #[test]
    fn test_meta_data_includes_inherited_prefix() {
        let engine = PermissionEngine::default();
        let vip = group(&engine, "vip");
        set(&engine, &vip, Node::weight(10).build().unwrap());
        set(&engine, &vip, Node::prefix("[VIP]", 10).build().unwrap());
        let user = user(&engine);
        set(&engine, &user, Node::inheritance("vip").build().unwrap());

        let meta = engine
            .meta_data(&user, &QueryOptions::non_contextual())
            .unwrap();

        assert_eq!(meta.prefix(), Some("[VIP]"));
        assert_eq!(meta.weight(), 10);
        assert_eq!(meta.meta_value(PRIMARY_GROUP_META_KEY), Some("default"));
    }

    fn weighted_tree(settings: EngineSettings) -> (PermissionEngine, Arc<User>) {
        let engine = PermissionEngine::new(settings);
        let member = group(&engine, "member");
        let elder = group(&engine, "elder");
        engine.manager().get_or_create_group("default");
        set(&engine, &member, Node::weight(10).build().unwrap());
        set(&engine, &member, Node::inheritance("elder").build().unwrap());
        set(&engine, &elder, Node::weight(50).build().unwrap());

        let uuid = Uuid::new_v4();
        let user = engine.manager().get_or_create_user(uuid, None);
        set(&engine, &HolderRef::User(Arc::clone(&user)), Node::inheritance("member").build().unwrap());
        (engine, user)
    }

    #[test]
    fn test_primary_group_calculations() {
        let options = QueryOptions::non_contextual();

        let (engine, user) = weighted_tree(EngineSettings::default());
        assert_eq!(engine.primary_group(&user, &options).unwrap(), "default");

        let (engine, user) = weighted_tree(EngineSettings {
            primary_group_calculation: PrimaryGroupCalculation::ParentsByWeight,
            ..EngineSettings::default()
        });
        assert_eq!(engine.primary_group(&user, &options).unwrap(), "member");

        let (engine, user) = weighted_tree(EngineSettings {
            primary_group_calculation: PrimaryGroupCalculation::AllParentsByWeight,
            ..EngineSettings::default()
        });
        assert_eq!(engine.primary_group(&user, &options).unwrap(), "elder");
    }

    #[test]
    fn test_set_primary_group_invalidates_meta() {
        let engine = PermissionEngine::default();
        engine.manager().get_or_create_group("builder");
        let user = engine.manager().get_or_create_user(Uuid::new_v4(), None);
        let holder = HolderRef::User(Arc::clone(&user));
        let options = QueryOptions::non_contextual();
        assert_eq!(
            engine.meta_data(&holder, &options).unwrap().primary_group(),
            Some("default")
        );

        assert_eq!(
            engine.set_primary_group(&user, "Builder").unwrap(),
            DataMutateResult::Success
        );
        assert_eq!(
            engine.set_primary_group(&user, "builder").unwrap(),
            DataMutateResult::FailAlreadyHas
        );

        assert_eq!(
            engine.meta_data(&holder, &options).unwrap().primary_group(),
            Some("builder")
        );
    }
}
