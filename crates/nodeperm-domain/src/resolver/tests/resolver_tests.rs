//! Inheritance resolver test suite.

use chrono::{Duration, Utc};

use super::mocks::{
    grant, group_ref, inherit, new_user, user_ref, FailingGroupLookup, MockGroupLookup,
};
use crate::context::{ContextSatisfyMode, ContextSet};
use crate::error::DomainError;
use crate::holder::{DataType, HolderIdentifier};
use crate::node::Node;
use crate::query::{Flag, QueryOptions};
use crate::resolver::{InheritanceResolver, Rank, ResolvedNodes};

fn keys(resolved: &ResolvedNodes) -> Vec<String> {
    resolved.iter().map(|r| r.node.key().to_string()).collect()
}

fn resolver() -> InheritanceResolver {
    InheritanceResolver::new(ContextSatisfyMode::AllValuesPerKey)
}

fn options() -> QueryOptions {
    QueryOptions::contextual(ContextSet::empty())
}

// ========== Section 1: Own Nodes and Ranking ==========

#[test]
fn test_own_nodes_outrank_inherited_nodes() {
    let lookup = MockGroupLookup::new();
    let admin = lookup.add_group("admin", Some(1000));
    grant(&admin, "fly", true);
    let user = new_user();
    user.holder().normal_data().add(Node::permission("fly").value(false).build().unwrap());
    user.holder().normal_data().add(Node::inheritance("admin").build().unwrap());

    let resolved = resolver().resolve(&user_ref(&user), &options(), &lookup).unwrap();

    let first = &resolved.nodes()[0];
    assert_eq!(first.node.key(), "fly");
    assert!(!first.node.value());
    assert_eq!(first.rank, Rank::Own);
    assert!(first.is_own());
    assert_eq!(first.origin, HolderIdentifier::User(user.uuid()));
}

#[test]
fn test_transient_nodes_precede_normal_nodes_of_same_holder() {
    let lookup = MockGroupLookup::new();
    lookup.add_group("default", None);
    let user = new_user();
    user.holder().normal_data().add(Node::permission("normal").build().unwrap());
    user.holder().transient_data().add(Node::permission("transient").build().unwrap());

    let resolved = resolver().resolve(&user_ref(&user), &options(), &lookup).unwrap();

    assert_eq!(resolved.nodes()[0].data_type, DataType::Transient);
    assert_eq!(keys(&resolved)[..2], ["transient", "normal"]);
}

// ========== Section 2: Weight and Distance Ordering ==========

#[test]
fn test_higher_weight_group_is_ordered_first() {
    let lookup = MockGroupLookup::new();
    let low = lookup.add_group("low", Some(10));
    let high = lookup.add_group("high", Some(20));
    grant(&low, "perm", true);
    grant(&high, "perm", false);
    let user = new_user();
    // low is declared first; weight still decides
    user.holder().normal_data().add(Node::inheritance("low").build().unwrap());
    user.holder().normal_data().add(Node::inheritance("high").build().unwrap());

    let resolved = resolver()
        .resolve(&user_ref(&user), &options().with_flag(Flag::ApplyPrimaryGroupImplicitly, false), &lookup)
        .unwrap();

    let perms: Vec<_> = resolved
        .iter()
        .filter(|r| r.node.key() == "perm")
        .map(|r| (r.origin.clone(), r.node.value()))
        .collect();
    assert_eq!(
        perms,
        vec![
            (HolderIdentifier::Group("high".into()), false),
            (HolderIdentifier::Group("low".into()), true),
        ]
    );
    let groups: Vec<_> = resolved.groups().iter().map(|g| g.name.as_str()).collect();
    assert_eq!(groups, vec!["high", "low"]);
}

#[test]
fn test_closer_group_wins_weight_tie() {
    // user -> a -> b, user -> c; all weight 0
    let lookup = MockGroupLookup::new();
    let a = lookup.add_group("a", None);
    let b = lookup.add_group("b", None);
    let c = lookup.add_group("c", None);
    inherit(&a, "b");
    grant(&b, "from.b", true);
    grant(&c, "from.c", true);
    let user = new_user();
    user.holder().normal_data().add(Node::inheritance("a").build().unwrap());
    user.holder().normal_data().add(Node::inheritance("c").build().unwrap());

    let resolved = resolver()
        .resolve(&user_ref(&user), &options().with_flag(Flag::ApplyPrimaryGroupImplicitly, false), &lookup)
        .unwrap();

    let order: Vec<_> = resolved.groups().iter().map(|g| (g.name.as_str(), g.distance)).collect();
    assert_eq!(order, vec![("a", 1), ("c", 1), ("b", 2)]);
    let keys = keys(&resolved);
    let pos = |k: &str| keys.iter().position(|x| x == k).unwrap();
    assert!(pos("from.c") < pos("from.b"));
}

#[test]
fn test_distant_heavy_group_outranks_close_light_group() {
    let lookup = MockGroupLookup::new();
    let member = lookup.add_group("member", Some(1));
    let staff = lookup.add_group("staff", Some(50));
    inherit(&member, "staff");
    grant(&member, "perm", true);
    grant(&staff, "perm", false);
    let user = new_user();
    user.holder().normal_data().add(Node::inheritance("member").build().unwrap());

    let resolved = resolver().resolve(&user_ref(&user), &options(), &lookup).unwrap();

    let first_perm = resolved.iter().find(|r| r.node.key() == "perm").unwrap();
    assert_eq!(first_perm.origin, HolderIdentifier::Group("staff".into()));
    assert_eq!(first_perm.distance, 2);
}

#[test]
fn test_resolution_is_deterministic() {
    let lookup = MockGroupLookup::new();
    for (name, weight) in [("a", 5), ("b", 5), ("c", 1)] {
        let group = lookup.add_group(name, Some(weight));
        grant(&group, &format!("perm.{name}"), true);
        grant(&group, "shared", name != "b");
    }
    let user = new_user();
    for name in ["c", "b", "a"] {
        user.holder().normal_data().add(Node::inheritance(name).build().unwrap());
    }
    let holder = user_ref(&user);

    let first = resolver().resolve(&holder, &options(), &lookup).unwrap();
    for _ in 0..10 {
        let again = resolver().resolve(&holder, &options(), &lookup).unwrap();
        assert_eq!(keys(&again), keys(&first));
    }
}

// ========== Section 3: Cycle and Duplicate Suppression ==========

#[test]
fn test_mutual_inheritance_terminates_and_contributes_once() {
    let lookup = MockGroupLookup::new();
    let a = lookup.add_group("a", None);
    let b = lookup.add_group("b", None);
    inherit(&a, "b");
    inherit(&b, "a");
    grant(&a, "perm.a", true);
    grant(&b, "perm.b", true);
    let user = new_user();
    user.holder().normal_data().add(Node::inheritance("a").build().unwrap());

    let resolved = resolver()
        .resolve(&user_ref(&user), &options().with_flag(Flag::ApplyPrimaryGroupImplicitly, false), &lookup)
        .unwrap();

    let keys = keys(&resolved);
    assert_eq!(keys.iter().filter(|k| *k == "perm.a").count(), 1);
    assert_eq!(keys.iter().filter(|k| *k == "perm.b").count(), 1);
    assert_eq!(resolved.groups().len(), 2);
}

#[test]
fn test_group_root_is_not_revisited_through_cycle() {
    let lookup = MockGroupLookup::new();
    let a = lookup.add_group("a", None);
    let b = lookup.add_group("b", None);
    inherit(&a, "b");
    inherit(&b, "a");
    grant(&a, "perm.a", true);

    let resolved = resolver().resolve(&group_ref(&a), &options(), &lookup).unwrap();

    let own: Vec<_> = resolved.iter().filter(|r| r.node.key() == "perm.a").collect();
    assert_eq!(own.len(), 1);
    assert_eq!(own[0].rank, Rank::Own);
    let groups: Vec<_> = resolved.groups().iter().map(|g| g.name.as_str()).collect();
    assert_eq!(groups, vec!["b"]);
}

#[test]
fn test_self_inheritance_is_ignored() {
    let lookup = MockGroupLookup::new();
    let a = lookup.add_group("a", None);
    inherit(&a, "a");
    grant(&a, "perm", true);

    let resolved = resolver().resolve(&group_ref(&a), &options(), &lookup).unwrap();

    assert!(resolved.groups().is_empty());
    assert_eq!(resolved.iter().filter(|r| r.node.key() == "perm").count(), 1);
}

#[test]
fn test_diamond_contributes_shared_ancestor_once() {
    let lookup = MockGroupLookup::new();
    let left = lookup.add_group("left", None);
    let right = lookup.add_group("right", None);
    let base = lookup.add_group("base", None);
    inherit(&left, "base");
    inherit(&right, "base");
    grant(&base, "base.perm", true);
    let user = new_user();
    user.holder().normal_data().add(Node::inheritance("left").build().unwrap());
    user.holder().normal_data().add(Node::inheritance("right").build().unwrap());

    let resolved = resolver()
        .resolve(&user_ref(&user), &options().with_flag(Flag::ApplyPrimaryGroupImplicitly, false), &lookup)
        .unwrap();

    assert_eq!(keys(&resolved).iter().filter(|k| *k == "base.perm").count(), 1);
    assert_eq!(resolved.groups().len(), 3);
}

// ========== Section 4: Dangling Edges and Lookup Failures ==========

#[test]
fn test_unloaded_group_is_skipped() {
    let lookup = MockGroupLookup::new();
    let user = new_user();
    user.holder().normal_data().add(Node::inheritance("ghost").build().unwrap());
    user.holder().normal_data().add(Node::permission("own").build().unwrap());

    let resolved = resolver().resolve(&user_ref(&user), &options(), &lookup).unwrap();

    assert!(resolved.groups().is_empty());
    assert!(keys(&resolved).contains(&"own".to_string()));
}

#[test]
fn test_lookup_failure_propagates() {
    let user = new_user();
    user.holder().normal_data().add(Node::inheritance("admin").build().unwrap());

    let result = resolver().resolve(&user_ref(&user), &options(), &FailingGroupLookup);

    assert!(matches!(result, Err(DomainError::LookupFailed { group, .. }) if group == "admin"));
}

// ========== Section 5: Primary Group Handling ==========

#[test]
fn test_primary_group_is_applied_implicitly() {
    let lookup = MockGroupLookup::new();
    let default = lookup.add_group("default", None);
    grant(&default, "chat.speak", true);
    let user = new_user();

    let resolved = resolver().resolve(&user_ref(&user), &options(), &lookup).unwrap();

    assert_eq!(keys(&resolved), vec!["chat.speak"]);
    assert_eq!(resolved.groups()[0].name, "default");
}

#[test]
fn test_primary_group_edge_can_be_disabled() {
    let lookup = MockGroupLookup::new();
    let default = lookup.add_group("default", None);
    grant(&default, "chat.speak", true);
    let user = new_user();

    let resolved = resolver()
        .resolve(
            &user_ref(&user),
            &options().with_flag(Flag::ApplyPrimaryGroupImplicitly, false),
            &lookup,
        )
        .unwrap();

    assert!(resolved.is_empty());
}

#[test]
fn test_explicit_primary_group_edge_is_not_duplicated() {
    let lookup = MockGroupLookup::new();
    lookup.add_group("default", None);
    let user = new_user();
    user.holder().normal_data().add(Node::inheritance("default").build().unwrap());

    let resolved = resolver().resolve(&user_ref(&user), &options(), &lookup).unwrap();

    assert_eq!(resolved.groups().len(), 1);
}

#[test]
fn test_resolve_inheritance_flag_limits_to_own_nodes() {
    let lookup = MockGroupLookup::new();
    let default = lookup.add_group("default", None);
    grant(&default, "inherited", true);
    let user = new_user();
    user.holder().normal_data().add(Node::permission("own").build().unwrap());

    let resolved = resolver()
        .resolve(&user_ref(&user), &options().with_flag(Flag::ResolveInheritance, false), &lookup)
        .unwrap();

    assert_eq!(keys(&resolved), vec!["own"]);
    assert!(resolved.groups().is_empty());
}

#[test]
fn test_implicit_primary_group_ranks_below_explicit_ancestors() {
    // Arrange: user -> a -> b explicitly, default only through the implicit edge
    let lookup = MockGroupLookup::new();
    let a = lookup.add_group("a", None);
    let b = lookup.add_group("b", None);
    let default = lookup.add_group("default", None);
    inherit(&a, "b");
    grant(&b, "x", true);
    grant(&default, "x", false);
    let user = new_user();
    user.holder().normal_data().add(Node::inheritance("a").build().unwrap());

    // Act
    let resolved = resolver().resolve(&user_ref(&user), &options(), &lookup).unwrap();

    // Assert
    let x: Vec<_> = resolved.iter().filter(|r| r.node.key() == "x").collect();
    assert!(x[0].node.value());
    assert_eq!(x[0].origin, HolderIdentifier::Group("b".into()));
    assert!(x[1].implicit);
    let names: Vec<_> = resolved.groups().iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "default"]);
    assert_eq!(resolved.groups()[2].distance, 1);
}

#[test]
fn test_heavier_primary_group_still_wins_on_weight() {
    let lookup = MockGroupLookup::new();
    let a = lookup.add_group("a", None);
    let default = lookup.add_group("default", Some(10));
    grant(&a, "x", true);
    grant(&default, "x", false);
    let user = new_user();
    user.holder().normal_data().add(Node::inheritance("a").build().unwrap());

    let resolved = resolver().resolve(&user_ref(&user), &options(), &lookup).unwrap();

    let first = resolved.iter().find(|r| r.node.key() == "x").unwrap();
    assert!(!first.node.value());
    assert_eq!(first.rank, Rank::Weight(10));
}

#[test]
fn test_primary_group_reached_explicitly_is_not_implicit() {
    let lookup = MockGroupLookup::new();
    let a = lookup.add_group("a", None);
    lookup.add_group("default", None);
    inherit(&a, "default");
    let user = new_user();
    user.holder().normal_data().add(Node::inheritance("a").build().unwrap());

    let resolved = resolver().resolve(&user_ref(&user), &options(), &lookup).unwrap();

    let default = &resolved.groups()[1];
    assert_eq!(default.name, "default");
    assert_eq!(default.distance, 2);
    assert!(!default.implicit);
}

// ========== Section 6: Context Filtering ==========

#[test]
fn test_contextual_inheritance_edge_follows_query_context() {
    let lookup = MockGroupLookup::new();
    let builder = lookup.add_group("builder", None);
    grant(&builder, "worldedit.use", true);
    let user = new_user();
    user.holder()
        .normal_data()
        .add(Node::inheritance("builder").context("server", "survival").build().unwrap());
    let holder = user_ref(&user);

    let creative = QueryOptions::contextual(ContextSet::of("server", "creative"));
    let survival = QueryOptions::contextual(ContextSet::from_pairs([
        ("server", "survival"),
        ("world", "any"),
    ]));

    let in_creative = resolver().resolve(&holder, &creative, &lookup).unwrap();
    let in_survival = resolver().resolve(&holder, &survival, &lookup).unwrap();

    assert!(!keys(&in_creative).contains(&"worldedit.use".to_string()));
    assert!(keys(&in_survival).contains(&"worldedit.use".to_string()));
}

#[test]
fn test_global_nodes_excluded_when_flags_unset() {
    let lookup = MockGroupLookup::new();
    let user = new_user();
    user.holder().normal_data().add(Node::permission("global").build().unwrap());
    user.holder()
        .normal_data()
        .add(Node::permission("scoped").context("server", "a").build().unwrap());
    let options = QueryOptions::contextual(ContextSet::of("server", "a"))
        .with_flag(Flag::IncludeNodesWithoutServerContext, false);

    let resolved = resolver().resolve(&user_ref(&user), &options, &lookup).unwrap();

    assert_eq!(keys(&resolved), vec!["scoped"]);
}

#[test]
fn test_expired_inheritance_edge_is_not_followed() {
    let lookup = MockGroupLookup::new();
    let vip = lookup.add_group("vip", None);
    grant(&vip, "vip.perk", true);
    let user = new_user();
    user.holder().normal_data().add(
        Node::inheritance("vip")
            .expiry(Utc::now() + Duration::milliseconds(30))
            .build()
            .unwrap(),
    );
    std::thread::sleep(std::time::Duration::from_millis(60));

    let resolved = resolver()
        .resolve(&user_ref(&user), &options().with_flag(Flag::ApplyPrimaryGroupImplicitly, false), &lookup)
        .unwrap();

    assert!(resolved.is_empty());
}

// ========== Section 7: Consistency Under Concurrent Mutation ==========

#[test]
fn test_resolution_never_mixes_states_of_one_holder() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::thread;

    // Arrange: a large own map widens the window between separate reads
    let lookup = MockGroupLookup::new();
    let muted = lookup.add_group("muted", None);
    grant(&muted, "chat.speak", false);
    let user = new_user();
    for i in 0..2000 {
        user.holder()
            .normal_data()
            .add(Node::permission(&format!("perm.{i}")).build().unwrap());
    }
    let holder = user_ref(&user);
    let edge = Node::inheritance("muted").build().unwrap();
    let options = options().with_flag(Flag::ApplyPrimaryGroupImplicitly, false);
    let done = AtomicBool::new(false);
    let barrier = Barrier::new(2);

    thread::scope(|scope| {
        scope.spawn(|| {
            barrier.wait();
            for _ in 0..200 {
                user.holder().normal_data().add(edge.clone());
                user.holder().normal_data().remove(&edge);
            }
            done.store(true, Ordering::SeqCst);
        });

        barrier.wait();
        let mut resolutions = 0;
        while !done.load(Ordering::SeqCst) || resolutions < 50 {
            // Act
            let resolved = resolver().resolve(&holder, &options, &lookup).unwrap();

            // Assert: the edge is present exactly when muted contributed
            let has_edge = resolved.iter().any(|r| r.is_own() && r.node == edge);
            let from_muted = resolved
                .iter()
                .any(|r| r.origin == HolderIdentifier::Group("muted".into()));
            assert_eq!(has_edge, from_muted);
            resolutions += 1;
        }
    });
}
