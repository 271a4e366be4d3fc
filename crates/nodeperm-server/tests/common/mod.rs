//! Shared helpers for service integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use nodeperm_domain::Node;
use nodeperm_server::{EngineConfig, GroupRecord, HolderStorage, MemoryStorage, PermissionService};

pub type TestService = PermissionService<MemoryStorage>;

pub fn node(key: &str) -> Node {
    Node::builder(key).build().unwrap()
}

pub fn denied(key: &str) -> Node {
    Node::builder(key).value(false).build().unwrap()
}

/// Stores `default` (grants chat.speak) and `muted` (weight 5, denies it).
pub async fn seed_default_and_muted(storage: &MemoryStorage) {
    storage
        .save_group(GroupRecord {
            name: "default".into(),
            nodes: vec![node("chat.speak"), node("prefix.0.[Member]")],
        })
        .await
        .unwrap();
    storage
        .save_group(GroupRecord {
            name: "muted".into(),
            nodes: vec![
                node("weight.5"),
                denied("chat.speak"),
                node("prefix.5.[Muted]"),
            ],
        })
        .await
        .unwrap();
}

pub async fn create_service(config: EngineConfig) -> (TestService, Arc<MemoryStorage>) {
    let storage = MemoryStorage::new_shared();
    seed_default_and_muted(&storage).await;
    let service = PermissionService::new(config, Arc::clone(&storage)).unwrap();
    service.load_all_groups().await.unwrap();
    (service, storage)
}
