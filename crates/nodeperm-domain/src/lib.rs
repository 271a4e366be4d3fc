//! nodeperm-domain: node resolution and permission calculation
//!
//! This crate contains the permission engine:
//! - Nodes, context sets and per-holder node maps
//! - Inheritance resolution over the group graph
//! - Tristate permission calculation (exact, regex, wildcard)
//! - Prefix/suffix meta stacks and meta accumulation
//! - Per-holder cached data with compute-once semantics
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               nodeperm-domain                │
//! ├─────────────────────────────────────────────┤
//! │  engine/     - Public entry points          │
//! │  manager/    - Loaded users and groups      │
//! │  cache/      - Cached permission/meta data  │
//! │  calculator/ - Tristate permission checks   │
//! │  metastack/  - Prefix/suffix/meta stacks    │
//! │  resolver/   - Inheritance resolution       │
//! │  holder/     - Users, groups, node maps     │
//! │  node/       - Nodes and node kinds         │
//! │  context/    - Context sets                 │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod calculator;
pub mod context;
pub mod engine;
pub mod error;
pub mod holder;
pub mod manager;
pub mod metastack;
pub mod node;
pub mod query;
pub mod resolver;

// Re-export commonly used types at the crate root
pub use cache::{CachedDataConfig, CachedDataManager, PermissionData};
pub use calculator::{Tristate, TristateResult};
pub use context::{ContextSatisfyMode, ContextSet, MutableContextSet};
pub use engine::{EngineSettings, PermissionEngine, PrimaryGroupCalculation};
pub use error::{DomainError, DomainResult};
pub use holder::{DataMutateResult, DataType, Group, HolderIdentifier, HolderRef, User};
pub use manager::HolderManager;
pub use metastack::MetaData;
pub use node::{Node, NodeKind};
pub use query::{Flag, QueryOptions};
