//! nodeperm-server: application layer around the permission engine
//!
//! This crate wires the engine into an application:
//! - Layered configuration (defaults, YAML, environment)
//! - Logging initialisation and metric descriptions
//! - A storage seam for holder data, with an in-memory backend
//! - A service facade for checks, batch checks, meta and persisted mutations
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               nodeperm-server                │
//! ├─────────────────────────────────────────────┤
//! │  config.rs    - Configuration management    │
//! │  telemetry.rs - Logging and metrics setup   │
//! │  storage.rs   - HolderStorage + memory impl │
//! │  service.rs   - PermissionService facade    │
//! └─────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod service;
pub mod storage;
pub mod telemetry;

// Re-exports for convenience
pub use config::{ConfigLoadError, EngineConfig};
pub use service::{BatchCheckItem, PermissionService, ServiceError, ServiceResult};
pub use storage::{GroupRecord, HolderStorage, MemoryStorage, StorageError, UserRecord};
pub use telemetry::{init_logging, register_metrics, LoggingConfig};
