//! Per-holder cached data with compute-once semantics.
//!
//! Each holder owns a [`CachedDataManager`] holding two Moka caches, one for
//! [`PermissionData`] and one for [`MetaData`], keyed by the query options
//! they were computed under.
//!
//! # Compute once
//!
//! Lookups go through `try_get_with`, which runs the initializer at most once
//! per key at a time; concurrent callers for the same key block on the
//! in-flight computation and receive its result. Errors are handed to every
//! waiter and never stored.
//!
//! # Invalidation
//!
//! Keys carry a generation number. `invalidate` bumps the generation before
//! clearing the caches, so a computation that started before a mutation can
//! only populate a key from the old generation, which no later lookup reads.
//!
//! # Eviction
//!
//! Entries are bounded by capacity and evicted after a period without access.
//! Eviction only costs a recomputation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tracing::trace;

use crate::calculator::{PermissionCalculator, TristateResult};
use crate::error::DomainResult;
use crate::metastack::MetaData;
use crate::query::QueryOptions;

/// Configuration for per-holder cached data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDataConfig {
    /// Maximum entries per cache (permission and meta are bounded separately).
    pub max_capacity: u64,
    /// Entries unused for this long are evicted.
    pub expire_after_access: Duration,
}

impl Default for CachedDataConfig {
    fn default() -> Self {
        Self {
            max_capacity: 256,
            expire_after_access: Duration::from_secs(120),
        }
    }
}

impl CachedDataConfig {
    /// Sets the maximum capacity.
    pub fn with_max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = max_capacity;
        self
    }

    /// Sets the idle expiry.
    pub fn with_expire_after_access(mut self, expire_after_access: Duration) -> Self {
        self.expire_after_access = expire_after_access;
        self
    }
}

/// Computed permission data for one set of query options.
#[derive(Debug)]
pub struct PermissionData {
    calculator: PermissionCalculator,
    options: QueryOptions,
}

impl PermissionData {
    pub fn new(calculator: PermissionCalculator, options: QueryOptions) -> Self {
        Self {
            calculator,
            options,
        }
    }

    pub fn check_permission(&self, permission: &str) -> DomainResult<TristateResult> {
        self.calculator.check_permission(permission)
    }

    pub fn calculator(&self) -> &PermissionCalculator {
        &self.calculator
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    generation: u64,
    options: QueryOptions,
}

/// Counters for one manager.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

/// Point-in-time copy of [`CacheMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

impl CacheMetrics {
    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("nodeperm_cached_data_hits_total").increment(1);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("nodeperm_cached_data_misses_total").increment(1);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Per-holder cache of permission and meta data.
pub struct CachedDataManager {
    permission: Cache<CacheKey, Arc<PermissionData>>,
    meta: Cache<CacheKey, Arc<MetaData>>,
    generation: AtomicU64,
    metrics: CacheMetrics,
}

impl fmt::Debug for CachedDataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedDataManager")
            .field("generation", &self.generation())
            .field("permission_entries", &self.permission.entry_count())
            .field("meta_entries", &self.meta.entry_count())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}

impl CachedDataManager {
    pub fn new(config: &CachedDataConfig) -> Self {
        Self {
            permission: Cache::builder()
                .max_capacity(config.max_capacity)
                .time_to_idle(config.expire_after_access)
                .build(),
            meta: Cache::builder()
                .max_capacity(config.max_capacity)
                .time_to_idle(config.expire_after_access)
                .build(),
            generation: AtomicU64::new(0),
            metrics: CacheMetrics::default(),
        }
    }

    fn key(&self, options: &QueryOptions) -> CacheKey {
        CacheKey {
            generation: self.generation.load(Ordering::SeqCst),
            options: options.clone(),
        }
    }

    /// Returns cached permission data, computing it at most once per key.
    pub fn permission_data<F>(
        &self,
        options: &QueryOptions,
        compute: F,
    ) -> DomainResult<Arc<PermissionData>>
    where
        F: FnOnce() -> DomainResult<PermissionData>,
    {
        get_or_compute(&self.permission, &self.metrics, self.key(options), compute)
    }

    /// Returns cached meta data, computing it at most once per key.
    pub fn meta_data<F>(&self, options: &QueryOptions, compute: F) -> DomainResult<Arc<MetaData>>
    where
        F: FnOnce() -> DomainResult<MetaData>,
    {
        get_or_compute(&self.meta, &self.metrics, self.key(options), compute)
    }

    /// Drops every entry; subsequent lookups recompute. Idempotent.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.permission.invalidate_all();
        self.meta.invalidate_all();
        self.metrics.invalidations.fetch_add(1, Ordering::Relaxed);
        trace!(generation, "cached data invalidated");
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    /// Approximate number of live entries in both caches.
    pub fn entry_count(&self) -> u64 {
        self.permission.run_pending_tasks();
        self.meta.run_pending_tasks();
        self.permission.entry_count() + self.meta.entry_count()
    }
}

fn get_or_compute<V, F>(
    cache: &Cache<CacheKey, Arc<V>>,
    metrics: &CacheMetrics,
    key: CacheKey,
    compute: F,
) -> DomainResult<Arc<V>>
where
    V: Send + Sync + 'static,
    F: FnOnce() -> DomainResult<V>,
{
    if let Some(value) = cache.get(&key) {
        metrics.record_hit();
        return Ok(value);
    }
    metrics.record_miss();
    cache
        .try_get_with(key, || compute().map(Arc::new))
        .map_err(|err| (*err).clone())
}

/// Registers cached-data metrics descriptions.
pub fn register_cached_data_metrics() {
    metrics::describe_counter!(
        "nodeperm_cached_data_hits_total",
        "Total number of cached data lookups served from cache"
    );
    metrics::describe_counter!(
        "nodeperm_cached_data_misses_total",
        "Total number of cached data lookups that required computation"
    );
}
