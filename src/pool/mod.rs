//! Connection pool health metrics.
//!
//! One entry per server address, every counter an atomic. Pool workers on
//! the hot path (acquire/release) touch nothing but their entry's atomics;
//! there is no registry-wide lock to contend on. A snapshot is a best-effort
//! point-in-time read: individual counters are exact, but two counters read
//! moments apart may be momentarily inconsistent. Fine for observability,
//! not for correctness-critical logic.
//!
//! The registry is owned by its pool instance and lives exactly as long as
//! the pool; entries for addresses pruned from cluster membership are
//! retained and stay queryable until then.

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

use crate::error::{DriverError, DriverResult};

/// A server endpoint the pool connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ServerAddress {
    host: String,
    port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Counters for one address. Gauges are signed so concurrent increments and
/// decrements always net out exactly; they stay non-negative under correct
/// pool usage.
#[derive(Default)]
struct MetricsEntry {
    in_use: AtomicI64,
    idle: AtomicI64,
    created_total: AtomicU64,
    closed_total: AtomicU64,
    failed_to_create_total: AtomicU64,
    acquisition_timeouts: AtomicU64,
}

/// Point-in-time snapshot of one address's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub in_use: i64,
    pub idle: i64,
    pub created_total: u64,
    pub closed_total: u64,
    pub failed_to_create_total: u64,
    pub acquisition_timeouts: u64,
}

/// Per-address connection pool metrics registry.
///
/// Safe to update from any number of pool worker threads concurrently while
/// being read by metrics consumers.
#[derive(Default)]
pub struct PoolMetrics {
    entries: DashMap<ServerAddress, Arc<MetricsEntry>>,
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A connection to `address` was created; it enters the pool idle.
    /// First call for an address starts tracking it.
    pub fn record_create(&self, address: &ServerAddress) {
        let entry = self.entry(address);
        entry.created_total.fetch_add(1, Ordering::Relaxed);
        entry.idle.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection attempt to `address` failed. Also starts tracking the
    /// address: metrics exist from the first attempt, successful or not.
    pub fn record_create_failure(&self, address: &ServerAddress) {
        self.entry(address)
            .failed_to_create_total
            .fetch_add(1, Ordering::Relaxed);
    }

    /// An idle connection was closed cleanly.
    pub fn record_close_success(&self, address: &ServerAddress) {
        let entry = self.entry(address);
        entry.closed_total.fetch_add(1, Ordering::Relaxed);
        entry.idle.fetch_sub(1, Ordering::Relaxed);
    }

    /// An idle connection was closed with an error. The connection is gone
    /// either way, so it counts towards `closed_total` as well.
    pub fn record_close_failure(&self, address: &ServerAddress) {
        let entry = self.entry(address);
        entry.closed_total.fetch_add(1, Ordering::Relaxed);
        entry.idle.fetch_sub(1, Ordering::Relaxed);
    }

    /// A pooled connection was handed to a caller.
    pub fn record_acquire(&self, address: &ServerAddress) {
        let entry = self.entry(address);
        entry.idle.fetch_sub(1, Ordering::Relaxed);
        entry.in_use.fetch_add(1, Ordering::Relaxed);
    }

    /// A caller returned its connection to the pool.
    pub fn record_release(&self, address: &ServerAddress) {
        let entry = self.entry(address);
        entry.in_use.fetch_sub(1, Ordering::Relaxed);
        entry.idle.fetch_add(1, Ordering::Relaxed);
    }

    /// Acquiring a connection timed out before one became available.
    pub fn record_acquisition_timeout(&self, address: &ServerAddress) {
        self.entry(address)
            .acquisition_timeouts
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshots the counters for `address`.
    ///
    /// Fails with [`DriverError::AddressNotTracked`] when no connection
    /// attempt was ever recorded against the address; an unknown address is
    /// a lookup failure, never a row of zeros.
    pub fn query(&self, address: &ServerAddress) -> DriverResult<PoolStatus> {
        let entry = self
            .entries
            .get(address)
            .ok_or_else(|| DriverError::AddressNotTracked(address.clone()))?;

        Ok(PoolStatus {
            in_use: entry.in_use.load(Ordering::Relaxed),
            idle: entry.idle.load(Ordering::Relaxed),
            created_total: entry.created_total.load(Ordering::Relaxed),
            closed_total: entry.closed_total.load(Ordering::Relaxed),
            failed_to_create_total: entry.failed_to_create_total.load(Ordering::Relaxed),
            acquisition_timeouts: entry.acquisition_timeouts.load(Ordering::Relaxed),
        })
    }

    /// Every address with recorded metrics.
    pub fn addresses(&self) -> Vec<ServerAddress> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    fn entry(&self, address: &ServerAddress) -> Arc<MetricsEntry> {
        if let Some(entry) = self.entries.get(address) {
            return Arc::clone(&entry);
        }
        Arc::clone(&self.entries.entry(address.clone()).or_default())
    }
}
