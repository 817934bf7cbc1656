//! Shared device cache for the snmpboost poller.
//!
//! Devices are persisted through a [`KvBackend`] (in-process
//! [`memory::MemoryBackend`] or [`redis_kv::RedisBackend`]) using one of two
//! equivalent layouts: [`blob::BlobStore`] keeps one JSON document per device,
//! [`indexed::IndexedStore`] splits it into per-interval and per-service
//! records. Both implement [`DeviceStore`]. All mutation is
//! read-modify-write; the only atomic primitives are the lease helpers.

pub mod admin;
pub mod blob;
pub mod error;
pub mod indexed;
pub mod memory;
pub mod redis_kv;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use error::Result;
use snmpboost_common::device::Device;
use std::collections::BTreeSet;
use std::time::Duration;

/// Default record lifetime: one week.
pub const DEFAULT_TTL: Duration = Duration::from_secs(604_800);

/// Key prefix shared by every record this crate writes.
pub const KEY_PREFIX: &str = "snmpboost";

/// Minimal key-value surface the cache needs from a backend.
///
/// Implementations must be safe to share across tasks (`Send + Sync`)
/// because concurrent poll attempts for different devices hit the same
/// backend.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value`, replacing any previous value. `None` means no expiry.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomically stores `value` only if `key` is absent. Returns true on success.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Atomically deletes `key` only if it currently holds `value`.
    async fn delete_if_equals(&self, key: &str, value: &str) -> Result<bool>;

    /// Adds `member` to the set at `key` and refreshes the set's expiry.
    async fn add_member(&self, key: &str, member: &str, ttl: Option<Duration>) -> Result<()>;

    async fn remove_member(&self, key: &str, member: &str) -> Result<()>;

    async fn members(&self, key: &str) -> Result<BTreeSet<String>>;

    /// Keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Exclusive right to poll one frequency group, held until released or
/// until its TTL lapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub token: String,
}

pub fn lease_key(host: &str, interval: u32) -> String {
    format!("{KEY_PREFIX}:lease:{host}:{interval}")
}

/// Device persistence used by the poller and by cache administration.
#[async_trait]
pub trait DeviceStore: Send + Sync {
    async fn get_device(&self, host: &str) -> Result<Option<Device>>;

    /// Writes the whole device, refreshing its expiry.
    async fn put_device(&self, device: &Device) -> Result<()>;

    /// Returns true if the device existed.
    async fn delete_device(&self, host: &str) -> Result<bool>;

    async fn list_hosts(&self) -> Result<Vec<String>>;

    /// Interval of the group holding `service_id` on `host`.
    async fn find_frequency(&self, host: &str, service_id: &str) -> Result<Option<u32>> {
        Ok(self
            .get_device(host)
            .await?
            .and_then(|device| device.find_frequency(service_id)))
    }

    /// Backend used for leases.
    fn backend(&self) -> &dyn KvBackend;

    /// Tries to take the poll lease of `(host, interval)`. `None` means
    /// another attempt holds it.
    async fn acquire_lease(&self, host: &str, interval: u32, ttl: Duration) -> Result<Option<Lease>> {
        let key = lease_key(host, interval);
        let token = snmpboost_common::id::next_id();
        if self.backend().set_if_absent(&key, &token, ttl).await? {
            tracing::debug!(host, interval, token = %token, "Lease acquired");
            Ok(Some(Lease { key, token }))
        } else {
            Ok(None)
        }
    }

    /// Releases a lease if it is still ours. Returns false when it had
    /// already expired or been taken over.
    async fn release_lease(&self, lease: &Lease) -> Result<bool> {
        let released = self.backend().delete_if_equals(&lease.key, &lease.token).await?;
        if !released {
            tracing::warn!(key = %lease.key, "Lease expired before release");
        }
        Ok(released)
    }
}
