use chrono::{DateTime, Utc};
use serde::Deserialize;
use snmpboost_common::datasource::Datasource;
use snmpboost_common::types::SnmpVersion;
use snmpboost_poller::check::CheckInvocation;
use snmpboost_poller::validity::CacheSettings;
use snmpboost_poller::walk::PollSettings;
use snmpboost_scheduler::SpreadMode;
use snmpboost_storage::blob::BlobStore;
use snmpboost_storage::indexed::IndexedStore;
use snmpboost_storage::memory::MemoryBackend;
use snmpboost_storage::redis_kv::RedisBackend;
use snmpboost_storage::DeviceStore;
use std::sync::Arc;
use std::time::Duration;

use crate::runner::ScheduledCheck;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreLayout {
    /// One JSON document per device.
    #[default]
    Blob,
    /// Per-interval and per-service records.
    Indexed,
}

#[derive(Debug, Deserialize)]
pub struct AgentConfig {
    /// Redis URL of the shared cache. Without it the cache lives in memory
    /// and is private to this process.
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub layout: StoreLayout,
    /// Cache record lifetime.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_tick")]
    pub tick_secs: u64,
    /// Checks run at the same time within one tick.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// SNMP requests in flight across all checks.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    /// Seconds per interval unit.
    #[serde(default = "default_interval_length")]
    pub interval_length: u32,
    #[serde(default)]
    pub spread: SpreadMode,
    #[serde(default = "default_id_part")]
    pub machine_id: i32,
    #[serde(default = "default_id_part")]
    pub node_id: i32,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub datasource: Datasource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub use_bulk: bool,
    #[serde(default = "default_max_repetitions")]
    pub max_repetitions: u32,
    #[serde(default = "default_max_oids")]
    pub max_oids_per_request: usize,
    #[serde(default = "default_max_continuations")]
    pub max_continuations: u32,
    #[serde(default)]
    pub show_from_cache: bool,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            use_bulk: true,
            max_repetitions: default_max_repetitions(),
            max_oids_per_request: default_max_oids(),
            max_continuations: default_max_continuations(),
            show_from_cache: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default)]
    pub version: SnmpVersion,
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service description, unique per device.
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub mapping: Option<String>,
    #[serde(default)]
    pub triggergroup: Option<String>,
    #[serde(default = "default_check_interval")]
    pub check_interval: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval: u32,
    #[serde(default = "default_max_check_attempts")]
    pub max_check_attempts: u32,
    #[serde(default)]
    pub use_bulk: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_repetitions: Option<u32>,
}

fn default_cache_ttl() -> u64 {
    604_800
}

fn default_tick() -> u64 {
    1
}

fn default_max_concurrent() -> usize {
    32
}

fn default_max_in_flight() -> usize {
    64
}

fn default_interval_length() -> u32 {
    60
}

fn default_id_part() -> i32 {
    1
}

fn default_timeout() -> u64 {
    10
}

fn default_true() -> bool {
    true
}

fn default_max_repetitions() -> u32 {
    64
}

fn default_max_oids() -> usize {
    99
}

fn default_max_continuations() -> u32 {
    5
}

fn default_port() -> u16 {
    161
}

fn default_community() -> String {
    "public".to_string()
}

fn default_check_interval() -> u32 {
    5
}

fn default_retry_interval() -> u32 {
    1
}

fn default_max_check_attempts() -> u32 {
    3
}

impl AgentConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            timeout: Duration::from_secs(self.poll.timeout_secs.max(1)),
            use_bulk: self.poll.use_bulk,
            max_repetitions: self.poll.max_repetitions.max(1),
            max_oids_per_request: self.poll.max_oids_per_request.max(1),
            max_continuations: self.poll.max_continuations,
            show_from_cache: self.poll.show_from_cache,
            cache: CacheSettings {
                interval_length: self.interval_length,
                ..CacheSettings::default()
            },
        }
    }

    /// One scheduled check per configured service, all due at `now`.
    pub fn scheduled_checks(&self, now: DateTime<Utc>) -> Vec<ScheduledCheck> {
        let mut checks = Vec::new();
        for device in &self.devices {
            for service in &device.services {
                let invocation = CheckInvocation {
                    host: device.host.clone(),
                    address: device.address.clone(),
                    port: device.port,
                    community: device.community.clone(),
                    version: device.version,
                    service: service.name.clone(),
                    template: service.template.clone(),
                    instance: service.instance.clone(),
                    instance_name: service.instance_name.clone(),
                    mapping: service.mapping.clone(),
                    triggergroup: service.triggergroup.clone(),
                    live: false,
                    use_bulk: service.use_bulk,
                    timeout_secs: service.timeout_secs,
                    max_repetitions: service.max_repetitions,
                    show_from_cache: None,
                };
                checks.push(ScheduledCheck::new(
                    invocation,
                    service.check_interval.max(1),
                    service.retry_interval.max(1),
                    service.max_check_attempts.max(1),
                    now,
                ));
            }
        }
        checks
    }
}

/// Opens the device cache described by `config`.
pub async fn open_store(config: &AgentConfig) -> anyhow::Result<Arc<dyn DeviceStore>> {
    let ttl = Duration::from_secs(config.cache_ttl_secs.max(1));
    let store: Arc<dyn DeviceStore> = match (&config.redis_url, config.layout) {
        (Some(url), StoreLayout::Blob) => {
            let backend = Arc::new(RedisBackend::connect(url).await?);
            Arc::new(BlobStore::new(backend).with_ttl(ttl))
        }
        (Some(url), StoreLayout::Indexed) => {
            let backend = Arc::new(RedisBackend::connect(url).await?);
            Arc::new(IndexedStore::new(backend).with_ttl(ttl))
        }
        (None, StoreLayout::Blob) => Arc::new(BlobStore::new(Arc::new(MemoryBackend::new())).with_ttl(ttl)),
        (None, StoreLayout::Indexed) => {
            Arc::new(IndexedStore::new(Arc::new(MemoryBackend::new())).with_ttl(ttl))
        }
    };
    tracing::info!(
        backend = if config.redis_url.is_some() { "redis" } else { "memory" },
        layout = ?config.layout,
        "Device cache opened"
    );
    Ok(store)
}
