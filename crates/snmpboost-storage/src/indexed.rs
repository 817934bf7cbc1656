use crate::error::{Result, StoreError};
use crate::{DeviceStore, KvBackend, DEFAULT_TTL, KEY_PREFIX};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use snmpboost_common::device::{Device, FrequencyGroup, Service};
use snmpboost_common::types::SnmpVersion;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct DeviceHeader {
    host: String,
    address: String,
    port: u16,
    community: String,
    version: SnmpVersion,
    instances: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupHeader {
    interval: u32,
    check_time: Option<DateTime<Utc>>,
    old_check_time: Option<DateTime<Utc>>,
    checking: bool,
    forced: bool,
}

/// Per-host interval set plus one record per service, so that the interval
/// owning a service can be found without loading every service.
///
/// Layout:
/// - `snmpboost:hosts` set of hosts
/// - `snmpboost:host:<host>` device header
/// - `snmpboost:host:<host>:intervals` set of intervals
/// - `snmpboost:host:<host>:interval:<i>` group header
/// - `snmpboost:host:<host>:interval:<i>:services` set of service ids
/// - `snmpboost:host:<host>:service:<id>` service record
pub struct IndexedStore<B: KvBackend> {
    backend: Arc<B>,
    ttl: Duration,
}

impl<B: KvBackend> IndexedStore<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    fn hosts_key() -> String {
        format!("{KEY_PREFIX}:hosts")
    }

    fn host_key(host: &str) -> String {
        format!("{KEY_PREFIX}:host:{host}")
    }

    fn intervals_key(host: &str) -> String {
        format!("{KEY_PREFIX}:host:{host}:intervals")
    }

    fn group_key(host: &str, interval: u32) -> String {
        format!("{KEY_PREFIX}:host:{host}:interval:{interval}")
    }

    fn group_services_key(host: &str, interval: u32) -> String {
        format!("{KEY_PREFIX}:host:{host}:interval:{interval}:services")
    }

    fn service_key(host: &str, service_id: &str) -> String {
        format!("{KEY_PREFIX}:host:{host}:service:{service_id}")
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.backend.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw).map(Some).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    async fn write<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.backend.set(key, &raw, Some(self.ttl)).await
    }

    async fn intervals(&self, host: &str) -> Result<BTreeSet<u32>> {
        let key = Self::intervals_key(host);
        self.backend
            .members(&key)
            .await?
            .into_iter()
            .map(|m| {
                m.parse::<u32>().map_err(|_| StoreError::Corrupt {
                    key: key.clone(),
                    reason: format!("invalid interval '{m}'"),
                })
            })
            .collect()
    }

    async fn load_group(&self, host: &str, interval: u32) -> Result<FrequencyGroup> {
        let key = Self::group_key(host, interval);
        let header: GroupHeader = self
            .read(&key)
            .await?
            .ok_or_else(|| StoreError::Corrupt {
                key: key.clone(),
                reason: "interval listed but group header missing".into(),
            })?;

        let mut group = FrequencyGroup::new(header.interval);
        group.check_time = header.check_time;
        group.old_check_time = header.old_check_time;
        group.checking = header.checking;
        group.forced = header.forced;

        for service_id in self.backend.members(&Self::group_services_key(host, interval)).await? {
            match self.read::<Service>(&Self::service_key(host, &service_id)).await? {
                Some(service) => {
                    group.services.insert(service_id, service);
                }
                None => {
                    tracing::warn!(host, interval, service = %service_id, "Service record expired, skipping");
                }
            }
        }
        Ok(group)
    }

    async fn delete_group(&self, host: &str, interval: u32) -> Result<()> {
        let services_key = Self::group_services_key(host, interval);
        for service_id in self.backend.members(&services_key).await? {
            self.backend.delete(&Self::service_key(host, &service_id)).await?;
        }
        self.backend.delete(&services_key).await?;
        self.backend.delete(&Self::group_key(host, interval)).await?;
        self.backend
            .remove_member(&Self::intervals_key(host), &interval.to_string())
            .await
    }
}

#[async_trait]
impl<B: KvBackend + 'static> DeviceStore for IndexedStore<B> {
    async fn get_device(&self, host: &str) -> Result<Option<Device>> {
        let Some(header) = self.read::<DeviceHeader>(&Self::host_key(host)).await? else {
            return Ok(None);
        };
        let mut device = Device::new(&header.host, &header.address, &header.community);
        device.port = header.port;
        device.version = header.version;
        device.instances = header.instances;
        for interval in self.intervals(host).await? {
            let group = self.load_group(host, interval).await?;
            device.frequencies.insert(interval, group);
        }
        Ok(Some(device))
    }

    async fn put_device(&self, device: &Device) -> Result<()> {
        let host = device.host.as_str();
        let ttl = Some(self.ttl);

        for stale in self.intervals(host).await? {
            if !device.frequencies.contains_key(&stale) {
                self.delete_group(host, stale).await?;
            }
        }

        self.write(
            &Self::host_key(host),
            &DeviceHeader {
                host: device.host.clone(),
                address: device.address.clone(),
                port: device.port,
                community: device.community.clone(),
                version: device.version,
                instances: device.instances.clone(),
            },
        )
        .await?;
        self.backend.add_member(&Self::hosts_key(), host, None).await?;

        for (interval, group) in &device.frequencies {
            let services_key = Self::group_services_key(host, *interval);
            for old_id in self.backend.members(&services_key).await? {
                if !group.services.contains_key(&old_id) {
                    self.backend.remove_member(&services_key, &old_id).await?;
                    if device.find_frequency(&old_id).is_none() {
                        self.backend.delete(&Self::service_key(host, &old_id)).await?;
                    }
                }
            }

            self.write(
                &Self::group_key(host, *interval),
                &GroupHeader {
                    interval: group.interval,
                    check_time: group.check_time,
                    old_check_time: group.old_check_time,
                    checking: group.checking,
                    forced: group.forced,
                },
            )
            .await?;
            for (service_id, service) in &group.services {
                self.write(&Self::service_key(host, service_id), service).await?;
                self.backend.add_member(&services_key, service_id, ttl).await?;
            }
            self.backend
                .add_member(&Self::intervals_key(host), &interval.to_string(), ttl)
                .await?;
        }
        Ok(())
    }

    async fn delete_device(&self, host: &str) -> Result<bool> {
        for interval in self.intervals(host).await? {
            self.delete_group(host, interval).await?;
        }
        self.backend.remove_member(&Self::hosts_key(), host).await?;
        self.backend.delete(&Self::host_key(host)).await
    }

    async fn list_hosts(&self) -> Result<Vec<String>> {
        Ok(self.backend.members(&Self::hosts_key()).await?.into_iter().collect())
    }

    /// Scans the interval index without loading service records.
    async fn find_frequency(&self, host: &str, service_id: &str) -> Result<Option<u32>> {
        for interval in self.intervals(host).await? {
            let members = self
                .backend
                .members(&Self::group_services_key(host, interval))
                .await?;
            if members.contains(service_id) {
                return Ok(Some(interval));
            }
        }
        Ok(None)
    }

    fn backend(&self) -> &dyn KvBackend {
        self.backend.as_ref()
    }
}
