//! Operator cache management: search, delete, clear mappings, force polls.

use crate::error::Result;
use crate::DeviceStore;
use serde::Serialize;
use snmpboost_common::device::Instance;
use snmpboost_common::oid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub host: String,
    pub interval: u32,
    pub service_id: String,
    pub service_name: String,
    pub instance: Instance,
    pub checking: bool,
}

fn matches(pattern: Option<&str>, value: &str) -> bool {
    match pattern {
        None | Some("*") | Some("") => true,
        Some(p) => glob_match::glob_match(p, value),
    }
}

pub struct CacheAdmin<'a> {
    store: &'a dyn DeviceStore,
}

impl<'a> CacheAdmin<'a> {
    pub fn new(store: &'a dyn DeviceStore) -> Self {
        Self { store }
    }

    pub async fn list_hosts(&self) -> Result<Vec<String>> {
        self.store.list_hosts().await
    }

    /// Services whose host and id/name match the given glob patterns.
    pub async fn search(&self, host_pattern: Option<&str>, service_pattern: Option<&str>) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for host in self.store.list_hosts().await? {
            if !matches(host_pattern, &host) {
                continue;
            }
            let Some(device) = self.store.get_device(&host).await? else {
                continue;
            };
            for (interval, group) in &device.frequencies {
                for (service_id, service) in &group.services {
                    if matches(service_pattern, service_id) || matches(service_pattern, &service.name) {
                        hits.push(SearchHit {
                            host: host.clone(),
                            interval: *interval,
                            service_id: service_id.clone(),
                            service_name: service.name.clone(),
                            instance: service.instance.clone(),
                            checking: group.checking,
                        });
                    }
                }
            }
        }
        Ok(hits)
    }

    pub async fn delete_host(&self, host: &str) -> Result<bool> {
        let deleted = self.store.delete_device(host).await?;
        tracing::info!(host, deleted, "Device removed from cache");
        Ok(deleted)
    }

    pub async fn delete_service(&self, host: &str, service_id: &str) -> Result<bool> {
        let Some(mut device) = self.store.get_device(host).await? else {
            return Ok(false);
        };
        if !device.remove_service(service_id) {
            return Ok(false);
        }
        self.store.put_device(&device).await?;
        tracing::info!(host, service = service_id, "Service removed from cache");
        Ok(true)
    }

    /// Puts matching mapped services back to pending so the next poll walks
    /// the mapping table again. Services with a static index are left alone,
    /// and only the labels of the reset services leave the device's label
    /// table. Returns the number of services reset.
    pub async fn clear_mapping(&self, host: &str, service_pattern: Option<&str>) -> Result<usize> {
        let Some(mut device) = self.store.get_device(host).await? else {
            return Ok(0);
        };
        let mut labels = Vec::new();
        for group in device.frequencies.values_mut() {
            for (service_id, service) in group.services.iter_mut() {
                let declared = service.key.instance.as_deref().unwrap_or_default();
                if !oid::contains_map_expr(declared) || !matches(service_pattern, service_id) {
                    continue;
                }
                service.reset_mapping();
                if let Instance::Pending { name, .. } = &service.instance {
                    labels.push(name.clone());
                }
            }
        }
        let cleared = labels.len();
        if cleared > 0 {
            for label in &labels {
                device.instances.remove(label);
                device.instances.remove(&oid::clean_label(label));
            }
            self.store.put_device(&device).await?;
        }
        tracing::info!(host, cleared, "Instance mappings cleared");
        Ok(cleared)
    }

    /// Flags groups so the next elected check polls regardless of cache age.
    pub async fn force(&self, host: &str, interval: Option<u32>) -> Result<usize> {
        let Some(mut device) = self.store.get_device(host).await? else {
            return Ok(0);
        };
        let mut flagged = 0;
        for (i, group) in device.frequencies.iter_mut() {
            if interval.is_none_or(|wanted| wanted == *i) {
                group.forced = true;
                flagged += 1;
            }
        }
        if flagged > 0 {
            self.store.put_device(&device).await?;
        }
        Ok(flagged)
    }
}
