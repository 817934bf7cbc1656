use crate::error::{Result, StoreError};
use crate::{DeviceStore, KvBackend, DEFAULT_TTL, KEY_PREFIX};
use async_trait::async_trait;
use snmpboost_common::device::Device;
use std::sync::Arc;
use std::time::Duration;

/// One JSON document per device.
pub struct BlobStore<B: KvBackend> {
    backend: Arc<B>,
    ttl: Duration,
}

impl<B: KvBackend> BlobStore<B> {
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

    fn device_key(host: &str) -> String {
        format!("{KEY_PREFIX}:device:{host}")
    }
}

#[async_trait]
impl<B: KvBackend + 'static> DeviceStore for BlobStore<B> {
    async fn get_device(&self, host: &str) -> Result<Option<Device>> {
        let key = Self::device_key(host);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        let device = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
            key,
            reason: e.to_string(),
        })?;
        Ok(Some(device))
    }

    async fn put_device(&self, device: &Device) -> Result<()> {
        let raw = serde_json::to_string(device)?;
        self.backend
            .set(&Self::device_key(&device.host), &raw, Some(self.ttl))
            .await
    }

    async fn delete_device(&self, host: &str) -> Result<bool> {
        self.backend.delete(&Self::device_key(host)).await
    }

    async fn list_hosts(&self) -> Result<Vec<String>> {
        let prefix = Self::device_key("");
        Ok(self
            .backend
            .keys(&prefix)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    fn backend(&self) -> &dyn KvBackend {
        self.backend.as_ref()
    }
}
