//! Check invocations: register a service into the cache, then answer checks
//! either from the cache or through a poll attempt.

use crate::error::{PollError, Result};
use crate::output::{render_service, FROM_CACHE};
use crate::transport::SnmpTransport;
use crate::validity::{decide, Validity};
use crate::walk::{AttemptOutcome, PollSettings, ProtocolEngine};
use chrono::Utc;
use serde::Deserialize;
use snmpboost_common::datasource::Datasource;
use snmpboost_common::device::{Device, ServiceKey};
use snmpboost_common::oid;
use snmpboost_common::types::{CheckResult, SnmpVersion};
use snmpboost_storage::DeviceStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Arguments of one check, as the host daemon passes them.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CheckInvocation {
    pub host: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_community")]
    pub community: String,
    #[serde(default)]
    pub version: SnmpVersion,
    /// Service description in the host daemon.
    pub service: String,
    pub template: String,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub instance_name: Option<String>,
    /// Mapping table for a bare instance label.
    #[serde(default)]
    pub mapping: Option<String>,
    #[serde(default)]
    pub triggergroup: Option<String>,
    /// Whether this check won the election and may poll.
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub use_bulk: Option<bool>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_repetitions: Option<u32>,
    #[serde(default)]
    pub show_from_cache: Option<bool>,
}

fn default_port() -> u16 {
    161
}

fn default_community() -> String {
    "public".to_string()
}

impl CheckInvocation {
    /// Cache identity of the service. A bare label with a mapping table is
    /// turned into `map(<table>,<label>)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use snmpboost_poller::check::CheckInvocation;
    ///
    /// let inv: CheckInvocation = serde_json::from_str(r#"{
    ///     "host": "router-1", "address": "10.0.0.1", "service": "if-eth0",
    ///     "template": "interface", "instance": "eth0", "mapping": "ifTable"
    /// }"#).unwrap();
    /// assert_eq!(inv.service_key().id(), "interface:map(ifTable,eth0):");
    /// ```
    pub fn service_key(&self) -> ServiceKey {
        let instance = self.instance.as_deref().filter(|i| !i.is_empty());
        let mapped = match (instance, self.mapping.as_deref().filter(|m| !m.is_empty())) {
            (Some(label), Some(table)) if !oid::contains_map_expr(label) && !oid::is_numeric(&format!(".{label}")) => {
                Some(format!("map({table},{label})"))
            }
            _ => instance.map(str::to_string),
        };
        ServiceKey::new(
            &self.template,
            mapped.as_deref(),
            self.instance_name.as_deref().filter(|n| !n.is_empty()),
        )
    }

    /// Poll settings with this invocation's overrides applied.
    pub fn settings(&self, defaults: &PollSettings) -> PollSettings {
        let mut settings = defaults.clone();
        if let Some(use_bulk) = self.use_bulk {
            settings.use_bulk = use_bulk;
        }
        if let Some(secs) = self.timeout_secs.filter(|s| *s > 0) {
            settings.timeout = Duration::from_secs(secs);
        }
        if let Some(max_repetitions) = self.max_repetitions.filter(|m| *m > 0) {
            settings.max_repetitions = max_repetitions;
        }
        if let Some(show) = self.show_from_cache {
            settings.show_from_cache = show;
        }
        settings
    }
}

pub struct Poller {
    store: Arc<dyn DeviceStore>,
    transport: Arc<dyn SnmpTransport>,
    datasource: Arc<Datasource>,
    settings: PollSettings,
}

impl Poller {
    pub fn new(
        store: Arc<dyn DeviceStore>,
        transport: Arc<dyn SnmpTransport>,
        datasource: Arc<Datasource>,
        settings: PollSettings,
    ) -> Self {
        Self {
            store,
            transport,
            datasource,
            settings,
        }
    }

    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }

    /// Inserts or refreshes the service of `invocation` in group `interval`,
    /// creating the device on first sight. Cached mapping and samples of an
    /// existing service are kept.
    pub async fn register(&self, invocation: &CheckInvocation, interval: u32) -> Result<()> {
        let service = self
            .datasource
            .build_service(
                invocation.service_key(),
                &invocation.service,
                invocation.triggergroup.as_deref(),
            )
            .map_err(|e| PollError::Configuration(e.to_string()))?;
        snmpboost_trigger::expr::validate(&service.triggers)
            .map_err(|e| PollError::Configuration(e.to_string()))?;

        let mut device = self
            .store
            .get_device(&invocation.host)
            .await?
            .unwrap_or_else(|| Device::new(&invocation.host, &invocation.address, &invocation.community));
        device.address = invocation.address.clone();
        device.port = invocation.port;
        device.community = invocation.community.clone();
        device.version = invocation.version;
        device.update_service(interval, service);
        device.frequencies.retain(|_, g| !g.services.is_empty());
        self.store.put_device(&device).await?;
        tracing::debug!(host = %invocation.host, service = %invocation.service, interval, "Service registered");
        Ok(())
    }

    /// Runs one check. Only store connectivity failures come back as `Err`;
    /// every other problem is an UNKNOWN result.
    pub async fn check(&self, invocation: &CheckInvocation) -> Result<CheckResult> {
        let started = Instant::now();
        let mut result = match self.check_inner(invocation).await {
            Ok(result) => result,
            Err(e) if e.is_fatal() => {
                tracing::error!(host = %invocation.host, error = %e, "Device cache unreachable");
                return Err(e);
            }
            Err(e) => CheckResult::new(e.exit_code(), e.to_string()),
        };
        result.execution_time = started.elapsed().as_secs_f64();
        Ok(result)
    }

    async fn check_inner(&self, invocation: &CheckInvocation) -> Result<CheckResult> {
        let host = &invocation.host;
        let service_id = invocation.service_key().id();
        let Some(device) = self.store.get_device(host).await? else {
            return Ok(CheckResult::unknown(format!("Host {host} not found in cache")));
        };
        let Some(interval) = device.find_frequency(&service_id) else {
            return Ok(CheckResult::unknown(format!("Service {service_id} not found in cache")));
        };
        let Some(group) = device.group(interval) else {
            return Ok(CheckResult::unknown(format!("Service {service_id} not found in cache")));
        };

        if !invocation.live {
            return Ok(render_service(host, group, &service_id));
        }

        let settings = invocation.settings(&self.settings);
        let validity = decide(group, Utc::now(), &settings.cache);
        tracing::debug!(host = %host, interval, ?validity, "Cache validity");
        if let Validity::Fresh(_) = validity {
            return Ok(cached(host, &device, interval, &service_id, &settings));
        }

        let engine = ProtocolEngine::new(
            self.store.as_ref(),
            self.transport.as_ref(),
            &self.datasource,
            &settings,
        );
        match engine.run(device.clone(), interval).await? {
            AttemptOutcome::Polled(polled) => match polled.group(interval) {
                Some(group) => Ok(render_service(host, group, &service_id)),
                None => Ok(CheckResult::unknown(format!("Service {service_id} not found in cache"))),
            },
            AttemptOutcome::Busy => Ok(cached(host, &device, interval, &service_id, &settings)),
        }
    }
}

fn cached(host: &str, device: &Device, interval: u32, service_id: &str, settings: &PollSettings) -> CheckResult {
    let Some(group) = device.group(interval) else {
        return CheckResult::unknown(format!("Service {service_id} not found in cache"));
    };
    let mut result = render_service(host, group, service_id);
    if settings.show_from_cache {
        result.output = format!("{FROM_CACHE}{}", result.output);
    }
    result
}
