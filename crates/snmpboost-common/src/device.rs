//! The cached device tree: `Device` → `FrequencyGroup` → `Service` → `Metric`.

use crate::oid;
use crate::rpn::{self, Token};
use crate::types::{Bound, DsType, MetricValue, SnmpVersion};
use crate::value::{compute_value, Sample, ValueError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Stable identity of a service inside a device: template plus the instance
/// as declared (still `map(...)` when mapping is needed) plus instance name.
///
/// # Examples
///
/// ```
/// use snmpboost_common::device::ServiceKey;
///
/// let key = ServiceKey::new("standard-interface", Some("map(ifTable,eth0)"), Some("eth0"));
/// assert_eq!(key.id(), "standard-interface:map(ifTable,eth0):eth0");
/// assert_eq!(ServiceKey::new("system", None, None).id(), "system::");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub template: String,
    pub instance: Option<String>,
    pub instance_name: Option<String>,
}

impl ServiceKey {
    pub fn new(template: &str, instance: Option<&str>, instance_name: Option<&str>) -> Self {
        Self {
            template: template.to_string(),
            instance: instance.map(str::to_string),
            instance_name: instance_name.map(str::to_string),
        }
    }

    /// String form used as map key in the cache.
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.template,
            self.instance.as_deref().unwrap_or(""),
            self.instance_name.as_deref().unwrap_or("")
        )
    }
}

impl std::fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id())
    }
}

/// Mapping state of a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Instance {
    /// The service is not table-indexed, or its index is static.
    #[default]
    Unmapped,
    Pending { table: String, name: String },
    Resolved(String),
    /// Terminal: the mapping table had no matching label.
    NotFound,
}

impl Instance {
    /// Instance state for a declared instance string.
    pub fn from_declared(instance: Option<&str>) -> Self {
        match instance {
            None => Instance::Unmapped,
            Some(s) => match oid::parse_map_expr(s) {
                Some(expr) => Instance::Pending {
                    table: expr.table,
                    name: expr.name,
                },
                None if s.is_empty() => Instance::Unmapped,
                None => Instance::Resolved(s.to_string()),
            },
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Instance::Pending { .. })
    }

    pub fn resolved(&self) -> Option<&str> {
        match self {
            Instance::Resolved(index) => Some(index),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Trigger {
    #[serde(default)]
    pub critical: Option<Vec<String>>,
    #[serde(default)]
    pub warning: Option<Vec<String>>,
    #[serde(default)]
    pub default_status: crate::types::ExitCode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    /// OID as declared, possibly with an unresolved `map(...)`.
    pub oid_template: String,
    /// OID after mapping; equals `oid_template` until resolved.
    pub oid: String,
    pub ds_type: DsType,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub calc: Vec<String>,
    #[serde(default)]
    pub min: Bound,
    #[serde(default)]
    pub max: Bound,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub raw_value: Option<String>,
    pub raw_old_value: Option<String>,
    pub value: Option<MetricValue>,
    pub old_value: Option<MetricValue>,
}

impl Metric {
    pub fn new(name: &str, oid_template: &str, ds_type: DsType) -> Self {
        let oid_template = if oid::contains_map_expr(oid_template) {
            oid_template.trim().to_string()
        } else {
            oid::normalize(oid_template)
        };
        Self {
            name: name.to_string(),
            oid: oid_template.clone(),
            oid_template,
            ds_type,
            unit: String::new(),
            calc: Vec::new(),
            min: Bound::None,
            max: Bound::None,
            min_value: None,
            max_value: None,
            raw_value: None,
            raw_old_value: None,
            value: None,
            old_value: None,
        }
    }

    /// Moves the current sample into the previous slot.
    pub fn snapshot(&mut self) {
        self.raw_old_value = self.raw_value.clone();
        self.old_value = self.value.clone();
    }

    /// Literal bounds are resolved at build time; OID bounds by polling.
    pub fn apply_literal_bounds(&mut self) {
        if let Bound::Literal(v) = self.min {
            self.min_value = Some(v);
        }
        if let Bound::Literal(v) = self.max {
            self.max_value = Some(v);
        }
    }

    /// Computes the current value from the raw samples and group timestamps.
    pub fn compute(
        &self,
        check_time: Option<DateTime<Utc>>,
        old_check_time: Option<DateTime<Utc>>,
    ) -> Result<MetricValue, ValueError> {
        let calc: Vec<Token> = rpn::parse_program(&self.calc)?;
        compute_value(&Sample {
            ds_type: self.ds_type,
            raw: self.raw_value.as_deref(),
            raw_previous: self.raw_old_value.as_deref(),
            check_time,
            check_time_previous: old_check_time,
            calc: &calc,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub key: ServiceKey,
    /// Service description in the host daemon.
    #[serde(default)]
    pub name: String,
    pub instance: Instance,
    #[serde(default)]
    pub trigger_group: Option<String>,
    #[serde(default)]
    pub triggers: BTreeMap<String, Trigger>,
    pub metrics: BTreeMap<String, Metric>,
}

impl Service {
    pub fn new(key: ServiceKey, name: &str) -> Self {
        let instance = Instance::from_declared(key.instance.as_deref());
        Self {
            key,
            name: name.to_string(),
            instance,
            trigger_group: None,
            triggers: BTreeMap::new(),
            metrics: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> String {
        self.key.id()
    }

    /// Name used as output prefix: instance name, else instance, else template.
    pub fn display_name(&self) -> &str {
        if let Some(name) = self.key.instance_name.as_deref().filter(|n| !n.is_empty()) {
            return name;
        }
        match &self.instance {
            Instance::Resolved(index) => index,
            _ => self
                .key
                .instance
                .as_deref()
                .filter(|i| !i.is_empty())
                .unwrap_or(&self.key.template),
        }
    }

    /// Whether the service takes part in polling (not pending, not NOTFOUND).
    pub fn is_active(&self) -> bool {
        matches!(self.instance, Instance::Unmapped | Instance::Resolved(_))
    }

    /// Substitutes the resolved instance into an OID template.
    pub fn effective_oid(&self, template: &str) -> String {
        service_oid(&self.instance, template)
    }

    /// Resolves a pending instance to `index`. Services that are not pending
    /// are left untouched so re-delivery of mapping results is harmless.
    pub fn resolve(&mut self, index: &str) -> bool {
        if !self.instance.is_pending() {
            return false;
        }
        self.instance = Instance::Resolved(index.to_string());
        for metric in self.metrics.values_mut() {
            metric.oid = oid::normalize(&oid::substitute_map(&metric.oid_template, index));
        }
        true
    }

    pub fn mark_not_found(&mut self) {
        if self.instance.is_pending() {
            self.instance = Instance::NotFound;
        }
    }

    /// Puts the service back into its declared mapping state, dropping
    /// resolved OIDs, bounds and samples.
    pub fn reset_mapping(&mut self) {
        self.instance = Instance::from_declared(self.key.instance.as_deref());
        for metric in self.metrics.values_mut() {
            metric.oid = metric.oid_template.clone();
            metric.min_value = None;
            metric.max_value = None;
            metric.raw_value = None;
            metric.raw_old_value = None;
            metric.value = None;
            metric.old_value = None;
            metric.apply_literal_bounds();
        }
    }

    /// Keeps mapping, bounds and samples from a previously cached version of
    /// the same service when configuration is refreshed.
    pub fn carry_runtime_state(&mut self, previous: &Service) {
        if self.key != previous.key {
            return;
        }
        if matches!(previous.instance, Instance::Resolved(_) | Instance::NotFound) {
            self.instance = previous.instance.clone();
        }
        for (name, metric) in self.metrics.iter_mut() {
            let Some(old) = previous.metrics.get(name) else {
                continue;
            };
            if old.oid_template != metric.oid_template {
                continue;
            }
            metric.oid = self
                .instance
                .resolved()
                .map(|index| oid::normalize(&oid::substitute_map(&metric.oid_template, index)))
                .unwrap_or_else(|| metric.oid.clone());
            metric.raw_value = old.raw_value.clone();
            metric.raw_old_value = old.raw_old_value.clone();
            metric.value = old.value.clone();
            metric.old_value = old.old_value.clone();
            if metric.min == old.min {
                metric.min_value = old.min_value.or(metric.min_value);
            }
            if metric.max == old.max {
                metric.max_value = old.max_value.or(metric.max_value);
            }
        }
    }

    /// Bound OIDs still waiting for a value, with the resolved instance applied.
    pub fn limit_oids(&self) -> Vec<String> {
        let mut oids = Vec::new();
        for metric in self.metrics.values() {
            if let (Some(template), None) = (metric.min.oid(), metric.min_value) {
                oids.push(oid::normalize(&self.effective_oid(template)));
            }
            if let (Some(template), None) = (metric.max.oid(), metric.max_value) {
                oids.push(oid::normalize(&self.effective_oid(template)));
            }
        }
        oids.retain(|o| oid::is_numeric(o));
        oids
    }

    pub fn data_oids(&self) -> Vec<String> {
        self.metrics
            .values()
            .map(|m| m.oid.clone())
            .filter(|o| oid::is_numeric(o))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyGroup {
    /// Polling interval in interval-length units (minutes by default).
    pub interval: u32,
    pub check_time: Option<DateTime<Utc>>,
    pub old_check_time: Option<DateTime<Utc>>,
    /// Advisory in-flight flag.
    #[serde(default)]
    pub checking: bool,
    #[serde(default)]
    pub forced: bool,
    pub services: BTreeMap<String, Service>,
}

impl FrequencyGroup {
    pub fn new(interval: u32) -> Self {
        Self {
            interval,
            check_time: None,
            old_check_time: None,
            checking: false,
            forced: false,
            services: BTreeMap::new(),
        }
    }

    pub fn has_pending_mapping(&self) -> bool {
        self.services.values().any(|s| s.instance.is_pending())
    }

    /// Moves current samples to previous for every metric of the group.
    pub fn snapshot(&mut self) {
        for service in self.services.values_mut() {
            for metric in service.metrics.values_mut() {
                metric.snapshot();
            }
        }
    }

    /// Data OIDs of all active services, sorted and deduplicated.
    pub fn data_oids(&self) -> Vec<String> {
        let mut oids: Vec<String> = self
            .services
            .values()
            .filter(|s| s.is_active())
            .flat_map(|s| s.data_oids())
            .collect();
        oid::sort_dedup(&mut oids);
        oids
    }

    /// Unresolved bound OIDs of all active services, sorted and deduplicated.
    pub fn limit_oids(&self) -> Vec<String> {
        let mut oids: Vec<String> = self
            .services
            .values()
            .filter(|s| s.is_active())
            .flat_map(|s| s.limit_oids())
            .collect();
        oid::sort_dedup(&mut oids);
        oids
    }

    /// Records a fetched bound value on every metric whose bound OID matches.
    pub fn set_limit(&mut self, limit_oid: &str, value: f64) {
        for service in self.services.values_mut() {
            let instance = &service.instance;
            let matches = |bound: &Bound| {
                bound
                    .oid()
                    .is_some_and(|t| oid::normalize(&service_oid(instance, t)) == limit_oid)
            };
            for metric in service.metrics.values_mut() {
                if matches(&metric.min) {
                    metric.min_value = Some(value);
                }
                if matches(&metric.max) {
                    metric.max_value = Some(value);
                }
            }
        }
    }

    /// Writes collected raw values into active metrics. Wanted OIDs that were
    /// not collected are cleared so they read as "no data".
    pub fn store_raw_values(&mut self, values: &BTreeMap<String, String>) {
        for service in self.services.values_mut().filter(|s| s.is_active()) {
            for metric in service.metrics.values_mut() {
                metric.raw_value = values.get(&metric.oid).cloned();
            }
        }
    }

    /// Recomputes `value` for every metric from the current samples.
    pub fn compute_values(&mut self) {
        let (check_time, old_check_time) = (self.check_time, self.old_check_time);
        for service in self.services.values_mut() {
            for metric in service.metrics.values_mut() {
                metric.value = metric.compute(check_time, old_check_time).ok();
            }
        }
    }
}

fn service_oid(instance: &Instance, template: &str) -> String {
    match instance {
        Instance::Resolved(index) => oid::substitute_map(template, index),
        _ => template.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub host: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub community: String,
    #[serde(default)]
    pub version: SnmpVersion,
    pub frequencies: BTreeMap<u32, FrequencyGroup>,
    /// Resolved mapping labels: label → instance index.
    #[serde(default)]
    pub instances: BTreeMap<String, String>,
}

fn default_port() -> u16 {
    161
}

impl Device {
    pub fn new(host: &str, address: &str, community: &str) -> Self {
        Self {
            host: host.to_string(),
            address: address.to_string(),
            port: default_port(),
            community: community.to_string(),
            version: SnmpVersion::default(),
            frequencies: BTreeMap::new(),
            instances: BTreeMap::new(),
        }
    }

    /// Interval of the group holding the service `service_id`, if any.
    pub fn find_frequency(&self, service_id: &str) -> Option<u32> {
        self.frequencies
            .iter()
            .find(|(_, group)| group.services.contains_key(service_id))
            .map(|(interval, _)| *interval)
    }

    pub fn group(&self, interval: u32) -> Option<&FrequencyGroup> {
        self.frequencies.get(&interval)
    }

    pub fn group_mut(&mut self, interval: u32) -> Option<&mut FrequencyGroup> {
        self.frequencies.get_mut(&interval)
    }

    /// Inserts or replaces a service in the group for `interval`, moving it
    /// out of any other group and keeping its cached runtime state.
    pub fn update_service(&mut self, interval: u32, mut service: Service) {
        let id = service.id();
        let mut previous = None;
        for group in self.frequencies.values_mut() {
            if let Some(old) = group.services.remove(&id) {
                previous = Some(old);
            }
        }
        if let Some(previous) = previous {
            service.carry_runtime_state(&previous);
        }
        self.frequencies
            .entry(interval)
            .or_insert_with(|| FrequencyGroup::new(interval))
            .services
            .insert(id, service);
    }

    /// Removes a service; empty groups are dropped. Returns true if found.
    pub fn remove_service(&mut self, service_id: &str) -> bool {
        let mut found = false;
        for group in self.frequencies.values_mut() {
            found |= group.services.remove(service_id).is_some();
        }
        self.frequencies.retain(|_, g| !g.services.is_empty());
        found
    }

    /// All service ids across groups.
    pub fn service_ids(&self) -> BTreeSet<String> {
        self.frequencies
            .values()
            .flat_map(|g| g.services.keys().cloned())
            .collect()
    }
}
