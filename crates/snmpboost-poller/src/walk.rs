//! One poll attempt of a frequency group: lease, mapping walk, data rounds
//! and write-back.
//!
//! Each wanted OID is asked for through its predecessor so that the agent's
//! GETNEXT/GETBULK successor is the wanted OID itself. A first round carries
//! at most `max_oids_per_request` probes; overflow waits in a backlog and is
//! sent by continuation rounds, which also retry OIDs that are still
//! missing. The whole attempt runs under one timeout.

use crate::error::{PollError, Result};
use crate::mapping::MappingResolver;
use crate::transport::{Reply, Request, RequestKind, SnmpTransport, Target};
use crate::validity::CacheSettings;
use chrono::{DateTime, Utc};
use snmpboost_common::datasource::Datasource;
use snmpboost_common::device::{Device, FrequencyGroup};
use snmpboost_common::id;
use snmpboost_common::oid;
use snmpboost_common::types::SnmpVersion;
use snmpboost_storage::DeviceStore;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Extra lease lifetime past the attempt timeout, covering the write-back.
const LEASE_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub use_bulk: bool,
    pub max_repetitions: u32,
    pub max_oids_per_request: usize,
    pub max_continuations: u32,
    pub show_from_cache: bool,
    pub cache: CacheSettings,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            use_bulk: true,
            max_repetitions: 64,
            max_oids_per_request: 99,
            max_continuations: 5,
            show_from_cache: false,
            cache: CacheSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Requesting,
    MappingContinuing,
    Continuing,
    Finished,
    TimedOut,
    Errored,
}

/// Per-attempt bookkeeping.
#[derive(Debug)]
pub struct WalkContext {
    pub host: String,
    pub interval: u32,
    pub request_id: i32,
    pub state: AttemptState,
    pub rounds: u32,
    pub continuations: u32,
    pub started_at: DateTime<Utc>,
    data_oids: BTreeSet<String>,
    limit_oids: BTreeSet<String>,
    seen: BTreeSet<String>,
    collected: BTreeMap<String, String>,
    limits: BTreeMap<String, f64>,
    backlog: Vec<String>,
}

impl WalkContext {
    fn new(host: &str, interval: u32) -> Self {
        Self {
            host: host.to_string(),
            interval,
            request_id: 0,
            state: AttemptState::Idle,
            rounds: 0,
            continuations: 0,
            started_at: Utc::now(),
            data_oids: BTreeSet::new(),
            limit_oids: BTreeSet::new(),
            seen: BTreeSet::new(),
            collected: BTreeMap::new(),
            limits: BTreeMap::new(),
            backlog: Vec::new(),
        }
    }

    fn missing(&self) -> Vec<String> {
        let mut missing: Vec<String> = self
            .data_oids
            .iter()
            .chain(&self.limit_oids)
            .filter(|o| !self.seen.contains(*o))
            .cloned()
            .collect();
        oid::sort_dedup(&mut missing);
        missing
    }

    /// Keeps the varbinds that answer a wanted OID.
    fn classify(&mut self, reply: &Reply) {
        for varbind in &reply.varbinds {
            let wanted_data = self.data_oids.contains(&varbind.oid);
            let wanted_limit = self.limit_oids.contains(&varbind.oid);
            if !wanted_data && !wanted_limit {
                continue;
            }
            let Some(raw) = varbind.value.as_raw() else {
                continue;
            };
            self.seen.insert(varbind.oid.clone());
            if wanted_limit {
                match raw.trim().parse::<f64>() {
                    Ok(v) => {
                        self.limits.insert(varbind.oid.clone(), v);
                    }
                    Err(_) => {
                        tracing::warn!(host = %self.host, oid = %varbind.oid, value = %raw, "Bad limit value");
                    }
                }
            }
            if wanted_data {
                self.collected.insert(varbind.oid.clone(), raw);
            }
        }
    }
}

#[derive(Debug)]
pub enum AttemptOutcome {
    /// Fresh data was written back; the device as stored afterwards.
    Polled(Device),
    /// Another attempt holds the group's lease.
    Busy,
}

pub fn target_of(device: &Device) -> Target {
    Target {
        address: device.address.clone(),
        port: device.port,
        community: device.community.clone(),
        version: device.version,
    }
}

pub struct ProtocolEngine<'a> {
    store: &'a dyn DeviceStore,
    transport: &'a dyn SnmpTransport,
    datasource: &'a Datasource,
    settings: &'a PollSettings,
}

impl<'a> ProtocolEngine<'a> {
    pub fn new(
        store: &'a dyn DeviceStore,
        transport: &'a dyn SnmpTransport,
        datasource: &'a Datasource,
        settings: &'a PollSettings,
    ) -> Self {
        Self {
            store,
            transport,
            datasource,
            settings,
        }
    }

    /// Polls group `interval` of `device`. The lease is always released,
    /// and the `checking` flag is always cleared unless the store itself
    /// became unreachable.
    pub async fn run(&self, device: Device, interval: u32) -> Result<AttemptOutcome> {
        let host = device.host.clone();
        let lease_ttl = self.settings.timeout + LEASE_MARGIN;
        let Some(lease) = self.store.acquire_lease(&host, interval, lease_ttl).await? else {
            tracing::debug!(host = %host, interval, "Group is being polled elsewhere");
            return Ok(AttemptOutcome::Busy);
        };
        let result = self.run_leased(device, interval).await;
        if let Err(e) = self.store.release_lease(&lease).await {
            tracing::error!(host = %host, interval, error = %e, "Failed to release poll lease");
        }
        result
    }

    async fn run_leased(&self, mut device: Device, interval: u32) -> Result<AttemptOutcome> {
        let target = target_of(&device);
        let mut ctx = WalkContext::new(&device.host, interval);
        let group = device
            .group_mut(interval)
            .ok_or_else(|| PollError::Configuration(format!("no frequency group {interval}")))?;
        group.forced = false;
        group.snapshot();
        group.checking = true;
        let view = group.clone();
        self.store.put_device(&device).await?;

        let walked = tokio::time::timeout(self.settings.timeout, self.walk(&mut ctx, &target, view)).await;
        match walked {
            Ok(Ok(())) => {
                let device = self.finish(&ctx).await?;
                ctx.state = AttemptState::Finished;
                tracing::info!(
                    host = %ctx.host,
                    interval,
                    rounds = ctx.rounds,
                    collected = ctx.collected.len(),
                    missing = ctx.missing().len(),
                    "Poll attempt finished"
                );
                Ok(AttemptOutcome::Polled(device))
            }
            Ok(Err(e)) => {
                ctx.state = AttemptState::Errored;
                tracing::warn!(host = %ctx.host, interval, rounds = ctx.rounds, error = %e, "Poll attempt failed");
                self.abort(&ctx).await;
                Err(e)
            }
            Err(_) => {
                ctx.state = AttemptState::TimedOut;
                tracing::warn!(host = %ctx.host, interval, rounds = ctx.rounds, "Poll attempt timed out");
                self.abort(&ctx).await;
                Err(PollError::Timeout(self.settings.timeout.as_secs()))
            }
        }
    }

    async fn walk(&self, ctx: &mut WalkContext, target: &Target, mut group: FrequencyGroup) -> Result<()> {
        if group.has_pending_mapping() {
            let mut resolver = MappingResolver::plan(&group, self.datasource);
            ctx.state = AttemptState::Requesting;
            while !resolver.is_complete() {
                let oids = resolver.next_oids();
                let reply = self.round(ctx, target, &oids).await?;
                resolver.ingest(&oids, &reply.varbinds);
                ctx.state = AttemptState::MappingContinuing;
            }
            group = self.persist_mapping(ctx, &resolver).await?;
        }

        ctx.data_oids = group.data_oids().into_iter().collect();
        ctx.limit_oids = group.limit_oids().into_iter().collect();
        let wanted = ctx.missing();
        if wanted.is_empty() {
            return Ok(());
        }

        let mut probes: Vec<String> = wanted.iter().map(|o| oid::predecessor(o)).collect();
        oid::sort_dedup(&mut probes);
        let cap = self.settings.max_oids_per_request.max(1);
        if probes.len() > cap {
            ctx.backlog = probes.split_off(cap);
        }
        ctx.state = AttemptState::Requesting;
        let reply = self.round(ctx, target, &probes).await?;
        ctx.classify(&reply);

        loop {
            let missing = ctx.missing();
            if missing.is_empty() {
                break;
            }
            if ctx.continuations >= self.settings.max_continuations {
                tracing::warn!(
                    host = %ctx.host,
                    interval = ctx.interval,
                    missing = missing.len(),
                    "Continuation budget exhausted"
                );
                break;
            }
            let next = if ctx.backlog.is_empty() {
                let mut probes: Vec<String> = missing.iter().map(|o| oid::predecessor(o)).collect();
                oid::sort_dedup(&mut probes);
                if probes.len() > cap {
                    ctx.backlog = probes.split_off(cap);
                }
                probes
            } else {
                let take = ctx.backlog.len().min(cap);
                ctx.backlog.drain(..take).collect()
            };
            ctx.continuations += 1;
            ctx.state = AttemptState::Continuing;
            let reply = self.round(ctx, target, &next).await?;
            ctx.classify(&reply);
        }
        Ok(())
    }

    /// Sends one request and checks the reply carries no SNMP error.
    async fn round(&self, ctx: &mut WalkContext, target: &Target, oids: &[String]) -> Result<Reply> {
        ctx.request_id = id::next_request_id();
        ctx.rounds += 1;
        let kind = match (self.settings.use_bulk, target.version) {
            (true, SnmpVersion::V2c) => RequestKind::GetBulk {
                max_repetitions: self.settings.max_repetitions,
            },
            _ => RequestKind::GetNext,
        };
        tracing::debug!(
            host = %ctx.host,
            interval = ctx.interval,
            request_id = ctx.request_id,
            oids = oids.len(),
            ?kind,
            "SNMP request"
        );
        let reply = self
            .transport
            .send(Request {
                request_id: ctx.request_id,
                target: target.clone(),
                kind,
                oids: oids.to_vec(),
            })
            .await?;
        // noSuchName only marks the end of a v1 walk.
        match reply.error_status {
            0 | 2 => Ok(reply),
            status => Err(PollError::Protocol(format!("{status}: error index {}", reply.error_index))),
        }
    }

    async fn load(&self, ctx: &WalkContext) -> Result<Device> {
        self.store
            .get_device(&ctx.host)
            .await?
            .ok_or_else(|| PollError::Configuration(format!("device {} left the cache during polling", ctx.host)))
    }

    async fn persist_mapping(&self, ctx: &WalkContext, resolver: &MappingResolver) -> Result<FrequencyGroup> {
        let mut device = self.load(ctx).await?;
        let summary = resolver.apply(&mut device, ctx.interval);
        self.store.put_device(&device).await?;
        tracing::info!(
            host = %ctx.host,
            interval = ctx.interval,
            resolved = summary.resolved,
            not_found = summary.not_found,
            "Instance mapping stored"
        );
        device
            .group(ctx.interval)
            .cloned()
            .ok_or_else(|| PollError::Configuration(format!("no frequency group {}", ctx.interval)))
    }

    /// Writes the attempt's results into a freshly read copy of the device.
    async fn finish(&self, ctx: &WalkContext) -> Result<Device> {
        let mut device = self.load(ctx).await?;
        let group = device
            .group_mut(ctx.interval)
            .ok_or_else(|| PollError::Configuration(format!("no frequency group {}", ctx.interval)))?;
        for (limit_oid, value) in &ctx.limits {
            group.set_limit(limit_oid, *value);
        }
        group.store_raw_values(&ctx.collected);
        group.old_check_time = group.check_time;
        group.check_time = Some(ctx.started_at);
        group.compute_values();
        group.checking = false;
        self.store.put_device(&device).await?;
        Ok(device)
    }

    async fn abort(&self, ctx: &WalkContext) {
        let mut device = match self.store.get_device(&ctx.host).await {
            Ok(Some(device)) => device,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(host = %ctx.host, error = %e, "Cannot clear checking flag");
                return;
            }
        };
        if let Some(group) = device.group_mut(ctx.interval) {
            group.checking = false;
        }
        if let Err(e) = self.store.put_device(&device).await {
            tracing::error!(host = %ctx.host, error = %e, "Cannot clear checking flag");
        }
    }
}
