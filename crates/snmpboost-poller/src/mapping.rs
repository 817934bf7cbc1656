//! Walks mapping tables to turn `map(<table>,<label>)` instances into
//! numeric indexes.

use crate::transport::VarBind;
use snmpboost_common::datasource::Datasource;
use snmpboost_common::device::{Device, FrequencyGroup, Instance};
use snmpboost_common::oid;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
struct TableWalk {
    /// Every table name declared on this base OID.
    tables: BTreeSet<String>,
    base: String,
    /// Labels still waiting for an index.
    wanted: BTreeSet<String>,
    /// Last OID received inside the table; the next request continues here.
    cursor: Option<String>,
    done: bool,
}

impl TableWalk {
    fn next_oid(&self) -> &str {
        self.cursor.as_deref().unwrap_or(&self.base)
    }

    fn owns(&self, requested: &str) -> bool {
        requested == self.base || oid::is_strict_descendant(requested, &self.base)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MappingSummary {
    pub resolved: usize,
    pub not_found: usize,
}

/// Mapping state of one poll attempt.
#[derive(Debug, Clone, Default)]
pub struct MappingResolver {
    tables: BTreeMap<String, TableWalk>,
    /// Tables referenced by services but absent from the datasource.
    undeclared: BTreeSet<String>,
    /// label → index, accumulated across rounds.
    labels: BTreeMap<String, String>,
}

impl MappingResolver {
    /// Collects the distinct mapping tables needed by pending services.
    pub fn plan(group: &FrequencyGroup, datasource: &Datasource) -> Self {
        let mut resolver = Self::default();
        for service in group.services.values() {
            let Instance::Pending { table, name } = &service.instance else {
                continue;
            };
            let Some(base) = datasource.map_base_oid(table) else {
                tracing::warn!(table = %table, service = %service.key, "Mapping table not declared");
                resolver.undeclared.insert(table.clone());
                continue;
            };
            let walk = resolver
                .tables
                .entry(oid::normalize(base))
                .or_insert_with(|| TableWalk {
                    tables: BTreeSet::new(),
                    base: oid::normalize(base),
                    wanted: BTreeSet::new(),
                    cursor: None,
                    done: false,
                });
            walk.tables.insert(table.clone());
            walk.wanted.insert(name.clone());
        }
        resolver
    }

    pub fn is_complete(&self) -> bool {
        self.tables.values().all(|t| t.done)
    }

    /// OIDs to request next: one per unfinished table.
    pub fn next_oids(&self) -> Vec<String> {
        self.tables
            .values()
            .filter(|t| !t.done)
            .map(|t| t.next_oid().to_string())
            .collect()
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Folds one reply into the walk. `requested` is the OID list that was
    /// sent; GETBULK replies interleave rows, so varbind `j` answers
    /// `requested[j % requested.len()]`.
    pub fn ingest(&mut self, requested: &[String], varbinds: &[VarBind]) {
        if requested.is_empty() {
            return;
        }
        let mut progressed = BTreeSet::new();
        for (j, varbind) in varbinds.iter().enumerate() {
            let column = &requested[j % requested.len()];
            let Some(walk) = self.tables.values_mut().find(|t| t.owns(column)) else {
                continue;
            };
            if walk.done {
                continue;
            }
            let index = match oid::suffix_under(&varbind.oid, &walk.base) {
                Some(index) if !varbind.value.is_exception() => index.to_string(),
                _ => {
                    walk.done = true;
                    continue;
                }
            };
            if walk.cursor.as_deref().is_some_and(|c| oid::compare(&varbind.oid, c).is_le()) {
                // An agent walking backwards would loop forever.
                tracing::warn!(base = %walk.base, oid = %varbind.oid, "Mapping walk is not increasing");
                walk.done = true;
                continue;
            }
            let label = varbind.value.as_raw().unwrap_or_default();
            let cleaned = oid::clean_label(&label);
            walk.wanted.remove(&label);
            walk.wanted.remove(&cleaned);
            self.labels.insert(label, index.clone());
            self.labels.entry(cleaned).or_insert_with(|| index.clone());
            walk.cursor = Some(varbind.oid.clone());
            progressed.insert(walk.base.clone());
        }
        for walk in self.tables.values_mut() {
            if walk.wanted.is_empty() || !progressed.contains(&walk.base) {
                walk.done = true;
            }
        }
    }

    /// Resolves pending services of the group from the collected labels.
    /// Pending services whose table is finished without their label become
    /// NOTFOUND. Safe to apply more than once.
    pub fn apply(&self, device: &mut Device, interval: u32) -> MappingSummary {
        for (label, index) in &self.labels {
            device.instances.insert(label.clone(), index.clone());
        }
        let mut summary = MappingSummary::default();
        let Some(group) = device.group_mut(interval) else {
            return summary;
        };
        for service in group.services.values_mut() {
            let Instance::Pending { table, name } = service.instance.clone() else {
                continue;
            };
            if let Some(index) = self.labels.get(&name) {
                service.resolve(index);
                summary.resolved += 1;
                tracing::info!(service = %service.key, table = %table, index = %index, "Instance mapped");
                continue;
            }
            let finished = self.undeclared.contains(&table)
                || self.tables.values().any(|t| t.done && t.tables.contains(&table));
            if finished {
                service.mark_not_found();
                summary.not_found += 1;
                tracing::warn!(service = %service.key, table = %table, label = %name, "Instance mapping not found");
            }
        }
        summary
    }
}
