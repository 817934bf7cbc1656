//! Datasource declarations: templates, sources, triggers and mapping tables.
//!
//! Loading and merging datasource files is left to the caller; this module
//! only validates an already deserialized [`Datasource`] and builds cached
//! [`Service`] records from it.

use crate::device::{Metric, Service, ServiceKey, Trigger};
use crate::rpn::{self, RpnError};
use crate::types::{Bound, DsType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DatasourceError {
    #[error("Datasource: template '{0}' not found")]
    UnknownTemplate(String),

    #[error("Datasource: template '{template}' references unknown source '{source_name}'")]
    UnknownSource { template: String, source_name: String },

    #[error("Datasource: trigger group '{0}' not found")]
    UnknownTriggerGroup(String),

    #[error("Datasource: trigger group '{group}' references unknown trigger '{trigger}'")]
    UnknownTrigger { group: String, trigger: String },

    #[error("Datasource: invalid calc for source '{source_name}': {error}")]
    Calc { source_name: String, error: RpnError },

    #[error("Datasource: mapping table '{0}' not found")]
    UnknownMap(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DsTemplate {
    /// Source names making up the template.
    pub ds: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDecl {
    /// OID template; `{instance}`, `{instance_name}` and `{template}` are substituted.
    pub oid: String,
    #[serde(rename = "type", default)]
    pub ds_type: DsType,
    /// Display name, defaults to the source key.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub calc: Vec<String>,
    #[serde(default)]
    pub min: Option<String>,
    #[serde(default)]
    pub max: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapDecl {
    pub base_oid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    #[serde(default)]
    pub templates: BTreeMap<String, DsTemplate>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceDecl>,
    #[serde(default)]
    pub trigger_groups: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub triggers: BTreeMap<String, Trigger>,
    #[serde(default)]
    pub maps: BTreeMap<String, MapDecl>,
}

/// Service attributes available to OID templates.
struct Attributes<'a> {
    template: &'a str,
    instance: &'a str,
    instance_name: &'a str,
}

impl Attributes<'_> {
    fn substitute(&self, s: &str) -> String {
        s.replace("{instance}", self.instance)
            .replace("{instance_name}", self.instance_name)
            .replace("{template}", self.template)
    }
}

impl Datasource {
    /// Checks cross references, mapping tables named in source OIDs and RPN
    /// programs. Trigger expressions are checked by the trigger engine.
    pub fn validate(&self) -> Result<(), DatasourceError> {
        for (template, decl) in &self.templates {
            for source_name in &decl.ds {
                if !self.sources.contains_key(source_name) {
                    return Err(DatasourceError::UnknownSource {
                        template: template.clone(),
                        source_name: source_name.clone(),
                    });
                }
            }
        }
        for (source_name, decl) in &self.sources {
            rpn::parse_program(&decl.calc).map_err(|error| DatasourceError::Calc {
                source_name: source_name.clone(),
                error,
            })?;
            let templates = std::iter::once(decl.oid.as_str()).chain(decl.min.as_deref()).chain(decl.max.as_deref());
            for expr in templates.filter_map(crate::oid::parse_map_expr) {
                // A `{template}` placeholder is only known per service.
                if !expr.table.contains('{') && !self.maps.contains_key(&expr.table) {
                    return Err(DatasourceError::UnknownMap(expr.table));
                }
            }
        }
        for (group, triggers) in &self.trigger_groups {
            for trigger in triggers {
                if !self.triggers.contains_key(trigger) {
                    return Err(DatasourceError::UnknownTrigger {
                        group: group.clone(),
                        trigger: trigger.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn map_base_oid(&self, table: &str) -> Option<&str> {
        self.maps.get(table).map(|m| m.base_oid.as_str())
    }

    /// Builds the cached service for one check declaration.
    ///
    /// # Examples
    ///
    /// ```
    /// use snmpboost_common::datasource::{Datasource, DsTemplate, SourceDecl};
    /// use snmpboost_common::device::ServiceKey;
    /// use snmpboost_common::types::DsType;
    ///
    /// let mut ds = Datasource::default();
    /// ds.sources.insert("ifInOctets".into(), SourceDecl {
    ///     oid: ".1.3.6.1.2.1.2.2.1.10.{instance}".into(),
    ///     ds_type: DsType::Derive,
    ///     name: None,
    ///     unit: "B/s".into(),
    ///     calc: vec![],
    ///     min: None,
    ///     max: None,
    /// });
    /// ds.templates.insert("interface".into(), DsTemplate { ds: vec!["ifInOctets".into()] });
    ///
    /// let key = ServiceKey::new("interface", Some("map(ifTable,eth0)"), Some("eth0"));
    /// let service = ds.build_service(key, "if-eth0", None).unwrap();
    /// assert_eq!(service.metrics["ifInOctets"].oid, ".1.3.6.1.2.1.2.2.1.10.map(ifTable,eth0)");
    /// ```
    pub fn build_service(
        &self,
        key: ServiceKey,
        service_name: &str,
        trigger_group: Option<&str>,
    ) -> Result<Service, DatasourceError> {
        let template = self
            .templates
            .get(&key.template)
            .ok_or_else(|| DatasourceError::UnknownTemplate(key.template.clone()))?;

        let instance = key.instance.clone().unwrap_or_default();
        let instance_name = key.instance_name.clone().unwrap_or_default();
        let attrs = Attributes {
            template: &key.template,
            instance: &instance,
            instance_name: &instance_name,
        };

        let mut metrics = BTreeMap::new();
        for source_name in &template.ds {
            let decl = self
                .sources
                .get(source_name)
                .ok_or_else(|| DatasourceError::UnknownSource {
                    template: key.template.clone(),
                    source_name: source_name.clone(),
                })?;
            rpn::parse_program(&decl.calc).map_err(|error| DatasourceError::Calc {
                source_name: source_name.clone(),
                error,
            })?;

            let name = decl.name.clone().unwrap_or_else(|| source_name.clone());
            let mut metric = Metric::new(&name, &attrs.substitute(&decl.oid), decl.ds_type);
            metric.unit = decl.unit.clone();
            metric.calc = decl.calc.clone();
            metric.min = decl.min.as_deref().map(|m| Bound::parse(&attrs.substitute(m))).unwrap_or_default();
            metric.max = decl.max.as_deref().map(|m| Bound::parse(&attrs.substitute(m))).unwrap_or_default();
            metric.apply_literal_bounds();
            metrics.insert(name, metric);
        }

        let mut triggers = BTreeMap::new();
        if let Some(group) = trigger_group.filter(|g| !g.is_empty()) {
            let names = self
                .trigger_groups
                .get(group)
                .ok_or_else(|| DatasourceError::UnknownTriggerGroup(group.to_string()))?;
            for trigger_name in names {
                let trigger = self.triggers.get(trigger_name).ok_or_else(|| {
                    DatasourceError::UnknownTrigger {
                        group: group.to_string(),
                        trigger: trigger_name.clone(),
                    }
                })?;
                triggers.insert(trigger_name.clone(), trigger.clone());
            }
        }

        let mut service = Service::new(key, service_name);
        if let Some(expr) = service.key.instance.as_deref().and_then(crate::oid::parse_map_expr) {
            if self.map_base_oid(&expr.table).is_none() {
                tracing::warn!(table = %expr.table, service = %service.key, "Mapping table not declared");
            }
        }
        service.trigger_group = trigger_group.map(str::to_string);
        service.triggers = triggers;
        service.metrics = metrics;
        Ok(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Instance;

    fn datasource() -> Datasource {
        let toml_like = serde_json::json!({
            "templates": { "interface": { "ds": ["ifInOctets", "ifSpeed"] } },
            "sources": {
                "ifInOctets": {
                    "oid": ".1.3.6.1.2.1.2.2.1.10.{instance}",
                    "type": "DERIVE",
                    "unit": "B/s",
                    "calc": ["8", "mul"],
                    "max": ".1.3.6.1.2.1.2.2.1.5.{instance}"
                },
                "ifSpeed": { "oid": ".1.3.6.1.2.1.2.2.1.5.{instance}", "type": "GAUGE", "max": "100" }
            },
            "trigger_groups": { "iface": ["errors"] },
            "triggers": {
                "errors": { "critical": ["ifInOctets.last()", "1000", "gt"], "default_status": "unknown" }
            },
            "maps": { "ifTable": { "base_oid": ".1.3.6.1.2.1.2.2.1.2" } }
        });
        serde_json::from_value(toml_like).unwrap()
    }

    #[test]
    fn valid_datasource_passes() {
        assert_eq!(datasource().validate(), Ok(()));
    }

    #[test]
    fn bad_calc_is_rejected() {
        let mut ds = datasource();
        ds.sources.get_mut("ifSpeed").unwrap().calc = vec!["2".into(), "mult".into()];
        assert!(matches!(ds.validate(), Err(DatasourceError::Calc { .. })));
    }

    #[test]
    fn source_naming_undeclared_map_is_rejected() {
        let mut ds = datasource();
        ds.sources.get_mut("ifSpeed").unwrap().oid = ".1.3.6.1.2.1.31.1.1.1.15.map(ifXTable,{instance_name})".into();
        assert_eq!(ds.validate(), Err(DatasourceError::UnknownMap("ifXTable".into())));

        ds.maps.insert("ifXTable".into(), MapDecl { base_oid: ".1.3.6.1.2.1.31.1.1.1.1".into() });
        assert_eq!(ds.validate(), Ok(()));
    }

    #[test]
    fn unknown_type_fails_to_deserialize() {
        let decl = serde_json::json!({ "oid": ".1.3", "type": "BOGUS" });
        assert!(serde_json::from_value::<SourceDecl>(decl).is_err());
    }

    #[test]
    fn build_service_substitutes_instance_and_bounds() {
        let ds = datasource();
        let key = ServiceKey::new("interface", Some("map(ifTable,eth0)"), Some("eth0"));
        let mut service = ds.build_service(key, "if-eth0", Some("iface")).unwrap();
        assert!(service.instance.is_pending());
        assert_eq!(service.triggers.len(), 1);
        assert_eq!(service.metrics["ifSpeed"].max_value, Some(100.0));

        service.resolve("3");
        assert_eq!(service.instance, Instance::Resolved("3".into()));
        assert_eq!(service.metrics["ifInOctets"].oid, ".1.3.6.1.2.1.2.2.1.10.3");
        assert_eq!(service.limit_oids(), vec![".1.3.6.1.2.1.2.2.1.5.3"]);
    }

    #[test]
    fn unknown_trigger_group_is_an_error() {
        let key = ServiceKey::new("interface", Some("1"), None);
        assert_eq!(
            datasource().build_service(key, "x", Some("nope")).unwrap_err(),
            DatasourceError::UnknownTriggerGroup("nope".into())
        );
    }
}
