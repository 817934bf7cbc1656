//! Renders a cached service into the check result handed to the host daemon.

use crate::error::PollError;
use chrono::{DateTime, Utc};
use snmpboost_common::device::{FrequencyGroup, Instance, Metric};
use snmpboost_common::types::{CheckResult, ExitCode, MetricValue};

pub const MAPPING_NOT_FOUND: &str = "Instance mapping not found. Please check your config";
pub const TRIGGER_PROBLEM: &str = "Trigger Problem detected (Please check output or poller logs) - ";
pub const FROM_CACHE: &str = "FROM CACHE: ";

#[derive(Debug, Clone, PartialEq)]
struct MetricLine {
    out: String,
    perf: Option<String>,
    value: Option<MetricValue>,
}

fn bound(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_default()
}

fn metric_line(metric: &Metric, check_time: Option<DateTime<Utc>>, old_check_time: Option<DateTime<Utc>>) -> MetricLine {
    let name = &metric.name;
    let unit = &metric.unit;
    match metric.compute(check_time, old_check_time) {
        Ok(MetricValue::Text(text)) => MetricLine {
            out: format!("{name}: {text}{unit}"),
            perf: None,
            value: Some(MetricValue::Text(text)),
        },
        Ok(MetricValue::Number(v)) => MetricLine {
            out: format!("{name}: {v:.2}{unit}"),
            perf: Some(format!(
                "{name}={v:.2}{unit};;;{};{}",
                bound(metric.min_value),
                bound(metric.max_value)
            )),
            value: Some(MetricValue::Number(v)),
        },
        Err(e) => MetricLine {
            out: format!("{name}: {e}"),
            perf: None,
            value: None,
        },
    }
}

/// Builds `"<name>: <out> - <out> | <perf> <perf>"` for one service.
///
/// The exit code comes from the triggers, except that any metric without a
/// value makes the whole result UNKNOWN.
pub fn render_service(host: &str, group: &FrequencyGroup, service_id: &str) -> CheckResult {
    let Some(service) = group.services.get(service_id) else {
        return CheckResult::unknown(format!("Service {service_id} not found in cache"));
    };
    let name = service.display_name();
    match &service.instance {
        Instance::NotFound => return CheckResult::unknown(format!("{name}: {MAPPING_NOT_FOUND}")),
        Instance::Pending { .. } => {
            return CheckResult::unknown(format!("{name}: {}", PollError::MappingUnresolved))
        }
        Instance::Unmapped | Instance::Resolved(_) => {}
    }

    let mut scored = service.clone();
    let mut outs = Vec::with_capacity(scored.metrics.len());
    let mut perfs = Vec::new();
    let mut unknown = scored.metrics.is_empty();
    for metric in scored.metrics.values_mut() {
        let line = metric_line(metric, group.check_time, group.old_check_time);
        unknown |= line.value.is_none();
        metric.value = line.value;
        outs.push(line.out);
        perfs.extend(line.perf);
    }

    let outcome = snmpboost_trigger::engine::evaluate(host, &scored);
    let exit_code = if unknown { ExitCode::Unknown } else { outcome.exit_code };
    let prefix = if outcome.diagnostic.is_some() { TRIGGER_PROBLEM } else { "" };
    let body = if outs.is_empty() { "No Data found".to_string() } else { outs.join(" - ") };
    CheckResult::new(exit_code, format!("{prefix}{name}: {body}")).with_perf_data(perfs.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use snmpboost_common::device::{Service, ServiceKey, Trigger};
    use snmpboost_common::types::DsType;

    fn group_with(metrics: Vec<Metric>, triggers: Vec<(&str, Trigger)>) -> (FrequencyGroup, String) {
        let mut service = Service::new(ServiceKey::new("interface", Some("7"), Some("eth0")), "if-eth0");
        service.metrics = metrics.into_iter().map(|m| (m.name.clone(), m)).collect();
        service.triggers = triggers.into_iter().map(|(n, t)| (n.to_string(), t)).collect();
        let id = service.id();
        let mut group = FrequencyGroup::new(5);
        group.check_time = Some(Utc::now());
        group.old_check_time = group.check_time.map(|t| t - Duration::seconds(60));
        group.services.insert(id.clone(), service);
        (group, id)
    }

    fn gauge(name: &str, raw: Option<&str>) -> Metric {
        let mut metric = Metric::new(name, ".1.3.6.1.2.1.2.2.1.10.7", DsType::Gauge);
        metric.raw_value = raw.map(str::to_string);
        metric
    }

    #[test]
    fn numeric_metric_has_out_and_perf() {
        let mut metric = gauge("ifSpeed", Some("1000"));
        metric.unit = "b".into();
        metric.max_value = Some(10_000.0);
        let (group, id) = group_with(vec![metric], vec![]);
        let result = render_service("router-1", &group, &id);
        assert_eq!(result.exit_code, ExitCode::Ok);
        assert_eq!(result.output, "eth0: ifSpeed: 1000.00b");
        assert_eq!(result.perf_data, "ifSpeed=1000.00b;;;;10000.00");
    }

    #[test]
    fn text_metric_has_no_perf() {
        let mut metric = gauge("ifDescr", Some("uplink"));
        metric.ds_type = DsType::Text;
        let (group, id) = group_with(vec![metric], vec![]);
        let result = render_service("router-1", &group, &id);
        assert_eq!(result.output, "eth0: ifDescr: uplink");
        assert!(result.perf_data.is_empty());
    }

    #[test]
    fn missing_value_forces_unknown() {
        let (group, id) = group_with(vec![gauge("a", Some("1")), gauge("b", None)], vec![]);
        let result = render_service("router-1", &group, &id);
        assert_eq!(result.exit_code, ExitCode::Unknown);
        assert_eq!(result.output, "eth0: a: 1.00 - b: No Data found");
        assert_eq!(result.perf_data, "a=1.00;;;;");
    }

    #[test]
    fn trigger_problem_is_prefixed() {
        let trigger = Trigger {
            critical: Some(vec!["a.prct()".into(), "50".into(), "gt".into()]),
            warning: None,
            default_status: ExitCode::Warning,
        };
        let (group, id) = group_with(vec![gauge("a", Some("1"))], vec![("load", trigger)]);
        let result = render_service("router-1", &group, &id);
        assert_eq!(result.exit_code, ExitCode::Warning);
        assert!(result.output.starts_with(TRIGGER_PROBLEM));
    }

    #[test]
    fn firing_trigger_sets_exit_code() {
        let trigger = Trigger {
            critical: Some(vec!["a".into(), "100".into(), "gt".into()]),
            warning: Some(vec!["a".into(), "10".into(), "gt".into()]),
            default_status: ExitCode::Unknown,
        };
        let (group, id) = group_with(vec![gauge("a", Some("42"))], vec![("load", trigger)]);
        let result = render_service("router-1", &group, &id);
        assert_eq!(result.exit_code, ExitCode::Warning);
        assert_eq!(result.output, "eth0: a: 42.00");
    }

    #[test]
    fn not_found_mapping_has_fixed_message() {
        let (mut group, id) = group_with(vec![gauge("a", Some("1"))], vec![]);
        group.services.get_mut(&id).unwrap().instance = Instance::NotFound;
        let result = render_service("router-1", &group, &id);
        assert_eq!(result.exit_code, ExitCode::Unknown);
        assert_eq!(result.output, format!("eth0: {MAPPING_NOT_FOUND}"));
    }
}
