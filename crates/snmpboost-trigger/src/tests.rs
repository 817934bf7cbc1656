use crate::engine::evaluate;
use crate::expr::validate;
use crate::TriggerError;
use snmpboost_common::device::{Metric, Service, ServiceKey, Trigger};
use snmpboost_common::types::{DsType, ExitCode, MetricValue};
use std::collections::BTreeMap;

fn make_metric(name: &str, value: Option<f64>, old: Option<f64>, max: Option<f64>) -> Metric {
    let mut metric = Metric::new(name, ".1.3.6.1.2.1.2.2.1.14.7", DsType::Gauge);
    metric.raw_value = value.map(|v| v.to_string());
    metric.value = value.map(MetricValue::Number);
    metric.old_value = old.map(MetricValue::Number);
    metric.max_value = max;
    metric
}

fn make_service(metrics: Vec<Metric>, triggers: Vec<(&str, Trigger)>) -> Service {
    let mut service = Service::new(ServiceKey::new("interface", Some("7"), Some("eth0")), "if-eth0");
    service.metrics = metrics.into_iter().map(|m| (m.name.clone(), m)).collect();
    service.triggers = triggers
        .into_iter()
        .map(|(name, t)| (name.to_string(), t))
        .collect::<BTreeMap<_, _>>();
    service
}

fn program(tokens: &[&str]) -> Option<Vec<String>> {
    Some(tokens.iter().map(|t| t.to_string()).collect())
}

#[test]
fn no_triggers_is_ok() {
    let service = make_service(vec![make_metric("ifInErrors", Some(1.0), None, None)], vec![]);
    let outcome = evaluate("router-1", &service);
    assert_eq!(outcome.exit_code, ExitCode::Ok);
    assert!(outcome.diagnostic.is_none());
}

#[test]
fn critical_fires_on_threshold() {
    let trigger = Trigger {
        critical: program(&["ifInErrors.last()", "10", "gt"]),
        warning: program(&["ifInErrors.last()", "5", "gt"]),
        default_status: ExitCode::Unknown,
    };
    let service = make_service(
        vec![make_metric("ifInErrors", Some(12.0), None, None)],
        vec![("errors", trigger)],
    );
    assert_eq!(evaluate("router-1", &service).exit_code, ExitCode::Critical);
}

#[test]
fn warning_fires_when_critical_does_not() {
    let trigger = Trigger {
        critical: program(&["ifInErrors.last()", "10", "gt"]),
        warning: program(&["ifInErrors", "5", "gt"]),
        default_status: ExitCode::Unknown,
    };
    let service = make_service(
        vec![make_metric("ifInErrors", Some(7.0), None, None)],
        vec![("errors", trigger)],
    );
    assert_eq!(evaluate("router-1", &service).exit_code, ExitCode::Warning);
}

#[test]
fn criticals_of_all_triggers_run_before_warnings() {
    let warn_first = Trigger {
        critical: None,
        warning: program(&["a.last()", "0", "gt"]),
        default_status: ExitCode::Unknown,
    };
    let crit_second = Trigger {
        critical: program(&["b.last()", "0", "gt"]),
        warning: None,
        default_status: ExitCode::Unknown,
    };
    let service = make_service(
        vec![
            make_metric("a", Some(1.0), None, None),
            make_metric("b", Some(1.0), None, None),
        ],
        vec![("a-trigger", warn_first), ("b-trigger", crit_second)],
    );
    assert_eq!(evaluate("router-1", &service).exit_code, ExitCode::Critical);
}

#[test]
fn prct_without_max_falls_back_to_default_status() {
    let trigger = Trigger {
        critical: program(&["ifInErrors.prct(90)"]),
        warning: None,
        default_status: ExitCode::Unknown,
    };
    let service = make_service(
        vec![make_metric("ifInErrors", Some(50.0), None, None)],
        vec![("errors", trigger)],
    );
    let outcome = evaluate("router-1", &service);
    assert_eq!(outcome.exit_code, ExitCode::Unknown);
    assert_eq!(
        outcome.diagnostic.as_deref(),
        Some("Cannot calculate prct, max value for the datasource 'ifInErrors' is missing")
    );
}

#[test]
fn prct_uses_resolved_max() {
    let trigger = Trigger {
        critical: program(&["ifInOctets.prct()", "80", "ge"]),
        warning: None,
        default_status: ExitCode::Unknown,
    };
    let service = make_service(
        vec![make_metric("ifInOctets", Some(900.0), None, Some(1000.0))],
        vec![("bandwidth", trigger)],
    );
    assert_eq!(evaluate("router-1", &service).exit_code, ExitCode::Critical);
}

#[test]
fn diff_compares_with_previous_computed_value() {
    let trigger = Trigger {
        critical: None,
        warning: program(&["sysName.diff()", "0", "eq"]),
        default_status: ExitCode::Unknown,
    };
    let changed = make_service(
        vec![make_metric("sysName", Some(2.0), Some(1.0), None)],
        vec![("changed", trigger.clone())],
    );
    assert_eq!(evaluate("router-1", &changed).exit_code, ExitCode::Warning);

    let same = make_service(
        vec![make_metric("sysName", Some(2.0), Some(2.0), None)],
        vec![("changed", trigger)],
    );
    assert_eq!(evaluate("router-1", &same).exit_code, ExitCode::Ok);
}

#[test]
fn missing_datasource_uses_default_status() {
    let trigger = Trigger {
        critical: program(&["ifOutErrors.last()", "1", "gt"]),
        warning: None,
        default_status: ExitCode::Warning,
    };
    let service = make_service(
        vec![make_metric("ifInErrors", Some(50.0), None, None)],
        vec![("errors", trigger)],
    );
    let outcome = evaluate("router-1", &service);
    assert_eq!(outcome.exit_code, ExitCode::Warning);
    assert_eq!(
        outcome.diagnostic.as_deref(),
        Some("DS ifOutErrors not found to compute the trigger")
    );
}

#[test]
fn missing_value_distinguishes_raw_and_computed() {
    let trigger = Trigger {
        critical: program(&["ifInErrors.last()", "1", "gt"]),
        warning: None,
        default_status: ExitCode::Unknown,
    };
    let mut metric = make_metric("ifInErrors", None, None, None);
    let service = make_service(vec![metric.clone()], vec![("errors", trigger.clone())]);
    assert_eq!(
        evaluate("router-1", &service).diagnostic.as_deref(),
        Some("No data found for DS: 'ifInErrors'")
    );

    metric.raw_value = Some("12".into());
    let service = make_service(vec![metric], vec![("errors", trigger)]);
    assert_eq!(
        evaluate("router-1", &service).diagnostic.as_deref(),
        Some("No computed data found for DS: 'ifInErrors'")
    );
}

#[test]
fn unknown_function_uses_default_status() {
    let trigger = Trigger {
        critical: program(&["ifInErrors.median()", "1", "gt"]),
        warning: None,
        default_status: ExitCode::Critical,
    };
    let service = make_service(
        vec![make_metric("ifInErrors", Some(0.0), None, None)],
        vec![("errors", trigger)],
    );
    let outcome = evaluate("router-1", &service);
    assert_eq!(outcome.exit_code, ExitCode::Critical);
    assert_eq!(outcome.diagnostic.as_deref(), Some("Trigger function 'median' not found"));
}

#[test]
fn unbalanced_program_reports_rpn_error() {
    let trigger = Trigger {
        critical: program(&["ifInErrors.last()", "1"]),
        warning: None,
        default_status: ExitCode::Unknown,
    };
    let service = make_service(
        vec![make_metric("ifInErrors", Some(3.0), None, None)],
        vec![("errors", trigger)],
    );
    let outcome = evaluate("router-1", &service);
    assert_eq!(outcome.exit_code, ExitCode::Unknown);
    assert!(outcome
        .diagnostic
        .unwrap()
        .starts_with("RPN calculation Error: "));
}

#[test]
fn validate_rejects_unknown_functions_at_load() {
    let mut triggers = BTreeMap::new();
    triggers.insert(
        "bad".to_string(),
        Trigger {
            critical: program(&["x.avg()", "1", "gt"]),
            warning: None,
            default_status: ExitCode::Unknown,
        },
    );
    assert_eq!(validate(&triggers), Err(TriggerError::UnknownFunction("avg".into())));
}
