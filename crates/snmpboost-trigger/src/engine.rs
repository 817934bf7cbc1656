use crate::expr::{parse_program, Element};
use crate::{TriggerError, TriggerOutcome};
use snmpboost_common::device::{Service, Trigger};
use snmpboost_common::rpn::{self, Token};
use snmpboost_common::types::ExitCode;

/// Severities in evaluation order.
const SEVERITIES: [ExitCode; 2] = [ExitCode::Critical, ExitCode::Warning];

fn program_for(trigger: &Trigger, severity: ExitCode) -> Option<&[String]> {
    match severity {
        ExitCode::Critical => trigger.critical.as_deref(),
        ExitCode::Warning => trigger.warning.as_deref(),
        _ => None,
    }
}

fn resolve(service: &Service, element: &Element) -> Result<Token, TriggerError> {
    match element {
        Element::Literal(token) => Ok(*token),
        Element::Call {
            datasource,
            function,
            ..
        } => {
            let metric = service
                .metrics
                .get(datasource)
                .ok_or_else(|| TriggerError::UnknownDatasource(datasource.clone()))?;
            if metric.value.is_none() {
                return Err(if metric.raw_value.is_none() {
                    TriggerError::NoData(datasource.clone())
                } else {
                    TriggerError::NoComputedData(datasource.clone())
                });
            }
            function.apply(metric).map(Token::Number)
        }
        Element::Name(name) => match service.metrics.get(name) {
            Some(metric) => {
                let value = metric
                    .value
                    .as_ref()
                    .ok_or_else(|| TriggerError::NoData(name.clone()))?;
                value
                    .as_f64()
                    .map(Token::Number)
                    .ok_or_else(|| TriggerError::NotNumeric(name.clone()))
            }
            None => Err(TriggerError::Rpn {
                error: rpn::RpnError::InvalidToken(name.clone()),
                program: name.clone(),
            }),
        },
    }
}

/// Runs one program; `Ok(true)` when the result is non-zero.
fn fires(service: &Service, program: &[String]) -> Result<bool, TriggerError> {
    let elements = parse_program(program)?;
    let tokens = elements
        .iter()
        .map(|e| resolve(service, e))
        .collect::<Result<Vec<_>, _>>()?;
    let result = rpn::evaluate(&tokens).map_err(|error| TriggerError::Rpn {
        error,
        program: program.join(" "),
    })?;
    Ok(result.is_some_and(|v| v != 0.0 && !v.is_nan()))
}

/// Scores a service whose metric values have already been computed.
///
/// Critical programs of every trigger run before any warning program. The
/// first program that fires decides the outcome. A program that cannot be
/// evaluated ends scoring with its trigger's default status.
pub fn evaluate(host: &str, service: &Service) -> TriggerOutcome {
    for severity in SEVERITIES {
        for (name, trigger) in &service.triggers {
            let Some(program) = program_for(trigger, severity) else {
                continue;
            };
            match fires(service, program) {
                Ok(true) => {
                    tracing::debug!(
                        host,
                        service = %service.key,
                        trigger = %name,
                        severity = %severity,
                        "Trigger fired"
                    );
                    return TriggerOutcome {
                        exit_code: severity,
                        diagnostic: None,
                    };
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        host,
                        service = %service.key,
                        trigger = %name,
                        error = %e,
                        "Trigger evaluation failed, using default status"
                    );
                    return TriggerOutcome {
                        exit_code: trigger.default_status,
                        diagnostic: Some(e.to_string()),
                    };
                }
            }
        }
    }
    TriggerOutcome::ok()
}
