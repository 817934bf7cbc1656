use crate::TriggerError;
use regex::Regex;
use snmpboost_common::device::{Metric, Trigger};
use snmpboost_common::rpn::Token;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

static CALL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^.()\s]+)\.([A-Za-z_][A-Za-z0-9_]*)\((.*)\)$").expect("call pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerFunction {
    /// 1 when the computed value equals the previous computed value.
    Diff,
    /// Computed value as a percentage of the resolved max bound.
    Prct,
    /// The computed value itself.
    Last,
}

impl FromStr for TriggerFunction {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "diff" => Ok(Self::Diff),
            "prct" => Ok(Self::Prct),
            "last" => Ok(Self::Last),
            _ => Err(TriggerError::UnknownFunction(s.to_string())),
        }
    }
}

impl std::fmt::Display for TriggerFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Diff => write!(f, "diff"),
            Self::Prct => write!(f, "prct"),
            Self::Last => write!(f, "last"),
        }
    }
}

impl TriggerFunction {
    pub fn apply(self, metric: &Metric) -> Result<f64, TriggerError> {
        let value = metric
            .value
            .as_ref()
            .ok_or_else(|| TriggerError::NoComputedData(metric.name.clone()))?;
        match self {
            Self::Diff => Ok(if Some(value) == metric.old_value.as_ref() { 1.0 } else { 0.0 }),
            Self::Prct => {
                let max = metric
                    .max_value
                    .filter(|m| *m != 0.0)
                    .ok_or_else(|| TriggerError::MissingMax(metric.name.clone()))?;
                let v = value
                    .as_f64()
                    .ok_or_else(|| TriggerError::NotNumeric(metric.name.clone()))?;
                Ok(v * 100.0 / max)
            }
            Self::Last => value
                .as_f64()
                .ok_or_else(|| TriggerError::NotNumeric(metric.name.clone())),
        }
    }
}

/// One element of a trigger program.
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Call {
        datasource: String,
        function: TriggerFunction,
        /// Accepted for compatibility; no built-in function takes arguments.
        args: Vec<String>,
    },
    Literal(Token),
    /// A bare name, resolved against the service's metrics at evaluation.
    Name(String),
}

impl FromStr for Element {
    type Err = TriggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(caps) = CALL.captures(s) {
            let args = caps[3]
                .split(',')
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
            return Ok(Element::Call {
                datasource: caps[1].to_string(),
                function: caps[2].parse()?,
                args,
            });
        }
        match s.parse::<Token>() {
            Ok(token) => Ok(Element::Literal(token)),
            Err(_) => Ok(Element::Name(s.to_string())),
        }
    }
}

pub fn parse_program<S: AsRef<str>>(program: &[S]) -> Result<Vec<Element>, TriggerError> {
    program.iter().map(|e| e.as_ref().parse()).collect()
}

/// Rejects unknown trigger functions before any poll runs.
pub fn validate(triggers: &BTreeMap<String, Trigger>) -> Result<(), TriggerError> {
    for (name, trigger) in triggers {
        for program in [&trigger.critical, &trigger.warning].into_iter().flatten() {
            parse_program(program).inspect_err(|e| {
                tracing::error!(trigger = %name, error = %e, "Invalid trigger program");
            })?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use snmpboost_common::rpn::Operator;

    #[test]
    fn parses_calls_literals_and_names() {
        let program = parse_program(&["ifInErrors.prct(90)", "80", "gt", "ifOutErrors"]).unwrap();
        assert_eq!(
            program,
            vec![
                Element::Call {
                    datasource: "ifInErrors".into(),
                    function: TriggerFunction::Prct,
                    args: vec!["90".into()],
                },
                Element::Literal(Token::Number(80.0)),
                Element::Literal(Token::Op(Operator::Gt)),
                Element::Name("ifOutErrors".into()),
            ]
        );
    }

    #[test]
    fn decimal_literal_is_not_a_call() {
        assert_eq!("1.5".parse::<Element>().unwrap(), Element::Literal(Token::Number(1.5)));
    }

    #[test]
    fn unknown_function_is_rejected() {
        assert_eq!(
            "ifInErrors.avg()".parse::<Element>().unwrap_err(),
            TriggerError::UnknownFunction("avg".into())
        );
    }
}
