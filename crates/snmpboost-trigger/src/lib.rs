//! Trigger evaluation for cached services.
//!
//! A trigger carries RPN programs per severity. Program elements are
//! literals, operators, metric names, or `<metric>.<function>(<args>)` calls
//! into the closed [`expr::TriggerFunction`] set. [`engine::evaluate`] scores
//! all critical programs first, then warnings, and falls back to the
//! trigger's default status whenever a program cannot be evaluated.

pub mod engine;
pub mod expr;

#[cfg(test)]
mod tests;

use snmpboost_common::rpn::RpnError;
use snmpboost_common::types::ExitCode;

/// Result of scoring one service.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerOutcome {
    pub exit_code: ExitCode,
    /// Set when a program could not be evaluated and the default status was used.
    pub diagnostic: Option<String>,
}

impl TriggerOutcome {
    pub fn ok() -> Self {
        Self {
            exit_code: ExitCode::Ok,
            diagnostic: None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TriggerError {
    #[error("DS {0} not found to compute the trigger")]
    UnknownDatasource(String),

    #[error("No data found for DS: '{0}'")]
    NoData(String),

    #[error("No computed data found for DS: '{0}'")]
    NoComputedData(String),

    #[error("Trigger function '{0}' not found")]
    UnknownFunction(String),

    #[error("Cannot calculate prct, max value for the datasource '{0}' is missing")]
    MissingMax(String),

    #[error("Value of DS '{0}' is not numeric")]
    NotNumeric(String),

    #[error("RPN calculation Error: {error} - {program}")]
    Rpn { error: RpnError, program: String },
}
