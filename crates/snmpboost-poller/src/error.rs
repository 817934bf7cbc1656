use crate::transport::TransportError;
use snmpboost_common::types::ExitCode;
use snmpboost_storage::error::StoreError;

/// Ways a poll attempt can end without fresh data.
///
/// Every variant is reported to the host daemon as UNKNOWN with its message
/// as output. Only [`PollError::is_fatal`] errors abort the poll cycle.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("SNMP device unreachable: {0}")]
    DeviceUnreachable(String),

    #[error("SNMP Request error {0}")]
    Protocol(String),

    #[error("Instance mapping not completed. Expect results at next check")]
    MappingUnresolved,

    #[error("{0}: Instance mapping not found. Please check your config")]
    MappingFailed(String),

    #[error("Waiting an additional check to calculate derive")]
    NeedsMoreData,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Error : SnmpBooster request timeout after {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PollError {
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::Unknown
    }

    /// Store connectivity loss; the caller should fail the cycle loudly.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PollError::Store(e) if e.is_unreachable())
    }
}

impl From<TransportError> for PollError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::InvalidOid(oid) => PollError::Configuration(format!("invalid OID '{oid}'")),
            other => PollError::DeviceUnreachable(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, PollError>;
