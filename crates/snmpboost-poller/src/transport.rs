//! The seam between the protocol engine and the network.

use async_trait::async_trait;
use snmp2::{AsyncSession, Oid, Value};
use snmpboost_common::oid;
use snmpboost_common::types::SnmpVersion;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default bound on one request/response exchange.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Where and how to reach an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: String,
    pub port: u16,
    pub community: String,
    pub version: SnmpVersion,
}

impl Target {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    GetNext,
    GetBulk { max_repetitions: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Tags the round in logs. snmp2 matches PDU ids on the wire itself.
    pub request_id: i32,
    pub target: Target,
    pub kind: RequestKind,
    /// Normalized, numeric OIDs.
    pub oids: Vec<String>,
}

/// Owned copy of an SNMP value.
#[derive(Debug, Clone, PartialEq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    ObjectIdentifier(String),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    Timeticks(u32),
    Counter64(u64),
    Null,
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
    /// Anything else the agent sent, rendered for logs.
    Other(String),
}

impl SnmpValue {
    /// SNMPv2 exception values that end a column walk.
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }

    /// Textual form stored as a raw sample; `None` for exceptions.
    pub fn as_raw(&self) -> Option<String> {
        match self {
            SnmpValue::Integer(v) => Some(v.to_string()),
            SnmpValue::OctetString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            SnmpValue::ObjectIdentifier(o) => Some(o.clone()),
            SnmpValue::IpAddress([a, b, c, d]) => Some(format!("{a}.{b}.{c}.{d}")),
            SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::Timeticks(v) => {
                Some(v.to_string())
            }
            SnmpValue::Counter64(v) => Some(v.to_string()),
            SnmpValue::Null => Some(String::new()),
            SnmpValue::Other(s) => Some(s.clone()),
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView => None,
        }
    }
}

impl From<Value<'_>> for SnmpValue {
    fn from(value: Value<'_>) -> Self {
        match value {
            Value::Integer(v) => SnmpValue::Integer(v),
            Value::OctetString(bytes) => SnmpValue::OctetString(bytes.to_vec()),
            Value::ObjectIdentifier(o) => SnmpValue::ObjectIdentifier(oid::normalize(&o.to_string())),
            Value::IpAddress(ip) => SnmpValue::IpAddress(ip),
            Value::Counter32(v) => SnmpValue::Counter32(v),
            Value::Unsigned32(v) => SnmpValue::Gauge32(v),
            Value::Timeticks(v) => SnmpValue::Timeticks(v),
            Value::Counter64(v) => SnmpValue::Counter64(v),
            Value::Null => SnmpValue::Null,
            Value::NoSuchObject => SnmpValue::NoSuchObject,
            Value::NoSuchInstance => SnmpValue::NoSuchInstance,
            Value::EndOfMibView => SnmpValue::EndOfMibView,
            other => SnmpValue::Other(format!("{other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarBind {
    pub oid: String,
    pub value: SnmpValue,
}

impl VarBind {
    pub fn new(oid: &str, value: SnmpValue) -> Self {
        Self {
            oid: oid::normalize(oid),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub error_status: u32,
    pub error_index: u32,
    pub varbinds: Vec<VarBind>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("{endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("invalid OID: {0}")]
    InvalidOid(String),

    #[error("{endpoint}: no response within {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("poll worker stopped")]
    WorkerClosed,
}

/// Sends one request and waits for its reply. Implementations do not apply
/// the attempt timeout; the engine bounds the whole attempt instead.
#[async_trait]
pub trait SnmpTransport: Send + Sync {
    async fn send(&self, request: Request) -> Result<Reply, TransportError>;
}

fn parse_oid(s: &str) -> Result<Oid<'static>, TransportError> {
    let parts = oid::components(s).ok_or_else(|| TransportError::InvalidOid(s.to_string()))?;
    Oid::from(&parts).map_err(|e| TransportError::InvalidOid(format!("{s}: {e:?}")))
}

type SessionKey = (String, String, SnmpVersion);

/// UDP transport backed by `snmp2` sessions, one per agent endpoint.
/// Every exchange is bounded by `request_timeout`; a session whose reply
/// never came is dropped.
pub struct Snmp2Transport {
    sessions: Mutex<HashMap<SessionKey, Arc<Mutex<AsyncSession>>>>,
    request_timeout: Duration,
}

impl Default for Snmp2Transport {
    fn default() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl Snmp2Transport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    async fn session(&self, target: &Target) -> Result<Arc<Mutex<AsyncSession>>, TransportError> {
        let key = (target.endpoint(), target.community.clone(), target.version);
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get(&key) {
            return Ok(session.clone());
        }
        let endpoint = target.endpoint();
        let community = target.community.as_bytes();
        let session = match target.version {
            SnmpVersion::V1 => AsyncSession::new_v1(&endpoint, community, 0).await,
            SnmpVersion::V2c => AsyncSession::new_v2c(&endpoint, community, 0).await,
        }
        .map_err(|e| TransportError::Unreachable {
            endpoint: endpoint.clone(),
            reason: e.to_string(),
        })?;
        let session = Arc::new(Mutex::new(session));
        sessions.insert(key, session.clone());
        tracing::debug!(endpoint = %endpoint, "SNMP session opened");
        Ok(session)
    }

    /// Drops a cached session so the next request reconnects.
    async fn forget(&self, target: &Target) {
        let key = (target.endpoint(), target.community.clone(), target.version);
        self.sessions.lock().await.remove(&key);
    }
}

/// One request/response exchange over an open session.
async fn exchange(
    session: &Mutex<AsyncSession>,
    kind: RequestKind,
    oids: &[Oid<'static>],
) -> Result<Reply, snmp2::Error> {
    let mut session = session.lock().await;
    let mut reply = Reply {
        error_status: 0,
        error_index: 0,
        varbinds: Vec::new(),
    };
    match kind {
        RequestKind::GetBulk { max_repetitions } => {
            let refs: Vec<&Oid<'_>> = oids.iter().collect();
            let pdu = session.getbulk(&refs, 0, max_repetitions).await?;
            reply.error_status = pdu.error_status;
            reply.error_index = pdu.error_index;
            for (o, value) in pdu.varbinds {
                reply.varbinds.push(VarBind::new(&o.to_string(), value.into()));
            }
        }
        // One GETNEXT per OID keeps a missing column from failing the
        // whole round on v1 agents.
        RequestKind::GetNext => {
            for o in oids {
                let pdu = session.getnext(o).await?;
                if pdu.error_status != 0 && reply.error_status == 0 {
                    reply.error_status = pdu.error_status;
                    reply.error_index = pdu.error_index;
                }
                for (o, value) in pdu.varbinds {
                    reply.varbinds.push(VarBind::new(&o.to_string(), value.into()));
                }
            }
        }
    }
    Ok(reply)
}

#[async_trait]
impl SnmpTransport for Snmp2Transport {
    async fn send(&self, request: Request) -> Result<Reply, TransportError> {
        let oids = request
            .oids
            .iter()
            .map(|o| parse_oid(o))
            .collect::<Result<Vec<_>, _>>()?;
        let endpoint = request.target.endpoint();
        let session = self.session(&request.target).await?;

        let exchanged = timeout(
            self.request_timeout,
            exchange(&session, request.kind, &oids),
        )
        .await;
        match exchanged {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                self.forget(&request.target).await;
                Err(TransportError::Unreachable {
                    endpoint,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                self.forget(&request.target).await;
                tracing::debug!(endpoint = %endpoint, "SNMP request timed out, session dropped");
                Err(TransportError::Timeout {
                    endpoint,
                    timeout: self.request_timeout,
                })
            }
        }
    }
}
