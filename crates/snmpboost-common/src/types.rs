use serde::{Deserialize, Serialize};

/// Monitoring exit code returned to the host daemon, ordered by severity
/// except for `Unknown`, which ranks highest.
///
/// # Examples
///
/// ```
/// use snmpboost_common::types::ExitCode;
///
/// let code: ExitCode = "warning".parse().unwrap();
/// assert_eq!(code, ExitCode::Warning);
/// assert_eq!(code.as_i32(), 1);
/// assert_eq!(code.to_string(), "warning");
/// assert!(ExitCode::Unknown > ExitCode::Critical);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExitCode {
    Ok,
    Warning,
    Critical,
    #[default]
    Unknown,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        match self {
            ExitCode::Ok => 0,
            ExitCode::Warning => 1,
            ExitCode::Critical => 2,
            ExitCode::Unknown => 3,
        }
    }

    pub fn from_i32(code: i32) -> Option<Self> {
        match code {
            0 => Some(ExitCode::Ok),
            1 => Some(ExitCode::Warning),
            2 => Some(ExitCode::Critical),
            3 => Some(ExitCode::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitCode::Ok => write!(f, "ok"),
            ExitCode::Warning => write!(f, "warning"),
            ExitCode::Critical => write!(f, "critical"),
            ExitCode::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for ExitCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ok" | "0" => Ok(ExitCode::Ok),
            "warning" | "1" => Ok(ExitCode::Warning),
            "critical" | "2" => Ok(ExitCode::Critical),
            "unknown" | "3" => Ok(ExitCode::Unknown),
            _ => Err(format!("unknown exit code: {s}")),
        }
    }
}

/// Datasource type tag driving value computation.
///
/// # Examples
///
/// ```
/// use snmpboost_common::types::DsType;
///
/// let t: DsType = "derive64".parse().unwrap();
/// assert_eq!(t, DsType::Derive64);
/// assert_eq!(t.to_string(), "DERIVE64");
/// assert_eq!(DsType::Derive.wrap_limit(), Some(4_294_967_295));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DsType {
    Text,
    #[default]
    Gauge,
    Counter,
    Counter64,
    Derive,
    Derive64,
}

impl DsType {
    /// Counter width used by derive wraparound; `None` for types that never wrap.
    pub fn wrap_limit(self) -> Option<u128> {
        match self {
            DsType::Derive => Some(u32::MAX as u128),
            DsType::Derive64 => Some(u64::MAX as u128),
            _ => None,
        }
    }

    pub fn is_derive(self) -> bool {
        matches!(self, DsType::Derive | DsType::Derive64)
    }
}

impl std::fmt::Display for DsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DsType::Text => "TEXT",
            DsType::Gauge => "GAUGE",
            DsType::Counter => "COUNTER",
            DsType::Counter64 => "COUNTER64",
            DsType::Derive => "DERIVE",
            DsType::Derive64 => "DERIVE64",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DsType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TEXT" => Ok(DsType::Text),
            "GAUGE" => Ok(DsType::Gauge),
            "COUNTER" => Ok(DsType::Counter),
            "COUNTER64" => Ok(DsType::Counter64),
            "DERIVE" => Ok(DsType::Derive),
            "DERIVE64" => Ok(DsType::Derive64),
            _ => Err(format!("unknown datasource type: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SnmpVersion {
    #[serde(rename = "1")]
    V1,
    #[default]
    #[serde(rename = "2c")]
    V2c,
}

impl std::fmt::Display for SnmpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnmpVersion::V1 => write!(f, "1"),
            SnmpVersion::V2c => write!(f, "2c"),
        }
    }
}

impl std::str::FromStr for SnmpVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "v1" => Ok(SnmpVersion::V1),
            "2" | "2c" | "v2c" => Ok(SnmpVersion::V2c),
            _ => Err(format!("unsupported SNMP version: {s}")),
        }
    }
}

/// A computed metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    /// Numeric view used by triggers. Text values are parsed when possible.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(v) => Some(*v),
            MetricValue::Text(s) => s.trim().parse().ok(),
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Number(v) => write!(f, "{v:.2}"),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

/// A declared min/max bound: nothing, a literal, or an OID to fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    #[default]
    None,
    Literal(f64),
    Oid(String),
}

impl Bound {
    /// Parses a declaration string: numbers become literals, anything else an OID template.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() {
            return Bound::None;
        }
        match s.parse::<f64>() {
            Ok(v) => Bound::Literal(v),
            Err(_) => Bound::Oid(s.to_string()),
        }
    }

    pub fn oid(&self) -> Option<&str> {
        match self {
            Bound::Oid(oid) => Some(oid),
            _ => None,
        }
    }
}

/// Outcome of one check invocation as handed back to the host daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub exit_code: ExitCode,
    pub output: String,
    pub perf_data: String,
    /// Wall-clock seconds spent producing the result.
    pub execution_time: f64,
}

impl CheckResult {
    pub fn new(exit_code: ExitCode, output: impl Into<String>) -> Self {
        Self {
            exit_code,
            output: output.into(),
            perf_data: String::new(),
            execution_time: 0.0,
        }
    }

    pub fn unknown(output: impl Into<String>) -> Self {
        Self::new(ExitCode::Unknown, output)
    }

    pub fn with_perf_data(mut self, perf_data: impl Into<String>) -> Self {
        self.perf_data = perf_data.into();
        self
    }
}

impl std::fmt::Display for CheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.perf_data.is_empty() {
            f.write_str(&self.output)
        } else {
            write!(f, "{} | {}", self.output, self.perf_data)
        }
    }
}
