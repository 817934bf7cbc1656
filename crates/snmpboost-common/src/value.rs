//! Metric value engine: turns raw SNMP samples into reportable values.

use crate::rpn::{self, RpnError, Token};
use crate::types::{DsType, MetricValue};
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ValueError {
    /// A derive metric has no previous sample yet.
    #[error("Waiting an additional check to calculate derive")]
    NeedsMoreData,

    #[error("Time delta between samples is zero")]
    ZeroTimeDelta,

    #[error("No Data found")]
    NoData,

    #[error("Value '{0}' is not numeric")]
    NotNumeric(String),

    #[error("Calculation failed: {0}")]
    Calc(#[from] RpnError),
}

/// Everything needed to compute one metric value.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    pub ds_type: DsType,
    pub raw: Option<&'a str>,
    pub raw_previous: Option<&'a str>,
    pub check_time: Option<DateTime<Utc>>,
    pub check_time_previous: Option<DateTime<Utc>>,
    pub calc: &'a [Token],
}

fn parse_number(raw: &str) -> Result<f64, ValueError> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ValueError::NotNumeric(raw.to_string()))
}

/// Counter delta with wraparound at `limit`. Integral samples are handled in
/// integer arithmetic so 64-bit counters keep full precision.
fn counter_delta(raw: &str, previous: &str, limit: u128) -> Result<f64, ValueError> {
    if let (Ok(cur), Ok(prev)) = (raw.trim().parse::<u128>(), previous.trim().parse::<u128>()) {
        let delta = if cur < prev {
            limit.saturating_sub(prev) + cur
        } else {
            cur - prev
        };
        return Ok(delta as f64);
    }
    let cur = parse_number(raw)?;
    let prev = parse_number(previous)?;
    Ok(if cur < prev {
        (limit as f64 - prev) + cur
    } else {
        cur - prev
    })
}

/// Computes the value of one metric sample.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use snmpboost_common::types::{DsType, MetricValue};
/// use snmpboost_common::value::{compute_value, Sample};
///
/// let now = Utc::now();
/// let value = compute_value(&Sample {
///     ds_type: DsType::Derive,
///     raw: Some("10"),
///     raw_previous: Some("4294967290"),
///     check_time: Some(now),
///     check_time_previous: Some(now - Duration::seconds(60)),
///     calc: &[],
/// })
/// .unwrap();
/// assert_eq!(value, MetricValue::Number(0.25));
/// ```
pub fn compute_value(sample: &Sample<'_>) -> Result<MetricValue, ValueError> {
    let raw = sample.raw.ok_or(ValueError::NoData)?;

    let base = match sample.ds_type {
        DsType::Text => return Ok(MetricValue::Text(raw.to_string())),
        DsType::Gauge | DsType::Counter | DsType::Counter64 => parse_number(raw)?,
        DsType::Derive | DsType::Derive64 => {
            let previous = sample.raw_previous.ok_or(ValueError::NeedsMoreData)?;
            let (now, before) = match (sample.check_time, sample.check_time_previous) {
                (Some(now), Some(before)) => (now, before),
                _ => return Err(ValueError::NeedsMoreData),
            };
            let elapsed = (now - before).num_milliseconds() as f64 / 1000.0;
            if elapsed <= 0.0 {
                return Err(ValueError::ZeroTimeDelta);
            }
            let limit = sample.ds_type.wrap_limit().unwrap_or(u64::MAX as u128);
            counter_delta(raw, previous, limit)? / elapsed
        }
    };

    if sample.calc.is_empty() {
        return Ok(MetricValue::Number(base));
    }
    match rpn::apply_calc(base, sample.calc)? {
        Some(v) => Ok(MetricValue::Number(v)),
        None => Err(ValueError::NoData),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpn::parse_program;
    use chrono::Duration;

    fn sample<'a>(ds_type: DsType, raw: Option<&'a str>, prev: Option<&'a str>) -> Sample<'a> {
        let now = Utc::now();
        Sample {
            ds_type,
            raw,
            raw_previous: prev,
            check_time: Some(now),
            check_time_previous: Some(now - Duration::seconds(60)),
            calc: &[],
        }
    }

    #[test]
    fn gauge_is_numeric_raw() {
        let v = compute_value(&sample(DsType::Gauge, Some("12345"), None)).unwrap();
        assert_eq!(v, MetricValue::Number(12345.0));
    }

    #[test]
    fn text_is_passed_through() {
        let v = compute_value(&sample(DsType::Text, Some("router-1"), None)).unwrap();
        assert_eq!(v, MetricValue::Text("router-1".into()));
    }

    #[test]
    fn derive_without_previous_needs_more_data() {
        let err = compute_value(&sample(DsType::Derive, Some("10"), None)).unwrap_err();
        assert_eq!(err, ValueError::NeedsMoreData);
        assert_eq!(err.to_string(), "Waiting an additional check to calculate derive");
    }

    #[test]
    fn derive_plain_rate() {
        let v = compute_value(&sample(DsType::Derive, Some("700"), Some("100"))).unwrap();
        assert_eq!(v, MetricValue::Number(10.0));
    }

    #[test]
    fn derive_wraparound_32bit() {
        // (4294967295 - 4294967290) + 10 = 15 over 60 s
        let v = compute_value(&sample(DsType::Derive, Some("10"), Some("4294967290"))).unwrap();
        assert_eq!(v, MetricValue::Number(0.25));
    }

    #[test]
    fn derive64_wraparound_keeps_precision() {
        let prev = (u64::MAX - 50).to_string();
        let v = compute_value(&sample(DsType::Derive64, Some("70"), Some(&prev))).unwrap();
        assert_eq!(v, MetricValue::Number(2.0));
    }

    #[test]
    fn derive_zero_elapsed_fails() {
        let now = Utc::now();
        let s = Sample {
            check_time: Some(now),
            check_time_previous: Some(now),
            ..sample(DsType::Derive, Some("10"), Some("5"))
        };
        assert_eq!(compute_value(&s).unwrap_err(), ValueError::ZeroTimeDelta);
    }

    #[test]
    fn counter_does_not_wrap() {
        let v = compute_value(&sample(DsType::Counter, Some("10"), Some("4294967290"))).unwrap();
        assert_eq!(v, MetricValue::Number(10.0));
    }

    #[test]
    fn calc_is_applied_after_derive() {
        let calc = parse_program(&["8", "mul"]).unwrap();
        let s = Sample {
            calc: &calc,
            ..sample(DsType::Derive, Some("700"), Some("100"))
        };
        assert_eq!(compute_value(&s).unwrap(), MetricValue::Number(80.0));
    }

    #[test]
    fn missing_raw_is_no_data() {
        assert_eq!(
            compute_value(&sample(DsType::Gauge, None, None)).unwrap_err(),
            ValueError::NoData
        );
    }

    #[test]
    fn non_numeric_gauge_is_rejected() {
        assert!(matches!(
            compute_value(&sample(DsType::Gauge, Some("up"), None)),
            Err(ValueError::NotNumeric(_))
        ));
    }
}
