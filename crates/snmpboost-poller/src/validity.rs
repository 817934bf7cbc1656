//! Decides whether an elected check may answer from the cache.

use chrono::{DateTime, Duration, Utc};
use snmpboost_common::device::FrequencyGroup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// A group polled this recently is never polled again, even when forced.
    pub fresh_window: Duration,
    /// Slack added to "now" before comparing against the next due time.
    pub grace: Duration,
    /// Seconds per interval unit.
    pub interval_length: u32,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            fresh_window: Duration::seconds(20),
            grace: Duration::seconds(5),
            interval_length: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Fresh(FreshReason),
    Stale(StaleReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshReason {
    JustPolled,
    InFlight,
    NotDue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    Forced,
    MappingPending,
    NeverPolled,
    Due,
}

impl Validity {
    pub fn is_fresh(self) -> bool {
        matches!(self, Validity::Fresh(_))
    }
}

/// Rules are applied in order; the first that matches wins.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, Utc};
/// use snmpboost_common::device::FrequencyGroup;
/// use snmpboost_poller::validity::{decide, CacheSettings, FreshReason, StaleReason, Validity};
///
/// let now = Utc::now();
/// let mut group = FrequencyGroup::new(5);
/// assert_eq!(decide(&group, now, &CacheSettings::default()), Validity::Stale(StaleReason::NeverPolled));
///
/// group.check_time = Some(now - Duration::seconds(10));
/// group.forced = true;
/// assert_eq!(decide(&group, now, &CacheSettings::default()), Validity::Fresh(FreshReason::JustPolled));
/// ```
pub fn decide(group: &FrequencyGroup, now: DateTime<Utc>, settings: &CacheSettings) -> Validity {
    // The fresh window outranks every stale rule: a service registered with
    // a pending mapping right after a poll waits out the window before its
    // table is walked.
    if group
        .check_time
        .is_some_and(|t| now - t < settings.fresh_window)
    {
        return Validity::Fresh(FreshReason::JustPolled);
    }
    if group.forced {
        return Validity::Stale(StaleReason::Forced);
    }
    if group.has_pending_mapping() {
        return Validity::Stale(StaleReason::MappingPending);
    }
    let Some(check_time) = group.check_time else {
        return Validity::Stale(StaleReason::NeverPolled);
    };
    if group.checking {
        return Validity::Fresh(FreshReason::InFlight);
    }
    let period = Duration::seconds(i64::from(group.interval) * i64::from(settings.interval_length));
    if check_time + period > now + settings.grace {
        Validity::Fresh(FreshReason::NotDue)
    } else {
        Validity::Stale(StaleReason::Due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snmpboost_common::device::{Service, ServiceKey};

    fn polled(seconds_ago: i64, now: DateTime<Utc>) -> FrequencyGroup {
        let mut group = FrequencyGroup::new(5);
        group.check_time = Some(now - Duration::seconds(seconds_ago));
        group
    }

    #[test]
    fn due_after_interval_minus_grace() {
        let now = Utc::now();
        let settings = CacheSettings::default();
        assert_eq!(decide(&polled(200, now), now, &settings), Validity::Fresh(FreshReason::NotDue));
        assert_eq!(decide(&polled(295, now), now, &settings), Validity::Stale(StaleReason::Due));
        assert_eq!(decide(&polled(400, now), now, &settings), Validity::Stale(StaleReason::Due));
    }

    #[test]
    fn checking_flag_serves_cache() {
        let now = Utc::now();
        let mut group = polled(400, now);
        group.checking = true;
        assert_eq!(decide(&group, now, &CacheSettings::default()), Validity::Fresh(FreshReason::InFlight));
    }

    #[test]
    fn forced_and_pending_beat_checking() {
        let now = Utc::now();
        let mut group = polled(100, now);
        group.checking = true;
        group.forced = true;
        assert_eq!(decide(&group, now, &CacheSettings::default()), Validity::Stale(StaleReason::Forced));

        group.forced = false;
        let key = ServiceKey::new("interface", Some("map(ifTable,eth0)"), Some("eth0"));
        group.services.insert(key.id(), Service::new(key, "if-eth0"));
        assert_eq!(
            decide(&group, now, &CacheSettings::default()),
            Validity::Stale(StaleReason::MappingPending)
        );
    }

    #[test]
    fn fresh_window_wins_over_everything() {
        let now = Utc::now();
        let mut group = polled(5, now);
        group.forced = true;
        let key = ServiceKey::new("interface", Some("map(ifTable,eth0)"), Some("eth0"));
        group.services.insert(key.id(), Service::new(key, "if-eth0"));
        assert!(decide(&group, now, &CacheSettings::default()).is_fresh());
    }

    #[test]
    fn new_pending_service_waits_out_fresh_window() {
        let now = Utc::now();
        let settings = CacheSettings::default();
        let key = ServiceKey::new("interface", Some("map(ifTable,eth1)"), Some("eth1"));
        let mut group = polled(10, now);
        group.services.insert(key.id(), Service::new(key, "if-eth1"));
        assert_eq!(decide(&group, now, &settings), Validity::Fresh(FreshReason::JustPolled));

        let later = now + settings.fresh_window;
        assert_eq!(decide(&group, later, &settings), Validity::Stale(StaleReason::MappingPending));
    }
}
