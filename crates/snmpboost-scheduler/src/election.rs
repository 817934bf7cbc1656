use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Stability of the service owning a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum StateType {
    #[default]
    Hard,
    Soft,
}

impl std::fmt::Display for StateType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateType::Hard => write!(f, "HARD"),
            StateType::Soft => write!(f, "SOFT"),
        }
    }
}

impl std::str::FromStr for StateType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "HARD" => Ok(StateType::Hard),
            "SOFT" => Ok(StateType::Soft),
            _ => Err(format!("unknown state type: {s}")),
        }
    }
}

/// A check waiting for its next run.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCheck {
    pub id: String,
    pub host: String,
    /// Interval units between checks in HARD state.
    pub check_interval: u32,
    /// Interval units between checks in SOFT state.
    pub retry_interval: u32,
    pub state_type: StateType,
    /// Seconds per interval unit.
    pub interval_length: u32,
    pub next_run: DateTime<Utc>,
    /// Set by [`Elector::elect`]: whether this check polls the device.
    pub live: bool,
}

impl PendingCheck {
    pub fn effective_interval(&self) -> u32 {
        match self.state_type {
            StateType::Hard => self.check_interval,
            StateType::Soft => self.retry_interval,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::seconds(i64::from(self.effective_interval()) * i64::from(self.interval_length))
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            host: self.host.clone(),
            interval: self.effective_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub host: String,
    pub interval: u32,
}

impl GroupKey {
    /// Stable sub-second offset for this key (FNV-1a over host and interval).
    fn offset(&self) -> Duration {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in self.host.bytes().chain(self.interval.to_be_bytes()) {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        Duration::milliseconds((hash % 1000) as i64)
    }
}

/// How elected checks are rescheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SpreadMode {
    /// Leave the elected check's schedule untouched.
    Off,
    /// Move the elected check onto its group's period slot.
    #[default]
    Aligned,
    /// As `Aligned`, with the first slot shifted by a per-group sub-second
    /// offset so groups do not all fire on the same boundary.
    Staggered,
}

#[derive(Debug, Clone)]
struct GroupState {
    last_elected: DateTime<Utc>,
    elected_id: String,
}

fn place(spread: SpreadMode, check: &mut PendingCheck, slot: DateTime<Utc>) {
    check.live = true;
    if spread != SpreadMode::Off {
        check.next_run = slot;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ElectionSummary {
    pub elected: usize,
    pub reconfirmed: usize,
    pub deelected: usize,
}

/// Remembers, per (host, effective interval), when and which check was last
/// elected.
#[derive(Debug, Default)]
pub struct Elector {
    groups: HashMap<GroupKey, GroupState>,
    spread: SpreadMode,
}

impl Elector {
    pub fn new(spread: SpreadMode) -> Self {
        Self {
            groups: HashMap::new(),
            spread,
        }
    }

    /// Marks checks live or cache-only, in order of their next run.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use snmpboost_scheduler::{Elector, PendingCheck, SpreadMode, StateType};
    ///
    /// let now = Utc::now();
    /// let mut checks: Vec<PendingCheck> = (0..3)
    ///     .map(|i| PendingCheck {
    ///         id: format!("svc-{i}"),
    ///         host: "router-1".into(),
    ///         check_interval: 5,
    ///         retry_interval: 1,
    ///         state_type: StateType::Hard,
    ///         interval_length: 60,
    ///         next_run: now + Duration::seconds(i),
    ///         live: false,
    ///     })
    ///     .collect();
    ///
    /// let summary = Elector::new(SpreadMode::Off).elect(&mut checks);
    /// assert_eq!(summary.elected, 1);
    /// assert_eq!(checks.iter().filter(|c| c.live).count(), 1);
    /// ```
    pub fn elect(&mut self, checks: &mut [PendingCheck]) -> ElectionSummary {
        let mut order: Vec<usize> = (0..checks.len()).collect();
        order.sort_by_key(|&i| checks[i].next_run);

        let mut summary = ElectionSummary::default();
        for i in order {
            let check = &mut checks[i];
            let key = check.group_key();
            let period = check.period();

            match self.groups.get_mut(&key) {
                Some(state) if state.last_elected + period > check.next_run => {
                    if state.elected_id == check.id {
                        check.live = true;
                        summary.reconfirmed += 1;
                    } else {
                        check.live = false;
                        summary.deelected += 1;
                    }
                }
                Some(state) => {
                    let mut slot = state.last_elected + period;
                    // After an idle gap, restart the slots from this check.
                    if slot + period <= check.next_run {
                        slot = check.next_run;
                    }
                    state.last_elected = slot;
                    state.elected_id = check.id.clone();
                    place(self.spread, check, slot);
                    summary.elected += 1;
                }
                None => {
                    let slot = match self.spread {
                        SpreadMode::Staggered => check.next_run + key.offset(),
                        SpreadMode::Off | SpreadMode::Aligned => check.next_run,
                    };
                    self.groups.insert(
                        key,
                        GroupState {
                            last_elected: slot,
                            elected_id: check.id.clone(),
                        },
                    );
                    place(self.spread, check, slot);
                    summary.elected += 1;
                }
            }
        }
        tracing::debug!(
            elected = summary.elected,
            reconfirmed = summary.reconfirmed,
            deelected = summary.deelected,
            "Election done"
        );
        summary
    }

    /// Drops groups not elected since `before`. Returns how many were removed.
    pub fn forget_idle(&mut self, before: DateTime<Utc>) -> usize {
        let len = self.groups.len();
        self.groups.retain(|_, state| state.last_elected >= before);
        len - self.groups.len()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Id of the check currently elected for `key`.
    pub fn elected(&self, key: &GroupKey) -> Option<&str> {
        self.groups.get(key).map(|s| s.elected_id.as_str())
    }
}
