use crate::election::{Elector, GroupKey, PendingCheck, SpreadMode, StateType};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

fn make_check(id: &str, host: &str, offset_secs: i64) -> PendingCheck {
    PendingCheck {
        id: id.to_string(),
        host: host.to_string(),
        check_interval: 5,
        retry_interval: 1,
        state_type: StateType::Hard,
        interval_length: 60,
        next_run: t0() + Duration::seconds(offset_secs),
        live: false,
    }
}

fn live_ids(checks: &[PendingCheck]) -> Vec<&str> {
    checks.iter().filter(|c| c.live).map(|c| c.id.as_str()).collect()
}

#[test]
fn exactly_one_live_check_per_group_and_period() {
    let mut elector = Elector::new(SpreadMode::Off);
    let mut checks: Vec<PendingCheck> = (0..10)
        .map(|i| make_check(&format!("svc-{i}"), "router-1", 290 - i * 29))
        .collect();

    let summary = elector.elect(&mut checks);
    assert_eq!(summary.elected, 1);
    assert_eq!(summary.deelected, 9);
    // The earliest scheduled check wins.
    assert_eq!(live_ids(&checks), vec!["svc-9"]);
}

#[test]
fn groups_are_independent() {
    let mut elector = Elector::new(SpreadMode::Off);
    let mut checks = vec![
        make_check("a", "router-1", 0),
        make_check("b", "router-1", 1),
        make_check("c", "switch-1", 2),
        make_check("d", "switch-1", 3),
    ];
    elector.elect(&mut checks);
    assert_eq!(live_ids(&checks), vec!["a", "c"]);
    assert_eq!(elector.len(), 2);
}

#[test]
fn soft_state_uses_retry_interval() {
    let mut elector = Elector::new(SpreadMode::Off);
    let hard = make_check("hard", "router-1", 0);
    let mut soft = make_check("soft", "router-1", 1);
    soft.state_type = StateType::Soft;
    assert_eq!(soft.effective_interval(), 1);
    assert_eq!(soft.period(), Duration::seconds(60));

    let mut checks = vec![hard, soft];
    elector.elect(&mut checks);
    // Different effective intervals form different groups.
    assert_eq!(live_ids(&checks), vec!["hard", "soft"]);
}

#[test]
fn reelection_of_the_same_check_is_idempotent() {
    let mut elector = Elector::new(SpreadMode::Off);
    let mut checks = vec![make_check("a", "router-1", 0), make_check("b", "router-1", 10)];
    elector.elect(&mut checks);
    let summary = elector.elect(&mut checks);
    assert_eq!(summary.reconfirmed, 1);
    assert_eq!(summary.deelected, 1);
    assert_eq!(live_ids(&checks), vec!["a"]);
}

#[test]
fn next_period_elects_again_and_aligns_to_slot() {
    let mut elector = Elector::new(SpreadMode::Aligned);
    let mut first = vec![make_check("a", "router-1", 0), make_check("b", "router-1", 30)];
    elector.elect(&mut first);
    assert_eq!(live_ids(&first), vec!["a"]);

    // One period later "b" comes due slightly late and takes the slot.
    let mut second = vec![make_check("b", "router-1", 312)];
    let summary = elector.elect(&mut second);
    assert_eq!(summary.elected, 1);
    assert!(second[0].live);
    assert_eq!(second[0].next_run, t0() + Duration::seconds(300));
    let key = GroupKey {
        host: "router-1".into(),
        interval: 5,
    };
    assert_eq!(elector.elected(&key), Some("b"));
}

#[test]
fn idle_gap_restarts_slots() {
    let mut elector = Elector::new(SpreadMode::Aligned);
    elector.elect(&mut [make_check("a", "router-1", 0)]);
    let mut late = [make_check("a", "router-1", 3600)];
    elector.elect(&mut late);
    assert!(late[0].live);
    assert_eq!(late[0].next_run, t0() + Duration::seconds(3600));
}

#[test]
fn staggered_offset_is_sub_second_and_stable() {
    let mut one = Elector::new(SpreadMode::Staggered);
    let mut two = Elector::new(SpreadMode::Staggered);
    let mut a = [make_check("a", "router-1", 0)];
    let mut b = [make_check("a", "router-1", 0)];
    one.elect(&mut a);
    two.elect(&mut b);
    let shift = a[0].next_run - t0();
    assert!(shift >= Duration::zero() && shift < Duration::seconds(1));
    assert_eq!(a[0].next_run, b[0].next_run);
}

#[test]
fn off_mode_keeps_schedule() {
    let mut elector = Elector::new(SpreadMode::Off);
    elector.elect(&mut [make_check("a", "router-1", 0)]);
    let mut next = [make_check("b", "router-1", 312)];
    elector.elect(&mut next);
    assert!(next[0].live);
    assert_eq!(next[0].next_run, t0() + Duration::seconds(312));
}

#[test]
fn forget_idle_drops_old_groups() {
    let mut elector = Elector::new(SpreadMode::Off);
    elector.elect(&mut [make_check("a", "router-1", 0), make_check("c", "switch-1", 600)]);
    assert_eq!(elector.forget_idle(t0() + Duration::seconds(60)), 1);
    assert_eq!(elector.len(), 1);
    assert!(elector
        .elected(&GroupKey {
            host: "router-1".into(),
            interval: 5
        })
        .is_none());
}

#[test]
fn state_type_parses_case_insensitively() {
    assert_eq!("soft".parse::<StateType>(), Ok(StateType::Soft));
    assert_eq!(StateType::Hard.to_string(), "HARD");
    assert!("firm".parse::<StateType>().is_err());
}
