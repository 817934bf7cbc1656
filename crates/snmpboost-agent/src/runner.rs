//! Tick loop: elects one live check per device and interval, runs due
//! checks and tracks their HARD/SOFT state.

use chrono::{DateTime, Duration, Utc};
use snmpboost_common::types::{CheckResult, ExitCode};
use snmpboost_poller::check::{CheckInvocation, Poller};
use snmpboost_scheduler::{Elector, PendingCheck, SpreadMode, StateType};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct ScheduledCheck {
    pub invocation: CheckInvocation,
    pub check_interval: u32,
    pub retry_interval: u32,
    pub max_check_attempts: u32,
    pub state_type: StateType,
    /// Consecutive non-OK results.
    pub attempts: u32,
    pub next_run: DateTime<Utc>,
    pub last_result: Option<CheckResult>,
}

impl ScheduledCheck {
    pub fn new(
        invocation: CheckInvocation,
        check_interval: u32,
        retry_interval: u32,
        max_check_attempts: u32,
        next_run: DateTime<Utc>,
    ) -> Self {
        Self {
            invocation,
            check_interval,
            retry_interval,
            max_check_attempts,
            state_type: StateType::Hard,
            attempts: 0,
            next_run,
            last_result: None,
        }
    }

    pub fn id(&self) -> String {
        format!("{}/{}", self.invocation.host, self.invocation.service)
    }

    fn pending(&self, interval_length: u32) -> PendingCheck {
        PendingCheck {
            id: self.id(),
            host: self.invocation.host.clone(),
            check_interval: self.check_interval,
            retry_interval: self.retry_interval,
            state_type: self.state_type,
            interval_length,
            next_run: self.next_run,
            live: false,
        }
    }

    /// OK resets to HARD. Problems stay SOFT until `max_check_attempts`
    /// consecutive non-OK results.
    pub fn record(&mut self, exit_code: ExitCode) {
        if exit_code == ExitCode::Ok {
            self.attempts = 0;
            self.state_type = StateType::Hard;
            return;
        }
        self.attempts = self.attempts.saturating_add(1);
        self.state_type = if self.attempts >= self.max_check_attempts {
            StateType::Hard
        } else {
            StateType::Soft
        };
    }

    /// Next run one period after `slot`, never in the past.
    pub fn reschedule(&mut self, slot: DateTime<Utc>, now: DateTime<Utc>, interval_length: u32) {
        let units = match self.state_type {
            StateType::Hard => self.check_interval,
            StateType::Soft => self.retry_interval,
        };
        let period = Duration::seconds(i64::from(units) * i64::from(interval_length));
        let next = slot + period;
        self.next_run = if next <= now { now + period } else { next };
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickSummary {
    pub due: usize,
    pub live: usize,
    pub cached: usize,
    /// Checks that could not reach the device cache.
    pub failed: usize,
}

pub struct Runner {
    poller: Arc<Poller>,
    elector: Elector,
    checks: Vec<ScheduledCheck>,
    semaphore: Arc<Semaphore>,
    interval_length: u32,
    idle_after: Duration,
}

impl Runner {
    pub fn new(
        poller: Arc<Poller>,
        checks: Vec<ScheduledCheck>,
        spread: SpreadMode,
        max_concurrent: usize,
        interval_length: u32,
    ) -> Self {
        let longest = checks
            .iter()
            .map(|c| c.check_interval.max(c.retry_interval))
            .max()
            .unwrap_or(1);
        Self {
            poller,
            elector: Elector::new(spread),
            checks,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            interval_length,
            idle_after: Duration::seconds(2 * i64::from(longest) * i64::from(interval_length)),
        }
    }

    pub fn checks(&self) -> &[ScheduledCheck] {
        &self.checks
    }

    /// Writes every configured service into the cache. Services with a bad
    /// declaration are skipped; losing the cache aborts.
    pub async fn register_all(&self) -> anyhow::Result<usize> {
        let mut registered = 0;
        for check in &self.checks {
            match self.poller.register(&check.invocation, check.check_interval).await {
                Ok(()) => registered += 1,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => tracing::warn!(
                    host = %check.invocation.host,
                    service = %check.invocation.service,
                    error = %e,
                    "Service not registered"
                ),
            }
        }
        tracing::info!(registered, total = self.checks.len(), "Services registered");
        Ok(registered)
    }

    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickSummary {
        let due: Vec<usize> = (0..self.checks.len())
            .filter(|&i| self.checks[i].next_run <= now)
            .collect();
        let mut summary = TickSummary {
            due: due.len(),
            ..TickSummary::default()
        };
        if due.is_empty() {
            return summary;
        }

        let mut pending: Vec<PendingCheck> = due
            .iter()
            .map(|&i| self.checks[i].pending(self.interval_length))
            .collect();
        self.elector.elect(&mut pending);

        // Elected checks first, so their duplicates read what they wrote.
        let (live, cached): (Vec<_>, Vec<_>) = due.into_iter().zip(pending).partition(|(_, p)| p.live);
        summary.live = live.len();
        summary.cached = cached.len();
        self.run_batch(live, now, &mut summary).await;
        self.run_batch(cached, now, &mut summary).await;

        let forgotten = self.elector.forget_idle(now - self.idle_after);
        if forgotten > 0 {
            tracing::debug!(forgotten, "Idle election groups dropped");
        }
        summary
    }

    async fn run_batch(&mut self, batch: Vec<(usize, PendingCheck)>, now: DateTime<Utc>, summary: &mut TickSummary) {
        let mut tasks = JoinSet::new();
        for (idx, pending) in batch {
            let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
                break;
            };
            let poller = self.poller.clone();
            let mut invocation = self.checks[idx].invocation.clone();
            invocation.live = pending.live;
            tasks.spawn(async move {
                let _permit = permit;
                let result = poller.check(&invocation).await;
                (idx, pending, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (idx, pending, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(error = %e, "Check task failed");
                    continue;
                }
            };
            let check = &mut self.checks[idx];
            match result {
                Ok(result) => {
                    check.record(result.exit_code);
                    tracing::info!(
                        host = %check.invocation.host,
                        service = %check.invocation.service,
                        live = pending.live,
                        exit_code = %result.exit_code,
                        state_type = %check.state_type,
                        attempts = check.attempts,
                        execution_time = result.execution_time,
                        "{result}"
                    );
                    check.last_result = Some(result);
                }
                Err(e) => {
                    check.record(ExitCode::Unknown);
                    summary.failed += 1;
                    tracing::error!(
                        host = %check.invocation.host,
                        service = %check.invocation.service,
                        error = %e,
                        "Check failed"
                    );
                }
            }
            check.reschedule(pending.next_run, now, self.interval_length);
        }
    }
}
