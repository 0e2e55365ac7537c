//! Cron-style schedule triggers.
//!
//! Only the expressions the editor's presets produce are understood:
//! `* * * * *`, `*/N * * * *`, `M * * * *` and `M H * * *`, evaluated in
//! UTC. Anything else yields no fire time and the trigger stays inert.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Duration as TimeDelta, NaiveDate, Timelike, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use db::models::RuntimeUpdate;
use db::Store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CronSpec {
    EveryMinute,
    EveryNMinutes(u32),
    HourlyAt { minute: u32 },
    DailyAt { hour: u32, minute: u32 },
}

fn parse_cron(expr: &str) -> Option<CronSpec> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    let [minute, hour, dom, month, dow] = fields.as_slice() else {
        return None;
    };
    if [dom, month, dow].iter().any(|f| **f != "*") {
        return None;
    }

    let number = |s: &str, max: u32| s.parse::<u32>().ok().filter(|n| *n <= max);

    match (*minute, *hour) {
        ("*", "*") => Some(CronSpec::EveryMinute),
        (m, "*") if m.starts_with("*/") => number(&m[2..], 59)
            .filter(|n| *n > 0)
            .map(CronSpec::EveryNMinutes),
        (m, "*") => number(m, 59).map(|minute| CronSpec::HourlyAt { minute }),
        (m, h) => Some(CronSpec::DailyAt {
            hour: number(h, 23)?,
            minute: number(m, 59)?,
        }),
    }
}

fn at(date: NaiveDate, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    date.and_hms_opt(hour, minute, 0).map(|dt| dt.and_utc())
}

/// First fire time strictly after `from`, on a whole minute.
pub fn compute_next_fire_time(cron: &str, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let spec = parse_cron(cron)?;
    let start = at(from.date_naive(), from.hour(), from.minute())? + TimeDelta::minutes(1);

    match spec {
        CronSpec::EveryMinute => Some(start),
        CronSpec::EveryNMinutes(n) => {
            let wait = (n - start.minute() % n) % n;
            Some(start + TimeDelta::minutes(i64::from(wait)))
        }
        CronSpec::HourlyAt { minute } => {
            let candidate = at(start.date_naive(), start.hour(), minute)?;
            Some(if candidate < start {
                candidate + TimeDelta::hours(1)
            } else {
                candidate
            })
        }
        CronSpec::DailyAt { hour, minute } => {
            let candidate = at(start.date_naive(), hour, minute)?;
            Some(if candidate < start {
                candidate + TimeDelta::days(1)
            } else {
                candidate
            })
        }
    }
}

/// The next `count` fire times after `from`, each computed from the previous.
pub fn upcoming_fire_times(cron: &str, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
    let mut out = Vec::with_capacity(count);
    let mut basis = from;
    while out.len() < count {
        match compute_next_fire_time(cron, basis) {
            Some(next) => {
                out.push(next);
                basis = next;
            }
            None => break,
        }
    }
    out
}

/// Owns one timer task per armed workflow.
pub struct Scheduler {
    handles: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    max_timer_delay: Duration,
}

impl Scheduler {
    pub fn new(max_timer_delay: Duration) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            max_timer_delay,
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm `workflow_id`, replacing any timer it already had. Returns false
    /// (and arms nothing) when the expression never fires.
    pub fn arm<F, Fut>(&self, workflow_id: Uuid, cron: &str, store: Arc<dyn Store>, on_fire: F) -> bool
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if compute_next_fire_time(cron, Utc::now()).is_none() {
            return false;
        }

        let cron = cron.to_owned();
        let max_delay = self.max_timer_delay;
        let handle = tokio::spawn(async move {
            let mut from = Utc::now();
            while let Some(next) = compute_next_fire_time(&cron, from) {
                if let Err(e) = store
                    .update_workflow_runtime(workflow_id, RuntimeUpdate::next_run(next))
                    .await
                {
                    warn!(%workflow_id, error = %e, "failed to persist next run time");
                }
                debug!(%workflow_id, next = %next, "schedule armed");

                sleep_until(next, max_delay).await;

                info!(%workflow_id, cron = %cron, "schedule fired");
                tokio::spawn(on_fire());
                // Re-arm from the planned time, not from now.
                from = next;
            }
        });

        if let Some(previous) = self.handles().insert(workflow_id, handle) {
            previous.abort();
        }
        true
    }

    /// Cancel the timer of `workflow_id`. Idempotent.
    pub fn disarm(&self, workflow_id: Uuid) -> bool {
        match self.handles().remove(&workflow_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, workflow_id: Uuid) -> bool {
        self.handles()
            .get(&workflow_id)
            .is_some_and(|h| !h.is_finished())
    }

    pub fn disarm_all(&self) {
        for (_, handle) in self.handles().drain() {
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.disarm_all();
    }
}

/// Sleep until wall-clock `target` in steps no longer than `max_step`.
async fn sleep_until(target: DateTime<Utc>, max_step: Duration) {
    let remaining = (target - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let deadline = Instant::now() + remaining;
    loop {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        tokio::time::sleep((deadline - now).min(max_step)).await;
    }
}
