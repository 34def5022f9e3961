//! Due-ness of recurring actions, the hourly action ceiling, and the polling loop.
//!
//! - Weekly thread: configured weekday + time window, at most once per 7 days
//! - Milestone: minimum interval between posts
//! - Global ceiling on confirmed actions in the trailing 60 minutes
//!
//! All time math is UTC.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{config::Config, dispatcher::Dispatcher, domain::ActionKind, utils::chrono_duration};

const RATE_WINDOW: Duration = Duration::from_secs(3600);
const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

/// Last successful run per action kind.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ScheduleState {
    #[serde(default)]
    pub last_run: BTreeMap<ActionKind, DateTime<Utc>>,
}

impl ScheduleState {
    pub fn last_run(&self, kind: ActionKind) -> Option<DateTime<Utc>> {
        self.last_run.get(&kind).copied()
    }

    pub fn mark_run(&mut self, kind: ActionKind, at: DateTime<Utc>) {
        self.last_run.insert(kind, at);
    }
}

/// Timestamps of confirmed actions in the trailing hour.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RateWindow {
    #[serde(default)]
    pub actions: Vec<DateTime<Utc>>,
}

impl RateWindow {
    /// Number of actions with `now - t < 60 min`.
    pub fn count(&self, now: DateTime<Utc>) -> usize {
        let window = chrono_duration(RATE_WINDOW);
        self.actions
            .iter()
            .filter(|t| now.signed_duration_since(**t) < window)
            .count()
    }

    pub fn allow(&self, now: DateTime<Utc>, ceiling: u32) -> bool {
        self.count(now) < ceiling as usize
    }

    /// Record a confirmed action and drop entries that aged out.
    pub fn record(&mut self, now: DateTime<Utc>) {
        let window = chrono_duration(RATE_WINDOW);
        self.actions.retain(|t| now.signed_duration_since(*t) < window);
        self.actions.push(now);
    }
}

/// Scheduling policy derived from [`Config`].
#[derive(Clone, Debug)]
pub struct Scheduler {
    pub weekly_enabled: bool,
    pub weekly_day: Weekday,
    pub weekly_time: NaiveTime,
    pub weekly_window: Duration,
    pub welcome_enabled: bool,
    pub milestone_enabled: bool,
    pub milestone_min_interval: Duration,
    pub max_actions_per_hour: u32,
}

impl Scheduler {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            weekly_enabled: cfg.weekly_enabled,
            weekly_day: cfg.weekly_day,
            weekly_time: cfg.weekly_time,
            weekly_window: cfg.weekly_window,
            welcome_enabled: cfg.welcome_enabled,
            milestone_enabled: cfg.milestone_enabled,
            milestone_min_interval: cfg.milestone_min_interval,
            max_actions_per_hour: cfg.max_actions_per_hour,
        }
    }

    pub fn is_due(&self, kind: ActionKind, now: DateTime<Utc>, schedule: &ScheduleState) -> bool {
        match kind {
            ActionKind::WeeklyThread => {
                self.weekly_enabled
                    && self.in_weekly_window(now)
                    && elapsed_at_least(schedule.last_run(kind), now, WEEK)
            }
            ActionKind::Milestone => {
                self.milestone_enabled
                    && elapsed_at_least(schedule.last_run(kind), now, self.milestone_min_interval)
            }
            ActionKind::Welcome => self.welcome_enabled,
        }
    }

    pub fn allow(&self, now: DateTime<Utc>, window: &RateWindow) -> bool {
        window.allow(now, self.max_actions_per_hour)
    }

    fn in_weekly_window(&self, now: DateTime<Utc>) -> bool {
        if now.weekday() != self.weekly_day {
            return false;
        }
        let start = now.date_naive().and_time(self.weekly_time).and_utc();
        let end = start + chrono_duration(self.weekly_window);
        now >= start && now < end
    }
}

fn elapsed_at_least(last: Option<DateTime<Utc>>, now: DateTime<Utc>, min: Duration) -> bool {
    match last {
        None => true,
        Some(t) => now.signed_duration_since(t) >= chrono_duration(min),
    }
}

/// Cooperative polling loop: one tick per `interval` until cancelled.
///
/// Ticks never overlap; a slow tick delays the next one.
pub async fn run_polling(
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    monitor_posts: bool,
    cancel: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tracing::info!(interval_secs = interval.as_secs(), "scheduler started");

    loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = tick.tick() => {
            let now = Utc::now();
            let report = dispatcher.tick(now).await;
            if report.failed > 0 {
                tracing::warn!(
                    recorded = report.recorded,
                    failed = report.failed,
                    "tick finished with failures"
                );
            }

            if monitor_posts {
                match dispatcher.monitor(now).await {
                    Ok(m) if m.welcomed > 0 || m.failed > 0 => {
                        tracing::info!(
                            scanned = m.scanned,
                            welcomed = m.welcomed,
                            failed = m.failed,
                            keyword_hits = m.keyword_hits,
                            "monitor pass"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::warn!(error = %e, "monitor pass failed"),
                }
            }
          }
        }
    }

    tracing::info!("scheduler stopped");
}
