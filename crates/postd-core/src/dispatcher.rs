//! Due check, rate check, external post and record, per action kind.
//!
//! The store lock is held from the due check until the record is persisted,
//! so two overlapping invocations cannot both post the same weekly thread.
//! Nothing is persisted when the external call fails; the action stays due.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    analytics::{AnalyticsStore, StoreData},
    config::Config,
    content::{self, MILESTONE_FLAIR, WEEKLY_FLAIR},
    domain::{ActionKind, MilestoneData, PostRecord, Submission},
    errors::Error,
    platform::SocialPlatform,
    scheduler::Scheduler,
    utils::chrono_duration,
    Result,
};

const MONITOR_BATCH: usize = 25;

#[derive(Clone, Debug)]
pub enum ActionRequest {
    WeeklyThread,
    Milestone(MilestoneData),
    /// Welcome the author of this submission.
    Welcome(Submission),
}

impl ActionRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            ActionRequest::WeeklyThread => ActionKind::WeeklyThread,
            ActionRequest::Milestone(_) => ActionKind::Milestone,
            ActionRequest::Welcome(_) => ActionKind::Welcome,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Recorded(PostRecord),
    NotDue,
    RateLimited,
}

impl Outcome {
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Recorded(_) => "recorded",
            Outcome::NotDue => "not_due",
            Outcome::RateLimited => "rate_limited",
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub recorded: usize,
    pub not_due: usize,
    pub rate_limited: usize,
    pub failed: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MonitorReport {
    pub scanned: usize,
    pub welcomed: usize,
    pub skipped: usize,
    pub rate_limited: usize,
    pub failed: usize,
    pub keyword_hits: usize,
}

pub struct Dispatcher {
    cfg: Arc<Config>,
    scheduler: Scheduler,
    platform: Arc<dyn SocialPlatform>,
    store: Arc<AnalyticsStore>,
}

impl Dispatcher {
    pub fn new(
        cfg: Arc<Config>,
        platform: Arc<dyn SocialPlatform>,
        store: Arc<AnalyticsStore>,
    ) -> Self {
        let scheduler = Scheduler::from_config(&cfg);
        Self {
            cfg,
            scheduler,
            platform,
            store,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<AnalyticsStore> {
        &self.store
    }

    pub async fn dispatch(&self, req: ActionRequest, now: DateTime<Utc>) -> Result<Outcome> {
        let kind = req.kind();
        let mut guard = self.store.lock().await?;

        if !self.scheduler.is_due(kind, now, &guard.data.schedule) {
            tracing::debug!(kind = %kind, "not due");
            return Ok(Outcome::NotDue);
        }

        if let ActionRequest::Welcome(sub) = &req {
            if let Some(reason) = self.welcome_skip(sub, now, &guard.data) {
                tracing::debug!(post = %sub.id, reason, "welcome skipped");
                return Ok(Outcome::NotDue);
            }
            let hour_ago = now - chrono::Duration::hours(1);
            let sent = guard.data.since(ActionKind::Welcome, hour_ago).count();
            if sent >= self.cfg.welcome_max_per_hour as usize {
                tracing::info!(sent, cap = self.cfg.welcome_max_per_hour, "welcome cap reached");
                return Ok(Outcome::RateLimited);
            }
        }

        if !self.scheduler.allow(now, &guard.data.rate_window) {
            tracing::warn!(
                kind = %kind,
                ceiling = self.scheduler.max_actions_per_hour,
                "hourly action ceiling reached"
            );
            return Ok(Outcome::RateLimited);
        }

        let record = match tokio::time::timeout(self.cfg.post_timeout, self.post(&req, now)).await
        {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                tracing::warn!(kind = %kind, error = %e, "post failed");
                return Err(e);
            }
            Err(_) => {
                tracing::warn!(kind = %kind, "post timed out");
                return Err(Error::RemoteUnavailable(format!(
                    "{kind} post timed out after {:?}",
                    self.cfg.post_timeout
                )));
            }
        };

        guard.data.schedule.mark_run(kind, now);
        guard.data.rate_window.record(now);
        guard.data.push_record(record.clone());
        guard.commit()?;

        tracing::info!(kind = %kind, external_id = %record.external_id, "action recorded");

        self.moderate(&record).await;
        Ok(Outcome::Recorded(record))
    }

    /// Run every due recurring action. Failures are isolated per kind.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();

        // Cheap unlocked pre-check; `dispatch` re-checks under the lock.
        let schedule = match self.store.snapshot() {
            Ok(data) => data.schedule,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read state");
                report.failed += 1;
                return report;
            }
        };

        for req in [ActionRequest::WeeklyThread] {
            let kind = req.kind();
            if !self.scheduler.is_due(kind, now, &schedule) {
                report.not_due += 1;
                continue;
            }
            match self.dispatch(req, now).await {
                Ok(Outcome::Recorded(_)) => report.recorded += 1,
                Ok(Outcome::NotDue) => report.not_due += 1,
                Ok(Outcome::RateLimited) => report.rate_limited += 1,
                Err(e) => {
                    tracing::warn!(kind = %kind, error = %e, "scheduled action failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Scan the newest submissions, welcome first-time posters and count keyword hits.
    pub async fn monitor(&self, now: DateTime<Utc>) -> Result<MonitorReport> {
        let subs = match tokio::time::timeout(
            self.cfg.post_timeout,
            self.platform.new_submissions(MONITOR_BATCH),
        )
        .await
        {
            Ok(res) => res?,
            Err(_) => {
                return Err(Error::RemoteUnavailable(
                    "listing new submissions timed out".to_string(),
                ))
            }
        };

        let data = self.store.snapshot()?;
        let mut report = MonitorReport {
            scanned: subs.len(),
            ..MonitorReport::default()
        };

        for sub in subs {
            let hits = content::keyword_hits(&self.cfg.monitored_keywords, &sub.title);
            if !hits.is_empty() {
                report.keyword_hits += 1;
                tracing::info!(post = %sub.id, keywords = ?hits, "keyword match");
            }

            if !self.cfg.welcome_enabled || self.welcome_skip(&sub, now, &data).is_some() {
                report.skipped += 1;
                continue;
            }

            let id = sub.id.clone();
            match self.dispatch(ActionRequest::Welcome(sub), now).await {
                Ok(Outcome::Recorded(_)) => report.welcomed += 1,
                Ok(Outcome::NotDue) => report.skipped += 1,
                Ok(Outcome::RateLimited) => report.rate_limited += 1,
                Err(e) => {
                    tracing::warn!(post = %id, error = %e, "welcome failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn post(&self, req: &ActionRequest, now: DateTime<Utc>) -> Result<PostRecord> {
        match req {
            ActionRequest::WeeklyThread => {
                let post = content::weekly_thread(&self.cfg);
                let sub = self.platform.submit(&post.title, &post.body).await?;
                Ok(PostRecord {
                    kind: ActionKind::WeeklyThread,
                    timestamp: now,
                    external_id: sub.id.clone(),
                    title: post.title,
                    metrics: sub.metrics(),
                    user: None,
                    details: None,
                })
            }
            ActionRequest::Milestone(data) => {
                let post = content::milestone(data);
                let sub = self.platform.submit(&post.title, &post.body).await?;
                Ok(PostRecord {
                    kind: ActionKind::Milestone,
                    timestamp: now,
                    external_id: sub.id.clone(),
                    title: post.title,
                    metrics: sub.metrics(),
                    user: None,
                    details: Some(data.clone()),
                })
            }
            ActionRequest::Welcome(sub) => {
                let author = sub.author.clone().unwrap_or_default();
                let body = content::welcome_message(&self.cfg, &author);
                let comment = self.platform.reply(&sub.id, &body).await?;
                Ok(PostRecord {
                    kind: ActionKind::Welcome,
                    timestamp: now,
                    external_id: comment.id,
                    title: sub.title.clone(),
                    metrics: sub.metrics(),
                    user: Some(author),
                    details: None,
                })
            }
        }
    }

    /// Sticky and flair. Failures are logged and never undo the record.
    async fn moderate(&self, record: &PostRecord) {
        let id = record.external_id.as_str();
        let flair = match record.kind {
            ActionKind::WeeklyThread => {
                self.best_effort("sticky", id, self.platform.sticky(id)).await;
                WEEKLY_FLAIR
            }
            ActionKind::Milestone => MILESTONE_FLAIR,
            ActionKind::Welcome => return,
        };
        self.best_effort("flair", id, self.platform.set_flair(id, flair.0, flair.1))
            .await;
    }

    async fn best_effort(
        &self,
        op: &str,
        id: &str,
        fut: impl std::future::Future<Output = Result<()>>,
    ) {
        match tokio::time::timeout(self.cfg.post_timeout, fut).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(op, external_id = id, error = %e, "moderation failed"),
            Err(_) => tracing::warn!(op, external_id = id, "moderation timed out"),
        }
    }

    fn welcome_skip(
        &self,
        sub: &Submission,
        now: DateTime<Utc>,
        data: &StoreData,
    ) -> Option<&'static str> {
        let Some(author) = sub.author.as_deref().filter(|a| !a.is_empty() && *a != "[deleted]")
        else {
            return Some("no author");
        };
        if let Some(me) = self.platform.account_name() {
            if me.eq_ignore_ascii_case(author) {
                return Some("own post");
            }
        }
        if data.times_welcomed(author) > 0 {
            return Some("already welcomed");
        }
        if now.signed_duration_since(sub.created_at) < chrono_duration(self.cfg.welcome_delay) {
            return Some("too recent");
        }
        None
    }
}
