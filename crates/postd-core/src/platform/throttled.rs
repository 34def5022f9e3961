use std::{sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{
    domain::{CommentRef, Submission},
    platform::port::SocialPlatform,
    Result,
};

#[derive(Debug)]
struct IntervalLimiter {
    interval: Duration,
    next: Instant,
}

impl IntervalLimiter {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now(),
        }
    }

    /// Reserve the next slot and return the wait duration required before executing.
    fn reserve(&mut self) -> Duration {
        let now = Instant::now();
        let start = if now >= self.next { now } else { self.next };
        self.next = start + self.interval;
        start.saturating_duration_since(now)
    }
}

/// SocialPlatform decorator that spaces outbound calls by a minimum interval
/// (`REDDIT_RATE_LIMIT` seconds between actions).
pub struct ThrottledPlatform {
    inner: Arc<dyn SocialPlatform>,
    limiter: Mutex<IntervalLimiter>,
}

impl ThrottledPlatform {
    pub fn new(inner: Arc<dyn SocialPlatform>, min_interval: Duration) -> Self {
        Self {
            inner,
            limiter: Mutex::new(IntervalLimiter::new(min_interval)),
        }
    }

    async fn throttle(&self) {
        let wait = { self.limiter.lock().await.reserve() };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }
}

#[async_trait::async_trait]
impl SocialPlatform for ThrottledPlatform {
    fn account_name(&self) -> Option<String> {
        self.inner.account_name()
    }

    async fn submit(&self, title: &str, body: &str) -> Result<Submission> {
        self.throttle().await;
        self.inner.submit(title, body).await
    }

    async fn reply(&self, parent_id: &str, body: &str) -> Result<CommentRef> {
        self.throttle().await;
        self.inner.reply(parent_id, body).await
    }

    async fn sticky(&self, submission_id: &str) -> Result<()> {
        self.throttle().await;
        self.inner.sticky(submission_id).await
    }

    async fn set_flair(&self, submission_id: &str, text: &str, css_class: &str) -> Result<()> {
        self.throttle().await;
        self.inner.set_flair(submission_id, text, css_class).await
    }

    async fn new_submissions(&self, limit: usize) -> Result<Vec<Submission>> {
        // Reads are not actions; no spacing.
        self.inner.new_submissions(limit).await
    }
}
