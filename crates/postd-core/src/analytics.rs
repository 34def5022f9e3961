//! Append-only analytics log persisted as a single JSON document.
//!
//! Every mutation runs under an exclusive lock (in-process mutex plus a
//! `<state>.lock` file for other processes) and is persisted with an atomic
//! rename, so overlapping invocations cannot lose each other's records.

use std::{
    collections::{BTreeMap, HashSet},
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};

use crate::{
    domain::{ActionKind, Metrics, MilestoneData, PostRecord},
    scheduler::{RateWindow, ScheduleState},
    utils::{atomic_write, FileLock, LockOptions},
    Result,
};

const TOP_USERS: usize = 10;

/// Everything the dispatcher persists.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreData {
    #[serde(default)]
    pub records: Vec<PostRecord>,
    #[serde(default)]
    pub user_interactions: BTreeMap<String, u64>,
    #[serde(default)]
    pub schedule: ScheduleState,
    #[serde(default)]
    pub rate_window: RateWindow,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyStats {
    pub threads_posted: usize,
    pub welcomes_sent: usize,
    pub unique_users_welcomed: usize,
    pub total_engagement: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overview {
    pub total_threads: usize,
    pub total_welcomes: usize,
    pub total_milestones: usize,
    pub unique_users: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCount {
    pub user: String,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecentActivity {
    pub last_thread: Option<PostRecord>,
    pub last_welcome: Option<PostRecord>,
    pub last_milestone: Option<PostRecord>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub overview: Overview,
    pub weekly: WeeklyStats,
    pub top_users: Vec<UserCount>,
    pub recent_activity: RecentActivity,
    pub schedule: ScheduleState,
}

impl StoreData {
    /// Append a confirmed record and bump the per-user welcome count.
    pub fn push_record(&mut self, record: PostRecord) {
        if record.kind == ActionKind::Welcome {
            if let Some(user) = &record.user {
                *self.user_interactions.entry(user.clone()).or_insert(0) += 1;
            }
        }
        self.records.push(record);
    }

    pub fn of_kind(&self, kind: ActionKind) -> impl Iterator<Item = &PostRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    /// Records of `kind` strictly newer than `since`.
    pub fn since(
        &self,
        kind: ActionKind,
        since: DateTime<Utc>,
    ) -> impl Iterator<Item = &PostRecord> {
        self.of_kind(kind).filter(move |r| r.timestamp > since)
    }

    pub fn latest(&self, kind: ActionKind) -> Option<PostRecord> {
        self.records.iter().rev().find(|r| r.kind == kind).cloned()
    }

    pub fn times_welcomed(&self, user: &str) -> u64 {
        self.user_interactions.get(user).copied().unwrap_or(0)
    }

    pub fn weekly_stats(&self, now: DateTime<Utc>) -> WeeklyStats {
        let week_ago = now - Duration::days(7);
        let threads: Vec<&PostRecord> = self.since(ActionKind::WeeklyThread, week_ago).collect();
        let welcomes: Vec<&PostRecord> = self.since(ActionKind::Welcome, week_ago).collect();
        let unique: HashSet<&str> = welcomes
            .iter()
            .filter_map(|r| r.user.as_deref())
            .collect();

        WeeklyStats {
            threads_posted: threads.len(),
            welcomes_sent: welcomes.len(),
            unique_users_welcomed: unique.len(),
            total_engagement: threads.iter().map(|r| r.metrics.engagement()).sum(),
        }
    }

    pub fn dashboard(&self, now: DateTime<Utc>) -> Dashboard {
        let mut top_users: Vec<UserCount> = self
            .user_interactions
            .iter()
            .map(|(user, count)| UserCount {
                user: user.clone(),
                count: *count,
            })
            .collect();
        top_users.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.user.cmp(&b.user)));
        top_users.truncate(TOP_USERS);

        Dashboard {
            overview: Overview {
                total_threads: self.of_kind(ActionKind::WeeklyThread).count(),
                total_welcomes: self.of_kind(ActionKind::Welcome).count(),
                total_milestones: self.of_kind(ActionKind::Milestone).count(),
                unique_users: self.user_interactions.len(),
            },
            weekly: self.weekly_stats(now),
            top_users,
            recent_activity: RecentActivity {
                last_thread: self.latest(ActionKind::WeeklyThread),
                last_welcome: self.latest(ActionKind::Welcome),
                last_milestone: self.latest(ActionKind::Milestone),
            },
            schedule: self.schedule.clone(),
        }
    }
}

/// File-backed store with single-writer semantics.
#[derive(Debug)]
pub struct AnalyticsStore {
    path: PathBuf,
    lock_opts: LockOptions,
    writer: Mutex<()>,
}

/// Exclusive, loaded view of the store. Dropping without `commit` discards changes.
pub struct StoreGuard<'a> {
    pub data: StoreData,
    path: &'a Path,
    _file: FileLock,
    _writer: MutexGuard<'a, ()>,
}

impl StoreGuard<'_> {
    pub fn commit(self) -> Result<()> {
        let txt = serde_json::to_vec_pretty(&self.data)?;
        atomic_write(self.path, &txt)
    }
}

impl AnalyticsStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_opts: LockOptions::default(),
            writer: Mutex::new(()),
        }
    }

    pub fn with_lock_options(mut self, opts: LockOptions) -> Self {
        self.lock_opts = opts;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Current persisted state. A missing file is an empty store.
    pub fn snapshot(&self) -> Result<StoreData> {
        load(&self.path)
    }

    /// Take the writer lock and load the current state.
    pub async fn lock(&self) -> Result<StoreGuard<'_>> {
        let writer = self.writer.lock().await;
        let file = FileLock::acquire(self.lock_path(), self.lock_opts).await?;
        let data = load(&self.path)?;
        Ok(StoreGuard {
            data,
            path: &self.path,
            _file: file,
            _writer: writer,
        })
    }

    /// Run `f` under the writer lock. The document is persisted only when `f`
    /// succeeds and reports a change (`(value, true)`).
    pub async fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut StoreData) -> Result<(T, bool)>,
    {
        let mut guard = self.lock().await?;
        let (value, changed) = f(&mut guard.data)?;
        if changed {
            guard.commit()?;
        }
        Ok(value)
    }

    pub async fn append(&self, record: PostRecord) -> Result<()> {
        self.transaction(|data| {
            data.push_record(record);
            Ok(((), true))
        })
        .await
    }

    pub fn weekly_stats(&self, now: DateTime<Utc>) -> Result<WeeklyStats> {
        Ok(self.snapshot()?.weekly_stats(now))
    }

    pub fn dashboard(&self, now: DateTime<Utc>) -> Result<Dashboard> {
        Ok(self.snapshot()?.dashboard(now))
    }
}

fn load(path: &Path) -> Result<StoreData> {
    let txt = match fs::read_to_string(path) {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(StoreData::default()),
        Err(e) => return Err(e.into()),
    };
    if txt.trim().is_empty() {
        return Ok(StoreData::default());
    }

    let doc: Value = serde_json::from_str(&txt)?;
    if is_legacy(&doc) {
        let legacy: LegacyData = serde_json::from_value(doc)?;
        let data = legacy.into_store();
        tracing::info!(
            path = %path.display(),
            records = data.records.len(),
            "migrating legacy analytics document"
        );
        return Ok(data);
    }
    Ok(serde_json::from_value(doc)?)
}

// ============== Legacy document ==============
//
// Older deployments wrote `weekly_threads` / `welcome_messages` /
// `milestone_posts` arrays to the same file. They are converted into records
// on load and rewritten in the current layout by the next commit.

const LEGACY_KEYS: [&str; 3] = ["weekly_threads", "welcome_messages", "milestone_posts"];

fn is_legacy(doc: &Value) -> bool {
    doc.as_object()
        .is_some_and(|m| LEGACY_KEYS.iter().any(|k| m.contains_key(*k)))
}

#[derive(Deserialize)]
struct LegacyData {
    #[serde(default)]
    weekly_threads: Vec<LegacyThread>,
    #[serde(default)]
    welcome_messages: Vec<LegacyWelcome>,
    #[serde(default)]
    milestone_posts: Vec<LegacyMilestone>,
    #[serde(default)]
    user_interactions: Option<BTreeMap<String, u64>>,
}

#[derive(Deserialize)]
struct LegacyThread {
    #[serde(deserialize_with = "legacy_date")]
    date: DateTime<Utc>,
    #[serde(default)]
    post_id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    upvotes: i64,
    #[serde(default)]
    comments: i64,
}

#[derive(Deserialize)]
struct LegacyWelcome {
    #[serde(deserialize_with = "legacy_date")]
    date: DateTime<Utc>,
    username: String,
    #[serde(default)]
    post_id: Option<String>,
}

#[derive(Deserialize)]
struct LegacyMilestone {
    #[serde(deserialize_with = "legacy_date")]
    date: DateTime<Utc>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    details: Value,
}

impl LegacyData {
    fn into_store(self) -> StoreData {
        let mut data = StoreData::default();
        let mut counted: BTreeMap<String, u64> = BTreeMap::new();

        for t in self.weekly_threads {
            data.records.push(PostRecord {
                kind: ActionKind::WeeklyThread,
                timestamp: t.date,
                external_id: t.post_id.unwrap_or_default(),
                title: t.title,
                metrics: Metrics {
                    upvotes: t.upvotes,
                    comments: t.comments,
                },
                user: None,
                details: None,
            });
        }
        for w in self.welcome_messages {
            *counted.entry(w.username.clone()).or_insert(0) += 1;
            data.records.push(PostRecord {
                kind: ActionKind::Welcome,
                timestamp: w.date,
                external_id: w.post_id.unwrap_or_default(),
                title: format!("Welcome u/{}", w.username),
                metrics: Metrics::default(),
                user: Some(w.username),
                details: None,
            });
        }
        for m in self.milestone_posts {
            let mut details: MilestoneData = serde_json::from_value(m.details).unwrap_or_default();
            if let Some(kind) = m.kind {
                details.kind = kind;
            }
            data.records.push(PostRecord {
                kind: ActionKind::Milestone,
                timestamp: m.date,
                external_id: String::new(),
                title: details
                    .title
                    .clone()
                    .unwrap_or_else(|| "Milestone".to_string()),
                metrics: Metrics::default(),
                user: None,
                details: Some(details),
            });
        }

        data.records.sort_by_key(|r| r.timestamp);
        for kind in [ActionKind::WeeklyThread, ActionKind::Milestone] {
            if let Some(last) = data.latest(kind) {
                data.schedule.mark_run(kind, last.timestamp);
            }
        }
        data.user_interactions = self.user_interactions.unwrap_or(counted);
        data
    }
}

/// RFC3339, or a zone-less ISO timestamp read as UTC.
fn legacy_date<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(d)?;
    if let Ok(t) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(t.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&raw, fmt).ok())
        .map(|n| n.and_utc())
        .ok_or_else(|| de::Error::custom(format!("unrecognised timestamp {raw:?}")))
}
