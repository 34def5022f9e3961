use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::{NaiveTime, Weekday};

use crate::{errors::Error, Result};

/// Typed configuration for the dispatcher.
///
/// Variable names keep the `REDDIT_*` prefix used by existing deployments.
#[derive(Clone, Debug)]
pub struct Config {
    // Weekly thread
    pub weekly_day: Weekday,
    pub weekly_time: NaiveTime,
    pub weekly_window: Duration,
    pub weekly_enabled: bool,

    // Welcome messages
    pub welcome_enabled: bool,
    pub welcome_delay: Duration,
    pub welcome_max_per_hour: u32,

    // Milestones
    pub milestone_enabled: bool,
    pub milestone_min_interval: Duration,

    // Engagement monitoring
    pub monitor_posts: bool,
    pub monitored_keywords: Vec<String>,

    // Rate limiting
    pub action_spacing: Duration,
    pub max_actions_per_hour: u32,

    // Content overrides
    pub custom_weekly_title: Option<String>,
    pub custom_welcome_message: Option<String>,

    // Serverless / webhook
    pub serverless: bool,
    pub webhook_secret: Option<String>,

    // Platform
    pub subreddit: String,
    pub reddit_client_id: Option<String>,
    pub reddit_client_secret: Option<String>,
    pub reddit_username: Option<String>,
    pub reddit_password: Option<String>,
    pub reddit_user_agent: String,

    // Runtime
    pub state_file: PathBuf,
    pub tick_interval: Duration,
    pub post_timeout: Duration,
    pub credential_timeout: Duration,

    // Git hosting / gateway
    pub github_repo_owner: String,
    pub github_repo_name: String,
    pub gateway_url: String,
}

impl Config {
    /// Load from `.env` (if present) and the process environment.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup (used by tests).
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars(&lookup);

        let weekly_day = parse_weekday(&vars.string("REDDIT_WEEKLY_DAY", "monday"))?;
        let weekly_time = parse_hhmm(&vars.string("REDDIT_WEEKLY_TIME", "09:00"))?;
        let weekly_window = minutes(
            "REDDIT_WEEKLY_WINDOW_MINUTES",
            vars.u64("REDDIT_WEEKLY_WINDOW_MINUTES")?.unwrap_or(60),
        )?;
        if weekly_window.is_zero() || weekly_window > WEEK {
            return Err(Error::Config(
                "REDDIT_WEEKLY_WINDOW_MINUTES must be between 1 and 10080".to_string(),
            ));
        }
        let weekly_enabled = vars.bool("REDDIT_WEEKLY_ENABLED").unwrap_or(true);

        let welcome_enabled = vars.bool("REDDIT_WELCOME_ENABLED").unwrap_or(true);
        let welcome_delay = minutes(
            "REDDIT_WELCOME_DELAY",
            vars.u64("REDDIT_WELCOME_DELAY")?.unwrap_or(10),
        )?;
        let welcome_max_per_hour = vars.u32("REDDIT_WELCOME_MAX_HOUR")?.unwrap_or(5);

        let milestone_enabled = vars.bool("REDDIT_MILESTONE_ENABLED").unwrap_or(true);
        let milestone_min_interval = scaled_secs(
            "REDDIT_MILESTONE_MIN_HOURS",
            vars.u64("REDDIT_MILESTONE_MIN_HOURS")?.unwrap_or(24),
            3600,
        )?;

        let monitor_posts = vars.bool("REDDIT_MONITOR_POSTS").unwrap_or(true);
        let monitored_keywords =
            parse_csv_lower(&vars.string("REDDIT_AUTO_KEYWORDS", "help,question,stuck"));

        let action_spacing = Duration::from_secs(vars.u64("REDDIT_RATE_LIMIT")?.unwrap_or(2));
        let max_actions_per_hour = vars.u32("REDDIT_MAX_ACTIONS_HOUR")?.unwrap_or(30);

        let custom_weekly_title = vars.non_empty("REDDIT_CUSTOM_WEEKLY_TITLE");
        let custom_welcome_message = vars.non_empty("REDDIT_CUSTOM_WELCOME");

        let serverless = vars.bool("REDDIT_SERVERLESS").unwrap_or(false);
        let webhook_secret = vars.non_empty("REDDIT_WEBHOOK_SECRET");

        let subreddit = vars.string("REDDIT_SUBREDDIT", "CodeDAO");
        let reddit_client_id = vars.non_empty("REDDIT_CLIENT_ID");
        let reddit_client_secret = vars.non_empty("REDDIT_CLIENT_SECRET");
        let reddit_username = vars.non_empty("REDDIT_USERNAME");
        let reddit_password = vars.non_empty("REDDIT_PASSWORD");
        let reddit_user_agent = vars.string("REDDIT_USER_AGENT", "postd/0.1");

        let state_file =
            PathBuf::from(vars.string("REDDIT_ANALYTICS_FILE", "reddit_bot_analytics.json"));
        let tick_interval =
            Duration::from_secs(vars.u64("POSTD_TICK_SECONDS")?.unwrap_or(60).max(1));
        let post_timeout = bounded_secs(vars.u64("POSTD_POST_TIMEOUT_SECONDS")?.unwrap_or(30));
        let credential_timeout =
            bounded_secs(vars.u64("POSTD_CREDENTIAL_TIMEOUT_SECONDS")?.unwrap_or(5));

        let github_repo_owner = vars.string("GITHUB_REPO_OWNER", "CodeDAO-org");
        let github_repo_name = vars.string("GITHUB_REPO_NAME", "codedao-extension");
        let gateway_url = vars.string("POSTD_GATEWAY_URL", "http://localhost:3001");

        Ok(Self {
            weekly_day,
            weekly_time,
            weekly_window,
            weekly_enabled,
            welcome_enabled,
            welcome_delay,
            welcome_max_per_hour,
            milestone_enabled,
            milestone_min_interval,
            monitor_posts,
            monitored_keywords,
            action_spacing,
            max_actions_per_hour,
            custom_weekly_title,
            custom_welcome_message,
            serverless,
            webhook_secret,
            subreddit,
            reddit_client_id,
            reddit_client_secret,
            reddit_username,
            reddit_password,
            reddit_user_agent,
            state_file,
            tick_interval,
            post_timeout,
            credential_timeout,
            github_repo_owner,
            github_repo_name,
            gateway_url,
        })
    }
}

struct Vars<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Vars<'_> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn string(&self, key: &str, default: &str) -> String {
        self.non_empty(key).unwrap_or_else(|| default.to_string())
    }

    fn non_empty(&self, key: &str) -> Option<String> {
        self.get(key)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.non_empty(key).map(|s| {
            matches!(
                s.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn u64(&self, key: &str) -> Result<Option<u64>> {
        self.parsed(key)
    }

    fn u32(&self, key: &str) -> Result<Option<u32>> {
        self.parsed(key)
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
        self.non_empty(key)
            .map(|s| {
                s.parse::<T>().map_err(|_| {
                    Error::Config(format!("{key} must be a non-negative integer, got {s:?}"))
                })
            })
            .transpose()
    }
}

const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

/// Outbound calls are bounded to 5..=60 seconds.
fn bounded_secs(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(5, 60))
}

fn minutes(key: &str, m: u64) -> Result<Duration> {
    scaled_secs(key, m, 60)
}

/// `value * unit` seconds; values that cannot be represented are config errors.
fn scaled_secs(key: &str, value: u64, unit: u64) -> Result<Duration> {
    value
        .checked_mul(unit)
        .map(Duration::from_secs)
        .ok_or_else(|| Error::Config(format!("{key} is out of range: {value}")))
}

fn parse_weekday(raw: &str) -> Result<Weekday> {
    raw.trim()
        .parse::<Weekday>()
        .map_err(|_| Error::Config(format!("REDDIT_WEEKLY_DAY is not a weekday: {raw:?}")))
}

fn parse_hhmm(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| Error::Config(format!("REDDIT_WEEKLY_TIME must be HH:MM, got {raw:?}")))
}

fn parse_csv_lower(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, strip_value(v));
    }
}

/// Strip trailing `# comment` and optional surrounding quotes.
fn strip_value(v: &str) -> String {
    let mut val = v.trim();
    if val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')))
    {
        return val[1..val.len() - 1].to_string();
    }
    if let Some((before, _)) = val.split_once(" #") {
        val = before.trim_end();
    }
    val.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let c = cfg(&[]).unwrap();
        assert_eq!(c.weekly_day, Weekday::Mon);
        assert_eq!(c.weekly_time, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        assert_eq!(c.weekly_window, Duration::from_secs(3600));
        assert!(c.weekly_enabled);
        assert_eq!(c.welcome_delay, Duration::from_secs(600));
        assert_eq!(c.welcome_max_per_hour, 5);
        assert_eq!(c.milestone_min_interval, Duration::from_secs(24 * 3600));
        assert_eq!(c.max_actions_per_hour, 30);
        assert_eq!(c.action_spacing, Duration::from_secs(2));
        assert_eq!(c.monitored_keywords, vec!["help", "question", "stuck"]);
        assert!(c.webhook_secret.is_none());
        assert_eq!(c.tick_interval, Duration::from_secs(60));
    }

    #[test]
    fn parses_overrides() {
        let c = cfg(&[
            ("REDDIT_WEEKLY_DAY", "Friday"),
            ("REDDIT_WEEKLY_TIME", "17:30"),
            ("REDDIT_WEEKLY_ENABLED", "false"),
            ("REDDIT_MILESTONE_MIN_HOURS", "6"),
            ("REDDIT_AUTO_KEYWORDS", " Help , BUG,,"),
            ("REDDIT_WEBHOOK_SECRET", "s3cret"),
            ("POSTD_POST_TIMEOUT_SECONDS", "600"),
        ])
        .unwrap();
        assert_eq!(c.weekly_day, Weekday::Fri);
        assert_eq!(c.weekly_time, NaiveTime::from_hms_opt(17, 30, 0).unwrap());
        assert!(!c.weekly_enabled);
        assert_eq!(c.milestone_min_interval, Duration::from_secs(6 * 3600));
        assert_eq!(c.monitored_keywords, vec!["help", "bug"]);
        assert_eq!(c.webhook_secret.as_deref(), Some("s3cret"));
        assert_eq!(c.post_timeout, Duration::from_secs(60));
    }

    #[test]
    fn rejects_invalid_schedule_values() {
        assert!(matches!(
            cfg(&[("REDDIT_WEEKLY_DAY", "someday")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            cfg(&[("REDDIT_WEEKLY_TIME", "9am")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            cfg(&[("REDDIT_MAX_ACTIONS_HOUR", "-1")]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn out_of_range_durations_are_config_errors() {
        let huge = u64::MAX.to_string();
        for key in [
            "REDDIT_WEEKLY_WINDOW_MINUTES",
            "REDDIT_WELCOME_DELAY",
            "REDDIT_MILESTONE_MIN_HOURS",
        ] {
            assert!(
                matches!(cfg(&[(key, huge.as_str())]), Err(Error::Config(_))),
                "{key}"
            );
        }
        assert!(matches!(
            cfg(&[("REDDIT_WEEKLY_WINDOW_MINUTES", "10081")]),
            Err(Error::Config(_))
        ));
        assert!(cfg(&[("REDDIT_WEEKLY_WINDOW_MINUTES", "10080")]).is_ok());
    }

    #[test]
    fn dotenv_values_drop_quotes_and_comments() {
        assert_eq!(strip_value(" \"a b\" "), "a b");
        assert_eq!(strip_value("monday          # weekday"), "monday");
        assert_eq!(strip_value("plain"), "plain");
    }
}
