//! Post titles and bodies.

use crate::{config::Config, domain::MilestoneData};

pub const WEEKLY_FLAIR: (&str, &str) = ("Weekly Thread", "weekly");
pub const MILESTONE_FLAIR: (&str, &str) = ("Milestone", "milestone");

const DEFAULT_WEEKLY_TITLE: &str = "🚀 Weekly Builder Thread - What are you building this week?";

const DASHBOARD_URL: &str = "https://codedao-org.github.io/dashboard.html";
const GET_STARTED_URL: &str = "https://codedao-org.github.io/get-started.html";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostContent {
    pub title: String,
    pub body: String,
}

pub fn weekly_thread(cfg: &Config) -> PostContent {
    let title = cfg
        .custom_weekly_title
        .clone()
        .unwrap_or_else(|| DEFAULT_WEEKLY_TITLE.to_string());

    let body = format!(
        r#"Welcome to the weekly {sub} builder thread!

**Share what you're working on:**
- Your current coding projects
- New features you're building
- Challenges you're facing
- Cool discoveries and breakthroughs

**Getting Started:**
- 🌐 Dashboard: {DASHBOARD_URL}
- 📚 Get Started Guide: {GET_STARTED_URL}

Every commit, every PR, every contribution makes you a better developer. Let's build together! 🔥

*This is an automated weekly post*"#,
        sub = cfg.subreddit,
    );

    PostContent { title, body }
}

pub fn welcome_message(cfg: &Config, username: &str) -> String {
    if let Some(custom) = &cfg.custom_welcome_message {
        return custom.replace("{username}", username);
    }

    format!(
        r#"Welcome to {sub}, u/{username}! 🎉

Great to have you in our community of builders and developers!

**Get Started:**
- 🌐 **Dashboard**: {DASHBOARD_URL}
- 🤝 **Peer Review**: share your projects and get feedback on your code
- 🧵 Join the weekly builder threads

Happy coding! 🚀

*This is an automated welcome message*"#,
        sub = cfg.subreddit,
    )
}

pub fn milestone(data: &MilestoneData) -> PostContent {
    let title = format!(
        "🎉 Milestone Alert: {}",
        non_blank(data.title.as_deref()).unwrap_or("New Achievement!")
    );
    let description = non_blank(data.description.as_deref())
        .unwrap_or("A new milestone has been reached!");
    let details = data.details.as_deref().unwrap_or("").trim();

    let body = format!(
        r#"**{description}**

{details}

**Join the action:**
- 🌐 Dashboard: {DASHBOARD_URL}
- 🚀 Get Started: {GET_STARTED_URL}"#
    );

    PostContent { title, body }
}

/// Lower-cased keywords that appear in `text`.
pub fn keyword_hits<'a>(keywords: &'a [String], text: &str) -> Vec<&'a str> {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .filter(|k| lower.contains(k.as_str()))
        .map(|k| k.as_str())
        .collect()
}

fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}
