use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Kinds of actions the dispatcher performs on the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    WeeklyThread,
    Welcome,
    Milestone,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [
        ActionKind::WeeklyThread,
        ActionKind::Welcome,
        ActionKind::Milestone,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::WeeklyThread => "weekly_thread",
            ActionKind::Welcome => "welcome",
            ActionKind::Milestone => "milestone",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "weekly_thread" => Ok(ActionKind::WeeklyThread),
            "welcome" => Ok(ActionKind::Welcome),
            "milestone" => Ok(ActionKind::Milestone),
            other => Err(Error::UnknownAction(other.to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    pub upvotes: i64,
    pub comments: i64,
}

impl Metrics {
    pub fn engagement(&self) -> i64 {
        self.upvotes + self.comments
    }
}

/// Payload describing a milestone announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneData {
    #[serde(rename = "type", default = "default_milestone_type")]
    pub kind: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl Default for MilestoneData {
    fn default() -> Self {
        Self {
            kind: default_milestone_type(),
            title: None,
            description: None,
            details: None,
        }
    }
}

fn default_milestone_type() -> String {
    "general".to_string()
}

/// One confirmed action. Never mutated after it is appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub kind: ActionKind,
    pub timestamp: DateTime<Utc>,
    pub external_id: String,
    pub title: String,
    #[serde(default)]
    pub metrics: Metrics,
    /// Welcomed user (welcome records only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Milestone payload (milestone records only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<MilestoneData>,
}

/// A post as reported by the social platform.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
}

impl Submission {
    pub fn metrics(&self) -> Metrics {
        Metrics {
            upvotes: self.score,
            comments: self.num_comments,
        }
    }
}

/// A reply created on the platform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommentRef {
    pub id: String,
    pub parent_id: String,
}
