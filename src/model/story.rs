//! Story records: the locally tracked copy of an upstream user story.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A user story known to this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    /// Local row id.
    pub id: i64,
    /// Work item id in the upstream tracker. Natural key.
    pub external_id: i64,
    pub title: String,
    pub area_path: Option<String>,
    pub iteration_path: Option<String>,
    /// Driven by workflow outcomes, independent of any event status.
    pub status: StoryStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StoryStatus::Pending => "pending",
            StoryStatus::InProgress => "in_progress",
            StoryStatus::Completed => "completed",
            StoryStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for StoryStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(StoryStatus::Pending),
            "in_progress" => Ok(StoryStatus::InProgress),
            "completed" => Ok(StoryStatus::Completed),
            "failed" => Ok(StoryStatus::Failed),
            other => Err(Error::Decode(format!("unknown story status '{other}'"))),
        }
    }
}

/// Parameters for recording a new story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStory {
    pub external_id: i64,
    pub title: String,
    pub area_path: Option<String>,
    pub iteration_path: Option<String>,
}
