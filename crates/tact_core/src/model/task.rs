use super::DayKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Milliseconds since the unix epoch.
pub type Millis = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    /// Plaintext or an encrypted envelope; never interpreted here.
    #[serde(default)]
    pub notes: Option<serde_json::Value>,
    pub status: TaskStatus,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub estimate_min: u32,
    #[serde(default)]
    pub actual_min: u32,
    pub created_at: Millis,
    #[serde(default)]
    pub start_at: Option<Millis>,
    #[serde(default)]
    pub completed_at: Option<Millis>,
    #[serde(default)]
    pub day_key: Option<DayKey>,
    #[serde(default)]
    pub rollover_count: u32,
    #[serde(default)]
    pub blocked_reason: Option<String>,
    pub order: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Backlog,
    Today,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Today => "today",
            Self::InProgress => "in-progress",
            Self::Done => "done",
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Done)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Task {
    /// A fresh task as an external producer would hand it over: status follows
    /// whether `day_key` is the current day.
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        day_key: Option<DayKey>,
        today: DayKey,
        now: Millis,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            notes: None,
            status: initial_status(day_key, today),
            project_id: None,
            tags: Vec::new(),
            estimate_min: 0,
            actual_min: 0,
            created_at: now,
            start_at: None,
            completed_at: None,
            day_key,
            rollover_count: 0,
            blocked_reason: None,
            order: now as f64,
        }
    }

    /// `status = done` exactly when `completed_at` is set.
    pub fn completion_consistent(&self) -> bool {
        (self.status == TaskStatus::Done) == self.completed_at.is_some()
    }
}

pub fn initial_status(day_key: Option<DayKey>, today: DayKey) -> TaskStatus {
    if day_key == Some(today) {
        TaskStatus::Today
    } else {
        TaskStatus::Backlog
    }
}
