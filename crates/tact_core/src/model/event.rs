use super::Millis;
use serde::{Deserialize, Serialize};

/// Append-only audit record. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub ts: Millis,
    #[serde(default = "empty_meta")]
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Create,
    Start,
    Complete,
    Edit,
    Rollover,
    CloseDay,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Edit => "edit",
            Self::Rollover => "rollover",
            Self::CloseDay => "closeDay",
        }
    }
}

fn empty_meta() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        task_id: Option<&str>,
        kind: EventKind,
        ts: Millis,
        meta: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            task_id: task_id.map(str::to_string),
            kind,
            ts,
            meta,
        }
    }
}
