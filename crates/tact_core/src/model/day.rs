use super::{DayKey, Millis};
use serde::{Deserialize, Serialize};

/// Snapshot written when a day is closed; keyed by the closed day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Day {
    pub id: DayKey,
    pub closed_at: Millis,
    pub counts: DayCounts,
    pub snapshot_markdown: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayCounts {
    pub done: usize,
    pub unfinished: usize,
}
