//! Bulk export and import of tasks and events.

use crate::error::AppError;
use crate::model::{Event, Millis, Task};
use crate::storage::{Collection, Storage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub exported_at: Millis,
    pub tasks: Vec<Task>,
    pub events: Vec<Event>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImportOutcome {
    pub tasks: usize,
    pub events: usize,
}

/// Tasks by id, events by timestamp.
pub async fn export(storage: &Storage, exported_at: Millis) -> Result<ExportPayload, AppError> {
    let tasks: Vec<Task> = storage.all().await?;
    let mut events: Vec<Event> = storage.all().await?;
    events.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)));
    Ok(ExportPayload {
        exported_at,
        tasks,
        events,
    })
}

/// Validate a payload completely before anything is written.
pub fn parse_import(payload: &Value) -> Result<(Vec<Task>, Vec<Event>), AppError> {
    let object = payload
        .as_object()
        .ok_or_else(|| AppError::import_invalid("payload must be a JSON object"))?;
    let tasks = object
        .get("tasks")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::import_invalid("tasks must be an array"))?;
    let events = object
        .get("events")
        .and_then(Value::as_array)
        .ok_or_else(|| AppError::import_invalid("events must be an array"))?;

    let tasks = tasks
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            Task::deserialize(raw)
                .map_err(|err| AppError::import_invalid(format!("tasks[{index}]: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let events = events
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            Event::deserialize(raw)
                .map_err(|err| AppError::import_invalid(format!("events[{index}]: {err}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((tasks, events))
}

pub fn parse_import_text(text: &str) -> Result<(Vec<Task>, Vec<Event>), AppError> {
    let payload: Value = serde_json::from_str(text)
        .map_err(|err| AppError::import_invalid(format!("not JSON: {err}")))?;
    parse_import(&payload)
}

/// Replace every collection with the payload's contents.
pub async fn import(storage: &Storage, payload: &Value) -> Result<ImportOutcome, AppError> {
    let (tasks, events) = parse_import(payload)?;

    for collection in Collection::ALL {
        storage.clear(collection).await?;
    }
    for task in &tasks {
        storage.put(task).await?;
    }
    for event in &events {
        storage.put(event).await?;
    }

    info!(tasks = tasks.len(), events = events.len(), "import finished");
    Ok(ImportOutcome {
        tasks: tasks.len(),
        events: events.len(),
    })
}
