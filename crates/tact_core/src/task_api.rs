//! Facade and context object: storage, sync endpoint, clock and settings are
//! built once and every operation goes through here.

use crate::clock::{SharedClock, SystemClock};
use crate::config::Config;
use crate::day_close::{DayCloseEngine, DayCloseReport};
use crate::error::AppError;
use crate::lifecycle::{DropTarget, TaskLifecycle, TaskPatch};
use crate::model::{DayKey, Event, Task, TaskStatus, new_id};
use crate::ordering;
use crate::storage::schema::{BY_PROJECT, BY_TAG};
use crate::storage::{BackendKind, Collection, Storage, StorageOptions};
use crate::summary::render_summary;
use crate::sync::SyncBus;
use crate::transfer::{self, ExportPayload, ImportOutcome};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_EVENT_LIMIT: usize = 300;

/// What a producer hands over for a new task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub day: Option<DayKey>,
    pub estimate_min: u32,
    pub project_id: Option<String>,
    pub tags: Vec<String>,
    pub notes: Option<Value>,
}

/// Narrows the today and backlog lists. Empty fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskFilter {
    pub tag: Option<String>,
    pub project: Option<String>,
    /// Case-insensitive; matched against title, notes, tags and project.
    pub text: Option<String>,
}

impl TaskFilter {
    /// `@tag` and `#project` words pick those fields, the rest is free text.
    pub fn parse(query: &str) -> Self {
        let mut filter = Self::default();
        let mut words = Vec::new();
        for word in query.split_whitespace() {
            if let Some(tag) = word.strip_prefix('@').filter(|tag| !tag.is_empty()) {
                filter.tag = Some(tag.to_string());
            } else if let Some(project) = word.strip_prefix('#').filter(|p| !p.is_empty()) {
                filter.project = Some(project.to_string());
            } else {
                words.push(word);
            }
        }
        if !words.is_empty() {
            filter.text = Some(words.join(" "));
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.tag.is_none() && self.project.is_none() && self.text.is_none()
    }

    fn matches_text(&self, task: &Task) -> bool {
        let Some(text) = &self.text else {
            return true;
        };
        let notes = match &task.notes {
            Some(Value::String(plain)) => plain.as_str(),
            Some(envelope) => envelope.get("ct").and_then(Value::as_str).unwrap_or_default(),
            None => "",
        };
        let tags = task.tags.join(" ");
        let haystack = [
            task.title.as_str(),
            notes,
            tags.as_str(),
            task.project_id.as_deref().unwrap_or_default(),
        ]
        .join(" ")
        .to_lowercase();
        haystack.contains(&text.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub day: DayKey,
    pub open: Vec<Task>,
    pub done: Vec<Task>,
    pub active: usize,
    pub wip_limit: u8,
    pub estimate_min: u32,
    pub available_min: u32,
    pub over_budget: bool,
}

pub struct TaskApi {
    lifecycle: TaskLifecycle,
    day_close: DayCloseEngine,
    config: Config,
}

impl TaskApi {
    pub fn new(storage: Storage, sync: SyncBus, clock: SharedClock, config: Config) -> Self {
        let lifecycle = TaskLifecycle::new(storage, sync, clock.clone(), config.wip_limit());
        let day_close = DayCloseEngine::new(
            lifecycle.clone(),
            config.rollover_threshold,
            config.summary_options(clock.offset()),
        );
        Self {
            lifecycle,
            day_close,
            config,
        }
    }

    /// Wire everything for a process: storage under `data_dir` per the
    /// configured backend, and `sync` unless it is switched off.
    pub fn open(config: Config, data_dir: &Path, sync: SyncBus) -> Self {
        let storage = Storage::open(&StorageOptions::in_dir(data_dir, config.backend));
        let sync = if config.sync {
            sync
        } else {
            SyncBus::Unavailable
        };
        Self::new(storage, sync, Arc::new(SystemClock), config)
    }

    pub fn lifecycle(&self) -> &TaskLifecycle {
        &self.lifecycle
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.lifecycle.storage().kind()
    }

    fn clock(&self) -> &SharedClock {
        self.lifecycle.clock()
    }

    /// Create a task. An open task with the same title blocks creation
    /// unless `force` is set.
    pub async fn add(&self, draft: NewTask, force: bool) -> Result<Task, AppError> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(AppError::invalid_input("title is required"));
        }
        if !force && let Some(existing) = self.lifecycle.find_duplicate(title).await? {
            return Err(AppError::invalid_input(format!(
                "duplicate of {} \"{}\", use --force to add anyway",
                short_id(&existing.id),
                existing.title
            )));
        }

        let clock = self.clock();
        let mut task = Task::new(new_id(), title, draft.day, clock.today(), clock.now_millis());
        task.estimate_min = draft.estimate_min;
        task.project_id = draft.project_id.filter(|project| !project.trim().is_empty());
        task.tags = draft.tags;
        task.notes = draft.notes;
        self.lifecycle.create(task, "cli").await
    }

    /// Accept a full id or any unambiguous prefix of one.
    pub async fn resolve_id(&self, raw: &str) -> Result<String, AppError> {
        let wanted = raw.trim();
        if wanted.is_empty() {
            return Err(AppError::invalid_input("id is required"));
        }
        if self.lifecycle.storage().get::<Task>(wanted).await?.is_some() {
            return Ok(wanted.to_string());
        }

        let tasks: Vec<Task> = self.lifecycle.storage().all().await?;
        let mut matches = tasks.into_iter().filter(|task| task.id.starts_with(wanted));
        match (matches.next(), matches.next()) {
            (Some(task), None) => Ok(task.id),
            (Some(_), Some(_)) => Err(AppError::invalid_input(format!(
                "id prefix {wanted} is ambiguous"
            ))),
            (None, _) => Err(AppError::not_found(format!("task {wanted}"))),
        }
    }

    pub async fn get(&self, id: &str) -> Result<Task, AppError> {
        let id = self.resolve_id(id).await?;
        self.lifecycle.get(&id).await
    }

    pub async fn start(&self, id: &str) -> Result<Task, AppError> {
        let id = self.resolve_id(id).await?;
        self.lifecycle.start(&id).await
    }

    pub async fn complete(&self, id: &str) -> Result<Task, AppError> {
        let id = self.resolve_id(id).await?;
        self.lifecycle.complete(&id).await
    }

    pub async fn defer(&self, id: &str, reason: Option<&str>) -> Result<Task, AppError> {
        let id = self.resolve_id(id).await?;
        self.lifecycle.defer(&id, reason).await
    }

    pub async fn undo(&self, id: &str) -> Result<Task, AppError> {
        let id = self.resolve_id(id).await?;
        self.lifecycle.undo(&id).await
    }

    pub async fn delete(&self, id: &str, confirmed: bool) -> Result<Task, AppError> {
        let id = self.resolve_id(id).await?;
        self.lifecycle.delete(&id, confirmed).await
    }

    pub async fn edit(&self, id: &str, patch: TaskPatch) -> Result<Task, AppError> {
        let id = self.resolve_id(id).await?;
        self.lifecycle.edit(&id, patch).await
    }

    pub async fn schedule(&self, id: &str, day: Option<DayKey>) -> Result<Task, AppError> {
        let id = self.resolve_id(id).await?;
        self.lifecycle.schedule(&id, day).await
    }

    pub async fn log_time(&self, id: &str, minutes: u32) -> Result<Task, AppError> {
        let id = self.resolve_id(id).await?;
        self.lifecycle.log_time(&id, minutes).await
    }

    pub async fn move_to(
        &self,
        id: &str,
        target: DropTarget,
        before: Option<&str>,
    ) -> Result<Task, AppError> {
        let id = self.resolve_id(id).await?;
        let before = match before {
            Some(pivot) => Some(self.resolve_id(pivot).await?),
            None => None,
        };
        self.lifecycle.move_to(&id, target, before.as_deref()).await
    }

    pub async fn clear_done(&self, confirmed: bool) -> Result<usize, AppError> {
        if !confirmed {
            return Err(AppError::invalid_input("clear-done requires confirmation"));
        }
        self.lifecycle.clear_done().await
    }

    pub async fn board(&self) -> Result<Board, AppError> {
        self.board_for(self.clock().today(), &TaskFilter::default()).await
    }

    /// The day's lists narrowed by `filter`. WIP and budget figures always
    /// cover the whole day.
    pub async fn board_for(&self, day: DayKey, filter: &TaskFilter) -> Result<Board, AppError> {
        let open = self.lifecycle.open_tasks(day).await?;
        let mut done = self.lifecycle.tasks_for(day, TaskStatus::Done).await?;
        done.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let active = open
            .iter()
            .filter(|task| task.status == TaskStatus::InProgress)
            .count();
        let estimate_min = open
            .iter()
            .map(|task| task.estimate_min)
            .fold(0u32, u32::saturating_add);
        let available_min = self.config.available_minutes();

        Ok(Board {
            day,
            open: self.apply_filter(open, filter).await?,
            done: self.apply_filter(done, filter).await?,
            active,
            wip_limit: self.lifecycle.wip_limit().get(),
            estimate_min,
            available_min,
            over_budget: estimate_min > available_min,
        })
    }

    /// Tasks not on today's list: backlog ones plus open tasks dated for
    /// another day, such as rolled-over, future or stale ones.
    pub async fn backlog(&self, filter: &TaskFilter) -> Result<Vec<Task>, AppError> {
        let today = self.clock().today();
        let tasks: Vec<Task> = self.lifecycle.storage().all().await?;
        let backlog: Vec<Task> = tasks
            .into_iter()
            .filter(|task| {
                task.status == TaskStatus::Backlog
                    || (task.status.is_open() && task.day_key != Some(today))
            })
            .collect();
        let mut backlog = self.apply_filter(backlog, filter).await?;
        ordering::sort_for_display(&mut backlog);
        Ok(backlog)
    }

    async fn apply_filter(&self, tasks: Vec<Task>, filter: &TaskFilter) -> Result<Vec<Task>, AppError> {
        if filter.is_empty() {
            return Ok(tasks);
        }
        let indexed = self.indexed_ids(filter).await?;
        Ok(tasks
            .into_iter()
            .filter(|task| indexed.as_ref().is_none_or(|ids| ids.contains(&task.id)))
            .filter(|task| filter.matches_text(task))
            .collect())
    }

    /// Ids allowed by the tag and project indexes, or `None` if neither is set.
    async fn indexed_ids(&self, filter: &TaskFilter) -> Result<Option<HashSet<String>>, AppError> {
        let storage = self.lifecycle.storage();
        let mut allowed: Option<HashSet<String>> = None;
        let lookups = [(BY_TAG, &filter.tag), (BY_PROJECT, &filter.project)];
        for (index, wanted) in lookups {
            let Some(wanted) = wanted else {
                continue;
            };
            let hits: Vec<Task> = storage.query_by_index(index, &json!(wanted)).await?;
            let ids: HashSet<String> = hits.into_iter().map(|task| task.id).collect();
            allowed = Some(match allowed {
                Some(previous) => previous.intersection(&ids).cloned().collect(),
                None => ids,
            });
        }
        Ok(allowed)
    }

    /// The newest `limit` events, oldest first.
    pub async fn events(&self, limit: usize) -> Result<Vec<Event>, AppError> {
        let mut events: Vec<Event> = self.lifecycle.storage().all().await?;
        events.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.id.cmp(&b.id)));
        let skip = events.len().saturating_sub(limit);
        Ok(events.split_off(skip))
    }

    /// Summary of the current list without closing the day.
    pub async fn summary(&self) -> Result<String, AppError> {
        let day = self.clock().today();
        let done = self.lifecycle.tasks_for(day, TaskStatus::Done).await?;
        let open = self.lifecycle.open_tasks(day).await?;
        let options = self.config.summary_options(self.clock().offset());
        Ok(render_summary(day, &done, &open, &options))
    }

    pub async fn close_day(&self) -> Result<DayCloseReport, AppError> {
        self.day_close.close_day().await
    }

    pub async fn export(&self) -> Result<ExportPayload, AppError> {
        transfer::export(self.lifecycle.storage(), self.clock().now_millis()).await
    }

    pub async fn import(&self, payload: &Value) -> Result<ImportOutcome, AppError> {
        let outcome = transfer::import(self.lifecycle.storage(), payload).await?;
        self.lifecycle.changed();
        Ok(outcome)
    }

    pub async fn import_text(&self, text: &str) -> Result<ImportOutcome, AppError> {
        let payload: Value = serde_json::from_str(text)
            .map_err(|err| AppError::import_invalid(format!("not JSON: {err}")))?;
        self.import(&payload).await
    }

    /// Wipe every collection.
    pub async fn reset(&self, confirmed: bool) -> Result<(), AppError> {
        if !confirmed {
            return Err(AppError::invalid_input("reset requires confirmation"));
        }
        for collection in Collection::ALL {
            self.lifecycle.storage().clear(collection).await?;
        }
        self.lifecycle.changed();
        info!("all collections cleared");
        Ok(())
    }
}

/// Leading part of an id, enough to type back in.
pub fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::{NewTask, TaskApi, TaskFilter, short_id};
    use crate::clock::FixedClock;
    use crate::config::Config;
    use crate::model::{DayKey, Task};
    use crate::storage::Storage;
    use crate::sync::SyncBus;
    use std::sync::Arc;
    use time::macros::datetime;

    fn api(config: Config) -> TaskApi {
        let clock = Arc::new(FixedClock::new(datetime!(2024-06-03 09:00 UTC)));
        TaskApi::new(Storage::in_memory(), SyncBus::Unavailable, clock, config)
    }

    fn draft(title: &str, day: Option<DayKey>, estimate_min: u32) -> NewTask {
        NewTask {
            title: title.to_string(),
            day,
            estimate_min,
            ..NewTask::default()
        }
    }

    #[tokio::test]
    async fn add_blocks_duplicates_unless_forced() {
        let api = api(Config::default());
        api.add(draft("Write report", None, 0), false).await.unwrap();

        let err = api
            .add(draft(" write REPORT ", None, 0), false)
            .await
            .unwrap_err();
        assert!(err.message().contains("duplicate"));

        api.add(draft("write report", None, 0), true).await.unwrap();
        assert_eq!(api.backlog(&TaskFilter::default()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn ids_resolve_by_unique_prefix() {
        let api = api(Config::default());
        let task = api.add(draft("A", None, 0), false).await.unwrap();

        let resolved = api.resolve_id(short_id(&task.id)).await.unwrap();
        assert_eq!(resolved, task.id);
        assert_eq!(api.resolve_id("zzzz").await.unwrap_err().code(), "not_found");
    }

    #[tokio::test]
    async fn board_reports_wip_and_budget() {
        let config = Config {
            available_hours: 1.0,
            ..Config::default()
        };
        let api = api(config);
        let today = DayKey::parse("2024-06-03").unwrap();
        let a = api.add(draft("A", Some(today), 40), false).await.unwrap();
        api.add(draft("B", Some(today), 30), false).await.unwrap();
        api.start(&a.id).await.unwrap();

        let board = api.board().await.unwrap();
        assert_eq!(board.open.len(), 2);
        assert_eq!(board.active, 1);
        assert_eq!(board.wip_limit, 2);
        assert_eq!(board.estimate_min, 70);
        assert!(board.over_budget);
    }

    #[tokio::test]
    async fn events_keep_only_the_newest() {
        let api = api(Config::default());
        for title in ["A", "B", "C"] {
            api.add(draft(title, None, 0), false).await.unwrap();
        }
        assert_eq!(api.events(2).await.unwrap().len(), 2);
        assert_eq!(api.events(10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn reset_requires_confirmation_and_clears_everything() {
        let api = api(Config::default());
        api.add(draft("A", None, 0), false).await.unwrap();

        assert_eq!(api.reset(false).await.unwrap_err().code(), "invalid_input");
        api.reset(true).await.unwrap();

        let tasks: Vec<Task> = api.lifecycle().storage().all().await.unwrap();
        assert!(tasks.is_empty());
        assert!(api.events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn summary_reflects_current_list() {
        let api = api(Config::default());
        let today = DayKey::parse("2024-06-03").unwrap();
        api.add(draft("Plan week", Some(today), 20), false).await.unwrap();

        let summary = api.summary().await.unwrap();
        assert!(summary.starts_with("# 2024-06-03 \u{2014} Daily Summary \u{2014} Week 23\n"));
        assert!(summary.contains("## Rolled over to 2024-06-04 (1)\n- Plan week ~20m\n"));
    }

    #[tokio::test]
    async fn estimate_total_saturates_instead_of_overflowing() {
        let api = api(Config::default());
        let today = DayKey::parse("2024-06-03").unwrap();
        api.add(draft("Huge", Some(today), u32::MAX), false).await.unwrap();
        api.add(draft("Also huge", Some(today), u32::MAX), false).await.unwrap();

        let board = api.board().await.unwrap();
        assert_eq!(board.estimate_min, u32::MAX);
        assert!(board.over_budget);
    }

    #[tokio::test]
    async fn backlog_includes_open_tasks_dated_for_other_days() {
        let api = api(Config::default());
        let today = DayKey::parse("2024-06-03").unwrap();
        let tomorrow = DayKey::parse("2024-06-04").unwrap();
        api.add(draft("Undated", None, 0), false).await.unwrap();
        api.add(draft("Tomorrow", Some(tomorrow), 0), false).await.unwrap();
        api.add(draft("Today", Some(today), 0), false).await.unwrap();
        let stale = api.add(draft("Stale", Some(today), 0), false).await.unwrap();

        let mut record: Task = api.lifecycle().storage().get(&stale.id).await.unwrap().unwrap();
        record.day_key = Some(DayKey::parse("2024-06-01").unwrap());
        api.lifecycle().storage().put(&record).await.unwrap();

        let titles: Vec<String> = api
            .backlog(&TaskFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|task| task.title)
            .collect();
        assert_eq!(titles.len(), 3);
        assert!(titles.contains(&"Undated".to_string()));
        assert!(titles.contains(&"Tomorrow".to_string()));
        assert!(titles.contains(&"Stale".to_string()));
    }

    #[test]
    fn filter_query_splits_tag_project_and_text() {
        let filter = TaskFilter::parse("@deep  quarterly #clientA report");
        assert_eq!(filter.tag.as_deref(), Some("deep"));
        assert_eq!(filter.project.as_deref(), Some("clientA"));
        assert_eq!(filter.text.as_deref(), Some("quarterly report"));

        assert!(TaskFilter::parse("  ").is_empty());
        assert_eq!(TaskFilter::parse("@").text.as_deref(), Some("@"));
    }

    #[tokio::test]
    async fn board_filter_narrows_lists_but_not_totals() {
        let api = api(Config::default());
        let today = DayKey::parse("2024-06-03").unwrap();
        let mut deep = draft("Write draft", Some(today), 30);
        deep.tags = vec!["deep".to_string()];
        deep.project_id = Some("clientA".to_string());
        api.add(deep, false).await.unwrap();
        api.add(draft("Reply to email", Some(today), 10), false).await.unwrap();

        let board = api
            .board_for(today, &TaskFilter::parse("@deep"))
            .await
            .unwrap();
        assert_eq!(board.open.len(), 1);
        assert_eq!(board.open[0].title, "Write draft");
        assert_eq!(board.estimate_min, 40);

        let by_text = api
            .board_for(today, &TaskFilter::parse("EMAIL"))
            .await
            .unwrap();
        assert_eq!(by_text.open[0].title, "Reply to email");

        let none = api
            .board_for(today, &TaskFilter::parse("@deep #other"))
            .await
            .unwrap();
        assert!(none.open.is_empty());
    }
}
