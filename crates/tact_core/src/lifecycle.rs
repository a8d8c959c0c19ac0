//! Task status state machine with WIP admission control.
//!
//! Every transition reads the current record, validates it, persists the
//! whole record, appends an audit event and then pings peers once.

use crate::clock::SharedClock;
use crate::error::AppError;
use crate::model::{DayKey, Event, EventKind, Task, TaskStatus, initial_status, new_id};
use crate::ordering;
use crate::storage::Storage;
use crate::storage::schema::BY_DAY_STATUS;
use crate::sync::SyncBus;
use serde_json::{Value, json};
use tracing::debug;

pub const DEFAULT_WIP_LIMIT: u8 = 2;

/// Maximum number of in-progress tasks for the current day, within `[1, 5]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WipLimit(u8);

impl WipLimit {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(raw: i64) -> Self {
        Self(raw.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for WipLimit {
    fn default() -> Self {
        Self(DEFAULT_WIP_LIMIT)
    }
}

/// Field edits; `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub notes: Option<Option<Value>>,
    pub project_id: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub estimate_min: Option<u32>,
    pub blocked_reason: Option<Option<String>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// List a task is dropped onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    Today,
    Done,
}

impl DropTarget {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Done => "done",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "done" => Ok(Self::Done),
            other => Err(AppError::invalid_input(format!(
                "unknown list '{other}', expected today or done"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct TaskLifecycle {
    storage: Storage,
    sync: SyncBus,
    clock: SharedClock,
    wip_limit: WipLimit,
}

impl TaskLifecycle {
    pub fn new(storage: Storage, sync: SyncBus, clock: SharedClock, wip_limit: WipLimit) -> Self {
        Self {
            storage,
            sync,
            clock,
            wip_limit,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn sync(&self) -> &SyncBus {
        &self.sync
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn wip_limit(&self) -> WipLimit {
        self.wip_limit
    }

    pub async fn get(&self, id: &str) -> Result<Task, AppError> {
        let id = require_id(id)?;
        self.storage
            .get::<Task>(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("task {id}")))
    }

    pub async fn tasks_for(&self, day: DayKey, status: TaskStatus) -> Result<Vec<Task>, AppError> {
        self.storage
            .query_by_index(BY_DAY_STATUS, &json!([day.to_string(), status.as_str()]))
            .await
    }

    pub async fn active_count(&self, day: DayKey) -> Result<usize, AppError> {
        Ok(self.tasks_for(day, TaskStatus::InProgress).await?.len())
    }

    /// Open tasks (today and in-progress) for `day`, in display order.
    pub async fn open_tasks(&self, day: DayKey) -> Result<Vec<Task>, AppError> {
        let mut tasks = self.tasks_for(day, TaskStatus::Today).await?;
        tasks.extend(self.tasks_for(day, TaskStatus::InProgress).await?);
        ordering::sort_for_display(&mut tasks);
        Ok(tasks)
    }

    /// Persist a task handed over by a producer. Status is normalized against
    /// the current day.
    pub async fn create(&self, mut task: Task, source: &str) -> Result<Task, AppError> {
        let id = require_id(&task.id)?.to_string();
        let title = task.title.trim();
        if title.is_empty() {
            return Err(AppError::invalid_input("title is required"));
        }
        task.title = title.to_string();
        task.id = id;

        if self.storage.get::<Task>(&task.id).await?.is_some() {
            return Err(AppError::invalid_input(format!(
                "task {} already exists",
                task.id
            )));
        }

        task.status = initial_status(task.day_key, self.clock.today());
        task.completed_at = None;
        task.start_at = None;

        self.save(&task).await?;
        self.record(Some(&task.id), EventKind::Create, json!({ "source": source }))
            .await?;
        self.changed();
        Ok(task)
    }

    /// An open task whose title matches ignoring case and surrounding space.
    pub async fn find_duplicate(&self, title: &str) -> Result<Option<Task>, AppError> {
        let wanted = title.trim().to_lowercase();
        let tasks: Vec<Task> = self.storage.all().await?;
        Ok(tasks.into_iter().find(|task| {
            task.status.is_open()
                && task.completed_at.is_none()
                && task.title.trim().to_lowercase() == wanted
        }))
    }

    pub async fn start(&self, id: &str) -> Result<Task, AppError> {
        let mut task = self.get(id).await?;
        let today = self.clock.today();

        match task.status {
            TaskStatus::Done => {
                return Err(AppError::InvalidTransition {
                    status: task.status,
                    action: "start",
                });
            }
            TaskStatus::InProgress => {}
            TaskStatus::Backlog | TaskStatus::Today => {
                let active = self.active_count(today).await?;
                let limit = self.wip_limit.get();
                if active >= limit as usize {
                    debug!(task_id = %task.id, active, limit, "start rejected by WIP limit");
                    return Err(AppError::AdmissionRejected { active, limit });
                }
            }
        }

        task.status = TaskStatus::InProgress;
        task.day_key = Some(today);
        if task.start_at.is_none() {
            task.start_at = Some(self.clock.now_millis());
        }

        self.save(&task).await?;
        self.record(Some(&task.id), EventKind::Start, json!({})).await?;
        self.changed();
        Ok(task)
    }

    /// Completing an already done task keeps its original completion time.
    pub async fn complete(&self, id: &str) -> Result<Task, AppError> {
        let mut task = self.get(id).await?;
        if task.status == TaskStatus::Done {
            return Ok(task);
        }

        task.status = TaskStatus::Done;
        task.completed_at = Some(self.clock.now_millis());
        task.day_key = Some(self.clock.today());

        self.save(&task).await?;
        self.record(Some(&task.id), EventKind::Complete, json!({}))
            .await?;
        self.changed();
        Ok(task)
    }

    pub async fn defer(&self, id: &str, reason: Option<&str>) -> Result<Task, AppError> {
        let mut task = self.get(id).await?;
        if !matches!(task.status, TaskStatus::Today | TaskStatus::InProgress) {
            return Err(AppError::InvalidTransition {
                status: task.status,
                action: "defer",
            });
        }

        let reason = reason.map(str::trim).filter(|reason| !reason.is_empty());
        task.status = TaskStatus::Today;
        task.start_at = None;
        if let Some(reason) = reason {
            task.blocked_reason = Some(reason.to_string());
        }
        task.order = self.clock.now_millis() as f64;

        self.save(&task).await?;
        self.record(
            Some(&task.id),
            EventKind::Edit,
            json!({ "action": "defer", "reason": reason }),
        )
        .await?;
        self.changed();
        Ok(task)
    }

    pub async fn undo(&self, id: &str) -> Result<Task, AppError> {
        let mut task = self.get(id).await?;
        if task.status != TaskStatus::Done {
            return Err(AppError::InvalidTransition {
                status: task.status,
                action: "undo",
            });
        }

        task.status = TaskStatus::Today;
        task.completed_at = None;
        task.day_key = Some(self.clock.today());

        self.save(&task).await?;
        self.record(
            Some(&task.id),
            EventKind::Edit,
            json!({ "action": "undoComplete" }),
        )
        .await?;
        self.changed();
        Ok(task)
    }

    /// Remove a task for good. Its events stay.
    pub async fn delete(&self, id: &str, confirmed: bool) -> Result<Task, AppError> {
        if !confirmed {
            return Err(AppError::invalid_input("delete requires confirmation"));
        }
        let task = self.get(id).await?;

        self.storage.delete::<Task>(&task.id).await?;
        self.record(Some(&task.id), EventKind::Edit, json!({ "action": "delete" }))
            .await?;
        self.changed();
        Ok(task)
    }

    pub async fn edit(&self, id: &str, patch: TaskPatch) -> Result<Task, AppError> {
        if patch.is_empty() {
            return Err(AppError::invalid_input("nothing to edit"));
        }
        let mut task = self.get(id).await?;
        let mut fields = Vec::new();

        if let Some(title) = patch.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(AppError::invalid_input("title is required"));
            }
            task.title = title.to_string();
            fields.push("title");
        }
        if let Some(notes) = patch.notes {
            task.notes = notes;
            fields.push("notes");
        }
        if let Some(project_id) = patch.project_id {
            task.project_id = project_id.filter(|project| !project.trim().is_empty());
            fields.push("projectId");
        }
        if let Some(tags) = patch.tags {
            task.tags = tags;
            fields.push("tags");
        }
        if let Some(estimate_min) = patch.estimate_min {
            task.estimate_min = estimate_min;
            fields.push("estimateMin");
        }
        if let Some(blocked_reason) = patch.blocked_reason {
            task.blocked_reason = blocked_reason.filter(|reason| !reason.trim().is_empty());
            fields.push("blockedReason");
        }

        self.save(&task).await?;
        self.record(
            Some(&task.id),
            EventKind::Edit,
            json!({ "action": "edit", "fields": fields }),
        )
        .await?;
        self.changed();
        Ok(task)
    }

    /// Bind an open task to `day`, or to the pure backlog with `None`.
    pub async fn schedule(&self, id: &str, day: Option<DayKey>) -> Result<Task, AppError> {
        let mut task = self.get(id).await?;
        if task.status == TaskStatus::Done {
            return Err(AppError::InvalidTransition {
                status: task.status,
                action: "schedule",
            });
        }

        let today = self.clock.today();
        task.day_key = day;
        task.status = match (task.status, day == Some(today)) {
            (TaskStatus::InProgress, true) => TaskStatus::InProgress,
            _ => initial_status(day, today),
        };
        if task.status != TaskStatus::InProgress {
            task.start_at = None;
        }

        self.save(&task).await?;
        self.record(
            Some(&task.id),
            EventKind::Edit,
            json!({ "action": "schedule", "day": day }),
        )
        .await?;
        self.changed();
        Ok(task)
    }

    pub async fn log_time(&self, id: &str, minutes: u32) -> Result<Task, AppError> {
        if minutes == 0 {
            return Err(AppError::invalid_input("minutes must be positive"));
        }
        let mut task = self.get(id).await?;
        task.actual_min = task.actual_min.saturating_add(minutes);

        self.save(&task).await?;
        self.record(
            Some(&task.id),
            EventKind::Edit,
            json!({ "action": "logTime", "minutes": minutes }),
        )
        .await?;
        self.changed();
        Ok(task)
    }

    /// Drop a task onto today's open list or today's done list, before
    /// `before` or at the end.
    pub async fn move_to(
        &self,
        id: &str,
        target: DropTarget,
        before: Option<&str>,
    ) -> Result<Task, AppError> {
        let mut task = self.get(id).await?;
        let today = self.clock.today();
        let now = self.clock.now_millis();

        match target {
            DropTarget::Done => {
                if task.status != TaskStatus::Done {
                    task.status = TaskStatus::Done;
                    task.completed_at = Some(now);
                }
            }
            DropTarget::Today => {
                if task.status != TaskStatus::InProgress {
                    task.status = TaskStatus::Today;
                }
                task.completed_at = None;
            }
        }
        task.day_key = Some(today);

        let mut bucket = match target {
            DropTarget::Today => self.open_tasks(today).await?,
            DropTarget::Done => {
                let mut done = self.tasks_for(today, TaskStatus::Done).await?;
                ordering::sort_for_display(&mut done);
                done
            }
        };
        bucket.retain(|candidate| candidate.id != task.id);
        task.order = self.place(&mut bucket, before, now).await?;

        self.save(&task).await?;
        self.record(
            Some(&task.id),
            EventKind::Edit,
            json!({ "action": "drag", "to": target.as_str() }),
        )
        .await?;
        self.changed();
        Ok(task)
    }

    async fn place(
        &self,
        bucket: &mut [Task],
        before: Option<&str>,
        now: i64,
    ) -> Result<f64, AppError> {
        let Some(pivot_id) = before else {
            return Ok(ordering::key_at_end(bucket.last().map(|task| task.order), now));
        };

        let index = bucket
            .iter()
            .position(|candidate| candidate.id == pivot_id)
            .ok_or_else(|| AppError::not_found(format!("task {pivot_id} in target list")))?;
        let prev = index.checked_sub(1).map(|prev| bucket[prev].order);
        if let Some(key) = ordering::key_before(prev, bucket[index].order) {
            return Ok(key);
        }

        debug!(size = bucket.len(), "renumbering order keys");
        for changed in ordering::renumber(bucket) {
            self.save(&bucket[changed]).await?;
        }
        let index = bucket
            .iter()
            .position(|candidate| candidate.id == pivot_id)
            .ok_or_else(|| AppError::not_found(format!("task {pivot_id} in target list")))?;
        let prev = index.checked_sub(1).map(|prev| bucket[prev].order);
        ordering::key_before(prev, bucket[index].order)
            .ok_or_else(|| AppError::invalid_data("no order key available after renumbering"))
    }

    /// Delete today's done tasks. Returns how many went.
    pub async fn clear_done(&self) -> Result<usize, AppError> {
        let done = self.tasks_for(self.clock.today(), TaskStatus::Done).await?;
        for task in &done {
            self.storage.delete::<Task>(&task.id).await?;
            self.record(
                Some(&task.id),
                EventKind::Edit,
                json!({ "action": "clearDone" }),
            )
            .await?;
        }
        if !done.is_empty() {
            self.changed();
        }
        Ok(done.len())
    }

    /// Write a task after checking the completion invariant.
    pub(crate) async fn save(&self, task: &Task) -> Result<(), AppError> {
        if !task.completion_consistent() {
            return Err(AppError::invalid_data(format!(
                "task {} is {} but completedAt is {:?}",
                task.id, task.status, task.completed_at
            )));
        }
        self.storage.put(task).await
    }

    pub(crate) async fn record(
        &self,
        task_id: Option<&str>,
        kind: EventKind,
        meta: Value,
    ) -> Result<Event, AppError> {
        let event = Event::new(new_id(), task_id, kind, self.clock.now_millis(), meta);
        self.storage.put(&event).await?;
        Ok(event)
    }

    pub(crate) fn changed(&self) {
        self.sync.refresh();
    }
}

fn require_id(id: &str) -> Result<&str, AppError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(AppError::invalid_input("id is required"))
    } else {
        Ok(trimmed)
    }
}
