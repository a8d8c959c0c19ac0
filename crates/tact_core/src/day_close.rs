//! End-of-day processing: finalize completions, roll unfinished work to the
//! next day, flag chronic rollovers and snapshot the day.

use crate::error::AppError;
use crate::lifecycle::TaskLifecycle;
use crate::model::{Day, DayCounts, DayKey, EventKind, Task, TaskStatus};
use crate::ordering;
use crate::summary::{SummaryOptions, render_summary};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

pub const DEFAULT_ROLLOVER_THRESHOLD: u32 = 3;

/// A task that has been carried forward at least `threshold` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Escalation {
    pub task_id: String,
    pub title: String,
    pub rollover_count: u32,
}

impl Escalation {
    pub fn message(&self) -> String {
        format!(
            "Rollover x{}: consider delete, delegate, or rescope \u{201c}{}\u{201d}",
            self.rollover_count, self.title
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCloseReport {
    pub day: DayKey,
    pub next_day: DayKey,
    pub done: Vec<Task>,
    /// Tasks as persisted after the rollover.
    pub rolled: Vec<Task>,
    pub auto_completed: usize,
    pub escalations: Vec<Escalation>,
    pub summary: String,
    pub snapshot: Day,
}

#[derive(Clone)]
pub struct DayCloseEngine {
    lifecycle: TaskLifecycle,
    threshold: u32,
    summary: SummaryOptions,
}

impl DayCloseEngine {
    pub fn new(lifecycle: TaskLifecycle, threshold: u32, summary: SummaryOptions) -> Self {
        Self {
            lifecycle,
            threshold: threshold.max(1),
            summary,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Close the current local day.
    pub async fn close_day(&self) -> Result<DayCloseReport, AppError> {
        let clock = self.lifecycle.clock();
        let day = clock.today();
        let next_day = day.next();
        let now = clock.now_millis();

        let mut unfinished = self.lifecycle.tasks_for(day, TaskStatus::Today).await?;
        unfinished.extend(self.lifecycle.tasks_for(day, TaskStatus::InProgress).await?);
        ordering::sort_for_display(&mut unfinished);
        let done = self.lifecycle.tasks_for(day, TaskStatus::Done).await?;

        let mut auto_completed = 0;
        for mut task in done {
            if task.completed_at.is_none() {
                task.completed_at = Some(now);
                self.lifecycle.save(&task).await?;
                self.lifecycle
                    .record(Some(&task.id), EventKind::Complete, json!({ "auto": true }))
                    .await?;
                auto_completed += 1;
            }
        }

        let mut rolled = Vec::with_capacity(unfinished.len());
        let mut escalations = Vec::new();
        for task in &unfinished {
            let mut next = task.clone();
            next.rollover_count = next.rollover_count.saturating_add(1);
            next.day_key = Some(next_day);
            next.status = TaskStatus::Today;

            self.lifecycle.save(&next).await?;
            self.lifecycle
                .record(
                    Some(&next.id),
                    EventKind::Rollover,
                    json!({ "to": next_day, "count": next.rollover_count }),
                )
                .await?;
            debug!(task_id = %next.id, count = next.rollover_count, "task rolled over");

            if next.rollover_count >= self.threshold {
                escalations.push(Escalation {
                    task_id: next.id.clone(),
                    title: next.title.clone(),
                    rollover_count: next.rollover_count,
                });
            }
            rolled.push(next);
        }

        let done = self.lifecycle.tasks_for(day, TaskStatus::Done).await?;
        let options = SummaryOptions {
            offset: clock.offset(),
            ..self.summary
        };
        let summary = render_summary(day, &done, &unfinished, &options);

        let snapshot = Day {
            id: day,
            closed_at: now,
            counts: DayCounts {
                done: done.len(),
                unfinished: unfinished.len(),
            },
            snapshot_markdown: summary.clone(),
        };
        self.lifecycle.storage().put(&snapshot).await?;
        self.lifecycle
            .record(None, EventKind::CloseDay, json!({ "day": day }))
            .await?;
        self.lifecycle.changed();

        info!(
            %day,
            done = done.len(),
            rolled = rolled.len(),
            escalations = escalations.len(),
            "day closed"
        );

        Ok(DayCloseReport {
            day,
            next_day,
            done,
            rolled,
            auto_completed,
            escalations,
            summary,
            snapshot,
        })
    }
}
