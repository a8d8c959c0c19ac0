//! End-of-day summary text.
//!
//! Output depends only on the arguments: both task sets are sorted here, so
//! callers may pass them in any order.

use crate::model::{DayKey, Millis, Task};
use crate::ordering;
use serde::{Deserialize, Serialize};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

const TIME_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]");
const ROLLOVER_MARK: &str = "\u{21a9}\u{fe0e}";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryFormat {
    #[default]
    #[serde(alias = "md")]
    Markdown,
    Plain,
}

impl SummaryFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "markdown" | "md" => Some(Self::Markdown),
            "plain" | "text" | "txt" => Some(Self::Plain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryOptions {
    pub format: SummaryFormat,
    pub with_times: bool,
    /// Offset completion times are shown in.
    pub offset: UtcOffset,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            format: SummaryFormat::Markdown,
            with_times: true,
            offset: UtcOffset::UTC,
        }
    }
}

pub fn render_summary(
    day: DayKey,
    done: &[Task],
    unfinished: &[Task],
    options: &SummaryOptions,
) -> String {
    let markdown = options.format == SummaryFormat::Markdown;
    let bullet = if markdown { "- " } else { "" };

    let mut done: Vec<&Task> = done.iter().collect();
    done.sort_by(|a, b| {
        a.completed_at
            .cmp(&b.completed_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    let mut unfinished: Vec<&Task> = unfinished.iter().collect();
    unfinished.sort_by(|a, b| ordering::compare(a, b));

    let week = if day.is_monday() {
        format!(" \u{2014} Week {}", day.iso_week())
    } else {
        String::new()
    };

    let mut lines = Vec::with_capacity(done.len() + unfinished.len() + 6);
    lines.push(heading(
        markdown,
        "#",
        &format!("{day} \u{2014} Daily Summary{week}"),
    ));
    lines.push(String::new());

    lines.push(heading(markdown, "##", &format!("Done ({})", done.len())));
    for task in &done {
        let duration = if task.actual_min > 0 {
            format!(" [{}m]", task.actual_min)
        } else if task.estimate_min > 0 {
            format!(" [~{}m]", task.estimate_min)
        } else {
            String::new()
        };
        let when = match task.completed_at {
            Some(completed_at) if options.with_times => {
                format!("  \u{2014} {}", clock_time(completed_at, options.offset))
            }
            _ => String::new(),
        };
        let project = match task.project_id.as_deref() {
            Some(project) if !project.is_empty() => format!("  #{project}"),
            _ => String::new(),
        };
        let tags = task
            .tags
            .iter()
            .map(|tag| format!("@{tag}"))
            .collect::<Vec<_>>()
            .join(" ");
        let line = format!("{bullet}{}{duration}{when}{project} {tags}", task.title);
        lines.push(line.trim().to_string());
    }
    lines.push(String::new());

    lines.push(heading(
        markdown,
        "##",
        &format!("Rolled over to {} ({})", day.next(), unfinished.len()),
    ));
    for task in &unfinished {
        let mut info = Vec::new();
        if task.rollover_count > 0 {
            info.push(format!("{ROLLOVER_MARK}{}", task.rollover_count));
        }
        if task.estimate_min > 0 {
            info.push(format!("~{}m", task.estimate_min));
        }
        let line = format!("{bullet}{} {}", task.title, info.join(" "));
        lines.push(line.trim().to_string());
    }
    lines.push(String::new());

    lines.join("\n")
}

fn heading(markdown: bool, marker: &str, text: &str) -> String {
    if markdown {
        format!("{marker} {text}")
    } else {
        text.to_string()
    }
}

fn clock_time(millis: Millis, offset: UtcOffset) -> String {
    let nanos = millis as i128 * 1_000_000;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|instant| instant.to_offset(offset).format(TIME_FORMAT).ok())
        .unwrap_or_default()
}
