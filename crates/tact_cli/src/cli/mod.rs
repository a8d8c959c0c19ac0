use clap::{Args, Parser, Subcommand, ValueEnum};
use tact_core::config::ConfigOverrides;
use tact_core::model::DayKey;
use tact_core::storage::BackendPreference;
use tact_core::summary::SummaryFormat;
use tact_core::task_api::TaskFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Local-first daily task tracker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new task, on today's list unless told otherwise
    ///
    /// Example: tact add "Write report" --estimate 45 --tag deep
    /// Example: tact add "Call bank" --tomorrow
    Add {
        title: String,
        /// Schedule for tomorrow
        #[arg(long, conflicts_with_all = ["day", "backlog"])]
        tomorrow: bool,
        /// Schedule for a day (YYYY-MM-DD)
        #[arg(long, value_name = "DAY", conflicts_with = "backlog")]
        day: Option<String>,
        /// Leave unscheduled
        #[arg(long)]
        backlog: bool,
        /// Estimated minutes
        #[arg(long, value_name = "MIN", default_value_t = 0)]
        estimate: u32,
        #[arg(long)]
        project: Option<String>,
        #[arg(long = "tag", value_name = "TAG")]
        tags: Vec<String>,
        /// Add even if an open task has the same title
        #[arg(long)]
        force: bool,
    },
    /// Start working on a task
    ///
    /// Example: tact start 3f2a
    Start { id: String },
    /// Mark a task as done
    ///
    /// Example: tact done 3f2a
    Done { id: String },
    /// Stop working on a task and send it to the end of today's list
    ///
    /// Example: tact defer 3f2a --reason "waiting on review"
    Defer {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Reopen a done task
    ///
    /// Example: tact undo 3f2a
    Undo { id: String },
    /// Delete a task
    ///
    /// Example: tact delete 3f2a --yes
    Delete {
        id: String,
        #[arg(long)]
        yes: bool,
    },
    /// Edit task fields
    ///
    /// Example: tact edit 3f2a --title "Write final report" --estimate 60
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, value_name = "MIN")]
        estimate: Option<u32>,
        #[arg(long, conflicts_with = "clear_project")]
        project: Option<String>,
        #[arg(long)]
        clear_project: bool,
        /// Replace all tags
        #[arg(long = "tag", value_name = "TAG", conflicts_with = "clear_tags")]
        tags: Vec<String>,
        #[arg(long)]
        clear_tags: bool,
        #[arg(long, value_name = "REASON", conflicts_with = "unblock")]
        blocked: Option<String>,
        #[arg(long)]
        unblock: bool,
    },
    /// Move a task to another day or to the backlog
    ///
    /// Example: tact schedule 3f2a tomorrow
    /// Example: tact schedule 3f2a 2024-06-10
    /// Example: tact schedule 3f2a backlog
    Schedule { id: String, day: String },
    /// Drop a task onto a list, optionally ahead of another task
    ///
    /// Example: tact move 3f2a --to today --before 9c1d
    Move {
        id: String,
        #[arg(long, value_enum)]
        to: MoveTarget,
        #[arg(long, value_name = "ID")]
        before: Option<String>,
    },
    /// Add minutes of actual work to a task
    ///
    /// Example: tact log-time 3f2a 25
    LogTime { id: String, minutes: u32 },
    /// List tasks
    ///
    /// Example: tact list today
    /// Example: tact list backlog --tag deep
    /// Example: tact list today --query "@deep #clientA"
    List {
        #[command(subcommand)]
        list: ListCommand,
    },
    /// Show the summary for today without closing it
    Summary,
    /// Close today: roll unfinished tasks to tomorrow and save the summary
    CloseDay,
    /// Show the most recent events
    ///
    /// Example: tact events --limit 20
    Events {
        #[arg(long, default_value_t = tact_core::task_api::DEFAULT_EVENT_LIMIT)]
        limit: usize,
    },
    /// Export tasks and events as JSON, to a file or stdout
    ///
    /// Example: tact export backup.json
    Export { file: Option<String> },
    /// Replace all data with an export file
    ///
    /// Example: tact import backup.json
    Import { file: String },
    /// Delete every done task
    ClearDone {
        #[arg(long)]
        yes: bool,
    },
    /// Delete all data
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ListCommand {
    /// Tasks on today's list
    Today {
        #[command(flatten)]
        filter: ListFilter,
    },
    /// Unscheduled, future and stale tasks
    Backlog {
        #[command(flatten)]
        filter: ListFilter,
    },
}

#[derive(Args, Debug, Default, Clone, PartialEq, Eq)]
pub struct ListFilter {
    #[arg(long)]
    pub tag: Option<String>,
    #[arg(long)]
    pub project: Option<String>,
    /// Text to look for; @tag and #project words also work
    #[arg(long, short = 'q', value_name = "TEXT")]
    pub query: Option<String>,
}

impl ListFilter {
    /// Explicit --tag and --project win over words in the query.
    pub fn to_filter(&self) -> TaskFilter {
        let mut filter = self
            .query
            .as_deref()
            .map(TaskFilter::parse)
            .unwrap_or_default();
        if let Some(tag) = &self.tag {
            filter.tag = Some(tag.clone());
        }
        if let Some(project) = &self.project {
            filter.project = Some(project.clone());
        }
        filter
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MoveTarget {
    Today,
    Done,
}

/// Where `schedule` sends a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayTarget {
    Today,
    Tomorrow,
    Backlog,
    Date(DayKey),
}

impl DayTarget {
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "tomorrow" => Ok(Self::Tomorrow),
            "backlog" | "none" => Ok(Self::Backlog),
            other => DayKey::parse(other)
                .map(Self::Date)
                .map_err(|_| format!("expected today, tomorrow, backlog or YYYY-MM-DD, got '{raw}'")),
        }
    }

    pub fn resolve(self, today: DayKey) -> Option<DayKey> {
        match self {
            Self::Today => Some(today),
            Self::Tomorrow => Some(today.next()),
            Self::Backlog => None,
            Self::Date(day) => Some(day),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    WipLimit,
    RolloverThreshold,
    SummaryFormat,
    SummaryWithTimes,
    AvailableHours,
    Sync,
    Backend,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub target: ConfigOverrideTarget,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string into a structured target.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let value = value_raw.trim().to_string();
    let field =
        canonicalize_flag_name(key_raw).ok_or_else(|| "override key cannot be empty".to_string())?;

    let target = match field.as_str() {
        "wip_limit" | "wip" => ConfigOverrideTarget::WipLimit,
        "rollover_threshold" => ConfigOverrideTarget::RolloverThreshold,
        "summary_format" => ConfigOverrideTarget::SummaryFormat,
        "summary_with_times" => ConfigOverrideTarget::SummaryWithTimes,
        "available_hours" => ConfigOverrideTarget::AvailableHours,
        "sync" => ConfigOverrideTarget::Sync,
        "backend" => ConfigOverrideTarget::Backend,
        other => return Err(format!("unknown config field '{other}'")),
    };

    Ok(ParsedConfigOverride { target, value })
}

/// Fold every `--config-override` into one set; later ones win.
pub fn collect_config_overrides(raw: &[String]) -> Result<ConfigOverrides, String> {
    let mut overrides = ConfigOverrides::default();
    for entry in raw {
        let parsed = parse_config_override(entry)?;
        let value = parsed.value.as_str();
        match parsed.target {
            ConfigOverrideTarget::WipLimit => {
                overrides.wip_limit = Some(parse_number(value, "wip_limit")?);
            }
            ConfigOverrideTarget::RolloverThreshold => {
                overrides.rollover_threshold = Some(parse_number(value, "rollover_threshold")?);
            }
            ConfigOverrideTarget::SummaryFormat => {
                let format = SummaryFormat::parse(value)
                    .ok_or_else(|| format!("summary_format must be markdown or plain, got '{value}'"))?;
                overrides.summary_format = Some(format);
            }
            ConfigOverrideTarget::SummaryWithTimes => {
                overrides.summary_with_times = Some(parse_flag(value, "summary_with_times")?);
            }
            ConfigOverrideTarget::AvailableHours => {
                overrides.available_hours = Some(parse_number(value, "available_hours")?);
            }
            ConfigOverrideTarget::Sync => {
                overrides.sync = Some(parse_flag(value, "sync")?);
            }
            ConfigOverrideTarget::Backend => {
                let backend = BackendPreference::parse(value).ok_or_else(|| {
                    format!("backend must be auto, indexed, fallback or memory, got '{value}'")
                })?;
                overrides.backend = Some(backend);
            }
        }
    }
    Ok(overrides)
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("{field} expects a number, got '{value}'"))
}

fn parse_flag(value: &str, field: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("{field} expects true or false, got '{value}'")),
    }
}

fn canonicalize_flag_name(name: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
