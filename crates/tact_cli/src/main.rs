use clap::{CommandFactory, Parser};
use std::io::{self, BufRead};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tact_cli::cli::{Cli, Command, DayTarget, ListCommand, MoveTarget, collect_config_overrides};
use tact_core::clock::{Clock, SystemClock};
use tact_core::config::{self, merge_overrides};
use tact_core::error::AppError;
use tact_core::lifecycle::{DropTarget, TaskPatch};
use tact_core::model::{Event, Millis, Task};
use tact_core::notify::{notifier_from_env, notify_escalations};
use std::path::Path;
use std::sync::Arc;
use tact_core::sync::{SyncBus, SyncHub, SyncListener};
use tact_core::task_api::{Board, NewTask, TaskApi, short_id};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "TACT_LOG";
const EVENT_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Day")]
    day: String,
    #[tabled(rename = "Est")]
    estimate: String,
    #[tabled(rename = "Actual")]
    actual: String,
    #[tabled(rename = "Rolled")]
    rolled: String,
}

impl From<&Task> for TaskRow {
    fn from(task: &Task) -> Self {
        let minutes = |value: u32| {
            if value > 0 {
                format!("{value}m")
            } else {
                "-".to_string()
            }
        };
        let mut title = task.title.clone();
        if let Some(reason) = task.blocked_reason.as_deref() {
            title.push_str(&format!(" (blocked: {reason})"));
        }
        Self {
            id: short_id(&task.id).to_string(),
            title,
            status: task.status.to_string(),
            day: task
                .day_key
                .map(|day| day.to_string())
                .unwrap_or_else(|| "-".to_string()),
            estimate: minutes(task.estimate_min),
            actual: minutes(task.actual_min),
            rolled: if task.rollover_count > 0 {
                task.rollover_count.to_string()
            } else {
                "-".to_string()
            },
        }
    }
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "When")]
    when: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Task")]
    task: String,
    #[tabled(rename = "Meta")]
    meta: String,
}

fn event_row(event: &Event, offset: UtcOffset) -> EventRow {
    EventRow {
        when: format_millis(event.ts, offset),
        kind: event.kind.as_str().to_string(),
        task: event
            .task_id
            .as_deref()
            .map(|id| short_id(id).to_string())
            .unwrap_or_else(|| "-".to_string()),
        meta: event.meta.to_string(),
    }
}

fn format_millis(millis: Millis, offset: UtcOffset) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(millis as i128 * 1_000_000)
        .ok()
        .and_then(|instant| instant.to_offset(offset).format(EVENT_TIME_FORMAT).ok())
        .unwrap_or_else(|| millis.to_string())
}

fn print_tasks_table(tasks: &[Task]) {
    if tasks.is_empty() {
        println!("(none)");
        return;
    }
    let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
    let mut table = Table::new(rows);
    table.with(Style::sharp());
    println!("{table}");
}

fn print_board(board: &Board) {
    println!("{}", board.day);
    print_tasks_table(&board.open);
    if !board.done.is_empty() {
        println!("Done ({})", board.done.len());
        print_tasks_table(&board.done);
    }
    let budget = if board.over_budget { " (over budget)" } else { "" };
    println!(
        "In progress {}/{}  Planned {}m of {}m{}",
        board.active, board.wip_limit, board.estimate_min, board.available_min, budget
    );
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_task(json: bool, verb: &str, task: &Task) -> Result<(), AppError> {
    if json {
        print_json(task)
    } else {
        println!("{verb} task: {} ({})", task.title, short_id(&task.id));
        Ok(())
    }
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn split_command_line(line: &str) -> Result<Vec<String>, AppError> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape = false;

    for ch in line.chars() {
        if escape {
            if ch != '"' && ch != '\\' {
                current.push('\\');
            }
            current.push(ch);
            escape = false;
            continue;
        }

        if in_quotes && ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '"' {
            in_quotes = !in_quotes;
            continue;
        }

        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                args.push(std::mem::take(&mut current));
            }
            continue;
        }

        current.push(ch);
    }

    if in_quotes {
        return Err(AppError::invalid_input("unterminated quote in command"));
    }

    if !current.is_empty() {
        args.push(current);
    }

    Ok(args)
}

fn print_help() {
    let mut cmd = Cli::command();
    let help = cmd.render_help();
    println!("{help}");
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn open_api(config_override: &[String], sync: SyncBus) -> Result<TaskApi, AppError> {
    let loaded = config::load_config_with_fallback();
    if let Some(err) = loaded.error {
        warn!(error = %err, "config unreadable, using defaults");
    }
    let overrides = collect_config_overrides(config_override).map_err(AppError::invalid_input)?;
    let merged = merge_overrides(&loaded.config, &overrides);
    let data_dir = config::data_dir()?;
    Ok(TaskApi::open(merged, &data_dir, sync))
}

/// A hub that reaches other processes on this data directory, or a
/// process-local one when the signal file cannot be set up.
fn device_hub(data_dir: &Path) -> Arc<SyncHub> {
    match SyncHub::on_device(data_dir) {
        Ok(hub) => hub,
        Err(err) => {
            warn!(error = %err, "cross-process sync unavailable");
            SyncHub::new()
        }
    }
}

async fn run_command(cli: Cli, sync: SyncBus) -> Result<(), AppError> {
    let api = open_api(&cli.config_override, sync)?;
    let json = cli.json;
    let today = SystemClock.today();

    match cli.command {
        Command::Add {
            title,
            tomorrow,
            day,
            backlog,
            estimate,
            project,
            tags,
            force,
        } => {
            let day = if backlog {
                None
            } else if tomorrow {
                Some(today.next())
            } else if let Some(raw) = day {
                DayTarget::parse(&raw)
                    .map_err(AppError::invalid_input)?
                    .resolve(today)
            } else {
                Some(today)
            };
            let draft = NewTask {
                title,
                day,
                estimate_min: estimate,
                project_id: project,
                tags,
                notes: None,
            };
            let task = api.add(draft, force).await?;
            print_task(json, "Added", &task)?;
        }
        Command::Start { id } => {
            let task = api.start(&id).await?;
            print_task(json, "Started", &task)?;
        }
        Command::Done { id } => {
            let task = api.complete(&id).await?;
            print_task(json, "Completed", &task)?;
        }
        Command::Defer { id, reason } => {
            let task = api.defer(&id, reason.as_deref()).await?;
            print_task(json, "Deferred", &task)?;
        }
        Command::Undo { id } => {
            let task = api.undo(&id).await?;
            print_task(json, "Reopened", &task)?;
        }
        Command::Delete { id, yes } => {
            let task = api.delete(&id, yes).await?;
            print_task(json, "Deleted", &task)?;
        }
        Command::Edit {
            id,
            title,
            estimate,
            project,
            clear_project,
            tags,
            clear_tags,
            blocked,
            unblock,
        } => {
            let patch = TaskPatch {
                title,
                notes: None,
                project_id: if clear_project {
                    Some(None)
                } else {
                    project.map(Some)
                },
                tags: if clear_tags {
                    Some(Vec::new())
                } else if tags.is_empty() {
                    None
                } else {
                    Some(tags)
                },
                estimate_min: estimate,
                blocked_reason: if unblock { Some(None) } else { blocked.map(Some) },
            };
            let task = api.edit(&id, patch).await?;
            print_task(json, "Updated", &task)?;
        }
        Command::Schedule { id, day } => {
            let target = DayTarget::parse(&day).map_err(AppError::invalid_input)?;
            let task = api.schedule(&id, target.resolve(today)).await?;
            if json {
                print_json(&task)?;
            } else {
                let when = task
                    .day_key
                    .map(|day| day.to_string())
                    .unwrap_or_else(|| "backlog".to_string());
                println!(
                    "Scheduled task: {} ({}) for {}",
                    task.title,
                    short_id(&task.id),
                    when
                );
            }
        }
        Command::Move { id, to, before } => {
            let target = match to {
                MoveTarget::Today => DropTarget::Today,
                MoveTarget::Done => DropTarget::Done,
            };
            let task = api.move_to(&id, target, before.as_deref()).await?;
            if json {
                print_json(&task)?;
            } else {
                println!(
                    "Moved task: {} ({}) to {}",
                    task.title,
                    short_id(&task.id),
                    target.as_str()
                );
            }
        }
        Command::LogTime { id, minutes } => {
            let task = api.log_time(&id, minutes).await?;
            if json {
                print_json(&task)?;
            } else {
                println!(
                    "Logged {minutes}m on task: {} ({}), {}m total",
                    task.title,
                    short_id(&task.id),
                    task.actual_min
                );
            }
        }
        Command::List { list } => match list {
            ListCommand::Today { filter } => {
                let board = api.board_for(today, &filter.to_filter()).await?;
                if json {
                    print_json(&board)?;
                } else {
                    print_board(&board);
                }
            }
            ListCommand::Backlog { filter } => {
                let tasks = api.backlog(&filter.to_filter()).await?;
                if json {
                    print_json(&tasks)?;
                } else {
                    print_tasks_table(&tasks);
                }
            }
        },
        Command::Summary => {
            let summary = api.summary().await?;
            if json {
                print_json(&serde_json::json!({ "summary": summary }))?;
            } else {
                print!("{summary}");
            }
        }
        Command::CloseDay => {
            let report = api.close_day().await?;
            if !report.escalations.is_empty() {
                match notifier_from_env() {
                    Ok(notifier) => {
                        notify_escalations(notifier.as_ref(), &report.escalations);
                    }
                    Err(err) => warn!(error = %err, "notifications unavailable"),
                }
            }
            if json {
                print_json(&report)?;
            } else {
                print!("{}", report.summary);
                for escalation in &report.escalations {
                    println!("! {}", escalation.message());
                }
            }
        }
        Command::Events { limit } => {
            let events = api.events(limit).await?;
            if json {
                print_json(&events)?;
            } else if events.is_empty() {
                println!("(none)");
            } else {
                let offset = SystemClock.offset();
                let rows: Vec<EventRow> =
                    events.iter().map(|event| event_row(event, offset)).collect();
                let mut table = Table::new(rows);
                table.with(Style::sharp());
                println!("{table}");
            }
        }
        Command::Export { file } => {
            let payload = api.export().await?;
            match file {
                Some(path) => {
                    std::fs::write(&path, serde_json::to_string_pretty(&payload)?)
                        .map_err(|err| AppError::io(format!("{path}: {err}")))?;
                    if json {
                        print_json(&serde_json::json!({
                            "path": path,
                            "tasks": payload.tasks.len(),
                            "events": payload.events.len(),
                        }))?;
                    } else {
                        println!(
                            "Exported {} tasks and {} events to {path}",
                            payload.tasks.len(),
                            payload.events.len()
                        );
                    }
                }
                None => print_json(&payload)?,
            }
        }
        Command::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .map_err(|err| AppError::io(format!("{file}: {err}")))?;
            let outcome = api.import_text(&text).await?;
            if json {
                print_json(&outcome)?;
            } else {
                println!(
                    "Imported {} tasks and {} events",
                    outcome.tasks, outcome.events
                );
            }
        }
        Command::ClearDone { yes } => {
            let cleared = api.clear_done(yes).await?;
            if json {
                print_json(&serde_json::json!({ "cleared": cleared }))?;
            } else {
                println!("Cleared {cleared} done tasks");
            }
        }
        Command::Reset { yes } => {
            api.reset(yes).await?;
            if json {
                print_json(&serde_json::json!({ "reset": true }))?;
            } else {
                println!("All data deleted");
            }
        }
    }

    Ok(())
}

/// Reprint today's board whenever another instance writes.
fn listen_for_peers(runtime: &Runtime, hub: &SyncHub, session: &SyncBus) -> Option<SyncListener> {
    if !config::load_config_with_fallback().config.sync {
        return None;
    }
    if let Err(err) = hub.watch_device() {
        warn!(error = %err, "live refresh unavailable");
    }

    let _guard = runtime.enter();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let listener = session.on_notify(move |message| {
        let _ = tx.send(message);
    })?;
    runtime.spawn(async move {
        while rx.recv().await.is_some() {
            println!("Refreshed by another instance");
            let board = match open_api(&[], SyncBus::Unavailable) {
                Ok(api) => api.board().await,
                Err(err) => Err(err),
            };
            match board {
                Ok(board) => print_board(&board),
                Err(err) => eprintln!("ERROR: {}", err),
            }
        }
    });
    Some(listener)
}

fn run_interactive(runtime: &Runtime) -> Result<(), AppError> {
    let hub = device_hub(&config::data_dir()?);
    // One endpoint for the whole session so its own writes are not echoed.
    let session = hub.endpoint();
    let _listener = listen_for_peers(runtime, &hub, &session);

    let mut input = String::new();
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();

    loop {
        input.clear();
        let bytes = stdin_lock
            .read_line(&mut input)
            .map_err(|err| AppError::io(err.to_string()))?;

        if bytes == 0 {
            break;
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        if line == "help" || line == "?" {
            print_help();
            continue;
        }

        let args = match split_command_line(line) {
            Ok(args) => args,
            Err(err) => {
                eprintln!("ERROR: {}", err);
                continue;
            }
        };

        if args.is_empty() {
            continue;
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("tact".to_string());
        argv.extend(args);

        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                continue;
            }
        };

        if let Err(err) = runtime.block_on(run_command(cli, session.clone())) {
            eprintln!("ERROR: {}", err);
        }
    }

    Ok(())
}

fn main() {
    init_logging();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("ERROR: {}", AppError::io(err.to_string()));
            std::process::exit(1);
        }
    };
    let mut args = std::env::args_os();
    args.next();
    if args.next().is_none() {
        if let Err(err) = run_interactive(&runtime) {
            eprintln!("ERROR: {}", err);
            std::process::exit(1);
        }
        return;
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            let _ = err.print();
            return;
        }
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };

    let hub = match config::data_dir() {
        Ok(data_dir) => device_hub(&data_dir),
        Err(_) => SyncHub::new(),
    };
    if let Err(err) = runtime.block_on(run_command(cli, hub.endpoint())) {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
