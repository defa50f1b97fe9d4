//! taskboard CLI
//!
//! Command-line front end for the task board engine. Every command prints
//! pretty JSON on stdout; failures print an `{code, message}` report.

use anyhow::Result;
use chrono::{DateTime, FixedOffset, Local, Utc};
use clap::Parser;
use serde::Serialize;
use serde_json::{Value, json};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use taskboard::cli::{Cli, Command, DepCommand, ScheduleCommand, TaskCommand, WorkflowCommand};
use taskboard::config::{Config, ScheduleTimezone};
use taskboard::db::Database;
use taskboard::db::schedule::ScheduleRun;
use taskboard::error::{
    DependencyError, ErrorCode, ErrorReport, ScheduleError, StateError, TaskError, WorkflowError,
};
use taskboard::events::TracingNotifier;
use taskboard::logging::{self, LogTarget};
use taskboard::recurrence::{Recurrence, next_run_time};
use taskboard::types::{NewTask, TaskFilter, TaskStatus};
use tracing::{info, warn};

/// Why a command did not produce output.
enum Failure {
    /// An engine error, reported to the caller as JSON.
    Rejected(ErrorReport),
    /// Anything else (I/O, runtime).
    Fatal(anyhow::Error),
}

macro_rules! rejected_from {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for Failure {
                fn from(err: $err) -> Self {
                    Failure::Rejected(ErrorReport::from(&err))
                }
            }
        )*
    };
}

rejected_from!(DependencyError, StateError, WorkflowError, ScheduleError, TaskError);

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        Failure::Fatal(err)
    }
}

type CommandResult = std::result::Result<Value, Failure>;

fn to_json<T: Serialize>(value: &T) -> CommandResult {
    serde_json::to_value(value).map_err(|e| Failure::Fatal(e.into()))
}

fn parse_time(value: &str) -> std::result::Result<DateTime<FixedOffset>, Failure> {
    DateTime::parse_from_rfc3339(value).map_err(|e| {
        Failure::Rejected(ErrorReport::new(
            ErrorCode::InvalidFieldValue,
            format!("invalid RFC 3339 time '{value}': {e}"),
        ))
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let target: LogTarget = match cli.log.parse() {
        Ok(target) => target,
        Err(never) => match never {},
    };
    if let Err(e) = logging::init(&target, cli.verbose) {
        eprintln!("Error: failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    let (config, db) = match open_database(&cli) {
        Ok(opened) => opened,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command, &config, db).await {
        Ok(Value::Null) => ExitCode::SUCCESS,
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {e}");
                ExitCode::FAILURE
            }
        },
        Err(Failure::Rejected(report)) => {
            warn!(code = ?report.code, message = %report.message, "command rejected");
            match serde_json::to_string_pretty(&report) {
                Ok(text) => println!("{text}"),
                Err(_) => eprintln!("Error: {}", report.message),
            }
            ExitCode::from(2)
        }
        Err(Failure::Fatal(e)) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn open_database(cli: &Cli) -> Result<(Config, Database)> {
    let mut config = Config::resolve(cli.config.as_deref())?;
    if let Some(db_path) = &cli.database {
        config.database.path = db_path.clone();
    }
    config.ensure_db_dir()?;

    let db = Database::open(&config.database.path)?.with_notifier(Arc::new(TracingNotifier));
    tracing::debug!(path = %config.database.path.display(), "database opened");
    Ok((config, db))
}

async fn run(command: Command, config: &Config, db: Database) -> CommandResult {
    match command {
        Command::Task(cmd) => run_task(cmd, &db),
        Command::Status { task_id, status } => {
            let status: TaskStatus = status.parse()?;
            let report = db.transition_status(task_id, status)?;
            to_json(&report)
        }
        Command::Dep(cmd) => run_dep(cmd, &db),
        Command::Workflow(cmd) => run_workflow(cmd, &db),
        Command::Schedule(ScheduleCommand::Watch { interval }) => {
            let seconds = interval.unwrap_or(config.scheduler.poll_interval_seconds);
            watch(db, config.scheduler.timezone, seconds.max(1)).await?;
            Ok(Value::Null)
        }
        Command::Schedule(cmd) => run_schedule(cmd, config.scheduler.timezone, &db),
        Command::NextRun { recurrence, from } => {
            // Surface unknown patterns as an error rather than a silent null.
            recurrence.parse::<Recurrence>()?;
            let from = match from {
                Some(text) => parse_time(&text)?,
                None => Utc::now().fixed_offset(),
            };
            let next = match config.scheduler.timezone {
                ScheduleTimezone::Local => {
                    next_run_time(&recurrence, &from.with_timezone(&Local)).map(|t| t.to_rfc3339())
                }
                ScheduleTimezone::Utc => {
                    next_run_time(&recurrence, &from.with_timezone(&Utc)).map(|t| t.to_rfc3339())
                }
            };
            Ok(json!({ "recurrence": recurrence, "next_run": next }))
        }
    }
}

fn run_task(cmd: TaskCommand, db: &Database) -> CommandResult {
    match cmd {
        TaskCommand::Add(args) => {
            let mut input = NewTask::new(args.title);
            if let Some(description) = args.description {
                input = input.with_description(description);
            }
            if let Some(parent) = args.parent {
                input = input.with_parent(parent);
            }
            to_json(&db.create_task(input)?)
        }
        TaskCommand::Show { task_id } => {
            let task = db.get_task(task_id)?.ok_or(TaskError::TaskNotFound(task_id))?;
            to_json(&task)
        }
        TaskCommand::List { status, parent } => {
            let status = status.map(|s| s.parse::<TaskStatus>()).transpose()?;
            let filter = TaskFilter {
                status,
                parent_id: parent,
            };
            to_json(&db.list_tasks(&filter)?)
        }
        TaskCommand::Output { task_id, text } => to_json(&db.set_output(task_id, text)?),
        TaskCommand::Pin { task_id } => to_json(&db.set_pinned(task_id, true)?),
        TaskCommand::Unpin { task_id } => to_json(&db.set_pinned(task_id, false)?),
        TaskCommand::Delete { task_id, cascade } => {
            let deleted = db.delete_task(task_id, cascade)?;
            Ok(json!({ "deleted": deleted }))
        }
        TaskCommand::History { task_id } => to_json(&db.get_status_history(task_id)?),
    }
}

fn run_dep(cmd: DepCommand, db: &Database) -> CommandResult {
    match cmd {
        DepCommand::Add {
            blocker,
            blocked,
            auto_queue,
        } => to_json(&db.add_dependency(blocker, blocked, auto_queue)?),
        DepCommand::Rm { blocker, blocked } => {
            db.remove_dependency(blocker, blocked)?;
            Ok(json!({ "removed": { "blocker_id": blocker, "blocked_id": blocked } }))
        }
        DepCommand::List { task_id } => {
            let blockers = db.get_blockers(task_id)?;
            let blocking = db.get_blocked_by(task_id)?;
            let open_blockers = db.get_open_blocker_count(task_id)?;
            Ok(json!({
                "task_id": task_id,
                "open_blockers": open_blockers,
                "blockers": to_json(&blockers)?,
                "blocking": to_json(&blocking)?,
            }))
        }
        DepCommand::AutoQueue {
            blocker,
            blocked,
            enabled,
        } => {
            db.set_auto_queue(blocker, blocked, enabled)?;
            to_json(&db.get_dependency(blocker, blocked)?)
        }
    }
}

fn run_workflow(cmd: WorkflowCommand, db: &Database) -> CommandResult {
    match cmd {
        WorkflowCommand::Status { parent_id } => to_json(&db.get_workflow_status(parent_id)?),
        WorkflowCommand::Check { parent_id } => {
            let completed = db.check_and_complete_parent(parent_id)?;
            Ok(json!({ "parent_id": parent_id, "completed": completed }))
        }
    }
}

fn run_schedule(cmd: ScheduleCommand, tz: ScheduleTimezone, db: &Database) -> CommandResult {
    match cmd {
        ScheduleCommand::Set {
            task_id,
            at,
            recurrence,
        } => {
            let at = parse_time(&at)?;
            let recurrence: Recurrence = recurrence.parse()?;
            to_json(&db.set_schedule(task_id, at.timestamp_millis(), recurrence)?)
        }
        ScheduleCommand::Clear { task_id } => to_json(&db.clear_schedule(task_id)?),
        ScheduleCommand::Due => to_json(&db.get_due_scheduled_tasks(Utc::now().timestamp_millis())?),
        ScheduleCommand::Tick => to_json(&tick(db, tz)?),
        ScheduleCommand::Watch { .. } => Ok(Value::Null),
    }
}

fn tick(db: &Database, tz: ScheduleTimezone) -> std::result::Result<ScheduleRun, ScheduleError> {
    match tz {
        ScheduleTimezone::Local => db.queue_due_tasks_at(&Local::now()),
        ScheduleTimezone::Utc => db.queue_due_tasks_at(&Utc::now()),
    }
}

/// Queue due tasks every `seconds` until Ctrl-C.
async fn watch(db: Database, tz: ScheduleTimezone, seconds: u64) -> Result<()> {
    info!(interval_seconds = seconds, timezone = ?tz, "scheduler started");
    let mut interval = tokio::time::interval(Duration::from_secs(seconds));

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let db = db.clone();
                let run = tokio::task::spawn_blocking(move || tick(&db, tz)).await?;
                match run {
                    Ok(run) if run.queued.is_empty() && run.invalid_recurrence.is_empty() => {
                        tracing::debug!("no tasks due");
                    }
                    Ok(run) => {
                        info!(queued = ?run.queued, invalid = ?run.invalid_recurrence, "scheduler tick");
                    }
                    // A failed tick is retried on the next interval.
                    Err(e) => warn!(error = %e, "scheduler tick failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("scheduler stopped");
                return Ok(());
            }
        }
    }
}
