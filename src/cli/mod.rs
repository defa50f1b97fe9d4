//! CLI command definitions for taskboard.
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Task board engine: dependencies, workflows and schedules
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to database file (overrides config)
    #[arg(short, long, global = true)]
    pub database: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create, inspect and edit tasks
    #[command(subcommand)]
    Task(TaskCommand),

    /// Move a task to a new status (backlog, queued, processing, blocked, done, archived)
    Status {
        task_id: i64,
        status: String,
    },

    /// Manage "blocks" dependencies between tasks
    #[command(subcommand)]
    Dep(DepCommand),

    /// Inspect and complete parent/subtask workflows
    #[command(subcommand)]
    Workflow(WorkflowCommand),

    /// Schedule tasks and queue them when due
    #[command(subcommand)]
    Schedule(ScheduleCommand),

    /// Print the next run time for a recurrence pattern
    NextRun {
        /// hourly, daily, weekly, monthly (empty for none)
        recurrence: String,

        /// RFC 3339 start time (default: now)
        #[arg(long)]
        from: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Create a task in the backlog
    Add(AddTaskArgs),

    /// Show a task
    Show { task_id: i64 },

    /// List tasks
    List {
        /// Only tasks with this status
        #[arg(long)]
        status: Option<String>,

        /// Only subtasks of this parent
        #[arg(long)]
        parent: Option<i64>,
    },

    /// Set a task's output text
    Output { task_id: i64, text: String },

    /// Pin a task to the top of the board
    Pin { task_id: i64 },

    /// Unpin a task
    Unpin { task_id: i64 },

    /// Delete a task
    Delete {
        task_id: i64,

        /// Also delete all subtasks (default: orphan them)
        #[arg(long)]
        cascade: bool,
    },

    /// Show a task's status history
    History { task_id: i64 },
}

#[derive(Args, Debug)]
pub struct AddTaskArgs {
    pub title: String,

    #[arg(long)]
    pub description: Option<String>,

    /// Parent task ID (makes this a subtask)
    #[arg(long)]
    pub parent: Option<i64>,
}

#[derive(Subcommand, Debug)]
pub enum DepCommand {
    /// BLOCKER blocks BLOCKED
    Add {
        blocker: i64,
        blocked: i64,

        /// Queue the blocked task (instead of returning it to backlog) once unblocked
        #[arg(long)]
        auto_queue: bool,
    },

    /// Remove a dependency
    Rm { blocker: i64, blocked: i64 },

    /// Show blockers and blocked tasks for a task
    List { task_id: i64 },

    /// Set the auto-queue flag on a dependency
    AutoQueue {
        blocker: i64,
        blocked: i64,
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// Aggregate subtask counts for a parent
    Status { parent_id: i64 },

    /// Complete the parent if every subtask is done or archived
    Check { parent_id: i64 },
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// Schedule a task
    Set {
        task_id: i64,

        /// RFC 3339 time at which the task becomes due
        #[arg(long)]
        at: String,

        /// hourly, daily, weekly or monthly
        #[arg(long, default_value = "")]
        recurrence: String,
    },

    /// Remove a task's schedule
    Clear { task_id: i64 },

    /// List tasks that are due now
    Due,

    /// Queue every due task once
    Tick,

    /// Queue due tasks periodically until interrupted
    Watch {
        /// Poll interval in seconds (overrides config)
        #[arg(long)]
        interval: Option<u64>,
    },
}
