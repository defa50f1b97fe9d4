//! Core types for the task board engine.

use crate::error::StateError;
use rusqlite::ToSql;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Task lifecycle status.
///
/// `Done` and `Archived` are terminal: they count as resolved for blocking
/// purposes and trigger the completion cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Backlog,
    Queued,
    Processing,
    Blocked,
    Done,
    Archived,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Backlog,
        TaskStatus::Queued,
        TaskStatus::Processing,
        TaskStatus::Blocked,
        TaskStatus::Done,
        TaskStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Backlog => "backlog",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Done => "done",
            TaskStatus::Archived => "archived",
        }
    }

    /// Whether a task in this status releases the tasks it blocks.
    pub fn is_terminal(&self) -> bool {
        match self {
            TaskStatus::Done | TaskStatus::Archived => true,
            TaskStatus::Backlog
            | TaskStatus::Queued
            | TaskStatus::Processing
            | TaskStatus::Blocked => false,
        }
    }

    /// Whether entering this status stamps `completed_at`.
    pub fn stamps_completion(&self) -> bool {
        match self {
            TaskStatus::Done | TaskStatus::Blocked | TaskStatus::Archived => true,
            TaskStatus::Backlog | TaskStatus::Queued | TaskStatus::Processing => false,
        }
    }

    /// Workflow bucket this status is counted under.
    pub fn bucket(&self) -> StatusBucket {
        match self {
            TaskStatus::Backlog | TaskStatus::Queued => StatusBucket::Pending,
            TaskStatus::Processing => StatusBucket::Processing,
            TaskStatus::Blocked => StatusBucket::Blocked,
            TaskStatus::Done => StatusBucket::Done,
            TaskStatus::Archived => StatusBucket::Archived,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "backlog" => Ok(TaskStatus::Backlog),
            "queued" => Ok(TaskStatus::Queued),
            "processing" => Ok(TaskStatus::Processing),
            "blocked" => Ok(TaskStatus::Blocked),
            "done" => Ok(TaskStatus::Done),
            "archived" => Ok(TaskStatus::Archived),
            other => Err(StateError::InvalidStatus(other.to_string())),
        }
    }
}

impl ToSql for TaskStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Aggregation bucket for workflow counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusBucket {
    Pending,
    Processing,
    Blocked,
    Done,
    Archived,
}

/// A task on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: TaskStatus,
    pub parent_id: Option<i64>,
    pub pinned: bool,
    pub output: Option<String>,

    // Scheduling
    pub scheduled_at: Option<i64>,
    /// Recurrence pattern; empty for one-time tasks.
    pub recurrence: String,
    pub last_run_at: Option<i64>,

    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Input for creating a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_id: i64) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial update of a task's editable fields.
///
/// Outer `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub output: Option<Option<String>>,
    pub parent_id: Option<Option<i64>>,
}

/// Filter for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub parent_id: Option<i64>,
}

/// A directed "blocks" edge: `blocker_id` must finish before `blocked_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub blocker_id: i64,
    pub blocked_id: i64,
    /// Move the blocked task straight to `queued` once fully unblocked.
    pub auto_queue: bool,
    pub created_at: i64,
}

/// Aggregate status of a parent's subtasks. Derived, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub parent_id: i64,
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub blocked: i64,
    pub done: i64,
    pub archived: i64,
    pub is_complete: bool,
}

impl WorkflowStatus {
    /// Count `statuses` into buckets for `parent_id`.
    pub fn tally<I>(parent_id: i64, statuses: I) -> Self
    where
        I: IntoIterator<Item = TaskStatus>,
    {
        let mut status = WorkflowStatus {
            parent_id,
            ..Default::default()
        };
        for s in statuses {
            status.total += 1;
            match s.bucket() {
                StatusBucket::Pending => status.pending += 1,
                StatusBucket::Processing => status.processing += 1,
                StatusBucket::Blocked => status.blocked += 1,
                StatusBucket::Done => status.done += 1,
                StatusBucket::Archived => status.archived += 1,
            }
        }
        status.is_complete = status.total > 0 && status.done + status.archived == status.total;
        status
    }
}

/// Before/after value of a changed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub old: serde_json::Value,
    pub new: serde_json::Value,
}

/// Changed fields keyed by field name.
pub type TaskChanges = BTreeMap<String, FieldChange>;

/// Record `field` in `changes` if `old != new`.
pub(crate) fn diff_field<T>(changes: &mut TaskChanges, field: &str, old: &T, new: &T)
where
    T: PartialEq + Serialize,
{
    if old != new {
        changes.insert(
            field.to_string(),
            FieldChange {
                old: serde_json::to_value(old).unwrap_or(serde_json::Value::Null),
                new: serde_json::to_value(new).unwrap_or(serde_json::Value::Null),
            },
        );
    }
}

/// Result of a status transition, including everything it cascaded into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionReport {
    /// The task after the transition.
    pub task: Task,
    /// False when the task already had the requested status.
    pub changed: bool,
    /// Dependents released by the cascade, in the order they were transitioned.
    pub unblocked: Vec<Task>,
    /// Parents auto-completed because their workflow finished.
    pub completed_parents: Vec<i64>,
}

/// A recorded status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    pub id: i64,
    pub task_id: i64,
    pub status: TaskStatus,
    pub timestamp: i64,
    pub end_timestamp: Option<i64>,
}
