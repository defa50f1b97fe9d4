//! Status state machine and transition history.

use super::tasks::get_task_internal;
use super::{Database, cascade, now_ms, workflow};
use crate::error::StateError;
use crate::events::TaskEvent;
use crate::types::{Task, TaskChanges, TaskStatus, TaskStatusEvent, TransitionReport, diff_field};
use rusqlite::{Connection, params};

/// Record a status transition, closing the task's previously open history row.
pub(crate) fn record_state_transition(
    conn: &Connection,
    task_id: i64,
    status: TaskStatus,
    timestamp: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE task_history SET end_timestamp = ?1
         WHERE task_id = ?2 AND end_timestamp IS NULL",
        params![timestamp, task_id],
    )?;

    conn.execute(
        "INSERT INTO task_history (task_id, status, timestamp) VALUES (?1, ?2, ?3)",
        params![task_id, status, timestamp],
    )?;

    Ok(())
}

/// Apply a status transition and everything it cascades into.
///
/// Order: persist the new status and timestamps, record the event, release
/// dependents if the new status is terminal, then re-check the parent's
/// workflow. Transitioning to the current status is a no-op.
pub(crate) fn transition_internal(
    conn: &Connection,
    task_id: i64,
    new_status: TaskStatus,
    events: &mut Vec<TaskEvent>,
) -> Result<TransitionReport, StateError> {
    let task = get_task_internal(conn, task_id)?.ok_or(StateError::TaskNotFound(task_id))?;

    if task.status == new_status {
        tracing::debug!(task_id, status = %new_status, "transition is a no-op");
        return Ok(TransitionReport {
            task,
            changed: false,
            unblocked: vec![],
            completed_parents: vec![],
        });
    }

    let now = now_ms();

    // First start only; re-entering processing keeps the original start time.
    let started_at = match (new_status, task.started_at) {
        (TaskStatus::Processing, None) => Some(now),
        (_, started_at) => started_at,
    };
    let completed_at = if new_status.stamps_completion() {
        Some(now)
    } else {
        task.completed_at
    };

    conn.execute(
        "UPDATE tasks SET status = ?1, started_at = ?2, completed_at = ?3, updated_at = ?4
         WHERE id = ?5",
        params![new_status, started_at, completed_at, now, task_id],
    )?;
    record_state_transition(conn, task_id, new_status, now)?;

    let mut changes = TaskChanges::new();
    diff_field(&mut changes, "status", &task.status, &new_status);
    diff_field(&mut changes, "started_at", &task.started_at, &started_at);
    diff_field(&mut changes, "completed_at", &task.completed_at, &completed_at);

    let updated = Task {
        status: new_status,
        started_at,
        completed_at,
        updated_at: now,
        ..task.clone()
    };
    events.push(TaskEvent::Updated {
        task: updated.clone(),
        changes,
    });

    tracing::info!(task_id, from = %task.status, to = %new_status, "status transition");

    let mut report = TransitionReport {
        task: updated,
        changed: true,
        unblocked: vec![],
        completed_parents: vec![],
    };

    if new_status.is_terminal() {
        for released in cascade::release_dependents(conn, task_id, events)? {
            report.absorb(released);
        }

        // Only a terminal subtask can be the one that finishes its workflow.
        if let Some(parent_id) = report.task.parent_id {
            if let Some(parent) = workflow::complete_parent_internal(conn, parent_id, events)? {
                report.completed_parents.push(parent_id);
                report.unblocked.extend(parent.unblocked);
                report.completed_parents.extend(parent.completed_parents);
            }
        }
    }

    Ok(report)
}

impl TransitionReport {
    /// Fold a dependent's transition (and its own cascade) into this report.
    fn absorb(&mut self, released: TransitionReport) {
        self.unblocked.push(released.task);
        self.unblocked.extend(released.unblocked);
        self.completed_parents.extend(released.completed_parents);
    }
}

impl Database {
    /// Move a task to `new_status`, applying timestamps and cascades.
    pub fn transition_status(
        &self,
        task_id: i64,
        new_status: TaskStatus,
    ) -> Result<TransitionReport, StateError> {
        self.with_tx(|tx, events| transition_internal(tx, task_id, new_status, events))
    }

    /// Get the status history for a task, oldest first.
    pub fn get_status_history(&self, task_id: i64) -> Result<Vec<TaskStatusEvent>, StateError> {
        self.with_conn(|conn| {
            if get_task_internal(conn, task_id)?.is_none() {
                return Err(StateError::TaskNotFound(task_id));
            }

            let mut stmt = conn.prepare(
                "SELECT id, task_id, status, timestamp, end_timestamp
                 FROM task_history
                 WHERE task_id = ?1
                 ORDER BY id ASC",
            )?;

            let events = stmt
                .query_map(params![task_id], |row| {
                    Ok(TaskStatusEvent {
                        id: row.get(0)?,
                        task_id: row.get(1)?,
                        status: row.get(2)?,
                        timestamp: row.get(3)?,
                        end_timestamp: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(events)
        })
    }
}
