//! Completion cascade: releasing dependents when a blocker finishes.

use super::Database;
use super::deps::{edges_from_internal, open_blocker_count_internal};
use super::state_transitions::transition_internal;
use super::tasks::get_task_internal;
use crate::error::StateError;
use crate::events::TaskEvent;
use crate::types::{Task, TaskStatus, TransitionReport};
use rusqlite::Connection;

/// Release `blocked_id` if it is `blocked` and has no open blockers left.
///
/// Released tasks go to `queued` when `auto_queue` is set, else `backlog`.
/// Tasks in any other status are left alone.
pub(crate) fn release_if_unblocked(
    conn: &Connection,
    blocked_id: i64,
    auto_queue: bool,
    events: &mut Vec<TaskEvent>,
) -> Result<Option<TransitionReport>, StateError> {
    let Some(task) = get_task_internal(conn, blocked_id)? else {
        return Ok(None);
    };
    if task.status != TaskStatus::Blocked {
        return Ok(None);
    }

    let open = open_blocker_count_internal(conn, blocked_id)?;
    if open > 0 {
        tracing::debug!(task_id = blocked_id, open, "dependent still blocked");
        return Ok(None);
    }

    let target = if auto_queue {
        TaskStatus::Queued
    } else {
        TaskStatus::Backlog
    };
    let report = transition_internal(conn, blocked_id, target, events)?;
    tracing::info!(task_id = blocked_id, to = %target, "dependent unblocked");
    Ok(Some(report))
}

/// Walk every edge out of `blocker_id` and release dependents that are now free.
pub(crate) fn release_dependents(
    conn: &Connection,
    blocker_id: i64,
    events: &mut Vec<TaskEvent>,
) -> Result<Vec<TransitionReport>, StateError> {
    let mut released = Vec::new();
    for edge in edges_from_internal(conn, blocker_id)? {
        if let Some(report) = release_if_unblocked(conn, edge.blocked_id, edge.auto_queue, events)? {
            released.push(report);
        }
    }
    Ok(released)
}

impl Database {
    /// Re-evaluate the dependents of a finished blocker.
    ///
    /// Returns the tasks that moved out of `blocked`. Running it again on a
    /// settled graph returns an empty list.
    pub fn process_completed_blocker(&self, blocker_id: i64) -> Result<Vec<Task>, StateError> {
        self.with_tx(|tx, events| {
            if get_task_internal(tx, blocker_id)?.is_none() {
                return Err(StateError::TaskNotFound(blocker_id));
            }
            let released = release_dependents(tx, blocker_id, events)?;
            Ok(released.into_iter().map(|report| report.task).collect())
        })
    }
}
