//! Scheduled and recurring tasks.

use super::state_transitions::transition_internal;
use super::tasks::{get_task_internal, parse_task_row};
use super::{Database, now_ms};
use crate::error::ScheduleError;
use crate::events::TaskEvent;
use crate::recurrence::Recurrence;
use crate::types::{Task, TaskChanges, TaskStatus, diff_field};
use chrono::{DateTime, Local, TimeZone, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;

/// Outcome of queuing every due task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScheduleRun {
    /// Tasks moved to `queued`.
    pub queued: Vec<i64>,
    /// Due tasks skipped because their recurrence pattern is not recognized.
    pub invalid_recurrence: Vec<i64>,
}

/// Next occurrence strictly after `now`, counted in whole steps from `anchor`.
///
/// Missed occurrences are skipped rather than replayed one by one.
fn rearm<Tz: TimeZone>(
    recurrence: Recurrence,
    anchor: i64,
    now: &DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    let tz = now.timezone();
    let anchor = DateTime::<Utc>::from_timestamp_millis(anchor)
        .map(|t| t.with_timezone(&tz))
        .unwrap_or_else(|| now.clone());

    let mut step = 1;
    loop {
        let next = recurrence.nth_after(&anchor, step)?;
        if next > *now {
            return Some(next);
        }
        step = step.checked_add(1)?;
    }
}

fn schedule_anchor_internal(conn: &Connection, task_id: i64) -> rusqlite::Result<Option<i64>> {
    conn.query_row(
        "SELECT schedule_anchor FROM tasks WHERE id = ?1",
        params![task_id],
        |row| row.get(0),
    )
}

fn queue_internal<Tz: TimeZone>(
    conn: &Connection,
    task_id: i64,
    now: &DateTime<Tz>,
    events: &mut Vec<TaskEvent>,
) -> Result<Task, ScheduleError> {
    let task = get_task_internal(conn, task_id)?.ok_or(ScheduleError::TaskNotFound(task_id))?;
    let scheduled_at = task.scheduled_at.ok_or(ScheduleError::NotScheduled(task_id))?;
    let recurrence: Recurrence = task.recurrence.parse()?;

    let anchor = schedule_anchor_internal(conn, task_id)?.unwrap_or(scheduled_at);

    let trigger = now.timestamp_millis();
    let next = rearm(recurrence, anchor, now).map(|t| t.timestamp_millis());
    // One-time tasks drop their pattern along with the schedule.
    let pattern = if next.is_some() {
        task.recurrence.clone()
    } else {
        String::new()
    };

    conn.execute(
        "UPDATE tasks SET scheduled_at = ?1, recurrence = ?2, last_run_at = ?3, updated_at = ?4,
         schedule_anchor = CASE WHEN ?1 IS NULL THEN NULL ELSE schedule_anchor END
         WHERE id = ?5",
        params![next, pattern, trigger, now_ms(), task_id],
    )?;

    let mut changes = TaskChanges::new();
    diff_field(&mut changes, "scheduled_at", &task.scheduled_at, &next);
    diff_field(&mut changes, "recurrence", &task.recurrence, &pattern);
    diff_field(&mut changes, "last_run_at", &task.last_run_at, &Some(trigger));
    let scheduled = Task {
        scheduled_at: next,
        recurrence: pattern,
        last_run_at: Some(trigger),
        ..task
    };
    events.push(TaskEvent::Updated {
        task: scheduled,
        changes,
    });

    let report = transition_internal(conn, task_id, TaskStatus::Queued, events)?;
    tracing::info!(task_id, next_run = ?next, "scheduled task queued");

    Ok(report.task)
}

impl Database {
    /// Schedule a task to be queued at `scheduled_at` (epoch milliseconds).
    ///
    /// Recurring tasks count later runs from this time.
    pub fn set_schedule(
        &self,
        task_id: i64,
        scheduled_at: i64,
        recurrence: Recurrence,
    ) -> Result<Task, ScheduleError> {
        self.write_schedule(task_id, Some(scheduled_at), recurrence)
    }

    /// Remove a task's schedule.
    pub fn clear_schedule(&self, task_id: i64) -> Result<Task, ScheduleError> {
        self.write_schedule(task_id, None, Recurrence::None)
    }

    fn write_schedule(
        &self,
        task_id: i64,
        scheduled_at: Option<i64>,
        recurrence: Recurrence,
    ) -> Result<Task, ScheduleError> {
        self.with_tx(|tx, events| {
            let task =
                get_task_internal(tx, task_id)?.ok_or(ScheduleError::TaskNotFound(task_id))?;
            let pattern = recurrence.as_str().to_string();

            let mut changes = TaskChanges::new();
            diff_field(&mut changes, "scheduled_at", &task.scheduled_at, &scheduled_at);
            diff_field(&mut changes, "recurrence", &task.recurrence, &pattern);
            if changes.is_empty() {
                return Ok(task);
            }

            let now = now_ms();
            tx.execute(
                "UPDATE tasks SET scheduled_at = ?1, schedule_anchor = ?1, recurrence = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![scheduled_at, pattern, now, task_id],
            )?;

            let task = Task {
                scheduled_at,
                recurrence: pattern,
                updated_at: now,
                ..task
            };
            events.push(TaskEvent::Updated {
                task: task.clone(),
                changes,
            });
            Ok(task)
        })
    }

    /// Tasks whose schedule has come due at `now` (epoch milliseconds).
    ///
    /// Tasks currently `processing` are not due until they leave that state.
    pub fn get_due_scheduled_tasks(&self, now: i64) -> Result<Vec<Task>, ScheduleError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM tasks
                 WHERE scheduled_at IS NOT NULL AND scheduled_at <= ?1
                 AND status != 'processing'
                 ORDER BY scheduled_at, id",
            )?;
            let tasks = stmt
                .query_map(params![now], parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
    }

    /// Queue a scheduled task now, in the local timezone.
    pub fn queue_scheduled_task(&self, task_id: i64) -> Result<Task, ScheduleError> {
        self.queue_scheduled_task_at(task_id, &Local::now())
    }

    /// Queue a scheduled task with an explicit trigger time.
    ///
    /// Sets `last_run_at` to the trigger time and moves the task to `queued`.
    /// Recurring tasks are re-armed for their next occurrence; one-time tasks
    /// have their schedule cleared.
    pub fn queue_scheduled_task_at<Tz: TimeZone>(
        &self,
        task_id: i64,
        now: &DateTime<Tz>,
    ) -> Result<Task, ScheduleError> {
        self.with_tx(|tx, events| queue_internal(tx, task_id, now, events))
    }

    /// Queue every task that is due at `now`.
    pub fn queue_due_tasks_at<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
    ) -> Result<ScheduleRun, ScheduleError> {
        let due = self.get_due_scheduled_tasks(now.timestamp_millis())?;
        let mut run = ScheduleRun::default();

        for task in due {
            match self.queue_scheduled_task_at(task.id, now) {
                Ok(_) => run.queued.push(task.id),
                Err(ScheduleError::InvalidRecurrence(pattern)) => {
                    tracing::warn!(task_id = task.id, pattern = %pattern, "skipping due task with invalid recurrence");
                    run.invalid_recurrence.push(task.id);
                }
                // Deleted or unscheduled between the scan and the queue.
                Err(ScheduleError::TaskNotFound(_)) | Err(ScheduleError::NotScheduled(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(run)
    }
}
