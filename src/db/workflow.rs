//! Workflow aggregation over parent/subtask hierarchies.
//!
//! A parent's completion is derived: once every subtask is done or archived,
//! the parent collects the subtasks' outputs into one summary and moves to
//! `done` itself.

use super::state_transitions::transition_internal;
use super::tasks::{get_task_internal, subtasks_internal};
use super::{Database, now_ms};
use crate::error::{StateError, WorkflowError};
use crate::events::TaskEvent;
use crate::types::{Task, TaskChanges, TaskStatus, TransitionReport, WorkflowStatus, diff_field};
use rusqlite::{Connection, params};

/// Build the parent's summary from its subtasks' outputs.
///
/// Subtasks without output are counted in the header but get no section.
pub fn workflow_summary(status: &WorkflowStatus, subtasks: &[Task]) -> String {
    let mut sections = vec![format!(
        "Workflow completed: {}/{} subtasks done.",
        status.done, status.total
    )];

    for subtask in subtasks {
        let Some(output) = subtask.output.as_deref().map(str::trim) else {
            continue;
        };
        if output.is_empty() {
            continue;
        }
        sections.push(format!(
            "## Subtask #{}: {}\n\n{}",
            subtask.id, subtask.title, output
        ));
    }

    sections.join("\n\n")
}

/// Complete `parent_id` if its workflow is finished.
///
/// Returns `None` without touching anything when the parent is missing,
/// already terminal, or still has open subtasks.
pub(crate) fn complete_parent_internal(
    conn: &Connection,
    parent_id: i64,
    events: &mut Vec<TaskEvent>,
) -> Result<Option<TransitionReport>, StateError> {
    let Some(parent) = get_task_internal(conn, parent_id)? else {
        return Ok(None);
    };
    if parent.status.is_terminal() {
        return Ok(None);
    }

    let subtasks = subtasks_internal(conn, parent_id)?;
    let status = WorkflowStatus::tally(parent_id, subtasks.iter().map(|t| t.status));
    if !status.is_complete {
        tracing::debug!(
            parent_id,
            total = status.total,
            done = status.done,
            archived = status.archived,
            "workflow still open"
        );
        return Ok(None);
    }

    let summary = Some(workflow_summary(&status, &subtasks));
    let now = now_ms();
    conn.execute(
        "UPDATE tasks SET output = ?1, updated_at = ?2 WHERE id = ?3",
        params![summary, now, parent_id],
    )?;

    let mut changes = TaskChanges::new();
    diff_field(&mut changes, "output", &parent.output, &summary);
    events.push(TaskEvent::Updated {
        task: Task {
            output: summary,
            updated_at: now,
            ..parent
        },
        changes,
    });

    let report = transition_internal(conn, parent_id, TaskStatus::Done, events)?;
    tracing::info!(parent_id, subtasks = status.total, "workflow completed");

    Ok(Some(report))
}

impl Database {
    /// Aggregate the statuses of a parent's subtasks.
    pub fn get_workflow_status(&self, parent_id: i64) -> Result<WorkflowStatus, WorkflowError> {
        self.with_conn(|conn| {
            if get_task_internal(conn, parent_id)?.is_none() {
                return Err(WorkflowError::ParentNotFound(parent_id));
            }

            let mut stmt = conn.prepare("SELECT status FROM tasks WHERE parent_id = ?1")?;
            let statuses = stmt
                .query_map(params![parent_id], |row| row.get::<_, TaskStatus>(0))?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(WorkflowStatus::tally(parent_id, statuses))
        })
    }

    /// Auto-complete a parent whose subtasks are all done or archived.
    ///
    /// Safe to call speculatively: returns `false` without effect when the
    /// workflow is open or the parent is already done/archived.
    pub fn check_and_complete_parent(&self, parent_id: i64) -> Result<bool, WorkflowError> {
        self.with_tx(|tx, events| {
            if get_task_internal(tx, parent_id)?.is_none() {
                return Err(WorkflowError::ParentNotFound(parent_id));
            }
            Ok(complete_parent_internal(tx, parent_id, events)?.is_some())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask(id: i64, title: &str, output: Option<&str>) -> Task {
        Task {
            id,
            title: title.to_string(),
            description: None,
            status: TaskStatus::Done,
            parent_id: Some(1),
            pinned: false,
            output: output.map(str::to_string),
            scheduled_at: None,
            recurrence: String::new(),
            last_run_at: None,
            started_at: None,
            completed_at: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn summary_has_header_and_sections_for_outputs() {
        let subtasks = vec![
            subtask(2, "Research", Some("found three options")),
            subtask(3, "Silent", None),
            subtask(4, "Blank", Some("   ")),
            subtask(5, "Write-up", Some("chose option B\n")),
        ];
        let status = WorkflowStatus::tally(1, subtasks.iter().map(|t| t.status));

        let summary = workflow_summary(&status, &subtasks);

        assert_eq!(
            summary,
            "Workflow completed: 4/4 subtasks done.\n\n\
             ## Subtask #2: Research\n\nfound three options\n\n\
             ## Subtask #5: Write-up\n\nchose option B"
        );
    }

    #[test]
    fn summary_counts_only_done_in_header() {
        let mut archived = subtask(3, "Dropped", None);
        archived.status = TaskStatus::Archived;
        let subtasks = vec![subtask(2, "Kept", Some("ok")), archived];
        let status = WorkflowStatus::tally(1, subtasks.iter().map(|t| t.status));

        let summary = workflow_summary(&status, &subtasks);

        assert!(summary.starts_with("Workflow completed: 1/2 subtasks done."));
    }
}
