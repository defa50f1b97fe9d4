//! Task CRUD and hierarchy operations.

use super::cascade::release_if_unblocked;
use super::deps::edges_from_internal;
use super::state_transitions::record_state_transition;
use super::workflow::complete_parent_internal;
use super::{Database, now_ms};
use crate::error::TaskError;
use crate::events::TaskEvent;
use crate::types::{NewTask, Task, TaskChanges, TaskFilter, TaskStatus, TaskUpdate, diff_field};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::{BTreeMap, HashSet};

pub fn parse_task_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: row.get("status")?,
        parent_id: row.get("parent_id")?,
        pinned: row.get("pinned")?,
        output: row.get("output")?,
        scheduled_at: row.get("scheduled_at")?,
        recurrence: row.get("recurrence")?,
        last_run_at: row.get("last_run_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Internal helper to get a task using an existing connection (avoids deadlock).
pub(crate) fn get_task_internal(conn: &Connection, task_id: i64) -> rusqlite::Result<Option<Task>> {
    conn.query_row(
        "SELECT * FROM tasks WHERE id = ?1",
        params![task_id],
        parse_task_row,
    )
    .optional()
}

/// Direct children of `parent_id`, oldest first.
pub(crate) fn subtasks_internal(conn: &Connection, parent_id: i64) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare_cached("SELECT * FROM tasks WHERE parent_id = ?1 ORDER BY id")?;
    let tasks = stmt
        .query_map(params![parent_id], parse_task_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tasks)
}

/// Whether `ancestor_id` appears on the parent chain above `task_id`.
pub(crate) fn is_ancestor(conn: &Connection, ancestor_id: i64, task_id: i64) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare_cached("SELECT parent_id FROM tasks WHERE id = ?1")?;
    let mut seen = HashSet::new();
    let mut current = task_id;

    while seen.insert(current) {
        let parent: Option<i64> = stmt
            .query_row(params![current], |row| row.get::<_, Option<i64>>(0))
            .optional()?
            .flatten();
        match parent {
            Some(p) if p == ancestor_id => return Ok(true),
            Some(p) => current = p,
            None => return Ok(false),
        }
    }

    Ok(false)
}

/// `task_id` plus every descendant reachable through `parent_id`.
fn descendants_internal(conn: &Connection, task_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "WITH RECURSIVE descendants(id) AS (
            SELECT ?1
            UNION
            SELECT t.id FROM tasks t
            INNER JOIN descendants d ON t.parent_id = d.id
        )
        SELECT id FROM descendants",
    )?;
    let ids = stmt
        .query_map(params![task_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// `task_id` followed by every ancestor on its parent chain.
fn lineage_internal(conn: &Connection, task_id: i64) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached("SELECT parent_id FROM tasks WHERE id = ?1")?;
    let mut lineage = vec![task_id];
    let mut seen: HashSet<i64> = lineage.iter().copied().collect();
    let mut current = task_id;

    while let Some(parent) = stmt
        .query_row(params![current], |row| row.get::<_, Option<i64>>(0))
        .optional()?
        .flatten()
    {
        if !seen.insert(parent) {
            break;
        }
        lineage.push(parent);
        current = parent;
    }

    Ok(lineage)
}

/// An edge that would run from the new ancestry of `task_id` into its subtree
/// once it is moved under `parent_id`.
fn hierarchy_conflict(
    conn: &Connection,
    task_id: i64,
    parent_id: i64,
) -> rusqlite::Result<Option<(i64, i64)>> {
    let subtree: HashSet<i64> = descendants_internal(conn, task_id)?.into_iter().collect();

    for ancestor in lineage_internal(conn, parent_id)? {
        for edge in edges_from_internal(conn, ancestor)? {
            if subtree.contains(&edge.blocked_id) {
                return Ok(Some((ancestor, edge.blocked_id)));
            }
        }
    }

    Ok(None)
}

/// Apply an update to a task, recording a diff event when anything changed.
pub(crate) fn update_task_internal(
    conn: &Connection,
    task_id: i64,
    update: TaskUpdate,
    events: &mut Vec<TaskEvent>,
) -> Result<Task, TaskError> {
    let task = get_task_internal(conn, task_id)?.ok_or(TaskError::TaskNotFound(task_id))?;

    let title = match update.title {
        Some(title) if title.trim().is_empty() => return Err(TaskError::EmptyTitle),
        Some(title) => title,
        None => task.title.clone(),
    };
    let description = update.description.unwrap_or(task.description.clone());
    let output = update.output.unwrap_or(task.output.clone());
    let parent_id = update.parent_id.unwrap_or(task.parent_id);

    if parent_id != task.parent_id {
        if let Some(pid) = parent_id {
            if get_task_internal(conn, pid)?.is_none() {
                return Err(TaskError::ParentNotFound(pid));
            }
            if pid == task_id || is_ancestor(conn, task_id, pid)? {
                return Err(TaskError::ParentCycle {
                    task: task_id,
                    parent: pid,
                });
            }
            if let Some((blocker, blocked)) = hierarchy_conflict(conn, task_id, pid)? {
                return Err(TaskError::HierarchyDeadlock {
                    task: task_id,
                    parent: pid,
                    blocker,
                    blocked,
                });
            }
        }
    }

    let mut changes = TaskChanges::new();
    diff_field(&mut changes, "title", &task.title, &title);
    diff_field(&mut changes, "description", &task.description, &description);
    diff_field(&mut changes, "output", &task.output, &output);
    diff_field(&mut changes, "parent_id", &task.parent_id, &parent_id);

    if changes.is_empty() {
        return Ok(task);
    }

    let now = now_ms();
    conn.execute(
        "UPDATE tasks SET title = ?1, description = ?2, output = ?3, parent_id = ?4, updated_at = ?5
         WHERE id = ?6",
        params![title, description, output, parent_id, now, task_id],
    )?;

    let updated = Task {
        title,
        description,
        output,
        parent_id,
        updated_at: now,
        ..task.clone()
    };
    events.push(TaskEvent::Updated {
        task: updated.clone(),
        changes,
    });

    // Moving a subtask can finish either workflow it touched.
    if parent_id != task.parent_id {
        for pid in [task.parent_id, parent_id].into_iter().flatten() {
            complete_parent_internal(conn, pid, events)?;
        }
    }

    Ok(updated)
}

impl Database {
    /// Create a new task in `backlog`.
    pub fn create_task(&self, input: NewTask) -> Result<Task, TaskError> {
        if input.title.trim().is_empty() {
            return Err(TaskError::EmptyTitle);
        }

        self.with_tx(|tx, events| {
            if let Some(pid) = input.parent_id {
                if get_task_internal(tx, pid)?.is_none() {
                    return Err(TaskError::ParentNotFound(pid));
                }
            }

            let now = now_ms();
            tx.execute(
                "INSERT INTO tasks (title, description, status, parent_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    input.title,
                    input.description,
                    TaskStatus::Backlog,
                    input.parent_id,
                    now,
                    now
                ],
            )?;
            let task_id = tx.last_insert_rowid();

            record_state_transition(tx, task_id, TaskStatus::Backlog, now)?;

            let task = get_task_internal(tx, task_id)?.ok_or(TaskError::TaskNotFound(task_id))?;
            tracing::info!(task_id, parent_id = ?task.parent_id, "task created");
            events.push(TaskEvent::Created { task: task.clone() });

            Ok(task)
        })
    }

    /// Get a task by ID.
    pub fn get_task(&self, task_id: i64) -> Result<Option<Task>, TaskError> {
        self.with_conn(|conn| Ok(get_task_internal(conn, task_id)?))
    }

    /// Get the direct subtasks of a parent.
    pub fn get_subtasks(&self, parent_id: i64) -> Result<Vec<Task>, TaskError> {
        self.with_conn(|conn| Ok(subtasks_internal(conn, parent_id)?))
    }

    /// List tasks, pinned first, then by creation order.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>, TaskError> {
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
            let mut param_values: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

            if let Some(status) = filter.status {
                sql.push_str(&format!(" AND status = ?{}", param_values.len() + 1));
                param_values.push(Box::new(status));
            }

            if let Some(parent_id) = filter.parent_id {
                sql.push_str(&format!(" AND parent_id = ?{}", param_values.len() + 1));
                param_values.push(Box::new(parent_id));
            }

            sql.push_str(" ORDER BY pinned DESC, created_at, id");

            let mut stmt = conn.prepare(&sql)?;
            let param_refs: Vec<&dyn rusqlite::ToSql> =
                param_values.iter().map(|b| b.as_ref()).collect();

            let tasks = stmt
                .query_map(param_refs.as_slice(), parse_task_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(tasks)
        })
    }

    /// Update a task's editable fields.
    pub fn update_task(&self, task_id: i64, update: TaskUpdate) -> Result<Task, TaskError> {
        self.with_tx(|tx, events| update_task_internal(tx, task_id, update, events))
    }

    /// Set a task's output text.
    pub fn set_output(&self, task_id: i64, output: impl Into<String>) -> Result<Task, TaskError> {
        self.update_task(
            task_id,
            TaskUpdate {
                output: Some(Some(output.into())),
                ..Default::default()
            },
        )
    }

    /// Pin or unpin a task. Notifies only when the flag actually changes.
    pub fn set_pinned(&self, task_id: i64, pinned: bool) -> Result<Task, TaskError> {
        self.with_tx(|tx, events| {
            let task = get_task_internal(tx, task_id)?.ok_or(TaskError::TaskNotFound(task_id))?;
            if task.pinned == pinned {
                return Ok(task);
            }

            let now = now_ms();
            tx.execute(
                "UPDATE tasks SET pinned = ?1, updated_at = ?2 WHERE id = ?3",
                params![pinned, now, task_id],
            )?;

            let task = Task {
                pinned,
                updated_at: now,
                ..task
            };
            events.push(if pinned {
                TaskEvent::Pinned { task: task.clone() }
            } else {
                TaskEvent::Unpinned { task: task.clone() }
            });

            Ok(task)
        })
    }

    /// Delete a task.
    ///
    /// - `cascade`: delete all descendants too; otherwise direct children are
    ///   orphaned (moved to the top level).
    ///
    /// Edges touching deleted tasks are removed. Dependents left with no open
    /// blockers are released, and the former parent's workflow is re-checked.
    /// Returns the IDs of the deleted tasks.
    pub fn delete_task(&self, task_id: i64, cascade: bool) -> Result<Vec<i64>, TaskError> {
        self.with_tx(|tx, events| {
            let task = get_task_internal(tx, task_id)?.ok_or(TaskError::TaskNotFound(task_id))?;

            let doomed: Vec<i64> = if cascade {
                descendants_internal(tx, task_id)?
            } else {
                vec![task_id]
            };
            let doomed_set: HashSet<i64> = doomed.iter().copied().collect();

            // Dependents outside the deleted set, with the auto-queue flag of
            // their edge from a deleted blocker.
            let mut dependents: BTreeMap<i64, bool> = BTreeMap::new();
            for &id in &doomed {
                for edge in edges_from_internal(tx, id)? {
                    if !doomed_set.contains(&edge.blocked_id) {
                        let flag = dependents.entry(edge.blocked_id).or_insert(false);
                        *flag |= edge.auto_queue;
                    }
                }
            }

            let now = now_ms();
            if !cascade {
                for child in subtasks_internal(tx, task_id)? {
                    tx.execute(
                        "UPDATE tasks SET parent_id = NULL, updated_at = ?1 WHERE id = ?2",
                        params![now, child.id],
                    )?;
                    let mut changes = TaskChanges::new();
                    diff_field(&mut changes, "parent_id", &child.parent_id, &None);
                    events.push(TaskEvent::Updated {
                        task: Task {
                            parent_id: None,
                            updated_at: now,
                            ..child
                        },
                        changes,
                    });
                }
            }

            let mut titles = Vec::with_capacity(doomed.len());
            for &id in &doomed {
                if let Some(t) = get_task_internal(tx, id)? {
                    titles.push((id, t.title));
                }
            }

            for &id in &doomed {
                tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])?;
            }
            for (id, title) in titles {
                events.push(TaskEvent::Deleted { task_id: id, title });
            }
            tracing::info!(task_id, deleted = doomed.len(), cascade, "task deleted");

            for (blocked_id, auto_queue) in dependents {
                release_if_unblocked(tx, blocked_id, auto_queue, events)?;
            }

            if let Some(pid) = task.parent_id {
                if !doomed_set.contains(&pid) {
                    complete_parent_internal(tx, pid, events)?;
                }
            }

            Ok(doomed)
        })
    }
}
