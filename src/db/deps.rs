//! Dependency operations and cycle detection.

use super::tasks::{get_task_internal, is_ancestor, parse_task_row};
use super::{Database, now_ms};
use crate::error::DependencyError;
use crate::types::{Dependency, Task};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::{HashSet, VecDeque};

fn parse_dependency_row(row: &Row) -> rusqlite::Result<Dependency> {
    Ok(Dependency {
        blocker_id: row.get("blocker_id")?,
        blocked_id: row.get("blocked_id")?,
        auto_queue: row.get("auto_queue")?,
        created_at: row.get("created_at")?,
    })
}

pub(crate) fn get_dependency_internal(
    conn: &Connection,
    blocker_id: i64,
    blocked_id: i64,
) -> rusqlite::Result<Option<Dependency>> {
    conn.query_row(
        "SELECT * FROM dependencies WHERE blocker_id = ?1 AND blocked_id = ?2",
        params![blocker_id, blocked_id],
        parse_dependency_row,
    )
    .optional()
}

/// All edges whose blocker is `blocker_id`.
pub(crate) fn edges_from_internal(
    conn: &Connection,
    blocker_id: i64,
) -> rusqlite::Result<Vec<Dependency>> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM dependencies WHERE blocker_id = ?1 ORDER BY blocked_id",
    )?;
    let edges = stmt
        .query_map(params![blocker_id], parse_dependency_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(edges)
}

/// Number of blockers of `task_id` that are not yet done or archived.
pub(crate) fn open_blocker_count_internal(conn: &Connection, task_id: i64) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM dependencies d
         INNER JOIN tasks blocker ON d.blocker_id = blocker.id
         WHERE d.blocked_id = ?1 AND blocker.status NOT IN ('done', 'archived')",
        params![task_id],
        |row| row.get(0),
    )
}

/// Check if adding `blocker_id -> blocked_id` would create a cycle.
///
/// The new edge closes a cycle iff `blocked_id` can already reach
/// `blocker_id` by following existing edges.
fn would_create_cycle(conn: &Connection, blocker_id: i64, blocked_id: i64) -> rusqlite::Result<bool> {
    let mut stmt =
        conn.prepare_cached("SELECT blocked_id FROM dependencies WHERE blocker_id = ?1")?;

    let mut visited: HashSet<i64> = HashSet::new();
    let mut queue: VecDeque<i64> = VecDeque::new();
    queue.push_back(blocked_id);

    while let Some(current) = queue.pop_front() {
        if current == blocker_id {
            return Ok(true);
        }

        if !visited.insert(current) {
            continue;
        }

        let next: Vec<i64> = stmt
            .query_map(params![current], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        queue.extend(next.into_iter().filter(|id| !visited.contains(id)));
    }

    tracing::debug!(blocker_id, blocked_id, visited = visited.len(), "no cycle");
    Ok(false)
}

fn query_tasks(conn: &Connection, sql: &str, task_id: i64) -> rusqlite::Result<Vec<Task>> {
    let mut stmt = conn.prepare(sql)?;
    let tasks = stmt
        .query_map(params![task_id], parse_task_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tasks)
}

impl Database {
    /// Add a dependency: `blocker_id` blocks `blocked_id`.
    ///
    /// The cycle check and the insert share one transaction; a rejected call
    /// leaves the graph untouched.
    pub fn add_dependency(
        &self,
        blocker_id: i64,
        blocked_id: i64,
        auto_queue: bool,
    ) -> Result<Dependency, DependencyError> {
        if blocker_id == blocked_id {
            return Err(DependencyError::SelfDependency(blocker_id));
        }

        self.with_tx(|tx, _events| {
            for id in [blocker_id, blocked_id] {
                if get_task_internal(tx, id)?.is_none() {
                    return Err(DependencyError::TaskNotFound(id));
                }
            }

            if would_create_cycle(tx, blocker_id, blocked_id)? {
                return Err(DependencyError::CycleDetected {
                    blocker: blocker_id,
                    blocked: blocked_id,
                });
            }

            // A parent cannot complete until its subtasks do, so it must not
            // also hold them back.
            if is_ancestor(tx, blocker_id, blocked_id)? {
                return Err(DependencyError::HierarchyDeadlock {
                    blocker: blocker_id,
                    blocked: blocked_id,
                });
            }

            let now = now_ms();
            match tx.execute(
                "INSERT INTO dependencies (blocker_id, blocked_id, auto_queue, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![blocker_id, blocked_id, auto_queue, now],
            ) {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
                {
                    return Err(DependencyError::DuplicateDependency {
                        blocker: blocker_id,
                        blocked: blocked_id,
                    });
                }
                Err(e) => return Err(e.into()),
            }

            tracing::info!(blocker_id, blocked_id, auto_queue, "dependency added");

            Ok(Dependency {
                blocker_id,
                blocked_id,
                auto_queue,
                created_at: now,
            })
        })
    }

    /// Remove a dependency.
    pub fn remove_dependency(&self, blocker_id: i64, blocked_id: i64) -> Result<(), DependencyError> {
        self.with_tx(|tx, _events| {
            let removed = tx.execute(
                "DELETE FROM dependencies WHERE blocker_id = ?1 AND blocked_id = ?2",
                params![blocker_id, blocked_id],
            )?;

            if removed == 0 {
                return Err(DependencyError::DependencyNotFound {
                    blocker: blocker_id,
                    blocked: blocked_id,
                });
            }

            tracing::info!(blocker_id, blocked_id, "dependency removed");
            Ok(())
        })
    }

    /// Get a single dependency edge, if present.
    pub fn get_dependency(
        &self,
        blocker_id: i64,
        blocked_id: i64,
    ) -> Result<Option<Dependency>, DependencyError> {
        self.with_conn(|conn| Ok(get_dependency_internal(conn, blocker_id, blocked_id)?))
    }

    /// Toggle the auto-queue flag on an existing edge.
    pub fn set_auto_queue(
        &self,
        blocker_id: i64,
        blocked_id: i64,
        auto_queue: bool,
    ) -> Result<(), DependencyError> {
        self.with_tx(|tx, _events| {
            let updated = tx.execute(
                "UPDATE dependencies SET auto_queue = ?1 WHERE blocker_id = ?2 AND blocked_id = ?3",
                params![auto_queue, blocker_id, blocked_id],
            )?;

            if updated == 0 {
                return Err(DependencyError::DependencyNotFound {
                    blocker: blocker_id,
                    blocked: blocked_id,
                });
            }
            Ok(())
        })
    }

    /// Get all dependencies.
    pub fn get_all_dependencies(&self) -> Result<Vec<Dependency>, DependencyError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM dependencies ORDER BY blocker_id, blocked_id")?;
            let deps = stmt
                .query_map([], parse_dependency_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(deps)
        })
    }

    /// Get tasks that block a given task.
    pub fn get_blockers(&self, task_id: i64) -> Result<Vec<Task>, DependencyError> {
        self.with_conn(|conn| {
            Ok(query_tasks(
                conn,
                "SELECT t.* FROM tasks t
                 INNER JOIN dependencies d ON t.id = d.blocker_id
                 WHERE d.blocked_id = ?1
                 ORDER BY t.id",
                task_id,
            )?)
        })
    }

    /// Get tasks that a given task blocks.
    pub fn get_blocked_by(&self, task_id: i64) -> Result<Vec<Task>, DependencyError> {
        self.with_conn(|conn| {
            Ok(query_tasks(
                conn,
                "SELECT t.* FROM tasks t
                 INNER JOIN dependencies d ON t.id = d.blocked_id
                 WHERE d.blocker_id = ?1
                 ORDER BY t.id",
                task_id,
            )?)
        })
    }

    /// Count blockers of a task that are not done or archived.
    pub fn get_open_blocker_count(&self, task_id: i64) -> Result<i64, DependencyError> {
        self.with_conn(|conn| Ok(open_blocker_count_internal(conn, task_id)?))
    }

    /// Check if a task has unfinished blockers.
    pub fn is_blocked(&self, task_id: i64) -> Result<bool, DependencyError> {
        Ok(self.get_open_blocker_count(task_id)? > 0)
    }
}
