//! Lifecycle notifications for task mutations.
//!
//! The engine buffers events while an operation's transaction is open and
//! delivers them, in order, once it commits. A rolled-back operation
//! notifies nothing.

use crate::types::{Task, TaskChanges};
use serde::Serialize;
use std::sync::Arc;

/// Receiver of task lifecycle notifications (UI, audit, search index).
pub trait EventNotifier: Send + Sync {
    fn task_created(&self, task: &Task);
    fn task_updated(&self, task: &Task, changes: &TaskChanges);
    fn task_deleted(&self, task_id: i64, title: &str);
    fn task_pinned(&self, task: &Task);
    fn task_unpinned(&self, task: &Task);
}

/// A buffered notification.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEvent {
    Created {
        task: Task,
    },
    Updated {
        task: Task,
        changes: TaskChanges,
    },
    Deleted {
        task_id: i64,
        title: String,
    },
    Pinned {
        task: Task,
    },
    Unpinned {
        task: Task,
    },
}

/// Deliver `events` to `notifier`; a no-op when no notifier is configured.
pub(crate) fn dispatch(notifier: Option<&Arc<dyn EventNotifier>>, events: Vec<TaskEvent>) {
    let Some(notifier) = notifier else {
        return;
    };
    for event in events {
        match &event {
            TaskEvent::Created { task } => notifier.task_created(task),
            TaskEvent::Updated { task, changes } => notifier.task_updated(task, changes),
            TaskEvent::Deleted { task_id, title } => notifier.task_deleted(*task_id, title),
            TaskEvent::Pinned { task } => notifier.task_pinned(task),
            TaskEvent::Unpinned { task } => notifier.task_unpinned(task),
        }
    }
}

/// Notifier that writes every event to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl EventNotifier for TracingNotifier {
    fn task_created(&self, task: &Task) {
        tracing::info!(task_id = task.id, title = %task.title, "task created");
    }

    fn task_updated(&self, task: &Task, changes: &TaskChanges) {
        let fields: Vec<&str> = changes.keys().map(String::as_str).collect();
        tracing::info!(
            task_id = task.id,
            status = %task.status,
            fields = ?fields,
            "task updated"
        );
        for (field, change) in changes {
            tracing::debug!(task_id = task.id, field = %field, old = %change.old, new = %change.new, "field changed");
        }
    }

    fn task_deleted(&self, task_id: i64, title: &str) {
        tracing::info!(task_id, title, "task deleted");
    }

    fn task_pinned(&self, task: &Task) {
        tracing::info!(task_id = task.id, "task pinned");
    }

    fn task_unpinned(&self, task: &Task) {
        tracing::info!(task_id = task.id, "task unpinned");
    }
}
