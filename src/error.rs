//! Structured error types for engine operations.

use serde::Serialize;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors
    InvalidStatus,
    InvalidRecurrence,
    InvalidFieldValue,

    // Not found errors
    TaskNotFound,
    ParentNotFound,
    DependencyNotFound,
    NotScheduled,

    // Conflict errors
    SelfDependency,
    CycleDetected,
    DuplicateDependency,
    HierarchyDeadlock,
    ParentCycle,

    // Internal errors
    DatabaseError,
}

/// Errors from dependency graph operations.
///
/// A rejected `add_dependency` never leaves a partial write behind.
#[derive(Debug, Error)]
pub enum DependencyError {
    #[error("Task {0} cannot block itself")]
    SelfDependency(i64),

    #[error("Adding dependency {blocker} -> {blocked} would create a cycle")]
    CycleDetected { blocker: i64, blocked: i64 },

    #[error("Dependency {blocker} -> {blocked} already exists")]
    DuplicateDependency { blocker: i64, blocked: i64 },

    #[error("Dependency {blocker} -> {blocked} not found")]
    DependencyNotFound { blocker: i64, blocked: i64 },

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Task {blocker} is an ancestor of task {blocked} and cannot block it")]
    HierarchyDeadlock { blocker: i64, blocked: i64 },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl DependencyError {
    pub fn code(&self) -> ErrorCode {
        match self {
            DependencyError::SelfDependency(_) => ErrorCode::SelfDependency,
            DependencyError::CycleDetected { .. } => ErrorCode::CycleDetected,
            DependencyError::DuplicateDependency { .. } => ErrorCode::DuplicateDependency,
            DependencyError::DependencyNotFound { .. } => ErrorCode::DependencyNotFound,
            DependencyError::TaskNotFound(_) => ErrorCode::TaskNotFound,
            DependencyError::HierarchyDeadlock { .. } => ErrorCode::HierarchyDeadlock,
            DependencyError::Database(_) => ErrorCode::DatabaseError,
        }
    }
}

/// Errors from status transitions and the completion cascade.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Invalid status '{0}'. Valid statuses: backlog, queued, processing, blocked, done, archived")]
    InvalidStatus(String),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StateError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StateError::InvalidStatus(_) => ErrorCode::InvalidStatus,
            StateError::TaskNotFound(_) => ErrorCode::TaskNotFound,
            StateError::Database(_) => ErrorCode::DatabaseError,
        }
    }
}

/// Errors from workflow aggregation.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Parent task not found: {0}")]
    ParentNotFound(i64),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl WorkflowError {
    pub fn code(&self) -> ErrorCode {
        match self {
            WorkflowError::ParentNotFound(_) => ErrorCode::ParentNotFound,
            WorkflowError::State(e) => e.code(),
            WorkflowError::Database(_) => ErrorCode::DatabaseError,
        }
    }
}

/// Errors from scheduling.
#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("Invalid recurrence '{0}'. Valid patterns: hourly, daily, weekly, monthly")]
    InvalidRecurrence(String),

    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Task {0} has no schedule")]
    NotScheduled(i64),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl ScheduleError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ScheduleError::InvalidRecurrence(_) => ErrorCode::InvalidRecurrence,
            ScheduleError::TaskNotFound(_) => ErrorCode::TaskNotFound,
            ScheduleError::NotScheduled(_) => ErrorCode::NotScheduled,
            ScheduleError::State(e) => e.code(),
            ScheduleError::Database(_) => ErrorCode::DatabaseError,
        }
    }
}

/// Errors from task CRUD.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Parent task not found: {0}")]
    ParentNotFound(i64),

    #[error("Task {task} cannot be moved under its own descendant {parent}")]
    ParentCycle { task: i64, parent: i64 },

    #[error(
        "Moving task {task} under {parent} would put blocker {blocker} above its dependent {blocked}"
    )]
    HierarchyDeadlock {
        task: i64,
        parent: i64,
        blocker: i64,
        blocked: i64,
    },

    #[error("Task title must not be empty")]
    EmptyTitle,

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl TaskError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TaskError::TaskNotFound(_) => ErrorCode::TaskNotFound,
            TaskError::ParentNotFound(_) => ErrorCode::ParentNotFound,
            TaskError::ParentCycle { .. } => ErrorCode::ParentCycle,
            TaskError::HierarchyDeadlock { .. } => ErrorCode::HierarchyDeadlock,
            TaskError::EmptyTitle => ErrorCode::InvalidFieldValue,
            TaskError::State(e) => e.code(),
            TaskError::Database(_) => ErrorCode::DatabaseError,
        }
    }
}

/// Error body rendered by the CLI.
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorReport {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

macro_rules! impl_report_from {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<&$err> for ErrorReport {
                fn from(err: &$err) -> Self {
                    ErrorReport::new(err.code(), err.to_string())
                }
            }
        )*
    };
}

impl_report_from!(DependencyError, StateError, WorkflowError, ScheduleError, TaskError);
