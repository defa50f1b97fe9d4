//! End-to-end scenarios across the dependency graph, workflows and scheduler.

use chrono::{FixedOffset, TimeZone};
use taskboard::db::Database;
use taskboard::recurrence::next_run_time;
use taskboard::types::{NewTask, TaskStatus};

/// Helper to create a fresh in-memory database for testing.
fn setup_db() -> Database {
    Database::open_in_memory().expect("Failed to create in-memory database")
}

#[test]
fn workflow_status_with_one_done_and_one_processing() {
    let db = setup_db();
    let parent = db.create_task(NewTask::new("P")).unwrap();
    let s1 = db.create_task(NewTask::new("S1").with_parent(parent.id)).unwrap();
    let s2 = db.create_task(NewTask::new("S2").with_parent(parent.id)).unwrap();

    db.transition_status(s1.id, TaskStatus::Done).unwrap();
    db.transition_status(s2.id, TaskStatus::Processing).unwrap();

    let status = db.get_workflow_status(parent.id).unwrap();
    assert_eq!(status.total, 2);
    assert_eq!(status.done, 1);
    assert_eq!(status.processing, 1);
    assert!(!status.is_complete);
}

#[test]
fn finishing_the_last_subtask_completes_the_parent() {
    let db = setup_db();
    let parent = db.create_task(NewTask::new("P")).unwrap();
    let s1 = db.create_task(NewTask::new("S1").with_parent(parent.id)).unwrap();
    let s2 = db.create_task(NewTask::new("S2").with_parent(parent.id)).unwrap();
    db.set_output(s1.id, "first result").unwrap();
    db.set_output(s2.id, "second result").unwrap();
    db.transition_status(s1.id, TaskStatus::Done).unwrap();
    db.transition_status(s2.id, TaskStatus::Processing).unwrap();

    let report = db.transition_status(s2.id, TaskStatus::Done).unwrap();

    // The subtask's own transition completes the parent.
    assert_eq!(report.completed_parents, vec![parent.id]);
    let parent = db.get_task(parent.id).unwrap().unwrap();
    assert_eq!(parent.status, TaskStatus::Done);
    let output = parent.output.expect("parent should have a summary");
    assert!(output.starts_with("Workflow completed: 2/2 subtasks done."));
    assert!(output.contains(&format!("## Subtask #{}: S1\n\nfirst result", s1.id)));
    assert!(output.contains(&format!("## Subtask #{}: S2\n\nsecond result", s2.id)));

    // Already done: a second check is a no-op.
    assert!(!db.check_and_complete_parent(parent.id).unwrap());
    assert_eq!(
        db.get_task(parent.id).unwrap().unwrap().output.as_deref(),
        Some(output.as_str())
    );
}

#[test]
fn finished_blocker_returns_dependent_to_backlog() {
    let db = setup_db();
    let t1 = db.create_task(NewTask::new("Task 1")).unwrap();
    let t2 = db.create_task(NewTask::new("Task 2")).unwrap();
    db.add_dependency(t1.id, t2.id, false).unwrap();
    db.transition_status(t2.id, TaskStatus::Blocked).unwrap();

    db.transition_status(t1.id, TaskStatus::Processing).unwrap();
    let report = db.transition_status(t1.id, TaskStatus::Done).unwrap();

    // The `[task 2]` release comes back in the transition's own report.
    let unblocked: Vec<i64> = report.unblocked.iter().map(|t| t.id).collect();
    assert_eq!(unblocked, vec![t2.id]);
    assert_eq!(
        db.get_task(t2.id).unwrap().unwrap().status,
        TaskStatus::Backlog
    );

    // The cascade already ran; re-processing a settled blocker releases nothing.
    assert!(db.process_completed_blocker(t1.id).unwrap().is_empty());
}

#[test]
fn daily_recurrence_adds_one_calendar_day() {
    let tz = FixedOffset::west_opt(5 * 3600).unwrap();
    let from = tz.with_ymd_and_hms(2024, 2, 28, 18, 30, 0).unwrap();

    assert_eq!(
        next_run_time("daily", &from),
        Some(tz.with_ymd_and_hms(2024, 2, 29, 18, 30, 0).unwrap())
    );
    assert_eq!(next_run_time("bogus", &from), None);
}
