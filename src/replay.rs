//! Rebuilds a collection and undo stack from an ordered event log.
//!
//! Events are applied strictly in order. A handful of gaps are accepted and
//! healed by synthesizing the missing event first:
//! - `taskActivated` / `taskStarted` for a task never created
//! - `taskStarted` / `taskFailed` for a backlog task never activated
//! - `taskCompleted` for a task never started
//! - `taskRevived` for a task never failed
//!
//! Anything else that does not line up is fatal. On error the collection is
//! left in an unspecified state and must be discarded.

use tracing::{debug, info, warn};

use crate::collection::TaskCollection;
use crate::error::{Error, Result};
use crate::event::{EventType, TaskEventRecord};
use crate::task::{Category, ProgressStatus, TaskId};
use crate::undo::UndoStack;

/// Applies `events` in order and returns the id of the last one.
pub fn replay(
    events: &[TaskEventRecord],
    collection: &mut TaskCollection,
    undo: &mut UndoStack,
) -> Result<Option<TaskId>> {
    let mut last_id = None;
    for (position, record) in events.iter().enumerate() {
        debug!(
            "replaying #{} {} for {}",
            position, record.event_type, record.id
        );
        apply_event(record, collection, undo)?;
        last_id = Some(record.id.clone());
    }
    info!(
        "replayed {} events: {} active, {} completed, {} failed, {} undoable",
        events.len(),
        collection.active_ids().len(),
        collection.completed().len(),
        collection.failed().len(),
        undo.size()
    );
    Ok(last_id)
}

/// Applies one event, healing a permitted gap if needed.
pub fn apply_event(
    record: &TaskEventRecord,
    collection: &mut TaskCollection,
    undo: &mut UndoStack,
) -> Result<()> {
    let kind = record.kind()?;
    route(kind, record, collection, undo).map_err(|err| reconstruction_error(record, err))
}

fn route(
    kind: EventType,
    record: &TaskEventRecord,
    collection: &mut TaskCollection,
    undo: &mut UndoStack,
) -> Result<()> {
    let Some(task) = collection.get(&record.id) else {
        return apply_to_unseen(kind, record, collection, undo);
    };

    if task.category() == Category::Deferred {
        return match kind {
            EventType::TaskCreated
            | EventType::SubtaskCreated
            | EventType::TaskActivatedUndo
            | EventType::TaskDeletedUndo => {
                debug!("{} on backlog task {} is already consistent", kind, record.id);
                Ok(())
            }
            EventType::TaskStarted | EventType::TaskFailed => {
                warn!(
                    "{} on backlog task {}, synthesizing taskActivated",
                    kind, record.id
                );
                let linking = synthesized(EventType::TaskActivated, record);
                apply_direct(EventType::TaskActivated, &linking, collection, undo)?;
                apply_direct(kind, record, collection, undo)
            }
            _ => apply_direct(kind, record, collection, undo),
        };
    }

    if let Some(link) = linking_event(task.progress_status(), kind) {
        warn!("{} on {} task {}, synthesizing {}", kind, task.progress_status(), record.id, link);
        if kind == EventType::TaskCompleted {
            return complete_with_implicit_start(record, collection, undo);
        }
        let linking = synthesized(link, record);
        apply_direct(link, &linking, collection, undo)?;
    }
    apply_direct(kind, record, collection, undo)
}

/// First sighting of an id.
fn apply_to_unseen(
    kind: EventType,
    record: &TaskEventRecord,
    collection: &mut TaskCollection,
    undo: &mut UndoStack,
) -> Result<()> {
    match kind {
        EventType::TaskCreated
        | EventType::SubtaskCreated
        | EventType::TaskRevived
        | EventType::TaskDeletedUndo => apply_direct(kind, record, collection, undo),
        EventType::TaskCreatedUndo
        | EventType::SubtaskCreatedUndo
        | EventType::TaskEdited
        | EventType::TaskDeleted => {
            debug!("{} for unseen task {}, nothing to do", kind, record.id);
            Ok(())
        }
        EventType::TaskActivated | EventType::TaskStarted => {
            let creation = if record.parent.is_some() {
                EventType::SubtaskCreated
            } else {
                EventType::TaskCreated
            };
            warn!("{} for unseen task {}, synthesizing {}", kind, record.id, creation);
            let mut linking = synthesized(creation, record);
            if kind == EventType::TaskActivated {
                linking.category = Some(i64::from(u8::from(Category::Deferred)));
            }
            apply_direct(creation, &linking, collection, undo)?;
            apply_direct(kind, record, collection, undo)
        }
        _ => Err(unreplayable(record, "task was never created")),
    }
}

/// The healed start and the completion share one undo entry, as they do
/// when a session completes an unstarted task.
fn complete_with_implicit_start(
    record: &TaskEventRecord,
    collection: &mut TaskCollection,
    undo: &mut UndoStack,
) -> Result<()> {
    let timestamp = record.require_timestamp()?;
    if collection.start_and_complete_task(&record.id, timestamp)? {
        undo.push_complete(&record.id, true, timestamp);
    }
    Ok(())
}

/// Intermediate event that may legally be missing between a task's current
/// status and the incoming event.
pub fn linking_event(status: ProgressStatus, incoming: EventType) -> Option<EventType> {
    match (status, incoming) {
        (ProgressStatus::NotStarted, EventType::TaskCompleted) => Some(EventType::TaskStarted),
        (ProgressStatus::NotStarted | ProgressStatus::Started, EventType::TaskRevived) => {
            Some(EventType::TaskFailed)
        }
        _ => None,
    }
}

fn apply_direct(
    kind: EventType,
    record: &TaskEventRecord,
    collection: &mut TaskCollection,
    undo: &mut UndoStack,
) -> Result<()> {
    if kind.is_undo() {
        return apply_undo(kind, record, collection, undo);
    }

    let timestamp = record.require_timestamp()?;
    let id = record.id.as_str();
    match kind {
        EventType::TaskCreated => {
            let context = record.context.as_deref().ok_or(Error::MalformedEvent {
                event_type: record.event_type.clone(),
                task_id: record.id.clone(),
                field: "context",
            })?;
            collection.create_independent_task(
                record.require_name()?,
                record.require_category()?,
                timestamp,
                context,
                record.colour_id.unwrap_or_default(),
                Some(record.id.clone()),
            )?;
            undo.push_create_task(id, timestamp);
        }
        EventType::SubtaskCreated => {
            let parent_id = record.require_parent()?;
            let category = match record.category()? {
                Some(category) => category,
                None => default_child_category(collection, parent_id)?,
            };
            collection.create_subtask(
                record.require_name()?,
                parent_id,
                category,
                timestamp,
                Some(record.id.clone()),
            )?;
            undo.push_create_subtask(id, timestamp);
        }
        EventType::TaskRevived => {
            let original_id = record.require_original()?;
            let original = collection
                .get(original_id)
                .ok_or_else(|| unreplayable(record, "revived task is unknown"))?;
            if let Some(link) = linking_event(original.progress_status(), kind) {
                warn!(
                    "taskRevived of {} task {}, synthesizing {}",
                    original.progress_status(),
                    original_id,
                    link
                );
                let mut linking = synthesized(link, record);
                linking.id = original_id.to_string();
                route(link, &linking, collection, undo)?;
            }
            let as_active = record.category()?.map_or(true, Category::is_active_board);
            collection.revive_task_as_clone(
                original_id,
                as_active,
                timestamp,
                Some(record.id.clone()),
            )?;
            undo.push_revive(original_id, id, timestamp);
        }
        EventType::TaskDeleted => {
            let removed = collection.abandon_task(id)?;
            undo.push_abandon(removed, timestamp);
        }
        EventType::TaskCompleted => {
            if collection.complete_task(id, timestamp)? {
                undo.push_complete(id, false, timestamp);
            } else {
                debug!("taskCompleted for closed task {} is a no-op", id);
            }
        }
        EventType::TaskFailed => {
            if collection.fail_task(id, timestamp)? {
                undo.clear_stack();
            } else {
                debug!("taskFailed for closed task {} is a no-op", id);
            }
        }
        EventType::TaskActivated => {
            collection.activate_task(id, record.require_category()?, timestamp)?;
            undo.push_activate(id, timestamp);
        }
        EventType::TaskStarted => {
            if collection.start_task(id, timestamp)? {
                undo.push_start(id, timestamp);
            } else {
                debug!("taskStarted for started task {} is a no-op", id);
            }
        }
        EventType::TaskEdited => {
            let (previous_name, previous_edited) =
                collection.edit_task_text(id, record.require_name()?, timestamp)?;
            undo.push_edit(id, &previous_name, previous_edited, timestamp);
        }
        _ => return Err(unreplayable(record, "not a forward event")),
    }
    Ok(())
}

/// Replays an undo by popping the stack, after checking the top entry is
/// the mutation this event claims to revert.
fn apply_undo(
    kind: EventType,
    record: &TaskEventRecord,
    collection: &mut TaskCollection,
    undo: &mut UndoStack,
) -> Result<()> {
    let timestamp = record.require_timestamp()?;
    let Some(top) = undo.peek() else {
        return Err(unreplayable(record, "undo stack is empty"));
    };
    if top.action.event_type() != kind.forward() || top.action.task_id() != record.id {
        return Err(unreplayable(
            record,
            format!(
                "top of undo stack is {} for {}",
                top.action.event_type(),
                top.action.task_id()
            ),
        ));
    }
    match undo.perform_undo(timestamp, collection)? {
        Some(_) => Ok(()),
        None => Err(unreplayable(record, "undo window expired")),
    }
}

/// A subtask with no recorded category sits one level below its parent.
fn default_child_category(collection: &TaskCollection, parent_id: &str) -> Result<Category> {
    let parent = collection
        .get(parent_id)
        .ok_or_else(|| Error::TaskNotFound(parent_id.to_string()))?;
    Ok(match parent.category() {
        Category::Goal => Category::Weekly,
        _ => Category::Daily,
    })
}

/// A stand-in for a missing event, built from the one that exposed the gap.
fn synthesized(kind: EventType, from: &TaskEventRecord) -> TaskEventRecord {
    TaskEventRecord {
        event_type: kind.as_str().to_string(),
        reverted_event_timestamp: None,
        original: None,
        ..from.clone()
    }
}

fn unreplayable(record: &TaskEventRecord, reason: impl Into<String>) -> Error {
    Error::UnreplayableEvent {
        event_type: record.event_type.clone(),
        task_id: record.id.clone(),
        reason: reason.into(),
    }
}

/// Domain failures during replay become reconstruction failures.
fn reconstruction_error(record: &TaskEventRecord, err: Error) -> Error {
    match err {
        Error::UnreplayableEvent { .. }
        | Error::UnknownEventType(_)
        | Error::MalformedEvent { .. }
        | Error::Io(_)
        | Error::Json(_) => err,
        other => unreplayable(record, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::CollectionOptions;
    use crate::ids::SequentialIds;

    fn fresh() -> (TaskCollection, UndoStack) {
        (
            TaskCollection::new(CollectionOptions::default(), Box::new(SequentialIds::new("t"))),
            UndoStack::default(),
        )
    }

    fn created(id: &str, at: i64, category: Category) -> TaskEventRecord {
        let mut record = TaskEventRecord::new(EventType::TaskCreated, at, id)
            .with_name(format!("task {id}"))
            .with_category(category);
        record.context = Some("Work".to_string());
        record
    }

    #[test]
    fn linking_table() {
        assert_eq!(
            linking_event(ProgressStatus::NotStarted, EventType::TaskCompleted),
            Some(EventType::TaskStarted)
        );
        assert_eq!(
            linking_event(ProgressStatus::Started, EventType::TaskRevived),
            Some(EventType::TaskFailed)
        );
        assert_eq!(linking_event(ProgressStatus::Started, EventType::TaskCompleted), None);
        assert_eq!(linking_event(ProgressStatus::Completed, EventType::TaskRevived), None);
        assert_eq!(linking_event(ProgressStatus::Failed, EventType::TaskStarted), None);
    }

    #[test]
    fn returns_last_event_id() {
        let (mut tasks, mut undo) = fresh();
        assert_eq!(replay(&[], &mut tasks, &mut undo).expect("empty"), None);
        let events = vec![
            created("a", 1, Category::Daily),
            created("b", 2, Category::Daily),
        ];
        assert_eq!(
            replay(&events, &mut tasks, &mut undo).expect("replay"),
            Some("b".to_string())
        );
        assert_eq!(undo.size(), 2);
    }

    #[test]
    fn unseen_task_noops_are_skipped() {
        let (mut tasks, mut undo) = fresh();
        let events = vec![
            TaskEventRecord::new(EventType::TaskDeleted, 1, "ghost"),
            TaskEventRecord::new(EventType::TaskEdited, 2, "ghost").with_name("x"),
            TaskEventRecord::new(EventType::TaskCreatedUndo, 3, "ghost"),
        ];
        replay(&events, &mut tasks, &mut undo).expect("replay");
        assert!(tasks.is_empty());
    }

    #[test]
    fn completing_unseen_task_is_fatal() {
        let (mut tasks, mut undo) = fresh();
        let events = vec![TaskEventRecord::new(EventType::TaskCompleted, 1, "ghost")];
        let err = replay(&events, &mut tasks, &mut undo).expect_err("fatal");
        assert!(matches!(err, Error::UnreplayableEvent { .. }));
    }

    #[test]
    fn unknown_event_type_is_fatal() {
        let (mut tasks, mut undo) = fresh();
        let mut record = created("a", 1, Category::Daily);
        record.event_type = "taskTeleported".to_string();
        let err = replay(&[record], &mut tasks, &mut undo).expect_err("fatal");
        assert!(matches!(err, Error::UnknownEventType(_)));
    }

    #[test]
    fn domain_errors_become_unreplayable() {
        let (mut tasks, mut undo) = fresh();
        let events = vec![
            created("a", 1, Category::Daily),
            TaskEventRecord::new(EventType::TaskCompleted, 2, "a"),
            TaskEventRecord::new(EventType::TaskStarted, 3, "a"),
        ];
        let err = replay(&events, &mut tasks, &mut undo).expect_err("fatal");
        match err {
            Error::UnreplayableEvent { event_type, reason, .. } => {
                assert_eq!(event_type, "taskStarted");
                assert!(reason.contains("Completed"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn started_backlog_task_is_activated_first() {
        let (mut tasks, mut undo) = fresh();
        let events = vec![
            created("a", 1, Category::Deferred),
            TaskEventRecord::new(EventType::TaskStarted, 5, "a").with_category(Category::Daily),
        ];
        replay(&events, &mut tasks, &mut undo).expect("replay");
        let task = tasks.get("a").expect("task");
        assert_eq!(task.category(), Category::Daily);
        assert_eq!(task.timestamps().time_activated, Some(5));
        assert_eq!(task.progress_status(), ProgressStatus::Started);
        assert_eq!(undo.size(), 3);
    }

    #[test]
    fn completing_unstarted_task_synthesizes_start() {
        let (mut tasks, mut undo) = fresh();
        let events = vec![
            created("a", 1, Category::Daily),
            TaskEventRecord::new(EventType::TaskCompleted, 5, "a"),
        ];
        replay(&events, &mut tasks, &mut undo).expect("replay");
        let task = tasks.get("a").expect("task");
        assert_eq!(task.progress_status(), ProgressStatus::Completed);
        assert_eq!(task.timestamps().time_started, Some(5));
        assert_eq!(undo.size(), 2);

        let reverted = TaskEventRecord::new(EventType::TaskCompletedUndo, 6, "a").with_reverted(5);
        apply_event(&reverted, &mut tasks, &mut undo).expect("undo");
        let task = tasks.get("a").expect("task");
        assert_eq!(task.progress_status(), ProgressStatus::NotStarted);
        assert_eq!(task.timestamps().time_started, None);
    }

    #[test]
    fn activation_of_unseen_task_creates_it_in_backlog() {
        let (mut tasks, mut undo) = fresh();
        let mut record = TaskEventRecord::new(EventType::TaskActivated, 4, "a")
            .with_name("Later")
            .with_category(Category::Weekly);
        record.context = Some("Home".to_string());
        replay(&[record], &mut tasks, &mut undo).expect("replay");
        let task = tasks.get("a").expect("task");
        assert_eq!(task.category(), Category::Weekly);
        assert_eq!(task.timestamps().time_activated, Some(4));
        assert_eq!(undo.size(), 2);
    }

    #[test]
    fn undo_event_must_match_stack_top() {
        let (mut tasks, mut undo) = fresh();
        let events = vec![
            created("a", 1, Category::Daily),
            created("b", 2, Category::Daily),
            TaskEventRecord::new(EventType::TaskCreatedUndo, 3, "a"),
        ];
        let err = replay(&events, &mut tasks, &mut undo).expect_err("mismatch");
        assert!(matches!(err, Error::UnreplayableEvent { .. }));
    }

    #[test]
    fn failure_clears_undo_history() {
        let (mut tasks, mut undo) = fresh();
        let events = vec![
            created("a", 1, Category::Daily),
            TaskEventRecord::new(EventType::TaskFailed, 2, "a"),
            TaskEventRecord::new(EventType::TaskFailedUndo, 3, "a"),
        ];
        let err = replay(&events, &mut tasks, &mut undo).expect_err("not undoable");
        assert!(matches!(err, Error::UnreplayableEvent { .. }));
    }
}
