//! Live operations over one collection and its undo stack.
//!
//! Every successful mutation pushes its inverse onto the undo stack and
//! queues the matching event record in the outbox. The caller drains the
//! outbox with [`Session::take_outbox`] and persists it.

use tracing::debug;

use crate::collection::TaskCollection;
use crate::error::Result;
use crate::event::{EventType, TaskEventRecord};
use crate::replay;
use crate::task::{Category, Millis, ProgressStatus, Task, TaskId};
use crate::undo::{UndoEvent, UndoStack};

#[derive(Debug)]
pub struct Session {
    collection: TaskCollection,
    undo: UndoStack,
    outbox: Vec<TaskEventRecord>,
}

impl Session {
    pub fn new(collection: TaskCollection, undo: UndoStack) -> Self {
        Self {
            collection,
            undo,
            outbox: Vec::new(),
        }
    }

    /// Rebuild a session from a log. Returns it with the last event id.
    pub fn from_events(
        events: &[TaskEventRecord],
        mut collection: TaskCollection,
        mut undo: UndoStack,
    ) -> Result<(Self, Option<TaskId>)> {
        let last_id = replay::replay(events, &mut collection, &mut undo)?;
        Ok((Self::new(collection, undo), last_id))
    }

    pub fn collection(&self) -> &TaskCollection {
        &self.collection
    }

    pub fn undo_stack(&self) -> &UndoStack {
        &self.undo
    }

    pub fn outbox(&self) -> &[TaskEventRecord] {
        &self.outbox
    }

    pub fn take_outbox(&mut self) -> Vec<TaskEventRecord> {
        std::mem::take(&mut self.outbox)
    }

    pub fn into_parts(self) -> (TaskCollection, UndoStack) {
        (self.collection, self.undo)
    }

    fn record(&mut self, kind: EventType, timestamp: Millis, id: &str) {
        let mut record = TaskEventRecord::new(kind, timestamp, id);
        if let Some(task) = self.collection.get(id) {
            record = record.with_task(task);
        }
        self.outbox.push(record);
    }

    pub fn create_task(
        &mut self,
        name: &str,
        category: Category,
        context: &str,
        colour_id: i32,
        now: Millis,
    ) -> Result<TaskId> {
        let id = self
            .collection
            .create_independent_task(name, category, now, context, colour_id, None)?;
        self.undo.push_create_task(&id, now);
        self.record(EventType::TaskCreated, now, &id);
        Ok(id)
    }

    pub fn create_subtask(
        &mut self,
        parent_id: &str,
        name: &str,
        category: Category,
        now: Millis,
    ) -> Result<TaskId> {
        let id = self
            .collection
            .create_subtask(name, parent_id, category, now, None)?;
        self.undo.push_create_subtask(&id, now);
        self.record(EventType::SubtaskCreated, now, &id);
        Ok(id)
    }

    pub fn activate(&mut self, id: &str, category: Category, now: Millis) -> Result<()> {
        self.collection.activate_task(id, category, now)?;
        self.undo.push_activate(id, now);
        self.record(EventType::TaskActivated, now, id);
        Ok(())
    }

    /// Returns `Ok(false)` if the task was already started.
    pub fn start(&mut self, id: &str, now: Millis) -> Result<bool> {
        if !self.collection.start_task(id, now)? {
            return Ok(false);
        }
        self.undo.push_start(id, now);
        self.record(EventType::TaskStarted, now, id);
        Ok(true)
    }

    /// Completes the task. An unstarted task on an active board is started
    /// in the same step, so a single undo takes it back to `NotStarted`.
    /// Returns `Ok(false)` if it was already closed.
    pub fn complete(&mut self, id: &str, now: Millis) -> Result<bool> {
        let implicit_start = self.collection.get(id).is_some_and(|task| {
            task.progress_status() == ProgressStatus::NotStarted
                && task.category().is_active_board()
        });
        let closed = if implicit_start {
            self.collection.start_and_complete_task(id, now)?
        } else {
            self.collection.complete_task(id, now)?
        };
        if !closed {
            debug!("complete of {} skipped, already closed", id);
            return Ok(false);
        }
        self.undo.push_complete(id, implicit_start, now);
        self.record(EventType::TaskCompleted, now, id);
        Ok(true)
    }

    /// Fails the task and invalidates the undo stack. Returns `Ok(false)` if
    /// it was already closed.
    pub fn fail(&mut self, id: &str, now: Millis) -> Result<bool> {
        if !self.collection.fail_task(id, now)? {
            debug!("fail of {} skipped, already closed", id);
            return Ok(false);
        }
        self.undo.clear_stack();
        self.record(EventType::TaskFailed, now, id);
        Ok(true)
    }

    pub fn abandon(&mut self, id: &str, now: Millis) -> Result<Task> {
        let removed = self.collection.abandon_task(id)?;
        self.undo.push_abandon(removed.clone(), now);
        self.outbox
            .push(TaskEventRecord::new(EventType::TaskDeleted, now, id).with_task(&removed));
        Ok(removed)
    }

    /// Revives a failed task. Returns the id of the new copy.
    pub fn revive(&mut self, id: &str, as_active: bool, now: Millis) -> Result<TaskId> {
        let clone_id = self
            .collection
            .revive_task_as_clone(id, as_active, now, None)?;
        self.undo.push_revive(id, &clone_id, now);
        self.record(EventType::TaskRevived, now, &clone_id);
        if let Some(record) = self.outbox.last_mut() {
            record.original = Some(id.to_string());
        }
        Ok(clone_id)
    }

    pub fn edit(&mut self, id: &str, name: &str, now: Millis) -> Result<()> {
        let (previous_name, previous_edited) = self.collection.edit_task_text(id, name, now)?;
        self.undo.push_edit(id, &previous_name, previous_edited, now);
        self.record(EventType::TaskEdited, now, id);
        Ok(())
    }

    /// Reverts the newest undoable action, if any is still within the window.
    pub fn undo(&mut self, now: Millis) -> Result<Option<UndoEvent>> {
        let Some(event) = self.undo.perform_undo(now, &mut self.collection)? else {
            return Ok(None);
        };
        self.outbox.push(event.to_record());
        Ok(Some(event))
    }

    /// Drops undo entries older than the window.
    pub fn expire_undo(&mut self, now: Millis) -> usize {
        self.undo.filter_expired_undo_actions(now)
    }
}
