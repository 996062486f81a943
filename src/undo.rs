//! Time-bounded undo stack.
//!
//! Basic semantics:
//! - One entry per successful forward mutation, newest on top
//! - Undo reverts only the top entry
//! - A stale top entry invalidates the whole stack
//! - Failing a task clears the stack; failures are never undoable

use tracing::info;

use crate::collection::TaskCollection;
use crate::error::Result;
use crate::event::{EventType, TaskEventRecord};
use crate::task::{Millis, Task, TaskId};

/// One hour.
pub const DEFAULT_MAX_AGE_MS: Millis = 3_600_000;

/// What an entry needs to invert its mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoAction {
    CreateTask {
        task_id: TaskId,
    },
    CreateSubtask {
        task_id: TaskId,
    },
    Activate {
        task_id: TaskId,
    },
    /// `implicit_start` when the completion also started the task.
    Complete {
        task_id: TaskId,
        implicit_start: bool,
    },
    Start {
        task_id: TaskId,
    },
    Revive {
        original_id: TaskId,
        clone_id: TaskId,
    },
    Edit {
        task_id: TaskId,
        previous_name: String,
        previous_edited: Option<Millis>,
    },
    Abandon {
        task: Box<Task>,
    },
}

impl UndoAction {
    /// The forward event type this entry reverts.
    pub fn event_type(&self) -> EventType {
        match self {
            UndoAction::CreateTask { .. } => EventType::TaskCreated,
            UndoAction::CreateSubtask { .. } => EventType::SubtaskCreated,
            UndoAction::Activate { .. } => EventType::TaskActivated,
            UndoAction::Complete { .. } => EventType::TaskCompleted,
            UndoAction::Start { .. } => EventType::TaskStarted,
            UndoAction::Revive { .. } => EventType::TaskRevived,
            UndoAction::Edit { .. } => EventType::TaskEdited,
            UndoAction::Abandon { .. } => EventType::TaskDeleted,
        }
    }

    /// Id the forward event was recorded under. For revivals, the clone.
    pub fn task_id(&self) -> &str {
        match self {
            UndoAction::CreateTask { task_id }
            | UndoAction::CreateSubtask { task_id }
            | UndoAction::Activate { task_id }
            | UndoAction::Complete { task_id, .. }
            | UndoAction::Start { task_id }
            | UndoAction::Edit { task_id, .. } => task_id,
            UndoAction::Revive { clone_id, .. } => clone_id,
            UndoAction::Abandon { task } => task.id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEntry {
    pub timestamp: Millis,
    pub action: UndoAction,
}

/// Result of a successful undo, ready to be recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoEvent {
    pub event_type: EventType,
    pub timestamp: Millis,
    pub task_id: TaskId,
    pub original_id: Option<TaskId>,
    /// Name after the undo, for edits and restored tasks.
    pub name: Option<String>,
    pub reverted_event_timestamp: Millis,
}

impl UndoEvent {
    pub fn to_record(&self) -> TaskEventRecord {
        let mut record = TaskEventRecord::new(self.event_type, self.timestamp, self.task_id.clone())
            .with_reverted(self.reverted_event_timestamp);
        if let Some(original) = &self.original_id {
            record = record.with_original(original.clone());
        }
        if let Some(name) = &self.name {
            record = record.with_name(name.clone());
        }
        record
    }
}

#[derive(Debug, Clone)]
pub struct UndoStack {
    entries: Vec<UndoEntry>,
    max_age_ms: Millis,
}

impl Default for UndoStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE_MS)
    }
}

impl UndoStack {
    pub fn new(max_age_ms: Millis) -> Self {
        Self {
            entries: Vec::new(),
            max_age_ms,
        }
    }

    pub fn max_age_ms(&self) -> Millis {
        self.max_age_ms
    }

    fn push(&mut self, timestamp: Millis, action: UndoAction) {
        self.entries.push(UndoEntry { timestamp, action });
    }

    pub fn push_create_task(&mut self, task_id: &str, timestamp: Millis) {
        self.push(
            timestamp,
            UndoAction::CreateTask {
                task_id: task_id.to_string(),
            },
        );
    }

    pub fn push_create_subtask(&mut self, task_id: &str, timestamp: Millis) {
        self.push(
            timestamp,
            UndoAction::CreateSubtask {
                task_id: task_id.to_string(),
            },
        );
    }

    pub fn push_activate(&mut self, task_id: &str, timestamp: Millis) {
        self.push(
            timestamp,
            UndoAction::Activate {
                task_id: task_id.to_string(),
            },
        );
    }

    pub fn push_complete(&mut self, task_id: &str, implicit_start: bool, timestamp: Millis) {
        self.push(
            timestamp,
            UndoAction::Complete {
                task_id: task_id.to_string(),
                implicit_start,
            },
        );
    }

    pub fn push_start(&mut self, task_id: &str, timestamp: Millis) {
        self.push(
            timestamp,
            UndoAction::Start {
                task_id: task_id.to_string(),
            },
        );
    }

    pub fn push_revive(&mut self, original_id: &str, clone_id: &str, timestamp: Millis) {
        self.push(
            timestamp,
            UndoAction::Revive {
                original_id: original_id.to_string(),
                clone_id: clone_id.to_string(),
            },
        );
    }

    /// `previous_edited` is the `timeEdited` before this edit, `None` if the
    /// task had never been edited.
    pub fn push_edit(
        &mut self,
        task_id: &str,
        previous_name: &str,
        previous_edited: Option<Millis>,
        timestamp: Millis,
    ) {
        self.push(
            timestamp,
            UndoAction::Edit {
                task_id: task_id.to_string(),
                previous_name: previous_name.to_string(),
                previous_edited,
            },
        );
    }

    pub fn push_abandon(&mut self, task: Task, timestamp: Millis) {
        self.push(
            timestamp,
            UndoAction::Abandon {
                task: Box::new(task),
            },
        );
    }

    fn is_expired(&self, entry: &UndoEntry, now: Millis) -> bool {
        now.saturating_sub(entry.timestamp) > self.max_age_ms
    }

    /// Reverts the newest entry.
    ///
    /// Returns `Ok(None)` when the stack is empty or the top entry is older
    /// than the window, in which case every entry is dropped. The entry is
    /// consumed even if the inverse fails.
    pub fn perform_undo(
        &mut self,
        now: Millis,
        collection: &mut TaskCollection,
    ) -> Result<Option<UndoEvent>> {
        let Some(entry) = self.entries.pop() else {
            return Ok(None);
        };
        if self.is_expired(&entry, now) {
            info!(
                "undo entry from {} expired at {}, dropping {} older entries",
                entry.timestamp,
                now,
                self.entries.len()
            );
            self.entries.clear();
            return Ok(None);
        }

        let event_type = entry.action.event_type().undo();
        let task_id = entry.action.task_id().to_string();
        let mut original_id = None;
        let mut name = None;

        match entry.action {
            UndoAction::CreateTask { task_id } => {
                collection.undo_create_independent_task(&task_id)?;
            }
            UndoAction::CreateSubtask { task_id } => {
                collection.undo_create_subtask(&task_id)?;
            }
            UndoAction::Activate { task_id } => collection.undo_activate_task(&task_id)?,
            UndoAction::Complete {
                task_id,
                implicit_start,
            } => collection.undo_complete_task(&task_id, implicit_start)?,
            UndoAction::Start { task_id } => collection.undo_start_task(&task_id)?,
            UndoAction::Revive {
                original_id: original,
                clone_id,
            } => {
                collection.undo_revive_task(&clone_id, &original)?;
                original_id = Some(original);
            }
            UndoAction::Edit {
                task_id,
                previous_name,
                previous_edited,
            } => {
                collection.undo_edit_task_text(&task_id, &previous_name, previous_edited)?;
                name = Some(previous_name);
            }
            UndoAction::Abandon { task } => {
                name = Some(task.name().to_string());
                collection.undo_abandon_task(*task)?;
            }
        }

        Ok(Some(UndoEvent {
            event_type,
            timestamp: now,
            task_id,
            original_id,
            name,
            reverted_event_timestamp: entry.timestamp,
        }))
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn peek(&self) -> Option<&UndoEntry> {
        self.entries.last()
    }

    /// Drops entries older than the window, keeping newer ones in order.
    pub fn filter_expired_undo_actions(&mut self, now: Millis) -> usize {
        let before = self.entries.len();
        let max_age = self.max_age_ms;
        self.entries
            .retain(|e| now.saturating_sub(e.timestamp) <= max_age);
        before - self.entries.len()
    }

    pub fn clear_stack(&mut self) {
        if !self.entries.is_empty() {
            info!("undo stack cleared ({} entries)", self.entries.len());
        }
        self.entries.clear();
    }
}
