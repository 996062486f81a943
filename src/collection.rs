//! The task aggregate.
//!
//! `TaskCollection` owns every task in an id-keyed arena, the ordered list of
//! open tasks and the completed/failed indices. Each forward mutation has an
//! exact inverse. Every method checks its preconditions before writing
//! anything, so a returned error leaves the collection untouched.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::grouped::{Granularity, GroupedTaskIndex};
use crate::ids::{IdGenerator, UuidIds};
use crate::task::{
    normalize_name, validate_context, Category, Millis, ProgressStatus, Task, TaskId,
};

/// Construction-time policy for a collection.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectionOptions {
    /// Insert new tasks at the front of the active list instead of the back.
    pub new_tasks_at_top: bool,
    /// Bucket size for the completed and failed indices.
    pub granularity: Granularity,
}

pub struct TaskCollection {
    tasks: HashMap<TaskId, Task>,
    active: Vec<TaskId>,
    completed: GroupedTaskIndex,
    failed: GroupedTaskIndex,
    ids: Box<dyn IdGenerator>,
    new_tasks_at_top: bool,
}

impl Default for TaskCollection {
    fn default() -> Self {
        Self::new(CollectionOptions::default(), Box::new(UuidIds))
    }
}

impl std::fmt::Debug for TaskCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCollection")
            .field("tasks", &self.tasks.len())
            .field("active", &self.active)
            .field("completed", &self.completed.len())
            .field("failed", &self.failed.len())
            .finish()
    }
}

impl TaskCollection {
    pub fn new(options: CollectionOptions, ids: Box<dyn IdGenerator>) -> Self {
        Self {
            tasks: HashMap::new(),
            active: Vec::new(),
            completed: GroupedTaskIndex::by_time_closed(options.granularity),
            failed: GroupedTaskIndex::by_time_closed(options.granularity),
            ids,
            new_tasks_at_top: options.new_tasks_at_top,
        }
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    fn require(&self, id: &str) -> Result<&Task> {
        self.tasks
            .get(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    fn require_mut(&mut self, id: &str) -> Result<&mut Task> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Open tasks in display order.
    pub fn active_tasks(&self) -> impl Iterator<Item = &Task> {
        self.active.iter().filter_map(|id| self.tasks.get(id))
    }

    pub fn active_ids(&self) -> &[TaskId] {
        &self.active
    }

    /// Open tasks whose context matches case-insensitively.
    pub fn tasks_in_context<'a>(&'a self, context: &'a str) -> impl Iterator<Item = &'a Task> {
        self.active_tasks().filter(move |t| t.in_context(context))
    }

    pub fn children_of(&self, id: &str) -> Result<Vec<&Task>> {
        let task = self.require(id)?;
        Ok(task
            .children()
            .iter()
            .filter_map(|child| self.tasks.get(child))
            .collect())
    }

    pub fn completed(&self) -> &GroupedTaskIndex {
        &self.completed
    }

    pub fn failed(&self) -> &GroupedTaskIndex {
        &self.failed
    }

    /// Every id currently known, open or closed.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn new_tasks_at_top(&self) -> bool {
        self.new_tasks_at_top
    }

    /// A parent can take children while it is on the active list.
    fn is_live_parent(&self, id: &str) -> bool {
        self.tasks.get(id).is_some_and(Task::is_open) && self.active.iter().any(|a| a == id)
    }

    // ---------------------------------------------------------------------
    // Creation
    // ---------------------------------------------------------------------

    pub fn create_independent_task(
        &mut self,
        name: &str,
        category: Category,
        timestamp: Millis,
        context: &str,
        colour_id: i32,
        explicit_id: Option<TaskId>,
    ) -> Result<TaskId> {
        normalize_name(name)?;
        validate_context(context)?;
        let id = self.claim_id(explicit_id)?;
        let task = Task::new(id.clone(), name, category, timestamp, context, colour_id)?;
        self.tasks.insert(id.clone(), task);
        self.insert_active(id.clone());
        debug!("created task {} ({})", id, category);
        Ok(id)
    }

    pub fn undo_create_independent_task(&mut self, id: &str) -> Result<Task> {
        let task = self.require(id)?;
        if task.progress_status != ProgressStatus::NotStarted {
            return Err(Error::transition(id, "undo create", task.progress_status));
        }
        if task.parent.is_some() {
            return Err(Error::precondition(id, "undo create", "task has a parent"));
        }
        if !task.children.is_empty() {
            return Err(Error::precondition(id, "undo create", "task has children"));
        }
        self.active.retain(|a| a != id);
        self.remove_from_arena(id)
    }

    /// Creates `name` under `parent_id`. The child takes the parent's colour
    /// and context; its category must sit between the parent's and Daily.
    pub fn create_subtask(
        &mut self,
        name: &str,
        parent_id: &str,
        category: Category,
        timestamp: Millis,
        explicit_id: Option<TaskId>,
    ) -> Result<TaskId> {
        normalize_name(name)?;
        let parent = self.require(parent_id)?;
        if !self.is_live_parent(parent_id) {
            return Err(Error::transition(
                parent_id,
                "add subtask to",
                parent.progress_status,
            ));
        }
        if !parent.category.is_active_board() {
            return Err(Error::InvalidCategory {
                task_id: parent_id.to_string(),
                operation: "add subtask to",
                category: parent.category,
            });
        }
        if !category.is_active_board() || category < parent.category {
            return Err(Error::InvalidCategory {
                task_id: parent_id.to_string(),
                operation: "nest subtask under",
                category,
            });
        }
        let context = parent.context.clone();
        let colour_id = parent.colour_id;

        let id = self.claim_id(explicit_id)?;
        let task = Task::new(id.clone(), name, category, timestamp, &context, colour_id)?;
        self.tasks.insert(id.clone(), task);
        self.attach_child(parent_id, &id)?;
        self.insert_active(id.clone());
        debug!("created subtask {} under {}", id, parent_id);
        Ok(id)
    }

    pub fn undo_create_subtask(&mut self, id: &str) -> Result<Task> {
        let task = self.require(id)?;
        if task.progress_status != ProgressStatus::NotStarted {
            return Err(Error::transition(id, "undo subtask", task.progress_status));
        }
        if !task.children.is_empty() {
            return Err(Error::precondition(id, "undo subtask", "task has children"));
        }
        let Some(parent_id) = task.parent.clone() else {
            return Err(Error::precondition(id, "undo subtask", "task has no parent"));
        };
        self.detach_child(&parent_id, id)?;
        self.active.retain(|a| a != id);
        self.remove_from_arena(id)
    }

    // ---------------------------------------------------------------------
    // Activation and start
    // ---------------------------------------------------------------------

    /// Moves a parentless, childless backlog task onto an active board.
    pub fn activate_task(&mut self, id: &str, category: Category, timestamp: Millis) -> Result<()> {
        let task = self.require(id)?;
        if task.parent.is_some() || !task.children.is_empty() {
            return Err(Error::precondition(id, "activate", "task has relatives"));
        }
        if !task.is_open() {
            return Err(Error::transition(id, "activate", task.progress_status));
        }
        if task.category != Category::Deferred {
            return Err(Error::InvalidCategory {
                task_id: id.to_string(),
                operation: "activate",
                category: task.category,
            });
        }
        if !category.is_active_board() {
            return Err(Error::InvalidCategory {
                task_id: id.to_string(),
                operation: "activate",
                category,
            });
        }
        let task = self.require_mut(id)?;
        task.category = category;
        task.event_timestamps.time_activated = Some(timestamp);
        Ok(())
    }

    pub fn undo_activate_task(&mut self, id: &str) -> Result<()> {
        let task = self.require(id)?;
        if task.progress_status != ProgressStatus::NotStarted {
            return Err(Error::transition(id, "undo activate", task.progress_status));
        }
        if !task.children.is_empty() {
            return Err(Error::precondition(id, "undo activate", "task has children"));
        }
        if !task.category.is_active_board() {
            return Err(Error::InvalidCategory {
                task_id: id.to_string(),
                operation: "undo activate",
                category: task.category,
            });
        }
        let task = self.require_mut(id)?;
        task.category = Category::Deferred;
        task.event_timestamps.time_activated = None;
        Ok(())
    }

    /// Returns `Ok(false)` when the task is already started.
    pub fn start_task(&mut self, id: &str, timestamp: Millis) -> Result<bool> {
        let task = self.require(id)?;
        if !task.category.is_active_board() {
            return Err(Error::InvalidCategory {
                task_id: id.to_string(),
                operation: "start",
                category: task.category,
            });
        }
        match task.progress_status {
            ProgressStatus::Started => return Ok(false),
            ProgressStatus::NotStarted => {}
            other => return Err(Error::transition(id, "start", other)),
        }
        let task = self.require_mut(id)?;
        task.progress_status = ProgressStatus::Started;
        task.event_timestamps.time_started = Some(timestamp);
        Ok(true)
    }

    pub fn undo_start_task(&mut self, id: &str) -> Result<()> {
        let task = self.require_mut(id)?;
        if task.progress_status != ProgressStatus::Started {
            return Err(Error::transition(id, "undo start", task.progress_status));
        }
        task.progress_status = ProgressStatus::NotStarted;
        task.event_timestamps.time_started = None;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Closing
    // ---------------------------------------------------------------------

    /// Returns `Ok(false)` when the task is already closed.
    pub fn complete_task(&mut self, id: &str, timestamp: Millis) -> Result<bool> {
        self.close_task(id, ProgressStatus::Completed, timestamp)
    }

    /// Starts and completes an unstarted task on an active board as one
    /// step, both stamped `timestamp`. Undone with `implicit_start` set.
    pub fn start_and_complete_task(&mut self, id: &str, timestamp: Millis) -> Result<bool> {
        let task = self.require(id)?;
        if task.progress_status != ProgressStatus::NotStarted {
            return self.complete_task(id, timestamp);
        }
        if !task.category.is_active_board() {
            return Err(Error::InvalidCategory {
                task_id: id.to_string(),
                operation: "start",
                category: task.category,
            });
        }
        self.completed.granularity().bucket_start(timestamp)?;
        self.start_task(id, timestamp)?;
        self.close_task(id, ProgressStatus::Completed, timestamp)
    }

    /// Returns `Ok(false)` when the task is already closed. Backlog tasks
    /// must be activated before they can fail.
    pub fn fail_task(&mut self, id: &str, timestamp: Millis) -> Result<bool> {
        let task = self.require(id)?;
        if task.is_open() && !task.category.is_active_board() {
            return Err(Error::InvalidCategory {
                task_id: id.to_string(),
                operation: "fail",
                category: task.category,
            });
        }
        self.close_task(id, ProgressStatus::Failed, timestamp)
    }

    /// Closes the task and every still-open descendant on an active board
    /// with the same `timeClosed`, then purges them from the active list.
    fn close_task(&mut self, id: &str, progress: ProgressStatus, timestamp: Millis) -> Result<bool> {
        let root = self.require(id)?;
        if !root.is_open() {
            debug!("close of {} skipped, already {}", id, root.progress_status);
            return Ok(false);
        }
        self.completed.granularity().bucket_start(timestamp)?;

        let mut closing = vec![id.to_string()];
        let mut stack: Vec<TaskId> = root.children.clone();
        while let Some(child_id) = stack.pop() {
            let Some(child) = self.tasks.get(&child_id) else {
                continue;
            };
            if !child.category.is_active_board() || !child.is_open() {
                continue;
            }
            stack.extend(child.children.iter().cloned());
            closing.push(child_id);
        }

        let index = match progress {
            ProgressStatus::Completed => &mut self.completed,
            ProgressStatus::Failed => &mut self.failed,
            other => return Err(Error::transition(id, "close", other)),
        };
        for closing_id in &closing {
            let Some(task) = self.tasks.get_mut(closing_id) else {
                continue;
            };
            task.progress_status = progress;
            task.event_timestamps.time_closed = Some(timestamp);
            index.add_task(task)?;
        }

        let closed: HashSet<&TaskId> = closing.iter().collect();
        self.active.retain(|a| !closed.contains(a));
        debug!("closed {} task(s) from {} as {}", closing.len(), id, progress);
        Ok(true)
    }

    /// Reopens the task and each descendant that was closed by the same
    /// cascade, identified by an identical `timeClosed`. With
    /// `implicit_start` the root also loses the start recorded with it.
    pub fn undo_complete_task(&mut self, id: &str, implicit_start: bool) -> Result<()> {
        let root = self.require(id)?;
        if root.progress_status != ProgressStatus::Completed {
            return Err(Error::transition(id, "undo complete", root.progress_status));
        }
        if implicit_start && root.event_timestamps.time_started != root.event_timestamps.time_closed
        {
            return Err(Error::precondition(
                id,
                "undo complete",
                "start was not recorded with the completion",
            ));
        }
        let closed_at = root.event_timestamps.time_closed;

        let mut reopening = vec![id.to_string()];
        let mut stack: Vec<TaskId> = root.children.clone();
        while let Some(child_id) = stack.pop() {
            let Some(child) = self.tasks.get(&child_id) else {
                continue;
            };
            if child.progress_status != ProgressStatus::Completed
                || child.event_timestamps.time_closed != closed_at
            {
                continue;
            }
            stack.extend(child.children.iter().cloned());
            reopening.push(child_id);
        }

        if let Some(missing) = reopening.iter().find(|r| !self.completed.contains(r)) {
            warn!("completed index has no entry for {}", missing);
            return Err(Error::precondition(
                missing,
                "undo complete",
                "task is not in the completed index",
            ));
        }

        for reopen_id in &reopening {
            let Some(task) = self.tasks.get_mut(reopen_id) else {
                continue;
            };
            let removed = self.completed.remove_task(task);
            debug_assert!(removed, "{reopen_id} vanished from the completed index");
            if implicit_start && reopen_id == id {
                task.event_timestamps.time_started = None;
            }
            task.progress_status = if task.event_timestamps.time_started.is_some() {
                ProgressStatus::Started
            } else {
                ProgressStatus::NotStarted
            };
            task.event_timestamps.time_closed = None;
            self.active.push(reopen_id.clone());
        }
        self.sort_active();
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Abandon
    // ---------------------------------------------------------------------

    /// Removes an open, childless task. The returned task keeps its parent
    /// link so it can be restored.
    pub fn abandon_task(&mut self, id: &str) -> Result<Task> {
        let task = self.require(id)?;
        if !task.is_open() {
            return Err(Error::transition(id, "abandon", task.progress_status));
        }
        if !task.children.is_empty() {
            return Err(Error::precondition(id, "abandon", "task has children"));
        }
        let parent = task.parent.clone();
        self.active.retain(|a| a != id);
        if let Some(parent_id) = parent {
            self.unlink_from_parent(&parent_id, id);
        }
        self.remove_from_arena(id)
    }

    /// Restores an abandoned task. Refused when its parent is gone or has
    /// closed in the meantime.
    pub fn undo_abandon_task(&mut self, task: Task) -> Result<TaskId> {
        let id = task.id.clone();
        if self.tasks.contains_key(&id) {
            return Err(Error::DuplicateTaskId(id));
        }
        if let Some(parent_id) = task.parent.as_deref() {
            if !self.is_live_parent(parent_id) {
                return Err(Error::precondition(
                    &id,
                    "undo abandon",
                    format!("parent {parent_id} is no longer open"),
                ));
            }
        }

        let created = task.event_timestamps.time_created;
        let parent = task.parent.clone();
        self.ids.observe(&id);
        self.tasks.insert(id.clone(), task);

        if let Some(parent_id) = parent {
            let tasks = &self.tasks;
            if let Some(siblings) = self.tasks.get(&parent_id).map(|p| p.children.clone()) {
                let pos = siblings.partition_point(|s| {
                    tasks
                        .get(s)
                        .is_some_and(|t| t.event_timestamps.time_created <= created)
                });
                if let Some(p) = self.tasks.get_mut(&parent_id) {
                    p.children.insert(pos, id.clone());
                }
            }
        }

        let pos = self.active_position_for(created);
        self.active.insert(pos, id.clone());
        Ok(id)
    }

    // ---------------------------------------------------------------------
    // Revive
    // ---------------------------------------------------------------------

    /// Marks a failed task Reattempted and creates a fresh copy of it.
    ///
    /// The copy rejoins the original's parent when reviving as active and
    /// that parent is still open. Otherwise it is independent, either in the
    /// original's category or, when not `as_active`, in the backlog.
    pub fn revive_task_as_clone(
        &mut self,
        id: &str,
        as_active: bool,
        timestamp: Millis,
        explicit_id: Option<TaskId>,
    ) -> Result<TaskId> {
        let original = self.require(id)?;
        if original.progress_status != ProgressStatus::Failed {
            return Err(Error::transition(id, "revive", original.progress_status));
        }
        let name = original.name.clone();
        let context = original.context.clone();
        let colour_id = original.colour_id;
        let category = original.category;
        let live_parent = original
            .parent
            .clone()
            .filter(|p| as_active && category.is_active_board() && self.is_live_parent(p));

        let clone_id = match live_parent {
            Some(parent_id) => {
                self.create_subtask(&name, &parent_id, category, timestamp, explicit_id)?
            }
            None => {
                let category = if as_active { category } else { Category::Deferred };
                self.create_independent_task(
                    &name,
                    category,
                    timestamp,
                    &context,
                    colour_id,
                    explicit_id,
                )?
            }
        };

        let original = self.require_mut(id)?;
        original.progress_status = ProgressStatus::Reattempted;
        original.event_timestamps.time_revived = Some(timestamp);
        debug!("revived {} as {}", id, clone_id);
        Ok(clone_id)
    }

    pub fn undo_revive_task(&mut self, clone_id: &str, original_id: &str) -> Result<()> {
        let clone = self.require(clone_id)?;
        if clone.progress_status != ProgressStatus::NotStarted {
            return Err(Error::transition(clone_id, "undo revive", clone.progress_status));
        }
        if !clone.children.is_empty() {
            return Err(Error::precondition(clone_id, "undo revive", "clone has children"));
        }
        let clone_parent = clone.parent.clone();
        let original = self.require(original_id)?;
        if original.progress_status != ProgressStatus::Reattempted {
            return Err(Error::transition(
                original_id,
                "undo revive",
                original.progress_status,
            ));
        }

        if let Some(parent_id) = clone_parent {
            self.detach_child(&parent_id, clone_id)?;
        }
        self.active.retain(|a| a != clone_id);
        self.remove_from_arena(clone_id)?;

        let original = self.require_mut(original_id)?;
        original.progress_status = ProgressStatus::Failed;
        original.event_timestamps.time_revived = None;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Edit
    // ---------------------------------------------------------------------

    /// Renames a task. Returns the previous name and `timeEdited`.
    pub fn edit_task_text(
        &mut self,
        id: &str,
        new_name: &str,
        timestamp: Millis,
    ) -> Result<(String, Option<Millis>)> {
        let name = normalize_name(new_name)?;
        let task = self.require_mut(id)?;
        let previous = std::mem::replace(&mut task.name, name);
        let previous_edited = task.event_timestamps.time_edited.replace(timestamp);
        Ok((previous, previous_edited))
    }

    pub fn undo_edit_task_text(
        &mut self,
        id: &str,
        previous_name: &str,
        previous_edited: Option<Millis>,
    ) -> Result<()> {
        let name = normalize_name(previous_name)?;
        let task = self.require_mut(id)?;
        task.name = name;
        task.event_timestamps.time_edited = previous_edited;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Snapshot
    // ---------------------------------------------------------------------

    pub fn snapshot(&self) -> CollectionSnapshot {
        let groups = |index: &GroupedTaskIndex| {
            index
                .grouped()
                .iter()
                .map(|g| GroupSnapshot {
                    time: g.time(),
                    ids: g.ids().map(str::to_string).collect(),
                })
                .collect()
        };
        CollectionSnapshot {
            active: self.active.clone(),
            completed: groups(&self.completed),
            failed: groups(&self.failed),
            tasks: self
                .tasks
                .iter()
                .map(|(id, task)| (id.clone(), task.clone()))
                .collect(),
        }
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn claim_id(&mut self, explicit_id: Option<TaskId>) -> Result<TaskId> {
        match explicit_id {
            Some(id) => {
                if id.trim().is_empty() {
                    return Err(Error::InvalidArgument("task id cannot be empty".to_string()));
                }
                if self.tasks.contains_key(&id) {
                    return Err(Error::DuplicateTaskId(id));
                }
                self.ids.observe(&id);
                Ok(id)
            }
            None => loop {
                let id = self.ids.next_id();
                if !self.tasks.contains_key(&id) {
                    break Ok(id);
                }
            },
        }
    }

    fn insert_active(&mut self, id: TaskId) {
        if self.new_tasks_at_top {
            self.active.insert(0, id);
        } else {
            self.active.push(id);
        }
    }

    fn created_at(&self, id: &str) -> Millis {
        self.tasks
            .get(id)
            .map(|t| t.event_timestamps.time_created)
            .unwrap_or(Millis::MAX)
    }

    fn active_position_for(&self, created: Millis) -> usize {
        if self.new_tasks_at_top {
            self.active
                .partition_point(|a| self.created_at(a) >= created)
        } else {
            self.active
                .partition_point(|a| self.created_at(a) <= created)
        }
    }

    fn sort_active(&mut self) {
        let mut active = std::mem::take(&mut self.active);
        if self.new_tasks_at_top {
            active.sort_by(|a, b| self.created_at(b).cmp(&self.created_at(a)));
        } else {
            active.sort_by_key(|a| self.created_at(a));
        }
        self.active = active;
    }

    fn attach_child(&mut self, parent_id: &str, child_id: &str) -> Result<()> {
        self.require_mut(child_id)?.parent = Some(parent_id.to_string());
        self.require_mut(parent_id)?
            .children
            .push(child_id.to_string());
        Ok(())
    }

    /// Drops `child_id` from the parent's list without touching the child.
    fn unlink_from_parent(&mut self, parent_id: &str, child_id: &str) {
        if let Some(parent) = self.tasks.get_mut(parent_id) {
            parent.children.retain(|c| c != child_id);
        }
    }

    fn detach_child(&mut self, parent_id: &str, child_id: &str) -> Result<()> {
        self.unlink_from_parent(parent_id, child_id);
        self.require_mut(child_id)?.parent = None;
        Ok(())
    }

    fn remove_from_arena(&mut self, id: &str) -> Result<Task> {
        self.tasks
            .remove(id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }
}

/// Comparable, serializable view of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CollectionSnapshot {
    pub active: Vec<TaskId>,
    pub completed: Vec<GroupSnapshot>,
    pub failed: Vec<GroupSnapshot>,
    pub tasks: BTreeMap<TaskId, Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSnapshot {
    pub time: Millis,
    pub ids: Vec<TaskId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::SequentialIds;

    fn collection() -> TaskCollection {
        TaskCollection::new(CollectionOptions::default(), Box::new(SequentialIds::new("t")))
    }

    #[test]
    fn create_and_undo_create_restores_empty() {
        let mut tasks = collection();
        let before = tasks.snapshot();
        let id = tasks
            .create_independent_task("Plan", Category::Weekly, 10, "Work", 3, None)
            .expect("create");
        assert_eq!(id, "t1");
        assert_eq!(tasks.active_ids(), ["t1".to_string()]);
        tasks.undo_create_independent_task(&id).expect("undo");
        assert_eq!(tasks.snapshot(), before);
    }

    #[test]
    fn failed_validation_leaves_collection_untouched() {
        let mut tasks = collection();
        let err = tasks
            .create_independent_task("   ", Category::Daily, 1, "Work", 0, None)
            .expect_err("empty name");
        assert!(matches!(err, Error::InvalidName(_)));
        assert!(tasks.is_empty());
        assert!(tasks.active_ids().is_empty());
    }

    #[test]
    fn duplicate_explicit_id_is_rejected() {
        let mut tasks = collection();
        tasks
            .create_independent_task("A", Category::Daily, 1, "c", 0, Some("x".into()))
            .expect("create");
        let err = tasks
            .create_independent_task("B", Category::Daily, 2, "c", 0, Some("x".into()))
            .expect_err("duplicate");
        assert!(matches!(err, Error::DuplicateTaskId(_)));
    }

    #[test]
    fn subtask_inherits_parent_colour_and_context() {
        let mut tasks = collection();
        let goal = tasks
            .create_independent_task("Goal", Category::Goal, 1, "Home", 7, None)
            .expect("goal");
        let child = tasks
            .create_subtask("Step", &goal, Category::Daily, 2, None)
            .expect("child");
        let child_task = tasks.get(&child).expect("child exists");
        assert_eq!(child_task.colour_id(), 7);
        assert_eq!(child_task.context(), "Home");
        assert_eq!(child_task.parent(), Some(goal.as_str()));
        assert_eq!(tasks.get(&goal).expect("goal").children(), [child.clone()]);

        tasks.undo_create_subtask(&child).expect("undo");
        assert!(tasks.get(&goal).expect("goal").children().is_empty());
        assert!(!tasks.contains(&child));
    }

    #[test]
    fn subtask_category_must_not_outrank_parent() {
        let mut tasks = collection();
        let weekly = tasks
            .create_independent_task("W", Category::Weekly, 1, "c", 0, None)
            .expect("weekly");
        let err = tasks
            .create_subtask("G", &weekly, Category::Goal, 2, None)
            .expect_err("goal under weekly");
        assert!(matches!(err, Error::InvalidCategory { .. }));
        let err = tasks
            .create_subtask("D", &weekly, Category::Deferred, 2, None)
            .expect_err("deferred child");
        assert!(matches!(err, Error::InvalidCategory { .. }));
    }

    #[test]
    fn activate_requires_no_relatives() {
        let mut tasks = collection();
        let goal = tasks
            .create_independent_task("Goal", Category::Goal, 1, "c", 0, None)
            .expect("goal");
        tasks
            .create_subtask("Step", &goal, Category::Daily, 2, None)
            .expect("child");
        let err = tasks
            .activate_task(&goal, Category::Daily, 3)
            .expect_err("has children");
        assert!(matches!(err, Error::PreconditionFailed { .. }));
    }

    #[test]
    fn activate_then_undo_returns_to_backlog() {
        let mut tasks = collection();
        let id = tasks
            .create_independent_task("Later", Category::Deferred, 1, "c", 0, None)
            .expect("create");
        let before = tasks.snapshot();
        tasks.activate_task(&id, Category::Daily, 5).expect("activate");
        let task = tasks.get(&id).expect("task");
        assert_eq!(task.category(), Category::Daily);
        assert_eq!(task.timestamps().time_activated, Some(5));
        tasks.undo_activate_task(&id).expect("undo");
        assert_eq!(tasks.snapshot(), before);
    }

    #[test]
    fn activate_only_promotes_backlog_tasks() {
        let mut tasks = collection();
        let id = tasks
            .create_independent_task("Now", Category::Daily, 10, "c", 0, None)
            .expect("create");
        let before = tasks.snapshot();
        let err = tasks
            .activate_task(&id, Category::Weekly, 20)
            .expect_err("already active");
        assert!(matches!(err, Error::InvalidCategory { .. }));
        assert_eq!(tasks.snapshot(), before);
        assert_eq!(tasks.get(&id).expect("task").timestamps().time_activated, Some(10));
    }

    #[test]
    fn start_and_complete_is_undone_as_one_step() {
        let mut tasks = collection();
        let goal = tasks
            .create_independent_task("Goal", Category::Goal, 1, "c", 0, None)
            .expect("goal");
        let child = tasks
            .create_subtask("Step", &goal, Category::Weekly, 2, None)
            .expect("child");
        let before = tasks.snapshot();

        assert!(tasks.start_and_complete_task(&goal, 10).expect("complete"));
        let task = tasks.get(&goal).expect("goal");
        assert_eq!(task.timestamps().time_started, Some(10));
        assert_eq!(task.timestamps().time_closed, Some(10));
        assert_eq!(tasks.get(&child).expect("child").timestamps().time_started, None);

        tasks.undo_complete_task(&goal, true).expect("undo");
        assert_eq!(tasks.snapshot(), before);
    }

    #[test]
    fn start_and_complete_checks_before_writing() {
        let mut tasks = collection();
        let id = tasks
            .create_independent_task("Later", Category::Deferred, 1, "c", 0, None)
            .expect("create");
        let before = tasks.snapshot();
        assert!(matches!(
            tasks.start_and_complete_task(&id, 2),
            Err(Error::InvalidCategory { .. })
        ));
        assert_eq!(tasks.snapshot(), before);
    }

    #[test]
    fn implicit_start_undo_needs_matching_start() {
        let mut tasks = collection();
        let id = tasks
            .create_independent_task("Run", Category::Daily, 1, "c", 0, None)
            .expect("create");
        tasks.start_task(&id, 5).expect("start");
        tasks.complete_task(&id, 9).expect("complete");
        let before = tasks.snapshot();
        assert!(matches!(
            tasks.undo_complete_task(&id, true),
            Err(Error::PreconditionFailed { .. })
        ));
        assert_eq!(tasks.snapshot(), before);
    }

    #[test]
    fn undo_complete_refuses_when_index_disagrees() {
        let mut tasks = collection();
        let goal = tasks
            .create_independent_task("Goal", Category::Goal, 1, "c", 0, None)
            .expect("goal");
        let child = tasks
            .create_subtask("Step", &goal, Category::Daily, 2, None)
            .expect("child");
        tasks.complete_task(&goal, 10).expect("complete");
        let stray = tasks.get(&child).expect("child").clone();
        assert!(tasks.completed.remove_task(&stray));
        let before = tasks.snapshot();

        assert!(matches!(
            tasks.undo_complete_task(&goal, false),
            Err(Error::PreconditionFailed { .. })
        ));
        assert_eq!(tasks.snapshot(), before);
    }

    #[test]
    fn start_is_idempotent() {
        let mut tasks = collection();
        let id = tasks
            .create_independent_task("Run", Category::Daily, 1, "c", 0, None)
            .expect("create");
        assert!(tasks.start_task(&id, 2).expect("start"));
        assert!(!tasks.start_task(&id, 3).expect("restart"));
        assert_eq!(tasks.get(&id).expect("task").timestamps().time_started, Some(2));
        tasks.undo_start_task(&id).expect("undo");
        assert_eq!(
            tasks.get(&id).expect("task").progress_status(),
            ProgressStatus::NotStarted
        );
    }

    #[test]
    fn start_rejects_backlog_tasks() {
        let mut tasks = collection();
        let id = tasks
            .create_independent_task("Later", Category::Deferred, 1, "c", 0, None)
            .expect("create");
        assert!(matches!(
            tasks.start_task(&id, 2),
            Err(Error::InvalidCategory { .. })
        ));
    }

    #[test]
    fn close_cascades_and_undo_reopens_same_batch() {
        let mut tasks = collection();
        let goal = tasks
            .create_independent_task("Goal", Category::Goal, 1, "c", 0, None)
            .expect("goal");
        let a = tasks
            .create_subtask("A", &goal, Category::Daily, 2, None)
            .expect("a");
        let b = tasks
            .create_subtask("B", &goal, Category::Daily, 3, None)
            .expect("b");
        let early = tasks
            .create_subtask("Early", &goal, Category::Daily, 4, None)
            .expect("early");
        tasks.start_task(&a, 5).expect("start a");
        assert!(tasks.complete_task(&early, 6).expect("early done"));

        assert!(tasks.complete_task(&goal, 10).expect("complete"));
        assert!(tasks.active_ids().is_empty());
        for id in [&goal, &a, &b] {
            assert_eq!(tasks.get(id).expect("task").timestamps().time_closed, Some(10));
        }
        assert!(!tasks.complete_task(&goal, 11).expect("again"));

        tasks.undo_complete_task(&goal, false).expect("undo");
        assert_eq!(tasks.active_ids(), [goal.clone(), a.clone(), b.clone()]);
        assert_eq!(
            tasks.get(&a).expect("a").progress_status(),
            ProgressStatus::Started
        );
        assert_eq!(
            tasks.get(&b).expect("b").progress_status(),
            ProgressStatus::NotStarted
        );
        let early_task = tasks.get(&early).expect("early");
        assert_eq!(early_task.progress_status(), ProgressStatus::Completed);
        assert_eq!(early_task.timestamps().time_closed, Some(6));
        assert_eq!(tasks.completed().len(), 1);
    }

    #[test]
    fn failure_cannot_be_undone_as_completion() {
        let mut tasks = collection();
        let id = tasks
            .create_independent_task("Run", Category::Daily, 1, "c", 0, None)
            .expect("create");
        assert!(tasks.fail_task(&id, 2).expect("fail"));
        assert!(tasks.failed().contains(&id));
        let err = tasks.undo_complete_task(&id, false).expect_err("failed");
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[test]
    fn abandon_keeps_parent_link_and_undo_restores_order() {
        let mut tasks = collection();
        let goal = tasks
            .create_independent_task("Goal", Category::Goal, 1, "c", 0, None)
            .expect("goal");
        let a = tasks
            .create_subtask("A", &goal, Category::Daily, 2, None)
            .expect("a");
        let b = tasks
            .create_subtask("B", &goal, Category::Daily, 3, None)
            .expect("b");
        let before = tasks.snapshot();

        let removed = tasks.abandon_task(&a).expect("abandon");
        assert_eq!(removed.parent(), Some(goal.as_str()));
        assert_eq!(tasks.get(&goal).expect("goal").children(), [b.clone()]);

        tasks.undo_abandon_task(removed).expect("restore");
        assert_eq!(tasks.snapshot(), before);
    }

    #[test]
    fn undo_abandon_refuses_closed_parent() {
        let mut tasks = collection();
        let goal = tasks
            .create_independent_task("Goal", Category::Goal, 1, "c", 0, None)
            .expect("goal");
        let a = tasks
            .create_subtask("A", &goal, Category::Daily, 2, None)
            .expect("a");
        let removed = tasks.abandon_task(&a).expect("abandon");
        tasks.complete_task(&goal, 5).expect("complete");

        let err = tasks.undo_abandon_task(removed).expect_err("parent closed");
        assert!(matches!(err, Error::PreconditionFailed { .. }));
        assert!(!tasks.contains(&a));
    }

    #[test]
    fn abandon_requires_open_childless_task() {
        let mut tasks = collection();
        let goal = tasks
            .create_independent_task("Goal", Category::Goal, 1, "c", 0, None)
            .expect("goal");
        tasks
            .create_subtask("A", &goal, Category::Daily, 2, None)
            .expect("a");
        assert!(matches!(
            tasks.abandon_task(&goal),
            Err(Error::PreconditionFailed { .. })
        ));
    }

    #[test]
    fn revive_rejoins_live_parent() {
        let mut tasks = collection();
        let goal = tasks
            .create_independent_task("Goal", Category::Goal, 1, "c", 4, None)
            .expect("goal");
        let a = tasks
            .create_subtask("A", &goal, Category::Daily, 2, None)
            .expect("a");
        tasks.fail_task(&a, 3).expect("fail");

        let clone = tasks.revive_task_as_clone(&a, true, 4, None).expect("revive");
        let clone_task = tasks.get(&clone).expect("clone");
        assert_eq!(clone_task.parent(), Some(goal.as_str()));
        assert_eq!(clone_task.name(), "A");
        let original = tasks.get(&a).expect("original");
        assert_eq!(original.progress_status(), ProgressStatus::Reattempted);
        assert!(tasks.failed().contains(&a));

        let err = tasks
            .revive_task_as_clone(&a, true, 5, None)
            .expect_err("twice");
        assert!(matches!(err, Error::InvalidStateTransition { .. }));

        tasks.undo_revive_task(&clone, &a).expect("undo");
        assert!(!tasks.contains(&clone));
        assert_eq!(tasks.get(&goal).expect("goal").children(), [a.clone()]);
        let original = tasks.get(&a).expect("original");
        assert_eq!(original.progress_status(), ProgressStatus::Failed);
        assert_eq!(original.timestamps().time_revived, None);
    }

    #[test]
    fn revive_to_backlog() {
        let mut tasks = collection();
        let id = tasks
            .create_independent_task("Run", Category::Weekly, 1, "c", 0, None)
            .expect("create");
        tasks.fail_task(&id, 2).expect("fail");
        let clone = tasks.revive_task_as_clone(&id, false, 3, None).expect("revive");
        let clone_task = tasks.get(&clone).expect("clone");
        assert_eq!(clone_task.category(), Category::Deferred);
        assert_eq!(clone_task.timestamps().time_activated, None);
    }

    #[test]
    fn edit_and_undo_restore_never_edited() {
        let mut tasks = collection();
        let id = tasks
            .create_independent_task("Old", Category::Daily, 1, "c", 0, None)
            .expect("create");
        let before = tasks.snapshot();
        let (previous, edited) = tasks.edit_task_text(&id, "  New ", 9).expect("edit");
        assert_eq!(previous, "Old");
        assert_eq!(edited, None);
        assert_eq!(tasks.get(&id).expect("task").name(), "New");
        tasks
            .undo_edit_task_text(&id, &previous, edited)
            .expect("undo");
        assert_eq!(tasks.snapshot(), before);
    }

    #[test]
    fn new_tasks_at_top_policy() {
        let mut tasks = TaskCollection::new(
            CollectionOptions {
                new_tasks_at_top: true,
                ..CollectionOptions::default()
            },
            Box::new(SequentialIds::new("t")),
        );
        let a = tasks
            .create_independent_task("A", Category::Daily, 1, "c", 0, None)
            .expect("a");
        let b = tasks
            .create_independent_task("B", Category::Daily, 2, "c", 0, None)
            .expect("b");
        assert_eq!(tasks.active_ids(), [b.clone(), a.clone()]);
        tasks.complete_task(&a, 3).expect("complete");
        tasks.undo_complete_task(&a, false).expect("undo");
        assert_eq!(tasks.active_ids(), [b, a]);
    }

    #[test]
    fn context_query_ignores_case() {
        let mut tasks = collection();
        tasks
            .create_independent_task("A", Category::Daily, 1, "Work", 0, None)
            .expect("a");
        tasks
            .create_independent_task("B", Category::Daily, 2, "Home", 0, None)
            .expect("b");
        let names: Vec<&str> = tasks.tasks_in_context("WORK").map(Task::name).collect();
        assert_eq!(names, vec!["A"]);
    }
}
