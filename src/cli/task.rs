//! tasklog command implementations.
//!
//! Mutating commands take the log lock, replay the log into a fresh
//! session, apply one operation at the current time and append whatever
//! events the session emitted. Read-only commands replay without locking.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::collection::TaskCollection;
use crate::config::{self, Config};
use crate::error::{Error, Result};
use crate::event::{EventDestination, EventSink, TaskEventRecord};
use crate::ids::{resolve_task_id, UuidIds};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::session::Session;
use crate::storage::EventLog;
use crate::task::{Category, Millis, Task, TaskId};
use crate::undo::UndoStack;

/// Pins "now" (epoch millis) for reproducible runs.
pub const NOW_ENV: &str = "TASKLOG_NOW";

/// Flags shared by every command.
pub struct CommonOptions {
    pub log: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub events: Option<String>,
    pub json: bool,
    pub quiet: bool,
}

pub struct AddOptions {
    pub name: String,
    pub category: Option<String>,
    pub context: Option<String>,
    pub colour: i32,
    pub common: CommonOptions,
}

pub struct SubOptions {
    pub parent: String,
    pub name: String,
    pub category: String,
    pub common: CommonOptions,
}

pub struct ActivateOptions {
    pub id: String,
    pub category: String,
    pub common: CommonOptions,
}

#[derive(Debug, Clone, Copy)]
pub enum Transition {
    Start,
    Complete,
    Fail,
}

impl Transition {
    fn command(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Complete => "complete",
            Transition::Fail => "fail",
        }
    }
}

pub struct TransitionOptions {
    pub id: String,
    pub action: Transition,
    pub common: CommonOptions,
}

pub struct AbandonOptions {
    pub id: String,
    pub common: CommonOptions,
}

pub struct ReviveOptions {
    pub id: String,
    pub deferred: bool,
    pub common: CommonOptions,
}

pub struct EditOptions {
    pub id: String,
    pub name: String,
    pub common: CommonOptions,
}

pub struct ListOptions {
    pub context: Option<String>,
    pub common: CommonOptions,
}

pub struct HistoryOptions {
    pub failed: bool,
    pub common: CommonOptions,
}

pub struct ShowOptions {
    pub id: String,
    pub common: CommonOptions,
}

#[derive(Serialize)]
struct TaskOutput {
    changed: bool,
    task: Task,
    events: Vec<TaskEventRecord>,
}

#[derive(Serialize)]
struct ReviveOutput {
    original: Task,
    clone: Task,
    events: Vec<TaskEventRecord>,
}

#[derive(Serialize)]
struct AbandonOutput {
    task: Task,
    events: Vec<TaskEventRecord>,
}

#[derive(Serialize)]
struct UndoOutput {
    undone: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<TaskEventRecord>,
}

#[derive(Serialize)]
struct ListEntry {
    depth: usize,
    task: Task,
}

#[derive(Serialize)]
struct ListOutput {
    total: usize,
    tasks: Vec<ListEntry>,
}

#[derive(Serialize)]
struct HistoryGroup {
    period: String,
    time: Millis,
    tasks: Vec<Task>,
}

#[derive(Serialize)]
struct HistoryOutput {
    kind: &'static str,
    granularity: String,
    total: usize,
    groups: Vec<HistoryGroup>,
}

#[derive(Serialize)]
struct ShowOutput {
    task: Task,
    children: Vec<Task>,
}

#[derive(Serialize)]
struct ReplayOutput {
    log: PathBuf,
    events: usize,
    last_event_id: Option<TaskId>,
    tasks: usize,
    active: usize,
    completed: usize,
    failed: usize,
    undoable: usize,
}

// =============================================================================
// Mutating commands
// =============================================================================

pub fn run_add(options: AddOptions) -> Result<()> {
    let AddOptions {
        name,
        category,
        context,
        colour,
        common,
    } = options;

    let mutation = mutate(&common, |session, config, now| {
        let category = match category.as_deref() {
            Some(raw) => raw.parse()?,
            None => config.default_category()?,
        };
        let context = context.unwrap_or_else(|| config.tasks.default_context.clone());
        session.create_task(&name, category, &context, colour, now)
    })?;

    let task = mutation.task(&mutation.value)?;
    let mut human = HumanOutput::new("Task created");
    push_task_summary(&mut human, &task);
    human.push_next_step(format!("tasklog start {}", short_id(task.id())));
    mutation.finish(&common, "add", true, task, human)
}

pub fn run_sub(options: SubOptions) -> Result<()> {
    let SubOptions {
        parent,
        name,
        category,
        common,
    } = options;
    let category: Category = category.parse()?;

    let mutation = mutate(&common, |session, _, now| {
        let parent_id = resolve(session, &parent)?;
        session.create_subtask(&parent_id, &name, category, now)
    })?;

    let task = mutation.task(&mutation.value)?;
    let mut human = HumanOutput::new("Subtask created");
    push_task_summary(&mut human, &task);
    mutation.finish(&common, "sub", true, task, human)
}

pub fn run_activate(options: ActivateOptions) -> Result<()> {
    let ActivateOptions {
        id,
        category,
        common,
    } = options;
    let category: Category = category.parse()?;

    let mutation = mutate(&common, |session, _, now| {
        let id = resolve(session, &id)?;
        session.activate(&id, category, now)?;
        Ok(id)
    })?;

    let task = mutation.task(&mutation.value)?;
    let mut human = HumanOutput::new(format!("Task activated on the {category} board"));
    push_task_summary(&mut human, &task);
    mutation.finish(&common, "activate", true, task, human)
}

pub fn run_transition(options: TransitionOptions) -> Result<()> {
    let TransitionOptions { id, action, common } = options;

    let mutation = mutate(&common, |session, _, now| {
        let id = resolve(session, &id)?;
        let changed = match action {
            Transition::Start => session.start(&id, now)?,
            Transition::Complete => session.complete(&id, now)?,
            Transition::Fail => session.fail(&id, now)?,
        };
        Ok((id, changed))
    })?;

    let (id, changed) = &mutation.value;
    let task = mutation.task(id)?;
    let header = match (action, *changed) {
        (Transition::Start, true) => "Task started",
        (Transition::Start, false) => "Task already started",
        (Transition::Complete, true) => "Task completed",
        (Transition::Fail, true) => "Task failed",
        (_, false) => "Task already closed",
    };
    let mut human = HumanOutput::new(header);
    push_task_summary(&mut human, &task);
    if matches!(action, Transition::Complete | Transition::Fail) && *changed {
        if let Some(closed_at) = task.timestamps().time_closed {
            let batch = mutation.count_closed_at(closed_at);
            if batch > 1 {
                human.push_detail(format!("{} open subtask(s) closed with it", batch - 1));
            }
        }
    }
    if matches!(action, Transition::Fail) && *changed {
        human.push_warning("failures cannot be undone; undo history cleared");
        human.push_next_step(format!("tasklog revive {}", short_id(task.id())));
    }
    let changed = *changed;
    mutation.finish(&common, action.command(), changed, task, human)
}

pub fn run_abandon(options: AbandonOptions) -> Result<()> {
    let AbandonOptions { id, common } = options;

    let mutation = mutate(&common, |session, _, now| {
        let id = resolve(session, &id)?;
        session.abandon(&id, now)
    })?;

    let mut human = HumanOutput::new("Task abandoned");
    push_task_summary(&mut human, &mutation.value);
    human.push_next_step("tasklog undo");
    let output = AbandonOutput {
        task: mutation.value.clone(),
        events: mutation.emitted.clone(),
    };
    mutation.emit(&common, "abandon", &output, human)
}

pub fn run_revive(options: ReviveOptions) -> Result<()> {
    let ReviveOptions {
        id,
        deferred,
        common,
    } = options;

    let mutation = mutate(&common, |session, _, now| {
        let id = resolve(session, &id)?;
        let clone_id = session.revive(&id, !deferred, now)?;
        Ok((id, clone_id))
    })?;

    let (original_id, clone_id) = &mutation.value;
    let original = mutation.task(original_id)?;
    let clone = mutation.task(clone_id)?;
    let mut human = HumanOutput::new("Task revived");
    human.push_summary("Original", format!("{} ({})", original.id(), original.progress_status()));
    push_task_summary(&mut human, &clone);
    let output = ReviveOutput {
        original,
        clone,
        events: mutation.emitted.clone(),
    };
    mutation.emit(&common, "revive", &output, human)
}

pub fn run_edit(options: EditOptions) -> Result<()> {
    let EditOptions { id, name, common } = options;

    let mutation = mutate(&common, |session, _, now| {
        let id = resolve(session, &id)?;
        session.edit(&id, &name, now)?;
        Ok(id)
    })?;

    let task = mutation.task(&mutation.value)?;
    let mut human = HumanOutput::new("Task renamed");
    push_task_summary(&mut human, &task);
    mutation.finish(&common, "edit", true, task, human)
}

pub fn run_undo(common: CommonOptions) -> Result<()> {
    let mutation = mutate(&common, |session, _, now| session.undo(now))?;

    let output = UndoOutput {
        undone: mutation.value.is_some(),
        event: mutation.emitted.first().cloned(),
    };
    let human = match &mutation.value {
        Some(event) => {
            let mut human = HumanOutput::new(format!("Undid {}", event.event_type.forward()));
            human.push_summary("Task", event.task_id.clone());
            human.push_summary("Reverted", format_time(event.reverted_event_timestamp));
            if let Some(name) = &event.name {
                human.push_summary("Name", name.clone());
            }
            human
        }
        None => {
            let mut human = HumanOutput::new("Nothing to undo");
            human.push_detail("the undo history is empty or older than the undo window");
            human
        }
    };
    mutation.emit(&common, "undo", &output, human)
}

// =============================================================================
// Read-only commands
// =============================================================================

pub fn run_list(options: ListOptions) -> Result<()> {
    let ListOptions { context, common } = options;
    let (_, _, session) = load_session(&common)?;
    let collection = session.collection();

    let tasks: Vec<&Task> = match context.as_deref() {
        Some(context) => collection.tasks_in_context(context).collect(),
        None => collection.active_tasks().collect(),
    };
    let entries: Vec<ListEntry> = tasks
        .into_iter()
        .map(|task| ListEntry {
            depth: depth(collection, task),
            task: task.clone(),
        })
        .collect();

    let mut human = HumanOutput::new("Open tasks");
    human.push_summary("Total", entries.len().to_string());
    if let Some(context) = &context {
        human.push_summary("Context", context.clone());
    }
    for entry in &entries {
        human.push_detail(format!(
            "{}{}",
            "  ".repeat(entry.depth),
            describe(&entry.task)
        ));
    }
    if entries.is_empty() {
        human.push_next_step("tasklog add \"<name>\"");
    }

    let output = ListOutput {
        total: entries.len(),
        tasks: entries,
    };
    emit_success(output_options(&common), "list", &output, &human)
}

pub fn run_history(options: HistoryOptions) -> Result<()> {
    let HistoryOptions { failed, common } = options;
    let (_, _, session) = load_session(&common)?;
    let collection = session.collection();
    let (kind, index) = if failed {
        ("failed", collection.failed())
    } else {
        ("completed", collection.completed())
    };

    let groups: Vec<HistoryGroup> = index
        .grouped()
        .iter()
        .map(|group| HistoryGroup {
            period: format_date(group.time()),
            time: group.time(),
            tasks: group
                .ids()
                .filter_map(|id| collection.get(id).cloned())
                .collect(),
        })
        .collect();

    let mut human = HumanOutput::new(format!("{} tasks", capitalize(kind)));
    human.push_summary("Total", index.len().to_string());
    human.push_summary("Grouped by", index.granularity().to_string());
    for group in &groups {
        human.push_detail(format!("{} ({})", group.period, group.tasks.len()));
        for task in &group.tasks {
            human.push_detail(format!("  {}", describe(task)));
        }
    }

    let output = HistoryOutput {
        kind,
        granularity: index.granularity().to_string(),
        total: index.len(),
        groups,
    };
    emit_success(output_options(&common), "history", &output, &human)
}

pub fn run_show(options: ShowOptions) -> Result<()> {
    let ShowOptions { id, common } = options;
    let (_, _, session) = load_session(&common)?;
    let collection = session.collection();
    let id = resolve(&session, &id)?;
    let task = collection
        .get(&id)
        .cloned()
        .ok_or_else(|| Error::TaskNotFound(id.clone()))?;
    let children: Vec<Task> = collection
        .children_of(&id)?
        .into_iter()
        .cloned()
        .collect();

    let mut human = HumanOutput::new(describe(&task));
    push_task_summary(&mut human, &task);
    let stamps = task.timestamps();
    human.push_summary("Created", format_time(stamps.time_created));
    for (label, value) in [
        ("Activated", stamps.time_activated),
        ("Started", stamps.time_started),
        ("Closed", stamps.time_closed),
        ("Revived", stamps.time_revived),
        ("Edited", stamps.time_edited),
    ] {
        if let Some(value) = value {
            human.push_summary(label, format_time(value));
        }
    }
    for child in &children {
        human.push_detail(describe(child));
    }

    let output = ShowOutput { task, children };
    emit_success(output_options(&common), "show", &output, &human)
}

pub fn run_replay(common: CommonOptions) -> Result<()> {
    let (ctx, events, session) = load_session(&common)?;
    let collection = session.collection();
    let last_event_id = events.last().map(|e| e.id.clone());

    let output = ReplayOutput {
        log: ctx.log.path().to_path_buf(),
        events: events.len(),
        last_event_id: last_event_id.clone(),
        tasks: collection.len(),
        active: collection.active_ids().len(),
        completed: collection.completed().len(),
        failed: collection.failed().len(),
        undoable: session.undo_stack().size(),
    };

    let mut human = HumanOutput::new("Log replayed");
    human.push_summary("Log", ctx.log.path().display().to_string());
    human.push_summary("Events", output.events.to_string());
    if let Some(last) = last_event_id {
        human.push_summary("Last event", last);
    }
    human.push_summary("Open", output.active.to_string());
    human.push_summary("Completed", output.completed.to_string());
    human.push_summary("Failed", output.failed.to_string());
    human.push_summary("Undoable", output.undoable.to_string());
    emit_success(output_options(&common), "replay", &output, &human)
}

// =============================================================================
// Plumbing
// =============================================================================

struct TaskContext {
    config: Config,
    log: EventLog,
}

fn load_context(common: &CommonOptions) -> Result<TaskContext> {
    let config_path = match &common.config {
        Some(path) => path.clone(),
        None => config::default_config_path(&config::data_dir()?),
    };
    let config = Config::load_or_default(&config_path)?;
    let log_path = match &common.log {
        Some(path) => path.clone(),
        None => config.log_path(&config::data_dir()?),
    };
    Ok(TaskContext {
        config,
        log: EventLog::new(log_path),
    })
}

fn new_session(config: &Config, events: &[TaskEventRecord]) -> Result<Session> {
    let collection = TaskCollection::new(config.collection_options()?, Box::new(UuidIds));
    let undo = UndoStack::new(config.undo_max_age_ms()?);
    let (session, _) = Session::from_events(events, collection, undo)?;
    Ok(session)
}

fn load_session(common: &CommonOptions) -> Result<(TaskContext, Vec<TaskEventRecord>, Session)> {
    let ctx = load_context(common)?;
    let events = ctx.log.load()?;
    let session = new_session(&ctx.config, &events)?;
    Ok((ctx, events, session))
}

/// Outcome of one mutating command.
struct Mutation<T> {
    session: Session,
    value: T,
    emitted: Vec<TaskEventRecord>,
    warnings: Vec<String>,
}

impl<T> Mutation<T> {
    fn task(&self, id: &str) -> Result<Task> {
        self.session
            .collection()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    fn count_closed_at(&self, closed_at: Millis) -> usize {
        self.session
            .collection()
            .ids()
            .filter_map(|id| self.session.collection().get(id))
            .filter(|t| t.timestamps().time_closed == Some(closed_at))
            .count()
    }

    fn emit<O: Serialize>(
        &self,
        common: &CommonOptions,
        command: &str,
        output: &O,
        mut human: HumanOutput,
    ) -> Result<()> {
        for warning in &self.warnings {
            human.push_warning(warning.clone());
        }
        emit_success(output_options(common), command, output, &human)
    }

    fn finish(
        &self,
        common: &CommonOptions,
        command: &str,
        changed: bool,
        task: Task,
        human: HumanOutput,
    ) -> Result<()> {
        let output = TaskOutput {
            changed,
            task,
            events: self.emitted.clone(),
        };
        self.emit(common, command, &output, human)
    }
}

/// Lock, replay, apply `op` at the current time and append what it emitted.
fn mutate<T, F>(common: &CommonOptions, op: F) -> Result<Mutation<T>>
where
    F: FnOnce(&mut Session, &Config, Millis) -> Result<T>,
{
    let ctx = load_context(common)?;
    let lock = ctx.log.lock()?;
    let events = ctx.log.load()?;
    let mut session = new_session(&ctx.config, &events)?;
    let now = now_millis()?;

    let value = op(&mut session, &ctx.config, now)?;
    let emitted = session.take_outbox();
    ctx.log.append_locked(&lock, &emitted)?;
    drop(lock);

    let mut warnings = Vec::new();
    if let Some(warning) = mirror_events(common.events.as_deref(), &emitted) {
        warnings.push(warning);
    }
    Ok(Mutation {
        session,
        value,
        emitted,
        warnings,
    })
}

/// Copies emitted events to the `--events` destination. Failures become a
/// warning; the log append has already succeeded.
fn mirror_events(events: Option<&str>, emitted: &[TaskEventRecord]) -> Option<String> {
    let destination = EventDestination::parse(events)?;
    let result = destination
        .open()
        .and_then(|mut sink: EventSink| sink.emit_all(emitted));
    result.err().map(|err| format!("event output failed: {err}"))
}

fn events_to_stdout(common: &CommonOptions) -> bool {
    matches!(
        EventDestination::parse(common.events.as_deref()),
        Some(EventDestination::Stdout)
    )
}

fn output_options(common: &CommonOptions) -> OutputOptions {
    let to_stdout = events_to_stdout(common);
    OutputOptions {
        json: common.json && !to_stdout,
        quiet: common.quiet || to_stdout,
    }
}

fn now_millis() -> Result<Millis> {
    match std::env::var(NOW_ENV) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| Error::InvalidArgument(format!("{NOW_ENV} must be epoch millis: {raw}"))),
        _ => Ok(Utc::now().timestamp_millis()),
    }
}

fn resolve(session: &Session, input: &str) -> Result<TaskId> {
    resolve_task_id(input, session.collection().ids())
}

fn depth(collection: &TaskCollection, task: &Task) -> usize {
    let mut depth = 0;
    let mut current = task.parent();
    while let Some(parent_id) = current {
        depth += 1;
        if depth > collection.len() {
            break;
        }
        current = collection.get(parent_id).and_then(Task::parent);
    }
    depth
}

fn push_task_summary(human: &mut HumanOutput, task: &Task) {
    human.push_summary("ID", task.id().to_string());
    human.push_summary("Name", task.name().to_string());
    human.push_summary("Category", task.category().to_string());
    human.push_summary("Status", task.progress_status().to_string());
    human.push_summary("Context", task.context().to_string());
    if let Some(parent) = task.parent() {
        human.push_summary("Parent", parent.to_string());
    }
}

fn describe(task: &Task) -> String {
    format!(
        "[{}][{}] {} {}",
        task.category(),
        task.progress_status(),
        short_id(task.id()),
        task.name()
    )
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

fn format_time(millis: Millis) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| millis.to_string())
}

fn format_date(millis: Millis) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
