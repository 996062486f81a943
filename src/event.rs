//! Event records, the unit of persistence.
//!
//! Records are written as JSON lines. Every field except `eventType` and `id`
//! is optional on the wire since each event type uses a different subset.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::{Category, Millis, ProgressStatus, Task, TaskId};

/// Every recognised event type. Each forward type has an `…Undo` twin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    TaskCreated,
    TaskCreatedUndo,
    SubtaskCreated,
    SubtaskCreatedUndo,
    TaskRevived,
    TaskRevivedUndo,
    TaskDeleted,
    TaskDeletedUndo,
    TaskCompleted,
    TaskCompletedUndo,
    TaskFailed,
    TaskFailedUndo,
    TaskActivated,
    TaskActivatedUndo,
    TaskStarted,
    TaskStartedUndo,
    TaskEdited,
    TaskEditedUndo,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TaskCreated => "taskCreated",
            EventType::TaskCreatedUndo => "taskCreatedUndo",
            EventType::SubtaskCreated => "subtaskCreated",
            EventType::SubtaskCreatedUndo => "subtaskCreatedUndo",
            EventType::TaskRevived => "taskRevived",
            EventType::TaskRevivedUndo => "taskRevivedUndo",
            EventType::TaskDeleted => "taskDeleted",
            EventType::TaskDeletedUndo => "taskDeletedUndo",
            EventType::TaskCompleted => "taskCompleted",
            EventType::TaskCompletedUndo => "taskCompletedUndo",
            EventType::TaskFailed => "taskFailed",
            EventType::TaskFailedUndo => "taskFailedUndo",
            EventType::TaskActivated => "taskActivated",
            EventType::TaskActivatedUndo => "taskActivatedUndo",
            EventType::TaskStarted => "taskStarted",
            EventType::TaskStartedUndo => "taskStartedUndo",
            EventType::TaskEdited => "taskEdited",
            EventType::TaskEditedUndo => "taskEditedUndo",
        }
    }

    pub fn is_undo(self) -> bool {
        self.forward() != self
    }

    /// The forward type this event reverts, or itself for forward types.
    pub fn forward(self) -> EventType {
        match self {
            EventType::TaskCreatedUndo => EventType::TaskCreated,
            EventType::SubtaskCreatedUndo => EventType::SubtaskCreated,
            EventType::TaskRevivedUndo => EventType::TaskRevived,
            EventType::TaskDeletedUndo => EventType::TaskDeleted,
            EventType::TaskCompletedUndo => EventType::TaskCompleted,
            EventType::TaskFailedUndo => EventType::TaskFailed,
            EventType::TaskActivatedUndo => EventType::TaskActivated,
            EventType::TaskStartedUndo => EventType::TaskStarted,
            EventType::TaskEditedUndo => EventType::TaskEdited,
            forward => forward,
        }
    }

    /// The `…Undo` twin of a forward type.
    pub fn undo(self) -> EventType {
        match self.forward() {
            EventType::TaskCreated => EventType::TaskCreatedUndo,
            EventType::SubtaskCreated => EventType::SubtaskCreatedUndo,
            EventType::TaskRevived => EventType::TaskRevivedUndo,
            EventType::TaskDeleted => EventType::TaskDeletedUndo,
            EventType::TaskCompleted => EventType::TaskCompletedUndo,
            EventType::TaskFailed => EventType::TaskFailedUndo,
            EventType::TaskActivated => EventType::TaskActivatedUndo,
            EventType::TaskStarted => EventType::TaskStartedUndo,
            _ => EventType::TaskEditedUndo,
        }
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            "taskCreated" | "taskAdded" => EventType::TaskCreated,
            "taskCreatedUndo" | "taskAddedUndo" => EventType::TaskCreatedUndo,
            "subtaskCreated" | "childTaskAdded" => EventType::SubtaskCreated,
            "subtaskCreatedUndo" | "childTaskAddedUndo" => EventType::SubtaskCreatedUndo,
            "taskRevived" => EventType::TaskRevived,
            "taskRevivedUndo" => EventType::TaskRevivedUndo,
            "taskDeleted" => EventType::TaskDeleted,
            "taskDeletedUndo" => EventType::TaskDeletedUndo,
            "taskCompleted" => EventType::TaskCompleted,
            "taskCompletedUndo" => EventType::TaskCompletedUndo,
            "taskFailed" => EventType::TaskFailed,
            "taskFailedUndo" => EventType::TaskFailedUndo,
            "taskActivated" => EventType::TaskActivated,
            "taskActivatedUndo" => EventType::TaskActivatedUndo,
            "taskStarted" => EventType::TaskStarted,
            "taskStartedUndo" => EventType::TaskStartedUndo,
            "taskEdited" => EventType::TaskEdited,
            "taskEditedUndo" => EventType::TaskEditedUndo,
            other => return Err(Error::UnknownEventType(other.to_string())),
        };
        Ok(kind)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One serialized event.
///
/// `eventType` is kept as the raw wire string so an unrecognised name
/// surfaces as [`Error::UnknownEventType`] during replay rather than as a
/// parse failure of the whole log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEventRecord {
    pub event_type: String,
    pub timestamp: Option<Millis>,
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_status: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colour_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TaskId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reverted_event_timestamp: Option<Millis>,
}

impl TaskEventRecord {
    pub fn new(event_type: EventType, timestamp: Millis, id: impl Into<TaskId>) -> Self {
        Self {
            event_type: event_type.as_str().to_string(),
            timestamp: Some(timestamp),
            id: id.into(),
            name: None,
            category: None,
            progress_status: None,
            colour_id: None,
            context: None,
            parent: None,
            original: None,
            children: None,
            reverted_event_timestamp: None,
        }
    }

    /// Copies the task's descriptive fields into the record.
    pub fn with_task(mut self, task: &Task) -> Self {
        self.name = Some(task.name().to_string());
        self.category = Some(i64::from(u8::from(task.category())));
        self.progress_status = Some(i64::from(u8::from(task.progress_status())));
        self.colour_id = Some(task.colour_id());
        self.context = Some(task.context().to_string());
        self.parent = task.parent().map(str::to_string);
        if !task.children().is_empty() {
            self.children = Some(task.children().to_vec());
        }
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(i64::from(u8::from(category)));
        self
    }

    pub fn with_original(mut self, original: impl Into<TaskId>) -> Self {
        self.original = Some(original.into());
        self
    }

    pub fn with_reverted(mut self, timestamp: Millis) -> Self {
        self.reverted_event_timestamp = Some(timestamp);
        self
    }

    pub fn kind(&self) -> Result<EventType> {
        self.event_type.parse()
    }

    fn malformed(&self, field: &'static str) -> Error {
        Error::MalformedEvent {
            event_type: self.event_type.clone(),
            task_id: self.id.clone(),
            field,
        }
    }

    pub fn require_timestamp(&self) -> Result<Millis> {
        self.timestamp.ok_or_else(|| self.malformed("timestamp"))
    }

    pub fn require_name(&self) -> Result<&str> {
        self.name.as_deref().ok_or_else(|| self.malformed("name"))
    }

    pub fn require_parent(&self) -> Result<&str> {
        self.parent.as_deref().ok_or_else(|| self.malformed("parent"))
    }

    pub fn require_original(&self) -> Result<&str> {
        self.original.as_deref().ok_or_else(|| self.malformed("original"))
    }

    /// The category field, if present. Out-of-range ordinals are malformed.
    pub fn category(&self) -> Result<Option<Category>> {
        self.category
            .map(|raw| {
                u8::try_from(raw)
                    .ok()
                    .and_then(|v| Category::try_from(v).ok())
                    .ok_or_else(|| self.malformed("category"))
            })
            .transpose()
    }

    pub fn require_category(&self) -> Result<Category> {
        self.category()?.ok_or_else(|| self.malformed("category"))
    }

    pub fn progress_status(&self) -> Result<Option<ProgressStatus>> {
        self.progress_status
            .map(|raw| {
                u8::try_from(raw)
                    .ok()
                    .and_then(|v| ProgressStatus::try_from(v).ok())
                    .ok_or_else(|| self.malformed("progressStatus"))
            })
            .transpose()
    }
}

/// Where emitted events are mirrored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    /// `-` means stdout, anything else is a file path.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.and_then(|value| {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return None;
            }
            if trimmed == "-" {
                return Some(EventDestination::Stdout);
            }
            Some(EventDestination::File(PathBuf::from(trimmed)))
        })
    }

    pub fn open(&self) -> Result<EventSink> {
        match self {
            EventDestination::Stdout => Ok(EventSink::stdout()),
            EventDestination::File(path) => EventSink::file(path),
        }
    }
}

/// Writes event records as JSON lines.
pub struct EventSink {
    writer: Box<dyn Write + Send>,
}

impl EventSink {
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    /// Appends to `path`, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            writer: Box::new(file),
        })
    }

    pub fn emit(&mut self, record: &TaskEventRecord) -> Result<()> {
        let serialized = serde_json::to_vec(record)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().map_err(Error::Io)?;
        Ok(())
    }

    pub fn emit_all<'a, I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a TaskEventRecord>,
    {
        for record in records {
            self.emit(record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_names_parse_as_aliases() {
        assert_eq!("taskAdded".parse::<EventType>().expect("alias"), EventType::TaskCreated);
        assert_eq!(
            "childTaskAddedUndo".parse::<EventType>().expect("alias"),
            EventType::SubtaskCreatedUndo
        );
        let err = "taskExploded".parse::<EventType>().expect_err("unknown");
        assert!(matches!(err, Error::UnknownEventType(name) if name == "taskExploded"));
    }

    #[test]
    fn undo_twins_pair_up() {
        assert!(EventType::TaskEditedUndo.is_undo());
        assert!(!EventType::TaskEdited.is_undo());
        assert_eq!(EventType::TaskDeletedUndo.forward(), EventType::TaskDeleted);
        assert_eq!(EventType::TaskStarted.undo(), EventType::TaskStartedUndo);
        assert_eq!(EventType::TaskEdited.undo(), EventType::TaskEditedUndo);
    }

    #[test]
    fn record_wire_shape() {
        let record = TaskEventRecord::new(EventType::TaskCreated, 1_000, "t1")
            .with_name("Write")
            .with_category(Category::Weekly);
        let json = serde_json::to_value(&record).expect("serialize");
        assert_eq!(json["eventType"], "taskCreated");
        assert_eq!(json["category"], 1);
        assert!(json.get("parent").is_none());

        let parsed: TaskEventRecord = serde_json::from_str(
            r#"{"eventType":"taskStarted","timestamp":null,"id":"t1","category":9}"#,
        )
        .expect("parse");
        assert_eq!(parsed.timestamp, None);
        assert!(matches!(
            parsed.category(),
            Err(Error::MalformedEvent { field: "category", .. })
        ));
        assert!(parsed.require_timestamp().is_err());
    }

    #[test]
    fn destination_parse() {
        assert_eq!(EventDestination::parse(Some("-")), Some(EventDestination::Stdout));
        assert_eq!(EventDestination::parse(Some("  ")), None);
        assert_eq!(
            EventDestination::parse(Some("out.jsonl")),
            Some(EventDestination::File(PathBuf::from("out.jsonl")))
        );
    }

    #[test]
    fn sink_writes_jsonl() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("events.jsonl");
        let mut sink = EventSink::file(&path)?;
        sink.emit(&TaskEventRecord::new(EventType::TaskStarted, 5, "a"))?;
        sink.emit(&TaskEventRecord::new(EventType::TaskCompleted, 6, "a"))?;
        let contents = std::fs::read_to_string(&path)?;
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.ends_with('\n'));
        Ok(())
    }
}
