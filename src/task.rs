//! Task entity and lifecycle enums.
//!
//! A task lives inside a [`TaskCollection`](crate::collection::TaskCollection)
//! arena. Parent and child links are stored as ids and only the collection
//! writes them, which keeps the parent/children relation bidirectional.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Stable task identifier. Never reused once issued.
pub type TaskId = String;

/// Epoch milliseconds.
pub type Millis = i64;

pub const MAX_NAME_CHARS: usize = 240;
pub const MAX_CONTEXT_CHARS: usize = 68;

/// Board a task sits on. Lower ordinal is higher in the hierarchy.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Category {
    Goal,
    Weekly,
    Daily,
    Deferred,
}

impl Category {
    /// Goal, Weekly and Daily tasks are on an active board.
    pub fn is_active_board(self) -> bool {
        self <= Category::Daily
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Goal => "goal",
            Category::Weekly => "weekly",
            Category::Daily => "daily",
            Category::Deferred => "deferred",
        }
    }
}

impl TryFrom<u8> for Category {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Category::Goal),
            1 => Ok(Category::Weekly),
            2 => Ok(Category::Daily),
            3 => Ok(Category::Deferred),
            other => Err(format!("invalid category ordinal {other}")),
        }
    }
}

impl From<Category> for u8 {
    fn from(value: Category) -> Self {
        value as u8
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "goal" | "0" => Ok(Category::Goal),
            "weekly" | "1" => Ok(Category::Weekly),
            "daily" | "2" => Ok(Category::Daily),
            "deferred" | "backlog" | "3" => Ok(Category::Deferred),
            other => Err(Error::InvalidArgument(format!(
                "unknown category '{other}' (expected goal|weekly|daily|deferred)"
            ))),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress through the task lifecycle. Ordinal order matters.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProgressStatus {
    NotStarted,
    Started,
    Completed,
    /// Representable for wire compatibility; no operation produces it.
    Aborted,
    Failed,
    Reattempted,
}

impl ProgressStatus {
    /// NotStarted and Started tasks are still open.
    pub fn is_open(self) -> bool {
        self <= ProgressStatus::Started
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStatus::NotStarted => "not_started",
            ProgressStatus::Started => "started",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Aborted => "aborted",
            ProgressStatus::Failed => "failed",
            ProgressStatus::Reattempted => "reattempted",
        }
    }
}

impl TryFrom<u8> for ProgressStatus {
    type Error = String;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(ProgressStatus::NotStarted),
            1 => Ok(ProgressStatus::Started),
            2 => Ok(ProgressStatus::Completed),
            3 => Ok(ProgressStatus::Aborted),
            4 => Ok(ProgressStatus::Failed),
            5 => Ok(ProgressStatus::Reattempted),
            other => Err(format!("invalid progress status ordinal {other}")),
        }
    }
}

impl From<ProgressStatus> for u8 {
    fn from(value: ProgressStatus) -> Self {
        value as u8
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle timestamps. Only `time_created` is mandatory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTimestamps {
    pub time_created: Millis,
    pub time_activated: Option<Millis>,
    pub time_started: Option<Millis>,
    pub time_closed: Option<Millis>,
    pub time_revived: Option<Millis>,
    pub time_edited: Option<Millis>,
}

impl EventTimestamps {
    fn created_at(timestamp: Millis, category: Category) -> Self {
        Self {
            time_created: timestamp,
            time_activated: category.is_active_board().then_some(timestamp),
            time_started: None,
            time_closed: None,
            time_revived: None,
            time_edited: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) name: String,
    pub(crate) category: Category,
    pub(crate) progress_status: ProgressStatus,
    pub(crate) context: String,
    pub(crate) colour_id: i32,
    pub(crate) parent: Option<TaskId>,
    pub(crate) children: Vec<TaskId>,
    pub(crate) event_timestamps: EventTimestamps,
}

impl Task {
    /// Builds a validated, unattached task. Only the collection calls this.
    pub(crate) fn new(
        id: TaskId,
        name: &str,
        category: Category,
        timestamp: Millis,
        context: &str,
        colour_id: i32,
    ) -> Result<Self> {
        let name = normalize_name(name)?;
        validate_context(context)?;
        Ok(Self {
            id,
            name,
            category,
            progress_status: ProgressStatus::NotStarted,
            context: context.to_string(),
            colour_id,
            parent: None,
            children: Vec::new(),
            event_timestamps: EventTimestamps::created_at(timestamp, category),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn progress_status(&self) -> ProgressStatus {
        self.progress_status
    }

    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn colour_id(&self) -> i32 {
        self.colour_id
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn children(&self) -> &[TaskId] {
        &self.children
    }

    pub fn timestamps(&self) -> &EventTimestamps {
        &self.event_timestamps
    }

    pub fn is_open(&self) -> bool {
        self.progress_status.is_open()
    }

    /// Contexts compare case-insensitively.
    pub fn in_context(&self, context: &str) -> bool {
        self.context.to_lowercase() == context.trim().to_lowercase()
    }
}

/// Trims and length-checks a task name.
pub fn normalize_name(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidName("name cannot be empty".to_string()));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_NAME_CHARS {
        return Err(Error::InvalidName(format!(
            "name is {chars} characters (max {MAX_NAME_CHARS})"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_context(context: &str) -> Result<()> {
    if context.trim().is_empty() {
        return Err(Error::InvalidContext("context cannot be empty".to_string()));
    }
    let chars = context.chars().count();
    if chars > MAX_CONTEXT_CHARS {
        return Err(Error::InvalidContext(format!(
            "context is {chars} characters (max {MAX_CONTEXT_CHARS})"
        )));
    }
    Ok(())
}
