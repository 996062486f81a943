//! Task id generation and lookup.

use crate::error::{Error, Result};
use crate::task::TaskId;

/// Source of fresh task ids, injected into the collection.
pub trait IdGenerator: Send {
    fn next_id(&mut self) -> TaskId;

    /// Called for every id the collection accepts from outside (replayed
    /// events, explicit ids) so sequential schemes can skip past it.
    fn observe(&mut self, _id: &str) {}
}

/// Random v4 UUIDs. Collisions are not a practical concern.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIds;

impl IdGenerator for UuidIds {
    fn next_id(&mut self) -> TaskId {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Monotonic ids of the form `{prefix}{n}`.
#[derive(Debug, Clone)]
pub struct SequentialIds {
    prefix: String,
    next: u64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }

    /// Advances past `last_id` if it carries this generator's prefix.
    pub fn resume_after(&mut self, last_id: &str) {
        let Some(rest) = last_id.strip_prefix(self.prefix.as_str()) else {
            return;
        };
        if let Ok(n) = rest.parse::<u64>() {
            self.next = self.next.max(n.saturating_add(1));
        }
    }

    pub fn peek(&self) -> u64 {
        self.next
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new("t")
    }
}

impl IdGenerator for SequentialIds {
    fn next_id(&mut self) -> TaskId {
        let id = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        id
    }

    fn observe(&mut self, id: &str) {
        self.resume_after(id);
    }
}

/// Resolves a full id or a unique case-insensitive prefix against `candidates`.
pub fn resolve_task_id<'a, I>(input: &str, candidates: I) -> Result<TaskId>
where
    I: IntoIterator<Item = &'a str>,
{
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidArgument("task id cannot be empty".to_string()));
    }
    let needle = trimmed.to_lowercase();

    let mut matches: Vec<&str> = Vec::new();
    for id in candidates {
        let id_norm = id.to_lowercase();
        if id_norm == needle {
            return Ok(id.to_string());
        }
        if id_norm.starts_with(&needle) {
            matches.push(id);
        }
    }

    matches.sort_unstable();
    matches.dedup();
    match matches.as_slice() {
        [] => Err(Error::InvalidArgument(format!("task not found: {trimmed}"))),
        [only] => Ok(only.to_string()),
        many => Err(Error::InvalidArgument(format!(
            "ambiguous task id '{}': {}",
            trimmed,
            many.join(", ")
        ))),
    }
}
