//! tasklog - event-sourced personal task tracker
//!
//! Tasks live on boards (goal, weekly, daily) or in the deferred backlog,
//! form parent/child trees, and move through a small lifecycle. Every change
//! is an event; the state is whatever replaying the event log produces.
//!
//! # Core Concepts
//!
//! - **Collection**: arena of tasks with the ordered list of open tasks
//! - **Grouped index**: closed tasks bucketed by day, week, month or year
//! - **Replay**: rebuilds a collection from a log, healing missing events
//! - **Undo**: time-limited stack of inverse actions
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `collection`: Task collection and its mutations
//! - `config`: Configuration loading from `config.toml`
//! - `error`: Error types and result aliases
//! - `event`: Event types, wire records and JSONL sinks
//! - `grouped`: Time-bucketed index of closed tasks
//! - `ids`: Task id generation and prefix resolution
//! - `replay`: Event replay with gap healing
//! - `session`: Live operations that record events and undo entries
//! - `storage`: Locked, append-only event log on disk
//! - `task`: Task, category and status types
//! - `undo`: Undo stack

pub mod cli;
pub mod collection;
pub mod config;
pub mod error;
pub mod event;
pub mod grouped;
pub mod ids;
pub mod output;
pub mod replay;
pub mod session;
pub mod storage;
pub mod task;
pub mod undo;

pub use collection::{CollectionOptions, TaskCollection};
pub use error::{Error, Result};
pub use event::{EventType, TaskEventRecord};
pub use grouped::{Granularity, GroupedTaskIndex};
pub use session::Session;
pub use task::{Category, ProgressStatus, Task, TaskId};
pub use undo::UndoStack;
