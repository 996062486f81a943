//! Command-line interface for tasklog
//!
//! This module defines the CLI structure using clap derive macros.
//! Command implementations live in [`task`].

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::error::Result;

mod task;

/// tasklog - event-sourced personal task tracker
///
/// Every change is appended to an event log; state is rebuilt by replaying
/// it. Recent actions can be undone for a limited time.
#[derive(Parser, Debug)]
#[command(name = "tasklog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Event log to read and append to
    #[arg(long, global = true, env = "TASKLOG_LOG")]
    pub log: Option<PathBuf>,

    /// Configuration file
    #[arg(long, global = true, env = "TASKLOG_CONFIG")]
    pub config: Option<PathBuf>,

    /// Mirror emitted events as JSONL to a file, or `-` for stdout
    #[arg(long, global = true, env = "TASKLOG_EVENTS")]
    pub events: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an independent task
    Add {
        /// Task name
        name: String,

        /// Board: goal, weekly, daily or deferred
        #[arg(long)]
        category: Option<String>,

        /// Visibility scope
        #[arg(long)]
        context: Option<String>,

        /// Colour tag
        #[arg(long, default_value_t = 0)]
        colour: i32,
    },

    /// Create a subtask under an open task
    Sub {
        /// Parent task id or unique prefix
        parent: String,

        /// Task name
        name: String,

        /// Board for the subtask: weekly or daily
        #[arg(long, default_value = "daily")]
        category: String,
    },

    /// Move a backlog task onto an active board
    Activate {
        id: String,

        /// Target board: goal, weekly or daily
        #[arg(long, default_value = "daily")]
        category: String,
    },

    /// Start working on a task
    Start { id: String },

    /// Complete a task and its open subtasks
    Complete { id: String },

    /// Fail a task and its open subtasks (clears undo history)
    Fail { id: String },

    /// Remove an open task without children
    Abandon { id: String },

    /// Retry a failed task as a fresh copy
    Revive {
        id: String,

        /// Put the copy in the backlog instead of its original board
        #[arg(long)]
        deferred: bool,
    },

    /// Rename a task
    Edit {
        id: String,

        /// New name
        name: String,
    },

    /// Undo the most recent action
    Undo,

    /// List open tasks
    List {
        /// Only tasks in this context (case-insensitive)
        #[arg(long)]
        context: Option<String>,
    },

    /// Show closed tasks grouped by period
    History {
        /// Show failed tasks instead of completed ones
        #[arg(long)]
        failed: bool,
    },

    /// Show a task
    Show { id: String },

    /// Rebuild state from the log and report it
    Replay,
}

impl Cli {
    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let common = task::CommonOptions {
            log: self.log,
            config: self.config,
            events: self.events,
            json: self.json,
            quiet: self.quiet,
        };

        match self.command {
            Commands::Add {
                name,
                category,
                context,
                colour,
            } => task::run_add(task::AddOptions {
                name,
                category,
                context,
                colour,
                common,
            }),
            Commands::Sub {
                parent,
                name,
                category,
            } => task::run_sub(task::SubOptions {
                parent,
                name,
                category,
                common,
            }),
            Commands::Activate { id, category } => {
                task::run_activate(task::ActivateOptions {
                    id,
                    category,
                    common,
                })
            }
            Commands::Start { id } => task::run_transition(task::TransitionOptions {
                id,
                action: task::Transition::Start,
                common,
            }),
            Commands::Complete { id } => task::run_transition(task::TransitionOptions {
                id,
                action: task::Transition::Complete,
                common,
            }),
            Commands::Fail { id } => task::run_transition(task::TransitionOptions {
                id,
                action: task::Transition::Fail,
                common,
            }),
            Commands::Abandon { id } => task::run_abandon(task::AbandonOptions { id, common }),
            Commands::Revive { id, deferred } => task::run_revive(task::ReviveOptions {
                id,
                deferred,
                common,
            }),
            Commands::Edit { id, name } => task::run_edit(task::EditOptions { id, name, common }),
            Commands::Undo => task::run_undo(common),
            Commands::List { context } => task::run_list(task::ListOptions { context, common }),
            Commands::History { failed } => {
                task::run_history(task::HistoryOptions { failed, common })
            }
            Commands::Show { id } => task::run_show(task::ShowOptions { id, common }),
            Commands::Replay => task::run_replay(common),
        }
    }
}
