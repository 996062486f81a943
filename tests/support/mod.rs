#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

use tasklog::collection::{CollectionOptions, TaskCollection};
use tasklog::ids::SequentialIds;

/// Scratch data directory for CLI runs.
pub struct TestHome {
    dir: TempDir,
}

impl TestHome {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn log_path(&self) -> PathBuf {
        self.dir.path().join("events.jsonl")
    }

    pub fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.dir.path().join("config.toml");
        fs::write(&path, contents.trim()).expect("write config");
        path
    }

    pub fn write_log(&self, contents: &str) {
        fs::write(self.log_path(), contents).expect("write log");
    }

    /// `tasklog` pinned to this home and to `now`.
    pub fn cmd(&self, now: i64) -> Command {
        let mut cmd = Command::cargo_bin("tasklog").expect("binary");
        cmd.env("TASKLOG_HOME", self.dir.path())
            .env("TASKLOG_NOW", now.to_string())
            .env_remove("TASKLOG_LOG")
            .env_remove("TASKLOG_CONFIG")
            .env_remove("TASKLOG_EVENTS")
            .env_remove("RUST_LOG");
        cmd
    }

    /// Runs `args --json` successfully and returns the envelope.
    pub fn json(&self, now: i64, args: &[&str]) -> Value {
        let output = self
            .cmd(now)
            .args(args)
            .arg("--json")
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).expect("json envelope")
    }

    pub fn read_events(&self) -> Vec<Value> {
        let contents = fs::read_to_string(self.log_path()).expect("read log");
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).expect("event json"))
            .collect()
    }
}

/// Collection with predictable `t1`, `t2`, ... ids.
pub fn collection() -> TaskCollection {
    TaskCollection::new(CollectionOptions::default(), Box::new(SequentialIds::new("t")))
}

pub fn collection_with(options: CollectionOptions) -> TaskCollection {
    TaskCollection::new(options, Box::new(SequentialIds::new("t")))
}
