//! Closed tasks partitioned into calendar buckets.
//!
//! Buckets are ordered most recent first and so are the tasks inside each
//! bucket. Both levels are located with binary search.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::task::{Millis, Task, TaskId};

/// Calendar truncation applied to the time key. Boundaries are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    /// Weeks start on Monday.
    Week,
    #[default]
    Month,
    Year,
}

impl Granularity {
    /// Start of the bucket containing `millis`.
    pub fn bucket_start(self, millis: Millis) -> Result<Millis> {
        let out_of_range =
            || Error::InvalidArgument(format!("timestamp {millis} is out of range"));
        let date = DateTime::from_timestamp_millis(millis)
            .ok_or_else(out_of_range)?
            .date_naive();
        let start = match self {
            Granularity::Day => Some(date),
            Granularity::Week => {
                let back = i64::from(date.weekday().num_days_from_monday());
                date.checked_sub_signed(Duration::days(back))
            }
            Granularity::Month => date.with_day(1),
            Granularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
        };
        let midnight = start
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .ok_or_else(out_of_range)?;
        Ok(midnight.and_utc().timestamp_millis())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Granularity::Day),
            "week" => Ok(Granularity::Week),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            other => Err(Error::InvalidArgument(format!(
                "unknown granularity '{other}' (expected day|week|month|year)"
            ))),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extracts the sort key from a task.
pub type TimeKey = fn(&Task) -> Option<Millis>;

pub fn time_closed(task: &Task) -> Option<Millis> {
    task.timestamps().time_closed
}

/// One bucket: its start time and `(key, id)` pairs, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeGroup {
    time: Millis,
    entries: Vec<(Millis, TaskId)>,
}

impl TimeGroup {
    pub fn time(&self) -> Millis {
        self.time
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, id)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GroupedTaskIndex {
    granularity: Granularity,
    key: TimeKey,
    groups: Vec<TimeGroup>,
}

impl GroupedTaskIndex {
    pub fn new(granularity: Granularity, key: TimeKey) -> Self {
        Self {
            granularity,
            key,
            groups: Vec::new(),
        }
    }

    /// Index keyed by `timeClosed`.
    pub fn by_time_closed(granularity: Granularity) -> Self {
        Self::new(granularity, time_closed)
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    fn key_of(&self, task: &Task) -> Result<Millis> {
        (self.key)(task)
            .ok_or_else(|| Error::precondition(task.id(), "index", "task has no time key"))
    }

    pub fn add_task(&mut self, task: &Task) -> Result<()> {
        let key = self.key_of(task)?;
        let bucket = self.granularity.bucket_start(key)?;

        let group_idx = self.groups.partition_point(|g| g.time > bucket);
        let exists = self
            .groups
            .get(group_idx)
            .is_some_and(|g| g.time == bucket);
        if !exists {
            self.groups.insert(
                group_idx,
                TimeGroup {
                    time: bucket,
                    entries: Vec::new(),
                },
            );
        }

        let entries = &mut self.groups[group_idx].entries;
        let pos = entries.partition_point(|(k, _)| *k >= key);
        entries.insert(pos, (key, task.id().to_string()));
        Ok(())
    }

    /// Removes `task`, pruning its bucket if it empties. Returns whether
    /// the task was present.
    pub fn remove_task(&mut self, task: &Task) -> bool {
        let Ok(key) = self.key_of(task) else {
            return false;
        };
        let Ok(bucket) = self.granularity.bucket_start(key) else {
            return false;
        };

        let group_idx = self.groups.partition_point(|g| g.time > bucket);
        let Some(group) = self.groups.get_mut(group_idx).filter(|g| g.time == bucket) else {
            return false;
        };

        let start = group.entries.partition_point(|(k, _)| *k > key);
        let found = group.entries[start..]
            .iter()
            .take_while(|(k, _)| *k == key)
            .position(|(_, id)| id == task.id());
        let Some(offset) = found else {
            return false;
        };
        group.entries.remove(start + offset);
        if group.entries.is_empty() {
            self.groups.remove(group_idx);
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.groups.iter().any(|g| g.ids().any(|x| x == id))
    }

    /// All buckets, most recent first.
    pub fn grouped(&self) -> &[TimeGroup] {
        &self.groups
    }

    /// Ids in the bucket containing `time`, newest first.
    pub fn tasks_closed_in(&self, time: Millis) -> Result<Vec<TaskId>> {
        let bucket = self.granularity.bucket_start(time)?;
        let idx = self.groups.partition_point(|g| g.time > bucket);
        Ok(self
            .groups
            .get(idx)
            .filter(|g| g.time == bucket)
            .map(|g| g.ids().map(str::to_string).collect())
            .unwrap_or_default())
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(TimeGroup::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Category;

    // 2024-03-13T12:00:00Z, a Wednesday.
    const WED: Millis = 1_710_331_200_000;
    const DAY_MS: Millis = 86_400_000;

    fn closed(id: &str, at: Millis) -> Task {
        let mut task = Task::new(id.into(), "t", Category::Daily, 0, "ctx", 0).expect("task");
        task.event_timestamps.time_closed = Some(at);
        task
    }

    #[test]
    fn bucket_truncation() {
        assert_eq!(Granularity::Day.bucket_start(WED).expect("day"), 1_710_288_000_000);
        // Monday 2024-03-11.
        assert_eq!(Granularity::Week.bucket_start(WED).expect("week"), 1_710_115_200_000);
        assert_eq!(Granularity::Month.bucket_start(WED).expect("month"), 1_709_251_200_000);
        assert_eq!(Granularity::Year.bucket_start(WED).expect("year"), 1_704_067_200_000);
    }

    #[test]
    fn monday_is_its_own_week_start() {
        let monday = 1_710_115_200_000 + 5;
        assert_eq!(
            Granularity::Week.bucket_start(monday).expect("week"),
            1_710_115_200_000
        );
    }

    #[test]
    fn keeps_buckets_and_entries_descending() {
        let mut index = GroupedTaskIndex::by_time_closed(Granularity::Day);
        index.add_task(&closed("a", WED)).expect("add");
        index.add_task(&closed("b", WED + 1_000)).expect("add");
        index.add_task(&closed("c", WED - 3 * DAY_MS)).expect("add");
        index.add_task(&closed("d", WED + DAY_MS)).expect("add");

        let groups = index.grouped();
        assert_eq!(groups.len(), 3);
        assert!(groups.windows(2).all(|w| w[0].time() > w[1].time()));
        let today: Vec<&str> = groups[1].ids().collect();
        assert_eq!(today, vec!["b", "a"]);
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn equal_keys_keep_insertion_order() {
        let mut index = GroupedTaskIndex::by_time_closed(Granularity::Month);
        index.add_task(&closed("first", WED)).expect("add");
        index.add_task(&closed("second", WED)).expect("add");
        let ids: Vec<&str> = index.grouped()[0].ids().collect();
        assert_eq!(ids, vec!["first", "second"]);
    }

    #[test]
    fn remove_prunes_empty_buckets() {
        let mut index = GroupedTaskIndex::by_time_closed(Granularity::Day);
        let a = closed("a", WED);
        let b = closed("b", WED - 2 * DAY_MS);
        index.add_task(&a).expect("add");
        index.add_task(&b).expect("add");

        assert!(index.remove_task(&b));
        assert_eq!(index.grouped().len(), 1);
        assert!(!index.remove_task(&b));
        assert!(index.remove_task(&a));
        assert!(index.is_empty());
    }

    #[test]
    fn tasks_without_key_are_rejected() {
        let mut index = GroupedTaskIndex::by_time_closed(Granularity::Day);
        let open = Task::new("o".into(), "t", Category::Daily, 0, "ctx", 0).expect("task");
        assert!(index.add_task(&open).is_err());
        assert!(!index.remove_task(&open));
    }

    #[test]
    fn tasks_closed_in_bucket() {
        let mut index = GroupedTaskIndex::by_time_closed(Granularity::Week);
        index.add_task(&closed("a", WED)).expect("add");
        index.add_task(&closed("b", WED - 14 * DAY_MS)).expect("add");
        assert_eq!(index.tasks_closed_in(WED + DAY_MS).expect("query"), vec!["a"]);
        assert!(index.tasks_closed_in(WED - 7 * DAY_MS).expect("query").is_empty());
    }
}
