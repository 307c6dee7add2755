use chrono::{DateTime, Utc};
use serde_derive::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    Passed,
    Failed,
    Errored,
}

/// A single named check: one collection, one suite, one tool invocation.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Result {
    pub name: String,
    pub status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(with = "crate::reporter::serialize::duration")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ResultGroup {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(with = "crate::reporter::serialize::duration")]
    pub duration: Duration,
    pub results: Vec<Result>,
    pub result_groups: Vec<ResultGroup>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Result {
    /// Starts a result at the current instant; close it with [`Result::finish`].
    pub fn start(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            status: Status::Passed,
            error: None,
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            metadata: Metadata::new(),
        }
    }

    pub fn finish(mut self, status: Status, error: Option<String>) -> Self {
        self.end_time = Utc::now();
        self.duration = elapsed(self.start_time, self.end_time);
        self.status = status;
        self.error = error;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn passed(&self) -> bool {
        self.status == Status::Passed
    }
}

impl ResultGroup {
    pub fn start(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            start_time: now,
            end_time: now,
            duration: Duration::ZERO,
            results: Vec::new(),
            result_groups: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    pub fn finish(mut self) -> Self {
        self.finish_at(Utc::now());
        self
    }

    pub(crate) fn finish_at(&mut self, end: DateTime<Utc>) {
        self.end_time = end;
        self.duration = elapsed(self.start_time, end);
    }

    /// Counts failed or errored leaves in this group and every nested group.
    pub fn failures(&self) -> usize {
        self.results.iter().filter(|result| !result.passed()).count()
            + self.result_groups.iter().map(ResultGroup::failures).sum::<usize>()
    }

    pub fn total(&self) -> usize {
        self.results.len() + self.result_groups.iter().map(ResultGroup::total).sum::<usize>()
    }
}

fn elapsed(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or_default()
}
