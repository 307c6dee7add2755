pub mod model;
pub mod serialize;

use crate::app::lifecycle::Phase;
use crate::reporter::model::ResultGroup;
use crate::time::DurationUnit;
use serde_derive::Serialize;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TestStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    pub phase: Phase,
    pub error: String,
}

/// The outcome of one Test: the orchestrator's verdict next to the result tree.
#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub name: String,
    pub status: TestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub group: ResultGroup,
}

impl TestReport {
    pub fn succeeded(&self) -> bool {
        self.status == TestStatus::Succeeded
    }
}

/// Builds a Test's group node. Opened before validation, closed after teardown.
#[derive(Debug)]
pub struct Aggregator {
    group: ResultGroup,
    warnings: Vec<String>,
}

impl Aggregator {
    pub fn begin(test: &str) -> Self {
        Self {
            group: ResultGroup::start(test),
            warnings: Vec::new(),
        }
    }

    /// Moves the runner's leaves and sub-groups under the Test node unchanged.
    pub fn attach(&mut self, runner: ResultGroup) {
        let ResultGroup {
            results,
            result_groups,
            metadata,
            ..
        } = runner;
        self.group.results.extend(results);
        self.group.result_groups.extend(result_groups);
        self.group.metadata.extend(metadata);
    }

    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.group.metadata.insert(key.into(), value.into());
    }

    pub fn warn(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn finish(self, failure: Option<Failure>) -> TestReport {
        let status = match failure {
            None => TestStatus::Succeeded,
            Some(_) => TestStatus::Failed,
        };
        TestReport {
            name: self.group.name.clone(),
            status,
            failure,
            warnings: self.warnings,
            group: self.group.finish(),
        }
    }
}

pub fn log_summary(reports: &[TestReport], elapsed: Duration) {
    for report in reports {
        let took = DurationUnit::from(Duration::from_millis(report.group.duration.as_millis() as u64));
        match &report.failure {
            None => info!(
                "PASS {} ({}, {}/{} checks passed)",
                report.name,
                took,
                report.group.total() - report.group.failures(),
                report.group.total()
            ),
            Some(failure) => error!(
                "FAIL {} ({}) in {}: {}",
                report.name, took, failure.phase, failure.error
            ),
        }
        for warning in &report.warnings {
            warn!("{}: {}", report.name, warning);
        }
    }
    let failed = reports.iter().filter(|report| !report.succeeded()).count();
    info!(
        "{} tests, {} succeeded, {} failed in {}",
        reports.len(),
        reports.len() - failed,
        failed,
        DurationUnit::from(Duration::from_millis(elapsed.as_millis() as u64))
    );
}

/// Top level of the JSON report.
#[derive(Debug, Serialize)]
struct RunReport<'a> {
    tests: &'a [TestReport],
    /// Tests never started because dispatch was halted.
    skipped: &'a [String],
}

pub fn write_json(path: &Path, reports: &[TestReport], skipped: &[String]) -> io::Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    let report = RunReport {
        tests: reports,
        skipped,
    };
    serde_json::to_writer_pretty(writer, &report).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::model::{Result, Status};

    #[test]
    fn test_attach_moves_runner_leaves_under_test_node() {
        let mut runner = ResultGroup::start("postman");
        runner.results.push(Result::start("users.json").finish(Status::Passed, None));
        runner.result_groups.push(ResultGroup::start("nested").finish());
        runner.metadata.insert("tool".into(), "newman".into());

        let mut aggregator = Aggregator::begin("api");
        aggregator.attach(runner.finish());
        let report = aggregator.finish(None);

        assert!(report.succeeded());
        assert_eq!(report.group.name, "api");
        assert_eq!(report.group.results[0].name, "users.json");
        assert_eq!(report.group.result_groups[0].name, "nested");
        assert_eq!(report.group.metadata["tool"], "newman");
    }

    #[test]
    fn test_group_span_brackets_everything_attached() {
        let aggregator = Aggregator::begin("api");
        let mut runner = ResultGroup::start("runner");
        runner.results.push(Result::start("x").finish(Status::Passed, None));
        std::thread::sleep(Duration::from_millis(5));
        let mut aggregator = aggregator;
        aggregator.attach(runner.finish());
        let report = aggregator.finish(Some(Failure {
            phase: Phase::Running,
            error: "boom".into(),
        }));

        assert_eq!(report.status, TestStatus::Failed);
        assert!(report.group.start_time <= report.group.results[0].start_time);
        assert!(report.group.end_time >= report.group.results[0].end_time);
        assert!(report.group.duration >= Duration::from_millis(5));
    }

    #[test]
    fn test_json_report_lists_skipped_tests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let reports = vec![Aggregator::begin("api").finish(Some(Failure {
            phase: Phase::Polling,
            error: "timed out".into(),
        }))];

        write_json(&path, &reports, &["smoke".to_owned(), "load".to_owned()]).unwrap();

        let written: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["tests"][0]["name"], "api");
        assert_eq!(written["tests"][0]["failure"]["phase"], "polling");
        assert_eq!(written["skipped"], serde_json::json!(["smoke", "load"]));
    }
}
