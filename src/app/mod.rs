pub(crate) mod context;
pub(crate) mod lifecycle;
pub(crate) mod sink;

use crate::app::lifecycle::{Lifecycle, Phase};
use crate::app::sink::LogSink;
use crate::configuration::manifest::{Test, TestConfig};
use crate::process::Execute;
use crate::reporter::TestReport;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// What a run produced, in configuration order.
#[derive(Debug)]
pub struct RunSummary {
    pub reports: Vec<TestReport>,
    /// Tests never started because dispatch was halted.
    pub skipped: Vec<String>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        self.skipped.is_empty() && self.reports.iter().all(TestReport::succeeded)
    }
}

/// Fans Tests out to a bounded pool of workers, one Lifecycle per Test.
pub struct App<'a> {
    config: TestConfig,
    exec: &'a dyn Execute,
    log_dir: Option<PathBuf>,
    halt: Arc<AtomicBool>,
}

impl<'a> App<'a> {
    pub fn new(config: TestConfig, exec: &'a dyn Execute) -> Self {
        Self {
            config,
            exec,
            log_dir: None,
            halt: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Stage output goes to `<dir>/<test>.log` instead of the process log.
    pub fn with_log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.log_dir = dir;
        self
    }

    /// Once set, no further Tests are started; running ones finish normally.
    pub fn halt_flag(&self) -> Arc<AtomicBool> {
        self.halt.clone()
    }

    pub fn run(&self) -> RunSummary {
        let started = Instant::now();
        let tests = &self.config.tests;
        let workers = self.config.parallelization.min(tests.len()).max(1);
        info!(
            "Running {} tests on {} workers ({:?} ready checks, fail fast {})",
            tests.len(),
            workers,
            self.config.ready_check_mode,
            self.config.fail_fast
        );
        let queue = Mutex::new(tests.iter().enumerate());
        let reports = Mutex::new(Vec::with_capacity(tests.len()));
        thread::scope(|scope| {
            for worker in 0..workers {
                let queue = &queue;
                let reports = &reports;
                scope.spawn(move || {
                    debug!("Worker {} started", worker);
                    while let Some((index, test)) = self.next(queue) {
                        let report = self.execute(test);
                        self.observe(&report);
                        lock!(reports).push((index, report));
                    }
                    debug!("Worker {} finished", worker);
                });
            }
        });

        let mut reports = match reports.into_inner() {
            Ok(reports) => reports,
            Err(poisoned) => poisoned.into_inner(),
        };
        reports.sort_by_key(|(index, _)| *index);
        let ran: Vec<TestReport> = reports.into_iter().map(|(_, report)| report).collect();
        let skipped: Vec<String> = tests
            .iter()
            .filter(|test| !ran.iter().any(|report| report.name == test.name))
            .map(|test| test.name.clone())
            .collect();
        if !skipped.is_empty() {
            warn!("Not started: {}", skipped.join(", "));
        }
        RunSummary {
            reports: ran,
            skipped,
            elapsed: started.elapsed(),
        }
    }

    fn next<'t, I>(&self, queue: &Mutex<I>) -> Option<(usize, &'t Test)>
    where
        I: Iterator<Item = (usize, &'t Test)>,
    {
        if self.halt.load(Ordering::SeqCst) {
            return None;
        }
        lock!(queue).next()
    }

    /// Halts dispatch after an invalid Test, or after any failure in fail-fast mode.
    fn observe(&self, report: &TestReport) {
        let failure = match &report.failure {
            Some(failure) => failure,
            None => return,
        };
        if failure.phase == Phase::Validating {
            error!("'{}' failed validation, no further tests are started", report.name);
            self.halt.store(true, Ordering::SeqCst);
        } else if self.config.fail_fast {
            warn!("'{}' failed, no further tests are started (fail fast)", report.name);
            self.halt.store(true, Ordering::SeqCst);
        }
    }

    fn execute(&self, test: &Test) -> TestReport {
        let sink = self.sink_for(&test.name);
        let report = Lifecycle::new(test, self.exec, &sink, self.config.ready_check_mode).run();
        if let Some(output) = sink.contents().filter(|output| !output.is_empty()) {
            debug!("Output of '{}':\n{}", test.name, output.trim_end());
        }
        report
    }

    fn sink_for(&self, test: &str) -> LogSink {
        let dir = match &self.log_dir {
            Some(dir) => dir,
            None => return LogSink::buffered(),
        };
        let path = dir.join(format!("{}.log", file_name(test)));
        match LogSink::file(&path) {
            Ok(sink) => sink,
            Err(err) => {
                warn!("Cannot write {}, keeping output in memory: {}", path.display(), err);
                LogSink::buffered()
            }
        }
    }
}

/// Test names are free text; keep what is safe in a file name.
fn file_name(test: &str) -> String {
    let name: String = test
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    match name.trim_matches('.') {
        "" => "test".to_owned(),
        trimmed => trimmed.to_owned(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::{RecordingShell, Response};

    fn config(yaml: &str) -> TestConfig {
        TestConfig::parse(yaml).unwrap()
    }

    const THREE_TESTS: &str = r#"
parallelization: 2
tests:
  - {name: one, setup: {type: none}, runner: {type: cargo, command: [sh, -c, one]}}
  - {name: two, setup: {type: none}, runner: {type: cargo, command: [sh, -c, two]}}
  - {name: three, setup: {type: none}, runner: {type: cargo, command: [sh, -c, three]}}
"#;

    #[test]
    fn test_reports_keep_configuration_order() {
        let shell = RecordingShell::new();
        let summary = App::new(config(THREE_TESTS), &shell).run();

        let names: Vec<_> = summary.reports.iter().map(|report| report.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two", "three"]);
        assert!(summary.succeeded());
        assert_eq!(shell.count(), 3);
    }

    #[test]
    fn test_failures_are_recorded_without_stopping_the_run() {
        let shell = RecordingShell::new().respond("-c two", Response::Exit(1, String::new()));
        let summary = App::new(config(THREE_TESTS), &shell).run();

        assert_eq!(summary.reports.len(), 3);
        assert!(!summary.reports[1].succeeded());
        assert!(!summary.succeeded());
    }

    #[test]
    fn test_fail_fast_stops_dispatch() {
        let mut config = config(THREE_TESTS);
        config.parallelization = 1;
        config.fail_fast = true;
        let shell = RecordingShell::new().respond("-c one", Response::Exit(1, String::new()));

        let summary = App::new(config, &shell).run();

        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.skipped, vec!["two", "three"]);
        assert_eq!(shell.count(), 1);
    }

    #[test]
    fn test_validation_failure_stops_dispatch() {
        let mut config = config(
            r#"
tests:
  - {name: broken, setup: {type: none}, runner: {type: cargo, command: [definitely-not-a-real-binary-4711]}}
  - {name: fine, setup: {type: none}, runner: {type: cargo, command: [sh]}}
"#,
        );
        config.parallelization = 1;
        let shell = RecordingShell::new();

        let summary = App::new(config, &shell).run();

        assert_eq!(summary.reports.len(), 1);
        assert_eq!(summary.reports[0].failure.as_ref().unwrap().phase, Phase::Validating);
        assert_eq!(summary.skipped, vec!["fine"]);
        assert_eq!(shell.count(), 0);
    }

    #[test]
    fn test_halt_flag_prevents_new_tests() {
        let shell = RecordingShell::new();
        let app = App::new(config(THREE_TESTS), &shell);
        app.halt_flag().store(true, Ordering::SeqCst);

        let summary = app.run();

        assert!(summary.reports.is_empty());
        assert_eq!(summary.skipped.len(), 3);
    }

    #[test]
    fn test_log_dir_gets_one_file_per_test() {
        let dir = tempfile::tempdir().unwrap();
        let shell = RecordingShell::new().respond("sh", Response::Output("hello from runner".to_owned()));
        let config = config(
            "tests: [{name: 'api / smoke', setup: {type: none}, runner: {type: cargo, command: [sh]}}]",
        );

        App::new(config, &shell)
            .with_log_dir(Some(dir.path().to_path_buf()))
            .run();

        let log = std::fs::read_to_string(dir.path().join("api___smoke.log")).unwrap();
        assert!(log.contains("hello from runner"));
    }

    #[test]
    fn test_file_name_replaces_unsafe_characters() {
        assert_eq!(file_name("api/v2 smoke"), "api_v2_smoke");
        assert_eq!(file_name(".."), "test");
    }
}
