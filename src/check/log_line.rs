use crate::app::context::Scope;
use crate::check::{poll, Attempt, ReadinessCheck, Readiness, Timing};
use crate::configuration::constants::compose::DOCKER;
use crate::error::{CheckError, ValidationError};
use crate::process::Invocation;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fs;
use std::time::Duration;

/// Ready once `pattern` shows up in a container's logs or in a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "LogLineFields", into = "LogLineFields")]
pub struct LogLine {
    pub pattern: Regex,
    pub source: LogSource,
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogSource {
    /// Read with `docker logs`.
    Container(String),
    File(String),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogLineFields {
    #[serde(with = "serde_regex")]
    pattern: Regex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    container: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file: Option<String>,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    timeout: Option<Duration>,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    interval: Option<Duration>,
}

impl TryFrom<LogLineFields> for LogLine {
    type Error = String;

    fn try_from(fields: LogLineFields) -> Result<Self, Self::Error> {
        let source = match (fields.container, fields.file) {
            (Some(container), None) => LogSource::Container(container),
            (None, Some(file)) => LogSource::File(file),
            _ => return Err("logLine needs exactly one of `container` and `file`".to_owned()),
        };
        Ok(Self {
            pattern: fields.pattern,
            source,
            timing: Timing::resolve(fields.interval, fields.timeout),
        })
    }
}

impl From<LogLine> for LogLineFields {
    fn from(check: LogLine) -> Self {
        let (container, file) = match check.source {
            LogSource::Container(container) => (Some(container), None),
            LogSource::File(file) => (None, Some(file)),
        };
        Self {
            pattern: check.pattern,
            container,
            file,
            timeout: Some(check.timing.timeout),
            interval: Some(check.timing.interval),
        }
    }
}

impl LogLine {
    fn scan<'a, I>(&self, texts: I) -> Attempt
    where
        I: IntoIterator<Item = &'a str>,
    {
        if texts.into_iter().any(|text| self.pattern.is_match(text)) {
            Attempt::Ready
        } else {
            Attempt::NotYet("no matching line yet".to_owned())
        }
    }
}

impl ReadinessCheck for LogLine {
    fn validate(&self) -> Result<(), ValidationError> {
        let target = match &self.source {
            LogSource::Container(container) => container,
            LogSource::File(file) => file,
        };
        if target.trim().is_empty() || self.pattern.as_str().is_empty() {
            return Err(ValidationError::Invalid(
                "logLine check needs a non-empty `pattern` and source".to_owned(),
            ));
        }
        Ok(())
    }

    fn wait_for_ready(&self, scope: &Scope) -> Result<Readiness, CheckError> {
        let expectation = format!("log a line matching /{}/", self.pattern);
        let readiness = match &self.source {
            LogSource::Container(container) => {
                let container = scope.context.apply(container)?;
                let logs = Invocation::new(DOCKER).arg("logs").arg(container.as_str());
                poll("logLine", self.timing, &container, &expectation, scope, |left| {
                    let logs = logs.clone().timeout(left);
                    match scope.exec.capture(&logs).and_then(|captured| captured.check(&logs)) {
                        Ok(captured) => self.scan(vec![captured.stdout.as_str(), captured.stderr.as_str()]),
                        Err(err) => Attempt::NotYet(err.to_string()),
                    }
                })?
            }
            LogSource::File(file) => {
                let file = scope.context.apply(file)?;
                poll("logLine", self.timing, &file, &expectation, scope, |_| {
                    match fs::read_to_string(&file) {
                        Ok(contents) => self.scan(vec![contents.as_str()]),
                        Err(err) => Attempt::NotYet(err.to_string()),
                    }
                })?
            }
        };
        Ok(readiness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::context::Context;
    use crate::app::sink::LogSink;
    use crate::testing::{RecordingShell, Response};
    use serde_json::json;
    use std::io::Write;

    fn decode(fragment: serde_json::Value) -> LogLine {
        serde_json::from_value(fragment).unwrap()
    }

    #[test]
    fn test_exactly_one_source_is_required() {
        for fragment in vec![
            json!({ "pattern": "up" }),
            json!({ "pattern": "up", "container": "api", "file": "api.log" }),
        ] {
            assert!(serde_json::from_value::<LogLine>(fragment).is_err());
        }
    }

    #[test]
    fn test_container_logs_are_polled_until_the_pattern_appears() {
        let shell = RecordingShell::new().respond("docker logs api", Response::Output("Listening on 8080\n".to_owned()));
        let check = decode(json!({ "pattern": "Listening on \\d+", "container": "api", "timeout": "1s" }));
        let context = Context::new();
        let sink = LogSink::buffered();

        let readiness = check
            .wait_for_ready(&Scope {
                context: &context,
                sink: &sink,
                exec: &shell,
                cancel: None,
            })
            .unwrap();

        assert_eq!(readiness.target, "api");
        assert_eq!(shell.calls(), vec!["docker logs api"]);
        let bound = shell.invocations()[0].timeout.unwrap();
        assert!(bound > Duration::ZERO && bound <= Duration::from_secs(1));
    }

    #[test]
    fn test_failing_docker_logs_counts_as_not_ready() {
        let shell = RecordingShell::new().respond("docker logs", Response::Exit(1, "No such container".to_owned()));
        let check = decode(json!({
            "pattern": "ready",
            "container": "api",
            "timeout": "250ms",
            "interval": "100ms"
        }));
        let context = Context::new();
        let sink = LogSink::buffered();

        let err = check
            .wait_for_ready(&Scope {
                context: &context,
                sink: &sink,
                exec: &shell,
                cancel: None,
            })
            .unwrap_err();

        assert!(matches!(err, CheckError::Timeout(_)));
        assert!(shell.count() >= 2);
        assert!(sink.contents().unwrap().contains("No such container"));
    }

    #[test]
    fn test_file_source_reads_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "booting\nserver started").unwrap();
        let check = decode(json!({
            "pattern": "(?m)^server started$",
            "file": file.path().to_string_lossy(),
            "timeout": "1s"
        }));
        let context = Context::new();

        let readiness = check
            .wait_for_ready(&Scope {
                context: &context,
                sink: &LogSink::buffered(),
                exec: &RecordingShell::new(),
                cancel: None,
            })
            .unwrap();

        assert_eq!(readiness.attempts, 1);
    }
}
