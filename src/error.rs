use crate::reporter::model::ResultGroup;
use crate::time::DurationUnit;
use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Malformed input: the run never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed configuration")]
    Syntax(#[from] serde_yaml::Error),
    #[error("{family} has no string `type` discriminator")]
    MissingDiscriminator { family: &'static str },
    #[error("unknown {family} type \"{value}\", expected one of: {expected}")]
    UnknownDiscriminator {
        family: &'static str,
        value: String,
        expected: String,
    },
    #[error("malformed {family} of type \"{kind}\"")]
    Malformed {
        family: &'static str,
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("test #{0} has no name")]
    MissingName(usize),
    #[error("test '{test}' is missing required field `{field}`")]
    MissingField { test: String, field: &'static str },
    #[error("in test '{test}'")]
    InTest {
        test: String,
        #[source]
        source: Box<ConfigError>,
    },
    #[error("test name '{0}' is used more than once")]
    DuplicateName(String),
    #[error("no test named '{0}' in the configuration")]
    UnknownTest(String),
    #[error("invalid TESTAMINT_* environment overrides")]
    Settings(#[from] config::ConfigError),
    #[error("cannot change into configuration directory {}", path.display())]
    WorkingDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// An unmet precondition, detected before any side effect.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{kind} '{}' not found", path.display())]
    MissingFile {
        kind: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{kind} '{}' is a directory", path.display())]
    NotAFile { kind: &'static str, path: PathBuf },
    #[error("{kind} '{}' is not a directory", path.display())]
    NotADirectory { kind: &'static str, path: PathBuf },
    #[error("`{0}` is not installed or not on PATH")]
    MissingTool(String),
    #[error("`{command}` is not usable")]
    ToolUnusable {
        command: String,
        #[source]
        source: ProcessError,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("no program to run, the command is empty")]
    EmptyCommand,
    #[error("failed to start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{}", exit_message(.command, .code, .output))]
    Exit {
        command: String,
        code: Option<i32>,
        output: String,
    },
    #[error("{}", timed_out_message(.command, .timeout))]
    TimedOut { command: String, timeout: Duration },
}

fn exit_message(command: &str, code: &Option<i32>, output: &str) -> String {
    let status = match code {
        Some(code) => format!("exited with code {}", code),
        None => "was terminated by a signal".to_owned(),
    };
    let output = output.trim();
    if output.is_empty() {
        format!("`{}` {}", command, status)
    } else {
        format!("`{}` {}:\n{}", command, status, output)
    }
}

fn timed_out_message(command: &str, timeout: &Duration) -> String {
    format!("`{}` did not finish within {} and was killed", command, DurationUnit::from(*timeout))
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("cannot read the state of the provisioned services")]
    Inspect(#[source] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TeardownError {
    #[error(transparent)]
    Process(#[from] ProcessError),
}

#[derive(Debug, Error)]
#[error("cannot render template `{template}`")]
pub struct TemplateError {
    pub template: String,
    #[source]
    pub source: liquid::Error,
}

#[derive(Debug, Error)]
#[error(
    "timed out after {} waiting for {target} to {expectation} ({attempts} attempts)",
    human(.elapsed)
)]
pub struct TimeoutError {
    pub target: String,
    pub expectation: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug, Error)]
pub enum CheckError {
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("stopped waiting for {target} after {attempts} attempts, another ready check failed")]
    Cancelled { target: String, attempts: u32 },
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("cannot determine the directory to mount into the runner container")]
    WorkingDirectory(#[source] io::Error),
    #[error("{failed} of {total} suites failed")]
    Failures {
        group: ResultGroup,
        failed: usize,
        total: usize,
    },
}

fn human(duration: &Duration) -> DurationUnit {
    DurationUnit::from(Duration::from_millis(duration.as_millis() as u64))
}

/// Formats an error with every source below it, `outer: inner: root`.
pub fn chain(error: &dyn StdError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
