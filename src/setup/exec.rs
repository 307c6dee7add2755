use crate::app::context::Context;
use crate::app::sink::LogSink;
use crate::configuration::constants::processes::DEFAULT_TIMEOUT;
use crate::error::{ProcessError, SetupError, TeardownError, ValidationError};
use crate::process::{locate, Captured, Execute, Invocation};
use crate::setup::{EnvironmentDescriptor, Provisioner};
use lazy_static::*;
use regex::Regex;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

lazy_static! {
    static ref VAR_LINE: Regex =
        Regex::new(r"^(?P<key>[A-Za-z_][A-Za-z0-9_]*)=(?P<value>.*)$").expect("Regex compilation error");
}

/// A script that prepares the environment, and optionally one that removes it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Exec {
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub teardown: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Bound of every process this stage starts.
    #[serde(
        rename = "processTimeout",
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::configuration::deserialize::optional_duration"
    )]
    pub process_timeout: Option<Duration>,
}

/// `KEY=VALUE` lines printed by the setup script, plus its exit code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecEnvironment {
    pub exit_code: i32,
    pub vars: BTreeMap<String, String>,
}

pub struct ExecProvisioner<'a> {
    config: &'a Exec,
    exec: &'a dyn Execute,
}

impl Exec {
    pub fn provisioner<'a>(&'a self, exec: &'a dyn Execute) -> ExecProvisioner<'a> {
        ExecProvisioner { config: self, exec }
    }
}

impl<'a> ExecProvisioner<'a> {
    fn invocation(&self, argv: &[String]) -> Option<Invocation> {
        Invocation::from_argv(argv).map(|invocation| {
            invocation
                .envs(self.config.env.clone())
                .workdir(self.config.workdir.clone())
                .timeout(self.config.process_timeout.unwrap_or(DEFAULT_TIMEOUT))
        })
    }

    fn run(&self, argv: &[String], sink: &LogSink) -> Result<Captured, ProcessError> {
        let invocation = self.invocation(argv).ok_or(ProcessError::EmptyCommand)?;
        let captured = self.exec.capture(&invocation)?;
        for line in captured.stdout.lines().chain(captured.stderr.lines()) {
            sink.line(format_args!("{}", line));
        }
        captured.check(&invocation)
    }
}

impl<'a> Provisioner for ExecProvisioner<'a> {
    fn validate(&self) -> Result<(), ValidationError> {
        let program = self
            .config
            .command
            .first()
            .ok_or_else(|| ValidationError::Invalid("exec setup has an empty `command`".to_owned()))?;
        if locate(program).is_none() {
            return Err(ValidationError::MissingTool(program.clone()));
        }
        if let Some(dir) = &self.config.workdir {
            if !dir.is_dir() {
                return Err(ValidationError::NotADirectory {
                    kind: "workdir",
                    path: dir.clone(),
                });
            }
        }
        Ok(())
    }

    fn setup(&self, _: &Context, sink: &LogSink) -> Result<EnvironmentDescriptor, SetupError> {
        let captured = self.run(&self.config.command, sink)?;
        let vars = captured
            .stdout
            .lines()
            .filter_map(|line| VAR_LINE.captures(line.trim_end()))
            .map(|caps| (caps["key"].to_owned(), caps["value"].to_owned()))
            .collect();
        Ok(EnvironmentDescriptor::Exec(ExecEnvironment {
            exit_code: captured.code.unwrap_or_default(),
            vars,
        }))
    }

    fn teardown(&self, sink: &LogSink) -> Result<(), TeardownError> {
        if let Some(teardown) = &self.config.teardown {
            self.run(teardown, sink)?;
        }
        Ok(())
    }
}
