use crate::app::context::Scope;
use crate::configuration::constants::processes::DEFAULT_TIMEOUT;
use crate::error::{ProcessError, RunnerError, ValidationError};
use crate::process::{locate, Invocation};
use crate::reporter::model::{Result as TestResult, ResultGroup, Status};
use crate::runner::conclude;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Test tools driven through their command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Junit,
    Jmeter,
    K6,
    Reqx,
    Go,
    Gradle,
    Cargo,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::Junit => "junit",
            Tool::Jmeter => "jmeter",
            Tool::K6 => "k6",
            Tool::Reqx => "reqx",
            Tool::Go => "go",
            Tool::Gradle => "gradle",
            Tool::Cargo => "cargo",
        }
    }

    /// Command used when the runner does not set its own.
    pub fn base(self) -> &'static [&'static str] {
        match self {
            Tool::Junit => &["java", "-jar", "junit-platform-console-standalone.jar", "execute"],
            Tool::Jmeter => &["jmeter", "-n"],
            Tool::K6 => &["k6", "run"],
            Tool::Reqx => &["reqx", "run"],
            Tool::Go => &["go", "test"],
            Tool::Gradle => &["gradle", "test"],
            Tool::Cargo => &["cargo", "test"],
        }
    }
}

/// `args` and `env` values are templates rendered against the Context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandRunner {
    /// Replaces the tool's base command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
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

impl CommandRunner {
    fn argv(&self, tool: Tool) -> Vec<String> {
        match &self.command {
            Some(command) => command.clone(),
            None => tool.base().iter().map(|part| (*part).to_owned()).collect(),
        }
    }

    pub fn validate(&self, tool: Tool) -> Result<(), ValidationError> {
        let argv = self.argv(tool);
        let program = argv.first().ok_or_else(|| {
            ValidationError::Invalid(format!("{} runner has an empty `command`", tool.name()))
        })?;
        if locate(program).is_none() {
            return Err(ValidationError::MissingTool(program.clone()));
        }
        if let Some(dir) = &self.workdir {
            if !dir.is_dir() {
                return Err(ValidationError::NotADirectory {
                    kind: "workdir",
                    path: dir.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn run(&self, tool: Tool, scope: &Scope) -> Result<ResultGroup, RunnerError> {
        let args = scope.context.apply_all(&self.args)?;
        let env = self
            .env
            .iter()
            .map(|(key, value)| Ok((key.clone(), scope.context.apply(value)?)))
            .collect::<Result<BTreeMap<_, _>, RunnerError>>()?;
        let invocation = Invocation::from_argv(&self.argv(tool))
            .ok_or(ProcessError::EmptyCommand)?
            .args(args)
            .envs(env)
            .workdir(self.workdir.clone())
            .timeout(self.process_timeout.unwrap_or(DEFAULT_TIMEOUT));

        let mut group = ResultGroup::start(tool.name());
        group.metadata.insert("runner".to_owned(), tool.name().to_owned());
        let result = TestResult::start(tool.name()).with_metadata("command", invocation.to_string());
        info!("Running {} suite: {}", tool.name(), invocation);
        let result = match scope.exec.stream(&invocation, scope.sink) {
            Ok(()) => result.finish(Status::Passed, None),
            Err(err @ ProcessError::Exit { .. }) => result.finish(Status::Failed, Some(err.to_string())),
            Err(err) => return Err(err.into()),
        };
        group.results.push(result);
        conclude(group)
    }
}
