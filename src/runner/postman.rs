use crate::app::context::Scope;
use crate::configuration::constants::compose::DOCKER;
use crate::configuration::constants::postman::{CONTAINER_WORKDIR, NEWMAN};
use crate::configuration::constants::processes::DEFAULT_TIMEOUT;
use crate::error::{ProcessError, RunnerError, ValidationError};
use crate::process::{locate, Invocation};
use crate::reporter::model::{Result as TestResult, ResultGroup, Status};
use crate::runner::conclude;
use crate::setup::docker_compose::require_file;
use serde_derive::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    pub key: String,
    /// Rendered against the Context before it is handed to Newman.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub collection_file: String,
    /// Takes precedence over the runner's `environmentFile`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_overrides: Vec<EnvironmentVariable>,
}

/// Runs Postman collections with Newman, natively or in a container.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Postman {
    pub collections: Vec<Collection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment_overrides: Vec<EnvironmentVariable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newman_path: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub use_docker: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
    /// Bound of each collection run.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::configuration::deserialize::optional_duration"
    )]
    pub process_timeout: Option<Duration>,
}

impl Postman {
    fn newman(&self) -> &str {
        self.newman_path.as_deref().unwrap_or(NEWMAN)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let image = self.docker_image.as_deref().unwrap_or_default();
        if self.use_docker && image.trim().is_empty() {
            return Err(ValidationError::Invalid(
                "postman runner needs `dockerImage` when `useDocker` is set".to_owned(),
            ));
        }
        if self.collections.is_empty() {
            return Err(ValidationError::Invalid("postman runner has no collections".to_owned()));
        }
        for collection in &self.collections {
            if collection.collection_file.trim().is_empty() {
                return Err(ValidationError::Invalid(
                    "every postman collection needs a `collectionFile`".to_owned(),
                ));
            }
            require_file("collection file", &collection.collection_file)?;
            if let Some(environment) = &collection.environment_file {
                require_file("environment file", environment)?;
            }
        }
        if let Some(environment) = &self.environment_file {
            require_file("environment file", environment)?;
        }
        let tool = if self.use_docker { DOCKER } else { self.newman() };
        if locate(tool).is_none() {
            return Err(ValidationError::MissingTool(tool.to_owned()));
        }
        Ok(())
    }

    /// `docker run ... <image>` with the working directory mounted, or Newman itself.
    fn launcher(&self) -> Result<Invocation, RunnerError> {
        match (self.use_docker, &self.docker_image) {
            (true, Some(image)) => {
                let cwd = env::current_dir().map_err(RunnerError::WorkingDirectory)?;
                Ok(Invocation::new(DOCKER).args(vec![
                    "run".to_owned(),
                    "--rm".to_owned(),
                    "--network".to_owned(),
                    "host".to_owned(),
                    "-v".to_owned(),
                    format!("{}:{}", cwd.display(), CONTAINER_WORKDIR),
                    "-w".to_owned(),
                    CONTAINER_WORKDIR.to_owned(),
                    image.clone(),
                ]))
            }
            _ => Ok(Invocation::new(self.newman())),
        }
    }

    fn invocation(&self, collection: &Collection, scope: &Scope) -> Result<Invocation, RunnerError> {
        let mut invocation = self
            .launcher()?
            .timeout(self.process_timeout.unwrap_or(DEFAULT_TIMEOUT))
            .arg("run")
            .arg(collection.collection_file.as_str());
        let environment = collection
            .environment_file
            .as_ref()
            .or(self.environment_file.as_ref());
        if let Some(environment) = environment {
            invocation = invocation.arg("-e").arg(environment.as_str());
        }
        for variable in self
            .environment_overrides
            .iter()
            .chain(collection.environment_overrides.iter())
        {
            let value = scope.context.apply(&variable.value)?;
            invocation = invocation
                .arg("--env-var")
                .arg(format!("{}={}", variable.key, value));
        }
        Ok(invocation)
    }

    pub fn run(&self, scope: &Scope) -> Result<ResultGroup, RunnerError> {
        let mut group = ResultGroup::start("postman");
        group.metadata.insert("runner".to_owned(), "postman".to_owned());
        for collection in &self.collections {
            let invocation = self.invocation(collection, scope)?;
            let result = TestResult::start(collection.collection_file.as_str())
                .with_metadata("command", invocation.to_string());
            info!("Running collection {}", collection.collection_file);
            let result = match scope.exec.stream(&invocation, scope.sink) {
                Ok(()) => result.finish(Status::Passed, None),
                Err(err @ ProcessError::Exit { .. }) => {
                    result.finish(Status::Failed, Some(err.to_string()))
                }
                Err(err) => result.finish(Status::Errored, Some(err.to_string())),
            };
            group.results.push(result);
        }
        conclude(group)
    }
}
