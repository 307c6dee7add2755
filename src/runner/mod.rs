pub mod command;
pub mod postman;

use crate::app::context::Scope;
use crate::configuration::registry::{Constructor, Family};
use crate::error::{RunnerError, ValidationError};
use crate::reporter::model::ResultGroup;
use serde_derive::Serialize;

pub use command::{CommandRunner, Tool};
pub use postman::Postman;

/// Executes the actual test suite once the environment is ready.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Runner {
    Postman(Postman),
    Junit(CommandRunner),
    Jmeter(CommandRunner),
    K6(CommandRunner),
    Reqx(CommandRunner),
    Go(CommandRunner),
    Gradle(CommandRunner),
    Cargo(CommandRunner),
}

impl Family for Runner {
    const NAME: &'static str = "runner";
    const REGISTRY: &'static [(&'static str, Constructor<Self>)] = &[
        crate::variant!("postman" => Runner::Postman),
        crate::variant!("junit" => Runner::Junit),
        crate::variant!("jmeter" => Runner::Jmeter),
        crate::variant!("k6" => Runner::K6),
        crate::variant!("reqx" => Runner::Reqx),
        crate::variant!("go" => Runner::Go),
        crate::variant!("gradle" => Runner::Gradle),
        crate::variant!("cargo" => Runner::Cargo),
    ];
}

pub trait Execution {
    fn validate(&self) -> Result<(), ValidationError>;

    /// A run whose suites fail returns [`RunnerError::Failures`] carrying the
    /// group, so the results are reported either way.
    fn run(&self, scope: &Scope) -> Result<ResultGroup, RunnerError>;
}

impl Runner {
    pub fn kind(&self) -> &'static str {
        match self {
            Runner::Postman(_) => "postman",
            Runner::Junit(_) => Tool::Junit.name(),
            Runner::Jmeter(_) => Tool::Jmeter.name(),
            Runner::K6(_) => Tool::K6.name(),
            Runner::Reqx(_) => Tool::Reqx.name(),
            Runner::Go(_) => Tool::Go.name(),
            Runner::Gradle(_) => Tool::Gradle.name(),
            Runner::Cargo(_) => Tool::Cargo.name(),
        }
    }

    fn command(&self) -> Option<(Tool, &CommandRunner)> {
        match self {
            Runner::Postman(_) => None,
            Runner::Junit(runner) => Some((Tool::Junit, runner)),
            Runner::Jmeter(runner) => Some((Tool::Jmeter, runner)),
            Runner::K6(runner) => Some((Tool::K6, runner)),
            Runner::Reqx(runner) => Some((Tool::Reqx, runner)),
            Runner::Go(runner) => Some((Tool::Go, runner)),
            Runner::Gradle(runner) => Some((Tool::Gradle, runner)),
            Runner::Cargo(runner) => Some((Tool::Cargo, runner)),
        }
    }
}

impl Execution for Runner {
    fn validate(&self) -> Result<(), ValidationError> {
        match (self, self.command()) {
            (Runner::Postman(postman), _) => postman.validate(),
            (_, Some((tool, runner))) => runner.validate(tool),
            (_, None) => Ok(()),
        }
    }

    fn run(&self, scope: &Scope) -> Result<ResultGroup, RunnerError> {
        match (self, self.command()) {
            (Runner::Postman(postman), _) => postman.run(scope),
            (_, Some((tool, runner))) => runner.run(tool, scope),
            (_, None) => Ok(ResultGroup::start(self.kind()).finish()),
        }
    }
}

/// Closes `group` and turns failed leaves into [`RunnerError::Failures`].
pub(crate) fn conclude(group: ResultGroup) -> Result<ResultGroup, RunnerError> {
    let group = group.finish();
    let failed = group.failures();
    if failed == 0 {
        Ok(group)
    } else {
        let total = group.total();
        Err(RunnerError::Failures { group, failed, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::registry::{decode, kinds};
    use crate::error::ConfigError;
    use serde_json::json;

    #[test]
    fn test_every_runner_type_round_trips() {
        let mut fragments = vec![json!({
            "type": "postman",
            "collections": [
                {
                    "collectionFile": "users.postman_collection.json",
                    "environmentFile": "staging.json",
                    "environmentOverrides": [{ "key": "token", "value": "abc" }]
                },
                { "collectionFile": "orders.postman_collection.json" }
            ],
            "environmentFile": "local.json",
            "environmentOverrides": [{ "key": "baseUrl", "value": "http://localhost:{{ setup.containers.api.ports[\"80\"].hostPort }}" }],
            "newmanPath": "/usr/local/bin/newman",
            "useDocker": true,
            "dockerImage": "postman/newman:6"
        })];
        for kind in kinds::<Runner>().filter(|kind| *kind != "postman") {
            fragments.push(json!({
                "type": kind,
                "command": ["./run-tests"],
                "args": ["--verbose"],
                "env": { "BASE_URL": "http://localhost:8080" },
                "workdir": "tests"
            }));
        }
        for fragment in fragments {
            let runner = decode::<Runner>(fragment.clone()).unwrap();
            assert_eq!(runner.kind(), fragment["type"]);
            assert_eq!(serde_json::to_value(&runner).unwrap(), fragment);
        }
    }

    #[test]
    fn test_registry_covers_every_runner() {
        let kinds: Vec<_> = kinds::<Runner>().collect();
        assert_eq!(
            kinds,
            vec!["postman", "junit", "jmeter", "k6", "reqx", "go", "gradle", "cargo"]
        );
    }

    #[test]
    fn test_unknown_runner_type_names_the_value() {
        let err = decode::<Runner>(json!({ "type": "foo" })).unwrap_err();

        assert!(matches!(err, ConfigError::UnknownDiscriminator { .. }));
        assert!(err.to_string().contains("\"foo\""));
    }
}
