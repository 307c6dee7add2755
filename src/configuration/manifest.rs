use crate::check::ReadyCheck;
use crate::configuration::constants::common::DEFAULT_PARALLELIZATION;
use crate::configuration::registry::decode;
use crate::configuration::settings::{Overrides, ReadyCheckMode};
use crate::error::ConfigError;
use crate::runner::Runner;
use crate::setup::Setup;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Stages stay raw until the registry of their family decodes them.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    #[serde(default)]
    parallelization: Option<usize>,
    #[serde(default)]
    fail_fast: Option<bool>,
    #[serde(default)]
    ready_check_mode: Option<ReadyCheckMode>,
    #[serde(default)]
    tests: Vec<RawTest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    setup: Option<Value>,
    #[serde(default)]
    ready_checks: Vec<Value>,
    #[serde(default)]
    runner: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub name: String,
    pub setup: Setup,
    pub ready_checks: Vec<ReadyCheck>,
    pub runner: Runner,
}

#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Tests running at the same time; never below one.
    pub parallelization: usize,
    pub fail_fast: bool,
    pub ready_check_mode: ReadyCheckMode,
    pub tests: Vec<Test>,
}

impl TestConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Accepts YAML, and JSON as a subset of it.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        let mut names = HashSet::new();
        let mut tests = Vec::with_capacity(raw.tests.len());
        for (index, raw_test) in raw.tests.into_iter().enumerate() {
            let test = Test::decode(index, raw_test)?;
            if !names.insert(test.name.clone()) {
                return Err(ConfigError::DuplicateName(test.name));
            }
            tests.push(test);
        }
        let mut config = Self {
            parallelization: DEFAULT_PARALLELIZATION,
            fail_fast: false,
            ready_check_mode: ReadyCheckMode::default(),
            tests,
        };
        config.apply(Overrides {
            parallelization: raw.parallelization,
            fail_fast: raw.fail_fast,
            ready_check_mode: raw.ready_check_mode,
        });
        Ok(config)
    }

    /// Replaces every policy value set in `overrides`.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(parallelization) = overrides.parallelization {
            if parallelization == 0 {
                warn!("Parallelization of 0 would run nothing, using 1");
            }
            self.parallelization = parallelization.max(1);
        }
        if let Some(fail_fast) = overrides.fail_fast {
            self.fail_fast = fail_fast;
        }
        if let Some(mode) = overrides.ready_check_mode {
            self.ready_check_mode = mode;
        }
    }

    /// Keeps only the named Tests, in configuration order. No names keeps all.
    pub fn retain_named(&mut self, names: &[String]) -> Result<(), ConfigError> {
        if names.is_empty() {
            return Ok(());
        }
        if let Some(unknown) = names
            .iter()
            .find(|name| !self.tests.iter().any(|test| &test.name == *name))
        {
            return Err(ConfigError::UnknownTest(unknown.clone()));
        }
        self.tests.retain(|test| names.contains(&test.name));
        Ok(())
    }
}

impl Test {
    fn decode(index: usize, raw: RawTest) -> Result<Self, ConfigError> {
        let name = raw
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or(ConfigError::MissingName(index))?;
        let in_test = |source: ConfigError| ConfigError::InTest {
            test: name.clone(),
            source: Box::new(source),
        };
        let setup = raw.setup.ok_or_else(|| ConfigError::MissingField {
            test: name.clone(),
            field: "setup",
        })?;
        let runner = raw.runner.ok_or_else(|| ConfigError::MissingField {
            test: name.clone(),
            field: "runner",
        })?;
        let setup = decode::<Setup>(setup).map_err(in_test)?;
        let ready_checks = raw
            .ready_checks
            .into_iter()
            .map(decode::<ReadyCheck>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(in_test)?;
        let runner = decode::<Runner>(runner).map_err(in_test)?;
        trace!("Decoded test '{}'", name);
        Ok(Self {
            name,
            setup,
            ready_checks,
            runner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const YAML: &str = r#"
parallelization: 3
failFast: true
tests:
  - name: api
    setup:
      type: docker-compose
      files: [docker-compose.yml]
      services: [api]
    readyChecks:
      - type: httpGet
        url: "http://localhost:{{ setup.containers.api.ports['8080'].hostPort }}/health"
        interval: 500ms
    runner:
      type: postman
      collections:
        - collectionFile: api.postman_collection.json
  - name: smoke
    setup:
      type: none
    runner:
      type: k6
      args: [smoke.js]
"#;

    #[test]
    fn test_parses_yaml_configuration() {
        let config = TestConfig::parse(YAML).unwrap();

        assert_eq!(config.parallelization, 3);
        assert!(config.fail_fast);
        assert_eq!(config.ready_check_mode, ReadyCheckMode::Sequential);
        assert_eq!(config.tests.len(), 2);
        let api = &config.tests[0];
        assert_eq!(api.setup.kind(), "docker-compose");
        match &api.ready_checks[0] {
            ReadyCheck::HttpGet(check) => {
                assert_eq!(check.timing.interval, Duration::from_millis(500));
                assert_eq!(check.status, 200);
            }
            other => panic!("unexpected check {:?}", other),
        }
        assert_eq!(config.tests[1].runner.kind(), "k6");
        assert!(config.tests[1].ready_checks.is_empty());
    }

    #[test]
    fn test_parses_json_configuration() {
        let json = r#"{"parallelization": 2, "tests": [
            {"name": "t", "setup": {"type": "none"}, "readyChecks": [], "runner": {"type": "cargo"}}
        ]}"#;
        let config = TestConfig::parse(json).unwrap();

        assert_eq!(config.parallelization, 2);
        assert!(!config.fail_fast);
        assert_eq!(config.tests[0].setup, Setup::None);
    }

    #[test]
    fn test_missing_setup_or_runner_is_a_config_error() {
        let no_setup = "tests: [{name: t, runner: {type: go}}]";
        let no_runner = "tests: [{name: t, setup: {type: none}}]";

        assert!(matches!(
            TestConfig::parse(no_setup),
            Err(ConfigError::MissingField { field: "setup", .. })
        ));
        assert!(matches!(
            TestConfig::parse(no_runner),
            Err(ConfigError::MissingField { field: "runner", .. })
        ));
    }

    #[test]
    fn test_unknown_setup_type_is_reported_with_test_name() {
        let yaml = "tests: [{name: payments, setup: {type: foo}, runner: {type: go}}]";
        let err = TestConfig::parse(yaml).unwrap_err();
        let message = crate::error::chain(&err);

        assert!(message.contains("payments"), "{}", message);
        assert!(message.contains("\"foo\""), "{}", message);
    }

    #[test]
    fn test_names_are_required_and_unique() {
        let unnamed = "tests: [{setup: {type: none}, runner: {type: go}}]";
        let twice = "tests: [{name: a, setup: {type: none}, runner: {type: go}}, {name: a, setup: {type: none}, runner: {type: go}}]";

        assert!(matches!(TestConfig::parse(unnamed), Err(ConfigError::MissingName(0))));
        assert!(matches!(TestConfig::parse(twice), Err(ConfigError::DuplicateName(_))));
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = TestConfig::parse(YAML).unwrap();
        config.apply(Overrides {
            parallelization: Some(0),
            fail_fast: None,
            ready_check_mode: Some(ReadyCheckMode::Concurrent),
        });

        assert_eq!(config.parallelization, 1);
        assert!(config.fail_fast);
        assert_eq!(config.ready_check_mode, ReadyCheckMode::Concurrent);
    }

    #[test]
    fn test_retain_named_filters_and_rejects_unknown() {
        let mut config = TestConfig::parse(YAML).unwrap();
        config.retain_named(&["smoke".to_owned()]).unwrap();
        assert_eq!(config.tests.len(), 1);
        assert_eq!(config.tests[0].name, "smoke");

        let err = config.retain_named(&["nope".to_owned()]).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownTest(_)));
    }

    #[test]
    fn test_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = TestConfig::from_file(&dir.path().join("testamint.yml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
