use crate::app::context::Context;
use crate::app::sink::LogSink;
use crate::configuration::constants::compose::{DOCKER, PROJECT_PREFIX};
use crate::configuration::constants::processes::{DEFAULT_TIMEOUT, TOOL_CHECK_TIMEOUT};
use crate::error::{SetupError, TeardownError, ValidationError};
use crate::process::{locate, Execute, Invocation};
use crate::setup::{EnvironmentDescriptor, Provisioner};
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Services declared in compose files, started with `docker compose up`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DockerCompose {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    /// Started services; all of them when empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_file: Option<String>,
    /// Added to the environment of every compose invocation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_env: BTreeMap<String, String>,
    /// Bound of every process this stage starts.
    #[serde(
        rename = "processTimeout",
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::configuration::deserialize::optional_duration"
    )]
    pub process_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeEnvironment {
    pub project: String,
    /// Keyed by compose service name. A scaled service is listed under its
    /// name by the replica whose container name sorts first; the other
    /// replicas are keyed by their container names.
    pub containers: BTreeMap<String, Container>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub id: String,
    pub name: String,
    pub image: String,
    pub service: String,
    pub networks: Vec<String>,
    /// Keyed by the port inside the container.
    pub ports: BTreeMap<String, PublishedPort>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedPort {
    pub host: String,
    pub host_port: u16,
    pub target_port: u16,
    pub protocol: String,
}

/// One record of `docker compose ps --format json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PsRecord {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    image: String,
    service: String,
    #[serde(default)]
    networks: String,
    #[serde(default)]
    publishers: Option<Vec<Publisher>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Publisher {
    #[serde(rename = "URL", default)]
    url: String,
    target_port: u16,
    #[serde(alias = "publishedPort")]
    published_port: u16,
    #[serde(default)]
    protocol: String,
}

pub struct ComposeProvisioner<'a> {
    config: &'a DockerCompose,
    exec: &'a dyn Execute,
    project: String,
}

impl DockerCompose {
    /// Every provisioner gets a fresh project name, so concurrent Tests using
    /// the same files never share containers, networks or ports.
    pub fn provisioner<'a>(&'a self, exec: &'a dyn Execute) -> ComposeProvisioner<'a> {
        let project = format!("{}-{}", PROJECT_PREFIX, uuid::Uuid::new_v4().simple());
        debug!("Assigned compose project {}", project);
        ComposeProvisioner {
            config: self,
            exec,
            project,
        }
    }
}

impl<'a> ComposeProvisioner<'a> {
    fn base(&self) -> Invocation {
        let mut invocation = Invocation::new(DOCKER)
            .args(vec!["compose", "--project-name", self.project.as_str()])
            .envs(self.config.extra_env.clone())
            .timeout(self.config.process_timeout.unwrap_or(DEFAULT_TIMEOUT));
        for file in &self.config.files {
            invocation = invocation.arg("--file").arg(file.as_str());
        }
        if let Some(env_file) = &self.config.env_file {
            invocation = invocation.arg("--env-file").arg(env_file.as_str());
        }
        invocation
    }

    fn up(&self) -> Invocation {
        self.base()
            .args(vec!["up", "-d"])
            .args(self.config.services.iter().cloned())
    }

    fn ps(&self) -> Invocation {
        self.base().args(vec!["ps", "--format", "json"])
    }

    fn down(&self) -> Invocation {
        self.base().arg("down")
    }

    fn inspect(&self) -> Result<ComposeEnvironment, SetupError> {
        let ps = self.ps();
        let captured = self.exec.capture(&ps)?.check(&ps)?;
        let containers = parse_ps(&captured.stdout).map_err(SetupError::Inspect)?;
        Ok(ComposeEnvironment {
            project: self.project.clone(),
            containers,
        })
    }
}

impl<'a> Provisioner for ComposeProvisioner<'a> {
    fn validate(&self) -> Result<(), ValidationError> {
        for file in &self.config.files {
            require_file("compose file", file)?;
        }
        if let Some(env_file) = &self.config.env_file {
            require_file("env file", env_file)?;
        }
        if locate(DOCKER).is_none() {
            return Err(ValidationError::MissingTool(DOCKER.to_owned()));
        }
        let version = Invocation::new(DOCKER)
            .args(vec!["compose", "version"])
            .timeout(TOOL_CHECK_TIMEOUT);
        self.exec
            .capture(&version)
            .and_then(|captured| captured.check(&version))
            .map_err(|source| ValidationError::ToolUnusable {
                command: version.to_string(),
                source,
            })?;
        Ok(())
    }

    fn setup(&self, _: &Context, sink: &LogSink) -> Result<EnvironmentDescriptor, SetupError> {
        info!("Starting compose project {}", self.project);
        self.exec.stream(&self.up(), sink)?;
        let environment = match self.inspect() {
            Ok(environment) => environment,
            Err(err) => {
                // Teardown never runs for a failed Setup, so release the project here.
                sink.line(format_args!("== releasing {} after a failed inspection", self.project));
                if let Err(down) = self.exec.stream(&self.down(), sink) {
                    warn!("Cannot release compose project {}: {}", self.project, down);
                    sink.line(format_args!("release failed: {}", down));
                }
                return Err(err);
            }
        };
        debug!(
            "Compose project {} is running {} containers",
            self.project,
            environment.containers.len()
        );
        Ok(EnvironmentDescriptor::Compose(environment))
    }

    fn teardown(&self, sink: &LogSink) -> Result<(), TeardownError> {
        info!("Stopping compose project {}", self.project);
        self.exec.stream(&self.down(), sink)?;
        Ok(())
    }

    fn project(&self) -> Option<&str> {
        Some(&self.project)
    }
}

pub(crate) fn require_file(kind: &'static str, path: &str) -> Result<(), ValidationError> {
    let metadata = fs::metadata(path).map_err(|source| ValidationError::MissingFile {
        kind,
        path: Path::new(path).to_path_buf(),
        source,
    })?;
    if metadata.is_dir() {
        return Err(ValidationError::NotAFile {
            kind,
            path: Path::new(path).to_path_buf(),
        });
    }
    Ok(())
}

/// Accepts one record per line and the single array older compose versions print.
fn parse_ps(output: &str) -> Result<BTreeMap<String, Container>, serde_json::Error> {
    let trimmed = output.trim();
    let records: Vec<PsRecord> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)?
    } else {
        trimmed
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(serde_json::from_str)
            .collect::<Result<_, _>>()?
    };
    let mut replicas: Vec<Container> = records.into_iter().map(Container::from).collect();
    replicas.sort_by(|a, b| a.name.cmp(&b.name));
    let mut containers = BTreeMap::new();
    for container in replicas {
        let key = if containers.contains_key(&container.service) {
            container.name.clone()
        } else {
            container.service.clone()
        };
        containers.insert(key, container);
    }
    Ok(containers)
}

impl From<PsRecord> for Container {
    fn from(record: PsRecord) -> Self {
        let mut ports = BTreeMap::new();
        for publisher in record.publishers.unwrap_or_default() {
            if publisher.published_port == 0 {
                continue;
            }
            ports
                .entry(publisher.target_port.to_string())
                .or_insert(PublishedPort {
                    host: publisher.url,
                    host_port: publisher.published_port,
                    target_port: publisher.target_port,
                    protocol: publisher.protocol,
                });
        }
        Container {
            id: record.id,
            name: record.name,
            image: record.image,
            service: record.service,
            networks: record
                .networks
                .split(',')
                .map(str::trim)
                .filter(|network| !network.is_empty())
                .map(str::to_owned)
                .collect(),
            ports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingShell, Response};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread;

    const PS_LINES: &str = r#"
{"ID":"a1","Name":"p-api-1","Image":"api:1","Service":"api","Networks":"p_default, p_backend","Publishers":[{"URL":"0.0.0.0","TargetPort":8080,"PublishedPort":49153,"Protocol":"tcp"},{"URL":"::","TargetPort":8080,"PublishedPort":49153,"Protocol":"tcp"},{"URL":"","TargetPort":9000,"PublishedPort":0,"Protocol":"tcp"}]}
{"ID":"b2","Name":"p-db-1","Image":"postgres:16","Service":"db","Networks":"p_default","Publishers":null}
"#;

    fn compose() -> DockerCompose {
        DockerCompose {
            files: vec!["base.yml".to_owned(), "ci.yml".to_owned()],
            services: vec!["api".to_owned()],
            env_file: Some(".env".to_owned()),
            extra_env: vec![("TAG".to_owned(), "1".to_owned())].into_iter().collect(),
            process_timeout: None,
        }
    }

    #[test]
    fn test_parse_ps_lines() {
        let containers = parse_ps(PS_LINES).unwrap();
        let api = &containers["api"];

        assert_eq!(api.id, "a1");
        assert_eq!(api.networks, vec!["p_default", "p_backend"]);
        assert_eq!(api.ports.len(), 1);
        assert_eq!(
            api.ports["8080"],
            PublishedPort {
                host: "0.0.0.0".to_owned(),
                host_port: 49153,
                target_port: 8080,
                protocol: "tcp".to_owned(),
            }
        );
        assert!(containers["db"].ports.is_empty());
    }

    #[test]
    fn test_parse_ps_array() {
        let array = r#"[{"ID":"a1","Name":"p-api-1","Image":"api:1","Service":"api","Networks":"","Publishers":[]}]"#;
        let containers = parse_ps(array).unwrap();

        assert_eq!(containers["api"].name, "p-api-1");
        assert!(containers["api"].networks.is_empty());
    }

    #[test]
    fn test_parse_ps_keeps_every_replica_of_a_scaled_service() {
        let lines = r#"{"ID":"w2","Name":"p-worker-2","Image":"w:1","Service":"worker","Networks":"","Publishers":[]}
{"ID":"w1","Name":"p-worker-1","Image":"w:1","Service":"worker","Networks":"","Publishers":[]}
"#;
        let containers = parse_ps(lines).unwrap();

        assert_eq!(containers.len(), 2);
        assert_eq!(containers["worker"].id, "w1");
        assert_eq!(containers["p-worker-2"].id, "w2");
        assert_eq!(containers["p-worker-2"].service, "worker");
    }

    #[test]
    fn test_parse_ps_rejects_garbage() {
        assert!(parse_ps("not json").is_err());
    }

    #[test]
    fn test_setup_runs_up_then_ps_in_the_same_project() {
        let shell = RecordingShell::new().respond("ps --format json", Response::Output(PS_LINES.to_owned()));
        let config = compose();
        let provisioner = config.provisioner(&shell);
        let project = provisioner.project().unwrap().to_owned();
        let sink = LogSink::buffered();

        let descriptor = provisioner.setup(&Context::new(), &sink).unwrap();
        provisioner.teardown(&sink).unwrap();

        let calls = shell.calls();
        let base = format!(
            "docker compose --project-name {} --file base.yml --file ci.yml --env-file .env",
            project
        );
        assert_eq!(
            calls,
            vec![
                format!("{} up -d api", base),
                format!("{} ps --format json", base),
                format!("{} down", base),
            ]
        );
        assert!(shell.invocations().iter().all(|call| call.env["TAG"] == "1"));
        match descriptor {
            EnvironmentDescriptor::Compose(environment) => {
                assert_eq!(environment.project, project);
                assert_eq!(environment.containers.len(), 2);
            }
            other => panic!("unexpected descriptor {:?}", other),
        }
    }

    #[test]
    fn test_failed_up_is_a_setup_error() {
        let shell = RecordingShell::new().respond("up -d", Response::Exit(1, "pull access denied".to_owned()));
        let config = compose();
        let err = config
            .provisioner(&shell)
            .setup(&Context::new(), &LogSink::buffered())
            .unwrap_err();

        assert!(matches!(err, SetupError::Process(_)));
        assert!(err.to_string().contains("pull access denied"));
        assert_eq!(shell.count(), 1);
    }

    #[test]
    fn test_failed_inspection_releases_the_project() {
        let shell = RecordingShell::new().respond("ps --format json", Response::Exit(1, "daemon hiccup".to_owned()));
        let config = compose();
        let provisioner = config.provisioner(&shell);
        let sink = LogSink::buffered();

        let err = provisioner.setup(&Context::new(), &sink).unwrap_err();

        assert!(err.to_string().contains("daemon hiccup"));
        assert_eq!(shell.count_matching(" down"), 1);
        assert!(shell.calls()[2].ends_with(" down"));
    }

    #[test]
    fn test_unreadable_ps_output_releases_the_project() {
        let shell = RecordingShell::new().respond("ps --format json", Response::Output("not json".to_owned()));
        let config = compose();

        let err = config
            .provisioner(&shell)
            .setup(&Context::new(), &LogSink::buffered())
            .unwrap_err();

        assert!(matches!(err, SetupError::Inspect(_)));
        assert_eq!(shell.count_matching(" down"), 1);
    }

    #[test]
    fn test_missing_compose_file_fails_before_any_process() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yml");
        let config = DockerCompose {
            files: vec![missing.to_string_lossy().into_owned()],
            ..DockerCompose::default()
        };
        let shell = RecordingShell::new();

        let err = config.provisioner(&shell).validate().unwrap_err();

        assert!(matches!(err, ValidationError::MissingFile { kind: "compose file", .. }));
        assert_eq!(shell.count(), 0);
    }

    #[test]
    fn test_directory_is_not_a_compose_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DockerCompose {
            files: vec![dir.path().to_string_lossy().into_owned()],
            ..DockerCompose::default()
        };

        let err = config.provisioner(&RecordingShell::new()).validate().unwrap_err();
        assert!(matches!(err, ValidationError::NotAFile { .. }));
    }

    #[test]
    fn test_concurrent_provisioners_get_distinct_projects() {
        let config = compose();
        let shell = RecordingShell::new();
        let projects = Mutex::new(HashSet::new());
        thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    let provisioner = config.provisioner(&shell);
                    let project = provisioner.project().unwrap().to_owned();
                    assert!(project.starts_with("testamint-"));
                    projects.lock().unwrap().insert(project);
                });
            }
        });

        assert_eq!(projects.into_inner().unwrap().len(), 16);
    }
}
