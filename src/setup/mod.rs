pub mod docker_compose;
pub mod exec;

use crate::app::context::Context;
use crate::app::sink::LogSink;
use crate::configuration::registry::{Constructor, Family};
use crate::error::{SetupError, TeardownError, ValidationError};
use crate::process::Execute;
use serde_derive::Serialize;

pub use docker_compose::{ComposeEnvironment, Container, DockerCompose, PublishedPort};
pub use exec::{Exec, ExecEnvironment};

/// Provides the environment a Test runs against.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Setup {
    #[serde(rename = "docker-compose")]
    DockerCompose(DockerCompose),
    #[serde(rename = "exec")]
    Exec(Exec),
    /// Nothing to provision; the environment already exists.
    #[serde(rename = "none")]
    None,
}

impl Family for Setup {
    const NAME: &'static str = "setup";
    const REGISTRY: &'static [(&'static str, Constructor<Self>)] = &[
        crate::variant!("docker-compose" => Setup::DockerCompose),
        crate::variant!("exec" => Setup::Exec),
        ("none", |_| Ok(Setup::None)),
    ];
}

/// Drives one Setup through its lifecycle. A provisioner is built once per
/// Test run and carries whatever identity that run needs.
pub trait Provisioner: Send + Sync {
    fn validate(&self) -> Result<(), ValidationError>;

    fn setup(&self, context: &Context, sink: &LogSink) -> Result<EnvironmentDescriptor, SetupError>;

    /// Releases what `setup` acquired. Failures are reported, never escalated.
    fn teardown(&self, sink: &LogSink) -> Result<(), TeardownError>;

    /// The namespace isolating this run from concurrent ones, when there is one.
    fn project(&self) -> Option<&str> {
        None
    }
}

/// Output of a successful Setup, available to later stages as `setup`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EnvironmentDescriptor {
    Compose(ComposeEnvironment),
    Exec(ExecEnvironment),
    Empty,
}

struct NoSetup;

impl Provisioner for NoSetup {
    fn validate(&self) -> Result<(), ValidationError> {
        Ok(())
    }

    fn setup(&self, _: &Context, _: &LogSink) -> Result<EnvironmentDescriptor, SetupError> {
        Ok(EnvironmentDescriptor::Empty)
    }

    fn teardown(&self, _: &LogSink) -> Result<(), TeardownError> {
        Ok(())
    }
}

impl Setup {
    pub fn kind(&self) -> &'static str {
        match self {
            Setup::DockerCompose(_) => "docker-compose",
            Setup::Exec(_) => "exec",
            Setup::None => "none",
        }
    }

    pub fn provisioner<'a>(&'a self, exec: &'a dyn Execute) -> Box<dyn Provisioner + 'a> {
        match self {
            Setup::DockerCompose(compose) => Box::new(compose.provisioner(exec)),
            Setup::Exec(script) => Box::new(script.provisioner(exec)),
            Setup::None => Box::new(NoSetup),
        }
    }
}
