use crate::app::sink::LogSink;
use crate::check::Readiness;
use crate::error::TemplateError;
use crate::process::Execute;
use crate::setup::EnvironmentDescriptor;
use derivative::*;
use serde_derive::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

pub const SETUP: &str = "setup";
pub const READY_CHECKS: &str = "readyChecks";

/// What one stage left behind for the stages after it.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum StageOutput {
    Environment(EnvironmentDescriptor),
    Readiness(Vec<Readiness>),
}

/// Outputs of completed stages, keyed by stage name. Entries are only ever
/// added; templates see them as `{{ setup.containers.api.ports["8080"].hostPort }}`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Context {
    stages: BTreeMap<String, StageOutput>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the Setup output. A second call keeps the first descriptor.
    pub fn record_environment(&mut self, descriptor: EnvironmentDescriptor) {
        self.stages
            .entry(SETUP.to_owned())
            .or_insert(StageOutput::Environment(descriptor));
    }

    pub fn push_readiness(&mut self, readiness: Readiness) {
        let entry = self
            .stages
            .entry(READY_CHECKS.to_owned())
            .or_insert_with(|| StageOutput::Readiness(Vec::new()));
        if let StageOutput::Readiness(list) = entry {
            list.push(readiness);
        }
    }

    pub fn get(&self, stage: &str) -> Option<&StageOutput> {
        self.stages.get(stage)
    }

    pub fn environment(&self) -> Option<&EnvironmentDescriptor> {
        match self.get(SETUP)? {
            StageOutput::Environment(descriptor) => Some(descriptor),
            StageOutput::Readiness(_) => None,
        }
    }

    /// Renders a liquid template against the recorded outputs. Plain strings
    /// are returned as they are.
    pub fn apply(&self, template: &str) -> Result<String, TemplateError> {
        if !template.contains("{{") && !template.contains("{%") {
            return Ok(template.to_owned());
        }
        let error = |source| TemplateError {
            template: template.to_owned(),
            source,
        };
        let parser = liquid::ParserBuilder::with_stdlib().build().map_err(error)?;
        let globals = liquid::to_object(&self.stages).map_err(error)?;
        parser
            .parse(template)
            .and_then(|parsed| parsed.render(&globals))
            .map_err(error)
    }

    pub fn apply_all<'a, I>(&self, templates: I) -> Result<Vec<String>, TemplateError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        templates.into_iter().map(|template| self.apply(template)).collect()
    }
}

/// Everything a stage may touch while it runs.
#[derive(Clone, Copy, Derivative)]
#[derivative(Debug)]
pub struct Scope<'a> {
    pub context: &'a Context,
    pub sink: &'a LogSink,
    #[derivative(Debug = "ignore")]
    pub exec: &'a dyn Execute,
    /// Set by a sibling that already failed; polling stops once it is.
    pub cancel: Option<&'a AtomicBool>,
}

impl Scope<'_> {
    pub fn cancelled(&self) -> bool {
        self.cancel.map_or(false, |flag| flag.load(Ordering::SeqCst))
    }
}
