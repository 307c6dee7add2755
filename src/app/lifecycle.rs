use crate::app::context::{Context, Scope};
use crate::app::sink::LogSink;
use crate::check::{ReadinessCheck, ReadyCheck, Readiness};
use crate::configuration::manifest::Test;
use crate::configuration::settings::ReadyCheckMode;
use crate::error::{chain, CheckError, RunnerError, SetupError, ValidationError};
use crate::process::Execute;
use crate::reporter::{Aggregator, Failure, TestReport};
use crate::runner::Execution;
use crate::setup::Provisioner;
use serde_derive::Serialize;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use thiserror::Error;

/// Where a Test was when it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Validating,
    Provisioning,
    Polling,
    Running,
    TornDown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Phase::Validating => "validation",
            Phase::Provisioning => "setup",
            Phase::Polling => "ready checks",
            Phase::Running => "runner",
            Phase::TornDown => "teardown",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{stage} is not runnable")]
    Validation {
        stage: String,
        #[source]
        source: ValidationError,
    },
    #[error("setup failed")]
    Setup(#[source] SetupError),
    #[error("ready check {stage} failed")]
    Check {
        stage: String,
        #[source]
        source: CheckError,
    },
    #[error("runner failed")]
    Runner(#[source] RunnerError),
    #[error("panicked during {phase}: {message}")]
    Panic { phase: Phase, message: String },
}

impl LifecycleError {
    pub fn phase(&self) -> Phase {
        match self {
            LifecycleError::Validation { .. } => Phase::Validating,
            LifecycleError::Setup(_) => Phase::Provisioning,
            LifecycleError::Check { .. } => Phase::Polling,
            LifecycleError::Runner(_) => Phase::Running,
            LifecycleError::Panic { phase, .. } => *phase,
        }
    }
}

/// Releases a provisioned environment exactly once: explicitly through
/// [`TeardownGuard::release`], or when dropped on an early return or a panic.
struct TeardownGuard<'g> {
    provisioner: Option<&'g dyn Provisioner>,
    sink: &'g LogSink,
    warnings: &'g RefCell<Vec<String>>,
}

impl<'g> TeardownGuard<'g> {
    fn new(provisioner: &'g dyn Provisioner, sink: &'g LogSink, warnings: &'g RefCell<Vec<String>>) -> Self {
        Self {
            provisioner: Some(provisioner),
            sink,
            warnings,
        }
    }

    fn release(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        let provisioner = match self.provisioner.take() {
            Some(provisioner) => provisioner,
            None => return,
        };
        self.sink.line(format_args!("== teardown"));
        let sink = self.sink;
        let warning = match panic::catch_unwind(AssertUnwindSafe(|| provisioner.teardown(sink))) {
            Ok(Ok(())) => return,
            Ok(Err(err)) => format!("teardown failed: {}", chain(&err)),
            Err(payload) => format!("teardown panicked: {}", panic_message(payload.as_ref())),
        };
        warn!("{}", warning);
        self.warnings.borrow_mut().push(warning);
    }
}

impl<'g> Drop for TeardownGuard<'g> {
    fn drop(&mut self) {
        if self.provisioner.is_some() {
            if thread::panicking() {
                warn!("Tearing down after a panic");
            }
            self.teardown();
        }
    }
}

/// Drives one Test: Validate, Setup, ReadyChecks, Runner, Teardown.
pub struct Lifecycle<'a> {
    test: &'a Test,
    exec: &'a dyn Execute,
    sink: &'a LogSink,
    mode: ReadyCheckMode,
}

impl<'a> Lifecycle<'a> {
    pub fn new(test: &'a Test, exec: &'a dyn Execute, sink: &'a LogSink, mode: ReadyCheckMode) -> Self {
        Self {
            test,
            exec,
            sink,
            mode,
        }
    }

    /// Never fails and never unwinds: every outcome, panics included, ends up
    /// in the report.
    pub fn run(&self) -> TestReport {
        info!("Starting test '{}'", self.test.name);
        let mut aggregator = Aggregator::begin(&self.test.name);
        let warnings = RefCell::new(Vec::new());
        let mut phase = Phase::Validating;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.drive(&mut aggregator, &mut phase, &warnings)
        }));
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(payload) => Some(LifecycleError::Panic {
                phase,
                message: panic_message(payload.as_ref()),
            }),
        };
        for warning in warnings.into_inner() {
            aggregator.warn(warning);
        }
        let failure = error.map(|err| {
            self.sink.line(format_args!("== failed in {}: {}", err.phase(), chain(&err)));
            Failure {
                phase: err.phase(),
                error: chain(&err),
            }
        });
        aggregator.finish(failure)
    }

    fn drive(
        &self,
        aggregator: &mut Aggregator,
        phase: &mut Phase,
        warnings: &RefCell<Vec<String>>,
    ) -> Result<(), LifecycleError> {
        let provisioner = self.test.setup.provisioner(self.exec);

        *phase = Phase::Validating;
        self.validate(provisioner.as_ref())?;

        *phase = Phase::Provisioning;
        self.sink.line(format_args!("== setup ({})", self.test.setup.kind()));
        let mut context = Context::new();
        let descriptor = provisioner
            .setup(&context, self.sink)
            .map_err(LifecycleError::Setup)?;
        let guard = TeardownGuard::new(provisioner.as_ref(), self.sink, warnings);
        if let Some(project) = provisioner.project() {
            aggregator.annotate("project", project);
        }
        context.record_environment(descriptor);

        *phase = Phase::Polling;
        self.wait_for_ready(&mut context)?;

        *phase = Phase::Running;
        self.sink.line(format_args!("== runner ({})", self.test.runner.kind()));
        let scope = Scope {
            context: &context,
            sink: self.sink,
            exec: self.exec,
            cancel: None,
        };
        let outcome = self.test.runner.run(&scope);
        match &outcome {
            Ok(group) => aggregator.attach(group.clone()),
            Err(RunnerError::Failures { group, .. }) => aggregator.attach(group.clone()),
            Err(_) => {}
        }

        *phase = Phase::TornDown;
        guard.release();
        outcome.map(|_| ()).map_err(LifecycleError::Runner)
    }

    fn validate(&self, provisioner: &dyn Provisioner) -> Result<(), LifecycleError> {
        provisioner
            .validate()
            .map_err(|source| LifecycleError::Validation {
                stage: format!("setup ({})", self.test.setup.kind()),
                source,
            })?;
        for (index, check) in self.test.ready_checks.iter().enumerate() {
            check.validate().map_err(|source| LifecycleError::Validation {
                stage: format!("ready check {}", label(index, check)),
                source,
            })?;
        }
        self.test
            .runner
            .validate()
            .map_err(|source| LifecycleError::Validation {
                stage: format!("runner ({})", self.test.runner.kind()),
                source,
            })
    }

    /// Sequential checks see the Readiness of every check before them.
    /// Concurrent ones see none; after the first failure the rest are
    /// cancelled and the first real failure in declaration order wins.
    fn wait_for_ready(&self, context: &mut Context) -> Result<(), LifecycleError> {
        let checks = &self.test.ready_checks;
        let failed = |index: usize, source| LifecycleError::Check {
            stage: label(index, &checks[index]),
            source,
        };
        if self.mode == ReadyCheckMode::Sequential {
            for (index, check) in checks.iter().enumerate() {
                let scope = Scope {
                    context: &*context,
                    sink: self.sink,
                    exec: self.exec,
                    cancel: None,
                };
                let readiness = check.wait_for_ready(&scope).map_err(|source| failed(index, source))?;
                context.push_readiness(readiness);
            }
            return Ok(());
        }

        let cancel = AtomicBool::new(false);
        let scope = Scope {
            context: &*context,
            sink: self.sink,
            exec: self.exec,
            cancel: Some(&cancel),
        };
        let mut outcomes: Vec<Result<Readiness, CheckError>> = thread::scope(|threads| {
            let cancel = &cancel;
            let handles: Vec<_> = checks
                .iter()
                .map(|check| {
                    threads.spawn(move || {
                        let outcome = check.wait_for_ready(&scope);
                        if outcome.is_err() {
                            cancel.store(true, Ordering::SeqCst);
                        }
                        outcome
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
                .collect()
        });
        let first_failure = outcomes
            .iter()
            .position(|outcome| outcome.is_err() && !matches!(outcome, Err(CheckError::Cancelled { .. })))
            .or_else(|| outcomes.iter().position(Result::is_err));
        if let Some(index) = first_failure {
            if let Err(source) = outcomes.swap_remove(index) {
                return Err(failed(index, source));
            }
        }
        for readiness in outcomes.into_iter().flatten() {
            context.push_readiness(readiness);
        }
        Ok(())
    }
}

fn label(index: usize, check: &ReadyCheck) -> String {
    format!("#{} ({})", index + 1, check.kind())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}
