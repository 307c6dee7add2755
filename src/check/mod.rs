pub mod http_get;
pub mod log_line;
pub mod tcp_socket;

use crate::app::context::Scope;
use crate::configuration::constants::readiness::{DEFAULT_INTERVAL, MAX_TIMEOUT};
use crate::configuration::registry::{Constructor, Family};
use crate::error::{CheckError, TimeoutError, ValidationError};
use serde_derive::Serialize;
use std::cmp::min;
use std::thread::sleep;
use std::time::{Duration, Instant};

pub use http_get::HttpGet;
pub use log_line::LogLine;
pub use tcp_socket::TcpSocket;

/// Decides when a provisioned environment is ready for the Runner.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ReadyCheck {
    #[serde(rename = "httpGet")]
    HttpGet(HttpGet),
    #[serde(rename = "logLine")]
    LogLine(LogLine),
    #[serde(rename = "tcpSocket")]
    TcpSocket(TcpSocket),
}

impl Family for ReadyCheck {
    const NAME: &'static str = "readyCheck";
    const REGISTRY: &'static [(&'static str, Constructor<Self>)] = &[
        crate::variant!("httpGet" => ReadyCheck::HttpGet),
        crate::variant!("logLine" => ReadyCheck::LogLine),
        crate::variant!("tcpSocket" => ReadyCheck::TcpSocket),
    ];
}

pub trait ReadinessCheck {
    /// Static checks only; the Context is not available yet.
    fn validate(&self) -> Result<(), ValidationError>;

    fn wait_for_ready(&self, scope: &Scope) -> Result<Readiness, CheckError>;
}

impl ReadyCheck {
    pub fn kind(&self) -> &'static str {
        match self {
            ReadyCheck::HttpGet(_) => "httpGet",
            ReadyCheck::LogLine(_) => "logLine",
            ReadyCheck::TcpSocket(_) => "tcpSocket",
        }
    }

    fn inner(&self) -> &dyn ReadinessCheck {
        match self {
            ReadyCheck::HttpGet(check) => check,
            ReadyCheck::LogLine(check) => check,
            ReadyCheck::TcpSocket(check) => check,
        }
    }
}

impl ReadinessCheck for ReadyCheck {
    fn validate(&self) -> Result<(), ValidationError> {
        self.inner().validate()
    }

    fn wait_for_ready(&self, scope: &Scope) -> Result<Readiness, CheckError> {
        self.inner().wait_for_ready(scope)
    }
}

/// What a passed check reports into the Context under `readyChecks`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub check: String,
    pub target: String,
    pub attempts: u32,
    #[serde(with = "crate::reporter::serialize::duration")]
    pub elapsed: Duration,
}

/// Poll spacing and overall deadline shared by every check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Timing {
    /// Fills in defaults; a timeout above the maximum is reduced to it.
    pub fn resolve(interval: Option<Duration>, timeout: Option<Duration>) -> Self {
        let timeout = match timeout {
            Some(timeout) if timeout > MAX_TIMEOUT => {
                debug!(
                    "Readiness timeout {:?} exceeds the maximum, using {:?}",
                    timeout, MAX_TIMEOUT
                );
                MAX_TIMEOUT
            }
            Some(timeout) => timeout,
            None => MAX_TIMEOUT,
        };
        Self {
            interval: interval.unwrap_or(DEFAULT_INTERVAL),
            timeout,
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::resolve(None, None)
    }
}

/// Result of a single poll.
pub enum Attempt {
    Ready,
    NotYet(String),
}

/// Repeats `attempt` every `interval` until it reports ready, the deadline
/// passes or the scope is cancelled. `attempt` receives the time left, so no
/// single attempt outlives the deadline by more than its own timeout.
pub fn poll<F>(
    check: &str,
    timing: Timing,
    target: &str,
    expectation: &str,
    scope: &Scope,
    mut attempt: F,
) -> Result<Readiness, CheckError>
where
    F: FnMut(Duration) -> Attempt,
{
    let started = Instant::now();
    let deadline = started + timing.timeout;
    let mut attempts = 0;
    debug!("Waiting for {} to {}", target, expectation);
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()).filter(|left| !left.is_zero()) {
        if scope.cancelled() {
            debug!("Stopped waiting for {} after {} attempts", target, attempts);
            return Err(CheckError::Cancelled {
                target: target.to_owned(),
                attempts,
            });
        }
        attempts += 1;
        match attempt(remaining) {
            Attempt::Ready => {
                info!("{} is ready after {} attempts", target, attempts);
                return Ok(Readiness {
                    check: check.to_owned(),
                    target: target.to_owned(),
                    attempts,
                    elapsed: started.elapsed(),
                });
            }
            Attempt::NotYet(reason) => {
                scope.sink.line(format_args!("[{}] {} attempt {}: {}", check, target, attempts, reason));
            }
        }
        if let Some(left) = deadline.checked_duration_since(Instant::now()) {
            sleep(min(timing.interval, left));
        }
    }
    Err(CheckError::Timeout(TimeoutError {
        target: target.to_owned(),
        expectation: expectation.to_owned(),
        attempts,
        elapsed: started.elapsed(),
    }))
}
