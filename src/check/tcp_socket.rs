use crate::app::context::Scope;
use crate::check::{poll, Attempt, ReadinessCheck, Readiness, Timing};
use crate::configuration::constants::readiness::DEFAULT_CONNECT_TIMEOUT;
use crate::error::{CheckError, ValidationError};
use serde_derive::{Deserialize, Serialize};
use std::cmp::min;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Ready once something accepts a TCP connection on `address`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "TcpSocketFields", into = "TcpSocketFields")]
pub struct TcpSocket {
    pub address: String,
    pub timing: Timing,
    pub connect_timeout: Duration,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TcpSocketFields {
    address: String,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    timeout: Option<Duration>,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    connect_timeout: Option<Duration>,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    interval: Option<Duration>,
}

impl From<TcpSocketFields> for TcpSocket {
    fn from(fields: TcpSocketFields) -> Self {
        Self {
            address: fields.address,
            timing: Timing::resolve(fields.interval, fields.timeout),
            connect_timeout: fields.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT),
        }
    }
}

impl From<TcpSocket> for TcpSocketFields {
    fn from(check: TcpSocket) -> Self {
        Self {
            address: check.address,
            timeout: Some(check.timing.timeout),
            connect_timeout: Some(check.connect_timeout),
            interval: Some(check.timing.interval),
        }
    }
}

/// Resolves on every attempt: a container's name may only become resolvable
/// once it is up.
fn connect(address: &str, timeout: Duration) -> io::Result<()> {
    let mut last = io::Error::new(io::ErrorKind::NotFound, format!("{} did not resolve", address));
    for addr in address.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(()),
            Err(err) => last = err,
        }
    }
    Err(last)
}

impl ReadinessCheck for TcpSocket {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.address.trim().is_empty() {
            return Err(ValidationError::Invalid(
                "tcpSocket check has an empty `address`".to_owned(),
            ));
        }
        Ok(())
    }

    fn wait_for_ready(&self, scope: &Scope) -> Result<Readiness, CheckError> {
        let address = scope.context.apply(&self.address)?;
        let readiness = poll("tcpSocket", self.timing, &address, "accept connections", scope, |left| {
            match connect(&address, min(self.connect_timeout, left)) {
                Ok(()) => Attempt::Ready,
                Err(err) => Attempt::NotYet(err.to_string()),
            }
        })?;
        Ok(readiness)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::context::Context;
    use crate::app::sink::LogSink;
    use crate::testing::RecordingShell;
    use serde_json::json;
    use std::net::TcpListener;

    fn wait(check: &TcpSocket) -> Result<Readiness, CheckError> {
        let context = Context::new();
        let sink = LogSink::buffered();
        let shell = RecordingShell::new();
        check.wait_for_ready(&Scope {
            context: &context,
            sink: &sink,
            exec: &shell,
            cancel: None,
        })
    }

    #[test]
    fn test_defaults() {
        let check: TcpSocket = serde_json::from_value(json!({ "address": "db:5432" })).unwrap();

        assert_eq!(check.connect_timeout, Duration::from_secs(5));
        assert_eq!(check.timing, Timing::default());
    }

    #[test]
    fn test_ready_when_listener_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let check: TcpSocket = serde_json::from_value(json!({
            "address": listener.local_addr().unwrap().to_string(),
            "timeout": "2s"
        }))
        .unwrap();

        assert_eq!(wait(&check).unwrap().attempts, 1);
    }

    #[test]
    fn test_closed_port_times_out() {
        let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
        let check: TcpSocket = serde_json::from_value(json!({
            "address": format!("127.0.0.1:{}", port),
            "timeout": "300ms",
            "interval": "100ms"
        }))
        .unwrap();

        assert!(matches!(wait(&check), Err(CheckError::Timeout(_))));
    }

    #[test]
    fn test_validate_rejects_empty_address() {
        let check: TcpSocket = serde_json::from_value(json!({ "address": " " })).unwrap();
        assert!(check.validate().is_err());
    }
}
