use crate::app::context::Scope;
use crate::check::{poll, Attempt, ReadinessCheck, Readiness, Timing};
use crate::configuration::constants::readiness::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_STATUS};
use crate::connection::http::{insecure_client, StatusRequest};
use crate::connection::SendMessage;
use crate::error::{CheckError, ValidationError};
use derivative::*;
use reqwest::blocking::Client;
use serde_derive::{Deserialize, Serialize};
use std::cmp::min;
use std::convert::TryFrom;
use std::time::Duration;

/// Ready once a GET on `url` answers with `status`.
#[derive(Clone, Derivative, Serialize, Deserialize)]
#[derivative(Debug)]
#[serde(try_from = "HttpGetFields", into = "HttpGetFields")]
pub struct HttpGet {
    pub url: String,
    pub status: u16,
    pub timing: Timing,
    pub request_timeout: Duration,
    #[derivative(Debug = "ignore")]
    client: Client,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpGetFields {
    url: String,
    #[serde(default)]
    status: Option<u16>,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    timeout: Option<Duration>,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    request_timeout: Option<Duration>,
    #[serde(default, with = "crate::configuration::deserialize::optional_duration")]
    interval: Option<Duration>,
}

impl TryFrom<HttpGetFields> for HttpGet {
    type Error = reqwest::Error;

    fn try_from(fields: HttpGetFields) -> Result<Self, Self::Error> {
        let request_timeout = fields.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        Ok(Self {
            url: fields.url,
            status: fields.status.unwrap_or(DEFAULT_STATUS),
            timing: Timing::resolve(fields.interval, fields.timeout),
            request_timeout,
            client: insecure_client(request_timeout)?,
        })
    }
}

impl From<HttpGet> for HttpGetFields {
    fn from(check: HttpGet) -> Self {
        Self {
            url: check.url,
            status: Some(check.status),
            timeout: Some(check.timing.timeout),
            request_timeout: Some(check.request_timeout),
            interval: Some(check.timing.interval),
        }
    }
}

impl ReadinessCheck for HttpGet {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::Invalid("httpGet check has an empty `url`".to_owned()));
        }
        if !(100..=599).contains(&self.status) {
            return Err(ValidationError::Invalid(format!(
                "httpGet check expects status {}, which is not an HTTP status",
                self.status
            )));
        }
        Ok(())
    }

    fn wait_for_ready(&self, scope: &Scope) -> Result<Readiness, CheckError> {
        let url = scope.context.apply(&self.url)?;
        let expectation = format!("return {}", self.status);
        let readiness = poll("httpGet", self.timing, &url, &expectation, scope, |left| {
            let request = StatusRequest {
                url: &url,
                timeout: min(self.request_timeout, left),
            };
            match self.client.send(request) {
                Ok(status) if status.as_u16() == self.status => Attempt::Ready,
                Ok(status) => Attempt::NotYet(format!("status {}", status.as_u16())),
                Err(err) => Attempt::NotYet(err.to_string()),
            }
        })?;
        Ok(readiness)
    }
}
