use crate::connection::SendMessage;
use reqwest::blocking::Client;
use reqwest::Error as RequestError;
use reqwest::StatusCode;
use std::time::Duration;

/// A GET whose only interesting outcome is the status code.
#[derive(Debug, Clone, Copy)]
pub struct StatusRequest<'a> {
    pub url: &'a str,
    pub timeout: Duration,
}

impl<'a> SendMessage<StatusRequest<'a>, Result<StatusCode, RequestError>> for Client {
    fn send(&self, data: StatusRequest<'a>) -> Result<StatusCode, RequestError> {
        let response = self.get(data.url).timeout(data.timeout).send()?;
        Ok(response.status())
    }
}

/// Client for readiness checks. Certificates are not verified: test
/// environments routinely serve self-signed ones.
pub fn insecure_client(request_timeout: Duration) -> Result<Client, RequestError> {
    Client::builder()
        .timeout(request_timeout)
        .danger_accept_invalid_certs(true)
        .build()
}
