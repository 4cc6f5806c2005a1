//! Outbound HTTP seam.
//!
//! The analysis and answer clients only see `HttpTransport`, so tests can
//! script upstream responses without a network.

use reqwest::blocking::{multipart, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Fully-read upstream response.
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.body)
    }

    /// `error.message` from an Azure-style error body, else the trimmed raw
    /// body. `None` for a blank body.
    pub fn body_detail(&self) -> Option<String> {
        if self.body.trim().is_empty() {
            return None;
        }
        let message = serde_json::from_str::<serde_json::Value>(&self.body)
            .ok()
            .and_then(|v| {
                v.get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
            });
        Some(message.unwrap_or_else(|| self.body.trim().to_string()))
    }

    /// `body_detail`, or `HTTP {status}` when the body is blank.
    pub fn error_detail(&self) -> String {
        self.body_detail()
            .unwrap_or_else(|| format!("HTTP {}", self.status))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

pub type TransportResult = Result<HttpResponse, TransportError>;

pub trait HttpTransport: Send + Sync {
    /// Multipart POST with a single file part.
    fn post_file(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        field: &str,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> TransportResult;

    fn get(&self, url: &str, headers: &[(&str, &str)]) -> TransportResult;

    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> TransportResult;
}

/// Blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn send(&self, request: RequestBuilder, headers: &[(&str, &str)]) -> TransportResult {
        let request = headers
            .iter()
            .fold(request, |req, (name, value)| req.header(*name, *value));
        let response = request.send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        let body = response.text()?;
        debug!(status, body_len = body.len(), "upstream response");
        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

impl HttpTransport for ReqwestTransport {
    fn post_file(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        field: &str,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> TransportResult {
        let part = multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(content_type)?;
        let form = multipart::Form::new().part(field.to_string(), part);
        self.send(self.client.post(url).multipart(form), headers)
    }

    fn get(&self, url: &str, headers: &[(&str, &str)]) -> TransportResult {
        self.send(self.client.get(url), headers)
    }

    fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> TransportResult {
        self.send(self.client.post(url).json(body), headers)
    }
}
