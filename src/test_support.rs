//! Scripted doubles shared by unit tests.

use crate::http::{HttpResponse, HttpTransport, TransportResult};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: &'static str,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

/// Replays queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<TransportResult>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<TransportResult>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Queued responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }

    fn next(&self, method: &'static str, url: &str, body: Option<serde_json::Value>) -> TransportResult {
        self.requests.lock().unwrap().push(RecordedRequest {
            method,
            url: url.to_string(),
            body,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected {} {}", method, url))
    }
}

impl HttpTransport for ScriptedTransport {
    fn post_file(
        &self,
        url: &str,
        _headers: &[(&str, &str)],
        _field: &str,
        _filename: &str,
        _content_type: &str,
        _bytes: Vec<u8>,
    ) -> TransportResult {
        self.next("POST", url, None)
    }

    fn get(&self, url: &str, _headers: &[(&str, &str)]) -> TransportResult {
        self.next("GET", url, None)
    }

    fn post_json(
        &self,
        url: &str,
        _headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> TransportResult {
        self.next("POST", url, Some(body.clone()))
    }
}

pub fn accepted(location: &str) -> TransportResult {
    Ok(HttpResponse::new(202, "").with_header("operation-location", location))
}

pub fn status(code: u16, body: &str) -> TransportResult {
    Ok(HttpResponse::new(code, body))
}

pub fn ok_json(value: serde_json::Value) -> TransportResult {
    Ok(HttpResponse::new(200, value.to_string()))
}

/// Chat-completions response whose message content is `content`.
pub fn chat_reply(content: &str) -> TransportResult {
    ok_json(serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}
