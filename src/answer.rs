//! Azure OpenAI chat-completions client for questionnaire answers.
//!
//! Every question gets a value: after the configured number of attempts the
//! client returns the `NOT FOUND` sentinel instead of an error.

use crate::config::{ChatCredentials, Config};
use crate::error::{AppError, Result};
use crate::http::{HttpResponse, HttpTransport, TransportError};
use crate::types::AnswerPayload;
use crate::util::truncate_chars;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const MAX_ANSWER_CHARS: usize = 250;
const TRUNCATION_MARKER: &str = "\n\n[...TRUNCATED...]\n\n";
const MAX_TOKENS: u32 = 800;
const TEMPERATURE: f64 = 0.7;

/// Source of answers for the fill job.
pub trait AnswerSource: Send + Sync {
    /// Never fails: implementations degrade to `AnswerPayload::sentinel`.
    fn answer(&self, question: &str, context: &str) -> AnswerPayload;
}

/// Keep the head and tail of oversized context around a visible marker.
pub fn truncate_context(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let half = max_chars / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(total - half).collect();
    format!("{}{}{}", head, TRUNCATION_MARKER, tail)
}

/// Parse `text` as JSON, or else the span from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let raw = text.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<Value>(raw) {
        return Some(value);
    }
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

fn trimmed_str(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
}

/// Validate a model reply: non-empty `answer` and a finite `confidence`
/// (number or numeric string). Confidence is clamped to [0, 1] and the answer
/// cut to 250 characters.
pub fn normalize_answer_payload(payload: &Value, marker: &str) -> Option<AnswerPayload> {
    let obj = payload.as_object()?;
    let answer = trimmed_str(payload, "answer").filter(|a| !a.is_empty())?;
    let confidence = match obj.get("confidence")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !confidence.is_finite() {
        return None;
    }
    let marker = trimmed_str(payload, "marker")
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| marker.to_string());
    Some(AnswerPayload {
        answer: truncate_chars(&answer, MAX_ANSWER_CHARS),
        confidence: confidence.clamp(0.0, 1.0),
        evidence_snippet: trimmed_str(payload, "evidence_snippet").unwrap_or_default(),
        marker,
    })
}

fn reply_content(response: &HttpResponse) -> Option<String> {
    let body: Value = response.json().ok()?;
    body.get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
        .map(str::to_string)
}

/// Upstream refused the `response_format` parameter.
fn rejects_structured_output(response: &HttpResponse) -> bool {
    response.status == 400 && response.body.contains("response_format")
}

pub struct AnswerClient {
    transport: Arc<dyn HttpTransport>,
    credentials: ChatCredentials,
    max_attempts: u32,
    context_max_chars: usize,
    /// Cleared the first time the deployment rejects `response_format`.
    structured_output: AtomicBool,
}

impl AnswerClient {
    /// Fails with a configuration error when chat credentials are missing or malformed.
    pub fn new(transport: Arc<dyn HttpTransport>, config: &Config) -> Result<Self> {
        Ok(Self {
            transport,
            credentials: config.chat_credentials()?,
            max_attempts: config.answer_attempts.max(1),
            context_max_chars: config.context_max_chars,
            structured_output: AtomicBool::new(true),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}openai/deployments/{}/chat/completions?api-version={}",
            self.credentials.endpoint, self.credentials.deployment, self.credentials.api_version
        )
    }

    fn post(&self, body: &Value) -> std::result::Result<HttpResponse, TransportError> {
        let headers = [
            ("api-key", self.credentials.api_key.as_str()),
            ("Content-Type", "application/json"),
        ];
        self.transport.post_json(&self.url(), &headers, body)
    }

    fn request_body(system: &str, user: &str, structured: bool) -> Value {
        let mut body = json!({
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user }
            ],
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });
        if structured {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    /// Ask for a structured answer; returns the sentinel when nothing valid comes back.
    pub fn generate_answer(&self, marker: &str, question: &str, context: &str) -> AnswerPayload {
        let marker = marker.trim();
        let question = question.trim();
        let context = truncate_context(context, self.context_max_chars);

        let system = format!(
            "You are a helpful assistant. Answer questions based on the following document content:\n\n\
             {}\n\n\
             All questions are in column A, all answers should be placed in Column B in the cell to the right. \
             If the answer cannot be found respond \"N/A\". \n\n\
             Return ONLY a single valid JSON object with EXACT keys: answer (string <= 250 chars), \
             confidence (number 0-1), evidence_snippet (string), marker (string). \
             Do not include any extra keys or text.",
            context
        );
        let user = format!(
            "marker: {}\nquestion: {}\nsection_text:\n{}",
            marker, question, context
        );

        for attempt in 1..=self.max_attempts {
            let structured = self.structured_output.load(Ordering::Relaxed);
            match self.post(&Self::request_body(&system, &user, structured)) {
                Ok(response) if response.is_success() => {
                    if let Some(payload) = self.parse_reply(&response, marker) {
                        return payload;
                    }
                    warn!(attempt, question, "answer reply failed validation");
                }
                Ok(response) if structured && rejects_structured_output(&response) => {
                    warn!("deployment rejected response_format, falling back to free-form replies");
                    self.structured_output.store(false, Ordering::Relaxed);
                    match self.post(&Self::request_body(&system, &user, false)) {
                        Ok(retry) if retry.is_success() => {
                            if let Some(payload) = self.parse_reply(&retry, marker) {
                                return payload;
                            }
                            warn!(attempt, question, "free-form reply held no valid answer");
                        }
                        Ok(retry) => warn!(
                            attempt,
                            status = retry.status,
                            detail = %retry.error_detail(),
                            "free-form answer request failed"
                        ),
                        Err(e) => warn!(attempt, error = %e, "free-form answer request failed"),
                    }
                }
                Ok(response) => warn!(
                    attempt,
                    status = response.status,
                    detail = %response.error_detail(),
                    "answer request failed"
                ),
                Err(e) => warn!(attempt, error = %e, "answer request failed"),
            }
        }

        warn!(question, attempts = self.max_attempts, "no valid answer, using sentinel");
        AnswerPayload::sentinel(marker)
    }

    fn parse_reply(&self, response: &HttpResponse, marker: &str) -> Option<AnswerPayload> {
        let content = reply_content(response)?;
        debug!(chars = content.len(), "answer reply received");
        let parsed = extract_json_object(&content)?;
        normalize_answer_payload(&parsed, marker)
    }

    /// Free-form question about a document (or general chat without one).
    pub fn chat(&self, message: &str, context: Option<&str>) -> Result<String> {
        let system = match context.filter(|c| !c.is_empty()) {
            Some(text) => format!(
                "You are a helpful assistant. Answer questions based on the following document content:\n\n{}",
                text
            ),
            None => "You are a helpful assistant.".to_string(),
        };
        let response = self
            .post(&Self::request_body(&system, message, false))
            .map_err(|e| match e {
                TransportError::Timeout => AppError::Timeout {
                    service: "chat completion".to_string(),
                },
                other => AppError::Upstream {
                    context: "Chat failed".to_string(),
                    detail: other.to_string(),
                },
            })?;
        if !response.is_success() {
            return Err(AppError::Upstream {
                context: "Chat failed".to_string(),
                detail: response.error_detail(),
            });
        }
        Ok(reply_content(&response)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "No response generated".to_string()))
    }
}

impl AnswerSource for AnswerClient {
    fn answer(&self, question: &str, context: &str) -> AnswerPayload {
        self.generate_answer("", question, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{chat_reply, status, ScriptedTransport};

    fn config() -> Config {
        Config::from_lookup(|name| match name {
            "AZURE_OPENAI_ENDPOINT" => Some("https://oai.example.com".into()),
            "AZURE_OPENAI_API_KEY" => Some("k".into()),
            "AZURE_OPENAI_DEPLOYMENT" => Some("gpt-4o".into()),
            _ => None,
        })
    }

    fn client(transport: &Arc<ScriptedTransport>) -> AnswerClient {
        AnswerClient::new(transport.clone(), &config()).unwrap()
    }

    #[test]
    fn string_confidence_is_coerced() {
        let payload = json!({
            "answer": "Paris",
            "confidence": "0.95",
            "evidence_snippet": "capital is Paris",
            "marker": "A.1"
        });
        let normalized = normalize_answer_payload(&payload, "").unwrap();
        assert_eq!(normalized.answer, "Paris");
        assert_eq!(normalized.confidence, 0.95);
        assert_eq!(normalized.evidence_snippet, "capital is Paris");
        assert_eq!(normalized.marker, "A.1");
    }

    #[test]
    fn confidence_is_clamped() {
        let high = json!({ "answer": "x", "confidence": 1.5 });
        assert_eq!(normalize_answer_payload(&high, "").unwrap().confidence, 1.0);
        let low = json!({ "answer": "x", "confidence": -0.2 });
        assert_eq!(normalize_answer_payload(&low, "").unwrap().confidence, 0.0);
    }

    #[test]
    fn invalid_payloads_are_rejected() {
        assert!(normalize_answer_payload(&json!({ "confidence": 0.5 }), "").is_none());
        assert!(normalize_answer_payload(&json!({ "answer": "  ", "confidence": 0.5 }), "").is_none());
        assert!(normalize_answer_payload(&json!({ "answer": "x" }), "").is_none());
        assert!(normalize_answer_payload(&json!({ "answer": "x", "confidence": "high" }), "").is_none());
        assert!(normalize_answer_payload(&json!({ "answer": "x", "confidence": "NaN" }), "").is_none());
        assert!(normalize_answer_payload(&json!(["answer"]), "").is_none());
    }

    #[test]
    fn answer_is_trimmed_and_truncated_and_marker_falls_back() {
        let long = format!("  {}  ", "a".repeat(300));
        let payload = json!({ "answer": long, "confidence": 0.4, "marker": " " });
        let normalized = normalize_answer_payload(&payload, "B.2").unwrap();
        assert_eq!(normalized.answer.chars().count(), MAX_ANSWER_CHARS);
        assert_eq!(normalized.marker, "B.2");
        assert_eq!(normalized.evidence_snippet, "");
    }

    #[test]
    fn json_object_recovered_from_prose() {
        let text = "Sure! Here you go:\n{\"answer\": \"42\", \"confidence\": 0.8}\nHope that helps.";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["answer"], "42");
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("} backwards {").is_none());
        assert!(extract_json_object("   ").is_none());
    }

    #[test]
    fn context_keeps_head_and_tail() {
        let text = format!("{}{}", "h".repeat(10), "t".repeat(10));
        let cut = truncate_context(&text, 8);
        assert_eq!(cut, format!("hhhh{}tttt", TRUNCATION_MARKER));
        assert_eq!(truncate_context("short", 8), "short");
    }

    #[test]
    fn structured_request_is_sent_to_deployment() {
        let transport = Arc::new(ScriptedTransport::new(vec![chat_reply(
            r#"{"answer":"Oslo","confidence":0.9,"evidence_snippet":"HQ Oslo","marker":""}"#,
        )]));
        let payload = client(&transport).generate_answer("", "Where is HQ?", "HQ Oslo");
        assert_eq!(payload.answer, "Oslo");

        let requests = transport.requests();
        assert_eq!(
            requests[0].url,
            "https://oai.example.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-02-15-preview"
        );
        let body = requests[0].body.as_ref().unwrap();
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert!(body["messages"][1]["content"]
            .as_str()
            .unwrap()
            .contains("question: Where is HQ?"));
    }

    #[test]
    fn invalid_reply_is_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            chat_reply(r#"{"confidence":0.9}"#),
            chat_reply(r#"{"answer":"Yes","confidence":"0.7"}"#),
        ]));
        let payload = client(&transport).generate_answer("", "q", "ctx");
        assert_eq!(payload.answer, "Yes");
        assert_eq!(payload.confidence, 0.7);
        assert_eq!(transport.requests().len(), 2);
    }

    #[test]
    fn exhausted_attempts_yield_sentinel() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            chat_reply("I am not sure."),
            status(500, "oops"),
            chat_reply(r#"{"answer":"","confidence":1}"#),
        ]));
        let payload = client(&transport).generate_answer("C.3", "q", "ctx");
        assert_eq!(payload, AnswerPayload::sentinel("C.3"));
        assert_eq!(payload.answer, "NOT FOUND");
        assert_eq!(payload.confidence, 0.0);
    }

    #[test]
    fn rejected_response_format_falls_back_to_free_form() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            status(400, r#"{"error":{"message":"Unrecognized request argument: response_format"}}"#),
            chat_reply("The answer is {\"answer\":\"Blue\",\"confidence\":0.6} as stated."),
        ]));
        let answers = client(&transport);
        let payload = answers.generate_answer("", "Color?", "The sky is blue");
        assert_eq!(payload.answer, "Blue");

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].body.as_ref().unwrap().get("response_format").is_none());
        assert!(!answers.structured_output.load(Ordering::Relaxed));
    }

    #[test]
    fn chat_returns_reply_text() {
        let transport = Arc::new(ScriptedTransport::new(vec![chat_reply("It was founded in 1999.")]));
        let reply = client(&transport).chat("When?", Some("Founded 1999")).unwrap();
        assert_eq!(reply, "It was founded in 1999.");
        let body = transport.requests()[0].body.clone().unwrap();
        assert!(body["messages"][0]["content"].as_str().unwrap().contains("Founded 1999"));
    }

    #[test]
    fn chat_surfaces_upstream_message() {
        let transport = Arc::new(ScriptedTransport::new(vec![status(
            404,
            r#"{"error":{"message":"DeploymentNotFound"}}"#,
        )]));
        let err = client(&transport).chat("hi", None).unwrap_err();
        assert_eq!(err.to_string(), "Chat failed: DeploymentNotFound");
    }
}
