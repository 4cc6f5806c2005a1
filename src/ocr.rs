//! Azure Document Intelligence (prebuilt-layout) client.
//!
//! Submits a PDF, polls the returned `operation-location` until the operation
//! leaves the running state, and turns the result into plain text plus dense
//! table grids. HTTP 429 anywhere in a cycle restarts the whole
//! submit-and-poll cycle with exponential backoff.

use crate::config::{AnalysisCredentials, Config, PollPolicy, RetryPolicy};
use crate::error::{AppError, Result};
use crate::http::{HttpResponse, HttpTransport, TransportError};
use crate::types::ExtractedTable;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ANALYZE_PATH: &str =
    "formrecognizer/documentModels/prebuilt-layout:analyze?api-version=2023-07-31";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const FAILURE_CONTEXT: &str = "Document analysis failed";

/// Extracted text and tables, plus how many submit-and-poll cycles it took.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub text: String,
    pub tables: Vec<ExtractedTable>,
    pub attempts: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationStatus {
    #[serde(default)]
    status: String,
    analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    pages: Vec<Page>,
    #[serde(default)]
    tables: Vec<Table>,
}

#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    lines: Vec<Line>,
}

#[derive(Debug, Deserialize)]
struct Line {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Table {
    #[serde(default)]
    row_count: usize,
    #[serde(default)]
    column_count: usize,
    #[serde(default)]
    cells: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableCell {
    #[serde(default)]
    row_index: usize,
    #[serde(default)]
    column_index: usize,
    #[serde(default)]
    content: String,
}

/// Outcome of one submit-and-poll cycle that did not succeed.
enum CycleError {
    RateLimited,
    Fatal(AppError),
}

impl From<AppError> for CycleError {
    fn from(e: AppError) -> Self {
        CycleError::Fatal(e)
    }
}

pub struct AnalysisClient {
    transport: Arc<dyn HttpTransport>,
    credentials: AnalysisCredentials,
    retry: RetryPolicy,
    poll: PollPolicy,
}

impl AnalysisClient {
    /// Fails with a configuration error when credentials are missing or malformed.
    pub fn new(transport: Arc<dyn HttpTransport>, config: &Config) -> Result<Self> {
        Ok(Self {
            transport,
            credentials: config.analysis_credentials()?,
            retry: config.analysis_retry.clone(),
            poll: config.analysis_poll.clone(),
        })
    }

    /// Read the file at `path` and analyze it.
    pub fn analyze_file(&self, path: &Path, original_filename: &str) -> Result<AnalysisOutcome> {
        let bytes = fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::Validation("File not found.".to_string())
            } else {
                AppError::Io(e)
            }
        })?;
        self.analyze(&bytes, original_filename)
    }

    /// Run submit-and-poll, retrying the whole cycle while rate limited.
    pub fn analyze(&self, bytes: &[u8], original_filename: &str) -> Result<AnalysisOutcome> {
        let max_attempts = self.retry.max_attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.submit_and_poll(bytes, original_filename) {
                Ok((text, tables)) => {
                    info!(
                        file = original_filename,
                        attempts = attempt,
                        tables = tables.len(),
                        "document analysis succeeded"
                    );
                    return Ok(AnalysisOutcome {
                        text,
                        tables,
                        attempts: attempt,
                    });
                }
                Err(CycleError::RateLimited) if attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt - 1);
                    warn!(
                        "Rate limited. Retrying in {}ms... (attempt {}/{})",
                        delay.as_millis(),
                        attempt,
                        self.retry.max_retries
                    );
                    std::thread::sleep(delay);
                }
                Err(CycleError::RateLimited) => {
                    warn!(attempts = attempt, "rate limit persisted, giving up");
                    return Err(AppError::RateLimited { attempts: attempt });
                }
                Err(CycleError::Fatal(e)) => {
                    warn!(attempt, error = %e, "document analysis failed");
                    return Err(e);
                }
            }
        }
    }

    fn submit_and_poll(
        &self,
        bytes: &[u8],
        original_filename: &str,
    ) -> std::result::Result<(String, Vec<ExtractedTable>), CycleError> {
        let url = format!("{}{}", self.credentials.endpoint, ANALYZE_PATH);
        let headers = [(KEY_HEADER, self.credentials.key.as_str())];

        let response = self
            .transport
            .post_file(
                &url,
                &headers,
                "file",
                original_filename,
                "application/pdf",
                bytes.to_vec(),
            )
            .map_err(transport_failure)?;
        check_status(&response)?;

        let location = response
            .header("operation-location")
            .ok_or_else(|| AppError::Upstream {
                context: FAILURE_CONTEXT.to_string(),
                detail: "No operation location received from Content Understanding API"
                    .to_string(),
            })?
            .to_string();
        debug!(%location, "analysis submitted");

        let mut last_status = String::from("running");
        for poll in 1..=self.poll.max_attempts {
            std::thread::sleep(self.poll.interval);
            let response = self
                .transport
                .get(&location, &headers)
                .map_err(transport_failure)?;
            check_status(&response)?;
            let operation: OperationStatus =
                response.json().map_err(|e| AppError::Upstream {
                    context: FAILURE_CONTEXT.to_string(),
                    detail: format!("Invalid JSON: {}", e),
                })?;
            debug!(poll, status = %operation.status, "analysis status");
            match operation.status.as_str() {
                "succeeded" => {
                    return Ok(extract_content(operation.analyze_result.unwrap_or_default()));
                }
                "running" | "notStarted" => last_status = operation.status.clone(),
                other => {
                    return Err(AppError::AnalysisFailed {
                        status: other.to_string(),
                    }
                    .into())
                }
            }
        }
        Err(AppError::AnalysisTimedOut {
            status: last_status,
            polls: self.poll.max_attempts,
        }
        .into())
    }
}

fn check_status(response: &HttpResponse) -> std::result::Result<(), CycleError> {
    if response.is_success() {
        return Ok(());
    }
    let err = match response.status {
        429 => return Err(CycleError::RateLimited),
        401 => AppError::Authentication,
        413 => AppError::PayloadTooLarge,
        400 => AppError::InvalidDocument,
        status => AppError::Upstream {
            context: FAILURE_CONTEXT.to_string(),
            detail: match response.body_detail() {
                Some(detail) => format!("HTTP {}: {}", status, detail),
                None => format!("HTTP {}", status),
            },
        },
    };
    Err(CycleError::Fatal(err))
}

fn transport_failure(e: TransportError) -> CycleError {
    CycleError::Fatal(match e {
        TransportError::Timeout => AppError::Timeout {
            service: "document analysis".to_string(),
        },
        other => AppError::Upstream {
            context: FAILURE_CONTEXT.to_string(),
            detail: other.to_string(),
        },
    })
}

/// Line text in document order, then every table under a `TABLES` banner.
fn extract_content(result: AnalyzeResult) -> (String, Vec<ExtractedTable>) {
    let mut text = String::new();
    for line in result.pages.iter().flat_map(|p| p.lines.iter()) {
        text.push_str(&line.content);
        text.push('\n');
    }

    let tables: Vec<ExtractedTable> = result
        .tables
        .iter()
        .enumerate()
        .map(|(i, t)| materialize_table(i + 1, t))
        .collect();

    if !tables.is_empty() {
        text.push_str("\n\n=== TABLES ===\n\n");
        for table in &tables {
            text.push_str(&render_table(table));
        }
    }

    (text.trim_end().to_string(), tables)
}

/// Dense `row_count × column_count` grid; cells the service omitted stay empty.
fn materialize_table(index: usize, table: &Table) -> ExtractedTable {
    let mut data = vec![vec![String::new(); table.column_count]; table.row_count];
    for cell in &table.cells {
        match data
            .get_mut(cell.row_index)
            .and_then(|row| row.get_mut(cell.column_index))
        {
            Some(slot) => *slot = cell.content.clone(),
            None => warn!(
                table = index,
                row = cell.row_index,
                column = cell.column_index,
                "table cell outside declared bounds, skipped"
            ),
        }
    }
    ExtractedTable {
        index,
        row_count: table.row_count,
        column_count: table.column_count,
        data,
    }
}

fn render_table(table: &ExtractedTable) -> String {
    let mut out = format!(
        "\n--- Table {} ({} rows x {} columns) ---\n",
        table.index, table.row_count, table.column_count
    );
    for row in &table.data {
        out.push_str(&row.join(" | "));
        out.push('\n');
    }
    out.push('\n');
    out
}
