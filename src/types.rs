use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One table recovered by layout analysis, materialized as a dense grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedTable {
    /// 1-based position among the document's tables.
    pub index: usize,
    pub row_count: usize,
    pub column_count: usize,
    /// `row_count` rows of `column_count` cells; absent cells are empty strings.
    pub data: Vec<Vec<String>>,
}

/// Text and tables extracted from an uploaded PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAnalysis {
    pub id: String,
    pub original_filename: String,
    pub extracted_text: String,
    pub extracted_tables: Vec<ExtractedTable>,
    pub upload_timestamp: DateTime<Utc>,
    /// Uploaded PDF on disk; removed when the analysis is deleted.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

/// An uploaded `.xlsx` questionnaire. Never mutated by fill jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpreadsheetTemplate {
    pub id: String,
    pub original_filename: String,
    pub storage_path: PathBuf,
    pub upload_timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Complete,
    Error,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Processing)
    }
}

/// Download reference attached to a completed fill job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillResult {
    pub filled_id: String,
    pub filename: String,
    pub download_url: String,
}

/// Progress record of a background workbook fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillJob {
    pub id: String,
    pub status: JobStatus,
    pub current: usize,
    pub total: usize,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<FillResult>,
}

/// Returned when a fill job starts; the caller polls with `job_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillJobTicket {
    pub job_id: String,
    pub total: usize,
}

/// A generated workbook available for download (fill output or table export).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilledWorkbook {
    pub id: String,
    pub filename: String,
    pub storage_path: PathBuf,
    pub created_timestamp: DateTime<Utc>,
}

/// Structured answer for one question cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerPayload {
    pub answer: String,
    pub confidence: f64,
    pub evidence_snippet: String,
    pub marker: String,
}

impl AnswerPayload {
    pub const NOT_FOUND: &'static str = "NOT FOUND";

    /// Written when no valid answer could be obtained.
    pub fn sentinel(marker: &str) -> Self {
        Self {
            answer: Self::NOT_FOUND.to_string(),
            confidence: 0.0,
            evidence_snippet: String::new(),
            marker: marker.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExportMode {
    /// One worksheet per table.
    PerTable,
    /// All tables stacked on one worksheet.
    SingleSheet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDescriptor {
    pub export_id: String,
    pub filename: String,
    pub table_count: usize,
}
