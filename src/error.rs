//! Error type shared by the clients, the job engine and the workbench facade.
//!
//! Display strings are user-facing: a route layer can return them as-is.

/// Errors surfaced by workbench operations.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing or placeholder credential, or malformed endpoint URL. Never retried.
    #[error("{message}")]
    Config { field: String, message: String },

    /// Rate limiting persisted through every retry.
    #[error(
        "Rate limit exceeded. Please wait a few minutes before uploading more files. (Tried {attempts} times)"
    )]
    RateLimited { attempts: u32 },

    #[error("Authentication failed - please check your API key")]
    Authentication,

    #[error("File too large for Content Understanding service")]
    PayloadTooLarge,

    #[error("Invalid PDF file format or corrupted file")]
    InvalidDocument,

    #[error("Request to {service} timed out. Please try again.")]
    Timeout { service: String },

    /// Any other upstream failure, carrying the upstream detail when available.
    #[error("{context}: {detail}")]
    Upstream { context: String, detail: String },

    /// The analysis operation ended (or stopped being polled) in a non-success state.
    #[error("Document analysis failed with status: {status}")]
    AnalysisFailed { status: String },

    #[error("Document analysis timed out after {polls} status checks (last status: {status})")]
    AnalysisTimedOut { status: String, polls: u32 },

    #[error("{0}")]
    Validation(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Workbook error: {0}")]
    Workbook(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AppError {
    pub fn config(field: &str, message: impl Into<String>) -> Self {
        AppError::Config {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: &str) -> Self {
        AppError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Configuration errors propagate immediately and are never retried.
    pub fn is_config(&self) -> bool {
        matches!(self, AppError::Config { .. })
    }
}

impl From<calamine::Error> for AppError {
    fn from(e: calamine::Error) -> Self {
        AppError::Workbook(format!("Could not open Excel file: {}", e))
    }
}

impl From<rust_xlsxwriter::XlsxError> for AppError {
    fn from(e: rust_xlsxwriter::XlsxError) -> Self {
        AppError::Workbook(e.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(e: zip::result::ZipError) -> Self {
        AppError::Workbook(format!("Invalid zip container: {}", e))
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, AppError>;
