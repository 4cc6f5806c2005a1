//! Document analysis and questionnaire workbook filling.
//!
//! PDFs are analyzed by Azure Document Intelligence; questionnaires (`.xlsx`)
//! are filled in the background with answers from an Azure OpenAI deployment.
//! [`workbench::Workbench`] is the entry point.

pub mod answer;
pub mod config;
pub mod error;
pub mod excel;
pub mod http;
pub mod jobs;
pub mod logging;
pub mod ocr;
pub mod store;
pub mod types;
pub mod util;
pub mod workbench;

pub mod services {
    pub mod question_scanner;
}

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use error::{AppError, Result};
pub use workbench::Workbench;
