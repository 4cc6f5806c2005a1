//! Operation surface: documents, templates, fill jobs, exports and chat.
//!
//! A route layer maps each method one-to-one; `AppError`'s display strings
//! are the messages it returns.

use crate::answer::{AnswerClient, AnswerSource};
use crate::config::{Config, ConfigStatus};
use crate::error::{AppError, Result};
use crate::excel;
use crate::http::{HttpTransport, ReqwestTransport};
use crate::jobs::FillJobEngine;
use crate::ocr::AnalysisClient;
use crate::store::{MemoryStore, Store};
use crate::types::{
    DocumentAnalysis, ExportDescriptor, ExportMode, FillJob, FillJobTicket, FilledWorkbook,
    SpreadsheetTemplate,
};
use crate::util::{create_id, has_extension, output_base_name};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub struct Workbench {
    config: Config,
    transport: Arc<dyn HttpTransport>,
    documents: MemoryStore<DocumentAnalysis>,
    templates: MemoryStore<SpreadsheetTemplate>,
    artifacts: Arc<dyn Store<FilledWorkbook>>,
    engine: FillJobEngine,
}

impl Workbench {
    /// Production wiring: blocking reqwest client with the configured timeout.
    pub fn new(config: Config) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout).map_err(|e| {
            AppError::Upstream {
                context: "Could not build HTTP client".to_string(),
                detail: e.to_string(),
            }
        })?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: Config, transport: Arc<dyn HttpTransport>) -> Self {
        let jobs: Arc<dyn Store<FillJob>> = Arc::new(MemoryStore::new());
        let artifacts: Arc<dyn Store<FilledWorkbook>> = Arc::new(MemoryStore::new());
        let engine = FillJobEngine::new(jobs, artifacts.clone(), config.uploads_dir.clone());
        Self {
            config,
            transport,
            documents: MemoryStore::new(),
            templates: MemoryStore::new(),
            artifacts,
            engine,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Analyze an uploaded PDF and keep its text and tables. The file at `path`
    /// belongs to the workbench from here on and is removed with the document.
    pub fn submit_document(&self, path: &Path, original_filename: &str) -> Result<DocumentAnalysis> {
        if !has_extension(original_filename, "pdf") {
            return Err(AppError::Validation("Only .pdf files are allowed".to_string()));
        }
        if !path.is_file() {
            return Err(AppError::Validation("File not found.".to_string()));
        }
        let client = AnalysisClient::new(self.transport.clone(), &self.config)?;

        let outcome = client.analyze_file(path, original_filename)?;

        let id = create_id("doc");
        let analysis = DocumentAnalysis {
            id: id.clone(),
            original_filename: original_filename.to_string(),
            extracted_text: outcome.text,
            extracted_tables: outcome.tables,
            upload_timestamp: Utc::now(),
            source_path: Some(path.to_path_buf()),
        };
        self.documents.put(&id, analysis.clone());
        info!(
            document_id = %id,
            filename = original_filename,
            chars = analysis.extracted_text.len(),
            tables = analysis.extracted_tables.len(),
            attempts = outcome.attempts,
            "document analyzed"
        );
        Ok(analysis)
    }

    pub fn get_document(&self, id: &str) -> Result<DocumentAnalysis> {
        self.documents
            .get(id)
            .ok_or_else(|| AppError::not_found("Document analysis", id))
    }

    pub fn list_documents(&self) -> Vec<DocumentAnalysis> {
        self.documents.list().into_iter().map(|(_, doc)| doc).collect()
    }

    /// Stored PDF of an analyzed document.
    pub fn document_file(&self, id: &str) -> Result<PathBuf> {
        self.get_document(id)?
            .source_path
            .filter(|p| p.exists())
            .ok_or_else(|| AppError::not_found("PDF file", id))
    }

    /// Drop the analysis and its stored PDF. Running jobs keep their captured text.
    pub fn delete_document(&self, id: &str) -> Result<DocumentAnalysis> {
        let analysis = self
            .documents
            .delete(id)
            .ok_or_else(|| AppError::not_found("File", id))?;
        if let Some(path) = &analysis.source_path {
            remove_file_logged(path);
        }
        info!(document_id = %id, "document deleted");
        Ok(analysis)
    }

    /// Register an `.xlsx` questionnaire.
    pub fn register_template(&self, path: &Path, original_filename: &str) -> Result<SpreadsheetTemplate> {
        if !has_extension(original_filename, "xlsx") {
            return Err(AppError::Validation("Only .xlsx files are allowed".to_string()));
        }
        excel::validate_workbook_container(path)?;

        let id = create_id("excel");
        let template = SpreadsheetTemplate {
            id: id.clone(),
            original_filename: original_filename.to_string(),
            storage_path: path.to_path_buf(),
            upload_timestamp: Utc::now(),
        };
        self.templates.put(&id, template.clone());
        info!(template_id = %id, filename = original_filename, "template registered");
        Ok(template)
    }

    /// Start a fill job answered by the configured chat deployment.
    ///
    /// The filled copy has its images and drawings removed (see
    /// `excel::AnswerWriter::save_as`); the registered template keeps them.
    pub fn start_fill_job(&self, template_id: &str, document_id: &str) -> Result<FillJobTicket> {
        let (template, analysis) = self.fill_inputs(template_id, document_id)?;
        let answers = AnswerClient::new(self.transport.clone(), &self.config)?;
        self.engine.start(&template, &analysis, Arc::new(answers))
    }

    /// Start a fill job with a caller-supplied answer source.
    pub fn start_fill_job_with(
        &self,
        template_id: &str,
        document_id: &str,
        answers: Arc<dyn AnswerSource>,
    ) -> Result<FillJobTicket> {
        let (template, analysis) = self.fill_inputs(template_id, document_id)?;
        self.engine.start(&template, &analysis, answers)
    }

    fn fill_inputs(
        &self,
        template_id: &str,
        document_id: &str,
    ) -> Result<(SpreadsheetTemplate, DocumentAnalysis)> {
        let template = self
            .templates
            .get(template_id)
            .ok_or_else(|| AppError::not_found("Excel template", template_id))?;
        let analysis = self.get_document(document_id)?;
        Ok((template, analysis))
    }

    pub fn job_progress(&self, job_id: &str) -> Result<FillJob> {
        self.engine.progress(job_id)
    }

    /// Write the document's tables to a new workbook.
    pub fn export_tables(&self, document_id: &str, mode: ExportMode) -> Result<ExportDescriptor> {
        let analysis = self.get_document(document_id)?;
        if analysis.extracted_tables.is_empty() {
            return Err(AppError::Validation(
                "No tables found in this document".to_string(),
            ));
        }
        let base = output_base_name(&analysis.original_filename, "tables");
        let filename = match mode {
            ExportMode::PerTable => format!("{}_tables.xlsx", base),
            ExportMode::SingleSheet => format!("{}_single_tab.xlsx", base),
        };
        let export_id = create_id("export");
        fs::create_dir_all(&self.config.uploads_dir)?;
        let storage_path = self
            .config
            .uploads_dir
            .join(format!("{}-{}", export_id, filename));
        excel::export_tables(&analysis.extracted_tables, mode, &storage_path)?;

        self.artifacts.put(
            &export_id,
            FilledWorkbook {
                id: export_id.clone(),
                filename: filename.clone(),
                storage_path,
                created_timestamp: Utc::now(),
            },
        );
        info!(export_id = %export_id, document_id, ?mode, "tables exported");
        Ok(ExportDescriptor {
            export_id,
            filename,
            table_count: analysis.extracted_tables.len(),
        })
    }

    /// Download lookup for fill outputs and exports.
    pub fn filled_workbook(&self, id: &str) -> Result<FilledWorkbook> {
        self.artifacts
            .get(id)
            .filter(|w| w.storage_path.exists())
            .ok_or_else(|| AppError::not_found("Filled workbook", id))
    }

    /// Chat about a document; an unknown `document_id` falls back to no context.
    pub fn chat(&self, message: &str, document_id: Option<&str>) -> Result<String> {
        if message.trim().is_empty() {
            return Err(AppError::Validation("No message provided".to_string()));
        }
        let context = document_id
            .and_then(|id| self.documents.get(id))
            .map(|doc| doc.extracted_text);
        let client = AnswerClient::new(self.transport.clone(), &self.config)?;
        client.chat(message, context.as_deref())
    }

    pub fn config_status(&self) -> ConfigStatus {
        self.config.status()
    }
}

fn remove_file_logged(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "file deleted"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not delete file"),
    }
}
