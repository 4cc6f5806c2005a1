//! Background workbook fill jobs.
//!
//! A job snapshots the template, classifies it once into a question plan and
//! then answers the plan row by row on its own thread. Progress is read from
//! the job store while the worker runs.

use crate::answer::{AnswerSource, MAX_ANSWER_CHARS};
use crate::error::{AppError, Result};
use crate::excel::{is_zip_container, AnswerWriter, CellAnswer};
use crate::services::question_scanner::{scan_workbook, Question};
use crate::store::Store;
use crate::types::{
    DocumentAnalysis, FillJob, FillJobTicket, FillResult, FilledWorkbook, JobStatus,
    SpreadsheetTemplate,
};
use crate::util::{create_id, output_base_name, sanitize_filename, truncate_chars};
use chrono::Utc;
use std::any::Any;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Written when the answer source returns an empty answer.
pub const EMPTY_ANSWER: &str = "N/A";

pub struct FillJobEngine {
    jobs: Arc<dyn Store<FillJob>>,
    artifacts: Arc<dyn Store<FilledWorkbook>>,
    uploads_dir: PathBuf,
}

/// Everything the worker thread owns.
struct FillTask {
    job_id: String,
    snapshot: PathBuf,
    questions: Vec<Question>,
    context: String,
    base_name: String,
    answers: Arc<dyn AnswerSource>,
    jobs: Arc<dyn Store<FillJob>>,
    artifacts: Arc<dyn Store<FilledWorkbook>>,
    uploads_dir: PathBuf,
}

impl FillJobEngine {
    pub fn new(
        jobs: Arc<dyn Store<FillJob>>,
        artifacts: Arc<dyn Store<FilledWorkbook>>,
        uploads_dir: PathBuf,
    ) -> Self {
        Self {
            jobs,
            artifacts,
            uploads_dir,
        }
    }

    /// Validate, snapshot and scan the template, record the job and start the
    /// worker. Returns once the job is visible as `processing`.
    pub fn start(
        &self,
        template: &SpreadsheetTemplate,
        analysis: &DocumentAnalysis,
        answers: Arc<dyn AnswerSource>,
    ) -> Result<FillJobTicket> {
        if !template.storage_path.exists() {
            return Err(AppError::Validation(
                "Excel file not found on server".to_string(),
            ));
        }
        if !is_zip_container(&template.storage_path) {
            return Err(AppError::Validation(
                "Excel file is not a valid .xlsx workbook".to_string(),
            ));
        }

        let job_id = create_id("fillJob");
        fs::create_dir_all(&self.uploads_dir)?;
        let snapshot = self.uploads_dir.join(format!(
            "{}-{}",
            job_id,
            sanitize_filename(&template.original_filename)
        ));
        fs::copy(&template.storage_path, &snapshot)?;

        let plan = match scan_workbook(&snapshot) {
            Ok(plan) => plan,
            Err(e) => {
                remove_snapshot(&snapshot);
                return Err(e);
            }
        };
        let total = plan.total();
        debug!(job_id = %job_id, total, markers = plan.markers.len(), "question plan ready");

        self.jobs.put(
            &job_id,
            FillJob {
                id: job_id.clone(),
                status: JobStatus::Processing,
                current: 0,
                total,
                start_time: Utc::now(),
                error: None,
                result: None,
            },
        );

        let task = FillTask {
            job_id: job_id.clone(),
            snapshot: snapshot.clone(),
            questions: plan.questions,
            context: analysis.extracted_text.clone(),
            base_name: output_base_name(&analysis.original_filename, "document"),
            answers,
            jobs: self.jobs.clone(),
            artifacts: self.artifacts.clone(),
            uploads_dir: self.uploads_dir.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("fill-{}", job_id))
            .spawn(move || task.run_guarded());
        if let Err(e) = spawned {
            let message = format!("Could not start fill job: {}", e);
            mark_failed(self.jobs.as_ref(), &job_id, &message);
            remove_snapshot(&snapshot);
            return Err(AppError::Io(e));
        }

        info!(
            job_id = %job_id,
            template = %template.id,
            document = %analysis.id,
            total,
            "fill job started"
        );
        Ok(FillJobTicket { job_id, total })
    }

    /// Current snapshot of a job.
    pub fn progress(&self, job_id: &str) -> Result<FillJob> {
        self.jobs
            .get(job_id)
            .ok_or_else(|| AppError::not_found("Job", job_id))
    }
}

impl FillTask {
    /// Run the fill, turning errors and panics into the job's error state.
    fn run_guarded(self) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run()));
        match outcome {
            Ok(Ok(result)) => {
                info!(job_id = %self.job_id, filled_id = %result.filled_id, "fill job complete");
                self.jobs.update(&self.job_id, &mut |job: &mut FillJob| {
                    job.status = JobStatus::Complete;
                    job.result = Some(result.clone());
                });
            }
            Ok(Err(e)) => {
                error!(job_id = %self.job_id, error = %e, "fill job failed");
                mark_failed(self.jobs.as_ref(), &self.job_id, &e.to_string());
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(job_id = %self.job_id, panic = %message, "fill job panicked");
                mark_failed(self.jobs.as_ref(), &self.job_id, &message);
            }
        }
        remove_snapshot(&self.snapshot);
    }

    fn run(&self) -> Result<FillResult> {
        let mut writer = AnswerWriter::open(&self.snapshot)?;
        for question in &self.questions {
            let payload = self.answers.answer(&question.text, &self.context);
            let answer = payload.answer.trim();
            let text = if answer.is_empty() {
                EMPTY_ANSWER.to_string()
            } else {
                truncate_chars(answer, MAX_ANSWER_CHARS)
            };
            writer.write_answer(&CellAnswer {
                sheet: &question.sheet,
                row: question.row,
                text: &text,
            })?;
            self.jobs.update(&self.job_id, &mut |job: &mut FillJob| job.current += 1);
            debug!(
                job_id = %self.job_id,
                sheet = %question.sheet,
                row = question.row,
                confidence = payload.confidence,
                "question answered"
            );
        }

        let filled_id = create_id("filled");
        let filename = format!("{}_filled.xlsx", self.base_name);
        let storage_path = self.uploads_dir.join(format!("{}-{}", filled_id, filename));
        writer.save_as(&storage_path)?;

        self.artifacts.put(
            &filled_id,
            FilledWorkbook {
                id: filled_id.clone(),
                filename: filename.clone(),
                storage_path,
                created_timestamp: Utc::now(),
            },
        );
        Ok(FillResult {
            download_url: format!("/download-filled-excel/{}", filled_id),
            filled_id,
            filename,
        })
    }
}

fn mark_failed(jobs: &dyn Store<FillJob>, job_id: &str, message: &str) {
    jobs.update(job_id, &mut |job: &mut FillJob| {
        job.status = JobStatus::Error;
        job.error = Some(message.to_string());
    });
}

fn remove_snapshot(path: &std::path::Path) {
    if let Err(e) = fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "could not remove template snapshot");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Fill job panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Fill job panicked: {}", s)
    } else {
        "Fill job panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::AnswerPayload;
    use calamine::{open_workbook_auto, DataType, Reader};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct Echo {
        seen: Mutex<Vec<String>>,
    }

    impl AnswerSource for Echo {
        fn answer(&self, question: &str, context: &str) -> AnswerPayload {
            self.seen.lock().unwrap().push(question.to_string());
            let answer = match question {
                "Blank?" => String::new(),
                "Long?" => "x".repeat(400),
                _ => format!("{} / {}", question, context),
            };
            AnswerPayload {
                answer,
                confidence: 0.9,
                evidence_snippet: String::new(),
                marker: String::new(),
            }
        }
    }

    struct Panics;

    impl AnswerSource for Panics {
        fn answer(&self, _question: &str, _context: &str) -> AnswerPayload {
            panic!("answer source exploded");
        }
    }

    fn template(dir: &Path) -> SpreadsheetTemplate {
        let path = dir.join("template.xlsx");
        let mut wb = rust_xlsxwriter::Workbook::new();
        let ws = wb.add_worksheet();
        ws.set_name("Sheet1").unwrap();
        ws.write_string(0, 0, "A.1").unwrap();
        ws.write_string(1, 0, "Name?").unwrap();
        ws.write_string(2, 0, "Blank?").unwrap();
        ws.write_string(3, 0, "B.2 Details").unwrap();
        ws.write_string(4, 0, "Long?").unwrap();
        wb.save(&path).unwrap();
        SpreadsheetTemplate {
            id: "excel-1".into(),
            original_filename: "questions.xlsx".into(),
            storage_path: path,
            upload_timestamp: Utc::now(),
        }
    }

    fn analysis() -> DocumentAnalysis {
        DocumentAnalysis {
            id: "doc-1".into(),
            original_filename: "Annual Report.pdf".into(),
            extracted_text: "ctx".into(),
            extracted_tables: vec![],
            upload_timestamp: Utc::now(),
            source_path: None,
        }
    }

    fn engine(uploads: &Path) -> (FillJobEngine, Arc<MemoryStore<FilledWorkbook>>) {
        let artifacts = Arc::new(MemoryStore::new());
        let engine = FillJobEngine::new(
            Arc::new(MemoryStore::new()),
            artifacts.clone(),
            uploads.to_path_buf(),
        );
        (engine, artifacts)
    }

    fn wait_terminal(engine: &FillJobEngine, job_id: &str) -> FillJob {
        let deadline = Instant::now() + Duration::from_secs(20);
        loop {
            let job = engine.progress(job_id).unwrap();
            if job.status.is_terminal() || Instant::now() > deadline {
                return job;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn cell(path: &Path, row: u32, col: u32) -> String {
        let mut wb = open_workbook_auto(path).unwrap();
        let range = wb.worksheet_range("Sheet1").unwrap();
        range
            .get_value((row, col))
            .and_then(|c| c.as_string())
            .unwrap_or_default()
    }

    #[test]
    fn fills_questions_and_skips_markers() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let (engine, artifacts) = engine(&uploads);
        let echo = Arc::new(Echo { seen: Mutex::new(vec![]) });

        let ticket = engine.start(&template(dir.path()), &analysis(), echo.clone()).unwrap();
        assert_eq!(ticket.total, 3);

        let job = wait_terminal(&engine, &ticket.job_id);
        assert_eq!(job.status, JobStatus::Complete, "error: {:?}", job.error);
        assert_eq!(job.current, job.total);
        assert_eq!(*echo.seen.lock().unwrap(), vec!["Name?", "Blank?", "Long?"]);

        let result = job.result.unwrap();
        assert_eq!(result.filename, "Annual_Report_filled.xlsx");
        assert_eq!(result.download_url, format!("/download-filled-excel/{}", result.filled_id));
        let filled = artifacts.get(&result.filled_id).unwrap();
        assert!(filled
            .storage_path
            .ends_with(format!("{}-Annual_Report_filled.xlsx", result.filled_id)));

        assert_eq!(cell(&filled.storage_path, 0, 1), "");
        assert_eq!(cell(&filled.storage_path, 1, 1), "Name? / ctx");
        assert_eq!(cell(&filled.storage_path, 2, 1), EMPTY_ANSWER);
        assert_eq!(cell(&filled.storage_path, 3, 1), "");
        assert_eq!(cell(&filled.storage_path, 4, 1).chars().count(), MAX_ANSWER_CHARS);
    }

    #[test]
    fn template_file_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(&dir.path().join("uploads"));
        let template = template(dir.path());
        let before = fs::read(&template.storage_path).unwrap();
        let echo = Arc::new(Echo { seen: Mutex::new(vec![]) });
        let ticket = engine.start(&template, &analysis(), echo).unwrap();
        wait_terminal(&engine, &ticket.job_id);
        assert_eq!(fs::read(&template.storage_path).unwrap(), before);
    }

    #[test]
    fn panic_in_worker_marks_job_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(&dir.path().join("uploads"));
        let ticket = engine
            .start(&template(dir.path()), &analysis(), Arc::new(Panics))
            .unwrap();
        let job = wait_terminal(&engine, &ticket.job_id);
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.current, 0);
        assert!(job.error.unwrap().contains("answer source exploded"));
        assert!(job.result.is_none());
    }

    #[test]
    fn non_zip_template_is_rejected_before_any_job() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(&dir.path().join("uploads"));
        let mut bad = template(dir.path());
        bad.storage_path = dir.path().join("legacy.xlsx");
        fs::write(&bad.storage_path, b"\xD0\xCF\x11\xE0").unwrap();
        let err = engine
            .start(&bad, &analysis(), Arc::new(Echo { seen: Mutex::new(vec![]) }))
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        bad.storage_path = dir.path().join("gone.xlsx");
        let err = engine
            .start(&bad, &analysis(), Arc::new(Echo { seen: Mutex::new(vec![]) }))
            .unwrap_err();
        assert_eq!(err.to_string(), "Excel file not found on server");
    }

    #[test]
    fn unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path());
        let err = engine.progress("fillJob-0-00000000").unwrap_err();
        assert!(matches!(err, AppError::NotFound { kind: "Job", .. }));
    }
}
