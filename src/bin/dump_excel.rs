//! Print the question plan of a workbook: every question row and every
//! section marker, as the fill job would see them.
//!
//! Usage: dump_excel <path.xlsx>

use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use workbook_filler_lib::excel::validate_workbook_container;
use workbook_filler_lib::logging;
use workbook_filler_lib::services::question_scanner::scan_workbook;

fn main() -> ExitCode {
    logging::init();
    let Some(path) = std::env::args().nth(1).map(PathBuf::from) else {
        eprintln!("usage: dump_excel <path.xlsx>");
        return ExitCode::from(2);
    };

    if let Err(e) = validate_workbook_container(&path) {
        error!(path = %path.display(), error = %e, "not a workbook");
        return ExitCode::FAILURE;
    }
    let plan = match scan_workbook(&path) {
        Ok(plan) => plan,
        Err(e) => {
            error!(path = %path.display(), error = %e, "scan failed");
            return ExitCode::FAILURE;
        }
    };

    println!("{} question(s), {} marker(s)", plan.total(), plan.markers.len());
    for marker in &plan.markers {
        println!("marker   {}!A{}  {}", marker.sheet, marker.row, marker.text);
    }
    for question in &plan.questions {
        println!("question {}!A{}  {}", question.sheet, question.row, question.text);
    }
    ExitCode::SUCCESS
}
