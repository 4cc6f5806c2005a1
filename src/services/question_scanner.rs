//! Questionnaire scanning using calamine (rows reported 1-based).
//!
//! Column A of every worksheet is read top to bottom. Any cell whose rendered
//! text is non-empty (strings, numbers, booleans, dates) is a question unless
//! it looks like a section marker (`A.1`, `B.12 Intro`).

use crate::error::{AppError, Result};
use calamine::{open_workbook_auto, Reader};
use regex::Regex;
use serde::Serialize;
use std::path::Path;
use std::sync::OnceLock;

/// Uppercase letter, dot, digits, then a word boundary.
fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]\.[0-9]+\b").expect("marker regex"))
}

/// `true` for section headings such as `A.1` or `C.10 General`.
pub fn is_section_marker(text: &str) -> bool {
    marker_regex().is_match(text.trim())
}

/// One question row of a worksheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub sheet: String,
    /// 1-based row, as used in cell references (`B{row}`).
    pub row: u32,
    pub text: String,
}

/// Result of one classification pass over a workbook.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionPlan {
    pub questions: Vec<Question>,
    /// Section markers seen while scanning; never answered.
    pub markers: Vec<Question>,
}

impl QuestionPlan {
    pub fn total(&self) -> usize {
        self.questions.len()
    }
}

/// Scan every worksheet of the workbook at `path`, in workbook order.
pub fn scan_workbook(path: &Path) -> Result<QuestionPlan> {
    if !path.exists() {
        return Err(AppError::Validation("File not found.".to_string()));
    }
    let mut workbook = open_workbook_auto(path)?;
    let mut plan = QuestionPlan::default();

    for sheet in workbook.sheet_names().to_vec() {
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| AppError::Workbook(format!("Sheet not found: {}", e)))?;
        let (Some((first_row, _)), Some((last_row, _))) = (range.start(), range.end()) else {
            continue;
        };
        for row in first_row..=last_row {
            let text = range
                .get_value((row, 0))
                .map(|cell| cell.to_string().trim().to_string())
                .unwrap_or_default();
            if text.is_empty() {
                continue;
            }
            let entry = Question {
                sheet: sheet.clone(),
                row: row + 1,
                text,
            };
            if is_section_marker(&entry.text) {
                plan.markers.push(entry);
            } else {
                plan.questions.push(entry);
            }
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::{ExcelDateTime, Format, Workbook};

    #[test]
    fn markers_are_recognized() {
        assert!(is_section_marker("A.1"));
        assert!(is_section_marker("  B.12  "));
        assert!(is_section_marker("C.3 General information"));
        assert!(is_section_marker("D.4.1"));
        assert!(is_section_marker("E.5: Scope"));
    }

    #[test]
    fn questions_are_not_markers() {
        assert!(!is_section_marker("What is the company name?"));
        assert!(!is_section_marker("a.1"));
        assert!(!is_section_marker("A1"));
        assert!(!is_section_marker("A.x"));
        assert!(!is_section_marker("A.1b"));
        assert!(!is_section_marker("AB.1"));
        assert!(!is_section_marker(""));
    }

    #[test]
    fn scan_classifies_rows_across_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.xlsx");
        let mut workbook = Workbook::new();
        let first = workbook.add_worksheet();
        first.set_name("General").unwrap();
        first.write_string(0, 0, "A.1").unwrap();
        first.write_string(1, 0, "Company name?").unwrap();
        first.write_string(3, 0, "  Founded in?  ").unwrap();
        first.write_number(4, 0, 42.0).unwrap();
        let second = workbook.add_worksheet();
        second.set_name("Security").unwrap();
        second.write_string(2, 0, "B.1 Controls").unwrap();
        second.write_string(3, 0, "Do you encrypt data?").unwrap();
        second.write_string(4, 1, "column B only").unwrap();
        workbook.save(&path).unwrap();

        let plan = scan_workbook(&path).unwrap();
        let rows: Vec<(&str, u32, &str)> = plan
            .questions
            .iter()
            .map(|q| (q.sheet.as_str(), q.row, q.text.as_str()))
            .collect();
        assert_eq!(
            rows,
            vec![
                ("General", 2, "Company name?"),
                ("General", 4, "Founded in?"),
                ("General", 5, "42"),
                ("Security", 4, "Do you encrypt data?"),
            ]
        );
        assert_eq!(plan.total(), 4);
        assert_eq!(plan.markers.len(), 2);
        assert_eq!(plan.markers[1].row, 3);
    }

    #[test]
    fn booleans_and_dates_count_as_questions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typed.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_boolean(0, 0, true).unwrap();
        let date = ExcelDateTime::from_ymd(2024, 1, 31).unwrap();
        sheet
            .write_datetime_with_format(1, 0, &date, &Format::new().set_num_format("yyyy-mm-dd"))
            .unwrap();
        sheet.write_string(2, 0, "Plain question?").unwrap();
        workbook.save(&path).unwrap();

        let plan = scan_workbook(&path).unwrap();
        assert_eq!(plan.total(), 3);
        let rows: Vec<u32> = plan.questions.iter().map(|q| q.row).collect();
        assert_eq!(rows, vec![1, 2, 3]);
        assert_eq!(plan.questions[0].text, "true");
        assert!(!plan.questions[1].text.is_empty());
        assert_eq!(plan.questions[2].text, "Plain question?");
    }

    #[test]
    fn missing_file_is_rejected() {
        let err = scan_workbook(Path::new("/nonexistent/q.xlsx")).unwrap_err();
        assert_eq!(err.to_string(), "File not found.");
    }
}
