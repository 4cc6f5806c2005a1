//! Workbook files: container checks, in-place answer writing (edit_xlsx) and
//! table export (rust_xlsxwriter).

use edit_xlsx::Write;
use regex::Regex;
use std::fs::File;
use std::io::{Read, Write as IoWrite};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};
use zip::read::ZipArchive;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::error::{AppError, Result};
use crate::types::{ExportMode, ExtractedTable};
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet, XlsxError};

const ZIP_MAGIC: [u8; 2] = [0x50, 0x4B];
const TABLE_HEADER_FILL: u32 = 0xD9D9D9;
const SECTION_HEADER_FILL: u32 = 0x4472C4;

/// First two bytes are `PK`. Short or unreadable files are not containers.
pub fn is_zip_container(path: &Path) -> bool {
    let mut header = [0u8; 2];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut header))
        .map(|_| header == ZIP_MAGIC)
        .unwrap_or(false)
}

/// Check that `path` is an OOXML workbook: a zip archive holding `xl/workbook.xml`.
pub fn validate_workbook_container(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(AppError::Validation("File not found.".to_string()));
    }
    if !is_zip_container(path) {
        return Err(AppError::Validation(
            "Invalid Excel file: not an .xlsx workbook. Save it as .xlsx in Excel (renaming an .xls file is not enough)."
                .to_string(),
        ));
    }
    let archive = ZipArchive::new(File::open(path)?)?;
    if archive.index_for_name("xl/workbook.xml").is_none() {
        return Err(AppError::Validation(
            "Invalid Excel file: workbook part is missing.".to_string(),
        ));
    }
    Ok(())
}

/// Drop control characters Excel rejects in shared strings.
pub fn sanitize_cell(s: &str) -> String {
    s.chars()
        .filter(|&c| {
            let u = c as u32;
            c == '\t' || c == '\n' || c == '\r' || !(u < 0x20 || u == 0x7F || u == 0xFFFE || u == 0xFFFF)
        })
        .collect()
}

/// One cell to write: worksheet name, 1-based row of column B, text.
#[derive(Debug, Clone)]
pub struct CellAnswer<'a> {
    pub sheet: &'a str,
    pub row: u32,
    pub text: &'a str,
}

/// Open an existing workbook for in-place edits that keep template formatting.
pub struct AnswerWriter {
    workbook: edit_xlsx::Workbook,
}

impl AnswerWriter {
    pub fn open(path: &Path) -> Result<Self> {
        let workbook = edit_xlsx::Workbook::from_path(path)
            .map_err(|e| AppError::Workbook(format!("Could not open Excel file: {}", e)))?;
        Ok(Self { workbook })
    }

    /// Write `text` into column B of the given row.
    pub fn write_answer(&mut self, answer: &CellAnswer<'_>) -> Result<()> {
        let worksheet = self
            .workbook
            .get_worksheet_mut_by_name(answer.sheet)
            .map_err(|e| AppError::Workbook(format!("Sheet not found: {}", e)))?;
        let cell_ref = format!("B{}", answer.row);
        worksheet
            .write_string(&cell_ref, sanitize_cell(answer.text))
            .map_err(|e| AppError::Workbook(format!("Cannot write {}: {}", cell_ref, e)))?;
        Ok(())
    }

    pub fn save_as(self, path: &Path) -> Result<()> {
        self.workbook
            .save_as(path)
            .map_err(|e| AppError::Workbook(format!("Cannot write to file: {}", e)))?;
        let dropped = strip_drawings_from_xlsx(path)?;
        if dropped > 0 {
            warn!(path = %path.display(), dropped, "images and drawings removed from filled workbook");
        }
        Ok(())
    }
}

/// Remove drawing and media parts left dangling by the edit round-trip, so
/// Excel opens the result without a repair prompt. Worksheet XML is untouched.
/// Returns the number of parts dropped.
fn strip_drawings_from_xlsx(path: &Path) -> Result<usize> {
    static RELS: OnceLock<(Regex, Regex, Regex)> = OnceLock::new();
    let (rel_drawing_re, ct_drawing_re, ct_media_re) = RELS.get_or_init(|| {
        (
            Regex::new(r#"<Relationship[^>]*drawing[^>]*/>"#).expect("rel drawing regex"),
            Regex::new(r#"<Override\s+PartName="/xl/drawings/[^"]*"[^>]*/>"#).expect("ct drawing regex"),
            Regex::new(r#"<Override\s+PartName="/xl/media/[^"]*"[^>]*/>"#).expect("ct media regex"),
        )
    });

    let mut archive = ZipArchive::new(File::open(path)?)?;
    let temp_path = path.with_extension("tmp.xlsx");
    let mut zip_writer = ZipWriter::new(File::create(&temp_path)?);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    let mut dropped = 0usize;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().replace('\\', "/");
        if name.starts_with("xl/drawings/") || name.starts_with("xl/media/") {
            dropped += 1;
            continue;
        }
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        zip_writer.start_file(name.as_str(), opts)?;
        if name == "[Content_Types].xml" {
            let s = String::from_utf8_lossy(&data);
            let out = ct_drawing_re.replace_all(&s, "");
            let out = ct_media_re.replace_all(&out, "");
            zip_writer.write_all(out.as_bytes())?;
        } else if name.contains("worksheets/_rels/") && name.ends_with(".rels") {
            let s = String::from_utf8_lossy(&data);
            zip_writer.write_all(rel_drawing_re.replace_all(&s, "").as_bytes())?;
        } else {
            zip_writer.write_all(&data)?;
        }
    }
    zip_writer.finish()?;
    std::fs::rename(&temp_path, path)?;
    Ok(dropped)
}

/// Column width from text length (chars × 1.2, clamped 10–50).
fn estimate_text_width(text: &str) -> f64 {
    let w = text.chars().count() as f64 * 1.2;
    w.clamp(10.0, 50.0)
}

/// Per-column widths: widest value in each column across `tables`.
fn column_widths<'a>(tables: impl IntoIterator<Item = &'a ExtractedTable>) -> Vec<f64> {
    let mut widths: Vec<f64> = Vec::new();
    for table in tables {
        for row in &table.data {
            for (col, value) in row.iter().enumerate() {
                let w = estimate_text_width(value);
                match widths.get_mut(col) {
                    Some(current) if *current < w => *current = w,
                    Some(_) => {}
                    None => widths.push(w),
                }
            }
        }
    }
    widths
}

fn apply_widths(worksheet: &mut Worksheet, widths: &[f64]) -> std::result::Result<(), XlsxError> {
    for (col, &w) in widths.iter().enumerate() {
        worksheet.set_column_width(col as u16, w)?;
    }
    Ok(())
}

/// Write `table` starting at `first_row`; its first row uses `header_format`.
/// Returns the row after the table.
fn write_table(
    worksheet: &mut Worksheet,
    table: &ExtractedTable,
    first_row: u32,
    header_format: &Format,
) -> std::result::Result<u32, XlsxError> {
    let plain = Format::new();
    let mut row = first_row;
    for (row_idx, values) in table.data.iter().enumerate() {
        let format = if row_idx == 0 { header_format } else { &plain };
        for (col, value) in values.iter().enumerate() {
            worksheet.write_string_with_format(row, col as u16, sanitize_cell(value), format)?;
        }
        row += 1;
    }
    Ok(row)
}

/// Write `tables` to a new workbook at `path`.
pub fn export_tables(tables: &[ExtractedTable], mode: ExportMode, path: &Path) -> Result<()> {
    if tables.is_empty() {
        return Err(AppError::Validation(
            "No tables found in this document".to_string(),
        ));
    }
    let table_header = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(TABLE_HEADER_FILL));

    let mut workbook = Workbook::new();
    match mode {
        ExportMode::PerTable => {
            for table in tables {
                let worksheet = workbook.add_worksheet();
                worksheet.set_name(format!("Table {}", table.index))?;
                apply_widths(worksheet, &column_widths([table]))?;
                write_table(worksheet, table, 0, &table_header)?;
            }
        }
        ExportMode::SingleSheet => {
            let section_header = Format::new()
                .set_bold()
                .set_font_size(12.0)
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(SECTION_HEADER_FILL));
            let worksheet = workbook.add_worksheet();
            worksheet.set_name("All Tables")?;
            apply_widths(worksheet, &column_widths(tables))?;

            let mut row = 0u32;
            for table in tables {
                let title = format!("Table {}", table.index);
                if table.column_count > 1 {
                    let last_col = (table.column_count - 1) as u16;
                    worksheet.merge_range(row, 0, row, last_col, &title, &section_header)?;
                } else {
                    worksheet.write_string_with_format(row, 0, &title, &section_header)?;
                }
                row = write_table(worksheet, table, row + 1, &table_header)?;
                row += 2;
            }
        }
    }
    workbook.save(path)?;
    debug!(path = %path.display(), tables = tables.len(), "tables exported");
    Ok(())
}
