//! Small helpers: identifiers, filenames, text truncation.

use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;

/// Generate an opaque identifier: `{prefix}-{unix_millis}-{8 hex chars}`.
pub fn create_id(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u32 = rand::thread_rng().gen();
    format!("{}-{}-{:08x}", prefix, millis, suffix)
}

fn unsafe_filename_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9._-]").expect("filename regex"))
}

/// Replace anything outside `[a-zA-Z0-9._-]` with `_`. Empty names become `file`.
pub fn sanitize_filename(name: &str) -> String {
    let name = if name.is_empty() { "file" } else { name };
    unsafe_filename_chars().replace_all(name, "_").into_owned()
}

/// Base name for generated workbooks: document filename without `.pdf`/`.PDF`, sanitized.
pub fn output_base_name(document_filename: &str, fallback: &str) -> String {
    let base = document_filename.replace(".pdf", "").replace(".PDF", "");
    let base = if base.trim().is_empty() { fallback } else { base.as_str() };
    sanitize_filename(base)
}

/// Truncate to at most `max_chars` characters (not bytes).
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Case-insensitive extension check (`report.PDF` has extension `pdf`).
pub fn has_extension(filename: &str, extension: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}
