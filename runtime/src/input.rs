//! Seed inputs: identifiers from the first column of a delimited file, and
//! identifier-to-tree-path mapping files.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

fn identifier_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9][A-Z0-9._-]*$").expect("valid identifier regex"))
}

/// Delimiter from the extension, else from the first non-blank line.
fn detect_delimiter(path: &Path, raw: &str) -> u8 {
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "tsv" || ext == "tab" => return b'\t',
        _ => {}
    }
    let first = raw.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    [b'\t', b';', b',']
        .into_iter()
        .find(|d| first.contains(*d as char))
        .unwrap_or(b',')
}

/// Every row of a delimited file, BOM stripped and delimiter detected.
fn read_rows(path: &Path, what: &str) -> Result<Vec<csv::StringRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {what} {}", path.display()))?;
    let raw = raw.trim_start_matches('\u{feff}');
    let delimiter = detect_delimiter(path, raw);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(raw.as_bytes());

    reader
        .records()
        .enumerate()
        .map(|(idx, row)| row.with_context(|| format!("reading row {} of {}", idx + 1, path.display())))
        .collect()
}

fn cell(row: &csv::StringRecord, idx: usize) -> &str {
    row.get(idx).unwrap_or("").trim()
}

/// Read identifiers from `path`.
///
/// Blank rows are skipped. The first row is treated as a header and skipped
/// when its first cell does not look like an identifier.
pub fn read_identifiers(path: &Path) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    let mut first = true;
    for row in read_rows(path, "seed file")? {
        let id = cell(&row, 0);
        if id.is_empty() {
            continue;
        }
        if std::mem::take(&mut first) && !identifier_shape().is_match(id) {
            tracing::debug!(header = id, "skipping header row");
            continue;
        }
        ids.push(id.to_string());
    }

    if ids.is_empty() {
        bail!("no identifiers found in {}", path.display());
    }
    Ok(ids)
}

/// One line of a mapping file: an identifier and the tree labels leading to
/// it, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingRow {
    pub identifier: String,
    pub labels: Vec<String>,
}

/// Read `identifier, major, middle, minor` rows from `path`.
///
/// Labels may be the full row text or just its name or code. Trailing empty
/// labels are dropped; a row needs an identifier and a major label. A later
/// row for the same identifier replaces the earlier one.
pub fn read_mapping(path: &Path) -> Result<Vec<MappingRow>> {
    let mut rows: Vec<MappingRow> = Vec::new();
    let mut first = true;
    for row in read_rows(path, "mapping file")? {
        let id = cell(&row, 0);
        if id.is_empty() {
            continue;
        }
        if std::mem::take(&mut first) && !identifier_shape().is_match(id) {
            tracing::debug!(header = id, "skipping header row");
            continue;
        }
        let mut labels: Vec<String> = (1..=3).map(|i| cell(&row, i).to_string()).collect();
        while labels.last().is_some_and(|l| l.is_empty()) {
            labels.pop();
        }
        if labels.is_empty() || labels.iter().any(|l| l.is_empty()) {
            tracing::warn!(identifier = id, "mapping row has a gap in its labels, skipping");
            continue;
        }
        let entry = MappingRow {
            identifier: id.to_string(),
            labels,
        };
        match rows.iter_mut().find(|r| r.identifier == entry.identifier) {
            Some(existing) => *existing = entry,
            None => rows.push(entry),
        }
    }

    if rows.is_empty() {
        bail!("no mapping rows found in {}", path.display());
    }
    Ok(rows)
}
