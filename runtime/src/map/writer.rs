//! Atomic CSV/JSON writers for run outputs.
//!
//! Each file is written to a temp file in the destination directory and
//! renamed into place, so a reader never sees a half-written output.

use crate::map::sink::ManifestEntry;
use crate::map::types::ClassificationRecord;
use serde::Serialize;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// UTF-8 byte order mark; spreadsheet tools need it to detect Hangul text.
const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Write `path` through a sibling temp file and an atomic rename.
pub fn write_atomic<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        write(&mut out)?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn write_csv<T: Serialize>(out: &mut dyn Write, rows: &[T], bom: bool) -> io::Result<()> {
    if bom {
        out.write_all(BOM)?;
    }
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()
}

/// Taxonomy rows as CSV with a BOM and a header row.
pub fn write_records_csv(path: &Path, records: &[ClassificationRecord]) -> io::Result<()> {
    write_atomic(path, |out| {
        if records.is_empty() {
            // Header only; serialize() derives it from the first row.
            out.write_all(BOM)?;
            let mut writer = csv::Writer::from_writer(out);
            writer.write_record(RECORD_COLUMNS)?;
            return writer.flush();
        }
        write_csv(out, records, true)
    })
}

pub fn write_manifest_csv(path: &Path, entries: &[ManifestEntry]) -> io::Result<()> {
    write_atomic(path, |out| write_csv(out, entries, false))
}

/// Any serialisable value as pretty JSON.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    write_atomic(path, |out| {
        serde_json::to_writer_pretty(&mut *out, value)?;
        out.write_all(b"\n")
    })
}

pub const RECORD_COLUMNS: [&str; 7] = [
    "majorCode",
    "majorName",
    "middleCode",
    "middleName",
    "minorCode",
    "minorName",
    "sideChannelValue",
];
