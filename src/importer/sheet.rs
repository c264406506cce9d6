//! Reading uploaded sheets into header-mapped [`ImportRow`]s.

use super::ImportRow;
use anyhow::{anyhow, bail, Context, Result};
use calamine::{open_workbook_from_rs, Data, Reader, Xlsx};
use csv::{ByteRecord, ReaderBuilder};
use std::io::{Cursor, Read};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Csv,
    Xlsx,
}

impl SheetFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "csv" | "txt" => Ok(SheetFormat::Csv),
            "xlsx" => Ok(SheetFormat::Xlsx),
            other => bail!("unsupported sheet extension '{other}' (expected csv or xlsx)"),
        }
    }

    /// Content-Type of an upload; `None` for anything unrecognised.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match mime.as_str() {
            "text/csv" | "text/plain" | "application/csv" => Some(SheetFormat::Csv),
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => {
                Some(SheetFormat::Xlsx)
            }
            _ => None,
        }
    }
}

/// `" Operating Hours "` → `operating_hours`.
pub fn normalize_header(raw: &str) -> String {
    let lowered = raw.trim().trim_start_matches('\u{feff}').trim().to_lowercase();
    let mut out = String::with_capacity(lowered.len());
    let mut prev_sep = false;
    for ch in lowered.chars() {
        if ch.is_whitespace() || ch == '-' || ch == '_' {
            if !prev_sep && !out.is_empty() {
                out.push('_');
            }
            prev_sep = true;
        } else {
            out.push(ch);
            prev_sep = false;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

pub async fn read_path(path: &Path) -> Result<Vec<ImportRow>> {
    let format = SheetFormat::from_path(path)?;
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read sheet {}", path.display()))?;
    read_bytes(&bytes, format)
}

pub fn read_bytes(bytes: &[u8], format: SheetFormat) -> Result<Vec<ImportRow>> {
    match format {
        SheetFormat::Csv => read_csv(bytes),
        SheetFormat::Xlsx => read_xlsx(bytes),
    }
}

fn build_rows<I>(headers: &[String], records: I) -> Vec<ImportRow>
where
    I: IntoIterator<Item = (usize, Vec<String>)>,
{
    records
        .into_iter()
        .map(|(line, cells)| {
            let mut row = ImportRow::new(line);
            for (header, cell) in headers.iter().zip(cells) {
                if header.is_empty() {
                    continue;
                }
                row.fields.insert(header.clone(), cell);
            }
            row
        })
        .filter(|row| !row.is_blank())
        .collect()
}

/// Cells that are not valid UTF-8 are decoded lossily so one bad cell never
/// costs the rest of the sheet.
pub fn read_csv<R: Read>(reader: R) -> Result<Vec<ImportRow>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers: Vec<String> = rdr
        .byte_headers()
        .context("sheet has no header row")?
        .iter()
        .map(|h| normalize_header(&String::from_utf8_lossy(h)))
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        bail!("sheet header row is empty");
    }

    let mut records = Vec::new();
    let mut rec = ByteRecord::new();
    while rdr.read_byte_record(&mut rec).context("malformed csv")? {
        let line = rec
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(records.len() + 2);
        let cells = rec
            .iter()
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect::<Vec<_>>();
        records.push((line, cells));
    }
    Ok(build_rows(&headers, records))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

/// First worksheet of an XLSX workbook.
pub fn read_xlsx(bytes: &[u8]) -> Result<Vec<ImportRow>> {
    let mut workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))
        .with_context(|| format!("failed to open XLSX file ({} bytes)", bytes.len()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("workbook has no worksheets"))?;
    let range = workbook
        .worksheet_range(&sheet)
        .with_context(|| format!("cannot read worksheet '{sheet}'"))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .ok_or_else(|| anyhow!("sheet has no header row"))?
        .iter()
        .map(|c| normalize_header(&cell_text(c)))
        .collect();
    if headers.iter().all(|h| h.is_empty()) {
        bail!("sheet header row is empty");
    }

    // Sheet line numbers account for rows above the used range.
    let first_line = range.start().map(|(r, _)| r as usize + 1).unwrap_or(1);
    let records = rows
        .enumerate()
        .map(|(i, cells)| (first_line + 1 + i, cells.iter().map(cell_text).collect()));
    Ok(build_rows(&headers, records))
}
