//! CSV ingestion: spreadsheet exports to `RawRow`s.
//!
//! Exports come from Excel with either `,` or `;` as separator depending on
//! the machine's locale. The separator is sniffed from the header line.
//! Each row keeps the sheet line it was read from, so rejections point at
//! the right line even after blank lines.

use crate::{
    error::InsightResult,
    normalizer::{normalize_header, RawRow, LINE_KEY},
};
use std::io::Read;

/// Which spreadsheet a batch of rows came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetKind {
    ServiceOrders,
    Sales,
    Payments,
    Targets,
    Base,
}

impl SheetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SheetKind::ServiceOrders => "service_orders",
            SheetKind::Sales         => "sales",
            SheetKind::Payments      => "payments",
            SheetKind::Targets       => "targets",
            SheetKind::Base          => "base",
        }
    }
}

fn sniff_delimiter(content: &str) -> u8 {
    let header = content.lines().next().unwrap_or_default();
    if header.matches(';').count() > header.matches(',').count() {
        b';'
    } else {
        b','
    }
}

/// Sheet line of the record read from `pos`. The reader takes the position
/// before stepping over blank lines, so count those in.
fn record_line(content: &[u8], pos: &csv::Position) -> u64 {
    let start = usize::try_from(pos.byte()).unwrap_or(usize::MAX);
    let blank = content
        .get(start..)
        .unwrap_or_default()
        .iter()
        .take_while(|b| matches!(**b, b'\r' | b'\n'))
        .filter(|b| **b == b'\n')
        .count();
    pos.line() + blank as u64
}

/// Parse CSV text into rows keyed by normalized header.
pub fn read_csv_str(content: &str) -> InsightResult<Vec<RawRow>> {
    let content = content.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .delimiter(sniff_delimiter(content))
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader.headers()?.iter().map(normalize_header).collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        let mut row: RawRow = headers
            .iter()
            .zip(record.iter())
            .filter(|(h, _)| !h.is_empty())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        if let Some(pos) = record.position() {
            row.insert(LINE_KEY.to_string(), record_line(content.as_bytes(), pos).to_string());
        }
        rows.push(row);
    }
    log::debug!("read {} rows with {} columns", rows.len(), headers.len());
    Ok(rows)
}

pub fn read_csv<R: Read>(mut reader: R) -> InsightResult<Vec<RawRow>> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    read_csv_str(&content)
}

pub fn read_csv_file(path: &str) -> InsightResult<Vec<RawRow>> {
    let file = std::fs::File::open(path)?;
    read_csv(file)
}
