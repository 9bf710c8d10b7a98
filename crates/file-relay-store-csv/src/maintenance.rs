//! Offline operations over a store file: row trimming, cleanup of earlier
//! format versions, and a header sanity report.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use file_relay_core::STORE_HEADER;
use serde::{Deserialize, Serialize};

use crate::codec::{encode_row, is_header_row, parse_rows};

const PAD_VALUE: &str = "Unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrimSummary {
    pub output: PathBuf,
    pub kept_rows: usize,
    pub dropped_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReformatSummary {
    pub output: PathBuf,
    pub header_detected: bool,
    pub rows_written: usize,
    pub dropped_short_rows: usize,
    pub padded_rows: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationReport {
    pub header: Option<Vec<String>>,
    pub expected_header: Vec<String>,
    pub header_matches: bool,
    pub sample_row: Option<Vec<String>>,
    /// Row count including the header row.
    pub total_rows: usize,
}

fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read store file {}", path.display()))?;
    Ok(parse_rows(&body))
}

fn write_rows(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let body = rows.iter().map(|row| encode_row(row)).collect::<String>();
    let staging = path.with_extension("partial");
    fs::write(&staging, body)
        .with_context(|| format!("failed to write staging file {}", staging.display()))?;
    fs::rename(&staging, path).with_context(|| {
        format!("failed to move {} into place at {}", staging.display(), path.display())
    })
}

fn canonical_header() -> Vec<String> {
    STORE_HEADER.iter().map(|column| (*column).to_string()).collect()
}

/// Keep the header plus the first `keep` data rows. Writes in place when `output` is `None`.
///
/// # Errors
/// Returns an error when the input cannot be read or the output cannot be written.
pub fn trim(input: &Path, output: Option<&Path>, keep: usize) -> Result<TrimSummary> {
    let mut rows = read_rows(input)?;
    let header = rows.first().filter(|row| is_header_row(row)).cloned();
    if header.is_some() {
        rows.remove(0);
    }

    let total = rows.len();
    rows.truncate(keep);
    let kept_rows = rows.len();

    let mut out_rows = Vec::with_capacity(kept_rows + 1);
    out_rows.extend(header);
    out_rows.extend(rows);

    let output = output.unwrap_or(input).to_path_buf();
    write_rows(&output, &out_rows)?;
    tracing::info!(
        output = %output.display(),
        kept_rows,
        dropped_rows = total - kept_rows,
        "trimmed record store"
    );

    Ok(TrimSummary { output, kept_rows, dropped_rows: total - kept_rows })
}

/// Strip surrounding whitespace, then stray double and single quotes.
fn clean_field(field: &str) -> String {
    field.trim().trim_matches('"').trim_matches('\'').to_string()
}

/// Rewrite a store produced by earlier writers into the canonical quoted shape.
///
/// A leading non-header row is kept whatever its width; later rows need all four
/// columns. Short rows are padded, wide rows cut to four columns.
///
/// # Errors
/// Returns an error when the input cannot be read or the output cannot be written.
pub fn reformat(input: &Path, output: &Path) -> Result<ReformatSummary> {
    let rows = read_rows(input)?;
    let mut header_detected = false;
    let mut dropped_short_rows = 0;
    let mut data = Vec::with_capacity(rows.len());

    for (position, row) in rows.into_iter().enumerate() {
        if position == 0 {
            if is_header_row(&row) {
                header_detected = true;
            } else {
                data.push(row);
            }
            continue;
        }
        if row.len() >= STORE_HEADER.len() {
            data.push(row);
        } else {
            dropped_short_rows += 1;
        }
    }

    let mut padded_rows = 0;
    let mut out_rows = Vec::with_capacity(data.len() + 1);
    out_rows.push(canonical_header());
    for row in data {
        let mut cleaned = row.iter().map(|field| clean_field(field)).collect::<Vec<_>>();
        if cleaned.len() < STORE_HEADER.len() {
            padded_rows += 1;
            cleaned.resize(STORE_HEADER.len(), PAD_VALUE.to_string());
        }
        cleaned.truncate(STORE_HEADER.len());
        out_rows.push(cleaned);
    }

    write_rows(output, &out_rows)?;
    let rows_written = out_rows.len() - 1;
    tracing::info!(
        output = %output.display(),
        rows_written,
        dropped_short_rows,
        "reformatted record store"
    );

    Ok(ReformatSummary {
        output: output.to_path_buf(),
        header_detected,
        rows_written,
        dropped_short_rows,
        padded_rows,
    })
}

/// Report the header and first data row of a store file.
///
/// # Errors
/// Returns an error when the file cannot be read.
pub fn validate(path: &Path) -> Result<ValidationReport> {
    let rows = read_rows(path)?;
    let expected_header = canonical_header();
    let header = rows.first().cloned();
    let header_matches = header.as_ref().is_some_and(|header| {
        header.iter().map(|field| field.trim()).eq(expected_header.iter().map(String::as_str))
    });

    Ok(ValidationReport {
        sample_row: rows.get(1).cloned(),
        total_rows: rows.len(),
        header,
        expected_header,
        header_matches,
    })
}
