use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use file_relay_core::{find_first_match, ContentKind, Handle, Record, STORE_HEADER};
use serde::{Deserialize, Serialize};

pub mod codec;
pub mod maintenance;

pub use maintenance::{
    reformat, trim, validate, ReformatSummary, TrimSummary, ValidationReport,
};

use codec::{encode_row, is_header_row, parse_rows, ROW_TERMINATOR};

/// Append-only record log kept as a quoted CSV file.
#[derive(Debug, Clone)]
pub struct CsvRecordStore {
    path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadSummary {
    pub records: usize,
    pub skipped_short_rows: usize,
    pub skipped_invalid_handles: usize,
    pub header_present: bool,
}

impl CsvRecordStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the store with its header row when it does not exist yet.
    ///
    /// Returns `true` when a new file was written.
    ///
    /// # Errors
    /// Returns an error when the parent directory or the file cannot be created.
    pub fn initialize(&self) -> Result<bool> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&self.path) {
            Ok(mut file) => {
                file.write_all(encode_row(&STORE_HEADER).as_bytes())
                    .and_then(|()| file.sync_data())
                    .with_context(|| {
                        format!("failed to write store header to {}", self.path.display())
                    })?;
                tracing::info!(path = %self.path.display(), "record store initialized");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err)
                .with_context(|| format!("failed to create store at {}", self.path.display())),
        }
    }

    /// Read every record in insertion order.
    ///
    /// A store that cannot be opened reads as empty.
    ///
    /// # Errors
    /// Returns an error when an opened store cannot be read to the end.
    pub fn load_all(&self) -> Result<Vec<Record>> {
        self.load_all_with_summary().map(|(records, _)| records)
    }

    /// Like [`CsvRecordStore::load_all`], also reporting what was skipped.
    ///
    /// # Errors
    /// Returns an error when an opened store cannot be read to the end.
    pub fn load_all_with_summary(&self) -> Result<(Vec<Record>, LoadSummary)> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) => {
                tracing::info!(
                    path = %self.path.display(),
                    error = %err,
                    "record store not readable, starting with empty data"
                );
                return Ok((Vec::new(), LoadSummary::default()));
            }
        };

        let mut body = String::new();
        file.read_to_string(&mut body)
            .with_context(|| format!("failed to read record store {}", self.path.display()))?;

        let (records, summary) = records_from_rows(parse_rows(&body));
        if summary.skipped_short_rows > 0 || summary.skipped_invalid_handles > 0 {
            tracing::warn!(
                short_rows = summary.skipped_short_rows,
                invalid_handles = summary.skipped_invalid_handles,
                "skipped malformed record store rows"
            );
        }
        Ok((records, summary))
    }

    /// Append one record without touching existing rows.
    ///
    /// # Errors
    /// Returns an error when the store cannot be opened or written.
    pub fn append(&self, record: &Record) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&self.path)
            .with_context(|| {
                format!("failed to open record store {} for append", self.path.display())
            })?;

        let mut row = String::new();
        let len = file
            .metadata()
            .with_context(|| format!("failed to stat record store {}", self.path.display()))?
            .len();
        if len == 0 {
            row.push_str(&encode_row(&STORE_HEADER));
        } else if !ends_with_newline(&mut file)? {
            row.push_str(ROW_TERMINATOR);
        }
        row.push_str(&encode_row(&record.to_fields()));

        file.write_all(row.as_bytes())
            .and_then(|()| file.sync_data())
            .with_context(|| format!("failed to append to record store {}", self.path.display()))
    }

    /// Scan the stored rows for the first content reference matching `query`.
    ///
    /// # Errors
    /// Returns an error when the store cannot be read.
    pub fn find_by_content_ref(&self, query: &str) -> Result<Option<Record>> {
        let records = self.load_all()?;
        Ok(find_first_match(&records, query).cloned())
    }
}

fn ends_with_newline(file: &mut File) -> Result<bool> {
    let mut last = [0_u8; 1];
    file.seek(SeekFrom::End(-1)).context("failed to seek record store")?;
    file.read_exact(&mut last).context("failed to read record store tail")?;
    Ok(matches!(last[0], b'\n' | b'\r'))
}

pub(crate) fn records_from_rows(rows: Vec<Vec<String>>) -> (Vec<Record>, LoadSummary) {
    let mut summary = LoadSummary::default();
    let mut records = Vec::with_capacity(rows.len());

    for (position, row) in rows.into_iter().enumerate() {
        if position == 0 && is_header_row(&row) {
            summary.header_present = true;
            continue;
        }
        let Some(record) = record_from_row(row, &mut summary) else {
            continue;
        };
        records.push(record);
    }

    summary.records = records.len();
    (records, summary)
}

fn record_from_row(row: Vec<String>, summary: &mut LoadSummary) -> Option<Record> {
    if row.len() < STORE_HEADER.len() {
        summary.skipped_short_rows += 1;
        return None;
    }
    let mut fields = row.into_iter();
    let raw_handle = fields.next()?;
    let content_ref = fields.next()?;
    let display_name = fields.next()?;
    let content_kind = fields.next()?;

    let Ok(handle) = Handle::parse(&raw_handle) else {
        summary.skipped_invalid_handles += 1;
        return None;
    };

    Some(Record {
        handle,
        content_ref,
        display_name,
        content_kind: ContentKind::parse(&content_kind),
    })
}
