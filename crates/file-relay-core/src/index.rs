use std::collections::HashMap;

use crate::{content_refs_match, Handle, Record, RelayError};

/// In-memory view of the record store, keyed by handle.
///
/// Insertion order is kept so deduplication scans see records in store order.
#[derive(Debug, Clone, Default)]
pub struct RecordIndex {
    by_handle: HashMap<Handle, Record>,
    order: Vec<Handle>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub loaded: usize,
    pub skipped_duplicates: Vec<Handle>,
}

impl RecordIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay store rows into an empty index. The first row for a handle wins; later
    /// rows reusing it are reported and dropped.
    pub fn rebuild<I>(records: I) -> (Self, RebuildReport)
    where
        I: IntoIterator<Item = Record>,
    {
        let mut index = Self::new();
        let mut report = RebuildReport::default();
        for record in records {
            match index.put(record) {
                Ok(()) => report.loaded += 1,
                Err(RelayError::DuplicateHandle(handle)) => report.skipped_duplicates.push(handle),
                Err(_) => {}
            }
        }
        (index, report)
    }

    #[must_use]
    pub fn get(&self, handle: &str) -> Option<&Record> {
        self.by_handle.get(handle)
    }

    #[must_use]
    pub fn contains(&self, handle: &Handle) -> bool {
        self.by_handle.contains_key(handle)
    }

    /// Insert a new record.
    ///
    /// # Errors
    /// Returns `RelayError::DuplicateHandle` when the handle is already indexed.
    pub fn put(&mut self, record: Record) -> Result<(), RelayError> {
        if self.by_handle.contains_key(&record.handle) {
            return Err(RelayError::DuplicateHandle(record.handle));
        }
        self.order.push(record.handle.clone());
        self.by_handle.insert(record.handle.clone(), record);
        Ok(())
    }

    /// Linear scan in store order for a record whose content reference matches `query`.
    #[must_use]
    pub fn find_by_content_ref(&self, query: &str) -> Option<&Record> {
        self.iter().find(|record| content_refs_match(query, &record.content_ref))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.order.iter().filter_map(|handle| self.by_handle.get(handle))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_handle.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_handle.is_empty()
    }
}
