use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use file_relay_core::{
    head_segment, ContentKind, Handle, HandleSource, RandomHandleSource, Record, RecordIndex,
    RelayError, DEFAULT_HANDLE_LENGTH,
};
use file_relay_store_csv::CsvRecordStore;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

pub mod scheduler;

pub use scheduler::{
    ActionKind, DelayedActionScheduler, DeliveryTarget, MessageDeleter, ScheduledAction,
    DELIVERED_TTL, NOTICE_TTL,
};

pub const API_CONTRACT_VERSION: &str = "api.v1";

pub const DEFAULT_STORE_PATH: &str = "./data/archiveTG_data.csv";

const DEFAULT_MAX_HANDLE_ATTEMPTS: usize = 8;
const UPLOAD_LOCK_STRIPES: usize = 64;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub store_path: PathBuf,
    pub handle_length: usize,
    pub max_handle_attempts: usize,
    pub notice_ttl: Duration,
    pub delivered_ttl: Duration,
}

impl RelayConfig {
    /// Reject settings the catalog cannot honour.
    ///
    /// # Errors
    /// Returns `RelayError::InvalidRequest` for a zero handle length or retry budget.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.handle_length == 0 {
            return Err(RelayError::InvalidRequest("handle length must be at least 1".into()));
        }
        if self.max_handle_attempts == 0 {
            return Err(RelayError::InvalidRequest(
                "handle retry budget must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_PATH),
            handle_length: DEFAULT_HANDLE_LENGTH,
            max_handle_attempts: DEFAULT_MAX_HANDLE_ATTEMPTS,
            notice_ttl: NOTICE_TTL,
            delivered_ttl: DELIVERED_TTL,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadRequest {
    pub content_ref: String,
    pub display_name: Option<String>,
    pub content_kind: ContentKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadOutcome {
    pub record: Record,
    pub deduplicated: bool,
}

/// Handle-to-record mapping backed by the CSV store.
///
/// Built once from the store at startup and shared by reference between request
/// handlers. Every new record is appended to the store before it becomes visible in
/// the index, and the upload returns only after both have happened.
pub struct RecordCatalog {
    store: CsvRecordStore,
    index: RwLock<RecordIndex>,
    // Serializes handle generation, collision checks, and commits.
    commit: Mutex<Box<dyn HandleSource>>,
    upload_stripes: Vec<Mutex<()>>,
    max_handle_attempts: usize,
}

impl RecordCatalog {
    /// Initialize the store if needed and replay it into a fresh index.
    ///
    /// # Errors
    /// Returns `RelayError::InvalidRequest` for an unusable configuration and
    /// `RelayError::StoreUnavailable` when the store cannot be created or read.
    pub fn open(config: &RelayConfig) -> Result<Self, RelayError> {
        config.validate()?;
        let store = CsvRecordStore::new(&config.store_path);
        store.initialize().map_err(store_unavailable)?;
        let (records, _) = store.load_all_with_summary().map_err(store_unavailable)?;

        let (index, report) = RecordIndex::rebuild(records);
        for handle in &report.skipped_duplicates {
            tracing::warn!(%handle, "ignoring later store row reusing an existing handle");
        }
        tracing::info!(
            path = %config.store_path.display(),
            records = report.loaded,
            "loaded record index"
        );

        Ok(Self {
            store,
            index: RwLock::new(index),
            commit: Mutex::new(Box::new(RandomHandleSource::new(config.handle_length))),
            upload_stripes: (0..UPLOAD_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            max_handle_attempts: config.max_handle_attempts,
        })
    }

    /// Replace the handle source, e.g. with a seeded generator.
    #[must_use]
    pub fn with_handle_source(self, source: Box<dyn HandleSource>) -> Self {
        *self.commit.lock() = source;
        self
    }

    /// Register an upload, or return the record already holding the same content.
    ///
    /// # Errors
    /// Returns `InvalidRequest` for an empty content reference, `StoreUnavailable` when
    /// the append fails, and `DuplicateHandle` when no free handle was found.
    pub fn handle_upload(&self, request: UploadRequest) -> Result<UploadOutcome, RelayError> {
        // Stored verbatim; whitespace only decides whether a reference was sent at all.
        let content_ref = request.content_ref.as_str();
        if content_ref.trim().is_empty() {
            return Err(RelayError::InvalidRequest("upload carries no content reference".into()));
        }
        let display_name = request
            .display_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| request.content_kind.default_display_name().to_string());

        let _upload_guard = self.stripe_for(content_ref).lock();

        if let Some(existing) = self.index.read().find_by_content_ref(content_ref).cloned() {
            tracing::info!(handle = %existing.handle, "upload matches stored file");
            return Ok(UploadOutcome { record: existing, deduplicated: true });
        }

        let mut handles = self.commit.lock();
        let handle = self.next_free_handle(handles.as_mut())?;
        let record = Record {
            handle,
            content_ref: request.content_ref,
            display_name,
            content_kind: request.content_kind,
        };

        self.store.append(&record).map_err(|err| {
            tracing::error!(error = %format!("{err:#}"), "failed to append record");
            store_unavailable(err)
        })?;
        self.index.write().put(record.clone())?;
        drop(handles);

        tracing::info!(
            handle = %record.handle,
            name = %record.display_name,
            kind = %record.content_kind,
            "stored file"
        );
        Ok(UploadOutcome { record, deduplicated: false })
    }

    /// Look up a handle as typed by the user.
    ///
    /// # Errors
    /// Returns `RelayError::NotFound` for malformed or never-issued handles.
    pub fn handle_retrieve(&self, handle: &str) -> Result<Record, RelayError> {
        let handle = Handle::parse(handle)?;
        self.index
            .read()
            .get(handle.as_str())
            .cloned()
            .ok_or_else(|| RelayError::NotFound(handle.to_string()))
    }

    #[must_use]
    pub fn find_by_content_ref(&self, content_ref: &str) -> Option<Record> {
        self.index.read().find_by_content_ref(content_ref).cloned()
    }

    /// Snapshot of all records in store order.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.index.read().iter().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    #[must_use]
    pub fn store(&self) -> &CsvRecordStore {
        &self.store
    }

    fn stripe_for(&self, content_ref: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        head_segment(content_ref).hash(&mut hasher);
        let slot = usize::try_from(hasher.finish() % UPLOAD_LOCK_STRIPES as u64).unwrap_or(0);
        &self.upload_stripes[slot]
    }

    fn next_free_handle(&self, source: &mut dyn HandleSource) -> Result<Handle, RelayError> {
        let mut last = None;
        for attempt in 1..=self.max_handle_attempts {
            let candidate = source.next_handle();
            if !self.index.read().contains(&candidate) {
                return Ok(candidate);
            }
            tracing::warn!(attempt, handle = %candidate, "generated handle already issued");
            last = Some(candidate);
        }

        tracing::error!(attempts = self.max_handle_attempts, "handle generation retries exhausted");
        match last {
            Some(handle) => Err(RelayError::DuplicateHandle(handle)),
            None => Err(RelayError::InvalidRequest("handle retry budget is zero".into())),
        }
    }
}

fn store_unavailable(err: anyhow::Error) -> RelayError {
    RelayError::StoreUnavailable(format!("{err:#}"))
}

/// Catalog plus expiry scheduling: the operations offered to a transport.
#[derive(Clone)]
pub struct RelayService {
    catalog: Arc<RecordCatalog>,
    scheduler: DelayedActionScheduler,
    notice_ttl: Duration,
    delivered_ttl: Duration,
}

impl RelayService {
    #[must_use]
    pub fn new(
        catalog: Arc<RecordCatalog>,
        scheduler: DelayedActionScheduler,
        config: &RelayConfig,
    ) -> Self {
        Self {
            catalog,
            scheduler,
            notice_ttl: config.notice_ttl,
            delivered_ttl: config.delivered_ttl,
        }
    }

    /// Open the catalog described by `config` and attach a scheduler using `deleter`.
    ///
    /// # Errors
    /// Returns `RelayError::StoreUnavailable` when the store cannot be opened.
    pub fn open(config: &RelayConfig, deleter: Arc<dyn MessageDeleter>) -> Result<Self, RelayError> {
        let catalog = Arc::new(RecordCatalog::open(config)?);
        Ok(Self::new(catalog, DelayedActionScheduler::new(deleter), config))
    }

    /// # Errors
    /// See [`RecordCatalog::handle_upload`].
    pub fn handle_upload(&self, request: UploadRequest) -> Result<UploadOutcome, RelayError> {
        self.catalog.handle_upload(request)
    }

    /// # Errors
    /// See [`RecordCatalog::handle_retrieve`].
    pub fn handle_retrieve(&self, handle: &str) -> Result<Record, RelayError> {
        self.catalog.handle_retrieve(handle)
    }

    /// Schedule removal of a delivered copy after the long delay.
    pub fn notify_delivered(&self, target: DeliveryTarget) -> ScheduledAction {
        self.scheduler.schedule_once(self.delivered_ttl, target, ActionKind::Delete)
    }

    /// Schedule removal of an upload notice after the short delay.
    pub fn notify_received(&self, target: DeliveryTarget) -> ScheduledAction {
        self.scheduler.schedule_once(self.notice_ttl, target, ActionKind::Delete)
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<RecordCatalog> {
        &self.catalog
    }

    #[must_use]
    pub fn scheduler(&self) -> &DelayedActionScheduler {
        &self.scheduler
    }
}
