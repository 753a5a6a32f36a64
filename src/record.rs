use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tracing::{Instrument, debug, debug_span, instrument, trace, warn};

use crate::error::RecordError;
use crate::model::PeripheralIdentity;

const RECORD_FILE_NAME: &str = "session.json";

/// Session continuity persisted between runs.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionRecord {
    #[serde(rename = "last_device_address")]
    last_address: Option<String>,
    #[serde(rename = "last_device_name")]
    last_name: Option<String>,
    #[serde(rename = "last_heart_rate")]
    last_known_sample: u16,
    is_stopped: bool,
    has_launched_before: bool,
}

impl SessionRecord {
    /// Returns the address of the last peripheral that reached streaming.
    #[must_use]
    pub fn last_address(&self) -> Option<&str> {
        self.last_address.as_deref()
    }

    /// Returns the display name of the last streamed peripheral, if known.
    #[must_use]
    pub fn last_name(&self) -> Option<&str> {
        self.last_name.as_deref()
    }

    /// Returns the mean of the last accepted batch.
    #[must_use]
    pub fn last_known_sample(&self) -> u16 {
        self.last_known_sample
    }

    /// Returns whether incoming batches are currently discarded.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.is_stopped
    }

    /// Returns whether a previous run has completed startup.
    #[must_use]
    pub fn has_launched_before(&self) -> bool {
        self.has_launched_before
    }

    pub(crate) fn with_stopped(mut self, stopped: bool) -> Self {
        self.is_stopped = stopped;
        self
    }

    /// Returns the saved peripheral identity, if any.
    #[must_use]
    pub fn saved_identity(&self) -> Option<PeripheralIdentity> {
        self.last_address
            .as_ref()
            .map(|address| PeripheralIdentity::new(address.clone(), self.last_name.clone()))
    }
}

/// Storage backend for the session record.
pub trait SessionRecordStore: Send + Sync + std::fmt::Debug {
    /// Loads the record, returning the default when none exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error when the record exists but cannot be read.
    fn load(&self) -> Result<SessionRecord, RecordError>;

    /// Replaces the stored record.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be written.
    fn save(&self, record: &SessionRecord) -> Result<(), RecordError>;
}

/// JSON file store with atomic replacement.
#[derive(Debug, Clone)]
pub struct FileRecordStore {
    path: PathBuf,
}

impl FileRecordStore {
    /// Creates a store at an explicit path.
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Creates a store at the platform state directory, or at `path` when given.
    #[must_use]
    pub fn at_default_or(path: Option<PathBuf>) -> Self {
        Self::new(path.unwrap_or_else(default_record_path))
    }

    /// Returns the record file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> RecordError {
        RecordError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SessionRecordStore for FileRecordStore {
    #[instrument(skip(self), level = "debug", fields(path = %self.path.display()))]
    fn load(&self) -> Result<SessionRecord, RecordError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(source) if source.kind() == ErrorKind::NotFound => {
                debug!("no session record yet");
                return Ok(SessionRecord::default());
            }
            Err(source) => return Err(self.io_error(source)),
        };

        serde_json::from_str(&raw).map_err(|source| RecordError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    #[instrument(skip(self, record), level = "trace", fields(path = %self.path.display()))]
    fn save(&self, record: &SessionRecord) -> Result<(), RecordError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let serialised = serde_json::to_vec_pretty(record).map_err(RecordError::Serialise)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serialised).map_err(|source| self.io_error(source))?;
        fs::rename(&staging, &self.path).map_err(|source| self.io_error(source))?;
        Ok(())
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    record: Mutex<SessionRecord>,
}

impl MemoryRecordStore {
    /// Creates a store holding an initial record.
    #[must_use]
    pub fn with_record(record: SessionRecord) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }
}

impl SessionRecordStore for MemoryRecordStore {
    fn load(&self) -> Result<SessionRecord, RecordError> {
        Ok(self
            .record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save(&self, record: &SessionRecord) -> Result<(), RecordError> {
        *self
            .record
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = record.clone();
        Ok(())
    }
}

/// Single-writer cache in front of a [`SessionRecordStore`].
///
/// Updates are handed to a writer task that keeps only the latest record and
/// saves it on the blocking pool.
#[derive(Debug)]
pub(crate) struct RecordBook {
    record: SessionRecord,
    pending: watch::Sender<SessionRecord>,
    writer: JoinHandle<()>,
}

impl RecordBook {
    /// Reads the record once; unreadable records start from the default.
    ///
    /// Must be called from within a Tokio runtime.
    pub(crate) fn open(store: Box<dyn SessionRecordStore>) -> Self {
        let store: Arc<dyn SessionRecordStore> = Arc::from(store);
        let record = store.load().unwrap_or_else(|error| {
            warn!(%error, "ignoring unreadable session record");
            SessionRecord::default()
        });
        let (pending, latest) = watch::channel(record.clone());
        let writer =
            tokio::spawn(write_back(store, latest).instrument(debug_span!("record_writer")));
        Self {
            record,
            pending,
            writer,
        }
    }

    pub(crate) fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub(crate) fn remember_identity(&mut self, identity: &PeripheralIdentity) {
        self.record.last_address = Some(identity.address().to_string());
        self.record.last_name = identity.display_name().map(str::to_string);
        self.persist();
    }

    pub(crate) fn record_sample(&mut self, value: u16) {
        self.record.last_known_sample = value;
        self.persist();
    }

    pub(crate) fn set_stopped(&mut self, stopped: bool) {
        if self.record.is_stopped == stopped {
            return;
        }
        self.record.is_stopped = stopped;
        self.persist();
    }

    /// Marks startup complete, returning whether a previous run already had.
    pub(crate) fn mark_launched(&mut self) -> bool {
        let launched_before = self.record.has_launched_before;
        if !launched_before {
            self.record.has_launched_before = true;
            self.persist();
        }
        launched_before
    }

    /// Writes the latest record and stops the writer.
    pub(crate) async fn close(self) {
        drop(self.pending);
        if let Err(error) = self.writer.await {
            warn!(%error, "session record writer ended abnormally");
        }
    }

    fn persist(&self) {
        self.pending.send_replace(self.record.clone());
    }
}

async fn write_back(
    store: Arc<dyn SessionRecordStore>,
    mut latest: watch::Receiver<SessionRecord>,
) {
    while latest.changed().await.is_ok() {
        let record = latest.borrow_and_update().clone();
        let store = Arc::clone(&store);
        match task::spawn_blocking(move || store.save(&record)).await {
            Ok(Ok(())) => trace!("session record saved"),
            Ok(Err(error)) => warn!(%error, "failed to persist session record"),
            Err(error) => warn!(%error, "session record save did not complete"),
        }
    }
    trace!("session record writer finished");
}

fn default_record_path() -> PathBuf {
    ProjectDirs::from("", "", "sensorlink")
        .map(|dirs| {
            dirs.state_dir()
                .unwrap_or_else(|| dirs.data_local_dir())
                .join(RECORD_FILE_NAME)
        })
        .unwrap_or_else(|| PathBuf::from(RECORD_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_file_loads_default_record() {
        let dir = tempdir().expect("temp dir should be created");
        let store = FileRecordStore::new(dir.path().join("absent.json"));

        assert_eq!(SessionRecord::default(), store.load().expect("load should succeed"));
    }

    #[tokio::test]
    async fn saved_record_round_trips_through_the_file() {
        let dir = tempdir().expect("temp dir should be created");
        let store = FileRecordStore::new(dir.path().join("nested").join("session.json"));
        let mut book = RecordBook::open(Box::new(store.clone()));

        book.remember_identity(&PeripheralIdentity::new("AA:BB", Some("HRM-1".to_string())));
        book.record_sample(72);
        book.set_stopped(true);
        book.close().await;

        let reloaded = store.load().expect("record should reload");
        assert_eq!(Some("AA:BB"), reloaded.last_address());
        assert_eq!(Some("HRM-1"), reloaded.last_name());
        assert_eq!(72, reloaded.last_known_sample());
        assert!(reloaded.is_stopped());
        assert!(!dir.path().join("nested").join("session.json.tmp").exists());
    }

    #[test]
    fn record_uses_stable_key_names() {
        let record = SessionRecord {
            last_address: Some("AA:BB".to_string()),
            last_name: None,
            last_known_sample: 61,
            is_stopped: false,
            has_launched_before: true,
        };

        let json = serde_json::to_value(&record).expect("record should serialise");
        assert_eq!(
            serde_json::json!({
                "last_device_address": "AA:BB",
                "last_device_name": null,
                "last_heart_rate": 61,
                "is_stopped": false,
                "has_launched_before": true,
            }),
            json
        );
    }

    #[test]
    fn partial_record_fills_defaults() {
        let record: SessionRecord = serde_json::from_str(r#"{"last_device_address":"AA:BB"}"#)
            .expect("partial record should parse");
        assert_eq!(Some("AA:BB"), record.last_address());
        assert!(!record.has_launched_before());
    }

    #[tokio::test]
    async fn corrupt_file_is_reported_and_ignored_by_the_book() {
        let dir = tempdir().expect("temp dir should be created");
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").expect("fixture should be written");
        let store = FileRecordStore::new(path);

        assert_matches!(store.load(), Err(RecordError::Corrupt { .. }));
        let book = RecordBook::open(Box::new(store));
        assert_eq!(&SessionRecord::default(), book.record());
    }

    #[tokio::test]
    async fn mark_launched_reports_previous_launches() {
        let mut book = RecordBook::open(Box::new(MemoryRecordStore::default()));

        assert!(!book.mark_launched());
        assert!(book.mark_launched());
    }

    #[derive(Debug, Clone, Default)]
    struct CountingStore {
        saved: Arc<Mutex<Vec<SessionRecord>>>,
    }

    impl SessionRecordStore for CountingStore {
        fn load(&self) -> Result<SessionRecord, RecordError> {
            Ok(SessionRecord::default())
        }

        fn save(&self, record: &SessionRecord) -> Result<(), RecordError> {
            self.saved
                .lock()
                .expect("save log lock")
                .push(record.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn rapid_updates_are_coalesced_into_the_latest_write() {
        let store = CountingStore::default();
        let mut book = RecordBook::open(Box::new(store.clone()));

        for value in 1..=50 {
            book.record_sample(value);
        }
        book.close().await;

        let saved = store.saved.lock().expect("save log lock");
        assert_eq!(1, saved.len());
        assert_eq!(50, saved[0].last_known_sample());
    }

    #[tokio::test]
    async fn unchanged_book_writes_nothing() {
        let store = CountingStore::default();
        let mut book = RecordBook::open(Box::new(store.clone()));

        book.set_stopped(false);
        book.close().await;

        assert!(store.saved.lock().expect("save log lock").is_empty());
    }
}
