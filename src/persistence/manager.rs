//! Persistence Manager
//!
//! Owns the on-disk representation of one store: a main file plus a `.backup`
//! and a transient `.tmp` sibling.
//!
//! ## Write Protocol
//!
//! Both [`PersistenceManager::save`] and [`PersistenceManager::save_sync`]
//! perform the same steps in the same order:
//!
//! ```text
//!   1. serialize ─► compress ─► encrypt          (payload)
//!   2. write payload to <path>.tmp and fsync
//!   3. copy <path> to <path>.backup              (only if <path> exists)
//!   4. rename <path>.tmp over <path>
//!   5. emit Save
//! ```
//!
//! The backup is always the state just before the newest successful write.
//! A crash before step 4 leaves the main file untouched; the orphaned temp
//! file is overwritten by the next save.
//!
//! ## Single-Flight Writes
//!
//! At most one write runs at a time. An async save that arrives while another
//! write is running does not start its own; it waits for the running one and
//! returns that write's outcome ([`SaveOutcome::Joined`]). A synchronous save
//! cannot wait, so it fails with [`StoreError::Concurrency`] instead.
//!
//! ## Load and Recovery
//!
//! A missing main file loads as an empty document. Any failure reading the
//! main file (I/O, wrong key, corrupt bytes, malformed JSON) restores the
//! backup over it and retries exactly once.

use crate::codec::Codec;
use crate::error::{Result, StoreError};
use crate::events::{Event, EventBus};
use crate::persistence::document::Document;
use bytes::Bytes;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Suffix of the last-known-good copy.
pub const BACKUP_SUFFIX: &str = ".backup";

/// Suffix of the in-progress write.
pub const TEMP_SUFFIX: &str = ".tmp";

/// The three files belonging to one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    pub main: PathBuf,
    pub backup: PathBuf,
    pub temp: PathBuf,
}

impl StorePaths {
    pub fn new(main: impl Into<PathBuf>) -> Self {
        let main = main.into();
        Self {
            backup: with_suffix(&main, BACKUP_SUFFIX),
            temp: with_suffix(&main, TEMP_SUFFIX),
            main,
        }
    }

    /// Directory holding the files, if the path has one.
    pub fn dir(&self) -> Option<&Path> {
        self.main.parent().filter(|p| !p.as_os_str().is_empty())
    }
}

/// Only `NotFound` counts as absent; any other stat failure is an error.
fn exists_sync(path: &Path) -> Result<bool> {
    path.try_exists()
        .map_err(|e| StoreError::io("failed to stat store file", path, e))
}

async fn exists_async(path: &Path) -> Result<bool> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| StoreError::io("failed to stat store file", path, e))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// How a successful async save was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// This call performed the write.
    Written,
    /// Another write was already running; this call shared its result.
    Joined,
}

/// `None` while the write runs, then the shared outcome.
type WriteOutcome = Option<Result<()>>;

/// Marks a write as in flight. Dropping it frees the slot, so a cancelled
/// leader never wedges later saves.
struct WriteSlot<'a> {
    slot: &'a Mutex<Option<watch::Receiver<WriteOutcome>>>,
    mine: watch::Receiver<WriteOutcome>,
    done: watch::Sender<WriteOutcome>,
}

impl WriteSlot<'_> {
    /// Frees the slot, then hands `outcome` to everyone who joined.
    fn finish(self, outcome: &Result<()>) {
        self.release();
        let _ = self.done.send(Some(outcome.clone()));
    }

    fn release(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|running| running.same_channel(&self.mine)) {
            *slot = None;
        }
    }
}

impl Drop for WriteSlot<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

enum Claim<'a> {
    Leader(WriteSlot<'a>),
    Follower(watch::Receiver<WriteOutcome>),
}

/// Durable storage for one store's [`Document`].
pub struct PersistenceManager {
    paths: StorePaths,
    codec: Codec,
    pretty: bool,
    events: EventBus,
    in_flight: Mutex<Option<watch::Receiver<WriteOutcome>>>,
}

impl std::fmt::Debug for PersistenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceManager")
            .field("paths", &self.paths)
            .field("compression", &self.codec.compresses())
            .field("encryption", &self.codec.encrypts())
            .field("saving", &self.is_saving())
            .finish()
    }
}

impl PersistenceManager {
    /// Creates a manager for `path`, creating its parent directory if needed.
    pub fn new(path: impl Into<PathBuf>, codec: Codec, pretty: bool, events: EventBus) -> Result<Self> {
        let paths = StorePaths::new(path);
        if let Some(dir) = paths.dir() {
            fs::create_dir_all(dir)
                .map_err(|e| StoreError::io("failed to create store directory", dir, e))?;
        }
        Ok(Self {
            paths,
            codec,
            pretty,
            events,
            in_flight: Mutex::new(None),
        })
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    pub fn file_path(&self) -> &Path {
        &self.paths.main
    }

    /// Returns true while a write holds the single-flight slot.
    pub fn is_saving(&self) -> bool {
        self.slot().is_some()
    }

    fn slot(&self) -> MutexGuard<'_, Option<watch::Receiver<WriteOutcome>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self) -> Claim<'_> {
        let mut slot = self.slot();
        if let Some(running) = slot.as_ref() {
            return Claim::Follower(running.clone());
        }
        let (done, mine) = watch::channel(None);
        *slot = Some(mine.clone());
        Claim::Leader(WriteSlot {
            slot: &self.in_flight,
            mine,
            done,
        })
    }

    // ========================================================================
    // SAVE
    // ========================================================================

    /// Writes `document` atomically, or joins a write already in flight.
    pub async fn save(&self, document: &Document) -> Result<SaveOutcome> {
        match self.claim() {
            Claim::Follower(mut running) => {
                debug!(path = %self.paths.main.display(), "Save in flight, joining it");
                let outcome = match running.wait_for(Option::is_some).await {
                    Ok(done) => (*done).clone(),
                    Err(_) => None,
                };
                match outcome {
                    Some(result) => result.map(|_| SaveOutcome::Joined),
                    None => Err(StoreError::Concurrency(
                        "the in-flight save was abandoned before it completed".into(),
                    )),
                }
            }
            Claim::Leader(slot) => {
                let result = self.write_async(document).await;
                self.finish_write(&result, document);
                slot.finish(&result);
                result.map(|_| SaveOutcome::Written)
            }
        }
    }

    /// Writes `document` atomically on the calling thread.
    ///
    /// Fails with [`StoreError::Concurrency`] if an async save is running.
    pub fn save_sync(&self, document: &Document) -> Result<()> {
        let slot = match self.claim() {
            Claim::Leader(slot) => slot,
            Claim::Follower(_) => {
                warn!(path = %self.paths.main.display(), "Synchronous save rejected, async save in flight");
                return Err(StoreError::Concurrency(
                    "cannot save synchronously while an asynchronous save is in progress".into(),
                ));
            }
        };
        let result = self.write_sync(document);
        self.finish_write(&result, document);
        slot.finish(&result);
        result
    }

    fn finish_write(&self, result: &Result<()>, document: &Document) {
        match result {
            Ok(()) => {
                debug!(
                    path = %self.paths.main.display(),
                    keys = document.len(),
                    "Store saved"
                );
                self.events.emit(Event::Save {
                    file_path: self.paths.main.clone(),
                });
            }
            Err(err) => self.report(err),
        }
    }

    fn encode(&self, document: &Document) -> Result<Bytes> {
        self.codec.encode(&document.to_bytes(self.pretty)?)
    }

    fn write_sync(&self, document: &Document) -> Result<()> {
        let payload = self.encode(document)?;
        let paths = &self.paths;

        if let Some(dir) = paths.dir() {
            fs::create_dir_all(dir)
                .map_err(|e| StoreError::io("failed to create store directory", dir, e))?;
        }

        let mut file = fs::File::create(&paths.temp)
            .map_err(|e| StoreError::io("failed to create temp file", &paths.temp, e))?;
        file.write_all(&payload)
            .and_then(|_| file.sync_all())
            .map_err(|e| StoreError::io("failed to write temp file", &paths.temp, e))?;
        drop(file);

        if exists_sync(&paths.main)? {
            fs::copy(&paths.main, &paths.backup)
                .map_err(|e| StoreError::io("failed to back up store file", &paths.backup, e))?;
        }

        fs::rename(&paths.temp, &paths.main)
            .map_err(|e| StoreError::io("failed to move temp file into place", &paths.main, e))?;

        Ok(())
    }

    async fn write_async(&self, document: &Document) -> Result<()> {
        let payload = self
            .codec
            .encode_async(document.to_bytes(self.pretty)?)
            .await?;
        let paths = &self.paths;

        if let Some(dir) = paths.dir() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io("failed to create store directory", dir, e))?;
        }

        let mut file = tokio::fs::File::create(&paths.temp)
            .await
            .map_err(|e| StoreError::io("failed to create temp file", &paths.temp, e))?;
        file.write_all(&payload)
            .await
            .map_err(|e| StoreError::io("failed to write temp file", &paths.temp, e))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::io("failed to sync temp file", &paths.temp, e))?;
        drop(file);

        if exists_async(&paths.main).await? {
            tokio::fs::copy(&paths.main, &paths.backup)
                .await
                .map_err(|e| StoreError::io("failed to back up store file", &paths.backup, e))?;
        }

        tokio::fs::rename(&paths.temp, &paths.main)
            .await
            .map_err(|e| StoreError::io("failed to move temp file into place", &paths.main, e))?;

        Ok(())
    }

    // ========================================================================
    // LOAD
    // ========================================================================

    /// Reads the store file, falling back to the backup on failure.
    pub fn load_sync(&self) -> Result<Document> {
        let present = exists_sync(&self.paths.main).map_err(|e| self.reported(e))?;
        if !present {
            debug!(path = %self.paths.main.display(), "No store file yet, starting empty");
            return Ok(Document::empty());
        }
        match self.read_sync(&self.paths.main) {
            Ok(doc) => Ok(doc),
            Err(err) => self.recover_sync(err),
        }
    }

    /// Async variant of [`PersistenceManager::load_sync`].
    pub async fn load(&self) -> Result<Document> {
        let present = exists_async(&self.paths.main).await.map_err(|e| self.reported(e))?;
        if !present {
            debug!(path = %self.paths.main.display(), "No store file yet, starting empty");
            return Ok(Document::empty());
        }
        match self.read_async(&self.paths.main).await {
            Ok(doc) => Ok(doc),
            Err(err) => self.recover_async(err).await,
        }
    }

    fn read_sync(&self, path: &Path) -> Result<Document> {
        let stored = fs::read(path).map_err(|e| StoreError::io("failed to read store file", path, e))?;
        let plain = self.codec.decode(&stored)?;
        Document::from_slice(&plain)
    }

    async fn read_async(&self, path: &Path) -> Result<Document> {
        let stored = tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::io("failed to read store file", path, e))?;
        let plain = self.codec.decode_async(Bytes::from(stored)).await?;
        Document::from_slice(&plain)
    }

    fn recover_sync(&self, err: StoreError) -> Result<Document> {
        match exists_sync(&self.paths.backup) {
            Ok(true) => {}
            Ok(false) => {
                self.report(&err);
                return Err(err);
            }
            Err(stat_err) => {
                self.report(&stat_err);
                return Err(stat_err);
            }
        }
        self.warn_restoring(&err);

        let restored = fs::copy(&self.paths.backup, &self.paths.main)
            .map_err(|e| StoreError::io("failed to restore backup", &self.paths.main, e))
            .and_then(|_| self.read_sync(&self.paths.main));
        self.finish_recovery(restored)
    }

    async fn recover_async(&self, err: StoreError) -> Result<Document> {
        match exists_async(&self.paths.backup).await {
            Ok(true) => {}
            Ok(false) => {
                self.report(&err);
                return Err(err);
            }
            Err(stat_err) => {
                self.report(&stat_err);
                return Err(stat_err);
            }
        }
        self.warn_restoring(&err);

        let restored = match tokio::fs::copy(&self.paths.backup, &self.paths.main).await {
            Ok(_) => self.read_async(&self.paths.main).await,
            Err(e) => Err(StoreError::io("failed to restore backup", &self.paths.main, e)),
        };
        self.finish_recovery(restored)
    }

    fn warn_restoring(&self, err: &StoreError) {
        warn!(
            path = %self.paths.main.display(),
            backup = %self.paths.backup.display(),
            error = %err,
            "Store file unreadable, restoring from backup"
        );
    }

    fn finish_recovery(&self, restored: Result<Document>) -> Result<Document> {
        match restored {
            Ok(doc) => {
                info!(
                    path = %self.paths.main.display(),
                    keys = doc.len(),
                    "Store file restored from backup"
                );
                Ok(doc)
            }
            Err(retry_err) => {
                let err = StoreError::BackupCorrupted {
                    path: self.paths.backup.clone(),
                    reason: Box::new(retry_err),
                };
                self.report(&err);
                Err(err)
            }
        }
    }

    fn reported(&self, err: StoreError) -> StoreError {
        self.report(&err);
        err
    }

    fn report(&self, err: &StoreError) {
        error!(path = %self.paths.main.display(), error = %err, "Persistence failure");
        self.events.emit(Event::Error { cause: err.clone() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Cipher;
    use crate::events::EventKind;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::future::Future;
    use std::sync::{Arc, Mutex};
    use std::task::Poll;
    use std::time::Duration;
    use tempfile::TempDir;

    fn doc(pairs: &[(&str, serde_json::Value)]) -> Document {
        let data: BTreeMap<String, serde_json::Value> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        Document::new(data, BTreeMap::new())
    }

    fn manager(dir: &TempDir, codec: Codec) -> (PersistenceManager, Arc<Mutex<Vec<Event>>>) {
        let events = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        events.subscribe(move |e| sink.lock().unwrap().push(e.clone()));
        let m = PersistenceManager::new(dir.path().join("store.json"), codec, false, events).unwrap();
        (m, log)
    }

    fn kinds(log: &Arc<Mutex<Vec<Event>>>) -> Vec<EventKind> {
        log.lock().unwrap().iter().map(Event::kind).collect()
    }

    async fn drive<F: Future>(task: &mut tokio_test::task::Spawn<F>) -> F::Output {
        loop {
            if let Poll::Ready(out) = task.poll() {
                return out;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[test]
    fn test_paths() {
        let paths = StorePaths::new("data/app.json");
        assert_eq!(paths.backup, PathBuf::from("data/app.json.backup"));
        assert_eq!(paths.temp, PathBuf::from("data/app.json.tmp"));
        assert_eq!(paths.dir(), Some(Path::new("data")));
        assert_eq!(StorePaths::new("bare.json").dir(), None);
    }

    #[test]
    fn test_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/store.json");
        PersistenceManager::new(&nested, Codec::plain(), false, EventBus::new()).unwrap();
        assert!(dir.path().join("a/b").is_dir());
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let (m, log) = manager(&dir, Codec::plain());
        assert!(m.load_sync().unwrap().is_empty());
        assert!(kinds(&log).is_empty());
    }

    #[test]
    fn test_sync_round_trip_and_backup() {
        let dir = TempDir::new().unwrap();
        let (m, log) = manager(&dir, Codec::plain());

        m.save_sync(&doc(&[("a", json!(1))])).unwrap();
        assert!(!m.paths().backup.exists());
        let first_bytes = fs::read(&m.paths().main).unwrap();

        m.save_sync(&doc(&[("a", json!(2))])).unwrap();
        assert_eq!(fs::read(&m.paths().backup).unwrap(), first_bytes);
        assert!(!m.paths().temp.exists());

        let loaded = m.load_sync().unwrap();
        assert_eq!(loaded.data["a"], json!(2));
        assert_eq!(kinds(&log), vec![EventKind::Save, EventKind::Save]);
    }

    #[tokio::test]
    async fn test_async_and_sync_paths_interoperate() {
        let dir = TempDir::new().unwrap();
        let codec = Codec::new(true, Some(Cipher::from_passphrase("pw")));
        let (m, _) = manager(&dir, codec);

        m.save(&doc(&[("x", json!({"deep": [1, 2, 3]}))])).await.unwrap();
        assert_eq!(m.load_sync().unwrap().data["x"], json!({"deep": [1, 2, 3]}));

        m.save_sync(&doc(&[("y", json!("z"))])).unwrap();
        assert_eq!(m.load().await.unwrap().data["y"], json!("z"));
    }

    #[test]
    fn test_recovers_from_corrupt_main() {
        let dir = TempDir::new().unwrap();
        let (m, _) = manager(&dir, Codec::plain());

        m.save_sync(&doc(&[("v", json!(1))])).unwrap();
        m.save_sync(&doc(&[("v", json!(2))])).unwrap();
        fs::write(&m.paths().main, b"{ not json").unwrap();

        let loaded = m.load_sync().unwrap();
        assert_eq!(loaded.data["v"], json!(1));

        // main file was repaired from the backup
        let repaired = Document::from_slice(&fs::read(&m.paths().main).unwrap()).unwrap();
        assert_eq!(repaired.data["v"], json!(1));
    }

    #[tokio::test]
    async fn test_async_recovery_from_corrupt_main() {
        let dir = TempDir::new().unwrap();
        let (m, _) = manager(&dir, Codec::new(true, None));

        m.save(&doc(&[("v", json!("old"))])).await.unwrap();
        m.save(&doc(&[("v", json!("new"))])).await.unwrap();
        fs::write(&m.paths().main, b"\x00\x01garbage").unwrap();

        assert_eq!(m.load().await.unwrap().data["v"], json!("old"));
    }

    #[test]
    fn test_corrupt_main_and_backup() {
        let dir = TempDir::new().unwrap();
        let (m, log) = manager(&dir, Codec::plain());

        fs::write(&m.paths().main, b"garbage").unwrap();
        fs::write(&m.paths().backup, b"also garbage").unwrap();

        let err = m.load_sync().unwrap_err();
        assert!(matches!(err, StoreError::BackupCorrupted { .. }));
        assert_eq!(kinds(&log), vec![EventKind::Error]);
    }

    #[test]
    fn test_corrupt_main_without_backup() {
        let dir = TempDir::new().unwrap();
        let (m, log) = manager(&dir, Codec::plain());

        fs::write(&m.paths().main, b"[1, 2").unwrap();

        let err = m.load_sync().unwrap_err();
        assert!(matches!(err, StoreError::Integrity(_)));
        assert_eq!(kinds(&log), vec![EventKind::Error]);
    }

    #[test]
    fn test_wrong_key_is_integrity_error() {
        let dir = TempDir::new().unwrap();
        let (writer, _) = manager(&dir, Codec::new(false, Some(Cipher::from_passphrase("right"))));
        writer.save_sync(&doc(&[("s", json!("secret"))])).unwrap();

        let (reader, _) = manager(&dir, Codec::new(false, Some(Cipher::from_passphrase("wrong"))));
        assert!(matches!(reader.load_sync(), Err(StoreError::Integrity(_))));
    }

    #[tokio::test]
    async fn test_sync_save_rejected_while_async_in_flight() {
        let dir = TempDir::new().unwrap();
        let (m, _) = manager(&dir, Codec::plain());
        let d = doc(&[("k", json!(1))]);

        let mut leader = tokio_test::task::spawn(m.save(&d));
        assert!(leader.poll().is_pending());
        assert!(m.is_saving());

        let err = m.save_sync(&d).unwrap_err();
        assert!(matches!(err, StoreError::Concurrency(_)));

        assert_eq!(drive(&mut leader).await.unwrap(), SaveOutcome::Written);
        assert!(!m.is_saving());
        m.save_sync(&d).unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_saves_coalesce() {
        let dir = TempDir::new().unwrap();
        let (m, log) = manager(&dir, Codec::plain());
        let first = doc(&[("gen", json!(1))]);
        let later = doc(&[("gen", json!(2))]);

        let mut leader = tokio_test::task::spawn(m.save(&first));
        assert!(leader.poll().is_pending());

        let mut followers: Vec<_> = (0..4).map(|_| tokio_test::task::spawn(m.save(&later))).collect();
        for f in followers.iter_mut() {
            assert!(f.poll().is_pending());
        }

        assert_eq!(drive(&mut leader).await.unwrap(), SaveOutcome::Written);
        for f in followers.iter_mut() {
            assert_eq!(drive(f).await.unwrap(), SaveOutcome::Joined);
        }

        // exactly one write ran, and it carried the leader's document
        assert_eq!(kinds(&log), vec![EventKind::Save]);
        assert_eq!(m.load_sync().unwrap().data["gen"], json!(1));
        assert!(!m.paths().backup.exists());
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_slot() {
        let dir = TempDir::new().unwrap();
        let (m, _) = manager(&dir, Codec::plain());
        let d = doc(&[("k", json!(1))]);

        let mut leader = tokio_test::task::spawn(m.save(&d));
        assert!(leader.poll().is_pending());
        let mut follower = tokio_test::task::spawn(m.save(&d));
        assert!(follower.poll().is_pending());

        drop(leader);
        assert!(!m.is_saving());
        assert!(matches!(
            drive(&mut follower).await,
            Err(StoreError::Concurrency(_))
        ));

        m.save_sync(&d).unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unstatable_main_is_not_treated_as_missing() {
        let dir = TempDir::new().unwrap();
        let (m, log) = manager(&dir, Codec::plain());

        // a symlink pointing at itself fails to stat with ELOOP
        std::os::unix::fs::symlink(&m.paths().main, &m.paths().main).unwrap();

        assert!(matches!(m.load_sync(), Err(StoreError::Persistence { .. })));
        assert!(matches!(m.load().await, Err(StoreError::Persistence { .. })));
        assert_eq!(kinds(&log), vec![EventKind::Error, EventKind::Error]);

        assert!(m.save_sync(&doc(&[("k", json!(1))])).is_err());
        assert!(!m.paths().backup.exists());
    }

    #[test]
    fn test_failed_write_reports_error() {
        let dir = TempDir::new().unwrap();
        let (m, log) = manager(&dir, Codec::plain());

        // a directory squatting on the temp path makes the write fail
        fs::create_dir_all(&m.paths().temp).unwrap();

        let err = m.save_sync(&doc(&[("k", json!(1))])).unwrap_err();
        assert!(matches!(err, StoreError::Persistence { .. }));
        assert_eq!(kinds(&log), vec![EventKind::Error]);
        assert!(!m.is_saving());
    }
}
