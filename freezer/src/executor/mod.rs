//! Backup engine - freezes a directory into a revision row and defrosts it.
//!
//! `backup` walks the source into a temporary zip, stores the zip bytes in
//! the revision table and records the result in the directory's marker file.
//! `restore` goes the other way, skipping the filesystem entirely when the
//! marker already names the stored revision.

pub mod marker;

use crate::archive::checksum::md5_bytes;
use crate::archive::{Archiver, BuildOutcome, TempArchive, ZipBuilder};
use crate::db::codec::{BincodeCodec, BlobCodec, Payload};
use crate::db::revisions::{RevisionStore, RevisionWrite, SqliteRevisionStore};
use crate::fs::validate::{ensure_not_empty, validate_path};
use crate::utils::errors::{FreezerError, Result};
use crate::watch::{EventMask, PathWatcher, WatchEvent, WatchHandle};
use marker::{MarkerStore, MARKER_FILE_NAME};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Result of a successful backup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
    /// A revision row was written
    Stored {
        checksum: String,
        revision_id: i64,
        timestamp: i64,
    },

    /// The source held no files, nothing was written
    EmptySource,
}

impl BackupOutcome {
    pub fn checksum(&self) -> Option<&str> {
        match self {
            BackupOutcome::Stored { checksum, .. } => Some(checksum),
            BackupOutcome::EmptySource => None,
        }
    }
}

/// Backup parameters for a watched directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePath {
    pub storage_id: String,
    pub path: PathBuf,
    pub local_name: Option<String>,
    pub new_revision: bool,
}

impl SourcePath {
    pub fn new(storage_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            storage_id: storage_id.into(),
            path: path.into(),
            local_name: None,
            new_revision: false,
        }
    }

    pub fn with_local_name(mut self, local_name: Option<String>) -> Self {
        self.local_name = local_name.filter(|name| !name.is_empty());
        self
    }

    pub fn with_new_revision(mut self, new_revision: bool) -> Self {
        self.new_revision = new_revision;
        self
    }
}

/// Freezes and defrosts directories
pub struct BackupEngine<S: RevisionStore = SqliteRevisionStore> {
    store: S,
    archiver: Box<dyn Archiver>,
    codec: Box<dyn BlobCodec>,
    markers: MarkerStore,
    watcher: PathWatcher,
    sources: HashMap<WatchHandle, SourcePath>,
}

impl<S: RevisionStore> BackupEngine<S> {
    /// Engine with zip archives, bincode payloads and no file watching
    pub fn new(store: S) -> Self {
        Self {
            store,
            archiver: Box::new(ZipBuilder::new()),
            codec: Box::new(BincodeCodec),
            markers: MarkerStore,
            watcher: PathWatcher::noop(),
            sources: HashMap::new(),
        }
    }

    pub fn with_archiver(mut self, archiver: impl Archiver + 'static) -> Self {
        self.archiver = Box::new(archiver);
        self
    }

    pub fn with_codec(mut self, codec: impl BlobCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn with_watcher(mut self, watcher: PathWatcher) -> Self {
        self.watcher = watcher;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Archive `source` and store it as the current revision of `storage_id`,
    /// or as a new revision when `new_revision` is set.
    pub fn backup(
        &self,
        storage_id: &str,
        source: &Path,
        local_name: Option<&str>,
        new_revision: bool,
    ) -> Result<BackupOutcome> {
        let source = validate_path(source, false)?;
        info!(storage_id, path = %source.display(), new_revision, "Starting backup");

        let archive = match self.archiver.build(&source, local_name)? {
            BuildOutcome::Built(archive) => archive,
            BuildOutcome::EmptySource => {
                info!(storage_id, path = %source.display(), "Source is empty, nothing stored");
                return Ok(BackupOutcome::EmptySource);
            }
        };

        let stored = self.store_archive(storage_id, &source, &archive, new_revision);

        let archive_path = archive.path().to_path_buf();
        if let Err(e) = archive.close() {
            warn!(archive = %archive_path.display(), error = %e, "Failed to remove temporary archive");
        }

        let outcome = stored?;
        if let BackupOutcome::Stored { checksum, revision_id, .. } = &outcome {
            info!(storage_id, revision_id, checksum = %checksum, "Backup complete");
        }
        Ok(outcome)
    }

    fn store_archive(
        &self,
        storage_id: &str,
        source: &Path,
        archive: &TempArchive,
        new_revision: bool,
    ) -> Result<BackupOutcome> {
        let checksum = archive
            .checksum()
            .map_err(|e| FreezerError::archive(archive.path().display(), e))?;
        let bytes = archive
            .read_bytes()
            .map_err(|e| FreezerError::archive(archive.path().display(), e))?;

        let current = self.store.current_revision(storage_id)?;

        let mut payload = Payload::new();
        payload.insert(storage_id.to_string(), bytes);
        let blob = self.codec.encode(&payload)?;

        let timestamp = chrono::Utc::now().timestamp();
        let write = RevisionWrite {
            blob: &blob,
            timestamp,
            checksum: &checksum,
        };
        let revision_id = self.store.upsert(storage_id, current, &write, new_revision)?;

        if !self.markers.save(source, timestamp, &checksum) {
            warn!(storage_id, path = %source.display(), "Backup stored but marker not updated");
        }

        Ok(BackupOutcome::Stored {
            checksum,
            revision_id,
            timestamp,
        })
    }

    /// Bring `path` in line with the current revision of `storage_id`.
    ///
    /// Returns false when nothing was ever stored for `storage_id` (the
    /// filesystem is left untouched) or the stored row is older than the
    /// marker. Returns true once `path` holds the stored revision.
    pub fn restore(&self, storage_id: &str, path: &Path, local_name: Option<&str>) -> Result<bool> {
        ensure_not_empty(path)?;

        let Some(revision_id) = self.store.current_revision(storage_id)? else {
            info!(storage_id, "Nothing stored yet, skipping restore");
            return Ok(false);
        };

        let path = validate_path(path, true)?;
        let marker = self.markers.load(&path);

        let Some(row) = self.store.fetch(storage_id, revision_id, marker.timestamp)? else {
            info!(
                storage_id,
                revision_id,
                not_before = marker.timestamp,
                "No revision newer than the marker, skipping restore"
            );
            return Ok(false);
        };

        if marker.matches(row.timestamp, &row.checksum) {
            debug!(storage_id, revision_id, "Marker matches stored revision");
            return Ok(true);
        }

        let mut payload = self.codec.decode(&row.data_blob)?;
        let data = payload.remove(storage_id).unwrap_or_default();
        if data.is_empty() {
            warn!(storage_id, revision_id, "Stored revision carries no archive data");
            return Ok(true);
        }

        let stored = md5_bytes(&data);
        if stored != row.checksum {
            warn!(
                storage_id,
                revision_id,
                stored = %stored,
                recorded = %row.checksum,
                "Stored archive does not match its recorded checksum, extracting anyway"
            );
        }

        let archive = self.archiver.materialize(&data)?;
        drop(data);

        if self.local_checksum(&path, local_name).as_deref() == Some(row.checksum.as_str()) {
            info!(storage_id, revision_id, path = %path.display(), "Directory already current");
        } else {
            if let Err(e) = self.archiver.extract(&archive, &path) {
                error!(storage_id, revision_id, path = %path.display(), error = %e, "Restore failed");
                return Err(e);
            }
            info!(storage_id, revision_id, path = %path.display(), "Revision restored");
        }

        let archive_path = archive.path().to_path_buf();
        if let Err(e) = archive.close() {
            warn!(archive = %archive_path.display(), error = %e, "Failed to remove temporary archive");
        }

        if !self.markers.save(&path, row.timestamp, &row.checksum) {
            warn!(storage_id, path = %path.display(), "Restore done but marker not updated");
        }

        Ok(true)
    }

    /// Checksum of what a backup of `path` would store right now, if anything
    fn local_checksum(&self, path: &Path, local_name: Option<&str>) -> Option<String> {
        let local_name = local_name.filter(|name| !name.trim_matches('/').is_empty());
        let root = match local_name {
            Some(name) => path.join(name.trim_matches('/')),
            None => path.to_path_buf(),
        };
        if !root.is_dir() {
            return None;
        }

        match self.archiver.build(&root, local_name) {
            Ok(BuildOutcome::Built(archive)) => archive.checksum().ok(),
            Ok(BuildOutcome::EmptySource) => None,
            Err(e) => {
                debug!(path = %root.display(), error = %e, "Unable to snapshot local directory");
                None
            }
        }
    }

    /// Watch `source.path` and back it up whenever it changes. Returns None
    /// when the engine has no watcher backend.
    pub fn add_source_path(
        &mut self,
        source: SourcePath,
        mask: Option<EventMask>,
    ) -> Result<Option<WatchHandle>> {
        let path = validate_path(&source.path, false)?;
        let mask = mask.unwrap_or_default();

        let Some(handle) = self.watcher.watch(&path, mask, None)? else {
            debug!(path = %path.display(), "No watcher available, source not watched");
            return Ok(None);
        };

        info!(storage_id = %source.storage_id, path = %path.display(), "Watching source");
        self.sources.insert(handle, SourcePath { path, ..source });
        Ok(Some(handle))
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourcePath> {
        self.sources.values()
    }

    /// Poll the watcher `iterations` times, then back up every source that
    /// changed. Returns the events seen.
    pub fn monitor(&mut self, iterations: usize, timeout: Duration) -> Result<Vec<WatchEvent>> {
        let mut events = Vec::new();
        for _ in 0..iterations {
            events.extend(
                self.watcher
                    .poll_events(timeout)
                    .into_iter()
                    .filter(|event| !is_marker_event(event)),
            );
        }

        let changed: BTreeSet<WatchHandle> = events.iter().map(|event| event.handle).collect();
        for handle in changed {
            let Some(source) = self.sources.get(&handle).cloned() else {
                continue;
            };

            debug!(storage_id = %source.storage_id, path = %source.path.display(), "Source changed");
            self.backup(
                &source.storage_id,
                &source.path,
                source.local_name.as_deref(),
                source.new_revision,
            )?;
        }

        Ok(events)
    }

    /// Flush pending changes, then drop every watch.
    pub fn close(mut self) -> Result<()> {
        let flushed = if self.sources.is_empty() {
            Ok(Vec::new())
        } else {
            self.monitor(1, Duration::from_millis(250))
        };

        self.watcher.release();
        self.sources.clear();
        debug!("Backup engine closed");

        flushed.map(|_| ())
    }
}

fn is_marker_event(event: &WatchEvent) -> bool {
    event
        .path
        .file_name()
        .is_some_and(|name| name == MARKER_FILE_NAME)
}
