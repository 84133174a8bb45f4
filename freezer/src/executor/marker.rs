//! Marker file recording the last confirmed sync of a directory.
//!
//! The marker is a cache of server state, serialized as `.md5` inside the
//! managed directory. Losing or corrupting it only costs a full re-check
//! against the revision table, so every failure here degrades to a warning.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Marker file name, excluded from every archive
pub const MARKER_FILE_NAME: &str = ".md5";

/// Contents of a marker file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    #[serde(default)]
    pub path: String,

    #[serde(rename = "time_stamp", default)]
    pub timestamp: i64,

    #[serde(rename = "check_sum", default)]
    pub checksum: Option<String>,
}

impl Marker {
    /// True when this marker records exactly the given stored revision state
    pub fn matches(&self, timestamp: i64, checksum: &str) -> bool {
        self.timestamp == timestamp && self.checksum.as_deref() == Some(checksum)
    }
}

/// Reads and writes marker files
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkerStore;

impl MarkerStore {
    pub fn marker_path(dir: &Path) -> PathBuf {
        dir.join(MARKER_FILE_NAME)
    }

    /// Load the marker for `dir`. A missing or unreadable marker yields the
    /// default (timestamp 0, no checksum).
    pub fn load(&self, dir: &Path) -> Marker {
        let path = Self::marker_path(dir);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Marker::default(),
            Err(e) => {
                warn!(marker = %path.display(), error = %e, "Unable to read marker file");
                return Marker::default();
            }
        };

        match serde_json::from_str::<Marker>(&content) {
            Ok(marker) => marker,
            Err(e) => {
                warn!(marker = %path.display(), error = %e, "Ignoring corrupt marker file");
                Marker::default()
            }
        }
    }

    /// Write the marker for `dir`. Returns false on failure.
    pub fn save(&self, dir: &Path, timestamp: i64, checksum: &str) -> bool {
        let path = Self::marker_path(dir);
        let marker = Marker {
            path: dir.display().to_string(),
            timestamp,
            checksum: Some(checksum.to_string()),
        };

        let result = serde_json::to_string(&marker)
            .map_err(std::io::Error::from)
            .and_then(|json| std::fs::write(&path, json));

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(marker = %path.display(), error = %e, "Unable to write marker file");
                false
            }
        }
    }

    /// Remove the marker for `dir`. Returns false if nothing was removed.
    pub fn delete(&self, dir: &Path) -> bool {
        std::fs::remove_file(Self::marker_path(dir)).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_marker_defaults() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let marker = MarkerStore.load(temp_dir.path());

        assert_eq!(marker.timestamp, 0);
        assert_eq!(marker.checksum, None);

        Ok(())
    }

    #[test]
    fn test_save_then_load() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = MarkerStore;

        assert!(store.save(temp_dir.path(), 1_700_000_000, "abc123"));
        let marker = store.load(temp_dir.path());

        assert_eq!(marker.path, temp_dir.path().display().to_string());
        assert_eq!(marker.timestamp, 1_700_000_000);
        assert_eq!(marker.checksum.as_deref(), Some("abc123"));
        assert!(marker.matches(1_700_000_000, "abc123"));
        assert!(!marker.matches(1_700_000_001, "abc123"));

        Ok(())
    }

    #[test]
    fn test_wire_format() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        MarkerStore.save(temp_dir.path(), 42, "d41d8cd98f00b204e9800998ecf8427e");

        let raw = std::fs::read_to_string(MarkerStore::marker_path(temp_dir.path()))?;
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert_eq!(value["time_stamp"], 42);
        assert_eq!(value["check_sum"], "d41d8cd98f00b204e9800998ecf8427e");
        assert!(value["path"].is_string());

        Ok(())
    }

    #[test]
    fn test_corrupt_marker_defaults() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        std::fs::write(MarkerStore::marker_path(temp_dir.path()), b"{not json")?;

        assert_eq!(MarkerStore.load(temp_dir.path()), Marker::default());

        Ok(())
    }

    #[test]
    fn test_save_into_missing_directory_fails_softly() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let missing = temp_dir.path().join("gone");

        assert!(!MarkerStore.save(&missing, 1, "x"));

        Ok(())
    }

    #[test]
    fn test_delete() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let store = MarkerStore;

        assert!(!store.delete(temp_dir.path()));
        store.save(temp_dir.path(), 1, "x");
        assert!(store.delete(temp_dir.path()));
        assert_eq!(store.load(temp_dir.path()).timestamp, 0);

        Ok(())
    }
}
