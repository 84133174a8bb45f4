//! Directory validation shared by backup and restore.

use crate::utils::errors::{FreezerError, Result};
use std::path::{Path, PathBuf};

/// Validate that `path` is an accessible directory.
///
/// When `allow_create` is set a missing directory is created (mode 0777
/// before umask). Returns the path with trailing separators stripped.
pub fn validate_path(path: &Path, allow_create: bool) -> Result<PathBuf> {
    ensure_not_empty(path)?;

    if !path.exists() {
        if !allow_create {
            return Err(FreezerError::invalid_path(path, "does not exist"));
        }

        create_dir_tree(path).map_err(|e| {
            FreezerError::invalid_path(path, format!("cannot be created: {}", e))
        })?;
        tracing::debug!(path = %path.display(), "Created directory");
    }

    if !path.is_dir() {
        return Err(FreezerError::invalid_path(path, "is not a directory"));
    }

    if !is_read_write(path) {
        return Err(FreezerError::invalid_path(
            path,
            "exists but cannot be read and written",
        ));
    }

    Ok(strip_trailing_separator(path))
}

/// Reject an empty path without touching the filesystem.
pub fn ensure_not_empty(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(FreezerError::invalid_path(path, "path is empty"));
    }
    Ok(())
}

#[cfg(unix)]
fn create_dir_tree(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o777)
        .create(path)
}

#[cfg(not(unix))]
fn create_dir_tree(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)
}

#[cfg(unix)]
fn is_read_write(path: &Path) -> bool {
    use nix::unistd::{access, AccessFlags};

    access(path, AccessFlags::R_OK | AccessFlags::W_OK).is_ok()
}

#[cfg(not(unix))]
fn is_read_write(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}

fn strip_trailing_separator(path: &Path) -> PathBuf {
    // Rebuilding from components drops trailing separators and keeps
    // non UTF-8 names intact; "/" stays "/"
    path.components().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_path_is_rejected() {
        let err = validate_path(Path::new(""), true).unwrap_err();
        assert!(matches!(err, FreezerError::InvalidPath { .. }));
    }

    #[test]
    fn test_missing_path_without_create() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let missing = temp_dir.path().join("missing");

        let err = validate_path(&missing, false).unwrap_err();
        assert!(matches!(err, FreezerError::InvalidPath { .. }));
        assert!(!missing.exists());

        Ok(())
    }

    #[test]
    fn test_missing_path_is_created() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let nested = temp_dir.path().join("a/b/c");

        let validated = validate_path(&nested, true).unwrap();
        assert!(nested.is_dir());
        assert_eq!(validated, nested);

        Ok(())
    }

    #[test]
    fn test_trailing_separator_is_stripped() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let with_slash = format!("{}/", temp_dir.path().display());

        let validated = validate_path(Path::new(&with_slash), false).unwrap();
        assert_eq!(validated, temp_dir.path());

        Ok(())
    }

    #[test]
    fn test_file_is_not_a_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, b"x")?;

        let err = validate_path(&file, true).unwrap_err();
        assert!(matches!(err, FreezerError::InvalidPath { .. }));

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_non_utf8_name_is_preserved() -> std::io::Result<()> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp_dir = TempDir::new()?;
        let dir = temp_dir.path().join(OsStr::from_bytes(b"caf\xe9"));
        std::fs::create_dir(&dir)?;

        let validated = validate_path(&dir, false).unwrap();
        assert_eq!(validated, dir);
        assert!(validated.is_dir());

        let mut with_slash = dir.clone().into_os_string();
        with_slash.push("/");
        assert_eq!(validate_path(Path::new(&with_slash), false).unwrap(), dir);

        Ok(())
    }

    #[test]
    fn test_root_keeps_its_separator() {
        assert_eq!(strip_trailing_separator(Path::new("/")), PathBuf::from("/"));
    }
}
