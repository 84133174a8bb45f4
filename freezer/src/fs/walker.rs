//! Directory traversal for archive building.
//!
//! Walks a source tree in a stable (file name sorted) order and applies the
//! freezer's exclusion policy, so that two walks of an unchanged tree yield
//! the same entry list.

use crate::executor::marker::MARKER_FILE_NAME;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Relative path prefixes that never go into an archive.
pub const EXCLUDED_PREFIXES: &[&str] = &[".private/app.store", "swagger"];

/// Options for directory walking
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Follow symbolic links
    pub follow_links: bool,

    /// Skip any entry whose relative path starts with one of these
    pub excluded_prefixes: Vec<String>,

    /// Skip any entry with one of these file names, wherever it sits
    pub excluded_names: Vec<String>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            follow_links: false,
            excluded_prefixes: EXCLUDED_PREFIXES.iter().map(|p| p.to_string()).collect(),
            excluded_names: vec![MARKER_FILE_NAME.to_string()],
        }
    }
}

/// An entry discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the entry
    pub path: PathBuf,

    /// Relative path from the root
    pub relative_path: PathBuf,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Is this a directory?
    pub is_dir: bool,

    /// Unix mode bits, if the platform has them
    pub mode: Option<u32>,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// Symlinks are resolved to their target file; symlinks to directories
    /// and broken symlinks yield None.
    fn from_entry(entry: &DirEntry, root: &Path) -> std::io::Result<Option<Self>> {
        let path = entry.path().to_path_buf();
        let relative_path = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
        let is_symlink = entry.path_is_symlink();

        let metadata = if is_symlink {
            match std::fs::metadata(&path) {
                Ok(resolved) if resolved.is_dir() => return Ok(None),
                Ok(resolved) => resolved,
                Err(_) => return Ok(None),
            }
        } else {
            entry.metadata()?
        };

        #[cfg(unix)]
        let mode = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };

        #[cfg(not(unix))]
        let mode = None;

        Ok(Some(Self {
            path,
            relative_path,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            is_dir: metadata.is_dir(),
            mode,
        }))
    }

    /// Relative path with `/` separators, as stored inside a zip.
    pub fn archive_name(&self) -> String {
        to_archive_name(&self.relative_path)
    }
}

/// Walk a directory tree and collect every file and directory below `root`
/// (the root itself is not included), honouring the exclusion policy.
///
/// # Example
/// ```no_run
/// use freezer::fs::walker::{walk_directory, WalkOptions};
/// use std::path::Path;
///
/// let entries = walk_directory(Path::new("/data"), &WalkOptions::default()).unwrap();
/// println!("Found {} entries", entries.len());
/// ```
pub fn walk_directory(root: &Path, options: &WalkOptions) -> std::io::Result<Vec<FileInfo>> {
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !should_exclude(entry, root, options));

    for entry in walker {
        let entry = entry?;

        if let Some(info) = FileInfo::from_entry(&entry, root)? {
            entries.push(info);
        }
    }

    Ok(entries)
}

/// Check if an entry falls under the exclusion policy
fn should_exclude(entry: &DirEntry, root: &Path, options: &WalkOptions) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    if options.excluded_names.iter().any(|name| *name == file_name) {
        return true;
    }

    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
    let name = to_archive_name(relative);

    options
        .excluded_prefixes
        .iter()
        .any(|prefix| name.starts_with(prefix.as_str()))
}

fn to_archive_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(entries: &[FileInfo]) -> Vec<String> {
        entries.iter().map(|e| e.archive_name()).collect()
    }

    #[test]
    fn test_walk_empty_directory() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let entries = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert!(entries.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_includes_directories_in_sorted_order() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;

        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("b.txt"), b"content1")?;
        fs::write(temp_dir.path().join("a.txt"), b"content2")?;
        fs::write(temp_dir.path().join("subdir/c.txt"), b"content3")?;

        let entries = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(names(&entries), vec!["a.txt", "b.txt", "subdir", "subdir/c.txt"]);
        assert!(entries[2].is_dir);
        assert_eq!(entries[0].size, 8);

        Ok(())
    }

    #[test]
    fn test_exclusion_policy() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        fs::create_dir_all(root.join("swagger"))?;
        fs::create_dir_all(root.join(".private/app.store"))?;
        fs::create_dir_all(root.join(".private/keys"))?;
        fs::create_dir_all(root.join("nested"))?;
        fs::write(root.join("swagger/spec.json"), b"{}")?;
        fs::write(root.join("swagger.yaml"), b"x")?;
        fs::write(root.join(".private/app.store/data"), b"x")?;
        fs::write(root.join(".private/keys/id"), b"x")?;
        fs::write(root.join(MARKER_FILE_NAME), b"{}")?;
        fs::write(root.join("nested").join(MARKER_FILE_NAME), b"{}")?;
        fs::write(root.join("keep.txt"), b"keep")?;

        let entries = walk_directory(root, &WalkOptions::default())?;
        assert_eq!(
            names(&entries),
            vec![".private", ".private/keys", ".private/keys/id", "keep.txt", "nested"]
        );

        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinked_file_is_resolved() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let target = temp_dir.path().join("target.txt");
        fs::write(&target, b"12345")?;
        std::os::unix::fs::symlink(&target, temp_dir.path().join("link.txt"))?;
        std::os::unix::fs::symlink(temp_dir.path(), temp_dir.path().join("loop"))?;

        let entries = walk_directory(temp_dir.path(), &WalkOptions::default())?;
        assert_eq!(names(&entries), vec!["link.txt", "target.txt"]);
        assert_eq!(entries[0].size, 5);

        Ok(())
    }
}
