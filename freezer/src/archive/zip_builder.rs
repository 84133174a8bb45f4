//! Zip implementation of the archive capability.
//!
//! Archives are deterministic: entries are written in walk order (sorted by
//! file name) with a fixed modification time, so an unchanged directory
//! always produces byte-identical archives and therefore the same checksum.

use super::{Archiver, BuildOutcome, TempArchive};
use crate::fs::walker::{walk_directory, FileInfo, WalkOptions};
use crate::utils::errors::{FreezerError, Result};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info};
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Builds and extracts zip archives
#[derive(Debug, Clone)]
pub struct ZipBuilder {
    compression: CompressionMethod,
}

impl ZipBuilder {
    pub fn new() -> Self {
        Self {
            compression: CompressionMethod::Deflated,
        }
    }

    /// Store entries uncompressed
    #[cfg(test)]
    pub(crate) fn stored() -> Self {
        Self {
            compression: CompressionMethod::Stored,
        }
    }

    fn entry_options(&self, entry: Option<&FileInfo>) -> FileOptions {
        let mut options = FileOptions::default()
            .compression_method(self.compression)
            .last_modified_time(DateTime::default());

        if let Some(entry) = entry {
            options = options.large_file(entry.size >= u64::from(u32::MAX));
            if let Some(mode) = entry.mode {
                options = options.unix_permissions(mode);
            }
        }

        options
    }

    fn write_entries(
        &self,
        archive: &mut TempArchive,
        entries: &[FileInfo],
        prefix: Option<&str>,
    ) -> zip::result::ZipResult<()> {
        let mut zip = ZipWriter::new(archive.as_file_mut());

        if let Some(prefix) = prefix {
            zip.add_directory(prefix, self.entry_options(None))?;
        }

        for entry in entries {
            let name = match prefix {
                Some(prefix) => format!("{}/{}", prefix, entry.archive_name()),
                None => entry.archive_name(),
            };
            let options = self.entry_options(Some(entry));

            if entry.is_dir {
                zip.add_directory(name, options)?;
            } else {
                zip.start_file(name, options)?;
                let mut source = File::open(&entry.path)?;
                io::copy(&mut source, &mut zip)?;
            }
        }

        zip.finish()?;
        Ok(())
    }
}

impl Default for ZipBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Archiver for ZipBuilder {
    fn build(&self, source: &Path, local_name: Option<&str>) -> Result<BuildOutcome> {
        let entries = walk_directory(source, &WalkOptions::default())
            .map_err(|e| FreezerError::archive(source.display(), e))?;

        let file_count = entries.iter().filter(|e| !e.is_dir).count();
        if file_count == 0 {
            info!(path = %source.display(), "Nothing to archive, source holds no files");
            return Ok(BuildOutcome::EmptySource);
        }

        let prefix = local_name
            .map(|name| name.trim_matches('/'))
            .filter(|name| !name.is_empty());

        let mut archive = TempArchive::create()
            .map_err(|e| FreezerError::archive("creating temporary zip file", e))?;

        self.write_entries(&mut archive, &entries, prefix)
            .map_err(|e| FreezerError::archive(source.display(), e))?;

        debug!(
            path = %source.display(),
            archive = %archive.path().display(),
            entries = entries.len(),
            files = file_count,
            bytes = archive.size().unwrap_or_default(),
            "Archive built"
        );

        Ok(BuildOutcome::Built(archive))
    }

    fn materialize(&self, data: &[u8]) -> Result<TempArchive> {
        let mut archive = TempArchive::create()
            .map_err(|e| FreezerError::archive("creating temporary zip file for restoration", e))?;

        // On failure the guard is dropped here, which removes the partial file
        let file = archive.as_file_mut();
        file.write_all(data)
            .and_then(|_| file.flush())
            .map_err(|e| FreezerError::archive("writing temporary zip file for restoration", e))?;

        Ok(archive)
    }

    fn extract(&self, archive: &TempArchive, destination: &Path) -> Result<()> {
        let context = || format!("extracting into {}", destination.display());

        let file = File::open(archive.path()).map_err(|e| FreezerError::archive(context(), e))?;
        let mut zip = ZipArchive::new(file).map_err(|e| FreezerError::archive(context(), e))?;

        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .map_err(|e| FreezerError::archive(context(), e))?;

            let relative = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
                FreezerError::archive(context(), format!("unsafe entry name \"{}\"", entry.name()))
            })?;
            let target = destination.join(&relative);

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| FreezerError::archive(context(), e))?;
                continue;
            }

            write_entry(&mut entry, &target).map_err(|e| {
                FreezerError::archive(context(), format!("{}: {}", relative.display(), e))
            })?;
        }

        debug!(
            archive = %archive.path().display(),
            destination = %destination.display(),
            entries = zip.len(),
            "Archive extracted"
        );

        Ok(())
    }
}

/// Write one file entry, replacing whatever file is already there
fn write_entry(entry: &mut zip::read::ZipFile<'_>, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    // A restored read-only file must not block the next restore
    if target.is_file() {
        fs::remove_file(target)?;
    }

    let mut output = File::create(target)?;
    io::copy(entry, &mut output)?;

    #[cfg(unix)]
    if let Some(mode) = entry.unix_mode() {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(target, fs::Permissions::from_mode(mode & 0o7777))?;
    }

    Ok(())
}
