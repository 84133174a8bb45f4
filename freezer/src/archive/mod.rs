//! Archive capability used by the backup engine.
//!
//! The engine holds an [`Archiver`] by value so the zip implementation can be
//! swapped for a test double or another format. Every archive produced here
//! lives in a [`TempArchive`], which deletes its file when dropped.

pub mod checksum;
pub mod zip_builder;

pub use zip_builder::ZipBuilder;

use crate::utils::errors::Result;
use std::fs::File;
use std::io;
use std::path::Path;
use tempfile::NamedTempFile;

/// Result of archiving a source directory
#[derive(Debug)]
pub enum BuildOutcome {
    /// A finished archive, ready to be stored
    Built(TempArchive),

    /// The source holds no files; nothing to store
    EmptySource,
}

/// Builds, materializes and extracts archives
pub trait Archiver: Send + Sync {
    /// Archive `source`, placing entries under `local_name/` when given.
    fn build(&self, source: &Path, local_name: Option<&str>) -> Result<BuildOutcome>;

    /// Write previously stored archive bytes verbatim to a temporary file.
    fn materialize(&self, data: &[u8]) -> Result<TempArchive>;

    /// Extract `archive` into `destination`, overwriting existing files.
    fn extract(&self, archive: &TempArchive, destination: &Path) -> Result<()>;
}

/// A temporary archive file owned by a single engine call
#[derive(Debug)]
pub struct TempArchive {
    file: NamedTempFile,
}

impl TempArchive {
    /// Create an empty temporary file in the system temp directory
    pub fn create() -> io::Result<Self> {
        let file = tempfile::Builder::new()
            .prefix("freezer-")
            .suffix(".zip")
            .tempfile()?;

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub(crate) fn as_file_mut(&mut self) -> &mut File {
        self.file.as_file_mut()
    }

    /// Lowercase hex MD5 of the archive bytes
    pub fn checksum(&self) -> io::Result<String> {
        checksum::md5_file(self.path())
    }

    pub fn read_bytes(&self) -> io::Result<Vec<u8>> {
        std::fs::read(self.path())
    }

    /// Size of the archive file in bytes
    pub fn size(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(self.path())?.len())
    }

    /// Delete the file now, reporting any failure. Dropping also deletes it,
    /// but silently.
    pub fn close(self) -> io::Result<()> {
        self.file.close()
    }
}
