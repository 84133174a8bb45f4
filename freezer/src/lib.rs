//! Freezer library
//!
//! Snapshots a directory into a versioned row of a SQLite table and restores
//! it on demand, using a marker file to skip restores that are already done.

pub mod archive;
pub mod config;
pub mod daemon;
pub mod db;
pub mod executor;
pub mod fs;
pub mod utils;
pub mod watch;

// Re-export commonly used types
pub use config::Config;
pub use executor::{BackupEngine, BackupOutcome, SourcePath};
pub use utils::errors::{FreezerError, Result};
