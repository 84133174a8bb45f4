//! Utility modules for the freezer.

pub mod errors;
pub mod logger;

pub use errors::{FreezerError, Result};
