//! Filesystem helpers: directory validation and tree walking.

pub mod validate;
pub mod walker;

pub use validate::validate_path;
