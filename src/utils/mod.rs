//! Shared helpers.
//!
//! - [`fs`] - directory creation, recursive copies and path normalization

pub mod fs;

pub use fs::{copy_dir, ensure_dir, normalize_path, prune_missing, remove_dir_all, reset_dir};
