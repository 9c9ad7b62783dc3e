//! File system helpers used by backups and archive updates.
//!
//! All helpers are synchronous; async callers run them inside
//! `tokio::task::spawn_blocking`.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

/// Counts of what a [`copy_dir`] call copied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
    pub files: u64,
    pub dirs: u64,
    pub symlinks: u64,
    pub bytes: u64,
}

/// Create `path` and its parents if missing.
///
/// Fails when the path exists but is not a directory.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Recursively copy `src` into `dst`, overwriting files that already exist in `dst`.
///
/// `skip` receives each entry's path relative to `src`; returning `true` skips the
/// entry and, for directories, everything below it. Symlinks are recreated as
/// symlinks on Unix rather than followed.
pub fn copy_dir<F>(src: &Path, dst: &Path, skip: F) -> Result<CopyStats>
where
    F: Fn(&Path) -> bool,
{
    ensure_dir(dst)?;
    let mut stats = CopyStats::default();

    let walker = WalkDir::new(src).follow_links(false).min_depth(1).into_iter().filter_entry(|entry| {
        entry.path().strip_prefix(src).map(|rel| !skip(rel)).unwrap_or(true)
    });

    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("{} escaped {}", entry.path().display(), src.display()))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            ensure_dir(&target)?;
            stats.dirs += 1;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
            stats.symlinks += 1;
        } else if file_type.is_file() {
            stats.bytes += fs::copy(entry.path(), &target).with_context(|| {
                format!("Failed to copy {} to {}", entry.path().display(), target.display())
            })?;
            stats.files += 1;
        }
    }

    Ok(stats)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link = fs::read_link(src).with_context(|| format!("Failed to read link {}", src.display()))?;
    if dst.symlink_metadata().is_ok() {
        remove_path(dst)?;
    }
    std::os::unix::fs::symlink(&link, dst)
        .with_context(|| format!("Failed to create symlink {}", dst.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        copy_dir(src, dst, |_| false).map(|_| ())
    } else {
        fs::copy(src, dst)
            .map(|_| ())
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dst.display()))
    }
}

/// Remove every entry under `dst` that has no counterpart at the same relative path
/// under `reference`. Returns the number of entries removed.
///
/// `keep` receives paths relative to `dst`; a kept entry and everything below it is
/// left alone.
pub fn prune_missing<F>(dst: &Path, reference: &Path, keep: F) -> Result<u64>
where
    F: Fn(&Path) -> bool,
{
    let mut removed = 0;
    let mut walker = WalkDir::new(dst).follow_links(false).min_depth(1).into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dst.display()))?;
        let rel = entry
            .path()
            .strip_prefix(dst)
            .with_context(|| format!("{} escaped {}", entry.path().display(), dst.display()))?;
        let is_dir = entry.file_type().is_dir();

        if keep(rel) {
            if is_dir {
                walker.skip_current_dir();
            }
            continue;
        }

        if reference.join(rel).symlink_metadata().is_err() {
            remove_path(entry.path())?;
            removed += 1;
            if is_dir {
                walker.skip_current_dir();
            }
        }
    }

    Ok(removed)
}

fn remove_path(path: &Path) -> Result<()> {
    let metadata = path.symlink_metadata()?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .with_context(|| format!("Failed to remove {}", path.display()))
}

/// Remove a directory tree; a missing directory is not an error.
pub fn remove_dir_all(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {}", path.display()))?;
    }
    Ok(())
}

/// Remove `path` entirely and recreate it empty.
pub fn reset_dir(path: &Path) -> Result<()> {
    remove_dir_all(path)?;
    fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))
}

/// Lexically normalize a path: drop `.` and resolve `..` without touching the disk.
#[must_use]
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                }
            }
            c => components.push(c),
        }
    }

    components.iter().collect()
}
