//! Install and release fixtures.

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use walkdir::WalkDir;

use crate::install::{SQLITE_DATASTORE, VERSION_MARKER};
use crate::upgrade::maintenance::SENTINEL;

fn version_marker(version: &str) -> String {
    format!("<?php\n\n$GLOBALS['version'] = '{version}';\n\nfunction conf($key) {{ return null; }}\n")
}

/// A MunkiReport install in a temporary directory, removed on drop.
pub struct InstallFixture {
    _temp: TempDir,
    root: PathBuf,
}

impl InstallFixture {
    /// Start building an install at `version`.
    #[allow(clippy::new_ret_no_self)]
    #[must_use]
    pub fn new(version: &str) -> InstallFixtureBuilder {
        InstallFixtureBuilder {
            version: version.to_string(),
            git: false,
            env: None,
            sqlite: Some(String::new()),
            maintenance: false,
            files: Vec::new(),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

pub struct InstallFixtureBuilder {
    version: String,
    git: bool,
    env: Option<String>,
    sqlite: Option<String>,
    maintenance: bool,
    files: Vec<(String, String)>,
}

impl InstallFixtureBuilder {
    /// Add a `.git/` directory so the install probes as a git checkout.
    #[must_use]
    pub fn git(mut self) -> Self {
        self.git = true;
        self
    }

    /// Contents of `.env`; without this call the install has none.
    #[must_use]
    pub fn env(mut self, content: &str) -> Self {
        self.env = Some(content.to_string());
        self
    }

    /// Contents of `app/db/db.sqlite`; empty unless set.
    #[must_use]
    pub fn sqlite_database(mut self, content: &str) -> Self {
        self.sqlite = Some(content.to_string());
        self
    }

    /// Leave out `app/db/db.sqlite`.
    #[must_use]
    pub fn no_database(mut self) -> Self {
        self.sqlite = None;
        self
    }

    #[must_use]
    pub fn maintenance_down(mut self) -> Self {
        self.maintenance = true;
        self
    }

    /// Any extra file, path relative to the install root.
    #[must_use]
    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.push((path.to_string(), content.to_string()));
        self
    }

    pub fn build(self) -> Result<InstallFixture> {
        let temp = TempDir::new()?;
        let root = temp.path().join("munkireport");

        write(&root.join(VERSION_MARKER), &version_marker(&self.version))?;
        write(&root.join("public/index.php"), "<?php\nrequire __DIR__ . '/../app/bootstrap.php';\n")?;
        if self.git {
            write(&root.join(".git/HEAD"), "ref: refs/heads/master\n")?;
        }
        if let Some(env) = &self.env {
            write(&root.join(".env"), env)?;
        }
        if let Some(data) = &self.sqlite {
            write(&root.join(SQLITE_DATASTORE), data)?;
        }
        if self.maintenance {
            write(&root.join(SENTINEL), "")?;
        }
        for (path, content) in &self.files {
            write(&root.join(path), content)?;
        }

        Ok(InstallFixture {
            _temp: temp,
            root,
        })
    }
}

fn write(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content).with_context(|| format!("writing fixture {}", path.display()))
}

/// Write a GitHub-style release tarball: everything under one `top_dir/`.
pub fn write_release_tarball(path: &Path, top_dir: &str, version: &str) -> Result<()> {
    let file = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));

    let entries = [
        (VERSION_MARKER.to_string(), version_marker(version)),
        ("public/index.php".to_string(), format!("<?php\n// release {version}\n")),
        ("database/migrate.php".to_string(), "<?php\n// migrate\n".to_string()),
        (".env.example".to_string(), "CONNECTION_DRIVER=\"sqlite\"\n".to_string()),
    ];
    for (rel, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, format!("{top_dir}/{rel}"), content.as_bytes())?;
    }

    builder.into_inner()?.finish()?;
    Ok(())
}

/// Every file under `root` with its content, for before/after comparisons.
pub fn snapshot_tree(root: &Path) -> Result<BTreeMap<PathBuf, Vec<u8>>> {
    let mut snapshot = BTreeMap::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(root)?.to_path_buf();
        let content = if entry.file_type().is_file() { fs::read(entry.path())? } else { Vec::new() };
        snapshot.insert(rel, content);
    }
    Ok(snapshot)
}

/// An executable `sh` script standing in for an external tool.
#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    write(path, &format!("#!/bin/sh\n{body}"))?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}
