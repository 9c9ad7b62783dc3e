//! Shared helpers: a canned release registry and settings files pointing at it.

use anyhow::Result;
use assert_cmd::Command;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

/// Minimal HTTP server answering every request with the same status and body.
pub struct RegistryStub {
    base: String,
    requests: Arc<AtomicUsize>,
}

impl RegistryStub {
    pub fn start(status: u16, body: String) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let base = format!("http://{}", listener.local_addr()?);
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&requests);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut buf = [0_u8; 4096];
                let mut request = Vec::new();
                while let Ok(n) = stream.read(&mut buf) {
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                counter.fetch_add(1, Ordering::SeqCst);

                let response = format!(
                    "HTTP/1.1 {status} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        Ok(Self {
            base,
            requests,
        })
    }

    /// A registry whose latest release is `tag`, downloadable from `tarball`.
    pub fn release(tag: &str, tarball: &Path) -> Result<Self> {
        let body = serde_json::json!({
            "tag_name": tag,
            "tarball_url": format!("file://{}", tarball.display()),
        })
        .to_string();
        Self::start(200, body)
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

/// Write a settings file using `api_base` and scratch space under `dir`.
pub fn write_settings(dir: &Path, api_base: &str, php: Option<&Path>) -> Result<PathBuf> {
    let path = dir.join("mr-upgrade.toml");
    let mut content = String::new();
    if let Some(php) = php {
        content.push_str(&format!("[tools]\nphp = \"{}\"\n\n", php.display()));
    }
    content.push_str(&format!(
        "[timeouts]\nprocess_secs = 30\nnetwork_secs = 5\n\n[release]\napi_base = \"{api_base}\"\nscratch_dir = \"{}\"\n",
        dir.join("scratch").display()
    ));
    std::fs::write(&path, content)?;
    Ok(path)
}

/// The binary with colors and ambient log settings switched off.
pub fn mr_upgrade() -> Command {
    let mut cmd = Command::cargo_bin("mr-upgrade").unwrap();
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

/// Entries of `dir` whose file name starts with `prefix`.
pub fn entries_with_prefix(dir: &Path, prefix: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir) else { return Vec::new() };
    let mut found: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| p.file_name().is_some_and(|n| n.to_string_lossy().starts_with(prefix)))
        .collect();
    found.sort();
    found
}
