//! Test utilities for mr-upgrade
//!
//! Helpers for building throwaway MunkiReport installs, release tarballs and fake
//! tools in temporary directories, so tests never touch a real install.
//!
//! # Example
//!
//! ```rust,no_run
//! use mr_upgrade::test_utils::InstallFixture;
//!
//! let fixture = InstallFixture::new("4.2.1")
//!     .env("CONNECTION_DRIVER=sqlite\n")
//!     .sqlite_database("data")
//!     .build()
//!     .unwrap();
//! assert!(fixture.root().join("app/helpers/site_helper.php").is_file());
//! ```

pub mod fixtures;

pub use fixtures::{InstallFixture, InstallFixtureBuilder, snapshot_tree, write_release_tarball};
#[cfg(unix)]
pub use fixtures::write_script;

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. `level` wins over `RUST_LOG`; with neither,
/// tests run without a subscriber.
///
/// ```bash
/// RUST_LOG=upgrade=debug,process=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
