//! mr-upgrade - in-place upgrader for MunkiReport installs
//!
//! Brings an installed MunkiReport (a PHP web application) up to a newer release
//! without losing data: the site is put into maintenance mode, files and database are
//! backed up, the code is updated with git or a release tarball, the database is
//! migrated and the site is brought back up.
//!
//! # Architecture Overview
//!
//! A run is a strictly ordered pipeline driven by
//! [`upgrade::UpgradeOrchestrator`]:
//!
//! ```text
//! Probing -> Comparing -> MaintenanceDown -> BackingUp -> Updating -> Migrating -> MaintenanceUp -> Done
//! ```
//!
//! Every stage after `Comparing` runs with the maintenance sentinel in place. A
//! failure stops the pipeline, leaves the sentinel where it is and maps to a
//! stage-specific exit code.
//!
//! # Core Modules
//!
//! - [`cli`] - argument parsing and the `--info`, check and upgrade modes
//! - [`config`] - run configuration, the optional settings file and the install's `.env`
//! - [`core`] - error types and operator-facing error formatting
//! - [`install`] - read-only probing of an install (version, flavor, database)
//! - [`release`] - release registry lookups
//! - [`upgrade`] - the stages and the orchestrator that sequences them
//! - [`process`] - external tool execution with timeouts
//! - [`version`] - lenient version parsing and comparison
//! - [`utils`] - filesystem helpers
//!
//! # Safety
//!
//! Nothing is changed unless `--upgrade true` is given without `--dry-run`. Backups
//! never overwrite an existing snapshot, and an archive update never replaces
//! `.env`, `local/` or the SQLite datastore.

pub mod cli;
pub mod config;
pub mod core;
pub mod install;
pub mod process;
pub mod release;
pub mod upgrade;
pub mod utils;
pub mod version;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
