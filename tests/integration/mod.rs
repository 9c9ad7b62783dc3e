//! Integration test suite for mr-upgrade
//!
//! These tests drive the compiled binary against temporary MunkiReport installs and
//! a local stand-in for the release registry, so they need no network access.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **cli**: argument handling, `--info`, check mode and exit codes
//! - **upgrade_flow**: complete upgrades through the binary, including failures

mod common;

mod cli;
mod upgrade_flow;
