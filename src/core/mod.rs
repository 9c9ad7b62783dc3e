//! Core types shared by every part of mr-upgrade.
//!
//! Currently this is the error taxonomy: [`UpgradeError`] for typed failures and
//! [`ErrorContext`] / [`user_friendly_error`] for presenting them to the operator.

pub mod error;

pub use error::{ErrorContext, UpgradeError, user_friendly_error};
