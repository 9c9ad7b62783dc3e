//! Version parsing and upgrade planning.
//!
//! MunkiReport does not always publish strict semantic versions: the installed
//! marker usually carries a fourth build component (`5.6.3.4012`) and release tags
//! carry a `v` prefix. [`parse_version`] maps both onto [`semver::Version`] so that
//! ordering is numeric (`4.9.0 < 4.10.0`), never lexical.
//!
//! # Examples
//!
//! ```rust
//! use mr_upgrade::version::{parse_version, UpgradePlan};
//!
//! # fn example() -> anyhow::Result<()> {
//! let installed = parse_version("4.9.0")?;
//! let target = parse_version("v4.10.0")?;
//! assert!(UpgradePlan::new(&installed, &target).needed);
//!
//! let build = parse_version("5.6.3.4012")?;
//! assert_eq!(build.build.as_str(), "4012");
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result, anyhow, bail};
use semver::{BuildMetadata, Prerelease, Version};
use std::cmp::Ordering;

/// Parse a MunkiReport version string leniently.
///
/// - an optional `v`/`V` prefix is stripped
/// - missing minor/patch components are zero (`5` is `5.0.0`)
/// - numeric components after the patch become build metadata
/// - a `-suffix` is a pre-release, a `+suffix` is build metadata
pub fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    let cleaned = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
    if cleaned.is_empty() {
        bail!("empty version string");
    }

    let (rest, explicit_build) = match cleaned.split_once('+') {
        Some((rest, build)) => (rest, Some(build)),
        None => (cleaned, None),
    };
    let (core, pre) = match rest.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (rest, None),
    };

    let mut numbers = Vec::new();
    for part in core.split('.') {
        let number = part
            .parse::<u64>()
            .map_err(|_| anyhow!("'{part}' is not a numeric version component in '{raw}'"))?;
        numbers.push(number);
    }

    let mut version = Version::new(
        numbers.first().copied().unwrap_or(0),
        numbers.get(1).copied().unwrap_or(0),
        numbers.get(2).copied().unwrap_or(0),
    );

    if let Some(pre) = pre {
        version.pre =
            Prerelease::new(pre).with_context(|| format!("invalid pre-release in '{raw}'"))?;
    }

    let mut build: Vec<String> = numbers.iter().skip(3).map(ToString::to_string).collect();
    if let Some(explicit) = explicit_build {
        build.push(explicit.to_string());
    }
    if !build.is_empty() {
        version.build = BuildMetadata::new(&build.join("."))
            .with_context(|| format!("invalid build metadata in '{raw}'"))?;
    }

    Ok(version)
}

/// Semantic-version ordering. Build metadata never decides precedence.
#[must_use]
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp_precedence(b)
}

/// Whether an install at `installed` needs to move to `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePlan {
    pub installed: Version,
    pub target: Version,
    pub needed: bool,
}

impl UpgradePlan {
    #[must_use]
    pub fn new(installed: &Version, target: &Version) -> Self {
        Self {
            installed: installed.clone(),
            target: target.clone(),
            needed: compare(installed, target) == Ordering::Less,
        }
    }
}
