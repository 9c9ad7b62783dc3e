//! Release registry queries.
//!
//! The orchestrator only consumes [`ReleaseFacts`]; where they come from is behind the
//! [`ReleaseSource`] trait. [`GithubReleases`] is the production implementation
//! backed by the GitHub releases API.
//!
//! Every invocation queries afresh; nothing is cached between runs, and no retries
//! happen here.

use anyhow::Result;
use semver::Version;
use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use tracing::debug;

use crate::config::ReleaseSettings;
use crate::config::Timeouts;
use crate::core::UpgradeError;
use crate::version::parse_version;

/// Which release to upgrade to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ReleaseSelector {
    #[default]
    Latest,
    Exact(Version),
}

impl ReleaseSelector {
    #[must_use]
    pub const fn is_pinned(&self) -> bool {
        matches!(self, Self::Exact(_))
    }
}

impl FromStr for ReleaseSelector {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("latest") {
            Ok(Self::Latest)
        } else {
            Ok(Self::Exact(parse_version(s)?))
        }
    }
}

impl fmt::Display for ReleaseSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

/// One published release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFacts {
    pub version: Version,
    /// Tag as published, e.g. `v5.6.3`.
    pub tag: String,
    pub tarball_url: String,
}

/// Anything that can answer "which release should we move to".
pub trait ReleaseSource: Send + Sync {
    fn fetch(
        &self,
        selector: &ReleaseSelector,
    ) -> impl Future<Output = Result<ReleaseFacts>> + Send;
}

impl<T: ReleaseSource> ReleaseSource for &T {
    fn fetch(
        &self,
        selector: &ReleaseSelector,
    ) -> impl Future<Output = Result<ReleaseFacts>> + Send {
        (**self).fetch(selector)
    }
}

/// Subset of the GitHub release JSON we rely on.
#[derive(Debug, Deserialize)]
struct GithubRelease {
    tag_name: String,
    tarball_url: String,
}

/// Queries `GET {api}/repos/{owner}/{name}/releases/...`.
pub struct GithubReleases {
    client: reqwest::Client,
    api_base: String,
    repository: String,
}

impl GithubReleases {
    pub fn new(settings: &ReleaseSettings, timeouts: &Timeouts) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .timeout(timeouts.network())
            .build()
            .map_err(|e| UpgradeError::NetworkError {
                operation: "building HTTP client".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            repository: settings.repository.clone(),
        })
    }

    #[must_use]
    pub fn release_url(&self, selector: &ReleaseSelector) -> String {
        match selector {
            ReleaseSelector::Latest => {
                format!("{}/repos/{}/releases/latest", self.api_base, self.repository)
            }
            ReleaseSelector::Exact(version) => format!(
                "{}/repos/{}/releases/tags/v{}.{}.{}",
                self.api_base, self.repository, version.major, version.minor, version.patch
            ),
        }
    }
}

impl ReleaseSource for GithubReleases {
    async fn fetch(&self, selector: &ReleaseSelector) -> Result<ReleaseFacts> {
        let url = self.release_url(selector);
        debug!("Querying release registry: {}", url);

        let network_error = |reason: String| UpgradeError::NetworkError {
            operation: format!("GET {url}"),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| network_error(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(network_error(format!("HTTP {status}")).into());
        }

        let body = response.text().await.map_err(|e| network_error(e.to_string()))?;
        let facts = parse_release(&body)?;
        debug!("Registry answered {} ({})", facts.version, facts.tag);
        Ok(facts)
    }
}

/// Parse a GitHub release JSON document.
pub fn parse_release(body: &str) -> Result<ReleaseFacts> {
    let release: GithubRelease =
        serde_json::from_str(body).map_err(|e| UpgradeError::ParseError {
            what: "release metadata".to_string(),
            reason: e.to_string(),
        })?;

    let version = parse_version(&release.tag_name).map_err(|e| UpgradeError::ParseError {
        what: format!("release tag '{}'", release.tag_name),
        reason: e.to_string(),
    })?;

    if release.tarball_url.trim().is_empty() {
        return Err(UpgradeError::ParseError {
            what: "release metadata".to_string(),
            reason: "tarball_url is empty".to_string(),
        }
        .into());
    }

    Ok(ReleaseFacts {
        version,
        tag: release.tag_name,
        tarball_url: release.tarball_url,
    })
}
