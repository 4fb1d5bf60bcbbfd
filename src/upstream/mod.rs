//! Upstream abstraction over the code hosting API.
//!
//! The tracking core only talks to [`UpstreamClient`]; [`GitHubClient`] is the
//! concrete implementation backed by the GitHub REST and GraphQL APIs.

mod github;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use github::{DEFAULT_API_URL, GitHubClient, RELEASE_QUERY_LIMIT};

/// Repository identifier (owner/name format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, repo)) if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') => {
                Ok(RepoId::new(owner, repo))
            }
            _ => anyhow::bail!("Invalid repository format '{}'. Expected 'owner/repo'.", s),
        }
    }
}

/// Display metadata of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMetadata {
    /// Short repository name
    pub name: String,
    /// `owner/name` as reported upstream (may differ in case or after a rename)
    pub full_name: String,
    pub html_url: String,
    pub avatar_url: Option<String>,
}

/// A formal release as returned by the combined release query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpstreamRelease {
    pub tag_name: String,
    pub name: Option<String>,
    /// Creation time (RFC 3339)
    pub created_at: Option<String>,
    pub url: String,
    pub description: Option<String>,
    pub is_prerelease: bool,
}

/// What a tag ref points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagTarget {
    /// Lightweight tag: the ref points straight at a commit.
    Commit {
        /// Push date, or commit date when the push date is unavailable (RFC 3339)
        date: Option<String>,
        message: Option<String>,
    },
    /// Annotated tag: the ref points at a tag object.
    Annotated {
        tagger_date: Option<String>,
        message: Option<String>,
    },
    /// Anything else (trees, blobs, missing payloads).
    Unknown,
}

/// A tag ref as returned by the combined release query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTag {
    pub name: String,
    pub target: TagTarget,
}

/// Result of the combined release/tag query, newest first in both lists.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReleasesAndTags {
    pub releases: Vec<UpstreamRelease>,
    pub tags: Vec<UpstreamTag>,
}

/// Current API request budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub resets_at: DateTime<Utc>,
    pub resets_in: TimeDelta,
}

/// Operations the tracking core needs from the upstream API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Every repository starred by `user`, across all pages.
    async fn list_starred(&self, user: &str) -> Result<Vec<RepoId>>;

    /// Repository display metadata. Fails with a `NotFound` classification
    /// when the repository no longer exists.
    async fn get_repository(&self, repo: &RepoId) -> Result<RepoMetadata>;

    /// Newest releases and newest tag refs in a single query.
    async fn query_releases_and_tags(&self, repo: &RepoId) -> Result<ReleasesAndTags>;

    async fn rate_limit(&self) -> Result<RateLimit>;
}
