//! Derived, disposable per-repository cache state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::upstream::RepoMetadata;

/// Where a release record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseKind {
    Release,
    Prerelease,
    /// Annotated tag without a release
    Tag,
    /// Commit tag without a release
    LightweightTag,
}

/// Cached snapshot of a repository's latest release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedReleaseRecord {
    pub name: String,
    pub tag_name: String,
    pub published_at: DateTime<Utc>,
    pub body: Option<String>,
    pub html_url: String,
    pub kind: ReleaseKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EphemeralRepo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_data_sync: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_check: Option<DateTime<Utc>>,
    /// `None` together with a `next_check` is a cached "no release".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<CachedReleaseRecord>,
}

impl EphemeralRepo {
    /// Whether the display metadata a release check relies on is present.
    pub fn has_metadata(&self) -> bool {
        self.name.is_some() && self.full_name.is_some() && self.html_url.is_some()
    }

    /// Shallow merge: every key set in `patch` overwrites, the rest survive.
    pub fn merge(&mut self, patch: EphemeralRepoPatch) {
        fn set<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        set(&mut self.name, patch.name);
        set(&mut self.full_name, patch.full_name);
        set(&mut self.html_url, patch.html_url);
        set(&mut self.avatar_url, patch.avatar_url);
        set(&mut self.next_data_sync, patch.next_data_sync);
        set(&mut self.last_check, patch.last_check);
        set(&mut self.next_check, patch.next_check);
        if let Some(latest) = patch.latest {
            self.latest = latest;
        }
    }
}

/// A partial update of [`EphemeralRepo`]; `None` leaves a key untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EphemeralRepoPatch {
    pub name: Option<String>,
    pub full_name: Option<String>,
    pub html_url: Option<String>,
    pub avatar_url: Option<String>,
    pub next_data_sync: Option<DateTime<Utc>>,
    pub last_check: Option<DateTime<Utc>>,
    pub next_check: Option<DateTime<Utc>>,
    /// `Some(None)` records that no release exists.
    pub latest: Option<Option<CachedReleaseRecord>>,
}

impl EphemeralRepoPatch {
    pub fn metadata(meta: RepoMetadata, next_data_sync: DateTime<Utc>) -> Self {
        Self {
            name: Some(meta.name),
            full_name: Some(meta.full_name),
            html_url: Some(meta.html_url),
            avatar_url: meta.avatar_url,
            next_data_sync: Some(next_data_sync),
            ..Default::default()
        }
    }

    pub fn release_check(
        latest: Option<CachedReleaseRecord>,
        checked_at: DateTime<Utc>,
        next_check: DateTime<Utc>,
    ) -> Self {
        Self {
            last_check: Some(checked_at),
            next_check: Some(next_check.max(checked_at)),
            latest: Some(latest),
            ..Default::default()
        }
    }
}
