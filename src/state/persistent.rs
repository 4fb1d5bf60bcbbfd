//! Long-lived, user-authored tracking state and its cleanup rules.
//!
//! Persistent records are stored as flat key/value bags under
//! `tracked.users.<handle>` and `tracked.repos.<owner/name>`. Besides the typed
//! keys every record keeps unknown keys verbatim, so nothing a user wrote by
//! hand is lost on a load/save round-trip.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys derived from upstream data that do not belong in a user record.
pub const DERIVED_USER_KEYS: &[&str] = &["last_check", "next_check"];

/// Keys derived from upstream data that do not belong in a repo record.
pub const DERIVED_REPO_KEYS: &[&str] = &[
    "latest",
    "last_check",
    "next_check",
    "next_data_sync",
    "full_name",
    "name",
    "html_url",
    "avatar_url",
];

/// Which release kinds count as a repository's latest release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Formal, non-pre-release releases and tags.
    #[default]
    Releases,
    /// Like `Releases`, but pre-releases qualify too.
    Prereleases,
    /// Like `Releases`, checked less often.
    Tags,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Releases => write!(f, "releases"),
            Visibility::Prereleases => write!(f, "prereleases"),
            Visibility::Tags => write!(f, "tags"),
        }
    }
}

impl FromStr for Visibility {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "releases" => Ok(Visibility::Releases),
            "prereleases" => Ok(Visibility::Prereleases),
            "tags" => Ok(Visibility::Tags),
            _ => anyhow::bail!(
                "Unknown visibility policy: {}. Expected releases, prereleases, or tags.",
                s
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentUser {
    /// Starred repositories as `owner/name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos: Option<Vec<String>>,
    /// When the star list must be fetched again. Derived; stripped on cleanup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_check: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PersistentUser {
    fn strip_derived(&mut self) {
        self.next_check = None;
        for key in DERIVED_USER_KEYS {
            self.extra.remove(*key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_none() && self.next_check.is_none() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistentRepo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Visibility>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PersistentRepo {
    pub fn visibility(&self) -> Visibility {
        self.allow.unwrap_or_default()
    }

    fn strip_derived(&mut self) {
        for key in DERIVED_REPO_KEYS {
            self.extra.remove(*key);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.allow.is_none() && self.extra.is_empty()
    }
}

/// The `tracked` section of the config document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackedSection {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub users: BTreeMap<String, PersistentUser>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub repos: BTreeMap<String, PersistentRepo>,
}

impl TrackedSection {
    /// Strips derived keys and drops records left empty. Idempotent.
    pub fn normalize(&mut self) {
        for user in self.users.values_mut() {
            user.strip_derived();
        }
        self.users.retain(|_, u| !u.is_empty());

        for repo in self.repos.values_mut() {
            repo.strip_derived();
        }
        self.repos.retain(|_, r| !r.is_empty());
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty() && self.repos.is_empty()
    }
}

/// Normalizes a whole `tracked` section, dropping it once nothing is left.
pub fn normalize_tracked(tracked: &mut Option<TrackedSection>) {
    if let Some(section) = tracked {
        section.normalize();
        if section.is_empty() {
            *tracked = None;
        }
    }
}
