//! Release reconciliation.
//!
//! Formal releases and raw tag refs are merged into one list of candidates,
//! filtered by the repository's visibility policy, and the newest candidate
//! becomes the cached latest release.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::http::is_not_found;
use crate::staleness::{
    NIL_RELEASE_EXPIRY, RELEASE_EXPIRY, REPODATA_EXPIRY, TAGS_RELEASE_EXPIRY, is_fresh_at,
    next_check_after,
};
use crate::state::{
    CachedReleaseRecord, EntityStateStore, EphemeralRepo, EphemeralRepoPatch, ReleaseKind,
    Visibility,
};
use crate::upstream::{ReleasesAndTags, RepoId, TagTarget, UpstreamClient};

/// A release candidate during reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalRelease {
    pub tag_name: String,
    pub name: String,
    pub published_at: DateTime<Utc>,
    pub html_url: String,
    pub body: Option<String>,
    pub kind: ReleaseKind,
}

impl From<InternalRelease> for CachedReleaseRecord {
    fn from(release: InternalRelease) -> Self {
        Self {
            name: release.name,
            tag_name: release.tag_name,
            published_at: release.published_at,
            body: release.body,
            html_url: release.html_url,
            kind: release.kind,
        }
    }
}

fn parse_date(value: Option<&str>) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value?)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Turns the combined query result into candidates.
///
/// Tags already covered by a formal release are skipped. Entries without a
/// parseable date, and tags pointing at neither a commit nor a tag object,
/// are dropped.
pub fn collect_candidates(
    repo: &RepoId,
    html_url: Option<&str>,
    data: ReleasesAndTags,
) -> Vec<InternalRelease> {
    let mut candidates = Vec::new();
    let mut seen = HashSet::new();

    for release in data.releases {
        if !seen.insert(release.tag_name.clone()) {
            continue;
        }
        let Some(published_at) = parse_date(release.created_at.as_deref()) else {
            warn!(
                "Skipping release {} of {}: unparseable date {:?}",
                release.tag_name, repo, release.created_at
            );
            continue;
        };
        let name = release
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| release.tag_name.clone());

        candidates.push(InternalRelease {
            name,
            published_at,
            html_url: release.url,
            body: release.description,
            kind: if release.is_prerelease {
                ReleaseKind::Prerelease
            } else {
                ReleaseKind::Release
            },
            tag_name: release.tag_name,
        });
    }

    let base_url = html_url
        .map(|u| u.trim_end_matches('/').to_string())
        .unwrap_or_else(|| format!("https://github.com/{}", repo));

    for tag in data.tags {
        if !seen.insert(tag.name.clone()) {
            continue;
        }
        let (date, body, kind) = match tag.target {
            TagTarget::Commit { date, message } => (date, message, ReleaseKind::LightweightTag),
            TagTarget::Annotated {
                tagger_date,
                message,
            } => (tagger_date, message, ReleaseKind::Tag),
            TagTarget::Unknown => {
                debug!("Skipping tag {} of {}: no usable target", tag.name, repo);
                continue;
            }
        };
        let Some(published_at) = parse_date(date.as_deref()) else {
            warn!(
                "Skipping tag {} of {}: unparseable date {:?}",
                tag.name, repo, date
            );
            continue;
        };

        candidates.push(InternalRelease {
            html_url: format!("{}/releases/tag/{}", base_url, tag.name),
            name: tag.name.clone(),
            tag_name: tag.name,
            published_at,
            body,
            kind,
        });
    }

    candidates
}

/// Picks the newest candidate allowed by `policy`.
///
/// Pre-releases only count under [`Visibility::Prereleases`]. Of several
/// candidates sharing the newest date the one listed last wins.
pub fn select_latest(
    candidates: Vec<InternalRelease>,
    policy: Visibility,
) -> Option<InternalRelease> {
    let mut allowed: Vec<InternalRelease> = candidates
        .into_iter()
        .filter(|c| policy == Visibility::Prereleases || c.kind != ReleaseKind::Prerelease)
        .collect();
    allowed.sort_by_key(|c| c.published_at);
    allowed.pop()
}

/// [`collect_candidates`] followed by [`select_latest`].
pub fn reconcile(
    repo: &RepoId,
    html_url: Option<&str>,
    data: ReleasesAndTags,
    policy: Visibility,
) -> Option<InternalRelease> {
    select_latest(collect_candidates(repo, html_url, data), policy)
}

/// Resolves and caches the latest release of repositories.
#[derive(Clone)]
pub struct ReleaseReconciler {
    upstream: Arc<dyn UpstreamClient>,
    store: Arc<EntityStateStore>,
}

impl ReleaseReconciler {
    pub fn new(upstream: Arc<dyn UpstreamClient>, store: Arc<EntityStateStore>) -> Self {
        Self { upstream, store }
    }

    pub fn store(&self) -> &Arc<EntityStateStore> {
        &self.store
    }

    /// Fetches display metadata and records it. `None` when the repository
    /// no longer exists.
    pub async fn refresh_metadata(&self, repo: &RepoId) -> Result<Option<EphemeralRepo>> {
        debug!("Refreshing metadata for {}", repo);
        let meta = match self.upstream.get_repository(repo).await {
            Ok(meta) => meta,
            Err(e) if is_not_found(&e) => {
                debug!("Repository {} not found upstream", repo);
                return Ok(None);
            }
            Err(e) => return Err(e.context(format!("Failed to fetch metadata of {}", repo))),
        };

        let next_sync = next_check_after(Utc::now(), REPODATA_EXPIRY);
        self.store
            .merge_ephemeral_repo(repo, EphemeralRepoPatch::metadata(meta, next_sync));
        Ok(Some(self.store.ephemeral_repo(repo)))
    }

    /// Latest release of `repo` under its visibility policy.
    ///
    /// A cached value is returned without touching upstream until its
    /// next-check passes. A repository missing upstream yields `None` and
    /// leaves cached state alone.
    #[tracing::instrument(skip(self), fields(repo = %repo))]
    pub async fn latest_release(&self, repo: &RepoId) -> Result<Option<CachedReleaseRecord>> {
        let now = Utc::now();
        let mut cached = self.store.ephemeral_repo(repo);

        if !cached.has_metadata() || !is_fresh_at(cached.next_data_sync, now) {
            match self.refresh_metadata(repo).await? {
                Some(updated) => cached = updated,
                None => return Ok(None),
            }
        }

        if is_fresh_at(cached.next_check, now) {
            debug!("Using cached release of {} until {:?}", repo, cached.next_check);
            return Ok(cached.latest);
        }

        debug!("Checking latest release of {}", repo);
        let data = match self.upstream.query_releases_and_tags(repo).await {
            Ok(data) => data,
            Err(e) if is_not_found(&e) => {
                debug!("Releases of {} not found upstream", repo);
                return Ok(None);
            }
            Err(e) => return Err(e.context(format!("Failed to query releases of {}", repo))),
        };

        let policy = self.store.visibility(repo);
        let latest = reconcile(repo, cached.html_url.as_deref(), data, policy)
            .map(CachedReleaseRecord::from);

        let expiry = match (&latest, policy) {
            (Some(_), Visibility::Tags) => TAGS_RELEASE_EXPIRY,
            (Some(_), _) => RELEASE_EXPIRY,
            (None, _) => NIL_RELEASE_EXPIRY,
        };
        self.store.merge_ephemeral_repo(
            repo,
            EphemeralRepoPatch::release_check(latest.clone(), now, next_check_after(now, expiry)),
        );

        Ok(latest)
    }
}
