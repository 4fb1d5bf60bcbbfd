//! High-level tracking operations: star lists, release reports, policies.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;

use crate::reconcile::ReleaseReconciler;
use crate::scheduler::RefreshScheduler;
use crate::staleness::{STAR_EXPIRY, is_fresh, next_check_after};
use crate::state::{CachedReleaseRecord, EntityStateStore, EphemeralRepo, ReleaseKind, Visibility};
use crate::upstream::{RateLimit, RepoId, UpstreamClient};

/// Avatar shown for repositories without one.
pub const DEFAULT_AVATAR_URL: &str = "https://avatars1.githubusercontent.com/u/9919?s=32&v=4";

/// A repository's latest release, ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackedRelease {
    /// Owner part of the repository's full name
    pub namespace: String,
    pub name: String,
    /// Tag name
    pub version: String,
    /// Release title
    pub version_name: String,
    pub publish_date: DateTime<Utc>,
    pub release_notes: Option<String>,
    pub repo_url: String,
    pub release_url: String,
    pub avatar_url: String,
    pub kind: ReleaseKind,
}

impl TrackedRelease {
    fn new(repo: &RepoId, cached: &EphemeralRepo, release: CachedReleaseRecord) -> Self {
        let full_name = cached.full_name.clone().unwrap_or_else(|| repo.to_string());
        let namespace = match full_name.rsplit_once('/') {
            Some((namespace, _)) => namespace.to_string(),
            None => repo.owner.clone(),
        };

        Self {
            namespace,
            name: cached.name.clone().unwrap_or_else(|| repo.repo.clone()),
            version: release.tag_name,
            version_name: release.name,
            publish_date: release.published_at,
            release_notes: release.body,
            repo_url: cached
                .html_url
                .clone()
                .unwrap_or_else(|| format!("https://github.com/{}", repo)),
            release_url: release.html_url,
            avatar_url: small_avatar(cached.avatar_url.as_deref()),
            kind: release.kind,
        }
    }
}

/// 32px variant of an avatar URL, or [`DEFAULT_AVATAR_URL`].
pub fn small_avatar(avatar_url: Option<&str>) -> String {
    match avatar_url {
        Some(url) if url.contains('?') => format!("{}&s=32", url),
        Some(url) => format!("{}?s=32", url),
        None => DEFAULT_AVATAR_URL.to_string(),
    }
}

/// Result of [`ReleaseTracker::last_releases`].
#[derive(Debug, Clone, Serialize)]
pub struct LastReleases {
    /// When the previous report was produced, if ever
    pub last_check: Option<DateTime<Utc>>,
    /// When this report was produced
    pub checked_at: DateTime<Utc>,
    /// Repositories with a release, ordered by full name
    pub releases: Vec<TrackedRelease>,
}

/// Tracks the latest releases of the repositories a user stars.
pub struct ReleaseTracker {
    upstream: Arc<dyn UpstreamClient>,
    store: Arc<EntityStateStore>,
    reconciler: ReleaseReconciler,
    threads: usize,
}

impl ReleaseTracker {
    pub fn new(upstream: Arc<dyn UpstreamClient>, store: Arc<EntityStateStore>) -> Self {
        let reconciler = ReleaseReconciler::new(Arc::clone(&upstream), Arc::clone(&store));
        Self {
            upstream,
            store,
            reconciler,
            threads: 1,
        }
    }

    /// Number of concurrent refresh batches, at least one.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    pub fn store(&self) -> &Arc<EntityStateStore> {
        &self.store
    }

    /// Repositories starred by `user`, refetched once the cached list expires.
    #[tracing::instrument(skip(self))]
    pub async fn stars(&self, user: &str) -> Result<Vec<RepoId>> {
        let mut state = self.store.persistent_user(user);

        if let Some(repos) = &state.repos
            && is_fresh(state.next_check)
        {
            debug!("Using cached star list of {}", user);
            return Ok(repos
                .iter()
                .filter_map(|r| match r.parse::<RepoId>() {
                    Ok(repo) => Some(repo),
                    Err(e) => {
                        warn!("Ignoring starred entry of {}: {}", user, e);
                        None
                    }
                })
                .collect());
        }

        debug!("Fetching star list of {}", user);
        let starred = self
            .upstream
            .list_starred(user)
            .await
            .with_context(|| format!("Failed to list repositories starred by {}", user))?;

        state.repos = Some(starred.iter().map(RepoId::to_string).collect());
        state.next_check = Some(next_check_after(Utc::now(), STAR_EXPIRY));
        self.store.put_persistent_user(user, state);

        Ok(starred)
    }

    /// Latest release of every repository `user` stars.
    ///
    /// `last_check` is the time of the previous report; it is returned as is
    /// alongside the time of this one.
    #[tracing::instrument(skip(self, last_check))]
    pub async fn last_releases(
        &self,
        user: &str,
        last_check: Option<DateTime<Utc>>,
    ) -> Result<LastReleases> {
        let stars = self.stars(user).await?;
        let results = RefreshScheduler::new(self.reconciler.clone())
            .refresh_all(stars, self.threads)
            .await?;

        let mut releases: Vec<TrackedRelease> = results
            .into_iter()
            .filter_map(|(repo, latest)| {
                let cached = self.store.ephemeral_repo(&repo);
                latest.map(|release| TrackedRelease::new(&repo, &cached, release))
            })
            .collect();
        releases.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));

        Ok(LastReleases {
            last_check,
            checked_at: Utc::now(),
            releases,
        })
    }

    /// Latest release of a single repository.
    pub async fn latest_release(&self, repo: &RepoId) -> Result<Option<TrackedRelease>> {
        let latest = self.reconciler.latest_release(repo).await?;
        let cached = self.store.ephemeral_repo(repo);
        Ok(latest.map(|release| TrackedRelease::new(repo, &cached, release)))
    }

    pub fn set_visibility(&self, repo: &RepoId, visibility: Visibility) {
        debug!("Setting visibility of {} to {}", repo, visibility);
        self.store.set_visibility(repo, visibility);
    }

    pub async fn rate_limit(&self) -> Result<RateLimit> {
        self.upstream.rate_limit().await
    }
}
