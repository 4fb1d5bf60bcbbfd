//! Per-entity tracking state.
//!
//! State comes in two kinds kept apart in memory:
//!
//! - persistent: user-authored data (star lists, visibility policies) that
//!   lives in the config document and must survive restarts
//! - ephemeral: data derived from upstream (display metadata, cached latest
//!   release, check timestamps) that can always be rebuilt
//!
//! They only meet at the load/save boundary in [`file`].

mod ephemeral;
pub mod file;
mod persistent;

use dashmap::DashMap;
use log::debug;
use std::collections::BTreeMap;

use crate::upstream::RepoId;

pub use ephemeral::{CachedReleaseRecord, EphemeralRepo, EphemeralRepoPatch, ReleaseKind};
pub use file::{CacheDocument, ConfigDocument, StateFile};
pub use persistent::{
    DERIVED_REPO_KEYS, DERIVED_USER_KEYS, PersistentRepo, PersistentUser, TrackedSection,
    Visibility, normalize_tracked,
};

/// Concurrent store of tracking state keyed by user handle or `owner/name`.
///
/// Every accessor clones in and out, so no map guard is ever held across an
/// await point and workers touching different keys never contend on a record.
#[derive(Debug, Default)]
pub struct EntityStateStore {
    users: DashMap<String, PersistentUser>,
    repos: DashMap<String, PersistentRepo>,
    ephemeral_repos: DashMap<String, EphemeralRepo>,
}

impl EntityStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from loaded documents, normalizing persistent state.
    pub fn load(tracked: Option<TrackedSection>, cache: CacheDocument) -> Self {
        let mut tracked = tracked;
        normalize_tracked(&mut tracked);
        let tracked = tracked.unwrap_or_default();

        debug!(
            "Loaded {} tracked users, {} tracked repos, {} cached repos",
            tracked.users.len(),
            tracked.repos.len(),
            cache.repos.len()
        );

        Self {
            users: tracked.users.into_iter().collect(),
            repos: tracked.repos.into_iter().collect(),
            ephemeral_repos: cache.repos.into_iter().collect(),
        }
    }

    pub fn persistent_user(&self, handle: &str) -> PersistentUser {
        self.users
            .get(handle)
            .map(|u| u.value().clone())
            .unwrap_or_default()
    }

    pub fn put_persistent_user(&self, handle: &str, user: PersistentUser) {
        self.users.insert(handle.to_string(), user);
    }

    pub fn tracked_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.users.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    pub fn persistent_repo(&self, repo: &RepoId) -> PersistentRepo {
        self.repos
            .get(&repo.to_string())
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn put_persistent_repo(&self, repo: &RepoId, state: PersistentRepo) {
        self.repos.insert(repo.to_string(), state);
    }

    pub fn visibility(&self, repo: &RepoId) -> Visibility {
        self.repos
            .get(&repo.to_string())
            .map(|r| r.visibility())
            .unwrap_or_default()
    }

    /// Sets the visibility policy and expires the cached release so the new
    /// policy applies on the next check.
    pub fn set_visibility(&self, repo: &RepoId, visibility: Visibility) {
        let mut state = self.persistent_repo(repo);
        state.allow = Some(visibility);
        self.put_persistent_repo(repo, state);
        if let Some(mut ephemeral) = self.ephemeral_repos.get_mut(&repo.to_string()) {
            ephemeral.next_check = None;
        }
    }

    pub fn ephemeral_repo(&self, repo: &RepoId) -> EphemeralRepo {
        self.ephemeral_repos
            .get(&repo.to_string())
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn merge_ephemeral_repo(&self, repo: &RepoId, patch: EphemeralRepoPatch) {
        self.ephemeral_repos
            .entry(repo.to_string())
            .or_default()
            .merge(patch);
    }

    /// Normalized copy of the persistent state, `None` when nothing is left.
    /// In-memory state is not touched.
    pub fn tracked_section(&self) -> Option<TrackedSection> {
        let mut tracked = Some(TrackedSection {
            users: self
                .users
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            repos: self
                .repos
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        });
        normalize_tracked(&mut tracked);
        tracked
    }

    pub fn cache_document(&self) -> CacheDocument {
        CacheDocument {
            repos: self
                .ephemeral_repos
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_load_normalizes_persistent_state() {
        let tracked: TrackedSection = serde_json::from_value(json!({
            "users": { "alice": { "next_check": "2030-01-01T00:00:00Z" } },
            "repos": {
                "a/b": { "allow": "tags", "latest": null },
                "c/d": { "name": "d" }
            }
        }))
        .unwrap();

        let store = EntityStateStore::load(Some(tracked), CacheDocument::default());

        assert!(store.tracked_users().is_empty());
        assert_eq!(
            store.visibility(&RepoId::new("a", "b")),
            Visibility::Tags
        );
        assert_eq!(
            store.persistent_repo(&RepoId::new("c", "d")),
            PersistentRepo::default()
        );
    }

    #[test]
    fn test_tracked_section_prunes_without_touching_memory() {
        let store = EntityStateStore::new();
        store.put_persistent_user(
            "alice",
            PersistentUser {
                next_check: Some(Utc::now() + TimeDelta::hours(1)),
                ..Default::default()
            },
        );

        assert_eq!(store.tracked_section(), None);
        assert!(store.persistent_user("alice").next_check.is_some());
    }

    #[test]
    fn test_set_visibility_expires_cached_release() {
        let store = EntityStateStore::new();
        let repo = RepoId::new("o", "r");
        let now = Utc::now();
        store.merge_ephemeral_repo(
            &repo,
            EphemeralRepoPatch::release_check(None, now, now + TimeDelta::hours(24)),
        );

        store.set_visibility(&repo, Visibility::Prereleases);

        assert_eq!(store.visibility(&repo), Visibility::Prereleases);
        let ephemeral = store.ephemeral_repo(&repo);
        assert_eq!(ephemeral.next_check, None);
        assert_eq!(ephemeral.last_check, Some(now));

        let tracked = store.tracked_section().unwrap();
        assert_eq!(tracked.repos["o/r"].allow, Some(Visibility::Prereleases));
    }

    #[test]
    fn test_set_visibility_keeps_user_keys() {
        let store = EntityStateStore::new();
        let repo = RepoId::new("o", "r");
        let mut extra = serde_json::Map::new();
        extra.insert("note".into(), json!("watch closely"));
        store.put_persistent_repo(
            &repo,
            PersistentRepo {
                allow: Some(Visibility::Releases),
                extra,
            },
        );

        store.set_visibility(&repo, Visibility::Tags);

        let state = store.persistent_repo(&repo);
        assert_eq!(state.allow, Some(Visibility::Tags));
        assert_eq!(state.extra.get("note"), Some(&json!("watch closely")));
    }

    #[test]
    fn test_cache_document_round_trips_ephemeral_state() {
        let store = EntityStateStore::new();
        let repo = RepoId::new("o", "r");
        let now = Utc::now();
        store.merge_ephemeral_repo(&repo, EphemeralRepoPatch::release_check(None, now, now));

        let reloaded = EntityStateStore::load(None, store.cache_document());
        assert_eq!(reloaded.ephemeral_repo(&repo), store.ephemeral_repo(&repo));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_to_different_keys() {
        let store = Arc::new(EntityStateStore::new());
        let now = Utc::now();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    for _ in 0..50 {
                        store.merge_ephemeral_repo(
                            &RepoId::new("owner", format!("repo{}", i)),
                            EphemeralRepoPatch::release_check(None, now, now),
                        );
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.cache_document().repos.len(), 16);
    }
}
