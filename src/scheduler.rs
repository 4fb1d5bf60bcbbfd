//! Bounded-concurrency refresh of many repositories.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use futures_util::future::join_all;
use log::{debug, warn};
use tokio::sync::Semaphore;

use crate::reconcile::ReleaseReconciler;
use crate::state::CachedReleaseRecord;
use crate::upstream::RepoId;

/// Splits `items` into contiguous batches of `len / concurrency` items.
///
/// When that floor is zero everything goes into a single batch, so no item is
/// ever dropped. An empty input has no batches.
pub fn partition<T>(items: Vec<T>, concurrency: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }

    let per_batch = match items.len() / concurrency.max(1) {
        0 => items.len(),
        n => n,
    };

    let mut batches = Vec::new();
    let mut items = items.into_iter().peekable();
    while items.peek().is_some() {
        batches.push(items.by_ref().take(per_batch).collect());
    }
    batches
}

/// Runs release checks for many repositories, at most `concurrency` batches
/// at a time.
pub struct RefreshScheduler {
    reconciler: ReleaseReconciler,
}

impl RefreshScheduler {
    pub fn new(reconciler: ReleaseReconciler) -> Self {
        Self { reconciler }
    }

    /// Deduplicates `entities` and orders them least recently checked first;
    /// never-checked repositories lead.
    pub fn order_by_staleness(&self, entities: Vec<RepoId>) -> Vec<RepoId> {
        let mut seen = HashSet::new();
        let mut ordered: Vec<RepoId> = entities
            .into_iter()
            .filter(|repo| seen.insert(repo.clone()))
            .collect();

        let store = self.reconciler.store();
        ordered.sort_by_cached_key(|repo| store.ephemeral_repo(repo).last_check);
        ordered
    }

    /// Latest release of every entity.
    ///
    /// Batches may outnumber `concurrency`; no more than `concurrency` of them
    /// run at once. A failing entity stops the rest of its batch. All batches are awaited
    /// before the first error is returned.
    #[tracing::instrument(skip(self, entities), fields(count = entities.len()))]
    pub async fn refresh_all(
        &self,
        entities: Vec<RepoId>,
        concurrency: usize,
    ) -> Result<HashMap<RepoId, Option<CachedReleaseRecord>>> {
        let batches = partition(self.order_by_staleness(entities), concurrency);
        debug!("Refreshing in {} batches", batches.len());

        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let handles = batches.into_iter().map(|batch| {
            let reconciler = self.reconciler.clone();
            let permits = Arc::clone(&permits);
            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await?;
                let mut results = HashMap::with_capacity(batch.len());
                for repo in batch {
                    let latest = reconciler.latest_release(&repo).await?;
                    results.insert(repo, latest);
                }
                Ok::<_, anyhow::Error>(results)
            })
        });

        let mut merged = HashMap::new();
        let mut first_error = None;
        for joined in join_all(handles).await {
            match joined.map_err(anyhow::Error::from).and_then(|r| r) {
                Ok(results) => merged.extend(results),
                Err(e) => {
                    warn!("Refresh batch failed: {:#}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(merged),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{NonRetryableError, is_rate_limited};
    use crate::state::{EntityStateStore, EphemeralRepoPatch};
    use crate::upstream::{MockUpstreamClient, ReleasesAndTags, RepoMetadata, UpstreamRelease};
    use crate::upstream::{RateLimit, UpstreamClient};
    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Upstream that records how many metadata lookups overlap.
    #[derive(Default)]
    struct CountingUpstream {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamClient for CountingUpstream {
        async fn list_starred(&self, _user: &str) -> Result<Vec<RepoId>> {
            Ok(vec![])
        }

        async fn get_repository(&self, repo: &RepoId) -> Result<RepoMetadata> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Err(NonRetryableError::NotFound(repo.to_string()).into())
        }

        async fn query_releases_and_tags(&self, _repo: &RepoId) -> Result<ReleasesAndTags> {
            Ok(ReleasesAndTags::default())
        }

        async fn rate_limit(&self) -> Result<RateLimit> {
            anyhow::bail!("unused")
        }
    }

    fn repos(n: usize) -> Vec<RepoId> {
        (0..n).map(|i| RepoId::new("owner", format!("repo{}", i))).collect()
    }

    fn upstream_with_releases() -> MockUpstreamClient {
        let mut upstream = MockUpstreamClient::new();
        upstream.expect_get_repository().returning(|repo| {
            Ok(RepoMetadata {
                name: repo.repo.clone(),
                full_name: repo.to_string(),
                html_url: format!("https://github.com/{}", repo),
                avatar_url: None,
            })
        });
        upstream.expect_query_releases_and_tags().returning(|repo| {
            Ok(ReleasesAndTags {
                releases: vec![UpstreamRelease {
                    tag_name: format!("{}-v1", repo.repo),
                    created_at: Some("2024-01-01T00:00:00Z".into()),
                    url: format!("https://github.com/{}/releases/tag/v1", repo),
                    ..Default::default()
                }],
                tags: vec![],
            })
        });
        upstream
    }

    fn scheduler(upstream: MockUpstreamClient) -> RefreshScheduler {
        RefreshScheduler::new(ReleaseReconciler::new(
            Arc::new(upstream),
            Arc::new(EntityStateStore::new()),
        ))
    }

    #[test]
    fn test_partition_sizes() {
        let sizes = |n: usize, c: usize| -> Vec<usize> {
            partition((0..n).collect::<Vec<_>>(), c)
                .iter()
                .map(Vec::len)
                .collect()
        };
        assert_eq!(sizes(10, 3), vec![3, 3, 3, 1]);
        assert_eq!(sizes(10, 1), vec![10]);
        assert_eq!(sizes(3, 8), vec![3]);
        assert_eq!(sizes(4, 4), vec![1, 1, 1, 1]);
        assert_eq!(sizes(5, 0), vec![5]);
        assert!(sizes(0, 4).is_empty());
    }

    #[test]
    fn test_partition_keeps_every_item_in_order() {
        for n in 0..20 {
            for c in 0..25 {
                let flat: Vec<usize> = partition((0..n).collect::<Vec<usize>>(), c).concat();
                assert_eq!(flat, (0..n).collect::<Vec<_>>());
            }
        }
    }

    #[test]
    fn test_order_by_staleness() {
        let scheduler = scheduler(MockUpstreamClient::new());
        let store = scheduler.reconciler.store();
        let now = Utc::now();
        let [a, b, c] = [0, 1, 2].map(|i| RepoId::new("o", format!("r{}", i)));
        store.merge_ephemeral_repo(&a, EphemeralRepoPatch::release_check(None, now, now));
        store.merge_ephemeral_repo(
            &b,
            EphemeralRepoPatch::release_check(None, now - TimeDelta::hours(1), now),
        );

        let ordered = scheduler.order_by_staleness(vec![a.clone(), b.clone(), c.clone(), a.clone()]);
        assert_eq!(ordered, vec![c, b, a]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_more_workers_than_entities_loses_nothing() {
        let scheduler = scheduler(upstream_with_releases());
        let input = repos(3);

        let results = scheduler.refresh_all(input.clone(), 8).await.unwrap();

        assert_eq!(results.len(), 3);
        for repo in &input {
            let latest = results[repo].as_ref().unwrap();
            assert_eq!(latest.tag_name, format!("{}-v1", repo.repo));
        }
    }

    #[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
    async fn test_every_entity_appears_once() {
        let scheduler = scheduler(upstream_with_releases());
        let mut input = repos(23);
        input.push(RepoId::new("owner", "repo0"));

        let results = scheduler.refresh_all(input, 4).await.unwrap();

        let mut keys: Vec<_> = results.keys().cloned().collect();
        keys.sort();
        let mut expected = repos(23);
        expected.sort();
        assert_eq!(keys, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_running_batches_never_exceed_concurrency() {
        // 7 repositories over 4 workers split into 7 batches of one
        assert_eq!(partition(repos(7), 4).len(), 7);

        let upstream = Arc::new(CountingUpstream::default());
        let scheduler = RefreshScheduler::new(ReleaseReconciler::new(
            upstream.clone(),
            Arc::new(EntityStateStore::new()),
        ));

        let results = scheduler.refresh_all(repos(7), 4).await.unwrap();

        assert_eq!(results.len(), 7);
        let peak = upstream.peak.load(Ordering::SeqCst);
        assert!((1..=4).contains(&peak), "{} batches ran at once", peak);
    }

    #[tokio::test]
    async fn test_missing_release_is_present_as_none() {
        let mut upstream = MockUpstreamClient::new();
        upstream
            .expect_get_repository()
            .returning(|repo| Err(NonRetryableError::NotFound(repo.to_string()).into()));

        let scheduler = scheduler(upstream);
        let results = scheduler.refresh_all(repos(2), 2).await.unwrap();

        assert_eq!(results.len(), 2);
        assert!(results.values().all(Option::is_none));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_error_propagates_after_all_batches() {
        let mut upstream = MockUpstreamClient::new();
        upstream.expect_get_repository().returning(|repo| {
            Ok(RepoMetadata {
                name: repo.repo.clone(),
                full_name: repo.to_string(),
                html_url: format!("https://github.com/{}", repo),
                avatar_url: None,
            })
        });
        upstream.expect_query_releases_and_tags().returning(|repo| {
            if repo.repo == "repo1" {
                Err(NonRetryableError::RateLimitExceeded("graphql".into()).into())
            } else {
                Ok(ReleasesAndTags::default())
            }
        });

        let scheduler = scheduler(upstream);
        let err = scheduler.refresh_all(repos(4), 4).await.unwrap_err();
        assert!(is_rate_limited(&err));

        // Batches without the failing repository still completed
        let store = scheduler.reconciler.store();
        for i in [0, 2, 3] {
            let repo = RepoId::new("owner", format!("repo{}", i));
            assert!(store.ephemeral_repo(&repo).last_check.is_some());
        }
    }

    #[tokio::test]
    async fn test_empty_input() {
        let scheduler = scheduler(MockUpstreamClient::new());
        assert!(scheduler.refresh_all(vec![], 4).await.unwrap().is_empty());
    }
}
