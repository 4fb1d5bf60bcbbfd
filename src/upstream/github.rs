//! GitHub implementation of [`UpstreamClient`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use serde_json::json;

use crate::http::{HttpClient, NonRetryableError};

use super::{
    RateLimit, ReleasesAndTags, RepoId, RepoMetadata, TagTarget, UpstreamClient, UpstreamRelease,
    UpstreamTag,
};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// How many releases and how many tags the combined query asks for.
pub const RELEASE_QUERY_LIMIT: usize = 5;

const STARS_PER_PAGE: usize = 100;

// Upper bound on star pages (10k stars) to prevent an endless loop
const MAX_STAR_PAGES: usize = 100;

const RELEASES_AND_TAGS_QUERY: &str = r#"
query($owner: String!, $name: String!, $count: Int!) {
  repository(owner: $owner, name: $name) {
    releases(first: $count, orderBy: { field: CREATED_AT, direction: DESC }) {
      nodes {
        tagName
        name
        createdAt
        url
        description
        isPrerelease
      }
    }
    refs(first: $count, refPrefix: "refs/tags/", orderBy: { field: TAG_COMMIT_DATE, direction: DESC }) {
      nodes {
        name
        target {
          __typename
          ... on Commit {
            pushedDate
            committedDate
            message
          }
          ... on Tag {
            tagger {
              date
            }
            message
          }
        }
      }
    }
  }
}
"#;

/// GitHub API response types (internal).
mod api {
    use serde::Deserialize;

    #[derive(Deserialize, Debug)]
    pub struct StarredRepo {
        pub full_name: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct Repository {
        pub name: String,
        pub full_name: String,
        pub html_url: String,
        pub owner: Owner,
    }

    #[derive(Deserialize, Debug)]
    pub struct Owner {
        pub avatar_url: Option<String>,
    }

    #[derive(Deserialize, Debug)]
    pub struct RateLimitResponse {
        pub rate: RateBucket,
    }

    #[derive(Deserialize, Debug)]
    pub struct RateBucket {
        pub limit: u64,
        pub remaining: u64,
        pub reset: i64,
    }

    #[derive(Deserialize, Debug)]
    pub struct GraphQlResponse<T> {
        pub data: Option<T>,
        #[serde(default)]
        pub errors: Vec<GraphQlError>,
    }

    #[derive(Deserialize, Debug)]
    pub struct GraphQlError {
        #[serde(rename = "type")]
        pub kind: Option<String>,
        pub message: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct ReleaseQueryData {
        pub repository: Option<ReleaseQueryRepository>,
    }

    #[derive(Deserialize, Debug)]
    pub struct ReleaseQueryRepository {
        pub releases: Connection<ReleaseNode>,
        pub refs: Option<Connection<RefNode>>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(bound(deserialize = "T: Deserialize<'de>"))]
    pub struct Connection<T> {
        #[serde(default)]
        pub nodes: Vec<Option<T>>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "camelCase")]
    pub struct ReleaseNode {
        pub tag_name: String,
        pub name: Option<String>,
        pub created_at: Option<String>,
        #[serde(default)]
        pub url: String,
        pub description: Option<String>,
        #[serde(default)]
        pub is_prerelease: bool,
    }

    #[derive(Deserialize, Debug)]
    pub struct RefNode {
        pub name: String,
        pub target: Option<RefTarget>,
    }

    #[derive(Deserialize, Debug)]
    #[serde(tag = "__typename")]
    pub enum RefTarget {
        Commit {
            #[serde(rename = "pushedDate")]
            pushed_date: Option<String>,
            #[serde(rename = "committedDate")]
            committed_date: Option<String>,
            message: Option<String>,
        },
        Tag {
            tagger: Option<Tagger>,
            message: Option<String>,
        },
        #[serde(other)]
        Other,
    }

    #[derive(Deserialize, Debug)]
    pub struct Tagger {
        pub date: Option<String>,
    }
}

/// GitHub upstream client.
///
/// Credentials and the response cache are whatever the given [`HttpClient`]
/// was built with; nothing here is process-global.
pub struct GitHubClient {
    http_client: HttpClient,
    api_url: String,
}

impl GitHubClient {
    pub fn new(http_client: HttpClient, api_url: Option<String>) -> Self {
        let api_url = api_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        Self {
            http_client,
            api_url,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// GraphQL endpoint. GitHub Enterprise serves REST under `/api/v3` and
    /// GraphQL under `/api/graphql`.
    pub fn graphql_url(&self) -> String {
        match self.api_url.strip_suffix("/v3") {
            Some(base) => format!("{}/graphql", base),
            None => format!("{}/graphql", self.api_url),
        }
    }

    fn graphql_failure(errors: &[api::GraphQlError]) -> anyhow::Error {
        let kinds: Vec<&str> = errors.iter().filter_map(|e| e.kind.as_deref()).collect();
        let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();

        if kinds.contains(&"RATE_LIMITED") {
            return NonRetryableError::RateLimitExceeded(messages.join("; ")).into();
        }
        if errors.is_empty() || kinds.contains(&"NOT_FOUND") {
            return NonRetryableError::NotFound(if messages.is_empty() {
                "Repository not found".to_string()
            } else {
                messages.join("; ")
            })
            .into();
        }
        anyhow::anyhow!("GraphQL query failed: {}", messages.join("; "))
    }
}

impl From<api::ReleaseNode> for UpstreamRelease {
    fn from(r: api::ReleaseNode) -> Self {
        UpstreamRelease {
            tag_name: r.tag_name,
            name: r.name,
            created_at: r.created_at,
            url: r.url,
            description: r.description,
            is_prerelease: r.is_prerelease,
        }
    }
}

impl From<api::RefNode> for UpstreamTag {
    fn from(r: api::RefNode) -> Self {
        let target = match r.target {
            Some(api::RefTarget::Commit {
                pushed_date,
                committed_date,
                message,
            }) => TagTarget::Commit {
                date: pushed_date.or(committed_date),
                message,
            },
            Some(api::RefTarget::Tag { tagger, message }) => TagTarget::Annotated {
                tagger_date: tagger.and_then(|t| t.date),
                message,
            },
            Some(api::RefTarget::Other) | None => TagTarget::Unknown,
        };
        UpstreamTag {
            name: r.name,
            target,
        }
    }
}

impl From<api::Repository> for RepoMetadata {
    fn from(r: api::Repository) -> Self {
        RepoMetadata {
            name: r.name,
            full_name: r.full_name,
            html_url: r.html_url,
            avatar_url: r.owner.avatar_url,
        }
    }
}

#[async_trait]
impl UpstreamClient for GitHubClient {
    #[tracing::instrument(skip(self))]
    async fn list_starred(&self, user: &str) -> Result<Vec<RepoId>> {
        let url = format!("{}/users/{}/starred", self.api_url, user);
        let per_page = STARS_PER_PAGE.to_string();
        let mut starred = Vec::new();

        for page in 1..=MAX_STAR_PAGES {
            debug!("Fetching starred page {} from {}...", page, url);

            let page = page.to_string();
            let parsed: Vec<api::StarredRepo> = self
                .http_client
                .get_json_with_query(&url, &[("per_page", per_page.as_str()), ("page", page.as_str())])
                .await
                .with_context(|| format!("Failed to list repositories starred by {}", user))?;

            let len = parsed.len();
            for entry in parsed {
                match entry.full_name.parse::<RepoId>() {
                    Ok(repo) => starred.push(repo),
                    Err(e) => warn!("Skipping starred entry: {}", e),
                }
            }

            if len < STARS_PER_PAGE {
                return Ok(starred);
            }
        }

        anyhow::bail!(
            "{} stars more than {} repositories; refusing to return a partial list",
            user,
            MAX_STAR_PAGES * STARS_PER_PAGE
        )
    }

    #[tracing::instrument(skip(self))]
    async fn get_repository(&self, repo: &RepoId) -> Result<RepoMetadata> {
        let url = format!("{}/repos/{}/{}", self.api_url, repo.owner, repo.repo);
        debug!("Fetching repository metadata from {}...", url);

        let info: api::Repository = self
            .http_client
            .get_json(&url)
            .await
            .with_context(|| format!("Failed to fetch repository {}", repo))?;

        Ok(info.into())
    }

    #[tracing::instrument(skip(self))]
    async fn query_releases_and_tags(&self, repo: &RepoId) -> Result<ReleasesAndTags> {
        let url = self.graphql_url();
        debug!("Querying releases and tags of {} from {}...", repo, url);

        let body = json!({
            "query": RELEASES_AND_TAGS_QUERY,
            "variables": {
                "owner": repo.owner,
                "name": repo.repo,
                "count": RELEASE_QUERY_LIMIT,
            },
        });

        let response: api::GraphQlResponse<api::ReleaseQueryData> = self
            .http_client
            .post_json(&url, &body)
            .await
            .with_context(|| format!("Failed to query releases of {}", repo))?;

        let repository = match response.data.and_then(|d| d.repository) {
            Some(repository) => {
                if !response.errors.is_empty() {
                    warn!(
                        "Partial GraphQL result for {}: {}",
                        repo,
                        response
                            .errors
                            .iter()
                            .map(|e| e.message.as_str())
                            .collect::<Vec<_>>()
                            .join("; ")
                    );
                }
                repository
            }
            None => return Err(Self::graphql_failure(&response.errors)),
        };

        let releases = repository
            .releases
            .nodes
            .into_iter()
            .flatten()
            .map(UpstreamRelease::from)
            .collect();

        let tags = repository
            .refs
            .map(|refs| refs.nodes.into_iter().flatten().map(UpstreamTag::from).collect())
            .unwrap_or_default();

        Ok(ReleasesAndTags { releases, tags })
    }

    #[tracing::instrument(skip(self))]
    async fn rate_limit(&self) -> Result<RateLimit> {
        let url = format!("{}/rate_limit", self.api_url);

        let response: api::RateLimitResponse = self
            .http_client
            .get_json(&url)
            .await
            .context("Failed to fetch rate limit")?;

        let resets_at = DateTime::<Utc>::from_timestamp(response.rate.reset, 0)
            .context("Rate limit reset time is out of range")?;
        let resets_in = (resets_at - Utc::now()).max(TimeDelta::zero());

        Ok(RateLimit {
            limit: response.rate.limit,
            remaining: response.rate.remaining,
            resets_at,
            resets_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::is_not_found;
    use mockito::Matcher;
    use reqwest::Client;

    fn client_for(url: &str) -> GitHubClient {
        GitHubClient::new(HttpClient::new(Client::new()), Some(url.to_string()))
    }

    #[test]
    fn test_api_url_defaults_and_trims() {
        let github = GitHubClient::new(HttpClient::new(Client::new()), None);
        assert_eq!(github.api_url(), "https://api.github.com");
        assert_eq!(github.graphql_url(), "https://api.github.com/graphql");

        let ghe = GitHubClient::new(
            HttpClient::new(Client::new()),
            Some("https://git.example.com/api/v3/".to_string()),
        );
        assert_eq!(ghe.api_url(), "https://git.example.com/api/v3");
        assert_eq!(ghe.graphql_url(), "https://git.example.com/api/graphql");
    }

    #[tokio::test]
    async fn test_list_starred_multiple_pages() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let page1: Vec<String> = (0..100)
            .map(|i| format!(r#"{{"full_name": "owner/repo{}"}}"#, i))
            .collect();

        let mock_p1 = server
            .mock("GET", "/users/alice/starred?per_page=100&page=1")
            .with_status(200)
            .with_body(format!("[{}]", page1.join(",")))
            .create_async()
            .await;

        let mock_p2 = server
            .mock("GET", "/users/alice/starred?per_page=100&page=2")
            .with_status(200)
            .with_body(r#"[{"full_name": "other/last"}, {"full_name": "bogus"}]"#)
            .create_async()
            .await;

        let starred = client_for(&url).list_starred("alice").await.unwrap();

        mock_p1.assert_async().await;
        mock_p2.assert_async().await;
        assert_eq!(starred.len(), 101);
        assert_eq!(starred[0], RepoId::new("owner", "repo0"));
        assert_eq!(starred[100], RepoId::new("other", "last"));
    }

    #[tokio::test]
    async fn test_list_starred_fails_past_page_limit() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let full_page: Vec<String> = (0..STARS_PER_PAGE)
            .map(|i| format!(r#"{{"full_name": "owner/repo{}"}}"#, i))
            .collect();

        let mock = server
            .mock("GET", Matcher::Regex(r"^/users/alice/starred".to_string()))
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(format!("[{}]", full_page.join(",")))
            .expect(MAX_STAR_PAGES)
            .create_async()
            .await;

        let err = client_for(&url).list_starred("alice").await.unwrap_err();

        mock.assert_async().await;
        assert!(err.to_string().contains("partial list"));
    }

    #[test]
    fn test_release_query_tolerates_missing_nodes() {
        let data: api::ReleaseQueryData =
            serde_json::from_str(r#"{"repository": {"releases": {}, "refs": null}}"#).unwrap();

        let repository = data.repository.unwrap();
        assert!(repository.releases.nodes.is_empty());
        assert!(repository.refs.is_none());
    }

    #[tokio::test]
    async fn test_get_repository() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("GET", "/repos/owner/repo")
            .with_status(200)
            .with_body(
                r#"{
                    "name": "repo",
                    "full_name": "owner/repo",
                    "html_url": "https://github.com/owner/repo",
                    "owner": { "login": "owner", "avatar_url": "https://avatars.example/u/1?v=4" }
                }"#,
            )
            .create_async()
            .await;

        let meta = client_for(&url)
            .get_repository(&RepoId::new("owner", "repo"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            meta,
            RepoMetadata {
                name: "repo".into(),
                full_name: "owner/repo".into(),
                html_url: "https://github.com/owner/repo".into(),
                avatar_url: Some("https://avatars.example/u/1?v=4".into()),
            }
        );
    }

    #[tokio::test]
    async fn test_get_repository_not_found() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("GET", "/repos/owner/gone")
            .with_status(404)
            .create_async()
            .await;

        let err = client_for(&url)
            .get_repository(&RepoId::new("owner", "gone"))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn test_query_releases_and_tags() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("POST", "/graphql")
            .match_body(Matcher::PartialJson(json!({
                "variables": { "owner": "owner", "name": "repo", "count": 5 }
            })))
            .with_status(200)
            .with_body(
                r#"{"data": {"repository": {
                    "releases": {"nodes": [
                        {"tagName": "v2.0.0-rc1", "name": "RC", "createdAt": "2024-02-01T00:00:00Z",
                         "url": "https://github.com/owner/repo/releases/tag/v2.0.0-rc1",
                         "description": "rc", "isPrerelease": true}
                    ]},
                    "refs": {"nodes": [
                        {"name": "v1.1.0", "target": {"__typename": "Commit",
                            "pushedDate": null, "committedDate": "2024-01-10T00:00:00Z", "message": "bump"}},
                        {"name": "v1.0.0", "target": {"__typename": "Tag",
                            "tagger": {"date": "2024-01-01T00:00:00Z"}, "message": "first"}},
                        {"name": "weird", "target": {"__typename": "Tree"}}
                    ]}
                }}}"#,
            )
            .create_async()
            .await;

        let result = client_for(&url)
            .query_releases_and_tags(&RepoId::new("owner", "repo"))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.releases.len(), 1);
        assert!(result.releases[0].is_prerelease);
        assert_eq!(result.tags.len(), 3);
        assert_eq!(
            result.tags[0].target,
            TagTarget::Commit {
                date: Some("2024-01-10T00:00:00Z".into()),
                message: Some("bump".into()),
            }
        );
        assert_eq!(
            result.tags[1].target,
            TagTarget::Annotated {
                tagger_date: Some("2024-01-01T00:00:00Z".into()),
                message: Some("first".into()),
            }
        );
        assert_eq!(result.tags[2].target, TagTarget::Unknown);
    }

    #[tokio::test]
    async fn test_query_releases_and_tags_not_found() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(
                r#"{"data": {"repository": null},
                    "errors": [{"type": "NOT_FOUND", "message": "Could not resolve to a Repository"}]}"#,
            )
            .create_async()
            .await;

        let err = client_for(&url)
            .query_releases_and_tags(&RepoId::new("owner", "gone"))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert!(is_not_found(&err));
    }

    #[tokio::test]
    async fn test_query_releases_and_tags_rate_limited() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let _mock = server
            .mock("POST", "/graphql")
            .with_status(200)
            .with_body(r#"{"errors": [{"type": "RATE_LIMITED", "message": "API rate limit exceeded"}]}"#)
            .create_async()
            .await;

        let err = client_for(&url)
            .query_releases_and_tags(&RepoId::new("owner", "repo"))
            .await
            .unwrap_err();

        assert!(crate::http::is_rate_limited(&err));
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        let url = server.url();

        let mock = server
            .mock("GET", "/rate_limit")
            .with_status(200)
            .with_body(
                r#"{"resources": {}, "rate": {"limit": 5000, "remaining": 4990, "reset": 4102444800, "used": 10}}"#,
            )
            .create_async()
            .await;

        let limit = client_for(&url).rate_limit().await.unwrap();

        mock.assert_async().await;
        assert_eq!(limit.limit, 5000);
        assert_eq!(limit.remaining, 4990);
        assert_eq!(limit.resets_at.timestamp(), 4102444800);
        assert!(limit.resets_in > TimeDelta::zero());
    }
}
