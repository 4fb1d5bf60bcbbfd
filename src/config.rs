//! Tracker settings and construction of the upstream client.

use std::sync::Arc;

use anyhow::Result;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::http::{Auth, HttpClient, ResponseCache};
use crate::runtime::Runtime;
use crate::upstream::GitHubClient;

const USER_AGENT: &str = concat!("release-tracker/", env!("CARGO_PKG_VERSION"));

/// Top-level settings of the config document.
///
/// Keys this type does not know about are kept in `extra` and written back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// User whose stars are tracked when none is given on the command line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Number of concurrent refresh workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Settings {
    /// Picks credentials: OAuth app id/secret, then access token, then
    /// login/password, then `GITHUB_TOKEN`, else anonymous.
    pub fn credentials<R: Runtime>(&self, runtime: &R) -> Auth {
        if let (Some(id), Some(secret)) = (&self.client_id, &self.client_secret) {
            debug!("Using OAuth application credentials for client {}", id);
            return Auth::Basic {
                username: id.clone(),
                password: secret.clone(),
            };
        }
        if let Some(token) = &self.access_token {
            debug!("Using configured access token: {}", mask(token));
            return Auth::Token(token.clone());
        }
        if let (Some(login), Some(password)) = (&self.login, &self.password) {
            debug!("Using basic authentication for {}", login);
            return Auth::Basic {
                username: login.clone(),
                password: password.clone(),
            };
        }
        if let Ok(token) = runtime.env_var("GITHUB_TOKEN")
            && !token.is_empty()
        {
            debug!("Using GITHUB_TOKEN for authentication: {}", mask(&token));
            return Auth::Token(token);
        }
        Auth::Anonymous
    }

    pub fn threads(&self) -> usize {
        self.threads.unwrap_or(1).max(1)
    }
}

fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return "*********".to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}*********{}", head, tail)
}

/// Builds the GitHub client for `settings`. `api_url` overrides the
/// configured API URL.
pub fn build_upstream<R: Runtime>(
    runtime: &R,
    settings: &Settings,
    api_url: Option<String>,
) -> Result<GitHubClient> {
    let client = Client::builder().user_agent(USER_AGENT).build()?;

    let http_client = HttpClient::new(client)
        .with_auth(settings.credentials(runtime))
        .with_cache(Arc::new(ResponseCache::new()));

    Ok(GitHubClient::new(
        http_client,
        api_url.or_else(|| settings.api_url.clone()),
    ))
}
