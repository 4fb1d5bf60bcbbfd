use anyhow::Result;
use std::path::PathBuf;

use crate::runtime::Runtime;
use crate::state::Visibility;
use crate::upstream::RepoId;

use super::Session;

/// Set which release kinds count as a repository's latest release
#[tracing::instrument(skip(runtime, config_path, api_url))]
pub fn allow<R: Runtime>(
    runtime: R,
    repo_str: &str,
    policy: &str,
    config_path: Option<PathBuf>,
    api_url: Option<String>,
) -> Result<()> {
    let repo = repo_str.parse::<RepoId>()?;
    let visibility = policy.parse::<Visibility>()?;

    let session = Session::open(&runtime, config_path, api_url)?;
    session.tracker.set_visibility(&repo, visibility);
    session.save()?;

    println!("{} now tracks {}.", repo, visibility);
    Ok(())
}
