use anyhow::Result;
use std::path::PathBuf;

use crate::runtime::Runtime;
use crate::upstream::RepoId;

use super::Session;

/// Show the latest release of one repository
#[tracing::instrument(skip(runtime, config_path, api_url))]
pub async fn latest<R: Runtime>(
    runtime: R,
    repo_str: &str,
    config_path: Option<PathBuf>,
    api_url: Option<String>,
) -> Result<()> {
    let repo = repo_str.parse::<RepoId>()?;
    let session = Session::open(&runtime, config_path, api_url)?;

    let result = session.tracker.latest_release(&repo).await;
    session.save()?;

    match result? {
        Some(release) => {
            println!("Repository: {}/{}", release.namespace, release.name);
            println!("Version: {}", release.version);
            if release.version_name != release.version {
                println!("Name: {}", release.version_name);
            }
            println!("Published: {}", release.publish_date.to_rfc3339());
            println!("URL: {}", release.release_url);
            if let Some(notes) = release.release_notes.filter(|n| !n.trim().is_empty()) {
                println!("\n{}", notes.trim_end());
            }
        }
        None => println!("No release found for {}.", repo),
    }
    Ok(())
}
