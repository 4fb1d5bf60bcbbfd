use anyhow::Result;
use std::path::PathBuf;

use crate::runtime::Runtime;
use crate::upstream::RateLimit;

use super::Session;

/// Show the remaining API request budget
#[tracing::instrument(skip(runtime, config_path, api_url))]
pub async fn rate_limit<R: Runtime>(
    runtime: R,
    config_path: Option<PathBuf>,
    api_url: Option<String>,
) -> Result<()> {
    let session = Session::open(&runtime, config_path, api_url)?;
    let limit = session.tracker.rate_limit().await?;
    println!("{}", render(&limit));
    Ok(())
}

fn render(limit: &RateLimit) -> String {
    format!(
        "{}/{} requests remaining, resets at {} (in {} minutes)",
        limit.remaining,
        limit.limit,
        limit.resets_at.to_rfc3339(),
        limit.resets_in.num_minutes().max(0)
    )
}
