use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use std::path::PathBuf;

use crate::runtime::Runtime;
use crate::tracker::{LastReleases, TrackedRelease};

use super::Session;

/// Report the latest release of every repository a user stars
#[tracing::instrument(skip(runtime, config_path, api_url))]
pub async fn check<R: Runtime>(
    runtime: R,
    user: Option<String>,
    threads: Option<usize>,
    json: bool,
    config_path: Option<PathBuf>,
    api_url: Option<String>,
) -> Result<()> {
    let mut session = Session::open(&runtime, config_path, api_url)?;

    let user = user
        .or_else(|| session.config.settings.user.clone())
        .context("No user to check. Pass one or set \"user\" in the config file.")?;
    if let Some(threads) = threads {
        session.tracker = session.tracker.with_threads(threads);
    }

    let result = session
        .tracker
        .last_releases(&user, session.config.last_check)
        .await;
    if let Ok(report) = &result {
        session.config.last_check = Some(report.checked_at);
    }
    // Whatever was refreshed before a failure is kept
    session.save()?;
    let report = result?;

    info!(
        "{} repositories with releases for {}",
        report.releases.len(),
        user
    );
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", render(&report));
    }
    Ok(())
}

pub(crate) fn render(report: &LastReleases) -> String {
    if report.releases.is_empty() {
        return "No releases found.\n".to_string();
    }

    report
        .releases
        .iter()
        .map(|release| format!("{}\n", render_line(release, report.last_check)))
        .collect()
}

fn render_line(release: &TrackedRelease, last_check: Option<DateTime<Utc>>) -> String {
    let marker = match last_check {
        Some(since) if release.publish_date > since => "* ",
        _ => "  ",
    };
    let title = if release.version_name == release.version {
        String::new()
    } else {
        format!(" ({})", release.version_name)
    };
    format!(
        "{}{}/{} {}{} {} {}",
        marker,
        release.namespace,
        release.name,
        release.version,
        title,
        release.publish_date.format("%Y-%m-%d"),
        release.release_url
    )
}
