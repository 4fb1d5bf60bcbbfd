use anyhow::Result;
use clap::Parser;
use release_tracker::commands;
use std::path::PathBuf;

/// release-tracker - track the latest releases of starred GitHub repositories
///
/// Checks the repositories a GitHub user stars and reports the newest release
/// (or tag) of each, caching upstream data so repeated runs stay within the
/// API rate limit.
///
/// Credentials are read from the config file; if none are configured the
/// GITHUB_TOKEN environment variable is used.
///
/// Examples:
///   release-tracker check octocat               # Latest releases of octocat's stars
///   release-tracker latest owner/repo           # Latest release of one repository
///   release-tracker allow owner/repo prereleases
#[derive(Parser, Debug)]
#[command(author, version = env!("RELEASE_TRACKER_VERSION"), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to <config dir>/release-tracker/config.json)
    #[arg(
        long = "config",
        short = 'c',
        env = "RELEASE_TRACKER_CONFIG",
        value_name = "PATH",
        global = true
    )]
    pub config: Option<PathBuf>,

    /// GitHub API URL (defaults to https://api.github.com)
    #[arg(long = "api-url", value_name = "URL", global = true)]
    pub api_url: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Report the latest release of every repository a user stars
    Check(CheckArgs),

    /// Show the latest release of one repository
    Latest(LatestArgs),

    /// Set which release kinds count for a repository
    Allow(AllowArgs),

    /// Show the remaining API request budget
    RateLimit,
}

#[derive(clap::Args, Debug)]
pub struct CheckArgs {
    /// GitHub user whose stars are checked (defaults to "user" in the config)
    #[arg(value_name = "USER")]
    pub user: Option<String>,

    /// Number of concurrent refresh batches
    #[arg(long, short = 't', value_name = "N")]
    pub threads: Option<usize>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(clap::Args, Debug)]
pub struct LatestArgs {
    /// The GitHub repository in the format "owner/repo"
    #[arg(value_name = "OWNER/REPO")]
    pub repo: String,
}

#[derive(clap::Args, Debug)]
pub struct AllowArgs {
    /// The GitHub repository in the format "owner/repo"
    #[arg(value_name = "OWNER/REPO")]
    pub repo: String,

    /// One of: releases, prereleases, tags
    #[arg(value_name = "POLICY")]
    pub policy: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let runtime = release_tracker::runtime::RealRuntime;

    match cli.command {
        Commands::Check(args) => {
            commands::check(
                runtime,
                args.user,
                args.threads,
                args.json,
                cli.config,
                cli.api_url,
            )
            .await?
        }
        Commands::Latest(args) => {
            commands::latest(runtime, &args.repo, cli.config, cli.api_url).await?
        }
        Commands::Allow(args) => {
            commands::allow(runtime, &args.repo, &args.policy, cli.config, cli.api_url)?
        }
        Commands::RateLimit => commands::rate_limit(runtime, cli.config, cli.api_url).await?,
    }
    Ok(())
}
