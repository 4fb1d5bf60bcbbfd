//! Command implementations behind the CLI.
//!
//! Every command opens a [`Session`]: the state files are loaded, the GitHub
//! client is built from the loaded settings, and state is written back once
//! the command is done.

use anyhow::Result;
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::build_upstream;
use crate::runtime::Runtime;
use crate::state::{ConfigDocument, StateFile};
use crate::tracker::ReleaseTracker;

mod allow;
mod check;
mod latest;
mod rate_limit;

pub use allow::allow;
pub use check::check;
pub use latest::latest;
pub use rate_limit::rate_limit;

pub(crate) struct Session<'a, R: Runtime> {
    file: StateFile<'a, R>,
    pub config: ConfigDocument,
    pub tracker: ReleaseTracker,
}

impl<'a, R: Runtime> Session<'a, R> {
    pub fn open(
        runtime: &'a R,
        config_path: Option<PathBuf>,
        api_url: Option<String>,
    ) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path,
            None => StateFile::default_config_path(runtime)?,
        };
        debug!("Using config file: {:?}", config_path);

        let file = StateFile::new(runtime, config_path);
        let (config, store) = file.load()?;
        let upstream = build_upstream(runtime, &config.settings, api_url)?;
        let tracker = ReleaseTracker::new(Arc::new(upstream), Arc::new(store))
            .with_threads(config.settings.threads());

        Ok(Self {
            file,
            config,
            tracker,
        })
    }

    pub fn save(&self) -> Result<()> {
        self.file.save(&self.config, self.tracker.store())
    }
}
