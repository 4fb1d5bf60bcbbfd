//! Loading and saving tracking state.
//!
//! Persistent state lives in the config document (`config.json`) next to the
//! settings; ephemeral state lives in `cache.json` beside it. Both are cleaned
//! up on every load and save, and written through a temp file + rename so a
//! crash never leaves a half-written document behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::runtime::Runtime;

use super::{EntityStateStore, EphemeralRepo, TrackedSection, normalize_tracked};

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const CACHE_FILE_NAME: &str = "cache.json";

/// The config document: settings, persistent tracking state and the time of
/// the last full check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracked: Option<TrackedSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub settings: Settings,
}

/// The cache document: ephemeral state per repository.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheDocument {
    #[serde(default)]
    pub repos: BTreeMap<String, EphemeralRepo>,
}

/// Config and cache files of one tracker instance.
pub struct StateFile<'a, R: Runtime> {
    runtime: &'a R,
    config_path: PathBuf,
    cache_path: PathBuf,
}

impl<'a, R: Runtime> StateFile<'a, R> {
    pub fn new(runtime: &'a R, config_path: PathBuf) -> Self {
        let cache_path = config_path.with_file_name(CACHE_FILE_NAME);
        Self {
            runtime,
            config_path,
            cache_path,
        }
    }

    /// Default location: `<config dir>/release-tracker/config.json`.
    pub fn default_config_path(runtime: &R) -> Result<PathBuf> {
        let dir = runtime
            .config_dir()
            .context("Could not determine the user config directory; pass --config")?;
        Ok(dir.join("release-tracker").join(CONFIG_FILE_NAME))
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Loads both documents. A missing config is an empty one; a missing or
    /// unreadable cache is treated as empty since it can be rebuilt.
    #[tracing::instrument(skip(self))]
    pub fn load(&self) -> Result<(ConfigDocument, EntityStateStore)> {
        let mut config = if self.runtime.exists(&self.config_path) {
            let content = self.runtime.read_to_string(&self.config_path)?;
            serde_json::from_str::<ConfigDocument>(&content).with_context(|| {
                format!("Failed to parse config file {}", self.config_path.display())
            })?
        } else {
            debug!(
                "No config file at {}, starting empty",
                self.config_path.display()
            );
            ConfigDocument::default()
        };

        let cache = self.load_cache();
        let store = EntityStateStore::load(config.tracked.take(), cache);
        Ok((config, store))
    }

    fn load_cache(&self) -> CacheDocument {
        if !self.runtime.exists(&self.cache_path) {
            return CacheDocument::default();
        }

        let parsed = self
            .runtime
            .read_to_string(&self.cache_path)
            .and_then(|content| Ok(serde_json::from_str::<CacheDocument>(&content)?));

        match parsed {
            Ok(cache) => cache,
            Err(e) => {
                warn!(
                    "Ignoring unreadable cache {}: {}",
                    self.cache_path.display(),
                    e
                );
                CacheDocument::default()
            }
        }
    }

    /// Writes `config` with the store's normalized persistent state, then the
    /// store's ephemeral state.
    #[tracing::instrument(skip(self, config, store))]
    pub fn save(&self, config: &ConfigDocument, store: &EntityStateStore) -> Result<()> {
        let mut config = config.clone();
        config.tracked = store.tracked_section();
        normalize_tracked(&mut config.tracked);

        let content = serde_json::to_string_pretty(&config).context("Failed to serialize config")?;
        self.write_atomic(&self.config_path, content.as_bytes())?;

        let cache = serde_json::to_string(&store.cache_document())
            .context("Failed to serialize cache")?;
        self.write_atomic(&self.cache_path, cache.as_bytes())?;

        debug!("Saved state to {}", self.config_path.display());
        Ok(())
    }

    fn write_atomic(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !self.runtime.exists(parent)
        {
            self.runtime.create_dir_all(parent)?;
        }

        let tmp = path.with_extension("json.tmp");
        self.runtime.write(&tmp, contents)?;
        self.runtime.rename(&tmp, path)
    }
}
