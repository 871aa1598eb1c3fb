//! Ambient configuration (C10 — ambient).
//!
//! Plain settings struct with sane defaults, optionally overridden from a
//! config file and environment variables via the `config` crate, the same
//! layering the application shell uses for its own settings: defaults, then
//! `Settings.toml`, then `GFX_*` environment variables, last one wins.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Tunables for the transient pool and staging ring. Cheap to construct
/// with [`GraphConfig::default`]; [`GraphConfig::from_config`] exists for
/// callers that want file/environment overrides.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Bytes reserved for the staging ring ([`crate::staging::StagingUploader`]).
    pub staging_ring_capacity: usize,
    /// Frames a stable resource may go untouched before it's destroyed.
    pub stable_retire_frames: u64,
    /// Transient image slots kept idle before [`crate::pool::TransientPool::shrink_to`] sheds them.
    pub max_idle_images: usize,
    /// Transient buffer slots kept idle before [`crate::pool::TransientPool::shrink_to`] sheds them.
    pub max_idle_buffers: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            staging_ring_capacity: 4 * 1024 * 1024,
            stable_retire_frames: 4,
            max_idle_images: 256,
            max_idle_buffers: 256,
        }
    }
}

impl GraphConfig {
    /// Loads `Settings.toml` (if present) and `GFX_*` environment variables
    /// on top of [`GraphConfig::default`]. Missing file or unset variables
    /// are not errors — only a malformed value that was actually present is.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = Config::try_from(&GraphConfig::default())?;
        cfg.merge(File::with_name("Settings").required(false))?;
        cfg.merge(Environment::with_prefix("GFX"))?;
        cfg.try_into()
    }
}
