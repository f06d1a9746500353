//! Configuration and state management for Tsubame.
//!
//! This module defines KDL schemas for two distinct files:
//!
//! ## config.kdl - User preferences (safe to sync across machines)
//!
//! Located at:
//! - System: `~/.config/tsubame/config.kdl` (directory overridable with `TSUBAME_CONFIG_DIR`)
//! - Profile: `<data-dir>/config.kdl`
//!
//! Contains:
//! - `cache-size` - Maximum messages per message cache
//! - `fetch-count` - Messages requested per upstream fetch
//! - `fetch-timeout` - Upstream request timeout in seconds
//! - `log-level` - Default log filter
//! - `log-file` - Write a JSON log file to the data directory
//! - `output-format` - "json" or "human"
//!
//! ## state.kdl - Account credentials (machine-specific, contains secrets)
//!
//! Located at `<data-dir>/state.kdl`. One `account` node per upstream account.
//!
//! ## Security
//!
//! **CRITICAL**: `state.kdl` MUST be created with 0600 permissions (owner read/write only)
//! because it contains bearer tokens.
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, Resolved, ResolvedConfig, ValueSource, resolve_config, resolve_from,
};
pub use schema::{AccountState, OutputFormat, TsubameConfig, TsubameState};
#[cfg(unix)]
pub use schema::{CONFIG_FILE_MODE, STATE_FILE_MODE};

use crate::{Error, Result};
use kdl::KdlDocument;
use std::path::{Path, PathBuf};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TSUBAME_DATA_DIR";

/// Environment variable overriding the system config directory.
pub const CONFIG_DIR_ENV: &str = "TSUBAME_CONFIG_DIR";

/// Resolve the profile data directory.
///
/// Precedence: explicit path > `TSUBAME_DATA_DIR` > `<platform data dir>/tsubame`.
pub fn resolve_data_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    dirs::data_dir()
        .map(|d| d.join("tsubame"))
        .ok_or_else(|| Error::Config("could not determine data directory".to_string()))
}

/// Resolve the system config directory (`TSUBAME_CONFIG_DIR` or
/// `<platform config dir>/tsubame`).
pub fn system_config_dir() -> Option<PathBuf> {
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
        _ => dirs::config_dir().map(|d| d.join("tsubame")),
    }
}

/// Locations of the config and state files for one profile.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    data_dir: PathBuf,
    system_dir: Option<PathBuf>,
}

impl ConfigPaths {
    pub fn new(data_dir: &Path, system_dir: Option<&Path>) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            system_dir: system_dir.map(Path::to_path_buf),
        }
    }

    /// Paths for a data directory, with the system directory taken from the
    /// environment.
    pub fn for_data_dir(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            system_dir: system_config_dir(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn profile_config_path(&self) -> PathBuf {
        self.data_dir.join("config.kdl")
    }

    pub fn system_config_path(&self) -> Option<PathBuf> {
        self.system_dir.as_ref().map(|d| d.join("config.kdl"))
    }

    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.kdl")
    }

    pub fn read_profile_config(&self) -> Result<TsubameConfig> {
        Ok(TsubameConfig::from_kdl(&read_kdl(&self.profile_config_path())?))
    }

    pub fn read_system_config(&self) -> Result<TsubameConfig> {
        match self.system_config_path() {
            Some(path) => Ok(TsubameConfig::from_kdl(&read_kdl(&path)?)),
            None => Ok(TsubameConfig::default()),
        }
    }

    pub fn write_profile_config(&self, config: &TsubameConfig) -> Result<()> {
        write_kdl(&self.profile_config_path(), &config.to_kdl(), false)
    }

    pub fn read_state(&self) -> Result<TsubameState> {
        Ok(TsubameState::from_kdl(&read_kdl(&self.state_path())?))
    }

    /// Write state.kdl with owner-only permissions.
    pub fn write_state(&self, state: &TsubameState) -> Result<()> {
        write_kdl(&self.state_path(), &state.to_kdl(), true)
    }
}

/// Read a KDL file, treating a missing file as an empty document.
fn read_kdl(path: &Path) -> Result<KdlDocument> {
    if !path.exists() {
        return Ok(KdlDocument::new());
    }
    let content = std::fs::read_to_string(path)?;
    content
        .parse()
        .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
}

fn write_kdl(path: &Path, doc: &KdlDocument, secret: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, doc.to_string())?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if secret {
            STATE_FILE_MODE
        } else {
            CONFIG_FILE_MODE
        };
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = secret;

    Ok(())
}
