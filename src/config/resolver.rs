//! Precedence resolution for configuration.
//!
//! ## Config Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Profile config.kdl (`<data-dir>/config.kdl`)
//! 3. System config.kdl (`~/.config/tsubame/config.kdl`)
//! 4. Built-in defaults

use super::{ConfigPaths, OutputFormat, TsubameConfig};
use crate::Result;

pub const DEFAULT_CACHE_SIZE: usize = 1000;
pub const DEFAULT_FETCH_COUNT: u32 = 200;
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from the profile config.kdl
    Profile,
    /// Value from the system config.kdl
    System,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Profile => write!(f, "profile"),
            ValueSource::System => write!(f, "system"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    pub value: T,
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub cache_size: Resolved<usize>,
    pub fetch_count: Resolved<u32>,
    pub fetch_timeout: Resolved<u64>,
    pub log_level: Resolved<String>,
    pub log_file: Resolved<bool>,
    pub output_format: Resolved<OutputFormat>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            cache_size: Resolved::new(DEFAULT_CACHE_SIZE, ValueSource::Default),
            fetch_count: Resolved::new(DEFAULT_FETCH_COUNT, ValueSource::Default),
            fetch_timeout: Resolved::new(DEFAULT_FETCH_TIMEOUT_SECS, ValueSource::Default),
            log_level: Resolved::new(DEFAULT_LOG_LEVEL.to_string(), ValueSource::Default),
            log_file: Resolved::new(false, ValueSource::Default),
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
        }
    }
}

impl ResolvedConfig {
    pub fn output_format(&self) -> OutputFormat {
        self.output_format.value
    }

    /// Flatten into `(key, value, source)` rows for display.
    pub fn entries(&self) -> Vec<(&'static str, String, &ValueSource)> {
        vec![
            (
                "cache-size",
                self.cache_size.value.to_string(),
                &self.cache_size.source,
            ),
            (
                "fetch-count",
                self.fetch_count.value.to_string(),
                &self.fetch_count.source,
            ),
            (
                "fetch-timeout",
                self.fetch_timeout.value.to_string(),
                &self.fetch_timeout.source,
            ),
            (
                "log-level",
                self.log_level.value.clone(),
                &self.log_level.source,
            ),
            (
                "log-file",
                self.log_file.value.to_string(),
                &self.log_file.source,
            ),
            (
                "output-format",
                self.output_format.value.to_string(),
                &self.output_format.source,
            ),
        ]
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_format: Option<OutputFormat>,
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }
}

/// Pick the highest-precedence value among override, profile, and system.
fn pick<T: Clone>(
    cli: Option<&T>,
    profile: Option<&T>,
    system: Option<&T>,
    default: Resolved<T>,
) -> Resolved<T> {
    if let Some(value) = cli {
        Resolved::new(value.clone(), ValueSource::CliFlag)
    } else if let Some(value) = profile {
        Resolved::new(value.clone(), ValueSource::Profile)
    } else if let Some(value) = system {
        Resolved::new(value.clone(), ValueSource::System)
    } else {
        default
    }
}

/// Resolve configuration from already-loaded config files.
pub fn resolve_from(
    system: &TsubameConfig,
    profile: &TsubameConfig,
    overrides: &ConfigOverrides,
) -> ResolvedConfig {
    let defaults = ResolvedConfig::default();
    ResolvedConfig {
        cache_size: pick(
            None,
            profile.cache_size.as_ref(),
            system.cache_size.as_ref(),
            defaults.cache_size,
        ),
        fetch_count: pick(
            None,
            profile.fetch_count.as_ref(),
            system.fetch_count.as_ref(),
            defaults.fetch_count,
        ),
        fetch_timeout: pick(
            None,
            profile.fetch_timeout.as_ref(),
            system.fetch_timeout.as_ref(),
            defaults.fetch_timeout,
        ),
        log_level: pick(
            overrides.log_level.as_ref(),
            profile.log_level.as_ref(),
            system.log_level.as_ref(),
            defaults.log_level,
        ),
        log_file: pick(
            None,
            profile.log_file.as_ref(),
            system.log_file.as_ref(),
            defaults.log_file,
        ),
        output_format: pick(
            overrides.output_format.as_ref(),
            profile.output_format.as_ref(),
            system.output_format.as_ref(),
            defaults.output_format,
        ),
    }
}

/// Resolve configuration with the full precedence chain.
///
/// Invalid config files are rejected with [`crate::Error::Config`] rather
/// than silently falling back to defaults.
pub fn resolve_config(paths: &ConfigPaths, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let system = paths.read_system_config()?;
    let profile = paths.read_profile_config()?;
    for (label, config) in [("system", &system), ("profile", &profile)] {
        config
            .validate()
            .map_err(|e| crate::Error::Config(format!("{} config.kdl: {}", label, e)))?;
    }
    Ok(resolve_from(&system, &profile, overrides))
}
