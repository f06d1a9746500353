//! Command implementations for the Tsubame CLI.
//!
//! Every command returns a result type implementing [`Output`], which `main`
//! prints as JSON or as human-readable text. Commands are organized by area:
//! - `stream` - streams, their sources and filters
//! - `account` - upstream accounts and local user lists
//! - this module - session setup, status, init and configuration

mod account;
mod stream;

pub use account::*;
pub use stream::*;

use crate::config::{ConfigPaths, OutputFormat, ResolvedConfig, TsubameConfig};
use crate::context::{AppContext, Settings};
use crate::manager::StreamManager;
use crate::models::Message;
use crate::store::RecordStore;
use crate::stream::MessageStream;
use crate::upstream::UpstreamRegistry;
use crate::{Error, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// File name of the record store inside the data directory.
pub const STORE_FILE_NAME: &str = "records.db";

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json_string<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string())
}

/// Everything a store-backed command needs.
#[derive(Debug)]
pub struct Session {
    pub paths: ConfigPaths,
    pub config: ResolvedConfig,
    pub ctx: AppContext,
}

impl Session {
    /// Open the profile's record store and register its accounts.
    pub fn open(paths: ConfigPaths, config: ResolvedConfig) -> Result<Self> {
        std::fs::create_dir_all(paths.data_dir())?;
        let state = paths.read_state()?;
        let store = RecordStore::open(&paths.data_dir().join(STORE_FILE_NAME))?;
        let ctx = AppContext::new(
            store,
            Arc::new(UpstreamRegistry::new()),
            Settings::from_config(&config),
        );
        ctx.register_accounts(&state);
        tracing::debug!(data_dir = %paths.data_dir().display(), accounts = ctx.accounts().len(), "session opened");
        Ok(Self::with_context(paths, config, ctx))
    }

    /// Build a session over an existing context.
    pub fn with_context(paths: ConfigPaths, config: ResolvedConfig, ctx: AppContext) -> Self {
        Self { paths, config, ctx }
    }

    pub fn manager(&self) -> Result<StreamManager> {
        StreamManager::open(&self.ctx)
    }

    /// The explicit account if given, otherwise the first registered one.
    pub fn account_or_default(&self, explicit: Option<&str>) -> Result<String> {
        match explicit {
            Some(account) => {
                self.ctx.upstream(account)?;
                Ok(account.to_string())
            }
            None => self.ctx.upstreams.any_account().ok_or_else(|| {
                Error::InvalidInput(
                    "no accounts configured; run `tsb account add` first".to_string(),
                )
            }),
        }
    }
}

/// A message as shown by the CLI.
#[derive(Serialize)]
pub struct MessageView {
    pub id: u64,
    pub author: String,
    pub created_at: String,
    pub text: String,
    #[serde(skip_serializing_if = "is_zero")]
    pub media: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id,
            author: message.author.screen_name.clone(),
            created_at: message.created_at.to_rfc3339(),
            text: message.text.clone(),
            media: message.entities.media.len(),
        }
    }
}

impl MessageView {
    fn to_line(&self) -> String {
        let media = if self.media > 0 {
            format!(" [{} media]", self.media)
        } else {
            String::new()
        };
        format!("  {} @{}: {}{}", self.created_at, self.author, self.text, media)
    }
}

/// One-line description of a stream.
#[derive(Serialize)]
pub struct StreamSummary {
    pub name: String,
    pub description: String,
    pub sources: usize,
    pub filters: usize,
    pub messages: usize,
}

impl From<&MessageStream> for StreamSummary {
    fn from(stream: &MessageStream) -> Self {
        Self {
            name: stream.name(),
            description: stream.description(),
            sources: stream.inputs().len(),
            filters: stream.filters().len(),
            messages: stream.len(),
        }
    }
}

impl StreamSummary {
    fn to_line(&self) -> String {
        let mut line = format!(
            "{} ({} sources, {} filters, {} messages)",
            self.name, self.sources, self.filters, self.messages
        );
        if !self.description.is_empty() {
            line.push_str(&format!(" - {}", self.description));
        }
        line
    }
}

// === Status ===

#[derive(Serialize)]
pub struct StatusResult {
    pub version: &'static str,
    pub commit: &'static str,
    pub built: &'static str,
    pub data_dir: PathBuf,
    pub backend: String,
    pub store: String,
    pub accounts: Vec<String>,
    pub streams: Vec<String>,
}

impl Output for StatusResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Tsubame {} ({}, built {})", self.version, self.commit, self.built),
            format!("  data dir: {}", self.data_dir.display()),
            format!("  store:    {} ({})", self.store, self.backend),
        ];
        if self.accounts.is_empty() {
            lines.push("  accounts: none (run `tsb account add`)".to_string());
        } else {
            lines.push(format!("  accounts: {}", self.accounts.join(", ")));
        }
        lines.push(format!("  streams:  {}", self.streams.len()));
        for name in &self.streams {
            lines.push(format!("    {}", name));
        }
        lines.join("\n")
    }
}

/// Summarize the profile.
pub fn status(session: &Session) -> Result<StatusResult> {
    let manager = session.manager()?;
    Ok(StatusResult {
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("TSB_GIT_COMMIT"),
        built: env!("TSB_BUILD_TIMESTAMP"),
        data_dir: session.paths.data_dir().to_path_buf(),
        backend: session.ctx.store.backend_type().to_string(),
        store: session.ctx.store.location(),
        accounts: session.ctx.accounts(),
        streams: manager.stream_names(),
    })
}

// === Init ===

#[derive(Serialize)]
pub struct InitResult {
    pub created: Vec<StreamSummary>,
    pub total_streams: usize,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        if self.created.is_empty() {
            return format!(
                "All initial streams already exist ({} streams total).",
                self.total_streams
            );
        }
        let mut lines = vec![format!("Created {} streams:", self.created.len())];
        lines.extend(self.created.iter().map(|s| format!("  {}", s.to_line())));
        lines.join("\n")
    }
}

/// Provision the initial streams for every account.
pub fn init(session: &Session) -> Result<InitResult> {
    if session.ctx.accounts().is_empty() {
        return Err(Error::InvalidInput(
            "no accounts configured; run `tsb account add` first".to_string(),
        ));
    }
    let manager = session.manager()?;
    let created = manager.add_initial_streams()?;
    Ok(InitResult {
        created: created.iter().map(|s| StreamSummary::from(s.as_ref())).collect(),
        total_streams: manager.stream_list().len(),
    })
}

// === Config ===

#[derive(Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub source: String,
}

#[derive(Serialize)]
pub struct ConfigShowResult {
    pub entries: Vec<ConfigEntry>,
    pub profile_config: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_config: Option<PathBuf>,
}

impl Output for ConfigShowResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        let width = self.entries.iter().map(|e| e.key.len()).max().unwrap_or(0);
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|e| format!("{:width$}  {}  ({})", e.key, e.value, e.source, width = width))
            .collect();
        lines.push(String::new());
        lines.push(format!("profile config: {}", self.profile_config.display()));
        if let Some(ref system) = self.system_config {
            lines.push(format!("system config:  {}", system.display()));
        }
        lines.join("\n")
    }
}

/// Show the resolved configuration with value sources.
pub fn config_show(paths: &ConfigPaths, config: &ResolvedConfig) -> ConfigShowResult {
    ConfigShowResult {
        entries: config
            .entries()
            .into_iter()
            .map(|(key, value, source)| ConfigEntry {
                key: key.to_string(),
                value,
                source: source.to_string(),
            })
            .collect(),
        profile_config: paths.profile_config_path(),
        system_config: paths.system_config_path(),
    }
}

#[derive(Serialize)]
pub struct ConfigSetResult {
    pub key: String,
    pub value: String,
    pub path: PathBuf,
}

impl Output for ConfigSetResult {
    fn to_json(&self) -> String {
        json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Set {} = {} in {}", self.key, self.value, self.path.display())
    }
}

/// Set one key in the profile config file.
pub fn config_set(paths: &ConfigPaths, key: &str, value: &str) -> Result<ConfigSetResult> {
    let mut config = paths.read_profile_config()?;
    apply_config_value(&mut config, key, value)?;
    config.validate().map_err(Error::Config)?;
    paths.write_profile_config(&config)?;
    tracing::info!(key = %key, value = %value, "profile config updated");
    Ok(ConfigSetResult {
        key: key.to_string(),
        value: value.to_string(),
        path: paths.profile_config_path(),
    })
}

fn apply_config_value(config: &mut TsubameConfig, key: &str, value: &str) -> Result<()> {
    fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
        value
            .parse()
            .map_err(|_| Error::Config(format!("invalid value for {}: {}", key, value)))
    }

    match key {
        "cache-size" => config.cache_size = Some(parse(key, value)?),
        "fetch-count" => config.fetch_count = Some(parse(key, value)?),
        "fetch-timeout" => config.fetch_timeout = Some(parse(key, value)?),
        "log-level" => config.log_level = Some(value.to_string()),
        "log-file" => config.log_file = Some(parse(key, value)?),
        "output-format" => {
            config.output_format = Some(OutputFormat::parse(value).ok_or_else(|| {
                Error::Config(format!("invalid value for {}: {} (json|human)", key, value))
            })?)
        }
        _ => return Err(Error::Config(format!("unknown config key: {}", key))),
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::test_utils::TestEnv;

    /// Session over the env's on-disk store and memory upstream.
    pub fn session(env: &TestEnv) -> Session {
        Session::with_context(
            ConfigPaths::new(env.data_path(), None),
            ResolvedConfig::default(),
            env.context_with_store(env.open_store()),
        )
    }
}
