//! KDL schema definitions for config.kdl and state.kdl.
//!
//! This module provides:
//! - Rust structs representing the KDL schema
//! - Serialization/deserialization to/from KDL format
//! - Validation functions

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User preferences stored in config.kdl.
///
/// File permissions: 0644 (rw-r--r--)
///
/// # KDL Schema
///
/// ```kdl
/// cache-size 1000
/// fetch-count 200
/// fetch-timeout 30
/// log-level "info"
/// log-file #true
/// output-format "human"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsubameConfig {
    /// Maximum number of messages kept per message cache
    pub cache_size: Option<usize>,

    /// Number of messages requested per upstream fetch
    pub fetch_count: Option<u32>,

    /// Upstream request timeout in seconds
    pub fetch_timeout: Option<u64>,

    /// Default log filter (e.g. "warn", "tsubame=debug")
    pub log_level: Option<String>,

    /// Write a JSON log file to the data directory
    pub log_file: Option<bool>,

    /// Default output format for CLI commands
    pub output_format: Option<OutputFormat>,
}

impl TsubameConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the config values.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_size == Some(0) {
            return Err("cache-size must be at least 1".to_string());
        }
        if let Some(count) = self.fetch_count {
            if !(1..=200).contains(&count) {
                return Err(format!("fetch-count must be 1-200, got {}", count));
            }
        }
        if self.fetch_timeout == Some(0) {
            return Err("fetch-timeout must be at least 1 second".to_string());
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    ///
    /// Values of the wrong type are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        Self {
            cache_size: first_integer(doc, "cache-size")
                .and_then(|i| usize::try_from(i).ok()),
            fetch_count: first_integer(doc, "fetch-count").and_then(|i| u32::try_from(i).ok()),
            fetch_timeout: first_integer(doc, "fetch-timeout")
                .and_then(|i| u64::try_from(i).ok()),
            log_level: first_string(doc, "log-level"),
            log_file: first_value(doc, "log-file").and_then(|v| v.as_bool()),
            output_format: first_string(doc, "output-format").and_then(|s| OutputFormat::parse(&s)),
        }
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        if let Some(size) = self.cache_size {
            push_node(&mut doc, "cache-size", KdlValue::Integer(size as i128));
        }
        if let Some(count) = self.fetch_count {
            push_node(&mut doc, "fetch-count", KdlValue::Integer(count as i128));
        }
        if let Some(timeout) = self.fetch_timeout {
            push_node(&mut doc, "fetch-timeout", KdlValue::Integer(timeout as i128));
        }
        if let Some(ref level) = self.log_level {
            push_node(&mut doc, "log-level", KdlValue::String(level.clone()));
        }
        if let Some(enabled) = self.log_file {
            push_node(&mut doc, "log-file", KdlValue::Bool(enabled));
        }
        if let Some(format) = self.output_format {
            push_node(&mut doc, "output-format", KdlValue::String(format.as_str().to_string()));
        }
        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &TsubameConfig) {
        if other.cache_size.is_some() {
            self.cache_size = other.cache_size;
        }
        if other.fetch_count.is_some() {
            self.fetch_count = other.fetch_count;
        }
        if other.fetch_timeout.is_some() {
            self.fetch_timeout = other.fetch_timeout;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level.clone();
        }
        if other.log_file.is_some() {
            self.log_file = other.log_file;
        }
        if other.output_format.is_some() {
            self.output_format = other.output_format;
        }
    }
}

/// Credentials for one upstream account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    /// Account username, also the registry key
    pub username: String,

    /// Bearer token (sensitive!)
    pub token: String,

    /// API base URL, when not the default
    pub api_base: Option<String>,
}

impl AccountState {
    /// Mask the token for display purposes, showing only the first and
    /// last 4 characters.
    pub fn masked_token(&self) -> String {
        let chars: Vec<char> = self.token.chars().collect();
        let head: String = chars.iter().take(4).collect();
        if chars.len() <= 12 {
            format!("{}...", head)
        } else {
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{}...{}", head, tail)
        }
    }
}

/// Account state stored in state.kdl.
///
/// This file contains secrets.
/// **MUST be created with 0600 permissions (owner read/write only)**.
///
/// # KDL Schema
///
/// ```kdl
/// account "monty" token="AAAA..." api-base="https://api.example/1.1"
/// account "kaban" token="BBBB..."
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TsubameState {
    pub accounts: Vec<AccountState>,
}

impl TsubameState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_secrets(&self) -> bool {
        !self.accounts.is_empty()
    }

    pub fn account(&self, username: &str) -> Option<&AccountState> {
        self.accounts.iter().find(|a| a.username == username)
    }

    /// Add an account or replace the one with the same username.
    ///
    /// Returns true if an existing account was replaced.
    pub fn upsert_account(&mut self, account: AccountState) -> bool {
        match self.accounts.iter_mut().find(|a| a.username == account.username) {
            Some(existing) => {
                *existing = account;
                true
            }
            None => {
                self.accounts.push(account);
                false
            }
        }
    }

    /// Remove an account, returning whether it existed.
    pub fn remove_account(&mut self, username: &str) -> bool {
        let before = self.accounts.len();
        self.accounts.retain(|a| a.username != username);
        self.accounts.len() != before
    }

    /// Parse state from a KDL document.
    ///
    /// Account nodes without a username or token are skipped.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut state = Self::new();
        for node in doc.nodes().iter().filter(|n| n.name().value() == "account") {
            let mut username = None;
            let mut token = None;
            let mut api_base = None;
            for entry in node.entries() {
                let Some(value) = entry.value().as_string() else {
                    continue;
                };
                match entry.name().map(|n| n.value()) {
                    None => username = Some(value.to_string()),
                    Some("token") => token = Some(value.to_string()),
                    Some("api-base") => api_base = Some(value.to_string()),
                    Some(_) => {}
                }
            }
            if let (Some(username), Some(token)) = (username, token) {
                state.upsert_account(AccountState {
                    username,
                    token,
                    api_base,
                });
            }
        }
        state
    }

    /// Convert state to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        for account in &self.accounts {
            let mut node = KdlNode::new("account");
            node.push(KdlEntry::new(KdlValue::String(account.username.clone())));
            node.push(KdlEntry::new_prop(
                "token",
                KdlValue::String(account.token.clone()),
            ));
            if let Some(ref api_base) = account.api_base {
                node.push(KdlEntry::new_prop(
                    "api-base",
                    KdlValue::String(api_base.clone()),
                ));
            }
            doc.nodes_mut().push(node);
        }
        doc
    }
}

/// Required permissions for state.kdl (Unix: 0600, owner read/write only).
#[cfg(unix)]
pub const STATE_FILE_MODE: u32 = 0o600;

/// Required permissions for config.kdl (Unix: 0644, readable by all).
#[cfg(unix)]
pub const CONFIG_FILE_MODE: u32 = 0o644;

fn first_value<'a>(doc: &'a KdlDocument, name: &str) -> Option<&'a KdlValue> {
    doc.get(name)
        .and_then(|node| node.entries().first())
        .map(|entry| entry.value())
}

fn first_string(doc: &KdlDocument, name: &str) -> Option<String> {
    first_value(doc, name)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn first_integer(doc: &KdlDocument, name: &str) -> Option<i128> {
    first_value(doc, name).and_then(|v| v.as_integer())
}

fn push_node(doc: &mut KdlDocument, name: &str, value: KdlValue) {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    doc.nodes_mut().push(node);
}
