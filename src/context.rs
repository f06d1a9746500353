//! Application context.
//!
//! Everything that used to be reachable through process-wide "current"
//! references (the record store, the per-account upstreams, tunables) is
//! carried explicitly in an [`AppContext`] and handed to constructors.

use crate::config::{AccountState, ResolvedConfig, TsubameState};
use crate::store::{RecordStore, Store};
use crate::upstream::{HttpUpstream, Upstream, UpstreamRegistry, http::DEFAULT_API_BASE};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for the stream pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Maximum number of messages kept by a newly created message cache
    pub cache_size: usize,
    /// Messages requested per upstream fetch
    pub fetch_count: u32,
    /// Upstream request timeout
    pub fetch_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_size: crate::config::resolver::DEFAULT_CACHE_SIZE,
            fetch_count: crate::config::resolver::DEFAULT_FETCH_COUNT,
            fetch_timeout: Duration::from_secs(crate::config::resolver::DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }
}

impl Settings {
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self {
            cache_size: config.cache_size.value,
            fetch_count: config.fetch_count.value,
            fetch_timeout: Duration::from_secs(config.fetch_timeout.value),
        }
    }
}

/// Shared handles every entity constructor needs.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub store: Store,
    pub upstreams: Arc<UpstreamRegistry>,
    pub settings: Settings,
}

impl AppContext {
    pub fn new(store: Store, upstreams: Arc<UpstreamRegistry>, settings: Settings) -> Self {
        Self {
            store,
            upstreams,
            settings,
        }
    }

    /// Context over an in-memory store with no accounts.
    pub fn ephemeral() -> Self {
        Self::new(
            RecordStore::in_memory(),
            Arc::new(UpstreamRegistry::new()),
            Settings::default(),
        )
    }

    /// Register an HTTP upstream for every account in the state file.
    pub fn register_accounts(&self, state: &TsubameState) {
        for account in &state.accounts {
            self.upstreams
                .register(&account.username, http_upstream(account, &self.settings));
            tracing::debug!(account = %account.username, "registered upstream account");
        }
    }

    /// Get the upstream for an account.
    pub fn upstream(&self, account: &str) -> Result<Arc<dyn Upstream>> {
        self.upstreams.get(account)
    }

    /// Known account usernames, sorted.
    pub fn accounts(&self) -> Vec<String> {
        self.upstreams.accounts()
    }
}

fn http_upstream(account: &AccountState, settings: &Settings) -> Arc<dyn Upstream> {
    let api_base = account.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
    Arc::new(HttpUpstream::new(
        api_base,
        &account.token,
        settings.fetch_timeout,
    ))
}
