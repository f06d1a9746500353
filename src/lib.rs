//! Tsubame - A personal social-feed client library.
//!
//! This library provides the persistent object and incremental stream
//! pipeline behind the `tsb` CLI: identity-aware record storage, typed
//! entities with schema backfill, ordered member groups, message sources,
//! bounded message caches, filters, streams, and the stream registry.

pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod entity;
pub mod filter;
pub mod group;
pub mod logging;
pub mod manager;
pub mod models;
pub mod signal;
pub mod source;
pub mod store;
pub mod stream;
pub mod upstream;
pub mod user;

/// Test utilities for isolated test environments.
#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    use crate::context::{AppContext, Settings};
    use crate::models::{Author, Message, MessageId};
    use crate::store::{BackendType, MemoryBackend, Query, Record, RecordBackend, RecordStore, Store};
    use crate::upstream::{MemoryUpstream, UpstreamRegistry};

    /// Account name registered by [`TestEnv::context`].
    pub const TEST_ACCOUNT: &str = "tester";

    /// Test environment with an isolated data directory.
    pub struct TestEnv {
        /// Isolated data storage directory
        pub data_dir: TempDir,
        /// Upstream registered for [`TEST_ACCOUNT`]
        pub upstream: Arc<MemoryUpstream>,
    }

    impl TestEnv {
        pub fn new() -> Self {
            Self {
                data_dir: TempDir::new().unwrap(),
                upstream: Arc::new(MemoryUpstream::new()),
            }
        }

        pub fn data_path(&self) -> &Path {
            self.data_dir.path()
        }

        /// Open the SQLite-backed store in the data directory.
        pub fn open_store(&self) -> Store {
            RecordStore::open(&self.data_path().join("records.db")).unwrap()
        }

        /// Build a context over a fresh in-memory store.
        pub fn context(&self) -> AppContext {
            self.context_with_store(RecordStore::in_memory())
        }

        /// Build a context over the given store, sharing this env's upstream.
        pub fn context_with_store(&self, store: Store) -> AppContext {
            let upstreams = UpstreamRegistry::new();
            upstreams.register(TEST_ACCOUNT, self.upstream.clone());
            AppContext::new(store, Arc::new(upstreams), Settings::default())
        }
    }

    impl Default for TestEnv {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Memory backend whose writes fail while its switch is on.
    pub struct FailingBackend {
        inner: MemoryBackend,
        failing: Arc<AtomicBool>,
    }

    impl FailingBackend {
        /// Build a store over a failing backend, returning the switch.
        pub fn store() -> (Store, Arc<AtomicBool>) {
            let failing = Arc::new(AtomicBool::new(false));
            let backend = Self {
                inner: MemoryBackend::new(),
                failing: failing.clone(),
            };
            (RecordStore::with_backend(Box::new(backend)), failing)
        }

        fn check(&self) -> crate::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(crate::Error::Other("write refused".to_string()));
            }
            Ok(())
        }
    }

    impl RecordBackend for FailingBackend {
        fn load(&self, kind: &str, pk: &str) -> crate::Result<Option<Record>> {
            self.inner.load(kind, pk)
        }

        fn query(&self, kind: &str, query: &Query) -> crate::Result<Vec<Record>> {
            self.inner.query(kind, query)
        }

        fn put(&mut self, record: &Record) -> crate::Result<()> {
            self.check()?;
            self.inner.put(record)
        }

        fn remove(&mut self, kind: &str, pk: &str) -> crate::Result<bool> {
            self.check()?;
            self.inner.remove(kind, pk)
        }

        fn commit(&mut self) -> crate::Result<()> {
            self.inner.commit()
        }

        fn location(&self) -> String {
            "failing".to_string()
        }

        fn backend_type(&self) -> BackendType {
            BackendType::Memory
        }
    }

    /// Build a message with a predictable timestamp derived from its id.
    pub fn message(id: MessageId, author: &str) -> Message {
        let created_at = chrono::DateTime::from_timestamp(1_500_000_000 + id as i64 * 60, 0)
            .unwrap();
        Message::new(id, Author::new(id, author), created_at, format!("message {}", id))
    }
}

/// Library-level error type for Tsubame operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Name already in use: {0}")]
    NameCollision(String),

    #[error("No constructor registered for member kind: {0}")]
    UnresolvableMemberKind(String),

    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Rate limited by upstream")]
    RateLimited { retry_after: Option<u64> },

    #[error("Refresh cancelled")]
    Cancelled,

    #[error("Index {index} out of range for group of {len} members")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Tsubame operations.
pub type Result<T> = std::result::Result<T, Error>;
