//! Upstream feed access.
//!
//! An [`Upstream`] is the opaque fetch capability behind message sources:
//! given a [`FetchRequest`] it returns messages newest-first. Implementations:
//!
//! - [`HttpUpstream`] - blocking REST client for a Twitter-v1.1-compatible API
//! - [`MemoryUpstream`] - in-process feeds for tests and offline use
//!
//! Upstreams are registered per account in an [`UpstreamRegistry`], which is
//! carried by the application context.

pub mod http;
pub mod memory;

pub use http::HttpUpstream;
pub use memory::MemoryUpstream;

use crate::models::{Message, MessageId};
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A feed an upstream can serve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Feed {
    /// The account's own home timeline
    HomeTimeline,
    /// Messages mentioning the account
    Mentions,
    /// Favourites of the account (`None`) or of another user
    Favourites { user: Option<String> },
    /// Messages posted by a user
    UserPosts { user: String },
    /// Timeline of a remote list
    List { list_id: String },
}

impl std::fmt::Display for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Feed::HomeTimeline => write!(f, "home-timeline"),
            Feed::Mentions => write!(f, "mentions"),
            Feed::Favourites { user: None } => write!(f, "favourites"),
            Feed::Favourites { user: Some(user) } => write!(f, "favourites:{}", user),
            Feed::UserPosts { user } => write!(f, "posts:{}", user),
            Feed::List { list_id } => write!(f, "list:{}", list_id),
        }
    }
}

/// A single fetch against an upstream feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub feed: Feed,
    /// Only return messages newer than this id
    pub since_id: Option<MessageId>,
    /// Maximum number of messages to return
    pub count: Option<u32>,
}

impl FetchRequest {
    pub fn new(feed: Feed) -> Self {
        Self {
            feed,
            since_id: None,
            count: None,
        }
    }

    pub fn since(mut self, since_id: Option<MessageId>) -> Self {
        self.since_id = since_id;
        self
    }

    pub fn count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }
}

/// Opaque fetch capability for one account.
pub trait Upstream: Send + Sync {
    /// Fetch messages, newest first.
    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Message>>;

    /// Usernames of the members of a remote list.
    fn list_members(&self, list_id: &str) -> Result<Vec<String>>;
}

/// Account username → upstream registry.
#[derive(Default)]
pub struct UpstreamRegistry {
    upstreams: RwLock<BTreeMap<String, Arc<dyn Upstream>>>,
}

impl UpstreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the upstream for an account.
    pub fn register(&self, account: &str, upstream: Arc<dyn Upstream>) {
        self.upstreams.write().insert(account.to_string(), upstream);
    }

    pub fn unregister(&self, account: &str) -> bool {
        self.upstreams.write().remove(account).is_some()
    }

    /// Get the upstream for an account.
    pub fn get(&self, account: &str) -> Result<Arc<dyn Upstream>> {
        self.upstreams
            .read()
            .get(account)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no upstream for account: {}", account)))
    }

    /// Known account usernames, sorted.
    pub fn accounts(&self) -> Vec<String> {
        self.upstreams.read().keys().cloned().collect()
    }

    /// An arbitrary registered account, used for temporary streams.
    pub fn any_account(&self) -> Option<String> {
        self.upstreams.read().keys().next().cloned()
    }
}

impl std::fmt::Debug for UpstreamRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamRegistry")
            .field("accounts", &self.accounts())
            .finish()
    }
}

/// Cooperative cancellation flag for refreshes.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return [`Error::Cancelled`] if the token was cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = UpstreamRegistry::new();
        assert!(registry.any_account().is_none());
        assert!(matches!(registry.get("monty"), Err(Error::NotFound(_))));

        registry.register("monty", Arc::new(MemoryUpstream::new()));
        registry.register("kaban", Arc::new(MemoryUpstream::new()));
        assert!(registry.get("monty").is_ok());
        assert_eq!(registry.accounts(), vec!["kaban", "monty"]);

        assert!(registry.unregister("monty"));
        assert!(!registry.unregister("monty"));
        assert_eq!(registry.accounts(), vec!["kaban"]);
    }

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(matches!(token.check(), Err(Error::Cancelled)));
    }

    #[test]
    fn test_feed_display() {
        assert_eq!(Feed::HomeTimeline.to_string(), "home-timeline");
        assert_eq!(
            Feed::Favourites { user: Some("serval".into()) }.to_string(),
            "favourites:serval"
        );
    }
}
