//! Message sources and input groups.
//!
//! A [`MessageSource`] pulls new messages from one upstream feed. Every kind
//! shares the same refresh cycle:
//!
//! 1. disabled sources return nothing without touching the upstream
//! 2. fetch everything newer than the cursor (upstream answers newest-first)
//! 3. reverse to oldest-first
//! 4. advance the cursor to the newest id
//! 5. append to the message cache when caching is on
//! 6. emit `refresh_done`
//!
//! The cursor lives in memory only. A caching source without a cursor starts
//! from the newest message already in its cache.
//!
//! An [`InputGroup`] is an ordered group of sources refreshed together; one
//! failing source is logged and skipped, and the combined result is merged
//! chronologically.

use crate::cache::MessageCache;
use crate::context::AppContext;
use crate::entity::{Entity, Persistent, Schema};
use crate::group::{Constructor, Member, OrderedGroup};
use crate::models::{Message, MessageId, merge_chronological};
use crate::signal::Signal;
use crate::store::{Identity, Query, RecordRef};
use crate::upstream::{CancelToken, Feed, FetchRequest, Upstream};
use crate::user::LocalUserList;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

/// Upstream feed kinds a source can follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// The account's home timeline
    HomeTimeline,
    /// Messages mentioning the account
    Mentions,
    /// The account's own favourites
    Favourites,
    /// Posts of one user
    UserPosts,
    /// Favourites of one user
    UserFavourites,
    /// Timeline of a list kept on the upstream
    RemoteList,
    /// Posts of every member of a local user list
    LocalList,
}

impl SourceKind {
    pub const ALL: [SourceKind; 7] = [
        SourceKind::HomeTimeline,
        SourceKind::Mentions,
        SourceKind::Favourites,
        SourceKind::UserPosts,
        SourceKind::UserFavourites,
        SourceKind::RemoteList,
        SourceKind::LocalList,
    ];

    /// Record kind of this source type.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::HomeTimeline => "source-home-timeline",
            SourceKind::Mentions => "source-mentions",
            SourceKind::Favourites => "source-favourites",
            SourceKind::UserPosts => "source-user-posts",
            SourceKind::UserFavourites => "source-user-favourites",
            SourceKind::RemoteList => "source-remote-list",
            SourceKind::LocalList => "source-local-list",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    /// Short name used on the command line.
    pub fn label(&self) -> &'static str {
        self.as_str().trim_start_matches("source-")
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.label() == label)
    }

    /// Field naming the kind-specific target, if the kind has one.
    pub fn target_field(&self) -> Option<&'static str> {
        match self {
            SourceKind::UserPosts | SourceKind::UserFavourites => Some("source_username"),
            SourceKind::RemoteList => Some("remote_list_id"),
            SourceKind::LocalList => Some("local_list_name"),
            _ => None,
        }
    }

    pub fn schema(&self) -> Schema {
        let base = Schema::new()
            .field("enabled", true)
            .field("api_username", Value::Null)
            .field("cache_messages", false)
            .field("cache_pk", Value::Null);
        match self.target_field() {
            Some(field) => Schema::inherit(base).field(field, Value::Null),
            None => base,
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

const SOURCE_REGISTRY: &[(&str, Constructor<MessageSource>)] = &[
    ("source-home-timeline", MessageSource::from_record),
    ("source-mentions", MessageSource::from_record),
    ("source-favourites", MessageSource::from_record),
    ("source-user-posts", MessageSource::from_record),
    ("source-user-favourites", MessageSource::from_record),
    ("source-remote-list", MessageSource::from_record),
    ("source-local-list", MessageSource::from_record),
];

/// Incremental fetch adapter for one upstream feed.
pub struct MessageSource {
    ctx: AppContext,
    entity: Entity,
    source_kind: SourceKind,
    latest_id: Mutex<Option<MessageId>>,
    cache: Mutex<Option<Arc<MessageCache>>>,
    messages: Mutex<Vec<Message>>,
    refresh_done: Signal,
}

impl MessageSource {
    /// Create a new source (not yet saved).
    ///
    /// `target` is the username, remote list id, or local list name for kinds
    /// that follow one; it is ignored otherwise.
    pub fn create(
        ctx: &AppContext,
        kind: SourceKind,
        account: &str,
        target: Option<&str>,
    ) -> Result<Self> {
        let entity = Entity::create(&ctx.store, kind.as_str(), &kind.schema(), Identity::Detached);
        entity.set("api_username", account);
        if let Some(field) = kind.target_field() {
            let target = target.ok_or_else(|| {
                Error::InvalidInput(format!("{} source needs a {}", kind, field))
            })?;
            entity.set(field, target);
        }
        Ok(Self::from_entity(ctx, entity, kind))
    }

    pub fn home_timeline(ctx: &AppContext, account: &str) -> Self {
        Self::untargeted(ctx, SourceKind::HomeTimeline, account)
    }

    pub fn mentions(ctx: &AppContext, account: &str) -> Self {
        Self::untargeted(ctx, SourceKind::Mentions, account)
    }

    pub fn favourites(ctx: &AppContext, account: &str) -> Self {
        Self::untargeted(ctx, SourceKind::Favourites, account)
    }

    pub fn user_posts(ctx: &AppContext, account: &str, username: &str) -> Self {
        Self::targeted(ctx, SourceKind::UserPosts, account, username)
    }

    pub fn user_favourites(ctx: &AppContext, account: &str, username: &str) -> Self {
        Self::targeted(ctx, SourceKind::UserFavourites, account, username)
    }

    pub fn remote_list(ctx: &AppContext, account: &str, list_id: &str) -> Self {
        Self::targeted(ctx, SourceKind::RemoteList, account, list_id)
    }

    pub fn local_list(ctx: &AppContext, account: &str, list_name: &str) -> Self {
        Self::targeted(ctx, SourceKind::LocalList, account, list_name)
    }

    fn untargeted(ctx: &AppContext, kind: SourceKind, account: &str) -> Self {
        let entity = Entity::create(&ctx.store, kind.as_str(), &kind.schema(), Identity::Detached);
        entity.set("api_username", account);
        Self::from_entity(ctx, entity, kind)
    }

    fn targeted(ctx: &AppContext, kind: SourceKind, account: &str, target: &str) -> Self {
        let source = Self::untargeted(ctx, kind, account);
        if let Some(field) = kind.target_field() {
            source.entity.set(field, target);
        }
        source
    }

    /// Wrap a stored source record, dispatching on its kind.
    pub fn from_record(ctx: &AppContext, record: RecordRef) -> Result<Self> {
        let kind_name = record.read().kind.clone();
        let kind = SourceKind::from_kind(&kind_name)
            .ok_or(Error::UnresolvableMemberKind(kind_name))?;
        let entity = Entity::wrap(&ctx.store, record, &kind.schema(), Identity::Detached);
        Ok(Self::from_entity(ctx, entity, kind))
    }

    pub fn load(ctx: &AppContext, kind: SourceKind, pk: &str) -> Result<Self> {
        let record = ctx.store.get(kind.as_str(), &Query::pk(pk), Identity::Detached)?;
        Self::from_record(ctx, record)
    }

    fn from_entity(ctx: &AppContext, entity: Entity, source_kind: SourceKind) -> Self {
        Self {
            ctx: ctx.clone(),
            entity,
            source_kind,
            latest_id: Mutex::new(None),
            cache: Mutex::new(None),
            messages: Mutex::new(Vec::new()),
            refresh_done: Signal::new(),
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source_kind
    }

    /// Account whose upstream this source fetches through.
    pub fn account(&self) -> Option<String> {
        self.entity.get_or_default("api_username")
    }

    /// Username, list id, or list name the source follows.
    pub fn target(&self) -> Option<String> {
        self.source_kind
            .target_field()
            .and_then(|field| self.entity.get_or_default::<Option<String>>(field))
    }

    pub fn enabled(&self) -> bool {
        self.entity.get("enabled").unwrap_or(true)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.entity.set("enabled", enabled);
    }

    pub fn cache_messages(&self) -> bool {
        self.entity.get_or_default("cache_messages")
    }

    pub fn set_cache_messages(&self, cache_messages: bool) {
        self.entity.set("cache_messages", cache_messages);
    }

    /// Newest message id seen so far.
    pub fn latest_id(&self) -> Option<MessageId> {
        *self.latest_id.lock()
    }

    /// Notified after every completed refresh of an enabled source.
    pub fn refresh_done(&self) -> &Signal {
        &self.refresh_done
    }

    /// Human-readable summary such as `user-posts:serval`.
    pub fn describe(&self) -> String {
        match self.target() {
            Some(target) => format!("{}:{}", self.source_kind, target),
            None => self.source_kind.to_string(),
        }
    }

    /// The message cache, created or loaded on first use.
    ///
    /// A stored cache reference that no longer resolves is replaced by a
    /// fresh cache.
    pub fn cache(&self) -> Result<Arc<MessageCache>> {
        let mut slot = self.cache.lock();
        if let Some(ref cache) = *slot {
            return Ok(cache.clone());
        }

        let stored_pk: Option<String> = self.entity.get_or_default("cache_pk");
        let cache = match stored_pk {
            Some(pk) => match MessageCache::from_store(&self.ctx.store, &pk) {
                Ok(cache) => cache,
                Err(Error::NotFound(_)) => {
                    tracing::warn!(source = %self.entity.pk(), cache = %pk, "message cache missing, starting a new one");
                    self.new_cache()
                }
                Err(e) => return Err(e),
            },
            None => self.new_cache(),
        };
        let cache = Arc::new(cache);
        *slot = Some(cache.clone());
        Ok(cache)
    }

    fn new_cache(&self) -> MessageCache {
        let cache = MessageCache::new(&self.ctx);
        self.entity.set("cache_pk", cache.pk());
        cache
    }

    /// Current contents: the cache when caching is on, otherwise the
    /// newest `cache_size` messages fetched during this session. Oldest first.
    pub fn messages(&self) -> Vec<Message> {
        if self.cache_messages() {
            match self.cache() {
                Ok(cache) => return cache.messages(),
                Err(e) => {
                    tracing::warn!(source = %self.describe(), "message cache unavailable: {}", e);
                }
            }
        }
        self.messages.lock().clone()
    }

    /// Fetch new messages, oldest first.
    pub fn refresh(&self) -> Result<Vec<Message>> {
        self.refresh_with(&CancelToken::new())
    }

    /// Fetch new messages, checking `token` before each upstream request.
    pub fn refresh_with(&self, token: &CancelToken) -> Result<Vec<Message>> {
        if !self.enabled() {
            tracing::debug!(source = %self.describe(), "source disabled, skipping refresh");
            return Ok(Vec::new());
        }
        token.check()?;

        let cache = if self.cache_messages() {
            Some(self.cache()?)
        } else {
            None
        };

        let since = {
            let mut latest = self.latest_id.lock();
            if latest.is_none() {
                *latest = cache.as_ref().and_then(|c| c.newest_id());
            }
            *latest
        };

        let account = self.account().ok_or_else(|| {
            Error::InvalidInput(format!("source {} has no account", self.entity.pk()))
        })?;
        let upstream = self.ctx.upstream(&account)?;

        let mut fresh = self.fetch(upstream.as_ref(), since, token)?;
        fresh.reverse();
        fresh.retain(|m| since.is_none_or(|s| m.id > s));

        match cache {
            Some(cache) if !fresh.is_empty() => {
                cache.add_messages(&fresh)?;
                cache.save(true)?;
            }
            Some(_) => {}
            None => {
                let mut messages = self.messages.lock();
                messages.extend(fresh.iter().cloned());
                let excess = messages.len().saturating_sub(self.ctx.settings.cache_size);
                messages.drain(..excess);
            }
        }

        // Only advance once the batch is stored, so a failed save is refetched.
        if let Some(newest) = fresh.iter().map(|m| m.id).max() {
            *self.latest_id.lock() = Some(newest);
        }
        tracing::debug!(
            source = %self.describe(),
            since = ?since,
            fetched = fresh.len(),
            "source refreshed"
        );

        self.refresh_done.emit();
        Ok(fresh)
    }

    /// Fetch newest-first from the upstream.
    fn fetch(
        &self,
        upstream: &dyn Upstream,
        since: Option<MessageId>,
        token: &CancelToken,
    ) -> Result<Vec<Message>> {
        let count = self.ctx.settings.fetch_count;
        let feeds = match self.source_kind {
            SourceKind::HomeTimeline => vec![Feed::HomeTimeline],
            SourceKind::Mentions => vec![Feed::Mentions],
            SourceKind::Favourites => vec![Feed::Favourites { user: None }],
            SourceKind::UserPosts => vec![Feed::UserPosts {
                user: self.required_target()?,
            }],
            SourceKind::UserFavourites => vec![Feed::Favourites {
                user: Some(self.required_target()?),
            }],
            SourceKind::RemoteList => vec![Feed::List {
                list_id: self.required_target()?,
            }],
            SourceKind::LocalList => {
                let list = LocalUserList::from_store(&self.ctx.store, &self.required_target()?)?;
                list.usernames()
                    .into_iter()
                    .map(|user| Feed::UserPosts { user })
                    .collect()
            }
        };

        let mut fetched = Vec::new();
        for feed in feeds {
            token.check()?;
            fetched.extend(upstream.fetch(&FetchRequest::new(feed).since(since).count(count))?);
        }

        if self.source_kind == SourceKind::LocalList {
            // several feeds: restore a single newest-first order
            fetched = merge_chronological(fetched);
            fetched.reverse();
        }
        Ok(fetched)
    }

    fn required_target(&self) -> Result<String> {
        self.target().ok_or_else(|| {
            Error::InvalidInput(format!(
                "{} source {} has no target",
                self.source_kind,
                self.entity.pk()
            ))
        })
    }
}

impl Persistent for MessageSource {
    fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Save the source and, if loaded, its cache.
    fn save(&self, commit: bool) -> Result<()> {
        if let Some(cache) = self.cache.lock().clone() {
            cache.save(false)?;
        }
        self.entity.save(commit)
    }
}

impl Member for MessageSource {
    fn registry() -> &'static [(&'static str, Constructor<Self>)] {
        SOURCE_REGISTRY
    }

    fn purge(&self) -> Result<()> {
        if let Some(pk) = self.entity.get_or_default::<Option<String>>("cache_pk") {
            match MessageCache::from_store(&self.ctx.store, &pk) {
                Ok(cache) => cache.delete(false)?,
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.delete(false)
    }
}

impl std::fmt::Debug for MessageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSource")
            .field("pk", &self.entity.pk())
            .field("kind", &self.source_kind)
            .field("target", &self.target())
            .field("latest_id", &self.latest_id())
            .finish()
    }
}

pub const INPUT_GROUP_KIND: &str = "input-group";

/// Ordered group of message sources refreshed together.
#[derive(Debug)]
pub struct InputGroup {
    group: OrderedGroup<MessageSource>,
}

impl InputGroup {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            group: OrderedGroup::create(ctx, INPUT_GROUP_KIND),
        }
    }

    pub fn load(ctx: &AppContext, pk: &str) -> Result<Self> {
        Ok(Self {
            group: OrderedGroup::load(ctx, INPUT_GROUP_KIND, pk)?,
        })
    }

    /// Refresh every source in member order and merge the results.
    pub fn refresh(&self) -> Result<Vec<Message>> {
        self.refresh_with(&CancelToken::new())
    }

    /// Like [`InputGroup::refresh`]. A failing source is logged and skipped;
    /// cancellation aborts the whole refresh.
    pub fn refresh_with(&self, token: &CancelToken) -> Result<Vec<Message>> {
        let mut collected = Vec::new();
        for source in self.group.members() {
            match source.refresh_with(token) {
                Ok(messages) => collected.extend(messages),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!(source = %source.describe(), "source refresh failed: {}", e);
                }
            }
        }
        Ok(merge_chronological(collected))
    }

    /// Current contents of every source, merged. Never fetches.
    pub fn messages(&self) -> Vec<Message> {
        merge_chronological(
            self.group
                .members()
                .iter()
                .flat_map(|source| source.messages())
                .collect(),
        )
    }
}

impl std::ops::Deref for InputGroup {
    type Target = OrderedGroup<MessageSource>;

    fn deref(&self) -> &Self::Target {
        &self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Settings;
    use crate::test_utils::{FailingBackend, TEST_ACCOUNT, TestEnv, message};
    use crate::user::User;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ids(messages: &[Message]) -> Vec<MessageId> {
        messages.iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_refresh_reverses_and_advances_cursor() {
        let env = TestEnv::new();
        let ctx = env.context();
        env.upstream.post(Feed::HomeTimeline, message(4, "serval"));
        env.upstream.post(Feed::HomeTimeline, message(5, "serval"));

        let source = MessageSource::home_timeline(&ctx, TEST_ACCOUNT);
        let fresh = source.refresh().unwrap();
        assert_eq!(ids(&fresh), vec![4, 5]);
        assert_eq!(source.latest_id(), Some(5));

        env.upstream.post(Feed::HomeTimeline, message(6, "kaban"));
        let fresh = source.refresh().unwrap();
        assert_eq!(ids(&fresh), vec![6]);
        assert_eq!(env.upstream.requests()[1].since_id, Some(5));
        assert_eq!(ids(&source.messages()), vec![4, 5, 6]);
    }

    #[test]
    fn test_empty_refresh_keeps_cursor() {
        let env = TestEnv::new();
        let source = MessageSource::mentions(&env.context(), TEST_ACCOUNT);
        env.upstream.post(Feed::Mentions, message(3, "a"));
        source.refresh().unwrap();
        assert!(source.refresh().unwrap().is_empty());
        assert_eq!(source.latest_id(), Some(3));
    }

    #[test]
    fn test_disabled_source_does_not_fetch() {
        let env = TestEnv::new();
        let source = MessageSource::home_timeline(&env.context(), TEST_ACCOUNT);
        let notified = Arc::new(AtomicUsize::new(0));
        let counter = notified.clone();
        source.refresh_done().connect(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        source.set_enabled(false);
        assert!(source.refresh().unwrap().is_empty());
        assert_eq!(env.upstream.fetch_count(), 0);
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        source.set_enabled(true);
        source.refresh().unwrap();
        assert_eq!(env.upstream.fetch_count(), 1);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cancelled_token_stops_before_fetch() {
        let env = TestEnv::new();
        let source = MessageSource::home_timeline(&env.context(), TEST_ACCOUNT);
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(source.refresh_with(&token), Err(Error::Cancelled)));
        assert_eq!(env.upstream.fetch_count(), 0);
    }

    #[test]
    fn test_unknown_account_is_not_found() {
        let env = TestEnv::new();
        let source = MessageSource::home_timeline(&env.context(), "nobody");
        assert!(matches!(source.refresh(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_targeted_feeds() {
        let env = TestEnv::new();
        let ctx = env.context();
        MessageSource::user_posts(&ctx, TEST_ACCOUNT, "serval").refresh().unwrap();
        MessageSource::user_favourites(&ctx, TEST_ACCOUNT, "kaban").refresh().unwrap();
        MessageSource::remote_list(&ctx, TEST_ACCOUNT, "42").refresh().unwrap();
        MessageSource::favourites(&ctx, TEST_ACCOUNT).refresh().unwrap();

        let feeds: Vec<Feed> = env.upstream.requests().into_iter().map(|r| r.feed).collect();
        assert_eq!(
            feeds,
            vec![
                Feed::UserPosts { user: "serval".into() },
                Feed::Favourites { user: Some("kaban".into()) },
                Feed::List { list_id: "42".into() },
                Feed::Favourites { user: None },
            ]
        );
        assert!(env.upstream.requests().iter().all(|r| r.count == Some(200)));
    }

    #[test]
    fn test_create_requires_target() {
        let env = TestEnv::new();
        let ctx = env.context();
        let err = MessageSource::create(&ctx, SourceKind::UserPosts, TEST_ACCOUNT, None).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        let source =
            MessageSource::create(&ctx, SourceKind::UserPosts, TEST_ACCOUNT, Some("serval")).unwrap();
        assert_eq!(source.describe(), "user-posts:serval");
    }

    #[test]
    fn test_local_list_merges_member_posts() {
        let env = TestEnv::new();
        let ctx = env.context();
        let serval = User::new(&ctx.store, "serval", "Serval").unwrap();
        let kaban = User::new(&ctx.store, "kaban", "Kaban").unwrap();
        LocalUserList::new(&ctx.store, "friends", "", &[serval, kaban]).unwrap();

        env.upstream.post(Feed::UserPosts { user: "serval".into() }, message(1, "serval"));
        env.upstream.post(Feed::UserPosts { user: "serval".into() }, message(4, "serval"));
        env.upstream.post(Feed::UserPosts { user: "kaban".into() }, message(2, "kaban"));
        env.upstream.post(Feed::UserPosts { user: "toki".into() }, message(3, "toki"));

        let source = MessageSource::local_list(&ctx, TEST_ACCOUNT, "friends");
        assert_eq!(ids(&source.refresh().unwrap()), vec![1, 2, 4]);
        assert_eq!(source.latest_id(), Some(4));
        assert_eq!(env.upstream.fetch_count(), 2);
    }

    #[test]
    fn test_caching_source_persists_and_seeds_cursor() {
        let env = TestEnv::new();
        let ctx = env.context_with_store(env.open_store());
        env.upstream.post(Feed::HomeTimeline, message(1, "a"));
        env.upstream.post(Feed::HomeTimeline, message(2, "a"));

        let source = MessageSource::home_timeline(&ctx, TEST_ACCOUNT);
        source.set_cache_messages(true);
        source.refresh().unwrap();
        source.save(true).unwrap();
        let pk = source.pk();

        // a fresh process sees the cached messages without fetching
        let ctx = env.context_with_store(env.open_store());
        let reloaded = MessageSource::load(&ctx, SourceKind::HomeTimeline, &pk).unwrap();
        assert_eq!(ids(&reloaded.messages()), vec![1, 2]);
        assert_eq!(reloaded.latest_id(), None);

        env.upstream.post(Feed::HomeTimeline, message(3, "a"));
        assert_eq!(ids(&reloaded.refresh().unwrap()), vec![3]);
        assert_eq!(env.upstream.requests().last().unwrap().since_id, Some(2));
        assert_eq!(ids(&reloaded.messages()), vec![1, 2, 3]);
    }

    #[test]
    fn test_failed_cache_save_keeps_cursor() {
        let env = TestEnv::new();
        let (store, failing) = FailingBackend::store();
        let ctx = env.context_with_store(store);
        let source = MessageSource::home_timeline(&ctx, TEST_ACCOUNT);
        source.set_cache_messages(true);

        env.upstream.post(Feed::HomeTimeline, message(1, "serval"));
        source.refresh().unwrap();

        env.upstream.post(Feed::HomeTimeline, message(2, "serval"));
        failing.store(true, Ordering::SeqCst);
        assert!(source.refresh().is_err());
        assert_eq!(source.latest_id(), Some(1));

        failing.store(false, Ordering::SeqCst);
        assert_eq!(ids(&source.refresh().unwrap()), vec![2]);
        assert_eq!(source.latest_id(), Some(2));
        assert_eq!(ids(&source.messages()), vec![1, 2]);
    }

    #[test]
    fn test_uncached_session_messages_are_bounded() {
        let env = TestEnv::new();
        let base = env.context();
        let ctx = AppContext::new(
            base.store.clone(),
            base.upstreams.clone(),
            Settings {
                cache_size: 2,
                ..Settings::default()
            },
        );
        let source = MessageSource::home_timeline(&ctx, TEST_ACCOUNT);
        for id in 1..=3 {
            env.upstream.post(Feed::HomeTimeline, message(id, "serval"));
        }
        source.refresh().unwrap();
        env.upstream.post(Feed::HomeTimeline, message(4, "serval"));
        source.refresh().unwrap();
        assert_eq!(ids(&source.messages()), vec![3, 4]);
    }

    #[test]
    fn test_cached_source_skips_session_list() {
        let env = TestEnv::new();
        let source = MessageSource::mentions(&env.context(), TEST_ACCOUNT);
        source.set_cache_messages(true);
        env.upstream.post(Feed::Mentions, message(1, "kaban"));
        source.refresh().unwrap();
        assert!(source.messages.lock().is_empty());
        assert_eq!(ids(&source.messages()), vec![1]);
    }

    #[test]
    fn test_from_record_rejects_unknown_kind() {
        let env = TestEnv::new();
        let record = crate::store::Record::new("source-carrier-pigeon").into_ref();
        let err = MessageSource::from_record(&env.context(), record).unwrap_err();
        assert!(matches!(err, Error::UnresolvableMemberKind(_)));
    }

    #[test]
    fn test_purge_removes_cache() {
        let env = TestEnv::new();
        let ctx = env.context();
        env.upstream.post(Feed::Mentions, message(1, "a"));
        let source = MessageSource::mentions(&ctx, TEST_ACCOUNT);
        source.set_cache_messages(true);
        source.refresh().unwrap();
        source.save(true).unwrap();
        let cache_pk = source.cache().unwrap().pk();

        source.purge().unwrap();
        assert!(MessageCache::from_store(&ctx.store, &cache_pk).is_err());
        assert!(MessageSource::load(&ctx, SourceKind::Mentions, &source.pk()).is_err());
    }

    #[test]
    fn test_input_group_skips_failing_source_and_merges() {
        let env = TestEnv::new();
        let ctx = env.context();
        env.upstream.post(Feed::HomeTimeline, message(2, "a"));
        env.upstream.post(Feed::Mentions, message(1, "b"));
        env.upstream.post(Feed::Mentions, message(3, "b"));

        let inputs = InputGroup::new(&ctx);
        inputs.add(Arc::new(MessageSource::home_timeline(&ctx, TEST_ACCOUNT)));
        inputs.add(Arc::new(MessageSource::mentions(&ctx, TEST_ACCOUNT)));

        env.upstream.fail_next(Error::Upstream("boom".into()));
        assert_eq!(ids(&inputs.refresh().unwrap()), vec![1, 3]);

        // the failed source catches up on the next refresh
        assert_eq!(ids(&inputs.refresh().unwrap()), vec![2]);
        assert_eq!(ids(&inputs.messages()), vec![1, 2, 3]);
    }

    #[test]
    fn test_input_group_round_trips_source_kinds() {
        let env = TestEnv::new();
        let ctx = env.context_with_store(env.open_store());
        let inputs = InputGroup::new(&ctx);
        inputs.add(Arc::new(MessageSource::home_timeline(&ctx, TEST_ACCOUNT)));
        inputs.add(Arc::new(MessageSource::user_posts(&ctx, TEST_ACCOUNT, "serval")));
        inputs.save_all(true).unwrap();

        let ctx = env.context_with_store(env.open_store());
        let reloaded = InputGroup::load(&ctx, &inputs.pk()).unwrap();
        let described: Vec<String> = reloaded.members().iter().map(|s| s.describe()).collect();
        assert_eq!(described, vec!["home-timeline", "user-posts:serval"]);
    }
}
