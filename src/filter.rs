//! Message filters and filter groups.
//!
//! A [`Filter`] has a kind-specific predicate and a polarity. Positive
//! filters keep matching messages; negative filters drop them. A
//! [`FilterGroup`] runs messages through every member in order, so a message
//! has to survive all of them.

use crate::context::AppContext;
use crate::entity::{Entity, Persistent, Schema};
use crate::group::{Constructor, Member, OrderedGroup};
use crate::models::Message;
use crate::store::{Identity, Query, RecordRef};
use crate::user::{LocalUserList, RemoteUserList, UserList};
use crate::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// Messages posted by one user
    User,
    /// Messages posted by members of a local or remote user list
    UserList,
    /// Messages with attached media
    Media,
}

impl FilterKind {
    pub const ALL: [FilterKind; 3] = [FilterKind::User, FilterKind::UserList, FilterKind::Media];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::User => "filter-user",
            FilterKind::UserList => "filter-user-list",
            FilterKind::Media => "filter-media",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == kind)
    }

    pub fn schema(&self) -> Schema {
        let base = Schema::new()
            .field("name", "")
            .field("description", "")
            .field("positive", true);
        match self {
            FilterKind::User => Schema::inherit(base).field("username", Value::Null),
            FilterKind::UserList => Schema::inherit(base)
                .field("local_list_name", Value::Null)
                .field("remote_list_id", Value::Null)
                .field("api_username", Value::Null),
            FilterKind::Media => base,
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str().trim_start_matches("filter-"))
    }
}

const FILTER_REGISTRY: &[(&str, Constructor<Filter>)] = &[
    ("filter-user", Filter::from_record),
    ("filter-user-list", Filter::from_record),
    ("filter-media", Filter::from_record),
];

pub struct Filter {
    ctx: AppContext,
    entity: Entity,
    filter_kind: FilterKind,
    /// Resolved list for user-list filters
    user_list: Mutex<Option<UserList>>,
}

impl Filter {
    /// Match messages posted by `username` (case-insensitive).
    pub fn user(ctx: &AppContext, username: &str) -> Self {
        let filter = Self::create(ctx, FilterKind::User);
        filter.entity.set("username", username);
        filter
    }

    /// Match messages posted by members of a stored local user list.
    pub fn local_list(ctx: &AppContext, list_name: &str) -> Self {
        let filter = Self::create(ctx, FilterKind::UserList);
        filter.entity.set("local_list_name", list_name);
        filter
    }

    /// Match messages posted by members of a remote list, fetched through
    /// `account`.
    pub fn remote_list(ctx: &AppContext, account: &str, list_id: &str) -> Self {
        let filter = Self::create(ctx, FilterKind::UserList);
        filter.entity.set("remote_list_id", list_id);
        filter.entity.set("api_username", account);
        filter
    }

    /// Match messages carrying media attachments.
    pub fn media(ctx: &AppContext) -> Self {
        Self::create(ctx, FilterKind::Media)
    }

    fn create(ctx: &AppContext, kind: FilterKind) -> Self {
        let entity = Entity::create(&ctx.store, kind.as_str(), &kind.schema(), Identity::Detached);
        Self::from_entity(ctx, entity, kind)
    }

    pub fn from_record(ctx: &AppContext, record: RecordRef) -> Result<Self> {
        let kind_name = record.read().kind.clone();
        let kind = FilterKind::from_kind(&kind_name)
            .ok_or(Error::UnresolvableMemberKind(kind_name))?;
        let entity = Entity::wrap(&ctx.store, record, &kind.schema(), Identity::Detached);
        Ok(Self::from_entity(ctx, entity, kind))
    }

    pub fn load(ctx: &AppContext, kind: FilterKind, pk: &str) -> Result<Self> {
        let record = ctx.store.get(kind.as_str(), &Query::pk(pk), Identity::Detached)?;
        Self::from_record(ctx, record)
    }

    fn from_entity(ctx: &AppContext, entity: Entity, filter_kind: FilterKind) -> Self {
        Self {
            ctx: ctx.clone(),
            entity,
            filter_kind,
            user_list: Mutex::new(None),
        }
    }

    pub fn filter_kind(&self) -> FilterKind {
        self.filter_kind
    }

    pub fn name(&self) -> String {
        self.entity.get_or_default("name")
    }

    pub fn set_name(&self, name: &str) {
        self.entity.set("name", name);
    }

    pub fn description(&self) -> String {
        self.entity.get_or_default("description")
    }

    pub fn set_description(&self, description: &str) {
        self.entity.set("description", description);
    }

    /// Positive filters keep matches; negative filters drop them.
    pub fn positive(&self) -> bool {
        self.entity.get("positive").unwrap_or(true)
    }

    pub fn set_positive(&self, positive: bool) {
        self.entity.set("positive", positive);
    }

    fn text_field(&self, field: &str) -> Option<String> {
        self.entity.get_or_default::<Option<String>>(field)
    }

    /// Human-readable summary such as `!user:serval`.
    pub fn describe(&self) -> String {
        let target = match self.filter_kind {
            FilterKind::User => self.text_field("username"),
            FilterKind::UserList => self
                .text_field("local_list_name")
                .or_else(|| self.text_field("remote_list_id").map(|id| format!("remote:{}", id))),
            FilterKind::Media => None,
        };
        let polarity = if self.positive() { "" } else { "!" };
        match target {
            Some(target) => format!("{}{}:{}", polarity, self.filter_kind, target),
            None => format!("{}{}", polarity, self.filter_kind),
        }
    }

    /// Whether the predicate holds for `message`, ignoring polarity.
    ///
    /// A user list that cannot be resolved matches nothing.
    pub fn matches(&self, message: &Message) -> bool {
        match self.filter_kind {
            FilterKind::User => self
                .text_field("username")
                .is_some_and(|username| username.eq_ignore_ascii_case(&message.author.screen_name)),
            FilterKind::Media => message.has_media(),
            FilterKind::UserList => match self.user_list() {
                Ok(list) => match list.contains(&message.author.screen_name) {
                    Ok(contains) => contains,
                    Err(e) => {
                        tracing::warn!(filter = %self.describe(), "user list lookup failed: {}", e);
                        false
                    }
                },
                Err(e) => {
                    tracing::warn!(filter = %self.describe(), "user list unavailable: {}", e);
                    false
                }
            },
        }
    }

    /// Keep the messages this filter lets through, preserving order.
    pub fn filter_messages(&self, messages: Vec<Message>) -> Vec<Message> {
        let positive = self.positive();
        messages
            .into_iter()
            .filter(|m| self.matches(m) == positive)
            .collect()
    }

    fn user_list(&self) -> Result<UserList> {
        let mut slot = self.user_list.lock();
        if let Some(ref list) = *slot {
            return Ok(list.clone());
        }

        let list = if let Some(name) = self.text_field("local_list_name") {
            UserList::Local(LocalUserList::from_store(&self.ctx.store, &name)?)
        } else if let Some(list_id) = self.text_field("remote_list_id") {
            let account = self.text_field("api_username").ok_or_else(|| {
                Error::InvalidInput(format!("remote list filter {} has no account", self.entity.pk()))
            })?;
            let upstream = self.ctx.upstream(&account)?;
            UserList::Remote(Arc::new(RemoteUserList::new(upstream, &list_id)))
        } else {
            return Err(Error::InvalidInput(format!(
                "user list filter {} names no list",
                self.entity.pk()
            )));
        };
        *slot = Some(list.clone());
        Ok(list)
    }
}

impl Persistent for Filter {
    fn entity(&self) -> &Entity {
        &self.entity
    }
}

impl Member for Filter {
    fn registry() -> &'static [(&'static str, Constructor<Self>)] {
        FILTER_REGISTRY
    }
}

impl std::fmt::Debug for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filter")
            .field("pk", &self.entity.pk())
            .field("filter", &self.describe())
            .finish()
    }
}

pub const FILTER_GROUP_KIND: &str = "filter-group";

/// Ordered group of filters applied one after another.
#[derive(Debug)]
pub struct FilterGroup {
    group: OrderedGroup<Filter>,
}

impl FilterGroup {
    pub fn new(ctx: &AppContext) -> Self {
        Self {
            group: OrderedGroup::create(ctx, FILTER_GROUP_KIND),
        }
    }

    pub fn load(ctx: &AppContext, pk: &str) -> Result<Self> {
        Ok(Self {
            group: OrderedGroup::load(ctx, FILTER_GROUP_KIND, pk)?,
        })
    }

    /// Thread `messages` through every filter in member order. An empty
    /// group passes everything through.
    pub fn filter_messages(&self, messages: Vec<Message>) -> Vec<Message> {
        self.group
            .members()
            .iter()
            .fold(messages, |remaining, filter| filter.filter_messages(remaining))
    }
}

impl std::ops::Deref for FilterGroup {
    type Target = OrderedGroup<Filter>;

    fn deref(&self) -> &Self::Target {
        &self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Media, MessageId};
    use crate::test_utils::{TEST_ACCOUNT, TestEnv, message};
    use crate::user::User;

    fn ids(messages: &[Message]) -> Vec<MessageId> {
        messages.iter().map(|m| m.id).collect()
    }

    fn photo(id: MessageId, author: &str) -> Message {
        message(id, author).with_media(Media {
            url: format!("https://media.example/{}.jpg", id),
            media_type: "photo".to_string(),
        })
    }

    #[test]
    fn test_user_filter_polarity() {
        let env = TestEnv::new();
        let filter = Filter::user(&env.context(), "serval");
        let batch = vec![message(1, "serval"), message(2, "kaban")];

        assert_eq!(ids(&filter.filter_messages(batch.clone())), vec![1]);
        filter.set_positive(false);
        assert_eq!(ids(&filter.filter_messages(batch)), vec![2]);
    }

    #[test]
    fn test_user_filter_ignores_case() {
        let env = TestEnv::new();
        let filter = Filter::user(&env.context(), "Serval");
        assert!(filter.matches(&message(1, "serval")));
        assert!(!filter.matches(&message(2, "servalcat")));
    }

    #[test]
    fn test_media_filter() {
        let env = TestEnv::new();
        let filter = Filter::media(&env.context());
        let batch = vec![message(1, "a"), photo(2, "a"), message(3, "b")];
        assert_eq!(ids(&filter.filter_messages(batch.clone())), vec![2]);

        filter.set_positive(false);
        assert_eq!(ids(&filter.filter_messages(batch)), vec![1, 3]);
    }

    #[test]
    fn test_local_list_filter_sees_list_edits() {
        let env = TestEnv::new();
        let ctx = env.context();
        let serval = User::new(&ctx.store, "serval", "Serval").unwrap();
        let list = LocalUserList::new(&ctx.store, "friends", "", &[serval]).unwrap();

        let filter = Filter::local_list(&ctx, "friends");
        let batch = vec![message(1, "serval"), message(2, "kaban")];
        assert_eq!(ids(&filter.filter_messages(batch.clone())), vec![1]);

        list.add(&User::new(&ctx.store, "kaban", "Kaban").unwrap()).unwrap();
        assert_eq!(ids(&filter.filter_messages(batch)), vec![1, 2]);
    }

    #[test]
    fn test_remote_list_filter() {
        let env = TestEnv::new();
        env.upstream.set_list_members("42", &["kaban"]);
        let filter = Filter::remote_list(&env.context(), TEST_ACCOUNT, "42");
        let batch = vec![message(1, "serval"), message(2, "KABAN")];
        assert_eq!(ids(&filter.filter_messages(batch)), vec![2]);
    }

    #[test]
    fn test_missing_list_matches_nothing() {
        let env = TestEnv::new();
        let filter = Filter::local_list(&env.context(), "nobody");
        assert!(filter.filter_messages(vec![message(1, "a")]).is_empty());
    }

    #[test]
    fn test_describe() {
        let env = TestEnv::new();
        let ctx = env.context();
        let filter = Filter::user(&ctx, "serval");
        filter.set_positive(false);
        assert_eq!(filter.describe(), "!user:serval");
        assert_eq!(Filter::remote_list(&ctx, TEST_ACCOUNT, "7").describe(), "user-list:remote:7");
        assert_eq!(Filter::media(&ctx).describe(), "media");
    }

    #[test]
    fn test_empty_group_is_identity() {
        let env = TestEnv::new();
        let group = FilterGroup::new(&env.context());
        let batch = vec![message(2, "a"), message(1, "b")];
        assert_eq!(group.filter_messages(batch.clone()), batch);
    }

    #[test]
    fn test_group_composes_with_and() {
        let env = TestEnv::new();
        let ctx = env.context();
        let group = FilterGroup::new(&ctx);
        group.add(Arc::new(Filter::media(&ctx)));
        let not_kaban = Filter::user(&ctx, "kaban");
        not_kaban.set_positive(false);
        group.add(Arc::new(not_kaban));

        let batch = vec![photo(1, "serval"), photo(2, "kaban"), message(3, "serval")];
        assert_eq!(ids(&group.filter_messages(batch)), vec![1]);
    }

    #[test]
    fn test_group_reload_keeps_filter_settings() {
        let env = TestEnv::new();
        let ctx = env.context_with_store(env.open_store());
        let group = FilterGroup::new(&ctx);
        let filter = Filter::user(&ctx, "serval");
        filter.set_name("only serval");
        group.add(Arc::new(filter));
        group.add(Arc::new(Filter::media(&ctx)));
        group.save_all(true).unwrap();

        let ctx = env.context_with_store(env.open_store());
        let reloaded = FilterGroup::load(&ctx, &group.pk()).unwrap();
        let first = reloaded.get(0).unwrap();
        assert_eq!(first.filter_kind(), FilterKind::User);
        assert_eq!(first.name(), "only serval");
        assert!(first.positive());
        assert_eq!(reloaded.get(1).unwrap().filter_kind(), FilterKind::Media);
    }
}
