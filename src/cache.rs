//! Bounded, persisted message caches.
//!
//! A [`MessageCache`] stores raw message payloads in its record and
//! materializes typed [`Message`]s from them on first access. When a payload
//! no longer deserializes, the cache empties itself and logs instead of
//! handing out a partial list.

use crate::context::AppContext;
use crate::entity::{Entity, Persistent, Schema};
use crate::models::{Message, MessageId};
use crate::store::{Identity, Query, RecordRef, Store};
use crate::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashSet;

pub const CACHE_KIND: &str = "message-cache";

const MESSAGES_FIELD: &str = "messages";
const MAXIMUM_FIELD: &str = "maximum_number_of_messages";
const LAST_UPDATED_FIELD: &str = "last_updated";

/// Default bound used when a record does not carry one.
pub const DEFAULT_MAXIMUM: usize = 1000;

pub struct MessageCache {
    entity: Entity,
    /// Materialized messages, `None` until first access
    messages: Mutex<Option<Vec<Message>>>,
}

impl MessageCache {
    pub fn schema() -> Schema {
        Schema::new()
            .field(MESSAGES_FIELD, json!([]))
            .field(MAXIMUM_FIELD, DEFAULT_MAXIMUM)
            .field(LAST_UPDATED_FIELD, Value::Null)
    }

    /// Create an empty cache bounded by the context's configured cache size.
    pub fn new(ctx: &AppContext) -> Self {
        let entity = Entity::create(&ctx.store, CACHE_KIND, &Self::schema(), Identity::Detached);
        entity.set(MAXIMUM_FIELD, ctx.settings.cache_size);
        Self {
            entity,
            messages: Mutex::new(Some(Vec::new())),
        }
    }

    pub fn wrap(store: &Store, record: RecordRef) -> Self {
        Self {
            entity: Entity::wrap(store, record, &Self::schema(), Identity::Detached),
            messages: Mutex::new(None),
        }
    }

    pub fn from_store(store: &Store, pk: &str) -> Result<Self> {
        let record = store.get(CACHE_KIND, &Query::pk(pk), Identity::Detached)?;
        Ok(Self::wrap(store, record))
    }

    pub fn maximum(&self) -> usize {
        self.entity
            .get::<usize>(MAXIMUM_FIELD)
            .unwrap_or(DEFAULT_MAXIMUM)
    }

    /// Change the bound, evicting the oldest messages if the cache is now over it.
    pub fn set_maximum(&self, maximum: usize) {
        self.entity.set(MAXIMUM_FIELD, maximum);
        let mut guard = self.messages.lock();
        let messages = self.materialize(&mut guard);
        let mut raw = self.raw_messages();
        Self::evict(&mut raw, messages, maximum);
        self.entity.set(MESSAGES_FIELD, Value::Array(raw));
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.entity.get(LAST_UPDATED_FIELD).ok().flatten()
    }

    /// Cached messages, oldest first.
    pub fn messages(&self) -> Vec<Message> {
        let mut guard = self.messages.lock();
        self.materialize(&mut guard).clone()
    }

    pub fn len(&self) -> usize {
        let mut guard = self.messages.lock();
        self.materialize(&mut guard).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the newest cached message.
    pub fn newest_id(&self) -> Option<MessageId> {
        let mut guard = self.messages.lock();
        self.materialize(&mut guard).iter().map(|m| m.id).max()
    }

    /// Append messages, skipping ids already cached, then evict the oldest
    /// entries beyond the bound.
    ///
    /// The record is updated but not saved.
    pub fn add_messages(&self, new_messages: &[Message]) -> Result<()> {
        let mut guard = self.messages.lock();
        let messages = self.materialize(&mut guard);
        let mut raw = self.raw_messages();

        let mut known: HashSet<MessageId> = messages.iter().map(|m| m.id).collect();
        for message in new_messages {
            if !known.insert(message.id) {
                continue;
            }
            raw.push(message.to_payload()?);
            messages.push(message.clone());
        }

        let evicted = Self::evict(&mut raw, messages, self.maximum());
        if evicted > 0 {
            tracing::debug!(cache = %self.entity.pk(), evicted, "evicted oldest cached messages");
        }
        self.entity.set(MESSAGES_FIELD, Value::Array(raw));
        self.entity.set(LAST_UPDATED_FIELD, json!(Utc::now()));
        Ok(())
    }

    /// Empty both the stored payloads and the materialized list.
    pub fn clear(&self) {
        let mut guard = self.messages.lock();
        self.entity.set(MESSAGES_FIELD, json!([]));
        self.entity.set(LAST_UPDATED_FIELD, Value::Null);
        *guard = Some(Vec::new());
    }

    fn raw_messages(&self) -> Vec<Value> {
        match self.entity.value(MESSAGES_FIELD) {
            Value::Array(raw) => raw,
            _ => Vec::new(),
        }
    }

    /// Drop the oldest entries of both lists so neither exceeds `maximum`.
    fn evict(raw: &mut Vec<Value>, messages: &mut Vec<Message>, maximum: usize) -> usize {
        let excess = raw.len().saturating_sub(maximum);
        raw.drain(..excess);
        let excess_messages = messages.len().saturating_sub(maximum);
        messages.drain(..excess_messages);
        excess
    }

    fn materialize<'a>(&self, slot: &'a mut Option<Vec<Message>>) -> &'a mut Vec<Message> {
        slot.get_or_insert_with(|| {
            let raw = self.raw_messages();
            match raw.iter().map(Message::from_payload).collect::<Result<Vec<_>>>() {
                Ok(messages) => messages,
                Err(e) => {
                    tracing::error!(
                        cache = %self.entity.pk(),
                        entries = raw.len(),
                        "cache loading failed, clearing cache: {}",
                        e
                    );
                    self.entity.set(MESSAGES_FIELD, json!([]));
                    Vec::new()
                }
            }
        })
    }
}

impl Persistent for MessageCache {
    fn entity(&self) -> &Entity {
        &self.entity
    }
}

impl std::fmt::Debug for MessageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageCache")
            .field("pk", &self.entity.pk())
            .field("maximum", &self.maximum())
            .field("loaded", &self.messages.lock().is_some())
            .finish()
    }
}
