//! Message streams.
//!
//! A [`MessageStream`] pairs one [`InputGroup`] with one [`FilterGroup`] and
//! accumulates the filtered messages of every refresh in memory. Only the
//! name, description and group references are persisted; the accumulated
//! list is rebuilt from the sources' current contents when a stream is
//! constructed.

use crate::context::AppContext;
use crate::entity::{Entity, Persistent, Schema};
use crate::filter::FilterGroup;
use crate::models::{Message, MessageId};
use crate::signal::Signal;
use crate::source::InputGroup;
use crate::store::{Identity, Query, RecordRef};
use crate::upstream::CancelToken;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;

pub const STREAM_KIND: &str = "message-stream";

#[derive(Debug, Default)]
struct StreamState {
    messages: Vec<Message>,
    seen: HashSet<MessageId>,
    active: Option<MessageId>,
}

impl StreamState {
    /// Append messages not seen before, returning the ones kept.
    fn extend(&mut self, messages: Vec<Message>) -> Vec<Message> {
        let fresh: Vec<Message> = messages
            .into_iter()
            .filter(|m| self.seen.insert(m.id))
            .collect();
        self.messages.extend(fresh.iter().cloned());
        fresh
    }
}

pub struct MessageStream {
    entity: Entity,
    inputs: InputGroup,
    filters: FilterGroup,
    state: Mutex<StreamState>,
    refresh_done: Signal,
}

impl MessageStream {
    pub fn schema() -> Schema {
        Schema::new()
            .field("name", "")
            .field("description", "")
            .field("inputs_pk", Value::Null)
            .field("filters_pk", Value::Null)
    }

    /// Create a stream (not yet saved) over existing groups.
    pub fn new(ctx: &AppContext, name: &str, inputs: InputGroup, filters: FilterGroup) -> Self {
        let entity = Entity::create(&ctx.store, STREAM_KIND, &Self::schema(), Identity::Detached);
        entity.set("name", name);
        entity.set("inputs_pk", inputs.pk());
        entity.set("filters_pk", filters.pk());
        Self::assemble(entity, inputs, filters)
    }

    /// Create a stream with empty input and filter groups.
    pub fn empty(ctx: &AppContext, name: &str) -> Self {
        Self::new(ctx, name, InputGroup::new(ctx), FilterGroup::new(ctx))
    }

    /// Wrap a stored stream record and load its groups.
    ///
    /// A group reference that no longer resolves is replaced by a new empty
    /// group.
    pub fn from_record(ctx: &AppContext, record: RecordRef) -> Result<Self> {
        let entity = Entity::wrap(&ctx.store, record, &Self::schema(), Identity::Detached);

        let inputs = match entity.get_or_default::<Option<String>>("inputs_pk") {
            Some(pk) => match InputGroup::load(ctx, &pk) {
                Ok(group) => Some(group),
                Err(Error::NotFound(_)) => {
                    tracing::warn!(stream = %entity.pk(), group = %pk, "input group missing, starting empty");
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        let inputs = inputs.unwrap_or_else(|| {
            let group = InputGroup::new(ctx);
            entity.set("inputs_pk", group.pk());
            group
        });

        let filters = match entity.get_or_default::<Option<String>>("filters_pk") {
            Some(pk) => match FilterGroup::load(ctx, &pk) {
                Ok(group) => Some(group),
                Err(Error::NotFound(_)) => {
                    tracing::warn!(stream = %entity.pk(), group = %pk, "filter group missing, starting empty");
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        let filters = filters.unwrap_or_else(|| {
            let group = FilterGroup::new(ctx);
            entity.set("filters_pk", group.pk());
            group
        });

        Ok(Self::assemble(entity, inputs, filters))
    }

    pub fn load(ctx: &AppContext, pk: &str) -> Result<Self> {
        let record = ctx.store.get(STREAM_KIND, &Query::pk(pk), Identity::Detached)?;
        Self::from_record(ctx, record)
    }

    fn assemble(entity: Entity, inputs: InputGroup, filters: FilterGroup) -> Self {
        let stream = Self {
            entity,
            inputs,
            filters,
            state: Mutex::new(StreamState::default()),
            refresh_done: Signal::new(),
        };
        let initial = stream.filters.filter_messages(stream.inputs.messages());
        stream.state.lock().extend(initial);
        stream
    }

    pub fn name(&self) -> String {
        self.entity.get_or_default("name")
    }

    /// Streams are indexed by name; registered streams are renamed through
    /// [`StreamManager::rename_stream`](crate::manager::StreamManager::rename_stream).
    pub(crate) fn set_name(&self, name: &str) {
        self.entity.set("name", name);
    }

    pub fn description(&self) -> String {
        self.entity.get_or_default("description")
    }

    pub fn set_description(&self, description: &str) {
        self.entity.set("description", description);
    }

    pub fn inputs(&self) -> &InputGroup {
        &self.inputs
    }

    pub fn filters(&self) -> &FilterGroup {
        &self.filters
    }

    /// Accumulated messages.
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notified after every completed refresh.
    pub fn refresh_done(&self) -> &Signal {
        &self.refresh_done
    }

    pub fn active_message(&self) -> Option<MessageId> {
        self.state.lock().active
    }

    /// Mark one accumulated message as active, or clear the marker.
    pub fn set_active_message(&self, id: Option<MessageId>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(id) = id {
            if !state.seen.contains(&id) {
                return Err(Error::NotFound(format!("message {} in stream {}", id, self.name())));
            }
        }
        state.active = id;
        Ok(())
    }

    /// Refresh every source, filter the new messages and accumulate them.
    pub fn refresh(&self) -> Result<Vec<Message>> {
        self.refresh_with(&CancelToken::new())
    }

    /// Like [`MessageStream::refresh`], threading `token` to every source.
    pub fn refresh_with(&self, token: &CancelToken) -> Result<Vec<Message>> {
        let fetched = self.inputs.refresh_with(token)?;
        let fetched_count = fetched.len();
        let filtered = self.filters.filter_messages(fetched);
        let fresh = self.state.lock().extend(filtered);
        tracing::debug!(
            stream = %self.name(),
            fetched = fetched_count,
            kept = fresh.len(),
            "stream refreshed"
        );
        self.refresh_done.emit();
        Ok(fresh)
    }

    /// Delete the stream record together with its groups, their members and
    /// the members' caches.
    pub fn purge(&self, commit: bool) -> Result<()> {
        self.inputs.purge(false)?;
        self.filters.purge(false)?;
        self.entity.delete(commit)
    }
}

impl Persistent for MessageStream {
    fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Save the stream, both groups and every group member.
    fn save(&self, commit: bool) -> Result<()> {
        self.inputs.save_all(false)?;
        self.filters.save_all(false)?;
        self.entity.save(commit)
    }
}

impl std::fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageStream")
            .field("pk", &self.entity.pk())
            .field("name", &self.name())
            .field("messages", &self.len())
            .finish()
    }
}
