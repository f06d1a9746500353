//! The stream registry.
//!
//! One [`StreamManager`] record per store lists every stream in display
//! order. The ordered list and the name index are loaded together on first
//! access and kept in lockstep with the persisted list under one reentrant
//! lock.

use crate::context::AppContext;
use crate::entity::{Entity, Persistent, Schema};
use crate::filter::FilterGroup;
use crate::source::{InputGroup, MessageSource};
use crate::store::{Identity, Query};
use crate::stream::MessageStream;
use crate::{Error, Result};
use parking_lot::ReentrantMutex;
use serde_json::json;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

pub const MANAGER_KIND: &str = "stream-manager";

const STREAMS_FIELD: &str = "streams";

/// Streams provisioned for every account by [`StreamManager::add_initial_streams`].
pub const INITIAL_STREAMS: [&str; 3] = ["timeline", "mentions", "favourites"];

#[derive(Default)]
struct Registry {
    loaded: bool,
    list: Vec<Arc<MessageStream>>,
    by_name: HashMap<String, Arc<MessageStream>>,
}

pub struct StreamManager {
    ctx: AppContext,
    entity: Entity,
    registry: ReentrantMutex<RefCell<Registry>>,
}

impl StreamManager {
    pub fn schema() -> Schema {
        Schema::new().field(STREAMS_FIELD, json!([]))
    }

    /// Open the store's stream manager, creating (and saving) it on first use.
    pub fn open(ctx: &AppContext) -> Result<Self> {
        let entity = match ctx.store.get(MANAGER_KIND, &Query::all(), Identity::Detached) {
            Ok(record) => Entity::wrap(&ctx.store, record, &Self::schema(), Identity::Detached),
            Err(Error::NotFound(_)) => {
                tracing::info!("creating stream manager");
                let entity = Entity::create(&ctx.store, MANAGER_KIND, &Self::schema(), Identity::Detached);
                entity.save(false)?;
                entity
            }
            Err(e) => return Err(e),
        };
        Ok(Self {
            ctx: ctx.clone(),
            entity,
            registry: ReentrantMutex::new(RefCell::new(Registry::default())),
        })
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    fn with_registry<R>(&self, f: impl FnOnce(&mut Registry) -> R) -> R {
        let guard = self.registry.lock();
        self.ensure_loaded(&guard);
        let mut registry = guard.borrow_mut();
        f(&mut registry)
    }

    fn ensure_loaded(&self, cell: &RefCell<Registry>) {
        if cell.borrow().loaded {
            return;
        }

        let stored: Vec<String> = self.entity.get_or_default(STREAMS_FIELD);
        let mut registry = Registry {
            loaded: true,
            ..Default::default()
        };
        let mut pruned = false;
        for pk in stored {
            match MessageStream::load(&self.ctx, &pk) {
                Ok(stream) => {
                    let name = stream.name();
                    if registry.by_name.contains_key(&name) {
                        tracing::warn!(stream = %pk, name = %name, "skipping stream with duplicate name");
                        pruned = true;
                        continue;
                    }
                    let stream = Arc::new(stream);
                    registry.by_name.insert(name, stream.clone());
                    registry.list.push(stream);
                }
                Err(e) => {
                    tracing::warn!(stream = %pk, "skipping stream: {}", e);
                    pruned = true;
                }
            }
        }
        tracing::debug!(streams = registry.list.len(), "loaded stream list");

        if pruned {
            self.persist_list(&registry.list);
        }
        *cell.borrow_mut() = registry;
    }

    fn persist_list(&self, list: &[Arc<MessageStream>]) {
        let pks: Vec<String> = list.iter().map(|s| s.pk()).collect();
        self.entity.set(STREAMS_FIELD, json!(pks));
    }

    /// Streams in display order.
    pub fn stream_list(&self) -> Vec<Arc<MessageStream>> {
        self.with_registry(|registry| registry.list.clone())
    }

    /// Streams keyed by name.
    pub fn stream_dict(&self) -> HashMap<String, Arc<MessageStream>> {
        self.with_registry(|registry| registry.by_name.clone())
    }

    pub fn stream_names(&self) -> Vec<String> {
        self.with_registry(|registry| registry.list.iter().map(|s| s.name()).collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.with_registry(|registry| registry.by_name.contains_key(name))
    }

    pub fn get_stream(&self, name: &str) -> Result<Arc<MessageStream>> {
        self.with_registry(|registry| registry.by_name.get(name).cloned())
            .ok_or_else(|| Error::NotFound(format!("stream: {}", name)))
    }

    /// Create and register an empty stream.
    pub fn create_stream(&self, name: &str, description: &str) -> Result<Arc<MessageStream>> {
        let _guard = self.registry.lock();
        if self.contains(name) {
            return Err(Error::NameCollision(format!("stream: {}", name)));
        }
        let stream = MessageStream::empty(&self.ctx, name);
        stream.set_description(description);
        self.append_stream(stream)
    }

    /// Register a stream at the end of the list.
    ///
    /// The manager record is updated but not saved.
    pub fn append_stream(&self, stream: MessageStream) -> Result<Arc<MessageStream>> {
        self.with_registry(|registry| {
            let name = stream.name();
            if registry.by_name.contains_key(&name) {
                return Err(Error::NameCollision(format!("stream: {}", name)));
            }
            let stream = Arc::new(stream);
            registry.by_name.insert(name, stream.clone());
            registry.list.push(stream.clone());
            self.persist_list(&registry.list);
            Ok(stream)
        })
    }

    /// Rename a registered stream, keeping its position in the list.
    ///
    /// The stream record is updated but not saved.
    pub fn rename_stream(&self, name: &str, new_name: &str) -> Result<()> {
        if new_name.is_empty() {
            return Err(Error::InvalidInput("stream name cannot be empty".to_string()));
        }
        self.with_registry(|registry| {
            if name == new_name {
                return registry
                    .by_name
                    .contains_key(name)
                    .then_some(())
                    .ok_or_else(|| Error::NotFound(format!("stream: {}", name)));
            }
            if registry.by_name.contains_key(new_name) {
                return Err(Error::NameCollision(format!("stream: {}", new_name)));
            }
            let stream = registry
                .by_name
                .remove(name)
                .ok_or_else(|| Error::NotFound(format!("stream: {}", name)))?;
            stream.set_name(new_name);
            registry.by_name.insert(new_name.to_string(), stream);
            tracing::info!(from = %name, to = %new_name, "renamed stream");
            Ok(())
        })
    }

    fn take_stream(&self, name: &str) -> Option<Arc<MessageStream>> {
        self.with_registry(|registry| {
            let stream = registry.by_name.remove(name)?;
            registry.list.retain(|s| !Arc::ptr_eq(s, &stream));
            self.persist_list(&registry.list);
            Some(stream)
        })
    }

    /// Unregister a stream and delete its record.
    ///
    /// Its groups, sources, filters and caches stay in the store. Returns
    /// `false` if no stream has that name.
    pub fn delete_stream(&self, name: &str) -> Result<bool> {
        let _guard = self.registry.lock();
        let Ok(stream) = self.get_stream(name) else {
            return Ok(false);
        };
        stream.delete(false)?;
        self.take_stream(name);
        self.entity.save(false)?;
        tracing::info!(stream = %name, "deleted stream");
        Ok(true)
    }

    /// Unregister a stream and delete everything it owns: both groups, their
    /// sources and filters, and the sources' caches. Users and user lists are
    /// left alone.
    pub fn purge_stream(&self, name: &str) -> Result<bool> {
        let _guard = self.registry.lock();
        let Ok(stream) = self.get_stream(name) else {
            return Ok(false);
        };
        stream.purge(false)?;
        self.take_stream(name);
        self.entity.save(false)?;
        tracing::info!(stream = %name, "purged stream");
        Ok(true)
    }

    /// Move a stream to a new position in the list.
    pub fn move_stream(&self, name: &str, to: usize) -> Result<()> {
        self.with_registry(|registry| {
            let len = registry.list.len();
            if to >= len {
                return Err(Error::IndexOutOfRange { index: to, len });
            }
            let from = registry
                .list
                .iter()
                .position(|s| s.name() == name)
                .ok_or_else(|| Error::NotFound(format!("stream: {}", name)))?;
            let stream = registry.list.remove(from);
            registry.list.insert(to, stream);
            self.persist_list(&registry.list);
            Ok(())
        })
    }

    /// Provision a timeline, mentions and favourites stream for every known
    /// account, each fed by one caching source, refresh them once and commit.
    ///
    /// Names that already exist are skipped. Returns the new streams.
    pub fn add_initial_streams(&self) -> Result<Vec<Arc<MessageStream>>> {
        let _guard = self.registry.lock();
        let mut created = Vec::new();
        for account in self.ctx.accounts() {
            for suffix in INITIAL_STREAMS {
                let name = format!("{}/{}", account, suffix);
                if self.contains(&name) {
                    tracing::debug!(stream = %name, "initial stream already exists");
                    continue;
                }

                let source = match suffix {
                    "timeline" => MessageSource::home_timeline(&self.ctx, &account),
                    "mentions" => MessageSource::mentions(&self.ctx, &account),
                    _ => MessageSource::favourites(&self.ctx, &account),
                };
                source.set_cache_messages(true);
                let inputs = InputGroup::new(&self.ctx);
                inputs.add(Arc::new(source));

                let stream = MessageStream::new(&self.ctx, &name, inputs, FilterGroup::new(&self.ctx));
                stream.refresh()?;
                tracing::info!(stream = %name, messages = stream.len(), "created initial stream");
                created.push(self.append_stream(stream)?);
            }
        }
        self.save_all(true)?;
        Ok(created)
    }

    /// Save every stream (with its groups) and the manager record.
    pub fn save_all(&self, commit: bool) -> Result<()> {
        let _guard = self.registry.lock();
        for stream in self.stream_list() {
            stream.save(false)?;
        }
        self.entity.save(commit)
    }
}

impl Persistent for StreamManager {
    fn entity(&self) -> &Entity {
        &self.entity
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("pk", &self.entity.pk())
            .field("streams", &self.entity.value(STREAMS_FIELD))
            .finish()
    }
}
