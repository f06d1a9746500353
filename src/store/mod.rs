//! Record storage for Tsubame data.
//!
//! Every durable entity is backed by a [`Record`]: an untyped JSON document
//! with a primary key, grouped by record kind. The [`RecordStore`] sits on top
//! of a pluggable [`RecordBackend`] and adds the identity map used for
//! single-instance kinds.
//!
//! ## Backends
//!
//! - **SQLite backend** (default): `records.db` in the profile data directory
//! - **Memory backend**: process-local, used by tests and ephemeral contexts
//!
//! ## Identity
//!
//! Lookups made with [`Identity::Shared`] go through a per-store interning
//! table keyed by `(kind, pk)`. All shared lookups of one key return the same
//! [`RecordRef`] for the lifetime of the store, so a mutation through one
//! handle is visible through every other. Callers must always go through the
//! store; a cloned [`Record`] is a detached snapshot.

pub mod backend;
pub mod sqlite;

pub use backend::{BackendType, MemoryBackend, RecordBackend};
pub use sqlite::SqliteBackend;

use crate::{Error, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Field map of a record.
pub type Fields = serde_json::Map<String, Value>;

/// Shared, lockable handle to a record.
pub type RecordRef = Arc<RwLock<Record>>;

/// Shared handle to a record store.
pub type Store = Arc<RecordStore>;

/// Pseudo-field matching a record's primary key in a [`Query`].
pub const PK_FIELD: &str = "pk";

/// An untyped persisted document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable primary key
    pub pk: String,

    /// Record kind (one per concrete entity type)
    pub kind: String,

    /// Named fields
    #[serde(default)]
    pub fields: Fields,
}

impl Record {
    /// Create an empty record of the given kind with a fresh primary key.
    pub fn new(kind: &str) -> Self {
        Self {
            pk: uuid::Uuid::new_v4().simple().to_string(),
            kind: kind.to_string(),
            fields: Fields::new(),
        }
    }

    /// Create a record with an explicit primary key and fields.
    pub fn with_fields(kind: &str, pk: &str, fields: Fields) -> Self {
        Self {
            pk: pk.to_string(),
            kind: kind.to_string(),
            fields,
        }
    }

    /// Wrap this record in a fresh handle.
    pub fn into_ref(self) -> RecordRef {
        Arc::new(RwLock::new(self))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    /// Check whether every condition of the query holds for this record.
    pub fn matches(&self, query: &Query) -> bool {
        query.conditions.iter().all(|(field, expected)| {
            if field == PK_FIELD {
                expected.as_str() == Some(self.pk.as_str())
            } else {
                self.fields.get(field) == Some(expected)
            }
        })
    }
}

/// A conjunction of `field == value` conditions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    conditions: Vec<(String, Value)>,
}

impl Query {
    /// Query matching every record of a kind.
    pub fn all() -> Self {
        Self::default()
    }

    /// Query matching a single primary key.
    pub fn pk(pk: &str) -> Self {
        Self::all().field(PK_FIELD, pk)
    }

    /// Add an equality condition.
    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((name.to_string(), value.into()));
        self
    }

    /// The primary key this query pins, if it has a `pk` condition.
    pub fn pinned_pk(&self) -> Option<&str> {
        self.conditions
            .iter()
            .find(|(field, _)| field == PK_FIELD)
            .and_then(|(_, value)| value.as_str())
    }

    pub fn conditions(&self) -> &[(String, Value)] {
        &self.conditions
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .conditions
            .iter()
            .map(|(field, value)| format!("{}={}", field, value))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Identity mode for a store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Identity {
    /// Every lookup returns a fresh, independent handle.
    #[default]
    Detached,
    /// Lookups of one key return the same handle for the store's lifetime.
    Shared,
}

type IdentityKey = (String, String);

/// Identity-aware record store.
pub struct RecordStore {
    backend: Mutex<Box<dyn RecordBackend>>,
    identity: Mutex<HashMap<IdentityKey, RecordRef>>,
}

impl RecordStore {
    /// Open (or create) a SQLite-backed store at the given path.
    pub fn open(path: &Path) -> Result<Store> {
        let backend = SqliteBackend::open(path)?;
        Ok(Self::with_backend(Box::new(backend)))
    }

    /// Create a store over a fresh in-memory backend.
    pub fn in_memory() -> Store {
        Self::with_backend(Box::new(MemoryBackend::new()))
    }

    /// Create a store over an arbitrary backend.
    pub fn with_backend(backend: Box<dyn RecordBackend>) -> Store {
        Arc::new(Self {
            backend: Mutex::new(backend),
            identity: Mutex::new(HashMap::new()),
        })
    }

    /// Get the single record matching the query.
    ///
    /// Returns [`Error::NotFound`] when nothing matches. When several records
    /// match, the first one in backend order is returned.
    pub fn get(&self, kind: &str, query: &Query, identity: Identity) -> Result<RecordRef> {
        let record = {
            let backend = self.backend.lock();
            match query.pinned_pk() {
                Some(pk) => backend
                    .load(kind, pk)?
                    .filter(|record| record.matches(query)),
                None => backend.query(kind, query)?.into_iter().next(),
            }
        };

        match record {
            Some(record) => Ok(self.intern(record, identity)),
            None => Err(Error::NotFound(format!("{} matching {}", kind, query))),
        }
    }

    /// Get every record of a kind matching the query.
    pub fn filter(&self, kind: &str, query: &Query, identity: Identity) -> Result<Vec<RecordRef>> {
        let records = self.backend.lock().query(kind, query)?;
        Ok(records
            .into_iter()
            .map(|record| self.intern(record, identity))
            .collect())
    }

    /// Write a record to the backend.
    ///
    /// With [`Identity::Shared`] the handle is registered in the identity map
    /// so later shared lookups of its key return this very handle.
    pub fn save(&self, record: &RecordRef, identity: Identity) -> Result<()> {
        let snapshot = record.read().clone();
        self.backend.lock().put(&snapshot)?;

        if identity == Identity::Shared {
            let key = (snapshot.kind, snapshot.pk);
            let mut map = self.identity.lock();
            if let Some(existing) = map.get(&key) {
                if !Arc::ptr_eq(existing, record) {
                    tracing::warn!(
                        kind = %key.0,
                        pk = %key.1,
                        "saving a second handle for a tracked record; rebinding identity"
                    );
                }
            }
            map.insert(key, record.clone());
        }
        Ok(())
    }

    /// Remove a record from the backend and the identity map.
    pub fn delete(&self, record: &RecordRef) -> Result<()> {
        let (kind, pk) = {
            let record = record.read();
            (record.kind.clone(), record.pk.clone())
        };
        let removed = self.backend.lock().remove(&kind, &pk)?;
        self.identity.lock().remove(&(kind.clone(), pk.clone()));
        if !removed {
            tracing::debug!(kind = %kind, pk = %pk, "deleted record was never stored");
        }
        Ok(())
    }

    /// Make all pending writes durable.
    pub fn commit(&self) -> Result<()> {
        self.backend.lock().commit()
    }

    /// Check whether a key is currently tracked by the identity map.
    pub fn is_tracked(&self, kind: &str, pk: &str) -> bool {
        self.identity
            .lock()
            .contains_key(&(kind.to_string(), pk.to_string()))
    }

    /// Get the backend location description (for display purposes).
    pub fn location(&self) -> String {
        self.backend.lock().location()
    }

    pub fn backend_type(&self) -> BackendType {
        self.backend.lock().backend_type()
    }

    fn intern(&self, record: Record, identity: Identity) -> RecordRef {
        match identity {
            Identity::Detached => record.into_ref(),
            Identity::Shared => {
                let key = (record.kind.clone(), record.pk.clone());
                self.identity
                    .lock()
                    .entry(key)
                    .or_insert_with(|| record.into_ref())
                    .clone()
            }
        }
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("location", &self.location())
            .field("tracked", &self.identity.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TestEnv;
    use serde_json::json;

    const KIND: &str = "data-storage";

    fn saved_record(store: &Store) -> String {
        let mut record = Record::new(KIND);
        record.set("foo", 1);
        record.set("bar", 2);
        let pk = record.pk.clone();
        store.save(&record.into_ref(), Identity::Detached).unwrap();
        store.commit().unwrap();
        pk
    }

    #[test]
    fn test_record_matches_fields_and_pk() {
        let mut record = Record::new(KIND);
        record.set("name", "timeline");
        assert!(record.matches(&Query::all()));
        assert!(record.matches(&Query::all().field("name", "timeline")));
        assert!(!record.matches(&Query::all().field("name", "mentions")));
        assert!(record.matches(&Query::pk(&record.pk.clone())));
        assert!(!record.matches(&Query::all().field("missing", json!(null))));
    }

    #[test]
    fn test_get_not_found() {
        let store = RecordStore::in_memory();
        let err = store.get(KIND, &Query::all(), Identity::Detached).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_filter_empty() {
        let store = RecordStore::in_memory();
        let found = store.filter(KIND, &Query::all(), Identity::Shared).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_detached_lookups_do_not_share_mutations() {
        let store = RecordStore::in_memory();
        saved_record(&store);

        let query = Query::all().field("foo", 1);
        let first = store.get(KIND, &query, Identity::Detached).unwrap();
        let second = store.get(KIND, &query, Identity::Detached).unwrap();
        assert_eq!(*first.read(), *second.read());

        second.write().set("bar", 3);
        assert_eq!(first.read().get("bar"), Some(&json!(2)));
        assert_eq!(second.read().get("bar"), Some(&json!(3)));
    }

    #[test]
    fn test_shared_lookups_share_mutations() {
        let env = TestEnv::new();
        let store = env.open_store();
        let pk = saved_record(&store);

        let query = Query::all().field("foo", 1);
        let first = store.get(KIND, &query, Identity::Shared).unwrap();
        let second = store.get(KIND, &query, Identity::Shared).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        second.write().set("bar", 3);
        assert_eq!(first.read().get("bar"), Some(&json!(3)));

        // filter() goes through the same identity map
        let filtered = store.filter(KIND, &Query::all(), Identity::Shared).unwrap();
        assert!(Arc::ptr_eq(&filtered[0], &first));

        // and the change serializes correctly
        store.save(&first, Identity::Shared).unwrap();
        store.commit().unwrap();
        let separate = store.get(KIND, &Query::pk(&pk), Identity::Detached).unwrap();
        assert_eq!(separate.read().get("bar"), Some(&json!(3)));
        let shared = store.get(KIND, &Query::pk(&pk), Identity::Shared).unwrap();
        assert!(Arc::ptr_eq(&shared, &first));
    }

    #[test]
    fn test_shared_save_registers_handle() {
        let store = RecordStore::in_memory();
        let record = Record::new(KIND).into_ref();
        let pk = record.read().pk.clone();
        assert!(!store.is_tracked(KIND, &pk));

        store.save(&record, Identity::Shared).unwrap();
        assert!(store.is_tracked(KIND, &pk));
        let found = store.get(KIND, &Query::pk(&pk), Identity::Shared).unwrap();
        assert!(Arc::ptr_eq(&found, &record));
    }

    #[test]
    fn test_delete_forgets_identity() {
        let store = RecordStore::in_memory();
        let record = Record::new(KIND).into_ref();
        let pk = record.read().pk.clone();
        store.save(&record, Identity::Shared).unwrap();

        store.delete(&record).unwrap();
        assert!(!store.is_tracked(KIND, &pk));
        assert!(store.get(KIND, &Query::pk(&pk), Identity::Shared).is_err());
    }

    #[test]
    fn test_kinds_are_isolated() {
        let store = RecordStore::in_memory();
        let mut record = Record::new("kind-a");
        record.set("name", "x");
        store.save(&record.into_ref(), Identity::Detached).unwrap();

        let query = Query::all().field("name", "x");
        assert_eq!(store.filter("kind-a", &query, Identity::Detached).unwrap().len(), 1);
        assert!(store.filter("kind-b", &query, Identity::Detached).unwrap().is_empty());
    }
}
