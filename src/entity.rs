//! Typed wrappers over records.
//!
//! An [`Entity`] pairs one [`RecordRef`] with the store it lives in. Each
//! concrete entity type declares a default [`Schema`]; wrapping a record runs
//! the schema backfill first, so records written by an older version of the
//! schema gain any field they are missing before wrapper code reads them.
//!
//! Schemas compose: a child schema starts from its parent with
//! [`Schema::inherit`] and adds or overrides fields, so the defaults of every
//! ancestor are applied.

use crate::store::{Identity, Record, RecordRef, Store};
use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Ordered list of field defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(&'static str, Value)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a parent schema.
    pub fn inherit(parent: Schema) -> Self {
        parent
    }

    /// Declare a field default, overriding an inherited default of the same name.
    pub fn field(mut self, name: &'static str, default: impl Into<Value>) -> Self {
        let default = default.into();
        match self.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(existing) => existing.1 = default,
            None => self.fields.push((name, default)),
        }
        self
    }

    /// Write every missing field from its default.
    ///
    /// Returns the names of the fields that were filled in.
    pub fn backfill(&self, record: &mut Record) -> Vec<&'static str> {
        let mut filled = Vec::new();
        for (name, default) in &self.fields {
            if !record.contains(name) {
                record.set(name, default.clone());
                filled.push(*name);
            }
        }
        filled
    }

    /// A fresh record of the given kind holding every default.
    pub fn instantiate(&self, kind: &str) -> Record {
        let mut record = Record::new(kind);
        self.backfill(&mut record);
        record
    }

    pub fn default_of(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|(name, _)| *name)
    }
}

/// A typed handle over one record.
#[derive(Debug, Clone)]
pub struct Entity {
    store: Store,
    record: RecordRef,
    identity: Identity,
}

impl Entity {
    /// Create a fresh record holding the schema defaults.
    ///
    /// The record is not written until [`Entity::save`].
    pub fn create(store: &Store, kind: &str, schema: &Schema, identity: Identity) -> Self {
        Self {
            store: store.clone(),
            record: schema.instantiate(kind).into_ref(),
            identity,
        }
    }

    /// Wrap an existing record, backfilling missing fields from the schema.
    pub fn wrap(store: &Store, record: RecordRef, schema: &Schema, identity: Identity) -> Self {
        {
            let mut guard = record.write();
            let filled = schema.backfill(&mut guard);
            if !filled.is_empty() {
                tracing::debug!(
                    kind = %guard.kind,
                    pk = %guard.pk,
                    fields = ?filled,
                    "backfilled fields missing from stored record"
                );
            }
        }
        Self {
            store: store.clone(),
            record,
            identity,
        }
    }

    pub fn pk(&self) -> String {
        self.record.read().pk.clone()
    }

    pub fn kind(&self) -> String {
        self.record.read().kind.clone()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn record(&self) -> &RecordRef {
        &self.record
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Read a field as a typed value.
    pub fn get<T: DeserializeOwned>(&self, field: &str) -> Result<T> {
        let record = self.record.read();
        let value = record.get(field).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| {
            Error::Deserialization(format!(
                "field '{}' of {}/{}: {}",
                field, record.kind, record.pk, e
            ))
        })
    }

    /// Read a field, falling back to the type's default when it does not
    /// deserialize.
    pub fn get_or_default<T: DeserializeOwned + Default>(&self, field: &str) -> T {
        match self.get(field) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("{}", e);
                T::default()
            }
        }
    }

    /// Raw field value (Null when absent).
    pub fn value(&self, field: &str) -> Value {
        self.record.read().get(field).cloned().unwrap_or(Value::Null)
    }

    pub fn set(&self, field: &str, value: impl Into<Value>) {
        self.record.write().set(field, value);
    }

    /// Write the record to the store, optionally committing.
    pub fn save(&self, commit: bool) -> Result<()> {
        let result = self.store.save(&self.record, self.identity).and_then(|_| {
            if commit {
                self.store.commit()
            } else {
                Ok(())
            }
        });
        if let Err(ref e) = result {
            tracing::error!(kind = %self.kind(), pk = %self.pk(), "save failed: {}", e);
        }
        result
    }

    /// Remove the record from the store, optionally committing.
    pub fn delete(&self, commit: bool) -> Result<()> {
        let result = self.store.delete(&self.record).and_then(|_| {
            if commit {
                self.store.commit()
            } else {
                Ok(())
            }
        });
        if let Err(ref e) = result {
            tracing::error!(kind = %self.kind(), pk = %self.pk(), "delete failed: {}", e);
        }
        result
    }
}

/// Anything wrapping an [`Entity`].
pub trait Persistent {
    fn entity(&self) -> &Entity;

    fn pk(&self) -> String {
        self.entity().pk()
    }

    fn kind(&self) -> String {
        self.entity().kind()
    }

    fn save(&self, commit: bool) -> Result<()> {
        self.entity().save(commit)
    }

    fn delete(&self, commit: bool) -> Result<()> {
        self.entity().delete(commit)
    }
}
