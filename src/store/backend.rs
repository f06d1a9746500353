//! Record backend trait and the in-memory implementation.
//!
//! This module provides the storage backends the record store can sit on:
//! - `SqliteBackend` - SQLite database in the profile directory (default)
//! - `MemoryBackend` - Process-local map, nothing survives the process

use super::{Query, Record};
use crate::Result;
use std::collections::BTreeMap;

/// Trait for backends that handle raw record persistence.
///
/// Backends only deal in detached [`Record`] values; identity tracking is
/// the record store's job.
pub trait RecordBackend: Send {
    /// Load a record by kind and primary key.
    fn load(&self, kind: &str, pk: &str) -> Result<Option<Record>>;

    /// Return every record of a kind matching the query, in insertion order.
    fn query(&self, kind: &str, query: &Query) -> Result<Vec<Record>>;

    /// Insert or replace a record.
    fn put(&mut self, record: &Record) -> Result<()>;

    /// Remove a record, returning whether it existed.
    fn remove(&mut self, kind: &str, pk: &str) -> Result<bool>;

    /// Make pending writes durable.
    fn commit(&mut self) -> Result<()>;

    /// Get the storage location description (for display purposes).
    fn location(&self) -> String;

    /// Get the backend type.
    fn backend_type(&self) -> BackendType;
}

/// Available backend types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// SQLite database file (default)
    Sqlite,
    /// Process-local memory
    Memory,
}

impl BackendType {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Backend keeping records in a process-local map.
///
/// Writes are visible immediately; `commit` has nothing to flush.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    kinds: BTreeMap<String, Vec<Record>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordBackend for MemoryBackend {
    fn load(&self, kind: &str, pk: &str) -> Result<Option<Record>> {
        Ok(self
            .kinds
            .get(kind)
            .and_then(|records| records.iter().find(|r| r.pk == pk))
            .cloned())
    }

    fn query(&self, kind: &str, query: &Query) -> Result<Vec<Record>> {
        Ok(self
            .kinds
            .get(kind)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.matches(query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn put(&mut self, record: &Record) -> Result<()> {
        let records = self.kinds.entry(record.kind.clone()).or_default();
        match records.iter_mut().find(|r| r.pk == record.pk) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    fn remove(&mut self, kind: &str, pk: &str) -> Result<bool> {
        let Some(records) = self.kinds.get_mut(kind) else {
            return Ok(false);
        };
        let before = records.len();
        records.retain(|r| r.pk != pk);
        Ok(records.len() != before)
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_type_display() {
        assert_eq!(BackendType::Memory.to_string(), "memory");
        assert_eq!(BackendType::Sqlite.to_string(), "sqlite");
        assert_eq!(MemoryBackend::new().backend_type(), BackendType::Memory);
    }

    #[test]
    fn test_memory_put_replaces_in_place() {
        let mut backend = MemoryBackend::new();
        let mut first = Record::new("k");
        let second = Record::new("k");
        backend.put(&first).unwrap();
        backend.put(&second).unwrap();

        first.set("x", 1);
        backend.put(&first).unwrap();

        let all = backend.query("k", &Query::all()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].pk, first.pk);
        assert_eq!(all[0].get("x"), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_memory_remove() {
        let mut backend = MemoryBackend::new();
        let record = Record::new("k");
        backend.put(&record).unwrap();
        assert!(backend.remove("k", &record.pk).unwrap());
        assert!(!backend.remove("k", &record.pk).unwrap());
        assert!(!backend.remove("other", &record.pk).unwrap());
        assert!(backend.load("k", &record.pk).unwrap().is_none());
    }
}
