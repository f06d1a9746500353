//! SQLite record backend.
//!
//! All records live in one `records` table keyed by `(kind, pk)`, with the
//! field map stored as a JSON body. Writes open a transaction lazily and
//! stay pending until [`RecordBackend::commit`]; closing the connection with
//! a pending transaction discards it.

use super::backend::{BackendType, RecordBackend};
use super::{Fields, Query, Record};
use crate::{Error, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

/// Backend storing records in a SQLite database file.
pub struct SqliteBackend {
    path: PathBuf,
    conn: Connection,
    in_transaction: bool,
}

impl SqliteBackend {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            path: path.to_path_buf(),
            conn,
            in_transaction: false,
        })
    }

    /// Initialize the SQLite schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                pk TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (kind, pk)
            );

            CREATE INDEX IF NOT EXISTS idx_records_kind ON records(kind);
            "#,
        )?;

        Self::run_migrations(conn)?;

        Ok(())
    }

    /// Run database migrations for schema changes.
    /// This handles adding new columns to existing databases.
    fn run_migrations(conn: &Connection) -> Result<()> {
        // Migration: add updated_at column to records table if it doesn't exist
        let has_updated_at: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('records') WHERE name = 'updated_at'",
            [],
            |row| row.get(0),
        )?;

        if !has_updated_at {
            conn.execute("ALTER TABLE records ADD COLUMN updated_at TEXT", [])?;
        }

        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }

    fn decode(kind: &str, pk: String, body: &str) -> Result<Record> {
        let fields: Fields = serde_json::from_str(body).map_err(|e| {
            Error::Deserialization(format!("record {}/{} has a corrupt body: {}", kind, pk, e))
        })?;
        Ok(Record::with_fields(kind, &pk, fields))
    }

    /// Number of stored records of a kind.
    pub fn count(&self, kind: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM records WHERE kind = ?1",
            [kind],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl RecordBackend for SqliteBackend {
    fn load(&self, kind: &str, pk: &str) -> Result<Option<Record>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM records WHERE kind = ?1 AND pk = ?2",
                params![kind, pk],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|body| Self::decode(kind, pk.to_string(), &body))
            .transpose()
    }

    fn query(&self, kind: &str, query: &Query) -> Result<Vec<Record>> {
        let mut stmt = self
            .conn
            .prepare("SELECT pk, body FROM records WHERE kind = ?1 ORDER BY rowid ASC")?;
        let rows: Vec<(String, String)> = stmt
            .query_map([kind], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;

        let mut records = Vec::new();
        for (pk, body) in rows {
            let record = Self::decode(kind, pk, &body)?;
            if record.matches(query) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn put(&mut self, record: &Record) -> Result<()> {
        self.begin()?;
        let body = serde_json::to_string(&record.fields)?;
        // Upsert keeps the rowid, so query order stays insertion order
        self.conn.execute(
            r#"
            INSERT INTO records (kind, pk, body, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(kind, pk) DO UPDATE SET
                body = excluded.body,
                updated_at = excluded.updated_at
            "#,
            params![record.kind, record.pk, body, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&mut self, kind: &str, pk: &str) -> Result<bool> {
        self.begin()?;
        let removed = self.conn.execute(
            "DELETE FROM records WHERE kind = ?1 AND pk = ?2",
            params![kind, pk],
        )?;
        Ok(removed > 0)
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Sqlite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_backend() -> (TempDir, SqliteBackend) {
        let temp_dir = TempDir::new().unwrap();
        let backend = SqliteBackend::open(&temp_dir.path().join("records.db")).unwrap();
        (temp_dir, backend)
    }

    #[test]
    fn test_open_creates_file() {
        let (temp_dir, backend) = create_test_backend();
        assert!(temp_dir.path().join("records.db").exists());
        assert_eq!(backend.backend_type(), BackendType::Sqlite);
        assert!(backend.location().ends_with("records.db"));
    }

    #[test]
    fn test_put_and_load() {
        let (_temp_dir, mut backend) = create_test_backend();
        let mut record = Record::new("filter-user");
        record.set("username", "such_user");
        backend.put(&record).unwrap();

        let loaded = backend.load("filter-user", &record.pk).unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(backend.load("filter-media", &record.pk).unwrap().is_none());
    }

    #[test]
    fn test_query_preserves_insertion_order_across_updates() {
        let (_temp_dir, mut backend) = create_test_backend();
        let mut first = Record::new("k");
        first.set("n", 1);
        let mut second = Record::new("k");
        second.set("n", 2);
        backend.put(&first).unwrap();
        backend.put(&second).unwrap();

        first.set("n", 3);
        backend.put(&first).unwrap();

        let all = backend.query("k", &Query::all()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].pk, first.pk);
        assert_eq!(all[0].get("n"), Some(&json!(3)));

        let only = backend.query("k", &Query::all().field("n", 2)).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].pk, second.pk);
    }

    #[test]
    fn test_uncommitted_writes_are_discarded_on_close() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("records.db");

        let committed = Record::new("k");
        {
            let mut backend = SqliteBackend::open(&path).unwrap();
            backend.put(&committed).unwrap();
            backend.commit().unwrap();
            backend.put(&Record::new("k")).unwrap();
            // visible inside the open transaction
            assert_eq!(backend.count("k").unwrap(), 2);
        }

        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.count("k").unwrap(), 1);
        assert!(backend.load("k", &committed.pk).unwrap().is_some());
    }

    #[test]
    fn test_remove() {
        let (_temp_dir, mut backend) = create_test_backend();
        let record = Record::new("k");
        backend.put(&record).unwrap();
        assert!(backend.remove("k", &record.pk).unwrap());
        assert!(!backend.remove("k", &record.pk).unwrap());
        backend.commit().unwrap();
        assert_eq!(backend.count("k").unwrap(), 0);
    }

    #[test]
    fn test_migration_adds_updated_at_column() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("records.db");

        // Simulate an "old" database created before updated_at existed
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE records (kind TEXT NOT NULL, pk TEXT NOT NULL, body TEXT NOT NULL, PRIMARY KEY (kind, pk));
                 INSERT INTO records (kind, pk, body) VALUES ('k', 'old', '{\"a\":1}');",
            )
            .unwrap();
        }

        let mut backend = SqliteBackend::open(&path).unwrap();
        let old = backend.load("k", "old").unwrap().unwrap();
        assert_eq!(old.get("a"), Some(&json!(1)));

        backend.put(&Record::new("k")).unwrap();
        backend.commit().unwrap();
        assert_eq!(backend.count("k").unwrap(), 2);
        drop(backend);

        // already migrated: reopening must not try to add the column again
        let backend = SqliteBackend::open(&path).unwrap();
        assert_eq!(backend.count("k").unwrap(), 2);
    }

    #[test]
    fn test_migration_probe_error_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("not-a-db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();

        let conn = Connection::open(&path).unwrap();
        assert!(matches!(
            SqliteBackend::run_migrations(&conn),
            Err(crate::Error::Database(_))
        ));
    }
}
