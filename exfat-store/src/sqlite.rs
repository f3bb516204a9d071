//! A `rusqlite`-backed [`ReconciliationStore`], the SQL adapter spec.md's
//! design notes call out as an interchangeable backend over the same
//! repository interface. Synchronous by construction: no tokio runtime is
//! pulled in for it.

use crate::{EntityRecord, ReconciliationStore, Relocation};
use exfat_core::{ByteOffset, RecoveryError};
use rusqlite::{params, Connection};
use std::path::Path;

pub struct SqliteStore {
    conn: Connection,
}

fn map_sql_err(e: rusqlite::Error) -> RecoveryError {
    RecoveryError::WritebackFailed(e.to_string())
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, RecoveryError> {
        let conn = Connection::open(path).map_err(map_sql_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS entities (
                offset       INTEGER PRIMARY KEY,
                name         TEXT NOT NULL,
                parent       INTEGER,
                is_directory INTEGER NOT NULL,
                copied       INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS relocations (
                offset     INTEGER PRIMARY KEY,
                new_offset INTEGER NOT NULL
             );",
        )
        .map_err(map_sql_err)?;
        Ok(Self { conn })
    }

    pub fn in_memory() -> Result<Self, RecoveryError> {
        let conn = Connection::open_in_memory().map_err(map_sql_err)?;
        conn.execute_batch(
            "CREATE TABLE entities (
                offset       INTEGER PRIMARY KEY,
                name         TEXT NOT NULL,
                parent       INTEGER,
                is_directory INTEGER NOT NULL,
                copied       INTEGER NOT NULL
             );
             CREATE TABLE relocations (
                offset     INTEGER PRIMARY KEY,
                new_offset INTEGER NOT NULL
             );",
        )
        .map_err(map_sql_err)?;
        Ok(Self { conn })
    }

    pub fn get(&self, offset: ByteOffset) -> Result<Option<EntityRecord>, RecoveryError> {
        self.conn
            .query_row(
                "SELECT offset, name, parent, is_directory, copied FROM entities WHERE offset = ?1",
                params![offset as i64],
                |row| {
                    Ok(EntityRecord {
                        offset: row.get::<_, i64>(0)? as u64,
                        name: row.get(1)?,
                        parent: row.get::<_, Option<i64>>(2)?.map(|v| v as u64),
                        is_directory: row.get::<_, i64>(3)? != 0,
                        copied: row.get::<_, i64>(4)? != 0,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(map_sql_err(other)),
            })
    }
}

impl ReconciliationStore for SqliteStore {
    fn upsert_entity(&mut self, record: EntityRecord) -> Result<(), RecoveryError> {
        self.conn
            .execute(
                "INSERT INTO entities (offset, name, parent, is_directory, copied)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(offset) DO UPDATE SET
                    name = excluded.name,
                    parent = excluded.parent,
                    is_directory = excluded.is_directory,
                    copied = excluded.copied",
                params![
                    record.offset as i64,
                    record.name,
                    record.parent.map(|p| p as i64),
                    record.is_directory as i64,
                    record.copied as i64,
                ],
            )
            .map_err(map_sql_err)?;
        Ok(())
    }

    fn upsert_relocation(&mut self, relocation: Relocation) -> Result<(), RecoveryError> {
        self.conn
            .execute(
                "INSERT INTO relocations (offset, new_offset) VALUES (?1, ?2)
                 ON CONFLICT(offset) DO UPDATE SET new_offset = excluded.new_offset",
                params![relocation.offset as i64, relocation.new_offset as i64],
            )
            .map_err(map_sql_err)?;
        Ok(())
    }

    fn iter_orphan_dirs(&self) -> Result<Vec<ByteOffset>, RecoveryError> {
        let mut stmt = self
            .conn
            .prepare("SELECT offset FROM entities WHERE is_directory = 1 AND parent IS NULL")
            .map_err(map_sql_err)?;
        let rows = stmt
            .query_map([], |row| row.get::<_, i64>(0))
            .map_err(map_sql_err)?;
        let mut offsets = Vec::new();
        for row in rows {
            offsets.push(row.map_err(map_sql_err)? as u64);
        }
        Ok(offsets)
    }

    fn mark_copied(&mut self, offset: ByteOffset) -> Result<(), RecoveryError> {
        let changed = self
            .conn
            .execute(
                "UPDATE entities SET copied = 1 WHERE offset = ?1",
                params![offset as i64],
            )
            .map_err(map_sql_err)?;
        if changed == 0 {
            return Err(RecoveryError::LogParse(format!(
                "no entity record at {offset:#018x}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: ByteOffset, is_directory: bool, parent: Option<ByteOffset>) -> EntityRecord {
        EntityRecord {
            offset,
            name: format!("e{offset}"),
            parent,
            is_directory,
            copied: false,
        }
    }

    #[test]
    fn upsert_and_get_round_trips() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.upsert_entity(record(42, false, Some(1))).unwrap();
        let got = store.get(42).unwrap().unwrap();
        assert_eq!(got.name, "e42");
        assert_eq!(got.parent, Some(1));
    }

    #[test]
    fn iter_orphan_dirs_returns_parentless_directories() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.upsert_entity(record(10, true, None)).unwrap();
        store.upsert_entity(record(20, true, Some(5))).unwrap();
        let orphans = store.iter_orphan_dirs().unwrap();
        assert_eq!(orphans, vec![10]);
    }

    #[test]
    fn mark_copied_unknown_offset_errors() {
        let mut store = SqliteStore::in_memory().unwrap();
        assert!(store.mark_copied(999).is_err());
    }
}
