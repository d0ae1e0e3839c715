//! Request history records, stored in redb.
//!
//! # Table design
//!
//! A single `HISTORY` table uses a 12-byte composite key:
//! ```text
//! [ request_id: u64 big-endian (8 bytes) | step: u32 big-endian (4 bytes) ]
//! ```
//!
//! Big-endian encoding makes byte order equal numeric order, so a range scan
//! over one request id returns its records in step order.

use std::path::Path;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};
use crate::types::HistoryStatus;

/// Longest message kept on a record; longer ones are truncated.
pub const MAX_MESSAGE_LENGTH: usize = 4000;

/// Login recorded for steps performed by the orchestrator.
pub const SYSTEM_USER: &str = "system";

// ---------------------------------------------------------------------------
// HistoryRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub request_id: u64,
    /// 1-based position of the record within the request history.
    pub step: u32,
    /// Task position in the process; 0 for import, task count + 1 for export.
    pub process_step: u32,
    pub task_label: String,
    pub status: HistoryStatus,
    #[serde(default)]
    pub message: String,
    pub start_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    pub user: String,
}

impl HistoryRecord {
    pub fn new(
        request_id: u64,
        step: u32,
        process_step: u32,
        task_label: impl Into<String>,
        status: HistoryStatus,
        user: impl Into<String>,
    ) -> Self {
        Self {
            request_id,
            step,
            process_step,
            task_label: task_label.into(),
            status,
            message: String::new(),
            start_date: Utc::now(),
            end_date: None,
            user: user.into(),
        }
    }

    pub fn set_message(&mut self, message: &str) {
        self.message = truncate(message, MAX_MESSAGE_LENGTH);
    }

    pub fn set_to_error(&mut self, message: &str) -> Result<()> {
        if message.trim().is_empty() {
            return Err(ExtractError::InvalidParameter(
                "an error record needs a message".into(),
            ));
        }
        self.status = HistoryStatus::Error;
        self.set_message(message);
        self.end_date = Some(Utc::now());
        Ok(())
    }

    pub fn finish(&mut self, user: &str) {
        self.status = HistoryStatus::Finished;
        self.user = user.to_string();
        self.end_date = Some(Utc::now());
    }

    pub fn skip(&mut self, user: &str) {
        self.status = HistoryStatus::Skipped;
        self.user = user.to_string();
        self.end_date = Some(Utc::now());
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Table definition and keys
// ---------------------------------------------------------------------------

/// Key: 12-byte composite (request_id ++ step, both big-endian)
/// Value: JSON-encoded HistoryRecord
const HISTORY: TableDefinition<&[u8], &[u8]> = TableDefinition::new("history");

fn record_key(request_id: u64, step: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&request_id.to_be_bytes());
    key[8..].copy_from_slice(&step.to_be_bytes());
    key
}

fn db_err(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::HistoryDb(e.to_string())
}

// ---------------------------------------------------------------------------
// HistoryDb
// ---------------------------------------------------------------------------

/// Persistent store for request history records.
pub struct HistoryDb {
    db: Database,
}

impl HistoryDb {
    /// Open or create the redb database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(HISTORY).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    fn put(&self, record: &HistoryRecord) -> Result<()> {
        let key = record_key(record.request_id, record.step);
        let value = serde_json::to_vec(record)?;
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(HISTORY).map_err(db_err)?;
            table
                .insert(key.as_slice(), value.as_slice())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// Append a record at the next free step and return it.
    pub fn append(
        &self,
        request_id: u64,
        process_step: u32,
        task_label: &str,
        status: HistoryStatus,
        user: &str,
    ) -> Result<HistoryRecord> {
        let step = self.next_step(request_id)?;
        let record = HistoryRecord::new(request_id, step, process_step, task_label, status, user);
        self.put(&record)?;
        Ok(record)
    }

    /// Overwrite an existing record, keyed by its request id and step.
    pub fn update(&self, record: &HistoryRecord) -> Result<()> {
        self.put(record)
    }

    pub fn remove(&self, request_id: u64, step: u32) -> Result<()> {
        let key = record_key(request_id, step);
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(HISTORY).map_err(db_err)?;
            table.remove(key.as_slice()).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(())
    }

    /// All records of a request in step order.
    pub fn for_request(&self, request_id: u64) -> Result<Vec<HistoryRecord>> {
        let lower = record_key(request_id, 0);
        let upper = record_key(request_id, u32::MAX);
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(HISTORY).map_err(db_err)?;

        let mut result = Vec::new();
        for entry in table
            .range(lower.as_slice()..=upper.as_slice())
            .map_err(db_err)?
        {
            let (_, v) = entry.map_err(db_err)?;
            let record: HistoryRecord = serde_json::from_slice(v.value())?;
            result.push(record);
        }
        Ok(result)
    }

    pub fn last_for(&self, request_id: u64) -> Result<Option<HistoryRecord>> {
        Ok(self.for_request(request_id)?.pop())
    }

    pub fn next_step(&self, request_id: u64) -> Result<u32> {
        Ok(self
            .last_for(request_id)?
            .map(|r| r.step + 1)
            .unwrap_or(1))
    }

    /// Delete every record of a request. Returns the number removed.
    pub fn purge_request(&self, request_id: u64) -> Result<usize> {
        let records = self.for_request(request_id)?;
        if records.is_empty() {
            return Ok(0);
        }
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut table = wt.open_table(HISTORY).map_err(db_err)?;
            for r in &records {
                let key = record_key(r.request_id, r.step);
                table.remove(key.as_slice()).map_err(db_err)?;
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(records.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, HistoryDb) {
        let dir = TempDir::new().unwrap();
        let db = HistoryDb::open(&dir.path().join("history.db")).unwrap();
        (dir, db)
    }

    #[test]
    fn append_assigns_consecutive_steps_per_request() {
        let (_dir, db) = open_tmp();
        let a1 = db
            .append(1, 0, "Import", HistoryStatus::Finished, SYSTEM_USER)
            .unwrap();
        let b1 = db
            .append(2, 0, "Import", HistoryStatus::Finished, SYSTEM_USER)
            .unwrap();
        let a2 = db
            .append(1, 1, "Archive", HistoryStatus::Ongoing, SYSTEM_USER)
            .unwrap();
        assert_eq!((a1.step, a2.step, b1.step), (1, 2, 1));
        assert_eq!(db.next_step(1).unwrap(), 3);
        assert_eq!(db.next_step(99).unwrap(), 1);
    }

    #[test]
    fn for_request_is_ordered_and_scoped() {
        let (_dir, db) = open_tmp();
        for label in ["Import", "Remark", "Validation"] {
            db.append(7, 0, label, HistoryStatus::Finished, SYSTEM_USER)
                .unwrap();
        }
        // Neighbouring ids must not leak into the range scan.
        db.append(6, 0, "Import", HistoryStatus::Finished, SYSTEM_USER)
            .unwrap();
        db.append(8, 0, "Import", HistoryStatus::Finished, SYSTEM_USER)
            .unwrap();

        let labels: Vec<String> = db
            .for_request(7)
            .unwrap()
            .into_iter()
            .map(|r| r.task_label)
            .collect();
        assert_eq!(labels, vec!["Import", "Remark", "Validation"]);
    }

    #[test]
    fn update_and_remove() {
        let (_dir, db) = open_tmp();
        let mut rec = db
            .append(3, 1, "Email", HistoryStatus::Ongoing, SYSTEM_USER)
            .unwrap();
        rec.set_to_error("smtp unreachable").unwrap();
        db.update(&rec).unwrap();

        let last = db.last_for(3).unwrap().unwrap();
        assert_eq!(last.status, HistoryStatus::Error);
        assert_eq!(last.message, "smtp unreachable");
        assert!(last.end_date.is_some());

        db.remove(3, rec.step).unwrap();
        assert!(db.last_for(3).unwrap().is_none());
    }

    #[test]
    fn purge_request_only_touches_one_request() {
        let (_dir, db) = open_tmp();
        db.append(1, 0, "Import", HistoryStatus::Finished, SYSTEM_USER)
            .unwrap();
        db.append(1, 1, "Remark", HistoryStatus::Finished, SYSTEM_USER)
            .unwrap();
        db.append(2, 0, "Import", HistoryStatus::Finished, SYSTEM_USER)
            .unwrap();

        assert_eq!(db.purge_request(1).unwrap(), 2);
        assert!(db.for_request(1).unwrap().is_empty());
        assert_eq!(db.for_request(2).unwrap().len(), 1);
    }

    #[test]
    fn error_requires_message() {
        let mut rec = HistoryRecord::new(1, 1, 1, "Task", HistoryStatus::Ongoing, SYSTEM_USER);
        assert!(rec.set_to_error("   ").is_err());
        assert_eq!(rec.status, HistoryStatus::Ongoing);
    }

    #[test]
    fn long_messages_are_truncated() {
        let mut rec = HistoryRecord::new(1, 1, 1, "Task", HistoryStatus::Ongoing, SYSTEM_USER);
        rec.set_message(&"é".repeat(MAX_MESSAGE_LENGTH + 10));
        assert_eq!(rec.message.chars().count(), MAX_MESSAGE_LENGTH);
    }
}
