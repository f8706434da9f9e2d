//! Baseline storage contract and its two implementations.
//!
//! Backends answer four actions with a status string (`"OK"` or an error
//! message) and, for `SELECT`, a hash that reads `"NULL"` when nothing is
//! stored for the file code.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{MonitorError, Result};

pub const STATUS_OK: &str = "OK";
pub const NULL_HASH: &str = "NULL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRequest<'a> {
    Select { file: &'a str },
    Insert { file: &'a str, hash: &'a str },
    DeleteOne { file: &'a str },
    DeleteAll,
}

impl StoreRequest<'_> {
    pub fn action(&self) -> &'static str {
        match self {
            StoreRequest::Select { .. } => "SELECT",
            StoreRequest::Insert { .. } => "INSERT",
            StoreRequest::DeleteOne { .. } => "DELETE_ONE",
            StoreRequest::DeleteAll => "DELETE_ALL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResponse {
    pub status: String,
    pub hash: String,
}

impl StoreResponse {
    pub fn ok() -> Self {
        Self::ok_with(NULL_HASH)
    }

    pub fn ok_with(hash: impl Into<String>) -> Self {
        Self {
            status: STATUS_OK.to_string(),
            hash: hash.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: message.into(),
            hash: NULL_HASH.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

pub trait BaselineStore: Send + Sync {
    fn execute(&self, request: StoreRequest<'_>) -> StoreResponse;

    /// Stored hash for `file`, `None` when there is no baseline yet.
    fn select(&self, file: &str) -> Result<Option<String>> {
        let response = checked(self.execute(StoreRequest::Select { file }))?;
        Ok((response.hash != NULL_HASH).then_some(response.hash))
    }

    fn insert(&self, file: &str, hash: &str) -> Result<()> {
        checked(self.execute(StoreRequest::Insert { file, hash })).map(drop)
    }

    fn delete_one(&self, file: &str) -> Result<()> {
        checked(self.execute(StoreRequest::DeleteOne { file })).map(drop)
    }

    fn delete_all(&self) -> Result<()> {
        checked(self.execute(StoreRequest::DeleteAll)).map(drop)
    }
}

fn checked(response: StoreResponse) -> Result<StoreResponse> {
    if response.is_ok() {
        Ok(response)
    } else {
        Err(MonitorError::Storage(response.status))
    }
}

/// SQLite-backed store: one `integrity(file, hash)` table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "baseline store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS integrity (
                file TEXT PRIMARY KEY,
                hash TEXT NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn run(&self, request: StoreRequest<'_>) -> rusqlite::Result<StoreResponse> {
        let conn = self.conn.lock();
        match request {
            StoreRequest::Select { file } => {
                let hash: Option<String> = conn
                    .query_row(
                        "SELECT hash FROM integrity WHERE file = ?1",
                        params![file],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(StoreResponse::ok_with(hash.unwrap_or_else(|| NULL_HASH.to_string())))
            }
            StoreRequest::Insert { file, hash } => {
                conn.execute(
                    "INSERT OR REPLACE INTO integrity (file, hash) VALUES (?1, ?2)",
                    params![file, hash],
                )?;
                Ok(StoreResponse::ok())
            }
            StoreRequest::DeleteOne { file } => {
                conn.execute("DELETE FROM integrity WHERE file = ?1", params![file])?;
                Ok(StoreResponse::ok())
            }
            StoreRequest::DeleteAll => {
                conn.execute("DELETE FROM integrity", [])?;
                Ok(StoreResponse::ok())
            }
        }
    }
}

impl BaselineStore for SqliteStore {
    fn execute(&self, request: StoreRequest<'_>) -> StoreResponse {
        let action = request.action();
        match self.run(request) {
            Ok(response) => {
                debug!(action, "baseline store request ok");
                response
            }
            Err(e) => StoreResponse::error(format!("{action} failed: {e}")),
        }
    }
}

/// Map-backed store for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, String>>,
    failing: Mutex<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every following request fail until switched off again.
    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl BaselineStore for MemoryStore {
    fn execute(&self, request: StoreRequest<'_>) -> StoreResponse {
        if *self.failing.lock() {
            return StoreResponse::error(format!("{} failed: store offline", request.action()));
        }
        let mut rows = self.rows.lock();
        match request {
            StoreRequest::Select { file } => {
                StoreResponse::ok_with(rows.get(file).map_or(NULL_HASH, String::as_str))
            }
            StoreRequest::Insert { file, hash } => {
                rows.insert(file.to_string(), hash.to_string());
                StoreResponse::ok()
            }
            StoreRequest::DeleteOne { file } => {
                rows.remove(file);
                StoreResponse::ok()
            }
            StoreRequest::DeleteAll => {
                rows.clear();
                StoreResponse::ok()
            }
        }
    }
}
