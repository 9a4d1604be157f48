//! SQLite persistence for engine snapshots.
//!
//! Stores what must survive a restart:
//! - The broker session (one row)
//! - The EOD close cache (one row)
//! - Contests and portfolios, each serialized as a JSON document

use crate::types::{Contest, EodSnapshot, Portfolio, Session};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

const SESSION_KEY: &str = "broker";
const EOD_KEY: &str = "latest";

/// SQLite-backed snapshot store.
pub struct SnapshotStore {
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    /// Open (or create) a store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("Snapshot store initialized");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory snapshot store initialized");
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                key TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS eod_cache (
                key TEXT PRIMARY KEY,
                session_date TEXT,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS contests (
                id TEXT PRIMARY KEY,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS portfolios (
                id TEXT PRIMARY KEY,
                contest_id TEXT NOT NULL,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_portfolios_contest ON portfolios(contest_id);",
        )?;

        debug!("Snapshot schema initialized");
        Ok(())
    }

    // ========== Session ==========

    pub fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        let body = serde_json::to_string(session)?;
        self.conn()?.execute(
            "INSERT INTO sessions (key, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![SESSION_KEY, body, now_ms()],
        )?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<Session>, StoreError> {
        let body: Option<String> = self
            .conn()?
            .query_row(
                "SELECT body FROM sessions WHERE key = ?1",
                params![SESSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b)).transpose().map_err(Into::into)
    }

    pub fn clear_session(&self) -> Result<(), StoreError> {
        self.conn()?
            .execute("DELETE FROM sessions WHERE key = ?1", params![SESSION_KEY])?;
        Ok(())
    }

    // ========== EOD cache ==========

    pub fn save_eod(&self, snapshot: &EodSnapshot) -> Result<(), StoreError> {
        let body = serde_json::to_string(snapshot)?;
        let session_date = snapshot.session_date.map(|d| d.to_string());
        self.conn()?.execute(
            "INSERT INTO eod_cache (key, session_date, body, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                session_date = excluded.session_date,
                body = excluded.body,
                updated_at = excluded.updated_at",
            params![EOD_KEY, session_date, body, now_ms()],
        )?;
        debug!("Saved EOD cache with {} prices", snapshot.prices.len());
        Ok(())
    }

    pub fn load_eod(&self) -> Result<Option<EodSnapshot>, StoreError> {
        let body: Option<String> = self
            .conn()?
            .query_row(
                "SELECT body FROM eod_cache WHERE key = ?1",
                params![EOD_KEY],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b)).transpose().map_err(Into::into)
    }

    // ========== Contests ==========

    pub fn save_contest(&self, contest: &Contest) -> Result<(), StoreError> {
        let body = serde_json::to_string(contest)?;
        self.conn()?.execute(
            "INSERT INTO contests (id, body, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![contest.id, body, now_ms()],
        )?;
        Ok(())
    }

    pub fn load_contests(&self) -> Result<Vec<Contest>, StoreError> {
        self.load_all("SELECT body FROM contests")
    }

    // ========== Portfolios ==========

    pub fn save_portfolio(&self, portfolio: &Portfolio) -> Result<(), StoreError> {
        let body = serde_json::to_string(portfolio)?;
        self.conn()?.execute(
            "INSERT INTO portfolios (id, contest_id, body, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![portfolio.id, portfolio.contest_id, body, now_ms()],
        )?;
        Ok(())
    }

    pub fn load_portfolios(&self) -> Result<Vec<Portfolio>, StoreError> {
        self.load_all("SELECT body FROM portfolios")
    }

    /// Decode every row of a single-column body query, skipping corrupt rows.
    fn load_all<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(bodies
            .iter()
            .filter_map(|body| match serde_json::from_str(body) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Skipping unreadable snapshot row: {}", e);
                    None
                }
            })
            .collect())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AssetType, NewContest};
    use chrono::{Duration, NaiveDate, TimeZone, Utc};

    fn store() -> SnapshotStore {
        SnapshotStore::new_in_memory().unwrap()
    }

    #[test]
    fn test_session_roundtrip_and_clear() {
        let store = store();
        assert!(store.load_session().unwrap().is_none());

        let created = Utc.with_ymd_and_hms(2024, 3, 4, 3, 0, 0).unwrap();
        let session = Session::new("tok".to_string(), created, Duration::hours(24));
        store.save_session(&session).unwrap();
        assert_eq!(store.load_session().unwrap(), Some(session));

        store.clear_session().unwrap();
        assert!(store.load_session().unwrap().is_none());
    }

    #[test]
    fn test_eod_overwrites_previous_session() {
        let store = store();
        let mut snapshot = EodSnapshot {
            session_date: NaiveDate::from_ymd_opt(2024, 3, 4),
            ..Default::default()
        };
        snapshot.prices.insert("TCS".to_string(), 3_900.0);
        store.save_eod(&snapshot).unwrap();

        snapshot.session_date = NaiveDate::from_ymd_opt(2024, 3, 5);
        snapshot.prices.insert("TCS".to_string(), 3_950.0);
        store.save_eod(&snapshot).unwrap();

        let loaded = store.load_eod().unwrap().unwrap();
        assert_eq!(loaded.session_date, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(loaded.close("TCS"), Some(3_950.0));
    }

    #[test]
    fn test_contests_and_portfolios_persist() {
        let store = store();
        let now = Utc::now();
        let contest = Contest::new(
            NewContest {
                title: "Weekly".to_string(),
                entry_fee: 0.0,
                prize_pool: 0.0,
                registration_deadline: now,
                market_start_time: now + Duration::hours(1),
                market_end_time: now + Duration::hours(2),
                end_time: now + Duration::hours(3),
                virtual_cash: None,
                asset_type: AssetType::Stock,
            },
            1_000_000.0,
        );
        store.save_contest(&contest).unwrap();
        store.save_contest(&contest).unwrap();

        let portfolio = Portfolio::new(
            contest.id.clone(),
            "user-1".to_string(),
            1_000_000.0,
            1_709_517_600_000,
        );
        store.save_portfolio(&portfolio).unwrap();

        let contests = store.load_contests().unwrap();
        assert_eq!(contests.len(), 1);
        assert_eq!(contests[0].id, contest.id);

        let portfolios = store.load_portfolios().unwrap();
        assert_eq!(portfolios.len(), 1);
        assert_eq!(portfolios[0].contest_id, contest.id);
    }
}
