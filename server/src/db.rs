//! SQLite-backed transactional store.
//!
//! One connection behind a mutex; every money movement and every lifecycle
//! transition commits through [`Db::transact`] so a failure anywhere rolls
//! back everything. WAL mode keeps readers cheap.

use rusqlite::Connection;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use petri_types::HOUSE_ACCOUNT;

use crate::ledger::LedgerError;

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the store at `path`; `:memory:` is valid for tests.
    pub fn open(path: &str) -> Result<Self, LedgerError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside one transaction; commit on `Ok`, roll back otherwise.
    pub fn transact<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut conn = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Read-only access without an explicit transaction.
    pub fn read<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&conn)
    }
}

fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA foreign_keys=ON;
         CREATE TABLE IF NOT EXISTS accounts (
             id TEXT PRIMARY KEY,
             nickname TEXT NOT NULL,
             kyc TEXT NOT NULL DEFAULT 'none',
             region TEXT NOT NULL DEFAULT '',
             created_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS wallets (
             account TEXT PRIMARY KEY REFERENCES accounts(id),
             available INTEGER NOT NULL DEFAULT 0 CHECK (available >= 0),
             escrow INTEGER NOT NULL DEFAULT 0 CHECK (escrow >= 0),
             version INTEGER NOT NULL DEFAULT 0
         );
         CREATE TABLE IF NOT EXISTS ledger (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             account TEXT NOT NULL,
             kind TEXT NOT NULL,
             amount INTEGER NOT NULL,
             status TEXT NOT NULL,
             reference TEXT NOT NULL DEFAULT '',
             idempotency_key TEXT UNIQUE,
             created_at INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS ledger_account_id ON ledger(account, id);
         CREATE TABLE IF NOT EXISTS lobbies (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             mode TEXT NOT NULL,
             buy_in INTEGER NOT NULL,
             payout_model TEXT NOT NULL,
             rake_bps INTEGER NOT NULL,
             rake_cap INTEGER,
             capacity INTEGER NOT NULL,
             state TEXT NOT NULL DEFAULT 'waiting',
             created_at INTEGER NOT NULL
         );
         CREATE TABLE IF NOT EXISTS memberships (
             lobby_id INTEGER NOT NULL REFERENCES lobbies(id),
             account TEXT NOT NULL REFERENCES accounts(id),
             team INTEGER NOT NULL DEFAULT 0,
             joined_at INTEGER NOT NULL,
             PRIMARY KEY (lobby_id, account)
         );
         CREATE TABLE IF NOT EXISTS matches (
             id TEXT PRIMARY KEY,
             lobby_id INTEGER NOT NULL REFERENCES lobbies(id),
             seed TEXT NOT NULL,
             nonce TEXT NOT NULL,
             commit_hash TEXT NOT NULL,
             payout_model TEXT NOT NULL,
             rake_bps INTEGER NOT NULL,
             rake_cap INTEGER,
             buy_in INTEGER NOT NULL,
             pot INTEGER NOT NULL,
             rake INTEGER NOT NULL,
             net_pot INTEGER NOT NULL,
             map_radius REAL NOT NULL,
             started_at INTEGER NOT NULL,
             ended_at INTEGER,
             outcome TEXT
         );
         CREATE INDEX IF NOT EXISTS matches_unfinished ON matches(ended_at) WHERE ended_at IS NULL;
         CREATE TABLE IF NOT EXISTS placements (
             match_id TEXT NOT NULL REFERENCES matches(id),
             account TEXT NOT NULL,
             team INTEGER NOT NULL,
             placement INTEGER NOT NULL,
             final_mass REAL NOT NULL,
             max_mass REAL NOT NULL,
             kills INTEGER NOT NULL,
             payout INTEGER NOT NULL,
             PRIMARY KEY (match_id, account)
         );",
    )?;

    // The house account is a distinguished known id, present from genesis.
    let now = unix_ms();
    conn.execute(
        "INSERT OR IGNORE INTO accounts (id, nickname, kyc, region, created_at)
         VALUES (?1, 'house', 'approved', '', ?2)",
        rusqlite::params![HOUSE_ACCOUNT.to_hex(), now],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO wallets (account, available, escrow, version) VALUES (?1, 0, 0, 0)",
        rusqlite::params![HOUSE_ACCOUNT.to_hex()],
    )?;
    Ok(())
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_initializes_with_house_account() {
        let db = Db::open(":memory:").unwrap();
        let available: i64 = db
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT available FROM wallets WHERE account = ?1",
                    rusqlite::params![HOUSE_ACCOUNT.to_hex()],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(available, 0);
    }

    #[test]
    fn transact_rolls_back_on_error() {
        let db = Db::open(":memory:").unwrap();
        let result: Result<(), LedgerError> = db.transact(|tx| {
            tx.execute(
                "INSERT INTO accounts (id, nickname, created_at) VALUES ('x', 'x', 0)",
                [],
            )?;
            Err(LedgerError::Validation("forced"))
        });
        assert!(result.is_err());
        let count: i64 = db
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM accounts WHERE id = 'x'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
