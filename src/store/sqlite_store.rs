//! Embedded SQLite store for nonce records and scan progress.
use std::{path::Path, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::record::{MergeOutcome, NonceRecord, SignatureWitness, RECORD_VERSION};
use crate::store::{NonceStore, ReuseFinding, StoreError};

/// Tables:
///   nonces(nonce TEXT PRIMARY KEY, witnesses TEXT NOT NULL, reused INTEGER NOT NULL)
///   state(key TEXT PRIMARY KEY, value TEXT NOT NULL)
///
/// `witnesses` holds [`NonceRecord::encode`] output. `reused` is set once any
/// public key appears twice in the record.
///
/// State keys:
///  - schema_version : u32 decimal string
///  - last_scanned   : u32 decimal string
///
/// A single connection sits behind a mutex; every call takes the lock for its
/// whole read-modify-write, so concurrent scanners are serialized.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS nonces (
        nonce     TEXT PRIMARY KEY,
        witnesses TEXT NOT NULL,
        reused    INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS nonces_reused ON nonces(reused) WHERE reused = 1;

    CREATE TABLE IF NOT EXISTS state (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
"#;

impl SqliteStore {
    /// Creates/initializes the SQLite file at `path`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("open sqlite at {}", path.display()))?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            "#,
        )?;
        Self::init(conn)
    }

    /// Convenient in-memory store (useful for tests)
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        match Self::kv_get(&conn, "schema_version")? {
            None => Self::kv_set(&conn, "schema_version", &RECORD_VERSION.to_string())?,
            Some(v) if v == RECORD_VERSION.to_string() => {}
            Some(found) => {
                return Err(StoreError::Schema {
                    found,
                    expected: RECORD_VERSION,
                })
            }
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn kv_get(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
        Ok(conn
            .query_row(
                "SELECT value FROM state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn kv_set(conn: &Connection, key: &str, val: &str) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO state(key,value) VALUES(?1,?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, val],
        )?;
        Ok(())
    }

    fn get_raw(conn: &Connection, nonce: &str) -> Result<Option<String>, StoreError> {
        Ok(conn
            .query_row(
                "SELECT witnesses FROM nonces WHERE nonce = ?1",
                params![nonce],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Run `f` on the connection from the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        task::spawn_blocking(move || f(&mut conn.lock())).await?
    }
}

#[async_trait]
impl NonceStore for SqliteStore {
    async fn record(&self, nonce: &str, witness: SignatureWitness) -> Result<bool, StoreError> {
        let nonce = nonce.to_owned();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let (record, outcome) = match Self::get_raw(&tx, &nonce)? {
                None => (NonceRecord::new(witness), MergeOutcome::Appended),
                Some(raw) => {
                    let mut record = NonceRecord::decode(&nonce, &raw)?;
                    let outcome = record.merge(witness);
                    (record, outcome)
                }
            };
            if outcome == MergeOutcome::Duplicate {
                return Ok(false);
            }

            let reused = !record.reused_keys().is_empty();
            tx.execute(
                "INSERT INTO nonces(nonce, witnesses, reused) VALUES(?1, ?2, ?3)
                 ON CONFLICT(nonce) DO UPDATE SET witnesses=excluded.witnesses, reused=excluded.reused",
                params![nonce, record.encode(), reused],
            )?;
            tx.commit()?;
            Ok(outcome == MergeOutcome::Reuse)
        })
        .await
    }

    async fn load(&self, nonce: &str) -> Result<Option<NonceRecord>, StoreError> {
        let nonce = nonce.to_owned();
        self.with_conn(move |conn| {
            Self::get_raw(conn, &nonce)?
                .map(|raw| NonceRecord::decode(&nonce, &raw))
                .transpose()
        })
        .await
    }

    async fn reused_nonces(&self) -> Result<Vec<ReuseFinding>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT nonce, witnesses FROM nonces WHERE reused = 1 ORDER BY nonce")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut findings = Vec::new();
            for row in rows {
                let (nonce, raw) = row?;
                let record = NonceRecord::decode(&nonce, &raw)?;
                for (public_key, mut witnesses) in record.reused_keys() {
                    // concurrent writers may have appended out of chain order
                    witnesses.sort_by_key(|w| (w.block_height, w.txid, w.input_index));
                    findings.push(ReuseFinding {
                        nonce: nonce.clone(),
                        public_key,
                        witnesses,
                    });
                }
            }
            Ok(findings)
        })
        .await
    }

    async fn last_scanned(&self) -> Result<Option<u32>, StoreError> {
        self.with_conn(|conn| {
            Self::kv_get(conn, "last_scanned")?
                .map(|s| {
                    s.parse::<u32>()
                        .context("parse last_scanned")
                        .map_err(StoreError::from)
                })
                .transpose()
        })
        .await
    }

    async fn set_last_scanned(&self, height: u32) -> Result<(), StoreError> {
        self.with_conn(move |conn| Self::kv_set(conn, "last_scanned", &height.to_string()))
            .await
    }
}
