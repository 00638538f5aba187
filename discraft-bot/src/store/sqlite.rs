//! SQLite-backed user store.

use super::{LinkRow, UserRow, UserStore};
use crate::message::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discraft_common::{Error, Result};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const SCHEMA: &str = include_str!("schema.sql");

/// SQLite user store.
///
/// One connection shared behind a mutex; every statement runs on the blocking
/// pool, so a started write completes even if the caller stops waiting.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(map_err)?;
        Self::with_connection(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| Error::Internal("sqlite connection lock poisoned".into()))?;
            op(&conn).map_err(map_err)
        })
        .await
        .map_err(|e| Error::Internal(format!("store task failed: {e}")))?
    }
}

fn map_err(err: rusqlite::Error) -> Error {
    match err.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => Error::Conflict(err.to_string()),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            Error::StoreUnavailable(err.to_string())
        }
        _ => Error::Store(err.to_string()),
    }
}

fn sql_id(identity: Identity) -> Result<i64> {
    i64::try_from(identity.get())
        .map_err(|_| Error::InvalidInput(format!("identity {identity} out of range")))
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, e.into()))
}

#[async_trait]
impl UserStore for SqliteStore {
    async fn load_user(&self, identity: Identity) -> Result<Option<UserRow>> {
        let id = sql_id(identity)?;
        self.run(move |conn| {
            conn.query_row(
                r#"SELECT created_at FROM "user" WHERE discord_id = ?1"#,
                params![id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|raw| {
                Ok(UserRow {
                    identity,
                    created_at: parse_time(&raw)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn insert_user(&self, identity: Identity, created_at: DateTime<Utc>) -> Result<()> {
        let id = sql_id(identity)?;
        self.run(move |conn| {
            conn.execute(
                r#"INSERT INTO "user" (discord_id, created_at) VALUES (?1, ?2)"#,
                params![id, created_at.to_rfc3339()],
            )
            .map(|_| ())
        })
        .await
    }

    async fn ensure_settings(&self, identity: Identity) -> Result<()> {
        let id = sql_id(identity)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_settings (discord_id, lang) VALUES (?1, NULL)",
                params![id],
            )
            .map(|_| ())
        })
        .await
    }

    async fn load_lang(&self, identity: Identity) -> Result<Option<String>> {
        let id = sql_id(identity)?;
        self.run(move |conn| {
            conn.query_row(
                "SELECT lang FROM user_settings WHERE discord_id = ?1",
                params![id],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
        })
        .await
    }

    async fn save_lang(&self, identity: Identity, lang: Option<String>) -> Result<()> {
        let id = sql_id(identity)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO user_settings (discord_id, lang) VALUES (?1, ?2)
                 ON CONFLICT(discord_id) DO UPDATE SET lang = excluded.lang",
                params![id, lang],
            )
            .map(|_| ())
        })
        .await
    }

    async fn insert_link(
        &self,
        identity: Identity,
        minecraft_uuid: Uuid,
        linked_at: DateTime<Utc>,
    ) -> Result<()> {
        let id = sql_id(identity)?;
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO minecraft_links (discord_id, minecraft_uuid, linked_at) VALUES (?1, ?2, ?3)",
                params![id, minecraft_uuid.to_string(), linked_at.to_rfc3339()],
            )
            .map(|_| ())
        })
        .await
    }

    async fn links(&self, identity: Identity) -> Result<Vec<LinkRow>> {
        let id = sql_id(identity)?;
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT minecraft_uuid, linked_at FROM minecraft_links
                 WHERE discord_id = ?1 ORDER BY rowid",
            )?;
            let rows = stmt.query_map(params![id], |row| {
                let raw_uuid: String = row.get(0)?;
                let raw_time: String = row.get(1)?;
                let minecraft_uuid = Uuid::parse_str(&raw_uuid).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        e.into(),
                    )
                })?;
                Ok(LinkRow {
                    identity,
                    minecraft_uuid,
                    linked_at: parse_time(&raw_time)?,
                })
            })?;
            rows.collect()
        })
        .await
    }
}
