//! Persistent user state.
//!
//! Three logical tables back the bot: registered users, their settings and
//! their Minecraft account links. [`UserStore`] is the seam; the SQLite
//! implementation is used in production and [`MemoryStore`] in tests. All
//! callers go through [`GuardedStore`], which bounds every call with a
//! timeout and retries transient failures once.

mod guarded;
mod memory;
mod sqlite;

pub use guarded::GuardedStore;
pub use memory::{MemoryStore, StoreCalls};
pub use sqlite::SqliteStore;

use crate::message::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discraft_common::Result;
use uuid::Uuid;

/// Row of the `user` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRow {
    pub identity: Identity,
    pub created_at: DateTime<Utc>,
}

/// Row of the `minecraft_links` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRow {
    pub identity: Identity,
    pub minecraft_uuid: Uuid,
    pub linked_at: DateTime<Utc>,
}

/// Backing store for user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Load the user row, if the identity is registered.
    async fn load_user(&self, identity: Identity) -> Result<Option<UserRow>>;

    /// Insert a user row. Fails with `Conflict` when the identity exists.
    async fn insert_user(&self, identity: Identity, created_at: DateTime<Utc>) -> Result<()>;

    /// Create the default settings row if it does not exist yet.
    async fn ensure_settings(&self, identity: Identity) -> Result<()>;

    /// Read the stored language code; `None` means the bot default.
    async fn load_lang(&self, identity: Identity) -> Result<Option<String>>;

    /// Write the language code.
    async fn save_lang(&self, identity: Identity, lang: Option<String>) -> Result<()>;

    /// Record a link between a Discord identity and a Minecraft account.
    async fn insert_link(
        &self,
        identity: Identity,
        minecraft_uuid: Uuid,
        linked_at: DateTime<Utc>,
    ) -> Result<()>;

    /// All links recorded for an identity, oldest first.
    async fn links(&self, identity: Identity) -> Result<Vec<LinkRow>>;
}
