//! In-memory user store.
//!
//! Keeps per-operation call counters and can inject failures or delays, which
//! makes it the store of choice for tests of the layers above.

use super::{LinkRow, UserRow, UserStore};
use crate::message::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discraft_common::{Error, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Number of calls seen per operation.
#[derive(Debug, Default)]
pub struct StoreCalls {
    pub load_user: AtomicUsize,
    pub insert_user: AtomicUsize,
    pub ensure_settings: AtomicUsize,
    pub load_lang: AtomicUsize,
    pub save_lang: AtomicUsize,
    pub insert_link: AtomicUsize,
}

impl StoreCalls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    /// Total number of calls that write.
    pub fn writes(&self) -> usize {
        Self::get(&self.insert_user)
            + Self::get(&self.ensure_settings)
            + Self::get(&self.save_lang)
            + Self::get(&self.insert_link)
    }
}

#[derive(Default)]
struct Tables {
    users: HashMap<Identity, DateTime<Utc>>,
    settings: HashMap<Identity, Option<String>>,
    links: Vec<LinkRow>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    calls: StoreCalls,
    fail_next: AtomicUsize,
    delay_ms: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &StoreCalls {
        &self.calls
    }

    /// Make the next `count` calls fail with `StoreUnavailable`.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::SeqCst);
    }

    /// Stored language, bypassing counters. `None` if there is no settings row.
    pub fn stored_lang(&self, identity: Identity) -> Option<Option<String>> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.settings.get(&identity).cloned())
    }

    async fn enter(&self, counter: &AtomicUsize) -> Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::StoreUnavailable("injected failure".into()));
        }
        Ok(())
    }

    fn tables(&self) -> Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn load_user(&self, identity: Identity) -> Result<Option<UserRow>> {
        self.enter(&self.calls.load_user).await?;
        Ok(self
            .tables()?
            .users
            .get(&identity)
            .map(|created_at| UserRow {
                identity,
                created_at: *created_at,
            }))
    }

    async fn insert_user(&self, identity: Identity, created_at: DateTime<Utc>) -> Result<()> {
        self.enter(&self.calls.insert_user).await?;
        let mut tables = self.tables()?;
        if tables.users.contains_key(&identity) {
            return Err(Error::Conflict(format!("user {identity} already exists")));
        }
        tables.users.insert(identity, created_at);
        Ok(())
    }

    async fn ensure_settings(&self, identity: Identity) -> Result<()> {
        self.enter(&self.calls.ensure_settings).await?;
        let mut tables = self.tables()?;
        if !tables.users.contains_key(&identity) {
            return Err(Error::Conflict(format!("user {identity} does not exist")));
        }
        tables.settings.entry(identity).or_insert(None);
        Ok(())
    }

    async fn load_lang(&self, identity: Identity) -> Result<Option<String>> {
        self.enter(&self.calls.load_lang).await?;
        Ok(self.tables()?.settings.get(&identity).cloned().flatten())
    }

    async fn save_lang(&self, identity: Identity, lang: Option<String>) -> Result<()> {
        self.enter(&self.calls.save_lang).await?;
        self.tables()?.settings.insert(identity, lang);
        Ok(())
    }

    async fn insert_link(
        &self,
        identity: Identity,
        minecraft_uuid: Uuid,
        linked_at: DateTime<Utc>,
    ) -> Result<()> {
        self.enter(&self.calls.insert_link).await?;
        self.tables()?.links.push(LinkRow {
            identity,
            minecraft_uuid,
            linked_at,
        });
        Ok(())
    }

    async fn links(&self, identity: Identity) -> Result<Vec<LinkRow>> {
        Ok(self
            .tables()?
            .links
            .iter()
            .filter(|row| row.identity == identity)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_calls() {
        let store = MemoryStore::new();
        store.load_user(Identity(1)).await.unwrap();
        store.insert_user(Identity(1), Utc::now()).await.unwrap();
        assert_eq!(StoreCalls::get(&store.calls().load_user), 1);
        assert_eq!(store.calls().writes(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures_run_out() {
        let store = MemoryStore::new();
        store.fail_next(1);
        let err = store.load_user(Identity(1)).await.unwrap_err();
        assert!(err.is_transient());
        assert!(store.load_user(Identity(1)).await.is_ok());
    }
}
