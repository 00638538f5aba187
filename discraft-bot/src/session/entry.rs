//! Cached user records and their bookkeeping.

use super::settings::UserSettings;
use crate::message::Identity;
use crate::store::{UserRow, UserStore};
use chrono::{DateTime, Utc};
use discraft_common::Result;
use std::ops::Deref;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

/// A registered user.
pub struct UserRecord {
    identity: Identity,
    created_at: DateTime<Utc>,
    store: Arc<dyn UserStore>,
    settings: Mutex<Option<UserSettings>>,
}

impl UserRecord {
    pub fn new(row: UserRow, store: Arc<dyn UserStore>) -> Self {
        Self {
            identity: row.identity,
            created_at: row.created_at,
            store,
            settings: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Lock the user's settings, creating them on first access.
    ///
    /// The first access makes sure a settings row exists in the store.
    pub async fn settings(&self) -> Result<MappedMutexGuard<'_, UserSettings>> {
        let mut slot = self.settings.lock().await;
        if slot.is_none() {
            self.store.ensure_settings(self.identity).await?;
            *slot = Some(UserSettings::new(self.identity, self.store.clone()));
        }

        let identity = self.identity;
        let store = self.store.clone();
        Ok(MutexGuard::map(slot, move |s| {
            s.get_or_insert_with(|| UserSettings::new(identity, store))
        }))
    }

    /// Write back changed settings. Nothing to do if settings were never opened.
    pub async fn flush(&self) -> Result<()> {
        let mut slot = self.settings.lock().await;
        match slot.as_mut() {
            Some(settings) => settings.flush().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserRecord")
            .field("identity", &self.identity)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

/// One cached user plus reference count and timestamps (Unix millis).
#[derive(Debug)]
pub struct SessionEntry {
    record: UserRecord,
    ref_count: AtomicI64,
    last_referenced: AtomicI64,
    last_flushed: AtomicI64,
}

impl SessionEntry {
    pub(crate) fn new(record: UserRecord, now: i64) -> Self {
        Self {
            record,
            ref_count: AtomicI64::new(0),
            last_referenced: AtomicI64::new(now),
            last_flushed: AtomicI64::new(now),
        }
    }

    pub fn record(&self) -> &UserRecord {
        &self.record
    }

    pub fn ref_count(&self) -> i64 {
        self.ref_count.load(Ordering::SeqCst)
    }

    pub fn last_referenced(&self) -> i64 {
        self.last_referenced.load(Ordering::SeqCst)
    }

    pub fn last_flushed(&self) -> i64 {
        self.last_flushed.load(Ordering::SeqCst)
    }

    pub(crate) fn acquire(&self, now: i64) {
        self.ref_count.fetch_add(1, Ordering::SeqCst);
        self.last_referenced.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn release(&self, now: i64) {
        self.ref_count.fetch_sub(1, Ordering::SeqCst);
        self.last_referenced.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn mark_flushed(&self, now: i64) {
        self.last_flushed.store(now, Ordering::SeqCst);
    }

    /// Unreferenced and untouched for at least `idle_ms`.
    pub(crate) fn is_idle(&self, now: i64, idle_ms: i64) -> bool {
        self.ref_count() <= 0 && now - self.last_referenced() >= idle_ms
    }

    pub(crate) fn flush_due(&self, now: i64, interval_ms: i64) -> bool {
        now - self.last_flushed() >= interval_ms
    }
}

/// Held reference to a cached user.
///
/// The reference is released when the guard is dropped, on every exit path.
#[derive(Debug)]
#[must_use = "dropping the guard releases the session immediately"]
pub struct SessionGuard {
    entry: Arc<SessionEntry>,
}

impl SessionGuard {
    pub(crate) fn new(entry: Arc<SessionEntry>) -> Self {
        Self { entry }
    }

    pub fn entry(&self) -> &SessionEntry {
        &self.entry
    }
}

impl Deref for SessionGuard {
    type Target = UserRecord;

    fn deref(&self) -> &UserRecord {
        &self.entry.record
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.entry.release(super::now_millis());
    }
}
