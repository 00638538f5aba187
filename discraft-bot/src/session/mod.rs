//! Session cache: the single in-memory view of registered users.
//!
//! Records are loaded lazily on first use, mutated in memory and written back
//! by a periodic sweep, which also evicts users nobody referenced for a while.
//! Callers hold a [`SessionGuard`] while they work with a user; dropping it
//! releases the reference.

mod entry;
mod settings;

pub use entry::{SessionEntry, SessionGuard, UserRecord};
pub use settings::UserSettings;

use crate::message::Identity;
use crate::store::{UserRow, UserStore};
use chrono::Utc;
use dashmap::DashMap;
use discraft_common::{Error, Result, SessionConfig};
use std::sync::Arc;
use std::time::Duration;

pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub flushed: usize,
    pub evicted: usize,
    pub failed: usize,
}

pub struct SessionCache {
    entries: DashMap<Identity, Arc<SessionEntry>>,
    store: Arc<dyn UserStore>,
    flush_interval_ms: i64,
    idle_threshold_ms: i64,
}

impl SessionCache {
    pub fn new(store: Arc<dyn UserStore>, flush_interval: Duration, idle_threshold: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            flush_interval_ms: millis(flush_interval),
            idle_threshold_ms: millis(idle_threshold),
        }
    }

    pub fn from_config(store: Arc<dyn UserStore>, config: &SessionConfig) -> Self {
        Self::new(
            store,
            Duration::from_millis(config.flush_interval_ms),
            Duration::from_millis(config.idle_threshold_ms),
        )
    }

    /// Acquire a registered user, loading it from the store on a miss.
    ///
    /// Returns `None` for an unregistered identity; no entry is created then.
    /// Every successful call counts as one reference, including the call that
    /// loads the record.
    pub async fn get_or_load(&self, identity: Identity) -> Result<Option<SessionGuard>> {
        if let Some(guard) = self.acquire_cached(identity) {
            return Ok(Some(guard));
        }

        match self.store.load_user(identity).await? {
            Some(row) => Ok(Some(self.insert_and_acquire(row))),
            None => Ok(None),
        }
    }

    /// Register a new user and acquire it.
    pub async fn create_user(&self, identity: Identity) -> Result<SessionGuard> {
        if self.get_or_load(identity).await?.is_some() {
            return Err(Error::Conflict(format!("user {identity} is already registered")));
        }

        let created_at = Utc::now();
        self.store
            .insert_user(identity, created_at)
            .await
            .map_err(|e| {
                if e.is_conflict() {
                    Error::Conflict(format!("user {identity} is already registered"))
                } else {
                    e
                }
            })?;

        tracing::info!(user = %identity, "Registered user");
        Ok(self.insert_and_acquire(UserRow {
            identity,
            created_at,
        }))
    }

    /// Release one reference taken without a guard.
    ///
    /// Guards release themselves on drop; this is for references whose guard
    /// was leaked with [`std::mem::forget`].
    pub fn release(&self, identity: Identity) {
        if let Some(entry) = self.entries.get(&identity) {
            entry.release(now_millis());
        }
    }

    /// Flush entries that are due and evict idle, unreferenced ones.
    ///
    /// An evicted entry is flushed once, right before removal. A failed flush
    /// keeps the entry for the next pass.
    pub async fn sweep(&self, now: i64) -> SweepReport {
        let snapshot: Vec<(Identity, Arc<SessionEntry>)> = self
            .entries
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        let mut report = SweepReport {
            scanned: snapshot.len(),
            ..SweepReport::default()
        };

        for (identity, entry) in snapshot {
            let evict = entry.is_idle(now, self.idle_threshold_ms);
            if !evict && !entry.flush_due(now, self.flush_interval_ms) {
                continue;
            }

            if let Err(e) = entry.record().flush().await {
                report.failed += 1;
                tracing::warn!(user = %identity, error = %e, "Failed to flush user settings");
                continue;
            }
            entry.mark_flushed(now);
            report.flushed += 1;

            if evict {
                let idle_ms = self.idle_threshold_ms;
                let removed = self.entries.remove_if(&identity, |_, current| {
                    Arc::ptr_eq(current, &entry) && current.is_idle(now, idle_ms)
                });
                if removed.is_some() {
                    report.evicted += 1;
                    tracing::debug!(user = %identity, "Evicted idle session");
                }
            }
        }

        if report.flushed > 0 || report.evicted > 0 || report.failed > 0 {
            tracing::debug!(
                scanned = report.scanned,
                flushed = report.flushed,
                evicted = report.evicted,
                failed = report.failed,
                "Session sweep finished"
            );
        }
        report
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.entries.contains_key(&identity)
    }

    pub fn entry(&self, identity: Identity) -> Option<Arc<SessionEntry>> {
        self.entries.get(&identity).map(|e| e.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // The map guard is held while acquiring, so a concurrent eviction either
    // runs before (miss) or sees the new reference and backs off.
    fn acquire_cached(&self, identity: Identity) -> Option<SessionGuard> {
        let entry = self.entries.get(&identity)?;
        entry.acquire(now_millis());
        Some(SessionGuard::new(entry.value().clone()))
    }

    fn insert_and_acquire(&self, row: UserRow) -> SessionGuard {
        let now = now_millis();
        let store = self.store.clone();
        let entry = self
            .entries
            .entry(row.identity)
            .or_insert_with(|| Arc::new(SessionEntry::new(UserRecord::new(row, store), now)));
        entry.acquire(now);
        SessionGuard::new(entry.value().clone())
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreCalls};

    const IDLE_MS: i64 = 10_000;
    const FLUSH_MS: i64 = 1_000;

    fn cache(store: Arc<MemoryStore>) -> SessionCache {
        SessionCache::new(
            store,
            Duration::from_millis(FLUSH_MS as u64),
            Duration::from_millis(IDLE_MS as u64),
        )
    }

    #[tokio::test]
    async fn test_unknown_identity_never_cached() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(store.clone());

        for _ in 0..3 {
            assert!(cache.get_or_load(Identity(1)).await.unwrap().is_none());
        }
        assert!(cache.is_empty());
        assert_eq!(StoreCalls::get(&store.calls().load_user), 3);
    }

    #[tokio::test]
    async fn test_create_then_hit_without_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(store.clone());

        let guard = cache.create_user(Identity(5)).await.unwrap();
        assert_eq!(guard.identity(), Identity(5));
        drop(guard);
        let loads = StoreCalls::get(&store.calls().load_user);

        let guard = cache.get_or_load(Identity(5)).await.unwrap().unwrap();
        assert_eq!(guard.identity(), Identity(5));
        assert_eq!(StoreCalls::get(&store.calls().load_user), loads);
        drop(guard);

        let err = cache.create_user(Identity(5)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_conflicts_with_stored_user() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(Identity(6), Utc::now()).await.unwrap();
        let cache = cache(store.clone());

        let err = cache.create_user(Identity(6)).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(StoreCalls::get(&store.calls().insert_user), 1);
    }

    #[tokio::test]
    async fn test_first_load_counts_as_reference() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(Identity(7), Utc::now()).await.unwrap();
        let cache = cache(store);

        let guard = cache.get_or_load(Identity(7)).await.unwrap().unwrap();
        assert_eq!(guard.entry().ref_count(), 1);
        let second = cache.get_or_load(Identity(7)).await.unwrap().unwrap();
        assert_eq!(guard.entry().ref_count(), 2);
        drop(second);
        assert_eq!(guard.entry().ref_count(), 1);

        // Held entries survive a sweep far in the future.
        let report = cache.sweep(now_millis() + IDLE_MS * 10).await;
        assert_eq!(report.evicted, 0);
        assert!(cache.contains(Identity(7)));
    }

    #[tokio::test]
    async fn test_idle_entry_flushed_once_then_evicted() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(store.clone());
        {
            let guard = cache.create_user(Identity(8)).await.unwrap();
            guard.settings().await.unwrap().set_lang(Some("fr".into()));
        }

        let entry = cache.entry(Identity(8)).unwrap();
        assert_eq!(entry.ref_count(), 0);
        let now = entry.last_referenced() + IDLE_MS + 1;

        let report = cache.sweep(now).await;
        assert_eq!(report.evicted, 1);
        assert_eq!(report.flushed, 1);
        assert_eq!(StoreCalls::get(&store.calls().save_lang), 1);
        assert!(!cache.contains(Identity(8)));
        assert_eq!(store.stored_lang(Identity(8)), Some(Some("fr".into())));
    }

    #[tokio::test]
    async fn test_recent_entry_flushed_not_evicted() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(store.clone());
        {
            let guard = cache.create_user(Identity(9)).await.unwrap();
            guard.settings().await.unwrap().set_lang(Some("en_us".into()));
        }

        let entry = cache.entry(Identity(9)).unwrap();
        let now = entry.last_flushed() + FLUSH_MS;
        let report = cache.sweep(now).await;
        assert_eq!(report.flushed, 1);
        assert_eq!(report.evicted, 0);
        assert!(cache.contains(Identity(9)));

        // Nothing changed since, so the next due flush writes nothing.
        cache.sweep(now + FLUSH_MS).await;
        assert_eq!(StoreCalls::get(&store.calls().save_lang), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_entry() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(store.clone());
        {
            let guard = cache.create_user(Identity(10)).await.unwrap();
            guard.settings().await.unwrap().set_lang(Some("fr".into()));
        }
        let entry = cache.entry(Identity(10)).unwrap();
        let now = entry.last_referenced() + IDLE_MS;

        store.fail_next(1);
        let report = cache.sweep(now).await;
        assert_eq!(report.failed, 1);
        assert!(cache.contains(Identity(10)));

        let report = cache.sweep(now).await;
        assert_eq!(report.evicted, 1);
        assert_eq!(store.stored_lang(Identity(10)), Some(Some("fr".into())));
    }

    #[tokio::test]
    async fn test_acquire_during_eviction_flush_keeps_entry() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(cache(store.clone()));
        {
            let guard = cache.create_user(Identity(13)).await.unwrap();
            guard.settings().await.unwrap().set_lang(Some("fr".into()));
        }
        let entry = cache.entry(Identity(13)).unwrap();
        let now = entry.last_referenced() + IDLE_MS;

        store.set_delay(Duration::from_millis(200));
        let sweeping = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.sweep(now).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let guard = cache.get_or_load(Identity(13)).await.unwrap().unwrap();
        let report = sweeping.await.unwrap();

        assert_eq!(report.flushed, 1);
        assert_eq!(report.evicted, 0);
        assert!(cache.contains(Identity(13)));
        assert!(Arc::ptr_eq(&entry, &cache.entry(Identity(13)).unwrap()));
        assert_eq!(entry.ref_count(), 1);
        assert_eq!(store.stored_lang(Identity(13)), Some(Some("fr".into())));
        drop(guard);
    }

    #[tokio::test]
    async fn test_manual_release_balances_leaked_guard() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(store);
        let guard = cache.create_user(Identity(11)).await.unwrap();
        std::mem::forget(guard);

        let entry = cache.entry(Identity(11)).unwrap();
        assert_eq!(entry.ref_count(), 1);
        cache.release(Identity(11));
        assert_eq!(entry.ref_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_first_loads_share_entry() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(Identity(12), Utc::now()).await.unwrap();
        let cache = Arc::new(cache(store));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let guard = cache.get_or_load(Identity(12)).await.unwrap().unwrap();
                tokio::task::yield_now().await;
                drop(guard);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.entry(Identity(12)).unwrap().ref_count(), 0);
    }
}
