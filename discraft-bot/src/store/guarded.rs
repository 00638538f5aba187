//! Timeout and retry policy around a [`UserStore`].

use super::{LinkRow, UserRow, UserStore};
use crate::message::Identity;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use discraft_common::{Error, Result, StoreConfig};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Store wrapper that bounds every call with a timeout and retries
/// transient failures.
///
/// Only `StoreUnavailable` is retried. A timed-out call is not: the write may
/// still land, and repeating an insert would then report a false conflict.
#[derive(Clone)]
pub struct GuardedStore {
    inner: Arc<dyn UserStore>,
    timeout: Duration,
    retries: u32,
}

impl GuardedStore {
    pub fn new(inner: Arc<dyn UserStore>, timeout: Duration, retries: u32) -> Self {
        Self {
            inner,
            timeout,
            retries,
        }
    }

    pub fn from_config(inner: Arc<dyn UserStore>, config: &StoreConfig) -> Self {
        Self::new(inner, config.timeout(), config.retry_attempts)
    }

    async fn call<T, F, Fut>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match tokio::time::timeout(self.timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(op, attempt, error = %e, "Store call failed, retrying");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    tracing::warn!(
                        op,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Store call timed out"
                    );
                    return Err(Error::Timeout);
                }
            }
        }
    }
}

#[async_trait]
impl UserStore for GuardedStore {
    async fn load_user(&self, identity: Identity) -> Result<Option<UserRow>> {
        self.call("load_user", || self.inner.load_user(identity))
            .await
    }

    async fn insert_user(&self, identity: Identity, created_at: DateTime<Utc>) -> Result<()> {
        self.call("insert_user", || self.inner.insert_user(identity, created_at))
            .await
    }

    async fn ensure_settings(&self, identity: Identity) -> Result<()> {
        self.call("ensure_settings", || self.inner.ensure_settings(identity))
            .await
    }

    async fn load_lang(&self, identity: Identity) -> Result<Option<String>> {
        self.call("load_lang", || self.inner.load_lang(identity))
            .await
    }

    async fn save_lang(&self, identity: Identity, lang: Option<String>) -> Result<()> {
        self.call("save_lang", || self.inner.save_lang(identity, lang.clone()))
            .await
    }

    async fn insert_link(
        &self,
        identity: Identity,
        minecraft_uuid: Uuid,
        linked_at: DateTime<Utc>,
    ) -> Result<()> {
        self.call("insert_link", || {
            self.inner.insert_link(identity, minecraft_uuid, linked_at)
        })
        .await
    }

    async fn links(&self, identity: Identity) -> Result<Vec<LinkRow>> {
        self.call("links", || self.inner.links(identity)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreCalls};

    fn guarded(inner: Arc<MemoryStore>, timeout_ms: u64) -> GuardedStore {
        GuardedStore::new(inner, Duration::from_millis(timeout_ms), 1)
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let inner = Arc::new(MemoryStore::new());
        let store = guarded(inner.clone(), 1000);

        inner.fail_next(1);
        assert!(store.load_user(Identity(1)).await.unwrap().is_none());
        assert_eq!(StoreCalls::get(&inner.calls().load_user), 2);
    }

    #[tokio::test]
    async fn test_second_failure_surfaces() {
        let inner = Arc::new(MemoryStore::new());
        let store = guarded(inner.clone(), 1000);

        inner.fail_next(2);
        let err = store.load_user(Identity(1)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(StoreCalls::get(&inner.calls().load_user), 2);
    }

    #[tokio::test]
    async fn test_conflict_not_retried() {
        let inner = Arc::new(MemoryStore::new());
        let store = guarded(inner.clone(), 1000);

        store.insert_user(Identity(1), Utc::now()).await.unwrap();
        let err = store.insert_user(Identity(1), Utc::now()).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(StoreCalls::get(&inner.calls().insert_user), 2);
    }

    #[tokio::test]
    async fn test_timeout_not_retried() {
        let inner = Arc::new(MemoryStore::new());
        inner.set_delay(Duration::from_millis(200));
        let store = guarded(inner.clone(), 20);

        let err = store.load_user(Identity(1)).await.unwrap_err();
        assert!(matches!(err, Error::Timeout));
        assert_eq!(StoreCalls::get(&inner.calls().load_user), 1);
    }
}
