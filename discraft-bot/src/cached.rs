//! Lazily fetched value with explicit write-back.
//!
//! The first `get` fetches from the backing source; every later read is served
//! from memory. `set` only touches the in-memory copy and marks it dirty, the
//! write happens on the next `flush`.

use discraft_common::Result;
use futures_util::future::BoxFuture;
use std::fmt;

/// Loads the current value from the backing source.
pub type FetchFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Writes a value back to the backing source.
pub type FlushFn<T> = Box<dyn Fn(T) -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct Cached<T> {
    value: Option<T>,
    dirty: bool,
    fetch: FetchFn<T>,
    flush: FlushFn<T>,
}

impl<T> Cached<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(fetch: FetchFn<T>, flush: FlushFn<T>) -> Self {
        Self {
            value: None,
            dirty: false,
            fetch,
            flush,
        }
    }

    /// Return the value, fetching it on first use.
    ///
    /// A failed fetch leaves the value unfetched, so the next call tries again.
    pub async fn get(&mut self) -> Result<&T> {
        let value = match self.value.take() {
            Some(value) => value,
            None => (self.fetch)().await?,
        };
        Ok(self.value.insert(value))
    }

    /// Overwrite the value in memory. Nothing is written until `flush`.
    pub fn set(&mut self, value: T) {
        self.value = Some(value);
        self.dirty = true;
    }

    /// Write the held value back to the source.
    ///
    /// Without a fetched or set value this is a no-op.
    pub async fn flush(&mut self) -> Result<()> {
        let Some(value) = self.value.clone() else {
            return Ok(());
        };
        (self.flush)(value).await?;
        self.dirty = false;
        Ok(())
    }

    pub fn is_fetched(&self) -> bool {
        self.value.is_some()
    }

    /// True when `set` was called since the last successful flush.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Value currently held, without fetching.
    pub fn peek(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

impl<T: fmt::Debug> fmt::Debug for Cached<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cached")
            .field("value", &self.value)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

/// Build a fetch function from an async closure.
pub fn fetch_fn<T, F, Fut>(f: F) -> FetchFn<T>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<T>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Build a flush function from an async closure.
pub fn flush_fn<T, F, Fut>(f: F) -> FlushFn<T>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move |value| Box::pin(f(value)))
}
