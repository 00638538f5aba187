//! Per-user settings backed by the `user_settings` table.

use crate::cached::{fetch_fn, flush_fn, Cached};
use crate::message::Identity;
use crate::store::UserStore;
use discraft_common::Result;
use std::sync::Arc;

/// Settings of one registered user.
///
/// Each field is a [`Cached`] value: read from the store on first access,
/// changed in memory, written back when the session sweep flushes it.
#[derive(Debug)]
pub struct UserSettings {
    lang: Cached<Option<String>>,
}

impl UserSettings {
    pub fn new(identity: Identity, store: Arc<dyn UserStore>) -> Self {
        let fetch_store = store.clone();
        let lang = Cached::new(
            fetch_fn(move || {
                let store = fetch_store.clone();
                async move { store.load_lang(identity).await }
            }),
            flush_fn(move |lang| {
                let store = store.clone();
                async move { store.save_lang(identity, lang).await }
            }),
        );
        Self { lang }
    }

    /// Language code, `None` when the user never picked one.
    pub async fn lang(&mut self) -> Result<Option<String>> {
        Ok(self.lang.get().await?.clone())
    }

    pub fn set_lang(&mut self, lang: Option<String>) {
        self.lang.set(lang);
    }

    pub fn is_dirty(&self) -> bool {
        self.lang.is_dirty()
    }

    /// Write back every changed field. Clean fields are skipped.
    pub async fn flush(&mut self) -> Result<()> {
        if self.lang.is_dirty() {
            self.lang.flush().await?;
        }
        Ok(())
    }
}
