//! `lang [code]`: show or change the sender's language.

use super::{Command, CommandContext};
use crate::session::SessionCache;
use async_trait::async_trait;
use std::sync::Arc;

pub struct LangCommand {
    sessions: Arc<SessionCache>,
}

impl LangCommand {
    pub fn new(sessions: Arc<SessionCache>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Command for LangCommand {
    fn label(&self) -> &str {
        "lang"
    }

    fn usage(&self) -> &str {
        "[code]"
    }

    fn description(&self) -> &str {
        "Shows or updates your language"
    }

    async fn execute(&self, ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        let texts = ctx.texts;
        let Some(user) = self.sessions.get_or_load(ctx.sender.identity).await? else {
            ctx.reply(texts.format("user.not_registered", &[ctx.prefix]));
            return Ok(());
        };
        let mut settings = user.settings().await?;

        let Some(&code) = ctx.args.first() else {
            let current = settings
                .lang()
                .await?
                .unwrap_or_else(|| texts.lang().to_string());
            ctx.reply(texts.format("lang.current", &[current.as_str()]));
            return Ok(());
        };

        let registry = texts.registry();
        match registry.language(code) {
            Some(language) => {
                settings.set_lang(Some(language.id().to_string()));
                tracing::info!(user = %ctx.sender.identity, lang = language.id(), "Updated language");
                ctx.reply(texts.format("lang.updated", &[language.id()]));
            }
            None => {
                let available = registry
                    .languages()
                    .map(|l| format!("`{}`", l.id()))
                    .collect::<Vec<_>>()
                    .join(", ");
                ctx.reply(texts.format("lang.unknown", &[code, available.as_str()]));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{bot_texts, sender};
    use crate::commands::{CommandRouter, Reply};
    use crate::message::{ChannelKind, Identity};
    use crate::store::{MemoryStore, StoreCalls, UserStore};
    use chrono::Utc;
    use std::time::Duration;

    fn setup(store: Arc<MemoryStore>) -> (CommandRouter, Arc<SessionCache>) {
        let sessions = Arc::new(SessionCache::new(
            store,
            Duration::from_secs(1),
            Duration::from_secs(10),
        ));
        let mut router = CommandRouter::new("!d", bot_texts()).unwrap();
        router
            .register(Arc::new(LangCommand::new(sessions.clone())))
            .unwrap();
        (router, sessions)
    }

    fn only_text(replies: &[Reply]) -> &str {
        assert_eq!(replies.len(), 1);
        replies[0].text()
    }

    #[tokio::test]
    async fn test_unregistered_sender() {
        let (router, sessions) = setup(Arc::new(MemoryStore::new()));
        let result = router.dispatch(&sender(ChannelKind::Guild), "!d lang fr").await;
        assert_eq!(
            only_text(&result.replies),
            "You are not registered. Use `!d register` first."
        );
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_show_then_update() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(Identity(100), Utc::now()).await.unwrap();
        let (router, sessions) = setup(store.clone());
        let sender = sender(ChannelKind::Guild);

        let result = router.dispatch(&sender, "!d lang").await;
        assert_eq!(only_text(&result.replies), "Your language is: `en_us`");

        let result = router.dispatch(&sender, "!D LANG FR").await;
        assert_eq!(only_text(&result.replies), "Updated your language to: `fr`");

        // Not written through; the sweep writes it back.
        assert_eq!(store.stored_lang(Identity(100)), Some(None));
        let entry = sessions.entry(Identity(100)).unwrap();
        sessions.sweep(entry.last_flushed() + 1_000).await;
        assert_eq!(store.stored_lang(Identity(100)), Some(Some("fr".into())));
        assert_eq!(StoreCalls::get(&store.calls().save_lang), 1);
    }

    #[tokio::test]
    async fn test_unknown_language() {
        let store = Arc::new(MemoryStore::new());
        store.insert_user(Identity(100), Utc::now()).await.unwrap();
        let (router, _) = setup(store.clone());

        let result = router.dispatch(&sender(ChannelKind::Private), "!d lang xx").await;
        assert_eq!(
            only_text(&result.replies),
            "Unknown language `xx`. Available languages: `en_us`, `fr`"
        );
        assert_eq!(StoreCalls::get(&store.calls().save_lang), 0);
    }
}
