//! `link`: start linking a Minecraft account.

use super::{Command, CommandContext};
use crate::link::LinkBroker;
use crate::message::ChannelKind;
use async_trait::async_trait;
use std::sync::Arc;

pub struct LinkCommand {
    links: Arc<LinkBroker>,
}

impl LinkCommand {
    pub fn new(links: Arc<LinkBroker>) -> Self {
        Self { links }
    }
}

#[async_trait]
impl Command for LinkCommand {
    fn label(&self) -> &str {
        "link"
    }

    fn description(&self) -> &str {
        "Links your Discord and Minecraft accounts"
    }

    async fn execute(&self, ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        let texts = ctx.texts;
        let ticket = match self.links.begin_link(ctx.sender.identity) {
            Ok(ticket) => ticket,
            Err(e) if e.is_conflict() => {
                ctx.reply(texts.get("link.already"));
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let intro = format!(
            "**{}**\n{}",
            texts.get("link.intro.title"),
            texts.format("link.intro.desc", &[ctx.sender.name.as_str(), ticket.code.as_str()])
        );
        ctx.reply_direct(intro);
        if ctx.sender.channel_kind == ChannelKind::Guild {
            ctx.reply(texts.get("link.sent"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{bot_texts, sender};
    use crate::commands::{CommandRouter, Reply};
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn setup() -> (CommandRouter, Arc<LinkBroker>) {
        let links = Arc::new(LinkBroker::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(600),
        ));
        let mut router = CommandRouter::new("!d", bot_texts()).unwrap();
        router
            .register(Arc::new(LinkCommand::new(links.clone())))
            .unwrap();
        (router, links)
    }

    #[tokio::test]
    async fn test_code_sent_by_direct_message() {
        let (router, links) = setup();
        let sender = sender(ChannelKind::Guild);

        let result = router.dispatch(&sender, "!d link").await;
        let ticket = links.ticket(sender.identity).unwrap();

        assert_eq!(result.replies.len(), 2);
        match &result.replies[0] {
            Reply::Direct(text) => {
                assert!(text.starts_with("**Link your Minecraft account**"));
                assert!(text.contains("Hi Steve!"));
                assert!(text.contains(&ticket.code));
            }
            other => panic!("expected a direct message, got {other:?}"),
        }
        assert_eq!(
            result.replies[1],
            Reply::Channel("I sent you a direct message with your link code.".into())
        );
    }

    #[tokio::test]
    async fn test_already_linking() {
        let (router, _) = setup();
        let sender = sender(ChannelKind::Private);

        let first = router.dispatch(&sender, "!d link").await;
        assert_eq!(first.replies.len(), 1);

        let second = router.dispatch(&sender, "!d link").await;
        assert_eq!(
            second.replies,
            vec![Reply::Channel("You are already in the process of linking!".into())]
        );
    }
}
