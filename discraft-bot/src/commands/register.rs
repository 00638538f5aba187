//! `register`: create a user record for the sender.

use super::{Command, CommandContext};
use crate::session::SessionCache;
use async_trait::async_trait;
use std::sync::Arc;

pub struct RegisterCommand {
    sessions: Arc<SessionCache>,
}

impl RegisterCommand {
    pub fn new(sessions: Arc<SessionCache>) -> Self {
        Self { sessions }
    }
}

#[async_trait]
impl Command for RegisterCommand {
    fn label(&self) -> &str {
        "register"
    }

    fn description(&self) -> &str {
        "Registers you with Discraft"
    }

    async fn execute(&self, ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        match self.sessions.create_user(ctx.sender.identity).await {
            Ok(_user) => ctx.reply(ctx.texts.get("register.success")),
            Err(e) if e.is_conflict() => ctx.reply(ctx.texts.get("register.already")),
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
