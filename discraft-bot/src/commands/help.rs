//! `help`: list the registered commands.

use super::{Command, CommandContext};
use async_trait::async_trait;

pub struct HelpCommand;

#[async_trait]
impl Command for HelpCommand {
    fn label(&self) -> &str {
        "help"
    }

    fn aliases(&self) -> &[&str] {
        &["?"]
    }

    fn description(&self) -> &str {
        "Lists the available commands"
    }

    async fn execute(&self, ctx: &mut CommandContext<'_>) -> anyhow::Result<()> {
        let mut text = ctx.texts.get("help.header");
        for command in ctx.commands() {
            let synopsis = match command.usage() {
                "" => command.label().to_string(),
                usage => format!("{} {usage}", command.label()),
            };
            let line = ctx
                .texts
                .format("help.line", &[ctx.prefix, synopsis.as_str(), command.description()]);
            text.push('\n');
            text.push_str(&line);
        }
        ctx.reply(text);
        Ok(())
    }
}
