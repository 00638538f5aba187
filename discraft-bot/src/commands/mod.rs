//! Prefix commands typed in Discord.
//!
//! A message is a command when it starts with the configured prefix (any case)
//! followed by whitespace, e.g. `!discraft lang fr`. The router resolves the
//! label, checks where the command may be used and runs it. Whatever happens
//! inside a handler, including a panic, stays inside the router.

mod help;
mod lang;
mod link;
mod register;

pub use help::HelpCommand;
pub use lang::LangCommand;
pub use link::LinkCommand;
pub use register::RegisterCommand;

use crate::discord::format::mention;
use crate::lang::BotTexts;
use crate::message::{ChannelKind, ChannelMessage, Identity, OutgoingMessage};
use async_trait::async_trait;
use discraft_common::validation::validate_prefix;
use discraft_common::{Error, Result};
use futures_util::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Where a command may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Any,
    PrivateOnly,
    GroupOnly,
}

impl Location {
    pub fn allows(self, kind: ChannelKind) -> bool {
        match self {
            Self::Any => true,
            Self::PrivateOnly => kind == ChannelKind::Private,
            Self::GroupOnly => kind == ChannelKind::Guild,
        }
    }
}

/// Author of a command message and where it was sent.
#[derive(Debug, Clone)]
pub struct Sender {
    pub identity: Identity,
    pub name: String,
    pub channel_id: String,
    pub channel_kind: ChannelKind,
    pub is_bot: bool,
}

impl From<&ChannelMessage> for Sender {
    fn from(msg: &ChannelMessage) -> Self {
        Self {
            identity: msg.author,
            name: msg.author_name.clone(),
            channel_id: msg.channel_id.clone(),
            channel_kind: msg.channel_kind,
            is_bot: msg.author_is_bot,
        }
    }
}

/// Text produced by dispatch, to be delivered to the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Answer in the channel the command came from.
    Channel(String),
    /// Direct message to the sender.
    Direct(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Self::Channel(text) | Self::Direct(text) => text,
        }
    }

    /// Outgoing message for `sender`. Guild answers mention the sender.
    pub fn into_outgoing(self, sender: &Sender) -> OutgoingMessage {
        match self {
            Self::Channel(text) => {
                let text = match sender.channel_kind {
                    ChannelKind::Guild => format!("{} {text}", mention(sender.identity.get())),
                    ChannelKind::Private => text,
                };
                OutgoingMessage::to_channel(sender.channel_id.clone(), text)
            }
            Self::Direct(text) => OutgoingMessage::direct(sender.identity, text),
        }
    }
}

/// Everything a handler gets to work with.
pub struct CommandContext<'a> {
    pub sender: &'a Sender,
    /// Prefix as configured, for usage hints.
    pub prefix: &'a str,
    /// Label as typed by the sender.
    pub label: &'a str,
    /// Text after the label, leading whitespace removed.
    pub args_text: &'a str,
    /// `args_text` split on whitespace.
    pub args: Vec<&'a str>,
    pub texts: &'a BotTexts,
    commands: &'a [Arc<dyn Command>],
    replies: Vec<Reply>,
}

impl CommandContext<'_> {
    pub fn reply(&mut self, text: impl Into<String>) {
        self.replies.push(Reply::Channel(text.into()));
    }

    pub fn reply_direct(&mut self, text: impl Into<String>) {
        self.replies.push(Reply::Direct(text.into()));
    }

    /// Registered commands, in registration order.
    pub fn commands(&self) -> &[Arc<dyn Command>] {
        self.commands
    }
}

/// A chat command.
#[async_trait]
pub trait Command: Send + Sync {
    /// Primary name.
    fn label(&self) -> &str;

    /// Alternative names.
    fn aliases(&self) -> &[&str] {
        &[]
    }

    /// Argument synopsis shown by `help`, without prefix or label.
    fn usage(&self) -> &str {
        ""
    }

    fn description(&self) -> &str;

    fn location(&self) -> Location {
        Location::Any
    }

    async fn execute(&self, ctx: &mut CommandContext<'_>) -> anyhow::Result<()>;
}

/// How a dispatch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not addressed to the bot.
    NotCommand,
    /// Sent by a bot account.
    IgnoredBot,
    /// Prefix without a label.
    MissingLabel,
    Unknown { label: String },
    WrongLocation { label: String, required: Location },
    Executed { label: String },
    Failed { label: String },
}

/// Result of [`CommandRouter::dispatch`].
#[derive(Debug)]
pub struct Dispatch {
    pub outcome: DispatchOutcome,
    pub replies: Vec<Reply>,
}

impl Dispatch {
    fn silent(outcome: DispatchOutcome) -> Self {
        Self {
            outcome,
            replies: Vec::new(),
        }
    }

    fn answer(outcome: DispatchOutcome, text: String) -> Self {
        Self {
            outcome,
            replies: vec![Reply::Channel(text)],
        }
    }
}

/// Routes prefixed messages to registered commands.
pub struct CommandRouter {
    prefix: String,
    texts: BotTexts,
    commands: Vec<Arc<dyn Command>>,
    lookup: HashMap<String, usize>,
}

impl CommandRouter {
    /// Fails with `Config` when the prefix is empty or contains whitespace.
    pub fn new(prefix: &str, texts: BotTexts) -> Result<Self> {
        validate_prefix(prefix).map_err(|e| Error::Config(e.to_string()))?;
        Ok(Self {
            prefix: prefix.to_string(),
            texts,
            commands: Vec::new(),
            lookup: HashMap::new(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Add a command. Labels and aliases are unique regardless of case.
    pub fn register(&mut self, command: Arc<dyn Command>) -> Result<()> {
        let mut names: Vec<String> = Vec::with_capacity(command.aliases().len() + 1);
        for name in std::iter::once(command.label()).chain(command.aliases().iter().copied()) {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(Error::Config(format!("invalid command name: {name:?}")));
            }
            let name = name.to_lowercase();
            if self.lookup.contains_key(&name) || names.contains(&name) {
                return Err(Error::Conflict(format!("command name already registered: {name}")));
            }
            names.push(name);
        }

        let index = self.commands.len();
        self.commands.push(command);
        for name in names {
            self.lookup.insert(name, index);
        }
        Ok(())
    }

    pub fn commands(&self) -> &[Arc<dyn Command>] {
        &self.commands
    }

    /// Look up a command by label or alias, ignoring case.
    pub fn find(&self, name: &str) -> Option<&Arc<dyn Command>> {
        self.lookup
            .get(&name.to_lowercase())
            .map(|&i| &self.commands[i])
    }

    /// Run the command in `raw`, if it is one.
    pub async fn dispatch(&self, sender: &Sender, raw: &str) -> Dispatch {
        if sender.is_bot {
            return Dispatch::silent(DispatchOutcome::IgnoredBot);
        }

        let Some(rest) = self.strip_prefix(raw) else {
            return Dispatch::silent(DispatchOutcome::NotCommand);
        };
        if rest.is_empty() {
            return Dispatch::answer(DispatchOutcome::MissingLabel, self.texts.get("command.specify"));
        }

        let (label, args_text) = match rest.split_once(char::is_whitespace) {
            Some((label, args)) => (label, args.trim_start()),
            None => (rest, ""),
        };

        let Some(command) = self.find(label) else {
            tracing::debug!(user = %sender.identity, label, "Unknown command");
            return Dispatch::answer(
                DispatchOutcome::Unknown {
                    label: label.to_string(),
                },
                self.texts.format("command.unknown", &[label, self.prefix.as_str()]),
            );
        };
        let canonical = command.label().to_string();

        let required = command.location();
        if !required.allows(sender.channel_kind) {
            let key = match required {
                Location::PrivateOnly => "command.private_only",
                _ => "command.group_only",
            };
            return Dispatch::answer(
                DispatchOutcome::WrongLocation {
                    label: canonical,
                    required,
                },
                self.texts.get(key),
            );
        }

        let mut ctx = CommandContext {
            sender,
            prefix: &self.prefix,
            label,
            args_text,
            args: args_text.split_whitespace().collect(),
            texts: &self.texts,
            commands: &self.commands,
            replies: Vec::new(),
        };

        tracing::debug!(user = %sender.identity, command = %canonical, "Executing command");
        let result = AssertUnwindSafe(command.execute(&mut ctx)).catch_unwind().await;
        let mut replies = ctx.replies;

        let outcome = match result {
            Ok(Ok(())) => DispatchOutcome::Executed { label: canonical },
            Ok(Err(e)) => {
                tracing::error!(
                    user = %sender.identity,
                    command = %canonical,
                    error = ?e,
                    "Command failed"
                );
                replies = vec![Reply::Channel(self.texts.get("command.error"))];
                DispatchOutcome::Failed { label: canonical }
            }
            Err(panic) => {
                tracing::error!(
                    user = %sender.identity,
                    command = %canonical,
                    panic = panic_message(panic.as_ref()),
                    "Command panicked"
                );
                replies = vec![Reply::Channel(self.texts.get("command.error"))];
                DispatchOutcome::Failed { label: canonical }
            }
        };

        Dispatch { outcome, replies }
    }

    /// Text after the prefix and its separator, trimmed at the start.
    ///
    /// `Some("")` means the prefix stood alone.
    fn strip_prefix<'t>(&self, raw: &'t str) -> Option<&'t str> {
        let mut chars = raw.char_indices();
        let mut end = 0;
        for expected in self.prefix.chars() {
            let (i, c) = chars.next()?;
            if !c.to_lowercase().eq(expected.to_lowercase()) {
                return None;
            }
            end = i + c.len_utf8();
        }
        let rest = &raw[end..];
        match rest.chars().next() {
            None => Some(rest),
            Some(c) if c.is_whitespace() => Some(rest.trim_start()),
            Some(_) => None,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
