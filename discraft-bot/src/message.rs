//! Message types for chat communication.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric id of a Discord account; the key for all per-user state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(pub u64);

impl Identity {
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identity {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

impl From<u64> for Identity {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Where a message was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Direct message with the bot
    Private,
    /// Text channel in a guild
    Guild,
}

impl ChannelKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Guild => "guild",
        }
    }
}

/// Inbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Message ID
    pub id: String,
    /// Channel the message was posted in
    pub channel_id: String,
    /// Private or guild channel
    pub channel_kind: ChannelKind,
    /// Author account
    pub author: Identity,
    /// Author display name
    pub author_name: String,
    /// Whether the author is a bot account
    #[serde(default)]
    pub author_is_bot: bool,
    /// Raw message text
    pub text: String,
    /// Timestamp (Unix millis)
    pub timestamp: i64,
}

/// Destination of an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Recipient {
    /// An existing channel
    Channel { channel_id: String },
    /// A user's direct-message channel
    Direct { user: Identity },
}

/// Outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub recipient: Recipient,
    pub text: String,
}

impl OutgoingMessage {
    pub fn to_channel(channel_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            recipient: Recipient::Channel {
                channel_id: channel_id.into(),
            },
            text: text.into(),
        }
    }

    pub fn direct(user: Identity, text: impl Into<String>) -> Self {
        Self {
            recipient: Recipient::Direct { user },
            text: text.into(),
        }
    }
}
