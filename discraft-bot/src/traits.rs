//! Channel traits for chat platform adapters.

use crate::message::{ChannelMessage, OutgoingMessage};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Channel error type.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Message send failed: {0}")]
    SendFailed(String),

    #[error("Channel not ready")]
    NotReady,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Chat platform adapter.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Get the channel name.
    fn name(&self) -> &'static str;

    /// Send a message. Returns the platform message id of the last chunk.
    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String>;

    /// Listen for inbound messages and forward them into `tx` until the
    /// connection closes or the receiver is dropped.
    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> ChannelResult<()>;

    /// Check if the channel is healthy.
    async fn health_check(&self) -> ChannelResult<()>;

    /// Show `activity` as what the bot is playing; `None` clears it.
    async fn set_presence(&self, _activity: Option<String>) -> ChannelResult<()> {
        Err(ChannelError::NotReady)
    }
}

/// Channel that records everything sent through it and never receives.
///
/// Stands in for a chat connection in tests.
#[derive(Default)]
pub struct RecordingChannel {
    sent: std::sync::Mutex<Vec<OutgoingMessage>>,
    presence: std::sync::Mutex<Option<String>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<OutgoingMessage> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Activity last set through [`Channel::set_presence`].
    pub fn presence(&self) -> Option<String> {
        self.presence.lock().ok().and_then(|p| p.clone())
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|e| ChannelError::Internal(e.to_string()))?;
        sent.push(message);
        Ok(sent.len().to_string())
    }

    async fn listen(&self, _tx: mpsc::Sender<ChannelMessage>) -> ChannelResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> ChannelResult<()> {
        Ok(())
    }

    async fn set_presence(&self, activity: Option<String>) -> ChannelResult<()> {
        *self
            .presence
            .lock()
            .map_err(|e| ChannelError::Internal(e.to_string()))? = activity;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Identity, Recipient};

    #[tokio::test]
    async fn test_recording_channel_keeps_messages() {
        let channel = RecordingChannel::new();
        let id = channel
            .send(OutgoingMessage::direct(Identity(1), "one"))
            .await
            .unwrap();
        assert_eq!(id, "1");
        channel
            .send(OutgoingMessage::to_channel("c", "two"))
            .await
            .unwrap();

        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].recipient, Recipient::Direct { user: Identity(1) });
        assert_eq!(sent[1].text, "two");
    }

    #[tokio::test]
    async fn test_recording_channel_health() {
        let channel = RecordingChannel::new();
        assert_eq!(channel.name(), "recording");
        assert!(channel.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_recording_channel_presence() {
        let channel = RecordingChannel::new();
        assert_eq!(channel.presence(), None);

        channel.set_presence(Some("Minecraft".into())).await.unwrap();
        assert_eq!(channel.presence().as_deref(), Some("Minecraft"));

        channel.set_presence(None).await.unwrap();
        assert_eq!(channel.presence(), None);
    }
}
