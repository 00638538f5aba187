//! Discord adapter.
//!
//! Inbound messages arrive over the Gateway WebSocket (identify, heartbeat and
//! `MESSAGE_CREATE` only); replies and direct messages go out over REST v10.

pub mod format;

use crate::message::{ChannelKind, ChannelMessage, Identity, OutgoingMessage, Recipient};
use crate::traits::{Channel, ChannelError, ChannelResult};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;

const API_BASE: &str = "https://discord.com/api/v10";

/// GUILDS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
pub const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 9) | (1 << 12) | (1 << 15);

const DEFAULT_HEARTBEAT_MS: u64 = 41_250;

/// Discord bot connection.
pub struct DiscordChannel {
    bot_token: String,
    api_base: String,
    client: Client,
    dm_channels: DashMap<Identity, String>,
    /// Current activity; sent on identify and whenever it changes
    presence: watch::Sender<Option<String>>,
}

impl DiscordChannel {
    pub fn new(bot_token: String) -> Self {
        Self::with_api_base(bot_token, API_BASE)
    }

    pub fn with_api_base(bot_token: String, api_base: &str) -> Self {
        Self {
            bot_token,
            api_base: api_base.trim_end_matches('/').to_string(),
            client: Client::new(),
            dm_channels: DashMap::new(),
            presence: watch::Sender::new(None),
        }
    }

    fn auth(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    /// Direct-message channel with `user`, opened once and remembered.
    async fn dm_channel(&self, user: Identity) -> ChannelResult<String> {
        if let Some(id) = self.dm_channels.get(&user) {
            return Ok(id.clone());
        }

        let resp = self
            .client
            .post(format!("{}/users/@me/channels", self.api_base))
            .header("Authorization", self.auth())
            .json(&json!({ "recipient_id": user.to_string() }))
            .send()
            .await
            .map_err(|e| ChannelError::SendFailed(format!("Failed to open DM channel: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let error = resp.text().await.unwrap_or_default();
            return Err(ChannelError::SendFailed(format!(
                "Discord API error opening DM ({status}): {error}"
            )));
        }

        let data: Value = resp
            .json()
            .await
            .map_err(|e| ChannelError::Internal(format!("Failed to parse response: {e}")))?;
        let id = data
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Internal("DM channel response without id".into()))?
            .to_string();

        self.dm_channels.insert(user, id.clone());
        Ok(id)
    }

    async fn post_message(&self, channel_id: &str, text: &str) -> ChannelResult<String> {
        let mut last_message_id = String::new();

        for chunk in format::split_message(text) {
            let resp = self
                .client
                .post(format!("{}/channels/{channel_id}/messages", self.api_base))
                .header("Authorization", self.auth())
                .json(&json!({ "content": chunk }))
                .send()
                .await
                .map_err(|e| ChannelError::SendFailed(format!("Discord send error: {e}")))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let error = resp.text().await.unwrap_or_default();
                return Err(ChannelError::SendFailed(format!(
                    "Discord API error ({status}): {error}"
                )));
            }

            let data: Value = resp
                .json()
                .await
                .map_err(|e| ChannelError::Internal(format!("Failed to parse response: {e}")))?;
            last_message_id = data
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
        }

        Ok(last_message_id)
    }
}

/// Presence data (`d` of opcode 3) showing the bot as playing `activity`.
pub fn presence_payload(activity: Option<&str>) -> Value {
    let activities = match activity {
        Some(name) => json!([{ "name": name, "type": 0 }]),
        None => json!([]),
    };
    json!({
        "since": null,
        "activities": activities,
        "status": "online",
        "afk": false
    })
}

/// Build a [`ChannelMessage`] from a `MESSAGE_CREATE` payload.
///
/// Messages without a guild id come from direct-message channels.
pub fn parse_message_create(d: &Value) -> Option<ChannelMessage> {
    let author = d.get("author")?;
    let author_id: Identity = author.get("id")?.as_str()?.parse().ok()?;
    let text = d.get("content").and_then(Value::as_str).unwrap_or("");
    if text.is_empty() {
        return None;
    }

    let author_name = author
        .get("global_name")
        .and_then(Value::as_str)
        .or_else(|| author.get("username").and_then(Value::as_str))
        .unwrap_or("")
        .to_string();
    let channel_kind = match d.get("guild_id").and_then(Value::as_str) {
        Some(_) => ChannelKind::Guild,
        None => ChannelKind::Private,
    };

    Some(ChannelMessage {
        id: d.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
        channel_id: d.get("channel_id")?.as_str()?.to_string(),
        channel_kind,
        author: author_id,
        author_name,
        author_is_bot: author.get("bot").and_then(Value::as_bool).unwrap_or(false),
        text: text.to_string(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, message: OutgoingMessage) -> ChannelResult<String> {
        let channel_id = match &message.recipient {
            Recipient::Channel { channel_id } => channel_id.clone(),
            Recipient::Direct { user } => self.dm_channel(*user).await?,
        };
        self.post_message(&channel_id, &message.text).await
    }

    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> ChannelResult<()> {
        let gw_resp: Value = self
            .client
            .get(format!("{}/gateway/bot", self.api_base))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Failed to get gateway: {e}")))?
            .json()
            .await
            .map_err(|e| ChannelError::Connection(format!("Invalid gateway response: {e}")))?;

        let gw_url = gw_resp
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("wss://gateway.discord.gg");
        let ws_url = format!("{gw_url}/?v=10&encoding=json");
        tracing::info!("Discord: connecting to gateway...");

        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .map_err(|e| ChannelError::Connection(format!("WebSocket connection failed: {e}")))?;
        let (mut write, mut read) = ws_stream.split();

        // Hello (opcode 10)
        let hello = read
            .next()
            .await
            .ok_or_else(|| ChannelError::Connection("No hello from gateway".into()))?
            .map_err(|e| ChannelError::Connection(format!("WebSocket error: {e}")))?;
        let hello_data: Value = serde_json::from_str(&hello.to_string())
            .map_err(|e| ChannelError::Connection(format!("Invalid hello: {e}")))?;
        let heartbeat_interval = hello_data
            .get("d")
            .and_then(|d| d.get("heartbeat_interval"))
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_HEARTBEAT_MS);

        let mut presence = self.presence.subscribe();
        let initial_presence = presence_payload(presence.borrow_and_update().as_deref());

        // Identify (opcode 2)
        let identify = json!({
            "op": 2,
            "d": {
                "token": self.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "discraft",
                    "device": "discraft"
                },
                "presence": initial_presence
            }
        });
        write
            .send(Message::Text(identify.to_string()))
            .await
            .map_err(|e| ChannelError::Auth(format!("Failed to identify: {e}")))?;
        tracing::info!("Discord: connected and identified");

        let mut heartbeat =
            tokio::time::interval(std::time::Duration::from_millis(heartbeat_interval));
        let mut sequence: Option<u64> = None;

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    let hb = json!({ "op": 1, "d": sequence });
                    if write.send(Message::Text(hb.to_string())).await.is_err() {
                        return Err(ChannelError::Connection("Heartbeat failed".into()));
                    }
                }
                Ok(()) = presence.changed() => {
                    let update = json!({
                        "op": 3,
                        "d": presence_payload(presence.borrow_and_update().as_deref())
                    });
                    if write.send(Message::Text(update.to_string())).await.is_err() {
                        return Err(ChannelError::Connection("Presence update failed".into()));
                    }
                    tracing::debug!("Discord: presence updated");
                }
                msg = read.next() => {
                    let raw = match msg {
                        Some(Ok(Message::Text(t))) => t,
                        Some(Ok(Message::Close(frame))) => {
                            return Err(ChannelError::Connection(format!("Gateway closed: {frame:?}")));
                        }
                        None => return Err(ChannelError::Connection("Gateway stream ended".into())),
                        Some(Err(e)) => return Err(ChannelError::Connection(format!("WebSocket error: {e}"))),
                        Some(Ok(_)) => continue,
                    };

                    let Ok(event) = serde_json::from_str::<Value>(&raw) else {
                        continue;
                    };
                    if let Some(s) = event.get("s").and_then(Value::as_u64) {
                        sequence = Some(s);
                    }

                    match event.get("op").and_then(Value::as_u64) {
                        Some(0) => {}
                        Some(7) => return Err(ChannelError::Connection("Gateway requested reconnect".into())),
                        Some(9) => return Err(ChannelError::Auth("Gateway session invalidated".into())),
                        _ => continue,
                    }
                    if event.get("t").and_then(Value::as_str) != Some("MESSAGE_CREATE") {
                        continue;
                    }
                    let Some(message) = event.get("d").and_then(parse_message_create) else {
                        continue;
                    };

                    tracing::debug!(
                        channel = "discord",
                        user_id = %message.author,
                        chat_id = %message.channel_id,
                        kind = message.channel_kind.as_str(),
                        "Message received"
                    );

                    if tx.send(message).await.is_err() {
                        tracing::info!("Discord: message queue closed, stopping listener");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn health_check(&self) -> ChannelResult<()> {
        let resp = self
            .client
            .get(format!("{}/users/@me", self.api_base))
            .header("Authorization", self.auth())
            .send()
            .await
            .map_err(|e| ChannelError::Connection(format!("Health check failed: {e}")))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::Auth("Discord authentication failed".into()))
        }
    }

    /// Applied on the live gateway connection, or at the next identify.
    async fn set_presence(&self, activity: Option<String>) -> ChannelResult<()> {
        self.presence.send_replace(activity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discord_channel_name() {
        let ch = DiscordChannel::new("fake".into());
        assert_eq!(ch.name(), "discord");
    }

    #[test]
    fn intents_include_direct_messages() {
        assert_eq!(GATEWAY_INTENTS, 37377);
    }

    #[test]
    fn api_base_trailing_slash() {
        let ch = DiscordChannel::with_api_base("fake".into(), "http://localhost:9/api/");
        assert_eq!(ch.api_base, "http://localhost:9/api");
    }

    #[test]
    fn presence_payload_shape() {
        let playing = presence_payload(Some("on Discraft"));
        assert_eq!(playing["activities"][0]["name"], "on Discraft");
        assert_eq!(playing["activities"][0]["type"], 0);
        assert_eq!(playing["status"], "online");
        assert!(playing["since"].is_null());

        let cleared = presence_payload(None);
        assert_eq!(cleared["activities"], json!([]));
    }

    #[tokio::test]
    async fn set_presence_is_remembered_for_identify() {
        let ch = DiscordChannel::new("fake".into());
        ch.set_presence(Some("Minecraft".into())).await.unwrap();

        let mut rx = ch.presence.subscribe();
        assert_eq!(rx.borrow_and_update().as_deref(), Some("Minecraft"));
    }

    #[test]
    fn parse_guild_message() {
        let d = json!({
            "id": "1",
            "channel_id": "200",
            "guild_id": "300",
            "content": "!discraft help",
            "author": { "id": "123456789", "username": "steve", "global_name": "Steve" }
        });
        let msg = parse_message_create(&d).unwrap();
        assert_eq!(msg.author, Identity(123_456_789));
        assert_eq!(msg.author_name, "Steve");
        assert_eq!(msg.channel_kind, ChannelKind::Guild);
        assert_eq!(msg.channel_id, "200");
        assert!(!msg.author_is_bot);
    }

    #[test]
    fn parse_direct_message_from_bot() {
        let d = json!({
            "id": "2",
            "channel_id": "201",
            "content": "hello",
            "author": { "id": "42", "username": "helper", "bot": true }
        });
        let msg = parse_message_create(&d).unwrap();
        assert_eq!(msg.channel_kind, ChannelKind::Private);
        assert_eq!(msg.author_name, "helper");
        assert!(msg.author_is_bot);
    }

    #[test]
    fn parse_skips_empty_or_malformed() {
        let empty = json!({
            "channel_id": "1", "content": "", "author": { "id": "42" }
        });
        assert!(parse_message_create(&empty).is_none());

        let bad_author = json!({
            "channel_id": "1", "content": "hi", "author": { "id": "not-a-number" }
        });
        assert!(parse_message_create(&bad_author).is_none());
    }
}
