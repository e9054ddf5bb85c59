//! Source-platform collaborator: resolve a channel, pull its full history
//! oldest-first, and read the server structure the cloner replicates.
//! Consumed through the [`ChatSource`] trait; [`DiscordSource`] is the REST
//! implementation.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::model::{
    EmbedKind, ForwardSnapshot, SourceAttachment, SourceAuthor, SourceEmbed, SourceMention,
    SourceMessage,
};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
const HISTORY_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct SourceRole {
    pub id: String,
    pub name: String,
    pub permissions: u64,
    /// 24-bit RGB; zero means unset.
    pub color: u32,
    pub hoist: bool,
    pub position: i64,
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceChannelKind {
    Text,
    Voice,
    Category,
    Other,
}

#[derive(Debug, Clone)]
pub struct SourceChannel {
    pub id: String,
    pub name: String,
    pub kind: SourceChannelKind,
    pub parent_id: Option<String>,
    pub position: i64,
    pub topic: Option<String>,
}

/// Role and channel hierarchy of the source server.
#[derive(Debug, Clone)]
pub struct SourceStructure {
    pub server_name: String,
    pub roles: Vec<SourceRole>,
    pub channels: Vec<SourceChannel>,
}

#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Establish/verify the session. Returns the bot identity name.
    /// Failure here is fatal to the run.
    async fn connect(&self) -> Result<String>;

    async fn channel_name(&self, channel_id: &str) -> Result<String>;

    /// Complete message list for a channel, oldest first.
    async fn fetch_history(&self, channel_id: &str) -> Result<Vec<SourceMessage>>;

    async fn fetch_structure(&self, server_id: &str) -> Result<SourceStructure>;

    /// Release the session. Always invoked, including after errors.
    async fn close(&self);
}

pub struct DiscordSource {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl DiscordSource {
    pub fn new(token: &str) -> Self {
        Self::with_base_url(token, DISCORD_API_BASE)
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("stoat-porter/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    async fn get_as<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .http
            .get(&url)
            .header("Authorization", format!("Bot {}", self.token))
            .send()
            .await
            .with_context(|| format!("failed to reach source API at {path}"))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("source API error {status} for {path}: {body}"));
        }
        res.json::<T>()
            .await
            .with_context(|| format!("invalid source API response for {path}"))
    }
}

#[async_trait]
impl ChatSource for DiscordSource {
    async fn connect(&self) -> Result<String> {
        let me: WireUser = self
            .get_as("/users/@me")
            .await
            .context("source connect failed")?;
        let name = me.display_name();
        info!(bot = %name, "connected to source platform");
        Ok(name)
    }

    async fn channel_name(&self, channel_id: &str) -> Result<String> {
        let channel: Value = self.get_as(&format!("/channels/{channel_id}")).await?;
        Ok(channel
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("channel")
            .to_string())
    }

    async fn fetch_history(&self, channel_id: &str) -> Result<Vec<SourceMessage>> {
        let mut messages: Vec<SourceMessage> = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut path = format!("/channels/{channel_id}/messages?limit={HISTORY_PAGE_SIZE}");
            if let Some(cursor) = &after {
                path.push_str(&format!("&after={cursor}"));
            }
            let page: Vec<WireMessage> = self.get_as(&path).await?;
            let page_len = page.len();
            if page_len == 0 {
                break;
            }

            let mut converted: Vec<SourceMessage> =
                page.into_iter().map(convert_message).collect();
            // Pages arrive newest-first; migration order is oldest-first.
            converted.sort_by_key(|m| send_order_key(&m.id));
            after = converted.last().map(|m| m.id.clone());
            messages.extend(converted);

            if page_len < HISTORY_PAGE_SIZE {
                break;
            }
        }

        Ok(messages)
    }

    async fn fetch_structure(&self, server_id: &str) -> Result<SourceStructure> {
        let guild: WireGuild = self
            .get_as(&format!("/guilds/{server_id}"))
            .await
            .context("source server not found")?;
        let channels: Vec<WireChannel> = self
            .get_as(&format!("/guilds/{server_id}/channels"))
            .await
            .context("failed to list source channels")?;

        let roles = guild
            .roles
            .into_iter()
            .map(|r| {
                let is_default = r.id == server_id;
                SourceRole {
                    permissions: r.permissions.parse().unwrap_or(0),
                    color: r.color,
                    hoist: r.hoist,
                    position: r.position,
                    is_default,
                    id: r.id,
                    name: r.name,
                }
            })
            .collect();

        let channels = channels
            .into_iter()
            .map(|c| SourceChannel {
                kind: channel_kind(c.channel_type),
                id: c.id,
                name: c.name,
                parent_id: c.parent_id,
                position: c.position,
                topic: c.topic,
            })
            .collect();

        Ok(SourceStructure {
            server_name: guild.name,
            roles,
            channels,
        })
    }

    async fn close(&self) {
        // REST session holds no server-side state; nothing to release.
        info!("source session released");
    }
}

/// Sort key preserving numeric order of decimal string identifiers.
fn send_order_key(id: &str) -> (usize, String) {
    (id.len(), id.to_string())
}

fn embed_kind(tag: Option<&str>) -> EmbedKind {
    match tag {
        Some("link") => EmbedKind::Link,
        Some("video") => EmbedKind::Video,
        Some("article") => EmbedKind::Article,
        Some("image") => EmbedKind::Image,
        Some("gifv") => EmbedKind::Gifv,
        _ => EmbedKind::Other,
    }
}

fn channel_kind(channel_type: u8) -> SourceChannelKind {
    match channel_type {
        0 => SourceChannelKind::Text,
        2 => SourceChannelKind::Voice,
        4 => SourceChannelKind::Category,
        _ => SourceChannelKind::Other,
    }
}

fn convert_message(wire: WireMessage) -> SourceMessage {
    let author = SourceAuthor {
        display_name: wire.author.display_name(),
        avatar_url: wire.author.avatar_url(),
    };
    let attachments = wire
        .attachments
        .into_iter()
        .map(|a| SourceAttachment {
            url: a.url,
            filename: a.filename,
        })
        .collect();
    let embeds = wire
        .embeds
        .into_iter()
        .map(|e| SourceEmbed {
            kind: embed_kind(e.kind.as_deref()),
            url: e.url,
        })
        .collect();
    let snapshots = wire
        .message_snapshots
        .into_iter()
        .map(|s| ForwardSnapshot {
            content: s.message.content.filter(|c| !c.is_empty()),
            attachment_urls: s
                .message
                .attachments
                .into_iter()
                .map(|a| a.url)
                .collect(),
        })
        .collect();
    let mentions = wire
        .mentions
        .into_iter()
        .map(|u| SourceMention {
            display_name: u.display_name(),
            id: u.id,
        })
        .collect();

    SourceMessage {
        id: wire.id,
        author,
        content: wire.content,
        timestamp: wire.timestamp,
        attachments,
        embeds,
        reply_to: wire.message_reference.and_then(|r| r.message_id),
        snapshots,
        mentions,
    }
}

#[derive(Deserialize, Debug)]
struct WireUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

impl WireUser {
    fn display_name(&self) -> String {
        self.global_name
            .clone()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| self.username.clone())
    }

    fn avatar_url(&self) -> Option<String> {
        self.avatar
            .as_deref()
            .map(|hash| format!("https://cdn.discordapp.com/avatars/{}/{hash}.png", self.id))
    }
}

#[derive(Deserialize, Debug)]
struct WireAttachment {
    url: String,
    filename: String,
}

#[derive(Deserialize, Debug)]
struct WireEmbed {
    #[serde(rename = "type")]
    kind: Option<String>,
    url: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WireReference {
    message_id: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WireSnapshotMessage {
    content: Option<String>,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
}

#[derive(Deserialize, Debug)]
struct WireSnapshot {
    message: WireSnapshotMessage,
}

#[derive(Deserialize, Debug)]
struct WireMessage {
    id: String,
    author: WireUser,
    #[serde(default)]
    content: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    attachments: Vec<WireAttachment>,
    #[serde(default)]
    embeds: Vec<WireEmbed>,
    #[serde(default)]
    message_reference: Option<WireReference>,
    #[serde(default)]
    message_snapshots: Vec<WireSnapshot>,
    #[serde(default)]
    mentions: Vec<WireUser>,
}

#[derive(Deserialize, Debug)]
struct WireRole {
    id: String,
    name: String,
    permissions: String,
    color: u32,
    hoist: bool,
    position: i64,
}

#[derive(Deserialize, Debug)]
struct WireGuild {
    name: String,
    #[serde(default)]
    roles: Vec<WireRole>,
}

#[derive(Deserialize, Debug)]
struct WireChannel {
    id: String,
    name: String,
    #[serde(rename = "type")]
    channel_type: u8,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    position: i64,
    #[serde(default)]
    topic: Option<String>,
}
