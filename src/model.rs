use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Longest display name the destination accepts in a masquerade.
pub const MASQUERADE_NAME_MAX: usize = 32;

/// Embed type vocabulary on the source platform. Kinds that are very likely
/// auto-generated previews of a URL already present in the message text get
/// suppressed by the formatter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbedKind {
    Link,
    Video,
    Article,
    Image,
    Gifv,
    Other,
}

impl EmbedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedKind::Link => "link",
            EmbedKind::Video => "video",
            EmbedKind::Article => "article",
            EmbedKind::Image => "image",
            EmbedKind::Gifv => "gifv",
            EmbedKind::Other => "other",
        }
    }

    /// True for kinds the source platform attaches as link previews.
    pub fn is_preview(&self) -> bool {
        !matches!(self, EmbedKind::Other)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAuthor {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceAttachment {
    pub url: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEmbed {
    pub kind: EmbedKind,
    pub url: Option<String>,
}

/// Inline copy of another message's content carried by a forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardSnapshot {
    pub content: Option<String>,
    pub attachment_urls: Vec<String>,
}

/// A user-mention token occurring in a message body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMention {
    pub id: String,
    pub display_name: String,
}

/// One message as read from the source platform. Never mutated after being
/// read; consumed once by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceMessage {
    /// Opaque, stable, monotonically increasing with send order.
    pub id: String,
    pub author: SourceAuthor,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<SourceAttachment>,
    pub embeds: Vec<SourceEmbed>,
    /// Identifier of the message this one replies to, when it is a reply.
    pub reply_to: Option<String>,
    pub snapshots: Vec<ForwardSnapshot>,
    pub mentions: Vec<SourceMention>,
}

/// Message id → display name used at migration time. Grows monotonically as
/// the orchestrator processes each message in order, so reply references
/// to earlier messages always resolve within the same run.
#[derive(Debug, Clone, Default)]
pub struct AuthorCache {
    names: HashMap<String, String>,
}

impl AuthorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, message_id: &str, author: &str) {
        self.names.insert(message_id.to_string(), author.to_string());
    }

    pub fn lookup(&self, message_id: &str) -> Option<&str> {
        self.names.get(message_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Name/avatar override attributing a posted message to a source author
/// without a destination-side account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Masquerade {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl Masquerade {
    pub fn new(name: &str, avatar: Option<String>) -> Self {
        let name = name.chars().take(MASQUERADE_NAME_MAX).collect();
        Self { name, avatar }
    }
}

/// The unit posted to the destination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePayload {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub masquerade: Option<Masquerade>,
}

/// Source→destination id mappings built by the structure cloner.
/// Lives for one run; cross-run idempotence relies on name matching.
#[derive(Debug, Clone, Default)]
pub struct StructureMapping {
    pub roles: HashMap<String, String>,
    pub channels: HashMap<String, String>,
}

/// Outcome counters for a migration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}
