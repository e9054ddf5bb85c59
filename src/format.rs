//! Turns one source message into a destination-ready text body.
//!
//! Pure and deterministic: the same message and cache always produce the same
//! output. Parts are emitted in fixed precedence (reply annotation, forward
//! snapshots, embeds, main body) and joined with newlines; empty output is
//! legal here, the orchestrator substitutes its placeholder.
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::model::{AuthorCache, SourceMessage};

static MENTION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<@!?(\d+)>").expect("mention regex"));

pub fn format_message(msg: &SourceMessage, authors: &AuthorCache) -> String {
    let mut parts: Vec<String> = Vec::new();
    let clean = resolve_mentions(msg);

    // Forwards take precedence over the reply rendering: a forwarded message
    // is never simultaneously annotated as a reply.
    if msg.snapshots.is_empty() {
        if let Some(reply_to) = msg.reply_to.as_deref() {
            match authors.lookup(reply_to) {
                Some(author) => parts.push(format!("> Replying to {author}")),
                None => parts.push("> Replying to a message".to_string()),
            }
        }
    }

    for snapshot in &msg.snapshots {
        let text = snapshot
            .content
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        if text.is_none() && snapshot.attachment_urls.is_empty() {
            warn!(message_id = %msg.id, "skipping forward snapshot with no content");
            continue;
        }
        if let Some(text) = text {
            let quoted = text.replace('\n', "\n> ");
            parts.push(format!("> **Forwarded Message**\n> {quoted}"));
        }
        for url in &snapshot.attachment_urls {
            parts.push(format!("> Forwarded attachment: {url}"));
        }
    }

    let mut emitted_urls: Vec<&str> = Vec::new();
    for embed in &msg.embeds {
        // A preview-kind embed on a message that already has text is almost
        // certainly the unfurl of a URL in that text; drop it entirely.
        if !clean.is_empty() && embed.kind.is_preview() {
            continue;
        }
        if let Some(url) = embed.url.as_deref() {
            if clean.contains(url) || emitted_urls.contains(&url) {
                continue;
            }
            emitted_urls.push(url);
            parts.push(url.to_string());
        }
    }

    if !clean.is_empty() {
        parts.push(clean);
    }

    parts.join("\n")
}

/// Replace raw user-mention tokens with the mentioned user's display name.
/// Tokens for users absent from the message's mention list are left as-is.
fn resolve_mentions(msg: &SourceMessage) -> String {
    MENTION_RE
        .replace_all(&msg.content, |caps: &regex::Captures<'_>| {
            let id = &caps[1];
            msg.mentions
                .iter()
                .find(|m| m.id == id)
                .map(|m| format!("@{}", m.display_name))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .trim()
        .to_string()
}
