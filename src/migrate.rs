//! End-to-end message migration: pull the full history once, then walk it
//! oldest-first, formatting, relaying attachments, and posting one message at
//! a time. Failures isolate to the smallest unit: one bad message or
//! attachment never halts the rest of the run.
use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::config;
use crate::format::format_message;
use crate::model::{AuthorCache, Masquerade, MessagePayload, MigrationStats};
use crate::relay::{Relay, BUCKET_ATTACHMENTS};
use crate::report::ProgressSink;
use crate::source::ChatSource;
use crate::stoat::StoatApi;

/// Substituted when formatting yields nothing; the destination rejects
/// empty message bodies.
pub const EMPTY_CONTENT_PLACEHOLDER: &str = "*(Attachment/Embed)*";

/// Operator gate between preview and the first destination write.
#[async_trait]
pub trait ConfirmGate: Send + Sync {
    async fn confirm(&self, summary: &str) -> Result<bool>;
}

/// Skip the prompt (server-driven and `--yes` runs).
pub struct AssumeYes;

#[async_trait]
impl ConfirmGate for AssumeYes {
    async fn confirm(&self, _summary: &str) -> Result<bool> {
        Ok(true)
    }
}

/// Interactive stdin prompt; anything but y/yes declines.
pub struct OperatorPrompt;

#[async_trait]
impl ConfirmGate for OperatorPrompt {
    async fn confirm(&self, summary: &str) -> Result<bool> {
        println!("{summary}");
        print!("Proceed? (Y/N): ");
        use std::io::Write;
        std::io::stdout().flush().ok();
        let line = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).map(|_| line)
        })
        .await
        .context("confirmation prompt interrupted")??;
        let answer = line.trim();
        Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
    }
}

pub struct Migrator<'a> {
    api: &'a dyn StoatApi,
    relay: &'a dyn Relay,
    sink: &'a dyn ProgressSink,
    migration: &'a config::Migration,
    target_channel_id: &'a str,
    cancel: CancellationToken,
    authors: AuthorCache,
    stats: MigrationStats,
}

impl<'a> Migrator<'a> {
    pub fn new(
        api: &'a dyn StoatApi,
        relay: &'a dyn Relay,
        sink: &'a dyn ProgressSink,
        migration: &'a config::Migration,
        target_channel_id: &'a str,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            relay,
            sink,
            migration,
            target_channel_id,
            cancel,
            authors: AuthorCache::new(),
            stats: MigrationStats::default(),
        }
    }

    /// Drive a full migration run. The source session is released
    /// unconditionally, including when the iteration errors out.
    #[instrument(skip_all)]
    pub async fn run(
        mut self,
        source: &dyn ChatSource,
        source_channel_id: &str,
        gate: &dyn ConfirmGate,
    ) -> Result<MigrationStats> {
        let bot = source.connect().await?;
        self.sink.emit(&format!("Connected to source as {bot}"));

        let result = self.run_inner(source, source_channel_id, gate).await;
        source.close().await;
        result
    }

    async fn run_inner(
        &mut self,
        source: &dyn ChatSource,
        source_channel_id: &str,
        gate: &dyn ConfirmGate,
    ) -> Result<MigrationStats> {
        let channel_name = source
            .channel_name(source_channel_id)
            .await
            .context("source channel not found")?;

        self.sink
            .emit(&format!("Fetching messages from source channel: #{channel_name}"));
        let messages = source
            .fetch_history(source_channel_id)
            .await
            .context("failed to fetch source history")?;

        self.stats.total = messages.len();
        self.sink
            .emit(&format!("Found {} messages. Starting migration...", messages.len()));
        if self.migration.dry_run {
            self.sink
                .emit("DRY RUN MODE - no messages will be posted to the destination");
        }

        let summary = format!(
            "Migrate {} messages from #{} to destination channel {}{}",
            messages.len(),
            channel_name,
            self.target_channel_id,
            if self.migration.dry_run { " (dry run)" } else { "" }
        );
        if !gate.confirm(&summary).await? {
            self.sink.emit("Migration cancelled by operator.");
            return Ok(self.stats);
        }

        let total = messages.len();
        for (idx, msg) in messages.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.sink.emit("Migration cancelled, stopping before next message.");
                break;
            }

            // Record the author before formatting so a later message replying
            // to this one resolves, and so a self-reply resolves too.
            self.authors.record(&msg.id, &msg.author.display_name);

            self.migrate_one(msg).await;
            self.sink.emit(&format!("PROGRESS:{}/{}", idx + 1, total));

            // Courtesy pause independent of the client's reactive 429 handling.
            tokio::select! {
                _ = sleep(self.migration.rate_limit_delay()) => {}
                _ = self.cancel.cancelled() => {}
            }
        }

        self.summarize();
        Ok(self.stats)
    }

    async fn migrate_one(&mut self, msg: &crate::model::SourceMessage) {
        let formatted = format_message(msg, &self.authors);

        let mut attachments = Vec::new();
        for att in &msg.attachments {
            match self
                .relay
                .relay(&att.url, &att.filename, BUCKET_ATTACHMENTS)
                .await
            {
                Ok(id) => attachments.push(id),
                Err(err) => {
                    warn!(
                        message_id = %msg.id,
                        filename = %att.filename,
                        %err,
                        "skipping attachment after upload failure"
                    );
                }
            }
        }

        let avatar = match &msg.author.avatar_url {
            Some(url) if self.migration.upload_avatars => {
                Some(self.relay.relay_avatar(url).await)
            }
            Some(url) => Some(url.clone()),
            None => None,
        };

        let content = if formatted.is_empty() {
            EMPTY_CONTENT_PLACEHOLDER.to_string()
        } else {
            formatted
        };
        let payload = MessagePayload {
            content,
            attachments: (!attachments.is_empty()).then_some(attachments),
            masquerade: Some(Masquerade::new(&msg.author.display_name, avatar)),
        };

        if self.migration.dry_run {
            self.sink.emit(&format!(
                "[DRY RUN] Would migrate message from {}",
                msg.author.display_name
            ));
            self.stats.succeeded += 1;
            return;
        }

        match self.api.post_message(self.target_channel_id, &payload).await {
            Ok(()) => self.stats.succeeded += 1,
            Err(err) => {
                self.stats.failed += 1;
                if err.is_permission() {
                    error!(
                        message_id = %msg.id,
                        author = %msg.author.display_name,
                        %err,
                        "message rejected for missing permission"
                    );
                } else {
                    warn!(
                        message_id = %msg.id,
                        author = %msg.author.display_name,
                        %err,
                        "failed to migrate message"
                    );
                }
            }
        }
    }

    fn summarize(&self) {
        self.sink.emit("Migration Complete!");
        self.sink
            .emit(&format!("Total messages: {}", self.stats.total));
        self.sink
            .emit(&format!("Successfully migrated: {}", self.stats.succeeded));
        self.sink.emit(&format!("Failed: {}", self.stats.failed));
        info!(
            total = self.stats.total,
            succeeded = self.stats.succeeded,
            failed = self.stats.failed,
            "migration run finished"
        );
    }
}
