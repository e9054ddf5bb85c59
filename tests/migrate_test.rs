//! Orchestrator tests over trait doubles: a canned source, a recording
//! destination, and an always-succeeding relay.
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use stoat_porter::config::Migration;
use stoat_porter::migrate::{AssumeYes, ConfirmGate, Migrator, EMPTY_CONTENT_PLACEHOLDER};
use stoat_porter::model::{
    MessagePayload, MigrationStats, SourceAttachment, SourceAuthor, SourceMessage,
};
use stoat_porter::relay::Relay;
use stoat_porter::report::ProgressSink;
use stoat_porter::source::{ChatSource, SourceStructure};
use stoat_porter::stoat::{model, ApiError, StoatApi};

fn message(id: &str, author: &str, content: &str) -> SourceMessage {
    SourceMessage {
        id: id.to_string(),
        author: SourceAuthor {
            display_name: author.to_string(),
            avatar_url: None,
        },
        content: content.to_string(),
        timestamp: Utc::now(),
        attachments: Vec::new(),
        embeds: Vec::new(),
        reply_to: None,
        snapshots: Vec::new(),
        mentions: Vec::new(),
    }
}

fn migration_settings(dry_run: bool) -> Migration {
    Migration {
        dry_run,
        retry_attempts: 3,
        retry_delay_ms: 1,
        rate_limit_delay_ms: 0,
        upload_avatars: true,
    }
}

struct FakeSource {
    messages: Vec<SourceMessage>,
    closed: AtomicBool,
}

impl FakeSource {
    fn new(messages: Vec<SourceMessage>) -> Self {
        Self {
            messages,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ChatSource for FakeSource {
    async fn connect(&self) -> Result<String> {
        Ok("TestBot".to_string())
    }

    async fn channel_name(&self, _channel_id: &str) -> Result<String> {
        Ok("general".to_string())
    }

    async fn fetch_history(&self, _channel_id: &str) -> Result<Vec<SourceMessage>> {
        Ok(self.messages.clone())
    }

    async fn fetch_structure(&self, _server_id: &str) -> Result<SourceStructure> {
        Ok(SourceStructure {
            server_name: "unused".into(),
            roles: Vec::new(),
            channels: Vec::new(),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingStoat {
    posts: Mutex<Vec<(String, MessagePayload)>>,
    post_results: Mutex<VecDeque<Result<(), ApiError>>>,
}

impl RecordingStoat {
    fn with_post_results(results: Vec<Result<(), ApiError>>) -> Self {
        Self {
            posts: Mutex::new(Vec::new()),
            post_results: Mutex::new(results.into()),
        }
    }

    fn posts(&self) -> Vec<(String, MessagePayload)> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoatApi for RecordingStoat {
    async fn fetch_server(&self, _server_id: &str) -> Result<model::Server, ApiError> {
        unreachable!("not used by the migrator")
    }

    async fn fetch_server_channels(
        &self,
        _server_id: &str,
    ) -> Result<Vec<model::Channel>, ApiError> {
        unreachable!("not used by the migrator")
    }

    async fn create_role(
        &self,
        _server_id: &str,
        _role: &model::NewRole,
    ) -> Result<model::CreatedRole, ApiError> {
        unreachable!("not used by the migrator")
    }

    async fn create_channel(
        &self,
        _server_id: &str,
        _channel: &model::NewChannel,
    ) -> Result<model::CreatedChannel, ApiError> {
        unreachable!("not used by the migrator")
    }

    async fn update_categories(
        &self,
        _server_id: &str,
        _categories: &[model::Category],
    ) -> Result<(), ApiError> {
        unreachable!("not used by the migrator")
    }

    async fn post_message(
        &self,
        channel_id: &str,
        payload: &MessagePayload,
    ) -> Result<(), ApiError> {
        self.posts
            .lock()
            .unwrap()
            .push((channel_id.to_string(), payload.clone()));
        self.post_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }
}

struct FakeRelay {
    fail_for: Option<String>,
}

impl FakeRelay {
    fn ok() -> Self {
        Self { fail_for: None }
    }

    fn failing_for(filename: &str) -> Self {
        Self {
            fail_for: Some(filename.to_string()),
        }
    }
}

#[async_trait]
impl Relay for FakeRelay {
    async fn relay(
        &self,
        _source_url: &str,
        filename: &str,
        _bucket: &str,
    ) -> Result<String> {
        if self.fail_for.as_deref() == Some(filename) {
            anyhow::bail!("upload failed");
        }
        Ok(format!("file-{filename}"))
    }

    async fn relay_avatar(&self, source_url: &str) -> String {
        format!("relayed-{source_url}")
    }
}

#[derive(Default)]
struct VecSink(Mutex<Vec<String>>);

impl VecSink {
    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl ProgressSink for VecSink {
    fn emit(&self, line: &str) {
        self.0.lock().unwrap().push(line.to_string());
    }
}

struct Deny;

#[async_trait]
impl ConfirmGate for Deny {
    async fn confirm(&self, _summary: &str) -> Result<bool> {
        Ok(false)
    }
}

async fn run_migration(
    source: &FakeSource,
    api: &RecordingStoat,
    relay: &FakeRelay,
    sink: &VecSink,
    settings: &Migration,
    gate: &dyn ConfirmGate,
) -> MigrationStats {
    let migrator = Migrator::new(
        api,
        relay,
        sink,
        settings,
        "dest-chan",
        CancellationToken::new(),
    );
    migrator.run(source, "src-chan", gate).await.unwrap()
}

#[tokio::test]
async fn messages_post_in_source_order_with_masquerade() {
    let m1 = message("1", "Ana", "hello");
    let mut m2 = message("2", "Ben", "");
    m2.reply_to = Some("1".into());
    let source = FakeSource::new(vec![m1, m2]);
    let api = RecordingStoat::default();
    let relay = FakeRelay::ok();
    let sink = VecSink::default();
    let settings = migration_settings(false);

    let stats = run_migration(&source, &api, &relay, &sink, &settings, &AssumeYes).await;

    assert_eq!(
        stats,
        MigrationStats {
            total: 2,
            succeeded: 2,
            failed: 0
        }
    );

    let posts = api.posts();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0].0, "dest-chan");
    assert_eq!(posts[0].1.content, "hello");
    assert_eq!(posts[0].1.masquerade.as_ref().unwrap().name, "Ana");
    // M2 replies to M1, whose author is already in the cache; no body line.
    assert_eq!(posts[1].1.content, "> Replying to Ana");
    assert_eq!(posts[1].1.masquerade.as_ref().unwrap().name, "Ben");

    assert!(source.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn reply_to_unseen_message_uses_generic_placeholder() {
    let mut m = message("5", "Ana", "");
    m.reply_to = Some("999".into());
    let source = FakeSource::new(vec![m]);
    let api = RecordingStoat::default();
    let sink = VecSink::default();
    let settings = migration_settings(false);

    run_migration(&source, &api, &FakeRelay::ok(), &sink, &settings, &AssumeYes).await;

    assert_eq!(api.posts()[0].1.content, "> Replying to a message");
}

#[tokio::test]
async fn empty_message_posts_placeholder_body() {
    let source = FakeSource::new(vec![message("1", "Ana", "")]);
    let api = RecordingStoat::default();
    let sink = VecSink::default();
    let settings = migration_settings(false);

    run_migration(&source, &api, &FakeRelay::ok(), &sink, &settings, &AssumeYes).await;

    assert_eq!(api.posts()[0].1.content, EMPTY_CONTENT_PLACEHOLDER);
}

#[tokio::test]
async fn attachments_are_relayed_and_attached() {
    let mut m = message("1", "Ana", "pic");
    m.attachments.push(SourceAttachment {
        url: "https://src/a.png".into(),
        filename: "a.png".into(),
    });
    let source = FakeSource::new(vec![m]);
    let api = RecordingStoat::default();
    let sink = VecSink::default();
    let settings = migration_settings(false);

    run_migration(&source, &api, &FakeRelay::ok(), &sink, &settings, &AssumeYes).await;

    assert_eq!(
        api.posts()[0].1.attachments,
        Some(vec!["file-a.png".to_string()])
    );
}

#[tokio::test]
async fn failed_attachment_is_skipped_but_message_still_posts() {
    let mut m = message("1", "Ana", "pic");
    m.attachments.push(SourceAttachment {
        url: "https://src/a.png".into(),
        filename: "a.png".into(),
    });
    let source = FakeSource::new(vec![m]);
    let api = RecordingStoat::default();
    let sink = VecSink::default();
    let settings = migration_settings(false);

    let stats = run_migration(
        &source,
        &api,
        &FakeRelay::failing_for("a.png"),
        &sink,
        &settings,
        &AssumeYes,
    )
    .await;

    assert_eq!(stats.succeeded, 1);
    let posts = api.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].1.attachments, None);
}

#[tokio::test]
async fn post_failure_is_counted_and_does_not_halt_the_run() {
    let source = FakeSource::new(vec![message("1", "Ana", "a"), message("2", "Ben", "b")]);
    let api = RecordingStoat::with_post_results(vec![
        Err(ApiError::Status {
            status: 400,
            path: "/channels/dest-chan/messages".into(),
            body: "bad".into(),
        }),
        Ok(()),
    ]);
    let sink = VecSink::default();
    let settings = migration_settings(false);

    let stats = run_migration(&source, &api, &FakeRelay::ok(), &sink, &settings, &AssumeYes).await;

    assert_eq!(
        stats,
        MigrationStats {
            total: 2,
            succeeded: 1,
            failed: 1
        }
    );
    assert_eq!(api.posts().len(), 2);
}

#[tokio::test]
async fn dry_run_counts_match_live_run_with_zero_network_writes() {
    let history = vec![message("1", "Ana", "a"), message("2", "Ben", "b")];

    let live_source = FakeSource::new(history.clone());
    let live_api = RecordingStoat::default();
    let live_sink = VecSink::default();
    let live_settings = migration_settings(false);
    let live_stats = run_migration(
        &live_source,
        &live_api,
        &FakeRelay::ok(),
        &live_sink,
        &live_settings,
        &AssumeYes,
    )
    .await;

    let dry_source = FakeSource::new(history);
    let dry_api = RecordingStoat::default();
    let dry_sink = VecSink::default();
    let dry_settings = migration_settings(true);
    let dry_stats = run_migration(
        &dry_source,
        &dry_api,
        &FakeRelay::ok(),
        &dry_sink,
        &dry_settings,
        &AssumeYes,
    )
    .await;

    assert_eq!(live_stats, dry_stats);
    assert_eq!(live_api.posts().len(), 2);
    assert!(dry_api.posts().is_empty());

    // Progress lines advance identically in both modes.
    let progress = |sink: &VecSink| {
        sink.lines()
            .into_iter()
            .filter(|l| l.starts_with("PROGRESS:"))
            .collect::<Vec<_>>()
    };
    assert_eq!(progress(&live_sink), progress(&dry_sink));
}

#[tokio::test]
async fn operator_decline_aborts_with_no_destination_writes() {
    let source = FakeSource::new(vec![message("1", "Ana", "a")]);
    let api = RecordingStoat::default();
    let sink = VecSink::default();
    let settings = migration_settings(false);

    let stats = run_migration(&source, &api, &FakeRelay::ok(), &sink, &settings, &Deny).await;

    assert!(api.posts().is_empty());
    assert_eq!(stats.succeeded, 0);
    assert_eq!(stats.failed, 0);
    assert!(sink
        .lines()
        .iter()
        .any(|l| l.contains("cancelled by operator")));
    assert!(source.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn cancellation_stops_before_the_next_message() {
    let source = FakeSource::new(vec![message("1", "Ana", "a"), message("2", "Ben", "b")]);
    let api = RecordingStoat::default();
    let sink = VecSink::default();
    let settings = migration_settings(false);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let relay = FakeRelay::ok();
    let migrator = Migrator::new(&api, &relay, &sink, &settings, "dest-chan", cancel);
    let stats = migrator.run(&source, "src-chan", &AssumeYes).await.unwrap();

    assert!(api.posts().is_empty());
    assert_eq!(stats.total, 2);
    assert_eq!(stats.succeeded, 0);
    assert!(source.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn avatar_is_relayed_into_the_masquerade() {
    let mut m = message("1", "Ana", "hi");
    m.author.avatar_url = Some("https://src/av.png".into());
    let source = FakeSource::new(vec![m]);
    let api = RecordingStoat::default();
    let sink = VecSink::default();
    let settings = migration_settings(false);

    run_migration(&source, &api, &FakeRelay::ok(), &sink, &settings, &AssumeYes).await;

    let masquerade = api.posts()[0].1.masquerade.clone().unwrap();
    assert_eq!(masquerade.avatar.as_deref(), Some("relayed-https://src/av.png"));
}
