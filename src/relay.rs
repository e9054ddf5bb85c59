//! Downloads a binary resource from the source platform and re-uploads it to
//! the destination content store. Avatar uploads are cached by source URL so
//! one author's avatar is pushed at most once per run; regular attachments
//! are unique content and never cached.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config;
use crate::stoat::model::UploadedFile;
use crate::stoat::StoatClient;

/// Sentinel handle returned instead of doing network I/O in dry-run mode.
pub const DRY_RUN_FILE_ID: &str = "dry-run-file-id";

/// Content-store bucket for message attachments.
pub const BUCKET_ATTACHMENTS: &str = "attachments";
/// Content-store bucket for masquerade avatars.
pub const BUCKET_AVATARS: &str = "avatars";

#[async_trait]
pub trait Relay: Send + Sync {
    /// Move one resource from the source platform into the destination
    /// content store and return the destination file id.
    async fn relay(
        &self,
        source_url: &str,
        filename: &str,
        bucket: &str,
    ) -> anyhow::Result<String>;

    /// Resolve an avatar URL to a destination-side display URL, uploading at
    /// most once per source URL. Falls back to the source URL on failure so
    /// a masquerade always keeps an avatar.
    async fn relay_avatar(&self, source_url: &str) -> String;
}

pub struct AttachmentRelay {
    http: reqwest::Client,
    client: StoatClient,
    retry_attempts: u32,
    retry_delay: std::time::Duration,
    dry_run: bool,
    upload_avatars: bool,
    avatar_cache: Mutex<HashMap<String, String>>,
}

impl AttachmentRelay {
    pub fn new(client: StoatClient, migration: &config::Migration) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("stoat-porter/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            client,
            retry_attempts: migration.retry_attempts,
            retry_delay: migration.retry_delay(),
            dry_run: migration.dry_run,
            upload_avatars: migration.upload_avatars,
            avatar_cache: Mutex::new(HashMap::new()),
        }
    }

    async fn try_relay_once(
        &self,
        source_url: &str,
        filename: &str,
        bucket: &str,
        cdn: &str,
    ) -> anyhow::Result<String> {
        let download = self.http.get(source_url).send().await?;
        if download.status().as_u16() != 200 {
            anyhow::bail!(
                "failed to download {}: HTTP {}",
                filename,
                download.status()
            );
        }
        let bytes = download.bytes().await?;

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(bytes.to_vec()).file_name(filename.to_string()),
        );
        let res = self
            .http
            .post(format!("{cdn}/{bucket}"))
            .header("X-Bot-Token", self.client.token())
            .multipart(form)
            .send()
            .await?;

        if res.status().as_u16() != 200 {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            anyhow::bail!("content-store upload failed ({bucket}): {status} - {body}");
        }

        let uploaded: UploadedFile = res.json().await?;
        Ok(uploaded.id)
    }
}

#[async_trait]
impl Relay for AttachmentRelay {
    async fn relay(
        &self,
        source_url: &str,
        filename: &str,
        bucket: &str,
    ) -> anyhow::Result<String> {
        if self.dry_run {
            info!(filename, bucket, "[DRY RUN] would upload to content store");
            return Ok(DRY_RUN_FILE_ID.to_string());
        }

        let cdn = self.client.cdn_url().await;

        for attempt in 1..=self.retry_attempts {
            match self.try_relay_once(source_url, filename, bucket, &cdn).await {
                Ok(id) => {
                    info!(filename, bucket, id, "uploaded to content store");
                    return Ok(id);
                }
                Err(err) => {
                    warn!(filename, bucket, attempt, %err, "upload attempt failed");
                }
            }
            if attempt < self.retry_attempts {
                sleep(self.retry_delay * attempt).await;
            }
        }

        anyhow::bail!(
            "failed to upload {} after {} attempts",
            filename,
            self.retry_attempts
        )
    }

    async fn relay_avatar(&self, source_url: &str) -> String {
        if !self.upload_avatars || self.dry_run {
            return source_url.to_string();
        }

        if let Some(cached) = self
            .avatar_cache
            .lock()
            .expect("avatar cache lock")
            .get(source_url)
        {
            return cached.clone();
        }

        let stem = source_url
            .rsplit('/')
            .next()
            .unwrap_or("avatar")
            .split('?')
            .next()
            .unwrap_or("avatar");
        let filename = format!("avatar_{stem}.png");

        match self.relay(source_url, &filename, BUCKET_AVATARS).await {
            Ok(id) => {
                let cdn = self.client.cdn_url().await;
                let dest = format!("{cdn}/{}/{id}", BUCKET_AVATARS);
                self.avatar_cache
                    .lock()
                    .expect("avatar cache lock")
                    .insert(source_url.to_string(), dest.clone());
                dest
            }
            Err(err) => {
                warn!(source_url, %err, "avatar upload failed, keeping source URL");
                source_url.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Migration, Stoat};

    fn relay_for_test(dry_run: bool) -> AttachmentRelay {
        let stoat = Stoat {
            api_url: "https://api.stoat.test".into(),
            cdn_url: Some("https://cdn.stoat.test".into()),
            token: "tok".into(),
            target_server_id: "srv".into(),
            target_channel_id: "chan".into(),
        };
        let migration = Migration {
            dry_run,
            retry_attempts: 3,
            retry_delay_ms: 1,
            rate_limit_delay_ms: 1,
            upload_avatars: true,
        };
        let client = StoatClient::new(&stoat, &migration);
        AttachmentRelay::new(client, &migration)
    }

    #[tokio::test]
    async fn dry_run_returns_sentinel_without_io() {
        let relay = relay_for_test(true);
        let id = relay
            .relay("https://src.test/a.png", "a.png", BUCKET_ATTACHMENTS)
            .await
            .unwrap();
        assert_eq!(id, DRY_RUN_FILE_ID);
    }

    #[tokio::test]
    async fn dry_run_avatar_keeps_source_url() {
        let relay = relay_for_test(true);
        let url = relay.relay_avatar("https://src.test/av.png").await;
        assert_eq!(url, "https://src.test/av.png");
    }
}
