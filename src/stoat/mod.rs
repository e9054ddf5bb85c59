//! Rate-limited client for the Stoat (destination) HTTP API.
//!
//! All destination traffic funnels through [`StoatClient::request`], which
//! owns the retry policy: reactive 429 waits, fixed-delay retries for 5xx,
//! immediate failure on 403, linear backoff for everything else. Endpoint
//! helpers implementing [`StoatApi`] sit on top and return typed responses.
use async_trait::async_trait;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config;
use crate::model::MessagePayload;

pub mod model;

const DEFAULT_CDN_URL: &str = "https://cdn.stoatusercontent.com";
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;
/// Added on top of the server-specified 429 wait.
const RATE_LIMIT_MARGIN: Duration = Duration::from_millis(500);
const SERVER_ERROR_DELAY: Duration = Duration::from_secs(2);
/// Hard ceiling on reactive 429 retries per request, so a persistently
/// limiting server cannot loop us forever.
const MAX_RATE_LIMIT_RETRIES: u32 = 10;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("permission denied ({method} {path}): {body}")]
    Permission {
        method: Method,
        path: String,
        body: String,
    },
    #[error("rate limit retries exhausted for {path}")]
    RateLimited { path: String },
    #[error("destination returned {status} for {path}: {body}")]
    Status {
        status: u16,
        path: String,
        body: String,
    },
    #[error("transport failure for {path}: {source}")]
    Transport {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("unexpected response shape for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Permission failures abort one operation and are never retried.
    pub fn is_permission(&self) -> bool {
        matches!(self, ApiError::Permission { .. })
    }
}

/// One HTTP exchange as seen by the retry loop.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

/// Seam between the retry policy and the wire. Production uses reqwest;
/// tests script responses.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> anyhow::Result<ApiResponse>;
}

pub struct HttpTransport {
    http: reqwest::Client,
}

impl HttpTransport {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent("stoat-porter/0.1")
            .no_proxy()
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        method: Method,
        url: &str,
        token: &str,
        body: Option<&Value>,
    ) -> anyhow::Result<ApiResponse> {
        let mut req = self.http.request(method, url).header("X-Bot-Token", token);
        if let Some(body) = body {
            req = req.json(body);
        }
        let res = req.send().await?;
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Ok(ApiResponse { status, body })
    }
}

#[derive(Clone)]
pub struct StoatClient {
    transport: Arc<dyn Transport>,
    base_url: String,
    token: String,
    configured_cdn: Option<String>,
    cdn_url: Arc<OnceCell<String>>,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl fmt::Debug for StoatClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoatClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl StoatClient {
    pub fn new(stoat: &config::Stoat, migration: &config::Migration) -> Self {
        Self::with_transport(Arc::new(HttpTransport::new()), stoat, migration)
    }

    pub fn with_transport(
        transport: Arc<dyn Transport>,
        stoat: &config::Stoat,
        migration: &config::Migration,
    ) -> Self {
        Self {
            transport,
            base_url: stoat.api_url.trim_end_matches('/').to_string(),
            token: stoat.token.clone(),
            configured_cdn: stoat.cdn_url.clone(),
            cdn_url: Arc::new(OnceCell::new()),
            retry_attempts: migration.retry_attempts,
            retry_delay: migration.retry_delay(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Issue one API request under the full retry policy.
    ///
    /// 200/201 return the parsed JSON body (`Null` when the body is empty).
    /// 429 waits out the server-specified duration plus a margin and reissues
    /// without consuming the retry budget, bounded by
    /// [`MAX_RATE_LIMIT_RETRIES`]. 403 is returned immediately. 5xx and other
    /// failures consume the budget with fixed and linear backoff respectively.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{}", self.base_url, path);
        let mut attempt: u32 = 1;
        let mut rate_limit_hits: u32 = 0;

        loop {
            let res = self
                .transport
                .send(method.clone(), &url, &self.token, body)
                .await;

            let res = match res {
                Ok(res) => res,
                Err(err) => {
                    warn!(%method, path, attempt, %err, "request transport failure");
                    if attempt >= self.retry_attempts {
                        return Err(ApiError::Transport {
                            path: path.to_string(),
                            source: err,
                        });
                    }
                    sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                    continue;
                }
            };

            match res.status {
                200 | 201 => {
                    if res.body.trim().is_empty() {
                        return Ok(Value::Null);
                    }
                    return serde_json::from_str(&res.body).map_err(|source| ApiError::Decode {
                        path: path.to_string(),
                        source,
                    });
                }
                429 => {
                    rate_limit_hits += 1;
                    if rate_limit_hits > MAX_RATE_LIMIT_RETRIES {
                        error!(path, rate_limit_hits, "giving up after repeated rate limits");
                        return Err(ApiError::RateLimited {
                            path: path.to_string(),
                        });
                    }
                    let wait_ms = retry_after_ms(&res.body);
                    let wait = Duration::from_millis(wait_ms) + RATE_LIMIT_MARGIN;
                    warn!(path, wait_ms = wait.as_millis() as u64, "rate limited (429), waiting");
                    sleep(wait).await;
                }
                403 => {
                    error!(%method, path, body = %res.body, "permission denied by destination");
                    return Err(ApiError::Permission {
                        method,
                        path: path.to_string(),
                        body: res.body,
                    });
                }
                status if status >= 500 => {
                    warn!(%method, path, status, attempt, "destination server error");
                    if attempt >= self.retry_attempts {
                        return Err(ApiError::Status {
                            status,
                            path: path.to_string(),
                            body: res.body,
                        });
                    }
                    sleep(SERVER_ERROR_DELAY).await;
                    attempt += 1;
                }
                status => {
                    warn!(%method, path, status, attempt, body = %res.body, "destination API error");
                    if attempt >= self.retry_attempts {
                        return Err(ApiError::Status {
                            status,
                            path: path.to_string(),
                            body: res.body,
                        });
                    }
                    sleep(self.retry_delay * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn request_as<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ApiError> {
        let value = self.request(method, path, body).await?;
        serde_json::from_value(value).map_err(|source| ApiError::Decode {
            path: path.to_string(),
            source,
        })
    }

    /// Content-store ("Autumn") base URL: advertised by the API root, else
    /// the configured fallback, else the well-known default. Resolved once
    /// per client.
    pub async fn cdn_url(&self) -> String {
        self.cdn_url
            .get_or_init(|| async {
                match self
                    .transport
                    .send(Method::GET, &self.base_url, &self.token, None)
                    .await
                {
                    Ok(res) if res.status == 200 => {
                        if let Some(url) = serde_json::from_str::<Value>(&res.body)
                            .ok()
                            .and_then(|v| {
                                v.pointer("/features/autumn/url")
                                    .and_then(Value::as_str)
                                    .map(|s| s.trim_end_matches('/').to_string())
                            })
                        {
                            info!(%url, "detected content-store URL from API root");
                            return url;
                        }
                        self.fallback_cdn()
                    }
                    Ok(res) => {
                        warn!(status = res.status, "API root did not advertise a content store");
                        self.fallback_cdn()
                    }
                    Err(err) => {
                        warn!(%err, "failed to reach API root for content-store discovery");
                        self.fallback_cdn()
                    }
                }
            })
            .await
            .clone()
    }

    fn fallback_cdn(&self) -> String {
        let url = self
            .configured_cdn
            .as_deref()
            .unwrap_or(DEFAULT_CDN_URL)
            .trim_end_matches('/')
            .to_string();
        info!(%url, "using fallback content-store URL");
        url
    }
}

/// Destination operations the cloner and migrator depend on.
#[async_trait]
pub trait StoatApi: Send + Sync {
    async fn fetch_server(&self, server_id: &str) -> Result<model::Server, ApiError>;

    async fn fetch_server_channels(&self, server_id: &str) -> Result<Vec<model::Channel>, ApiError>;

    async fn create_role(
        &self,
        server_id: &str,
        role: &model::NewRole,
    ) -> Result<model::CreatedRole, ApiError>;

    async fn create_channel(
        &self,
        server_id: &str,
        channel: &model::NewChannel,
    ) -> Result<model::CreatedChannel, ApiError>;

    async fn update_categories(
        &self,
        server_id: &str,
        categories: &[model::Category],
    ) -> Result<(), ApiError>;

    async fn post_message(&self, channel_id: &str, payload: &MessagePayload)
        -> Result<(), ApiError>;
}

#[async_trait]
impl StoatApi for StoatClient {
    async fn fetch_server(&self, server_id: &str) -> Result<model::Server, ApiError> {
        self.request_as(Method::GET, &format!("/servers/{server_id}"), None)
            .await
    }

    async fn fetch_server_channels(
        &self,
        server_id: &str,
    ) -> Result<Vec<model::Channel>, ApiError> {
        self.request_as(Method::GET, &format!("/servers/{server_id}/channels"), None)
            .await
    }

    async fn create_role(
        &self,
        server_id: &str,
        role: &model::NewRole,
    ) -> Result<model::CreatedRole, ApiError> {
        let path = format!("/servers/{server_id}/roles");
        let body = serde_json::to_value(role).map_err(|source| ApiError::Decode {
            path: path.clone(),
            source,
        })?;
        self.request_as(Method::POST, &path, Some(&body)).await
    }

    async fn create_channel(
        &self,
        server_id: &str,
        channel: &model::NewChannel,
    ) -> Result<model::CreatedChannel, ApiError> {
        let path = format!("/servers/{server_id}/channels");
        let body = serde_json::to_value(channel).map_err(|source| ApiError::Decode {
            path: path.clone(),
            source,
        })?;
        self.request_as(Method::POST, &path, Some(&body)).await
    }

    async fn update_categories(
        &self,
        server_id: &str,
        categories: &[model::Category],
    ) -> Result<(), ApiError> {
        let path = format!("/servers/{server_id}");
        let body = serde_json::json!({ "categories": categories });
        self.request(Method::PATCH, &path, Some(&body)).await?;
        Ok(())
    }

    async fn post_message(
        &self,
        channel_id: &str,
        payload: &MessagePayload,
    ) -> Result<(), ApiError> {
        let path = format!("/channels/{channel_id}/messages");
        let body = serde_json::to_value(payload).map_err(|source| ApiError::Decode {
            path: path.clone(),
            source,
        })?;
        self.request(Method::POST, &path, Some(&body)).await?;
        Ok(())
    }
}

fn retry_after_ms(body: &str) -> u64 {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("retry_after").and_then(Value::as_u64))
        .unwrap_or(DEFAULT_RETRY_AFTER_MS)
}
