//! HTTP implementation of the collaborator traits.
//!
//! Talks to the coordination backend over REST:
//!
//! | Route | Trait method |
//! |-------|--------------|
//! | `GET /healthz` | [`HealthEndpoint::ping`] |
//! | `POST /presence` | [`PresenceStore::write_presence`] |
//! | `GET /presence?window_ms=` | [`PresenceStore::list_presence`] |
//! | `POST /voice/tokens` | [`VoiceBackend::issue_tokens`] |
//! | `GET /voice/rooms/{net}` | [`VoiceBackend::room_status`] |
//! | `DELETE /voice/tokens/{net}` | [`VoiceBackend::release_token`] |
//!
//! Transport failures are classified onto the core error taxonomy: timeouts
//! and 5xx become [`CoordError::Transport`] (retryable), 401/403 become
//! [`CoordError::Denied`], connection refusals become
//! [`CoordError::Unavailable`].

use crate::backend::{HealthEndpoint, PresenceStore, PresenceWrite, RoomStatus, TokenGrant,
    VoiceBackend};
use crate::config::BackendConfig;
use crate::error::{CoordError, Result};
use crate::presence::PresenceRecord;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};

/// HTTP client for the coordination backend.
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Build a client from backend config. The per-request timeout applies
    /// to every route, including the health probe.
    pub fn new(config: &BackendConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let detail: String = body.chars().take(200).collect();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            Err(CoordError::Denied(format!("HTTP {status}: {detail}")))
        } else if status.is_server_error() {
            Err(CoordError::Transport(format!("HTTP {status}: {detail}")))
        } else {
            Err(CoordError::Protocol(format!("HTTP {status}: {detail}")))
        }
    }
}

/// Map a reqwest transport error onto the core taxonomy.
fn classify_transport_error(err: &reqwest::Error) -> CoordError {
    if err.is_timeout() {
        CoordError::Transport(format!("request timed out: {err}"))
    } else if err.is_connect() {
        CoordError::Unavailable(format!("connection failed: {err}"))
    } else {
        CoordError::Transport(err.to_string())
    }
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    rooms: &'a [String],
    identity: &'a str,
}

#[async_trait]
impl HealthEndpoint for HttpBackend {
    async fn ping(&self) -> Result<Duration> {
        let start = Instant::now();
        let resp = self
            .client
            .get(self.url("/healthz"))
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        Self::check_status(resp).await?;
        Ok(start.elapsed())
    }
}

#[async_trait]
impl PresenceStore for HttpBackend {
    async fn write_presence(&self, write: PresenceWrite) -> Result<PresenceRecord> {
        let resp = self
            .client
            .post(self.url("/presence"))
            .json(&write)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let resp = Self::check_status(resp).await?;
        resp.json::<PresenceRecord>()
            .await
            .map_err(|e| CoordError::Protocol(format!("presence write response: {e}")))
    }

    async fn list_presence(&self, recency_window: Duration) -> Result<Vec<PresenceRecord>> {
        let resp = self
            .client
            .get(self.url("/presence"))
            .query(&[("window_ms", recency_window.as_millis() as u64)])
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let resp = Self::check_status(resp).await?;
        resp.json::<Vec<PresenceRecord>>()
            .await
            .map_err(|e| CoordError::Protocol(format!("presence list response: {e}")))
    }
}

#[async_trait]
impl VoiceBackend for HttpBackend {
    async fn issue_tokens(&self, net_ids: &[String], identity: &str) -> Result<TokenGrant> {
        let request = TokenRequest {
            rooms: net_ids,
            identity,
        };
        let resp = self
            .client
            .post(self.url("/voice/tokens"))
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let resp = Self::check_status(resp).await?;
        resp.json::<TokenGrant>()
            .await
            .map_err(|e| CoordError::Protocol(format!("token response: {e}")))
    }

    async fn room_status(&self, net_id: &str) -> Result<RoomStatus> {
        let resp = self
            .client
            .get(self.url(&format!("/voice/rooms/{net_id}")))
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        let resp = Self::check_status(resp).await?;
        resp.json::<RoomStatus>()
            .await
            .map_err(|e| CoordError::Protocol(format!("room status response: {e}")))
    }

    async fn release_token(&self, net_id: &str, identity: &str) -> Result<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/voice/tokens/{net_id}")))
            .query(&[("identity", identity)])
            .send()
            .await
            .map_err(|e| classify_transport_error(&e))?;
        Self::check_status(resp).await?;
        Ok(())
    }
}
