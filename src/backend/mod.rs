//! External collaborator interfaces (presence store, voice infrastructure,
//! health endpoint).
//!
//! Design goal: the core never talks to the network directly — it goes
//! through these traits, so tests substitute in-memory fakes and the HTTP
//! client in [`http`] is one implementation among others.

pub mod http;

use crate::error::Result;
use crate::presence::{PresenceRecord, PresenceStatus};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A presence write issued by the heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceWrite {
    /// Subject whose presence is being announced.
    pub subject_id: String,
    /// Announced status.
    pub status: PresenceStatus,
    /// Net the subject is attached to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_id: Option<String>,
    /// Whether the subject is currently transmitting.
    pub is_transmitting: bool,
}

/// Result of a voice token issuance request.
///
/// A net may be absent from `tokens` without the whole request failing —
/// per-net denials are reported in `errors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenGrant {
    /// Issued tokens keyed by net id.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
    /// Per-net denial reasons.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Non-fatal issuance warnings.
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// Live status of a voice room.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RoomStatus {
    /// Whether the room currently has an active session.
    pub is_active: bool,
    /// Number of connected participants.
    pub participant_count: u32,
}

/// Server-side system of record for presence.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Write one presence record, returning the stored state.
    async fn write_presence(&self, write: PresenceWrite) -> Result<PresenceRecord>;

    /// List presence records no older than `recency_window`.
    async fn list_presence(&self, recency_window: Duration) -> Result<Vec<PresenceRecord>>;
}

/// Voice infrastructure collaborator (token issuance and room status).
#[async_trait]
pub trait VoiceBackend: Send + Sync {
    /// Request transmit/receive tokens for the given nets.
    async fn issue_tokens(&self, net_ids: &[String], identity: &str) -> Result<TokenGrant>;

    /// Query live status for a room.
    async fn room_status(&self, net_id: &str) -> Result<RoomStatus>;

    /// Release a previously issued token. Best-effort; used during leave.
    async fn release_token(&self, net_id: &str, identity: &str) -> Result<()>;
}

/// Lightweight health probe endpoint.
#[async_trait]
pub trait HealthEndpoint: Send + Sync {
    /// One round trip to the backend; returns the measured elapsed time.
    async fn ping(&self) -> Result<Duration>;
}
