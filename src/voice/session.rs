//! Voice net and session data types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transmit-discipline class of a net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisciplineClass {
    /// Free chat; no transmit authority tracking.
    Casual,
    /// Operational net; single transmit authority, rank-gated.
    Focused,
}

impl fmt::Display for DisciplineClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Casual => write!(f, "casual"),
            Self::Focused => write!(f, "focused"),
        }
    }
}

/// Reference data for one voice net. Read-only to this core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceNet {
    /// Stable net identifier.
    pub id: String,
    /// Short operator-facing code (e.g. `OPS-1`).
    pub code: String,
    /// Transmit discipline class.
    pub discipline: DisciplineClass,
    /// Ad-hoc nets skip the discipline acknowledgment gate.
    pub is_temporary: bool,
    /// Minimum rank allowed to take transmit authority on a focused net.
    pub min_rank_to_transmit: u32,
}

impl VoiceNet {
    /// Whether joining this net requires the one-time-per-session
    /// discipline acknowledgment. The gate itself lives outside this core.
    pub fn requires_discipline_ack(&self) -> bool {
        self.discipline == DisciplineClass::Focused && !self.is_temporary
    }
}

/// Connection state of the per-net join attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session.
    Idle,
    /// Token request in flight.
    Joining,
    /// Session established (live or simulated).
    Connected,
    /// Join failed terminally (permission denial).
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        write!(f, "{label}")
    }
}

/// Whether participant data reflects the real voice backend or a
/// synthesized stand-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Connected to the real voice infrastructure.
    Live,
    /// Voice infrastructure unreachable; roster is illustrative only.
    Simulated,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Simulated => write!(f, "simulated"),
        }
    }
}

/// One participant in a voice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Stable participant identity.
    pub identity: String,
    /// Operator-facing callsign or name.
    pub display_name: String,
    /// Whether this is the local client.
    pub is_local: bool,
    /// Whether the participant is currently speaking.
    pub is_speaking: bool,
    /// Whether the participant is muted.
    pub is_muted: bool,
    /// When the participant joined the net.
    pub joined_at: DateTime<Utc>,
}

/// Snapshot of the client's single voice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSession {
    /// Net this session belongs to, once a join has been requested.
    pub net_id: Option<String>,
    /// State machine position.
    pub connection_state: ConnectionState,
    /// Live vs. simulated participant data.
    pub mode: SessionMode,
    /// Known participants, local client included.
    pub participants: Vec<Participant>,
    /// Identity currently holding transmit authority (focused nets only).
    pub transmit_authority_id: Option<String>,
    /// Why the session fell back to simulated mode, if it did.
    pub fallback_reason: Option<String>,
    /// Terminal error detail when `connection_state` is `Error`.
    pub error_reason: Option<String>,
}

impl VoiceSession {
    /// The no-session state.
    pub fn idle() -> Self {
        Self {
            net_id: None,
            connection_state: ConnectionState::Idle,
            mode: SessionMode::Live,
            participants: Vec::new(),
            transmit_authority_id: None,
            fallback_reason: None,
            error_reason: None,
        }
    }

    /// Participant data is authoritative only for a live, connected
    /// session; a simulated roster is illustrative and must never be
    /// conflated with real audio state.
    pub fn is_authoritative(&self) -> bool {
        self.connection_state == ConnectionState::Connected && self.mode == SessionMode::Live
    }

    /// The local participant, if present.
    pub fn local_participant(&self) -> Option<&Participant> {
        self.participants.iter().find(|p| p.is_local)
    }
}

impl Default for VoiceSession {
    fn default() -> Self {
        Self::idle()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn focused_net() -> VoiceNet {
        VoiceNet {
            id: "net-ops".to_owned(),
            code: "OPS-1".to_owned(),
            discipline: DisciplineClass::Focused,
            is_temporary: false,
            min_rank_to_transmit: 2,
        }
    }

    #[test]
    fn focused_permanent_net_requires_ack() {
        assert!(focused_net().requires_discipline_ack());
    }

    #[test]
    fn temporary_focused_net_skips_ack() {
        let net = VoiceNet {
            is_temporary: true,
            ..focused_net()
        };
        assert!(!net.requires_discipline_ack());
    }

    #[test]
    fn casual_net_never_requires_ack() {
        let net = VoiceNet {
            discipline: DisciplineClass::Casual,
            ..focused_net()
        };
        assert!(!net.requires_discipline_ack());
    }

    #[test]
    fn only_live_connected_is_authoritative() {
        let mut session = VoiceSession::idle();
        assert!(!session.is_authoritative());

        session.connection_state = ConnectionState::Connected;
        session.mode = SessionMode::Live;
        assert!(session.is_authoritative());

        session.mode = SessionMode::Simulated;
        assert!(!session.is_authoritative());

        session.mode = SessionMode::Live;
        session.connection_state = ConnectionState::Joining;
        assert!(!session.is_authoritative());
    }
}
