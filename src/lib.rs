//! NetControl: real-time coordination core for a community operations console.
//!
//! Keeps many independent client sessions informed of who is online, how
//! healthy the network path is, whether a voice net is safe to transmit on,
//! and how spoken/typed shorthand maps to actions — all atop an unreliable,
//! intermittently-available backend.
//!
//! # Architecture
//!
//! Five subsystems, leaves first:
//! - **Backoff**: pure exponential delay schedule shared by every retrying
//!   caller ([`backoff`])
//! - **Latency probe**: reference-counted round-trip monitor ([`latency`])
//! - **Presence**: liveness heartbeat and recency-derived roster
//!   ([`presence`])
//! - **Readiness**: READY/DEGRADED/ALERT derivation over the two probes
//!   ([`readiness`])
//! - **Voice sessions**: per-net join/leave state machine with transmit
//!   discipline and a simulated fallback mode ([`voice`])
//! - **Command parsing**: deterministic fuzzy matching from utterances to
//!   typed actions ([`command`])
//!
//! External collaborators (presence store, voice token issuance, health
//! endpoint) are consumed through the traits in [`backend`]; an HTTP
//! implementation is provided and tests substitute in-memory fakes.
//!
//! Failure philosophy: the probes swallow and report rather than throw, so
//! readiness can always be computed from last-known values. Only the voice
//! session manager surfaces a hard error, and only for permission denials —
//! an unreachable voice backend degrades to a simulated session instead.

pub mod backend;
pub mod backoff;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod latency;
pub mod presence;
pub mod readiness;
pub mod voice;

#[cfg(test)]
pub(crate) mod test_utils;

pub use backoff::BackoffController;
pub use clock::{system_clock, Clock, SharedClock, SystemClock};
pub use command::{parse, CommandMatch, CommandRegistry, MatchStatus};
pub use config::CoordinationConfig;
pub use error::{CoordError, Result};
pub use latency::{LatencyMonitor, LatencySample, ProbeGuard};
pub use presence::{
    HeartbeatHealth, PresenceHeartbeat, PresenceRecord, PresenceRoster, PresenceStatus,
    RosterSnapshot,
};
pub use readiness::{compute, ReadinessEngine, ReadinessSnapshot, ReadinessState};
pub use voice::{
    ConnectionState, DisciplineClass, Participant, SessionMode, VoiceNet,
    VoiceNetSessionManager, VoiceSession, VoiceSessionEvent,
};
