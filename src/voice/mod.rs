//! Voice net session management.
//!
//! [`VoiceNetSessionManager`] owns the one voice session a client may hold:
//! `Idle → Joining → Connected | Error`, back to `Idle` on leave. Join and
//! leave are serialized through an internal async mutex, so a leave issued
//! while a join is in flight waits for the join to settle — there is never a
//! dangling live session.
//!
//! Join outcomes:
//! - token issued → `Connected` in [`SessionMode::Live`]
//! - permission denial → terminal [`ConnectionState::Error`] (the only hard
//!   error this core surfaces; retry is the caller's job via backoff)
//! - infrastructure unreachable → `Connected` in [`SessionMode::Simulated`]
//!   with a synthetic roster, so the console stays populated
//!
//! Focused nets enforce transmit discipline: a single transmit authority,
//! overridable only at or above the net's minimum rank.

mod session;
mod simulated;

pub use session::{
    ConnectionState, DisciplineClass, Participant, SessionMode, VoiceNet, VoiceSession,
};

use crate::backend::VoiceBackend;
use crate::clock::SharedClock;
use crate::config::VoiceConfig;
use crate::error::{CoordError, Result};
use rand::Rng;
use simulated::simulated_roster;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Session lifecycle events for UI banners and observability.
#[derive(Debug, Clone)]
pub enum VoiceSessionEvent {
    /// The state machine moved.
    StateChanged {
        net_id: Option<String>,
        state: ConnectionState,
    },
    /// The session fell back to simulated mode.
    FallbackEngaged { net_id: String, reason: String },
    /// The participant roster changed (simulated churn or join/leave).
    ParticipantsChanged { count: usize },
    /// The local transmit state toggled.
    TransmitChanged { identity: String, active: bool },
    /// The session ended and returned to idle.
    Ended { net_id: String },
}

struct ManagerState {
    session: VoiceSession,
    net: Option<VoiceNet>,
    churn_cancel: Option<CancellationToken>,
}

struct ManagerInner {
    backend: Arc<dyn VoiceBackend>,
    config: VoiceConfig,
    identity: String,
    display_name: String,
    local_rank: u32,
    clock: SharedClock,
    op_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<VoiceSessionEvent>,
    state: Mutex<ManagerState>,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(token) = state.churn_cancel.take() {
                token.cancel();
            }
        }
    }
}

/// Owns the client's single voice session.
#[derive(Clone)]
pub struct VoiceNetSessionManager {
    inner: Arc<ManagerInner>,
}

impl VoiceNetSessionManager {
    /// Create a manager for the given local operator identity.
    pub fn new(
        backend: Arc<dyn VoiceBackend>,
        config: VoiceConfig,
        identity: impl Into<String>,
        display_name: impl Into<String>,
        local_rank: u32,
        clock: SharedClock,
    ) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(ManagerInner {
                backend,
                config,
                identity: identity.into(),
                display_name: display_name.into(),
                local_rank,
                clock,
                op_lock: tokio::sync::Mutex::new(()),
                events,
                state: Mutex::new(ManagerState {
                    session: VoiceSession::idle(),
                    net: None,
                    churn_cancel: None,
                }),
            }),
        }
    }

    /// Current session snapshot.
    pub fn session(&self) -> VoiceSession {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.session.clone()
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<VoiceSessionEvent> {
        self.inner.events.subscribe()
    }

    /// Whether joining `net` needs the one-time discipline acknowledgment.
    /// The acknowledgment gate itself is owned by the caller.
    pub fn requires_discipline_ack(&self, net: &VoiceNet) -> bool {
        net.requires_discipline_ack()
    }

    /// Join a net, tearing down any prior session first.
    ///
    /// Returns the settled session for live and simulated outcomes. A
    /// permission denial returns [`CoordError::Denied`] and leaves the
    /// session in [`ConnectionState::Error`].
    pub async fn join(&self, net: &VoiceNet) -> Result<VoiceSession> {
        let _op = self.inner.op_lock.lock().await;

        teardown(&self.inner).await;

        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.net = Some(net.clone());
            state.session = VoiceSession {
                net_id: Some(net.id.clone()),
                connection_state: ConnectionState::Joining,
                ..VoiceSession::idle()
            };
        }
        emit(
            &self.inner,
            VoiceSessionEvent::StateChanged {
                net_id: Some(net.id.clone()),
                state: ConnectionState::Joining,
            },
        );
        info!(net = net.id.as_str(), code = net.code.as_str(), "joining voice net");

        let budget = Duration::from_millis(self.inner.config.join_timeout_ms);
        let net_ids = [net.id.clone()];
        let outcome = tokio::time::timeout(
            budget,
            self.inner.backend.issue_tokens(&net_ids, &self.inner.identity),
        )
        .await;

        match outcome {
            Ok(Ok(grant)) => {
                if grant.tokens.contains_key(&net.id) {
                    self.settle_live(net).await
                } else {
                    let reason = grant
                        .errors
                        .first()
                        .cloned()
                        .unwrap_or_else(|| format!("no token issued for net {}", net.code));
                    self.settle_denied(net, reason)
                }
            }
            Ok(Err(CoordError::Denied(reason))) => self.settle_denied(net, reason),
            Ok(Err(err)) => self.settle_simulated(net, err.to_string()),
            Err(_) => self.settle_simulated(net, "token request timed out".to_owned()),
        }
    }

    /// Leave the current session, releasing the token best-effort.
    ///
    /// Serialized with [`join`](Self::join): a leave issued mid-join waits
    /// for the join to settle first.
    pub async fn leave(&self) {
        let _op = self.inner.op_lock.lock().await;
        teardown(&self.inner).await;
    }

    /// Toggle local push-to-talk.
    ///
    /// Casual nets always toggle. Focused nets reject when another
    /// participant holds transmit authority and the local rank is below the
    /// net's minimum transmit rank.
    pub fn push_to_talk(&self, active: bool) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.session.connection_state != ConnectionState::Connected {
                return Err(CoordError::NoSession(
                    "push-to-talk requires a connected session".to_owned(),
                ));
            }
            let Some(net) = state.net.clone() else {
                return Err(CoordError::NoSession("no net on record".to_owned()));
            };

            if net.discipline == DisciplineClass::Focused {
                if active {
                    if let Some(holder) = state.session.transmit_authority_id.clone() {
                        if holder != self.inner.identity
                            && self.inner.local_rank < net.min_rank_to_transmit
                        {
                            return Err(CoordError::TransmitDenied(format!(
                                "{holder} holds transmit authority on {}",
                                net.code
                            )));
                        }
                    }
                    state.session.transmit_authority_id = Some(self.inner.identity.clone());
                } else if state.session.transmit_authority_id.as_deref()
                    == Some(self.inner.identity.as_str())
                {
                    state.session.transmit_authority_id = None;
                }
            }

            if let Some(local) = state
                .session
                .participants
                .iter_mut()
                .find(|p| p.is_local)
            {
                local.is_speaking = active;
            }
        }

        emit(
            &self.inner,
            VoiceSessionEvent::TransmitChanged {
                identity: self.inner.identity.clone(),
                active,
            },
        );
        Ok(())
    }

    /// Ingest a transmit-authority update from the voice plane (a remote
    /// participant taking or dropping the floor).
    pub fn observe_transmit_authority(&self, identity: Option<String>) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.session.transmit_authority_id = identity;
    }

    fn local_participant(&self) -> Participant {
        Participant {
            identity: self.inner.identity.clone(),
            display_name: self.inner.display_name.clone(),
            is_local: true,
            is_speaking: false,
            is_muted: false,
            joined_at: self.inner.clock.now(),
        }
    }

    async fn settle_live(&self, net: &VoiceNet) -> Result<VoiceSession> {
        // Room status is informational only — a failure here must not fail
        // an otherwise successful join.
        let status = self.inner.backend.room_status(&net.id).await.ok();
        if let Some(status) = &status {
            debug!(
                net = net.id.as_str(),
                active = status.is_active,
                participants = status.participant_count,
                "room status at join"
            );
        }

        let session = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.session = VoiceSession {
                net_id: Some(net.id.clone()),
                connection_state: ConnectionState::Connected,
                mode: SessionMode::Live,
                participants: vec![self.local_participant()],
                transmit_authority_id: None,
                fallback_reason: None,
                error_reason: None,
            };
            state.session.clone()
        };
        emit(
            &self.inner,
            VoiceSessionEvent::StateChanged {
                net_id: Some(net.id.clone()),
                state: ConnectionState::Connected,
            },
        );
        info!(net = net.id.as_str(), "voice net joined (live)");
        Ok(session)
    }

    fn settle_denied(&self, net: &VoiceNet, reason: String) -> Result<VoiceSession> {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.session = VoiceSession {
                net_id: Some(net.id.clone()),
                connection_state: ConnectionState::Error,
                error_reason: Some(reason.clone()),
                ..VoiceSession::idle()
            };
        }
        emit(
            &self.inner,
            VoiceSessionEvent::StateChanged {
                net_id: Some(net.id.clone()),
                state: ConnectionState::Error,
            },
        );
        warn!(net = net.id.as_str(), reason = reason.as_str(), "voice net join denied");
        Err(CoordError::Denied(reason))
    }

    fn settle_simulated(&self, net: &VoiceNet, reason: String) -> Result<VoiceSession> {
        let now = self.inner.clock.now();
        let local = self.local_participant();
        let roster = {
            let mut rng = rand::thread_rng();
            simulated_roster(&self.inner.config, local, now, &mut rng)
        };

        let churn = CancellationToken::new();
        let session = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.session = VoiceSession {
                net_id: Some(net.id.clone()),
                connection_state: ConnectionState::Connected,
                mode: SessionMode::Simulated,
                participants: roster,
                transmit_authority_id: None,
                fallback_reason: Some(reason.clone()),
                error_reason: None,
            };
            state.churn_cancel = Some(churn.clone());
            state.session.clone()
        };

        tokio::spawn(churn_loop(Arc::downgrade(&self.inner), churn));

        emit(
            &self.inner,
            VoiceSessionEvent::FallbackEngaged {
                net_id: net.id.clone(),
                reason: reason.clone(),
            },
        );
        emit(
            &self.inner,
            VoiceSessionEvent::StateChanged {
                net_id: Some(net.id.clone()),
                state: ConnectionState::Connected,
            },
        );
        warn!(
            net = net.id.as_str(),
            reason = reason.as_str(),
            participants = session.participants.len(),
            "voice infrastructure unreachable — simulated session engaged"
        );
        Ok(session)
    }
}

fn emit(inner: &Arc<ManagerInner>, event: VoiceSessionEvent) {
    // No subscribers is not an error.
    let _ = inner.events.send(event);
}

/// Tear down any active session while the op lock is held.
async fn teardown(inner: &Arc<ManagerInner>) {
    let (net, churn, release_needed) = {
        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.session.connection_state == ConnectionState::Idle && state.net.is_none() {
            return;
        }
        let release_needed = state.session.connection_state == ConnectionState::Connected
            && state.session.mode == SessionMode::Live;
        (state.net.take(), state.churn_cancel.take(), release_needed)
    };

    if let Some(token) = churn {
        token.cancel();
    }

    if let Some(net) = &net {
        if release_needed {
            let budget = Duration::from_millis(inner.config.join_timeout_ms);
            match tokio::time::timeout(
                budget,
                inner.backend.release_token(&net.id, &inner.identity),
            )
            .await
            {
                Ok(Ok(())) => debug!(net = net.id.as_str(), "voice token released"),
                Ok(Err(err)) => {
                    warn!(net = net.id.as_str(), error = %err, "token release failed (ignored)");
                }
                Err(_) => warn!(net = net.id.as_str(), "token release timed out (ignored)"),
            }
        }
    }

    {
        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.session = VoiceSession::idle();
    }
    if let Some(net) = net {
        emit(inner, VoiceSessionEvent::Ended { net_id: net.id.clone() });
        emit(
            inner,
            VoiceSessionEvent::StateChanged {
                net_id: None,
                state: ConnectionState::Idle,
            },
        );
        info!(net = net.id.as_str(), "voice net left");
    }
}

/// Probabilistically regenerate the simulated roster to emulate churn.
async fn churn_loop(weak: std::sync::Weak<ManagerInner>, cancel: CancellationToken) {
    let interval = {
        let Some(inner) = weak.upgrade() else { return };
        Duration::from_millis(inner.config.churn_interval_ms.max(100))
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        let Some(inner) = weak.upgrade() else { break };

        let churn_now = {
            let p = inner.config.activity_variance.clamp(0.0, 1.0);
            rand::thread_rng().gen_bool(p)
        };
        if !churn_now {
            continue;
        }

        let count = {
            let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
            let simulated = state.session.connection_state == ConnectionState::Connected
                && state.session.mode == SessionMode::Simulated;
            if !simulated {
                None
            } else {
                let local = state
                    .session
                    .local_participant()
                    .cloned()
                    .unwrap_or_else(|| Participant {
                        identity: inner.identity.clone(),
                        display_name: inner.display_name.clone(),
                        is_local: true,
                        is_speaking: false,
                        is_muted: false,
                        joined_at: inner.clock.now(),
                    });
                let now = inner.clock.now();
                let mut rng = rand::thread_rng();
                state.session.participants =
                    simulated_roster(&inner.config, local, now, &mut rng);
                Some(state.session.participants.len())
            }
        };

        if let Some(count) = count {
            debug!(participants = count, "simulated roster churned");
            emit(&inner, VoiceSessionEvent::ParticipantsChanged { count });
        }
    }
}
