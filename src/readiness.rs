//! Operational readiness derivation.
//!
//! [`compute`] folds the two upstream probes into a three-state signal.
//! It is a pure function of its inputs — no hidden state — so identical
//! inputs always yield the same state. [`ReadinessEngine`] wraps it in a
//! reactive task that recomputes whenever either probe publishes.
//!
//! Rule order (first match wins):
//! 1. probe error, or unhealthy round trip above the alert threshold → ALERT
//! 2. presence writes failing → DEGRADED
//! 3. elevated (but healthy) round trip → DEGRADED
//! 4. otherwise → READY

use crate::clock::SharedClock;
use crate::config::LatencyConfig;
use crate::latency::LatencySample;
use crate::presence::HeartbeatHealth;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Three-state operational signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessState {
    /// Path healthy, presence writes landing.
    Ready,
    /// Usable but impaired (elevated latency or failing writes).
    Degraded,
    /// Operator attention required (probe errors or very high latency).
    Alert,
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ready => "READY",
            Self::Degraded => "DEGRADED",
            Self::Alert => "ALERT",
        };
        write!(f, "{label}")
    }
}

/// Derived readiness snapshot. Never persisted; recomputed on every input
/// change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessSnapshot {
    /// Derived state.
    pub state: ReadinessState,
    /// Short human-readable cause.
    pub reason: String,
    /// Supporting detail (measured values).
    pub context: String,
    /// When this snapshot was computed.
    pub computed_at: DateTime<Utc>,
}

/// Derive readiness from the heartbeat health and the latest latency sample.
///
/// `latency` is `None` until the first probe completes; an absent sample is
/// treated as nominal so a freshly mounted client starts READY rather than
/// flashing an alert.
pub fn compute(
    presence: &HeartbeatHealth,
    latency: Option<&LatencySample>,
    thresholds: &LatencyConfig,
    now: DateTime<Utc>,
) -> ReadinessSnapshot {
    if let Some(sample) = latency {
        if let Some(error) = &sample.error {
            return ReadinessSnapshot {
                state: ReadinessState::Alert,
                reason: error.clone(),
                context: format!("probe failed after {}ms", sample.round_trip_ms),
                computed_at: now,
            };
        }
        if !sample.healthy && sample.round_trip_ms > thresholds.healthy_threshold_ms {
            return ReadinessSnapshot {
                state: ReadinessState::Alert,
                reason: "high latency".to_owned(),
                context: format!(
                    "round trip {}ms exceeds {}ms",
                    sample.round_trip_ms, thresholds.healthy_threshold_ms
                ),
                computed_at: now,
            };
        }
    }

    if !presence.last_write_success || presence.write_failure_count > 0 {
        return ReadinessSnapshot {
            state: ReadinessState::Degraded,
            reason: "presence write degraded".to_owned(),
            context: format!("{} consecutive write failures", presence.write_failure_count),
            computed_at: now,
        };
    }

    if let Some(sample) = latency {
        if sample.round_trip_ms > thresholds.elevated_threshold_ms
            && sample.round_trip_ms <= thresholds.healthy_threshold_ms
        {
            return ReadinessSnapshot {
                state: ReadinessState::Degraded,
                reason: "elevated latency".to_owned(),
                context: format!(
                    "round trip {}ms above {}ms",
                    sample.round_trip_ms, thresholds.elevated_threshold_ms
                ),
                computed_at: now,
            };
        }
    }

    ReadinessSnapshot {
        state: ReadinessState::Ready,
        reason: "nominal".to_owned(),
        context: latency
            .map(|s| format!("round trip {}ms", s.round_trip_ms))
            .unwrap_or_else(|| "no probe data yet".to_owned()),
        computed_at: now,
    }
}

struct EngineInner {
    thresholds: LatencyConfig,
    clock: SharedClock,
    tx: broadcast::Sender<ReadinessSnapshot>,
    current: Mutex<ReadinessSnapshot>,
}

/// Reactive readiness engine: recomputes whenever either upstream probe
/// publishes, and broadcasts the resulting snapshots.
#[derive(Clone)]
pub struct ReadinessEngine {
    inner: Arc<EngineInner>,
}

impl ReadinessEngine {
    /// Spawn the engine over the two upstream streams. The task runs until
    /// `cancel` fires.
    pub fn spawn(
        mut latency_rx: broadcast::Receiver<LatencySample>,
        mut health_rx: broadcast::Receiver<HeartbeatHealth>,
        thresholds: LatencyConfig,
        clock: SharedClock,
        cancel: CancellationToken,
    ) -> Self {
        let initial = compute(&HeartbeatHealth::default(), None, &thresholds, clock.now());
        let (tx, _) = broadcast::channel(16);
        let inner = Arc::new(EngineInner {
            thresholds,
            clock,
            tx,
            current: Mutex::new(initial),
        });

        let task_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut latest_sample: Option<LatencySample> = None;
            let mut latest_health = HeartbeatHealth::default();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    sample = latency_rx.recv() => {
                        match sample {
                            Ok(sample) => latest_sample = Some(sample),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!(skipped, "readiness engine lagged on latency stream");
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    health = health_rx.recv() => {
                        match health {
                            Ok(health) => latest_health = health,
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                debug!(skipped, "readiness engine lagged on health stream");
                                continue;
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
                recompute(&task_inner, &latest_health, latest_sample.as_ref());
            }
        });

        Self { inner }
    }

    /// Latest snapshot.
    pub fn current(&self) -> ReadinessSnapshot {
        let current = self.inner.current.lock().unwrap_or_else(|e| e.into_inner());
        current.clone()
    }

    /// Subscribe to recomputed snapshots.
    pub fn subscribe(&self) -> broadcast::Receiver<ReadinessSnapshot> {
        self.inner.tx.subscribe()
    }
}

fn recompute(inner: &Arc<EngineInner>, health: &HeartbeatHealth, sample: Option<&LatencySample>) {
    let snapshot = compute(health, sample, &inner.thresholds, inner.clock.now());
    {
        let mut current = inner.current.lock().unwrap_or_else(|e| e.into_inner());
        if current.state != snapshot.state {
            info!(
                from = %current.state,
                to = %snapshot.state,
                reason = snapshot.reason.as_str(),
                "readiness transition"
            );
        }
        *current = snapshot.clone();
    }
    let _ = inner.tx.send(snapshot);
}
