//! Round-trip latency probe with a reference-counted lifecycle.
//!
//! [`LatencyMonitor`] owns the single shared probe timer for the whole
//! process: the first [`retain`](LatencyMonitor::retain) starts it, and the
//! timer stops when the last [`ProbeGuard`] is dropped. Multiple UI mounts
//! can therefore retain the monitor without duplicating network probes.
//!
//! Probe failures never raise to callers — they are recorded as unhealthy
//! samples so the readiness engine can always compute from last-known state.

use crate::backend::HealthEndpoint;
use crate::clock::SharedClock;
use crate::config::LatencyConfig;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One round-trip measurement. Immutable once recorded.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LatencySample {
    /// When the measurement completed.
    pub measured_at: DateTime<Utc>,
    /// Measured round trip in milliseconds.
    pub round_trip_ms: u64,
    /// Whether the round trip was within the healthy threshold.
    pub healthy: bool,
    /// Failure reason when the probe did not complete cleanly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct MonitorState {
    refcount: usize,
    cancel: Option<CancellationToken>,
    last: Option<LatencySample>,
    window: VecDeque<LatencySample>,
}

struct MonitorInner {
    endpoint: Arc<dyn HealthEndpoint>,
    config: LatencyConfig,
    clock: SharedClock,
    tx: broadcast::Sender<LatencySample>,
    state: Mutex<MonitorState>,
}

/// Process-wide latency monitor. Construct once and share by `Arc`.
#[derive(Clone)]
pub struct LatencyMonitor {
    inner: Arc<MonitorInner>,
}

/// RAII handle keeping the probe timer alive.
///
/// Dropping the last outstanding guard cancels the timer task; each guard
/// releases exactly once, so releases are idempotent by construction.
pub struct ProbeGuard {
    inner: Arc<MonitorInner>,
}

impl LatencyMonitor {
    /// Create a monitor. No timer runs until the first [`retain`](Self::retain).
    pub fn new(endpoint: Arc<dyn HealthEndpoint>, config: LatencyConfig, clock: SharedClock) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(MonitorInner {
                endpoint,
                config,
                clock,
                tx,
                state: Mutex::new(MonitorState {
                    refcount: 0,
                    cancel: None,
                    last: None,
                    window: VecDeque::new(),
                }),
            }),
        }
    }

    /// Start (or keep alive) the shared probe timer.
    ///
    /// The interval of the first retainer wins; later retains keep the
    /// existing timer and their interval is ignored. Must be called from
    /// within a tokio runtime.
    pub fn retain(&self, interval: Duration) -> ProbeGuard {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.refcount += 1;
        if state.refcount == 1 {
            let token = CancellationToken::new();
            state.cancel = Some(token.clone());
            let inner = Arc::clone(&self.inner);
            tokio::spawn(probe_loop(inner, interval, token));
            info!(interval_ms = interval.as_millis() as u64, "latency probe started");
        } else {
            debug!(refcount = state.refcount, "latency probe retained");
        }
        ProbeGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// [`retain`](Self::retain) with the configured probe interval.
    pub fn retain_default(&self) -> ProbeGuard {
        self.retain(Duration::from_millis(self.inner.config.probe_interval_ms))
    }

    /// Subscribe to every new sample.
    pub fn subscribe(&self) -> broadcast::Receiver<LatencySample> {
        self.inner.tx.subscribe()
    }

    /// Last known sample, if any probe has completed yet.
    pub fn current(&self) -> Option<LatencySample> {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.last.clone()
    }

    /// Recent samples, oldest first (bounded rolling window).
    pub fn recent(&self) -> Vec<LatencySample> {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.window.iter().cloned().collect()
    }

    /// Whether the probe timer is currently running.
    pub fn is_running(&self) -> bool {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.refcount > 0
    }
}

impl Drop for ProbeGuard {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.refcount = state.refcount.saturating_sub(1);
        if state.refcount == 0 {
            if let Some(token) = state.cancel.take() {
                token.cancel();
                info!("latency probe stopped (last retainer released)");
            }
        }
    }
}

async fn probe_loop(inner: Arc<MonitorInner>, interval: Duration, cancel: CancellationToken) {
    // One immediate probe so readiness has data before the first interval.
    probe_once(&inner).await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => probe_once(&inner).await,
        }
    }
}

async fn probe_once(inner: &Arc<MonitorInner>) {
    let budget = Duration::from_millis(inner.config.request_timeout_ms);
    let started = std::time::Instant::now();
    let sample = match tokio::time::timeout(budget, inner.endpoint.ping()).await {
        Ok(Ok(elapsed)) => {
            let round_trip_ms = elapsed.as_millis() as u64;
            LatencySample {
                measured_at: inner.clock.now(),
                round_trip_ms,
                healthy: round_trip_ms <= inner.config.healthy_threshold_ms,
                error: None,
            }
        }
        Ok(Err(err)) => {
            warn!(error = %err, "latency probe failed");
            LatencySample {
                measured_at: inner.clock.now(),
                round_trip_ms: started.elapsed().as_millis() as u64,
                healthy: false,
                error: Some(err.to_string()),
            }
        }
        Err(_) => {
            warn!(budget_ms = budget.as_millis() as u64, "latency probe timed out");
            LatencySample {
                measured_at: inner.clock.now(),
                round_trip_ms: budget.as_millis() as u64,
                healthy: false,
                error: Some("probe timed out".to_owned()),
            }
        }
    };

    debug!(
        round_trip_ms = sample.round_trip_ms,
        healthy = sample.healthy,
        "latency sample recorded"
    );

    let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
    state.last = Some(sample.clone());
    state.window.push_back(sample.clone());
    while state.window.len() > inner.config.window.max(1) {
        state.window.pop_front();
    }
    drop(state);

    // No subscribers is not an error.
    let _ = inner.tx.send(sample);
}
