//! Presence heartbeat (write side) and online roster (read side).
//!
//! The heartbeat announces liveness: one immediate write on start, then a
//! fixed 10 s cadence **only while attached to a net** — idle clients do not
//! generate periodic write volume. Write failures are counted and published
//! as [`HeartbeatHealth`] for the readiness engine, then retried on the next
//! natural tick; the fixed interval is the retry mechanism.
//!
//! The roster polls the presence store and classifies records online purely
//! by recency: a record logically expires once `recency_window` elapses,
//! even without an explicit offline write. Roster read failures surface an
//! `error` field without clearing the last-known entries — stale-but-available
//! beats empty.

use crate::backend::{PresenceStore, PresenceWrite};
use crate::clock::SharedClock;
use crate::config::PresenceConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Announced presence status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    /// Connected to the console, not in a voice net.
    Online,
    /// Joined to a voice net.
    InCall,
    /// Actively transmitting on a net.
    Transmitting,
    /// Explicitly signed off.
    Offline,
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Online => "online",
            Self::InCall => "in call",
            Self::Transmitting => "transmitting",
            Self::Offline => "offline",
        };
        write!(f, "{label}")
    }
}

/// One subject's presence record. The server-side store is the system of
/// record; the subject's own client refreshes it each heartbeat tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Subject this record belongs to.
    pub subject_id: String,
    /// Last announced status.
    pub status: PresenceStatus,
    /// Net the subject is attached to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub net_id: Option<String>,
    /// Timestamp of the last write touching this record.
    pub last_activity_at: DateTime<Utc>,
    /// Whether the subject is currently transmitting.
    pub is_transmitting: bool,
}

impl PresenceRecord {
    /// Recency classification: online iff the last activity is within the
    /// window and the subject has not explicitly signed off.
    pub fn is_online_within(&self, recency_window: Duration, now: DateTime<Utc>) -> bool {
        if self.status == PresenceStatus::Offline {
            return false;
        }
        let age = now.signed_duration_since(self.last_activity_at);
        age.num_milliseconds() <= recency_window.as_millis() as i64
    }
}

/// Write-side health published for the readiness engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatHealth {
    /// Whether the most recent write succeeded.
    pub last_write_success: bool,
    /// When the most recent successful write completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_write_at: Option<DateTime<Utc>>,
    /// Consecutive write failures since the last success.
    pub write_failure_count: u32,
}

impl Default for HeartbeatHealth {
    fn default() -> Self {
        // Optimistic until the first write settles, so a freshly mounted
        // client does not flash DEGRADED.
        Self {
            last_write_success: true,
            last_write_at: None,
            write_failure_count: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Announce {
    subject_id: String,
    status: PresenceStatus,
    net_id: Option<String>,
    is_transmitting: bool,
}

struct HeartbeatState {
    health: HeartbeatHealth,
    announce: Option<Announce>,
    cancel: Option<CancellationToken>,
}

struct HeartbeatInner {
    store: Arc<dyn PresenceStore>,
    config: PresenceConfig,
    clock: SharedClock,
    tx: broadcast::Sender<HeartbeatHealth>,
    state: Mutex<HeartbeatState>,
}

impl Drop for HeartbeatInner {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
        }
    }
}

/// Periodic liveness announcer for the local subject.
#[derive(Clone)]
pub struct PresenceHeartbeat {
    inner: Arc<HeartbeatInner>,
}

impl PresenceHeartbeat {
    /// Create a heartbeat. Nothing is written until [`start`](Self::start).
    pub fn new(store: Arc<dyn PresenceStore>, config: PresenceConfig, clock: SharedClock) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(HeartbeatInner {
                store,
                config,
                clock,
                tx,
                state: Mutex::new(HeartbeatState {
                    health: HeartbeatHealth::default(),
                    announce: None,
                    cancel: None,
                }),
            }),
        }
    }

    /// Begin announcing. Sends one immediate write, then repeats on the
    /// heartbeat cadence while `net_id` is set. A second `start` replaces
    /// the previous announcement.
    pub async fn start(&self, subject_id: &str, status: PresenceStatus, net_id: Option<String>) {
        let announce = Announce {
            subject_id: subject_id.to_owned(),
            status,
            net_id: net_id.clone(),
            is_transmitting: false,
        };
        let cancel = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.announce = Some(announce.clone());
            state.cancel.take()
        };
        if let Some(token) = cancel {
            token.cancel();
        }

        write_now(&self.inner).await;

        // Only heartbeat while joined to a net, to bound write volume.
        if net_id.is_some() {
            let token = CancellationToken::new();
            {
                let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
                state.cancel = Some(token.clone());
            }
            // Weak handle so an abandoned heartbeat cannot keep its timer alive.
            let weak = Arc::downgrade(&self.inner);
            let interval = Duration::from_millis(self.inner.config.heartbeat_interval_ms);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {
                            let Some(inner) = weak.upgrade() else { break };
                            write_now(&inner).await;
                        }
                    }
                }
            });
            info!(subject_id, net = ?announce.net_id, "presence heartbeat started");
        } else {
            debug!(subject_id, "presence announced once (no net, no cadence)");
        }
    }

    /// Immediate out-of-band write reflecting a transmit-state change, so
    /// push-to-talk is visible with sub-heartbeat latency.
    pub async fn set_transmitting(&self, active: bool) {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            let Some(announce) = state.announce.as_mut() else {
                warn!("set_transmitting before start — ignored");
                return;
            };
            announce.is_transmitting = active;
        }
        write_now(&self.inner).await;
    }

    /// Stop announcing and transition back to `online` with one final
    /// best-effort write. Failures are swallowed — this is cleanup.
    pub async fn stop(&self) {
        let (cancel, announce) = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.cancel.take(), state.announce.take())
        };
        if let Some(token) = cancel {
            token.cancel();
        }
        let Some(announce) = announce else {
            return;
        };

        let write = PresenceWrite {
            subject_id: announce.subject_id.clone(),
            status: PresenceStatus::Online,
            net_id: None,
            is_transmitting: false,
        };
        let budget = Duration::from_millis(self.inner.config.request_timeout_ms);
        match tokio::time::timeout(budget, self.inner.store.write_presence(write)).await {
            Ok(Ok(_)) => info!(subject_id = announce.subject_id.as_str(), "presence heartbeat stopped"),
            Ok(Err(err)) => warn!(error = %err, "final presence write failed (ignored)"),
            Err(_) => warn!("final presence write timed out (ignored)"),
        }
    }

    /// Current write-side health.
    pub fn health(&self) -> HeartbeatHealth {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.health.clone()
    }

    /// Subscribe to health updates (one per write attempt).
    pub fn subscribe(&self) -> broadcast::Receiver<HeartbeatHealth> {
        self.inner.tx.subscribe()
    }
}

async fn write_now(inner: &Arc<HeartbeatInner>) {
    let Some(announce) = ({
        let state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.announce.clone()
    }) else {
        return;
    };

    let write = PresenceWrite {
        subject_id: announce.subject_id.clone(),
        status: announce.status,
        net_id: announce.net_id.clone(),
        is_transmitting: announce.is_transmitting,
    };
    let budget = Duration::from_millis(inner.config.request_timeout_ms);
    let outcome = tokio::time::timeout(budget, inner.store.write_presence(write)).await;

    let health = {
        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match outcome {
            Ok(Ok(_)) => {
                state.health = HeartbeatHealth {
                    last_write_success: true,
                    last_write_at: Some(inner.clock.now()),
                    write_failure_count: 0,
                };
            }
            Ok(Err(err)) => {
                state.health.last_write_success = false;
                state.health.write_failure_count =
                    state.health.write_failure_count.saturating_add(1);
                warn!(
                    error = %err,
                    failures = state.health.write_failure_count,
                    "presence write failed; will retry on next tick"
                );
            }
            Err(_) => {
                state.health.last_write_success = false;
                state.health.write_failure_count =
                    state.health.write_failure_count.saturating_add(1);
                warn!(
                    failures = state.health.write_failure_count,
                    "presence write timed out; will retry on next tick"
                );
            }
        }
        state.health.clone()
    };

    let _ = inner.tx.send(health);
}

/// One roster row: the raw record plus its recency classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    /// The presence record as read from the store.
    pub record: PresenceRecord,
    /// Whether the record is within the recency window.
    pub online: bool,
}

/// Read-side roster snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RosterSnapshot {
    /// Known records with recency classification.
    pub entries: Vec<RosterEntry>,
    /// Read failure reason, if the last poll failed. Entries keep their
    /// last-known values in that case.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the last successful poll completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl RosterSnapshot {
    /// Number of entries currently classified online.
    pub fn online_count(&self) -> usize {
        self.entries.iter().filter(|e| e.online).count()
    }
}

struct RosterState {
    snapshot: RosterSnapshot,
    visible: bool,
    cancel: Option<CancellationToken>,
}

struct RosterInner {
    store: Arc<dyn PresenceStore>,
    config: PresenceConfig,
    clock: SharedClock,
    tx: broadcast::Sender<RosterSnapshot>,
    refresh: Arc<Notify>,
    state: Mutex<RosterState>,
}

impl Drop for RosterInner {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(token) = state.cancel.take() {
                token.cancel();
            }
        }
    }
}

/// Polls the presence store and derives the online roster.
#[derive(Clone)]
pub struct PresenceRoster {
    inner: Arc<RosterInner>,
}

impl PresenceRoster {
    /// Create a roster poller. Polling begins on [`start`](Self::start).
    pub fn new(store: Arc<dyn PresenceStore>, config: PresenceConfig, clock: SharedClock) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(RosterInner {
                store,
                config,
                clock,
                tx,
                refresh: Arc::new(Notify::new()),
                state: Mutex::new(RosterState {
                    snapshot: RosterSnapshot::default(),
                    visible: true,
                    cancel: None,
                }),
            }),
        }
    }

    /// Start polling. A second `start` replaces the previous loop.
    pub fn start(&self) {
        let token = CancellationToken::new();
        let previous = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.cancel.replace(token.clone())
        };
        if let Some(previous) = previous {
            previous.cancel();
        }

        // The task holds only the notify handle and a weak reference, so a
        // dropped roster cannot leak its poll timer.
        let weak = Arc::downgrade(&self.inner);
        let refresh = Arc::clone(&self.inner.refresh);
        let interval = Duration::from_millis(self.inner.config.roster_poll_interval_ms);
        tokio::spawn(async move {
            {
                let Some(inner) = weak.upgrade() else { return };
                refresh_once(&inner).await;
            }
            loop {
                let visible = {
                    let Some(inner) = weak.upgrade() else { break };
                    let state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.visible
                };
                if visible {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = refresh.notified() => {}
                        _ = tokio::time::sleep(interval) => {}
                    }
                } else {
                    // Tab hidden — no polling until visibility returns.
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = refresh.notified() => {}
                    }
                }
                let Some(inner) = weak.upgrade() else { break };
                let visible_now = {
                    let state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
                    state.visible
                };
                if visible_now {
                    refresh_once(&inner).await;
                }
            }
        });
        info!("presence roster polling started");
    }

    /// Stop polling.
    pub fn stop(&self) {
        let cancel = {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.cancel.take()
        };
        if let Some(token) = cancel {
            token.cancel();
            info!("presence roster polling stopped");
        }
    }

    /// Report document/tab visibility. Polling pauses while hidden and
    /// refreshes immediately when visibility returns.
    pub fn set_visible(&self, visible: bool) {
        {
            let mut state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
            state.visible = visible;
        }
        debug!(visible, "roster visibility changed");
        self.inner.refresh.notify_one();
    }

    /// Last-known roster snapshot.
    pub fn snapshot(&self) -> RosterSnapshot {
        let state = self.inner.state.lock().unwrap_or_else(|e| e.into_inner());
        state.snapshot.clone()
    }

    /// Subscribe to roster updates (one per poll).
    pub fn subscribe(&self) -> broadcast::Receiver<RosterSnapshot> {
        self.inner.tx.subscribe()
    }
}

async fn refresh_once(inner: &Arc<RosterInner>) {
    let window = Duration::from_millis(inner.config.recency_window_ms);
    let budget = Duration::from_millis(inner.config.request_timeout_ms);
    let outcome = tokio::time::timeout(budget, inner.store.list_presence(window)).await;

    let snapshot = {
        let mut state = inner.state.lock().unwrap_or_else(|e| e.into_inner());
        match outcome {
            Ok(Ok(records)) => {
                let now = inner.clock.now();
                let entries = records
                    .into_iter()
                    .map(|record| RosterEntry {
                        online: record.is_online_within(window, now),
                        record,
                    })
                    .collect();
                state.snapshot = RosterSnapshot {
                    entries,
                    error: None,
                    refreshed_at: Some(now),
                };
            }
            Ok(Err(err)) => {
                warn!(error = %err, "roster read failed; keeping last-known entries");
                state.snapshot.error = Some(err.to_string());
            }
            Err(_) => {
                warn!("roster read timed out; keeping last-known entries");
                state.snapshot.error = Some("roster read timed out".to_owned());
            }
        }
        state.snapshot.clone()
    };

    let _ = inner.tx.send(snapshot);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::test_utils::{FakePresenceStore, ManualClock};
    use chrono::TimeZone;

    fn record_with_age(clock: &ManualClock, age_ms: i64) -> PresenceRecord {
        PresenceRecord {
            subject_id: "op-1".to_owned(),
            status: PresenceStatus::Online,
            net_id: None,
            last_activity_at: clock.now() - chrono::Duration::milliseconds(age_ms),
            is_transmitting: false,
        }
    }

    fn fast_config() -> PresenceConfig {
        PresenceConfig {
            heartbeat_interval_ms: 25,
            roster_poll_interval_ms: 25,
            request_timeout_ms: 500,
            ..Default::default()
        }
    }

    #[test]
    fn recency_boundary_classification() {
        let clock = ManualClock::at(chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let window = Duration::from_millis(90_000);

        let fresh = record_with_age(&clock, 89_000);
        assert!(fresh.is_online_within(window, clock.now()));

        let stale = record_with_age(&clock, 91_000);
        assert!(!stale.is_online_within(window, clock.now()));
    }

    #[test]
    fn explicit_offline_is_never_online() {
        let clock = ManualClock::at(chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let mut record = record_with_age(&clock, 1_000);
        record.status = PresenceStatus::Offline;
        assert!(!record.is_online_within(Duration::from_millis(90_000), clock.now()));
    }

    #[tokio::test]
    async fn start_writes_immediately() {
        let store = Arc::new(FakePresenceStore::new());
        let heartbeat = PresenceHeartbeat::new(store.clone(), fast_config(), ManualClock::shared());

        heartbeat
            .start("op-1", PresenceStatus::InCall, Some("net-alpha".to_owned()))
            .await;

        let writes = store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].subject_id, "op-1");
        assert_eq!(writes[0].status, PresenceStatus::InCall);
        assert_eq!(writes[0].net_id.as_deref(), Some("net-alpha"));
        heartbeat.stop().await;
    }

    #[tokio::test]
    async fn no_cadence_without_a_net() {
        let store = Arc::new(FakePresenceStore::new());
        let heartbeat = PresenceHeartbeat::new(store.clone(), fast_config(), ManualClock::shared());

        heartbeat.start("op-1", PresenceStatus::Online, None).await;
        tokio::time::sleep(Duration::from_millis(120)).await;

        assert_eq!(store.writes().len(), 1, "idle clients write exactly once");
    }

    #[tokio::test]
    async fn heartbeat_repeats_while_on_net() {
        let store = Arc::new(FakePresenceStore::new());
        let heartbeat = PresenceHeartbeat::new(store.clone(), fast_config(), ManualClock::shared());

        heartbeat
            .start("op-1", PresenceStatus::InCall, Some("net-alpha".to_owned()))
            .await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        heartbeat.stop().await;

        assert!(store.writes().len() >= 3, "expected periodic heartbeats");
    }

    #[tokio::test]
    async fn stop_sends_final_online_write() {
        let store = Arc::new(FakePresenceStore::new());
        let heartbeat = PresenceHeartbeat::new(store.clone(), fast_config(), ManualClock::shared());

        heartbeat
            .start("op-1", PresenceStatus::InCall, Some("net-alpha".to_owned()))
            .await;
        heartbeat.stop().await;

        let writes = store.writes();
        let last = writes.last().unwrap();
        assert_eq!(last.status, PresenceStatus::Online);
        assert_eq!(last.net_id, None);
        assert!(!last.is_transmitting);
    }

    #[tokio::test]
    async fn transmit_change_writes_out_of_band() {
        let store = Arc::new(FakePresenceStore::new());
        let config = PresenceConfig {
            heartbeat_interval_ms: 60_000, // cadence far away — only explicit writes
            ..fast_config()
        };
        let heartbeat = PresenceHeartbeat::new(store.clone(), config, ManualClock::shared());

        heartbeat
            .start("op-1", PresenceStatus::InCall, Some("net-alpha".to_owned()))
            .await;
        heartbeat.set_transmitting(true).await;

        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert!(writes[1].is_transmitting);
        heartbeat.stop().await;
    }

    #[tokio::test]
    async fn write_failures_count_and_recover() {
        let store = Arc::new(FakePresenceStore::new());
        store.fail_writes(true);
        let heartbeat = PresenceHeartbeat::new(store.clone(), fast_config(), ManualClock::shared());

        heartbeat
            .start("op-1", PresenceStatus::InCall, Some("net-alpha".to_owned()))
            .await;
        let health = heartbeat.health();
        assert!(!health.last_write_success);
        assert_eq!(health.write_failure_count, 1);

        // The next natural tick is the retry mechanism.
        store.fail_writes(false);
        tokio::time::sleep(Duration::from_millis(80)).await;
        let health = heartbeat.health();
        assert!(health.last_write_success);
        assert_eq!(health.write_failure_count, 0);
        heartbeat.stop().await;
    }

    #[tokio::test]
    async fn roster_classifies_and_keeps_last_known_on_failure() {
        let clock = ManualClock::at(chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let store = Arc::new(FakePresenceStore::new());
        store.set_records(vec![
            record_with_age(&clock, 1_000),
            record_with_age(&clock, 120_000),
        ]);

        let roster = PresenceRoster::new(store.clone(), fast_config(), Arc::new(clock.clone()));
        let mut rx = roster.subscribe();
        roster.start();

        let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.online_count(), 1);
        assert!(snapshot.error.is_none());

        // Fail the next poll — entries stay, error surfaces.
        store.fail_lists(true);
        let snapshot = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.entries.len(), 2, "last-known roster preserved");
        assert!(snapshot.error.is_some());

        roster.stop();
    }

    #[tokio::test]
    async fn hidden_roster_pauses_and_resumes_on_visibility() {
        let store = Arc::new(FakePresenceStore::new());
        let roster = PresenceRoster::new(store.clone(), fast_config(), ManualClock::shared());
        roster.start();
        tokio::time::sleep(Duration::from_millis(40)).await;

        roster.set_visible(false);
        tokio::time::sleep(Duration::from_millis(40)).await;
        let paused_count = store.lists();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(store.lists(), paused_count, "no polls while hidden");

        roster.set_visible(true);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.lists() > paused_count, "immediate refresh on regain");

        roster.stop();
    }
}
