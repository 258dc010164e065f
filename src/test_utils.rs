//! Shared test fakes used across multiple test modules.
//!
//! Consolidates the in-memory collaborator implementations and the manual
//! clock so `latency`, `presence`, `readiness`, and `voice` tests don't each
//! roll their own.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::backend::{HealthEndpoint, PresenceStore, PresenceWrite, RoomStatus, TokenGrant,
    VoiceBackend};
use crate::clock::{Clock, SharedClock};
use crate::error::{CoordError, Result};
use crate::presence::PresenceRecord;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Deterministic, manually advanced clock.
#[derive(Clone)]
pub(crate) struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Clock pinned at the given instant.
    pub(crate) fn at(instant: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(instant)),
        }
    }

    /// Shared clock handle at a fixed, arbitrary instant.
    pub(crate) fn shared() -> SharedClock {
        Arc::new(Self::at(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()))
    }

    /// Current instant.
    pub(crate) fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    /// Advance the clock.
    #[allow(dead_code)]
    pub(crate) fn advance(&self, delta: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Health endpoint that counts pings and returns a fixed latency or failure.
pub(crate) struct CountingHealthEndpoint {
    latency: Duration,
    failure: Option<String>,
    pings: AtomicUsize,
}

impl CountingHealthEndpoint {
    pub(crate) fn healthy(latency: Duration) -> Self {
        Self {
            latency,
            failure: None,
            pings: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(reason: &str) -> Self {
        Self {
            latency: Duration::ZERO,
            failure: Some(reason.to_owned()),
            pings: AtomicUsize::new(0),
        }
    }

    pub(crate) fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthEndpoint for CountingHealthEndpoint {
    async fn ping(&self) -> Result<Duration> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        match &self.failure {
            Some(reason) => Err(CoordError::Transport(reason.clone())),
            None => Ok(self.latency),
        }
    }
}

/// In-memory presence store with injectable failures.
pub(crate) struct FakePresenceStore {
    writes: Mutex<Vec<PresenceWrite>>,
    records: Mutex<Vec<PresenceRecord>>,
    fail_writes: AtomicBool,
    fail_lists: AtomicBool,
    list_calls: AtomicUsize,
}

impl FakePresenceStore {
    pub(crate) fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            records: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            fail_lists: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn writes(&self) -> Vec<PresenceWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub(crate) fn set_records(&self, records: Vec<PresenceRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub(crate) fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_lists(&self, fail: bool) {
        self.fail_lists.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PresenceStore for FakePresenceStore {
    async fn write_presence(&self, write: PresenceWrite) -> Result<PresenceRecord> {
        if self.fail_writes.load(Ordering::SeqCst) {
            self.writes.lock().unwrap().push(write);
            return Err(CoordError::Transport("injected write failure".to_owned()));
        }
        let record = PresenceRecord {
            subject_id: write.subject_id.clone(),
            status: write.status,
            net_id: write.net_id.clone(),
            last_activity_at: Utc::now(),
            is_transmitting: write.is_transmitting,
        };
        self.writes.lock().unwrap().push(write);
        Ok(record)
    }

    async fn list_presence(&self, _recency_window: Duration) -> Result<Vec<PresenceRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_lists.load(Ordering::SeqCst) {
            return Err(CoordError::Transport("injected list failure".to_owned()));
        }
        Ok(self.records.lock().unwrap().clone())
    }
}

/// How the fake voice backend answers token requests.
#[derive(Debug, Clone)]
pub(crate) enum FakeVoiceMode {
    /// Issue a token for every requested net.
    Grant,
    /// Return a grant with no tokens and the given denial reason.
    Deny(String),
    /// Fail as if the infrastructure were unreachable.
    Unreachable,
}

/// In-memory voice backend with configurable outcome and latency.
pub(crate) struct FakeVoiceBackend {
    mode: Mutex<FakeVoiceMode>,
    delay: Mutex<Duration>,
    released: Mutex<Vec<(String, String)>>,
    fail_release: AtomicBool,
}

impl FakeVoiceBackend {
    pub(crate) fn new(mode: FakeVoiceMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            delay: Mutex::new(Duration::ZERO),
            released: Mutex::new(Vec::new()),
            fail_release: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub(crate) fn released(&self) -> Vec<(String, String)> {
        self.released.lock().unwrap().clone()
    }

    pub(crate) fn fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceBackend for FakeVoiceBackend {
    async fn issue_tokens(&self, net_ids: &[String], _identity: &str) -> Result<TokenGrant> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mode = self.mode.lock().unwrap().clone();
        match mode {
            FakeVoiceMode::Grant => Ok(TokenGrant {
                tokens: net_ids
                    .iter()
                    .map(|id| (id.clone(), format!("tok-{id}")))
                    .collect(),
                errors: Vec::new(),
                warnings: Vec::new(),
            }),
            FakeVoiceMode::Deny(reason) => Ok(TokenGrant {
                errors: vec![reason],
                ..TokenGrant::default()
            }),
            FakeVoiceMode::Unreachable => Err(CoordError::Unavailable(
                "voice infrastructure unreachable".to_owned(),
            )),
        }
    }

    async fn room_status(&self, _net_id: &str) -> Result<RoomStatus> {
        Ok(RoomStatus {
            is_active: true,
            participant_count: 3,
        })
    }

    async fn release_token(&self, net_id: &str, identity: &str) -> Result<()> {
        self.released
            .lock()
            .unwrap()
            .push((net_id.to_owned(), identity.to_owned()));
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(CoordError::Transport("injected release failure".to_owned()));
        }
        Ok(())
    }
}
