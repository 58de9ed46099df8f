//! Shared test doubles: an in-memory signaling transport, a capture source
//! that blocks until released, and directory fakes.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify, Mutex as AsyncMutex};

use lectern_classroom::error::{Error, Result};
use lectern_classroom::media::{
    LocalMedia, MediaAccessError, MediaConstraints, MediaSource, SyntheticMediaSource,
};
use lectern_classroom::session::RoomDirectory;
use lectern_classroom::signaling::protocol::{JoinRoom, SignalEnvelope};
use lectern_classroom::signaling::{SignalingEvent, SignalingTransport};

/// Initialize tracing for tests (first caller wins).
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug,webrtc=warn,webrtc_ice=warn,webrtc_mdns=warn")
        .try_init();
}

/// In-memory transport: records everything sent, and hands the test an
/// injector for inbound events.
pub struct FakeSignaling {
    pub joins: Mutex<Vec<JoinRoom>>,
    pub sent: Mutex<Vec<SignalEnvelope>>,
    pub connected: Mutex<bool>,
    /// Latched by `disconnect`, like the real transport: a connect racing a
    /// teardown must fail rather than resurrect the link.
    pub closed: Mutex<bool>,
    pub disconnects: Mutex<u32>,
    events_tx: mpsc::UnboundedSender<SignalingEvent>,
    events_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<SignalingEvent>>>,
}

impl FakeSignaling {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            joins: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
            connected: Mutex::new(false),
            closed: Mutex::new(false),
            disconnects: Mutex::new(0),
            events_tx,
            events_rx: AsyncMutex::new(Some(events_rx)),
        })
    }

    /// Inject an inbound event as if the relay delivered it.
    pub fn inject(&self, event: SignalingEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Envelopes sent so far whose payload kind matches.
    pub fn sent_of_kind(&self, kind: &str) -> Vec<SignalEnvelope> {
        self.sent
            .lock()
            .iter()
            .filter(|envelope| envelope.payload.kind() == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl SignalingTransport for FakeSignaling {
    async fn connect(&self) -> Result<()> {
        // Held across the connected update so a racing disconnect cannot
        // interleave between the check and the set.
        let closed = self.closed.lock();
        if *closed {
            return Err(Error::Transport("transport already closed".to_string()));
        }
        *self.connected.lock() = true;
        Ok(())
    }

    async fn join_room(&self, join: JoinRoom) -> Result<()> {
        if !*self.connected.lock() {
            return Err(Error::Transport("not connected".to_string()));
        }
        self.joins.lock().push(join);
        Ok(())
    }

    async fn send_signal(&self, envelope: SignalEnvelope) -> Result<()> {
        self.sent.lock().push(envelope);
        Ok(())
    }

    async fn events(&self) -> Result<mpsc::UnboundedReceiver<SignalingEvent>> {
        self.events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Transport("events already taken".to_string()))
    }

    async fn disconnect(&self) {
        let mut closed = self.closed.lock();
        *closed = true;
        *self.connected.lock() = false;
        *self.disconnects.lock() += 1;
    }
}

/// Capture source that parks `acquire` until the test releases it, to race
/// joins against leaves deterministically.
pub struct BlockingMediaSource {
    gate: Arc<Notify>,
    inner: SyntheticMediaSource,
}

impl BlockingMediaSource {
    pub fn new() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (
            Arc::new(Self {
                gate: gate.clone(),
                inner: SyntheticMediaSource::new(),
            }),
            gate,
        )
    }
}

#[async_trait]
impl MediaSource for BlockingMediaSource {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> std::result::Result<Arc<LocalMedia>, MediaAccessError> {
        self.gate.notified().await;
        self.inner.acquire(constraints).await
    }
}

/// Capture source that always denies, for fatal-join coverage.
pub struct DeniedMediaSource;

#[async_trait]
impl MediaSource for DeniedMediaSource {
    async fn acquire(
        &self,
        _constraints: MediaConstraints,
    ) -> std::result::Result<Arc<LocalMedia>, MediaAccessError> {
        Err(MediaAccessError::PermissionDenied)
    }
}

/// Directory that always fails; joins must proceed without course context.
pub struct FailingDirectory;

#[async_trait]
impl RoomDirectory for FailingDirectory {
    async fn course_for_room(&self, _room_id: &str) -> Result<Option<String>> {
        Err(Error::Directory("directory unavailable".to_string()))
    }
}
