//! Room session controller.
//!
//! One `RoomSession` drives one stay in one room: acquire media, resolve
//! course context, connect signaling, announce, then pump signaling events
//! into the peer mesh until `leave`. The session epoch cancels an in-flight
//! join that raced a leave: every await in the join sequence is followed by
//! an epoch check, and a stale join abandons its work instead of completing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClassroomConfig;
use crate::error::{Error, Result};
use crate::media::{LocalMedia, MediaConstraints, MediaSource, SyntheticMediaSource};
use crate::peer::{PeerManager, PeerSnapshot};
use crate::session::events::SessionEvent;
use crate::session::metadata::{HttpRoomDirectory, RoomDirectory};
use crate::signaling::protocol::JoinRoom;
use crate::signaling::{SignalingEvent, SignalingTransport, WsSignaling};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Joining,
    Active,
    Left,
}

/// What this session announced when it joined.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub room_id: String,
    pub user_id: String,
    pub course_id: Option<String>,
}

/// Controller for one participant's stay in one room.
///
/// Owns its transport outright; two sessions in a process share nothing.
/// Construct a fresh session per join.
pub struct RoomSession {
    config: ClassroomConfig,
    transport: Arc<dyn SignalingTransport>,
    media_source: Arc<dyn MediaSource>,
    directory: Option<Arc<dyn RoomDirectory>>,

    phase: parking_lot::Mutex<Phase>,
    /// Bumped by `leave`; join sequences abandon themselves on mismatch.
    epoch: AtomicU64,
    context: parking_lot::Mutex<Option<SessionContext>>,

    media: AsyncMutex<Option<Arc<LocalMedia>>>,
    peers: AsyncMutex<Option<Arc<PeerManager>>>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
}

impl RoomSession {
    /// Build a session from explicit dependencies.
    pub fn new(
        config: ClassroomConfig,
        transport: Arc<dyn SignalingTransport>,
        media_source: Arc<dyn MediaSource>,
        directory: Option<Arc<dyn RoomDirectory>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            transport,
            media_source,
            directory,
            phase: parking_lot::Mutex::new(Phase::Idle),
            epoch: AtomicU64::new(0),
            context: parking_lot::Mutex::new(None),
            media: AsyncMutex::new(None),
            peers: AsyncMutex::new(None),
            pump: parking_lot::Mutex::new(None),
            events_tx,
            events_rx: AsyncMutex::new(Some(events_rx)),
        }
    }

    /// Build a session with the default stack: WebSocket signaling, the
    /// synthetic media source, and the HTTP directory when configured.
    /// Embedders with real capture swap in their own [`MediaSource`].
    pub fn with_defaults(config: ClassroomConfig) -> Result<Self> {
        config.validate()?;
        let transport: Arc<dyn SignalingTransport> = Arc::new(WsSignaling::new(config.clone()));
        let directory: Option<Arc<dyn RoomDirectory>> = match &config.directory_url {
            Some(base) => Some(Arc::new(HttpRoomDirectory::new(
                base,
                Duration::from_millis(config.directory_timeout_ms),
            )?)),
            None => None,
        };
        Ok(Self::new(
            config,
            transport,
            Arc::new(SyntheticMediaSource::new()),
            directory,
        ))
    }

    /// Join a room. Completes once membership is announced and the event
    /// pump is running; an empty room joins successfully with zero peers.
    ///
    /// A concurrent [`RoomSession::leave`] cancels the join: the sequence
    /// notices the stale epoch at its next checkpoint, releases whatever it
    /// had acquired, and returns [`Error::SessionClosed`].
    ///
    /// A failed join closes the session; retries happen on a fresh session,
    /// matching the one-session-per-stay ownership model.
    pub async fn join(&self, room_id: &str, user_id: &str) -> Result<()> {
        self.config.validate()?;
        // The epoch is captured inside the phase critical section; leave
        // bumps it under the same lock, so a bump from a racing leave is
        // always caught by a later checkpoint.
        let epoch = {
            let mut phase = self.phase.lock();
            match *phase {
                Phase::Idle => *phase = Phase::Joining,
                Phase::Left => return Err(Error::SessionClosed),
                Phase::Joining | Phase::Active => {
                    return Err(Error::Other("session already joined".to_string()))
                }
            }
            self.epoch.load(Ordering::SeqCst)
        };
        info!(room_id, user_id, "joining room");

        let result = self.run_join(epoch, room_id, user_id).await;
        match &result {
            Ok(()) => {
                let mut phase = self.phase.lock();
                if *phase == Phase::Joining {
                    *phase = Phase::Active;
                }
                info!(room_id, user_id, "room joined");
            }
            Err(Error::SessionClosed) => {
                debug!(room_id, "join cancelled by leave");
                // The racing leave released what existed at its moment; this
                // releases anything the cancelled sequence stored afterwards.
                // Both passes are idempotent.
                self.release_all().await;
            }
            Err(e) => {
                warn!(room_id, error = %e, "join failed");
                self.release_all().await;
                // The transport is closed by release_all; a retry happens on
                // a fresh session, so the failed one is left closed too.
                let mut phase = self.phase.lock();
                if *phase == Phase::Joining {
                    *phase = Phase::Left;
                }
            }
        }
        result
    }

    async fn run_join(&self, epoch: u64, room_id: &str, user_id: &str) -> Result<()> {
        // 1. Local media. Failure is fatal; callers wanting audio-only
        //    degradation retry on a fresh session with narrower constraints.
        let media = self
            .media_source
            .acquire(MediaConstraints::default())
            .await
            .map_err(Error::MediaAccess)?;
        if self.epoch_stale(epoch) {
            media.stop();
            return Err(Error::SessionClosed);
        }
        *self.media.lock().await = Some(media.clone());
        self.check_epoch(epoch)?;

        // 2. Course context, best effort.
        let course_id = match &self.directory {
            Some(directory) => match directory.course_for_room(room_id).await {
                Ok(course) => course,
                Err(e) => {
                    warn!(room_id, error = %e, "course lookup failed; joining without course context");
                    None
                }
            },
            None => None,
        };
        self.check_epoch(epoch)?;

        // 3. Signaling link.
        self.transport
            .connect()
            .await
            .map_err(|e| self.cancel_or(epoch, e))?;
        self.check_epoch(epoch)?;

        // 4. Announce membership. This is the attendance hook: the relay
        //    records the join; this side only supplies the context.
        let join = JoinRoom {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            course_id: course_id.clone(),
        };
        self.transport
            .join_room(join)
            .await
            .map_err(|e| self.cancel_or(epoch, e))?;
        self.check_epoch(epoch)?;

        *self.context.lock() = Some(SessionContext {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            course_id,
        });

        // 5. Peer mesh and event pump.
        let manager = Arc::new(PeerManager::new(
            &self.config,
            self.transport.clone(),
            media,
            user_id.to_string(),
            self.events_tx.clone(),
        )?);
        *self.peers.lock().await = Some(manager.clone());
        self.check_epoch(epoch)?;

        let signaling_rx = self
            .transport
            .events()
            .await
            .map_err(|e| self.cancel_or(epoch, e))?;
        let pump = tokio::spawn(run_event_pump(
            manager,
            self.events_tx.clone(),
            signaling_rx,
        ));
        *self.pump.lock() = Some(pump);

        if self.epoch_stale(epoch) {
            // A leave that ran before the pump was stored could not abort it.
            if let Some(pump) = self.pump.lock().take() {
                pump.abort();
            }
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    /// Flip the microphone. Returns the new muted state. Pure local flag:
    /// tracks stay attached and nothing is renegotiated, so a double toggle
    /// restores the original state with no signaling at all.
    pub async fn toggle_mute(&self) -> Result<bool> {
        let media = self
            .media
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::Other("no local media; join first".to_string()))?;
        let enabled = !media.is_audio_enabled();
        media.set_audio_enabled(enabled);
        let muted = !enabled;
        info!(muted, "microphone toggled");
        Ok(muted)
    }

    pub async fn is_muted(&self) -> bool {
        self.media
            .lock()
            .await
            .as_ref()
            .map(|media| !media.is_audio_enabled())
            .unwrap_or(false)
    }

    /// Leave the room. Idempotent, and every step runs even if an earlier
    /// one fails: stop the pump, announce departure and close the link,
    /// tear down the mesh, release media. Also cancels an in-flight join.
    pub async fn leave(&self) {
        {
            let mut phase = self.phase.lock();
            // Bumped under the phase lock, paired with the capture in join.
            self.epoch.fetch_add(1, Ordering::SeqCst);
            if *phase == Phase::Left {
                debug!("leave on closed session ignored");
                return;
            }
            *phase = Phase::Left;
        }
        info!("leaving room");
        self.release_all().await;
        info!("room session closed");
    }

    async fn release_all(&self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
        // Disconnect first so the relay broadcasts our departure promptly;
        // it carries the best-effort leave announcement.
        self.transport.disconnect().await;
        if let Some(manager) = self.peers.lock().await.take() {
            manager.teardown_all().await;
        }
        if let Some(media) = self.media.lock().await.take() {
            media.stop();
        }
    }

    /// Take the UI event stream. Yields `Some` exactly once.
    pub async fn events(&self) -> Result<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Other("session event stream already taken".to_string()))
    }

    /// What was announced at join time, if the session got that far.
    pub fn context(&self) -> Option<SessionContext> {
        self.context.lock().clone()
    }

    pub async fn peer_count(&self) -> usize {
        match self.peers.lock().await.as_ref() {
            Some(manager) => manager.peer_count().await,
            None => 0,
        }
    }

    /// Roster snapshot for the UI.
    pub async fn peer_snapshot(&self) -> Vec<PeerSnapshot> {
        match self.peers.lock().await.as_ref() {
            Some(manager) => manager.snapshot().await,
            None => Vec::new(),
        }
    }

    fn epoch_stale(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) != epoch
    }

    fn check_epoch(&self, epoch: u64) -> Result<()> {
        if self.epoch_stale(epoch) {
            Err(Error::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Shape an error from a join step: if a leave raced us, the join is
    /// cancelled rather than failed.
    fn cancel_or(&self, epoch: u64, e: Error) -> Error {
        if self.epoch_stale(epoch) {
            Error::SessionClosed
        } else {
            e
        }
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

/// Feed signaling traffic into the mesh and forward transport health to the
/// UI. One bad signal never stops the pump.
async fn run_event_pump(
    manager: Arc<PeerManager>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    mut signaling_rx: mpsc::UnboundedReceiver<SignalingEvent>,
) {
    while let Some(event) = signaling_rx.recv().await {
        match event {
            SignalingEvent::PeerJoined { peer_id } => {
                if let Err(e) = manager.handle_peer_joined(&peer_id).await {
                    warn!(peer_id = %peer_id, error = %e, "failed to connect to joining peer");
                }
            }
            SignalingEvent::Signal(envelope) => {
                let kind = envelope.payload.kind();
                let caller = envelope.caller.clone();
                if let Err(e) = manager.handle_signal(envelope).await {
                    warn!(peer_id = %caller, kind, error = %e, "failed to apply signal");
                }
            }
            SignalingEvent::PeerLeft { peer_id } => {
                if let Err(e) = manager.handle_peer_left(&peer_id).await {
                    warn!(peer_id = %peer_id, error = %e, "failed to release departed peer");
                }
            }
            SignalingEvent::TransportLost => {
                warn!("signaling transport lost; mesh frozen until a new session");
                let _ = events_tx.send(SessionEvent::TransportLost);
            }
            SignalingEvent::TransportReconnected => {
                info!("signaling transport reconnected");
                let _ = events_tx.send(SessionEvent::TransportReconnected);
            }
        }
    }
    debug!("signaling event stream ended");
}
