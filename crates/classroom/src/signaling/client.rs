//! WebSocket signaling client.
//!
//! One [`WsSignaling`] owns one relay link: a writer task draining an
//! outbound queue, a reader task dispatching inbound frames, and a heartbeat.
//! When the link dies underneath an established session the reader's
//! supervisor silently redials with the same bounded backoff budget and
//! re-announces the room; established peer connections never notice.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

use crate::config::ClassroomConfig;
use crate::error::{Error, Result};
use crate::signaling::protocol::{ClientMessage, JoinRoom, ServerMessage, SignalEnvelope};
use crate::signaling::{SignalingEvent, SignalingTransport};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// One established link: outbound queue plus its pump tasks.
struct Link {
    send_tx: mpsc::UnboundedSender<ClientMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

struct Shared {
    config: ClassroomConfig,
    link: AsyncMutex<Option<Link>>,
    events_tx: mpsc::UnboundedSender<SignalingEvent>,
    events_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<SignalingEvent>>>,
    /// Remembered join announcement, re-sent after a silent reconnect.
    last_join: parking_lot::Mutex<Option<JoinRoom>>,
    /// Set once by `disconnect`; the supervisor checks it before redialing.
    closed: AtomicBool,
    parse_failures: AtomicU64,
}

/// WebSocket implementation of [`SignalingTransport`].
pub struct WsSignaling {
    shared: Arc<Shared>,
}

impl WsSignaling {
    pub fn new(config: ClassroomConfig) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(Shared {
                config,
                link: AsyncMutex::new(None),
                events_tx,
                events_rx: AsyncMutex::new(Some(events_rx)),
                last_join: parking_lot::Mutex::new(None),
                closed: AtomicBool::new(false),
                parse_failures: AtomicU64::new(0),
            }),
        }
    }
}

#[async_trait]
impl SignalingTransport for WsSignaling {
    async fn connect(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("transport already closed".to_string()));
        }
        {
            let guard = self.shared.link.lock().await;
            if guard.is_some() {
                return Ok(());
            }
        }

        // Dial outside the lock so disconnect() is never blocked behind the
        // retry budget.
        let stream = dial_with_backoff(&self.shared.config).await?;

        let mut guard = self.shared.link.lock().await;
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("transport already closed".to_string()));
        }
        if guard.is_none() {
            *guard = Some(start_link(self.shared.clone(), stream));
        }
        Ok(())
    }

    async fn join_room(&self, join: JoinRoom) -> Result<()> {
        *self.shared.last_join.lock() = Some(join.clone());
        let guard = self.shared.link.lock().await;
        let link = guard
            .as_ref()
            .ok_or_else(|| Error::Transport("signaling transport is not connected".to_string()))?;
        link.send_tx
            .send(ClientMessage::Join(join.clone()))
            .map_err(|_| Error::Transport("signaling link is shutting down".to_string()))?;
        info!(room_id = %join.room_id, user_id = %join.user_id, "room join announced");
        Ok(())
    }

    async fn send_signal(&self, envelope: SignalEnvelope) -> Result<()> {
        let guard = self.shared.link.lock().await;
        match guard.as_ref() {
            Some(link) => {
                // A send racing link death is dropped silently, same as the
                // disconnected case below.
                let _ = link.send_tx.send(ClientMessage::Signal(envelope));
                Ok(())
            }
            None => {
                debug!(
                    kind = envelope.payload.kind(),
                    target = %envelope.target,
                    "dropping signal; transport is disconnected"
                );
                Ok(())
            }
        }
    }

    async fn events(&self) -> Result<mpsc::UnboundedReceiver<SignalingEvent>> {
        self.shared
            .events_rx
            .lock()
            .await
            .take()
            .ok_or_else(|| Error::Transport("signaling event stream already taken".to_string()))
    }

    async fn disconnect(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let link = self.shared.link.lock().await.take();
        if let Some(link) = link {
            // Best-effort leave; the writer drains the queue, sends a close
            // frame, and exits once its channel is dropped with the link.
            let _ = link.send_tx.send(ClientMessage::Leave);
            link.reader.abort();
            link.heartbeat.abort();
            debug!("signaling transport disconnected");
        }
    }
}

/// Dial with bounded exponential backoff. Exhaustion is terminal.
async fn dial_with_backoff(config: &ClassroomConfig) -> Result<WsStream> {
    let mut backoff = Duration::from_millis(config.connect_backoff_ms);
    let mut last_error = String::new();
    for attempt in 1..=config.connect_attempts {
        match connect_async(config.signaling_url.as_str()).await {
            Ok((stream, _response)) => {
                debug!(url = %config.signaling_url, attempt, "signaling websocket connected");
                return Ok(stream);
            }
            Err(e) => {
                last_error = e.to_string();
                if attempt < config.connect_attempts {
                    warn!(
                        url = %config.signaling_url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %last_error,
                        "signaling connect failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }
    Err(Error::TransportConnect {
        url: config.signaling_url.clone(),
        attempts: config.connect_attempts,
        reason: last_error,
    })
}

/// Spawn the pump tasks for a freshly dialed stream.
fn start_link(shared: Arc<Shared>, stream: WsStream) -> Link {
    let (ws_write, ws_read) = stream.split();
    let (send_tx, send_rx) = mpsc::unbounded_channel::<ClientMessage>();

    let writer = tokio::spawn(run_writer(ws_write, send_rx));

    let reader = tokio::spawn({
        let shared = shared.clone();
        async move {
            run_reader(shared.clone(), ws_read).await;
            // Boxed so the reader's future does not embed its own type
            // through the respawn in the supervisor.
            supervise_boxed(shared).await;
        }
    });

    let heartbeat = tokio::spawn({
        let send_tx = send_tx.clone();
        async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await; // immediate first tick
            loop {
                ticker.tick().await;
                if send_tx.send(ClientMessage::Ping).is_err() {
                    break;
                }
            }
        }
    });

    Link {
        send_tx,
        writer,
        reader,
        heartbeat,
    }
}

async fn run_writer(mut ws_write: WsSink, mut send_rx: mpsc::UnboundedReceiver<ClientMessage>) {
    while let Some(message) = send_rx.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "failed to encode signaling message");
                continue;
            }
        };
        if ws_write.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = ws_write.send(Message::Close(None)).await;
}

async fn run_reader(shared: Arc<Shared>, mut ws_read: WsSource) {
    while let Some(frame) = ws_read.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch_frame(&shared, &text),
            Ok(Message::Binary(data)) => {
                if let Ok(text) = String::from_utf8(data) {
                    dispatch_frame(&shared, &text);
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                match &err {
                    WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                        debug!("signaling websocket closed: {err}");
                    }
                    _ => {
                        warn!("signaling websocket error: {err}");
                    }
                }
                break;
            }
        }
    }
}

fn dispatch_frame(shared: &Arc<Shared>, text: &str) {
    let message = match serde_json::from_str::<ServerMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            let total = shared.parse_failures.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(error = %e, total_failures = total, "dropping unparseable signaling frame");
            return;
        }
    };

    trace!(message = message.name(), "signaling frame");
    let event = match message {
        ServerMessage::PeerJoined { peer_id } => SignalingEvent::PeerJoined { peer_id },
        ServerMessage::PeerLeft { peer_id } => SignalingEvent::PeerLeft { peer_id },
        ServerMessage::Signal(envelope) => SignalingEvent::Signal(envelope),
        ServerMessage::Pong => return,
        ServerMessage::Error { message } => {
            warn!(message = %message, "relay reported protocol error");
            return;
        }
    };
    let _ = shared.events_tx.send(event);
}

fn supervise_boxed(shared: Arc<Shared>) -> BoxFuture<'static, ()> {
    Box::pin(supervise_reconnect(shared))
}

/// Runs when the reader dies without `disconnect` being the cause: silently
/// redial, re-announce the room, and report the outcome as an event.
async fn supervise_reconnect(shared: Arc<Shared>) {
    if shared.closed.load(Ordering::SeqCst) {
        return;
    }
    warn!("signaling link lost; attempting to re-establish");

    // Drop the dead link so sends fail silently while redialing.
    shared.link.lock().await.take();

    match dial_with_backoff(&shared.config).await {
        Ok(stream) => {
            let mut guard = shared.link.lock().await;
            if shared.closed.load(Ordering::SeqCst) {
                return;
            }
            let link = start_link(shared.clone(), stream);
            if let Some(join) = shared.last_join.lock().clone() {
                let _ = link.send_tx.send(ClientMessage::Join(join));
            }
            *guard = Some(link);
            drop(guard);
            info!("signaling link re-established");
            let _ = shared.events_tx.send(SignalingEvent::TransportReconnected);
        }
        Err(e) => {
            warn!(error = %e, "signaling reconnect exhausted; giving up");
            let _ = shared.events_tx.send(SignalingEvent::TransportLost);
        }
    }
}

impl Drop for WsSignaling {
    fn drop(&mut self) {
        // Tasks hold only Arc<Shared>; abort them if the transport is
        // dropped without an explicit disconnect.
        if let Some(link) = self.shared.link.try_lock().ok().and_then(|mut g| g.take()) {
            link.writer.abort();
            link.reader.abort();
            link.heartbeat.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::SignalPayload;

    fn test_config() -> ClassroomConfig {
        ClassroomConfig {
            // Nothing listens here; connection attempts fail fast.
            signaling_url: "ws://127.0.0.1:1".to_string(),
            connect_attempts: 2,
            connect_backoff_ms: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn events_can_only_be_taken_once() {
        let transport = WsSignaling::new(test_config());
        assert!(transport.events().await.is_ok());
        assert!(matches!(transport.events().await, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn send_before_connect_is_silently_dropped() {
        let transport = WsSignaling::new(test_config());
        let envelope = SignalEnvelope {
            target: "p-2".to_string(),
            caller: "u-1".to_string(),
            payload: SignalPayload::Offer { sdp: "v=0".to_string() },
        };
        assert!(transport.send_signal(envelope).await.is_ok());
    }

    #[tokio::test]
    async fn join_before_connect_fails() {
        let transport = WsSignaling::new(test_config());
        let join = JoinRoom {
            room_id: "r-1".to_string(),
            user_id: "u-1".to_string(),
            course_id: None,
        };
        assert!(matches!(transport.join_room(join).await, Err(Error::Transport(_))));
    }

    #[tokio::test]
    async fn connect_exhausts_retry_budget() {
        let transport = WsSignaling::new(test_config());
        match transport.connect().await {
            Err(Error::TransportConnect { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected TransportConnect, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_blocks_reconnect() {
        let transport = WsSignaling::new(test_config());
        transport.disconnect().await;
        transport.disconnect().await;
        assert!(matches!(transport.connect().await, Err(Error::Transport(_))));
    }
}
