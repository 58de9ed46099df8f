//! Signaling: the WebSocket wire protocol, the relay client, and (behind the
//! `relay` feature) the relay server itself.
//!
//! The transport is an owned value injected into one session. Two sessions in
//! the same process never share signaling state.

pub mod client;
pub mod protocol;
#[cfg(feature = "relay")]
pub mod relay;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::signaling::protocol::{JoinRoom, SignalEnvelope};

pub use client::WsSignaling;

/// Inbound signaling traffic plus transport health edges, in arrival order.
#[derive(Debug, Clone)]
pub enum SignalingEvent {
    PeerJoined { peer_id: String },
    PeerLeft { peer_id: String },
    Signal(SignalEnvelope),
    /// The link dropped and the retry budget is exhausted. Terminal.
    TransportLost,
    /// The link dropped, was silently re-established, and the room was
    /// re-announced.
    TransportReconnected,
}

/// Seam between the session/peer layers and the relay link, so tests can
/// substitute an in-memory transport.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Dial the relay with bounded exponential backoff. Idempotent: calling
    /// on an established transport is a no-op.
    async fn connect(&self) -> Result<()>;

    /// Announce room membership. The relay replies with nothing; join
    /// success is implicit. The announcement is remembered and re-sent
    /// after an automatic reconnect.
    async fn join_room(&self, join: JoinRoom) -> Result<()>;

    /// Queue one signal for the relay. After [`SignalingTransport::disconnect`]
    /// this silently drops the signal: a tearing-down session expects no
    /// replies.
    async fn send_signal(&self, envelope: SignalEnvelope) -> Result<()>;

    /// Take the inbound event stream. Yields `Some` exactly once; the
    /// session's event pump owns the receiver afterwards.
    async fn events(&self) -> Result<mpsc::UnboundedReceiver<SignalingEvent>>;

    /// Tear the link down. Idempotent and infallible.
    async fn disconnect(&self);
}
