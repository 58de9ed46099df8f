//! Mesh peer management: one WebRTC connection per remote participant.

mod connection;
mod manager;

pub use connection::{PeerFactory, RoomPeer};
pub use manager::PeerManager;

/// Which side of the offer/answer exchange this end plays for one peer.
/// Assigned exactly once when the peer is first seen and never changed:
/// whoever learns about the other through `peer_joined` initiates; whoever
/// learns through an inbound offer answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Initiator,
    Receiver,
}

impl PeerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerRole::Initiator => "initiator",
            PeerRole::Receiver => "receiver",
        }
    }
}

impl std::fmt::Display for PeerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one peer connection. `Closed` is terminal; a connection that
/// loses ICE drops back to `Negotiating` until the stack recovers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Negotiating,
    Connected,
    Closed,
}

impl PeerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerState::New => "new",
            PeerState::Negotiating => "negotiating",
            PeerState::Connected => "connected",
            PeerState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for PeerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of one peer, for rosters and logs.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub peer_id: String,
    pub role: PeerRole,
    pub state: PeerState,
    pub has_remote_media: bool,
}
