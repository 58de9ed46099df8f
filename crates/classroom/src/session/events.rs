//! Events surfaced to the embedding UI shell.

use std::sync::Arc;

use webrtc::track::track_remote::TrackRemote;

use crate::peer::PeerState;

/// What the UI needs to know about a running session. The core reports;
/// presentation (tiles, prompts, retry dialogs) stays with the shell.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A remote participant appeared. Its tile starts in a connecting state.
    PeerJoined { peer_id: String },

    /// Remote media arrived for a participant; the tile can render it.
    /// Arrives asynchronously, possibly well after [`SessionEvent::PeerJoined`].
    PeerMedia {
        peer_id: String,
        track: Arc<TrackRemote>,
    },

    /// Connection-state edge for a participant.
    PeerStateChanged { peer_id: String, state: PeerState },

    /// A remote participant left; drop its tile.
    PeerLeft { peer_id: String },

    /// The relay link is gone and automatic recovery gave up. Established
    /// peer media keeps flowing; new joins and departures go unseen.
    TransportLost,

    /// The relay link came back after a silent retry.
    TransportReconnected,
}

impl SessionEvent {
    /// Event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::PeerJoined { .. } => "peer_joined",
            SessionEvent::PeerMedia { .. } => "peer_media",
            SessionEvent::PeerStateChanged { .. } => "peer_state_changed",
            SessionEvent::PeerLeft { .. } => "peer_left",
            SessionEvent::TransportLost => "transport_lost",
            SessionEvent::TransportReconnected => "transport_reconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names() {
        let event = SessionEvent::PeerJoined { peer_id: "p-1".to_string() };
        assert_eq!(event.name(), "peer_joined");
        assert_eq!(SessionEvent::TransportLost.name(), "transport_lost");
    }
}
