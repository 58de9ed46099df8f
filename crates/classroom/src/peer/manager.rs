//! Peer registry and signaling-driven mesh negotiation.
//!
//! Signaling is delivered in arrival order by the session's event pump, and
//! every mutation takes the map's write lock, so at most one connection ever
//! exists per peer id. Handlers are defensive: stale or duplicate references
//! are logged and dropped, never escalated.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::ClassroomConfig;
use crate::error::Result;
use crate::media::LocalMedia;
use crate::peer::{PeerFactory, PeerRole, PeerSnapshot, RoomPeer};
use crate::session::SessionEvent;
use crate::signaling::protocol::{SignalEnvelope, SignalPayload};
use crate::signaling::SignalingTransport;

pub struct PeerManager {
    factory: PeerFactory,
    signaling: Arc<dyn SignalingTransport>,
    media: Arc<LocalMedia>,
    /// Label stamped into outbound envelopes. The relay overwrites it with
    /// the connection's assigned peer id; this is a debugging courtesy.
    local_label: String,
    peers: RwLock<HashMap<String, Arc<RoomPeer>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl PeerManager {
    pub fn new(
        config: &ClassroomConfig,
        signaling: Arc<dyn SignalingTransport>,
        media: Arc<LocalMedia>,
        local_label: String,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Self> {
        Ok(Self {
            factory: PeerFactory::new(config)?,
            signaling,
            media,
            local_label,
            peers: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// A new member is in the room: we initiate. Duplicate announcements for
    /// a live peer are ignored outright: no second connection, no re-offer.
    pub async fn handle_peer_joined(&self, peer_id: &str) -> Result<()> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(peer_id) {
            warn!(peer_id, "duplicate peer_joined ignored");
            return Ok(());
        }

        let peer = RoomPeer::connect(
            &self.factory,
            peer_id.to_string(),
            PeerRole::Initiator,
            self.local_label.clone(),
            &self.media,
            self.signaling.clone(),
            self.events.clone(),
        )
        .await?;
        peers.insert(peer_id.to_string(), peer.clone());
        drop(peers);

        let _ = self.events.send(SessionEvent::PeerJoined {
            peer_id: peer_id.to_string(),
        });

        let sdp = peer.create_offer_sdp().await?;
        self.send_to(peer_id, SignalPayload::Offer { sdp }).await?;
        info!(peer_id, "offer sent");
        Ok(())
    }

    /// Route one inbound signal by payload kind.
    pub async fn handle_signal(&self, envelope: SignalEnvelope) -> Result<()> {
        let caller = envelope.caller;
        match envelope.payload {
            SignalPayload::Offer { sdp } => self.handle_offer(&caller, sdp).await,
            SignalPayload::Answer { sdp } => self.handle_answer(&caller, sdp).await,
            SignalPayload::IceCandidate {
                candidate,
                sdp_mid,
                sdp_mline_index,
            } => {
                self.handle_ice_candidate(&caller, candidate, sdp_mid, sdp_mline_index)
                    .await
            }
        }
    }

    /// An offer from an unknown caller makes us the receiver for that peer;
    /// an offer for a peer we already track is a renegotiation on the
    /// existing connection. Either way exactly one answer goes back.
    pub async fn handle_offer(&self, caller: &str, sdp: String) -> Result<()> {
        let mut peers = self.peers.write().await;
        let peer = match peers.get(caller) {
            Some(existing) => {
                info!(peer_id = caller, "renegotiation offer for existing peer");
                existing.clone()
            }
            None => {
                let peer = RoomPeer::connect(
                    &self.factory,
                    caller.to_string(),
                    PeerRole::Receiver,
                    self.local_label.clone(),
                    &self.media,
                    self.signaling.clone(),
                    self.events.clone(),
                )
                .await?;
                peers.insert(caller.to_string(), peer.clone());
                let _ = self.events.send(SessionEvent::PeerJoined {
                    peer_id: caller.to_string(),
                });
                peer
            }
        };
        drop(peers);

        let answer = peer.apply_offer(sdp).await?;
        self.send_to(caller, SignalPayload::Answer { sdp: answer }).await?;
        info!(peer_id = caller, "answer sent");
        Ok(())
    }

    /// Answers for unknown peers are stale references (the peer raced a
    /// teardown), discarded quietly.
    pub async fn handle_answer(&self, caller: &str, sdp: String) -> Result<()> {
        let peer = self.peers.read().await.get(caller).cloned();
        match peer {
            Some(peer) => peer.apply_answer(sdp).await,
            None => {
                debug!(peer_id = caller, "answer for unknown peer discarded");
                Ok(())
            }
        }
    }

    /// Candidates for unknown peers are likewise discarded quietly.
    pub async fn handle_ice_candidate(
        &self,
        caller: &str,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Result<()> {
        let peer = self.peers.read().await.get(caller).cloned();
        match peer {
            Some(peer) => {
                peer.add_remote_candidate(candidate, sdp_mid, sdp_mline_index)
                    .await
            }
            None => {
                debug!(peer_id = caller, "ICE candidate for unknown peer discarded");
                Ok(())
            }
        }
    }

    /// Close and forget one peer. Idempotent: a second departure for the
    /// same id is a quiet no-op.
    pub async fn handle_peer_left(&self, peer_id: &str) -> Result<()> {
        let peer = self.peers.read().await.get(peer_id).cloned();
        let Some(peer) = peer else {
            debug!(peer_id, "peer_left for unknown peer ignored");
            return Ok(());
        };

        peer.close().await;
        self.peers.write().await.remove(peer_id);
        let _ = self.events.send(SessionEvent::PeerLeft {
            peer_id: peer_id.to_string(),
        });
        info!(peer_id, "peer left");
        Ok(())
    }

    /// Close every connection and clear the registry. Used by session leave.
    pub async fn teardown_all(&self) {
        let peers = std::mem::take(&mut *self.peers.write().await);
        let count = peers.len();
        for (_, peer) in peers {
            peer.close().await;
        }
        if count > 0 {
            info!(count, "peer connections torn down");
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn peer_ids(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Roster view for the UI: id, role, state, whether media has arrived.
    pub async fn snapshot(&self) -> Vec<PeerSnapshot> {
        self.peers
            .read()
            .await
            .values()
            .map(|peer| PeerSnapshot {
                peer_id: peer.peer_id().to_string(),
                role: peer.role(),
                state: peer.state(),
                has_remote_media: peer.has_remote_media(),
            })
            .collect()
    }

    async fn send_to(&self, target: &str, payload: SignalPayload) -> Result<()> {
        self.signaling
            .send_signal(SignalEnvelope {
                target: target.to_string(),
                caller: self.local_label.clone(),
                payload,
            })
            .await
    }
}
