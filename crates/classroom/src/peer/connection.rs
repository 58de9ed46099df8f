//! One WebRTC connection to one remote participant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::ClassroomConfig;
use crate::error::{Error, Result};
use crate::media::LocalMedia;
use crate::peer::{PeerRole, PeerState};
use crate::session::SessionEvent;
use crate::signaling::protocol::{SignalEnvelope, SignalPayload};
use crate::signaling::SignalingTransport;

type SharedState = Arc<Mutex<PeerState>>;

/// Builds peer connections from one shared WebRTC API instance (media engine
/// with default codecs, default interceptor chain) and the ICE server set
/// from config.
pub struct PeerFactory {
    api: API,
    rtc_config: RTCConfiguration,
}

impl PeerFactory {
    pub fn new(config: &ClassroomConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtc(format!("failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| Error::WebRtc(format!("failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let mut ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect();
        for turn in &config.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        Ok(Self {
            api,
            rtc_config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
        })
    }

    pub(crate) async fn new_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let pc = self
            .api
            .new_peer_connection(self.rtc_config.clone())
            .await
            .map_err(|e| Error::WebRtc(format!("failed to create peer connection: {}", e)))?;
        Ok(Arc::new(pc))
    }

    #[cfg(test)]
    pub(crate) fn ice_server_count(&self) -> usize {
        self.rtc_config.ice_servers.len()
    }
}

/// One remote participant: the connection, its immutable role, and its
/// lifecycle state.
pub struct RoomPeer {
    peer_id: String,
    role: PeerRole,
    pc: Arc<RTCPeerConnection>,
    state: SharedState,
    has_remote_media: Arc<AtomicBool>,
}

impl RoomPeer {
    /// Create the connection for `peer_id`, wire its callbacks, and attach
    /// the local media tracks. The role is fixed here for the life of the
    /// peer.
    pub(crate) async fn connect(
        factory: &PeerFactory,
        peer_id: String,
        role: PeerRole,
        local_label: String,
        media: &LocalMedia,
        signaling: Arc<dyn SignalingTransport>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<Self>> {
        let pc = factory.new_connection().await?;
        let state: SharedState = Arc::new(Mutex::new(PeerState::New));
        let has_remote_media = Arc::new(AtomicBool::new(false));

        // Trickle outbound candidates as they are discovered. End-of-gathering
        // markers (None / empty candidate) are not forwarded.
        {
            let signaling = signaling.clone();
            let target = peer_id.clone();
            let caller = local_label.clone();
            pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let signaling = signaling.clone();
                let target = target.clone();
                let caller = caller.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    let init = match candidate.to_json() {
                        Ok(init) => init,
                        Err(e) => {
                            warn!(peer_id = %target, error = %e, "failed to serialize ICE candidate");
                            return;
                        }
                    };
                    if init.candidate.is_empty() {
                        return;
                    }
                    let envelope = SignalEnvelope {
                        target: target.clone(),
                        caller,
                        payload: SignalPayload::IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                        },
                    };
                    if let Err(e) = signaling.send_signal(envelope).await {
                        warn!(peer_id = %target, error = %e, "failed to send ICE candidate");
                    }
                })
            }));
        }

        // Surface connection-state edges to the UI. Degraded ICE drops the
        // tile back to connecting; recovery re-reports connected.
        {
            let state = state.clone();
            let events = events.clone();
            let id = peer_id.clone();
            pc.on_peer_connection_state_change(Box::new(move |rtc_state: RTCPeerConnectionState| {
                let changed = match rtc_state {
                    RTCPeerConnectionState::Connected => {
                        transition(&state, &id, PeerState::Connected)
                    }
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Disconnected => {
                        warn!(peer_id = %id, rtc_state = %rtc_state, "peer connection degraded");
                        transition(&state, &id, PeerState::Negotiating)
                    }
                    RTCPeerConnectionState::Closed => transition(&state, &id, PeerState::Closed),
                    _ => None,
                };
                if let Some(next) = changed {
                    let _ = events.send(SessionEvent::PeerStateChanged {
                        peer_id: id.clone(),
                        state: next,
                    });
                }
                Box::pin(async {})
            }));
        }

        // Hand remote media to the shell as it arrives.
        {
            let events = events.clone();
            let id = peer_id.clone();
            let flag = has_remote_media.clone();
            pc.on_track(Box::new(
                move |track: Arc<TrackRemote>,
                      _receiver: Arc<RTCRtpReceiver>,
                      _transceiver: Arc<RTCRtpTransceiver>| {
                    flag.store(true, Ordering::SeqCst);
                    debug!(peer_id = %id, kind = %track.kind(), "remote track arrived");
                    let _ = events.send(SessionEvent::PeerMedia {
                        peer_id: id.clone(),
                        track,
                    });
                    Box::pin(async {})
                },
            ));
        }

        attach_local_tracks(&pc, media, &peer_id).await?;

        info!(peer_id = %peer_id, role = %role, "peer connection created");
        Ok(Arc::new(Self {
            peer_id,
            role,
            pc,
            state,
            has_remote_media,
        }))
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn role(&self) -> PeerRole {
        self.role
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    pub fn has_remote_media(&self) -> bool {
        self.has_remote_media.load(Ordering::SeqCst)
    }

    /// Initiator side: produce the local offer. Candidates trickle separately.
    pub(crate) async fn create_offer_sdp(&self) -> Result<String> {
        transition(&self.state, &self.peer_id, PeerState::Negotiating);
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::WebRtc(format!("failed to create offer: {}", e)))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| Error::WebRtc(format!("failed to set local description: {}", e)))?;
        Ok(offer.sdp)
    }

    /// Receiver side, and renegotiation on an established connection:
    /// apply the remote offer and produce the answer.
    pub(crate) async fn apply_offer(&self, offer_sdp: String) -> Result<String> {
        if self.state() == PeerState::New {
            transition(&self.state, &self.peer_id, PeerState::Negotiating);
        }
        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| Error::WebRtc(format!("invalid offer SDP: {}", e)))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::WebRtc(format!("failed to set remote description: {}", e)))?;
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::WebRtc(format!("failed to create answer: {}", e)))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| Error::WebRtc(format!("failed to set local description: {}", e)))?;
        Ok(answer.sdp)
    }

    /// Initiator side: apply the remote answer.
    pub(crate) async fn apply_answer(&self, answer_sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(answer_sdp)
            .map_err(|e| Error::WebRtc(format!("invalid answer SDP: {}", e)))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| Error::WebRtc(format!("failed to set remote description: {}", e)))?;
        Ok(())
    }

    /// Apply one trickled remote candidate. Empty candidate strings are
    /// end-of-candidates markers and ignored.
    pub(crate) async fn add_remote_candidate(
        &self,
        candidate: String,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Result<()> {
        if candidate.is_empty() {
            debug!(peer_id = %self.peer_id, "ignoring end-of-candidates marker");
            return Ok(());
        }
        let init = RTCIceCandidateInit {
            candidate,
            sdp_mid,
            sdp_mline_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::WebRtc(format!("failed to add ICE candidate: {}", e)))?;
        Ok(())
    }

    /// Close the connection. Idempotent; errors are logged, not surfaced.
    pub(crate) async fn close(&self) {
        if transition(&self.state, &self.peer_id, PeerState::Closed).is_none() {
            return;
        }
        if let Err(e) = self.pc.close().await {
            warn!(peer_id = %self.peer_id, error = %e, "error closing peer connection");
        }
    }
}

impl Drop for RoomPeer {
    fn drop(&mut self) {
        debug!(peer_id = %self.peer_id, "dropping peer connection");
    }
}

/// Advance the shared state. `Closed` is terminal; same-state transitions are
/// no-ops. Returns the new state when something actually changed.
fn transition(state: &SharedState, peer_id: &str, next: PeerState) -> Option<PeerState> {
    let mut guard = state.lock();
    if *guard == next || *guard == PeerState::Closed {
        return None;
    }
    debug!(peer_id, from = %*guard, to = %next, "peer state transition");
    *guard = next;
    Some(next)
}

/// Attach the session's local tracks and drain each sender's RTCP so the
/// interceptor chain keeps running. The drain tasks end when the senders
/// close with the connection.
async fn attach_local_tracks(
    pc: &Arc<RTCPeerConnection>,
    media: &LocalMedia,
    peer_id: &str,
) -> Result<()> {
    let mut tracks: Vec<Arc<dyn TrackLocal + Send + Sync>> = Vec::new();
    if let Some(audio) = media.audio_track() {
        tracks.push(audio);
    }
    if let Some(video) = media.video_track() {
        tracks.push(video);
    }

    for track in tracks {
        let rtp_sender = pc
            .add_track(track)
            .await
            .map_err(|e| Error::WebRtc(format!("failed to add local track: {}", e)))?;
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });
    }

    debug!(peer_id, "local tracks attached");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TurnServer;

    #[test]
    fn factory_collects_ice_servers_from_config() {
        let config = ClassroomConfig {
            turn_servers: vec![TurnServer {
                url: "turn:turn.example.com:3478".to_string(),
                username: "trainer".to_string(),
                credential: "secret".to_string(),
            }],
            ..Default::default()
        };
        let factory = PeerFactory::new(&config).unwrap();
        // one STUN default plus the TURN entry
        assert_eq!(factory.ice_server_count(), 2);
    }

    #[test]
    fn state_transitions_stop_at_closed() {
        let state: SharedState = Arc::new(Mutex::new(PeerState::New));
        assert_eq!(transition(&state, "p-1", PeerState::Negotiating), Some(PeerState::Negotiating));
        assert_eq!(transition(&state, "p-1", PeerState::Negotiating), None);
        assert_eq!(transition(&state, "p-1", PeerState::Closed), Some(PeerState::Closed));
        assert_eq!(transition(&state, "p-1", PeerState::Connected), None);
        assert_eq!(*state.lock(), PeerState::Closed);
    }
}
