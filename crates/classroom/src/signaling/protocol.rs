//! Wire protocol between classroom clients and the signaling relay.
//!
//! JSON over WebSocket text frames. Offers, answers and ICE candidates all
//! ride the same [`SignalEnvelope`]; the relay routes on `target` without
//! inspecting the payload, so the negotiation format can evolve without
//! touching the relay.

use serde::{Deserialize, Serialize};

/// Join announcement. `course_id` is best-effort context so the relay can
/// record attendance against the right course; `None` when the directory
/// lookup failed or was disabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinRoom {
    pub room_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
}

/// Negotiation payload carried opaquely through the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    IceCandidate {
        candidate: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp_mid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sdp_mline_index: Option<u16>,
    },
}

impl SignalPayload {
    /// Payload kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::IceCandidate { .. } => "ice_candidate",
        }
    }
}

/// One routed signal. `target` is the destination peer id; `caller` is the
/// sender's peer id. Peer ids are relay-assigned per connection, so the relay
/// overwrites `caller` before forwarding and a client cannot impersonate
/// another peer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalEnvelope {
    pub target: String,
    pub caller: String,
    pub payload: SignalPayload,
}

/// Client → relay messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join(JoinRoom),
    Signal(SignalEnvelope),
    Leave,
    Ping,
}

/// Relay → client messages.
///
/// There is no join acknowledgement: a successful join is implicit, and an
/// empty room produces no traffic until someone else arrives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A new member joined the sender's room. Receivers initiate an offer.
    PeerJoined { peer_id: String },
    /// A member left or its connection dropped.
    PeerLeft { peer_id: String },
    /// A signal forwarded from `envelope.caller`.
    Signal(SignalEnvelope),
    Pong,
    /// Protocol-level rejection (malformed frame, unknown target, duplicate
    /// join). Clients log these and move on.
    Error { message: String },
}

impl ServerMessage {
    /// Message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ServerMessage::PeerJoined { .. } => "peer_joined",
            ServerMessage::PeerLeft { .. } => "peer_left",
            ServerMessage::Signal(_) => "signal",
            ServerMessage::Pong => "pong",
            ServerMessage::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_join() {
        let json = r#"{"type": "join", "room_id": "rust-101", "user_id": "u-42", "course_id": "c-7"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Join(JoinRoom {
                room_id: "rust-101".to_string(),
                user_id: "u-42".to_string(),
                course_id: Some("c-7".to_string()),
            })
        );
    }

    #[test]
    fn parse_join_without_course() {
        let json = r#"{"type": "join", "room_id": "rust-101", "user_id": "u-42"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::Join(JoinRoom { course_id: None, .. })));
    }

    #[test]
    fn parse_offer_signal() {
        let json = r#"{
            "type": "signal",
            "target": "p-2",
            "caller": "p-1",
            "payload": {"kind": "offer", "sdp": "v=0..."}
        }"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        let ClientMessage::Signal(envelope) = msg else {
            panic!("expected signal");
        };
        assert_eq!(envelope.target, "p-2");
        assert_eq!(envelope.caller, "p-1");
        assert!(matches!(envelope.payload, SignalPayload::Offer { .. }));
    }

    #[test]
    fn ice_candidate_omits_empty_fields() {
        let envelope = SignalEnvelope {
            target: "p-2".to_string(),
            caller: "p-1".to_string(),
            payload: SignalPayload::IceCandidate {
                candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host".to_string(),
                sdp_mid: None,
                sdp_mline_index: None,
            },
        };
        let json = serde_json::to_string(&ClientMessage::Signal(envelope)).unwrap();
        assert!(!json.contains("sdp_mid"));
        assert!(!json.contains("sdp_mline_index"));
    }

    #[test]
    fn server_signal_round_trip() {
        let msg = ServerMessage::Signal(SignalEnvelope {
            target: "p-9".to_string(),
            caller: "p-3".to_string(),
            payload: SignalPayload::Answer { sdp: "v=0...".to_string() },
        });
        let json = serde_json::to_string(&msg).unwrap();
        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(parsed.name(), "signal");
    }

    #[test]
    fn unknown_type_is_rejected() {
        let json = r#"{"type": "subscribe", "room_id": "rust-101"}"#;
        assert!(serde_json::from_str::<ClientMessage>(json).is_err());
    }
}
