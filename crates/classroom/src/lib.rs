//! Lectern classroom core: peer-to-peer virtual classes over a WebSocket
//! signaling relay.
//!
//! One [`RoomSession`] is one participant's stay in one room. It acquires
//! local media once, resolves course context best-effort, announces itself to
//! the relay, and then maintains a mesh of WebRTC connections, one per
//! remote participant, driven entirely by relayed signaling. The embedding
//! UI consumes [`SessionEvent`]s and renders; the core never draws anything.
//!
//! ```no_run
//! use lectern_classroom::{ClassroomConfig, RoomSession};
//!
//! # async fn run() -> lectern_classroom::Result<()> {
//! let session = RoomSession::with_defaults(ClassroomConfig::default())?;
//! let mut events = session.events().await?;
//! session.join("rust-101", "student-42").await?;
//! while let Some(event) = events.recv().await {
//!     println!("session event: {}", event.name());
//! }
//! session.leave().await;
//! # Ok(())
//! # }
//! ```
//!
//! The relay counterpart lives in [`signaling::relay`] behind the `relay`
//! feature; the `relay-server` service crate is a thin binary over it.

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{ClassroomConfig, TurnServer};
pub use error::{Error, Result};
pub use media::{LocalMedia, MediaAccessError, MediaConstraints, MediaSource, SyntheticMediaSource};
pub use peer::{PeerManager, PeerRole, PeerSnapshot, PeerState};
pub use session::{RoomSession, SessionEvent};
pub use signaling::{SignalingEvent, SignalingTransport, WsSignaling};
