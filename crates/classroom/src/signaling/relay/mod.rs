//! In-process signaling relay.
//!
//! The server counterpart of [`WsSignaling`](crate::signaling::WsSignaling):
//! a bind/accept loop, one handler task per connection, and a shared room
//! registry. The relay routes signal envelopes on `target` without looking
//! inside, stamps `caller` with the connection's minted peer id, and feeds
//! join/leave edges to the [`AttendanceLog`] hook.
//!
//! Compiled behind the `relay` feature; tests and the demo run it in-process
//! on an ephemeral port, the `relay-server` binary runs it standalone.

mod attendance;
mod handler;
mod rooms;
mod server;

pub use attendance::{AttendanceEvent, AttendanceKind, AttendanceLog, TracingAttendanceLog};
pub use rooms::{Member, MemberInfo, RoomRegistry};
pub use server::RelayServer;
