//! Room session lifecycle: join, mute, leave, and the event stream the UI
//! consumes.

mod controller;
mod events;
mod metadata;

pub use controller::{RoomSession, SessionContext};
pub use events::SessionEvent;
pub use metadata::{HttpRoomDirectory, RoomDirectory, StaticRoomDirectory};
