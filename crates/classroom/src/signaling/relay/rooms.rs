//! Room membership registry shared across relay connections.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::error::{Error, Result};
use crate::signaling::protocol::ServerMessage;

/// One connected member of a room, keyed by its relay-assigned peer id.
pub struct Member {
    pub peer_id: String,
    pub user_id: String,
    pub course_id: Option<String>,
    pub joined_at: u64,
    /// Outbound queue of this member's connection; frames are serialized
    /// before they land here.
    pub tx: mpsc::Sender<String>,
}

/// Copyable view of a member for attendance records and logs.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub peer_id: String,
    pub user_id: String,
    pub course_id: Option<String>,
    pub joined_at: u64,
}

impl Member {
    fn info(&self) -> MemberInfo {
        MemberInfo {
            peer_id: self.peer_id.clone(),
            user_id: self.user_id.clone(),
            course_id: self.course_id.clone(),
            joined_at: self.joined_at,
        }
    }
}

#[derive(Default)]
struct Room {
    members: HashMap<String, Member>,
}

/// All rooms the relay currently hosts. Rooms come into existence with their
/// first member and disappear with their last.
#[derive(Default)]
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member. A `user_id` already present in the room is
    /// rejected; the UI layer prevents this, the relay enforces it.
    pub async fn join(&self, room_id: &str, member: Member) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_default();
        if room
            .members
            .values()
            .any(|existing| existing.user_id == member.user_id)
        {
            return Err(Error::Protocol(format!(
                "user {} already joined room {}",
                member.user_id, room_id
            )));
        }
        debug!(
            room_id,
            peer_id = %member.peer_id,
            user_id = %member.user_id,
            members = room.members.len() + 1,
            "member joined"
        );
        room.members.insert(member.peer_id.clone(), member);
        Ok(())
    }

    /// Deregister a member. Idempotent; the emptied room is dropped.
    pub async fn remove(&self, room_id: &str, peer_id: &str) -> Option<MemberInfo> {
        let mut rooms = self.rooms.write().await;
        let room = rooms.get_mut(room_id)?;
        let member = room.members.remove(peer_id)?;
        if room.members.is_empty() {
            rooms.remove(room_id);
            debug!(room_id, "room emptied");
        }
        Some(member.info())
    }

    /// Send to every member of a room except `exclude`. Delivery failures
    /// (member mid-disconnect) are ignored; its own cleanup is coming.
    pub async fn broadcast(&self, room_id: &str, exclude: Option<&str>, message: &ServerMessage) {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(_) => return,
        };
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(room_id) else { return };
        for (peer_id, member) in room.members.iter() {
            if exclude == Some(peer_id.as_str()) {
                continue;
            }
            let _ = member.tx.send(text.clone()).await;
        }
    }

    /// Deliver to one member. Returns false when the target is not in the
    /// room (stale reference; the sender is told, not failed).
    pub async fn send_to(&self, room_id: &str, peer_id: &str, message: &ServerMessage) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(_) => return false,
        };
        let rooms = self.rooms.read().await;
        let Some(member) = rooms.get(room_id).and_then(|room| room.members.get(peer_id)) else {
            return false;
        };
        member.tx.send(text).await.is_ok()
    }

    pub async fn member_count(&self, room_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map(|room| room.members.len())
            .unwrap_or(0)
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
