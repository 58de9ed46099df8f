//! Attendance side-effect hook.
//!
//! The relay records one event per join and one per leave. This module is
//! the seam where the training service's business layer would persist them;
//! the default implementation only emits a structured log line, and the core
//! never retries or confirms delivery.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

/// Whether the member arrived or departed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceKind {
    Joined,
    Left,
}

impl AttendanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceKind::Joined => "joined",
            AttendanceKind::Left => "left",
        }
    }
}

/// One attendance record. `course_id` is whatever the client announced;
/// `None` means the client's directory lookup failed and the session is
/// unattributed, which is accepted rather than rejected.
#[derive(Debug, Clone)]
pub struct AttendanceEvent {
    pub room_id: String,
    pub user_id: String,
    pub course_id: Option<String>,
    pub peer_id: String,
    pub kind: AttendanceKind,
    /// Unix seconds at the relay.
    pub timestamp: u64,
}

impl AttendanceEvent {
    pub fn new(
        room_id: &str,
        user_id: &str,
        course_id: Option<String>,
        peer_id: &str,
        kind: AttendanceKind,
    ) -> Self {
        Self {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            course_id,
            peer_id: peer_id.to_string(),
            kind,
            timestamp: current_timestamp(),
        }
    }
}

/// Hook invoked by the relay on every join and leave. Implementations must
/// not block the caller for long; the relay does not await persistence.
pub trait AttendanceLog: Send + Sync {
    fn record(&self, event: AttendanceEvent);
}

/// Default hook: one info-level line per event, structured for downstream
/// ingestion.
#[derive(Debug, Default)]
pub struct TracingAttendanceLog;

impl AttendanceLog for TracingAttendanceLog {
    fn record(&self, event: AttendanceEvent) {
        info!(
            room_id = %event.room_id,
            user_id = %event.user_id,
            course_id = event.course_id.as_deref().unwrap_or("-"),
            peer_id = %event.peer_id,
            kind = event.kind.as_str(),
            timestamp = event.timestamp,
            "attendance"
        );
    }
}

/// Unix seconds now.
pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
