//! Per-connection relay handler.
//!
//! Each accepted socket gets a freshly minted peer id, a forward task
//! draining its outbound queue into the sink, and a read loop dispatching
//! client messages. Membership is whatever the connection's `Join` announced;
//! the socket closing is treated exactly like an explicit `Leave`.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{Message, Result as WsResult};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::signaling::protocol::{ClientMessage, JoinRoom, ServerMessage, SignalEnvelope};
use crate::signaling::relay::attendance::{
    current_timestamp, AttendanceEvent, AttendanceKind, AttendanceLog,
};
use crate::signaling::relay::rooms::{Member, RoomRegistry};

/// State shared by every connection of one relay instance.
pub(crate) struct RelayState {
    pub registry: RoomRegistry,
    pub attendance: Arc<dyn AttendanceLog>,
}

/// Room membership of one connection, fixed by its `Join`.
struct Membership {
    room_id: String,
    user_id: String,
}

/// Drive one client connection to completion.
pub(crate) async fn handle_connection(stream: TcpStream, state: Arc<RelayState>) -> WsResult<()> {
    let addr = stream.peer_addr()?;
    let peer_id = Uuid::new_v4().to_string();
    debug!(%addr, peer_id = %peer_id, "relay connection accepted");

    let ws_stream = accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    // Outbound queue for this connection; the registry holds the sender so
    // other members' handlers can reach this socket.
    let (tx, mut rx) = mpsc::channel::<String>(128);

    let forward_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let mut membership: Option<Membership> = None;

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(peer_id = %peer_id, error = %e, "relay connection error");
                break;
            }
        };

        let message = match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer_id = %peer_id, error = %e, "unparseable relay frame");
                send_error(&tx, format!("unparseable message: {}", e)).await;
                continue;
            }
        };

        match message {
            ClientMessage::Join(join) => {
                handle_join(&state, &peer_id, join, &tx, &mut membership).await;
            }
            ClientMessage::Signal(envelope) => {
                handle_signal(&state, &peer_id, envelope, &tx, membership.as_ref()).await;
            }
            ClientMessage::Ping => {
                send(&tx, &ServerMessage::Pong).await;
            }
            ClientMessage::Leave => break,
        }
    }

    // Cleanup: departure and socket loss look identical to the room.
    if let Some(membership) = membership {
        if let Some(removed) = state.registry.remove(&membership.room_id, &peer_id).await {
            state.attendance.record(AttendanceEvent {
                room_id: membership.room_id.clone(),
                user_id: removed.user_id,
                course_id: removed.course_id,
                peer_id: peer_id.clone(),
                kind: AttendanceKind::Left,
                timestamp: current_timestamp(),
            });
            state
                .registry
                .broadcast(
                    &membership.room_id,
                    None,
                    &ServerMessage::PeerLeft { peer_id: peer_id.clone() },
                )
                .await;
            info!(
                room_id = %membership.room_id,
                user_id = %membership.user_id,
                peer_id = %peer_id,
                "member departed"
            );
        }
    }

    forward_task.abort();
    Ok(())
}

async fn handle_join(
    state: &Arc<RelayState>,
    peer_id: &str,
    join: JoinRoom,
    tx: &mpsc::Sender<String>,
    membership: &mut Option<Membership>,
) {
    if membership.is_some() {
        send_error(tx, "already joined a room on this connection".to_string()).await;
        return;
    }

    let member = Member {
        peer_id: peer_id.to_string(),
        user_id: join.user_id.clone(),
        course_id: join.course_id.clone(),
        joined_at: current_timestamp(),
        tx: tx.clone(),
    };
    if let Err(e) = state.registry.join(&join.room_id, member).await {
        warn!(room_id = %join.room_id, user_id = %join.user_id, error = %e, "join rejected");
        send_error(tx, e.to_string()).await;
        return;
    }

    state.attendance.record(AttendanceEvent::new(
        &join.room_id,
        &join.user_id,
        join.course_id.clone(),
        peer_id,
        AttendanceKind::Joined,
    ));

    // Existing members learn of the arrival and initiate offers toward it.
    // The joiner gets no reply; an empty room stays silent.
    state
        .registry
        .broadcast(
            &join.room_id,
            Some(peer_id),
            &ServerMessage::PeerJoined { peer_id: peer_id.to_string() },
        )
        .await;

    info!(
        room_id = %join.room_id,
        user_id = %join.user_id,
        course_id = join.course_id.as_deref().unwrap_or("-"),
        peer_id = %peer_id,
        "member joined"
    );
    *membership = Some(Membership {
        room_id: join.room_id,
        user_id: join.user_id,
    });
}

async fn handle_signal(
    state: &Arc<RelayState>,
    peer_id: &str,
    mut envelope: SignalEnvelope,
    tx: &mpsc::Sender<String>,
    membership: Option<&Membership>,
) {
    let Some(membership) = membership else {
        send_error(tx, "join a room before signaling".to_string()).await;
        return;
    };

    // Stamp the sender's minted id; whatever the client wrote cannot
    // impersonate another peer.
    envelope.caller = peer_id.to_string();
    let target = envelope.target.clone();
    let kind = envelope.payload.kind();

    let delivered = state
        .registry
        .send_to(&membership.room_id, &target, &ServerMessage::Signal(envelope))
        .await;
    if delivered {
        debug!(
            room_id = %membership.room_id,
            caller = %peer_id,
            target = %target,
            kind,
            "signal forwarded"
        );
    } else {
        // Signals legitimately race departures; the sender logs and drops.
        debug!(room_id = %membership.room_id, target = %target, kind, "signal target not in room");
        send_error(tx, format!("peer {} is not in the room", target)).await;
    }
}

async fn send(tx: &mpsc::Sender<String>, message: &ServerMessage) {
    if let Ok(text) = serde_json::to_string(message) {
        let _ = tx.send(text).await;
    }
}

async fn send_error(tx: &mpsc::Sender<String>, message: String) {
    send(tx, &ServerMessage::Error { message }).await;
}
