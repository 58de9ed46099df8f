//! End-to-end coverage with the relay running in-process on an ephemeral
//! port: forwarding and caller stamping, duplicate-join rejection, departure
//! broadcast, the attendance hook, and a full two-session negotiation.

mod support;

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use lectern_classroom::signaling::protocol::{
    ClientMessage, JoinRoom, SignalEnvelope, SignalPayload,
};
use lectern_classroom::signaling::relay::{
    AttendanceEvent, AttendanceKind, AttendanceLog, RelayServer,
};
use lectern_classroom::signaling::{SignalingEvent, SignalingTransport, WsSignaling};
use lectern_classroom::{ClassroomConfig, PeerRole, PeerState, RoomSession, SyntheticMediaSource};

use support::init_test_tracing;

async fn start_relay() -> String {
    let relay = RelayServer::bind("127.0.0.1:0").await.unwrap();
    let addr = relay.local_addr().unwrap();
    tokio::spawn(relay.serve());
    format!("ws://{addr}")
}

fn relay_config(url: &str) -> ClassroomConfig {
    ClassroomConfig {
        signaling_url: url.to_string(),
        connect_attempts: 3,
        connect_backoff_ms: 50,
        ..Default::default()
    }
}

async fn joined_transport(
    config: &ClassroomConfig,
    room_id: &str,
    user_id: &str,
) -> (WsSignaling, tokio::sync::mpsc::UnboundedReceiver<SignalingEvent>) {
    let transport = WsSignaling::new(config.clone());
    transport.connect().await.unwrap();
    let events = transport.events().await.unwrap();
    transport
        .join_room(JoinRoom {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            course_id: None,
        })
        .await
        .unwrap();
    (transport, events)
}

async fn next_event(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<SignalingEvent>,
) -> SignalingEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event within deadline")
        .expect("event stream open")
}

#[tokio::test]
async fn relay_stamps_caller_and_forwards_signals() {
    init_test_tracing();
    let url = start_relay().await;
    let config = relay_config(&url);

    let (a, mut a_events) = joined_transport(&config, "r1", "ua").await;
    let (b, mut b_events) = joined_transport(&config, "r1", "ub").await;

    // The earlier member learns about the later one.
    let SignalingEvent::PeerJoined { peer_id: b_id } = next_event(&mut a_events).await else {
        panic!("expected peer_joined");
    };

    a.send_signal(SignalEnvelope {
        target: b_id.clone(),
        caller: "ua".to_string(),
        payload: SignalPayload::Offer { sdp: "v=0 test-offer".to_string() },
    })
    .await
    .unwrap();

    let SignalingEvent::Signal(envelope) = next_event(&mut b_events).await else {
        panic!("expected forwarded signal");
    };
    assert_eq!(envelope.target, b_id);
    assert_ne!(envelope.caller, "ua", "relay must stamp its own peer id");
    assert!(uuid::Uuid::parse_str(&envelope.caller).is_ok());
    assert!(matches!(envelope.payload, SignalPayload::Offer { ref sdp } if sdp == "v=0 test-offer"));

    a.disconnect().await;
    b.disconnect().await;
}

#[tokio::test]
async fn duplicate_user_in_room_is_rejected() {
    init_test_tracing();
    let url = start_relay().await;
    let config = relay_config(&url);

    let (a, mut a_events) = joined_transport(&config, "r1", "u-dup").await;
    let (b, _b_events) = joined_transport(&config, "r1", "u-dup").await;

    // The rejected join must not be announced to the existing member.
    let outcome = tokio::time::timeout(Duration::from_millis(500), a_events.recv()).await;
    assert!(outcome.is_err(), "no peer_joined for a rejected duplicate");

    a.disconnect().await;
    b.disconnect().await;
}

#[tokio::test]
async fn departure_is_broadcast_to_remaining_members() {
    init_test_tracing();
    let url = start_relay().await;
    let config = relay_config(&url);

    let (a, mut a_events) = joined_transport(&config, "r1", "ua").await;
    let (b, _b_events) = joined_transport(&config, "r1", "ub").await;

    let SignalingEvent::PeerJoined { peer_id: b_id } = next_event(&mut a_events).await else {
        panic!("expected peer_joined");
    };

    b.disconnect().await;

    let SignalingEvent::PeerLeft { peer_id } = next_event(&mut a_events).await else {
        panic!("expected peer_left");
    };
    assert_eq!(peer_id, b_id);

    a.disconnect().await;
}

/// Accept one client socket on a scripted relay endpoint.
async fn accept_client(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("accept within deadline")
        .unwrap();
    accept_async(stream).await.unwrap()
}

/// Next parsed client message on a scripted relay socket.
async fn next_client_frame(ws: &mut WebSocketStream<TcpStream>) -> ClientMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within deadline")
            .expect("socket open")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn reconnect_reannounces_the_remembered_join() {
    init_test_tracing();
    // Scripted relay endpoint: the test plays the server side so it can kill
    // the link and watch what the client does about it.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let config = relay_config(&url);

    let transport = WsSignaling::new(config);
    let (connected, mut first_link) = tokio::join!(transport.connect(), accept_client(&listener));
    connected.unwrap();
    let mut events = transport.events().await.unwrap();
    transport
        .join_room(JoinRoom {
            room_id: "r1".to_string(),
            user_id: "ua".to_string(),
            course_id: Some("c1".to_string()),
        })
        .await
        .unwrap();

    let ClientMessage::Join(join) = next_client_frame(&mut first_link).await else {
        panic!("expected join announcement");
    };
    assert_eq!(join.room_id, "r1");

    // Kill the link server-side; the supervisor must silently redial.
    drop(first_link);

    let mut second_link = accept_client(&listener).await;
    let ClientMessage::Join(rejoin) = next_client_frame(&mut second_link).await else {
        panic!("expected re-announced join");
    };
    assert_eq!(rejoin.room_id, "r1");
    assert_eq!(rejoin.user_id, "ua");
    assert_eq!(rejoin.course_id.as_deref(), Some("c1"));

    assert!(matches!(
        next_event(&mut events).await,
        SignalingEvent::TransportReconnected
    ));

    transport.disconnect().await;
}

#[tokio::test]
async fn reconnect_exhaustion_surfaces_transport_lost() {
    init_test_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let config = relay_config(&url);

    let transport = WsSignaling::new(config);
    let (connected, first_link) = tokio::join!(transport.connect(), accept_client(&listener));
    connected.unwrap();
    let mut events = transport.events().await.unwrap();

    // Take the relay down entirely, then kill the link: every redial is
    // refused and the retry budget runs out.
    drop(listener);
    drop(first_link);

    let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("terminal event within deadline")
        .expect("event stream open");
    assert!(matches!(event, SignalingEvent::TransportLost));

    transport.disconnect().await;
}

#[derive(Default)]
struct CollectingAttendance {
    events: Mutex<Vec<AttendanceEvent>>,
}

impl AttendanceLog for CollectingAttendance {
    fn record(&self, event: AttendanceEvent) {
        self.events.lock().push(event);
    }
}

#[tokio::test]
async fn attendance_hook_sees_join_and_leave_with_course_context() {
    init_test_tracing();
    let attendance = Arc::new(CollectingAttendance::default());
    let relay = RelayServer::bind_with_attendance("127.0.0.1:0", attendance.clone())
        .await
        .unwrap();
    let url = format!("ws://{}", relay.local_addr().unwrap());
    tokio::spawn(relay.serve());

    let config = relay_config(&url);
    let transport = WsSignaling::new(config);
    transport.connect().await.unwrap();
    let _events = transport.events().await.unwrap();
    transport
        .join_room(JoinRoom {
            room_id: "rust-101".to_string(),
            user_id: "student-7".to_string(),
            course_id: Some("course-rust".to_string()),
        })
        .await
        .unwrap();

    // join record
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while attendance.events.lock().len() < 1 {
        assert!(tokio::time::Instant::now() < deadline, "join not recorded");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    transport.disconnect().await;

    // leave record
    while attendance.events.lock().len() < 2 {
        assert!(tokio::time::Instant::now() < deadline, "leave not recorded");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let events = attendance.events.lock();
    assert_eq!(events[0].kind, AttendanceKind::Joined);
    assert_eq!(events[0].room_id, "rust-101");
    assert_eq!(events[0].user_id, "student-7");
    assert_eq!(events[0].course_id.as_deref(), Some("course-rust"));
    assert_eq!(events[1].kind, AttendanceKind::Left);
    assert_eq!(events[1].peer_id, events[0].peer_id);
    assert!(events[1].timestamp >= events[0].timestamp);
}

#[tokio::test]
async fn two_sessions_negotiate_a_media_connection() {
    init_test_tracing();
    let url = start_relay().await;
    let config = relay_config(&url);

    let trainer = Arc::new(RoomSession::new(
        config.clone(),
        Arc::new(WsSignaling::new(config.clone())),
        Arc::new(SyntheticMediaSource::new()),
        None,
    ));
    let student = Arc::new(RoomSession::new(
        config.clone(),
        Arc::new(WsSignaling::new(config.clone())),
        Arc::new(SyntheticMediaSource::new()),
        None,
    ));

    trainer.join("rust-101", "trainer-1").await.unwrap();
    student.join("rust-101", "student-1").await.unwrap();

    // The trainer initiates toward the arriving student; the student answers.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let trainer_peers = trainer.peer_snapshot().await;
        let student_peers = student.peer_snapshot().await;
        let connected = trainer_peers.len() == 1
            && student_peers.len() == 1
            && trainer_peers[0].state == PeerState::Connected
            && student_peers[0].state == PeerState::Connected;
        if connected {
            assert_eq!(trainer_peers[0].role, PeerRole::Initiator);
            assert_eq!(student_peers[0].role, PeerRole::Receiver);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "mesh did not connect: trainer={trainer_peers:?} student={student_peers:?}"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    student.leave().await;

    // The trainer sees the departure and empties its mesh.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while trainer.peer_count().await != 0 {
        assert!(tokio::time::Instant::now() < deadline, "departure not observed");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    trainer.leave().await;
}
