//! Two-party classroom walkthrough.
//!
//! Starts the relay in-process, joins a trainer and a student session to the
//! same room, and prints session events while the mesh negotiates. Requires
//! the `relay` feature:
//!
//! ```bash
//! cargo run -p lectern-classroom --features relay --example classroom_demo
//! ```

use std::sync::Arc;
use std::time::Duration;

use lectern_classroom::session::StaticRoomDirectory;
use lectern_classroom::signaling::relay::RelayServer;
use lectern_classroom::{
    ClassroomConfig, RoomSession, SessionEvent, SyntheticMediaSource, WsSignaling,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Relay on an ephemeral port.
    let relay = RelayServer::bind("127.0.0.1:0").await?;
    let relay_addr = relay.local_addr()?;
    tokio::spawn(relay.serve());
    println!("relay listening on {relay_addr}");

    let config = ClassroomConfig {
        signaling_url: format!("ws://{relay_addr}"),
        ..Default::default()
    };
    let directory = Arc::new(StaticRoomDirectory::new().with_course("rust-101", "course-rust"));

    let trainer = session(&config, directory.clone());
    let student = session(&config, directory);

    let mut trainer_events = trainer.events().await?;
    let mut student_events = student.events().await?;
    tokio::spawn(async move {
        while let Some(event) = student_events.recv().await {
            print_event("student", &event);
        }
    });

    trainer.join("rust-101", "trainer-1").await?;
    println!("trainer joined (empty room, no events expected yet)");

    student.join("rust-101", "student-1").await?;
    println!("student joined; negotiation starts");

    // Watch the trainer's view of the mesh for a few seconds.
    let watch = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = trainer_events.recv().await {
            print_event("trainer", &event);
            if matches!(event, SessionEvent::PeerMedia { .. }) {
                break;
            }
        }
    });
    let _ = watch.await;

    for peer in trainer.peer_snapshot().await {
        println!(
            "trainer sees peer {} role={} state={} media={}",
            peer.peer_id, peer.role, peer.state, peer.has_remote_media
        );
    }

    let muted = trainer.toggle_mute().await?;
    println!("trainer muted: {muted}");
    let muted = trainer.toggle_mute().await?;
    println!("trainer muted: {muted}");

    student.leave().await;
    trainer.leave().await;
    println!("both sessions closed");
    Ok(())
}

fn session(
    config: &ClassroomConfig,
    directory: Arc<StaticRoomDirectory>,
) -> Arc<RoomSession> {
    Arc::new(RoomSession::new(
        config.clone(),
        Arc::new(WsSignaling::new(config.clone())),
        Arc::new(SyntheticMediaSource::new()),
        Some(directory),
    ))
}

fn print_event(who: &str, event: &SessionEvent) {
    match event {
        SessionEvent::PeerJoined { peer_id } => println!("[{who}] peer joined: {peer_id}"),
        SessionEvent::PeerMedia { peer_id, track } => {
            println!("[{who}] media from {peer_id}: {}", track.kind())
        }
        SessionEvent::PeerStateChanged { peer_id, state } => {
            println!("[{who}] {peer_id} -> {state}")
        }
        SessionEvent::PeerLeft { peer_id } => println!("[{who}] peer left: {peer_id}"),
        SessionEvent::TransportLost => println!("[{who}] transport lost"),
        SessionEvent::TransportReconnected => println!("[{who}] transport reconnected"),
    }
}
