//! Signaling relay binary entry point.
//!
//! Runs the classroom signaling relay standalone: accepts client WebSocket
//! connections, forwards offers/answers/ICE between room members, and emits
//! attendance records for every join and leave.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (127.0.0.1:8787)
//! cargo run -p lectern-relay-server
//!
//! # Bind elsewhere
//! cargo run -p lectern-relay-server -- --bind 0.0.0.0:9000
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use lectern_classroom::signaling::relay::RelayServer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Lectern signaling relay
///
/// Forwards classroom signaling between room members and records attendance
/// on join/leave.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8787", env = "RELAY_BIND_ADDRESS")]
    bind: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let shutdown_flag = Arc::new(AtomicBool::new(false));
    let shutdown_flag_handler = Arc::clone(&shutdown_flag);
    ctrlc::set_handler(move || {
        if shutdown_flag_handler.swap(true, Ordering::SeqCst) {
            eprintln!("second interrupt, exiting immediately");
            std::process::exit(1);
        }
        eprintln!("interrupt received, shutting down");
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("relay-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args, shutdown_flag))
}

async fn async_main(
    args: Args,
    shutdown_flag: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %args.bind,
        "Lectern signaling relay starting"
    );

    let relay = RelayServer::bind(&args.bind).await?;
    let serve_task = tokio::spawn(relay.serve());

    while !shutdown_flag.load(Ordering::SeqCst) {
        if serve_task.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if serve_task.is_finished() {
        match serve_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "relay stopped with error"),
            Err(e) => warn!(error = %e, "relay task panicked"),
        }
    } else {
        serve_task.abort();
    }

    info!("signaling relay shut down");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
