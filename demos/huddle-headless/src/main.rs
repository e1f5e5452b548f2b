//! # huddle-headless
//!
//! Headless meeting participant for exercising a relay deployment.
//!
//! This binary provides:
//! - A full session join over the chat/video relay and the voice relay
//! - A chat announcement once the relay is ready
//! - A log line for every session state change until Ctrl+C
//!
//! Capture devices and peer transports run on the scripted in-memory
//! runtime, so no browser media stack is required.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use huddle_media::testing::MockRuntime;
use huddle_session::{spawn_session, SessionCommand, SessionConfig, SessionSnapshot};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,huddle_session=debug")),
        )
        .init();

    info!("Starting huddle headless client v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = SessionConfig::from_env();
    info!(
        meeting = %config.meeting_id,
        user = %config.local_user.short(),
        relay = %config.relay_endpoint,
        voice = %config.voice_endpoint,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Join the meeting
    // -----------------------------------------------------------------------
    let display_name = config.display_name.clone();
    let (commands, mut snapshots) = spawn_session(config, Arc::new(MockRuntime::new())).await?;

    // Announce ourselves once the chat relay accepts traffic.
    loop {
        let snapshot = snapshots.borrow_and_update().clone();
        if let Some(reason) = &snapshot.errors.fatal {
            anyhow::bail!("could not join: {reason}");
        }
        if snapshot.relay.is_ready() {
            break;
        }
        snapshots.changed().await?;
    }
    commands
        .send(SessionCommand::SendChat(format!(
            "{display_name} joined from a headless client"
        )))
        .await?;

    // -----------------------------------------------------------------------
    // 4. Log session changes until Ctrl+C
    // -----------------------------------------------------------------------
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    info!("Session ended");
                    return Ok(());
                }
                let snapshot = snapshots.borrow_and_update().clone();
                report(&snapshot);
                if let Some(reason) = &snapshot.errors.fatal {
                    anyhow::bail!("session failed: {reason}");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving meeting");
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // 5. Leave and wait for the clean close
    // -----------------------------------------------------------------------
    let _ = commands.send(SessionCommand::Leave).await;
    while snapshots.changed().await.is_ok() {
        if snapshots.borrow_and_update().relay.is_terminal() {
            info!("Session closed");
            break;
        }
    }

    Ok(())
}

/// Log the parts of the snapshot a headless operator watches.
fn report(snapshot: &SessionSnapshot) {
    info!(
        relay = ?snapshot.relay,
        voice = ?snapshot.voice_relay,
        video_links = snapshot.video_links.len(),
        voice_links = snapshot.voice_links.len(),
        chat = snapshot.chat.len(),
        speaking = snapshot.speaking.len(),
        video = snapshot.video_enabled,
        muted = snapshot.muted,
        "Session state"
    );
    if let Some(reason) = &snapshot.errors.transient {
        warn!(%reason, "Relay degraded");
    }
    for (peer, message) in &snapshot.errors.peer {
        warn!(peer = %peer.short(), %message, "Peer trouble");
    }
}
