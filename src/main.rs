//! ReelSync - keep an embedded player in step with a photographed clock
//!
//! Usage: `reelsync <movie-id> <video-id>`
//!
//! Each stdin line is treated as the text recognized from one capture, taken
//! the moment the line arrives. A line reading `:reload` recreates the player.

use anyhow::{bail, Context, Result};
use reelsync::ws_player::WsPlayerSurface;
use reelsync::{CaptureOutcome, SeekStatus, SyncConfig, TimelineListener, ViewingSession};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const RELOAD_COMMAND: &str = ":reload";

struct LogListener;

impl TimelineListener for LogListener {
    fn on_timeline_resolved(&self, movie_id: &str, total_seconds: u64) {
        info!("🎞️ {} -> {}s", movie_id, total_seconds);
    }

    fn on_timeline_failed(&self, movie_id: &str, reason: &str) {
        warn!("🎞️ {}: could not read a time from the photo ({})", movie_id, reason);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(movie_id), Some(video_id)) = (args.next(), args.next()) else {
        bail!("usage: reelsync <movie-id> <video-id>");
    };

    let config = SyncConfig::from_env().context("invalid configuration")?;
    info!("Starting reelsync for {} against {}", movie_id, config.player_url);

    let surface = WsPlayerSurface::new(config.player_url.clone());
    let session = ViewingSession::start(
        config,
        &movie_id,
        &video_id,
        Box::new(surface),
        Arc::new(LogListener),
    )
    .await
    .context("failed to start viewing session")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    info!("stdin closed");
                    break;
                };
                let captured_at = Instant::now();

                if line.trim() == RELOAD_COMMAND {
                    if let Err(e) = session.reload().await {
                        error!("Reload failed: {}", e);
                    }
                    continue;
                }

                match session.submit_capture(&line, captured_at).await {
                    Ok(CaptureOutcome::Resolved { timeline, seek }) => {
                        let note = match seek {
                            SeekStatus::Sent => "sent".to_string(),
                            SeekStatus::Queued => "queued until the player is ready".to_string(),
                            SeekStatus::Rejected(e) => format!("not issued: {}", e),
                        };
                        println!("seek {}s ({})", timeline.total_seconds, note);
                    }
                    Ok(CaptureOutcome::Failed { reason }) => println!("failed: {}", reason),
                    Err(e) => println!("skipped: {}", e),
                }
                session.orchestrator().acknowledge();
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    if let Some(position) = session.orchestrator().last_confirmed_position() {
        info!("Last confirmed position: {:.1}s", position);
    }
    session.shutdown().await;
    Ok(())
}
