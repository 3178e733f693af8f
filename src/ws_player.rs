//! WebSocket player surface
//!
//! Talks to the player's control script over a WebSocket using a split
//! sink/stream task. The first frame sent on every connection is
//! `loadVideoById`; after that, outbound frames are whatever the bridge
//! posts and inbound text frames go straight to the mount's handler.
//! Connection failures are reported to the bridge as player `error` events.

use crate::bridge::{ChannelError, MessageHandler, PlayerChannel, PlayerSurface};
use crate::events::PlayerCommand;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

pub struct WsPlayerSurface {
    url: String,
    task: Option<JoinHandle<()>>,
}

impl WsPlayerSurface {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            task: None,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl PlayerSurface for WsPlayerSurface {
    fn mount(
        &mut self,
        video_id: &str,
        handler: MessageHandler,
    ) -> Result<Box<dyn PlayerChannel>, ChannelError> {
        self.stop();

        let load = PlayerCommand::LoadVideoById {
            video_id: video_id.to_string(),
        }
        .to_wire()
        .map_err(|e| ChannelError::Delivery(e.to_string()))?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChannelError::Delivery(format!("no async runtime: {}", e)))?;

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        self.task = Some(runtime.spawn(drive(self.url.clone(), load, rx, handler)));
        Ok(Box::new(tx))
    }

    fn unmount(&mut self) {
        debug!("Closing player connection to {}", self.url);
        self.stop();
    }
}

impl Drop for WsPlayerSurface {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Player `error` event in the same shape the control script sends
fn error_event(message: &str) -> String {
    serde_json::json!({ "event": "error", "error": message }).to_string()
}

async fn drive(
    url: String,
    load: String,
    mut outbound: mpsc::UnboundedReceiver<String>,
    handler: MessageHandler,
) {
    info!("Connecting to player at {} (generation {})", url, handler.generation());

    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            error!("❌ Player connection failed: {}", e);
            handler.deliver(error_event(&format!("player connection failed: {}", e)));
            return;
        }
    };

    let (mut sink, mut stream) = ws.split();

    if let Err(e) = sink.send(Message::text(load)).await {
        error!("❌ Failed to send load command: {}", e);
        handler.deliver(error_event(&format!("failed to load video: {}", e)));
        return;
    }

    loop {
        tokio::select! {
            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = sink.send(Message::text(text)).await {
                        error!("❌ Player send failed: {}", e);
                        handler.deliver(error_event(&format!("player send failed: {}", e)));
                        break;
                    }
                }
                None => {
                    debug!("Bridge dropped the outbound channel");
                    let _ = sink.close().await;
                    break;
                }
            },

            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    debug!("📨 Player message: {}", text.as_str());
                    if !handler.deliver(text.as_str()) {
                        break;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        if !handler.deliver(text) {
                            break;
                        }
                    }
                    Err(_) => warn!("Ignoring non-UTF-8 binary frame ({} bytes)", bytes.len()),
                },
                Some(Ok(Message::Close(frame))) => {
                    info!("Player closed the connection: {:?}", frame);
                    handler.deliver(error_event("player connection closed"));
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("❌ Player connection error: {}", e);
                    handler.deliver(error_event(&format!("player connection error: {}", e)));
                    break;
                }
                None => {
                    handler.deliver(error_event("player connection closed"));
                    break;
                }
            }
        }
    }

    debug!("Player connection task for generation {} finished", handler.generation());
}
