//! One movie-viewing session: a bridge, its runner and a capture orchestrator
//!
//! Everything is built here and handed out explicitly; nothing is global.

use crate::bridge::{BridgeError, PlayerBridge, PlayerSurface};
use crate::bridge_runner::{self, BridgeHandle};
use crate::capture::{CaptureError, CaptureOrchestrator, CaptureOutcome, TimelineListener};
use crate::config::SyncConfig;
use crate::events::BridgeEvent;

use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub struct ViewingSession {
    bridge: BridgeHandle,
    orchestrator: Arc<CaptureOrchestrator>,
    runner: JoinHandle<()>,
    relay: JoinHandle<()>,
}

impl ViewingSession {
    /// Mount the player for `video_id` and get ready to take captures for
    /// `movie_id`.
    pub async fn start(
        config: SyncConfig,
        movie_id: &str,
        video_id: &str,
        surface: Box<dyn PlayerSurface>,
        listener: Arc<dyn TimelineListener>,
    ) -> Result<Self, BridgeError> {
        info!("Starting viewing session for {} (video {})", movie_id, video_id);

        let (bridge, inbound) = PlayerBridge::new(surface, config.bridge.clone());
        let (handle, runner) = bridge_runner::spawn(bridge, inbound);
        let events = handle.subscribe().await?;

        let orchestrator = Arc::new(CaptureOrchestrator::new(
            movie_id,
            handle.clone(),
            listener,
            config.capture.clone(),
        ));
        let relay = tokio::spawn(relay(events, Arc::downgrade(&orchestrator)));

        let session = Self {
            bridge: handle,
            orchestrator,
            runner,
            relay,
        };

        if let Err(e) = session.bridge.load(video_id).await {
            session.shutdown().await;
            return Err(e);
        }
        Ok(session)
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    pub fn orchestrator(&self) -> &Arc<CaptureOrchestrator> {
        &self.orchestrator
    }

    pub async fn submit_capture(
        &self,
        raw_text: &str,
        captured_at: Instant,
    ) -> Result<CaptureOutcome, CaptureError> {
        self.orchestrator.submit_capture(raw_text, captured_at).await
    }

    /// Recreate the player surface, resuming from the last known position
    pub async fn reload(&self) -> Result<(), BridgeError> {
        self.bridge.reload().await
    }

    pub async fn shutdown(self) {
        info!("Shutting down viewing session for {}", self.orchestrator.movie_id());
        self.bridge.shutdown();
        if let Err(e) = self.runner.await {
            warn!("Bridge runner ended abnormally: {}", e);
        }
        // The relay ends by itself once the bridge's event stream closes
        if let Err(e) = self.relay.await {
            warn!("Event relay ended abnormally: {}", e);
        }
    }
}

/// Feed seek confirmations back to the orchestrator and log the rest.
/// Holds the orchestrator weakly so it never keeps the bridge alive.
async fn relay(
    mut events: mpsc::Receiver<BridgeEvent>,
    orchestrator: Weak<CaptureOrchestrator>,
) {
    while let Some(event) = events.recv().await {
        match event {
            BridgeEvent::Seeked(seconds) => match orchestrator.upgrade() {
                Some(orchestrator) => orchestrator.record_confirmation(seconds),
                None => break,
            },
            BridgeEvent::Error(e) => warn!("⚠️ Player problem: {}", e),
            BridgeEvent::StateChanged(state) => debug!("Player is now {}", state),
            BridgeEvent::Ready | BridgeEvent::TimeUpdate(_) => {}
        }
    }
    debug!("Event relay finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureState;
    use crate::events::BridgeState;
    use crate::testing::MockSurface;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Resolutions(Mutex<Vec<u64>>);

    impl TimelineListener for Resolutions {
        fn on_timeline_resolved(&self, _movie_id: &str, total_seconds: u64) {
            self.0.lock().unwrap().push(total_seconds);
        }

        fn on_timeline_failed(&self, _movie_id: &str, _reason: &str) {}
    }

    async fn wait_for_event(
        events: &mut mpsc::Receiver<BridgeEvent>,
        wanted: BridgeEvent,
    ) {
        while let Some(event) = events.recv().await {
            if event == wanted {
                return;
            }
        }
        panic!("event stream ended before {:?}", wanted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_capture_and_confirmation() {
        let surface = MockSurface::default();
        let listener = Arc::new(Resolutions::default());
        let session = ViewingSession::start(
            SyncConfig::default(),
            "movie-7",
            "vid-7",
            Box::new(surface.clone()),
            listener.clone(),
        )
        .await
        .unwrap();
        assert_eq!(surface.mounts(), vec!["vid-7".to_string()]);

        let mut events = session.bridge().subscribe().await.unwrap();
        let handler = surface.handler();
        handler.deliver(r#"{"event":"ready"}"#);
        wait_for_event(&mut events, BridgeEvent::Ready).await;

        let outcome = session.submit_capture("0:10:00", Instant::now()).await.unwrap();
        assert!(matches!(outcome, CaptureOutcome::Resolved { .. }));
        assert_eq!(*listener.0.lock().unwrap(), vec![603]);
        assert_eq!(surface.seeks(), vec![603.0]);
        assert!(matches!(session.orchestrator().state(), CaptureState::Resolved(_)));

        assert_eq!(session.orchestrator().last_confirmed_position(), None);
        handler.deliver(r#"{"event":"seeked","time":603}"#);
        wait_for_event(&mut events, BridgeEvent::Seeked(603.0)).await;
        for _ in 0..100 {
            if session.orchestrator().last_confirmed_position().is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(session.orchestrator().last_confirmed_position(), Some(603.0));

        session.shutdown().await;
        assert_eq!(surface.unmounts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_reload_remounts() {
        let surface = MockSurface::default();
        let session = ViewingSession::start(
            SyncConfig::default(),
            "movie-7",
            "vid-7",
            Box::new(surface.clone()),
            Arc::new(Resolutions::default()),
        )
        .await
        .unwrap();

        session.reload().await.unwrap();
        assert_eq!(surface.mounts().len(), 2);
        let snapshot = session.bridge().snapshot().await.unwrap();
        assert_eq!(snapshot.state, BridgeState::Loading);
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.video_id.as_deref(), Some("vid-7"));

        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_session_start_fails_when_player_cannot_mount() {
        let surface = MockSurface::default();
        surface.fail_mounts(true);

        let result = ViewingSession::start(
            SyncConfig::default(),
            "movie-7",
            "vid-7",
            Box::new(surface.clone()),
            Arc::new(Resolutions::default()),
        )
        .await;

        assert!(matches!(result, Err(BridgeError::Channel(_))));
    }
}
