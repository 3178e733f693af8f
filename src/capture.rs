//! Capture orchestrator
//!
//! One capture cycle: recognized text in, a validated time out, the capture
//! delay folded in, and a seek issued through the bridge. Only one cycle may
//! be processing at a time; a capture that arrives meanwhile is rejected
//! rather than queued.
//!
//! ```text
//! Idle -> Processing -> Resolved | Failed -> (acknowledge / next capture) -> Idle
//! ```

use crate::bridge::{BridgeError, Dispatch};
use crate::bridge_runner::BridgeHandle;
use crate::config::{CaptureConfig, ExtractionFallback};
use crate::delay::{self, ResolvedTimeline};
use crate::time_extract::{self, CanonicalTime, ExtractError};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("a capture is already being processed")]
    Busy,
}

/// Receives the result of every capture cycle
pub trait TimelineListener: Send + Sync {
    fn on_timeline_resolved(&self, movie_id: &str, total_seconds: u64);
    fn on_timeline_failed(&self, movie_id: &str, reason: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureState {
    Idle,
    Processing,
    Resolved(ResolvedTimeline),
    Failed(String),
}

/// What happened to the seek issued for a resolved capture
#[derive(Debug, Clone, PartialEq)]
pub enum SeekStatus {
    Sent,
    /// Waiting for the player to become ready
    Queued,
    Rejected(BridgeError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Resolved {
        timeline: ResolvedTimeline,
        seek: SeekStatus,
    },
    Failed {
        reason: String,
    },
}

pub struct CaptureOrchestrator {
    movie_id: String,
    bridge: BridgeHandle,
    listener: Arc<dyn TimelineListener>,
    config: CaptureConfig,
    state: Mutex<CaptureState>,
    last_confirmed: Mutex<Option<f64>>,
}

impl CaptureOrchestrator {
    pub fn new(
        movie_id: impl Into<String>,
        bridge: BridgeHandle,
        listener: Arc<dyn TimelineListener>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            movie_id: movie_id.into(),
            bridge,
            listener,
            config,
            state: Mutex::new(CaptureState::Idle),
            last_confirmed: Mutex::new(None),
        }
    }

    pub fn movie_id(&self) -> &str {
        &self.movie_id
    }

    pub fn state(&self) -> CaptureState {
        self.lock_state().clone()
    }

    /// Position the player last confirmed with a `seeked` event
    pub fn last_confirmed_position(&self) -> Option<f64> {
        *self
            .last_confirmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record_confirmation(&self, seconds: f64) {
        debug!("Seek confirmed at {:.1}s for {}", seconds, self.movie_id);
        *self
            .last_confirmed
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(seconds);
    }

    /// Mark a finished cycle as consumed. Returns false if there was nothing
    /// to acknowledge.
    pub fn acknowledge(&self) -> bool {
        let mut state = self.lock_state();
        match *state {
            CaptureState::Resolved(_) | CaptureState::Failed(_) => {
                *state = CaptureState::Idle;
                true
            }
            CaptureState::Idle | CaptureState::Processing => false,
        }
    }

    /// Run one capture cycle for text recognized from a frame taken at
    /// `captured_at`. The seek is issued but its confirmation is not awaited.
    pub async fn submit_capture(
        &self,
        raw_text: &str,
        captured_at: Instant,
    ) -> Result<CaptureOutcome, CaptureError> {
        let cycle = self.begin()?;
        info!("📸 Capture for {}: {:?}", self.movie_id, raw_text.trim());

        match self.resolve(raw_text, captured_at) {
            Ok(timeline) => {
                info!(
                    "⏩ Resolved {}s + {:.1}s delay -> seeking to {}s",
                    timeline.raw_seconds,
                    timeline.delay_seconds(),
                    timeline.total_seconds
                );
                let seek = self.issue_seek(timeline.total_seconds).await;
                cycle.finish(CaptureState::Resolved(timeline));
                self.listener
                    .on_timeline_resolved(&self.movie_id, timeline.total_seconds);
                Ok(CaptureOutcome::Resolved { timeline, seek })
            }
            Err(reason) => {
                warn!("❌ Capture failed for {}: {}", self.movie_id, reason);
                cycle.finish(CaptureState::Failed(reason.clone()));
                self.listener.on_timeline_failed(&self.movie_id, &reason);
                Ok(CaptureOutcome::Failed { reason })
            }
        }
    }

    fn begin(&self) -> Result<Cycle<'_>, CaptureError> {
        let mut state = self.lock_state();
        match *state {
            CaptureState::Processing => {
                warn!("Rejecting capture for {}: one is already in flight", self.movie_id);
                return Err(CaptureError::Busy);
            }
            CaptureState::Resolved(_) | CaptureState::Failed(_) => {
                debug!("Previous capture result replaced before acknowledgement");
            }
            CaptureState::Idle => {}
        }
        *state = CaptureState::Processing;
        Ok(Cycle {
            state: &self.state,
            finished: false,
        })
    }

    fn resolve(&self, raw_text: &str, captured_at: Instant) -> Result<ResolvedTimeline, String> {
        let time = match time_extract::extract(raw_text) {
            Ok(time) => time,
            Err(ExtractError::Empty) => return Err(ExtractError::Empty.reason().to_string()),
            Err(e) if self.config.fallback == ExtractionFallback::ZeroTime => {
                warn!("Extraction failed ({}), falling back to 00:00:00", e);
                CanonicalTime::ZERO
            }
            Err(e) => return Err(e.reason().to_string()),
        };
        debug!("Extracted {} from capture", time);

        Ok(delay::compensate(
            captured_at,
            Instant::now(),
            time.total_seconds(),
            self.config.minimum_delay,
        ))
    }

    async fn issue_seek(&self, total_seconds: u64) -> SeekStatus {
        match self.bridge.seek(total_seconds as f64).await {
            Ok(Dispatch::Sent) => SeekStatus::Sent,
            Ok(Dispatch::Queued) => {
                debug!("Seek to {}s queued until the player is ready", total_seconds);
                SeekStatus::Queued
            }
            Err(e) => {
                warn!("Seek to {}s was not issued: {}", total_seconds, e);
                SeekStatus::Rejected(e)
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CaptureState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An in-flight cycle. If the submitting future is dropped before the cycle
/// finishes, the orchestrator goes back to `Idle` instead of staying busy.
struct Cycle<'a> {
    state: &'a Mutex<CaptureState>,
    finished: bool,
}

impl Cycle<'_> {
    fn finish(mut self, next: CaptureState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = next;
        self.finished = true;
    }
}

impl Drop for Cycle<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!("Capture cycle abandoned, back to idle");
            *self.state.lock().unwrap_or_else(PoisonError::into_inner) = CaptureState::Idle;
        }
    }
}
