//! ReelSync - timestamp recognition and synchronized seeking for an embedded player
//!
//! Recognized on-screen text is turned into an elapsed time, the delay since
//! the photo was taken is added back, and the result is sent as a seek to an
//! embedded player that boots asynchronously and can be reloaded at any time.

#![forbid(unsafe_code)]

pub mod bridge;
pub mod bridge_runner;
pub mod capture;
pub mod config;
pub mod delay;
pub mod events;
pub mod session;
pub mod time_extract;
pub mod ws_player;

#[cfg(test)]
mod testing;

pub use bridge::{BridgeError, ChannelError, Dispatch, PlayerBridge, PlayerChannel, PlayerSurface};
pub use bridge_runner::BridgeHandle;
pub use capture::{CaptureOrchestrator, CaptureOutcome, CaptureState, SeekStatus, TimelineListener};
pub use config::SyncConfig;
pub use session::ViewingSession;
pub use time_extract::{extract, CanonicalTime, ExtractError};
