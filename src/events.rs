//! Message types exchanged with the embedded player and with bridge subscribers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bridge::BridgeError;

/// Lifecycle of the bridge as seen from the host side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Loading,
    Ready,
    Playing,
    Paused,
    Buffering,
    Ended,
    Errored,
}

impl BridgeState {
    /// States in which the player surface exists and accepts commands directly
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Playing | Self::Paused | Self::Buffering | Self::Ended
        )
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Playback states the player reports in `stateChange`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Buffering,
    Ended,
}

impl From<PlaybackState> for BridgeState {
    fn from(state: PlaybackState) -> Self {
        match state {
            PlaybackState::Playing => BridgeState::Playing,
            PlaybackState::Paused => BridgeState::Paused,
            PlaybackState::Buffering => BridgeState::Buffering,
            PlaybackState::Ended => BridgeState::Ended,
        }
    }
}

/// Inbound player -> host messages, e.g. `{"event":"timeUpdate","time":123.4}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum PlayerEvent {
    Ready,
    StateChange { state: PlaybackState },
    TimeUpdate { time: f64 },
    Seeked { time: f64 },
    Error { error: String },
}

impl PlayerEvent {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Outbound host -> player messages, e.g. `{"command":"seekTo","seconds":10.0,"allowSeekAhead":true}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum PlayerCommand {
    #[serde(rename_all = "camelCase")]
    SeekTo { seconds: f64, allow_seek_ahead: bool },
    PlayVideo,
    PauseVideo,
    SetPlaybackRate { rate: f64 },
    GetCurrentTime,
    #[serde(rename_all = "camelCase")]
    LoadVideoById { video_id: String },
}

impl PlayerCommand {
    /// Serialize to a single newline-free JSON line
    pub fn to_wire(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// High-level commands accepted by the bridge (and queued while it is not live)
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BridgeCommand {
    Seek(f64),
    Play,
    Pause,
    SetRate(f64),
}

impl BridgeCommand {
    pub fn to_player(self, allow_seek_ahead: bool) -> PlayerCommand {
        match self {
            Self::Seek(seconds) => PlayerCommand::SeekTo {
                seconds,
                allow_seek_ahead,
            },
            Self::Play => PlayerCommand::PlayVideo,
            Self::Pause => PlayerCommand::PauseVideo,
            Self::SetRate(rate) => PlayerCommand::SetPlaybackRate { rate },
        }
    }
}

/// What subscribers of a bridge receive
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    Ready,
    StateChanged(BridgeState),
    TimeUpdate(f64),
    Seeked(f64),
    Error(BridgeError),
}
