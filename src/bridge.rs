//! Player bridge - the single owner of the channel to the embedded player
//!
//! The embedded player boots on its own schedule, so commands issued before
//! it reports `ready` are queued and flushed in submission order once it
//! does. Every mount of the player surface gets a new generation; queued
//! commands and inbound messages from an older generation are discarded so
//! a reload can never be driven by the surface it replaced.
//!
//! This type is synchronous. `bridge_runner` owns it on a task and feeds it
//! inbound messages, sampling ticks and timeout sweeps.

use crate::config::BridgeConfig;
use crate::events::{BridgeCommand, BridgeEvent, BridgeState, PlayerCommand, PlayerEvent};
use std::collections::VecDeque;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Buffered events per subscriber
const SUBSCRIBER_CAPACITY: usize = 256;
/// Free slots kept for non-advisory events; `TimeUpdate`s are skipped for a
/// subscriber whose free capacity is down to this
const SUBSCRIBER_RESERVE: usize = 128;

/// Delivery failure on the raw message channel
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("message delivery failed: {0}")]
    Delivery(String),

    #[error("channel closed")]
    Closed,
}

/// Everything that can go wrong between the host and the player
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("player error: {0}")]
    Player(String),

    #[error("player failed to become ready")]
    Timeout,

    #[error("player is in an error state; reload required")]
    Errored,

    #[error("no video loaded")]
    NotLoaded,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("bridge task stopped")]
    Closed,
}

/// Outbound half of a mounted player surface
pub trait PlayerChannel: Send {
    /// Deliver one serialized command
    fn post(&mut self, message: &str) -> Result<(), ChannelError>;
}

impl PlayerChannel for mpsc::UnboundedSender<String> {
    fn post(&mut self, message: &str) -> Result<(), ChannelError> {
        self.send(message.to_owned()).map_err(|_| ChannelError::Closed)
    }
}

/// A raw inbound message tagged with the generation of the surface that sent it
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub generation: u64,
    pub raw: String,
}

/// The inbound message handler installed into a player surface on mount
#[derive(Debug, Clone)]
pub struct MessageHandler {
    generation: u64,
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl MessageHandler {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Hand a raw JSON message from the player to the bridge.
    /// Returns false once the bridge is gone.
    pub fn deliver(&self, raw: impl Into<String>) -> bool {
        self.tx
            .send(InboundMessage {
                generation: self.generation,
                raw: raw.into(),
            })
            .is_ok()
    }
}

/// Host side of the embedded player (a webview, a socket to a control script...)
pub trait PlayerSurface: Send {
    /// Create the player for `video_id`, install `handler` as its only
    /// inbound handler and return the outbound channel.
    fn mount(
        &mut self,
        video_id: &str,
        handler: MessageHandler,
    ) -> Result<Box<dyn PlayerChannel>, ChannelError>;

    /// Tear down the current player and its handler registration
    fn unmount(&mut self);
}

/// A command waiting for the player to become ready
#[derive(Debug, Clone)]
pub struct PendingCommand {
    pub command: BridgeCommand,
    pub generation: u64,
    pub enqueued_at: Instant,
}

/// Whether a command went out immediately or is waiting for `ready`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    Queued,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSnapshot {
    pub state: BridgeState,
    pub generation: u64,
    pub pending: usize,
    pub last_known_time: Option<f64>,
    pub video_id: Option<String>,
}

pub struct PlayerBridge {
    config: BridgeConfig,
    state: BridgeState,
    generation: u64,

    surface: Box<dyn PlayerSurface>,
    channel: Option<Box<dyn PlayerChannel>>,
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,

    pending: VecDeque<PendingCommand>,
    subscribers: Vec<mpsc::Sender<BridgeEvent>>,

    video_id: Option<String>,
    last_known_time: Option<f64>,
    /// When the bridge last entered `Loading`
    loading_since: Option<Instant>,
}

impl PlayerBridge {
    /// Create a bridge around `surface`. The returned receiver carries every
    /// inbound message from every generation; feed it to `on_message`.
    pub fn new(
        surface: Box<dyn PlayerSurface>,
        config: BridgeConfig,
    ) -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let bridge = Self {
            config,
            state: BridgeState::Uninitialized,
            generation: 0,
            surface,
            channel: None,
            inbound_tx,
            pending: VecDeque::new(),
            subscribers: Vec::new(),
            video_id: None,
            last_known_time: None,
            loading_since: None,
        };
        (bridge, inbound_rx)
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn last_known_time(&self) -> Option<f64> {
        self.last_known_time
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            state: self.state,
            generation: self.generation,
            pending: self.pending.len(),
            last_known_time: self.last_known_time,
            video_id: self.video_id.clone(),
        }
    }

    /// Subscribe to bridge events. Time updates are coalesced for a
    /// subscriber that falls behind; one that stops reading altogether is
    /// disconnected once its buffer is full.
    pub fn subscribe(&mut self) -> mpsc::Receiver<BridgeEvent> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        self.subscribers.push(tx);
        rx
    }

    // === Lifecycle ===

    /// Mount the player for a new video. Commands queued before the very
    /// first load are kept; loading over an existing video starts a new
    /// generation and forgets the previous playback position.
    pub fn load(&mut self, video_id: &str) -> Result<(), BridgeError> {
        info!("🎬 Loading video {} (was {:?})", video_id, self.state);
        self.video_id = Some(video_id.to_string());
        self.last_known_time = None;
        self.remount(video_id)
    }

    /// Recreate the player surface for the current video (e.g. after a
    /// rotation), then seek back to the last reported position once the new
    /// surface is ready.
    pub fn reload(&mut self) -> Result<(), BridgeError> {
        let Some(video_id) = self.video_id.clone() else {
            warn!("Reload requested before any video was loaded");
            return Err(BridgeError::NotLoaded);
        };

        info!(
            "🔁 Reloading {} from {:?}, last known time {:?}",
            video_id, self.state, self.last_known_time
        );
        self.remount(&video_id)?;

        if let Some(seconds) = self.last_known_time {
            self.enqueue(BridgeCommand::Seek(seconds));
        }
        Ok(())
    }

    fn remount(&mut self, video_id: &str) -> Result<(), BridgeError> {
        // The old handler registration goes away before the new one is installed
        if self.channel.take().is_some() {
            debug!("Unmounting surface of generation {}", self.generation);
            self.surface.unmount();
        }
        if self.state != BridgeState::Uninitialized {
            self.generation += 1;
        }

        let handler = MessageHandler {
            generation: self.generation,
            tx: self.inbound_tx.clone(),
        };
        self.transition(BridgeState::Loading);

        match self.surface.mount(video_id, handler) {
            Ok(channel) => {
                debug!("Mounted surface for generation {}", self.generation);
                self.channel = Some(channel);
                Ok(())
            }
            Err(e) => {
                error!("❌ Failed to mount player surface: {}", e);
                let err = BridgeError::Channel(e);
                self.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Tear down the surface for good
    pub fn close(&mut self) {
        if self.channel.take().is_some() {
            self.surface.unmount();
        }
        self.pending.clear();
        info!("Player bridge closed at generation {}", self.generation);
    }

    // === Commands ===

    pub fn seek(&mut self, seconds: f64) -> Result<Dispatch, BridgeError> {
        self.command(BridgeCommand::Seek(seconds))
    }

    pub fn play(&mut self) -> Result<Dispatch, BridgeError> {
        self.command(BridgeCommand::Play)
    }

    pub fn pause(&mut self) -> Result<Dispatch, BridgeError> {
        self.command(BridgeCommand::Pause)
    }

    pub fn set_rate(&mut self, rate: f64) -> Result<Dispatch, BridgeError> {
        self.command(BridgeCommand::SetRate(rate))
    }

    /// Send a command now if the player is live, queue it if it is still
    /// coming up, reject it if the player has errored.
    pub fn command(&mut self, command: BridgeCommand) -> Result<Dispatch, BridgeError> {
        validate(command)?;

        match self.state {
            BridgeState::Errored => {
                warn!("❌ Rejecting {:?}: player is errored", command);
                Err(BridgeError::Errored)
            }
            state if state.is_live() => {
                self.dispatch(command)?;
                Ok(Dispatch::Sent)
            }
            _ => {
                self.enqueue(command);
                Ok(Dispatch::Queued)
            }
        }
    }

    /// Ask the player for its current time; only meaningful while playing.
    /// Samples are advisory, so a failed request is only logged.
    pub fn request_time(&mut self) {
        if self.state != BridgeState::Playing {
            return;
        }
        if let Err(e) = self.deliver(&PlayerCommand::GetCurrentTime) {
            warn!("⚠️ Time sample request failed: {}", e);
        }
    }

    fn enqueue(&mut self, command: BridgeCommand) {
        self.pending.push_back(PendingCommand {
            command,
            generation: self.generation,
            enqueued_at: Instant::now(),
        });
        debug!(
            "📥 Queued {:?} while {:?} ({} pending, generation {})",
            command,
            self.state,
            self.pending.len(),
            self.generation
        );
    }

    /// Send one command. A delivery that still fails after its retry is
    /// reported as an `Error` event for that command only; a closed channel
    /// means the surface is gone and puts the bridge into `Errored`.
    fn dispatch(&mut self, command: BridgeCommand) -> Result<(), BridgeError> {
        let message = command.to_player(self.config.allow_seek_ahead);
        match self.deliver(&message) {
            Ok(()) => Ok(()),
            Err(ChannelError::Closed) => {
                error!("❌ Player channel closed while sending {:?}", command);
                let err = BridgeError::Channel(ChannelError::Closed);
                self.fail(err.clone());
                Err(err)
            }
            Err(e) => {
                error!("❌ Giving up on {:?}: {}", command, e);
                let err = BridgeError::Channel(e);
                self.emit(BridgeEvent::Error(err.clone()));
                Err(err)
            }
        }
    }

    /// Post one serialized command, retrying a failed delivery once
    fn deliver(&mut self, command: &PlayerCommand) -> Result<(), ChannelError> {
        let message = command
            .to_wire()
            .map_err(|e| ChannelError::Delivery(e.to_string()))?;
        let channel = self.channel.as_mut().ok_or(ChannelError::Closed)?;

        match channel.post(&message) {
            Ok(()) => {}
            Err(ChannelError::Closed) => return Err(ChannelError::Closed),
            Err(first) => {
                warn!("⚠️ Delivery of {} failed ({}), retrying once", message, first);
                channel.post(&message)?;
            }
        }
        debug!("📤 Sent {}", message);
        Ok(())
    }

    // === Inbound ===

    /// Entry point for messages from any generation's handler
    pub fn on_message(&mut self, message: InboundMessage) {
        if message.generation != self.generation {
            debug!(
                "🗑️ Dropping message from stale generation {} (current {}): {}",
                message.generation, self.generation, message.raw
            );
            return;
        }
        self.on_event(&message.raw);
    }

    /// Handle one raw JSON event from the current player
    pub fn on_event(&mut self, raw: &str) {
        match PlayerEvent::parse(raw) {
            Ok(event) => self.handle_event(event),
            Err(e) => warn!("Ignoring unrecognized player message {:?}: {}", raw, e),
        }
    }

    fn handle_event(&mut self, event: PlayerEvent) {
        match (self.state, event) {
            (BridgeState::Loading, PlayerEvent::Ready) => {
                self.transition(BridgeState::Ready);
                self.emit(BridgeEvent::Ready);
                self.flush_pending();
            }

            (state, PlayerEvent::Ready) => {
                debug!("Ignoring ready while {:?}", state);
            }

            (_, PlayerEvent::Error { error }) => {
                error!("❌ Player reported error: {}", error);
                self.fail(BridgeError::Player(error));
            }

            (state, PlayerEvent::StateChange { state: next }) if state.is_live() => {
                self.transition(next.into());
            }

            (state, PlayerEvent::StateChange { state: next }) => {
                debug!("Ignoring stateChange to {:?} while {:?}", next, state);
            }

            (_, PlayerEvent::TimeUpdate { time }) => {
                self.last_known_time = Some(time);
                self.emit(BridgeEvent::TimeUpdate(time));
            }

            (_, PlayerEvent::Seeked { time }) => {
                info!("🎯 Player seeked to {:.1}s", time);
                self.last_known_time = Some(time);
                self.emit(BridgeEvent::Seeked(time));
            }
        }
    }

    fn flush_pending(&mut self) {
        let queued = std::mem::take(&mut self.pending);
        if queued.is_empty() {
            return;
        }
        info!("📬 Flushing {} pending command(s)", queued.len());

        for pending in queued {
            if pending.generation != self.generation {
                debug!(
                    "🗑️ Discarding {:?} from stale generation {}",
                    pending.command, pending.generation
                );
                continue;
            }
            if self.state == BridgeState::Errored {
                debug!("Dropping {:?}: bridge errored during flush", pending.command);
                continue;
            }
            // A failed command is already reported; the rest still go out in order
            if let Err(e) = self.dispatch(pending.command) {
                debug!("Flush of {:?} failed: {}", pending.command, e);
            }
        }
    }

    /// Drop commands that have been waiting on a loading player for longer
    /// than the configured timeout. Returns how many were dropped.
    pub fn expire_pending(&mut self, now: Instant) -> usize {
        if self.state != BridgeState::Loading || self.pending.is_empty() {
            return 0;
        }

        let generation = self.generation;
        let timeout = self.config.pending_timeout;
        let loading_since = self.loading_since;
        let mut expired = 0;

        self.pending.retain(|pending| {
            if pending.generation != generation {
                return false;
            }
            let waiting_from = match loading_since {
                Some(since) => pending.enqueued_at.max(since),
                None => pending.enqueued_at,
            };
            let keep = now.saturating_duration_since(waiting_from) < timeout;
            if !keep {
                expired += 1;
            }
            keep
        });

        if expired > 0 {
            warn!(
                "⏱️ Dropped {} command(s) after {:?} waiting for the player",
                expired, timeout
            );
            self.emit(BridgeEvent::Error(BridgeError::Timeout));
        }
        expired
    }

    // === Helpers ===

    fn fail(&mut self, err: BridgeError) {
        if !self.pending.is_empty() {
            debug!("Dropping {} pending command(s) on error", self.pending.len());
            self.pending.clear();
        }
        self.transition(BridgeState::Errored);
        self.emit(BridgeEvent::Error(err));
    }

    fn transition(&mut self, next: BridgeState) {
        if self.state == next {
            return;
        }
        info!(
            "🔄 Bridge state transition: {:?} -> {:?} (generation {})",
            self.state, next, self.generation
        );
        self.state = next;
        self.loading_since = (next == BridgeState::Loading).then(Instant::now);
        self.emit(BridgeEvent::StateChanged(next));
    }

    fn emit(&mut self, event: BridgeEvent) {
        let advisory = matches!(event, BridgeEvent::TimeUpdate(_));
        self.subscribers.retain(|tx| {
            if advisory && tx.capacity() <= SUBSCRIBER_RESERVE {
                return !tx.is_closed();
            }
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("Disconnecting a bridge subscriber that stopped reading events");
                    false
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }
}

fn validate(command: BridgeCommand) -> Result<(), BridgeError> {
    match command {
        BridgeCommand::Seek(seconds) if !seconds.is_finite() || seconds < 0.0 => Err(
            BridgeError::InvalidArgument(format!("seek target {} is not a valid time", seconds)),
        ),
        BridgeCommand::SetRate(rate) if !rate.is_finite() || rate <= 0.0 => Err(
            BridgeError::InvalidArgument(format!("playback rate {} must be positive", rate)),
        ),
        _ => Ok(()),
    }
}
