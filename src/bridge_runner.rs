//! Bridge runner - drives a PlayerBridge from its own task
//!
//! The bridge is only ever touched by this task. Everyone else holds a
//! cloneable `BridgeHandle` and gets results back over oneshot replies, so
//! each command is a suspension point for the caller and the bridge state
//! never has concurrent writers.

use crate::bridge::{BridgeError, BridgeSnapshot, Dispatch, InboundMessage, PlayerBridge};
use crate::events::{BridgeCommand, BridgeEvent, BridgeState};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Lower bound for the timeout sweep period
const MIN_EXPIRY_CHECK: Duration = Duration::from_millis(10);

enum Request {
    Load {
        video_id: String,
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Reload {
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Command {
        command: BridgeCommand,
        reply: oneshot::Sender<Result<Dispatch, BridgeError>>,
    },
    Subscribe {
        reply: oneshot::Sender<mpsc::Receiver<BridgeEvent>>,
    },
    Snapshot {
        reply: oneshot::Sender<BridgeSnapshot>,
    },
    Shutdown,
}

/// Typed access to a running bridge
#[derive(Clone)]
pub struct BridgeHandle {
    tx: mpsc::UnboundedSender<Request>,
}

impl BridgeHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| BridgeError::Closed)?;
        rx.await.map_err(|_| BridgeError::Closed)
    }

    pub async fn load(&self, video_id: &str) -> Result<(), BridgeError> {
        let video_id = video_id.to_string();
        self.request(|reply| Request::Load { video_id, reply }).await?
    }

    pub async fn reload(&self) -> Result<(), BridgeError> {
        self.request(|reply| Request::Reload { reply }).await?
    }

    pub async fn command(&self, command: BridgeCommand) -> Result<Dispatch, BridgeError> {
        self.request(|reply| Request::Command { command, reply })
            .await?
    }

    pub async fn seek(&self, seconds: f64) -> Result<Dispatch, BridgeError> {
        self.command(BridgeCommand::Seek(seconds)).await
    }

    pub async fn play(&self) -> Result<Dispatch, BridgeError> {
        self.command(BridgeCommand::Play).await
    }

    pub async fn pause(&self) -> Result<Dispatch, BridgeError> {
        self.command(BridgeCommand::Pause).await
    }

    pub async fn set_rate(&self, rate: f64) -> Result<Dispatch, BridgeError> {
        self.command(BridgeCommand::SetRate(rate)).await
    }

    pub async fn subscribe(&self) -> Result<mpsc::Receiver<BridgeEvent>, BridgeError> {
        self.request(|reply| Request::Subscribe { reply }).await
    }

    pub async fn snapshot(&self) -> Result<BridgeSnapshot, BridgeError> {
        self.request(|reply| Request::Snapshot { reply }).await
    }

    /// Stop the runner and unmount the player, even if other handles remain
    pub fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown);
    }
}

/// Move `bridge` onto a task. The task ends (and unmounts the player) on
/// `shutdown` or once every handle has been dropped.
pub fn spawn(
    bridge: PlayerBridge,
    inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
) -> (BridgeHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run(bridge, inbound_rx, rx));
    (BridgeHandle { tx }, task)
}

async fn run(
    mut bridge: PlayerBridge,
    mut inbound_rx: mpsc::UnboundedReceiver<InboundMessage>,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    let mut expiry = interval(bridge.config().expiry_check_interval.max(MIN_EXPIRY_CHECK));
    expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sampler: Option<Interval> = None;

    info!("Player bridge runner started");

    loop {
        sync_sampler(&bridge, &mut sampler);

        tokio::select! {
            request = requests.recv() => match request {
                Some(Request::Shutdown) => {
                    info!("Bridge shutdown requested");
                    break;
                }
                Some(request) => handle_request(&mut bridge, request),
                None => {
                    info!("All bridge handles dropped, shutting down");
                    break;
                }
            },

            Some(message) = inbound_rx.recv() => {
                bridge.on_message(message);
            }

            _ = tick(&mut sampler) => {
                bridge.request_time();
            }

            _ = expiry.tick() => {
                bridge.expire_pending(Instant::now());
            }
        }
    }

    bridge.close();
}

fn handle_request(bridge: &mut PlayerBridge, request: Request) {
    // A dropped reply receiver just means the caller stopped waiting
    match request {
        Request::Load { video_id, reply } => {
            let _ = reply.send(bridge.load(&video_id));
        }
        Request::Reload { reply } => {
            let _ = reply.send(bridge.reload());
        }
        Request::Command { command, reply } => {
            let _ = reply.send(bridge.command(command));
        }
        Request::Subscribe { reply } => {
            let _ = reply.send(bridge.subscribe());
        }
        Request::Snapshot { reply } => {
            let _ = reply.send(bridge.snapshot());
        }
        Request::Shutdown => {}
    }
}

/// Keep the time sampler alive exactly while the player is playing
fn sync_sampler(bridge: &PlayerBridge, sampler: &mut Option<Interval>) {
    let playing = bridge.state() == BridgeState::Playing;
    match (playing, sampler.is_some()) {
        (true, false) => {
            let period = bridge.config().effective_sample_interval();
            debug!("⏲️ Starting time sampler every {:?}", period);
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            *sampler = Some(ticker);
        }
        (false, true) => {
            debug!("⏲️ Stopping time sampler ({:?})", bridge.state());
            *sampler = None;
        }
        _ => {}
    }
}

async fn tick(sampler: &mut Option<Interval>) {
    match sampler {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::events::PlayerCommand;
    use crate::testing::MockSurface;

    fn start(surface: &MockSurface) -> (BridgeHandle, JoinHandle<()>) {
        let (bridge, inbound) = PlayerBridge::new(Box::new(surface.clone()), BridgeConfig::default());
        spawn(bridge, inbound)
    }

    async fn wait_for(
        events: &mut mpsc::Receiver<BridgeEvent>,
        wanted: impl Fn(&BridgeEvent) -> bool,
    ) -> BridgeEvent {
        loop {
            let event = events.recv().await.expect("bridge event stream ended");
            if wanted(&event) {
                return event;
            }
        }
    }

    fn time_requests(surface: &MockSurface) -> usize {
        surface
            .commands()
            .into_iter()
            .filter(|c| *c == PlayerCommand::GetCurrentTime)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_queues_until_ready() {
        let surface = MockSurface::default();
        let (handle, _task) = start(&surface);
        let mut events = handle.subscribe().await.unwrap();

        assert_eq!(handle.seek(10.0).await, Ok(Dispatch::Queued));
        handle.load("abc").await.unwrap();
        assert_eq!(handle.seek(20.0).await, Ok(Dispatch::Queued));
        assert_eq!(handle.snapshot().await.unwrap().pending, 2);

        surface.handler().deliver(r#"{"event":"ready"}"#);
        wait_for(&mut events, |e| *e == BridgeEvent::Ready).await;

        assert_eq!(surface.seeks(), vec![10.0, 20.0]);
        assert_eq!(handle.play().await, Ok(Dispatch::Sent));
        assert_eq!(surface.commands().last(), Some(&PlayerCommand::PlayVideo));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_loading_times_out() {
        let surface = MockSurface::default();
        let (handle, _task) = start(&surface);
        let mut events = handle.subscribe().await.unwrap();

        handle.load("abc").await.unwrap();
        let started = Instant::now();
        handle.seek(10.0).await.unwrap();

        let event = wait_for(&mut events, |e| matches!(e, BridgeEvent::Error(_))).await;
        assert_eq!(event, BridgeEvent::Error(BridgeError::Timeout));
        assert!(started.elapsed() >= Duration::from_secs(5));

        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.pending, 0);
        assert_eq!(snapshot.state, BridgeState::Loading);

        // A late ready must not fire the dropped seek
        surface.handler().deliver(r#"{"event":"ready"}"#);
        wait_for(&mut events, |e| *e == BridgeEvent::Ready).await;
        assert!(surface.seeks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampler_follows_playing_state() {
        let surface = MockSurface::default();
        let (handle, _task) = start(&surface);
        let mut events = handle.subscribe().await.unwrap();

        handle.load("abc").await.unwrap();
        let handler = surface.handler();
        handler.deliver(r#"{"event":"ready"}"#);
        handler.deliver(r#"{"event":"stateChange","state":"playing"}"#);
        wait_for(&mut events, |e| *e == BridgeEvent::StateChanged(BridgeState::Playing)).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        let while_playing = time_requests(&surface);
        assert!(while_playing >= 5, "only {} samples in 1s", while_playing);

        handler.deliver(r#"{"event":"stateChange","state":"paused"}"#);
        wait_for(&mut events, |e| *e == BridgeEvent::StateChanged(BridgeState::Paused)).await;
        let at_pause = time_requests(&surface);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(time_requests(&surface), at_pause);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_through_handle() {
        let surface = MockSurface::default();
        let (handle, _task) = start(&surface);
        let mut events = handle.subscribe().await.unwrap();

        handle.load("abc").await.unwrap();
        let first = surface.handler();
        first.deliver(r#"{"event":"ready"}"#);
        first.deliver(r#"{"event":"seeked","time":300}"#);
        wait_for(&mut events, |e| *e == BridgeEvent::Seeked(300.0)).await;

        handle.reload().await.unwrap();
        let second = surface.handler();
        assert_eq!(second.generation(), first.generation() + 1);

        second.deliver(r#"{"event":"ready"}"#);
        wait_for(&mut events, |e| *e == BridgeEvent::Ready).await;
        assert_eq!(surface.seeks(), vec![300.0]);
    }

    #[tokio::test]
    async fn test_runner_stops_when_handles_drop() {
        let surface = MockSurface::default();
        let (handle, task) = start(&surface);
        handle.load("abc").await.unwrap();

        let spare = handle.clone();
        drop(handle);
        assert!(spare.snapshot().await.is_ok());
        drop(spare);

        task.await.unwrap();
        assert_eq!(surface.unmounts(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_with_live_handles() {
        let surface = MockSurface::default();
        let (handle, task) = start(&surface);
        handle.load("abc").await.unwrap();
        let mut events = handle.subscribe().await.unwrap();

        handle.shutdown();
        task.await.unwrap();

        assert_eq!(surface.unmounts(), 1);
        assert_eq!(handle.play().await, Err(BridgeError::Closed));
        // Subscribers see the stream end
        while events.recv().await.is_some() {}
    }

    #[tokio::test]
    async fn test_handle_reports_closed_runner() {
        let surface = MockSurface::default();
        let (handle, task) = start(&surface);
        task.abort();
        let _ = task.await;

        assert_eq!(handle.seek(1.0).await, Err(BridgeError::Closed));
        assert!(matches!(handle.snapshot().await, Err(BridgeError::Closed)));
    }
}
