//! In-memory player surface used by the unit tests

use crate::bridge::{ChannelError, MessageHandler, PlayerChannel, PlayerSurface};
use crate::events::PlayerCommand;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    posted: Vec<String>,
    handlers: Vec<MessageHandler>,
    mounts: Vec<String>,
    unmounts: usize,
    failing_posts: usize,
    fail_mounts: bool,
    closed: bool,
}

/// Records every mount, unmount and posted command
#[derive(Clone, Default)]
pub struct MockSurface {
    inner: Arc<Mutex<MockState>>,
}

impl MockSurface {
    /// Handler installed by the most recent mount
    pub fn handler(&self) -> MessageHandler {
        self.inner
            .lock()
            .unwrap()
            .handlers
            .last()
            .cloned()
            .expect("surface was never mounted")
    }

    pub fn posted(&self) -> Vec<String> {
        self.inner.lock().unwrap().posted.clone()
    }

    pub fn commands(&self) -> Vec<PlayerCommand> {
        self.posted()
            .iter()
            .map(|raw| serde_json::from_str(raw).unwrap())
            .collect()
    }

    /// Targets of every `seekTo` posted so far
    pub fn seeks(&self) -> Vec<f64> {
        self.commands()
            .into_iter()
            .filter_map(|c| match c {
                PlayerCommand::SeekTo { seconds, .. } => Some(seconds),
                _ => None,
            })
            .collect()
    }

    pub fn mounts(&self) -> Vec<String> {
        self.inner.lock().unwrap().mounts.clone()
    }

    pub fn unmounts(&self) -> usize {
        self.inner.lock().unwrap().unmounts
    }

    pub fn fail_next_posts(&self, count: usize) {
        self.inner.lock().unwrap().failing_posts = count;
    }

    /// Every later post reports the channel as closed
    pub fn close_channel(&self) {
        self.inner.lock().unwrap().closed = true;
    }

    pub fn fail_mounts(&self, fail: bool) {
        self.inner.lock().unwrap().fail_mounts = fail;
    }
}

struct MockChannel {
    inner: Arc<Mutex<MockState>>,
}

impl PlayerChannel for MockChannel {
    fn post(&mut self, message: &str) -> Result<(), ChannelError> {
        let mut state = self.inner.lock().unwrap();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if state.failing_posts > 0 {
            state.failing_posts -= 1;
            return Err(ChannelError::Delivery("injected failure".to_string()));
        }
        state.posted.push(message.to_string());
        Ok(())
    }
}

impl PlayerSurface for MockSurface {
    fn mount(
        &mut self,
        video_id: &str,
        handler: MessageHandler,
    ) -> Result<Box<dyn PlayerChannel>, ChannelError> {
        let mut state = self.inner.lock().unwrap();
        if state.fail_mounts {
            return Err(ChannelError::Delivery("surface unavailable".to_string()));
        }
        state.mounts.push(video_id.to_string());
        state.handlers.push(handler);
        Ok(Box::new(MockChannel {
            inner: self.inner.clone(),
        }))
    }

    fn unmount(&mut self) {
        self.inner.lock().unwrap().unmounts += 1;
    }
}
