//! Alarms backed by the tokio runtime

use super::{Alarms, TimerToken};
use core::time::Duration;
use std::collections::BTreeMap;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// An [`Alarms`] implementation using tokio timers
///
/// Every alarm is a task sleeping for the timeout. Expired tokens are sent to the receiver
/// returned by [`new`], the event loop of the host is expected to pass them on to
/// [`ChannelManager::timer_expired`].
///
/// This must be created within the context of a tokio runtime.
///
/// [`new`]: TokioAlarms::new
/// [`ChannelManager::timer_expired`]: crate::ChannelManager::timer_expired
#[derive(Debug)]
pub struct TokioAlarms {
    sender: UnboundedSender<TimerToken>,
    tasks: BTreeMap<TimerToken, JoinHandle<()>>,
}

impl TokioAlarms {
    pub fn new() -> (Self, UnboundedReceiver<TimerToken>) {
        let (sender, receiver) = unbounded_channel();

        let alarms = TokioAlarms {
            sender,
            tasks: BTreeMap::new(),
        };

        (alarms, receiver)
    }
}

impl Alarms for TokioAlarms {
    fn set_alarm(&mut self, token: TimerToken, timeout: Duration) {
        self.tasks.retain(|_, task| !task.is_finished());

        let sender = self.sender.clone();

        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;

            // the receiver is gone when the host has shut down
            let _ = sender.send(token);
        });

        self.tasks.insert(token, task);
    }

    fn cancel_alarm(&mut self, token: TimerToken) {
        if let Some(task) = self.tasks.remove(&token) {
            task.abort();
        }
    }
}
