//! Channel Timers
//!
//! Timers are not run by the channel state machine. Arming a timer asks the [`Alarms`]
//! collaborator to report a [`TimerToken`] back once the timeout elapses, the host then feeds the
//! token into [`ChannelManager::timer_expired`] on the same execution context as every other
//! event.
//!
//! Every token carries a generation number. Re-arming or cancelling a timer bumps the generation
//! of its slot, so a token that was already in flight when its timer was cancelled no longer
//! matches and is dropped. Cancellation is therefore exact even when the alarm backend cannot
//! retract an expiry it already queued.
//!
//! Channel identifiers are reused after a channel is released, so a token also carries the
//! instance number of the channel it was armed for. Instance numbers are handed out by the
//! channel store, a token of a released channel never matches the timers of a newer channel with
//! the same identifier.
//!
//! Every channel has three timer slots. The *state* timer is re-armed for the connect, configure,
//! and disconnect phases (and is the retransmission timer of an open channel using enhanced
//! retransmission mode). The *acknowledgement* timer is only used by enhanced retransmission mode
//! and the *reconfiguration* timer only runs while the channel owns a credit based
//! reconfiguration.
//!
//! [`ChannelManager::timer_expired`]: crate::ChannelManager::timer_expired

use crate::channel::id::DynChannelId;
use core::time::Duration;

#[cfg(feature = "tokio")]
mod tokio_alarms;

#[cfg(feature = "tokio")]
pub use tokio_alarms::TokioAlarms;

/// The kind of a channel timer
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimerKind {
    /// The connect/configure/disconnect timer of a channel
    State,
    /// The acknowledgement timer of a channel using enhanced retransmission mode
    Ack,
    /// The timer of a credit based reconfiguration attempt
    Reconfig,
}

/// Identity of an armed timer
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerToken {
    cid: DynChannelId,
    instance: u32,
    kind: TimerKind,
    generation: u32,
}

impl TimerToken {
    /// Get the channel the timer was armed for
    pub fn channel(&self) -> DynChannelId {
        self.cid
    }

    pub fn kind(&self) -> TimerKind {
        self.kind
    }
}

/// Scheduler of single shot timers
pub trait Alarms {
    /// Report `token` to the channel state machine once `timeout` has elapsed
    fn set_alarm(&mut self, token: TimerToken, timeout: Duration);

    /// Cancel the alarm for `token`
    ///
    /// It is not an error if the alarm already expired or was never set.
    fn cancel_alarm(&mut self, token: TimerToken);
}

/// A timer slot of a channel
#[derive(Debug)]
pub(crate) struct TimerSlot {
    cid: DynChannelId,
    instance: u32,
    kind: TimerKind,
    generation: u32,
    armed: Option<TimerToken>,
}

impl TimerSlot {
    /// Create the timer slot of `kind` for the channel `cid`
    ///
    /// `instance` is the instance number of the channel given by the channel store.
    pub(crate) fn new(cid: DynChannelId, instance: u32, kind: TimerKind) -> Self {
        TimerSlot {
            cid,
            instance,
            kind,
            generation: 0,
            armed: None,
        }
    }

    /// Arm the timer, replacing any prior alarm of this slot
    pub(crate) fn arm<A: Alarms + ?Sized>(&mut self, alarms: &mut A, timeout: Duration) {
        self.cancel(alarms);

        self.generation = self.generation.wrapping_add(1);

        let token = TimerToken {
            cid: self.cid,
            instance: self.instance,
            kind: self.kind,
            generation: self.generation,
        };

        alarms.set_alarm(token, timeout);

        self.armed = Some(token);
    }

    pub(crate) fn cancel<A: Alarms + ?Sized>(&mut self, alarms: &mut A) {
        if let Some(token) = self.armed.take() {
            alarms.cancel_alarm(token);
        }
    }

    /// Take over the armed alarm of `other`
    ///
    /// The alarm keeps its token and its deadline, only the slot it is reported to changes.
    pub(crate) fn adopt<A: Alarms + ?Sized>(&mut self, alarms: &mut A, other: &mut TimerSlot) {
        self.cancel(alarms);

        self.armed = other.armed.take();
    }

    pub(crate) fn holds(&self, token: TimerToken) -> bool {
        self.armed == Some(token)
    }

    #[cfg(test)]
    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Disarm the slot if `token` is its currently armed alarm
    ///
    /// True is returned when the token matched, false for a stale token.
    pub(crate) fn expire(&mut self, token: TimerToken) -> bool {
        if self.armed == Some(token) {
            self.armed = None;

            true
        } else {
            false
        }
    }
}
