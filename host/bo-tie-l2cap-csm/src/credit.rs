//! Credit Counting
//!
//! Credit based channels require the counting of 'credits' to provide flow control between two
//! connected devices. There are two counts per channel
//! * the *local* count is the number of k-frames the peer may still send to this device. It is
//!   increased whenever this device gives credits to the peer and decreased for every k-frame
//!   received.
//! * the *peer* count is the number of k-frames this device may still send to the peer. It is
//!   increased by every *flow control credit indication* received and decreased for every k-frame
//!   sent.
//!
//! The peer count has a maximum that depends on the flow control mode of the channel. Credits
//! received that would push the peer count past the maximum are a protocol violation, they are
//! never clamped.

use core::fmt;

/// The maximum credit count of a LE credit based channel
pub const LE_CREDIT_MAX: u16 = 65535;

/// Error for a credit count update
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CreditError {
    /// The credits received would push the count past the maximum
    Overflow { current: u16, received: u16, max: u16 },
    /// The peer sent a k-frame without having a credit for it
    Exhausted,
}

impl fmt::Display for CreditError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreditError::Overflow { current, received, max } => write!(
                f,
                "received {received} credits while holding {current}, more than the maximum of {max}"
            ),
            CreditError::Exhausted => f.write_str("k-frame received from a peer without credits"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CreditError {}

/// Credit counts of a credit based channel
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CreditCounter {
    local: u16,
    peer: u16,
    max: u16,
}

impl CreditCounter {
    /// Create a new `CreditCounter`
    ///
    /// `local` is the initial credits given to the peer and `peer` is the initial credits received
    /// from the peer.
    ///
    /// # Error
    /// The initial credits received from the peer are larger than `max`.
    pub fn new(local: u16, peer: u16, max: u16) -> Result<Self, CreditError> {
        if peer > max {
            Err(CreditError::Overflow {
                current: 0,
                received: peer,
                max,
            })
        } else {
            Ok(CreditCounter { local, peer, max })
        }
    }

    /// Get the number of k-frames that can be sent to the peer
    pub fn get_peer_credits(&self) -> u16 {
        self.peer
    }

    /// Get the number of k-frames the peer may still send
    pub fn get_local_credits(&self) -> u16 {
        self.local
    }

    pub fn get_max(&self) -> u16 {
        self.max
    }

    /// Add credits received from the peer
    ///
    /// The new peer count is returned.
    ///
    /// # Error
    /// The count is left unchanged and an error is returned if the new count would be larger than
    /// the maximum for this channel.
    pub fn add_peer_credits(&mut self, credits: u16) -> Result<u16, CreditError> {
        let total = u32::from(self.peer) + u32::from(credits);

        if total > u32::from(self.max) {
            Err(CreditError::Overflow {
                current: self.peer,
                received: credits,
                max: self.max,
            })
        } else {
            self.peer = total as u16;

            Ok(self.peer)
        }
    }

    /// Add local credits
    ///
    /// This returns the number of credits that can be given to the peer. If `amount` plus the
    /// current count is larger than the maximum value of a `u16`, then the local count is set to
    /// `<u16>::MAX` and the amount returned is the difference between the prior count and the
    /// maximum.
    pub fn add_local_credits(&mut self, amount: u16) -> u16 {
        match self.local.checked_add(amount) {
            Some(local) => {
                self.local = local;

                amount
            }
            None => {
                let amount = <u16>::MAX - self.local;

                self.local = <u16>::MAX;

                amount
            }
        }
    }

    /// Check if a k-frame may be sent to the peer
    pub fn may_send(&self) -> bool {
        self.peer != 0
    }

    /// Spend a peer credit for sending a k-frame
    ///
    /// False is returned if there are no peer credits.
    pub fn spend_peer_credit(&mut self) -> bool {
        if self.peer != 0 {
            self.peer -= 1;

            true
        } else {
            false
        }
    }

    /// Account for a k-frame received from the peer
    pub fn receive_k_frame(&mut self) -> Result<(), CreditError> {
        self.local = self.local.checked_sub(1).ok_or(CreditError::Exhausted)?;

        Ok(())
    }
}
