//! Errors of the channel manager

use crate::channel::ccb::ChannelState;
use crate::channel::config::ModeKind;
use crate::channel::id::DynChannelId;
use crate::registry::Psm;
use core::fmt;

/// Error returned by [`connect`] and [`ecfc_connect`]
///
/// [`connect`]: crate::ChannelManager::connect
/// [`ecfc_connect`]: crate::ChannelManager::ecfc_connect
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectError {
    PsmNotRegistered(Psm),
    /// The registration of the PSM does not support a channel over the transport
    WrongRegistration(Psm),
    NoChannelIdentifiers,
    /// The number of channels of an enhanced credit based connection is zero or too large
    ChannelCount(usize),
    LinkDisconnecting,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::PsmNotRegistered(psm) => write!(f, "{} is not registered", psm),
            ConnectError::WrongRegistration(psm) => {
                write!(f, "the registration of {} does not support this kind of channel", psm)
            }
            ConnectError::NoChannelIdentifiers => f.write_str("no free channel identifiers"),
            ConnectError::ChannelCount(count) => write!(f, "invalid number of channels ({})", count),
            ConnectError::LinkDisconnecting => f.write_str("the link is disconnecting"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ConnectError {}

/// Error returned by the channel operations of the upper layer
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel was released (or never existed)
    NotLive(DynChannelId),
    WrongState(DynChannelId, ChannelState),
    /// The operation is not supported by the mode of the channel
    WrongMode(DynChannelId, ModeKind),
    /// The channel is not part of an enhanced credit based connection
    NotGrouped(DynChannelId),
    NoChannels,
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelError::NotLive(cid) => write!(f, "{} is not a live channel", cid),
            ChannelError::WrongState(cid, state) => write!(f, "{} is in state {}", cid, state),
            ChannelError::WrongMode(cid, mode) => write!(f, "operation not supported for {} in {}", cid, mode),
            ChannelError::NotGrouped(cid) => write!(f, "{} is not an enhanced credit based channel", cid),
            ChannelError::NoChannels => f.write_str("no channels"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ChannelError {}

/// Error returned by [`write`](crate::ChannelManager::write)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteError {
    NotLive(DynChannelId),
    /// The channel is neither configuring nor open
    NotConnected(ChannelState),
    SduTooLarge { len: usize, mtu: u16 },
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::NotLive(cid) => write!(f, "{} is not a live channel", cid),
            WriteError::NotConnected(state) => write!(f, "cannot write to a channel in state {}", state),
            WriteError::SduTooLarge { len, mtu } => {
                write!(f, "SDU of {} bytes is larger than the peer's MTU ({})", len, mtu)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for WriteError {}

/// The status of a successful write
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WriteStatus {
    Queued,
    /// The data was queued but the output scheduler reported the channel as congested
    Congested,
}
