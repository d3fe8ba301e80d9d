//! Channel State Machine Events
//!
//! Every input to the channel state machine is an [`Event`] delivered to a single channel. Events
//! are raised by the peer (signaling packets and payload), the upper layer, the security
//! subsystem, the physical link, and the channel timers.
//!
//! Most events are raised through the dedicated methods of the [`ChannelManager`], those methods
//! validate their input before the event reaches the channel. [`ChannelManager::dispatch`] is used
//! by the host for the signals of the peer that are addressed to an existing channel.
//!
//! [`ChannelManager`]: crate::ChannelManager
//! [`ChannelManager::dispatch`]: crate::ChannelManager::dispatch

use crate::channel::config::{ChannelConfig, ConfigRequest, ConfigResponse};
use crate::channel::id::DynChannelId;
use crate::signals::{ConnectionResult, ReconfigResult};
use alloc::vec::Vec;
use core::fmt;
use core::num::NonZeroU8;

/// The status of a denied security request
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecurityStatus {
    AuthenticationFailure,
    Denied,
    /// Encryption was not yet enabled when the peer's connection request was received
    ///
    /// This is only meaningful for channels initiated by the peer. The channel waits for the
    /// delay check timeout before the link is disconnected.
    DelayCheck,
}

/// The outcome of a security request
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecurityOutcome {
    Granted,
    Denied(SecurityStatus),
    /// The decision is deferred until the security subsystem calls
    /// [`security_retry`](crate::ChannelManager::security_retry)
    Deferred,
}

/// A credit based connection response received from the peer
///
/// This is the response for both a LE credit based connection request and an enhanced credit
/// based connection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditConnectResponse {
    /// One entry per requested channel in the order of the request, `None` for a refused channel
    pub remote_cids: Vec<Option<u16>>,
    pub mtu: u16,
    pub mps: u16,
    pub initial_credits: u16,
    pub result: ConnectionResult,
}

/// A credit based reconfiguration request received from the peer
///
/// The channel identifiers are the local identifiers of the channels to reconfigure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerReconfig {
    pub identifier: NonZeroU8,
    pub mtu: u16,
    pub mps: u16,
    pub cids: Vec<DynChannelId>,
}

/// An input to the channel state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    LinkConnected,
    LinkConnectFailed(ConnectionResult),
    LinkDisconnected,
    /// The information response (extended features) of the peer was received
    InfoResponse,
    QosViolation,

    SecurityGranted,
    SecurityDenied(SecurityStatus),
    /// The security subsystem has enough information to process a deferred request
    SecurityRetry,

    PeerConnectRequest,
    PeerConnectResponse {
        remote_cid: u16,
    },
    PeerConnectPending {
        remote_cid: Option<u16>,
    },
    PeerConnectRejected(ConnectionResult),
    PeerCreditConnectResponse(CreditConnectResponse),
    PeerConfigRequest(ConfigRequest),
    /// A configuration response from the peer
    ///
    /// A response with a failure result is a rejection of the configuration request of this
    /// device.
    PeerConfigResponse(ConfigResponse),
    PeerDisconnectRequest {
        identifier: NonZeroU8,
    },
    PeerDisconnectResponse,
    PeerData(Vec<u8>),
    /// Credits received in a flow control credit indication
    PeerCredits(u16),
    PeerReconfigRequest(PeerReconfig),
    PeerReconfigResponse(ReconfigResult),

    LocalConnectRequest,
    LocalConnectResponse(ConnectionResult),
    LocalConfigRequest(ChannelConfig),
    LocalConfigResponse(ConfigResponse),
    LocalDisconnectRequest,
    LocalDisconnectResponse,
    LocalDataWrite(Vec<u8>),
    LocalSendCredits(u16),
    LocalReconfigRequest {
        mtu: u16,
        mps: u16,
    },
    LocalReconfigResponse(ReconfigResult),

    /// The state timer expired
    Timeout,
    AckTimeout,
    ReconfigTimeout,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Event::LinkConnected => "link connected",
            Event::LinkConnectFailed(_) => "link connect failed",
            Event::LinkDisconnected => "link disconnected",
            Event::InfoResponse => "information response",
            Event::QosViolation => "QoS violation",
            Event::SecurityGranted => "security granted",
            Event::SecurityDenied(_) => "security denied",
            Event::SecurityRetry => "security retry",
            Event::PeerConnectRequest => "peer connect request",
            Event::PeerConnectResponse { .. } => "peer connect response",
            Event::PeerConnectPending { .. } => "peer connect pending",
            Event::PeerConnectRejected(_) => "peer connect rejected",
            Event::PeerCreditConnectResponse(_) => "peer credit based connect response",
            Event::PeerConfigRequest(_) => "peer config request",
            Event::PeerConfigResponse(_) => "peer config response",
            Event::PeerDisconnectRequest { .. } => "peer disconnect request",
            Event::PeerDisconnectResponse => "peer disconnect response",
            Event::PeerData(_) => "peer data",
            Event::PeerCredits(_) => "peer credits",
            Event::PeerReconfigRequest(_) => "peer reconfigure request",
            Event::PeerReconfigResponse(_) => "peer reconfigure response",
            Event::LocalConnectRequest => "local connect request",
            Event::LocalConnectResponse(_) => "local connect response",
            Event::LocalConfigRequest(_) => "local config request",
            Event::LocalConfigResponse(_) => "local config response",
            Event::LocalDisconnectRequest => "local disconnect request",
            Event::LocalDisconnectResponse => "local disconnect response",
            Event::LocalDataWrite(_) => "local data write",
            Event::LocalSendCredits(_) => "local send credits",
            Event::LocalReconfigRequest { .. } => "local reconfigure request",
            Event::LocalReconfigResponse(_) => "local reconfigure response",
            Event::Timeout => "timeout",
            Event::AckTimeout => "acknowledgement timeout",
            Event::ReconfigTimeout => "reconfigure timeout",
        };

        f.write_str(name)
    }
}
