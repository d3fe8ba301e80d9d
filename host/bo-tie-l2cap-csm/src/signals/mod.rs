//! Signaling L2CAP Commands
//!
//! The channel state machine does not encode signaling packets, instead it hands a [`Signal`] to
//! the [`PeerSignaling`] collaborator which builds and sends the control frame. Signals are fire
//! and forget, the peer's answer to a request is later fed back into the state machine as an
//! ordinary [`Event`].
//!
//! [`PeerSignaling`]: crate::host::PeerSignaling
//! [`Event`]: crate::Event

use crate::channel::config::{ChannelConfig, ConfigResult};
use crate::channel::id::DynChannelId;
use crate::registry::Psm;
use alloc::vec::Vec;
use core::fmt::{self, Display, Formatter};
use core::num::NonZeroU8;

/// Codes for each Signal Type sent by the channel state machine
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub enum SignalCode {
    ConnectionRequest,
    ConnectionResponse,
    ConfigurationRequest,
    ConfigurationResponse,
    DisconnectionRequest,
    DisconnectionResponse,
    LeCreditBasedConnectionRequest,
    LeCreditBasedConnectionResponse,
    FlowControlCreditIndication,
    CreditBasedConnectionRequest,
    CreditBasedConnectionResponse,
    CreditBasedReconfigureRequest,
    CreditBasedReconfigureResponse,
}

impl SignalCode {
    /// Get the raw code value of the Signal
    pub fn into_code(self) -> u8 {
        match self {
            SignalCode::ConnectionRequest => 0x2,
            SignalCode::ConnectionResponse => 0x3,
            SignalCode::ConfigurationRequest => 0x4,
            SignalCode::ConfigurationResponse => 0x5,
            SignalCode::DisconnectionRequest => 0x6,
            SignalCode::DisconnectionResponse => 0x7,
            SignalCode::LeCreditBasedConnectionRequest => 0x14,
            SignalCode::LeCreditBasedConnectionResponse => 0x15,
            SignalCode::FlowControlCreditIndication => 0x16,
            SignalCode::CreditBasedConnectionRequest => 0x17,
            SignalCode::CreditBasedConnectionResponse => 0x18,
            SignalCode::CreditBasedReconfigureRequest => 0x19,
            SignalCode::CreditBasedReconfigureResponse => 0x1a,
        }
    }

    /// Check if the code is used by the LE-U signaling channel
    pub fn used_by_le_u(&self) -> bool {
        match self {
            Self::ConnectionRequest
            | Self::ConnectionResponse
            | Self::ConfigurationRequest
            | Self::ConfigurationResponse => false,
            Self::DisconnectionRequest
            | Self::DisconnectionResponse
            | Self::LeCreditBasedConnectionRequest
            | Self::LeCreditBasedConnectionResponse
            | Self::FlowControlCreditIndication
            | Self::CreditBasedConnectionRequest
            | Self::CreditBasedConnectionResponse
            | Self::CreditBasedReconfigureRequest
            | Self::CreditBasedReconfigureResponse => true,
        }
    }
}

impl Display for SignalCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("L2CAP ")?;

        match self {
            SignalCode::ConnectionRequest => f.write_str("connection request"),
            SignalCode::ConnectionResponse => f.write_str("connection response"),
            SignalCode::ConfigurationRequest => f.write_str("configuration request"),
            SignalCode::ConfigurationResponse => f.write_str("configuration response"),
            SignalCode::DisconnectionRequest => f.write_str("disconnection request"),
            SignalCode::DisconnectionResponse => f.write_str("disconnection response"),
            SignalCode::LeCreditBasedConnectionRequest => f.write_str("LE credit based connection request"),
            SignalCode::LeCreditBasedConnectionResponse => f.write_str("LE credit based connection response"),
            SignalCode::FlowControlCreditIndication => f.write_str("flow control credit indication"),
            SignalCode::CreditBasedConnectionRequest => f.write_str("credit based connection request"),
            SignalCode::CreditBasedConnectionResponse => f.write_str("credit based connection response"),
            SignalCode::CreditBasedReconfigureRequest => f.write_str("credit based reconfigure request"),
            SignalCode::CreditBasedReconfigureResponse => f.write_str("credit based reconfigure response"),
        }
    }
}

impl From<SignalCode> for u8 {
    fn from(code: SignalCode) -> Self {
        code.into_code()
    }
}

/// The result of a connection
///
/// This is both the result field of a connection response and the status reported to the upper
/// layer on completion of a connection attempt. The last two variants are never sent to the peer,
/// they are local completion statuses.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionResult {
    Success,
    Pending,
    PsmNotSupported,
    SecurityBlock,
    NoResources,
    InsufficientAuthentication,
    InsufficientAuthorization,
    InsufficientEncryption,
    InvalidSourceCid,
    SourceCidAlreadyAllocated,
    UnacceptableParameters,
    /// Some, but not all, of the channels of a credit based connection were refused
    SomeConnectionsRefused,
    /// The connection attempt timed out (local status)
    Timeout,
    /// There is no link, or the link cannot support the channel (local status)
    NoLink,
}

impl ConnectionResult {
    pub fn is_success(&self) -> bool {
        *self == ConnectionResult::Success
    }
}

impl Display for ConnectionResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionResult::Success => f.write_str("connection successful"),
            ConnectionResult::Pending => f.write_str("connection pending"),
            ConnectionResult::PsmNotSupported => f.write_str("connection refused - PSM not supported"),
            ConnectionResult::SecurityBlock => f.write_str("connection refused - security block"),
            ConnectionResult::NoResources => f.write_str("connection refused - no resources available"),
            ConnectionResult::InsufficientAuthentication => {
                f.write_str("connection refused - insufficient authentication")
            }
            ConnectionResult::InsufficientAuthorization => f.write_str("connection refused - insufficient authorization"),
            ConnectionResult::InsufficientEncryption => f.write_str("connection refused - insufficient encryption"),
            ConnectionResult::InvalidSourceCid => f.write_str("connection refused - invalid source CID"),
            ConnectionResult::SourceCidAlreadyAllocated => f.write_str("connection refused - source CID already allocated"),
            ConnectionResult::UnacceptableParameters => f.write_str("connection refused - unacceptable parameters"),
            ConnectionResult::SomeConnectionsRefused => f.write_str("some connections refused"),
            ConnectionResult::Timeout => f.write_str("connection timed out"),
            ConnectionResult::NoLink => f.write_str("no link"),
        }
    }
}

/// The result of a credit based reconfiguration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReconfigResult {
    Success,
    MtuReductionNotAllowed,
    MpsReductionNotAllowed,
    InvalidDestinationCid,
    UnacceptableParameters,
    /// The peer did not respond in time (local status)
    Timeout,
}

impl Display for ReconfigResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReconfigResult::Success => f.write_str("reconfiguration successful"),
            ReconfigResult::MtuReductionNotAllowed => f.write_str("reduction in size of MTU not allowed"),
            ReconfigResult::MpsReductionNotAllowed => {
                f.write_str("reduction in size of MPS not allowed for more than one channel at a time")
            }
            ReconfigResult::InvalidDestinationCid => f.write_str("one or more destination CIDs invalid"),
            ReconfigResult::UnacceptableParameters => f.write_str("unacceptable parameters"),
            ReconfigResult::Timeout => f.write_str("reconfiguration timed out"),
        }
    }
}

/// Parameters of a credit based connection
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct CreditBasedParameters {
    pub mtu: u16,
    pub mps: u16,
    pub initial_credits: u16,
}

/// A signal to be sent to the peer device
///
/// Channel identifiers are named from the perspective of this device. `local_cid` is always the
/// identifier allocated by this device and `remote_cid` is the identifier allocated by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    ConnectionRequest {
        identifier: NonZeroU8,
        psm: Psm,
        local_cid: DynChannelId,
    },
    ConnectionResponse {
        identifier: NonZeroU8,
        local_cid: Option<DynChannelId>,
        remote_cid: DynChannelId,
        result: ConnectionResult,
    },
    ConfigurationRequest {
        identifier: NonZeroU8,
        remote_cid: DynChannelId,
        config: ChannelConfig,
    },
    ConfigurationResponse {
        identifier: NonZeroU8,
        remote_cid: DynChannelId,
        result: ConfigResult,
        continuation: bool,
        config: ChannelConfig,
    },
    DisconnectionRequest {
        identifier: NonZeroU8,
        local_cid: DynChannelId,
        remote_cid: DynChannelId,
    },
    DisconnectionResponse {
        identifier: NonZeroU8,
        local_cid: DynChannelId,
        remote_cid: DynChannelId,
    },
    LeCreditBasedConnectionRequest {
        identifier: NonZeroU8,
        spsm: Psm,
        local_cid: DynChannelId,
        parameters: CreditBasedParameters,
    },
    LeCreditBasedConnectionResponse {
        identifier: NonZeroU8,
        local_cid: Option<DynChannelId>,
        parameters: CreditBasedParameters,
        result: ConnectionResult,
    },
    FlowControlCreditIndication {
        identifier: NonZeroU8,
        local_cid: DynChannelId,
        credits: u16,
    },
    CreditBasedConnectionRequest {
        identifier: NonZeroU8,
        spsm: Psm,
        local_cids: Vec<DynChannelId>,
        parameters: CreditBasedParameters,
    },
    CreditBasedConnectionResponse {
        identifier: NonZeroU8,
        /// One entry per requested channel, `None` for every refused channel
        local_cids: Vec<Option<DynChannelId>>,
        parameters: CreditBasedParameters,
        result: ConnectionResult,
    },
    CreditBasedReconfigureRequest {
        identifier: NonZeroU8,
        mtu: u16,
        mps: u16,
        local_cids: Vec<DynChannelId>,
    },
    CreditBasedReconfigureResponse {
        identifier: NonZeroU8,
        result: ReconfigResult,
    },
}

impl Signal {
    /// Get the code of this signal
    pub fn code(&self) -> SignalCode {
        match self {
            Signal::ConnectionRequest { .. } => SignalCode::ConnectionRequest,
            Signal::ConnectionResponse { .. } => SignalCode::ConnectionResponse,
            Signal::ConfigurationRequest { .. } => SignalCode::ConfigurationRequest,
            Signal::ConfigurationResponse { .. } => SignalCode::ConfigurationResponse,
            Signal::DisconnectionRequest { .. } => SignalCode::DisconnectionRequest,
            Signal::DisconnectionResponse { .. } => SignalCode::DisconnectionResponse,
            Signal::LeCreditBasedConnectionRequest { .. } => SignalCode::LeCreditBasedConnectionRequest,
            Signal::LeCreditBasedConnectionResponse { .. } => SignalCode::LeCreditBasedConnectionResponse,
            Signal::FlowControlCreditIndication { .. } => SignalCode::FlowControlCreditIndication,
            Signal::CreditBasedConnectionRequest { .. } => SignalCode::CreditBasedConnectionRequest,
            Signal::CreditBasedConnectionResponse { .. } => SignalCode::CreditBasedConnectionResponse,
            Signal::CreditBasedReconfigureRequest { .. } => SignalCode::CreditBasedReconfigureRequest,
            Signal::CreditBasedReconfigureResponse { .. } => SignalCode::CreditBasedReconfigureResponse,
        }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.code(), f)
    }
}
