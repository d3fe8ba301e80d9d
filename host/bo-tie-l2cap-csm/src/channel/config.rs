//! Channel Configuration Records
//!
//! Every channel carries two configuration records, the one proposed by (and accepted for) this
//! device and the one proposed by the peer device and accepted by this device. A record only
//! contains the options that were explicitly set, an absent option takes its default value.

use core::fmt;
use core::num::NonZeroU8;

/// The default flush timeout (infinite)
pub const INFINITE_FLUSH_TIMEOUT: u16 = 0xFFFF;

/// The kind of flow control mode of a channel
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModeKind {
    Basic,
    Ertm,
    Streaming,
    LeCreditBased,
    EnhancedCreditBased,
}

impl ModeKind {
    /// Check if this is a credit based mode
    ///
    /// Credit based channels skip the configuration phase of a connection.
    pub fn is_credit_based(&self) -> bool {
        matches!(self, ModeKind::LeCreditBased | ModeKind::EnhancedCreditBased)
    }

    fn bit(&self) -> u8 {
        match self {
            ModeKind::Basic => 1 << 0,
            ModeKind::Ertm => 1 << 1,
            ModeKind::Streaming => 1 << 2,
            ModeKind::LeCreditBased => 1 << 3,
            ModeKind::EnhancedCreditBased => 1 << 4,
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModeKind::Basic => f.write_str("basic mode"),
            ModeKind::Ertm => f.write_str("enhanced retransmission mode"),
            ModeKind::Streaming => f.write_str("streaming mode"),
            ModeKind::LeCreditBased => f.write_str("LE credit based flow control mode"),
            ModeKind::EnhancedCreditBased => f.write_str("enhanced credit based flow control mode"),
        }
    }
}

/// Parameters of the retransmission and streaming modes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetransmissionOptions {
    pub tx_window_size: u8,
    pub max_transmit: u8,
    pub retransmission_timeout: u16,
    pub monitor_timeout: u16,
    pub mps: u16,
}

impl Default for RetransmissionOptions {
    fn default() -> Self {
        RetransmissionOptions {
            tx_window_size: 10,
            max_transmit: 20,
            retransmission_timeout: 2000,
            monitor_timeout: 12000,
            mps: 1010,
        }
    }
}

/// A flow control mode descriptor
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlowControlMode {
    Basic,
    Ertm(RetransmissionOptions),
    Streaming(RetransmissionOptions),
    LeCreditBased,
    EnhancedCreditBased,
}

impl FlowControlMode {
    /// Get the kind of this mode
    pub fn kind(&self) -> ModeKind {
        match self {
            FlowControlMode::Basic => ModeKind::Basic,
            FlowControlMode::Ertm(_) => ModeKind::Ertm,
            FlowControlMode::Streaming(_) => ModeKind::Streaming,
            FlowControlMode::LeCreditBased => ModeKind::LeCreditBased,
            FlowControlMode::EnhancedCreditBased => ModeKind::EnhancedCreditBased,
        }
    }

    /// Create the default descriptor for a mode kind
    pub fn default_for(kind: ModeKind) -> Self {
        match kind {
            ModeKind::Basic => FlowControlMode::Basic,
            ModeKind::Ertm => FlowControlMode::Ertm(RetransmissionOptions::default()),
            ModeKind::Streaming => FlowControlMode::Streaming(RetransmissionOptions::default()),
            ModeKind::LeCreditBased => FlowControlMode::LeCreditBased,
            ModeKind::EnhancedCreditBased => FlowControlMode::EnhancedCreditBased,
        }
    }
}

/// A set of flow control modes
///
/// A registration lists the modes it will accept for its channels.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ModeSet(u8);

impl ModeSet {
    /// The preference order used when a counter proposal is needed
    const PREFERENCE: [ModeKind; 5] = [
        ModeKind::EnhancedCreditBased,
        ModeKind::LeCreditBased,
        ModeKind::Ertm,
        ModeKind::Streaming,
        ModeKind::Basic,
    ];

    pub fn empty() -> Self {
        ModeSet(0)
    }

    pub fn with(mut self, kind: ModeKind) -> Self {
        self.0 |= kind.bit();
        self
    }

    pub fn contains(&self, kind: ModeKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Get the most preferred classic mode within this set
    ///
    /// Classic modes are the modes that are negotiated within the configuration phase.
    pub fn preferred_classic(&self) -> Option<ModeKind> {
        Self::PREFERENCE
            .iter()
            .copied()
            .filter(|kind| !kind.is_credit_based())
            .find(|kind| self.contains(*kind))
    }
}

impl From<ModeKind> for ModeSet {
    fn from(kind: ModeKind) -> Self {
        ModeSet::empty().with(kind)
    }
}

/// A channel configuration record
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChannelConfig {
    pub mtu: Option<u16>,
    pub flush_timeout: Option<u16>,
    pub mode: Option<FlowControlMode>,
    /// Maximum PDU payload size of a credit based channel
    pub mps: Option<u16>,
}

impl ChannelConfig {
    /// Create a configuration record with only the mode set
    pub fn with_mode(mode: FlowControlMode) -> Self {
        ChannelConfig {
            mode: Some(mode),
            ..Default::default()
        }
    }

    /// Get the mode kind of this record
    ///
    /// The mode is basic mode when the option is absent.
    pub fn mode_kind(&self) -> ModeKind {
        self.mode.map(|mode| mode.kind()).unwrap_or(ModeKind::Basic)
    }

    /// Get the MTU, or `default` if the option is absent
    pub fn mtu_or(&self, default: u16) -> u16 {
        self.mtu.unwrap_or(default)
    }

    /// Get the flush timeout
    pub fn flush_timeout(&self) -> u16 {
        self.flush_timeout.unwrap_or(INFINITE_FLUSH_TIMEOUT)
    }

    /// Merge the options explicitly set within `other` into this record
    pub fn merge(&mut self, other: &ChannelConfig) {
        if other.mtu.is_some() {
            self.mtu = other.mtu
        }

        if other.flush_timeout.is_some() {
            self.flush_timeout = other.flush_timeout
        }

        if other.mode.is_some() {
            self.mode = other.mode
        }

        if other.mps.is_some() {
            self.mps = other.mps
        }
    }

    /// Check if no option is set
    pub fn is_empty(&self) -> bool {
        self.mtu.is_none() && self.flush_timeout.is_none() && self.mode.is_none() && self.mps.is_none()
    }
}

/// Result field of a configuration response
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConfigResult {
    Success,
    UnacceptableParameters,
    Rejected,
    UnknownOptions,
    Pending,
    FlowSpecRejected,
}

impl fmt::Display for ConfigResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigResult::Success => f.write_str("success"),
            ConfigResult::UnacceptableParameters => f.write_str("failure - unacceptable parameters"),
            ConfigResult::Rejected => f.write_str("failure - rejected (no reason provided)"),
            ConfigResult::UnknownOptions => f.write_str("failure - unknown options"),
            ConfigResult::Pending => f.write_str("pending"),
            ConfigResult::FlowSpecRejected => f.write_str("failure - flow spec rejected"),
        }
    }
}

/// A configuration request received from the peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRequest {
    pub identifier: NonZeroU8,
    /// The request is continued in another configuration request
    pub continuation: bool,
    pub config: ChannelConfig,
}

/// A configuration response
///
/// Configuration responses are both received from the peer (as the answer to the configuration
/// request of this device) and made by the upper layer (as the answer to the peer's configuration
/// request).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigResponse {
    pub result: ConfigResult,
    /// The response is continued in another configuration response
    pub continuation: bool,
    pub config: ChannelConfig,
}

impl ConfigResponse {
    /// Create a successful response without any options
    pub fn success() -> Self {
        ConfigResponse {
            result: ConfigResult::Success,
            continuation: false,
            config: ChannelConfig::default(),
        }
    }

    /// Create a response with result `result` and no options
    pub fn with_result(result: ConfigResult) -> Self {
        ConfigResponse {
            result,
            continuation: false,
            config: ChannelConfig::default(),
        }
    }

    pub(crate) fn is_intermediate(&self) -> bool {
        self.continuation || self.result == ConfigResult::Pending
    }
}
