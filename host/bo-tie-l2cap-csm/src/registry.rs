//! Channel Record Registry
//!
//! A service is registered by its protocol/service multiplexer along with the upper layer that
//! receives the indications and confirmations of its channels. There are two kinds of upper
//! layers, one for classic (configured) channels and one for credit based channels. Every method
//! of both upper layer traits has an empty default implementation, an upper layer only implements
//! the callbacks it is interested in.
//!
//! The registry may lose an entry while one of its channels is still in flight. The channel state
//! machine never requires a registration to exist, it skips the upper layer callbacks of a channel
//! whose registration is gone.

use crate::channel::config::{ChannelConfig, ConfigResponse, FlowControlMode, ModeKind, ModeSet};
use crate::channel::id::DynChannelId;
use crate::link::BluetoothDeviceAddress;
use crate::signals::{ConnectionResult, CreditBasedParameters, ReconfigResult};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::fmt;
use core::num::NonZeroU8;

/// Protocol/Service Multiplexer
///
/// On a BR/EDR link this is a PSM, on a LE link this is a *simplified* PSM (SPSM).
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Psm(u16);

impl Psm {
    /// The PSM of the Service Discovery Protocol
    pub const SDP: Psm = Psm(0x0001);

    /// Create a PSM for a BR/EDR service
    ///
    /// A valid PSM is odd and the least significant bit of its most significant octet is zero.
    pub fn try_new_classic(val: u16) -> Result<Self, RegistryError> {
        if val & 0x0101 == 0x0001 {
            Ok(Psm(val))
        } else {
            Err(RegistryError::InvalidPsm(val))
        }
    }

    /// Create a SPSM for a LE service
    ///
    /// A valid SPSM is within the range of `0x1..=0xFF`.
    pub fn try_new_le(val: u16) -> Result<Self, RegistryError> {
        match val {
            0x1..=0xFF => Ok(Psm(val)),
            _ => Err(RegistryError::InvalidPsm(val)),
        }
    }

    pub fn get(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Psm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PSM 0x{:04x}", self.0)
    }
}

/// Errors of the registry
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidPsm(u16),
    AlreadyRegistered(Psm),
    NoSupportedMode(Psm),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::InvalidPsm(val) => write!(f, "0x{val:04x} is not a valid protocol/service multiplexer"),
            RegistryError::AlreadyRegistered(psm) => write!(f, "{psm} is already registered"),
            RegistryError::NoSupportedMode(psm) => write!(f, "registration for {psm} has no supported mode"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RegistryError {}

/// The upper layer of a classic channel
pub trait ClassicUpperLayer {
    /// The peer requested a new channel
    ///
    /// The upper layer must answer with [`connect_response`](crate::ChannelManager::connect_response).
    fn connect_ind(&mut self, peer: BluetoothDeviceAddress, cid: DynChannelId, psm: Psm, identifier: NonZeroU8) {
        let _ = (peer, cid, psm, identifier);
    }

    fn connect_cfm(&mut self, cid: DynChannelId, result: ConnectionResult) {
        let _ = (cid, result);
    }

    /// The peer answered the connection request with *pending*
    fn connect_pnd(&mut self, cid: DynChannelId) {
        let _ = cid;
    }

    fn config_ind(&mut self, cid: DynChannelId, config: &ChannelConfig) {
        let _ = (cid, config);
    }

    fn config_cfm(&mut self, cid: DynChannelId, response: &ConfigResponse) {
        let _ = (cid, response);
    }

    /// The channel was disconnected
    ///
    /// When `ack_needed` is true the upper layer must answer with
    /// [`disconnect_response`](crate::ChannelManager::disconnect_response).
    fn disconnect_ind(&mut self, cid: DynChannelId, ack_needed: bool) {
        let _ = (cid, ack_needed);
    }

    fn disconnect_cfm(&mut self, cid: DynChannelId, result: ConnectionResult) {
        let _ = (cid, result);
    }

    fn data_ind(&mut self, cid: DynChannelId, sdu: Vec<u8>) {
        let _ = (cid, sdu);
    }

    fn congestion_status(&mut self, cid: DynChannelId, congested: bool) {
        let _ = (cid, congested);
    }

    fn qos_violation_ind(&mut self, peer: BluetoothDeviceAddress) {
        let _ = peer;
    }
}

/// The upper layer of a credit based channel
///
/// Channels of a credit based connection are indicated and confirmed together, so the connection
/// callbacks take every channel identifier of the connection.
pub trait CreditBasedUpperLayer {
    /// The peer requested new channels
    ///
    /// `peer_mtu` is the MTU the peer can receive. The upper layer must answer with
    /// [`connect_response`](crate::ChannelManager::connect_response) on any of the channels.
    fn connect_ind(
        &mut self,
        peer: BluetoothDeviceAddress,
        cids: &[DynChannelId],
        psm: Psm,
        peer_mtu: u16,
        identifier: NonZeroU8,
    ) {
        let _ = (peer, cids, psm, peer_mtu, identifier);
    }

    fn connect_cfm(&mut self, peer: BluetoothDeviceAddress, cids: &[DynChannelId], result: ConnectionResult) {
        let _ = (peer, cids, result);
    }

    fn disconnect_ind(&mut self, cid: DynChannelId, ack_needed: bool) {
        let _ = (cid, ack_needed);
    }

    fn disconnect_cfm(&mut self, cid: DynChannelId, result: ConnectionResult) {
        let _ = (cid, result);
    }

    fn data_ind(&mut self, cid: DynChannelId, sdu: Vec<u8>) {
        let _ = (cid, sdu);
    }

    /// Credits were received from the peer
    ///
    /// `credits` is the amount received and `total` is the amount now available for sending.
    fn credits_received(&mut self, cid: DynChannelId, credits: u16, total: u16) {
        let _ = (cid, credits, total);
    }

    fn congestion_status(&mut self, cid: DynChannelId, congested: bool) {
        let _ = (cid, congested);
    }

    /// The peer requested to reconfigure the channels
    ///
    /// The upper layer must answer with
    /// [`reconfigure_response`](crate::ChannelManager::reconfigure_response).
    fn reconfig_ind(&mut self, cids: &[DynChannelId], mtu: u16) {
        let _ = (cids, mtu);
    }

    fn reconfig_cfm(&mut self, cids: &[DynChannelId], result: ReconfigResult) {
        let _ = (cids, result);
    }
}

/// The upper layer of a registration
pub enum UpperLayer {
    Classic(Box<dyn ClassicUpperLayer>),
    CreditBased(Box<dyn CreditBasedUpperLayer>),
}

/// The terminal callback given to the upper layer when a channel is released
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Completion {
    /// The channel is released without telling the upper layer
    Silent,
    ConnectFailed(ConnectionResult),
    /// A disconnect indication for which no response is owed
    DisconnectInd,
    DisconnectCfm(ConnectionResult),
}

impl UpperLayer {
    /// Give the terminal callback `completion` for the released channels `cids`
    pub(crate) fn complete(&mut self, peer: BluetoothDeviceAddress, cids: &[DynChannelId], completion: Completion) {
        match (self, completion) {
            (_, Completion::Silent) => (),
            (UpperLayer::Classic(upper), Completion::ConnectFailed(result)) => {
                cids.iter().for_each(|cid| upper.connect_cfm(*cid, result))
            }
            (UpperLayer::Classic(upper), Completion::DisconnectInd) => {
                cids.iter().for_each(|cid| upper.disconnect_ind(*cid, false))
            }
            (UpperLayer::Classic(upper), Completion::DisconnectCfm(result)) => {
                cids.iter().for_each(|cid| upper.disconnect_cfm(*cid, result))
            }
            (UpperLayer::CreditBased(upper), Completion::ConnectFailed(result)) => upper.connect_cfm(peer, cids, result),
            (UpperLayer::CreditBased(upper), Completion::DisconnectInd) => {
                cids.iter().for_each(|cid| upper.disconnect_ind(*cid, false))
            }
            (UpperLayer::CreditBased(upper), Completion::DisconnectCfm(result)) => {
                cids.iter().for_each(|cid| upper.disconnect_cfm(*cid, result))
            }
        }
    }

    pub(crate) fn connect_cfm_success(&mut self, peer: BluetoothDeviceAddress, cids: &[DynChannelId]) {
        match self {
            UpperLayer::Classic(upper) => cids
                .iter()
                .for_each(|cid| upper.connect_cfm(*cid, ConnectionResult::Success)),
            UpperLayer::CreditBased(upper) => upper.connect_cfm(peer, cids, ConnectionResult::Success),
        }
    }

    pub(crate) fn disconnect_ind(&mut self, cid: DynChannelId, ack_needed: bool) {
        match self {
            UpperLayer::Classic(upper) => upper.disconnect_ind(cid, ack_needed),
            UpperLayer::CreditBased(upper) => upper.disconnect_ind(cid, ack_needed),
        }
    }

    pub(crate) fn data_ind(&mut self, cid: DynChannelId, sdu: Vec<u8>) {
        match self {
            UpperLayer::Classic(upper) => upper.data_ind(cid, sdu),
            UpperLayer::CreditBased(upper) => upper.data_ind(cid, sdu),
        }
    }

    pub(crate) fn congestion_status(&mut self, cid: DynChannelId, congested: bool) {
        match self {
            UpperLayer::Classic(upper) => upper.congestion_status(cid, congested),
            UpperLayer::CreditBased(upper) => upper.congestion_status(cid, congested),
        }
    }

    pub(crate) fn as_classic(&mut self) -> Option<&mut dyn ClassicUpperLayer> {
        match self {
            UpperLayer::Classic(upper) => Some(upper.as_mut()),
            UpperLayer::CreditBased(_) => None,
        }
    }

    pub(crate) fn as_credit_based(&mut self) -> Option<&mut dyn CreditBasedUpperLayer> {
        match self {
            UpperLayer::CreditBased(upper) => Some(upper.as_mut()),
            UpperLayer::Classic(_) => None,
        }
    }
}

impl fmt::Debug for UpperLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpperLayer::Classic(_) => f.write_str("UpperLayer::Classic"),
            UpperLayer::CreditBased(_) => f.write_str("UpperLayer::CreditBased"),
        }
    }
}

/// A registered service
#[derive(Debug)]
pub struct ServiceRecord {
    psm: Psm,
    upper: UpperLayer,
    modes: ModeSet,
    config: ChannelConfig,
    credit_parameters: Option<CreditBasedParameters>,
}

impl ServiceRecord {
    /// The MTU proposed for a classic channel unless set with [`with_config`]
    ///
    /// [`with_config`]: ServiceRecord::with_config
    pub const DEFAULT_CLASSIC_MTU: u16 = 672;

    /// Create a registration for classic channels
    ///
    /// The registration accepts only basic mode until [`with_modes`] is used.
    ///
    /// [`with_modes`]: ServiceRecord::with_modes
    pub fn classic<U>(psm: Psm, upper: U) -> Self
    where
        U: ClassicUpperLayer + 'static,
    {
        ServiceRecord {
            psm,
            upper: UpperLayer::Classic(Box::new(upper)),
            modes: ModeSet::from(ModeKind::Basic),
            config: ChannelConfig {
                mtu: Some(Self::DEFAULT_CLASSIC_MTU),
                ..Default::default()
            },
            credit_parameters: None,
        }
    }

    /// Create a registration for credit based channels
    ///
    /// The registration accepts both LE credit based channels and enhanced credit based channels.
    /// `parameters` are the MTU, MPS, and initial credits given to the peer for every channel.
    pub fn credit_based<U>(psm: Psm, upper: U, parameters: CreditBasedParameters) -> Self
    where
        U: CreditBasedUpperLayer + 'static,
    {
        ServiceRecord {
            psm,
            upper: UpperLayer::CreditBased(Box::new(upper)),
            modes: ModeSet::from(ModeKind::LeCreditBased).with(ModeKind::EnhancedCreditBased),
            config: ChannelConfig {
                mtu: Some(parameters.mtu),
                mps: Some(parameters.mps),
                ..Default::default()
            },
            credit_parameters: Some(parameters),
        }
    }

    /// Set the modes accepted for channels of this registration
    pub fn with_modes(mut self, modes: ModeSet) -> Self {
        self.modes = modes;
        self
    }

    /// Set the configuration this device proposes for channels of this registration
    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    pub fn psm(&self) -> Psm {
        self.psm
    }

    pub fn modes(&self) -> ModeSet {
        self.modes
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub fn credit_parameters(&self) -> Option<CreditBasedParameters> {
        self.credit_parameters
    }

    pub fn is_credit_based(&self) -> bool {
        matches!(self.upper, UpperLayer::CreditBased(_))
    }

    pub(crate) fn upper_mut(&mut self) -> &mut UpperLayer {
        &mut self.upper
    }

    /// The configuration proposed for a new classic channel
    ///
    /// The mode proposed is the configured mode if it is accepted by this registration, otherwise
    /// it is the most preferred accepted mode.
    pub(crate) fn classic_proposal(&self) -> ChannelConfig {
        let mut config = self.config;

        if !self.modes.contains(config.mode_kind()) {
            config.mode = self.modes.preferred_classic().map(FlowControlMode::default_for);
        }

        config
    }
}

/// The registry of services
#[derive(Debug, Default)]
pub struct Registry {
    records: BTreeMap<Psm, ServiceRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service
    ///
    /// # Error
    /// An error is returned if the PSM is already registered or the registration does not accept
    /// any flow control mode.
    pub fn register(&mut self, record: ServiceRecord) -> Result<(), RegistryError> {
        if record.modes == ModeSet::empty() {
            return Err(RegistryError::NoSupportedMode(record.psm));
        }

        if self.records.contains_key(&record.psm) {
            return Err(RegistryError::AlreadyRegistered(record.psm));
        }

        log::info!("(L2CAP) registered {}", record.psm);

        self.records.insert(record.psm, record);

        Ok(())
    }

    /// Unregister a service
    ///
    /// Channels of this service are not released, but they no longer produce any upper layer
    /// callbacks.
    pub fn unregister(&mut self, psm: Psm) -> Option<ServiceRecord> {
        log::info!("(L2CAP) unregistered {}", psm);

        self.records.remove(&psm)
    }

    pub fn get(&self, psm: Psm) -> Option<&ServiceRecord> {
        self.records.get(&psm)
    }

    pub fn get_mut(&mut self, psm: Psm) -> Option<&mut ServiceRecord> {
        self.records.get_mut(&psm)
    }
}
