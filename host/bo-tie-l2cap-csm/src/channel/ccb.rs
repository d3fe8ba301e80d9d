//! Channel Control Blocks

use crate::channel::config::{ChannelConfig, ModeKind};
use crate::channel::id::DynChannelId;
use crate::credit::CreditCounter;
use crate::link::{BluetoothDeviceAddress, Transport};
use crate::registry::Psm;
use crate::sdu::SduRecombiner;
use crate::signals::CreditBasedParameters;
use crate::timer::{TimerKind, TimerSlot};
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;
use core::num::NonZeroU8;
use core::time::Duration;

/// The state of a channel
///
/// A released channel has no state, it no longer exists.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection attempt was started, or the link is not yet up
    Closed,
    /// Initiated by this device, waiting on the security decision
    OrigW4SecComp,
    /// Initiated by the peer, waiting on the security decision
    TermW4SecComp,
    /// The connection request was sent, waiting on the peer's response
    W4PeerConnectRsp,
    /// The peer's connection request was indicated, waiting on the upper layer's response
    W4LocalConnectRsp,
    /// (Re)configuration is in progress
    Config,
    Open,
    /// The disconnection request was sent, waiting on the peer's response
    W4PeerDisconnectRsp,
    /// The peer's disconnection request was indicated, waiting on the upper layer's response
    W4LocalDisconnectRsp,
}

impl ChannelState {
    /// Check if the transition from this state to `next` is a valid transition
    pub fn may_enter(&self, next: ChannelState) -> bool {
        use ChannelState::*;

        matches!(
            (self, next),
            (Closed, OrigW4SecComp)
                | (Closed, TermW4SecComp)
                | (OrigW4SecComp, W4PeerConnectRsp)
                | (TermW4SecComp, W4LocalConnectRsp)
                | (W4PeerConnectRsp, Config)
                | (W4PeerConnectRsp, Open)
                | (W4PeerConnectRsp, W4PeerDisconnectRsp)
                | (W4LocalConnectRsp, Config)
                | (W4LocalConnectRsp, Open)
                | (W4LocalConnectRsp, W4PeerDisconnectRsp)
                | (Config, Open)
                | (Config, W4PeerDisconnectRsp)
                | (Config, W4LocalDisconnectRsp)
                | (Open, Config)
                | (Open, W4PeerDisconnectRsp)
                | (Open, W4LocalDisconnectRsp)
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Closed => f.write_str("CLOSED"),
            ChannelState::OrigW4SecComp => f.write_str("ORIG_W4_SEC_COMP"),
            ChannelState::TermW4SecComp => f.write_str("TERM_W4_SEC_COMP"),
            ChannelState::W4PeerConnectRsp => f.write_str("W4_PEER_CONNECT_RSP"),
            ChannelState::W4LocalConnectRsp => f.write_str("W4_LOCAL_CONNECT_RSP"),
            ChannelState::Config => f.write_str("CONFIG"),
            ChannelState::Open => f.write_str("OPEN"),
            ChannelState::W4PeerDisconnectRsp => f.write_str("W4_PEER_DISCONNECT_RSP"),
            ChannelState::W4LocalDisconnectRsp => f.write_str("W4_LOCAL_DISCONNECT_RSP"),
        }
    }
}

/// Configuration progress of a channel
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct ConfigDone(u8);

impl ConfigDone {
    /// The peer's configuration request was accepted
    pub const INBOUND: ConfigDone = ConfigDone(1 << 0);
    /// This device's configuration request was accepted
    pub const OUTBOUND: ConfigDone = ConfigDone(1 << 1);
    /// The channel was opened at least once, any configuration since is a reconfiguration
    pub const RECONFIG: ConfigDone = ConfigDone(1 << 2);

    pub fn contains(&self, other: ConfigDone) -> bool {
        self.0 & other.0 == other.0
    }

    pub(crate) fn insert(&mut self, other: ConfigDone) {
        self.0 |= other.0
    }

    pub(crate) fn remove(&mut self, other: ConfigDone) {
        self.0 &= !other.0
    }

    /// Check if configuration is complete in both directions
    pub fn is_complete(&self) -> bool {
        self.contains(ConfigDone::INBOUND) && self.contains(ConfigDone::OUTBOUND)
    }
}

impl core::ops::BitOr for ConfigDone {
    type Output = ConfigDone;

    fn bitor(self, rhs: Self) -> Self::Output {
        ConfigDone(self.0 | rhs.0)
    }
}

/// Identifier of an enhanced credit based channel group
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupId(pub(crate) u32);

/// The direction of a credit based reconfiguration
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReconfigDirection {
    /// Requested by this device
    Outbound,
    /// Requested by the peer
    Inbound,
}

/// An in-progress credit based reconfiguration
///
/// A reconfiguration is owned by the channel that received the request (inbound) or that the
/// upper layer made the request on (outbound). The reconfiguration timer of the owner runs while
/// the reconfiguration is in progress.
#[derive(Debug)]
pub(crate) struct Reconfiguration {
    pub(crate) direction: ReconfigDirection,
    pub(crate) cids: Vec<DynChannelId>,
    pub(crate) mtu: u16,
    pub(crate) mps: u16,
    pub(crate) identifier: NonZeroU8,
}

/// A Channel Control Block
///
/// This is the record of a single channel. It is owned by the [`CcbStore`] and may only be
/// mutated by the channel state machine.
///
/// [`CcbStore`]: crate::channel::store::CcbStore
#[derive(Debug)]
pub struct Ccb {
    pub(crate) local_cid: DynChannelId,
    remote_cid: Option<DynChannelId>,
    pub(crate) peer: BluetoothDeviceAddress,
    pub(crate) transport: Transport,
    pub(crate) psm: Psm,
    pub(crate) state: ChannelState,
    pub(crate) config_done: ConfigDone,
    pub(crate) our_cfg: ChannelConfig,
    pub(crate) peer_cfg: ChannelConfig,
    pub(crate) renegotiation_rounds: u8,
    /// Identifier of the last request sent by this device for this channel
    pub(crate) local_id: Option<NonZeroU8>,
    /// Identifier of the last request received from the peer for this channel
    pub(crate) remote_id: Option<NonZeroU8>,
    pub(crate) tx_queue: VecDeque<Vec<u8>>,
    pub(crate) credits: Option<CreditCounter>,
    pub(crate) recombiner: Option<SduRecombiner>,
    pub(crate) group: Option<GroupId>,
    pub(crate) state_timer: TimerSlot,
    pub(crate) ack_timer: TimerSlot,
    /// Timer of the reconfiguration owned by this channel
    pub(crate) reconfig_timer: TimerSlot,
    /// The timeout the acknowledgement timer was last armed with
    pub(crate) ack_timeout: Option<Duration>,
    pub(crate) reconfig: Option<Reconfiguration>,
    pub(crate) congested: bool,
    /// Security was deferred with a delay check
    pub(crate) delay_check: bool,
    /// A connect request or indication waits on the peer's information response
    pub(crate) deferred_by_info: bool,
    /// The upper layer was given the terminal callback, the channel is only kept to finish with
    /// the peer
    pub(crate) detached: bool,
}

impl Ccb {
    pub(crate) fn new(
        local_cid: DynChannelId,
        instance: u32,
        peer: BluetoothDeviceAddress,
        transport: Transport,
        psm: Psm,
        mode: ModeKind,
    ) -> Self {
        let mode = crate::channel::config::FlowControlMode::default_for(mode);

        Ccb {
            local_cid,
            remote_cid: None,
            peer,
            transport,
            psm,
            state: ChannelState::Closed,
            config_done: ConfigDone::default(),
            our_cfg: ChannelConfig::with_mode(mode),
            peer_cfg: ChannelConfig::default(),
            renegotiation_rounds: 0,
            local_id: None,
            remote_id: None,
            tx_queue: VecDeque::new(),
            credits: None,
            recombiner: None,
            group: None,
            state_timer: TimerSlot::new(local_cid, instance, TimerKind::State),
            ack_timer: TimerSlot::new(local_cid, instance, TimerKind::Ack),
            reconfig_timer: TimerSlot::new(local_cid, instance, TimerKind::Reconfig),
            ack_timeout: None,
            reconfig: None,
            congested: false,
            delay_check: false,
            deferred_by_info: false,
            detached: false,
        }
    }

    /// Check if the channel is no longer known to the upper layer
    ///
    /// A detached channel is waiting on the peer to finish its disconnection. It is released
    /// without another callback to the upper layer.
    pub fn is_detached(&self) -> bool {
        self.detached
    }

    pub fn local_cid(&self) -> DynChannelId {
        self.local_cid
    }

    /// Get the channel identifier allocated by the peer
    ///
    /// This is `None` until the peer assigns one.
    pub fn remote_cid(&self) -> Option<DynChannelId> {
        self.remote_cid
    }

    /// Assign the peer's channel identifier
    ///
    /// The remote identifier can only be assigned once, false is returned (and the identifier is
    /// left unchanged) if it was already assigned a different value.
    pub(crate) fn assign_remote_cid(&mut self, cid: DynChannelId) -> bool {
        match self.remote_cid {
            None => {
                self.remote_cid = Some(cid);
                true
            }
            Some(assigned) => assigned == cid,
        }
    }

    pub fn peer(&self) -> BluetoothDeviceAddress {
        self.peer
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn psm(&self) -> Psm {
        self.psm
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn config_done(&self) -> ConfigDone {
        self.config_done
    }

    /// The configuration proposed by this device and accepted by the peer
    pub fn our_config(&self) -> &ChannelConfig {
        &self.our_cfg
    }

    /// The configuration proposed by the peer and accepted by this device
    pub fn peer_config(&self) -> &ChannelConfig {
        &self.peer_cfg
    }

    pub fn mode(&self) -> ModeKind {
        self.our_cfg.mode_kind()
    }

    pub fn is_credit_based(&self) -> bool {
        self.mode().is_credit_based()
    }

    pub fn credits(&self) -> Option<&CreditCounter> {
        self.credits.as_ref()
    }

    pub fn group(&self) -> Option<GroupId> {
        self.group
    }

    pub fn is_congested(&self) -> bool {
        self.congested
    }

    /// Get the number of PDUs waiting to be taken by the output scheduler
    pub fn queued(&self) -> usize {
        self.tx_queue.len()
    }

    /// The credit based connection parameters of this device
    pub(crate) fn local_parameters(&self) -> CreditBasedParameters {
        CreditBasedParameters {
            mtu: self.our_cfg.mtu_or(0),
            mps: self.our_cfg.mps.unwrap_or(0),
            initial_credits: self.credits.map_or(0, |credits| credits.get_local_credits()),
        }
    }

    /// Check if a PDU from the transmit queue may be given to the output scheduler
    ///
    /// While the channel is configuring, basic channels may only transmit once this device's
    /// configuration request was accepted and credit based channels may only transmit once a
    /// reconfiguration requested by the peer is complete.
    pub(crate) fn may_transmit(&self) -> bool {
        let ready = match self.state {
            ChannelState::Open => true,
            ChannelState::Config if self.is_credit_based() => self.config_done.contains(ConfigDone::INBOUND),
            ChannelState::Config => self.config_done.contains(ConfigDone::OUTBOUND),
            _ => false,
        };

        ready && self.credits.map_or(true, |credits| credits.may_send())
    }
}
