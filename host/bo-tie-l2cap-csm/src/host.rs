//! External Collaborators
//!
//! The channel state machine is the core of L2CAP but it does not build signaling packets, decide
//! on security, manage the physical link, or drain the transmit queues. These are the concern of
//! the host, which provides them by implementing the collaborator traits of this module. A type
//! that implements all of them implements [`Host`].
//!
//! Every collaborator call is fire and forget. The result of a request (a security decision, a
//! peer's response, an expired alarm) is later delivered to the [`ChannelManager`] as an ordinary
//! event. A collaborator must not call back into the `ChannelManager` from within one of these
//! methods (this is enforced by the borrow of the manager).
//!
//! [`ChannelManager`]: crate::ChannelManager

use crate::channel::id::DynChannelId;
use crate::link::{BluetoothDeviceAddress, Transport};
use crate::registry::Psm;
use crate::signals::Signal;
use crate::timer::Alarms;
use alloc::vec::Vec;
use core::time::Duration;

/// Sender of signaling packets
pub trait PeerSignaling {
    /// Build and send `signal` on the signaling channel of the link to `peer`
    fn send_signal(&mut self, peer: BluetoothDeviceAddress, signal: Signal);
}

/// The direction of a connection attempt
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessDirection {
    /// This device initiated the connection
    Outgoing,
    /// The peer initiated the connection
    Incoming,
}

/// A request for a security access decision
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub peer: BluetoothDeviceAddress,
    pub psm: Psm,
    /// The channel that receives the decision
    pub cid: DynChannelId,
    pub transport: Transport,
    pub direction: AccessDirection,
}

/// The security access decision subsystem
///
/// The decision for a request is delivered with [`ChannelManager::security_complete`]. When the
/// decision is deferred, the subsystem later asks for the request to be made again with
/// [`ChannelManager::security_retry`].
///
/// [`ChannelManager::security_complete`]: crate::ChannelManager::security_complete
/// [`ChannelManager::security_retry`]: crate::ChannelManager::security_retry
pub trait SecurityAccess {
    fn request_access(&mut self, request: AccessRequest);

    /// Abort any outstanding request for `peer`
    fn abort_access(&mut self, peer: BluetoothDeviceAddress);
}

/// Reason for disconnecting a physical link
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    AuthenticationFailure,
}

/// Control of the physical links
pub trait LinkControl {
    /// Create a physical link to `peer`
    ///
    /// The outcome is delivered with [`ChannelManager::link_connected`] or
    /// [`ChannelManager::link_connect_failed`].
    ///
    /// [`ChannelManager::link_connected`]: crate::ChannelManager::link_connected
    /// [`ChannelManager::link_connect_failed`]: crate::ChannelManager::link_connect_failed
    fn create_connection(&mut self, peer: BluetoothDeviceAddress, transport: Transport);

    fn disconnect(&mut self, peer: BluetoothDeviceAddress, reason: DisconnectReason);

    /// Keep a BR/EDR link out of a low power mode
    fn request_active_mode(&mut self, peer: BluetoothDeviceAddress) {
        let _ = peer;
    }

    /// Stop the timer that disconnects a link without channels
    fn cancel_idle_timer(&mut self, peer: BluetoothDeviceAddress) {
        let _ = peer;
    }

    /// Set the time a link without channels is kept before it is disconnected
    fn set_idle_timeout(&mut self, peer: BluetoothDeviceAddress, timeout: Duration) {
        let _ = (peer, timeout);
    }
}

/// The output scheduler of the links
///
/// The scheduler drains the transmit queues of the channels of a link with
/// [`ChannelManager::take_pdu`]. It is told whenever new data or new credits may allow progress,
/// it is never expected to send within this call.
///
/// [`ChannelManager::take_pdu`]: crate::ChannelManager::take_pdu
pub trait OutputScheduler {
    fn service(&mut self, peer: BluetoothDeviceAddress);
}

/// The segmentation, reassembly, and retransmission engine of enhanced retransmission mode
pub trait RetransmissionEngine {
    /// Process a received PDU
    ///
    /// A SDU is returned once it is complete.
    fn receive(&mut self, cid: DynChannelId, pdu: Vec<u8>) -> Option<Vec<u8>>;

    /// The retransmission or monitor timer of the channel expired
    fn retransmission_timeout(&mut self, cid: DynChannelId);

    /// The acknowledgement timer of the channel expired
    fn ack_timeout(&mut self, cid: DynChannelId);

    /// Check if the engine is waiting on an acknowledgement from the peer
    fn awaiting_ack(&self, cid: DynChannelId) -> bool {
        let _ = cid;
        false
    }
}

/// The set of every collaborator of the channel state machine
pub trait Host: PeerSignaling + SecurityAccess + LinkControl + OutputScheduler + RetransmissionEngine + Alarms {}

impl<T> Host for T where T: PeerSignaling + SecurityAccess + LinkControl + OutputScheduler + RetransmissionEngine + Alarms {}
