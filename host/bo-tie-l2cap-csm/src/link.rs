//! Physical Link Contexts
//!
//! Every channel is owned by exactly one physical link. The channel state machine does not manage
//! the physical link itself (connection establishment, role, or power mode are the concern of the
//! [`LinkControl`] collaborator), but it keeps a `LinkContext` for every link it has channels on.
//!
//! A link context is the owner of its channels. When the context is removed, every channel it owns
//! is considered dead and no further events are dispatched to them.
//!
//! # Transports
//! There are two transports, BR/EDR (whose logical link is ACL-U) and LE (whose logical link is
//! LE-U). The transport determines the range of dynamic channel identifiers, whether channels use
//! a configuration phase, and which signals are valid on the link.
//!
//! [`LinkControl`]: crate::host::LinkControl

use crate::channel::config::{ModeKind, ModeSet};
use crate::channel::id::DynChannelId;
use alloc::vec::Vec;
use core::num::NonZeroU8;

/// The transport of a physical link
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Transport {
    /// Basic Rate / Enhanced Data Rate (the ACL-U logical link)
    BrEdr,
    /// Low Energy (the LE-U logical link)
    Le,
}

impl Transport {
    /// The minimum MTU every device must support on this transport
    pub fn min_supported_mtu(&self) -> u16 {
        match self {
            Transport::BrEdr => 48,
            Transport::Le => 23,
        }
    }
}

impl core::fmt::Display for Transport {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Transport::BrEdr => f.write_str("ACL-U"),
            Transport::Le => f.write_str("LE-U"),
        }
    }
}

/// A Bluetooth device address
///
/// The address is the identity of the remote endpoint of a physical link. The bytes are stored in
/// little endian order (as they are in HCI packets), but they are displayed in the conventional
/// most significant byte first form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BluetoothDeviceAddress(pub [u8; 6]);

impl core::fmt::Display for BluetoothDeviceAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let a = &self.0;

        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

/// The state of a physical link as seen by the channel state machine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// A connection was requested but is not yet confirmed
    Connecting,
    /// The link is up
    Connected,
    /// The link is being torn down
    Disconnecting,
}

/// Context of a physical link
#[derive(Debug)]
pub struct LinkContext {
    address: BluetoothDeviceAddress,
    transport: Transport,
    state: LinkState,
    w4_info_rsp: bool,
    peer_modes: Option<ModeSet>,
    next_identifier: u8,
    channels: Vec<DynChannelId>,
}

impl LinkContext {
    pub(crate) fn new(address: BluetoothDeviceAddress, transport: Transport, state: LinkState) -> Self {
        LinkContext {
            address,
            transport,
            state,
            w4_info_rsp: false,
            peer_modes: None,
            next_identifier: 1,
            channels: Vec::new(),
        }
    }

    /// Get the address of the peer device
    pub fn address(&self) -> BluetoothDeviceAddress {
        self.address
    }

    /// Get the transport of the link
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Get the state of the link
    pub fn state(&self) -> LinkState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: LinkState) {
        self.state = state
    }

    /// Check if the peer's information response is still outstanding
    ///
    /// Connection requests on a BR/EDR link are deferred until the peer's extended feature mask is
    /// known.
    pub fn is_waiting_for_info_rsp(&self) -> bool {
        self.w4_info_rsp
    }

    pub(crate) fn set_waiting_for_info_rsp(&mut self, waiting: bool) {
        self.w4_info_rsp = waiting
    }

    /// Set the flow control modes supported by the peer
    ///
    /// The modes are from the extended feature mask within the peer's information response.
    pub(crate) fn set_peer_modes(&mut self, modes: ModeSet) {
        self.peer_modes = Some(modes.with(ModeKind::Basic))
    }

    /// Check if the peer supports the flow control mode `kind`
    ///
    /// Every peer supports basic mode. Until the peer's information response is received every
    /// mode is assumed to be supported.
    pub fn peer_supports(&self, kind: ModeKind) -> bool {
        match self.peer_modes {
            Some(modes) => modes.contains(kind),
            None => true,
        }
    }

    /// Get the channels owned by this link
    pub fn channels(&self) -> &[DynChannelId] {
        &self.channels
    }

    pub(crate) fn add_channel(&mut self, cid: DynChannelId) {
        self.channels.push(cid)
    }

    pub(crate) fn remove_channel(&mut self, cid: DynChannelId) {
        self.channels.retain(|c| *c != cid)
    }

    /// Get the next identifier for a locally originated signaling request
    ///
    /// Identifiers are never zero and wrap around after 255.
    pub(crate) fn next_identifier(&mut self) -> NonZeroU8 {
        let identifier = NonZeroU8::new(self.next_identifier).unwrap_or(NonZeroU8::MIN);

        self.next_identifier = match self.next_identifier.checked_add(1) {
            Some(next) => next,
            None => 1,
        };

        identifier
    }
}
