//! Dynamic Channel Identifiers

use crate::link::Transport;
use alloc::collections::BTreeSet;

/// Dynamically allocated channel identifier
///
/// Channel identifiers are used by L2CAP to associate data with a given channel. Every channel
/// managed by the channel state machine is dynamically allocated, so the value of a
/// `DynChannelId` is always within the dynamic range of the transport it was created for.
///
/// # Specification Reference
/// See Bluetooth Specification V5 | Vol 3, Part A Section 2.1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DynChannelId {
    channel_id: u16,
}

impl DynChannelId {
    pub const LE_BOUNDS: core::ops::RangeInclusive<u16> = 0x0040..=0x007F;

    pub const ACL_BOUNDS: core::ops::RangeInclusive<u16> = 0x0040..=0xFFFF;

    /// Create a new `DynChannelId`
    ///
    /// # Note
    /// `channel_val` is not checked for whether it is a valid dynamic channel value.
    pub(crate) fn new_unchecked(channel_val: u16) -> Self {
        DynChannelId { channel_id: channel_val }
    }

    /// Create a new `DynChannelId` for a LE-U logical link
    ///
    /// This returns a `DynChannelId` so long as `channel_id` is within the range of
    /// `0x40..=0x007F`.
    pub fn new_le(channel_id: u16) -> Result<Self, u16> {
        if Self::LE_BOUNDS.contains(&channel_id) {
            Ok(DynChannelId::new_unchecked(channel_id))
        } else {
            Err(channel_id)
        }
    }

    /// Create a new `DynChannelId` for an ACL-U logical link
    ///
    /// This returns a `DynChannelId` so long as `channel_id` is within the range of
    /// `0x40..=0xFFFF`.
    pub fn new_acl(channel_id: u16) -> Result<Self, u16> {
        if Self::ACL_BOUNDS.contains(&channel_id) {
            Ok(DynChannelId::new_unchecked(channel_id))
        } else {
            Err(channel_id)
        }
    }

    /// Create a new `DynChannelId` within the dynamic range of `transport`
    pub fn new_for(transport: Transport, channel_id: u16) -> Result<Self, u16> {
        match transport {
            Transport::BrEdr => Self::new_acl(channel_id),
            Transport::Le => Self::new_le(channel_id),
        }
    }

    /// Get the value of the dynamic channel identifier
    pub fn get_val(&self) -> u16 {
        self.channel_id
    }

    fn bounds(transport: Transport) -> core::ops::RangeInclusive<u16> {
        match transport {
            Transport::BrEdr => Self::ACL_BOUNDS,
            Transport::Le => Self::LE_BOUNDS,
        }
    }
}

impl core::fmt::Display for DynChannelId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "CID 0x{:04x}", self.channel_id)
    }
}

/// Allocator of local channel identifiers
///
/// Local identifiers are unique across every link. An identifier is returned to the pool by
/// [`free`](CidAllocator::free) once its channel is released.
#[derive(Debug, Default)]
pub(crate) struct CidAllocator {
    in_use: BTreeSet<u16>,
}

impl CidAllocator {
    /// Allocate the lowest free identifier within the dynamic range of `transport`
    pub(crate) fn allocate(&mut self, transport: Transport) -> Option<DynChannelId> {
        let val = DynChannelId::bounds(transport).find(|val| !self.in_use.contains(val))?;

        self.in_use.insert(val);

        Some(DynChannelId::new_unchecked(val))
    }

    pub(crate) fn free(&mut self, id: DynChannelId) {
        self.in_use.remove(&id.get_val());
    }

    pub(crate) fn in_use(&self) -> usize {
        self.in_use.len()
    }
}
