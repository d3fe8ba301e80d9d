//! The store of live channels

use crate::channel::ccb::{Ccb, GroupId};
use crate::channel::config::ModeKind;
use crate::channel::id::{CidAllocator, DynChannelId};
use crate::link::{BluetoothDeviceAddress, Transport};
use crate::registry::Psm;
use crate::signals::ConnectionResult;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::num::NonZeroU8;

/// The progress of an enhanced credit based connection
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum GroupStatus {
    /// Waiting on the security decision
    Security,
    /// Security was granted, waiting on the peer's information response
    AwaitingInfo,
    /// Waiting on the connection response (of the peer or the upper layer)
    AwaitingResponse,
    Open,
}

/// The channels of an enhanced credit based connection
///
/// The channels of a group are connected together. Once the group is open each channel is
/// disconnected independently, a released channel only leaves the group.
#[derive(Debug)]
pub(crate) struct EcfcGroup {
    pub(crate) members: Vec<DynChannelId>,
    /// The channel for every identifier of the connection request in the order of the request
    ///
    /// An entry is `None` for a channel that was refused when the request was received.
    pub(crate) slots: Vec<Option<DynChannelId>>,
    /// The identifier of the connection request
    pub(crate) identifier: NonZeroU8,
    pub(crate) status: GroupStatus,
    /// The result sent in the connection response when only some channels were refused
    pub(crate) result: ConnectionResult,
    /// The MTU of the peer
    pub(crate) peer_mtu: u16,
}

/// Owner of every Channel Control Block
///
/// A channel is *live* while its control block is within this store. Channel identifiers are
/// returned to the allocator as soon as the control block is removed, so a stale identifier
/// either refers to nothing or to a newer channel.
#[derive(Debug, Default)]
pub struct CcbStore {
    ccbs: BTreeMap<DynChannelId, Ccb>,
    groups: BTreeMap<GroupId, EcfcGroup>,
    cids: CidAllocator,
    next_group: u32,
    /// The instance number of the next created channel
    next_instance: u32,
}

impl CcbStore {
    /// Create a new channel in the CLOSED state
    ///
    /// `None` is returned when there is no free channel identifier for `transport`.
    pub(crate) fn create(
        &mut self,
        peer: BluetoothDeviceAddress,
        transport: Transport,
        psm: Psm,
        mode: ModeKind,
    ) -> Option<DynChannelId> {
        let cid = self.cids.allocate(transport)?;

        let instance = self.next_instance;

        self.next_instance = self.next_instance.wrapping_add(1);

        self.ccbs.insert(cid, Ccb::new(cid, instance, peer, transport, psm, mode));

        Some(cid)
    }

    /// Remove a channel from the store
    ///
    /// The channel identifier is freed and the channel leaves its group (its slot is cleared, the
    /// identifier may be handed out again). A group without any members is removed.
    pub(crate) fn remove(&mut self, cid: DynChannelId) -> Option<Ccb> {
        let ccb = self.ccbs.remove(&cid)?;

        self.cids.free(cid);

        if let Some(id) = ccb.group {
            let now_empty = match self.groups.get_mut(&id) {
                Some(group) => {
                    group.members.retain(|member| *member != cid);

                    group.slots.iter_mut().filter(|slot| **slot == Some(cid)).for_each(|slot| *slot = None);

                    group.members.is_empty()
                }
                None => false,
            };

            if now_empty {
                self.groups.remove(&id);
            }
        }

        Some(ccb)
    }

    pub fn get(&self, cid: DynChannelId) -> Option<&Ccb> {
        self.ccbs.get(&cid)
    }

    pub(crate) fn get_mut(&mut self, cid: DynChannelId) -> Option<&mut Ccb> {
        self.ccbs.get_mut(&cid)
    }

    /// Iterate over every channel within the store
    pub fn iter(&self) -> impl Iterator<Item = &Ccb> {
        self.ccbs.values()
    }

    pub fn contains(&self, cid: DynChannelId) -> bool {
        self.ccbs.contains_key(&cid)
    }

    /// Get the number of live channels
    pub fn len(&self) -> usize {
        self.ccbs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ccbs.is_empty()
    }

    /// Find the channel with the remote identifier `remote` on the link to `peer`
    pub(crate) fn find_remote(&self, peer: BluetoothDeviceAddress, remote: DynChannelId) -> Option<DynChannelId> {
        self.ccbs
            .values()
            .find(|ccb| ccb.peer == peer && ccb.remote_cid() == Some(remote))
            .map(|ccb| ccb.local_cid)
    }

    /// Make a new group from the channels `slots`
    pub(crate) fn new_group(
        &mut self,
        slots: Vec<Option<DynChannelId>>,
        identifier: NonZeroU8,
        peer_mtu: u16,
    ) -> GroupId {
        let id = GroupId(self.next_group);

        self.next_group = self.next_group.wrapping_add(1);

        let members: Vec<DynChannelId> = slots.iter().flatten().copied().collect();

        for cid in members.iter() {
            if let Some(ccb) = self.ccbs.get_mut(cid) {
                ccb.group = Some(id)
            }
        }

        let result = if members.len() == slots.len() {
            ConnectionResult::Success
        } else {
            ConnectionResult::SomeConnectionsRefused
        };

        self.groups.insert(
            id,
            EcfcGroup {
                members,
                slots,
                identifier,
                status: GroupStatus::Security,
                result,
                peer_mtu,
            },
        );

        id
    }

    pub(crate) fn group(&self, id: GroupId) -> Option<&EcfcGroup> {
        self.groups.get(&id)
    }

    pub(crate) fn group_mut(&mut self, id: GroupId) -> Option<&mut EcfcGroup> {
        self.groups.get_mut(&id)
    }

    /// Get the group of channel `cid`
    pub(crate) fn group_of(&self, cid: DynChannelId) -> Option<&EcfcGroup> {
        self.ccbs.get(&cid)?.group.and_then(|id| self.groups.get(&id))
    }

    /// Get the channels connected together with `cid`
    ///
    /// This is every member of the group of `cid`, or just `cid` when the channel is not part of a
    /// group.
    pub(crate) fn siblings(&self, cid: DynChannelId) -> Vec<DynChannelId> {
        match self.group_of(cid) {
            Some(group) => group.members.clone(),
            None => alloc::vec![cid],
        }
    }

    /// Remove channel `cid` from its group without releasing it
    pub(crate) fn leave_group(&mut self, cid: DynChannelId) {
        let Some(id) = self.ccbs.get_mut(&cid).and_then(|ccb| ccb.group.take()) else {
            return;
        };

        let now_empty = match self.groups.get_mut(&id) {
            Some(group) => {
                group.members.retain(|member| *member != cid);

                group.slots.iter_mut().filter(|slot| **slot == Some(cid)).for_each(|slot| *slot = None);

                group.members.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.groups.remove(&id);
        }
    }
}
