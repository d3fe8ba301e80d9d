//! The states waiting on the security decision

use super::ChannelManager;
use crate::channel::ccb::ChannelState;
use crate::channel::config::ModeKind;
use crate::channel::id::DynChannelId;
use crate::channel::store::GroupStatus;
use crate::event::{Event, SecurityStatus};
use crate::host::{AccessDirection, AccessRequest, DisconnectReason, Host};
use crate::link::LinkState;
use crate::registry::{Completion, Psm};
use crate::signals::{ConnectionResult, Signal};

impl<H: Host> ChannelManager<H> {
    pub(super) fn orig_w4_sec_comp(&mut self, cid: DynChannelId, event: Event) {
        match event {
            Event::SecurityGranted => self.outgoing_granted(cid),
            Event::SecurityDenied(status) => {
                log::debug!("(L2CAP) security denied the connection of {} ({:?})", cid, status);

                if self.is_last_on_link(cid) {
                    if let Some(peer) = self.store.get(cid).map(|ccb| ccb.peer) {
                        self.host.set_idle_timeout(peer, self.config.idle_timeout_after_failure)
                    }
                }

                self.release_and_notify_group(cid, Completion::ConnectFailed(ConnectionResult::SecurityBlock))
            }
            Event::SecurityRetry | Event::LinkConnected => self.request_access(cid, AccessDirection::Outgoing),
            Event::LinkDisconnected => {
                self.abort_access(cid);

                self.release_and_notify_group(cid, Completion::DisconnectInd)
            }
            Event::Timeout => {
                self.abort_access(cid);

                self.release_and_notify_group(cid, Completion::ConnectFailed(ConnectionResult::Timeout))
            }
            Event::LocalDisconnectRequest => {
                if self.store.siblings(cid).len() > 1 {
                    self.store.leave_group(cid)
                } else {
                    self.abort_access(cid)
                }

                self.release_and_notify(cid, Completion::DisconnectCfm(ConnectionResult::NoLink))
            }
            Event::LocalDataWrite(_) | Event::PeerData(_) => log::warn!("(L2CAP) {} is not connected, data dropped", cid),
            event => self.unhandled(cid, ChannelState::OrigW4SecComp, &event),
        }
    }

    pub(super) fn term_w4_sec_comp(&mut self, cid: DynChannelId, event: Event) {
        match event {
            Event::SecurityGranted => self.incoming_granted(cid),
            Event::SecurityDenied(SecurityStatus::DelayCheck) => {
                log::debug!("(L2CAP) security of {} is waiting on encryption", cid);

                let timeout = self.config.delay_check_timeout;

                if let Some(ccb) = self.store.get_mut(cid) {
                    ccb.delay_check = true;

                    ccb.state_timer.arm(&mut self.host, timeout)
                }
            }
            Event::SecurityDenied(status) => {
                log::debug!("(L2CAP) security denied the connection request for {} ({:?})", cid, status);

                let result = match self.store.get(cid).map(|ccb| ccb.is_credit_based()) {
                    Some(true) => ConnectionResult::InsufficientAuthentication,
                    _ => ConnectionResult::SecurityBlock,
                };

                self.reject_incoming(cid, result);

                self.release_and_notify_group(cid, Completion::Silent)
            }
            Event::SecurityRetry => self.request_access(cid, AccessDirection::Incoming),
            Event::Timeout => {
                let Some((peer, delay_check)) = self.store.get(cid).map(|ccb| (ccb.peer, ccb.delay_check)) else {
                    return;
                };

                self.abort_access(cid);

                if delay_check {
                    log::warn!("(L2CAP) encryption of the link to {} was not enabled in time", peer);

                    if let Some(link) = self.links.get_mut(&peer) {
                        link.set_state(LinkState::Disconnecting)
                    }

                    self.host.disconnect(peer, DisconnectReason::AuthenticationFailure);
                } else {
                    self.reject_incoming(cid, ConnectionResult::NoResources);
                }

                self.release_and_notify_group(cid, Completion::Silent)
            }
            Event::PeerDisconnectRequest { identifier } => {
                if let Some(ccb) = self.store.get_mut(cid) {
                    ccb.remote_id = Some(identifier)
                }

                self.send_disconnect_response(cid);

                if self.store.siblings(cid).len() > 1 {
                    self.store.leave_group(cid)
                } else {
                    self.abort_access(cid)
                }

                self.release_and_notify(cid, Completion::Silent)
            }
            Event::LinkDisconnected => {
                self.abort_access(cid);

                self.release_and_notify_group(cid, Completion::Silent)
            }
            Event::LocalDisconnectRequest => {
                self.abort_access(cid);

                self.reject_incoming(cid, ConnectionResult::NoResources);

                self.release_and_notify_group(cid, Completion::Silent)
            }
            Event::LocalDataWrite(_) | Event::PeerData(_) => log::warn!("(L2CAP) {} is not connected, data dropped", cid),
            event => self.unhandled(cid, ChannelState::TermW4SecComp, &event),
        }
    }

    fn request_access(&mut self, cid: DynChannelId, direction: AccessDirection) {
        if let Some(ccb) = self.store.get(cid) {
            let request = AccessRequest {
                peer: ccb.peer,
                psm: ccb.psm,
                cid,
                transport: ccb.transport,
                direction,
            };

            self.host.request_access(request)
        }
    }

    fn abort_access(&mut self, cid: DynChannelId) {
        if let Some(peer) = self.store.get(cid).map(|ccb| ccb.peer) {
            self.host.abort_access(peer)
        }
    }

    fn peer_info_pending(&self, cid: DynChannelId) -> bool {
        self.store
            .get(cid)
            .and_then(|ccb| self.links.get(&ccb.peer))
            .map_or(false, |link| link.is_waiting_for_info_rsp())
    }

    /// Continue the connection of a channel initiated by this device
    ///
    /// The connection request waits for the peer's information response if it is still
    /// outstanding.
    fn outgoing_granted(&mut self, cid: DynChannelId) {
        let Some(mode) = self.store.get(cid).map(|ccb| ccb.mode()) else {
            return;
        };

        let info_pending = self.peer_info_pending(cid);

        self.set_group_state(cid, ChannelState::W4PeerConnectRsp);

        let timeout = self.config.connect_timeout;

        self.arm_group_timer(cid, timeout);

        if info_pending {
            log::debug!("(L2CAP) connection request of {} waits on the information response", cid);

            self.defer_group_for_info(cid);
        } else {
            match mode {
                ModeKind::EnhancedCreditBased => self.send_ecfc_request(cid),
                ModeKind::LeCreditBased => self.send_le_request(cid),
                _ => self.send_connect_request(cid),
            }
        }
    }

    /// Continue the connection of a channel initiated by the peer
    ///
    /// The upper layer is given the connect indication unless the peer's information response is
    /// still outstanding. A classic channel then tells the peer the connection is pending.
    fn incoming_granted(&mut self, cid: DynChannelId) {
        let Some(ccb) = self.store.get(cid) else { return };

        let pending = match (ccb.remote_id, ccb.remote_cid()) {
            (Some(identifier), Some(remote_cid)) if !ccb.is_credit_based() => Some(Signal::ConnectionResponse {
                identifier,
                local_cid: Some(cid),
                remote_cid,
                result: ConnectionResult::Pending,
            }),
            _ => None,
        };

        let peer = ccb.peer;

        let deferred = self.peer_info_pending(cid) && ccb.psm != Psm::SDP;

        self.set_group_state(cid, ChannelState::W4LocalConnectRsp);

        let timeout = self.config.connect_timeout;

        self.arm_group_timer(cid, timeout);

        if deferred {
            log::debug!("(L2CAP) connect indication of {} waits on the information response", cid);

            self.defer_group_for_info(cid);

            if let Some(pending) = pending {
                self.send(peer, pending)
            }
        } else {
            self.set_group_status(cid, GroupStatus::AwaitingResponse);

            self.indicate_connection(cid)
        }
    }

    fn defer_group_for_info(&mut self, cid: DynChannelId) {
        self.set_group_status(cid, GroupStatus::AwaitingInfo);

        for sibling in self.store.siblings(cid) {
            if let Some(ccb) = self.store.get_mut(sibling) {
                ccb.deferred_by_info = true
            }
        }
    }
}
