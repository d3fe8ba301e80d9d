//! The states waiting on a connection response

use super::{credit_config, ChannelManager};
use crate::channel::ccb::{ChannelState, ConfigDone};
use crate::channel::config::{FlowControlMode, ModeKind};
use crate::channel::id::DynChannelId;
use crate::channel::store::GroupStatus;
use crate::credit::CreditCounter;
use crate::event::{CreditConnectResponse, Event};
use crate::host::Host;
use crate::link::Transport;
use crate::registry::Completion;
use crate::sdu::SduRecombiner;
use crate::signals::{ConnectionResult, CreditBasedParameters, Signal};
use alloc::vec;
use alloc::vec::Vec;

impl<H: Host> ChannelManager<H> {
    pub(super) fn w4_peer_connect_rsp(&mut self, cid: DynChannelId, event: Event) {
        let Some(credit_based) = self.store.get(cid).map(|ccb| ccb.is_credit_based()) else {
            return;
        };

        match event {
            Event::PeerConnectResponse { remote_cid } if !credit_based => self.peer_accepted(cid, remote_cid),
            Event::PeerConnectPending { remote_cid } if !credit_based => {
                if let (Some(ccb), Some(raw)) = (self.store.get_mut(cid), remote_cid) {
                    if let Ok(remote_cid) = DynChannelId::new_acl(raw) {
                        ccb.assign_remote_cid(remote_cid);
                    }
                }

                if let Some(ccb) = self.store.get(cid).filter(|ccb| ccb.detached) {
                    if ccb.remote_cid().is_some() {
                        self.disconnect_from_local(cid)
                    }

                    return;
                }

                let timeout = self.config.extended_connect_timeout;

                self.arm_state_timer(cid, timeout);

                if let Some(psm) = self.store.get(cid).map(|ccb| ccb.psm) {
                    if let Some(upper) = self.upper(psm).and_then(|upper| upper.as_classic()) {
                        upper.connect_pnd(cid)
                    }
                }
            }
            Event::PeerConnectRejected(result) => {
                log::debug!("(L2CAP) peer rejected the connection of {} ({})", cid, result);

                self.release_and_notify_group(cid, Completion::ConnectFailed(result))
            }
            Event::PeerCreditConnectResponse(response) if credit_based => self.peer_credit_response(cid, response),
            Event::Timeout => {
                if !credit_based {
                    self.send_disconnect_request(cid)
                }

                self.release_and_notify_group(cid, Completion::ConnectFailed(ConnectionResult::Timeout))
            }
            Event::LinkDisconnected => self.release_and_notify_group(cid, Completion::DisconnectInd),
            Event::LocalDisconnectRequest => {
                let Some(ccb) = self.store.get(cid) else { return };

                if ccb.remote_cid().is_some() {
                    self.store.leave_group(cid);

                    self.disconnect_from_local(cid)
                } else if ccb.deferred_by_info {
                    self.store.leave_group(cid);

                    self.release_and_notify(cid, Completion::DisconnectCfm(ConnectionResult::NoLink))
                } else {
                    // the request is with the peer, the channel is disconnected if the peer accepts it
                    self.detach(&[cid], Completion::DisconnectCfm(ConnectionResult::NoLink))
                }
            }
            Event::InfoResponse => {
                if !self.clear_info_deferral(cid) {
                    return;
                }

                match self.store.get(cid).map(|ccb| ccb.mode()) {
                    Some(ModeKind::EnhancedCreditBased) => self.send_ecfc_request(cid),
                    Some(ModeKind::LeCreditBased) => self.send_le_request(cid),
                    Some(_) => self.send_connect_request(cid),
                    None => (),
                }
            }
            Event::LocalDataWrite(_) | Event::PeerData(_) => log::warn!("(L2CAP) {} is not connected, data dropped", cid),
            event => self.unhandled(cid, ChannelState::W4PeerConnectRsp, &event),
        }
    }

    pub(super) fn w4_local_connect_rsp(&mut self, cid: DynChannelId, event: Event) {
        let Some(mode) = self.store.get(cid).map(|ccb| ccb.mode()) else {
            return;
        };

        match event {
            Event::LocalConnectResponse(result) => match mode {
                ModeKind::EnhancedCreditBased => self.ecfc_local_response(cid, result),
                ModeKind::LeCreditBased => self.le_local_response(cid, result),
                _ => self.classic_local_response(cid, result),
            },
            Event::Timeout => {
                log::debug!("(L2CAP) upper layer did not answer the connection of {}", cid);

                let result = if mode.is_credit_based() {
                    ConnectionResult::NoResources
                } else {
                    ConnectionResult::PsmNotSupported
                };

                self.reject_incoming(cid, result);

                self.release_and_notify_group(cid, Completion::DisconnectInd)
            }
            Event::LocalDisconnectRequest => {
                self.store.leave_group(cid);

                self.disconnect_from_local(cid)
            }
            Event::InfoResponse => {
                if self.clear_info_deferral(cid) {
                    self.set_group_status(cid, GroupStatus::AwaitingResponse);

                    let timeout = self.config.connect_timeout;

                    self.arm_group_timer(cid, timeout);

                    self.indicate_connection(cid)
                }
            }
            Event::LinkDisconnected => self.release_and_notify_group(cid, Completion::DisconnectInd),
            Event::PeerDisconnectRequest { identifier } => {
                if let Some(ccb) = self.store.get_mut(cid) {
                    ccb.remote_id = Some(identifier)
                }

                self.send_disconnect_response(cid);

                self.store.leave_group(cid);

                self.release_and_notify(cid, Completion::DisconnectInd)
            }
            Event::LocalDataWrite(_) | Event::PeerData(_) => log::warn!("(L2CAP) {} is not connected, data dropped", cid),
            event => self.unhandled(cid, ChannelState::W4LocalConnectRsp, &event),
        }
    }

    /// Clear the information response deferral of the channels connected together with `cid`
    ///
    /// False is returned if the channel was not deferred.
    fn clear_info_deferral(&mut self, cid: DynChannelId) -> bool {
        if !self.store.get(cid).map_or(false, |ccb| ccb.deferred_by_info) {
            return false;
        }

        for sibling in self.store.siblings(cid) {
            if let Some(ccb) = self.store.get_mut(sibling) {
                ccb.deferred_by_info = false
            }
        }

        true
    }

    /// Send the connection request of a classic channel
    ///
    /// If the peer does not support the mode of the channel, the channel falls back to basic mode
    /// when its registration allows it. Otherwise the connection fails.
    pub(super) fn send_connect_request(&mut self, cid: DynChannelId) {
        let Some(ccb) = self.store.get(cid) else { return };

        let (peer, psm, mode) = (ccb.peer, ccb.psm, ccb.mode());

        let supported = self.links.get(&peer).map_or(false, |link| link.peer_supports(mode));

        if !supported {
            let basic_allowed = self
                .registry
                .get(psm)
                .map_or(false, |record| record.modes().contains(ModeKind::Basic));

            if !basic_allowed {
                log::debug!("(L2CAP) peer {} does not support {} for {}", peer, mode, cid);

                self.release_and_notify(cid, Completion::ConnectFailed(ConnectionResult::NoLink));

                return;
            }

            log::debug!("(L2CAP) peer {} does not support {}, {} falls back to basic mode", peer, mode, cid);

            if let Some(ccb) = self.store.get_mut(cid) {
                ccb.our_cfg.mode = Some(FlowControlMode::Basic)
            }
        }

        let identifier = self.next_identifier(peer);

        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.local_id = Some(identifier)
        }

        self.send(
            peer,
            Signal::ConnectionRequest {
                identifier,
                psm,
                local_cid: cid,
            },
        )
    }

    pub(super) fn send_le_request(&mut self, cid: DynChannelId) {
        let Some(ccb) = self.store.get(cid) else { return };

        let (peer, spsm, parameters) = (ccb.peer, ccb.psm, ccb.local_parameters());

        let identifier = self.next_identifier(peer);

        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.local_id = Some(identifier)
        }

        self.send(
            peer,
            Signal::LeCreditBasedConnectionRequest {
                identifier,
                spsm,
                local_cid: cid,
                parameters,
            },
        )
    }

    /// Send one connection request for every channel connected together with `cid`
    pub(super) fn send_ecfc_request(&mut self, cid: DynChannelId) {
        let Some(ccb) = self.store.get(cid) else { return };

        let (peer, spsm, transport, parameters) = (ccb.peer, ccb.psm, ccb.transport, ccb.local_parameters());

        let supported = self
            .links
            .get(&peer)
            .map_or(false, |link| link.peer_supports(ModeKind::EnhancedCreditBased));

        if transport == Transport::BrEdr && !supported {
            log::debug!("(L2CAP) peer {} does not support enhanced credit based channels", peer);

            self.release_and_notify_group(cid, Completion::ConnectFailed(ConnectionResult::NoLink));

            return;
        }

        let identifier = self.next_identifier(peer);

        let local_cids = self.store.siblings(cid);

        for member in local_cids.iter() {
            if let Some(ccb) = self.store.get_mut(*member) {
                ccb.local_id = Some(identifier)
            }
        }

        if let Some(group) = self.group_id(cid).and_then(|id| self.store.group_mut(id)) {
            group.identifier = identifier;

            group.slots = local_cids.iter().copied().map(Some).collect();

            group.status = GroupStatus::AwaitingResponse;
        }

        self.send(
            peer,
            Signal::CreditBasedConnectionRequest {
                identifier,
                spsm,
                local_cids,
                parameters,
            },
        )
    }

    /// Give the connect indication to the upper layer
    pub(super) fn indicate_connection(&mut self, cid: DynChannelId) {
        let Some(ccb) = self.store.get(cid) else { return };

        let (peer, psm, mode) = (ccb.peer, ccb.psm, ccb.mode());

        let Some(identifier) = ccb.remote_id else { return };

        let peer_mtu = match self.store.group_of(cid) {
            Some(group) => group.peer_mtu,
            None => ccb.peer_cfg.mtu_or(0),
        };

        let cids = self.store.siblings(cid);

        log::debug!("(L2CAP) indicating the connection of {:?} for {}", cids, psm);

        match self.upper(psm) {
            Some(upper) if mode.is_credit_based() => {
                if let Some(upper) = upper.as_credit_based() {
                    upper.connect_ind(peer, &cids, psm, peer_mtu, identifier)
                }
            }
            Some(upper) => {
                if let Some(upper) = upper.as_classic() {
                    upper.connect_ind(peer, cid, psm, identifier)
                }
            }
            None => (),
        }
    }

    /// Refuse the connection request of the peer that created `cid`
    ///
    /// For an enhanced credit based connection every channel of the request is refused.
    pub(super) fn reject_incoming(&mut self, cid: DynChannelId, result: ConnectionResult) {
        let Some(ccb) = self.store.get(cid) else { return };

        let Some(identifier) = ccb.remote_id else { return };

        let peer = ccb.peer;

        let signal = match ccb.mode() {
            ModeKind::EnhancedCreditBased => {
                let (identifier, count) = self
                    .store
                    .group_of(cid)
                    .map_or((identifier, 1), |group| (group.identifier, group.slots.len()));

                Signal::CreditBasedConnectionResponse {
                    identifier,
                    local_cids: vec![None; count],
                    parameters: CreditBasedParameters::default(),
                    result,
                }
            }
            ModeKind::LeCreditBased => Signal::LeCreditBasedConnectionResponse {
                identifier,
                local_cid: None,
                parameters: CreditBasedParameters::default(),
                result,
            },
            _ => match ccb.remote_cid() {
                Some(remote_cid) => Signal::ConnectionResponse {
                    identifier,
                    local_cid: None,
                    remote_cid,
                    result,
                },
                None => return,
            },
        };

        self.send(peer, signal)
    }

    /// The peer accepted the connection of a classic channel
    fn peer_accepted(&mut self, cid: DynChannelId, remote_cid: u16) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        let assigned = DynChannelId::new_acl(remote_cid).map_or(false, |remote| ccb.assign_remote_cid(remote));

        if !assigned {
            log::warn!("(L2CAP) peer accepted {} with invalid CID 0x{:04x}", cid, remote_cid);

            self.release_and_notify(cid, Completion::ConnectFailed(ConnectionResult::InvalidSourceCid));

            return;
        }

        if ccb.detached {
            self.disconnect_from_local(cid);

            return;
        }

        ccb.config_done = ConfigDone::default();

        ccb.deferred_by_info = false;

        let (peer, psm) = (ccb.peer, ccb.psm);

        self.set_state(cid, ChannelState::Config);

        let timeout = self.config.config_timeout;

        self.arm_state_timer(cid, timeout);

        if let Some(upper) = self.upper(psm) {
            upper.connect_cfm_success(peer, &[cid])
        }
    }

    /// Process the peer's response to a LE or enhanced credit based connection request
    ///
    /// The channels of an enhanced credit based connection are connected all together or not at
    /// all. If the peer refuses only some of them, the accepted channels are disconnected and the
    /// connection fails. Channels the upper layer disconnected while waiting on the response are
    /// disconnected from the peer if it accepted them.
    fn peer_credit_response(&mut self, cid: DynChannelId, response: CreditConnectResponse) {
        let Some(ccb) = self.store.get(cid) else { return };

        let (peer, transport, mode) = (ccb.peer, ccb.transport, ccb.mode());

        let requested: Vec<Option<DynChannelId>> = match self.store.group_of(cid) {
            Some(group) => group.slots.clone(),
            None => vec![Some(cid)],
        };

        let members = self.store.siblings(cid);

        let parameters = CreditBasedParameters {
            mtu: response.mtu,
            mps: response.mps,
            initial_credits: response.initial_credits,
        };

        let (withdrawn, accepted): (Vec<_>, Vec<_>) = requested
            .iter()
            .enumerate()
            .filter_map(|(index, local)| {
                let local = (*local)?;

                let raw = (*response.remote_cids.get(index)?)?;

                let remote = DynChannelId::new_for(transport, raw).ok()?;

                Some((local, remote))
            })
            .partition(|(local, _)| self.store.get(*local).map_or(false, |ccb| ccb.detached));

        for (local, remote) in withdrawn.iter().copied() {
            self.disconnect_accepted(local, remote)
        }

        let members: Vec<DynChannelId> = members
            .into_iter()
            .filter(|member| withdrawn.iter().all(|(local, _)| local != member))
            .collect();

        if members.is_empty() {
            return;
        }

        if accepted.is_empty() {
            let result = match response.result {
                ConnectionResult::Success => ConnectionResult::NoResources,
                result => result,
            };

            log::debug!("(L2CAP) peer refused the connection of {:?} ({})", members, result);

            self.release_members(&members, Completion::ConnectFailed(result));

            return;
        }

        let wanted = members
            .iter()
            .filter(|member| self.store.get(**member).map_or(false, |ccb| !ccb.detached))
            .count();

        let credit_max = match mode {
            ModeKind::EnhancedCreditBased => self.config.ecfc_credit_max,
            _ => self.config.le_credit_max,
        };

        let valid = self.credit_parameters_valid(mode, &parameters) && parameters.initial_credits <= credit_max;

        if accepted.len() < wanted || !valid {
            let result = if !valid {
                log::warn!("(L2CAP) peer accepted {} with invalid parameters {:?}", cid, parameters);

                ConnectionResult::UnacceptableParameters
            } else if response.result.is_success() {
                ConnectionResult::SomeConnectionsRefused
            } else {
                response.result
            };

            self.detach(&members, Completion::ConnectFailed(result));

            for (local, remote) in accepted.iter().copied() {
                self.disconnect_accepted(local, remote)
            }

            for member in members {
                if self.state(member) == Some(ChannelState::W4PeerConnectRsp) {
                    self.release(member);
                }
            }

            return;
        }

        let cids: Vec<DynChannelId> = accepted.iter().map(|(local, _)| *local).collect();

        // the members left over were withdrawn and then refused by the peer
        for member in members.iter().filter(|member| !cids.contains(member)) {
            self.release(*member);
        }

        for (local, remote) in accepted {
            if let Some(ccb) = self.store.get_mut(local) {
                ccb.assign_remote_cid(remote);

                ccb.peer_cfg = credit_config(mode, parameters);

                let initial = ccb.credits.map_or(0, |credits| credits.get_local_credits());

                ccb.credits = CreditCounter::new(initial, parameters.initial_credits, credit_max).ok();
            }

            self.open_credit_channel(local);
        }

        self.set_group_status(cids[0], GroupStatus::Open);

        if let Some(upper) = self.store.get(cids[0]).map(|ccb| ccb.psm).and_then(|psm| self.upper(psm)) {
            upper.connect_cfm_success(peer, &cids)
        }

        cids.into_iter().for_each(|cid| self.service_queue(cid));
    }

    /// Disconnect a channel the peer accepted but that is no longer wanted
    fn disconnect_accepted(&mut self, cid: DynChannelId, remote: DynChannelId) {
        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.assign_remote_cid(remote);
        }

        self.store.leave_group(cid);

        self.disconnect_from_local(cid)
    }

    fn classic_local_response(&mut self, cid: DynChannelId, result: ConnectionResult) {
        let Some(ccb) = self.store.get(cid) else { return };

        let peer = ccb.peer;

        let (Some(identifier), Some(remote_cid)) = (ccb.remote_id, ccb.remote_cid()) else {
            self.release_and_notify(cid, Completion::Silent);
            return;
        };

        match result {
            ConnectionResult::Success => {
                self.send(
                    peer,
                    Signal::ConnectionResponse {
                        identifier,
                        local_cid: Some(cid),
                        remote_cid,
                        result,
                    },
                );

                if let Some(ccb) = self.store.get_mut(cid) {
                    ccb.config_done = ConfigDone::default()
                }

                self.set_state(cid, ChannelState::Config);

                let timeout = self.config.config_timeout;

                self.arm_state_timer(cid, timeout);
            }
            ConnectionResult::Pending => {
                self.send(
                    peer,
                    Signal::ConnectionResponse {
                        identifier,
                        local_cid: Some(cid),
                        remote_cid,
                        result,
                    },
                );

                let timeout = self.config.extended_connect_timeout;

                self.arm_state_timer(cid, timeout);
            }
            result => {
                self.send(
                    peer,
                    Signal::ConnectionResponse {
                        identifier,
                        local_cid: None,
                        remote_cid,
                        result,
                    },
                );

                self.release_and_notify(cid, Completion::Silent)
            }
        }
    }

    fn le_local_response(&mut self, cid: DynChannelId, result: ConnectionResult) {
        let Some(ccb) = self.store.get(cid) else { return };

        let (peer, parameters) = (ccb.peer, ccb.local_parameters());

        let Some(identifier) = ccb.remote_id else { return };

        match result {
            ConnectionResult::Success => {
                self.send(
                    peer,
                    Signal::LeCreditBasedConnectionResponse {
                        identifier,
                        local_cid: Some(cid),
                        parameters,
                        result,
                    },
                );

                self.open_credit_channel(cid);

                self.service_queue(cid)
            }
            ConnectionResult::Pending => log::warn!("(L2CAP) LE credit based connections cannot be pending"),
            result => {
                self.reject_incoming(cid, result);

                self.release_and_notify(cid, Completion::Silent)
            }
        }
    }

    fn ecfc_local_response(&mut self, cid: DynChannelId, result: ConnectionResult) {
        let Some(ccb) = self.store.get(cid) else { return };

        let (peer, parameters) = (ccb.peer, ccb.local_parameters());

        let Some((identifier, slots, group_result)) = self
            .store
            .group_of(cid)
            .map(|group| (group.identifier, group.slots.clone(), group.result))
        else {
            return;
        };

        match result {
            ConnectionResult::Success => {
                self.send(
                    peer,
                    Signal::CreditBasedConnectionResponse {
                        identifier,
                        local_cids: slots.clone(),
                        parameters,
                        result: group_result,
                    },
                );

                let cids: Vec<DynChannelId> = slots.into_iter().flatten().collect();

                cids.iter().for_each(|cid| self.open_credit_channel(*cid));

                self.set_group_status(cid, GroupStatus::Open);

                cids.into_iter().for_each(|cid| self.service_queue(cid));
            }
            ConnectionResult::Pending => log::warn!("(L2CAP) credit based connections cannot be pending"),
            result => {
                self.reject_incoming(cid, result);

                self.release_and_notify_group(cid, Completion::Silent)
            }
        }
    }

    /// Move a credit based channel to OPEN
    fn open_credit_channel(&mut self, cid: DynChannelId) {
        self.cancel_state_timer(cid);

        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.recombiner = Some(SduRecombiner::new(ccb.our_cfg.mtu_or(0), ccb.our_cfg.mps.unwrap_or(0)));

            ccb.config_done = ConfigDone::INBOUND | ConfigDone::OUTBOUND;

            ccb.deferred_by_info = false;
        }

        self.set_state(cid, ChannelState::Open)
    }
}
