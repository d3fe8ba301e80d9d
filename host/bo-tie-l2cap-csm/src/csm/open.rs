//! The OPEN state
//!
//! This also contains the data and credit paths, they are shared with CONFIG so that a channel
//! being reconfigured keeps exchanging data.

use super::ChannelManager;
use crate::channel::ccb::{ChannelState, ConfigDone};
use crate::channel::config::{ConfigRequest, ModeKind};
use crate::channel::id::DynChannelId;
use crate::event::Event;
use crate::host::Host;
use crate::link::Transport;
use crate::negotiator::Negotiation;
use crate::registry::Completion;
use crate::sdu;
use crate::signals::Signal;
use alloc::vec::Vec;

impl<H: Host> ChannelManager<H> {
    pub(super) fn open(&mut self, cid: DynChannelId, event: Event) {
        let Some(ccb) = self.store.get(cid) else { return };

        let (credit_based, mode, peer, transport, psm) =
            (ccb.is_credit_based(), ccb.mode(), ccb.peer, ccb.transport, ccb.psm);

        match event {
            Event::PeerData(payload) if credit_based => self.receive_credit_data(cid, payload),
            Event::PeerData(payload) => self.receive_classic_data(cid, payload),
            Event::LocalDataWrite(sdu) => self.queue_sdu(cid, sdu),
            Event::PeerCredits(credits) if credit_based => self.peer_credits(cid, credits),
            Event::LocalSendCredits(credits) if credit_based => self.local_credits(cid, credits),
            Event::PeerConfigRequest(request) if !credit_based => self.reconfigure_classic_from_peer(cid, request),
            Event::LocalConfigRequest(config) if !credit_based => {
                if let Some(ccb) = self.store.get_mut(cid) {
                    ccb.config_done.remove(ConfigDone::INBOUND | ConfigDone::OUTBOUND)
                }

                self.set_state(cid, ChannelState::Config);

                self.local_config_request(cid, config)
            }
            Event::PeerDisconnectRequest { identifier } => {
                if transport == Transport::BrEdr {
                    self.host.request_active_mode(peer)
                }

                self.peer_disconnect(cid, identifier)
            }
            Event::LocalDisconnectRequest => {
                if transport == Transport::BrEdr {
                    self.host.request_active_mode(peer)
                }

                self.disconnect_from_local(cid)
            }
            Event::Timeout if mode == ModeKind::Ertm => self.host.retransmission_timeout(cid),
            Event::AckTimeout if mode == ModeKind::Ertm => self.host.ack_timeout(cid),
            Event::QosViolation => {
                if let Some(upper) = self.upper(psm).and_then(|upper| upper.as_classic()) {
                    upper.qos_violation_ind(peer)
                }
            }
            Event::LinkDisconnected => self.release_and_notify(cid, Completion::DisconnectInd),
            Event::LocalReconfigRequest { mtu, mps } => self.local_reconfig_request(cid, mtu, mps),
            Event::PeerReconfigRequest(request) => self.peer_reconfig_request(cid, request),
            Event::PeerReconfigResponse(result) => self.peer_reconfig_response(cid, result),
            Event::LocalReconfigResponse(result) => self.local_reconfig_response(cid, result),
            Event::ReconfigTimeout => self.reconfig_timeout(cid),
            event => self.unhandled(cid, ChannelState::Open, &event),
        }
    }

    /// The peer started to reconfigure an open classic channel
    ///
    /// A counter proposal keeps the channel within OPEN, the channel only moves to CONFIG once the
    /// request is acceptable.
    fn reconfigure_classic_from_peer(&mut self, cid: DynChannelId, request: ConfigRequest) {
        match self.evaluate_peer_config(cid, &request) {
            Some(Negotiation::Accept) => {
                if let Some(ccb) = self.store.get_mut(cid) {
                    ccb.config_done.remove(ConfigDone::INBOUND)
                }

                self.set_state(cid, ChannelState::Config);

                let timeout = self.config.config_timeout;

                self.arm_state_timer(cid, timeout);

                self.accept_peer_config(cid, request)
            }
            Some(Negotiation::Renegotiate(counter)) => self.counter_peer_config(cid, request.identifier, counter),
            Some(Negotiation::Disconnect) => self.force_disconnect(cid),
            None => (),
        }
    }

    pub(super) fn receive_classic_data(&mut self, cid: DynChannelId, payload: Vec<u8>) {
        let Some((psm, mode)) = self.store.get(cid).map(|ccb| (ccb.psm, ccb.mode())) else {
            return;
        };

        let sdu = match mode {
            ModeKind::Basic => Some(payload),
            _ => self.host.receive(cid, payload),
        };

        if let Some(sdu) = sdu {
            if let Some(upper) = self.upper(psm) {
                upper.data_ind(cid, sdu)
            }
        }
    }

    /// Process a k-frame received on a credit based channel
    ///
    /// A k-frame received without a credit or that breaks the SDU being recombined is a protocol
    /// violation and the channel is disconnected.
    pub(super) fn receive_credit_data(&mut self, cid: DynChannelId, payload: Vec<u8>) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        let received = ccb.credits.as_mut().map_or(Ok(()), |credits| credits.receive_k_frame());

        if let Err(e) = received {
            log::warn!("(L2CAP) {} received a k-frame without a credit ({})", cid, e);

            self.force_disconnect(cid);

            return;
        }

        let psm = ccb.psm;

        let recombined = match ccb.recombiner.as_mut() {
            Some(recombiner) => recombiner.add(&payload),
            None => Ok(Some(payload)),
        };

        match recombined {
            Ok(Some(sdu)) => {
                if let Some(upper) = self.upper(psm) {
                    upper.data_ind(cid, sdu)
                }
            }
            Ok(None) => (),
            Err(e) => {
                log::warn!("(L2CAP) {} received an invalid k-frame ({})", cid, e);

                self.force_disconnect(cid)
            }
        }
    }

    /// Queue a SDU for the output scheduler
    ///
    /// The SDU of a credit based channel is segmented into k-frames here so that every PDU taken
    /// by the scheduler costs exactly one credit.
    pub(super) fn queue_sdu(&mut self, cid: DynChannelId, sdu: Vec<u8>) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        if ccb.is_credit_based() {
            match sdu::segment(&sdu, ccb.peer_cfg.mtu_or(0), ccb.peer_cfg.mps.unwrap_or(0)) {
                Ok(frames) => ccb.tx_queue.extend(frames),
                Err(e) => {
                    log::warn!("(L2CAP) SDU for {} dropped ({})", cid, e);
                    return;
                }
            }
        } else {
            ccb.tx_queue.push_back(sdu)
        }

        self.service_queue(cid)
    }

    pub(super) fn peer_credits(&mut self, cid: DynChannelId, credits: u16) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        let psm = ccb.psm;

        let Some(counter) = ccb.credits.as_mut() else { return };

        match counter.add_peer_credits(credits) {
            Ok(total) => {
                log::trace!("(L2CAP) {} received {} credits, {} available", cid, credits, total);

                if let Some(upper) = self.upper(psm).and_then(|upper| upper.as_credit_based()) {
                    upper.credits_received(cid, credits, total)
                }

                self.service_queue(cid)
            }
            Err(e) => {
                log::warn!("(L2CAP) {} {}", cid, e);

                self.force_disconnect(cid)
            }
        }
    }

    pub(super) fn local_credits(&mut self, cid: DynChannelId, credits: u16) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        let peer = ccb.peer;

        let granted = ccb.credits.as_mut().map_or(0, |counter| counter.add_local_credits(credits));

        if granted == 0 {
            log::debug!("(L2CAP) no credits could be given to the peer of {}", cid);
            return;
        }

        let identifier = self.next_identifier(peer);

        self.send(
            peer,
            Signal::FlowControlCreditIndication {
                identifier,
                local_cid: cid,
                credits: granted,
            },
        )
    }
}
