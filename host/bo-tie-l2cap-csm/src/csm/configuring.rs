//! The CONFIG state
//!
//! A classic channel is in CONFIG until both directions of the channel are configured. The
//! inbound direction is done once the upper layer successfully answered the peer's configuration
//! request, the outbound direction is done once the peer successfully answered ours. A credit
//! based channel is only within CONFIG while it is reconfigured.

use super::ChannelManager;
use crate::channel::ccb::{ChannelState, ConfigDone};
use crate::channel::config::{ChannelConfig, ConfigRequest, ConfigResponse, ConfigResult, ModeKind, ModeSet};
use crate::channel::id::DynChannelId;
use crate::event::Event;
use crate::host::Host;
use crate::negotiator::Negotiation;
use crate::registry::Completion;
use crate::signals::Signal;
use core::num::NonZeroU8;

impl<H: Host> ChannelManager<H> {
    pub(super) fn configuring(&mut self, cid: DynChannelId, event: Event) {
        let Some(ccb) = self.store.get(cid) else { return };

        let credit_based = ccb.is_credit_based();

        let reconfigured = ccb.config_done.contains(ConfigDone::RECONFIG);

        match event {
            Event::PeerConfigRequest(request) if !credit_based => match self.evaluate_peer_config(cid, &request) {
                Some(Negotiation::Accept) => self.accept_peer_config(cid, request),
                Some(Negotiation::Renegotiate(counter)) => self.counter_peer_config(cid, request.identifier, counter),
                Some(Negotiation::Disconnect) => self.force_disconnect(cid),
                None => (),
            },
            Event::PeerConfigResponse(response) if !credit_based => self.peer_config_response(cid, response),
            Event::LocalConfigRequest(config) if !credit_based => self.local_config_request(cid, config),
            Event::LocalConfigResponse(response) if !credit_based => self.local_config_response(cid, response),
            Event::PeerDisconnectRequest { identifier } => self.peer_disconnect(cid, identifier),
            Event::LocalDisconnectRequest => self.disconnect_from_local(cid),
            Event::PeerData(payload) if credit_based => self.receive_credit_data(cid, payload),
            Event::PeerData(payload) if reconfigured => self.receive_classic_data(cid, payload),
            Event::PeerData(_) => log::warn!("(L2CAP) {} is not configured, data dropped", cid),
            Event::LocalDataWrite(sdu) => self.queue_sdu(cid, sdu),
            Event::PeerCredits(credits) if credit_based => self.peer_credits(cid, credits),
            Event::LocalSendCredits(credits) if credit_based => self.local_credits(cid, credits),
            Event::LocalReconfigRequest { mtu, mps } => self.local_reconfig_request(cid, mtu, mps),
            Event::PeerReconfigRequest(request) => self.peer_reconfig_request(cid, request),
            Event::PeerReconfigResponse(result) => self.peer_reconfig_response(cid, result),
            Event::LocalReconfigResponse(result) => self.local_reconfig_response(cid, result),
            Event::ReconfigTimeout => self.reconfig_timeout(cid),
            Event::Timeout => {
                log::warn!("(L2CAP) configuration of {} timed out", cid);

                self.force_disconnect(cid)
            }
            Event::LinkDisconnected => self.release_and_notify(cid, Completion::DisconnectInd),
            event => self.unhandled(cid, ChannelState::Config, &event),
        }
    }

    /// Evaluate the configuration request of the peer against the registration of the channel
    pub(super) fn evaluate_peer_config(&self, cid: DynChannelId, request: &ConfigRequest) -> Option<Negotiation> {
        let ccb = self.store.get(cid)?;

        let allowed = self
            .registry
            .get(ccb.psm)
            .map_or(ModeSet::from(ModeKind::Basic), |record| record.modes());

        Some(
            self.config
                .negotiator
                .evaluate(&request.config, allowed, ccb.renegotiation_rounds),
        )
    }

    /// Take the options of the peer's configuration request and indicate them to the upper layer
    pub(super) fn accept_peer_config(&mut self, cid: DynChannelId, request: ConfigRequest) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        ccb.peer_cfg.merge(&request.config);

        ccb.remote_id = Some(request.identifier);

        let psm = ccb.psm;

        if let Some(upper) = self.upper(psm).and_then(|upper| upper.as_classic()) {
            upper.config_ind(cid, &request.config)
        }
    }

    /// Answer the configuration request of the peer with a counter proposal
    pub(super) fn counter_peer_config(&mut self, cid: DynChannelId, identifier: NonZeroU8, counter: ChannelConfig) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        ccb.renegotiation_rounds = ccb.renegotiation_rounds.saturating_add(1);

        ccb.remote_id = Some(identifier);

        let Some(remote_cid) = ccb.remote_cid() else { return };

        let peer = ccb.peer;

        log::debug!("(L2CAP) countering the configuration request for {}", cid);

        self.send(
            peer,
            Signal::ConfigurationResponse {
                identifier,
                remote_cid,
                result: ConfigResult::UnacceptableParameters,
                continuation: false,
                config: counter,
            },
        )
    }

    fn peer_config_response(&mut self, cid: DynChannelId, response: ConfigResponse) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        let psm = ccb.psm;

        match response.result {
            ConfigResult::Success | ConfigResult::Pending => {
                ccb.our_cfg.merge(&response.config);

                if !response.is_intermediate() {
                    ccb.config_done.insert(ConfigDone::OUTBOUND);

                    if !ccb.config_done.contains(ConfigDone::INBOUND) {
                        self.service_queue(cid)
                    } else if !self.complete_configuration(cid) {
                        return;
                    }
                }

                if let Some(upper) = self.upper(psm).and_then(|upper| upper.as_classic()) {
                    upper.config_cfm(cid, &response)
                }
            }
            _ => {
                self.cancel_state_timer(cid);

                self.renegotiate(cid, &response)
            }
        }
    }

    /// Send a new configuration request after the peer rejected ours
    ///
    /// The channel is disconnected when the negotiation cannot continue.
    fn renegotiate(&mut self, cid: DynChannelId, rejection: &ConfigResponse) {
        let Some(ccb) = self.store.get(cid) else { return };

        let allowed = self
            .registry
            .get(ccb.psm)
            .map_or(ModeSet::from(ModeKind::Basic), |record| record.modes());

        let proposal =
            self.config
                .negotiator
                .renegotiate(rejection, &ccb.our_cfg, allowed, ccb.renegotiation_rounds);

        let Some(proposal) = proposal else {
            log::warn!("(L2CAP) peer rejected the configuration of {} ({:?})", cid, rejection.result);

            self.force_disconnect(cid);

            return;
        };

        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.renegotiation_rounds = ccb.renegotiation_rounds.saturating_add(1);

            ccb.our_cfg = proposal;
        }

        self.send_config_request(cid)
    }

    /// Merge `config` into the configuration of this device and send it to the peer
    pub(super) fn local_config_request(&mut self, cid: DynChannelId, config: ChannelConfig) {
        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.our_cfg.merge(&config);
        }

        self.send_config_request(cid)
    }

    fn send_config_request(&mut self, cid: DynChannelId) {
        let Some((peer, remote_cid)) = self.store.get(cid).and_then(|ccb| Some((ccb.peer, ccb.remote_cid()?))) else {
            return;
        };

        let identifier = self.next_identifier(peer);

        let Some(ccb) = self.store.get_mut(cid) else { return };

        ccb.local_id = Some(identifier);

        let config = ccb.our_cfg;

        self.send(
            peer,
            Signal::ConfigurationRequest {
                identifier,
                remote_cid,
                config,
            },
        );

        let timeout = self.config.config_timeout;

        self.arm_state_timer(cid, timeout)
    }

    fn local_config_response(&mut self, cid: DynChannelId, response: ConfigResponse) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        let (Some(identifier), Some(remote_cid)) = (ccb.remote_id, ccb.remote_cid()) else {
            log::warn!("(L2CAP) no configuration request of the peer to answer for {}", cid);
            return;
        };

        let peer = ccb.peer;

        let completes = !response.is_intermediate() && response.result == ConfigResult::Success;

        if completes {
            ccb.config_done.insert(ConfigDone::INBOUND);
        }

        let outbound_done = ccb.config_done.contains(ConfigDone::OUTBOUND);

        let signal = Signal::ConfigurationResponse {
            identifier,
            remote_cid,
            result: response.result,
            continuation: response.continuation,
            config: response.config,
        };

        self.send(peer, signal);

        if response.is_intermediate() {
            return;
        }

        if !completes {
            let timeout = self.config.config_timeout;

            self.arm_state_timer(cid, timeout);

            return;
        }

        if outbound_done && !self.complete_configuration(cid) {
            return;
        }

        self.service_queue(cid)
    }

    /// Move a classic channel with both directions configured to OPEN
    ///
    /// False is returned if the channel was disconnected because the two directions did not agree
    /// on the flow control mode.
    fn complete_configuration(&mut self, cid: DynChannelId) -> bool {
        let Some(ccb) = self.store.get_mut(cid) else { return false };

        if !self.config.negotiator.modes_agree(&ccb.our_cfg, &ccb.peer_cfg) {
            log::warn!(
                "(L2CAP) {} configured with {} but the peer uses {}",
                cid,
                ccb.our_cfg.mode_kind(),
                ccb.peer_cfg.mode_kind()
            );

            self.force_disconnect(cid);

            return false;
        }

        ccb.config_done.insert(ConfigDone::RECONFIG);

        let ack_timeout = match ccb.mode() {
            ModeKind::Ertm if self.host.awaiting_ack(cid) => ccb.ack_timeout,
            _ => None,
        };

        self.cancel_state_timer(cid);

        self.set_state(cid, ChannelState::Open);

        if let (Some(timeout), Some(ccb)) = (ack_timeout, self.store.get_mut(cid)) {
            ccb.ack_timer.arm(&mut self.host, timeout)
        }

        self.service_queue(cid);

        true
    }

    /// The peer asked to disconnect the channel
    ///
    /// The upper layer must acknowledge the disconnection with a disconnect response.
    pub(super) fn peer_disconnect(&mut self, cid: DynChannelId, identifier: NonZeroU8) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        ccb.remote_id = Some(identifier);

        let psm = ccb.psm;

        self.set_state(cid, ChannelState::W4LocalDisconnectRsp);

        let timeout = self.config.disconnect_timeout;

        self.arm_state_timer(cid, timeout);

        if let Some(upper) = self.upper(psm) {
            upper.disconnect_ind(cid, true)
        }
    }
}
