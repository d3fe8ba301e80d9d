//! Reconfiguration of enhanced credit based channels
//!
//! A reconfiguration applies to several channels of a link at once. It is kept by one channel of
//! the reconfiguration (the *owner*), this is the channel that the timer of the reconfiguration is
//! reported to. Every channel of the reconfiguration moves to CONFIG for its duration, but data
//! keeps flowing in the direction not being reconfigured.
//!
//! Only one reconfiguration may be in progress for a channel at a time.

use super::ChannelManager;
use crate::channel::ccb::{Ccb, ChannelState, ConfigDone, ReconfigDirection, Reconfiguration};
use crate::channel::config::ModeKind;
use crate::channel::id::DynChannelId;
use crate::event::PeerReconfig;
use crate::host::Host;
use crate::negotiator::ReconfigProposal;
use crate::registry::Psm;
use crate::signals::{ReconfigResult, Signal};
use alloc::vec::Vec;
use core::num::NonZeroU8;

impl<H: Host> ChannelManager<H> {
    /// Ask the peer to reconfigure the channels connected together with `cid`
    pub(super) fn local_reconfig_request(&mut self, cid: DynChannelId, mtu: u16, mps: u16) {
        let Some(ccb) = self.store.get(cid) else { return };

        if ccb.mode() != ModeKind::EnhancedCreditBased {
            log::warn!("(L2CAP) {} is not an enhanced credit based channel", cid);
            return;
        }

        let (peer, psm) = (ccb.peer, ccb.psm);

        let cids: Vec<DynChannelId> = self
            .store
            .siblings(cid)
            .into_iter()
            .filter(|member| matches!(self.state(*member), Some(ChannelState::Open | ChannelState::Config)))
            .collect();

        if self.reconfiguring(&cids) {
            log::warn!("(L2CAP) reconfiguration of {:?} is already in progress", cids);
            return;
        }

        let proposal = ReconfigProposal {
            mtu,
            mps,
            channel_count: cids.len(),
        };

        let result = self.evaluate_reconfig(&cids, &proposal, |ccb| (ccb.our_cfg.mtu_or(0), ccb.our_cfg.mps.unwrap_or(0)));

        if result != ReconfigResult::Success {
            log::debug!("(L2CAP) local reconfiguration of {:?} refused ({})", cids, result);

            if let Some(upper) = self.upper(psm).and_then(|upper| upper.as_credit_based()) {
                upper.reconfig_cfm(&cids, result)
            }

            return;
        }

        let identifier = self.next_identifier(peer);

        self.enter_reconfig(&cids, ConfigDone::OUTBOUND);

        self.send(
            peer,
            Signal::CreditBasedReconfigureRequest {
                identifier,
                mtu,
                mps,
                local_cids: cids.clone(),
            },
        );

        self.start_reconfig(cid, ReconfigDirection::Outbound, cids, mtu, mps, identifier)
    }

    /// The peer asked to reconfigure the channels of `request`
    ///
    /// The request is answered by this device if it is not acceptable, otherwise the upper layer
    /// is given the reconfiguration indication.
    pub(super) fn peer_reconfig_request(&mut self, cid: DynChannelId, request: PeerReconfig) {
        let Some(ccb) = self.store.get(cid) else { return };

        let (peer, psm) = (ccb.peer, ccb.psm);

        let PeerReconfig {
            identifier,
            mtu,
            mps,
            cids,
        } = request;

        let proposal = ReconfigProposal {
            mtu,
            mps,
            channel_count: cids.len(),
        };

        let result = if self.reconfiguring(&cids) {
            log::warn!("(L2CAP) peer reconfiguration of {:?} collides with another reconfiguration", cids);

            ReconfigResult::UnacceptableParameters
        } else if !self.has_credit_upper(psm) {
            ReconfigResult::UnacceptableParameters
        } else {
            self.evaluate_reconfig(&cids, &proposal, |ccb| (ccb.peer_cfg.mtu_or(0), ccb.peer_cfg.mps.unwrap_or(0)))
        };

        if result != ReconfigResult::Success {
            log::debug!("(L2CAP) peer reconfiguration of {:?} refused ({})", cids, result);

            self.send(peer, Signal::CreditBasedReconfigureResponse { identifier, result });

            return;
        }

        self.enter_reconfig(&cids, ConfigDone::INBOUND);

        if let Some(upper) = self.upper(psm).and_then(|upper| upper.as_credit_based()) {
            upper.reconfig_ind(&cids, mtu)
        }

        self.start_reconfig(cid, ReconfigDirection::Inbound, cids, mtu, mps, identifier)
    }

    /// The peer answered the reconfiguration request of this device
    pub(super) fn peer_reconfig_response(&mut self, cid: DynChannelId, result: ReconfigResult) {
        let Some(reconfig) = self.take_reconfig(cid, ReconfigDirection::Outbound) else {
            log::warn!("(L2CAP) unexpected reconfiguration response for {}", cid);
            return;
        };

        let Some(psm) = self.store.get(cid).map(|ccb| ccb.psm) else { return };

        if result == ReconfigResult::Success {
            for member in reconfig.cids.iter() {
                if let Some(ccb) = self.store.get_mut(*member) {
                    ccb.our_cfg.mtu = Some(reconfig.mtu);

                    ccb.our_cfg.mps = Some(reconfig.mps);

                    if let Some(recombiner) = ccb.recombiner.as_mut() {
                        recombiner.set_limits(reconfig.mtu, reconfig.mps)
                    }
                }
            }
        } else {
            log::debug!("(L2CAP) peer refused the reconfiguration of {:?} ({})", reconfig.cids, result);
        }

        self.finish_reconfig(&reconfig.cids, ConfigDone::OUTBOUND);

        if let Some(upper) = self.upper(psm).and_then(|upper| upper.as_credit_based()) {
            upper.reconfig_cfm(&reconfig.cids, result)
        }
    }

    /// The upper layer answered the reconfiguration indication
    pub(super) fn local_reconfig_response(&mut self, cid: DynChannelId, result: ReconfigResult) {
        let Some(reconfig) = self.take_reconfig(cid, ReconfigDirection::Inbound) else {
            log::warn!("(L2CAP) no reconfiguration of the peer to answer for {}", cid);
            return;
        };

        let Some(peer) = self.store.get(cid).map(|ccb| ccb.peer) else { return };

        if result == ReconfigResult::Success {
            for member in reconfig.cids.iter() {
                if let Some(ccb) = self.store.get_mut(*member) {
                    ccb.peer_cfg.mtu = Some(reconfig.mtu);

                    ccb.peer_cfg.mps = Some(reconfig.mps);
                }
            }
        }

        self.send(
            peer,
            Signal::CreditBasedReconfigureResponse {
                identifier: reconfig.identifier,
                result,
            },
        );

        self.finish_reconfig(&reconfig.cids, ConfigDone::INBOUND)
    }

    /// The reconfiguration timer of `cid` expired
    ///
    /// When the peer did not answer in time every channel of the reconfiguration is disconnected.
    /// When the upper layer did not answer in time the peer is refused and the channels return to
    /// OPEN with their current configuration.
    pub(super) fn reconfig_timeout(&mut self, cid: DynChannelId) {
        let Some(ccb) = self.store.get_mut(cid) else { return };

        let Some(reconfig) = ccb.reconfig.take() else { return };

        let (peer, psm) = (ccb.peer, ccb.psm);

        match reconfig.direction {
            ReconfigDirection::Outbound => {
                log::warn!("(L2CAP) peer did not answer the reconfiguration of {:?}", reconfig.cids);

                if let Some(upper) = self.upper(psm).and_then(|upper| upper.as_credit_based()) {
                    upper.reconfig_cfm(&reconfig.cids, ReconfigResult::Timeout)
                }

                for member in reconfig.cids {
                    if self.store.contains(member) {
                        self.force_disconnect(member)
                    }
                }
            }
            ReconfigDirection::Inbound => {
                log::warn!("(L2CAP) upper layer did not answer the reconfiguration of {:?}", reconfig.cids);

                self.send(
                    peer,
                    Signal::CreditBasedReconfigureResponse {
                        identifier: reconfig.identifier,
                        result: ReconfigResult::UnacceptableParameters,
                    },
                );

                self.finish_reconfig(&reconfig.cids, ConfigDone::INBOUND)
            }
        }
    }

    fn has_credit_upper(&mut self, psm: Psm) -> bool {
        self.upper(psm).and_then(|upper| upper.as_credit_based()).is_some()
    }

    /// Check if any of `cids` is part of a reconfiguration in progress
    fn reconfiguring(&self, cids: &[DynChannelId]) -> bool {
        self.store.iter().any(|ccb| {
            ccb.reconfig
                .as_ref()
                .map_or(false, |reconfig| reconfig.cids.iter().any(|c| cids.contains(c)))
        })
    }

    /// Evaluate `proposal` against the current configuration of every channel
    ///
    /// The first failure is returned.
    fn evaluate_reconfig<F>(&self, cids: &[DynChannelId], proposal: &ReconfigProposal, current: F) -> ReconfigResult
    where
        F: Fn(&Ccb) -> (u16, u16),
    {
        cids.iter()
            .map(|cid| match self.store.get(*cid) {
                Some(ccb) if ccb.mode() == ModeKind::EnhancedCreditBased => {
                    let (mtu, mps) = current(ccb);

                    self.config.negotiator.evaluate_reconfig(proposal, mtu, mps)
                }
                _ => ReconfigResult::InvalidDestinationCid,
            })
            .find(|result| *result != ReconfigResult::Success)
            .unwrap_or(ReconfigResult::Success)
    }

    /// Move the channels of a reconfiguration to CONFIG with the `direction` of configuration
    /// not done
    fn enter_reconfig(&mut self, cids: &[DynChannelId], direction: ConfigDone) {
        for cid in cids.iter().copied() {
            let Some(ccb) = self.store.get_mut(cid) else { continue };

            ccb.config_done.remove(direction);

            if ccb.state == ChannelState::Open {
                self.set_state(cid, ChannelState::Config)
            }
        }
    }

    fn start_reconfig(
        &mut self,
        owner: DynChannelId,
        direction: ReconfigDirection,
        cids: Vec<DynChannelId>,
        mtu: u16,
        mps: u16,
        identifier: NonZeroU8,
    ) {
        let timeout = self.config.config_timeout;

        let Some(ccb) = self.store.get_mut(owner) else { return };

        ccb.reconfig_timer.arm(&mut self.host, timeout);

        ccb.reconfig = Some(Reconfiguration {
            direction,
            cids,
            mtu,
            mps,
            identifier,
        });
    }

    /// Take the reconfiguration in `direction` that channel `cid` is part of
    fn take_reconfig(&mut self, cid: DynChannelId, direction: ReconfigDirection) -> Option<Reconfiguration> {
        let owner = self
            .store
            .iter()
            .find(|ccb| {
                ccb.reconfig
                    .as_ref()
                    .map_or(false, |reconfig| reconfig.direction == direction && reconfig.cids.contains(&cid))
            })
            .map(|ccb| ccb.local_cid())?;

        let ccb = self.store.get_mut(owner)?;

        ccb.reconfig_timer.cancel(&mut self.host);

        ccb.reconfig.take()
    }

    /// Mark the `direction` of configuration done for the channels of a finished reconfiguration
    fn finish_reconfig(&mut self, cids: &[DynChannelId], direction: ConfigDone) {
        for cid in cids.iter().copied() {
            let Some(ccb) = self.store.get_mut(cid) else { continue };

            ccb.config_done.insert(direction);

            let reopen = ccb.state == ChannelState::Config
                && ccb.config_done.contains(ConfigDone::INBOUND)
                && ccb.config_done.contains(ConfigDone::OUTBOUND);

            if reopen {
                self.set_state(cid, ChannelState::Open)
            }

            self.service_queue(cid)
        }
    }
}
