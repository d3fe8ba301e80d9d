//! Configuration Negotiation
//!
//! The negotiator evaluates configuration proposals for the channel state machine. It holds no
//! channel state of its own, the number of renegotiation rounds already used on a channel is kept
//! by the channel and passed in.
//!
//! A proposal has three outcomes
//! * *accept*: every option is within the supported bounds and the mode is accepted
//! * *renegotiate*: one or more options are not acceptable but there is a counter proposal that
//!   is. The counter proposal contains only the options that were not acceptable.
//! * *disconnect*: the modes cannot be reconciled (or the renegotiation rounds are exhausted)

use crate::channel::config::{ChannelConfig, ConfigResponse, ConfigResult, FlowControlMode, ModeKind, ModeSet};
use crate::signals::ReconfigResult;

/// The outcome of evaluating a configuration proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    Accept,
    Renegotiate(ChannelConfig),
    Disconnect,
}

/// A credit based reconfiguration proposal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconfigProposal {
    pub mtu: u16,
    pub mps: u16,
    /// The number of channels within the proposal
    pub channel_count: usize,
}

/// Bounds used for evaluating proposals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Negotiator {
    pub min_mtu: u16,
    pub max_mtu: u16,
    pub min_flush_timeout: u16,
    pub max_flush_timeout: u16,
    pub max_renegotiation_rounds: u8,
    pub min_ecfc_mps: u16,
    pub max_credit_mps: u16,
}

impl Default for Negotiator {
    fn default() -> Self {
        Negotiator {
            min_mtu: 48,
            max_mtu: 0xFFFF,
            min_flush_timeout: 0x0001,
            max_flush_timeout: 0xFFFF,
            max_renegotiation_rounds: 2,
            min_ecfc_mps: 64,
            max_credit_mps: 65533,
        }
    }
}

impl Negotiator {
    /// Evaluate a configuration proposal made by the peer
    ///
    /// `allowed` is the set of modes accepted by the registration of the channel and `rounds_used`
    /// is the number of counter proposals already made for the channel.
    pub fn evaluate(&self, proposal: &ChannelConfig, allowed: ModeSet, rounds_used: u8) -> Negotiation {
        let mut counter = ChannelConfig::default();

        if let Some(mtu) = proposal.mtu {
            if mtu < self.min_mtu {
                counter.mtu = Some(self.min_mtu)
            } else if mtu > self.max_mtu {
                counter.mtu = Some(self.max_mtu)
            }
        }

        if let Some(flush_timeout) = proposal.flush_timeout {
            if flush_timeout < self.min_flush_timeout {
                counter.flush_timeout = Some(self.min_flush_timeout)
            } else if flush_timeout > self.max_flush_timeout {
                counter.flush_timeout = Some(self.max_flush_timeout)
            }
        }

        let proposed_mode = proposal.mode_kind();

        if !allowed.contains(proposed_mode) {
            match allowed.preferred_classic() {
                Some(kind) if !proposed_mode.is_credit_based() => {
                    counter.mode = Some(FlowControlMode::default_for(kind))
                }
                _ => return Negotiation::Disconnect,
            }
        }

        if counter.is_empty() {
            Negotiation::Accept
        } else if counter.mode.is_some() && rounds_used >= self.max_renegotiation_rounds {
            Negotiation::Disconnect
        } else {
            Negotiation::Renegotiate(counter)
        }
    }

    /// Try to renegotiate after the peer rejected the configuration request of this device
    ///
    /// A new proposal is returned when the peer rejected the request because of unacceptable
    /// parameters and there is a mode that both the peer's counter proposal and the registration
    /// accept. When the peer did not counter with a mode, a proposal for enhanced retransmission
    /// mode falls back to basic mode (if basic mode is accepted).
    pub fn renegotiate(
        &self,
        rejection: &ConfigResponse,
        ours: &ChannelConfig,
        allowed: ModeSet,
        rounds_used: u8,
    ) -> Option<ChannelConfig> {
        if rejection.result != ConfigResult::UnacceptableParameters || rounds_used >= self.max_renegotiation_rounds {
            return None;
        }

        let current = ours.mode_kind();

        let next = match rejection.config.mode.map(|mode| mode.kind()) {
            Some(kind) if kind != current && allowed.contains(kind) && !kind.is_credit_based() => kind,
            Some(_) => return None,
            None if current == ModeKind::Ertm && allowed.contains(ModeKind::Basic) => ModeKind::Basic,
            None => return None,
        };

        let mut proposal = *ours;

        proposal.mode = match rejection.config.mode {
            Some(mode) if mode.kind() == next => Some(mode),
            _ => Some(FlowControlMode::default_for(next)),
        };

        if let Some(mtu) = rejection.config.mtu {
            proposal.mtu = Some(mtu.clamp(self.min_mtu, self.max_mtu))
        }

        Some(proposal)
    }

    /// Check that both sides of a channel agreed on the same flow control mode
    pub fn modes_agree(&self, ours: &ChannelConfig, peer: &ChannelConfig) -> bool {
        ours.mode_kind() == peer.mode_kind()
    }

    /// Evaluate a credit based reconfiguration request made by the peer
    ///
    /// The MTU of a channel may never be reduced. The MPS may only be reduced when a single channel
    /// is reconfigured, and never below the minimum MPS.
    pub fn evaluate_reconfig(&self, proposal: &ReconfigProposal, current_mtu: u16, current_mps: u16) -> ReconfigResult {
        if proposal.mtu < current_mtu {
            ReconfigResult::MtuReductionNotAllowed
        } else if proposal.mps < self.min_ecfc_mps || proposal.mps > self.max_credit_mps {
            ReconfigResult::UnacceptableParameters
        } else if proposal.mps < current_mps && proposal.channel_count > 1 {
            ReconfigResult::MpsReductionNotAllowed
        } else {
            ReconfigResult::Success
        }
    }
}
