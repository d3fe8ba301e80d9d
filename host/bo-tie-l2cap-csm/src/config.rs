//! Channel State Machine Configuration
//!
//! Every timeout and policy constant used by the [`ChannelManager`] is held in a [`CsmConfig`].
//! The default values are the values recommended by the Bluetooth Specification, a `CsmConfig`
//! with different values is made with a [`CsmConfigBuilder`].
//!
//! ```
//! # use bo_tie_l2cap_csm::CsmConfig;
//! # use core::time::Duration;
//! let config = CsmConfig::builder()
//!     .set_config_timeout(Duration::from_secs(10))
//!     .set_max_ecfc_channels(3)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.max_ecfc_channels, 3);
//! ```
//!
//! [`ChannelManager`]: crate::ChannelManager

use crate::credit::LE_CREDIT_MAX;
use crate::negotiator::Negotiator;
use core::fmt;
use core::time::Duration;

/// The largest number of channels within one enhanced credit based connection request
pub const MAX_ECFC_CHANNELS: usize = 5;

/// Configuration of the channel state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CsmConfig {
    /// Timeout for the connection phase and the security decision
    pub connect_timeout: Duration,
    /// Timeout used after the peer answered with a pending connection response
    pub extended_connect_timeout: Duration,
    /// Timeout for configuration and reconfiguration
    pub config_timeout: Duration,
    pub disconnect_timeout: Duration,
    /// Timeout for a deferred security decision of a channel initiated by the peer
    pub delay_check_timeout: Duration,
    /// Link idle timeout set when the last channel of a link failed security
    pub idle_timeout_after_failure: Duration,
    pub le_credit_max: u16,
    pub ecfc_credit_max: u16,
    pub max_ecfc_channels: usize,
    pub min_le_credit_mtu: u16,
    pub min_le_credit_mps: u16,
    pub min_ecfc_mtu: u16,
    pub negotiator: Negotiator,
}

impl CsmConfig {
    /// Create a builder starting from the default configuration
    pub fn builder() -> CsmConfigBuilder {
        CsmConfigBuilder {
            config: CsmConfig::default(),
        }
    }
}

impl Default for CsmConfig {
    fn default() -> Self {
        CsmConfig {
            connect_timeout: Duration::from_secs(60),
            extended_connect_timeout: Duration::from_secs(60),
            config_timeout: Duration::from_secs(30),
            disconnect_timeout: Duration::from_secs(10),
            delay_check_timeout: Duration::from_secs(3),
            idle_timeout_after_failure: Duration::from_secs(0),
            le_credit_max: LE_CREDIT_MAX,
            ecfc_credit_max: LE_CREDIT_MAX,
            max_ecfc_channels: MAX_ECFC_CHANNELS,
            min_le_credit_mtu: 23,
            min_le_credit_mps: 23,
            min_ecfc_mtu: 64,
            negotiator: Negotiator::default(),
        }
    }
}

/// A value of the configuration is out of its bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundsError {
    ZeroTimeout(&'static str),
    ZeroCreditMax,
    EcfcChannels(usize),
    /// The minimum MTU or MPS is below the value required by the Bluetooth Specification
    BelowSpecificationMinimum(&'static str),
    MinimumAboveMaximum(&'static str),
}

impl fmt::Display for BoundsError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BoundsError::ZeroTimeout(name) => write!(f, "the {name} timeout cannot be zero"),
            BoundsError::ZeroCreditMax => f.write_str("the credit maximum cannot be zero"),
            BoundsError::EcfcChannels(count) => write!(
                f,
                "{count} is not a valid maximum number of channels for a credit based connection \
                (must be within 1..={MAX_ECFC_CHANNELS})"
            ),
            BoundsError::BelowSpecificationMinimum(name) => {
                write!(f, "the {name} is below the minimum value of the Bluetooth Specification")
            }
            BoundsError::MinimumAboveMaximum(name) => write!(f, "the minimum {name} is larger than the maximum"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for BoundsError {}

/// Builder of a [`CsmConfig`]
#[derive(Debug, Clone)]
pub struct CsmConfigBuilder {
    config: CsmConfig,
}

impl CsmConfigBuilder {
    pub fn set_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn set_extended_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.extended_connect_timeout = timeout;
        self
    }

    pub fn set_config_timeout(mut self, timeout: Duration) -> Self {
        self.config.config_timeout = timeout;
        self
    }

    pub fn set_disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.config.disconnect_timeout = timeout;
        self
    }

    pub fn set_delay_check_timeout(mut self, timeout: Duration) -> Self {
        self.config.delay_check_timeout = timeout;
        self
    }

    /// Set the idle timeout given to a link after its last channel failed security
    ///
    /// A zero timeout (the default) disconnects the link immediately.
    pub fn set_idle_timeout_after_failure(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout_after_failure = timeout;
        self
    }

    /// Set the maximum number of credits the peer may give to a LE credit based channel
    pub fn set_le_credit_max(mut self, max: u16) -> Self {
        self.config.le_credit_max = max;
        self
    }

    /// Set the maximum number of credits the peer may give to an enhanced credit based channel
    pub fn set_ecfc_credit_max(mut self, max: u16) -> Self {
        self.config.ecfc_credit_max = max;
        self
    }

    pub fn set_max_ecfc_channels(mut self, max: usize) -> Self {
        self.config.max_ecfc_channels = max;
        self
    }

    /// Set the minimum MTU and MPS accepted for a LE credit based channel
    pub fn set_min_le_credit_parameters(mut self, mtu: u16, mps: u16) -> Self {
        self.config.min_le_credit_mtu = mtu;
        self.config.min_le_credit_mps = mps;
        self
    }

    pub fn set_min_ecfc_mtu(mut self, mtu: u16) -> Self {
        self.config.min_ecfc_mtu = mtu;
        self
    }

    /// Set the bounds used for evaluating configuration proposals
    pub fn set_negotiator(mut self, negotiator: Negotiator) -> Self {
        self.config.negotiator = negotiator;
        self
    }

    /// Set the number of counter proposals made before a configuration is considered incompatible
    pub fn set_max_renegotiation_rounds(mut self, rounds: u8) -> Self {
        self.config.negotiator.max_renegotiation_rounds = rounds;
        self
    }

    /// Build the `CsmConfig`
    ///
    /// # Error
    /// An error is returned if a value is outside of the range allowed by the Bluetooth
    /// Specification or is inconsistent with another value.
    pub fn build(self) -> Result<CsmConfig, BoundsError> {
        let config = self.config;

        for (name, timeout) in [
            ("connect", config.connect_timeout),
            ("extended connect", config.extended_connect_timeout),
            ("configuration", config.config_timeout),
            ("disconnect", config.disconnect_timeout),
            ("delay check", config.delay_check_timeout),
        ] {
            if timeout.is_zero() {
                return Err(BoundsError::ZeroTimeout(name));
            }
        }

        if config.le_credit_max == 0 || config.ecfc_credit_max == 0 {
            return Err(BoundsError::ZeroCreditMax);
        }

        if !(1..=MAX_ECFC_CHANNELS).contains(&config.max_ecfc_channels) {
            return Err(BoundsError::EcfcChannels(config.max_ecfc_channels));
        }

        if config.min_le_credit_mtu < 23 {
            return Err(BoundsError::BelowSpecificationMinimum("LE credit based MTU"));
        }

        if config.min_le_credit_mps < 23 {
            return Err(BoundsError::BelowSpecificationMinimum("LE credit based MPS"));
        }

        if config.min_ecfc_mtu < 64 {
            return Err(BoundsError::BelowSpecificationMinimum("enhanced credit based MTU"));
        }

        let negotiator = &config.negotiator;

        if negotiator.min_mtu < 48 {
            return Err(BoundsError::BelowSpecificationMinimum("classic MTU"));
        }

        if negotiator.min_mtu > negotiator.max_mtu {
            return Err(BoundsError::MinimumAboveMaximum("MTU"));
        }

        if negotiator.min_flush_timeout > negotiator.max_flush_timeout {
            return Err(BoundsError::MinimumAboveMaximum("flush timeout"));
        }

        if negotiator.min_ecfc_mps > negotiator.max_credit_mps || config.min_le_credit_mps > negotiator.max_credit_mps {
            return Err(BoundsError::MinimumAboveMaximum("MPS"));
        }

        Ok(config)
    }
}
