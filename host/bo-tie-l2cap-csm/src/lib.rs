//! L2CAP Channel State Machine
//!
//! This is the channel state machine of the Logical Link Control and Adaption Protocol (L2CAP).
//! It tracks the lifecycle of every dynamic L2CAP channel of a host, from the connection request
//! through configuration, data transfer, and disconnection. Channels may be classic (configured)
//! channels on a BR/EDR link, or credit based channels on either a LE or BR/EDR link.
//!
//! # Channel State Machine
//! The [`ChannelManager`] owns the state of every channel. A channel is driven through nine
//! states by [`Event`]s, which are raised by the peer, the upper layer, the physical link, the
//! security subsystem, and the channel timers. Events are processed one at a time on a single
//! execution context and each event runs to completion.
//!
//! ```text
//!  CLOSED ──> ORIG_W4_SEC_COMP ──> W4_PEER_CONNECT_RSP ───┐
//!     │                                                    ├──> CONFIG <──> OPEN
//!     └────> TERM_W4_SEC_COMP ──> W4_LOCAL_CONNECT_RSP ───┘        │         │
//!                                                                  v         v
//!                                        W4_PEER_DISCONNECT_RSP / W4_LOCAL_DISCONNECT_RSP
//! ```
//!
//! Credit based channels skip CONFIG when they are connected, they only visit it while they are
//! reconfigured.
//!
//! # Collaborators
//! The state machine does not build signaling packets, manage links, decide on security, run
//! timers, or transmit data. These are provided by the host through the traits of the [`host`]
//! module. Every call to a collaborator is fire and forget, its result is delivered back to the
//! `ChannelManager` later as another event.
//!
//! # Upper Layers
//! A service is registered within the [`Registry`] of the manager by its protocol/service
//! multiplexer. The upper layer of the registration receives every indication and confirmation of
//! the channels of the service.

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod channel;
pub mod config;
pub mod credit;
mod csm;
pub mod event;
pub mod host;
pub mod link;
pub mod negotiator;
pub mod registry;
pub mod sdu;
pub mod signals;
pub mod timer;

pub use channel::config::{ChannelConfig, ConfigResponse, ConfigResult, FlowControlMode, ModeKind, ModeSet};
pub use channel::id::DynChannelId;
pub use channel::{Ccb, ChannelState};
pub use config::{CsmConfig, CsmConfigBuilder};
pub use csm::{ChannelError, ChannelManager, ConnectError, WriteError, WriteStatus};
pub use event::{Event, SecurityOutcome, SecurityStatus};
pub use host::Host;
pub use link::{BluetoothDeviceAddress, Transport};
pub use registry::{ClassicUpperLayer, CreditBasedUpperLayer, Psm, Registry, ServiceRecord};
pub use signals::{ConnectionResult, CreditBasedParameters, ReconfigResult, Signal};
