//! Channels
//!
//! A channel is represented by its [`Ccb`] (Channel Control Block). Every live control block is
//! owned by the [`CcbStore`] of the [`ChannelManager`].
//!
//! [`ChannelManager`]: crate::ChannelManager

pub mod ccb;
pub mod config;
pub mod id;
pub mod store;

pub use ccb::{Ccb, ChannelState, ConfigDone, GroupId};
pub use store::CcbStore;
