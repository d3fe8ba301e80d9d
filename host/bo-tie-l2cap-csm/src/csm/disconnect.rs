//! The states of a disconnecting channel

use super::ChannelManager;
use crate::channel::ccb::ChannelState;
use crate::channel::id::DynChannelId;
use crate::event::Event;
use crate::host::Host;
use crate::registry::Completion;
use crate::signals::ConnectionResult;

impl<H: Host> ChannelManager<H> {
    /// Waiting for the peer to answer the disconnection request of this device
    pub(super) fn w4_peer_disconnect_rsp(&mut self, cid: DynChannelId, event: Event) {
        match event {
            Event::PeerDisconnectResponse => {
                self.release_and_notify(cid, Completion::DisconnectCfm(ConnectionResult::Success))
            }
            // both sides asked to disconnect at the same time
            Event::PeerDisconnectRequest { identifier } => {
                if let Some(ccb) = self.store.get_mut(cid) {
                    ccb.remote_id = Some(identifier)
                }

                self.send_disconnect_response(cid);

                self.release_and_notify(cid, Completion::DisconnectCfm(ConnectionResult::Success))
            }
            Event::LinkDisconnected => {
                self.release_and_notify(cid, Completion::DisconnectCfm(ConnectionResult::NoLink))
            }
            Event::Timeout => {
                log::debug!("(L2CAP) peer did not answer the disconnection of {}", cid);

                self.release_and_notify(cid, Completion::DisconnectCfm(ConnectionResult::Timeout))
            }
            Event::PeerData(_) | Event::LocalDataWrite(_) | Event::PeerCredits(_) => {
                log::trace!("(L2CAP) {} is disconnecting, dropped {}", cid, event)
            }
            Event::ReconfigTimeout => self.reconfig_timeout(cid),
            event => self.unhandled(cid, ChannelState::W4PeerDisconnectRsp, &event),
        }
    }

    /// Waiting for the upper layer to acknowledge the disconnection requested by the peer
    ///
    /// The peer is always answered, even when the upper layer does not acknowledge in time.
    pub(super) fn w4_local_disconnect_rsp(&mut self, cid: DynChannelId, event: Event) {
        match event {
            Event::LocalDisconnectResponse | Event::LocalDisconnectRequest => {
                self.send_disconnect_response(cid);

                self.release_and_notify(cid, Completion::Silent)
            }
            Event::Timeout => {
                log::debug!("(L2CAP) upper layer did not acknowledge the disconnection of {}", cid);

                self.send_disconnect_response(cid);

                self.release_and_notify(cid, Completion::Silent)
            }
            Event::LinkDisconnected => self.release_and_notify(cid, Completion::Silent),
            Event::PeerDisconnectRequest { identifier } => {
                if let Some(ccb) = self.store.get_mut(cid) {
                    ccb.remote_id = Some(identifier)
                }
            }
            Event::PeerData(_) | Event::LocalDataWrite(_) | Event::PeerCredits(_) => {
                log::trace!("(L2CAP) {} is disconnecting, dropped {}", cid, event)
            }
            Event::ReconfigTimeout => self.reconfig_timeout(cid),
            event => self.unhandled(cid, ChannelState::W4LocalDisconnectRsp, &event),
        }
    }
}
