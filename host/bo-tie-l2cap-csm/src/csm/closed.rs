use super::ChannelManager;
use crate::channel::ccb::ChannelState;
use crate::channel::id::DynChannelId;
use crate::event::Event;
use crate::host::{AccessDirection, AccessRequest, Host};
use crate::link::Transport;
use crate::registry::Completion;
use crate::signals::{ConnectionResult, Signal};

impl<H: Host> ChannelManager<H> {
    pub(super) fn closed(&mut self, cid: DynChannelId, event: Event) {
        match event {
            Event::LocalConnectRequest | Event::LinkConnected => self.start_outgoing(cid),
            Event::LinkConnectFailed(result) => self.release_and_notify_group(cid, Completion::ConnectFailed(result)),
            Event::PeerConnectRequest => self.start_incoming(cid),
            Event::LinkDisconnected => self.release_and_notify_group(cid, Completion::DisconnectInd),
            Event::Timeout => {
                self.release_and_notify_group(cid, Completion::ConnectFailed(ConnectionResult::Timeout))
            }
            Event::LocalDisconnectRequest => {
                self.store.leave_group(cid);

                self.release_and_notify(cid, Completion::DisconnectCfm(ConnectionResult::NoLink))
            }
            Event::LocalDataWrite(_) | Event::PeerData(_) => log::warn!("(L2CAP) {} is not connected, data dropped", cid),
            event => self.unhandled(cid, ChannelState::Closed, &event),
        }
    }

    /// Ask security for access to connect the channels connected together with `cid`
    fn start_outgoing(&mut self, cid: DynChannelId) {
        let Some(ccb) = self.store.get(cid) else { return };

        let request = AccessRequest {
            peer: ccb.peer,
            psm: ccb.psm,
            cid,
            transport: ccb.transport,
            direction: AccessDirection::Outgoing,
        };

        if request.transport == Transport::BrEdr {
            self.host.request_active_mode(request.peer);
        }

        self.set_group_state(cid, ChannelState::OrigW4SecComp);

        let timeout = self.config.connect_timeout;

        self.arm_group_timer(cid, timeout);

        self.host.request_access(request);
    }

    /// Ask security for access to accept the channels requested by the peer
    fn start_incoming(&mut self, cid: DynChannelId) {
        let Some(ccb) = self.store.get(cid) else { return };

        let request = AccessRequest {
            peer: ccb.peer,
            psm: ccb.psm,
            cid,
            transport: ccb.transport,
            direction: AccessDirection::Incoming,
        };

        let pending = match (ccb.transport, ccb.remote_id, ccb.remote_cid()) {
            (Transport::BrEdr, Some(identifier), Some(remote_cid)) if !ccb.is_credit_based() => {
                Some(Signal::ConnectionResponse {
                    identifier,
                    local_cid: Some(cid),
                    remote_cid,
                    result: ConnectionResult::Pending,
                })
            }
            _ => None,
        };

        self.host.cancel_idle_timer(request.peer);

        if request.transport == Transport::BrEdr {
            self.host.request_active_mode(request.peer);
        }

        self.set_group_state(cid, ChannelState::TermW4SecComp);

        let timeout = self.config.connect_timeout;

        self.arm_group_timer(cid, timeout);

        self.host.request_access(request);

        if let Some(pending) = pending {
            self.send(request.peer, pending)
        }
    }
}
