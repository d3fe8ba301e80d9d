//! The Channel State Machine
//!
//! The [`ChannelManager`] owns every channel of every link and drives each channel through its
//! states. All input to a channel is an [`Event`], events are processed one at a time and each
//! event runs to completion before the next one is processed. A handler never dispatches another
//! event, anything a handler needs to happen to a sibling channel is done directly by the handler.
//!
//! Before an event reaches the handler for the state of its channel, the channel must be *live*.
//! A channel is live while its control block is within the store and the link it belongs to still
//! exists. Events for channels that are not live are logged and dropped.
//!
//! The manager never calls anything but the [`Host`] and the upper layers of the registry. Timers
//! are reported back through [`timer_expired`], the output scheduler drains queued PDUs through
//! [`take_pdu`].
//!
//! [`timer_expired`]: ChannelManager::timer_expired
//! [`take_pdu`]: ChannelManager::take_pdu

mod closed;
mod configuring;
mod connect;
mod disconnect;
mod error;
mod open;
mod reconfig;
mod security;

pub use error::{ChannelError, ConnectError, WriteError, WriteStatus};

use crate::channel::ccb::{Ccb, ChannelState, GroupId};
use crate::channel::config::{ChannelConfig, FlowControlMode, ModeKind, ModeSet};
use crate::channel::id::DynChannelId;
use crate::channel::store::{CcbStore, GroupStatus};
use crate::config::CsmConfig;
use crate::credit::CreditCounter;
use crate::event::{Event, PeerReconfig, SecurityOutcome};
use crate::host::Host;
use crate::link::{BluetoothDeviceAddress, LinkContext, LinkState, Transport};
use crate::registry::{Completion, Psm, Registry, ServiceRecord, UpperLayer};
use crate::signals::{ConnectionResult, CreditBasedParameters, ReconfigResult, Signal};
use crate::timer::{TimerKind, TimerToken};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use core::num::NonZeroU8;
use core::time::Duration;

/// The channel state machine
///
/// A `ChannelManager` is the only owner of the channels, links, and registrations of the host.
/// It is driven by the methods for the link (`link_*`), the upper layer (channel operations such
/// as [`connect`] and [`write`]), the peer (`peer_*` and [`dispatch`]), and the collaborators of
/// the [`Host`] ([`security_complete`], [`timer_expired`], and [`take_pdu`]).
///
/// [`connect`]: ChannelManager::connect
/// [`write`]: ChannelManager::write
/// [`dispatch`]: ChannelManager::dispatch
/// [`security_complete`]: ChannelManager::security_complete
/// [`timer_expired`]: ChannelManager::timer_expired
/// [`take_pdu`]: ChannelManager::take_pdu
pub struct ChannelManager<H> {
    config: CsmConfig,
    host: H,
    registry: Registry,
    links: BTreeMap<BluetoothDeviceAddress, LinkContext>,
    store: CcbStore,
}

impl<H: Host> ChannelManager<H> {
    pub fn new(config: CsmConfig, host: H) -> Self {
        ChannelManager {
            config,
            host,
            registry: Registry::new(),
            links: BTreeMap::new(),
            store: CcbStore::default(),
        }
    }

    pub fn config(&self) -> &CsmConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Get the registry for registering and unregistering services
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Get the context of the link to `address`
    pub fn link(&self, address: BluetoothDeviceAddress) -> Option<&LinkContext> {
        self.links.get(&address)
    }

    /// Get the state of a channel
    ///
    /// `None` is returned if the channel is released.
    pub fn state(&self, cid: DynChannelId) -> Option<ChannelState> {
        self.store.get(cid).map(|ccb| ccb.state())
    }

    /// Get the control block of a channel
    pub fn ccb(&self, cid: DynChannelId) -> Option<&Ccb> {
        self.store.get(cid)
    }

    /// Check if the channel is live
    ///
    /// A channel is live when it is not released and its link still exists.
    pub fn is_live(&self, cid: DynChannelId) -> bool {
        self.live_state(cid).is_some()
    }

    /// Process an event for channel `cid`
    ///
    /// This is used for the signals of the peer that are addressed to an existing channel. The
    /// event is dropped if the channel is not live or the event is not expected in the current
    /// state of the channel.
    pub fn dispatch(&mut self, cid: DynChannelId, event: Event) {
        let Some(state) = self.live_state(cid) else {
            log::warn!("(L2CAP) dropped {} for {}, the channel is not live", event, cid);
            return;
        };

        log::trace!("(L2CAP) {} received {} in state {}", cid, event, state);

        match state {
            ChannelState::Closed => self.closed(cid, event),
            ChannelState::OrigW4SecComp => self.orig_w4_sec_comp(cid, event),
            ChannelState::TermW4SecComp => self.term_w4_sec_comp(cid, event),
            ChannelState::W4PeerConnectRsp => self.w4_peer_connect_rsp(cid, event),
            ChannelState::W4LocalConnectRsp => self.w4_local_connect_rsp(cid, event),
            ChannelState::Config => self.configuring(cid, event),
            ChannelState::Open => self.open(cid, event),
            ChannelState::W4PeerDisconnectRsp => self.w4_peer_disconnect_rsp(cid, event),
            ChannelState::W4LocalDisconnectRsp => self.w4_local_disconnect_rsp(cid, event),
        }
    }

    fn live_state(&self, cid: DynChannelId) -> Option<ChannelState> {
        self.store
            .get(cid)
            .filter(|ccb| self.links.contains_key(&ccb.peer))
            .map(|ccb| ccb.state())
    }

    /// Check that the upper layer may still operate on channel `cid`
    fn check_live(&self, cid: DynChannelId) -> Result<&Ccb, ChannelError> {
        self.store
            .get(cid)
            .filter(|ccb| !ccb.detached && self.links.contains_key(&ccb.peer))
            .ok_or(ChannelError::NotLive(cid))
    }

    fn link_channels(&self, address: BluetoothDeviceAddress) -> Vec<DynChannelId> {
        self.links
            .get(&address)
            .map(|link| link.channels().to_vec())
            .unwrap_or_default()
    }
}

/// Link events
impl<H: Host> ChannelManager<H> {
    /// The physical link to `address` is connected
    ///
    /// Every channel waiting on this link to connect continues with its connection. On a BR/EDR
    /// link, connection requests are deferred until [`info_response_received`] is called.
    ///
    /// [`info_response_received`]: ChannelManager::info_response_received
    pub fn link_connected(&mut self, address: BluetoothDeviceAddress, transport: Transport) {
        let link = self
            .links
            .entry(address)
            .or_insert_with(|| LinkContext::new(address, transport, LinkState::Connecting));

        if link.state() == LinkState::Connected {
            log::warn!("(L2CAP) link to {} is already connected", address);

            return;
        }

        link.set_state(LinkState::Connected);

        if link.transport() == Transport::BrEdr {
            link.set_waiting_for_info_rsp(true);
        }

        log::debug!("(L2CAP) link to {} connected over {}", address, link.transport());

        for cid in self.link_channels(address) {
            if self.state(cid) == Some(ChannelState::Closed) {
                self.dispatch(cid, Event::LinkConnected)
            }
        }
    }

    /// The physical link to `address` could not be connected
    pub fn link_connect_failed(&mut self, address: BluetoothDeviceAddress, status: ConnectionResult) {
        log::debug!("(L2CAP) link to {} failed to connect ({})", address, status);

        for cid in self.link_channels(address) {
            match self.state(cid) {
                Some(ChannelState::Closed) => self.dispatch(cid, Event::LinkConnectFailed(status)),
                Some(_) => self.dispatch(cid, Event::LinkDisconnected),
                None => (),
            }
        }

        self.links.remove(&address);
    }

    /// The physical link to `address` was disconnected
    ///
    /// Every channel of the link is released.
    pub fn link_disconnected(&mut self, address: BluetoothDeviceAddress) {
        log::debug!("(L2CAP) link to {} disconnected", address);

        for cid in self.link_channels(address) {
            if self.store.contains(cid) {
                self.dispatch(cid, Event::LinkDisconnected)
            }
        }

        if let Some(link) = self.links.remove(&address) {
            // every state releases its channel on link loss
            debug_assert!(link.channels().is_empty(), "channels left on a removed link");
        }
    }

    /// The information response of the peer was received
    ///
    /// `modes` are the flow control modes within the peer's extended feature mask.
    pub fn info_response_received(&mut self, address: BluetoothDeviceAddress, modes: ModeSet) {
        let Some(link) = self.links.get_mut(&address) else {
            log::warn!("(L2CAP) information response for unknown link {}", address);
            return;
        };

        link.set_waiting_for_info_rsp(false);

        link.set_peer_modes(modes);

        for cid in self.link_channels(address) {
            if self.store.get(cid).map_or(false, |ccb| ccb.deferred_by_info) {
                self.dispatch(cid, Event::InfoResponse)
            }
        }
    }

    /// The quality of service of the link to `address` was violated
    pub fn qos_violation(&mut self, address: BluetoothDeviceAddress) {
        for cid in self.link_channels(address) {
            if self.state(cid) == Some(ChannelState::Open) {
                self.dispatch(cid, Event::QosViolation)
            }
        }
    }
}

/// Channel operations of the upper layer
impl<H: Host> ChannelManager<H> {
    /// Connect a new channel to the peer at `address`
    ///
    /// A classic channel is connected over a BR/EDR link and a LE credit based channel is
    /// connected over a LE link, which one is determined by the registration of `psm`. If there is
    /// no link to the peer, the link is created with `transport`. The result of the connection is
    /// reported through the `connect_cfm` callback of the upper layer.
    pub fn connect(
        &mut self,
        address: BluetoothDeviceAddress,
        transport: Transport,
        psm: Psm,
    ) -> Result<DynChannelId, ConnectError> {
        let transport = self.link_transport(address, transport)?;

        let record = self.registry.get(psm).ok_or(ConnectError::PsmNotRegistered(psm))?;

        let (mode, our_cfg, initial_credits) = match (transport, record.credit_parameters()) {
            (Transport::Le, Some(parameters)) if record.modes().contains(ModeKind::LeCreditBased) => (
                ModeKind::LeCreditBased,
                credit_config(ModeKind::LeCreditBased, parameters),
                Some(parameters.initial_credits),
            ),
            (Transport::BrEdr, None) => {
                let proposal = record.classic_proposal();

                (proposal.mode_kind(), proposal, None)
            }
            _ => return Err(ConnectError::WrongRegistration(psm)),
        };

        let cid = self
            .store
            .create(address, transport, psm, mode)
            .ok_or(ConnectError::NoChannelIdentifiers)?;

        let credit_max = self.config.le_credit_max;

        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.our_cfg = our_cfg;

            ccb.credits = initial_credits.and_then(|local| CreditCounter::new(local, 0, credit_max).ok());
        }

        log::debug!("(L2CAP) connecting {} to {} for {}", cid, address, psm);

        self.begin_outgoing(address, transport, &[cid]);

        Ok(cid)
    }

    /// Connect `count` enhanced credit based channels to the peer at `address`
    ///
    /// The channels are connected together, the result is reported through a single
    /// `connect_cfm` callback containing every channel.
    pub fn ecfc_connect(
        &mut self,
        address: BluetoothDeviceAddress,
        transport: Transport,
        psm: Psm,
        count: usize,
    ) -> Result<Vec<DynChannelId>, ConnectError> {
        if count == 0 || count > self.config.max_ecfc_channels {
            return Err(ConnectError::ChannelCount(count));
        }

        let transport = self.link_transport(address, transport)?;

        let record = self.registry.get(psm).ok_or(ConnectError::PsmNotRegistered(psm))?;

        let parameters = match record.credit_parameters() {
            Some(parameters) if record.modes().contains(ModeKind::EnhancedCreditBased) => parameters,
            _ => return Err(ConnectError::WrongRegistration(psm)),
        };

        let mut cids = Vec::with_capacity(count);

        for _ in 0..count {
            match self
                .store
                .create(address, transport, psm, ModeKind::EnhancedCreditBased)
            {
                Some(cid) => cids.push(cid),
                None => {
                    cids.into_iter().for_each(|cid| {
                        self.store.remove(cid);
                    });

                    return Err(ConnectError::NoChannelIdentifiers);
                }
            }
        }

        let credit_max = self.config.ecfc_credit_max;

        for cid in cids.iter() {
            if let Some(ccb) = self.store.get_mut(*cid) {
                ccb.our_cfg = credit_config(ModeKind::EnhancedCreditBased, parameters);

                ccb.credits = CreditCounter::new(parameters.initial_credits, 0, credit_max).ok();
            }
        }

        self.store
            .new_group(cids.iter().copied().map(Some).collect(), NonZeroU8::MIN, 0);

        log::debug!("(L2CAP) connecting {} channels to {} for {}", count, address, psm);

        self.begin_outgoing(address, transport, &cids);

        Ok(cids)
    }

    /// Answer the connection indication for channel `cid`
    ///
    /// For an enhanced credit based connection this answers for every channel of the connection.
    /// Use [`ecfc_connect_response`] to only accept some of the channels.
    ///
    /// [`ecfc_connect_response`]: ChannelManager::ecfc_connect_response
    pub fn connect_response(&mut self, cid: DynChannelId, result: ConnectionResult) -> Result<(), ChannelError> {
        self.check_live(cid)?;

        self.dispatch(cid, Event::LocalConnectResponse(result));

        Ok(())
    }

    /// Answer the connection indication of an enhanced credit based connection
    ///
    /// When `result` is success only the channels within `accepted` are connected, every other
    /// channel of the connection is refused.
    pub fn ecfc_connect_response(
        &mut self,
        accepted: &[DynChannelId],
        result: ConnectionResult,
    ) -> Result<(), ChannelError> {
        let first = *accepted.first().ok_or(ChannelError::NoChannels)?;

        let state = self.check_live(first)?.state();

        if state != ChannelState::W4LocalConnectRsp {
            return Err(ChannelError::WrongState(first, state));
        }

        let group_id = self.store.get(first).and_then(|ccb| ccb.group).ok_or(ChannelError::NotGrouped(first))?;

        if result.is_success() {
            let refused: Vec<DynChannelId> = self
                .store
                .group(group_id)
                .map(|group| group.members.iter().filter(|cid| !accepted.contains(cid)).copied().collect())
                .unwrap_or_default();

            for cid in refused.iter() {
                log::debug!("(L2CAP) upper layer refused {}", cid);

                self.store.leave_group(*cid);

                self.release(*cid);
            }

            if let Some(group) = self.store.group_mut(group_id) {
                if !refused.is_empty() && group.result.is_success() {
                    group.result = ConnectionResult::SomeConnectionsRefused
                }
            }
        }

        self.dispatch(first, Event::LocalConnectResponse(result));

        Ok(())
    }

    /// Send a configuration request for a classic channel
    ///
    /// The options of `config` are merged into the configuration currently proposed for the
    /// channel.
    pub fn config_request(&mut self, cid: DynChannelId, config: ChannelConfig) -> Result<(), ChannelError> {
        self.check_classic(cid)?;

        self.dispatch(cid, Event::LocalConfigRequest(config));

        Ok(())
    }

    /// Answer the configuration indication of a classic channel
    pub fn config_response(
        &mut self,
        cid: DynChannelId,
        response: crate::channel::config::ConfigResponse,
    ) -> Result<(), ChannelError> {
        self.check_classic(cid)?;

        self.dispatch(cid, Event::LocalConfigResponse(response));

        Ok(())
    }

    /// Disconnect a channel
    ///
    /// The result is reported through the `disconnect_cfm` callback of the upper layer.
    pub fn disconnect(&mut self, cid: DynChannelId) -> Result<(), ChannelError> {
        self.check_live(cid)?;

        self.dispatch(cid, Event::LocalDisconnectRequest);

        Ok(())
    }

    /// Acknowledge a disconnect indication that needed a response
    pub fn disconnect_response(&mut self, cid: DynChannelId) -> Result<(), ChannelError> {
        self.check_live(cid)?;

        self.dispatch(cid, Event::LocalDisconnectResponse);

        Ok(())
    }

    /// Write a SDU to a channel
    ///
    /// The SDU is queued for the output scheduler. SDUs written while the channel is configuring
    /// are held until the configuration allows them to be sent.
    pub fn write(&mut self, cid: DynChannelId, sdu: Vec<u8>) -> Result<WriteStatus, WriteError> {
        let ccb = self.check_live(cid).map_err(|_| WriteError::NotLive(cid))?;

        match ccb.state() {
            ChannelState::Config | ChannelState::Open => (),
            state => return Err(WriteError::NotConnected(state)),
        }

        let mtu = ccb.peer_cfg.mtu_or(ServiceRecord::DEFAULT_CLASSIC_MTU);

        if sdu.len() > usize::from(mtu) {
            return Err(WriteError::SduTooLarge { len: sdu.len(), mtu });
        }

        self.dispatch(cid, Event::LocalDataWrite(sdu));

        match self.store.get(cid) {
            Some(ccb) if ccb.congested => Ok(WriteStatus::Congested),
            _ => Ok(WriteStatus::Queued),
        }
    }

    /// Give `credits` to the peer for sending k-frames on a credit based channel
    pub fn send_credits(&mut self, cid: DynChannelId, credits: u16) -> Result<(), ChannelError> {
        let ccb = self.check_live(cid)?;

        if !ccb.is_credit_based() {
            return Err(ChannelError::WrongMode(cid, ccb.mode()));
        }

        self.dispatch(cid, Event::LocalSendCredits(credits));

        Ok(())
    }

    /// Reconfigure the channels of the enhanced credit based connection of `cid`
    pub fn reconfigure(&mut self, cid: DynChannelId, mtu: u16, mps: u16) -> Result<(), ChannelError> {
        self.check_ecfc(cid)?;

        self.dispatch(cid, Event::LocalReconfigRequest { mtu, mps });

        Ok(())
    }

    /// Answer the reconfiguration indication of an enhanced credit based connection
    pub fn reconfigure_response(&mut self, cid: DynChannelId, result: ReconfigResult) -> Result<(), ChannelError> {
        self.check_ecfc(cid)?;

        self.dispatch(cid, Event::LocalReconfigResponse(result));

        Ok(())
    }

    fn check_classic(&self, cid: DynChannelId) -> Result<(), ChannelError> {
        let ccb = self.check_live(cid)?;

        if ccb.is_credit_based() {
            Err(ChannelError::WrongMode(cid, ccb.mode()))
        } else {
            Ok(())
        }
    }

    fn check_ecfc(&self, cid: DynChannelId) -> Result<(), ChannelError> {
        let ccb = self.check_live(cid)?;

        if ccb.mode() == ModeKind::EnhancedCreditBased {
            Ok(())
        } else {
            Err(ChannelError::WrongMode(cid, ccb.mode()))
        }
    }

    fn link_transport(&self, address: BluetoothDeviceAddress, transport: Transport) -> Result<Transport, ConnectError> {
        match self.links.get(&address) {
            Some(link) if link.state() == LinkState::Disconnecting => Err(ConnectError::LinkDisconnecting),
            Some(link) => Ok(link.transport()),
            None => Ok(transport),
        }
    }

    /// Start the connection of the new channels `cids`
    ///
    /// The link is created if it does not exist. The channels wait in CLOSED until the link is
    /// connected.
    fn begin_outgoing(&mut self, address: BluetoothDeviceAddress, transport: Transport, cids: &[DynChannelId]) {
        if !self.links.contains_key(&address) {
            log::debug!("(L2CAP) creating link to {}", address);

            self.links
                .insert(address, LinkContext::new(address, transport, LinkState::Connecting));

            self.host.create_connection(address, transport);
        }

        let connected = match self.links.get_mut(&address) {
            Some(link) => {
                cids.iter().for_each(|cid| link.add_channel(*cid));

                link.state() == LinkState::Connected
            }
            None => false,
        };

        if connected {
            if let Some(first) = cids.first() {
                self.dispatch(*first, Event::LocalConnectRequest)
            }
        } else {
            let timeout = self.config.connect_timeout;

            cids.iter().for_each(|cid| self.arm_state_timer(*cid, timeout));
        }
    }
}

/// Signals of the peer that create channels
impl<H: Host> ChannelManager<H> {
    /// Process a connection request of the peer
    ///
    /// A new channel is created unless the request is refused, in which case the connection
    /// response is sent before this returns.
    pub fn peer_connect_request(
        &mut self,
        address: BluetoothDeviceAddress,
        identifier: NonZeroU8,
        psm: u16,
        remote_cid: u16,
    ) -> Option<DynChannelId> {
        if !self.link_is_connected(address) {
            log::warn!("(L2CAP) connection request from {} without a connected link", address);

            return None;
        }

        let Ok(remote_cid) = DynChannelId::new_acl(remote_cid) else {
            log::warn!("(L2CAP) connection request with invalid source CID 0x{:04x}", remote_cid);

            return None;
        };

        let reject = |result| Signal::ConnectionResponse {
            identifier,
            local_cid: None,
            remote_cid,
            result,
        };

        let record = Psm::try_new_classic(psm)
            .ok()
            .and_then(|psm| self.registry.get(psm))
            .filter(|record| !record.is_credit_based());

        let Some(record) = record else {
            log::debug!("(L2CAP) connection request for unsupported PSM 0x{:04x}", psm);

            self.send(address, reject(ConnectionResult::PsmNotSupported));

            return None;
        };

        let (psm, proposal) = (record.psm(), record.classic_proposal());

        if self.store.find_remote(address, remote_cid).is_some() {
            self.send(address, reject(ConnectionResult::SourceCidAlreadyAllocated));

            return None;
        }

        let Some(cid) = self.store.create(address, Transport::BrEdr, psm, proposal.mode_kind()) else {
            self.send(address, reject(ConnectionResult::NoResources));

            return None;
        };

        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.assign_remote_cid(remote_cid);

            ccb.remote_id = Some(identifier);

            ccb.our_cfg = proposal;
        }

        self.accept_incoming(address, cid);

        Some(cid)
    }

    /// Process a LE credit based connection request of the peer
    pub fn peer_le_connect_request(
        &mut self,
        address: BluetoothDeviceAddress,
        identifier: NonZeroU8,
        spsm: u16,
        remote_cid: u16,
        parameters: CreditBasedParameters,
    ) -> Option<DynChannelId> {
        if !self.link_is_connected(address) {
            log::warn!("(L2CAP) LE credit based connection request from {} without a connected link", address);

            return None;
        }

        let reject = |result| Signal::LeCreditBasedConnectionResponse {
            identifier,
            local_cid: None,
            parameters: CreditBasedParameters::default(),
            result,
        };

        let record = Psm::try_new_le(spsm)
            .ok()
            .and_then(|psm| self.registry.get(psm))
            .filter(|record| record.modes().contains(ModeKind::LeCreditBased));

        let Some((psm, ours)) = record.and_then(|record| Some((record.psm(), record.credit_parameters()?))) else {
            self.send(address, reject(ConnectionResult::PsmNotSupported));

            return None;
        };

        let Ok(remote_cid) = DynChannelId::new_le(remote_cid) else {
            self.send(address, reject(ConnectionResult::InvalidSourceCid));

            return None;
        };

        if self.store.find_remote(address, remote_cid).is_some() {
            self.send(address, reject(ConnectionResult::SourceCidAlreadyAllocated));

            return None;
        }

        if !self.credit_parameters_valid(ModeKind::LeCreditBased, &parameters) {
            self.send(address, reject(ConnectionResult::UnacceptableParameters));

            return None;
        }

        let Ok(credits) = CreditCounter::new(ours.initial_credits, parameters.initial_credits, self.config.le_credit_max)
        else {
            self.send(address, reject(ConnectionResult::UnacceptableParameters));

            return None;
        };

        let Some(cid) = self.store.create(address, Transport::Le, psm, ModeKind::LeCreditBased) else {
            self.send(address, reject(ConnectionResult::NoResources));

            return None;
        };

        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.assign_remote_cid(remote_cid);

            ccb.remote_id = Some(identifier);

            ccb.our_cfg = credit_config(ModeKind::LeCreditBased, ours);

            ccb.peer_cfg = credit_config(ModeKind::LeCreditBased, parameters);

            ccb.credits = Some(credits);
        }

        self.accept_incoming(address, cid);

        Some(cid)
    }

    /// Process an enhanced credit based connection request of the peer
    ///
    /// The channels created for the request are returned. A channel is not created for a refused
    /// source CID, if every channel is refused the response is sent before this returns.
    pub fn peer_ecfc_connect_request(
        &mut self,
        address: BluetoothDeviceAddress,
        identifier: NonZeroU8,
        spsm: u16,
        remote_cids: &[u16],
        parameters: CreditBasedParameters,
    ) -> Vec<DynChannelId> {
        let Some(transport) = self.links.get(&address).filter(|link| link.state() == LinkState::Connected).map(|link| link.transport()) else {
            log::warn!("(L2CAP) credit based connection request from {} without a connected link", address);

            return Vec::new();
        };

        let reject_all = |result| Signal::CreditBasedConnectionResponse {
            identifier,
            local_cids: alloc::vec![None; remote_cids.len()],
            parameters: CreditBasedParameters::default(),
            result,
        };

        if remote_cids.is_empty() || remote_cids.len() > self.config.max_ecfc_channels {
            self.send(address, reject_all(ConnectionResult::UnacceptableParameters));

            return Vec::new();
        }

        let record = Psm::try_new_le(spsm)
            .ok()
            .and_then(|psm| self.registry.get(psm))
            .filter(|record| record.modes().contains(ModeKind::EnhancedCreditBased));

        let Some((psm, ours)) = record.and_then(|record| Some((record.psm(), record.credit_parameters()?))) else {
            self.send(address, reject_all(ConnectionResult::PsmNotSupported));

            return Vec::new();
        };

        if !self.credit_parameters_valid(ModeKind::EnhancedCreditBased, &parameters)
            || parameters.initial_credits > self.config.ecfc_credit_max
        {
            self.send(address, reject_all(ConnectionResult::UnacceptableParameters));

            return Vec::new();
        }

        let mut slots = Vec::with_capacity(remote_cids.len());

        let mut refusal = ConnectionResult::Success;

        for raw in remote_cids.iter().copied() {
            let remote_cid = match DynChannelId::new_for(transport, raw) {
                Ok(remote_cid) if self.store.find_remote(address, remote_cid).is_none() => remote_cid,
                Ok(_) => {
                    refusal = ConnectionResult::SourceCidAlreadyAllocated;
                    slots.push(None);
                    continue;
                }
                Err(_) => {
                    refusal = ConnectionResult::InvalidSourceCid;
                    slots.push(None);
                    continue;
                }
            };

            let Some(cid) = self.store.create(address, transport, psm, ModeKind::EnhancedCreditBased) else {
                refusal = ConnectionResult::NoResources;
                slots.push(None);
                continue;
            };

            let credit_max = self.config.ecfc_credit_max;

            if let Some(ccb) = self.store.get_mut(cid) {
                ccb.assign_remote_cid(remote_cid);

                ccb.remote_id = Some(identifier);

                ccb.our_cfg = credit_config(ModeKind::EnhancedCreditBased, ours);

                ccb.peer_cfg = credit_config(ModeKind::EnhancedCreditBased, parameters);

                ccb.credits = CreditCounter::new(ours.initial_credits, parameters.initial_credits, credit_max).ok();
            }

            slots.push(Some(cid));
        }

        let cids: Vec<DynChannelId> = slots.iter().flatten().copied().collect();

        let Some(first) = cids.first().copied() else {
            self.send(address, reject_all(refusal));

            return cids;
        };

        let group_id = self.store.new_group(slots, identifier, parameters.mtu);

        if let Some(group) = self.store.group_mut(group_id) {
            if !refusal.is_success() {
                group.result = refusal
            }
        }

        if let Some(link) = self.links.get_mut(&address) {
            cids.iter().for_each(|cid| link.add_channel(*cid));
        }

        self.dispatch(first, Event::PeerConnectRequest);

        cids
    }

    /// Process a credit based reconfiguration request of the peer
    ///
    /// `remote_cids` are the peer's identifiers of the channels to reconfigure. Every channel must
    /// be connected (open or configuring), otherwise the peer is refused with unacceptable
    /// parameters.
    pub fn peer_reconfigure_request(
        &mut self,
        address: BluetoothDeviceAddress,
        identifier: NonZeroU8,
        mtu: u16,
        mps: u16,
        remote_cids: &[u16],
    ) {
        let Some(transport) = self.links.get(&address).map(|link| link.transport()) else {
            log::warn!("(L2CAP) reconfiguration request from {} without a link", address);
            return;
        };

        let cids: Option<Vec<DynChannelId>> = remote_cids
            .iter()
            .map(|raw| {
                let remote = DynChannelId::new_for(transport, *raw).ok()?;

                self.store
                    .find_remote(address, remote)
                    .filter(|cid| self.store.get(*cid).map_or(false, |ccb| ccb.mode() == ModeKind::EnhancedCreditBased))
            })
            .collect();

        let reconfigurable = |cid: &DynChannelId| {
            matches!(self.live_state(*cid), Some(ChannelState::Open | ChannelState::Config))
        };

        match cids {
            Some(cids) if !cids.is_empty() && !cids.iter().all(reconfigurable) => {
                log::warn!("(L2CAP) reconfiguration request from {} for channels not connected", address);

                self.send(
                    address,
                    Signal::CreditBasedReconfigureResponse {
                        identifier,
                        result: ReconfigResult::UnacceptableParameters,
                    },
                )
            }
            Some(cids) if !cids.is_empty() => {
                let first = cids[0];

                self.dispatch(
                    first,
                    Event::PeerReconfigRequest(PeerReconfig {
                        identifier,
                        mtu,
                        mps,
                        cids,
                    }),
                )
            }
            _ => {
                log::warn!("(L2CAP) reconfiguration request from {} for unknown channels", address);

                self.send(
                    address,
                    Signal::CreditBasedReconfigureResponse {
                        identifier,
                        result: ReconfigResult::InvalidDestinationCid,
                    },
                )
            }
        }
    }

    fn link_is_connected(&self, address: BluetoothDeviceAddress) -> bool {
        self.links
            .get(&address)
            .map_or(false, |link| link.state() == LinkState::Connected)
    }

    /// Check the MTU and MPS of a credit based connection request or response
    fn credit_parameters_valid(&self, mode: ModeKind, parameters: &CreditBasedParameters) -> bool {
        let (min_mtu, min_mps) = match mode {
            ModeKind::EnhancedCreditBased => (self.config.min_ecfc_mtu, self.config.negotiator.min_ecfc_mps),
            _ => (self.config.min_le_credit_mtu, self.config.min_le_credit_mps),
        };

        parameters.mtu >= min_mtu && parameters.mps >= min_mps && parameters.mps <= self.config.negotiator.max_credit_mps
    }

    /// Add a channel created by the peer to its link and start it
    fn accept_incoming(&mut self, address: BluetoothDeviceAddress, cid: DynChannelId) {
        if let Some(link) = self.links.get_mut(&address) {
            link.add_channel(cid)
        }

        self.dispatch(cid, Event::PeerConnectRequest)
    }
}

/// Collaborator callbacks
impl<H: Host> ChannelManager<H> {
    /// The security subsystem decided on the access request of channel `cid`
    pub fn security_complete(&mut self, cid: DynChannelId, outcome: SecurityOutcome) {
        match outcome {
            SecurityOutcome::Granted => self.dispatch(cid, Event::SecurityGranted),
            SecurityOutcome::Denied(status) => self.dispatch(cid, Event::SecurityDenied(status)),
            SecurityOutcome::Deferred => log::debug!("(L2CAP) security decision for {} deferred", cid),
        }
    }

    /// The security subsystem can now process the deferred access request of channel `cid`
    pub fn security_retry(&mut self, cid: DynChannelId) {
        self.dispatch(cid, Event::SecurityRetry)
    }

    /// A timer reported by the [`Alarms`](crate::timer::Alarms) expired
    ///
    /// Tokens of timers that were cancelled or re-armed are dropped.
    pub fn timer_expired(&mut self, token: TimerToken) {
        // a reconfiguration timer stays with the reconfiguration when its channel is released
        let cid = match token.kind() {
            TimerKind::Reconfig => self
                .store
                .iter()
                .find(|ccb| ccb.reconfig_timer.holds(token))
                .map_or(token.channel(), |ccb| ccb.local_cid()),
            _ => token.channel(),
        };

        let Some(ccb) = self.store.get_mut(cid) else {
            log::trace!("(L2CAP) dropped timer of released {}", cid);
            return;
        };

        let expired = match token.kind() {
            TimerKind::State => ccb.state_timer.expire(token),
            TimerKind::Ack => ccb.ack_timer.expire(token),
            TimerKind::Reconfig => ccb.reconfig_timer.expire(token),
        };

        if !expired {
            log::trace!("(L2CAP) dropped stale {:?} timer of {}", token.kind(), cid);
            return;
        }

        let event = match token.kind() {
            TimerKind::State => Event::Timeout,
            TimerKind::Ack => Event::AckTimeout,
            TimerKind::Reconfig => Event::ReconfigTimeout,
        };

        self.dispatch(cid, event)
    }

    /// The output scheduler changed the congestion status of a channel
    pub fn set_congested(&mut self, cid: DynChannelId, congested: bool) {
        let Some(ccb) = self.store.get_mut(cid) else {
            return;
        };

        if ccb.congested == congested {
            return;
        }

        ccb.congested = congested;

        let psm = ccb.psm;

        log::debug!("(L2CAP) {} congested: {}", cid, congested);

        if let Some(upper) = self.upper(psm) {
            upper.congestion_status(cid, congested)
        }
    }

    /// Take the next PDU to transmit from a channel
    ///
    /// This is called by the output scheduler. `None` is returned if the queue is empty or the
    /// channel may not transmit (it is not configured far enough or there are no peer credits).
    /// A peer credit is spent for every k-frame taken.
    pub fn take_pdu(&mut self, cid: DynChannelId) -> Option<Vec<u8>> {
        let ccb = self.store.get_mut(cid)?;

        if !ccb.may_transmit() {
            return None;
        }

        let pdu = ccb.tx_queue.pop_front()?;

        if let Some(credits) = ccb.credits.as_mut() {
            credits.spend_peer_credit();
        }

        Some(pdu)
    }

    /// Arm the retransmission (or monitor) timer of an enhanced retransmission mode channel
    ///
    /// The expiry is reported to the [`RetransmissionEngine`](crate::host::RetransmissionEngine).
    pub fn arm_retransmission_timer(&mut self, cid: DynChannelId, timeout: Duration) -> Result<(), ChannelError> {
        self.check_ertm(cid)?;

        self.arm_state_timer(cid, timeout);

        Ok(())
    }

    /// Arm the acknowledgement timer of an enhanced retransmission mode channel
    pub fn arm_ack_timer(&mut self, cid: DynChannelId, timeout: Duration) -> Result<(), ChannelError> {
        self.check_ertm(cid)?;

        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.ack_timeout = Some(timeout);

            ccb.ack_timer.arm(&mut self.host, timeout)
        }

        Ok(())
    }

    fn check_ertm(&self, cid: DynChannelId) -> Result<(), ChannelError> {
        let ccb = self.check_live(cid)?;

        match (ccb.state(), ccb.mode()) {
            (ChannelState::Open, ModeKind::Ertm) => Ok(()),
            (ChannelState::Open, mode) => Err(ChannelError::WrongMode(cid, mode)),
            (state, _) => Err(ChannelError::WrongState(cid, state)),
        }
    }
}

/// Helpers shared by the state handlers
impl<H: Host> ChannelManager<H> {
    fn set_state(&mut self, cid: DynChannelId, next: ChannelState) {
        if let Some(ccb) = self.store.get_mut(cid) {
            debug_assert!(
                ccb.state.may_enter(next),
                "invalid transition of {} from {} to {}",
                cid,
                ccb.state,
                next
            );

            log::debug!("(L2CAP) {}: {} -> {}", cid, ccb.state, next);

            ccb.state = next;
        }
    }

    /// Set the state of every channel connected together with `cid`
    fn set_group_state(&mut self, cid: DynChannelId, next: ChannelState) {
        for sibling in self.store.siblings(cid) {
            self.set_state(sibling, next)
        }
    }

    fn arm_state_timer(&mut self, cid: DynChannelId, timeout: Duration) {
        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.state_timer.arm(&mut self.host, timeout)
        }
    }

    fn arm_group_timer(&mut self, cid: DynChannelId, timeout: Duration) {
        for sibling in self.store.siblings(cid) {
            self.arm_state_timer(sibling, timeout)
        }
    }

    fn cancel_state_timer(&mut self, cid: DynChannelId) {
        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.state_timer.cancel(&mut self.host)
        }
    }

    fn next_identifier(&mut self, peer: BluetoothDeviceAddress) -> NonZeroU8 {
        self.links
            .get_mut(&peer)
            .map(|link| link.next_identifier())
            .unwrap_or(NonZeroU8::MIN)
    }

    fn send(&mut self, peer: BluetoothDeviceAddress, signal: Signal) {
        log::trace!("(L2CAP) sending {} to {}", signal, peer);

        self.host.send_signal(peer, signal)
    }

    /// Get the upper layer of `psm`
    ///
    /// The registration may be gone, callbacks are then skipped.
    fn upper(&mut self, psm: Psm) -> Option<&mut UpperLayer> {
        let upper = self.registry.get_mut(psm).map(|record| record.upper_mut());

        if upper.is_none() {
            log::trace!("(L2CAP) no upper layer registered for {}", psm);
        }

        upper
    }

    fn group_status(&self, cid: DynChannelId) -> Option<GroupStatus> {
        self.store.group_of(cid).map(|group| group.status)
    }

    fn set_group_status(&mut self, cid: DynChannelId, status: GroupStatus) {
        if let Some(id) = self.store.get(cid).and_then(|ccb| ccb.group) {
            if let Some(group) = self.store.group_mut(id) {
                group.status = status
            }
        }
    }

    fn group_id(&self, cid: DynChannelId) -> Option<GroupId> {
        self.store.get(cid).and_then(|ccb| ccb.group)
    }

    /// Check if the channels connected together with `cid` are the only channels of their link
    fn is_last_on_link(&self, cid: DynChannelId) -> bool {
        let Some(peer) = self.store.get(cid).map(|ccb| ccb.peer) else {
            return false;
        };

        let siblings = self.store.siblings(cid);

        self.links
            .get(&peer)
            .map_or(true, |link| link.channels().iter().all(|c| siblings.contains(c)))
    }

    /// Release a channel
    ///
    /// Every timer of the channel is cancelled, the channel identifier is freed, and the channel
    /// is removed from its link. An in progress reconfiguration owned by the channel moves to the
    /// next channel it applies to, together with its timer.
    fn release(&mut self, cid: DynChannelId) -> Option<Ccb> {
        let mut ccb = self.store.remove(cid)?;

        ccb.state_timer.cancel(&mut self.host);

        ccb.ack_timer.cancel(&mut self.host);

        if let Some(mut reconfig) = ccb.reconfig.take() {
            reconfig.cids.retain(|c| *c != cid);

            if let Some(owner) = reconfig.cids.first().and_then(|next| self.store.get_mut(*next)) {
                owner.reconfig_timer.adopt(&mut self.host, &mut ccb.reconfig_timer);

                owner.reconfig = Some(reconfig);
            }
        }

        ccb.reconfig_timer.cancel(&mut self.host);

        if let Some(link) = self.links.get_mut(&ccb.peer) {
            link.remove_channel(cid)
        }

        log::debug!("(L2CAP) released {} in state {}", cid, ccb.state);

        Some(ccb)
    }

    /// Give the upper layer the terminal callback for `cids`
    ///
    /// The channels are detached from the upper layer but are not released. Channels that were
    /// already detached are skipped, and the callback is given once for all channels to a credit
    /// based upper layer.
    fn detach(&mut self, cids: &[DynChannelId], completion: Completion) {
        let mut detached = Vec::with_capacity(cids.len());

        let mut owner = None;

        for cid in cids.iter().copied() {
            let Some(ccb) = self.store.get_mut(cid) else { continue };

            if !ccb.detached {
                ccb.detached = true;

                owner = Some((ccb.peer, ccb.psm));

                detached.push(cid);
            }
        }

        let Some((peer, psm)) = owner else { return };

        if let Some(upper) = self.upper(psm) {
            upper.complete(peer, &detached, completion)
        }
    }

    fn release_and_notify(&mut self, cid: DynChannelId, completion: Completion) {
        self.detach(&[cid], completion);

        self.release(cid);
    }

    /// Release every channel connected together with `cid`
    ///
    /// The completion is given once for all channels to a credit based upper layer.
    fn release_and_notify_group(&mut self, cid: DynChannelId, completion: Completion) {
        let members = self.store.siblings(cid);

        self.release_members(&members, completion)
    }

    fn release_members(&mut self, members: &[DynChannelId], completion: Completion) {
        self.detach(members, completion);

        for member in members {
            self.release(*member);
        }
    }

    /// Send a disconnection request if the remote channel identifier is known
    fn send_disconnect_request(&mut self, cid: DynChannelId) {
        let Some((peer, remote_cid)) = self.store.get(cid).and_then(|ccb| Some((ccb.peer, ccb.remote_cid()?))) else {
            return;
        };

        let identifier = self.next_identifier(peer);

        if let Some(ccb) = self.store.get_mut(cid) {
            ccb.local_id = Some(identifier)
        }

        self.send(
            peer,
            Signal::DisconnectionRequest {
                identifier,
                local_cid: cid,
                remote_cid,
            },
        )
    }

    /// Answer the disconnection request of the peer
    fn send_disconnect_response(&mut self, cid: DynChannelId) {
        let Some(ccb) = self.store.get(cid) else {
            return;
        };

        if let (Some(identifier), Some(remote_cid)) = (ccb.remote_id, ccb.remote_cid()) {
            let peer = ccb.peer;

            self.send(
                peer,
                Signal::DisconnectionResponse {
                    identifier,
                    local_cid: cid,
                    remote_cid,
                },
            )
        }
    }

    /// Disconnect a channel because of a protocol violation or an incompatible configuration
    ///
    /// The upper layer is given the disconnect indication right away. The channel then waits on
    /// the peer's disconnection response, unless the peer never assigned it a channel identifier.
    fn force_disconnect(&mut self, cid: DynChannelId) {
        let Some(ccb) = self.store.get(cid) else { return };

        if let ChannelState::W4PeerDisconnectRsp | ChannelState::W4LocalDisconnectRsp = ccb.state {
            log::trace!("(L2CAP) {} is already disconnecting", cid);
            return;
        }

        let has_remote = ccb.remote_cid().is_some();

        log::warn!("(L2CAP) forcing the disconnection of {}", cid);

        self.store.leave_group(cid);

        self.detach(&[cid], Completion::DisconnectInd);

        if has_remote {
            self.disconnect_from_local(cid)
        } else {
            self.release(cid);
        }
    }

    /// Send a disconnection request and wait for the peer's response
    fn disconnect_from_local(&mut self, cid: DynChannelId) {
        self.send_disconnect_request(cid);

        self.set_state(cid, ChannelState::W4PeerDisconnectRsp);

        let timeout = self.config.disconnect_timeout;

        self.arm_state_timer(cid, timeout);
    }

    /// Ask the output scheduler to service the link of the channel if the channel can transmit
    fn service_queue(&mut self, cid: DynChannelId) {
        if let Some(ccb) = self.store.get(cid) {
            if !ccb.tx_queue.is_empty() && ccb.may_transmit() {
                self.host.service(ccb.peer)
            }
        }
    }

    fn unhandled(&self, cid: DynChannelId, state: ChannelState, event: &Event) {
        log::warn!("(L2CAP) {} dropped {}, not expected in state {}", cid, event, state)
    }
}

/// The configuration record of a credit based channel
fn credit_config(mode: ModeKind, parameters: CreditBasedParameters) -> ChannelConfig {
    ChannelConfig {
        mtu: Some(parameters.mtu),
        flush_timeout: None,
        mode: Some(FlowControlMode::default_for(mode)),
        mps: Some(parameters.mps),
    }
}
