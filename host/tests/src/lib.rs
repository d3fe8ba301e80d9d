//! Channel state machine integration test framework
//!
//! The [`MockHost`] records every call made by the channel state machine to its collaborators and
//! the [`Recorder`] records every callback to an upper layer. A test plays the part of the peer by
//! feeding the signals of the peer into the [`ChannelManager`] and checking the signals recorded by
//! the mock host.
#![no_std]

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::rc::Rc;
use alloc::vec::Vec;
use bo_tie_l2cap_csm::host::{
    AccessRequest, DisconnectReason, LinkControl, OutputScheduler, PeerSignaling, RetransmissionEngine,
    SecurityAccess,
};
use bo_tie_l2cap_csm::timer::{Alarms, TimerKind, TimerToken};
use bo_tie_l2cap_csm::{
    BluetoothDeviceAddress, ChannelConfig, ChannelManager, ClassicUpperLayer, ConfigResponse, ConfigResult,
    ConnectionResult, CreditBasedParameters, CreditBasedUpperLayer, CsmConfig, DynChannelId, Psm, ReconfigResult,
    ServiceRecord, Signal, Transport,
};
use core::cell::RefCell;
use core::num::NonZeroU8;
use core::time::Duration;

/// The address of the peer device in every test
pub const PEER: BluetoothDeviceAddress = BluetoothDeviceAddress([0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

/// A host that records the calls made to it
#[derive(Debug, Default)]
pub struct MockHost {
    pub signals: Vec<(BluetoothDeviceAddress, Signal)>,
    pub access_requests: Vec<AccessRequest>,
    pub aborted_access: Vec<BluetoothDeviceAddress>,
    pub created_links: Vec<(BluetoothDeviceAddress, Transport)>,
    pub disconnected_links: Vec<(BluetoothDeviceAddress, DisconnectReason)>,
    pub active_mode_requests: usize,
    pub idle_timeouts: Vec<(BluetoothDeviceAddress, Duration)>,
    pub serviced: Vec<BluetoothDeviceAddress>,
    /// The alarms currently set
    pub alarms: BTreeMap<TimerToken, Duration>,
    pub engine_pdus: Vec<(DynChannelId, Vec<u8>)>,
    pub retransmission_timeouts: Vec<DynChannelId>,
    pub ack_timeouts: Vec<DynChannelId>,
    pub awaiting_ack: bool,
}

impl MockHost {
    /// Take every signal sent since the last call
    pub fn take_signals(&mut self) -> Vec<Signal> {
        core::mem::take(&mut self.signals)
            .into_iter()
            .map(|(_, signal)| signal)
            .collect()
    }

    /// Get the token of the alarm currently set for the timer of `kind` of channel `cid`
    pub fn alarm(&self, cid: DynChannelId, kind: TimerKind) -> Option<TimerToken> {
        self.alarms
            .keys()
            .find(|token| token.channel() == cid && token.kind() == kind)
            .copied()
    }
}

impl PeerSignaling for MockHost {
    fn send_signal(&mut self, peer: BluetoothDeviceAddress, signal: Signal) {
        self.signals.push((peer, signal))
    }
}

impl SecurityAccess for MockHost {
    fn request_access(&mut self, request: AccessRequest) {
        self.access_requests.push(request)
    }

    fn abort_access(&mut self, peer: BluetoothDeviceAddress) {
        self.aborted_access.push(peer)
    }
}

impl LinkControl for MockHost {
    fn create_connection(&mut self, peer: BluetoothDeviceAddress, transport: Transport) {
        self.created_links.push((peer, transport))
    }

    fn disconnect(&mut self, peer: BluetoothDeviceAddress, reason: DisconnectReason) {
        self.disconnected_links.push((peer, reason))
    }

    fn request_active_mode(&mut self, _: BluetoothDeviceAddress) {
        self.active_mode_requests += 1
    }

    fn set_idle_timeout(&mut self, peer: BluetoothDeviceAddress, timeout: Duration) {
        self.idle_timeouts.push((peer, timeout))
    }
}

impl OutputScheduler for MockHost {
    fn service(&mut self, peer: BluetoothDeviceAddress) {
        self.serviced.push(peer)
    }
}

impl RetransmissionEngine for MockHost {
    fn receive(&mut self, cid: DynChannelId, pdu: Vec<u8>) -> Option<Vec<u8>> {
        self.engine_pdus.push((cid, pdu.clone()));

        Some(pdu)
    }

    fn retransmission_timeout(&mut self, cid: DynChannelId) {
        self.retransmission_timeouts.push(cid)
    }

    fn ack_timeout(&mut self, cid: DynChannelId) {
        self.ack_timeouts.push(cid)
    }

    fn awaiting_ack(&self, _: DynChannelId) -> bool {
        self.awaiting_ack
    }
}

impl Alarms for MockHost {
    fn set_alarm(&mut self, token: TimerToken, timeout: Duration) {
        self.alarms.insert(token, timeout);
    }

    fn cancel_alarm(&mut self, token: TimerToken) {
        self.alarms.remove(&token);
    }
}

/// A callback received by an upper layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indication {
    ConnectInd {
        cids: Vec<DynChannelId>,
        identifier: NonZeroU8,
    },
    ConnectCfm {
        cids: Vec<DynChannelId>,
        result: ConnectionResult,
    },
    ConnectPnd(DynChannelId),
    ConfigInd {
        cid: DynChannelId,
        config: ChannelConfig,
    },
    ConfigCfm {
        cid: DynChannelId,
        result: ConfigResult,
    },
    DisconnectInd {
        cid: DynChannelId,
        ack_needed: bool,
    },
    DisconnectCfm {
        cid: DynChannelId,
        result: ConnectionResult,
    },
    DataInd {
        cid: DynChannelId,
        sdu: Vec<u8>,
    },
    CreditsReceived {
        cid: DynChannelId,
        credits: u16,
        total: u16,
    },
    Congestion {
        cid: DynChannelId,
        congested: bool,
    },
    ReconfigInd {
        cids: Vec<DynChannelId>,
        mtu: u16,
    },
    ReconfigCfm {
        cids: Vec<DynChannelId>,
        result: ReconfigResult,
    },
    QosViolation,
}

impl Indication {
    /// Check if this is a terminal callback for channel `cid`
    ///
    /// A terminal callback is either a failed connect confirmation, a disconnect indication, or a
    /// disconnect confirmation.
    pub fn is_completion_of(&self, cid: DynChannelId) -> bool {
        match self {
            Indication::ConnectCfm { cids, result } => !result.is_success() && cids.contains(&cid),
            Indication::DisconnectInd { cid: c, .. } => *c == cid,
            Indication::DisconnectCfm { cid: c, .. } => *c == cid,
            _ => false,
        }
    }
}

/// An upper layer that records its callbacks
///
/// Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct Recorder(Rc<RefCell<Vec<Indication>>>);

impl Recorder {
    fn push(&self, indication: Indication) {
        self.0.borrow_mut().push(indication)
    }

    /// Take every callback recorded since the last call
    pub fn take(&self) -> Vec<Indication> {
        core::mem::take(&mut *self.0.borrow_mut())
    }

    /// Get a copy of every callback recorded since the last call to `take`
    pub fn peek(&self) -> Vec<Indication> {
        self.0.borrow().clone()
    }

    /// Count the terminal callbacks for `cid` recorded since the last call to `take`
    pub fn completions(&self, cid: DynChannelId) -> usize {
        self.0
            .borrow()
            .iter()
            .filter(|indication| indication.is_completion_of(cid))
            .count()
    }
}

impl ClassicUpperLayer for Recorder {
    fn connect_ind(&mut self, _: BluetoothDeviceAddress, cid: DynChannelId, _: Psm, identifier: NonZeroU8) {
        self.push(Indication::ConnectInd {
            cids: alloc::vec![cid],
            identifier,
        })
    }

    fn connect_cfm(&mut self, cid: DynChannelId, result: ConnectionResult) {
        self.push(Indication::ConnectCfm {
            cids: alloc::vec![cid],
            result,
        })
    }

    fn connect_pnd(&mut self, cid: DynChannelId) {
        self.push(Indication::ConnectPnd(cid))
    }

    fn config_ind(&mut self, cid: DynChannelId, config: &ChannelConfig) {
        self.push(Indication::ConfigInd { cid, config: *config })
    }

    fn config_cfm(&mut self, cid: DynChannelId, response: &ConfigResponse) {
        self.push(Indication::ConfigCfm {
            cid,
            result: response.result,
        })
    }

    fn disconnect_ind(&mut self, cid: DynChannelId, ack_needed: bool) {
        self.push(Indication::DisconnectInd { cid, ack_needed })
    }

    fn disconnect_cfm(&mut self, cid: DynChannelId, result: ConnectionResult) {
        self.push(Indication::DisconnectCfm { cid, result })
    }

    fn data_ind(&mut self, cid: DynChannelId, sdu: Vec<u8>) {
        self.push(Indication::DataInd { cid, sdu })
    }

    fn congestion_status(&mut self, cid: DynChannelId, congested: bool) {
        self.push(Indication::Congestion { cid, congested })
    }

    fn qos_violation_ind(&mut self, _: BluetoothDeviceAddress) {
        self.push(Indication::QosViolation)
    }
}

impl CreditBasedUpperLayer for Recorder {
    fn connect_ind(
        &mut self,
        _: BluetoothDeviceAddress,
        cids: &[DynChannelId],
        _: Psm,
        _: u16,
        identifier: NonZeroU8,
    ) {
        self.push(Indication::ConnectInd {
            cids: cids.to_vec(),
            identifier,
        })
    }

    fn connect_cfm(&mut self, _: BluetoothDeviceAddress, cids: &[DynChannelId], result: ConnectionResult) {
        self.push(Indication::ConnectCfm {
            cids: cids.to_vec(),
            result,
        })
    }

    fn disconnect_ind(&mut self, cid: DynChannelId, ack_needed: bool) {
        self.push(Indication::DisconnectInd { cid, ack_needed })
    }

    fn disconnect_cfm(&mut self, cid: DynChannelId, result: ConnectionResult) {
        self.push(Indication::DisconnectCfm { cid, result })
    }

    fn data_ind(&mut self, cid: DynChannelId, sdu: Vec<u8>) {
        self.push(Indication::DataInd { cid, sdu })
    }

    fn credits_received(&mut self, cid: DynChannelId, credits: u16, total: u16) {
        self.push(Indication::CreditsReceived { cid, credits, total })
    }

    fn congestion_status(&mut self, cid: DynChannelId, congested: bool) {
        self.push(Indication::Congestion { cid, congested })
    }

    fn reconfig_ind(&mut self, cids: &[DynChannelId], mtu: u16) {
        self.push(Indication::ReconfigInd { cids: cids.to_vec(), mtu })
    }

    fn reconfig_cfm(&mut self, cids: &[DynChannelId], result: ReconfigResult) {
        self.push(Indication::ReconfigCfm {
            cids: cids.to_vec(),
            result,
        })
    }
}

pub type Manager = ChannelManager<MockHost>;

/// The PSM of the classic service registered by [`classic_manager`]
pub fn classic_psm() -> Psm {
    Psm::try_new_classic(0x1001).unwrap()
}

/// The SPSM of the credit based service registered by [`credit_manager`]
pub fn credit_psm() -> Psm {
    Psm::try_new_le(0x80).unwrap()
}

/// The parameters this device uses for credit based channels
pub const LOCAL_PARAMETERS: CreditBasedParameters = CreditBasedParameters {
    mtu: 256,
    mps: 64,
    initial_credits: 10,
};

/// Create a manager with a classic service registered
pub fn classic_manager(record: impl FnOnce(Recorder) -> ServiceRecord) -> (Manager, Recorder) {
    let recorder = Recorder::default();

    let mut manager = ChannelManager::new(CsmConfig::default(), MockHost::default());

    manager.registry_mut().register(record(recorder.clone())).unwrap();

    (manager, recorder)
}

/// Create a manager with a credit based service registered
pub fn credit_manager() -> (Manager, Recorder) {
    let recorder = Recorder::default();

    let mut manager = ChannelManager::new(CsmConfig::default(), MockHost::default());

    manager
        .registry_mut()
        .register(ServiceRecord::credit_based(credit_psm(), recorder.clone(), LOCAL_PARAMETERS))
        .unwrap();

    (manager, recorder)
}

/// Expire the timer of `kind` of channel `cid`
///
/// # Panic
/// The timer must be armed
pub fn fire(manager: &mut Manager, cid: DynChannelId, kind: TimerKind) {
    let token = manager.host().alarm(cid, kind).expect("timer is not armed");

    manager.host_mut().alarms.remove(&token);

    manager.timer_expired(token)
}

/// Create an identifier for a signal of the peer
pub fn id(val: u8) -> NonZeroU8 {
    NonZeroU8::new(val).unwrap()
}
