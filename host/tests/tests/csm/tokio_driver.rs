//! Tests for driving the channel state machine with tokio timers

use bo_tie_l2cap_csm::event::CreditConnectResponse;
use bo_tie_l2cap_csm::host::{
    AccessRequest, DisconnectReason, LinkControl, OutputScheduler, PeerSignaling, RetransmissionEngine,
    SecurityAccess,
};
use bo_tie_l2cap_csm::timer::{Alarms, TimerToken, TokioAlarms};
use bo_tie_l2cap_csm::{
    BluetoothDeviceAddress, ChannelManager, ChannelState, ConnectionResult, CsmConfig, DynChannelId, Event,
    SecurityOutcome, ServiceRecord, Signal, Transport,
};
use bo_tie_l2cap_csm_tests::{credit_psm, Indication, Recorder, LOCAL_PARAMETERS, PEER};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

/// A host whose timers run on the tokio runtime
struct TokioHost {
    alarms: TokioAlarms,
    signals: Vec<Signal>,
}

impl PeerSignaling for TokioHost {
    fn send_signal(&mut self, _: BluetoothDeviceAddress, signal: Signal) {
        self.signals.push(signal)
    }
}

impl SecurityAccess for TokioHost {
    fn request_access(&mut self, _: AccessRequest) {}

    fn abort_access(&mut self, _: BluetoothDeviceAddress) {}
}

impl LinkControl for TokioHost {
    fn create_connection(&mut self, _: BluetoothDeviceAddress, _: Transport) {}

    fn disconnect(&mut self, _: BluetoothDeviceAddress, _: DisconnectReason) {}
}

impl OutputScheduler for TokioHost {
    fn service(&mut self, _: BluetoothDeviceAddress) {}
}

impl RetransmissionEngine for TokioHost {
    fn receive(&mut self, _: DynChannelId, pdu: Vec<u8>) -> Option<Vec<u8>> {
        Some(pdu)
    }

    fn retransmission_timeout(&mut self, _: DynChannelId) {}

    fn ack_timeout(&mut self, _: DynChannelId) {}
}

impl Alarms for TokioHost {
    fn set_alarm(&mut self, token: TimerToken, timeout: Duration) {
        self.alarms.set_alarm(token, timeout)
    }

    fn cancel_alarm(&mut self, token: TimerToken) {
        self.alarms.cancel_alarm(token)
    }
}

fn setup() -> (ChannelManager<TokioHost>, UnboundedReceiver<TimerToken>, Recorder) {
    let (alarms, receiver) = TokioAlarms::new();

    let host = TokioHost {
        alarms,
        signals: Vec::new(),
    };

    let config = CsmConfig::builder()
        .set_connect_timeout(Duration::from_secs(20))
        .build()
        .unwrap();

    let mut manager = ChannelManager::new(config, host);

    let recorder = Recorder::default();

    manager
        .registry_mut()
        .register(ServiceRecord::credit_based(credit_psm(), recorder.clone(), LOCAL_PARAMETERS))
        .unwrap();

    (manager, receiver, recorder)
}

/// Connect a LE credit based channel up to the point where the request is sent to the peer
fn request_connection(manager: &mut ChannelManager<TokioHost>) -> DynChannelId {
    let cid = manager.connect(PEER, Transport::Le, credit_psm()).unwrap();

    manager.link_connected(PEER, Transport::Le);

    manager.security_complete(cid, SecurityOutcome::Granted);

    assert_eq!(manager.state(cid), Some(ChannelState::W4PeerConnectRsp));

    cid
}

#[tokio::test(start_paused = true)]
async fn connect_timer_expires() {
    let (mut manager, mut receiver, recorder) = setup();

    let start = tokio::time::Instant::now();

    let cid = request_connection(&mut manager);

    let token = receiver.recv().await.unwrap();

    assert_eq!(token.channel(), cid);

    assert!(start.elapsed() >= Duration::from_secs(20));

    manager.timer_expired(token);

    assert_eq!(manager.state(cid), None);

    assert_eq!(
        recorder.take(),
        [Indication::ConnectCfm {
            cids: vec![cid],
            result: ConnectionResult::Timeout
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn answered_connection_stops_the_timer() {
    let (mut manager, mut receiver, recorder) = setup();

    let cid = request_connection(&mut manager);

    manager.dispatch(
        cid,
        Event::PeerCreditConnectResponse(CreditConnectResponse {
            remote_cids: vec![Some(0x41)],
            mtu: 100,
            mps: 50,
            initial_credits: 1,
            result: ConnectionResult::Success,
        }),
    );

    assert_eq!(manager.state(cid), Some(ChannelState::Open));

    let expired = tokio::time::timeout(Duration::from_secs(120), receiver.recv()).await;

    assert!(expired.is_err(), "the connect timer was not cancelled");

    assert_eq!(
        recorder.take(),
        [Indication::ConnectCfm {
            cids: vec![cid],
            result: ConnectionResult::Success
        }]
    );

    assert!(matches!(
        manager.host().signals.as_slice(),
        [Signal::LeCreditBasedConnectionRequest { local_cid, .. }] if *local_cid == cid
    ));
}
