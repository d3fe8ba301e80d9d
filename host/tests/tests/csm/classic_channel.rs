//! Tests for classic channels over a BR/EDR link

use bo_tie_l2cap_csm::channel::config::ConfigRequest;
use bo_tie_l2cap_csm::timer::TimerKind;
use bo_tie_l2cap_csm::{
    ChannelConfig, ChannelError, ChannelState, ConfigResponse, ConfigResult, ConnectionResult, DynChannelId, Event,
    FlowControlMode, ModeKind, ModeSet, SecurityOutcome, SecurityStatus, ServiceRecord, Signal, Transport, WriteError,
    WriteStatus,
};
use bo_tie_l2cap_csm_tests::{classic_manager, classic_psm, fire, id, Indication, Manager, Recorder, PEER};
use std::time::Duration;

const REMOTE_CID: u16 = 0x70;

fn remote_cid() -> DynChannelId {
    DynChannelId::new_acl(REMOTE_CID).unwrap()
}

fn basic_service(recorder: Recorder) -> ServiceRecord {
    ServiceRecord::classic(classic_psm(), recorder)
}

/// A service that prefers enhanced retransmission mode but also accepts basic mode
fn ertm_or_basic_service(recorder: Recorder) -> ServiceRecord {
    ServiceRecord::classic(classic_psm(), recorder)
        .with_modes(ModeSet::from(ModeKind::Basic).with(ModeKind::Ertm))
        .with_config(ChannelConfig::with_mode(FlowControlMode::default_for(ModeKind::Ertm)))
}

fn ertm_only_service(recorder: Recorder) -> ServiceRecord {
    ServiceRecord::classic(classic_psm(), recorder)
        .with_modes(ModeSet::from(ModeKind::Ertm))
        .with_config(ChannelConfig::with_mode(FlowControlMode::default_for(ModeKind::Ertm)))
}

/// Connect a channel up to the point where the connection request is sent to the peer
fn request_connection(manager: &mut Manager, peer_modes: ModeSet) -> DynChannelId {
    let cid = manager.connect(PEER, Transport::BrEdr, classic_psm()).unwrap();

    assert_eq!(manager.state(cid), Some(ChannelState::Closed));

    assert_eq!(manager.host().created_links, [(PEER, Transport::BrEdr)]);

    manager.link_connected(PEER, Transport::BrEdr);

    assert_eq!(manager.state(cid), Some(ChannelState::OrigW4SecComp));

    assert_eq!(manager.host().access_requests.len(), 1);

    manager.security_complete(cid, SecurityOutcome::Granted);

    // the request waits on the information response of the peer
    assert_eq!(manager.state(cid), Some(ChannelState::W4PeerConnectRsp));

    assert!(manager.host_mut().take_signals().is_empty());

    manager.info_response_received(PEER, peer_modes);

    let signals = manager.host_mut().take_signals();

    assert!(
        matches!(signals.as_slice(), [Signal::ConnectionRequest { psm, local_cid, .. }] if *psm == classic_psm() && *local_cid == cid),
        "unexpected signals {:?}",
        signals
    );

    cid
}

/// Connect a channel up to the CONFIG state
fn connect_to_config(manager: &mut Manager, recorder: &Recorder, peer_modes: ModeSet) -> DynChannelId {
    let cid = request_connection(manager, peer_modes);

    manager.dispatch(cid, Event::PeerConnectResponse { remote_cid: REMOTE_CID });

    assert_eq!(manager.state(cid), Some(ChannelState::Config));

    assert_eq!(
        recorder.take(),
        [Indication::ConnectCfm {
            cids: vec![cid],
            result: ConnectionResult::Success
        }]
    );

    cid
}

fn peer_config_request(identifier: u8, config: ChannelConfig) -> Event {
    Event::PeerConfigRequest(ConfigRequest {
        identifier: id(identifier),
        continuation: false,
        config,
    })
}

/// Run both directions of the configuration of a channel in CONFIG
fn configure(manager: &mut Manager, cid: DynChannelId, peer_config: ChannelConfig) {
    manager.config_request(cid, ChannelConfig::default()).unwrap();

    manager.dispatch(cid, peer_config_request(7, peer_config));

    manager.config_response(cid, ConfigResponse::success()).unwrap();

    manager.dispatch(cid, Event::PeerConfigResponse(ConfigResponse::success()));
}

#[test]
fn outgoing_channel_lifecycle() {
    let (mut manager, recorder) = classic_manager(basic_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Basic));

    let peer_config = ChannelConfig {
        mtu: Some(512),
        ..Default::default()
    };

    configure(&mut manager, cid, peer_config);

    assert_eq!(manager.state(cid), Some(ChannelState::Open));

    assert_eq!(
        recorder.take(),
        [
            Indication::ConfigInd {
                cid,
                config: peer_config
            },
            Indication::ConfigCfm {
                cid,
                result: ConfigResult::Success
            },
        ]
    );

    let signals = manager.host_mut().take_signals();

    assert!(matches!(
        signals.as_slice(),
        [
            Signal::ConfigurationRequest { remote_cid: request_cid, config, .. },
            Signal::ConfigurationResponse { identifier, remote_cid: response_cid, result: ConfigResult::Success, .. },
        ] if *request_cid == remote_cid()
            && config.mtu == Some(ServiceRecord::DEFAULT_CLASSIC_MTU)
            && *identifier == id(7)
            && *response_cid == remote_cid()
    ));

    assert!(manager.host().alarms.is_empty(), "timers left armed in OPEN");

    manager.dispatch(cid, Event::PeerData(vec![1, 2, 3]));

    assert_eq!(recorder.take(), [Indication::DataInd { cid, sdu: vec![1, 2, 3] }]);

    assert_eq!(manager.write(cid, vec![4, 5]), Ok(WriteStatus::Queued));

    assert_eq!(manager.host().serviced, [PEER]);

    assert_eq!(manager.take_pdu(cid), Some(vec![4, 5]));

    assert_eq!(manager.take_pdu(cid), None);

    assert_eq!(
        manager.write(cid, vec![0; 513]),
        Err(WriteError::SduTooLarge { len: 513, mtu: 512 })
    );

    manager.disconnect(cid).unwrap();

    assert_eq!(manager.state(cid), Some(ChannelState::W4PeerDisconnectRsp));

    assert_eq!(manager.host().active_mode_requests, 2);

    assert!(matches!(
        manager.host_mut().take_signals().as_slice(),
        [Signal::DisconnectionRequest { local_cid, remote_cid: rc, .. }] if *local_cid == cid && *rc == remote_cid()
    ));

    manager.dispatch(cid, Event::PeerDisconnectResponse);

    assert_eq!(manager.state(cid), None);

    assert_eq!(
        recorder.take(),
        [Indication::DisconnectCfm {
            cid,
            result: ConnectionResult::Success
        }]
    );

    assert!(manager.host().alarms.is_empty());

    assert!(manager.link(PEER).unwrap().channels().is_empty());
}

#[test]
fn writes_wait_for_outbound_configuration() {
    let (mut manager, recorder) = classic_manager(basic_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Basic));

    assert_eq!(manager.write(cid, vec![0xAA]), Ok(WriteStatus::Queued));

    assert!(manager.host().serviced.is_empty());

    assert_eq!(manager.take_pdu(cid), None);

    manager.config_request(cid, ChannelConfig::default()).unwrap();

    manager.dispatch(cid, Event::PeerConfigResponse(ConfigResponse::success()));

    // only the outbound direction is configured
    assert_eq!(manager.state(cid), Some(ChannelState::Config));

    assert_eq!(manager.host().serviced, [PEER]);

    assert_eq!(manager.take_pdu(cid), Some(vec![0xAA]));
}

#[test]
fn peer_disconnects_during_configuration() {
    let (mut manager, recorder) = classic_manager(basic_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Basic));

    manager.dispatch(cid, Event::PeerDisconnectRequest { identifier: id(9) });

    assert_eq!(manager.state(cid), Some(ChannelState::W4LocalDisconnectRsp));

    assert_eq!(recorder.take(), [Indication::DisconnectInd { cid, ack_needed: true }]);

    // data is no longer delivered
    manager.dispatch(cid, Event::PeerData(vec![1]));

    assert!(recorder.peek().is_empty());

    manager.disconnect_response(cid).unwrap();

    assert_eq!(manager.state(cid), None);

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::DisconnectionResponse {
            identifier: id(9),
            local_cid: cid,
            remote_cid: remote_cid(),
        }]
    );

    assert!(recorder.take().is_empty());

    assert!(manager.host().alarms.is_empty());

    assert_eq!(manager.disconnect_response(cid), Err(ChannelError::NotLive(cid)));
}

#[test]
fn unacknowledged_peer_disconnect_is_answered_on_timeout() {
    let (mut manager, recorder) = classic_manager(basic_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Basic));

    manager.dispatch(cid, Event::PeerDisconnectRequest { identifier: id(12) });

    recorder.take();

    fire(&mut manager, cid, TimerKind::State);

    assert_eq!(manager.state(cid), None);

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::DisconnectionResponse {
            identifier: id(12),
            local_cid: cid,
            remote_cid: remote_cid(),
        }]
    );

    assert!(recorder.take().is_empty());
}

#[test]
fn configuration_timeout_disconnects() {
    let (mut manager, recorder) = classic_manager(basic_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Basic));

    let token = manager.host().alarm(cid, TimerKind::State).unwrap();

    assert_eq!(manager.host().alarms[&token], manager.config().config_timeout);

    fire(&mut manager, cid, TimerKind::State);

    assert_eq!(manager.state(cid), Some(ChannelState::W4PeerDisconnectRsp));

    assert!(matches!(
        manager.host_mut().take_signals().as_slice(),
        [Signal::DisconnectionRequest { local_cid, .. }] if *local_cid == cid
    ));

    assert_eq!(recorder.take(), [Indication::DisconnectInd { cid, ack_needed: false }]);

    let disconnect_timer = manager.host().alarm(cid, TimerKind::State).unwrap();

    assert_eq!(manager.host().alarms[&disconnect_timer], manager.config().disconnect_timeout);

    // the expired token is stale now
    manager.timer_expired(token);

    assert_eq!(manager.state(cid), Some(ChannelState::W4PeerDisconnectRsp));

    // the upper layer was already told
    assert_eq!(manager.disconnect(cid), Err(ChannelError::NotLive(cid)));

    manager.dispatch(cid, Event::PeerDisconnectResponse);

    assert_eq!(manager.state(cid), None);

    assert!(recorder.take().is_empty());

    assert!(manager.host().alarms.is_empty());
}

#[test]
fn configured_modes_must_agree() {
    let (mut manager, recorder) = classic_manager(ertm_or_basic_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Ertm));

    // the peer uses basic mode for its direction while accepting enhanced retransmission mode
    configure(&mut manager, cid, ChannelConfig::default());

    assert_eq!(manager.state(cid), Some(ChannelState::W4PeerDisconnectRsp));

    assert_eq!(recorder.completions(cid), 1);

    assert!(recorder
        .take()
        .contains(&Indication::DisconnectInd { cid, ack_needed: false }));

    assert!(matches!(
        manager.host_mut().take_signals().last(),
        Some(Signal::DisconnectionRequest { local_cid, .. }) if *local_cid == cid
    ));
}

#[test]
fn unsupported_peer_mode_is_countered_until_rounds_run_out() {
    let (mut manager, recorder) = classic_manager(ertm_only_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Ertm));

    for identifier in 1..=2 {
        manager.dispatch(cid, peer_config_request(identifier, ChannelConfig::default()));

        assert_eq!(manager.state(cid), Some(ChannelState::Config));

        let signals = manager.host_mut().take_signals();

        assert!(
            matches!(
                signals.as_slice(),
                [Signal::ConfigurationResponse { result: ConfigResult::UnacceptableParameters, config, .. }]
                    if config.mode_kind() == ModeKind::Ertm
            ),
            "unexpected signals {:?}",
            signals
        );
    }

    assert!(recorder.peek().is_empty());

    manager.dispatch(cid, peer_config_request(3, ChannelConfig::default()));

    assert_eq!(manager.state(cid), Some(ChannelState::W4PeerDisconnectRsp));

    assert_eq!(recorder.take(), [Indication::DisconnectInd { cid, ack_needed: false }]);

    // the peer's response does not give a second callback
    manager.dispatch(cid, Event::PeerDisconnectResponse);

    assert_eq!(manager.state(cid), None);

    assert!(recorder.take().is_empty());
}

#[test]
fn rejected_retransmission_mode_falls_back_to_basic() {
    let (mut manager, recorder) = classic_manager(ertm_or_basic_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Ertm));

    manager.config_request(cid, ChannelConfig::default()).unwrap();

    assert!(matches!(
        manager.host_mut().take_signals().as_slice(),
        [Signal::ConfigurationRequest { config, .. }] if config.mode_kind() == ModeKind::Ertm
    ));

    manager.dispatch(
        cid,
        Event::PeerConfigResponse(ConfigResponse::with_result(ConfigResult::UnacceptableParameters)),
    );

    assert_eq!(manager.state(cid), Some(ChannelState::Config));

    assert!(matches!(
        manager.host_mut().take_signals().as_slice(),
        [Signal::ConfigurationRequest { config, .. }] if config.mode_kind() == ModeKind::Basic
    ));

    assert_eq!(manager.ccb(cid).unwrap().mode(), ModeKind::Basic);

    // the new request runs the configuration timer again
    assert!(manager.host().alarm(cid, TimerKind::State).is_some());

    assert!(recorder.take().is_empty());

    manager.dispatch(cid, peer_config_request(4, ChannelConfig::default()));

    manager.config_response(cid, ConfigResponse::success()).unwrap();

    manager.dispatch(cid, Event::PeerConfigResponse(ConfigResponse::success()));

    assert_eq!(manager.state(cid), Some(ChannelState::Open));
}

#[test]
fn peer_without_retransmission_support_gets_basic_mode() {
    let (mut manager, recorder) = classic_manager(ertm_or_basic_service);

    let cid = request_connection(&mut manager, ModeSet::empty());

    assert_eq!(manager.ccb(cid).unwrap().mode(), ModeKind::Basic);

    assert!(recorder.take().is_empty());
}

#[test]
fn peer_without_required_mode_fails_the_connection() {
    let (mut manager, recorder) = classic_manager(ertm_only_service);

    let cid = manager.connect(PEER, Transport::BrEdr, classic_psm()).unwrap();

    manager.link_connected(PEER, Transport::BrEdr);

    manager.security_complete(cid, SecurityOutcome::Granted);

    manager.info_response_received(PEER, ModeSet::empty());

    assert_eq!(manager.state(cid), None);

    assert!(manager.host_mut().take_signals().is_empty());

    assert_eq!(
        recorder.take(),
        [Indication::ConnectCfm {
            cids: vec![cid],
            result: ConnectionResult::NoLink
        }]
    );
}

#[test]
fn incoming_connection_denied_by_security() {
    let (mut manager, recorder) = classic_manager(basic_service);

    manager.link_connected(PEER, Transport::BrEdr);

    manager.info_response_received(PEER, ModeSet::from(ModeKind::Basic));

    let cid = manager
        .peer_connect_request(PEER, id(3), classic_psm().get(), REMOTE_CID)
        .unwrap();

    assert_eq!(manager.state(cid), Some(ChannelState::TermW4SecComp));

    manager.security_complete(cid, SecurityOutcome::Denied(SecurityStatus::Denied));

    assert_eq!(manager.state(cid), None);

    assert_eq!(
        manager.host_mut().take_signals(),
        [
            Signal::ConnectionResponse {
                identifier: id(3),
                local_cid: Some(cid),
                remote_cid: remote_cid(),
                result: ConnectionResult::Pending,
            },
            Signal::ConnectionResponse {
                identifier: id(3),
                local_cid: None,
                remote_cid: remote_cid(),
                result: ConnectionResult::SecurityBlock,
            },
        ]
    );

    // the upper layer never saw the channel
    assert!(recorder.take().is_empty());

    assert!(manager.host().alarms.is_empty());
}

#[test]
fn incoming_connection_accepted() {
    let (mut manager, recorder) = classic_manager(basic_service);

    manager.link_connected(PEER, Transport::BrEdr);

    manager.info_response_received(PEER, ModeSet::from(ModeKind::Basic));

    let cid = manager
        .peer_connect_request(PEER, id(3), classic_psm().get(), REMOTE_CID)
        .unwrap();

    manager.host_mut().take_signals();

    manager.security_complete(cid, SecurityOutcome::Granted);

    assert_eq!(manager.state(cid), Some(ChannelState::W4LocalConnectRsp));

    assert_eq!(
        recorder.take(),
        [Indication::ConnectInd {
            cids: vec![cid],
            identifier: id(3)
        }]
    );

    manager.connect_response(cid, ConnectionResult::Success).unwrap();

    assert_eq!(manager.state(cid), Some(ChannelState::Config));

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::ConnectionResponse {
            identifier: id(3),
            local_cid: Some(cid),
            remote_cid: remote_cid(),
            result: ConnectionResult::Success,
        }]
    );

    configure(&mut manager, cid, ChannelConfig::default());

    assert_eq!(manager.state(cid), Some(ChannelState::Open));
}

#[test]
fn upper_layer_refuses_incoming_connection() {
    let (mut manager, recorder) = classic_manager(basic_service);

    manager.link_connected(PEER, Transport::BrEdr);

    manager.info_response_received(PEER, ModeSet::from(ModeKind::Basic));

    let cid = manager
        .peer_connect_request(PEER, id(5), classic_psm().get(), REMOTE_CID)
        .unwrap();

    manager.security_complete(cid, SecurityOutcome::Granted);

    manager.host_mut().take_signals();

    recorder.take();

    manager.connect_response(cid, ConnectionResult::NoResources).unwrap();

    assert_eq!(manager.state(cid), None);

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::ConnectionResponse {
            identifier: id(5),
            local_cid: None,
            remote_cid: remote_cid(),
            result: ConnectionResult::NoResources,
        }]
    );

    assert!(recorder.take().is_empty());
}

#[test]
fn connection_request_for_unsupported_psm() {
    let (mut manager, recorder) = classic_manager(basic_service);

    manager.link_connected(PEER, Transport::BrEdr);

    assert_eq!(manager.peer_connect_request(PEER, id(4), 0x1003, 0x71), None);

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::ConnectionResponse {
            identifier: id(4),
            local_cid: None,
            remote_cid: DynChannelId::new_acl(0x71).unwrap(),
            result: ConnectionResult::PsmNotSupported,
        }]
    );

    assert!(recorder.take().is_empty());
}

#[test]
fn duplicate_source_cid_is_refused() {
    let (mut manager, _recorder) = classic_manager(basic_service);

    manager.link_connected(PEER, Transport::BrEdr);

    manager.info_response_received(PEER, ModeSet::from(ModeKind::Basic));

    let first = manager.peer_connect_request(PEER, id(1), classic_psm().get(), REMOTE_CID);

    assert!(first.is_some());

    manager.host_mut().take_signals();

    assert_eq!(manager.peer_connect_request(PEER, id(2), classic_psm().get(), REMOTE_CID), None);

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::ConnectionResponse {
            identifier: id(2),
            local_cid: None,
            remote_cid: remote_cid(),
            result: ConnectionResult::SourceCidAlreadyAllocated,
        }]
    );
}

#[test]
fn pending_connection_times_out() {
    let (mut manager, recorder) = classic_manager(basic_service);

    let cid = request_connection(&mut manager, ModeSet::from(ModeKind::Basic));

    manager.dispatch(cid, Event::PeerConnectPending { remote_cid: Some(REMOTE_CID) });

    assert_eq!(manager.state(cid), Some(ChannelState::W4PeerConnectRsp));

    assert_eq!(recorder.take(), [Indication::ConnectPnd(cid)]);

    let token = manager.host().alarm(cid, TimerKind::State).unwrap();

    assert_eq!(manager.host().alarms[&token], manager.config().extended_connect_timeout);

    fire(&mut manager, cid, TimerKind::State);

    assert_eq!(manager.state(cid), None);

    // the peer may have allocated the channel so it is told to disconnect it
    assert!(matches!(
        manager.host_mut().take_signals().as_slice(),
        [Signal::DisconnectionRequest { local_cid, remote_cid: rc, .. }] if *local_cid == cid && *rc == remote_cid()
    ));

    assert_eq!(
        recorder.take(),
        [Indication::ConnectCfm {
            cids: vec![cid],
            result: ConnectionResult::Timeout
        }]
    );
}

#[test]
fn peer_rejects_connection() {
    let (mut manager, recorder) = classic_manager(basic_service);

    let cid = request_connection(&mut manager, ModeSet::from(ModeKind::Basic));

    manager.dispatch(cid, Event::PeerConnectRejected(ConnectionResult::PsmNotSupported));

    assert_eq!(manager.state(cid), None);

    assert_eq!(
        recorder.take(),
        [Indication::ConnectCfm {
            cids: vec![cid],
            result: ConnectionResult::PsmNotSupported
        }]
    );

    assert!(manager.host().alarms.is_empty());
}

#[test]
fn retransmission_mode_timers_go_to_the_engine() {
    let (mut manager, recorder) = classic_manager(ertm_only_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Ertm));

    configure(
        &mut manager,
        cid,
        ChannelConfig::with_mode(FlowControlMode::default_for(ModeKind::Ertm)),
    );

    assert_eq!(manager.state(cid), Some(ChannelState::Open));

    manager.dispatch(cid, Event::PeerData(vec![9, 9]));

    assert_eq!(manager.host().engine_pdus, [(cid, vec![9, 9])]);

    manager.arm_retransmission_timer(cid, Duration::from_secs(2)).unwrap();

    fire(&mut manager, cid, TimerKind::State);

    assert_eq!(manager.host().retransmission_timeouts, [cid]);

    manager.arm_ack_timer(cid, Duration::from_millis(200)).unwrap();

    fire(&mut manager, cid, TimerKind::Ack);

    assert_eq!(manager.host().ack_timeouts, [cid]);

    assert_eq!(manager.state(cid), Some(ChannelState::Open));
}

#[test]
fn acknowledgement_timer_restarts_after_reconfiguration() {
    let (mut manager, recorder) = classic_manager(ertm_only_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Ertm));

    let ertm = ChannelConfig::with_mode(FlowControlMode::default_for(ModeKind::Ertm));

    configure(&mut manager, cid, ertm);

    manager.host_mut().awaiting_ack = true;

    manager.arm_ack_timer(cid, Duration::from_millis(500)).unwrap();

    // the peer reconfigures the open channel
    manager.dispatch(cid, peer_config_request(20, ertm));

    assert_eq!(manager.state(cid), Some(ChannelState::Config));

    // expiry while configuring is not given to the engine
    fire(&mut manager, cid, TimerKind::Ack);

    assert!(manager.host().ack_timeouts.is_empty());

    manager.config_response(cid, ConfigResponse::success()).unwrap();

    assert_eq!(manager.state(cid), Some(ChannelState::Open));

    let token = manager.host().alarm(cid, TimerKind::Ack).expect("ack timer not restarted");

    assert_eq!(manager.host().alarms[&token], Duration::from_millis(500));
}

#[test]
fn retransmission_timer_requires_retransmission_mode() {
    let (mut manager, recorder) = classic_manager(basic_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Basic));

    assert_eq!(
        manager.arm_retransmission_timer(cid, Duration::from_secs(1)),
        Err(ChannelError::WrongState(cid, ChannelState::Config))
    );

    configure(&mut manager, cid, ChannelConfig::default());

    assert_eq!(
        manager.arm_retransmission_timer(cid, Duration::from_secs(1)),
        Err(ChannelError::WrongMode(cid, ModeKind::Basic))
    );
}

#[test]
fn qos_violation_is_indicated_for_open_channels() {
    let (mut manager, recorder) = classic_manager(basic_service);

    let cid = connect_to_config(&mut manager, &recorder, ModeSet::from(ModeKind::Basic));

    manager.qos_violation(PEER);

    assert!(recorder.take().is_empty());

    configure(&mut manager, cid, ChannelConfig::default());

    recorder.take();

    manager.qos_violation(PEER);

    assert_eq!(recorder.take(), [Indication::QosViolation]);
}
