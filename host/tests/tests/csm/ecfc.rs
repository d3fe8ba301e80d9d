//! Tests for enhanced credit based channels

use bo_tie_l2cap_csm::event::CreditConnectResponse;
use bo_tie_l2cap_csm::timer::TimerKind;
use bo_tie_l2cap_csm::{
    ChannelError, ChannelState, ConnectError, ConnectionResult, CreditBasedParameters, DynChannelId, Event,
    ReconfigResult, SecurityOutcome, SecurityStatus, Signal, Transport,
};
use bo_tie_l2cap_csm_tests::{credit_manager, credit_psm, fire, id, Indication, Manager, Recorder, LOCAL_PARAMETERS, PEER};

const REMOTE_CIDS: [u16; 3] = [0x50, 0x51, 0x52];

const PEER_PARAMETERS: CreditBasedParameters = CreditBasedParameters {
    mtu: 100,
    mps: 64,
    initial_credits: 4,
};

fn states(manager: &Manager, cids: &[DynChannelId]) -> Vec<Option<ChannelState>> {
    cids.iter().map(|cid| manager.state(*cid)).collect()
}

fn all(state: ChannelState, count: usize) -> Vec<Option<ChannelState>> {
    vec![Some(state); count]
}

/// Connect three channels up to the point where the request is sent to the peer
fn request_connection(manager: &mut Manager) -> Vec<DynChannelId> {
    let cids = manager.ecfc_connect(PEER, Transport::Le, credit_psm(), 3).unwrap();

    manager.link_connected(PEER, Transport::Le);

    assert_eq!(states(manager, &cids), all(ChannelState::OrigW4SecComp, 3));

    // the channels share one security request
    assert_eq!(manager.host().access_requests.len(), 1);

    manager.security_complete(cids[0], SecurityOutcome::Granted);

    assert_eq!(states(manager, &cids), all(ChannelState::W4PeerConnectRsp, 3));

    let signals = manager.host_mut().take_signals();

    assert!(
        matches!(
            signals.as_slice(),
            [Signal::CreditBasedConnectionRequest { local_cids, parameters, .. }]
                if *local_cids == cids && *parameters == LOCAL_PARAMETERS
        ),
        "unexpected signals {:?}",
        signals
    );

    cids
}

fn peer_response(remote_cids: Vec<Option<u16>>, result: ConnectionResult) -> Event {
    Event::PeerCreditConnectResponse(CreditConnectResponse {
        remote_cids,
        mtu: PEER_PARAMETERS.mtu,
        mps: PEER_PARAMETERS.mps,
        initial_credits: PEER_PARAMETERS.initial_credits,
        result,
    })
}

/// Open three channels requested by the peer
fn open_incoming(manager: &mut Manager, recorder: &Recorder) -> Vec<DynChannelId> {
    manager.link_connected(PEER, Transport::Le);

    let cids = manager.peer_ecfc_connect_request(PEER, id(6), credit_psm().get(), &REMOTE_CIDS, PEER_PARAMETERS);

    assert_eq!(cids.len(), 3);

    manager.security_complete(cids[0], SecurityOutcome::Granted);

    assert_eq!(
        recorder.take(),
        [Indication::ConnectInd {
            cids: cids.clone(),
            identifier: id(6)
        }]
    );

    manager.connect_response(cids[1], ConnectionResult::Success).unwrap();

    assert_eq!(states(manager, &cids), all(ChannelState::Open, 3));

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::CreditBasedConnectionResponse {
            identifier: id(6),
            local_cids: cids.iter().copied().map(Some).collect(),
            parameters: LOCAL_PARAMETERS,
            result: ConnectionResult::Success,
        }]
    );

    cids
}

#[test]
fn outgoing_connection_confirmed_once() {
    let (mut manager, recorder) = credit_manager();

    let cids = request_connection(&mut manager);

    manager.dispatch(
        cids[0],
        peer_response(REMOTE_CIDS.iter().copied().map(Some).collect(), ConnectionResult::Success),
    );

    assert_eq!(states(&manager, &cids), all(ChannelState::Open, 3));

    assert_eq!(
        recorder.take(),
        [Indication::ConnectCfm {
            cids: cids.clone(),
            result: ConnectionResult::Success
        }]
    );

    for (cid, remote) in cids.iter().zip(REMOTE_CIDS) {
        let ccb = manager.ccb(*cid).unwrap();

        assert_eq!(ccb.remote_cid(), DynChannelId::new_le(remote).ok());

        assert_eq!(ccb.credits().unwrap().get_peer_credits(), PEER_PARAMETERS.initial_credits);
    }

    assert!(manager.host().alarms.is_empty());
}

#[test]
fn outgoing_partial_acceptance_fails_every_channel() {
    let (mut manager, recorder) = credit_manager();

    let cids = request_connection(&mut manager);

    manager.dispatch(
        cids[0],
        peer_response(vec![Some(0x50), None, Some(0x52)], ConnectionResult::NoResources),
    );

    assert_eq!(
        states(&manager, &cids),
        [
            Some(ChannelState::W4PeerDisconnectRsp),
            None,
            Some(ChannelState::W4PeerDisconnectRsp)
        ]
    );

    // the channels the peer did allocate are disconnected
    let disconnected: Vec<DynChannelId> = manager
        .host_mut()
        .take_signals()
        .into_iter()
        .filter_map(|signal| match signal {
            Signal::DisconnectionRequest { local_cid, .. } => Some(local_cid),
            _ => None,
        })
        .collect();

    assert_eq!(disconnected, [cids[0], cids[2]]);

    assert_eq!(
        recorder.take(),
        [Indication::ConnectCfm {
            cids: cids.clone(),
            result: ConnectionResult::NoResources
        }]
    );

    for cid in [cids[0], cids[2]] {
        manager.dispatch(cid, Event::PeerDisconnectResponse);
    }

    assert_eq!(states(&manager, &cids), vec![None; 3]);

    assert!(recorder.take().is_empty());
}

#[test]
fn outgoing_security_denied_releases_group() {
    let (mut manager, recorder) = credit_manager();

    let cids = manager.ecfc_connect(PEER, Transport::Le, credit_psm(), 3).unwrap();

    manager.link_connected(PEER, Transport::Le);

    assert_eq!(states(&manager, &cids), all(ChannelState::OrigW4SecComp, 3));

    manager.security_complete(cids[0], SecurityOutcome::Denied(SecurityStatus::AuthenticationFailure));

    assert_eq!(states(&manager, &cids), vec![None; 3]);

    assert_eq!(
        recorder.take(),
        [Indication::ConnectCfm {
            cids: cids.clone(),
            result: ConnectionResult::SecurityBlock
        }]
    );

    assert!(manager.host_mut().take_signals().is_empty());

    assert!(manager.host().alarms.is_empty());

    assert!(manager.link(PEER).unwrap().channels().is_empty());
}

#[test]
fn channel_withdrawn_from_a_pending_group() {
    let (mut manager, recorder) = credit_manager();

    let cids = request_connection(&mut manager);

    manager.disconnect(cids[1]).unwrap();

    assert_eq!(
        recorder.take(),
        [Indication::DisconnectCfm {
            cid: cids[1],
            result: ConnectionResult::NoLink
        }]
    );

    assert_eq!(states(&manager, &cids), all(ChannelState::W4PeerConnectRsp, 3));

    assert_eq!(manager.disconnect(cids[1]), Err(ChannelError::NotLive(cids[1])));

    manager.dispatch(
        cids[0],
        peer_response(REMOTE_CIDS.iter().copied().map(Some).collect(), ConnectionResult::Success),
    );

    assert_eq!(
        states(&manager, &cids),
        [
            Some(ChannelState::Open),
            Some(ChannelState::W4PeerDisconnectRsp),
            Some(ChannelState::Open)
        ]
    );

    assert_eq!(
        recorder.take(),
        [Indication::ConnectCfm {
            cids: vec![cids[0], cids[2]],
            result: ConnectionResult::Success
        }]
    );

    let signals = manager.host_mut().take_signals();

    assert!(
        matches!(
            signals.as_slice(),
            [Signal::DisconnectionRequest { local_cid, remote_cid, .. }]
                if *local_cid == cids[1] && remote_cid.get_val() == REMOTE_CIDS[1]
        ),
        "unexpected signals {:?}",
        signals
    );

    manager.dispatch(cids[1], Event::PeerDisconnectResponse);

    assert_eq!(manager.state(cids[1]), None);

    assert!(recorder.take().is_empty());
}

#[test]
fn channel_count_is_bounded() {
    let (mut manager, _recorder) = credit_manager();

    assert_eq!(
        manager.ecfc_connect(PEER, Transport::Le, credit_psm(), 0),
        Err(ConnectError::ChannelCount(0))
    );

    assert_eq!(
        manager.ecfc_connect(PEER, Transport::Le, credit_psm(), 6),
        Err(ConnectError::ChannelCount(6))
    );

    assert!(manager.host().created_links.is_empty());

    manager.link_connected(PEER, Transport::Le);

    let remote_cids = [0x50, 0x51, 0x52, 0x53, 0x54, 0x55];

    assert!(manager
        .peer_ecfc_connect_request(PEER, id(1), credit_psm().get(), &remote_cids, PEER_PARAMETERS)
        .is_empty());

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::CreditBasedConnectionResponse {
            identifier: id(1),
            local_cids: vec![None; 6],
            parameters: CreditBasedParameters::default(),
            result: ConnectionResult::UnacceptableParameters,
        }]
    );
}

#[test]
fn incoming_subset_accepted() {
    let (mut manager, recorder) = credit_manager();

    manager.link_connected(PEER, Transport::Le);

    let cids = manager.peer_ecfc_connect_request(PEER, id(6), credit_psm().get(), &REMOTE_CIDS, PEER_PARAMETERS);

    manager.security_complete(cids[0], SecurityOutcome::Granted);

    recorder.take();

    manager
        .ecfc_connect_response(&[cids[0], cids[2]], ConnectionResult::Success)
        .unwrap();

    assert_eq!(
        states(&manager, &cids),
        [Some(ChannelState::Open), None, Some(ChannelState::Open)]
    );

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::CreditBasedConnectionResponse {
            identifier: id(6),
            local_cids: vec![Some(cids[0]), None, Some(cids[2])],
            parameters: LOCAL_PARAMETERS,
            result: ConnectionResult::SomeConnectionsRefused,
        }]
    );

    // refusing a channel does not give it a terminal callback
    assert!(recorder.take().is_empty());

    assert_eq!(manager.link(PEER).unwrap().channels(), [cids[0], cids[2]]);
}

#[test]
fn incoming_request_with_duplicate_source_cid() {
    let (mut manager, _recorder) = credit_manager();

    manager.link_connected(PEER, Transport::Le);

    let first = manager.peer_ecfc_connect_request(PEER, id(1), credit_psm().get(), &[0x50], PEER_PARAMETERS);

    assert_eq!(first.len(), 1);

    let second = manager.peer_ecfc_connect_request(PEER, id(2), credit_psm().get(), &[0x50, 0x60], PEER_PARAMETERS);

    assert_eq!(second.len(), 1);

    let group = manager.ccb(second[0]).unwrap().group();

    assert!(group.is_some());

    manager.security_complete(second[0], SecurityOutcome::Granted);

    manager.connect_response(second[0], ConnectionResult::Success).unwrap();

    assert!(manager.host_mut().take_signals().contains(&Signal::CreditBasedConnectionResponse {
        identifier: id(2),
        local_cids: vec![None, Some(second[0])],
        parameters: LOCAL_PARAMETERS,
        result: ConnectionResult::SourceCidAlreadyAllocated,
    }));
}

#[test]
fn ecfc_response_requires_waiting_channels() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    assert_eq!(
        manager.ecfc_connect_response(&cids, ConnectionResult::Success),
        Err(ChannelError::WrongState(cids[0], ChannelState::Open))
    );

    assert_eq!(
        manager.ecfc_connect_response(&[], ConnectionResult::Success),
        Err(ChannelError::NoChannels)
    );
}

#[test]
fn peer_reconfiguration_accepted() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    manager.peer_reconfigure_request(PEER, id(8), 150, 64, &REMOTE_CIDS);

    assert_eq!(states(&manager, &cids), all(ChannelState::Config, 3));

    assert_eq!(
        recorder.take(),
        [Indication::ReconfigInd {
            cids: cids.clone(),
            mtu: 150
        }]
    );

    assert!(manager.host().alarm(cids[0], TimerKind::Reconfig).is_some());

    // writes are held until the reconfiguration is answered
    manager.write(cids[0], vec![1]).unwrap();

    assert_eq!(manager.take_pdu(cids[0]), None);

    // received data keeps flowing
    manager.dispatch(cids[2], Event::PeerData(vec![1, 0, 7]));

    assert_eq!(recorder.take(), [Indication::DataInd { cid: cids[2], sdu: vec![7] }]);

    manager.reconfigure_response(cids[1], ReconfigResult::Success).unwrap();

    assert_eq!(states(&manager, &cids), all(ChannelState::Open, 3));

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::CreditBasedReconfigureResponse {
            identifier: id(8),
            result: ReconfigResult::Success,
        }]
    );

    for cid in cids.iter() {
        assert_eq!(manager.ccb(*cid).unwrap().peer_config().mtu, Some(150));
    }

    assert!(manager.host().alarms.is_empty());

    assert_eq!(manager.take_pdu(cids[0]), Some(vec![1, 0, 1]));
}

#[test]
fn unanswered_peer_reconfiguration_is_refused() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    manager.peer_reconfigure_request(PEER, id(8), 150, 64, &REMOTE_CIDS);

    recorder.take();

    fire(&mut manager, cids[0], TimerKind::Reconfig);

    assert_eq!(states(&manager, &cids), all(ChannelState::Open, 3));

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::CreditBasedReconfigureResponse {
            identifier: id(8),
            result: ReconfigResult::UnacceptableParameters,
        }]
    );

    assert_eq!(manager.ccb(cids[0]).unwrap().peer_config().mtu, Some(PEER_PARAMETERS.mtu));

    // a late answer of the upper layer is dropped
    manager.reconfigure_response(cids[0], ReconfigResult::Success).unwrap();

    assert!(manager.host_mut().take_signals().is_empty());
}

#[test]
fn peer_reconfiguration_cannot_reduce_mtu() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    manager.peer_reconfigure_request(PEER, id(9), 90, 64, &REMOTE_CIDS);

    assert_eq!(states(&manager, &cids), all(ChannelState::Open, 3));

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::CreditBasedReconfigureResponse {
            identifier: id(9),
            result: ReconfigResult::MtuReductionNotAllowed,
        }]
    );

    manager.peer_reconfigure_request(PEER, id(10), 150, 64, &[0x7F]);

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::CreditBasedReconfigureResponse {
            identifier: id(10),
            result: ReconfigResult::InvalidDestinationCid,
        }]
    );

    assert!(recorder.take().is_empty());
}

#[test]
fn local_reconfiguration() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    manager.reconfigure(cids[0], 300, 64).unwrap();

    assert_eq!(states(&manager, &cids), all(ChannelState::Config, 3));

    let signals = manager.host_mut().take_signals();

    assert!(
        matches!(
            signals.as_slice(),
            [Signal::CreditBasedReconfigureRequest { mtu: 300, mps: 64, local_cids, .. }] if *local_cids == cids
        ),
        "unexpected signals {:?}",
        signals
    );

    // sending is not affected by reconfiguring the receiving direction
    manager.write(cids[1], vec![2]).unwrap();

    assert_eq!(manager.take_pdu(cids[1]), Some(vec![1, 0, 2]));

    // a second reconfiguration is dropped while the first is in progress
    manager.reconfigure(cids[2], 400, 64).unwrap();

    assert!(manager.host_mut().take_signals().is_empty());

    manager.dispatch(cids[0], Event::PeerReconfigResponse(ReconfigResult::Success));

    assert_eq!(states(&manager, &cids), all(ChannelState::Open, 3));

    assert_eq!(
        recorder.take(),
        [Indication::ReconfigCfm {
            cids: cids.clone(),
            result: ReconfigResult::Success
        }]
    );

    assert_eq!(manager.ccb(cids[2]).unwrap().our_config().mtu, Some(300));

    assert!(manager.host().alarms.is_empty());
}

#[test]
fn local_reconfiguration_refused_before_sending() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    manager.reconfigure(cids[0], LOCAL_PARAMETERS.mtu - 1, 64).unwrap();

    assert_eq!(states(&manager, &cids), all(ChannelState::Open, 3));

    assert!(manager.host_mut().take_signals().is_empty());

    assert_eq!(
        recorder.take(),
        [Indication::ReconfigCfm {
            cids: cids.clone(),
            result: ReconfigResult::MtuReductionNotAllowed
        }]
    );
}

#[test]
fn peer_reconfiguration_collides_with_local() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    manager.reconfigure(cids[0], 300, 64).unwrap();

    manager.host_mut().take_signals();

    manager.peer_reconfigure_request(PEER, id(11), 150, 64, &REMOTE_CIDS);

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::CreditBasedReconfigureResponse {
            identifier: id(11),
            result: ReconfigResult::UnacceptableParameters,
        }]
    );

    assert!(recorder.take().is_empty());
}

#[test]
fn unanswered_local_reconfiguration_disconnects() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    manager.reconfigure(cids[0], 300, 64).unwrap();

    manager.host_mut().take_signals();

    fire(&mut manager, cids[0], TimerKind::Reconfig);

    assert_eq!(states(&manager, &cids), all(ChannelState::W4PeerDisconnectRsp, 3));

    let indications = recorder.take();

    assert_eq!(
        indications[0],
        Indication::ReconfigCfm {
            cids: cids.clone(),
            result: ReconfigResult::Timeout
        }
    );

    for cid in cids.iter() {
        assert!(indications.contains(&Indication::DisconnectInd {
            cid: *cid,
            ack_needed: false
        }));
    }

    let disconnect_requests = manager
        .host_mut()
        .take_signals()
        .into_iter()
        .filter(|signal| matches!(signal, Signal::DisconnectionRequest { .. }))
        .count();

    assert_eq!(disconnect_requests, 3);

    for cid in cids.iter() {
        assert!(manager.host().alarm(*cid, TimerKind::State).is_some());

        manager.dispatch(*cid, Event::PeerDisconnectResponse);
    }

    assert_eq!(states(&manager, &cids), vec![None; 3]);

    assert!(recorder.take().is_empty());

    assert!(manager.host().alarms.is_empty());
}

#[test]
fn reconfiguration_moves_to_a_remaining_channel() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    manager.reconfigure(cids[0], 300, 64).unwrap();

    manager.host_mut().take_signals();

    let token = manager.host().alarm(cids[0], TimerKind::Reconfig).unwrap();

    // the channel holding the reconfiguration is disconnected by the peer
    manager.dispatch(cids[0], Event::PeerDisconnectRequest { identifier: id(12) });

    manager.disconnect_response(cids[0]).unwrap();

    assert_eq!(manager.state(cids[0]), None);

    assert!(manager.host().alarms.contains_key(&token));

    recorder.take();

    manager.dispatch(cids[2], Event::PeerReconfigResponse(ReconfigResult::Success));

    assert_eq!(
        recorder.take(),
        [Indication::ReconfigCfm {
            cids: vec![cids[1], cids[2]],
            result: ReconfigResult::Success
        }]
    );

    assert_eq!(&states(&manager, &cids)[1..], all(ChannelState::Open, 2));
}

#[test]
fn moved_reconfiguration_keeps_its_deadline() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    manager.reconfigure(cids[0], 300, 64).unwrap();

    manager.host_mut().take_signals();

    let token = manager.host().alarm(cids[0], TimerKind::Reconfig).unwrap();

    manager.dispatch(cids[0], Event::PeerDisconnectRequest { identifier: id(12) });

    manager.disconnect_response(cids[0]).unwrap();

    recorder.take();

    manager.host_mut().take_signals();

    // the alarm armed for the first attempt is the only reconfiguration timer
    let reconfig_alarms: Vec<_> = manager
        .host()
        .alarms
        .keys()
        .filter(|token| token.kind() == TimerKind::Reconfig)
        .copied()
        .collect();

    assert_eq!(reconfig_alarms, [token]);

    assert_eq!(manager.host().alarms.get(&token), Some(&manager.config().config_timeout));

    manager.host_mut().alarms.remove(&token);

    manager.timer_expired(token);

    let indications = recorder.take();

    assert_eq!(
        indications[0],
        Indication::ReconfigCfm {
            cids: vec![cids[1], cids[2]],
            result: ReconfigResult::Timeout
        }
    );

    let disconnected: Vec<DynChannelId> = manager
        .host_mut()
        .take_signals()
        .into_iter()
        .filter_map(|signal| match signal {
            Signal::DisconnectionRequest { local_cid, .. } => Some(local_cid),
            _ => None,
        })
        .collect();

    assert_eq!(disconnected, [cids[1], cids[2]]);
}

#[test]
fn peer_reconfiguration_of_a_disconnecting_channel_is_refused() {
    let (mut manager, recorder) = credit_manager();

    let cids = open_incoming(&mut manager, &recorder);

    manager.disconnect(cids[0]).unwrap();

    assert_eq!(manager.state(cids[0]), Some(ChannelState::W4PeerDisconnectRsp));

    manager.host_mut().take_signals();

    manager.peer_reconfigure_request(PEER, id(9), 150, 64, &REMOTE_CIDS);

    assert_eq!(
        manager.host_mut().take_signals(),
        [Signal::CreditBasedReconfigureResponse {
            identifier: id(9),
            result: ReconfigResult::UnacceptableParameters,
        }]
    );

    assert_eq!(&states(&manager, &cids)[1..], all(ChannelState::Open, 2));

    assert!(recorder.take().is_empty());

    assert!(manager.host().alarm(cids[1], TimerKind::Reconfig).is_none());
}
