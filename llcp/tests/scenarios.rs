//! Integration tests exercising the Version Exchange and Feature Exchange procedures end to end,
//! through `Engine`'s public API only.

use rubble_llcp::{
    Connection, Engine, FeatureSet, NotificationKind, NotificationSink, TxPdu, TxSink, Settings,
};

#[derive(Debug, Clone, Copy)]
struct Harness {
    company_id: u16,
    sub_version_number: u16,
    features: FeatureSet,
}

impl Settings for Harness {
    fn company_id(&self) -> u16 {
        self.company_id
    }

    fn sub_version_number(&self) -> u16 {
        self.sub_version_number
    }

    fn supported_features(&self) -> FeatureSet {
        self.features
    }
}

fn harness() -> Harness {
    // Every scenario below goes through `Engine`, which logs each PDU send/receive and FSM
    // park/complete through `log`'s macros; `RUST_LOG=trace cargo test -- --nocapture` makes a
    // failing scenario's control-plane history visible.
    let _ = env_logger::builder().is_test(true).try_init();
    Harness {
        company_id: 0x005D,
        sub_version_number: 0x0001,
        features: FeatureSet::LE_ENCRYPTION | FeatureSet::LE_PING,
    }
}

#[derive(Default)]
struct TxRecorder(Vec<Vec<u8>>);

impl TxSink for TxRecorder {
    fn tx_enqueue(&mut self, pdu: TxPdu) {
        self.0.push(pdu.bytes().to_vec());
    }
}

#[derive(Default)]
struct NtfRecorder(Vec<NotificationKind>);

impl NotificationSink for NtfRecorder {
    fn rx_enqueue(&mut self, notification: NotificationKind) {
        self.0.push(notification);
    }
}

type TestEngine<const NCTX: usize, const NTXB: usize, const NNTF: usize> =
    Engine<Harness, TxRecorder, NtfRecorder, NCTX, NTXB, NNTF>;

#[test]
fn s1_local_version_exchange_happy_path() {
    let mut engine: TestEngine<2, 2, 2> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    engine.version_exchange(&mut conn).unwrap();
    engine.run(&mut conn).unwrap();

    // The request went out matching the worked byte example from the wire-format note.
    assert_eq!(
        engine.tx_sink().0,
        vec![vec![0x03, 0x05, 0x0C, 0x09, 0x5D, 0x00, 0x01, 0x00]]
    );
    assert!(engine.notification_sink().0.is_empty());

    let mut peer_reply = [0u8; rubble_llcp::MAX_CTRL_PDU_LEN];
    let n = rubble_llcp::ControlPdu::VersionInd {
        version_number: 0x0A,
        company_id: 0x00F0,
        sub_version_number: 0x0777,
    }
    .encode(&mut peer_reply)
    .unwrap();
    engine.rx(&mut conn, &peer_reply[..n]).unwrap();

    assert_eq!(
        engine.notification_sink().0,
        vec![NotificationKind::VersionExchange {
            version_number: 0x0A,
            company_id: 0x00F0,
            sub_version_number: 0x0777,
        }]
    );

    // Quiescent: both pools fully returned.
    assert_eq!(engine.context_pool_free_count(), engine.context_pool_capacity());
    assert_eq!(engine.tx_pool_free_count(), engine.tx_pool_capacity());
    assert_eq!(engine.notification_pool_free_count(), engine.notification_pool_capacity());
}

#[test]
fn s2_remote_version_exchange_responds_immediately() {
    let mut engine: TestEngine<2, 2, 2> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    let mut peer_req = [0u8; rubble_llcp::MAX_CTRL_PDU_LEN];
    let n = rubble_llcp::ControlPdu::VersionInd {
        version_number: 0x0A,
        company_id: 0x00F0,
        sub_version_number: 0x0042,
    }
    .encode(&mut peer_req)
    .unwrap();

    // Unsolicited: no local version_exchange() call, no prior run() tick.
    engine.rx(&mut conn, &peer_req[..n]).unwrap();

    assert_eq!(
        engine.tx_sink().0,
        vec![vec![0x03, 0x05, 0x0C, 0x09, 0x5D, 0x00, 0x01, 0x00]]
    );
    assert_eq!(engine.context_pool_free_count(), engine.context_pool_capacity());

    // A second peer VERSION_IND is rejected rather than silently re-answered.
    let err = engine.rx(&mut conn, &peer_req[..n]).unwrap_err();
    assert_eq!(
        err,
        rubble_llcp::Error::ProtocolViolation(rubble_llcp::ProtocolViolation::DuplicateVersionInd)
    );
}

#[test]
fn s3_tx_backpressure_parks_and_never_sends() {
    let mut engine: TestEngine<2, 0, 2> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    engine.version_exchange(&mut conn).unwrap();
    for _ in 0..5 {
        engine.run(&mut conn).unwrap();
    }

    assert!(engine.tx_sink().0.is_empty());
    assert!(engine.notification_sink().0.is_empty());
    // The context is parked, not leaked or dropped: it still holds its pool slot.
    assert_eq!(engine.context_pool_free_count(), engine.context_pool_capacity() - 1);
}

#[test]
fn s4_notification_backpressure_parks_and_never_notifies() {
    let mut engine: TestEngine<2, 2, 0> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    engine.version_exchange(&mut conn).unwrap();
    engine.run(&mut conn).unwrap();
    assert_eq!(engine.tx_sink().0.len(), 1);

    let mut peer_reply = [0u8; rubble_llcp::MAX_CTRL_PDU_LEN];
    let n = rubble_llcp::ControlPdu::VersionInd {
        version_number: 0x0A,
        company_id: 0x00F0,
        sub_version_number: 0x0001,
    }
    .encode(&mut peer_reply)
    .unwrap();
    engine.rx(&mut conn, &peer_reply[..n]).unwrap();

    for _ in 0..5 {
        engine.run(&mut conn).unwrap();
    }

    assert!(engine.notification_sink().0.is_empty());
    assert_eq!(engine.context_pool_free_count(), engine.context_pool_capacity() - 1);
}

#[test]
fn s5_second_local_initiation_is_served_from_cache() {
    let mut engine: TestEngine<2, 2, 2> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    engine.version_exchange(&mut conn).unwrap();
    engine.run(&mut conn).unwrap();

    let mut peer_reply = [0u8; rubble_llcp::MAX_CTRL_PDU_LEN];
    let n = rubble_llcp::ControlPdu::VersionInd {
        version_number: 0x0A,
        company_id: 0x00F0,
        sub_version_number: 0x0001,
    }
    .encode(&mut peer_reply)
    .unwrap();
    engine.rx(&mut conn, &peer_reply[..n]).unwrap();
    assert_eq!(engine.tx_sink().0.len(), 1);
    assert_eq!(engine.notification_sink().0.len(), 1);

    // Re-initiating after completion never touches the wire again, but still notifies.
    engine.version_exchange(&mut conn).unwrap();
    engine.run(&mut conn).unwrap();

    assert_eq!(engine.tx_sink().0.len(), 1, "no second LL_VERSION_IND was sent");
    assert_eq!(engine.notification_sink().0.len(), 2);
    assert_eq!(
        engine.notification_sink().0[1],
        NotificationKind::VersionExchange {
            version_number: 0x0A,
            company_id: 0x00F0,
            sub_version_number: 0x0001,
        }
    );
}

#[test]
fn s6_disconnect_drains_pending_contexts_and_is_idempotent() {
    let mut engine: TestEngine<3, 3, 3> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    engine.version_exchange(&mut conn).unwrap();
    engine.feature_exchange(&mut conn).unwrap();
    engine.version_exchange(&mut conn).unwrap();
    assert_eq!(engine.context_pool_free_count(), 0);

    engine.disconnect(&mut conn);
    assert_eq!(engine.context_pool_free_count(), engine.context_pool_capacity());

    // Idempotent: nothing left to drain, pool counts don't move.
    engine.disconnect(&mut conn);
    assert_eq!(engine.context_pool_free_count(), engine.context_pool_capacity());

    // A disconnected connection rejects further procedure initiation cleanly (queues never run).
    engine.version_exchange(&mut conn).unwrap();
    engine.run(&mut conn).unwrap();
    assert!(engine.tx_sink().0.is_empty());
}

#[test]
fn local_feature_exchange_masks_against_peer_response() {
    let mut engine: TestEngine<2, 2, 2> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    engine.feature_exchange(&mut conn).unwrap();
    engine.run(&mut conn).unwrap();
    assert_eq!(engine.tx_sink().0.len(), 1);

    let mut peer_reply = [0u8; rubble_llcp::MAX_CTRL_PDU_LEN];
    let n = rubble_llcp::ControlPdu::FeatureRsp {
        features: FeatureSet::LE_ENCRYPTION | FeatureSet::CONN_PARAMETERS_REQUEST,
    }
    .encode(&mut peer_reply)
    .unwrap();
    engine.rx(&mut conn, &peer_reply[..n]).unwrap();

    assert_eq!(
        engine.notification_sink().0,
        vec![NotificationKind::FeatureExchange {
            features: FeatureSet::LE_ENCRYPTION | FeatureSet::CONN_PARAMETERS_REQUEST,
        }]
    );
}

#[test]
fn remote_feature_exchange_responds_with_intersection() {
    let mut engine: TestEngine<2, 2, 2> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    let mut peer_req = [0u8; rubble_llcp::MAX_CTRL_PDU_LEN];
    // Peer claims every bit the local settings also claim, plus one the local side lacks.
    let n = rubble_llcp::ControlPdu::FeatureReq {
        features: FeatureSet::LE_ENCRYPTION
            | FeatureSet::LE_PING
            | FeatureSet::SLAVE_INITIATED_FEATURE_EXCHANGE,
    }
    .encode(&mut peer_req)
    .unwrap();
    engine.rx(&mut conn, &peer_req[..n]).unwrap();

    let response = rubble_llcp::ControlPdu::decode(&engine.tx_sink().0[0]).unwrap();
    assert_eq!(
        response,
        rubble_llcp::ControlPdu::FeatureRsp {
            features: FeatureSet::LE_ENCRYPTION | FeatureSet::LE_PING,
        }
    );

    // Unlike version exchange, a second feature exchange from the peer is allowed.
    engine.rx(&mut conn, &peer_req[..n]).unwrap();
    assert_eq!(engine.tx_sink().0.len(), 2);
}

#[test]
fn concurrent_initiation_resolves_local_side_from_remote_exchange_cache() {
    let mut engine: TestEngine<2, 2, 2> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    // We queue a local initiation, but the peer's own VERSION_IND lands before we ever get a
    // `run()` tick to send ours. The local context is still IDLE (never ticked), so this takes
    // the "already completed" cache shortcut in `fsm::local::step`, not the COLLISION event —
    // see `instant_collision_while_local_is_wait_tx` and `..._wait_rx` below for that.
    engine.version_exchange(&mut conn).unwrap();

    let mut peer_req = [0u8; rubble_llcp::MAX_CTRL_PDU_LEN];
    let n = rubble_llcp::ControlPdu::VersionInd {
        version_number: 0x0A,
        company_id: 0x00F0,
        sub_version_number: 0x0099,
    }
    .encode(&mut peer_req)
    .unwrap();
    engine.rx(&mut conn, &peer_req[..n]).unwrap();

    // The remote side answered on the wire; replying to a peer-initiated exchange never itself
    // notifies the host (only a locally-driven completion does).
    assert_eq!(engine.tx_sink().0.len(), 1);
    assert!(engine.notification_sink().0.is_empty());

    // Now our own queued initiation gets its first tick. Per invariant 3 (at most one
    // LL_VERSION_IND per connection), it never transmits — it completes straight from the cache
    // the remote exchange just populated, and still notifies the host.
    engine.run(&mut conn).unwrap();

    assert_eq!(engine.tx_sink().0.len(), 1, "no second LL_VERSION_IND was sent");
    assert_eq!(
        engine.notification_sink().0,
        vec![NotificationKind::VersionExchange {
            version_number: 0x0A,
            company_id: 0x00F0,
            sub_version_number: 0x0099,
        }]
    );
    assert_eq!(engine.context_pool_free_count(), engine.context_pool_capacity());
}

#[test]
fn instant_collision_while_local_is_wait_tx() {
    // TX pool capacity 0: after `run()`, the local context is ACTIVE but stuck in WAIT_TX,
    // having never encoded or sent anything (`expected_opcode` is still unset).
    let mut engine: TestEngine<2, 0, 2> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    engine.version_exchange(&mut conn).unwrap();
    engine.run(&mut conn).unwrap();
    assert!(engine.tx_sink().0.is_empty(), "TX pool is empty, nothing could go out yet");

    let mut peer_req = [0u8; rubble_llcp::MAX_CTRL_PDU_LEN];
    let n = rubble_llcp::ControlPdu::VersionInd {
        version_number: 0x0A,
        company_id: 0x00F0,
        sub_version_number: 0x0055,
    }
    .encode(&mut peer_req)
    .unwrap();
    // The peer's own VERSION_IND arrives while our local context is still parked in WAIT_TX:
    // `rx`'s collision check fires a real `Collision` event against it, rather than the local
    // context ever reaching the "already completed from cache" shortcut.
    engine.rx(&mut conn, &peer_req[..n]).unwrap();

    assert_eq!(
        engine.notification_sink().0,
        vec![NotificationKind::VersionExchange {
            version_number: 0x0A,
            company_id: 0x00F0,
            sub_version_number: 0x0055,
        }],
        "the collision loser inherits the winner's result instead of ever transmitting"
    );
    // The local context was freed on collision; one slot stays in use for the remote context
    // that now owns answering the peer's request (also parked, TX pool capacity is still 0).
    assert_eq!(engine.context_pool_free_count(), 1);
}

#[test]
fn instant_collision_while_local_is_wait_rx() {
    // Feature Exchange has distinct request/response opcodes, so a local context that has
    // already sent LL_FEATURE_REQ and is parked in WAIT_RX (expecting LL_FEATURE_RSP) does not
    // get swallowed by Rule 1 when the peer's own LL_FEATURE_REQ arrives — it falls through to
    // the Rule 3 collision check while genuinely WAIT_RX, not WAIT_TX.
    let mut engine: TestEngine<2, 2, 2> =
        Engine::new(harness(), TxRecorder::default(), NtfRecorder::default());
    let mut conn = Connection::new();
    engine.connect(&mut conn);

    engine.feature_exchange(&mut conn).unwrap();
    engine.run(&mut conn).unwrap();
    assert_eq!(engine.tx_sink().0.len(), 1, "our own LL_FEATURE_REQ went out");

    let mut peer_req = [0u8; rubble_llcp::MAX_CTRL_PDU_LEN];
    let n = rubble_llcp::ControlPdu::FeatureReq {
        features: FeatureSet::LE_ENCRYPTION | FeatureSet::CONN_PARAMETERS_REQUEST,
    }
    .encode(&mut peer_req)
    .unwrap();
    engine.rx(&mut conn, &peer_req[..n]).unwrap();

    // Our queued local exchange completes from the cache the collision populated instead of
    // ever seeing its own LL_FEATURE_RSP.
    assert_eq!(
        engine.notification_sink().0,
        vec![NotificationKind::FeatureExchange {
            features: FeatureSet::LE_ENCRYPTION | FeatureSet::CONN_PARAMETERS_REQUEST,
        }]
    );
    // The peer's LL_FEATURE_REQ was itself answered on the wire by the remote responder.
    assert_eq!(engine.tx_sink().0.len(), 2);
    assert_eq!(engine.context_pool_free_count(), engine.context_pool_capacity());
}
