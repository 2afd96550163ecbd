//! Remote Common FSM: drives a peer-initiated procedure through
//! `IDLE -> WAIT_RX -> (WAIT_TX) -> IDLE`.

use log::{error, info, warn};

use crate::conn::Connection;
use crate::error::{Error, ProtocolViolation};
use crate::fsm::{RemoteEvent, StepOutcome};
use crate::pdu::{ControlPdu, MAX_CTRL_PDU_LEN};
use crate::pool::BufPool;
use crate::procedure::{CommonFsmState, ProcedureContext, ProcedureKind};
use crate::settings::{Settings, BLUETOOTH_VERSION};
use crate::transport::{TxPdu, TxSink};

/// Advances one peer-initiated [`ProcedureContext`] by one `event`.
///
/// By the time `event` is [`RemoteEvent::Request`], the caller has already decoded the incoming
/// PDU into `conn`'s cache — this function only decides whether that request is a protocol
/// violation and, if not, builds and sends the response.
#[allow(clippy::too_many_arguments)]
pub fn step<S, TX, const NTXB: usize>(
    ctx: &mut ProcedureContext,
    conn: &mut Connection,
    event: RemoteEvent,
    settings: &S,
    tx_pool: &mut BufPool<MAX_CTRL_PDU_LEN, NTXB>,
    tx_sink: &mut TX,
) -> Result<StepOutcome, Error>
where
    S: Settings,
    TX: TxSink,
{
    match (ctx.state, event) {
        (CommonFsmState::Idle, RemoteEvent::Run) => {
            ctx.state = CommonFsmState::WaitRx;
            Ok(StepOutcome::Pending)
        }

        (CommonFsmState::WaitRx, RemoteEvent::Request) | (CommonFsmState::WaitTx, RemoteEvent::Run) => {
            if ctx.pause {
                ctx.state = CommonFsmState::WaitTx;
                return Ok(StepOutcome::Pending);
            }

            if already_sent_blocks(ctx.kind, conn) {
                error!("RR: peer sent a second {:?} request on this connection, terminating", ctx.kind);
                return Err(Error::ProtocolViolation(
                    ProtocolViolation::DuplicateVersionInd,
                ));
            }

            let Some(buf_handle) = tx_pool.acquire() else {
                warn!("RR: TX pool exhausted, parking in WAIT_TX");
                ctx.state = CommonFsmState::WaitTx;
                return Ok(StepOutcome::Pending);
            };

            let response = build_response(ctx.kind, conn, settings);
            let buf = tx_pool.buf_mut(buf_handle);
            let n = response
                .encode(buf)
                .expect("control PDU always fits MAX_CTRL_PDU_LEN");
            let pdu = TxPdu::new(&buf[..n]);
            tx_sink.tx_enqueue(pdu);
            tx_pool.release(buf_handle);
            info!("RR: -> {:?}", response);

            mark_sent(ctx.kind, conn);
            ctx.state = CommonFsmState::Idle;
            Ok(StepOutcome::Complete)
        }

        (CommonFsmState::WaitRx, RemoteEvent::Run) => {
            // Still waiting for the request PDU that justified this context's creation.
            Ok(StepOutcome::Pending)
        }

        (state, RemoteEvent::Request) => {
            // A second request for an already in-flight (not yet WAIT_RX) remote context is a
            // duplicate that arrived before we could respond to the first one.
            error!("RR: unexpected REQUEST in state {state:?}, treating as a duplicate and terminating");
            Err(Error::ProtocolViolation(ProtocolViolation::DuplicateRequest))
        }

        (CommonFsmState::WaitNtf, RemoteEvent::Run) => {
            // Neither procedure this crate ships needs a host notification on the remote side;
            // this path exists so a future remote procedure that does notify the host has
            // somewhere to land, and simply completes.
            ctx.state = CommonFsmState::Idle;
            Ok(StepOutcome::Complete)
        }
    }
}

fn already_sent_blocks(kind: ProcedureKind, conn: &Connection) -> bool {
    match kind {
        ProcedureKind::VersionExchange => conn.vex.sent,
        ProcedureKind::FeatureExchange => false,
        ProcedureKind::Unknown => unreachable!(),
    }
}

fn build_response<S: Settings>(kind: ProcedureKind, conn: &Connection, settings: &S) -> ControlPdu {
    let _ = conn;
    match kind {
        ProcedureKind::VersionExchange => ControlPdu::VersionInd {
            version_number: BLUETOOTH_VERSION,
            company_id: settings.company_id(),
            sub_version_number: settings.sub_version_number(),
        },
        ProcedureKind::FeatureExchange => ControlPdu::FeatureRsp {
            features: settings.supported_features() & conn.fex.features,
        },
        ProcedureKind::Unknown => unreachable!(),
    }
}

fn mark_sent(kind: ProcedureKind, conn: &mut Connection) {
    match kind {
        ProcedureKind::VersionExchange => conn.vex.sent = true,
        ProcedureKind::FeatureExchange => conn.fex.sent = true,
        ProcedureKind::Unknown => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::Opcode;

    struct TestSettings;
    impl Settings for TestSettings {
        fn company_id(&self) -> u16 {
            0x005D
        }
        fn sub_version_number(&self) -> u16 {
            0x0001
        }
        fn supported_features(&self) -> crate::pdu::FeatureSet {
            crate::pdu::FeatureSet::LE_ENCRYPTION | crate::pdu::FeatureSet::LE_PING
        }
    }

    #[derive(Default)]
    struct VecTxSink(Vec<TxPdu>);
    impl TxSink for VecTxSink {
        fn tx_enqueue(&mut self, pdu: TxPdu) {
            self.0.push(pdu);
        }
    }

    #[test]
    fn request_is_answered_and_completes() {
        let mut ctx = ProcedureContext::new_remote(ProcedureKind::VersionExchange, Opcode::VersionInd);
        ctx.state = CommonFsmState::Idle;
        let mut conn = Connection::new();
        conn.vex.valid = true;
        conn.vex.version_number = 0x0A;
        conn.vex.company_id = 0x00F0;
        conn.vex.sub_version_number = 0x0099;

        let mut tx_pool: BufPool<MAX_CTRL_PDU_LEN, 1> = BufPool::new();
        let mut tx_sink = VecTxSink::default();

        let outcome = step(&mut ctx, &mut conn, RemoteEvent::Run, &TestSettings, &mut tx_pool, &mut tx_sink).unwrap();
        assert_eq!(outcome, StepOutcome::Pending);
        assert_eq!(ctx.state, CommonFsmState::WaitRx);

        let outcome = step(&mut ctx, &mut conn, RemoteEvent::Request, &TestSettings, &mut tx_pool, &mut tx_sink).unwrap();
        assert_eq!(outcome, StepOutcome::Complete);
        assert_eq!(ctx.state, CommonFsmState::Idle);
        assert!(conn.vex.sent);
        assert_eq!(tx_sink.0.len(), 1);
    }

    #[test]
    fn second_version_ind_on_same_connection_is_a_protocol_violation() {
        let mut ctx = ProcedureContext::new_remote(ProcedureKind::VersionExchange, Opcode::VersionInd);
        ctx.state = CommonFsmState::WaitRx;
        let mut conn = Connection::new();
        conn.vex.sent = true; // a VERSION_IND already went out earlier on this connection

        let mut tx_pool: BufPool<MAX_CTRL_PDU_LEN, 1> = BufPool::new();
        let mut tx_sink = VecTxSink::default();

        let err = step(&mut ctx, &mut conn, RemoteEvent::Request, &TestSettings, &mut tx_pool, &mut tx_sink)
            .unwrap_err();
        assert_eq!(
            err,
            Error::ProtocolViolation(ProtocolViolation::DuplicateVersionInd)
        );
    }

    #[test]
    fn request_while_not_wait_rx_is_a_duplicate() {
        let mut ctx = ProcedureContext::new_remote(ProcedureKind::FeatureExchange, Opcode::FeatureReq);
        ctx.state = CommonFsmState::Idle;
        let mut conn = Connection::new();

        let mut tx_pool: BufPool<MAX_CTRL_PDU_LEN, 1> = BufPool::new();
        let mut tx_sink = VecTxSink::default();

        let err = step(&mut ctx, &mut conn, RemoteEvent::Request, &TestSettings, &mut tx_pool, &mut tx_sink)
            .unwrap_err();
        assert_eq!(err, Error::ProtocolViolation(ProtocolViolation::DuplicateRequest));
    }
}
