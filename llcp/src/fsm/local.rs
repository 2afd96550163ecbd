//! Local Common FSM: drives a locally-initiated procedure through
//! `IDLE -> WAIT_TX -> WAIT_RX -> WAIT_NTF -> IDLE` (with completion possible at several points).

use log::{info, trace, warn};

use crate::conn::Connection;
use crate::fsm::{behavior_for, LocalEvent, StepOutcome};
use crate::notification::{FailureReason, NotificationKind, NotificationSink, MAX_NTF_LEN};
use crate::pdu::{ControlPdu, FeatureSet, MAX_CTRL_PDU_LEN};
use crate::pool::BufPool;
use crate::procedure::{CommonFsmState, ProcedureContext, ProcedureKind};
use crate::settings::{Settings, BLUETOOTH_VERSION};
use crate::transport::{TxPdu, TxSink};

/// Advances one locally-initiated [`ProcedureContext`] by one `event`.
///
/// `tx_pool`/`ntf_pool` provide the backpressure bookkeeping that parks a context in `WAIT_TX`/
/// `WAIT_NTF` instead of failing outright when a pool is momentarily exhausted; `settings` supplies
/// the fields an outgoing request needs from the settings oracle.
#[allow(clippy::too_many_arguments)]
pub fn step<S, TX, NTFS, const NTXB: usize, const NNTF: usize>(
    ctx: &mut ProcedureContext,
    conn: &mut Connection,
    event: LocalEvent,
    settings: &S,
    tx_pool: &mut BufPool<MAX_CTRL_PDU_LEN, NTXB>,
    tx_sink: &mut TX,
    ntf_pool: &mut BufPool<MAX_NTF_LEN, NNTF>,
    ntf_sink: &mut NTFS,
) -> StepOutcome
where
    S: Settings,
    TX: TxSink,
    NTFS: NotificationSink,
{
    match (ctx.state, event) {
        (CommonFsmState::Idle, LocalEvent::Run) | (CommonFsmState::WaitTx, LocalEvent::Run) => {
            if ctx.pause {
                ctx.state = CommonFsmState::WaitTx;
                return StepOutcome::Pending;
            }

            if already_completed_from_cache(ctx.kind, conn) {
                return complete_with_notification(ctx, conn, ntf_pool, ntf_sink);
            }

            let Some(buf_handle) = tx_pool.acquire() else {
                warn!("LR: TX pool exhausted, parking in WAIT_TX");
                ctx.state = CommonFsmState::WaitTx;
                return StepOutcome::Pending;
            };

            let request = build_request(ctx.kind, settings);
            let buf = tx_pool.buf_mut(buf_handle);
            let n = request
                .encode(buf)
                .expect("control PDU always fits MAX_CTRL_PDU_LEN");
            let pdu = TxPdu::new(&buf[..n]);
            tx_sink.tx_enqueue(pdu);
            tx_pool.release(buf_handle);
            info!("LR: -> {:?}", request);

            mark_sent(ctx.kind, conn);
            ctx.expected_opcode = Some(behavior_for(ctx.kind).response_opcode);
            ctx.state = CommonFsmState::WaitRx;
            StepOutcome::Pending
        }

        (CommonFsmState::WaitRx, LocalEvent::Response) => {
            // Decoding happens in the caller (it owns the raw bytes); by the time `Response`
            // reaches this function the cache has already been updated. Run completion.
            complete_with_notification(ctx, conn, ntf_pool, ntf_sink)
        }

        (CommonFsmState::WaitNtf, LocalEvent::Run) => {
            complete_with_notification(ctx, conn, ntf_pool, ntf_sink)
        }

        (_, LocalEvent::Reject { error_code }) => {
            info!("LR: peer rejected procedure (code {error_code:#04x})");
            deliver_failure(
                ctx,
                conn,
                ntf_pool,
                ntf_sink,
                FailureReason::Rejected { error_code },
            )
        }

        (_, LocalEvent::Unknown) => {
            info!("LR: peer does not support this procedure");
            deliver_failure(ctx, conn, ntf_pool, ntf_sink, FailureReason::NotSupported)
        }

        (CommonFsmState::WaitTx | CommonFsmState::WaitRx, LocalEvent::Collision) => {
            // The remote side initiated the same procedure concurrently and will complete it;
            // our own transmission (queued but not yet sent, or already sent and now moot) is
            // cancelled and we inherit the remote exchange's cached result once it lands.
            trace!("LR: instant collision, inheriting remote result");
            complete_with_notification(ctx, conn, ntf_pool, ntf_sink)
        }

        (state, event) => {
            trace!("LR: no transition for {state:?} x {event:?}, ignoring");
            StepOutcome::Pending
        }
    }
}

fn already_completed_from_cache(kind: ProcedureKind, conn: &Connection) -> bool {
    match kind {
        ProcedureKind::VersionExchange => conn.vex.sent && conn.vex.valid,
        ProcedureKind::FeatureExchange => false,
        ProcedureKind::Unknown => unreachable!(),
    }
}

fn build_request<S: Settings>(kind: ProcedureKind, settings: &S) -> ControlPdu {
    match kind {
        ProcedureKind::VersionExchange => ControlPdu::VersionInd {
            version_number: BLUETOOTH_VERSION,
            company_id: settings.company_id(),
            sub_version_number: settings.sub_version_number(),
        },
        ProcedureKind::FeatureExchange => ControlPdu::FeatureReq {
            features: settings.supported_features(),
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

fn complete_with_notification<NTFS, const NNTF: usize>(
    ctx: &mut ProcedureContext,
    conn: &mut Connection,
    ntf_pool: &mut BufPool<MAX_NTF_LEN, NNTF>,
    ntf_sink: &mut NTFS,
) -> StepOutcome
where
    NTFS: NotificationSink,
{
    let Some(buf_handle) = ntf_pool.acquire() else {
        warn!("LR: notification pool exhausted, parking in WAIT_NTF");
        ctx.state = CommonFsmState::WaitNtf;
        return StepOutcome::Pending;
    };

    let notification = match ctx.kind {
        ProcedureKind::VersionExchange => NotificationKind::VersionExchange {
            version_number: conn.vex.version_number,
            company_id: conn.vex.company_id,
            sub_version_number: conn.vex.sub_version_number,
        },
        ProcedureKind::FeatureExchange => NotificationKind::FeatureExchange {
            features: conn.fex.features,
        },
        ProcedureKind::Unknown => unreachable!(),
    };

    let buf = ntf_pool.buf_mut(buf_handle);
    notification
        .encode(buf)
        .expect("notification always fits MAX_NTF_LEN");
    ntf_sink.rx_enqueue(notification);
    ntf_pool.release(buf_handle);

    info!("LR: procedure complete, notified host");
    ctx.state = CommonFsmState::Idle;
    StepOutcome::Complete
}

fn deliver_failure<NTFS, const NNTF: usize>(
    ctx: &mut ProcedureContext,
    conn: &mut Connection,
    ntf_pool: &mut BufPool<MAX_NTF_LEN, NNTF>,
    ntf_sink: &mut NTFS,
    reason: FailureReason,
) -> StepOutcome
where
    NTFS: NotificationSink,
{
    let Some(buf_handle) = ntf_pool.acquire() else {
        warn!("LR: notification pool exhausted while delivering failure, parking in WAIT_NTF");
        ctx.state = CommonFsmState::WaitNtf;
        return StepOutcome::Pending;
    };
    let notification = NotificationKind::ProcedureFailed {
        kind: ctx.kind,
        reason,
    };
    let buf = ntf_pool.buf_mut(buf_handle);
    notification
        .encode(buf)
        .expect("notification always fits MAX_NTF_LEN");
    ntf_sink.rx_enqueue(notification);
    ntf_pool.release(buf_handle);

    // The "feature not supported" / "rejected" outcomes still update FeatureSet::empty() caches
    // for consistency, but there is nothing useful to cache for a failed exchange.
    let _ = conn;
    ctx.state = CommonFsmState::Idle;
    StepOutcome::Complete
}
