//! Public API: connection lifecycle, RX delivery, and procedure initiation.

use log::{error, warn};

use crate::conn::{Connection, ReqState};
use crate::error::{Error, ProtocolViolation};
use crate::fsm::{self, behavior_for, LocalEvent, RemoteEvent, StepOutcome};
use crate::notification::{NotificationSink, MAX_NTF_LEN};
use crate::pdu::{ControlPdu, Opcode, MAX_CTRL_PDU_LEN};
use crate::pool::{BufPool, ContextPool, CtxHandle};
use crate::procedure::{CommonFsmState, ProcedureContext, ProcedureKind};
use crate::settings::Settings;
use crate::transport::TxSink;

/// The LLCP engine: the three fixed-capacity pools plus the three external collaborators
/// (transmit sink, notification sink, settings oracle), generic over their capacities and
/// concrete types.
///
/// The pools are not `static`s: `Engine` owns them, so a test builds a small
/// `Engine<_, _, _, 1, 1, 1>` to exercise exhaustion, and an embedding with several connections
/// builds one `Engine` and serializes calls across connections itself.
pub struct Engine<S, TX, NTFS, const NCTX: usize, const NTXB: usize, const NNTF: usize> {
    ctx_pool: ContextPool<ProcedureContext, NCTX>,
    tx_pool: BufPool<MAX_CTRL_PDU_LEN, NTXB>,
    ntf_pool: BufPool<MAX_NTF_LEN, NNTF>,
    settings: S,
    tx_sink: TX,
    ntf_sink: NTFS,
}

impl<S, TX, NTFS, const NCTX: usize, const NTXB: usize, const NNTF: usize>
    Engine<S, TX, NTFS, NCTX, NTXB, NNTF>
where
    S: Settings,
    TX: TxSink,
    NTFS: NotificationSink,
{
    /// One-shot initialization of the three pools and the external collaborators.
    pub fn new(settings: S, tx_sink: TX, ntf_sink: NTFS) -> Self {
        Self {
            ctx_pool: ContextPool::new(),
            tx_pool: BufPool::new(),
            ntf_pool: BufPool::new(),
            settings,
            tx_sink,
            ntf_sink,
        }
    }

    /// Zeroes connection state: both request FSMs `DISCONNECTED`, queues empty, caches cleared.
    pub fn conn_init(&self, conn: &mut Connection) {
        *conn = Connection::new();
    }

    /// Drives LR and RR from `DISCONNECTED` to `IDLE`.
    pub fn connect(&mut self, conn: &mut Connection) {
        if conn.lr_state == ReqState::Disconnected {
            conn.lr_state = ReqState::Idle;
        }
        if conn.rr_state == ReqState::Disconnected {
            conn.rr_state = ReqState::Idle;
        }
    }

    /// Drains both queues, frees their contexts, and returns LR/RR to `DISCONNECTED`.
    ///
    /// Idempotent: calling this on an already-disconnected connection finds both queues already
    /// empty and leaves pool counts untouched (testable property 6).
    pub fn disconnect(&mut self, conn: &mut Connection) {
        conn.local_queue.drain(&mut self.ctx_pool);
        conn.remote_queue.drain(&mut self.ctx_pool);
        conn.lr_state = ReqState::Disconnected;
        conn.rr_state = ReqState::Disconnected;
    }

    /// Allocates a local context for the Version Exchange procedure and enqueues it.
    pub fn version_exchange(&mut self, conn: &mut Connection) -> Result<(), Error> {
        self.initiate_local(conn, ProcedureKind::VersionExchange)
    }

    /// Allocates a local context for the Feature Exchange procedure and enqueues it.
    pub fn feature_exchange(&mut self, conn: &mut Connection) -> Result<(), Error> {
        self.initiate_local(conn, ProcedureKind::FeatureExchange)
    }

    fn initiate_local(&mut self, conn: &mut Connection, kind: ProcedureKind) -> Result<(), Error> {
        let Some(handle) = self.ctx_pool.acquire(ProcedureContext::new_local(kind)) else {
            return Err(Error::ContextPoolExhausted);
        };
        conn.local_queue.push_back(&mut self.ctx_pool, handle);
        Ok(())
    }

    /// Drives one tick of both the Local and Remote Request FSMs.
    ///
    /// Must be called periodically by the embedding scheduler; any FSM parked in `WAIT_TX` or
    /// `WAIT_NTF` re-evaluates here.
    pub fn run(&mut self, conn: &mut Connection) -> Result<(), Error> {
        self.lr_tick(conn);
        self.rr_tick(conn)
    }

    /// Feeds one received control PDU into the dispatcher.
    pub fn rx(&mut self, conn: &mut Connection, bytes: &[u8]) -> Result<(), Error> {
        let pdu = ControlPdu::decode(bytes)?;
        let opcode = pdu.opcode();

        // Rule 1: the active local context is waiting for exactly this opcode, or for one of
        // the peer-error opcodes (LL_UNKNOWN_RSP/LL_REJECT_IND/LL_REJECT_EXT_IND) that can
        // arrive in place of any procedure's own response.
        if conn.lr_state == ReqState::Active {
            if let Some(handle) = conn.local_queue.front() {
                let ctx = self.ctx_pool.get(handle);
                if ctx.expected_opcode == Some(opcode) || behavior_for(ctx.kind).error_opcodes.contains(&opcode) {
                    return self.handle_local_response(conn, handle, pdu);
                }
            }
        }

        // Rule 2: the active remote context is waiting for (another instance of) this opcode.
        if conn.rr_state == ReqState::Active {
            if let Some(handle) = conn.remote_queue.front() {
                if self.ctx_pool.get(handle).expected_opcode == Some(opcode) {
                    let kind = self.ctx_pool.get(handle).kind;
                    update_cache(conn, kind, &pdu);
                    self.drive_remote_step(conn, handle, RemoteEvent::Request)?;
                    return Ok(());
                }
            }
        }

        // Rule 3: a new peer-initiated procedure.
        let kind = map_opcode_to_kind(opcode)?;
        update_cache(conn, kind, &pdu);

        // Instant collision: our own local context for the same procedure is mid-exchange
        // (queued but not yet sent, or already sent and awaiting the response) when the peer's
        // request for that same procedure arrives.
        if conn.lr_state == ReqState::Active {
            if let Some(local_handle) = conn.local_queue.front() {
                let local_ctx = self.ctx_pool.get(local_handle);
                if local_ctx.kind == kind
                    && matches!(local_ctx.state, CommonFsmState::WaitTx | CommonFsmState::WaitRx)
                {
                    self.drive_local_step(conn, local_handle, LocalEvent::Collision);
                }
            }
        }

        let behavior = behavior_for(kind);
        let Some(handle) = self
            .ctx_pool
            .acquire(ProcedureContext::new_remote(kind, behavior.request_opcode))
        else {
            warn!("RR: context pool exhausted, dropping unmatched control PDU {opcode:?}");
            return Ok(());
        };
        conn.remote_queue.push_back(&mut self.ctx_pool, handle);
        if conn.rr_state == ReqState::Idle {
            self.rr_admit_and_drive(conn, handle)?;
        }
        Ok(())
    }

    fn handle_local_response(
        &mut self,
        conn: &mut Connection,
        handle: CtxHandle,
        pdu: ControlPdu,
    ) -> Result<(), Error> {
        match pdu {
            ControlPdu::RejectInd { error_code } | ControlPdu::RejectExtInd { error_code, .. } => {
                self.drive_local_step(conn, handle, LocalEvent::Reject { error_code });
            }
            ControlPdu::UnknownRsp { .. } => {
                self.drive_local_step(conn, handle, LocalEvent::Unknown);
            }
            other => {
                let kind = self.ctx_pool.get(handle).kind;
                update_cache(conn, kind, &other);
                self.drive_local_step(conn, handle, LocalEvent::Response);
            }
        }
        Ok(())
    }

    fn lr_tick(&mut self, conn: &mut Connection) {
        match conn.lr_state {
            ReqState::Disconnected => {}
            ReqState::Idle => {
                if let Some(handle) = conn.local_queue.front() {
                    conn.lr_state = ReqState::Active;
                    self.drive_local_step(conn, handle, LocalEvent::Run);
                }
            }
            ReqState::Active => match conn.local_queue.front() {
                Some(handle) => {
                    self.drive_local_step(conn, handle, LocalEvent::Run);
                }
                None => conn.lr_state = ReqState::Idle,
            },
        }
    }

    fn rr_tick(&mut self, conn: &mut Connection) -> Result<(), Error> {
        match conn.rr_state {
            ReqState::Disconnected => Ok(()),
            ReqState::Idle => {
                if let Some(handle) = conn.remote_queue.front() {
                    self.rr_admit_and_drive(conn, handle)?;
                }
                Ok(())
            }
            ReqState::Active => match conn.remote_queue.front() {
                Some(handle) => self.drive_remote_step(conn, handle, RemoteEvent::Run).map(|_| ()),
                None => {
                    conn.rr_state = ReqState::Idle;
                    Ok(())
                }
            },
        }
    }

    /// Moves a freshly-queued (or freshly-promoted) remote context `IDLE -> WAIT_RX` and
    /// immediately delivers the request that's already sitting in `conn`'s cache, rather than
    /// waiting for the next `run()` tick.
    fn rr_admit_and_drive(&mut self, conn: &mut Connection, handle: CtxHandle) -> Result<(), Error> {
        conn.rr_state = ReqState::Active;
        self.drive_remote_step(conn, handle, RemoteEvent::Run)?;
        self.drive_remote_step(conn, handle, RemoteEvent::Request)?;
        Ok(())
    }

    fn drive_local_step(&mut self, conn: &mut Connection, handle: CtxHandle, event: LocalEvent) -> StepOutcome {
        let ctx = self.ctx_pool.get_mut(handle);
        let outcome = fsm::local::step(
            ctx,
            conn,
            event,
            &self.settings,
            &mut self.tx_pool,
            &mut self.tx_sink,
            &mut self.ntf_pool,
            &mut self.ntf_sink,
        );
        if outcome == StepOutcome::Complete {
            conn.local_queue.pop_front(&mut self.ctx_pool);
            self.ctx_pool.release(handle);
            conn.lr_state = ReqState::Idle;
        }
        outcome
    }

    fn drive_remote_step(
        &mut self,
        conn: &mut Connection,
        handle: CtxHandle,
        event: RemoteEvent,
    ) -> Result<StepOutcome, Error> {
        let ctx = self.ctx_pool.get_mut(handle);
        let outcome = fsm::remote::step(ctx, conn, event, &self.settings, &mut self.tx_pool, &mut self.tx_sink)?;
        if outcome == StepOutcome::Complete {
            conn.remote_queue.pop_front(&mut self.ctx_pool);
            self.ctx_pool.release(handle);
            conn.rr_state = ReqState::Idle;
        }
        Ok(outcome)
    }

    /// Borrows the configured TX sink, e.g. for an embedding that drains a recorder-style sink
    /// rather than one that enqueues directly onto a hardware queue.
    pub fn tx_sink(&self) -> &TX {
        &self.tx_sink
    }

    /// Borrows the configured notification sink, for the same reason as [`Self::tx_sink`].
    pub fn notification_sink(&self) -> &NTFS {
        &self.ntf_sink
    }

    // -- introspection, mainly for tests exercising testable property 1 (pool bookkeeping) --

    pub fn context_pool_capacity(&self) -> usize {
        self.ctx_pool.capacity()
    }

    pub fn context_pool_free_count(&self) -> usize {
        self.ctx_pool.free_count()
    }

    pub fn tx_pool_capacity(&self) -> usize {
        self.tx_pool.capacity()
    }

    pub fn tx_pool_free_count(&self) -> usize {
        self.tx_pool.free_count()
    }

    pub fn notification_pool_capacity(&self) -> usize {
        self.ntf_pool.capacity()
    }

    pub fn notification_pool_free_count(&self) -> usize {
        self.ntf_pool.free_count()
    }
}

fn update_cache(conn: &mut Connection, kind: ProcedureKind, pdu: &ControlPdu) {
    match (kind, pdu) {
        (
            ProcedureKind::VersionExchange,
            ControlPdu::VersionInd {
                version_number,
                company_id,
                sub_version_number,
            },
        ) => {
            conn.vex.valid = true;
            conn.vex.version_number = *version_number;
            conn.vex.company_id = *company_id;
            conn.vex.sub_version_number = *sub_version_number;
        }
        (ProcedureKind::FeatureExchange, ControlPdu::FeatureReq { features })
        | (ProcedureKind::FeatureExchange, ControlPdu::FeatureRsp { features }) => {
            conn.fex.valid = true;
            conn.fex.features = *features;
        }
        _ => {}
    }
}

fn map_opcode_to_kind(opcode: crate::pdu::Opcode) -> Result<ProcedureKind, Error> {
    use crate::pdu::Opcode;
    match opcode {
        Opcode::VersionInd => Ok(ProcedureKind::VersionExchange),
        Opcode::FeatureReq => Ok(ProcedureKind::FeatureExchange),
        Opcode::FeatureRsp | Opcode::UnknownRsp | Opcode::RejectInd | Opcode::RejectExtInd => {
            error!(
                "rx: opcode {:#04x} matches no active context and starts no procedure, terminating connection",
                opcode.raw()
            );
            Err(Error::ProtocolViolation(ProtocolViolation::UnknownOpcode(opcode.raw())))
        }
    }
}
