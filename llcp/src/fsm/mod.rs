//! Procedure FSMs: the Local and Remote Common FSMs, parameterized per [`ProcedureKind`] by a
//! small behavior table rather than one hand-written FSM per procedure.

pub mod local;
pub mod remote;

use crate::pdu::Opcode;
use crate::procedure::ProcedureKind;

/// Events the Local Common FSM reacts to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LocalEvent {
    Run,
    Response,
    Reject { error_code: u8 },
    Unknown,
    Collision,
}

/// Events the Remote Common FSM reacts to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Run,
    Request,
}

/// What a single FSM step did, so the owning Request FSM (LR/RR) knows whether to dequeue.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Still in flight (parked, or awaiting something external).
    Pending,
    /// The procedure completed; the caller should dequeue and free the context.
    Complete,
}

/// The three opcodes a peer may send in place of a procedure's own response, regardless of
/// which procedure is running: `LL_UNKNOWN_RSP`, `LL_REJECT_IND`, `LL_REJECT_EXT_IND`.
pub const ERROR_OPCODES: [Opcode; 3] = [Opcode::UnknownRsp, Opcode::RejectInd, Opcode::RejectExtInd];

/// Per-procedure opcode wiring. Both sides key off the same table: a local initiator sends
/// `request_opcode` and expects `response_opcode` back; a remote responder is armed to receive
/// `request_opcode` and replies with `response_opcode`. `error_opcodes` are the peer responses
/// that end the procedure abnormally instead — the same three for every procedure, but carried
/// here so callers don't have to know that's universal.
#[derive(Debug, Copy, Clone)]
pub struct Behavior {
    pub request_opcode: Opcode,
    pub response_opcode: Opcode,
    pub error_opcodes: [Opcode; 3],
}

pub fn behavior_for(kind: ProcedureKind) -> Behavior {
    match kind {
        ProcedureKind::VersionExchange => Behavior {
            request_opcode: Opcode::VersionInd,
            response_opcode: Opcode::VersionInd,
            error_opcodes: ERROR_OPCODES,
        },
        ProcedureKind::FeatureExchange => Behavior {
            request_opcode: Opcode::FeatureReq,
            response_opcode: Opcode::FeatureRsp,
            error_opcodes: ERROR_OPCODES,
        },
        ProcedureKind::Unknown => unreachable!("Unknown is never queued"),
    }
}
