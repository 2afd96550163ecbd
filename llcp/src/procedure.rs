//! Per-procedure context: the data model shared by every control procedure.

use crate::pdu::Opcode;

/// Which standardized control procedure a context is driving.
///
/// `Unknown` exists only so the RX dispatcher has something to name before it terminates a
/// connection over an opcode that matches no configured procedure (it is never queued).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProcedureKind {
    Unknown,
    VersionExchange,
    FeatureExchange,
}

/// Which side of the connection initiated this context's procedure.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Role {
    Local,
    Remote,
}

/// States shared by the Local and Remote Common FSMs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommonFsmState {
    Idle,
    WaitTx,
    WaitRx,
    WaitNtf,
}

/// One in-flight or pending procedure. Allocated from [`crate::pool::ContextPool`], linked into
/// a [`crate::pool::ContextQueue`] while pending, and freed on completion or disconnect.
#[derive(Debug, Copy, Clone)]
pub struct ProcedureContext {
    pub kind: ProcedureKind,
    pub role: Role,
    pub state: CommonFsmState,

    /// The opcode this context is waiting to receive, used by RX dispatch. `None` before the
    /// context has sent/received enough to know what to expect next.
    pub expected_opcode: Option<Opcode>,

    /// Set when an instant collision has been detected against this (local) context; consumed
    /// by the next `RUN` step, which converts it into a `COLLISION` event.
    pub collision: bool,

    /// Set while the procedure must defer starting (not used by the two procedures this crate
    /// ships, but part of the data model so new procedures can park on external preconditions).
    pub pause: bool,
}

impl ProcedureContext {
    pub fn new_local(kind: ProcedureKind) -> Self {
        Self {
            kind,
            role: Role::Local,
            state: CommonFsmState::Idle,
            expected_opcode: None,
            collision: false,
            pause: false,
        }
    }

    pub fn new_remote(kind: ProcedureKind, expected_opcode: Opcode) -> Self {
        Self {
            kind,
            role: Role::Remote,
            state: CommonFsmState::Idle,
            expected_opcode: Some(expected_opcode),
            collision: false,
            pause: false,
        }
    }
}
