//! Error taxonomy for the LLCP engine.
//!
//! Backpressure (TX/notification pool exhaustion mid-FSM-step) is deliberately *not* part of
//! this enum: spec-wise it's always recovered locally by the FSM parking in `WAIT_TX`/`WAIT_NTF`
//! and retrying on the next [`crate::Engine::run`]. It never reaches a caller as a `Result::Err`.

/// Errors the engine can report to its caller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// A local procedure initiator found the context pool empty.
    ///
    /// The initiator receives this instead of a successful enqueue; no connection state changes.
    ContextPoolExhausted,

    /// The peer violated the Link Layer Control Protocol. Fatal to the connection.
    ProtocolViolation(ProtocolViolation),
}

/// The specific protocol violation observed. Carried inside [`Error::ProtocolViolation`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The peer sent a second `LL_VERSION_IND` on a connection where one was already exchanged.
    DuplicateVersionInd,

    /// The peer sent a second request for a procedure that does not permit repeated remote
    /// initiation while the previous exchange is still in flight.
    DuplicateRequest,

    /// An incoming control PDU's opcode does not match any active context and does not map to
    /// any procedure this engine supports. The spec does not permit silently discarding this.
    UnknownOpcode(u8),

    /// A control PDU failed to decode (truncated payload, bad length field).
    Malformed,
}
