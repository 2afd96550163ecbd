//! A Link Layer Control Procedure (LLCP) engine for a BLE controller's upper link layer.
//!
//! This crate drives the control-plane exchanges a connection's peers run over the LE data
//! channel — Version Exchange and Feature Exchange today, with the Local/Remote Common FSM split
//! designed so new procedures plug in via [`fsm::behavior_for`] rather than a hand-written state
//! machine each. It owns no radio, no timing, and no host-facing transport: those are the three
//! external interfaces in [`Settings`], [`TxSink`], and [`NotificationSink`].
//!
//! Everything is pool-allocated with `const`-generic capacities (see [`pool`]) so the engine never
//! allocates after construction, matching rubble's own `no_std`-first posture.
#![cfg_attr(not(test), no_std)]

mod bytes;
mod conn;
mod engine;
mod error;
mod fsm;
mod notification;
mod pdu;
mod pool;
mod procedure;
mod settings;
mod transport;

pub use conn::Connection;
pub use engine::Engine;
pub use error::{Error, ProtocolViolation};
pub use notification::{FailureReason, NotificationKind, NotificationSink, MAX_NTF_LEN};
pub use pdu::{ControlPdu, FeatureSet, Opcode, LLID_CONTROL, MAX_CTRL_PDU_LEN};
pub use pool::{BufHandle, BufPool, ContextPool, ContextQueue, CtxHandle};
pub use procedure::{CommonFsmState, ProcedureContext, ProcedureKind, Role};
pub use settings::{Settings, BLUETOOTH_VERSION};
pub use transport::{TxPdu, TxSink};
