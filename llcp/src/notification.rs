//! Host-bound notifications: the "notification sink" external interface.
//!
//! The host-facing receive ring itself is out of scope; this module only defines the
//! notification *value* this engine hands across that boundary and the trait the embedding
//! implements to receive it.

use crate::error::Error;
use crate::pdu::FeatureSet;
use crate::procedure::ProcedureKind;

/// Upper bound on an encoded notification's size, mirroring [`crate::pdu::MAX_CTRL_PDU_LEN`].
pub const MAX_NTF_LEN: usize = 11;

/// Why a procedure completed without its "normal" successful result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The peer rejected the procedure (`LL_REJECT_IND`/`LL_REJECT_EXT_IND`), carrying the
    /// error code it supplied.
    Rejected { error_code: u8 },

    /// The peer doesn't support this procedure at all (`LL_UNKNOWN_RSP`).
    NotSupported,
}

/// A host-bound event indicating procedure completion and carrying its result.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    VersionExchange {
        version_number: u8,
        company_id: u16,
        sub_version_number: u16,
    },
    FeatureExchange {
        features: FeatureSet,
    },
    ProcedureFailed {
        kind: ProcedureKind,
        reason: FailureReason,
    },
}

impl NotificationKind {
    /// Encodes a compact tag+payload representation into `buf`, for embeddings that forward
    /// notifications over the same kind of fixed-buffer ring the TX path uses. Returns the
    /// number of octets written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, Error> {
        use crate::bytes::ByteWriter;
        let mut w = ByteWriter::new(buf);
        match *self {
            NotificationKind::VersionExchange {
                version_number,
                company_id,
                sub_version_number,
            } => {
                w.write_u8(0x01)?;
                w.write_u8(version_number)?;
                w.write_u16_le(company_id)?;
                w.write_u16_le(sub_version_number)?;
            }
            NotificationKind::FeatureExchange { features } => {
                w.write_u8(0x02)?;
                w.write_u64_le(features.bits())?;
            }
            NotificationKind::ProcedureFailed { kind, reason } => {
                w.write_u8(0x03)?;
                w.write_u8(match kind {
                    ProcedureKind::Unknown => 0,
                    ProcedureKind::VersionExchange => 1,
                    ProcedureKind::FeatureExchange => 2,
                })?;
                match reason {
                    FailureReason::Rejected { error_code } => {
                        w.write_u8(1)?;
                        w.write_u8(error_code)?;
                    }
                    FailureReason::NotSupported => {
                        w.write_u8(2)?;
                    }
                }
            }
        }
        Ok(w.len())
    }
}

/// Delivers a host-bound notification to the link-layer receive queue. Synchronous,
/// non-blocking.
pub trait NotificationSink {
    fn rx_enqueue(&mut self, notification: NotificationKind);
}
