//! LLCP control PDU codec.
//!
//! Wire format: a 2-octet header (`LL-ID`, `length`) followed by a 1-octet opcode and the
//! variant's little-endian payload. `length` counts the payload *after* the opcode, e.g. an
//! `LL_VERSION_IND` is `{03, 05, 0C, 09, 5D, 00, 01, 00}`: header `03 05`, opcode `0C`, then the
//! 5-octet payload.

use bitflags::bitflags;
use log::error;

use crate::bytes::{ByteReader, ByteWriter};
use crate::error::{Error, ProtocolViolation};

/// Marks a control-channel PDU in the 2-octet header's `LL-ID` position.
///
/// A real data-channel header packs this into 2 bits alongside sequence-number and more-data
/// bits that belong to the lower link layer, not this engine; we only ever look at this one
/// constant value, so it's kept as a plain byte rather than a bitfield.
pub const LLID_CONTROL: u8 = 0x03;

/// Upper bound on an encoded control PDU's total size (header + opcode + payload).
pub const MAX_CTRL_PDU_LEN: usize = 11;

/// Opcodes for the procedures and generic error responses this engine knows about.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    UnknownRsp = 0x07,
    FeatureReq = 0x08,
    FeatureRsp = 0x09,
    VersionInd = 0x0C,
    RejectInd = 0x0D,
    RejectExtInd = 0x11,
}

impl Opcode {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0x07 => Some(Self::UnknownRsp),
            0x08 => Some(Self::FeatureReq),
            0x09 => Some(Self::FeatureRsp),
            0x0C => Some(Self::VersionInd),
            0x0D => Some(Self::RejectInd),
            0x11 => Some(Self::RejectExtInd),
            _ => None,
        }
    }

    pub fn raw(self) -> u8 {
        self as u8
    }
}

bitflags! {
    /// Subset of the LE Link Layer feature bits relevant to a controller with no link of its own
    /// to a radio: this crate doesn't decide what the LLL supports, it only carries whatever the
    /// [`crate::Settings`] oracle reports and ANDs it against a peer's advertised set.
    pub struct FeatureSet: u64 {
        const LE_ENCRYPTION = 1 << 0;
        const CONN_PARAMETERS_REQUEST = 1 << 1;
        const EXTENDED_REJECT_INDICATION = 1 << 2;
        const SLAVE_INITIATED_FEATURE_EXCHANGE = 1 << 3;
        const LE_PING = 1 << 4;
    }
}

/// A decoded/to-be-encoded LLCP control PDU.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ControlPdu {
    VersionInd {
        version_number: u8,
        company_id: u16,
        sub_version_number: u16,
    },
    FeatureReq {
        features: FeatureSet,
    },
    FeatureRsp {
        features: FeatureSet,
    },
    UnknownRsp {
        unknown_type: u8,
    },
    RejectInd {
        error_code: u8,
    },
    RejectExtInd {
        reject_opcode: u8,
        error_code: u8,
    },
}

impl ControlPdu {
    pub fn opcode(&self) -> Opcode {
        match self {
            ControlPdu::VersionInd { .. } => Opcode::VersionInd,
            ControlPdu::FeatureReq { .. } => Opcode::FeatureReq,
            ControlPdu::FeatureRsp { .. } => Opcode::FeatureRsp,
            ControlPdu::UnknownRsp { .. } => Opcode::UnknownRsp,
            ControlPdu::RejectInd { .. } => Opcode::RejectInd,
            ControlPdu::RejectExtInd { .. } => Opcode::RejectExtInd,
        }
    }

    /// Encodes `self` into `buf`, writing the header, opcode, and payload. Returns the number of
    /// octets written.
    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut w = ByteWriter::new(buf);
        // Reserve the 2-octet header; payload length is only known once we've written the body.
        w.write_u8(LLID_CONTROL)?;
        w.write_u8(0)?; // patched below
        w.write_u8(self.opcode().raw())?;
        let body_start = w.len();

        match *self {
            ControlPdu::VersionInd {
                version_number,
                company_id,
                sub_version_number,
            } => {
                w.write_u8(version_number)?;
                w.write_u16_le(company_id)?;
                w.write_u16_le(sub_version_number)?;
            }
            ControlPdu::FeatureReq { features } | ControlPdu::FeatureRsp { features } => {
                w.write_u64_le(features.bits())?;
            }
            ControlPdu::UnknownRsp { unknown_type } => {
                w.write_u8(unknown_type)?;
            }
            ControlPdu::RejectInd { error_code } => {
                w.write_u8(error_code)?;
            }
            ControlPdu::RejectExtInd {
                reject_opcode,
                error_code,
            } => {
                w.write_u8(reject_opcode)?;
                w.write_u8(error_code)?;
            }
        }

        let total = w.len();
        let payload_len = (total - body_start) as u8;
        buf[1] = payload_len;
        Ok(total)
    }

    /// Decodes a control PDU from a full wire-format buffer (header included).
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < 3 {
            error!("control PDU decode: buffer too short for a header ({} bytes)", buf.len());
            return Err(Error::ProtocolViolation(ProtocolViolation::Malformed));
        }
        if buf[0] != LLID_CONTROL {
            error!("control PDU decode: LL-ID {:#04x} is not the control channel", buf[0]);
            return Err(Error::ProtocolViolation(ProtocolViolation::Malformed));
        }
        let payload_len = buf[1] as usize;
        let opcode_raw = buf[2];
        let opcode = Opcode::from_raw(opcode_raw).ok_or_else(|| {
            error!("control PDU decode: opcode {opcode_raw:#04x} matches no known procedure");
            Error::ProtocolViolation(ProtocolViolation::UnknownOpcode(opcode_raw))
        })?;
        let payload = &buf[3..];
        if payload.len() < payload_len {
            error!(
                "control PDU decode: length field claims {payload_len} bytes, only {} available",
                payload.len()
            );
            return Err(Error::ProtocolViolation(ProtocolViolation::Malformed));
        }
        let mut r = ByteReader::new(&payload[..payload_len]);

        Ok(match opcode {
            Opcode::VersionInd => ControlPdu::VersionInd {
                version_number: r.read_u8()?,
                company_id: r.read_u16_le()?,
                sub_version_number: r.read_u16_le()?,
            },
            Opcode::FeatureReq => ControlPdu::FeatureReq {
                features: FeatureSet::from_bits_truncate(r.read_u64_le()?),
            },
            Opcode::FeatureRsp => ControlPdu::FeatureRsp {
                features: FeatureSet::from_bits_truncate(r.read_u64_le()?),
            },
            Opcode::UnknownRsp => ControlPdu::UnknownRsp {
                unknown_type: r.read_u8()?,
            },
            Opcode::RejectInd => ControlPdu::RejectInd {
                error_code: r.read_u8()?,
            },
            Opcode::RejectExtInd => ControlPdu::RejectExtInd {
                reject_opcode: r.read_u8()?,
                error_code: r.read_u8()?,
            },
        })
    }
}
