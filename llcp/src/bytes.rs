//! Minimal little-endian byte cursor, in the style of rubble's `bytes::{ByteReader, ByteWriter}`.
//!
//! Control PDU payloads are tiny (at most a handful of octets), so this only implements the
//! handful of primitives the codec in [`crate::pdu`] actually needs.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Error, ProtocolViolation};

/// Reads fields out of a received PDU payload, least-significant byte first.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn bytes_left(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        if self.bytes_left() < 1 {
            return Err(Error::ProtocolViolation(ProtocolViolation::Malformed));
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16_le(&mut self) -> Result<u16, Error> {
        if self.bytes_left() < 2 {
            return Err(Error::ProtocolViolation(ProtocolViolation::Malformed));
        }
        let v = LittleEndian::read_u16(&self.buf[self.pos..self.pos + 2]);
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u64_le(&mut self) -> Result<u64, Error> {
        if self.bytes_left() < 8 {
            return Err(Error::ProtocolViolation(ProtocolViolation::Malformed));
        }
        let v = LittleEndian::read_u64(&self.buf[self.pos..self.pos + 8]);
        self.pos += 8;
        Ok(v)
    }

    /// Returns whatever bytes remain unread.
    pub fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }
}

/// Writes fields into a zeroed PDU buffer, least-significant byte first.
pub struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn space_left(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn len(&self) -> usize {
        self.pos
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), Error> {
        if self.space_left() < 1 {
            return Err(Error::ProtocolViolation(ProtocolViolation::Malformed));
        }
        self.buf[self.pos] = v;
        self.pos += 1;
        Ok(())
    }

    pub fn write_u16_le(&mut self, v: u16) -> Result<(), Error> {
        if self.space_left() < 2 {
            return Err(Error::ProtocolViolation(ProtocolViolation::Malformed));
        }
        LittleEndian::write_u16(&mut self.buf[self.pos..self.pos + 2], v);
        self.pos += 2;
        Ok(())
    }

    pub fn write_u64_le(&mut self, v: u64) -> Result<(), Error> {
        if self.space_left() < 8 {
            return Err(Error::ProtocolViolation(ProtocolViolation::Malformed));
        }
        LittleEndian::write_u64(&mut self.buf[self.pos..self.pos + 8], v);
        self.pos += 8;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_le_fields() {
        let mut buf = [0u8; 8];
        let mut w = ByteWriter::new(&mut buf);
        w.write_u8(0x09).unwrap();
        w.write_u16_le(0x005D).unwrap();
        w.write_u16_le(0x0001).unwrap();
        assert_eq!(w.len(), 5);
        assert_eq!(buf, [0x09, 0x5D, 0x00, 0x01, 0x00, 0, 0, 0]);

        let mut r = ByteReader::new(&buf[..5]);
        assert_eq!(r.read_u8().unwrap(), 0x09);
        assert_eq!(r.read_u16_le().unwrap(), 0x005D);
        assert_eq!(r.read_u16_le().unwrap(), 0x0001);
        assert_eq!(r.bytes_left(), 0);
    }

    #[test]
    fn read_past_end_is_malformed() {
        let buf = [0u8; 1];
        let mut r = ByteReader::new(&buf);
        r.read_u8().unwrap();
        assert!(matches!(
            r.read_u8(),
            Err(Error::ProtocolViolation(ProtocolViolation::Malformed))
        ));
    }
}
