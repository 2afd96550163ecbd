//! The TX sink: the one external interface the engine pushes encoded control PDUs through. The
//! lower link layer that actually schedules and transmits them on air is out of scope here.

use crate::pdu::MAX_CTRL_PDU_LEN;

/// A fully-encoded control PDU, handed to the TX sink by value.
///
/// Once enqueued to the lower link layer, the buffer is the LLL's to own. Since the sink is a
/// synchronous, non-blocking call, this crate doesn't need a borrow that outlives the call — the
/// encoded bytes are copied once into this small `Copy` value, which itself becomes the LLL's.
#[derive(Debug, Copy, Clone)]
pub struct TxPdu {
    len: usize,
    data: [u8; MAX_CTRL_PDU_LEN],
}

impl TxPdu {
    pub(crate) fn new(data: &[u8]) -> Self {
        let mut buf = [0u8; MAX_CTRL_PDU_LEN];
        buf[..data.len()].copy_from_slice(data);
        Self {
            len: data.len(),
            data: buf,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

/// Appends a fully-encoded control PDU to the connection's transmit queue for the lower link
/// layer. Synchronous, non-blocking.
pub trait TxSink {
    fn tx_enqueue(&mut self, pdu: TxPdu);
}
