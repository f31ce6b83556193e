//! Newline framing over a growable receive buffer.

use bytes::{Bytes, BytesMut};

pub const RECORD_DELIMITER: u8 = b'\n';

/// Bytes received on a connection that do not yet form a complete record.
///
/// Complete records are split off the front without copying the remainder,
/// so the buffer only ever holds unconsumed bytes.
#[derive(Debug, Default)]
pub struct RecordBuffer {
    pending: BytesMut,
}

impl RecordBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Next complete record, delimiter included, in arrival order.
    pub fn next_record(&mut self) -> Option<Bytes> {
        let end = self
            .pending
            .iter()
            .position(|byte| *byte == RECORD_DELIMITER)?;
        Some(self.pending.split_to(end + 1).freeze())
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_is_held_until_its_newline_arrives() {
        let mut buffer = RecordBuffer::new();
        buffer.extend(b"ab");
        assert_eq!(buffer.next_record(), None);

        buffer.extend(b"c\n");
        assert_eq!(buffer.next_record().as_deref(), Some(&b"abc\n"[..]));
        assert_eq!(buffer.next_record(), None);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[test]
    fn one_chunk_can_carry_several_records_and_a_tail() {
        let mut buffer = RecordBuffer::new();
        buffer.extend(b"line1\nline2\npart");

        assert_eq!(buffer.next_record().as_deref(), Some(&b"line1\n"[..]));
        assert_eq!(buffer.next_record().as_deref(), Some(&b"line2\n"[..]));
        assert_eq!(buffer.next_record(), None);
        assert_eq!(buffer.pending_len(), 4);

        buffer.extend(b"ial\n");
        assert_eq!(buffer.next_record().as_deref(), Some(&b"partial\n"[..]));
    }

    #[test]
    fn bare_newline_is_a_record() {
        let mut buffer = RecordBuffer::new();
        buffer.extend(b"\n\n");
        assert_eq!(buffer.next_record().as_deref(), Some(&b"\n"[..]));
        assert_eq!(buffer.next_record().as_deref(), Some(&b"\n"[..]));
        assert_eq!(buffer.next_record(), None);
    }

    #[test]
    fn binary_payloads_pass_through_untouched() {
        let mut buffer = RecordBuffer::new();
        buffer.extend(&[0xff, 0x00, b'\r', b'\n']);
        assert_eq!(
            buffer.next_record().as_deref(),
            Some(&[0xff, 0x00, b'\r', b'\n'][..])
        );
    }
}
