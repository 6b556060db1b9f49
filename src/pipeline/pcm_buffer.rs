//! Byte accumulator between capture fragments and codec blocks.

use bytes::{Buf, BytesMut};

/// PCM waiting to be encoded.
///
/// Capture fragments are appended at the tail in arbitrary sizes; the
/// encoder consumes whole blocks from the head. The buffer grows without
/// bound if encoding falls behind.
#[derive(Debug, Default)]
pub struct PcmBuffer {
    data: BytesMut,
    appended: u64,
    consumed: u64,
}

impl PcmBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment at the tail.
    pub fn append(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
        self.appended += chunk.len() as u64;
    }

    /// The first `n` bytes, or `None` if fewer are buffered.
    pub fn front(&self, n: usize) -> Option<&[u8]> {
        self.data.get(..n)
    }

    /// Removes `n` bytes from the head.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `n` bytes are buffered.
    pub fn consume(&mut self, n: usize) {
        self.data.advance(n);
        self.consumed += n as u64;
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total bytes ever appended.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Total bytes ever consumed.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_invariant(buf: &PcmBuffer) {
        assert_eq!(buf.len() as u64, buf.appended() - buf.consumed());
    }

    #[test]
    fn test_append_and_consume_from_head() {
        let mut buf = PcmBuffer::new();
        buf.append(&[1, 2, 3]);
        assert_invariant(&buf);
        buf.append(&[4, 5]);
        assert_invariant(&buf);

        assert_eq!(buf.front(4), Some(&[1, 2, 3, 4][..]));
        buf.consume(4);
        assert_invariant(&buf);
        assert_eq!(buf.front(1), Some(&[5][..]));
        assert_eq!(buf.front(2), None);
    }

    #[test]
    fn test_block_consumption_leaves_residual() {
        const BLOCK: usize = 300;
        let chunks = [100usize, 700, 33, 1200, 1, 0, 511];
        let total: usize = chunks.iter().sum();

        let mut buf = PcmBuffer::new();
        let mut next = 0u8;
        let mut blocks = 0;
        let mut expected_head = 0u8;

        for len in chunks {
            let chunk: Vec<u8> = (0..len)
                .map(|_| {
                    let b = next;
                    next = next.wrapping_add(1);
                    b
                })
                .collect();
            buf.append(&chunk);
            assert_invariant(&buf);

            while let Some(block) = buf.front(BLOCK) {
                // Blocks come out in append order.
                assert_eq!(block[0], expected_head);
                expected_head = expected_head.wrapping_add((BLOCK % 256) as u8);
                buf.consume(BLOCK);
                blocks += 1;
                assert_invariant(&buf);
            }
        }

        assert_eq!(blocks, total / BLOCK);
        assert_eq!(buf.len(), total % BLOCK);
        assert_eq!(buf.consumed() % BLOCK as u64, 0);
    }

    #[test]
    #[should_panic]
    fn test_consume_past_end_panics() {
        let mut buf = PcmBuffer::new();
        buf.append(&[0; 4]);
        buf.consume(5);
    }
}
