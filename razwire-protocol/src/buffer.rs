//! Fixed-capacity packet buffer.
//!
//! The buffer owns one contiguous arena laid out exactly like a frame on the
//! wire, so sending never needs to copy the payload:
//!
//! ```text
//! +-----------+--------------------------------+-----------+
//! | head area | payload area                   | tail area |
//! | 6 bytes   | capacity bytes                 | 4 bytes   |
//! +-----------+--------------------------------+-----------+
//! ```
//!
//! Two cursors track the payload: `written` (bytes produced while encoding)
//! and `consumed` (bytes taken while decoding). The capacity never changes.

use crate::error::SerializationError;
use crate::frame::{HEAD_SIZE, TAIL_SIZE};
use crate::pool::MemoryPool;
use crate::MAX_PAYLOAD_SIZE;
use std::fmt;
use std::sync::Arc;

/// Direction of a codec pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Values are turned into bytes.
    Encode,
    /// Bytes are turned back into values.
    Decode,
}

/// A byte sink/source the codec runs against.
///
/// `write` is only legal in [`Mode::Encode`] and `read` only in
/// [`Mode::Decode`]; the wrong one returns [`SerializationError::WrongMode`].
/// Both may transfer fewer bytes than asked for; the codec treats a short
/// transfer as a capacity error.
pub trait ByteCursor {
    /// Current direction.
    fn mode(&self) -> Mode;

    /// Appends up to `bytes.len()` bytes, returning how many were taken.
    fn write(&mut self, bytes: &[u8]) -> Result<usize, SerializationError>;

    /// Copies up to `out.len()` unread bytes, returning how many were copied.
    fn read(&mut self, out: &mut [u8]) -> Result<usize, SerializationError>;

    /// Free space when encoding, unread bytes when decoding.
    fn remaining(&self) -> usize;
}

/// Fixed-capacity byte store with write and read cursors.
pub struct PacketBuffer {
    arena: Box<[u8]>,
    capacity: usize,
    mode: Mode,
    written: usize,
    consumed: usize,
    pool: Option<Arc<dyn MemoryPool>>,
}

impl PacketBuffer {
    /// Creates a buffer with `capacity` payload bytes, in encode mode.
    ///
    /// Capacities above [`MAX_PAYLOAD_SIZE`] are clamped, since a frame head
    /// cannot describe a longer payload.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(MAX_PAYLOAD_SIZE);
        Self {
            arena: vec![0u8; Self::arena_size(capacity)].into_boxed_slice(),
            capacity,
            mode: Mode::Encode,
            written: 0,
            consumed: 0,
            pool: None,
        }
    }

    /// Creates a buffer whose arena is taken from `pool` and handed back on drop.
    ///
    /// Returns `None` if the pool cannot supply a large enough block.
    pub fn from_pool(capacity: usize, pool: Arc<dyn MemoryPool>) -> Option<Self> {
        let capacity = capacity.min(MAX_PAYLOAD_SIZE);
        let size = Self::arena_size(capacity);
        let arena = pool.allocate(size)?;
        if arena.len() < size {
            pool.deallocate(arena);
            return None;
        }
        Some(Self {
            arena,
            capacity,
            mode: Mode::Encode,
            written: 0,
            consumed: 0,
            pool: Some(pool),
        })
    }

    fn arena_size(capacity: usize) -> usize {
        HEAD_SIZE + capacity + TAIL_SIZE
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of payload bytes written.
    pub fn len(&self) -> usize {
        self.written
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Number of payload bytes already read back.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Switches direction without touching the cursors.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Zeroes both cursors. Capacity and mode are kept.
    pub fn reset(&mut self) {
        self.written = 0;
        self.consumed = 0;
    }

    /// Zeroes the read cursor only, so the payload can be read again or resent.
    pub fn rewind(&mut self) {
        self.consumed = 0;
    }

    /// The written part of the payload.
    pub fn payload(&self) -> &[u8] {
        &self.arena[HEAD_SIZE..HEAD_SIZE + self.written]
    }

    /// Appends up to `capacity - written` bytes; returns how many were taken.
    pub fn write(&mut self, bytes: &[u8]) -> Result<usize, SerializationError> {
        if self.mode != Mode::Encode {
            return Err(SerializationError::WrongMode {
                expected: Mode::Encode,
                actual: self.mode,
            });
        }

        let len = bytes.len().min(self.capacity - self.written);
        let start = HEAD_SIZE + self.written;
        self.arena[start..start + len].copy_from_slice(&bytes[..len]);
        self.written += len;
        Ok(len)
    }

    /// Copies up to `written - consumed` bytes into `out`; returns how many were copied.
    pub fn read(&mut self, out: &mut [u8]) -> Result<usize, SerializationError> {
        if self.mode != Mode::Decode {
            return Err(SerializationError::WrongMode {
                expected: Mode::Decode,
                actual: self.mode,
            });
        }

        let len = out.len().min(self.written - self.consumed);
        let start = HEAD_SIZE + self.consumed;
        out[..len].copy_from_slice(&self.arena[start..start + len]);
        self.consumed += len;
        Ok(len)
    }

    /// The arena region a frame with `payload_len` payload bytes occupies.
    ///
    /// `payload_len` must not exceed the capacity.
    pub fn frame_region(&self, payload_len: usize) -> &[u8] {
        &self.arena[..Self::arena_size(payload_len)]
    }

    /// Mutable view of the arena region a frame with `payload_len` payload bytes occupies.
    pub fn frame_region_mut(&mut self, payload_len: usize) -> &mut [u8] {
        &mut self.arena[..Self::arena_size(payload_len)]
    }

    /// Marks `payload_len` bytes as received and arms the buffer for decoding.
    pub fn set_received(&mut self, payload_len: usize) -> Result<(), SerializationError> {
        if payload_len > self.capacity {
            return Err(SerializationError::FrameTooLarge {
                size: payload_len,
                max: self.capacity,
            });
        }
        self.written = payload_len;
        self.consumed = 0;
        self.mode = Mode::Decode;
        Ok(())
    }
}

impl ByteCursor for PacketBuffer {
    fn mode(&self) -> Mode {
        self.mode
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, SerializationError> {
        PacketBuffer::write(self, bytes)
    }

    fn read(&mut self, out: &mut [u8]) -> Result<usize, SerializationError> {
        PacketBuffer::read(self, out)
    }

    fn remaining(&self) -> usize {
        match self.mode {
            Mode::Encode => self.capacity - self.written,
            Mode::Decode => self.written - self.consumed,
        }
    }
}

impl fmt::Debug for PacketBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketBuffer")
            .field("capacity", &self.capacity)
            .field("mode", &self.mode)
            .field("written", &self.written)
            .field("consumed", &self.consumed)
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PacketBuffer {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.deallocate(std::mem::take(&mut self.arena));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::RecyclingPool;

    #[test]
    fn test_write_then_read() {
        let mut buf = PacketBuffer::new(16);
        assert_eq!(buf.write(b"hello").unwrap(), 5);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.payload(), b"hello");

        buf.set_mode(Mode::Decode);
        let mut out = [0u8; 5];
        assert_eq!(buf.read(&mut out).unwrap(), 5);
        assert_eq!(&out, b"hello");
        assert_eq!(buf.consumed(), 5);
    }

    #[test]
    fn test_write_truncates_at_capacity() {
        let mut buf = PacketBuffer::new(4);
        assert_eq!(buf.write(b"abcdef").unwrap(), 4);
        assert_eq!(buf.write(b"x").unwrap(), 0);
        assert_eq!(buf.payload(), b"abcd");
    }

    #[test]
    fn test_short_read() {
        let mut buf = PacketBuffer::new(8);
        buf.write(b"ab").unwrap();
        buf.set_mode(Mode::Decode);

        let mut out = [0u8; 4];
        assert_eq!(buf.read(&mut out).unwrap(), 2);
        assert_eq!(buf.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_wrong_mode_is_distinct_error() {
        let mut buf = PacketBuffer::new(8);
        let mut out = [0u8; 1];
        assert_eq!(
            buf.read(&mut out),
            Err(SerializationError::WrongMode {
                expected: Mode::Decode,
                actual: Mode::Encode
            })
        );

        buf.set_mode(Mode::Decode);
        assert!(matches!(
            buf.write(b"x"),
            Err(SerializationError::WrongMode { .. })
        ));
    }

    #[test]
    fn test_reset_keeps_capacity_and_mode() {
        let mut buf = PacketBuffer::new(8);
        buf.write(b"abc").unwrap();
        buf.reset();
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.consumed(), 0);
        assert_eq!(buf.capacity(), 8);
        assert_eq!(buf.mode(), Mode::Encode);
        assert_eq!(buf.remaining(), 8);
    }

    #[test]
    fn test_capacity_is_clamped() {
        let buf = PacketBuffer::new(usize::MAX / 2);
        assert_eq!(buf.capacity(), MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_set_received_bounds() {
        let mut buf = PacketBuffer::new(8);
        assert!(buf.set_received(9).is_err());
        buf.set_received(3).unwrap();
        assert_eq!(buf.mode(), Mode::Decode);
        assert_eq!(buf.remaining(), 3);
    }

    #[test]
    fn test_pooled_arena_returns_on_drop() {
        let pool = Arc::new(RecyclingPool::new());
        {
            let buf = PacketBuffer::from_pool(32, pool.clone()).unwrap();
            assert_eq!(buf.capacity(), 32);
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);

        let _again = PacketBuffer::from_pool(32, pool.clone()).unwrap();
        assert_eq!(pool.available(), 0);
    }
}
