//! Frame format.
//!
//! Frame layout (6 bytes head + payload + 4 bytes tail):
//!
//! ```text
//! +-----------+-------------+-----------------+-----------+
//! | type      | length      | payload         | sentinel  |
//! | 4 bytes   | 2 bytes     | length bytes    | 4 bytes   |
//! +-----------+-------------+-----------------+-----------+
//! ```
//!
//! Head and tail integers use the same byte order policy as the payload.
//! The sentinel is always zero; any other value marks the stream as corrupt.

use crate::buffer::{Mode, PacketBuffer};
use crate::codec::{ByteOrder, Endian, Serializable, Serializer};
use crate::error::SerializationError;
use crate::DEFAULT_CAPACITY;
use bytes::{Buf, BufMut};

/// Application-defined packet type tag.
pub type PacketType = u32;

/// Size of the frame head in bytes (4 + 2).
pub const HEAD_SIZE: usize = 6;

/// Size of the frame tail in bytes.
pub const TAIL_SIZE: usize = 4;

/// Value every valid tail carries.
pub const SENTINEL: u32 = 0;

/// Frame head: packet type and payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Head {
    pub packet_type: PacketType,
    pub length: u16,
}

impl Head {
    /// Writes the head into the first [`HEAD_SIZE`] bytes of `out`.
    pub fn write_to(&self, endian: Endian, mut out: &mut [u8]) {
        match endian {
            Endian::Big => {
                out.put_u32(self.packet_type);
                out.put_u16(self.length);
            }
            Endian::Little => {
                out.put_u32_le(self.packet_type);
                out.put_u16_le(self.length);
            }
        }
    }

    /// Reads a head from the first [`HEAD_SIZE`] bytes of `bytes`.
    pub fn read_from(endian: Endian, mut bytes: &[u8]) -> Self {
        match endian {
            Endian::Big => Self {
                packet_type: bytes.get_u32(),
                length: bytes.get_u16(),
            },
            Endian::Little => Self {
                packet_type: bytes.get_u32_le(),
                length: bytes.get_u16_le(),
            },
        }
    }

    pub fn encode(&self, order: ByteOrder) -> [u8; HEAD_SIZE] {
        let mut raw = [0u8; HEAD_SIZE];
        self.write_to(order.wire_endian(Endian::HOST), &mut raw);
        raw
    }

    pub fn decode(order: ByteOrder, bytes: &[u8; HEAD_SIZE]) -> Self {
        Self::read_from(order.wire_endian(Endian::HOST), bytes)
    }

    /// Total frame size for this head.
    pub fn frame_len(&self) -> usize {
        HEAD_SIZE + self.length as usize + TAIL_SIZE
    }
}

/// Frame tail: a zero sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tail {
    pub sentinel: u32,
}

impl Tail {
    pub const VALID: Tail = Tail { sentinel: SENTINEL };

    pub fn write_to(&self, endian: Endian, mut out: &mut [u8]) {
        match endian {
            Endian::Big => out.put_u32(self.sentinel),
            Endian::Little => out.put_u32_le(self.sentinel),
        }
    }

    pub fn read_from(endian: Endian, mut bytes: &[u8]) -> Self {
        let sentinel = match endian {
            Endian::Big => bytes.get_u32(),
            Endian::Little => bytes.get_u32_le(),
        };
        Self { sentinel }
    }

    pub fn is_valid(&self) -> bool {
        self.sentinel == SENTINEL
    }
}

/// A value with a fixed packet type.
///
/// ```rust
/// use razwire_protocol::{serializable, type_id, Message, Packet, PacketType};
///
/// #[derive(Debug, Default, PartialEq)]
/// struct Move {
///     x: i32,
///     y: i32,
/// }
/// serializable!(Move { x, y });
///
/// impl Message for Move {
///     const PACKET_TYPE: PacketType = type_id("game.Move");
/// }
///
/// let mut packet = Packet::new(0, 64);
/// packet.encode_message(&mut Move { x: 1, y: -1 }).unwrap();
/// assert_eq!(packet.packet_type(), Move::PACKET_TYPE);
/// ```
pub trait Message: Serializable + Default {
    const PACKET_TYPE: PacketType;
}

/// A typed packet buffer.
///
/// Encode values into it, [`seal`](Packet::seal) it into a frame for sending,
/// or let the receive path fill it and decode values back out.
#[derive(Debug)]
pub struct Packet {
    buffer: PacketBuffer,
    packet_type: PacketType,
    order: ByteOrder,
}

impl Packet {
    /// Creates an empty packet in encode mode with native byte order.
    pub fn new(packet_type: PacketType, capacity: usize) -> Self {
        Self::with_order(packet_type, capacity, ByteOrder::Native)
    }

    pub fn with_order(packet_type: PacketType, capacity: usize, order: ByteOrder) -> Self {
        Self::from_buffer(packet_type, PacketBuffer::new(capacity), order)
    }

    /// Wraps an existing buffer, e.g. one drawn from a memory pool.
    pub fn from_buffer(packet_type: PacketType, buffer: PacketBuffer, order: ByteOrder) -> Self {
        Self {
            buffer,
            packet_type,
            order,
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn set_packet_type(&mut self, packet_type: PacketType) {
        self.packet_type = packet_type;
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    pub fn set_byte_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    pub fn buffer(&self) -> &PacketBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut PacketBuffer {
        &mut self.buffer
    }

    pub fn capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn mode(&self) -> Mode {
        self.buffer.mode()
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.buffer.set_mode(mode);
    }

    /// Zeroes the cursors, keeping type, capacity and mode.
    pub fn reset(&mut self) {
        self.buffer.reset();
    }

    /// Turns a received packet around so it can be sent back as is.
    ///
    /// Type and payload are kept; the packet is back in encode mode, so more
    /// values may be appended before sealing.
    pub fn rearm_reply(&mut self) {
        self.buffer.rewind();
        self.buffer.set_mode(Mode::Encode);
    }

    pub fn payload(&self) -> &[u8] {
        self.buffer.payload()
    }

    /// Appends `value` to the payload.
    pub fn encode<T: Serializable + ?Sized>(&mut self, value: &mut T) -> Result<(), SerializationError> {
        self.expect_mode(Mode::Encode)?;
        Serializer::with_order(&mut self.buffer, self.order).value(value)?;
        Ok(())
    }

    /// Reads the next value from the payload into `value`.
    pub fn decode<T: Serializable + ?Sized>(&mut self, value: &mut T) -> Result<(), SerializationError> {
        self.expect_mode(Mode::Decode)?;
        Serializer::with_order(&mut self.buffer, self.order).value(value)?;
        Ok(())
    }

    /// Tags the packet with `M::PACKET_TYPE` and encodes `message`.
    pub fn encode_message<M: Message>(&mut self, message: &mut M) -> Result<(), SerializationError> {
        self.packet_type = M::PACKET_TYPE;
        self.encode(message)
    }

    /// Decodes an `M`, failing if the packet carries another type.
    pub fn decode_message<M: Message>(&mut self) -> Result<M, SerializationError> {
        if self.packet_type != M::PACKET_TYPE {
            return Err(SerializationError::UnexpectedType {
                expected: M::PACKET_TYPE,
                actual: self.packet_type,
            });
        }
        let mut message = M::default();
        self.decode(&mut message)?;
        Ok(message)
    }

    fn expect_mode(&self, expected: Mode) -> Result<(), SerializationError> {
        let actual = self.buffer.mode();
        if actual != expected {
            return Err(SerializationError::WrongMode { expected, actual });
        }
        Ok(())
    }

    /// Head describing the current payload.
    pub fn head(&self) -> Head {
        Head {
            packet_type: self.packet_type,
            length: self.buffer.len() as u16,
        }
    }

    /// Writes head and tail around the payload and returns the whole frame.
    ///
    /// The frame is contiguous in the packet's arena, so it can be handed to
    /// a single socket write.
    pub fn seal(&mut self) -> &[u8] {
        let head = self.head();
        let len = head.length as usize;
        let endian = self.order.wire_endian(Endian::HOST);

        let region = self.buffer.frame_region_mut(len);
        head.write_to(endian, &mut region[..HEAD_SIZE]);
        Tail::VALID.write_to(endian, &mut region[HEAD_SIZE + len..]);

        self.buffer.frame_region(len)
    }

    /// Arena slice a frame described by `head` will be received into.
    pub fn frame_region_for(&mut self, head: &Head) -> Result<&mut [u8], SerializationError> {
        let len = head.length as usize;
        if len > self.buffer.capacity() {
            return Err(SerializationError::FrameTooLarge {
                size: len,
                max: self.buffer.capacity(),
            });
        }
        Ok(self.buffer.frame_region_mut(len))
    }

    /// Adopts a frame that was copied into [`frame_region_for`](Packet::frame_region_for).
    ///
    /// Sets the type and arms the payload for decoding.
    pub fn accept_frame(&mut self, head: &Head) -> Result<(), SerializationError> {
        self.buffer.set_received(head.length as usize)?;
        self.packet_type = head.packet_type;
        Ok(())
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::new(0, DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::type_id;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Foo {
        user: String,
        age: i32,
    }
    crate::serializable!(Foo { user, age });

    impl Message for Foo {
        const PACKET_TYPE: PacketType = 0x1234;
    }

    #[derive(Debug, Default, PartialEq)]
    struct Bar {
        id: u64,
    }
    crate::serializable!(Bar { id });

    impl Message for Bar {
        const PACKET_TYPE: PacketType = type_id("Bar");
    }

    fn razzie() -> Foo {
        Foo {
            user: "razzie".to_string(),
            age: 99,
        }
    }

    #[test]
    fn test_head_byte_orders() {
        let head = Head {
            packet_type: 0x0102_0304,
            length: 0x0506,
        };
        let mut raw = [0u8; HEAD_SIZE];
        head.write_to(Endian::Big, &mut raw);
        assert_eq!(raw, [1, 2, 3, 4, 5, 6]);
        assert_eq!(Head::read_from(Endian::Big, &raw), head);

        head.write_to(Endian::Little, &mut raw);
        assert_eq!(raw, [4, 3, 2, 1, 6, 5]);
        assert_eq!(Head::read_from(Endian::Little, &raw), head);

        let encoded = head.encode(ByteOrder::Network);
        assert_eq!(encoded, [1, 2, 3, 4, 5, 6]);
        assert_eq!(Head::decode(ByteOrder::Network, &encoded), head);
    }

    #[test]
    fn test_tail_validity() {
        let mut raw = [0xffu8; TAIL_SIZE];
        Tail::VALID.write_to(Endian::Little, &mut raw);
        assert_eq!(raw, [0; TAIL_SIZE]);
        assert!(Tail::read_from(Endian::Big, &raw).is_valid());
        assert!(!Tail::read_from(Endian::Big, &[0, 0, 0, 1]).is_valid());
    }

    #[test]
    fn test_razzie_frame() {
        let mut packet = Packet::with_order(0, 1024, ByteOrder::Network);
        packet.encode_message(&mut razzie()).unwrap();
        assert_eq!(packet.len(), 14);

        let frame = packet.seal().to_vec();
        assert_eq!(frame.len(), 24);
        assert_eq!(&frame[..HEAD_SIZE], &[0x00, 0x00, 0x12, 0x34, 0x00, 0x0e]);
        assert_eq!(&frame[HEAD_SIZE..HEAD_SIZE + 4], &[0, 0, 0, 6]);
        assert_eq!(&frame[HEAD_SIZE + 4..HEAD_SIZE + 10], b"razzie");
        assert_eq!(&frame[HEAD_SIZE + 10..HEAD_SIZE + 14], &[0, 0, 0, 99]);
        assert_eq!(&frame[20..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_received_frame_decodes() {
        let mut sender = Packet::with_order(0, 256, ByteOrder::Network);
        sender.encode_message(&mut razzie()).unwrap();
        let frame = sender.seal().to_vec();

        let mut receiver = Packet::with_order(0, 256, ByteOrder::Network);
        let head = Head::decode(ByteOrder::Network, frame[..HEAD_SIZE].try_into().unwrap());
        receiver
            .frame_region_for(&head)
            .unwrap()
            .copy_from_slice(&frame);
        receiver.accept_frame(&head).unwrap();

        assert_eq!(receiver.packet_type(), 0x1234);
        assert_eq!(receiver.mode(), Mode::Decode);
        assert_eq!(receiver.decode_message::<Foo>().unwrap(), razzie());
    }

    #[test]
    fn test_frame_region_rejects_oversized_head() {
        let mut packet = Packet::new(0, 8);
        let head = Head {
            packet_type: 1,
            length: 9,
        };
        assert_eq!(
            packet.frame_region_for(&head).unwrap_err(),
            SerializationError::FrameTooLarge { size: 9, max: 8 }
        );
    }

    #[test]
    fn test_decode_message_checks_type() {
        let mut packet = Packet::new(0, 64);
        packet.encode_message(&mut Bar { id: 7 }).unwrap();
        packet.set_mode(Mode::Decode);

        let err = packet.decode_message::<Foo>().unwrap_err();
        assert_eq!(
            err,
            SerializationError::UnexpectedType {
                expected: 0x1234,
                actual: Bar::PACKET_TYPE,
            }
        );
        assert_eq!(packet.decode_message::<Bar>().unwrap(), Bar { id: 7 });
    }

    #[test]
    fn test_encode_requires_encode_mode() {
        let mut packet = Packet::new(1, 16);
        packet.set_mode(Mode::Decode);
        assert!(matches!(
            packet.encode(&mut 1u8),
            Err(SerializationError::WrongMode { .. })
        ));
    }

    #[test]
    fn test_rearm_reply_keeps_payload() {
        let mut packet = Packet::new(0x55, 16);
        packet.encode(&mut 21i32).unwrap();
        packet.set_mode(Mode::Decode);
        let mut value = 0i32;
        packet.decode(&mut value).unwrap();

        packet.rearm_reply();
        assert_eq!(packet.packet_type(), 0x55);
        assert_eq!(packet.mode(), Mode::Encode);
        assert_eq!(packet.payload(), &21i32.to_ne_bytes());
        assert_eq!(packet.seal().len(), HEAD_SIZE + 4 + TAIL_SIZE);
    }

    #[test]
    fn test_reset_for_new_reply() {
        let mut packet = Packet::new(0x55, 16);
        packet.encode(&mut 21i32).unwrap();
        packet.reset();
        packet.encode(&mut 42i32).unwrap();
        assert_eq!(packet.payload(), &42i32.to_ne_bytes());
    }

    #[test]
    fn test_empty_payload_frame() {
        let mut packet = Packet::new(3, 16);
        let frame = packet.seal();
        assert_eq!(frame.len(), HEAD_SIZE + TAIL_SIZE);
    }

    #[test]
    fn test_overflow_keeps_written_prefix() {
        let mut packet = Packet::new(1, 6);
        let mut text = "overflow".to_string();
        let err = packet.encode(&mut text).unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(packet.len(), 6);
    }
}
