//! # razwire-protocol
//!
//! Wire protocol building blocks for razwire.
//!
//! This crate provides:
//! - A type-driven value codec that encodes and decodes in place
//! - Portable IEEE-754 packing for `f32`/`f64`
//! - A fixed-capacity packet buffer with write and read cursors
//! - The `Head`/payload/`Tail` frame layout
//! - Compile-time packet type ids derived from type names

pub mod buffer;
pub mod codec;
pub mod error;
pub mod float;
pub mod frame;
pub mod hash;
pub mod message;
pub mod pool;

pub use buffer::{ByteCursor, Mode, PacketBuffer};
pub use codec::{ByteOrder, Endian, Primitive, Serializable, Serializer};
pub use error::SerializationError;
pub use frame::{Head, Message, Packet, PacketType, Tail, HEAD_SIZE, SENTINEL, TAIL_SIZE};
pub use hash::type_id;
pub use pool::{HeapPool, MemoryPool, RecyclingPool};

/// Default payload capacity of a packet (4 KiB).
pub const DEFAULT_CAPACITY: usize = 4096;

/// Largest payload a frame can describe; `Head.length` is a `u16`.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;
