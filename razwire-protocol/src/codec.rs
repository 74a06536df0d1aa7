//! Type-driven value codec.
//!
//! A [`Serializer`] is bound to a [`ByteCursor`] and runs in whatever
//! [`Mode`] the cursor is in. Values implement [`Serializable`] with a single
//! method that visits their fields in order; the same method both encodes and
//! decodes, so the two directions cannot drift apart.
//!
//! Wire shapes:
//!
//! | Value | Encoding |
//! |-------|----------|
//! | integers | fixed width, byte order per [`ByteOrder`] |
//! | `f32`/`f64` | portable IEEE-754 pattern as `u32`/`u64` |
//! | `bool` | one byte, 0 or 1 |
//! | `char` | `u32` scalar value |
//! | `String`, `Bytes` | `u32` length, then raw bytes |
//! | `Vec<T>`, `[T; N]` | `u32` length, then each element |
//! | `BTreeMap`, `HashMap` | `u32` length, then key/value pairs |
//! | `Option<T>` | one tag byte, then the value if present |
//! | tuples, structs | fields in order, no prefix |
//!
//! ```rust
//! use razwire_protocol::{serializable, Mode, PacketBuffer, Serializer};
//!
//! #[derive(Debug, Default, PartialEq)]
//! struct User {
//!     name: String,
//!     age: i32,
//! }
//! serializable!(User { name, age });
//!
//! let mut buf = PacketBuffer::new(1024);
//! let mut user = User { name: "razzie".into(), age: 99 };
//! Serializer::new(&mut buf).value(&mut user).unwrap();
//! assert_eq!(buf.len(), 14);
//!
//! buf.set_mode(Mode::Decode);
//! let mut decoded = User::default();
//! Serializer::new(&mut buf).value(&mut decoded).unwrap();
//! assert_eq!(decoded, user);
//! ```

use crate::buffer::{ByteCursor, Mode};
use crate::error::SerializationError;
use crate::float;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{BuildHasher, Hash};

/// Byte order of a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order of the machine this code runs on.
    pub const HOST: Endian = if cfg!(target_endian = "big") {
        Endian::Big
    } else {
        Endian::Little
    };
}

/// Integer byte order policy. Both peers must use the same one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Bytes are copied as the host stores them.
    #[default]
    Native,
    /// Bytes are normalized to big-endian, swapping on little-endian hosts.
    Network,
}

impl ByteOrder {
    /// Byte order that ends up on the wire when running on `host`.
    pub fn wire_endian(self, host: Endian) -> Endian {
        match self {
            ByteOrder::Native => host,
            ByteOrder::Network => Endian::Big,
        }
    }
}

/// Fixed-width integer that can be copied to and from bytes.
pub trait Primitive: Copy {
    /// Encoded width in bytes.
    const SIZE: usize;

    /// Writes `self` into `out` (exactly `SIZE` bytes) in `endian` order.
    fn put(self, endian: Endian, out: &mut [u8]);

    /// Reads a value from `bytes` (exactly `SIZE` bytes) in `endian` order.
    fn get(endian: Endian, bytes: &[u8]) -> Self;
}

macro_rules! impl_primitive {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Primitive for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn put(self, endian: Endian, out: &mut [u8]) {
                    let raw = match endian {
                        Endian::Little => self.to_le_bytes(),
                        Endian::Big => self.to_be_bytes(),
                    };
                    out.copy_from_slice(&raw);
                }

                fn get(endian: Endian, bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    match endian {
                        Endian::Little => <$ty>::from_le_bytes(raw),
                        Endian::Big => <$ty>::from_be_bytes(raw),
                    }
                }
            }

            impl Serializable for $ty {
                fn serialize<C: ByteCursor + ?Sized>(
                    &mut self,
                    ser: &mut Serializer<'_, C>,
                ) -> Result<(), SerializationError> {
                    ser.primitive(self)
                }
            }
        )*
    };
}

impl_primitive!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

/// A value that can be visited by the codec.
///
/// Implementations call [`Serializer::value`] (or the lower-level helpers)
/// for each constituent in a fixed order. Decoding writes into `self`, so
/// types used as collection elements also need `Default`.
pub trait Serializable {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError>;
}

/// Implements [`Serializable`] for a struct by visiting the listed fields in order.
///
/// ```rust
/// use razwire_protocol::serializable;
///
/// #[derive(Default)]
/// struct Point {
///     x: f32,
///     y: f32,
/// }
/// serializable!(Point { x, y });
/// ```
#[macro_export]
macro_rules! serializable {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::Serializable for $ty {
            fn serialize<C: $crate::ByteCursor + ?Sized>(
                &mut self,
                ser: &mut $crate::Serializer<'_, C>,
            ) -> ::std::result::Result<(), $crate::SerializationError> {
                $( ser.value(&mut self.$field)?; )*
                Ok(())
            }
        }
    };
}

/// Encoder/decoder bound to a byte cursor.
///
/// After any error the serializer is poisoned: further calls fail with
/// [`SerializationError::Poisoned`] and the cursor must be reset.
pub struct Serializer<'a, C: ByteCursor + ?Sized> {
    cursor: &'a mut C,
    order: ByteOrder,
    host: Endian,
    failed: bool,
}

impl<C: ByteCursor + ?Sized> fmt::Debug for Serializer<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer")
            .field("mode", &self.mode())
            .field("order", &self.order)
            .field("host", &self.host)
            .field("failed", &self.failed)
            .finish()
    }
}

impl<'a, C: ByteCursor + ?Sized> Serializer<'a, C> {
    /// Creates a serializer with [`ByteOrder::Native`].
    pub fn new(cursor: &'a mut C) -> Self {
        Self::with_order(cursor, ByteOrder::Native)
    }

    pub fn with_order(cursor: &'a mut C, order: ByteOrder) -> Self {
        Self {
            cursor,
            order,
            host: Endian::HOST,
            failed: false,
        }
    }

    /// Behaves as if running on a machine with `host` byte order.
    pub fn on_host(mut self, host: Endian) -> Self {
        self.host = host;
        self
    }

    pub fn mode(&self) -> Mode {
        self.cursor.mode()
    }

    pub fn is_encoding(&self) -> bool {
        self.mode() == Mode::Encode
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Byte order integers are written in.
    pub fn wire_endian(&self) -> Endian {
        self.order.wire_endian(self.host)
    }

    /// Returns whether an earlier call failed.
    pub fn is_poisoned(&self) -> bool {
        self.failed
    }

    /// Bytes left in the cursor (free space or unread data, per mode).
    pub fn remaining(&self) -> usize {
        self.cursor.remaining()
    }

    fn fail(&mut self, err: SerializationError) -> SerializationError {
        self.failed = true;
        err
    }

    fn check(&self) -> Result<(), SerializationError> {
        if self.failed {
            Err(SerializationError::Poisoned)
        } else {
            Ok(())
        }
    }

    /// Encodes or decodes `value`, depending on the mode.
    pub fn value<T: Serializable + ?Sized>(
        &mut self,
        value: &mut T,
    ) -> Result<&mut Self, SerializationError> {
        self.check()?;
        if let Err(e) = value.serialize(self) {
            self.failed = true;
            return Err(e);
        }
        Ok(self)
    }

    fn write_exact(&mut self, bytes: &[u8]) -> Result<(), SerializationError> {
        let written = match self.cursor.write(bytes) {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e)),
        };
        if written < bytes.len() {
            return Err(self.fail(SerializationError::Overflow {
                needed: bytes.len(),
                written,
            }));
        }
        Ok(())
    }

    fn read_exact(&mut self, out: &mut [u8]) -> Result<(), SerializationError> {
        let read = match self.cursor.read(out) {
            Ok(n) => n,
            Err(e) => return Err(self.fail(e)),
        };
        if read < out.len() {
            return Err(self.fail(SerializationError::Underrun {
                needed: out.len(),
                read,
            }));
        }
        Ok(())
    }

    /// Copies a fixed-width integer in the configured byte order.
    pub fn primitive<P: Primitive>(&mut self, value: &mut P) -> Result<(), SerializationError> {
        self.check()?;
        let endian = self.wire_endian();
        let mut scratch = [0u8; 16];
        let bytes = &mut scratch[..P::SIZE];

        match self.mode() {
            Mode::Encode => {
                value.put(endian, bytes);
                self.write_exact(bytes)
            }
            Mode::Decode => {
                self.read_exact(bytes)?;
                *value = P::get(endian, bytes);
                Ok(())
            }
        }
    }

    /// Writes `len` as a `u32` prefix when encoding; returns the decoded
    /// prefix when decoding.
    pub fn length(&mut self, len: usize) -> Result<usize, SerializationError> {
        let mut prefix = match u32::try_from(len) {
            Ok(prefix) => prefix,
            Err(_) if self.is_encoding() => {
                return Err(self.fail(SerializationError::LengthOverflow(len)));
            }
            Err(_) => 0,
        };
        self.primitive(&mut prefix)?;
        Ok(prefix as usize)
    }

    /// Length-prefixed raw byte run. Decoding replaces `bytes`.
    pub fn byte_run(&mut self, bytes: &mut Vec<u8>) -> Result<(), SerializationError> {
        let len = self.length(bytes.len())?;
        match self.mode() {
            Mode::Encode => self.write_exact(bytes),
            Mode::Decode => {
                let available = self.remaining();
                if len > available {
                    return Err(self.fail(SerializationError::Underrun {
                        needed: len,
                        read: available,
                    }));
                }
                bytes.clear();
                bytes.resize(len, 0);
                self.read_exact(bytes)
            }
        }
    }

    /// Encodes an enum as its underlying integer.
    ///
    /// `R` is the representation; the enum converts into it with `From`
    /// and back with `TryFrom`. Unknown discriminants fail decoding.
    pub fn enumeration<R, E>(&mut self, value: &mut E) -> Result<&mut Self, SerializationError>
    where
        R: Primitive,
        E: Copy + Into<R> + TryFrom<R>,
    {
        let mut raw: R = (*value).into();
        self.primitive(&mut raw)?;
        if !self.is_encoding() {
            match E::try_from(raw) {
                Ok(decoded) => *value = decoded,
                Err(_) => {
                    return Err(self.fail(SerializationError::InvalidValue(
                        "unknown enum discriminant",
                    )))
                }
            }
        }
        Ok(self)
    }

    /// Element count to reserve while decoding `len` elements.
    fn reserve_hint(&self, len: usize) -> usize {
        len.min(self.remaining())
    }
}

impl Serializable for f32 {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        let mut packed = float::pack_f32(*self);
        ser.primitive(&mut packed)?;
        if !ser.is_encoding() {
            *self = float::unpack_f32(packed);
        }
        Ok(())
    }
}

impl Serializable for f64 {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        let mut packed = float::pack_f64(*self);
        ser.primitive(&mut packed)?;
        if !ser.is_encoding() {
            *self = float::unpack_f64(packed);
        }
        Ok(())
    }
}

impl Serializable for bool {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        let mut raw = u8::from(*self);
        ser.primitive(&mut raw)?;
        *self = match raw {
            0 => false,
            1 => true,
            _ => return Err(SerializationError::InvalidValue("bool must be 0 or 1")),
        };
        Ok(())
    }
}

impl Serializable for char {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        let mut raw = u32::from(*self);
        ser.primitive(&mut raw)?;
        *self = char::from_u32(raw).ok_or(SerializationError::InvalidValue(
            "char is not a unicode scalar value",
        ))?;
        Ok(())
    }
}

impl Serializable for String {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        if ser.is_encoding() {
            ser.length(self.len())?;
            return ser.write_exact(self.as_bytes());
        }
        let mut raw = Vec::new();
        ser.byte_run(&mut raw)?;
        *self = String::from_utf8(raw)
            .map_err(|_| SerializationError::InvalidValue("string is not valid UTF-8"))?;
        Ok(())
    }
}

impl Serializable for Bytes {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        if ser.is_encoding() {
            ser.length(self.len())?;
            return ser.write_exact(&self[..]);
        }
        let mut raw = Vec::new();
        ser.byte_run(&mut raw)?;
        *self = Bytes::from(raw);
        Ok(())
    }
}

impl<T: Serializable + Default> Serializable for Vec<T> {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        let len = ser.length(self.len())?;
        if ser.is_encoding() {
            for item in self.iter_mut() {
                ser.value(item)?;
            }
        } else {
            self.clear();
            self.reserve(ser.reserve_hint(len));
            for _ in 0..len {
                let mut item = T::default();
                ser.value(&mut item)?;
                self.push(item);
            }
        }
        Ok(())
    }
}

impl<T: Serializable, const N: usize> Serializable for [T; N] {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        let len = ser.length(N)?;
        if len != N {
            return Err(SerializationError::LengthMismatch {
                expected: N,
                actual: len,
            });
        }
        for item in self.iter_mut() {
            ser.value(item)?;
        }
        Ok(())
    }
}

impl<T: Serializable + Default> Serializable for Option<T> {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        let mut tag = u8::from(self.is_some());
        ser.primitive(&mut tag)?;
        match tag {
            0 => {
                *self = None;
                Ok(())
            }
            1 => {
                let inner = self.get_or_insert_with(T::default);
                ser.value(inner)?;
                Ok(())
            }
            _ => Err(SerializationError::InvalidValue("option tag must be 0 or 1")),
        }
    }
}

impl<T: Serializable + ?Sized> Serializable for Box<T> {
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        (**self).serialize(ser)
    }
}

impl<K, V> Serializable for BTreeMap<K, V>
where
    K: Serializable + Default + Ord + Clone,
    V: Serializable + Default,
{
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        let len = ser.length(self.len())?;
        if ser.is_encoding() {
            for (key, value) in self.iter_mut() {
                let mut key = key.clone();
                ser.value(&mut key)?.value(value)?;
            }
        } else {
            self.clear();
            for _ in 0..len {
                let mut key = K::default();
                let mut value = V::default();
                ser.value(&mut key)?.value(&mut value)?;
                self.insert(key, value);
            }
        }
        Ok(())
    }
}

impl<K, V, S> Serializable for HashMap<K, V, S>
where
    K: Serializable + Default + Eq + Hash + Clone,
    V: Serializable + Default,
    S: BuildHasher,
{
    fn serialize<C: ByteCursor + ?Sized>(
        &mut self,
        ser: &mut Serializer<'_, C>,
    ) -> Result<(), SerializationError> {
        let len = ser.length(self.len())?;
        if ser.is_encoding() {
            for (key, value) in self.iter_mut() {
                let mut key = key.clone();
                ser.value(&mut key)?.value(value)?;
            }
        } else {
            self.clear();
            self.reserve(ser.reserve_hint(len));
            for _ in 0..len {
                let mut key = K::default();
                let mut value = V::default();
                ser.value(&mut key)?.value(&mut value)?;
                self.insert(key, value);
            }
        }
        Ok(())
    }
}

macro_rules! impl_tuple {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Serializable),+> Serializable for ($($name,)+) {
            fn serialize<C: ByteCursor + ?Sized>(
                &mut self,
                ser: &mut Serializer<'_, C>,
            ) -> Result<(), SerializationError> {
                $( ser.value(&mut self.$idx)?; )+
                Ok(())
            }
        }
    };
}

impl_tuple!(A: 0);
impl_tuple!(A: 0, B: 1);
impl_tuple!(A: 0, B: 1, C2: 2);
impl_tuple!(A: 0, B: 1, C2: 2, D: 3);
impl_tuple!(A: 0, B: 1, C2: 2, D: 3, E: 4);
impl_tuple!(A: 0, B: 1, C2: 2, D: 3, E: 4, F: 5);
impl_tuple!(A: 0, B: 1, C2: 2, D: 3, E: 4, F: 5, G: 6);
impl_tuple!(A: 0, B: 1, C2: 2, D: 3, E: 4, F: 5, G: 6, H: 7);
