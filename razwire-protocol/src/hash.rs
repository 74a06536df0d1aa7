//! Packet type ids derived from names.

use crate::frame::PacketType;

/// DJB2 seed.
const SEED: u64 = 5381;

/// 64-bit DJB2 hash of `name` (`h = h * 33 + byte`, wrapping).
pub const fn hash64(name: &str) -> u64 {
    let bytes = name.as_bytes();
    let mut h = SEED;
    let mut i = 0;
    while i < bytes.len() {
        h = h.wrapping_mul(33).wrapping_add(bytes[i] as u64);
        i += 1;
    }
    h
}

/// Stable 32-bit packet type id for a schema name.
///
/// Usable in constant position, so message types can carry their id as an
/// associated constant:
///
/// ```rust
/// use razwire_protocol::{type_id, PacketType};
///
/// const PING: PacketType = type_id("razwire.Ping");
/// assert_eq!(PING, type_id("razwire.Ping"));
/// ```
pub const fn type_id(name: &str) -> PacketType {
    hash64(name) as PacketType
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_name_is_seed() {
        assert_eq!(hash64(""), 5381);
    }

    #[test]
    fn test_known_value() {
        // 5381 * 33 + 'a'
        assert_eq!(hash64("a"), 5381 * 33 + 97);
        assert_eq!(hash64("ab"), (5381 * 33 + 97) * 33 + 98);
    }

    #[test]
    fn test_distinct_names() {
        assert_ne!(type_id("Ping"), type_id("Pong"));
        assert_ne!(type_id("Foo"), type_id("foo"));
    }

    #[test]
    fn test_const_evaluation() {
        const ID: PacketType = type_id("Greeting");
        assert_eq!(ID, type_id("Greeting"));
    }
}
