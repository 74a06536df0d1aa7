//! Message types shared by the bundled client and server.

use crate::frame::{Message, PacketType};
use crate::hash::type_id;
use crate::serializable;

/// Integer round-trip. The echo server answers with `value * 2`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ping {
    pub value: i32,
}
serializable!(Ping { value });

impl Message for Ping {
    const PACKET_TYPE: PacketType = type_id("razwire.Ping");
}

impl Ping {
    pub fn new(value: i32) -> Self {
        Self { value }
    }

    /// The reply an echo server sends back.
    pub fn reply(&self) -> Self {
        Self {
            value: self.value.wrapping_mul(2),
        }
    }
}

/// Named greeting. Echoed back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Greeting {
    pub name: String,
    pub age: i32,
}
serializable!(Greeting { name, age });

impl Message for Greeting {
    const PACKET_TYPE: PacketType = type_id("razwire.Greeting");
}
