//! Packet handlers.

use razwire_protocol::message::Ping;
use razwire_protocol::{Message, Mode, Packet, SerializationError};
use razwire_transport::PeerId;

/// Turns a received packet into an optional reply.
///
/// The packet arrives in decode mode holding one frame's payload. To reply,
/// the handler rewrites it in place and returns `true`; the server then sends
/// it back to `peer`.
pub trait Handler {
    fn handle(&mut self, peer: PeerId, packet: &mut Packet) -> Result<bool, SerializationError>;
}

impl<F> Handler for F
where
    F: FnMut(PeerId, &mut Packet) -> Result<bool, SerializationError>,
{
    fn handle(&mut self, peer: PeerId, packet: &mut Packet) -> Result<bool, SerializationError> {
        self(peer, packet)
    }
}

/// Answers [`Ping`] with its doubled value and echoes every other packet
/// unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoHandler;

impl Handler for EchoHandler {
    fn handle(&mut self, peer: PeerId, packet: &mut Packet) -> Result<bool, SerializationError> {
        if packet.packet_type() == Ping::PACKET_TYPE {
            let ping = packet.decode_message::<Ping>()?;
            tracing::debug!("[{}] Ping {}", peer, ping.value);
            packet.reset();
            packet.set_mode(Mode::Encode);
            packet.encode_message(&mut ping.reply())?;
        } else {
            tracing::debug!(
                "[{}] Echoing type={:#x} bytes={}",
                peer,
                packet.packet_type(),
                packet.len()
            );
            packet.rearm_reply();
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use razwire_protocol::message::Greeting;
    use razwire_protocol::{Endian, Head, HEAD_SIZE};

    /// Builds a packet the way the server hands it over after a receive.
    fn received<M: Message>(message: &mut M) -> Packet {
        let mut outgoing = Packet::new(0, 128);
        outgoing.encode_message(message).unwrap();
        let head = outgoing.head();
        let frame = outgoing.seal().to_vec();

        let mut incoming = Packet::new(0, 128);
        let region = incoming.frame_region_for(&head).unwrap();
        region.copy_from_slice(&frame);
        incoming.accept_frame(&head).unwrap();
        incoming
    }

    #[test]
    fn test_ping_is_doubled() {
        let mut packet = received(&mut Ping::new(50));
        assert!(EchoHandler.handle(PeerId(1), &mut packet).unwrap());

        assert_eq!(packet.packet_type(), Ping::PACKET_TYPE);
        assert_eq!(packet.mode(), Mode::Encode);
        let frame = packet.seal().to_vec();
        let head = Head::read_from(Endian::HOST, &frame[..HEAD_SIZE]);
        assert_eq!(head.length, 4);
        assert_eq!(&frame[HEAD_SIZE..HEAD_SIZE + 4], &100i32.to_ne_bytes());
    }

    #[test]
    fn test_other_types_are_echoed() {
        let mut greeting = Greeting {
            name: "razzie".into(),
            age: 99,
        };
        let mut packet = received(&mut greeting);
        let before = packet.payload().to_vec();

        assert!(EchoHandler.handle(PeerId(1), &mut packet).unwrap());
        assert_eq!(packet.packet_type(), Greeting::PACKET_TYPE);
        assert_eq!(packet.payload(), &before[..]);
    }

    #[test]
    fn test_truncated_ping_is_an_error() {
        let mut packet = Packet::new(Ping::PACKET_TYPE, 16);
        packet.set_mode(Mode::Decode);
        assert!(EchoHandler.handle(PeerId(1), &mut packet).is_err());
    }

    #[test]
    fn test_closure_handler() {
        let mut seen = Vec::new();
        let mut handler = |peer: PeerId, _packet: &mut Packet| -> Result<bool, SerializationError> {
            seen.push(peer);
            Ok(false)
        };
        let mut packet = Packet::default();
        assert!(!handler.handle(PeerId(7), &mut packet).unwrap());
        assert_eq!(seen, vec![PeerId(7)]);
    }
}
