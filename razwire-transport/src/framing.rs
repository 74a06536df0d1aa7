//! Frame receive/send state machine.
//!
//! Receiving runs at most one frame per call:
//!
//! ```text
//! AWAIT ──> HEAD_PARTIAL ──> BODY_PARTIAL ──> COMPLETE
//!                                  │
//!                                  ├──> OVERSIZED (head length > capacity)
//!                                  └──> CORRUPT   (tail sentinel != 0)
//! ```
//!
//! Nothing is consumed from the source until the whole frame is available,
//! so the pending states can be re-entered on the next poll without losing
//! data. `OVERSIZED` and `CORRUPT` surface as [`FrameError`]s and are fatal
//! for the connection.
//!
//! Datagram sources carry one frame per datagram. A datagram too short for
//! the frame it announces can never complete, so it is discarded and the
//! receive reports [`RecvState::Await`].

use crate::backend::{ClientBackend, PeerId, ServerBackend};
use crate::error::{FrameError, NetError, TransportError};
use razwire_protocol::{Endian, Head, Packet, PacketType, Tail, HEAD_SIZE};
use std::io;
use tracing::{debug, trace, warn};

/// Byte source the receive state machine runs against.
pub trait FrameSource {
    /// Returns whether each buffered unit is one whole datagram.
    fn preserves_boundaries(&self) -> bool;

    fn peek(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Drops the current datagram.
    fn discard(&mut self) -> Result<(), TransportError>;
}

/// [`FrameSource`] over a client backend.
pub struct ClientSource<'a, B: ClientBackend + ?Sized>(pub &'a mut B);

impl<B: ClientBackend + ?Sized> FrameSource for ClientSource<'_, B> {
    fn preserves_boundaries(&self) -> bool {
        self.0.kind().preserves_boundaries()
    }

    fn peek(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.0.peek(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.0.read(buf)
    }

    fn discard(&mut self) -> Result<(), TransportError> {
        self.0.discard()
    }
}

/// [`FrameSource`] over one peer of a server backend.
pub struct PeerSource<'a, B: ServerBackend + ?Sized> {
    pub backend: &'a mut B,
    pub peer: PeerId,
}

impl<B: ServerBackend + ?Sized> FrameSource for PeerSource<'_, B> {
    fn preserves_boundaries(&self) -> bool {
        self.backend.kind().preserves_boundaries()
    }

    fn peek(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.backend.peek(self.peer, buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.backend.read(self.peer, buf)
    }

    fn discard(&mut self) -> Result<(), TransportError> {
        self.backend.discard(self.peer)
    }
}

/// Outcome of one receive step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvState {
    /// No bytes waiting.
    Await,
    /// Fewer bytes than a head.
    HeadPartial { available: usize },
    /// Head seen, rest of the frame not yet arrived.
    BodyPartial { available: usize, needed: usize },
    /// A frame was consumed into the packet, which is now in decode mode.
    Complete {
        packet_type: PacketType,
        length: usize,
    },
}

impl RecvState {
    pub fn is_complete(&self) -> bool {
        matches!(self, RecvState::Complete { .. })
    }

    /// Returns whether part of a frame has arrived.
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            RecvState::HeadPartial { .. } | RecvState::BodyPartial { .. }
        )
    }
}

/// Runs one receive step against `source`, which reports `available` bytes.
///
/// On [`RecvState::Complete`] the frame's payload is in `packet`, ready to
/// decode. The packet's byte order decides how head and tail are read.
pub fn receive_frame<S: FrameSource + ?Sized>(
    source: &mut S,
    available: usize,
    packet: &mut Packet,
) -> Result<RecvState, NetError> {
    if available == 0 {
        return Ok(RecvState::Await);
    }

    if available < HEAD_SIZE {
        if source.preserves_boundaries() {
            warn!("Discarding {} byte datagram shorter than a frame head", available);
            source.discard()?;
            return Ok(RecvState::Await);
        }
        return Ok(RecvState::HeadPartial { available });
    }

    let mut raw = [0u8; HEAD_SIZE];
    let peeked = source.peek(&mut raw)?;
    if peeked < HEAD_SIZE {
        return Ok(RecvState::HeadPartial { available: peeked });
    }

    let endian = packet.byte_order().wire_endian(Endian::HOST);
    let head = Head::read_from(endian, &raw);
    let length = head.length as usize;
    if length > packet.capacity() {
        return Err(FrameError::Oversized {
            length,
            capacity: packet.capacity(),
        }
        .into());
    }

    let needed = head.frame_len();
    if available < needed {
        if source.preserves_boundaries() {
            warn!(
                "Discarding {} byte datagram, frame head announces {} bytes",
                available, needed
            );
            source.discard()?;
            return Ok(RecvState::Await);
        }
        trace!("Frame incomplete: {}/{} bytes", available, needed);
        return Ok(RecvState::BodyPartial { available, needed });
    }

    let region = packet.frame_region_for(&head)?;
    consume(source, region)?;
    let tail = Tail::read_from(endian, &region[HEAD_SIZE + length..]);

    if source.preserves_boundaries() && available > needed {
        debug!("Ignoring {} trailing datagram bytes", available - needed);
        source.discard()?;
    }

    if !tail.is_valid() {
        return Err(FrameError::Corrupted {
            sentinel: tail.sentinel,
        }
        .into());
    }

    packet.accept_frame(&head)?;
    debug!(
        "Received frame type={:#x} length={}",
        head.packet_type, length
    );
    Ok(RecvState::Complete {
        packet_type: head.packet_type,
        length,
    })
}

/// Reads exactly `out.len()` bytes. Only called once they are known to be available.
fn consume<S: FrameSource + ?Sized>(source: &mut S, out: &mut [u8]) -> Result<(), TransportError> {
    let mut filled = 0;
    while filled < out.len() {
        let n = source.read(&mut out[filled..])?;
        if n == 0 {
            return Err(TransportError::PeerClosed);
        }
        filled += n;
    }
    Ok(())
}

/// Seals `packet` and hands the frame to `write` in a single call.
///
/// Returns the number of bytes sent, which is always the full frame length.
pub fn send_frame<F>(packet: &mut Packet, write: F) -> Result<usize, NetError>
where
    F: FnOnce(&[u8]) -> Result<usize, TransportError>,
{
    let packet_type = packet.packet_type();
    let frame = packet.seal();
    let expected = frame.len();
    let written = write(frame)?;
    if written != expected {
        return Err(TransportError::Socket(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short frame write: {} of {} bytes", written, expected),
        ))
        .into());
    }
    debug!("Sent frame type={:#x} bytes={}", packet_type, written);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use razwire_protocol::{serializable, ByteOrder, Message, Mode, TAIL_SIZE};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Foo {
        user: String,
        age: i32,
    }
    serializable!(Foo { user, age });

    impl Message for Foo {
        const PACKET_TYPE: PacketType = 0x1234;
    }

    /// In-memory source whose bytes "arrive" as the test reveals them.
    struct ScriptedSource {
        data: Vec<u8>,
        arrived: usize,
        consumed: usize,
        datagram: bool,
    }

    impl ScriptedSource {
        fn stream(data: Vec<u8>) -> Self {
            Self {
                data,
                arrived: 0,
                consumed: 0,
                datagram: false,
            }
        }

        fn datagram(data: Vec<u8>) -> Self {
            let arrived = data.len();
            Self {
                data,
                arrived,
                consumed: 0,
                datagram: true,
            }
        }

        fn arrive(&mut self, n: usize) {
            self.arrived = self.arrived.saturating_add(n).min(self.data.len());
        }

        fn available(&self) -> usize {
            self.arrived - self.consumed
        }
    }

    impl FrameSource for ScriptedSource {
        fn preserves_boundaries(&self) -> bool {
            self.datagram
        }

        fn peek(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            let n = buf.len().min(self.available());
            buf[..n].copy_from_slice(&self.data[self.consumed..self.consumed + n]);
            Ok(n)
        }

        fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
            let n = self.peek(buf)?;
            self.consumed += n;
            Ok(n)
        }

        fn discard(&mut self) -> Result<(), TransportError> {
            self.consumed = self.arrived;
            Ok(())
        }
    }

    fn razzie_frame() -> Vec<u8> {
        let mut packet = Packet::with_order(0, 1024, ByteOrder::Network);
        packet
            .encode_message(&mut Foo {
                user: "razzie".into(),
                age: 99,
            })
            .unwrap();
        packet.seal().to_vec()
    }

    fn receiver(capacity: usize) -> Packet {
        Packet::with_order(0, capacity, ByteOrder::Network)
    }

    fn step(source: &mut ScriptedSource, packet: &mut Packet) -> Result<RecvState, NetError> {
        let available = source.available();
        receive_frame(source, available, packet)
    }

    #[test]
    fn test_empty_source_awaits() {
        let mut source = ScriptedSource::stream(razzie_frame());
        let mut packet = receiver(1024);
        assert_eq!(step(&mut source, &mut packet).unwrap(), RecvState::Await);
    }

    #[test]
    fn test_partial_arrival_consumes_nothing() {
        let frame = razzie_frame();
        assert_eq!(frame.len(), 24);
        let mut source = ScriptedSource::stream(frame);
        let mut packet = receiver(1024);

        source.arrive(1);
        assert_eq!(
            step(&mut source, &mut packet).unwrap(),
            RecvState::HeadPartial { available: 1 }
        );
        assert_eq!(source.consumed, 0);

        source.arrive(HEAD_SIZE - 1);
        assert_eq!(
            step(&mut source, &mut packet).unwrap(),
            RecvState::BodyPartial {
                available: HEAD_SIZE,
                needed: 24
            }
        );
        assert_eq!(source.consumed, 0);

        source.arrive(usize::MAX);
        let state = step(&mut source, &mut packet).unwrap();
        assert_eq!(
            state,
            RecvState::Complete {
                packet_type: 0x1234,
                length: 14
            }
        );
        assert_eq!(source.consumed, 24);
        assert_eq!(packet.mode(), Mode::Decode);
        assert_eq!(
            packet.decode_message::<Foo>().unwrap(),
            Foo {
                user: "razzie".into(),
                age: 99
            }
        );
    }

    #[test]
    fn test_one_frame_per_call() {
        let mut data = razzie_frame();
        data.extend(razzie_frame());
        let mut source = ScriptedSource::stream(data);
        source.arrive(usize::MAX);
        let mut packet = receiver(1024);

        assert!(step(&mut source, &mut packet).unwrap().is_complete());
        assert_eq!(source.available(), 24);
        assert!(step(&mut source, &mut packet).unwrap().is_complete());
        assert_eq!(step(&mut source, &mut packet).unwrap(), RecvState::Await);
    }

    #[test]
    fn test_oversized_rejected_before_payload() {
        let mut source = ScriptedSource::stream(razzie_frame());
        source.arrive(HEAD_SIZE);
        let mut packet = receiver(8);

        let err = step(&mut source, &mut packet).unwrap_err();
        assert!(matches!(
            err,
            NetError::Frame(FrameError::Oversized {
                length: 14,
                capacity: 8
            })
        ));
        assert!(err.is_fatal_for_connection());
        assert_eq!(source.consumed, 0);
    }

    #[test]
    fn test_corrupted_tail() {
        let mut frame = razzie_frame();
        let last = frame.len() - 1;
        frame[last] = 0x01;
        let mut source = ScriptedSource::stream(frame);
        source.arrive(usize::MAX);
        let mut packet = receiver(1024);

        let err = step(&mut source, &mut packet).unwrap_err();
        assert!(matches!(
            err,
            NetError::Frame(FrameError::Corrupted { sentinel: 1 })
        ));
    }

    #[test]
    fn test_short_datagram_is_discarded() {
        let mut frame = razzie_frame();
        frame.truncate(10);
        let mut source = ScriptedSource::datagram(frame);
        let mut packet = receiver(1024);

        assert_eq!(step(&mut source, &mut packet).unwrap(), RecvState::Await);
        assert_eq!(source.available(), 0);
    }

    #[test]
    fn test_tiny_datagram_is_discarded() {
        let mut source = ScriptedSource::datagram(vec![1, 2, 3]);
        let mut packet = receiver(1024);
        assert_eq!(step(&mut source, &mut packet).unwrap(), RecvState::Await);
        assert_eq!(source.available(), 0);
    }

    #[test]
    fn test_datagram_trailing_bytes_dropped() {
        let mut frame = razzie_frame();
        frame.extend_from_slice(&[9, 9, 9]);
        let mut source = ScriptedSource::datagram(frame);
        let mut packet = receiver(1024);

        assert!(step(&mut source, &mut packet).unwrap().is_complete());
        assert_eq!(source.available(), 0);
    }

    #[test]
    fn test_send_frame_writes_whole_frame() {
        let mut packet = receiver(64);
        packet.encode(&mut 7u32).unwrap();
        let mut sent = Vec::new();
        let n = send_frame(&mut packet, |bytes| {
            sent.extend_from_slice(bytes);
            Ok(bytes.len())
        })
        .unwrap();
        assert_eq!(n, HEAD_SIZE + 4 + TAIL_SIZE);
        assert_eq!(sent.len(), n);
    }

    #[test]
    fn test_send_frame_short_write_is_error() {
        let mut packet = receiver(64);
        let err = send_frame(&mut packet, |_| Ok(1)).unwrap_err();
        assert!(matches!(err, NetError::Transport(TransportError::Socket(_))));
    }

    proptest! {
        #[test]
        fn prop_any_tail_bit_flip_is_corruption(bit in 0usize..32) {
            let mut frame = razzie_frame();
            let tail_start = frame.len() - TAIL_SIZE;
            frame[tail_start + bit / 8] ^= 1 << (bit % 8);

            let mut source = ScriptedSource::stream(frame);
            source.arrive(usize::MAX);
            let mut packet = receiver(1024);
            let result = step(&mut source, &mut packet);
            prop_assert!(
                matches!(result, Err(NetError::Frame(FrameError::Corrupted { .. }))),
                "expected corruption"
            );
        }

        #[test]
        fn prop_split_arrival_completes_once(split in 1usize..24) {
            let mut source = ScriptedSource::stream(razzie_frame());
            let mut packet = receiver(1024);

            source.arrive(split);
            let first = step(&mut source, &mut packet).unwrap();
            prop_assert!(first.is_partial());
            prop_assert_eq!(source.consumed, 0);

            source.arrive(usize::MAX);
            prop_assert!(step(&mut source, &mut packet).unwrap().is_complete());
        }
    }
}
