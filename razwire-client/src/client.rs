//! Framed client.

use crate::config::ClientConfig;
use crate::error::ClientError;
use razwire_protocol::{Message, Packet, PacketType};
use razwire_transport::{receive_frame, send_frame, ClientBackend, ClientSource, NetError, RecvState};
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Pause between polls while a frame is partially received.
const PARTIAL_BACKOFF: Duration = Duration::from_millis(1);

/// A framed connection to one server.
///
/// Sending and receiving are synchronous. `poll` runs a single receive step
/// and returns immediately when no complete frame is waiting; `receive`
/// keeps polling until a frame completes or the timeout elapses.
pub struct Client {
    config: ClientConfig,
    backend: Box<dyn ClientBackend>,
}

impl Client {
    /// Resolves and connects to the configured server.
    pub fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let backend = razwire_transport::connect(
            config.transport,
            &config.host,
            config.port,
            &config.connect_options(),
        )?;
        info!(
            "Connected to {}:{} over {}",
            config.host, config.port, config.transport
        );
        Ok(Self::from_backend(config, backend))
    }

    /// Wraps an already connected backend.
    pub fn from_backend(config: ClientConfig, backend: Box<dyn ClientBackend>) -> Self {
        Self { config, backend }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.backend.peer_addr()
    }

    pub fn is_connected(&self) -> bool {
        self.backend.is_connected()
    }

    /// New packet with the configured capacity and byte order.
    pub fn packet(&self, packet_type: PacketType) -> Packet {
        Packet::with_order(packet_type, self.config.capacity, self.config.byte_order)
    }

    /// Seals `packet` and writes the whole frame.
    pub fn send(&mut self, packet: &mut Packet) -> Result<usize, ClientError> {
        self.ensure_connected()?;
        let result = send_frame(packet, |frame| self.backend.write(frame));
        self.check(result)
    }

    /// Runs one receive step, waiting up to `timeout` for bytes to arrive.
    ///
    /// Partial frames stay in the backend and are picked up by a later call.
    pub fn poll(&mut self, packet: &mut Packet, timeout: Duration) -> Result<RecvState, ClientError> {
        self.ensure_connected()?;
        let available = match self.backend.wait(timeout) {
            Ok(n) => n,
            Err(e) => return self.check(Err(e.into())),
        };
        if available == 0 {
            return Ok(RecvState::Await);
        }
        let result = receive_frame(&mut ClientSource(&mut *self.backend), available, packet);
        self.check(result)
    }

    /// Polls until a frame completes or `timeout` elapses.
    ///
    /// Returns `false` on timeout. A frame left half-received stays buffered.
    pub fn receive(&mut self, packet: &mut Packet, timeout: Duration) -> Result<bool, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let state = self.poll(packet, remaining)?;
            if state.is_complete() {
                return Ok(true);
            }
            if remaining.is_zero() {
                return Ok(false);
            }
            if state.is_partial() {
                thread::sleep(PARTIAL_BACKOFF);
            }
        }
    }

    /// Sends `message` and waits for a reply of type `R`.
    pub fn request<M: Message, R: Message>(&mut self, message: &mut M) -> Result<R, ClientError> {
        let mut packet = self.packet(M::PACKET_TYPE);
        packet.encode_message(message)?;
        self.send(&mut packet)?;

        packet.reset();
        let timeout = self.config.receive_timeout;
        if !self.receive(&mut packet, timeout)? {
            return Err(ClientError::Timeout(timeout));
        }
        debug!("Reply type={:#x} bytes={}", packet.packet_type(), packet.len());
        Ok(packet.decode_message::<R>()?)
    }

    /// Sends a packet that already holds an encoded payload and waits for the
    /// reply, which is received into the same packet.
    pub fn exchange(&mut self, packet: &mut Packet) -> Result<(), ClientError> {
        self.send(packet)?;
        packet.reset();
        let timeout = self.config.receive_timeout;
        if !self.receive(packet, timeout)? {
            return Err(ClientError::Timeout(timeout));
        }
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if self.backend.is_connected() {
            info!("Disconnecting from {}:{}", self.config.host, self.config.port);
        }
        self.backend.disconnect();
    }

    fn ensure_connected(&self) -> Result<(), ClientError> {
        if self.backend.is_connected() {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }

    /// Tears the connection down on errors it cannot survive.
    fn check<T>(&mut self, result: Result<T, NetError>) -> Result<T, ClientError> {
        match result {
            Err(err) if err.is_fatal_for_connection() => {
                warn!("Dropping connection to {}: {}", self.config.host, err);
                self.backend.disconnect();
                Err(err.into())
            }
            other => other.map_err(ClientError::from),
        }
    }
}
