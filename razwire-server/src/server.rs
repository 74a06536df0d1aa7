//! Framed server with round-robin peer servicing.

use crate::error::ServerError;
use crate::handler::Handler;
use razwire_protocol::{ByteOrder, Packet, DEFAULT_CAPACITY, HEAD_SIZE, MAX_PAYLOAD_SIZE, TAIL_SIZE};
use razwire_transport::{
    receive_frame, send_frame, NetError, PeerId, PeerSource, RecvState, ServerBackend,
    TransportError, TransportKind,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Stream or datagram backend.
    pub transport: TransportKind,
    /// Maximum concurrent peers.
    pub max_peers: usize,
    /// Longest a receive call blocks waiting for readiness.
    pub poll_timeout: Duration,
    /// Socket write timeout.
    pub write_timeout: Duration,
    /// Payload capacity of packets created by [`Server::packet`].
    pub packet_capacity: usize,
    /// Byte order for head, payload and tail.
    pub byte_order: ByteOrder,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7401)),
            transport: TransportKind::Tcp,
            max_peers: 1024,
            poll_timeout: Duration::from_millis(100),
            write_timeout: Duration::from_secs(5),
            packet_capacity: DEFAULT_CAPACITY,
            byte_order: ByteOrder::Native,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers.max(1);
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the packet capacity, clamped to what a head can announce.
    pub fn with_packet_capacity(mut self, capacity: usize) -> Self {
        self.packet_capacity = capacity.clamp(1, MAX_PAYLOAD_SIZE);
        self
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub peers_accepted: AtomicU64,
    pub peers_rejected: AtomicU64,
    pub peers_dropped: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_sent: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
}

/// Point-in-time copy of [`ServerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub peers_accepted: u64,
    pub peers_rejected: u64,
    pub peers_dropped: u64,
    pub frames_received: u64,
    pub frames_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl ServerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            peers_accepted: self.peers_accepted.load(Ordering::Relaxed),
            peers_rejected: self.peers_rejected.load(Ordering::Relaxed),
            peers_dropped: self.peers_dropped.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }

    fn record(counter: &AtomicU64, n: usize) {
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}

/// What one receive call observed.
#[derive(Debug)]
pub enum ServerEvent {
    /// A new peer was admitted.
    Connected(PeerId),
    /// A complete frame from this peer is in the packet, ready to decode.
    Received(PeerId),
    /// The peer was removed after a fatal error; the others keep being served.
    Dropped { peer: PeerId, error: NetError },
    /// Nothing happened within the poll timeout.
    Idle,
}

/// Framed server over a stream or datagram backend.
///
/// Peers are scanned in round-robin order. After a frame is taken from the
/// peer at index `i`, the next scan starts at `i + 1`, so a peer that always
/// has data cannot starve the others.
pub struct Server {
    config: ServerConfig,
    backend: Box<dyn ServerBackend>,
    peers: Vec<PeerId>,
    /// Index the next scan starts from. Always `< peers.len()`, or 0 when empty.
    cursor: usize,
    stats: Arc<ServerStats>,
    /// The last cycle admitted a peer, so the next one scans first.
    just_admitted: bool,
    closed: bool,
}

impl Server {
    /// Binds the configured backend.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let backend = razwire_transport::listen(config.transport, config.bind_addr, config.write_timeout)?;
        tracing::info!(
            "Server listening on {} ({})",
            backend.local_addr()?,
            config.transport
        );
        Ok(Self::with_backend(config, backend))
    }

    /// Serves peers of an already bound backend.
    pub fn with_backend(config: ServerConfig, backend: Box<dyn ServerBackend>) -> Self {
        Self {
            config,
            backend,
            peers: Vec::new(),
            cursor: 0,
            stats: Arc::new(ServerStats::default()),
            just_admitted: false,
            closed: false,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.backend.local_addr()?)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> Arc<ServerStats> {
        self.stats.clone()
    }

    /// Live peers in scan order.
    pub fn peers(&self) -> &[PeerId] {
        &self.peers
    }

    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.backend.peer_addr(peer)
    }

    /// New packet with the configured capacity and byte order.
    pub fn packet(&self) -> Packet {
        Packet::with_order(0, self.config.packet_capacity, self.config.byte_order)
    }

    /// Runs one receive cycle.
    ///
    /// A waiting peer is admitted first, unless the previous cycle already
    /// admitted one; then existing peers are scanned first, so a stream of
    /// new peers cannot starve them. Every peer is scanned once without
    /// blocking; if none has a complete frame the call waits up to the poll
    /// timeout and tries again. Per-peer faults come back as
    /// [`ServerEvent::Dropped`]; an `Err` means the listener itself failed.
    pub fn receive(&mut self, packet: &mut Packet) -> Result<ServerEvent, ServerError> {
        self.ensure_open()?;

        let admit_first = !self.just_admitted;
        self.just_admitted = false;

        if admit_first {
            if let Some(peer) = self.admit()? {
                return Ok(self.connected(peer));
            }
        }
        if let Some(event) = self.scan(packet) {
            return Ok(event);
        }
        if !admit_first {
            if let Some(peer) = self.admit()? {
                return Ok(self.connected(peer));
            }
        }

        self.backend.wait(self.config.poll_timeout)?;

        if let Some(peer) = self.admit()? {
            return Ok(self.connected(peer));
        }
        Ok(self.scan(packet).unwrap_or(ServerEvent::Idle))
    }

    /// Seals `packet` and sends it to `peer`.
    ///
    /// A fatal error drops the peer before it is returned.
    pub fn send(&mut self, peer: PeerId, packet: &mut Packet) -> Result<usize, ServerError> {
        self.ensure_open()?;
        let backend = &mut self.backend;
        match send_frame(packet, |frame| backend.write(peer, frame)) {
            Ok(written) => {
                ServerStats::record(&self.stats.frames_sent, 1);
                ServerStats::record(&self.stats.bytes_sent, written);
                Ok(written)
            }
            Err(error) => {
                if error.is_fatal_for_connection() {
                    tracing::warn!("Send to {} failed: {}", peer, error);
                    self.disconnect(peer);
                }
                Err(error.into())
            }
        }
    }

    /// Removes `peer` and closes its socket. Unknown peers are ignored.
    pub fn disconnect(&mut self, peer: PeerId) {
        if let Some(index) = self.peers.iter().position(|p| *p == peer) {
            self.remove_at(index);
            self.backend.disconnect(peer);
            ServerStats::record(&self.stats.peers_dropped, 1);
        }
    }

    /// Serves peers until `shutdown` is set.
    ///
    /// Each received packet goes to `handler`; when it asks for a reply the
    /// packet is sent back to the same peer. A payload the handler cannot
    /// decode is logged and skipped, the peer stays connected.
    pub fn run<H: Handler + ?Sized>(
        &mut self,
        shutdown: &AtomicBool,
        handler: &mut H,
    ) -> Result<(), ServerError> {
        let mut packet = self.packet();

        while !shutdown.load(Ordering::Acquire) {
            match self.receive(&mut packet)? {
                ServerEvent::Received(peer) => match handler.handle(peer, &mut packet) {
                    Ok(true) => {
                        // A failed reply already dropped the peer.
                        if let Err(e) = self.send(peer, &mut packet) {
                            tracing::debug!("Reply to {} not sent: {}", peer, e);
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(
                            "[{}] Could not handle packet type={:#x}: {}",
                            peer,
                            packet.packet_type(),
                            e
                        );
                    }
                },
                ServerEvent::Connected(_) | ServerEvent::Dropped { .. } | ServerEvent::Idle => {}
            }
        }

        tracing::info!("Server shutting down");
        self.shutdown();
        Ok(())
    }

    /// Disconnects every peer. Later calls fail with `ShuttingDown`.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.backend.shutdown();
        self.peers.clear();
        self.cursor = 0;
    }

    fn ensure_open(&self) -> Result<(), ServerError> {
        if self.closed {
            Err(ServerError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn connected(&mut self, peer: PeerId) -> ServerEvent {
        self.just_admitted = true;
        ServerEvent::Connected(peer)
    }

    /// Accepts the next waiting peer, turning away any beyond `max_peers`.
    ///
    /// A failure that only concerns the incoming connection is logged and
    /// ends this round of accepting.
    fn admit(&mut self) -> Result<Option<PeerId>, ServerError> {
        loop {
            let peer = match self.backend.accept() {
                Ok(Some(peer)) => peer,
                Ok(None) => return Ok(None),
                Err(e) if e.is_accept_transient() => {
                    tracing::error!("Accept error: {}", e);
                    return Ok(None);
                }
                Err(e) => return Err(e.into()),
            };

            if self.peers.len() >= self.config.max_peers {
                tracing::warn!(
                    "Peer limit {} reached, rejecting {}",
                    self.config.max_peers,
                    peer
                );
                self.backend.disconnect(peer);
                ServerStats::record(&self.stats.peers_rejected, 1);
                continue;
            }

            match self.backend.peer_addr(peer) {
                Some(addr) => tracing::info!("{} connected from {}", peer, addr),
                None => tracing::info!("{} connected", peer),
            }
            self.peers.push(peer);
            ServerStats::record(&self.stats.peers_accepted, 1);
            return Ok(Some(peer));
        }
    }

    /// Visits each peer once, starting at the cursor, and stops at the first
    /// complete frame or fatal fault.
    fn scan(&mut self, packet: &mut Packet) -> Option<ServerEvent> {
        let count = self.peers.len();
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            let peer = self.peers[index];

            match self.poll_peer(peer, packet) {
                Ok(RecvState::Complete {
                    packet_type,
                    length,
                }) => {
                    self.cursor = (index + 1) % count;
                    ServerStats::record(&self.stats.frames_received, 1);
                    ServerStats::record(&self.stats.bytes_received, HEAD_SIZE + length + TAIL_SIZE);
                    tracing::trace!(
                        "[{}] Frame type={:#x} length={}",
                        peer,
                        packet_type,
                        length
                    );
                    return Some(ServerEvent::Received(peer));
                }
                Ok(_) => continue,
                Err(error) => {
                    match &error {
                        NetError::Transport(TransportError::PeerClosed) => {
                            tracing::info!("{} disconnected", peer)
                        }
                        other => tracing::warn!("Dropping {}: {}", peer, other),
                    }
                    self.remove_at(index);
                    self.backend.disconnect(peer);
                    ServerStats::record(&self.stats.peers_dropped, 1);
                    return Some(ServerEvent::Dropped { peer, error });
                }
            }
        }
        None
    }

    fn poll_peer(&mut self, peer: PeerId, packet: &mut Packet) -> Result<RecvState, NetError> {
        let available = self.backend.available(peer)?;
        if available == 0 {
            return Ok(RecvState::Await);
        }
        let mut source = PeerSource {
            backend: &mut *self.backend,
            peer,
        };
        receive_frame(&mut source, available, packet)
    }

    /// Removes the peer at `index`, keeping the cursor on the peer that
    /// would have been visited next.
    fn remove_at(&mut self, index: usize) {
        self.peers.remove(index);
        if index < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.peers.len() {
            self.cursor = 0;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
