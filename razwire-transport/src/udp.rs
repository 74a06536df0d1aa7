//! Datagram backend over UDP.
//!
//! Each frame travels in its own datagram. Both sides keep received
//! datagrams buffered and serve `peek`/`read` out of the front one, so the
//! framing layer sees the same byte-source interface as over TCP.
//!
//! The server has no accept step at the socket level: the first datagram
//! from an unknown address creates a peer. A disconnected peer that sends
//! again comes back as a new peer.

use crate::backend::{resolve, ClientBackend, ConnectOptions, PeerId, ServerBackend, TransportKind};
use crate::error::TransportError;
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, Bytes};
use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const SOCKET: Token = Token(0);
const EVENTS_CAPACITY: usize = 64;
const WRITE_BACKOFF: Duration = Duration::from_millis(1);

/// Datagrams buffered per peer before new ones are dropped.
pub const MAX_QUEUED_DATAGRAMS: usize = 1024;

fn unspecified_for(addr: &SocketAddr) -> SocketAddr {
    if addr.is_ipv6() {
        SocketAddr::from(([0u16; 8], 0))
    } else {
        SocketAddr::from(([0u8; 4], 0))
    }
}

/// Copies the front of `datagram` into `buf`.
fn copy_front(datagram: &Bytes, buf: &mut [u8]) -> usize {
    let n = buf.len().min(datagram.len());
    buf[..n].copy_from_slice(&datagram[..n]);
    n
}

/// UDP client backend. The socket is connected, so only the server's
/// datagrams are received.
pub struct UdpClient {
    socket: Option<UdpSocket>,
    remote: SocketAddr,
    pending: Bytes,
    scratch: Vec<u8>,
}

impl UdpClient {
    pub fn connect(host: &str, port: u16, options: &ConnectOptions) -> Result<Self, TransportError> {
        let addrs = resolve(host, port, options.prefer_ipv6)?;
        let mut last_error = None;

        for addr in addrs {
            let attempt = UdpSocket::bind(unspecified_for(&addr)).and_then(|socket| {
                socket.connect(addr)?;
                socket.set_write_timeout(options.write_timeout)?;
                Ok(socket)
            });
            match attempt {
                Ok(socket) => {
                    info!("Connected to {} (udp)", addr);
                    return Ok(Self {
                        socket: Some(socket),
                        remote: addr,
                        pending: Bytes::new(),
                        scratch: vec![0u8; MAX_FRAME_SIZE],
                    });
                }
                Err(e) => {
                    debug!("UDP connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TransportError::connection(
            format!("{}:{}", host, port),
            last_error.unwrap_or_else(|| io::ErrorKind::NotFound.into()),
        ))
    }

    /// Local address of the client socket.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(TransportError::not_connected)?;
        Ok(socket.local_addr()?)
    }
}

impl ClientBackend for UdpClient {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn wait(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        if !self.pending.is_empty() {
            return Ok(self.pending.len());
        }
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(TransportError::not_connected)?;

        let result = if timeout.is_zero() {
            socket.set_nonblocking(true)?;
            let received = socket.recv(&mut self.scratch);
            socket.set_nonblocking(false)?;
            received
        } else {
            socket.set_read_timeout(Some(timeout))?;
            socket.recv(&mut self.scratch)
        };

        match result {
            Ok(n) => {
                self.pending = Bytes::copy_from_slice(&self.scratch[..n]);
                Ok(n)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock
                        | io::ErrorKind::TimedOut
                        | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(0)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn peek(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(copy_front(&self.pending, buf))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = copy_front(&self.pending, buf);
        self.pending.advance(n);
        Ok(n)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(TransportError::not_connected)?;
        let sent = socket.send(bytes)?;
        if sent < bytes.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("datagram truncated: {} of {} bytes", sent, bytes.len()),
            )
            .into());
        }
        Ok(sent)
    }

    fn discard(&mut self) -> Result<(), TransportError> {
        self.pending.clear();
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            self.pending.clear();
            info!("Closed datagram socket to {}", self.remote);
        }
    }

    fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
}

struct UdpPeer {
    addr: SocketAddr,
    queue: VecDeque<Bytes>,
}

/// UDP server backend driven by a [`mio::Poll`].
pub struct UdpServer {
    poll: Poll,
    events: Events,
    socket: MioUdpSocket,
    peers: HashMap<PeerId, UdpPeer>,
    by_addr: HashMap<SocketAddr, PeerId>,
    arrivals: VecDeque<PeerId>,
    next_id: u64,
    write_timeout: Duration,
    scratch: Vec<u8>,
}

impl UdpServer {
    pub fn bind(addr: SocketAddr, write_timeout: Duration) -> Result<Self, TransportError> {
        let setup = |e| TransportError::connection(addr, e);
        let poll = Poll::new().map_err(setup)?;
        let mut socket = MioUdpSocket::bind(addr).map_err(setup)?;
        poll.registry()
            .register(&mut socket, SOCKET, Interest::READABLE)
            .map_err(setup)?;

        match socket.local_addr() {
            Ok(local) => info!("Listening on {} (udp)", local),
            Err(_) => info!("Listening on {} (udp)", addr),
        }

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            socket,
            peers: HashMap::new(),
            by_addr: HashMap::new(),
            arrivals: VecDeque::new(),
            next_id: 1,
            write_timeout,
            scratch: vec![0u8; MAX_FRAME_SIZE],
        })
    }

    /// Number of known peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Pulls every waiting datagram off the socket and queues it per sender.
    fn drain(&mut self) -> Result<(), TransportError> {
        loop {
            match self.socket.recv_from(&mut self.scratch) {
                Ok((0, addr)) => trace!("Ignoring empty datagram from {}", addr),
                Ok((n, addr)) => {
                    let datagram = Bytes::copy_from_slice(&self.scratch[..n]);
                    self.route(addr, datagram);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // ICMP port unreachable from an earlier send; not this socket's fault.
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    debug!("Ignoring {} on datagram socket", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn route(&mut self, addr: SocketAddr, datagram: Bytes) {
        let peer = match self.by_addr.get(&addr) {
            Some(peer) => *peer,
            None => {
                let peer = PeerId(self.next_id);
                self.next_id += 1;
                self.peers.insert(
                    peer,
                    UdpPeer {
                        addr,
                        queue: VecDeque::new(),
                    },
                );
                self.by_addr.insert(addr, peer);
                self.arrivals.push_back(peer);
                info!("New datagram {} from {}", peer, addr);
                peer
            }
        };

        if let Some(entry) = self.peers.get_mut(&peer) {
            if entry.queue.len() >= MAX_QUEUED_DATAGRAMS {
                warn!("Dropping datagram from {}: queue full", peer);
            } else {
                entry.queue.push_back(datagram);
            }
        }
    }

    fn queue(&mut self, peer: PeerId) -> Result<&mut VecDeque<Bytes>, TransportError> {
        self.peers
            .get_mut(&peer)
            .map(|entry| &mut entry.queue)
            .ok_or(TransportError::UnknownPeer(peer))
    }
}

impl ServerBackend for UdpServer {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    fn wait(&mut self, timeout: Duration) -> Result<(), TransportError> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
        self.drain()
    }

    fn accept(&mut self) -> Result<Option<PeerId>, TransportError> {
        self.drain()?;
        while let Some(peer) = self.arrivals.pop_front() {
            if self.peers.contains_key(&peer) {
                return Ok(Some(peer));
            }
        }
        Ok(None)
    }

    fn available(&mut self, peer: PeerId) -> Result<usize, TransportError> {
        Ok(self.queue(peer)?.front().map_or(0, Bytes::len))
    }

    fn peek(&mut self, peer: PeerId, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self
            .queue(peer)?
            .front()
            .map_or(0, |datagram| copy_front(datagram, buf)))
    }

    fn read(&mut self, peer: PeerId, buf: &mut [u8]) -> Result<usize, TransportError> {
        let queue = self.queue(peer)?;
        let Some(front) = queue.front_mut() else {
            return Ok(0);
        };
        let n = copy_front(front, buf);
        front.advance(n);
        if front.is_empty() {
            queue.pop_front();
        }
        Ok(n)
    }

    fn write(&mut self, peer: PeerId, bytes: &[u8]) -> Result<usize, TransportError> {
        let addr = self
            .peers
            .get(&peer)
            .map(|entry| entry.addr)
            .ok_or(TransportError::UnknownPeer(peer))?;
        let deadline = Instant::now() + self.write_timeout;

        loop {
            match self.socket.send_to(bytes, addr) {
                Ok(sent) if sent < bytes.len() => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("datagram truncated: {} of {} bytes", sent, bytes.len()),
                    )
                    .into());
                }
                Ok(sent) => return Ok(sent),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("send to {} timed out", peer),
                        )
                        .into());
                    }
                    std::thread::sleep(WRITE_BACKOFF);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn discard(&mut self, peer: PeerId) -> Result<(), TransportError> {
        self.queue(peer)?.pop_front();
        Ok(())
    }

    fn disconnect(&mut self, peer: PeerId) {
        if let Some(entry) = self.peers.remove(&peer) {
            self.by_addr.remove(&entry.addr);
            info!("Forgot datagram {} ({})", peer, entry.addr);
        }
    }

    fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer).map(|entry| entry.addr)
    }

    fn shutdown(&mut self) {
        self.peers.clear();
        self.by_addr.clear();
        self.arrivals.clear();
    }
}
