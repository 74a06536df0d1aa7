//! Stream backend over TCP.
//!
//! The client wraps a blocking [`std::net::TcpStream`] and implements the
//! readiness wait with a read timeout plus `peek`. The server registers a
//! non-blocking listener and every peer with one [`mio::Poll`], and answers
//! `available` by peeking the peer's socket.

use crate::backend::{resolve, ClientBackend, ConnectOptions, PeerId, ServerBackend, TransportKind};
use crate::error::{accept_transient, descriptors_exhausted, TransportError};
use crate::MAX_FRAME_SIZE;
use mio::net::{TcpListener, TcpStream as MioTcpStream};
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LISTENER: Token = Token(0);
const EVENTS_CAPACITY: usize = 256;
const WRITE_BACKOFF: Duration = Duration::from_millis(1);

/// Maps a peek/recv outcome to "bytes available": timeouts count as zero,
/// an orderly shutdown as [`TransportError::PeerClosed`].
fn available_from(result: io::Result<usize>) -> Result<usize, TransportError> {
    match result {
        Ok(0) => Err(TransportError::PeerClosed),
        Ok(n) => Ok(n),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ) =>
        {
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

/// TCP client backend.
pub struct TcpClient {
    stream: Option<TcpStream>,
    remote: SocketAddr,
    scratch: Vec<u8>,
}

impl TcpClient {
    /// Resolves `host` and connects to the first address that accepts.
    pub fn connect(host: &str, port: u16, options: &ConnectOptions) -> Result<Self, TransportError> {
        let addrs = resolve(host, port, options.prefer_ipv6)?;
        let mut last_error = None;

        for addr in addrs {
            let attempt = match options.connect_timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    let setup = |e| TransportError::connection(addr, e);
                    stream.set_nodelay(true).map_err(setup)?;
                    stream.set_write_timeout(options.write_timeout).map_err(setup)?;
                    info!("Connected to {} (tcp)", addr);
                    return Ok(Self {
                        stream: Some(stream),
                        remote: addr,
                        scratch: vec![0u8; MAX_FRAME_SIZE],
                    });
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }

        Err(TransportError::connection(
            format!("{}:{}", host, port),
            last_error.unwrap_or_else(|| io::ErrorKind::NotFound.into()),
        ))
    }

    fn stream(&self) -> Result<&TcpStream, TransportError> {
        self.stream.as_ref().ok_or_else(TransportError::not_connected)
    }
}

impl ClientBackend for TcpClient {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn wait(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(TransportError::not_connected)?;

        let result = if timeout.is_zero() {
            stream.set_nonblocking(true)?;
            let peeked = stream.peek(&mut self.scratch);
            stream.set_nonblocking(false)?;
            peeked
        } else {
            stream.set_read_timeout(Some(timeout))?;
            stream.peek(&mut self.scratch)
        };
        available_from(result)
    }

    fn peek(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        Ok(self.stream()?.peek(buf)?)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut stream = self.stream()?;
        Ok(stream.read(buf)?)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut stream = self.stream()?;
        stream.write_all(bytes)?;
        Ok(bytes.len())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!("Shutdown of {} failed: {}", self.remote, e);
            }
            info!("Disconnected from {}", self.remote);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        Some(self.remote)
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

struct TcpPeer {
    stream: MioTcpStream,
    addr: SocketAddr,
}

/// TCP server backend driven by a [`mio::Poll`].
pub struct TcpServer {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    peers: HashMap<PeerId, TcpPeer>,
    next_id: u64,
    write_timeout: Duration,
    scratch: Vec<u8>,
}

impl TcpServer {
    /// Binds and listens on `addr`.
    pub fn bind(addr: SocketAddr, write_timeout: Duration) -> Result<Self, TransportError> {
        let setup = |e| TransportError::connection(addr, e);
        let poll = Poll::new().map_err(setup)?;
        let mut listener = TcpListener::bind(addr).map_err(setup)?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)
            .map_err(setup)?;

        match listener.local_addr() {
            Ok(local) => info!("Listening on {} (tcp)", local),
            Err(_) => info!("Listening on {} (tcp)", addr),
        }

        Ok(Self {
            poll,
            events: Events::with_capacity(EVENTS_CAPACITY),
            listener,
            peers: HashMap::new(),
            next_id: 1,
            write_timeout,
            scratch: vec![0u8; MAX_FRAME_SIZE],
        })
    }

    fn peer(&self, peer: PeerId) -> Result<&TcpPeer, TransportError> {
        self.peers.get(&peer).ok_or(TransportError::UnknownPeer(peer))
    }

    /// Number of connected peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

impl ServerBackend for TcpServer {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.listener.local_addr()?)
    }

    fn wait(&mut self, timeout: Duration) -> Result<(), TransportError> {
        match self.poll.poll(&mut self.events, Some(timeout)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn accept(&mut self) -> Result<Option<PeerId>, TransportError> {
        loop {
            match self.listener.accept() {
                Ok((mut stream, addr)) => {
                    let peer = PeerId(self.next_id);
                    self.next_id += 1;

                    if let Err(e) = self.poll.registry().register(
                        &mut stream,
                        Token(peer.0 as usize),
                        Interest::READABLE,
                    ) {
                        warn!("Could not register connection from {}: {}", addr, e);
                        continue;
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("set_nodelay for {} failed: {}", addr, e);
                    }

                    self.peers.insert(peer, TcpPeer { stream, addr });
                    info!("Accepted {} from {}", peer, addr);
                    return Ok(Some(peer));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if descriptors_exhausted(&e) => {
                    warn!("Accept error: {}", e);
                    return Ok(None);
                }
                Err(e) if accept_transient(&e) => {
                    debug!("Incoming connection lost before accept: {}", e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn available(&mut self, peer: PeerId) -> Result<usize, TransportError> {
        let entry = self
            .peers
            .get(&peer)
            .ok_or(TransportError::UnknownPeer(peer))?;
        available_from(entry.stream.peek(&mut self.scratch))
    }

    fn peek(&mut self, peer: PeerId, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.peer(peer)?.stream.peek(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&mut self, peer: PeerId, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut stream = &self.peer(peer)?.stream;
        loop {
            match stream.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write(&mut self, peer: PeerId, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut stream = &self.peer(peer)?.stream;
        let deadline = Instant::now() + self.write_timeout;
        let mut written = 0;

        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("write to {} timed out", peer),
                        )
                        .into());
                    }
                    std::thread::sleep(WRITE_BACKOFF);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    fn disconnect(&mut self, peer: PeerId) {
        if let Some(mut entry) = self.peers.remove(&peer) {
            if let Err(e) = self.poll.registry().deregister(&mut entry.stream) {
                warn!("Deregistering {} failed: {}", peer, e);
            }
            if let Err(e) = entry.stream.shutdown(Shutdown::Both) {
                debug!("Shutdown of {} failed: {}", peer, e);
            }
            info!("Disconnected {} ({})", peer, entry.addr);
        }
    }

    fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer).map(|entry| entry.addr)
    }

    fn shutdown(&mut self) {
        let peers: Vec<PeerId> = self.peers.keys().copied().collect();
        for peer in peers {
            self.disconnect(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STEP: Duration = Duration::from_millis(20);

    fn loopback() -> (TcpServer, TcpClient, PeerId) {
        let mut server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), Duration::from_secs(1)).unwrap();
        let port = server.local_addr().unwrap().port();
        let client = TcpClient::connect("127.0.0.1", port, &ConnectOptions::default()).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(peer) = server.accept().unwrap() {
                return (server, client, peer);
            }
            assert!(Instant::now() < deadline, "peer never accepted");
            server.wait(STEP).unwrap();
        }
    }

    fn await_bytes(server: &mut TcpServer, peer: PeerId, n: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let available = server.available(peer).unwrap();
            if available >= n {
                return available;
            }
            assert!(Instant::now() < deadline, "bytes never arrived");
            server.wait(STEP).unwrap();
        }
    }

    #[test]
    fn test_exchange_bytes() {
        let (mut server, mut client, peer) = loopback();
        assert_eq!(server.peer_count(), 1);
        assert!(server.peer_addr(peer).is_some());

        assert_eq!(client.write(b"hello").unwrap(), 5);
        assert_eq!(await_bytes(&mut server, peer, 5), 5);

        let mut head = [0u8; 2];
        assert_eq!(server.peek(peer, &mut head).unwrap(), 2);
        assert_eq!(&head, b"he");
        assert_eq!(server.available(peer).unwrap(), 5);

        let mut all = [0u8; 5];
        assert_eq!(server.read(peer, &mut all).unwrap(), 5);
        assert_eq!(&all, b"hello");

        server.write(peer, b"back").unwrap();
        assert_eq!(client.wait(Duration::from_secs(5)).unwrap(), 4);
        let mut reply = [0u8; 4];
        assert_eq!(client.read(&mut reply).unwrap(), 4);
        assert_eq!(&reply, b"back");
    }

    #[test]
    fn test_client_wait_times_out() {
        let (_server, mut client, _peer) = loopback();
        assert_eq!(client.wait(Duration::ZERO).unwrap(), 0);
        assert_eq!(client.wait(Duration::from_millis(30)).unwrap(), 0);
    }

    #[test]
    fn test_peer_close_is_reported() {
        let (mut server, mut client, peer) = loopback();
        client.disconnect();
        assert!(!client.is_connected());

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match server.available(peer) {
                Err(TransportError::PeerClosed) => break,
                Ok(_) => {
                    assert!(Instant::now() < deadline, "close never observed");
                    server.wait(STEP).unwrap();
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        server.disconnect(peer);
        assert!(matches!(
            server.available(peer),
            Err(TransportError::UnknownPeer(_))
        ));
    }

    #[test]
    fn test_disconnected_client_errors() {
        let (_server, mut client, _peer) = loopback();
        client.disconnect();
        assert!(matches!(
            client.write(b"x"),
            Err(TransportError::Socket(_))
        ));
    }

    #[test]
    fn test_connect_refused_is_setup_error() {
        let port = {
            let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            spare.local_addr().unwrap().port()
        };
        let result = TcpClient::connect("127.0.0.1", port, &ConnectOptions::default());
        assert!(matches!(result, Err(TransportError::Connection { .. })));
    }

    #[test]
    fn test_bind_in_use_is_setup_error() {
        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), Duration::from_secs(1)).unwrap();
        let taken = server.local_addr().unwrap();
        assert!(matches!(
            TcpServer::bind(taken, Duration::from_secs(1)),
            Err(TransportError::Connection { .. })
        ));
    }
}
