//! Client configuration.

use razwire_protocol::{ByteOrder, DEFAULT_CAPACITY, MAX_PAYLOAD_SIZE};
use razwire_transport::{ConnectOptions, TransportKind};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Backend to connect with.
    pub transport: TransportKind,
    /// Payload capacity of packets created by the client.
    pub capacity: usize,
    /// Byte order used for head, payload and tail.
    pub byte_order: ByteOrder,
    /// Try IPv6 addresses first.
    pub prefer_ipv6: bool,
    /// Connection timeout (stream backend).
    pub connect_timeout: Duration,
    /// Socket write timeout.
    pub write_timeout: Duration,
    /// How long `request` waits for the reply.
    pub receive_timeout: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: TransportKind::Tcp,
            capacity: DEFAULT_CAPACITY,
            byte_order: ByteOrder::Native,
            prefer_ipv6: false,
            connect_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Sets the packet capacity, clamped to what a head can announce.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.clamp(1, MAX_PAYLOAD_SIZE);
        self
    }

    pub fn with_byte_order(mut self, order: ByteOrder) -> Self {
        self.byte_order = order;
        self
    }

    pub fn with_prefer_ipv6(mut self, prefer: bool) -> Self {
        self.prefer_ipv6 = prefer;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub(crate) fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            prefer_ipv6: self.prefer_ipv6,
            connect_timeout: Some(self.connect_timeout),
            write_timeout: Some(self.write_timeout),
        }
    }
}
