//! # razwire-server
//!
//! Framed server for razwire.
//!
//! This crate provides:
//! - A multi-peer server that services ready peers in round-robin order
//! - Per-peer fault isolation: a bad frame drops only the peer that sent it
//! - Configuration from YAML and environment variables
//! - Atomic statistics counters

pub mod config;
pub mod error;
pub mod handler;
pub mod server;

pub use config::{Config, ConfigError, NetworkConfig, ProtocolConfig, WireOrder, CONFIG_ENV};
pub use error::ServerError;
pub use handler::{EchoHandler, Handler};
pub use server::{Server, ServerConfig, ServerEvent, ServerStats, StatsSnapshot};
