//! # razwire-client
//!
//! Client library for razwire.
//!
//! This crate provides:
//! - A framed client over the stream or datagram backend
//! - Non-blocking single-step receive and a deadline-bound blocking receive
//! - Typed request/response helpers built on [`razwire_protocol::Message`]

pub mod client;
pub mod config;
pub mod error;

pub use client::Client;
pub use config::ClientConfig;
pub use error::ClientError;
