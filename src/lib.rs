//! vtls - client-side TLS sessions over non-blocking sockets
//!
//! This crate drives a TLS handshake over an already-connected socket using
//! explicit readiness polling instead of blocking I/O, verifies the peer's
//! certificate against a shared trust store, and exposes timeout-aware
//! read/write primitives over the resulting channel.

pub mod net;
pub mod tls;
