//! Client-side TLS over non-blocking sockets
//!
//! This module drives an OpenSSL client session over a socket the caller has
//! already connected, without ever blocking inside the TLS engine.
//!
//! # Architecture
//!
//! 1. `TlsConfig` defines the baseline policy (trust file, protocol floor,
//!    cipher list, timeouts, certificate enforcement)
//! 2. `Credentials` turns a config into a shared client context carrying the
//!    trust anchors and the certificate verifier callbacks
//! 3. `TlsSession::open` runs the handshake as an explicit state machine
//!    (`HandshakeDriver`), waiting on the socket with `net::wait_ready` only
//!    when the engine reports it would block
//! 4. `TlsSession::read`/`write` move application data with the same
//!    wait-then-retry pattern
//!
//! Certificate decisions are made in one place: `verify::verify_peer` is a
//! pure function of the peer chain, the engine's chain-validation findings,
//! the hostname and the current time. The engine callbacks only feed it and
//! apply the enforce/warn policy.
//!
//! # Examples
//!
//! ```no_run
//! use vtls::net::Timeout;
//! use vtls::tls::{self, Credentials, ReadOutcome, TlsConfig, TlsSession};
//! use std::net::TcpStream;
//!
//! let config = TlsConfig::builder()
//!     .connect_timeout_ms(5000)
//!     .check_certificate(true)
//!     .build()
//!     .unwrap();
//! let credentials = Credentials::new(&config).unwrap();
//!
//! let tcp_stream = TcpStream::connect("example.com:443").unwrap();
//! let mut session = TlsSession::open(tcp_stream, "example.com", &credentials).unwrap();
//!
//! session
//!     .write_all(b"GET / HTTP/1.0\r\nHost: example.com\r\n\r\n", Timeout::from_millis(5000))
//!     .unwrap();
//!
//! let mut buf = [0u8; 4096];
//! if let ReadOutcome::Data(n) = session.read(&mut buf, Timeout::from_millis(5000)).unwrap() {
//!     println!("{}", String::from_utf8_lossy(&buf[..n]));
//! }
//!
//! let mut handle = Some(session);
//! tls::close(&mut handle);
//! ```

pub mod cert;
pub mod config;
pub mod credentials;
pub mod handshake;
pub mod info;
pub mod session;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_support;

pub use cert::{CertInfo, SubjectAltName};
pub use config::{TlsConfig, TlsConfigBuilder, TlsVersion, DEFAULT_CA_FILE};
pub use credentials::Credentials;
pub use handshake::{HandshakeDriver, HandshakeEngine, HandshakeFailure, HandshakeState, Step};
pub use info::SessionInfo;
pub use session::{close, ReadOutcome, TlsSession};
pub use verify::{ChainStatus, PeerChain, RejectReason, Verdict};

use crate::net::Direction;
use std::path::PathBuf;

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;

/// TLS errors
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] crate::net::Error),

    #[error("Invalid TLS version: {0}")]
    InvalidVersion(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to load trust file {}: {source}", path.display())]
    TrustStore {
        path: PathBuf,
        source: openssl::error::ErrorStack,
    },

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Handshake timed out waiting for {0} readiness")]
    HandshakeTimeout(Direction),

    #[error("Certificate rejected: {}", join_reasons(.0))]
    CertificateRejected(Vec<RejectReason>),

    #[error("Write timed out")]
    WriteTimeout,

    #[error("Operation would block")]
    WouldBlock,

    #[error("TLS operation failed: {0}")]
    OperationFailed(String),
}

impl TlsError {
    /// Whether this error is a timeout rather than a protocol failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, TlsError::HandshakeTimeout(_) | TlsError::WriteTimeout)
    }
}

fn join_reasons(reasons: &[RejectReason]) -> String {
    reasons
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
