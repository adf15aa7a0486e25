//! Shared helpers for the integration tests

#![allow(dead_code)]

#[path = "../../src/tls/test_support.rs"]
mod test_support;

pub use test_support::{spawn_tls_server, CertSpec, TestPki};

use std::net::{SocketAddr, TcpListener, TcpStream};
use vtls::net::Timeout;
use vtls::tls::{Credentials, TlsConfig};

/// Route tracing output through the test harness; `RUST_LOG` selects levels.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Credentials trusting only `pki`'s CA
pub fn credentials(pki: &TestPki, enforce: bool) -> Credentials {
    let config = TlsConfig::builder()
        .ca_file(pki.trust_file())
        .check_certificate(enforce)
        .connect_timeout_ms(5000)
        .close_timeout(Timeout::from_millis(500))
        .build()
        .unwrap();
    Credentials::new(&config).unwrap()
}

/// A connected socket pair whose far end never speaks
pub fn silent_peer() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).unwrap()
}
