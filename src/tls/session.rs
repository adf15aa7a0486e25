//! TLS client sessions
//!
//! `TlsSession` owns a socket and the secure channel running over it. All
//! I/O follows the same pattern: wait for readiness in the direction the
//! engine needs, try once, and go round again on a would-block signal.

use super::credentials::Credentials;
use super::handshake::{HandshakeDriver, HandshakeFailure, SslHandshake};
use super::info::SessionInfo;
use super::verify::{PeerContext, Verdict};
use super::{Result, TlsError};
use crate::net::{self, Direction, Readiness, Timeout};
use openssl::ex_data::Index;
use openssl::ssl::{ErrorCode, ShutdownResult, Ssl, SslStream};
use std::fmt;
use std::io::{Read, Write};
use std::net::IpAddr;
use std::os::fd::AsFd;

/// Rounds of close_notify exchange attempted by `close`
const MAX_SHUTDOWN_ROUNDS: usize = 4;

/// Why `open` gave up
enum HandshakeError {
    Failed(HandshakeFailure),
    /// Handshake finished but the verifier never judged the leaf
    Unverified,
}

/// Outcome of a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were placed in the buffer
    Data(usize),
    /// Nothing arrived within the timeout
    NoData,
    /// The peer closed the channel
    Eof,
}

/// Client TLS session over a caller-supplied socket
pub struct TlsSession<S: Read + Write + AsFd> {
    stream: SslStream<S>,
    hostname: String,
    close_timeout: Timeout,
    peer_index: Index<Ssl, PeerContext>,
}

impl<S: Read + Write + AsFd> TlsSession<S> {
    /// Perform the client handshake over `socket`, bounded by the connect
    /// timeout from `credentials`.
    ///
    /// `hostname` is sent as SNI and checked against the peer certificate.
    pub fn open(socket: S, hostname: &str, credentials: &Credentials) -> Result<Self> {
        let timeout = credentials.config().connect_timeout;
        Self::open_with_timeout(socket, hostname, credentials, timeout)
    }

    /// Like [`TlsSession::open`] with an explicit handshake timeout
    pub fn open_with_timeout(
        socket: S,
        hostname: &str,
        credentials: &Credentials,
        timeout: Timeout,
    ) -> Result<Self> {
        if hostname.is_empty() {
            return Err(TlsError::InvalidConfig("empty hostname".to_string()));
        }

        net::set_nonblocking(&socket)?;

        let mut ssl = Ssl::new(credentials.context())?;
        ssl.set_connect_state();

        // SNI carries DNS names only
        if !is_ip_literal(hostname) {
            ssl.set_hostname(hostname)?;
        }

        ssl.set_ex_data(credentials.peer_index(), PeerContext::new(hostname));

        let mut engine = SslHandshake::new(SslStream::new(ssl, socket)?);
        let mut driver = HandshakeDriver::new(timeout);
        let outcome = driver.run(&mut engine);
        let mut stream = engine.into_inner();

        let outcome = outcome.map_err(HandshakeError::Failed).and_then(|()| {
            match stream.ssl().ex_data(credentials.peer_index()).and_then(|peer| peer.verdict()) {
                Some(_) => Ok(()),
                None if credentials.check_certificate() => Err(HandshakeError::Unverified),
                None => {
                    tracing::warn!(hostname, "handshake completed without a certificate verdict");
                    Ok(())
                }
            }
        });

        match outcome {
            Ok(()) => {
                let session = TlsSession {
                    stream,
                    hostname: hostname.to_string(),
                    close_timeout: credentials.config().close_timeout,
                    peer_index: credentials.peer_index(),
                };
                let info = session.info();
                tracing::info!(
                    hostname,
                    version = %info.version,
                    cipher = %info.cipher,
                    steps = driver.steps(),
                    "handshake completed"
                );
                Ok(session)
            }
            Err(failure) => {
                let err = match failure {
                    HandshakeError::Unverified => {
                        tracing::error!(hostname, "peer certificate was never verified");
                        TlsError::HandshakeFailed("peer certificate was never verified".to_string())
                    }
                    HandshakeError::Failed(HandshakeFailure::Timeout(direction)) => {
                        tracing::warn!(hostname, %direction, %timeout, "handshake timed out");
                        TlsError::HandshakeTimeout(direction)
                    }
                    HandshakeError::Failed(HandshakeFailure::Fatal(msg)) => {
                        tracing::error!(hostname, error = %msg, "handshake failed");
                        match rejection(&stream, credentials) {
                            Some(reasons) => TlsError::CertificateRejected(reasons),
                            None => TlsError::HandshakeFailed(msg),
                        }
                    }
                };
                shutdown(&mut stream, Timeout::Immediate);
                Err(err)
            }
        }
    }

    /// Outcome of the peer certificate checks.
    ///
    /// Under warn-only credentials a session may be open even though this
    /// verdict carries objections.
    pub fn peer_verdict(&self) -> Option<Verdict> {
        self.stream.ssl().ex_data(self.peer_index).and_then(|peer| peer.verdict())
    }

    /// Target hostname this session was opened for
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Decrypted bytes buffered and ready to be read without touching the socket
    pub fn pending(&self) -> usize {
        self.stream.ssl().pending()
    }

    /// Negotiated session parameters
    pub fn info(&self) -> SessionInfo {
        SessionInfo::from_ssl(self.stream.ssl())
    }

    /// Get reference to the underlying socket
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref()
    }

    /// Read application data.
    ///
    /// Buffered plaintext is returned without waiting. Otherwise waits up to
    /// `timeout` for the socket; [`ReadOutcome::NoData`] means nothing came.
    /// An empty `buf` returns `Data(0)` without touching the channel.
    pub fn read(&mut self, buf: &mut [u8], timeout: Timeout) -> Result<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }

        let mut direction = Direction::Read;
        loop {
            let buffered = direction == Direction::Read && self.pending() > 0;
            if !buffered && net::wait_ready(self.stream.get_ref(), direction, timeout)? == Readiness::TimedOut {
                return Ok(ReadOutcome::NoData);
            }

            match self.stream.ssl_read(buf) {
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(e) => match e.code() {
                    ErrorCode::WANT_READ => direction = Direction::Read,
                    ErrorCode::WANT_WRITE => direction = Direction::Write,
                    ErrorCode::ZERO_RETURN => return Ok(ReadOutcome::Eof),
                    ErrorCode::SYSCALL if e.io_error().is_none() => return Ok(ReadOutcome::Eof),
                    _ => return Err(channel_error(e)),
                },
            }
        }
    }

    /// Write application data, waiting up to `timeout` for the socket.
    ///
    /// Returns the number of bytes accepted by the channel, which may be
    /// less than `buf.len()`. [`TlsError::WriteTimeout`] means the socket was
    /// not reported writable within `timeout`; poll(2) only does so once
    /// enough send buffer is free, so a following [`write_once`] may still
    /// get some bytes through.
    ///
    /// [`write_once`]: TlsSession::write_once
    pub fn write(&mut self, buf: &[u8], timeout: Timeout) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut direction = Direction::Write;
        loop {
            if net::wait_ready(self.stream.get_ref(), direction, timeout)? == Readiness::TimedOut {
                return Err(TlsError::WriteTimeout);
            }

            match self.stream.ssl_write(buf) {
                Ok(n) => return Ok(n),
                Err(e) => match e.code() {
                    ErrorCode::WANT_WRITE => direction = Direction::Write,
                    ErrorCode::WANT_READ => direction = Direction::Read,
                    _ => return Err(channel_error(e)),
                },
            }
        }
    }

    /// Write all of `buf`, each chunk bounded by `timeout`
    pub fn write_all(&mut self, mut buf: &[u8], timeout: Timeout) -> Result<()> {
        while !buf.is_empty() {
            let n = self.write(buf, timeout)?;
            if n == 0 {
                return Err(TlsError::OperationFailed("channel accepted no data".to_string()));
            }
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Single send attempt without waiting.
    ///
    /// Fails with [`TlsError::WouldBlock`] if the channel cannot take data
    /// right now.
    pub fn write_once(&mut self, buf: &[u8]) -> Result<usize> {
        match self.stream.ssl_write(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.code(), ErrorCode::WANT_READ | ErrorCode::WANT_WRITE) => {
                Err(TlsError::WouldBlock)
            }
            Err(e) => Err(channel_error(e)),
        }
    }

    /// Close the session.
    ///
    /// Sends close_notify and waits up to the close timeout for the peer's;
    /// failures are ignored. Then releases the channel and the socket.
    pub fn close(mut self) {
        shutdown(&mut self.stream, self.close_timeout);
        tracing::debug!(hostname = %self.hostname, "session closed");
    }
}

impl<S: Read + Write + AsFd> fmt::Debug for TlsSession<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsSession")
            .field("hostname", &self.hostname)
            .field("version", &self.stream.ssl().version_str())
            .finish_non_exhaustive()
    }
}

/// Close the session behind `session`, if any, and clear the handle.
pub fn close<S: Read + Write + AsFd>(session: &mut Option<TlsSession<S>>) {
    if let Some(session) = session.take() {
        session.close();
    }
}

/// Best-effort close_notify exchange
fn shutdown<S: Read + Write + AsFd>(stream: &mut SslStream<S>, timeout: Timeout) {
    for _ in 0..MAX_SHUTDOWN_ROUNDS {
        let direction = match stream.shutdown() {
            Ok(ShutdownResult::Received) => return,
            Ok(ShutdownResult::Sent) => Direction::Read,
            Err(e) => match e.code() {
                ErrorCode::WANT_READ => Direction::Read,
                ErrorCode::WANT_WRITE => Direction::Write,
                _ => {
                    tracing::trace!(error = %e, "shutdown aborted");
                    return;
                }
            },
        };

        match net::wait_ready(stream.get_ref(), direction, timeout) {
            Ok(Readiness::Ready) => {}
            _ => return,
        }
    }
}

/// Reasons from an enforced verifier rejection, if that is what ended the handshake
fn rejection<S>(stream: &SslStream<S>, credentials: &Credentials) -> Option<Vec<super::RejectReason>> {
    if !credentials.check_certificate() {
        return None;
    }
    let verdict = stream.ssl().ex_data(credentials.peer_index())?.verdict()?;
    if verdict.is_accepted() {
        None
    } else {
        Some(verdict.reasons())
    }
}

fn channel_error(e: openssl::ssl::Error) -> TlsError {
    match e.into_io_error() {
        Ok(io) => TlsError::Io(io),
        Err(e) => TlsError::OperationFailed(e.to_string()),
    }
}

fn is_ip_literal(hostname: &str) -> bool {
    hostname
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .is_ok()
}
