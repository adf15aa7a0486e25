//! TLS handshake state machine
//!
//! The handshake is driven one engine step at a time. When a step reports
//! that it would block, the driver waits on the socket in the direction the
//! engine asked for, bounded by the connect timeout, and steps again.
//!
//! The driver only sees the [`HandshakeEngine`] trait, so it can be run
//! against a scripted engine in tests.

use crate::net::{self, Direction, Readiness, Timeout};
use openssl::ssl::{ErrorCode, SslStream};
use openssl::x509::X509VerifyResult;
use std::fmt;
use std::io::{Read, Write};
use std::os::fd::AsFd;

/// Handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    NotStarted,
    WantsRead,
    WantsWrite,
    Complete,
    FailedFatal,
    FailedTimeout,
}

impl HandshakeState {
    /// Whether the handshake can make no further progress
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandshakeState::Complete | HandshakeState::FailedFatal | HandshakeState::FailedTimeout
        )
    }
}

/// Result of one engine step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Complete,
    WouldBlock(Direction),
    Fatal(String),
}

/// Something that can be driven through a handshake
pub trait HandshakeEngine {
    /// Advance the handshake as far as possible without blocking
    fn step(&mut self) -> Step;

    /// Wait until the transport is ready in `direction`
    fn wait(&mut self, direction: Direction, timeout: Timeout) -> net::Result<Readiness>;
}

/// Why a handshake did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeFailure {
    Fatal(String),
    Timeout(Direction),
}

impl fmt::Display for HandshakeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeFailure::Fatal(msg) => write!(f, "handshake failed: {}", msg),
            HandshakeFailure::Timeout(direction) => {
                write!(f, "handshake timed out waiting for {} readiness", direction)
            }
        }
    }
}

/// Runs a [`HandshakeEngine`] to completion or failure
#[derive(Debug)]
pub struct HandshakeDriver {
    state: HandshakeState,
    timeout: Timeout,
    steps: usize,
    failure: Option<HandshakeFailure>,
}

impl HandshakeDriver {
    /// Create a driver that bounds each wait by `timeout`
    pub fn new(timeout: Timeout) -> Self {
        HandshakeDriver {
            state: HandshakeState::NotStarted,
            timeout,
            steps: 0,
            failure: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Number of engine steps taken so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Drive `engine` until the handshake completes or fails.
    ///
    /// Calling `run` again after a terminal state reports that state
    /// without touching the engine.
    pub fn run<E: HandshakeEngine + ?Sized>(&mut self, engine: &mut E) -> Result<(), HandshakeFailure> {
        if self.state == HandshakeState::Complete {
            return Ok(());
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        loop {
            self.steps += 1;
            let direction = match engine.step() {
                Step::Complete => {
                    self.state = HandshakeState::Complete;
                    return Ok(());
                }
                Step::Fatal(msg) => {
                    return Err(self.fail(HandshakeState::FailedFatal, HandshakeFailure::Fatal(msg)));
                }
                Step::WouldBlock(direction) => direction,
            };

            self.state = match direction {
                Direction::Read => HandshakeState::WantsRead,
                Direction::Write => HandshakeState::WantsWrite,
            };

            match engine.wait(direction, self.timeout) {
                Ok(Readiness::Ready) => continue,
                Ok(Readiness::TimedOut) => {
                    return Err(self.fail(HandshakeState::FailedTimeout, HandshakeFailure::Timeout(direction)));
                }
                Err(e) => {
                    return Err(self.fail(HandshakeState::FailedFatal, HandshakeFailure::Fatal(e.to_string())));
                }
            }
        }
    }

    fn fail(&mut self, state: HandshakeState, failure: HandshakeFailure) -> HandshakeFailure {
        self.state = state;
        self.failure = Some(failure.clone());
        failure
    }
}

/// OpenSSL client handshake over a non-blocking socket
pub(crate) struct SslHandshake<S> {
    stream: SslStream<S>,
}

impl<S: Read + Write + AsFd> SslHandshake<S> {
    pub(crate) fn new(stream: SslStream<S>) -> Self {
        SslHandshake { stream }
    }

    pub(crate) fn into_inner(self) -> SslStream<S> {
        self.stream
    }
}

impl<S: Read + Write + AsFd> HandshakeEngine for SslHandshake<S> {
    fn step(&mut self) -> Step {
        match self.stream.connect() {
            Ok(()) => Step::Complete,
            Err(e) => match e.code() {
                ErrorCode::WANT_READ => Step::WouldBlock(Direction::Read),
                ErrorCode::WANT_WRITE => Step::WouldBlock(Direction::Write),
                code => {
                    let mut msg = format!("{} (code {})", e, code.as_raw());
                    let verify = self.stream.ssl().verify_result();
                    if verify != X509VerifyResult::OK {
                        msg.push_str(&format!(", verify result: {}", verify));
                    }
                    Step::Fatal(msg)
                }
            },
        }
    }

    fn wait(&mut self, direction: Direction, timeout: Timeout) -> net::Result<Readiness> {
        net::wait_ready(self.stream.get_ref(), direction, timeout)
    }
}
