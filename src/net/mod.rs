//! Socket-level helpers
//!
//! Readiness polling on raw file descriptors and socket option plumbing.
//! Nothing in here knows about TLS.

pub mod poll;

pub use poll::{wait_ready, Direction, Readiness, Timeout};

use std::io;
use std::os::fd::AsFd;

/// Result type for network operations
pub type Result<T> = std::result::Result<T, Error>;

/// Network errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("poll failed: {0}")]
    Poll(#[from] io::Error),

    #[error("spurious wakeup while waiting for {direction} readiness (revents {revents:#x})")]
    Spurious { direction: Direction, revents: i16 },
}

/// Switch a connected socket to non-blocking mode.
pub fn set_nonblocking<F: AsFd>(socket: &F) -> io::Result<()> {
    socket2::SockRef::from(socket).set_nonblocking(true)
}
