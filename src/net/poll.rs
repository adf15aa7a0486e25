//! Readiness polling
//!
//! Wraps `poll(2)` on a single descriptor and a single direction into a
//! timeout-bounded "can this operation make progress now" check.

use super::{Error, Result};
use std::fmt;
use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::time::{Duration, Instant};

/// I/O direction to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    fn poll_flag(self) -> libc::c_short {
        match self {
            Direction::Read => libc::POLLIN,
            Direction::Write => libc::POLLOUT,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => f.write_str("read"),
            Direction::Write => f.write_str("write"),
        }
    }
}

/// How long a readiness check may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Check once, do not wait
    Immediate,
    /// Wait at most this long
    After(Duration),
    /// Wait until the descriptor becomes ready
    Never,
}

impl Timeout {
    /// Interpret a millisecond value: `0` checks once, negative waits
    /// forever, positive is a bound in milliseconds.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => Timeout::Immediate,
            ms if ms < 0 => Timeout::Never,
            ms => Timeout::After(Duration::from_millis(ms as u64)),
        }
    }

    /// Inverse of [`Timeout::from_millis`] (infinite maps to `-1`)
    pub fn as_millis(&self) -> i64 {
        match self {
            Timeout::Immediate => 0,
            Timeout::After(d) => i64::try_from(d.as_millis()).unwrap_or(i64::MAX),
            Timeout::Never => -1,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Timeout::Immediate
        } else {
            Timeout::After(d)
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Immediate => f.write_str("immediate"),
            Timeout::After(d) => write!(f, "{}ms", d.as_millis()),
            Timeout::Never => f.write_str("infinite"),
        }
    }
}

/// Outcome of a readiness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
}

/// Wait until `fd` is ready for `direction` or the timeout elapses.
///
/// A bounded wait never reports [`Readiness::TimedOut`] before its deadline;
/// `EINTR` restarts the poll with whatever time is left. A wakeup that does
/// not report the requested direction (error or hangup only) is returned as
/// [`Error::Spurious`].
pub fn wait_ready<F: AsFd + ?Sized>(fd: &F, direction: Direction, timeout: Timeout) -> Result<Readiness> {
    let raw = fd.as_fd().as_raw_fd();
    let interest = direction.poll_flag();
    // a bound too large to represent waits like `Never`
    let deadline = match timeout {
        Timeout::After(d) => Instant::now().checked_add(d),
        _ => None,
    };

    loop {
        let timeout_ms = match (timeout, deadline) {
            (Timeout::Immediate, _) => 0,
            (_, Some(deadline)) => remaining_millis(deadline),
            _ => -1,
        };

        let mut pfd = libc::pollfd {
            fd: raw,
            events: interest,
            revents: 0,
        };

        let rc = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, timeout_ms) };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(Error::Poll(err));
        }

        if rc == 0 {
            // poll() may round down; only trust the timeout once the deadline passed
            if let Some(deadline) = deadline {
                if Instant::now() < deadline {
                    continue;
                }
            }
            return Ok(Readiness::TimedOut);
        }

        if pfd.revents & interest == 0 {
            return Err(Error::Spurious {
                direction,
                revents: pfd.revents,
            });
        }

        return Ok(Readiness::Ready);
    }
}

/// Milliseconds until `deadline`, rounded up and clamped to what poll(2) accepts
fn remaining_millis(deadline: Instant) -> libc::c_int {
    let left = deadline.saturating_duration_since(Instant::now());
    let ms = left.as_micros().div_ceil(1000);
    libc::c_int::try_from(ms).unwrap_or(libc::c_int::MAX)
}
