//! Readiness waiting over raw descriptors.

use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;
use tracing::warn;

/// Loopback pair used to interrupt a blocked [`wait`].
///
/// Any number of wakes before the next drain collapse into one.
#[derive(Debug)]
pub(crate) struct Waker {
    reader: UnixStream,
    writer: UnixStream,
}

impl Waker {
    pub(crate) fn new() -> io::Result<Self> {
        let (reader, writer) = UnixStream::pair()?;
        reader.set_nonblocking(true)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub(crate) fn wake(&self) {
        match (&self.writer).write(&[1]) {
            Ok(_) => {}
            // Buffer full: a wake is already pending.
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
            Err(err) => warn!(error = %err, "failed to wake scheduler"),
        }
    }

    pub(crate) fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => break,
                Ok(_) => continue,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
    }
}

/// Outcome of one [`wait`].
#[derive(Debug, Default)]
pub(crate) struct Readiness {
    /// The waker fired.
    pub woken: bool,
    /// Sources that are readable, hung up or in error.
    pub ready: Vec<RawFd>,
    /// Sources that are not open descriptors.
    pub invalid: Vec<RawFd>,
}

/// Block until the waker or a source becomes ready, or `timeout` elapses.
///
/// A signal interrupting the wait is reported as an empty readiness.
pub(crate) fn wait(waker: RawFd, sources: &[RawFd], timeout: Duration) -> io::Result<Readiness> {
    let mut fds: Vec<libc::pollfd> = std::iter::once(waker)
        .chain(sources.iter().copied())
        .map(|fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    let rc = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms(timeout)) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(Readiness::default());
        }
        return Err(err);
    }

    let mut readiness = Readiness {
        woken: fds[0].revents != 0,
        ..Readiness::default()
    };
    for pollfd in &fds[1..] {
        if pollfd.revents & libc::POLLNVAL != 0 {
            readiness.invalid.push(pollfd.fd);
        } else if pollfd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
            readiness.ready.push(pollfd.fd);
        }
    }
    Ok(readiness)
}

/// Round up so a deadline is never woken for early.
fn timeout_ms(timeout: Duration) -> libc::c_int {
    let ms = timeout.as_nanos().div_ceil(1_000_000);
    ms.min(libc::c_int::MAX as u128) as libc::c_int
}
