use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::{Channel, ReadOutcome, Readiness};

/// A [`Channel`] over any owned file descriptor.
///
/// Used for pty masters and slaves, stdin, and socket pairs in tests.
/// Readiness comes from `poll(2)`.
pub struct FdChannel {
    file: File,
    label: String,
}

impl FdChannel {
    /// Wrap an owned descriptor.
    pub fn from_owned_fd(fd: OwnedFd, label: impl Into<String>) -> Self {
        Self {
            file: File::from(fd),
            label: label.into(),
        }
    }

    /// Wrap one end of a connected Unix stream.
    pub fn from_unix_stream(stream: UnixStream, label: impl Into<String>) -> Self {
        Self::from_owned_fd(OwnedFd::from(stream), label)
    }

    /// A channel reading the process's standard input.
    ///
    /// The descriptor is duplicated, so dropping the channel leaves fd 0 open.
    pub fn stdin() -> Result<Self> {
        let fd = std::io::stdin().as_fd().try_clone_to_owned()?;
        Ok(Self::from_owned_fd(fd, "stdin"))
    }

    /// Toggle `O_NONBLOCK` on the descriptor.
    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is owned by `self.file` and open for the duration of the call.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        // SAFETY: as above; F_SETFL only changes status flags.
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl AsFd for FdChannel {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl Channel for FdChannel {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        loop {
            match self.file.read(buf) {
                Ok(0) => return Ok(ReadOutcome::Hangup),
                Ok(n) => return Ok(ReadOutcome::Data(n)),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    return Ok(ReadOutcome::WouldBlock)
                }
                // A pty master reports EIO once every slave descriptor is closed.
                Err(err) if err.raw_os_error() == Some(libc::EIO) => {
                    return Ok(ReadOutcome::Hangup)
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        loop {
            match self.file.write(bytes) {
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::BrokenPipe => {
                    return Err(TransportError::Closed)
                }
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
    }

    fn poll_readable(&self, timeout: Duration) -> Result<Readiness> {
        poll_fd(self.file.as_raw_fd(), libc::POLLIN, timeout)
    }

    fn poll_writable(&self, timeout: Duration) -> Result<Readiness> {
        poll_fd(self.file.as_raw_fd(), libc::POLLOUT, timeout)
    }

    fn try_clone_channel(&self) -> Result<Box<dyn Channel>> {
        let file = self.file.try_clone()?;
        Ok(Box::new(FdChannel {
            file,
            label: self.label.clone(),
        }))
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.file.as_raw_fd())
    }

    fn label(&self) -> &str {
        &self.label
    }
}

impl std::fmt::Debug for FdChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FdChannel")
            .field("label", &self.label)
            .field("fd", &self.file.as_raw_fd())
            .finish()
    }
}

fn timeout_millis(timeout: Duration) -> libc::c_int {
    timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int
}

fn classify(revents: libc::c_short, wanted: libc::c_short) -> Readiness {
    if revents & wanted != 0 {
        Readiness::Ready
    } else if revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0 {
        Readiness::Hangup
    } else {
        Readiness::Timeout
    }
}

fn poll_fd(fd: RawFd, events: libc::c_short, timeout: Duration) -> Result<Readiness> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // SAFETY: `pfd` is a single valid pollfd and nfds is 1.
    let rc = unsafe { libc::poll(&mut pfd, 1, timeout_millis(timeout)) };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == ErrorKind::Interrupted {
            return Ok(Readiness::Timeout);
        }
        return Err(TransportError::Poll(err));
    }
    if rc == 0 {
        return Ok(Readiness::Timeout);
    }
    Ok(classify(pfd.revents, events))
}

/// Wait until any of `channels` is readable, for at most `timeout`.
///
/// Returns one [`Readiness`] per input channel, in order. Channels without a
/// descriptor are reported as `Timeout` and never wake the wait.
pub fn poll_readable_set(channels: &[&dyn Channel], timeout: Duration) -> Result<Vec<Readiness>> {
    let mut pfds: Vec<libc::pollfd> = channels
        .iter()
        .map(|ch| libc::pollfd {
            fd: ch.raw_fd().unwrap_or(-1),
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();

    // SAFETY: `pfds` is a valid, initialized slice of pollfd for its length;
    // negative descriptors are ignored by poll(2).
    let rc = unsafe {
        libc::poll(
            pfds.as_mut_ptr(),
            pfds.len() as libc::nfds_t,
            timeout_millis(timeout),
        )
    };
    if rc < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() != ErrorKind::Interrupted {
            return Err(TransportError::Poll(err));
        }
        trace!("readiness poll interrupted");
        return Ok(vec![Readiness::Timeout; channels.len()]);
    }

    Ok(pfds
        .iter()
        .map(|pfd| {
            if pfd.fd < 0 {
                Readiness::Timeout
            } else {
                classify(pfd.revents, libc::POLLIN)
            }
        })
        .collect())
}
