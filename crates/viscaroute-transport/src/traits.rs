use std::io::ErrorKind;
use std::time::{Duration, Instant};

use crate::error::{Result, TransportError};

/// Longest single wait inside [`Channel::write_all`] after a would-block write.
const WRITABLE_WAIT: Duration = Duration::from_millis(100);

/// Outcome of a bounded readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The channel can be read (or written) without blocking.
    Ready,
    /// Nothing happened before the timeout elapsed.
    Timeout,
    /// The other end hung up.
    Hangup,
}

/// Outcome of a single read attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were copied into the caller's buffer (`n > 0`).
    Data(usize),
    /// No bytes were available right now.
    WouldBlock,
    /// End of stream: the peer closed its side.
    Hangup,
}

/// A bidirectional byte channel with readiness polling.
///
/// This is the only view the routing core has of a transport. Implementations
/// must be `Send` so each endpoint's read half can move into its own thread.
pub trait Channel: Send {
    /// Read whatever bytes are available into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Write some prefix of `bytes`, returning how many were written.
    fn write(&mut self, bytes: &[u8]) -> Result<usize>;

    /// Wait up to `timeout` for the channel to become readable.
    fn poll_readable(&self, timeout: Duration) -> Result<Readiness>;

    /// Wait up to `timeout` for the channel to accept a write.
    fn poll_writable(&self, timeout: Duration) -> Result<Readiness>;

    /// Duplicate the handle so reads and writes can be owned separately.
    fn try_clone_channel(&self) -> Result<Box<dyn Channel>>;

    /// Underlying descriptor, for multiplexed polling.
    ///
    /// Channels without one cannot take part in [`crate::poll_readable_set`].
    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        None
    }

    /// Short label used in log fields.
    fn label(&self) -> &str {
        "channel"
    }

    /// Write the whole of `bytes`.
    ///
    /// Interrupted writes are retried. A would-block write waits for the
    /// channel to become writable again; a zero-length write or a hangup
    /// means the peer is gone.
    fn write_all(&mut self, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            match self.write(bytes) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => bytes = &bytes[n..],
                Err(TransportError::Io(err)) if err.kind() == ErrorKind::Interrupted => {}
                Err(TransportError::Io(err)) if err.kind() == ErrorKind::WouldBlock => {
                    if self.poll_writable(WRITABLE_WAIT)? == Readiness::Hangup {
                        return Err(TransportError::Closed);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Write the whole of `bytes` within `timeout`.
    ///
    /// Returns `Ready` once everything is written, `Timeout` if the deadline
    /// passes first (some prefix may already be on the wire), and `Hangup`
    /// if the peer went away.
    fn write_all_within(&mut self, mut bytes: &[u8], timeout: Duration) -> Result<Readiness> {
        let deadline = Instant::now() + timeout;
        while !bytes.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.poll_writable(remaining)? {
                Readiness::Ready => {}
                other => return Ok(other),
            }
            match self.write(bytes) {
                Ok(0) => return Ok(Readiness::Hangup),
                Ok(n) => bytes = &bytes[n..],
                Err(TransportError::Io(err))
                    if err.kind() == ErrorKind::WouldBlock
                        || err.kind() == ErrorKind::Interrupted =>
                {
                    if Instant::now() >= deadline {
                        return Ok(Readiness::Timeout);
                    }
                    std::thread::yield_now();
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Readiness::Ready)
    }
}

impl Channel for Box<dyn Channel> {
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        (**self).read(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        (**self).write(bytes)
    }

    fn poll_readable(&self, timeout: Duration) -> Result<Readiness> {
        (**self).poll_readable(timeout)
    }

    fn poll_writable(&self, timeout: Duration) -> Result<Readiness> {
        (**self).poll_writable(timeout)
    }

    fn try_clone_channel(&self) -> Result<Box<dyn Channel>> {
        (**self).try_clone_channel()
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> Option<std::os::fd::RawFd> {
        (**self).raw_fd()
    }

    fn label(&self) -> &str {
        (**self).label()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `chunk` bytes per write and fails once with WouldBlock.
    struct Trickle {
        chunk: usize,
        written: Vec<u8>,
        stalled_once: bool,
    }

    impl Channel for Trickle {
        fn read(&mut self, _buf: &mut [u8]) -> Result<ReadOutcome> {
            Ok(ReadOutcome::WouldBlock)
        }

        fn write(&mut self, bytes: &[u8]) -> Result<usize> {
            if !self.stalled_once {
                self.stalled_once = true;
                return Err(std::io::Error::from(std::io::ErrorKind::WouldBlock).into());
            }
            let n = bytes.len().min(self.chunk);
            self.written.extend_from_slice(&bytes[..n]);
            Ok(n)
        }

        fn poll_readable(&self, _timeout: Duration) -> Result<Readiness> {
            Ok(Readiness::Timeout)
        }

        fn poll_writable(&self, _timeout: Duration) -> Result<Readiness> {
            Ok(Readiness::Ready)
        }

        fn try_clone_channel(&self) -> Result<Box<dyn Channel>> {
            Err(TransportError::Closed)
        }
    }

    struct Dead;

    impl Channel for Dead {
        fn read(&mut self, _buf: &mut [u8]) -> Result<ReadOutcome> {
            Ok(ReadOutcome::Hangup)
        }

        fn write(&mut self, _bytes: &[u8]) -> Result<usize> {
            Ok(0)
        }

        fn poll_readable(&self, _timeout: Duration) -> Result<Readiness> {
            Ok(Readiness::Hangup)
        }

        fn poll_writable(&self, _timeout: Duration) -> Result<Readiness> {
            Ok(Readiness::Hangup)
        }

        fn try_clone_channel(&self) -> Result<Box<dyn Channel>> {
            Ok(Box::new(Dead))
        }
    }

    #[test]
    fn write_all_retries_partial_and_would_block() {
        let mut ch = Trickle {
            chunk: 2,
            written: Vec::new(),
            stalled_once: false,
        };
        ch.write_all(&[0x81, 0x01, 0x04, 0x00, 0x02, 0xFF]).unwrap();
        assert_eq!(ch.written, vec![0x81, 0x01, 0x04, 0x00, 0x02, 0xFF]);
    }

    /// Always claims to be writable but never accepts a byte.
    struct Full;

    impl Channel for Full {
        fn read(&mut self, _buf: &mut [u8]) -> Result<ReadOutcome> {
            Ok(ReadOutcome::WouldBlock)
        }

        fn write(&mut self, _bytes: &[u8]) -> Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::WouldBlock).into())
        }

        fn poll_readable(&self, _timeout: Duration) -> Result<Readiness> {
            Ok(Readiness::Timeout)
        }

        fn poll_writable(&self, _timeout: Duration) -> Result<Readiness> {
            Ok(Readiness::Ready)
        }

        fn try_clone_channel(&self) -> Result<Box<dyn Channel>> {
            Ok(Box::new(Full))
        }
    }

    #[test]
    fn write_all_within_gives_up_on_a_full_channel() {
        let mut ch = Full;
        let start = Instant::now();
        let outcome = ch
            .write_all_within(&[0x90, 0x51, 0xFF], Duration::from_millis(30))
            .expect("a full channel is not an error");
        assert_eq!(outcome, Readiness::Timeout);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn write_all_within_reports_hangup_and_completes_partial_writes() {
        let mut dead = Dead;
        assert_eq!(
            dead.write_all_within(b"x", Duration::from_millis(10))
                .expect("hangup is not an error"),
            Readiness::Hangup
        );

        let mut ch = Trickle {
            chunk: 1,
            written: Vec::new(),
            stalled_once: false,
        };
        assert_eq!(
            ch.write_all_within(&[0x81, 0x09, 0xFF], Duration::from_secs(1))
                .expect("trickle write should finish"),
            Readiness::Ready
        );
        assert_eq!(ch.written, vec![0x81, 0x09, 0xFF]);
    }

    #[test]
    fn write_all_zero_write_is_closed() {
        let mut ch = Dead;
        let err = ch.write_all(b"x").unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn boxed_channel_forwards() {
        let mut boxed: Box<dyn Channel> = Box::new(Dead);
        assert_eq!(
            boxed.poll_readable(Duration::from_millis(1)).unwrap(),
            Readiness::Hangup
        );
        let mut buf = [0u8; 4];
        assert_eq!(boxed.read(&mut buf).unwrap(), ReadOutcome::Hangup);
        assert_eq!(boxed.label(), "channel");
        assert!(boxed.try_clone_channel().is_ok());
    }
}
