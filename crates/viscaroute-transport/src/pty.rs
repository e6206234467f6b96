//! Pseudo-terminal acquisition and raw line configuration.
//!
//! The controller exposes one pty per endpoint: the master end is the
//! channel the router reads and writes, the slave path is where a client or
//! a (simulated) camera attaches.

use std::ffi::CStr;
use std::fs::OpenOptions;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::fd::FdChannel;

/// Line speed. Only the rates a VISCA link actually uses are supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudRate(u32);

impl BaudRate {
    pub const B9600: BaudRate = BaudRate(9600);
    pub const B19200: BaudRate = BaudRate(19200);
    pub const B38400: BaudRate = BaudRate(38400);

    pub fn new(rate: u32) -> Result<Self> {
        let baud = BaudRate(rate);
        baud.speed()?;
        Ok(baud)
    }

    pub fn get(self) -> u32 {
        self.0
    }

    fn speed(self) -> Result<libc::speed_t> {
        match self.0 {
            9600 => Ok(libc::B9600),
            19200 => Ok(libc::B19200),
            38400 => Ok(libc::B38400),
            57600 => Ok(libc::B57600),
            115200 => Ok(libc::B115200),
            other => Err(TransportError::UnsupportedBaud(other)),
        }
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        Self::B9600
    }
}

/// Raw-mode line settings applied to every pty end we open.
#[derive(Debug, Clone)]
pub struct LineConfig {
    /// Input and output speed.
    pub baud: BaudRate,
    /// `VMIN`: bytes a blocking read waits for.
    pub min_bytes: u8,
    /// `VTIME`: inter-byte timeout in tenths of a second.
    pub inter_byte_deciseconds: u8,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            baud: BaudRate::default(),
            min_bytes: 1,
            inter_byte_deciseconds: 0,
        }
    }
}

/// Put the terminal behind `fd` into raw mode with the given speed.
pub fn configure_raw(fd: BorrowedFd<'_>, config: &LineConfig) -> Result<()> {
    let speed = config.baud.speed()?;
    let raw = fd.as_raw_fd();
    // SAFETY: `raw` is a valid open descriptor for the lifetime of `fd`, and
    // `termios` is fully initialised by tcgetattr before use.
    unsafe {
        let mut termios: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(raw, &mut termios) != 0 {
            return Err(TransportError::Configure(std::io::Error::last_os_error()));
        }
        libc::cfmakeraw(&mut termios);
        libc::cfsetispeed(&mut termios, speed);
        libc::cfsetospeed(&mut termios, speed);
        termios.c_cc[libc::VMIN] = config.min_bytes;
        termios.c_cc[libc::VTIME] = config.inter_byte_deciseconds;
        if libc::tcsetattr(raw, libc::TCSANOW, &termios) != 0 {
            return Err(TransportError::Configure(std::io::Error::last_os_error()));
        }
    }
    Ok(())
}

/// Discard anything queued in either direction on a terminal.
pub fn flush_queues(fd: BorrowedFd<'_>) -> Result<()> {
    // SAFETY: `fd` is a valid open descriptor.
    if unsafe { libc::tcflush(fd.as_raw_fd(), libc::TCIOFLUSH) } != 0 {
        return Err(TransportError::Configure(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Open an existing serial-like device (a pty slave, or a real port) in raw mode.
pub fn open_serial(path: impl AsRef<Path>, config: &LineConfig) -> Result<FdChannel> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .map_err(|source| TransportError::Open {
            path: path.to_path_buf(),
            source,
        })?;
    configure_raw(file.as_fd(), config)?;
    flush_queues(file.as_fd())?;
    debug!(?path, baud = config.baud.get(), "opened serial line");
    Ok(FdChannel::from_owned_fd(
        OwnedFd::from(file),
        path.display().to_string(),
    ))
}

/// A pseudo-terminal pair.
///
/// The slave descriptor is held open until [`Pty::release_slave`] so the
/// master does not report a hangup before anyone has attached.
pub struct Pty {
    master: OwnedFd,
    slave: Option<OwnedFd>,
    slave_path: PathBuf,
}

impl Pty {
    /// Allocate a new pty and configure both ends as raw lines.
    pub fn open(config: &LineConfig) -> Result<Self> {
        let mut master: libc::c_int = -1;
        let mut slave: libc::c_int = -1;

        // SAFETY: both out-pointers are valid; the optional name/termios/winsize
        // arguments are null, which openpty accepts.
        let rc = unsafe {
            libc::openpty(
                &mut master,
                &mut slave,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        if rc != 0 {
            return Err(TransportError::Configure(std::io::Error::last_os_error()));
        }
        // SAFETY: openpty succeeded, so both descriptors are open and owned by us.
        let (master, slave) =
            unsafe { (OwnedFd::from_raw_fd(master), OwnedFd::from_raw_fd(slave)) };

        let slave_path = tty_name(slave.as_fd())?;
        configure_raw(master.as_fd(), config)?;
        configure_raw(slave.as_fd(), config)?;
        flush_queues(master.as_fd())?;

        info!(slave = %slave_path.display(), "allocated pty");
        Ok(Self {
            master,
            slave: Some(slave),
            slave_path,
        })
    }

    /// Filesystem path of the slave end.
    pub fn slave_path(&self) -> &Path {
        &self.slave_path
    }

    /// A channel over the master end.
    pub fn master_channel(&self) -> Result<FdChannel> {
        let fd = self.master.try_clone()?;
        Ok(FdChannel::from_owned_fd(
            fd,
            format!("ptm:{}", self.slave_path.display()),
        ))
    }

    /// A channel over the slave end (for an in-process device).
    pub fn slave_channel(&self) -> Result<FdChannel> {
        let fd = match &self.slave {
            Some(slave) => slave.try_clone()?,
            None => return Err(TransportError::Closed),
        };
        Ok(FdChannel::from_owned_fd(
            fd,
            format!("pts:{}", self.slave_path.display()),
        ))
    }

    /// Stop holding the slave open; the master sees a hangup once every
    /// other slave descriptor is closed too.
    pub fn release_slave(&mut self) {
        self.slave = None;
    }
}

impl std::fmt::Debug for Pty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pty")
            .field("master", &self.master.as_raw_fd())
            .field("slave_path", &self.slave_path)
            .finish()
    }
}

fn tty_name(fd: BorrowedFd<'_>) -> Result<PathBuf> {
    let mut buf: [libc::c_char; 256] = [0; 256];
    // SAFETY: `buf` is writable for its full length and `fd` is open.
    let rc = unsafe { libc::ttyname_r(fd.as_raw_fd(), buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return Err(TransportError::Configure(std::io::Error::from_raw_os_error(rc)));
    }
    // SAFETY: ttyname_r succeeded, so `buf` holds a NUL-terminated string.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(PathBuf::from(name.to_string_lossy().into_owned()))
}
