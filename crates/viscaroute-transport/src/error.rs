use std::path::PathBuf;

/// Errors that can occur on a byte channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the device at the given path.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to apply line settings (raw mode, speed).
    #[error("failed to configure line: {0}")]
    Configure(std::io::Error),

    /// The readiness poll itself failed.
    #[error("readiness poll failed: {0}")]
    Poll(std::io::Error),

    /// An I/O error occurred on the channel.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer end of the channel is gone.
    #[error("channel closed by peer")]
    Closed,

    /// The requested line speed has no termios equivalent.
    #[error("unsupported baud rate {0}")]
    UnsupportedBaud(u32),
}

pub type Result<T> = std::result::Result<T, TransportError>;
