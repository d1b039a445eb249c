use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the PMU protocol client.
///
/// Everything an exchange can fail with is its own kind so callers can tell
/// connectivity problems from malformed device output. A full poll sequence
/// reports whichever of these aborted it, wrapped in `PollFailed`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out waiting for the PMU")]
    Timeout,

    #[error("connection closed by the PMU mid-read")]
    ConnectionClosed,

    #[error("bad sync in response header: {0:02x} {1:02x}")]
    BadSync(u8, u8),

    #[error("response checksum mismatch: expected {expected:#06x}, calculated {calculated:#06x}")]
    CrcMismatch { expected: u16, calculated: u16 },

    #[error("payload too large: {0} bytes")]
    PayloadTooLarge(usize),

    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("poll failed: {0}")]
    PollFailed(Box<Error>),
}
