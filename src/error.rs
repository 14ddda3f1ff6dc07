use embedded_io::ErrorKind;

/// Error reported by [`BufReader`](crate::BufReader) and
/// [`BufWriter`](crate::BufWriter).
///
/// Endpoint failures are folded to their [`ErrorKind`] so the first one can
/// be latched and repeated on every later call until the endpoint is re-bound
/// with `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The inner endpoint failed.
    Io(ErrorKind),
    /// The inner source reported end of stream.
    Eof,
    /// The request cannot be satisfied within the buffer capacity.
    BufferFull,
    /// The inner source kept getting interrupted without ever making progress.
    NoProgress,
    /// No byte is eligible for `unread_byte`.
    InvalidUnreadByte,
    /// The previous operation was not a successful `read_char`.
    InvalidUnreadChar,
    /// The inner sink accepted fewer bytes than it was offered.
    ShortWrite,
    /// The bytes read do not form valid UTF-8.
    InvalidUtf8,
}

impl Error {
    /// Whether this is the end-of-stream marker rather than a failure.
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::Eof)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Io(kind) => write!(f, "endpoint error: {:?}", kind),
            Error::Eof => write!(f, "end of stream"),
            Error::BufferFull => write!(f, "buffer full"),
            Error::NoProgress => write!(f, "multiple reads returned no data or error"),
            Error::InvalidUnreadByte => write!(f, "invalid use of unread_byte"),
            Error::InvalidUnreadChar => write!(f, "invalid use of unread_char"),
            Error::ShortWrite => write!(f, "short write"),
            Error::InvalidUtf8 => write!(f, "stream did not contain valid UTF-8"),
        }
    }
}

impl core::error::Error for Error {}

impl embedded_io::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(kind) => *kind,
            Error::Eof | Error::NoProgress => ErrorKind::Other,
            Error::BufferFull | Error::InvalidUnreadByte | Error::InvalidUnreadChar => {
                ErrorKind::InvalidInput
            }
            Error::ShortWrite => ErrorKind::WriteZero,
            Error::InvalidUtf8 => ErrorKind::InvalidData,
        }
    }
}

/// A read that came up short: the bytes that were recovered before `error`
/// stopped the operation.
///
/// The view borrows the reader's internal buffer and is invalidated by the
/// next call on the reader.
#[derive(Debug)]
pub struct ShortRead<'a> {
    pub bytes: &'a [u8],
    pub error: Error,
}

/// A discard that came up short: how many bytes were skipped before `error`
/// stopped the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortDiscard {
    pub discarded: usize,
    pub error: Error,
}
