use alloc::boxed::Box;
use alloc::vec;

use embedded_io::Error as _;
use embedded_io::{ErrorType, Write};

use crate::error::Error;
use crate::DEFAULT_BUF_SIZE;

/// A buffered [`Write`]
///
/// The BufWriter accumulates small writes and hands them to the inner
/// endpoint in large chunks, on overflow or on an explicit
/// [`flush`](Self::flush). The first endpoint error is latched and fails
/// every later write and flush until the endpoint is re-bound with
/// [`reset`](Self::reset). Nothing flushes on drop; callers must flush before
/// letting go of the writer.
pub struct BufWriter<T: Write> {
    inner: T,
    buf: Box<[u8]>,
    /// Count of pending bytes at the front of `buf`.
    n: usize,
    err: Option<Error>,
}

impl<T: Write> BufWriter<T> {
    /// Create a new buffered writer with the default capacity.
    pub fn new(inner: T) -> Self {
        Self::with_capacity(DEFAULT_BUF_SIZE, inner)
    }

    /// Create a new buffered writer with the given capacity; zero selects the
    /// default.
    pub fn with_capacity(capacity: usize, inner: T) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_BUF_SIZE
        } else {
            capacity
        };
        Self {
            inner,
            buf: vec![0; capacity].into_boxed_slice(),
            n: 0,
            err: None,
        }
    }

    /// Rewrap with at least `capacity`, keeping pending bytes and latched
    /// state. A writer that is already large enough is returned unchanged.
    pub fn with_min_capacity(self, capacity: usize) -> Self {
        if self.buf.len() >= capacity {
            return self;
        }
        let mut bigger = Self::with_capacity(capacity, self.inner);
        bigger.buf[..self.n].copy_from_slice(&self.buf[..self.n]);
        bigger.n = self.n;
        bigger.err = self.err;
        bigger
    }

    /// Size of the internal buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes accumulated and not yet handed to the endpoint.
    pub fn buffered(&self) -> usize {
        self.n
    }

    /// Number of bytes that fit before the next write triggers a flush.
    pub fn available(&self) -> usize {
        self.buf.len() - self.n
    }

    /// Drop pending bytes and any latched error, and switch to writing to
    /// `inner`. Returns the previous endpoint.
    pub fn reset(&mut self, inner: T) -> T {
        self.n = 0;
        self.err = None;
        core::mem::replace(&mut self.inner, inner)
    }

    /// Release and get the inner writer
    ///
    /// Pending bytes are dropped; flush first.
    pub fn release(self) -> T {
        self.inner
    }

    /// Append `bytes`, flushing to the endpoint as the buffer overflows.
    ///
    /// A chunk larger than the whole buffer is handed to the endpoint
    /// directly once nothing is pending, skipping the intermediate copy.
    /// Returns the number of bytes accepted, which is `bytes.len()` unless an
    /// error is latched.
    pub fn write(&mut self, mut bytes: &[u8]) -> Result<usize, Error> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        while bytes.len() > self.available() && self.err.is_none() {
            let n = if self.n == 0 {
                // Fast path - nothing pending and the chunk is larger than
                // the buffer, so hand it to the endpoint as-is.
                match self.inner.write(bytes) {
                    Ok(0) => {
                        // A sink refusing a non-empty write has broken its
                        // contract; treat it like a short write.
                        self.err = Some(Error::ShortWrite);
                        0
                    }
                    Ok(n) => {
                        assert!(n <= bytes.len(), "endpoint accepted more bytes than offered");
                        n
                    }
                    Err(e) => {
                        self.err = Some(Error::Io(e.kind()));
                        0
                    }
                }
            } else {
                let n = usize::min(self.available(), bytes.len());
                self.buf[self.n..self.n + n].copy_from_slice(&bytes[..n]);
                self.n += n;
                // A failure is latched; the loop condition sees it.
                let _ = self.flush();
                n
            };
            written += n;
            bytes = &bytes[n..];
        }
        if let Some(err) = self.err {
            return Err(err);
        }
        self.buf[self.n..self.n + bytes.len()].copy_from_slice(bytes);
        self.n += bytes.len();
        written += bytes.len();
        Ok(written)
    }

    /// Hand all pending bytes to the endpoint.
    ///
    /// A sink accepting fewer bytes than offered without reporting an error
    /// latches [`Error::ShortWrite`]; the unsent tail stays pending. The
    /// endpoint's own `flush` is invoked afterwards, so buffered layers below
    /// drain too.
    pub fn flush(&mut self) -> Result<(), Error> {
        if let Some(err) = self.err {
            return Err(err);
        }
        if self.n > 0 {
            match self.inner.write(&self.buf[..self.n]) {
                Ok(written) if written < self.n => {
                    if written > 0 {
                        self.buf.copy_within(written..self.n, 0);
                    }
                    self.n -= written;
                    let err = Error::ShortWrite;
                    self.err = Some(err);
                    return Err(err);
                }
                Ok(written) => {
                    assert!(
                        written == self.n,
                        "endpoint accepted more bytes than offered"
                    );
                    self.n = 0;
                }
                Err(e) => {
                    let err = Error::Io(e.kind());
                    self.err = Some(err);
                    return Err(err);
                }
            }
        }
        self.inner.flush().map_err(|e| {
            let err = Error::Io(e.kind());
            self.err = Some(err);
            err
        })
    }
}

impl<T: Write> ErrorType for BufWriter<T> {
    type Error = Error;
}

impl<T: Write> Write for BufWriter<T> {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        BufWriter::write(self, buf)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        BufWriter::flush(self)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use embedded_io::{ErrorKind, ErrorType, Write};

    use super::BufWriter;
    use crate::Error;

    /// Sink that accepts a scripted number of bytes per write, or fails.
    struct FlakySink {
        accepted: Vec<u8>,
        script: VecDeque<Result<usize, SinkError>>,
    }

    impl FlakySink {
        fn new(script: impl IntoIterator<Item = Result<usize, SinkError>>) -> Self {
            Self {
                accepted: Vec::new(),
                script: script.into_iter().collect(),
            }
        }
    }

    #[derive(Debug, Clone, Copy)]
    struct SinkError(ErrorKind);

    impl core::fmt::Display for SinkError {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            write!(f, "scripted failure: {:?}", self.0)
        }
    }

    impl std::error::Error for SinkError {}

    impl embedded_io::Error for SinkError {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    impl ErrorType for FlakySink {
        type Error = SinkError;
    }

    impl Write for FlakySink {
        fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            match self.script.pop_front() {
                // Past the script the sink accepts everything.
                None => {
                    self.accepted.extend_from_slice(buf);
                    Ok(buf.len())
                }
                Some(Ok(n)) => {
                    let n = n.min(buf.len());
                    self.accepted.extend_from_slice(&buf[..n]);
                    Ok(n)
                }
                Some(Err(e)) => Err(e),
            }
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn can_append_to_buffer() {
        let mut inner = Vec::new();
        let mut buffered = BufWriter::with_capacity(8, &mut inner);

        assert_eq!(2, buffered.write(&[1, 2]).unwrap());
        assert_eq!(2, buffered.buffered());
        assert_eq!(0, buffered.inner.len());

        assert_eq!(2, buffered.write(&[3, 4]).unwrap());
        assert_eq!(4, buffered.buffered());
        assert_eq!(0, buffered.inner.len());
    }

    #[test]
    fn overflow_triggers_flush() {
        let mut inner = Vec::new();
        {
            let mut buffered = BufWriter::with_capacity(8, &mut inner);
            assert_eq!(6, buffered.write(&[1, 2, 3, 4, 5, 6]).unwrap());
            assert_eq!(4, buffered.write(&[7, 8, 9, 10]).unwrap());
            // The first eight went out when the buffer overflowed.
            assert_eq!(2, buffered.buffered());
        }
        assert_eq!(&[1, 2, 3, 4, 5, 6, 7, 8], inner.as_slice());
    }

    #[test]
    fn bypass_large_write_when_empty() {
        let mut inner = Vec::new();
        {
            let mut buffered = BufWriter::with_capacity(8, &mut inner);
            assert_eq!(10, buffered.write(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap());
            // Straight through: the internal buffer was never touched.
            assert_eq!(0, buffered.buffered());
        }
        assert_eq!(10, inner.len());
    }

    #[test]
    fn large_write_when_not_empty() {
        let mut inner = Vec::new();
        {
            let mut buffered = BufWriter::with_capacity(8, &mut inner);
            assert_eq!(1, buffered.write(&[1]).unwrap());
            assert_eq!(9, buffered.write(&[2, 3, 4, 5, 6, 7, 8, 9, 10]).unwrap());
            buffered.flush().unwrap();
        }
        assert_eq!(
            &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10],
            inner.as_slice()
        );
    }

    #[test]
    fn flush_clears_buffer() {
        let mut inner = Vec::new();
        {
            let mut buffered = BufWriter::with_capacity(8, &mut inner);
            assert_eq!(2, buffered.write(&[1, 2]).unwrap());
            buffered.flush().unwrap();
            assert_eq!(0, buffered.buffered());
        }
        assert_eq!(&[1, 2], inner.as_slice());
    }

    #[test]
    fn round_trip() {
        let mut inner = Vec::new();
        let input: Vec<u8> = (0..=255).collect();
        {
            let mut buffered = BufWriter::with_capacity(16, &mut inner);
            for chunk in input.chunks(7) {
                assert_eq!(chunk.len(), buffered.write(chunk).unwrap());
            }
            buffered.flush().unwrap();
        }
        assert_eq!(input, inner);
    }

    #[test]
    fn short_write_latches() {
        let inner = FlakySink::new([Ok(3)]);
        let mut buffered = BufWriter::with_capacity(8, inner);

        assert_eq!(5, buffered.write(b"hello").unwrap());
        assert_eq!(Err(Error::ShortWrite), buffered.flush());
        // The unsent tail stays pending and the error repeats.
        assert_eq!(2, buffered.buffered());
        assert_eq!(Err(Error::ShortWrite), buffered.write(b"!"));
        assert_eq!(Err(Error::ShortWrite), buffered.flush());
    }

    #[test]
    fn direct_write_without_progress_latches() {
        let inner = FlakySink::new([Ok(0)]);
        let mut buffered = BufWriter::with_capacity(4, inner);

        // Larger than the buffer with nothing pending goes straight to the
        // sink, which accepts nothing.
        assert_eq!(Err(Error::ShortWrite), buffered.write(&[1, 2, 3, 4, 5, 6]));
        assert_eq!(Err(Error::ShortWrite), buffered.flush());
    }

    #[test]
    fn sink_error_latches_until_reset() {
        let inner = FlakySink::new([Err(SinkError(ErrorKind::BrokenPipe))]);
        let mut buffered = BufWriter::with_capacity(4, inner);

        assert_eq!(4, buffered.write(b"data").unwrap());
        // Overflowing write hits the failing sink.
        let err = Error::Io(ErrorKind::BrokenPipe);
        assert_eq!(Err(err), buffered.write(b"more"));
        assert_eq!(Err(err), buffered.flush());

        buffered.reset(FlakySink::new([]));
        buffered.write(b"ok").unwrap();
        buffered.flush().unwrap();
        assert_eq!(b"ok", buffered.release().accepted.as_slice());
    }

    #[test]
    fn zero_capacity_selects_default() {
        let buffered = BufWriter::with_capacity(0, Vec::new());
        assert_eq!(crate::DEFAULT_BUF_SIZE, buffered.capacity());
    }

    #[test]
    fn with_min_capacity_keeps_pending_bytes() {
        let mut inner = Vec::new();
        {
            let buffered = BufWriter::with_capacity(4, &mut inner);
            let mut buffered = buffered.with_min_capacity(4); // unchanged
            assert_eq!(4, buffered.capacity());
            assert_eq!(3, buffered.write(b"abc").unwrap());
            let mut buffered = buffered.with_min_capacity(32);
            assert_eq!(32, buffered.capacity());
            assert_eq!(3, buffered.buffered());
            buffered.flush().unwrap();
        }
        assert_eq!(b"abc", inner.as_slice());
    }
}
