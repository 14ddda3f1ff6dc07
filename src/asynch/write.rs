use alloc::boxed::Box;
use alloc::vec;

use embedded_io::Error as _;
use embedded_io::ErrorType;
use embedded_io_async::Write;

use crate::error::Error;
use crate::DEFAULT_BUF_SIZE;

/// A buffered [`Write`]
///
/// Async twin of [`crate::BufWriter`]: accumulate, flush on overflow or on
/// request, latch the first endpoint error until `reset`.
pub struct BufWriter<T: Write> {
    inner: T,
    buf: Box<[u8]>,
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
    /// state.
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

    /// Drop pending bytes and any latched error, switch to `inner`, and
    /// return the previous endpoint.
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

    /// Append `bytes`, flushing to the endpoint as the buffer overflows; see
    /// [`crate::BufWriter::write`].
    pub async fn write(&mut self, mut bytes: &[u8]) -> Result<usize, Error> {
        if bytes.is_empty() {
            return Ok(0);
        }
        let mut written = 0;
        while bytes.len() > self.available() && self.err.is_none() {
            let n = if self.n == 0 {
                // Fast path - nothing pending and the chunk is larger than
                // the buffer.
                match self.inner.write(bytes).await {
                    Ok(0) => {
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
                let _ = self.flush().await;
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

    /// Hand all pending bytes to the endpoint; see
    /// [`crate::BufWriter::flush`].
    pub async fn flush(&mut self) -> Result<(), Error> {
        if let Some(err) = self.err {
            return Err(err);
        }
        if self.n > 0 {
            match self.inner.write(&self.buf[..self.n]).await {
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
        match self.inner.flush().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let err = Error::Io(e.kind());
                self.err = Some(err);
                Err(err)
            }
        }
    }
}

impl<T: Write> ErrorType for BufWriter<T> {
    type Error = Error;
}

impl<T: Write> Write for BufWriter<T> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        BufWriter::write(self, buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        BufWriter::flush(self).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use embedded_io::{ErrorKind, ErrorType};
    use embedded_io_async::Write;

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
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
            match self.script.pop_front() {
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

        async fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn can_append_to_buffer() {
        let mut inner = Vec::new();
        let mut buffered = BufWriter::with_capacity(8, &mut inner);

        assert_eq!(2, buffered.write(&[1, 2]).await.unwrap());
        assert_eq!(2, buffered.buffered());
        assert_eq!(0, buffered.inner.len());

        assert_eq!(2, buffered.write(&[3, 4]).await.unwrap());
        assert_eq!(4, buffered.buffered());
        assert_eq!(0, buffered.inner.len());
    }

    #[tokio::test]
    async fn bypass_large_write_when_empty() {
        let mut inner = Vec::new();
        {
            let mut buffered = BufWriter::with_capacity(8, &mut inner);
            assert_eq!(
                10,
                buffered.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]).await.unwrap()
            );
            assert_eq!(0, buffered.buffered());
        }
        assert_eq!(10, inner.len());
    }

    #[tokio::test]
    async fn flush_clears_buffer() {
        let mut inner = Vec::new();
        {
            let mut buffered = BufWriter::with_capacity(8, &mut inner);
            assert_eq!(2, buffered.write(&[1, 2]).await.unwrap());
            buffered.flush().await.unwrap();
            assert_eq!(0, buffered.buffered());
        }
        assert_eq!(&[1, 2], inner.as_slice());
    }

    #[tokio::test]
    async fn short_write_latches() {
        let inner = FlakySink::new([Ok(3)]);
        let mut buffered = BufWriter::with_capacity(8, inner);

        assert_eq!(5, buffered.write(b"hello").await.unwrap());
        assert_eq!(Err(Error::ShortWrite), buffered.flush().await);
        assert_eq!(2, buffered.buffered());
        assert_eq!(Err(Error::ShortWrite), buffered.write(b"!").await);
    }

    #[tokio::test]
    async fn sink_error_latches_until_reset() {
        let inner = FlakySink::new([Err(SinkError(ErrorKind::BrokenPipe))]);
        let mut buffered = BufWriter::with_capacity(4, inner);

        assert_eq!(4, buffered.write(b"data").await.unwrap());
        let err = Error::Io(ErrorKind::BrokenPipe);
        assert_eq!(Err(err), buffered.write(b"more").await);
        assert_eq!(Err(err), buffered.flush().await);

        buffered.reset(FlakySink::new([]));
        buffered.write(b"ok").await.unwrap();
        buffered.flush().await.unwrap();
        assert_eq!(b"ok", buffered.release().accepted.as_slice());
    }
}
