use core::ops::Range;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use embedded_io::Error as _;
use embedded_io::{ErrorKind, ErrorType};
use embedded_io_async::{BufRead, Read};

use crate::error::{Error, ShortDiscard, ShortRead};
use crate::utf8;
use crate::{DEFAULT_BUF_SIZE, MAX_CONSECUTIVE_EMPTY_READS, MIN_READ_BUFFER_SIZE};

/// A buffered [`Read`]
///
/// Async twin of [`crate::BufReader`]: the same buffered window, error
/// latching and unread tracking, with refills awaited.
pub struct BufReader<T> {
    inner: T,
    buf: Box<[u8]>,
    r: usize,
    w: usize,
    err: Option<Error>,
    last_byte: Option<u8>,
    last_char_size: Option<usize>,
}

impl<T: Read> BufReader<T> {
    /// Create a new buffered reader with the default capacity.
    pub fn new(inner: T) -> Self {
        Self::with_capacity(DEFAULT_BUF_SIZE, inner)
    }

    /// Create a new buffered reader with at least the given capacity.
    pub fn with_capacity(capacity: usize, inner: T) -> Self {
        let capacity = capacity.max(MIN_READ_BUFFER_SIZE);
        Self {
            inner,
            buf: vec![0; capacity].into_boxed_slice(),
            r: 0,
            w: 0,
            err: None,
            last_byte: None,
            last_char_size: None,
        }
    }

    /// Rewrap with at least `capacity`, reusing `self` when it is already
    /// large enough.
    pub fn with_min_capacity(self, capacity: usize) -> Self {
        if self.buf.len() >= capacity.max(MIN_READ_BUFFER_SIZE) {
            return self;
        }
        let mut bigger = Self::with_capacity(capacity, self.inner);
        let buffered = self.w - self.r;
        bigger.buf[..buffered].copy_from_slice(&self.buf[self.r..self.w]);
        bigger.w = buffered;
        bigger.err = self.err;
        bigger.last_byte = self.last_byte;
        bigger.last_char_size = self.last_char_size;
        bigger
    }

    /// Size of the internal buffer.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Number of bytes that can be read without touching the inner endpoint.
    pub fn buffered(&self) -> usize {
        self.w - self.r
    }

    /// Get whether there are any bytes readily available
    pub fn is_empty(&self) -> bool {
        self.r == self.w
    }

    /// Discard buffered bytes and latched state, switch to `inner`, and
    /// return the previous endpoint.
    pub fn reset(&mut self, inner: T) -> T {
        self.r = 0;
        self.w = 0;
        self.err = None;
        self.last_byte = None;
        self.last_char_size = None;
        core::mem::replace(&mut self.inner, inner)
    }

    /// Release and get the inner reader
    pub fn release(self) -> T {
        self.inner
    }

    async fn fill(&mut self) {
        if self.err.is_some() {
            return;
        }
        if self.r > 0 {
            self.buf.copy_within(self.r..self.w, 0);
            self.w -= self.r;
            self.r = 0;
        }
        assert!(self.w < self.buf.len(), "fill of a full buffer");

        let mut retries = MAX_CONSECUTIVE_EMPTY_READS;
        while retries > 0 {
            match self.inner.read(&mut self.buf[self.w..]).await {
                Ok(0) => {
                    self.err = Some(Error::Eof);
                    return;
                }
                Ok(n) => {
                    assert!(
                        n <= self.buf.len() - self.w,
                        "endpoint reported more bytes than the buffer holds"
                    );
                    self.w += n;
                    return;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => retries -= 1,
                Err(e) => {
                    self.err = Some(Error::Io(e.kind()));
                    return;
                }
            }
        }
        self.err = Some(Error::NoProgress);
    }

    /// View the next `n` buffered bytes without advancing the read cursor.
    ///
    /// See [`crate::BufReader::peek`] for the full contract.
    pub async fn peek(&mut self, n: usize) -> Result<&[u8], ShortRead<'_>> {
        self.last_byte = None;
        self.last_char_size = None;

        while self.buffered() < n && self.buffered() < self.buf.len() && self.err.is_none() {
            self.fill().await;
        }

        if n > self.buf.len() {
            return Err(ShortRead {
                bytes: &self.buf[self.r..self.w],
                error: Error::BufferFull,
            });
        }
        if self.buffered() < n {
            let error = self.err.unwrap_or(Error::BufferFull);
            return Err(ShortRead {
                bytes: &self.buf[self.r..self.w],
                error,
            });
        }
        Ok(&self.buf[self.r..self.r + n])
    }

    /// Skip the next `n` bytes; on shortfall the error carries how far the
    /// skip got.
    pub async fn discard(&mut self, n: usize) -> Result<usize, ShortDiscard> {
        if n == 0 {
            return Ok(0);
        }
        let mut remain = n;
        loop {
            let mut skip = self.buffered();
            if skip == 0 {
                self.fill().await;
                skip = self.buffered();
            }
            skip = skip.min(remain);
            self.r += skip;
            remain -= skip;
            if remain == 0 {
                return Ok(n);
            }
            if let Some(error) = self.err {
                return Err(ShortDiscard {
                    discarded: n - remain,
                    error,
                });
            }
        }
    }

    /// Read a single byte, refilling from the endpoint as needed.
    pub async fn read_byte(&mut self) -> Result<u8, Error> {
        self.last_char_size = None;
        while self.r == self.w {
            if let Some(err) = self.err {
                return Err(err);
            }
            self.fill().await;
        }
        let byte = self.buf[self.r];
        self.r += 1;
        self.last_byte = Some(byte);
        Ok(byte)
    }

    /// Make the last byte read available again.
    pub fn unread_byte(&mut self) -> Result<(), Error> {
        let Some(byte) = self.last_byte else {
            return Err(Error::InvalidUnreadByte);
        };
        if self.r == 0 && self.w > 0 {
            return Err(Error::InvalidUnreadByte);
        }
        if self.r > 0 {
            self.r -= 1;
        } else {
            self.w = 1;
        }
        self.buf[self.r] = byte;
        self.last_byte = None;
        self.last_char_size = None;
        Ok(())
    }

    /// Read a single UTF-8 encoded character; undecodable bytes yield the
    /// replacement character and consume one byte.
    pub async fn read_char(&mut self) -> Result<char, Error> {
        while self.r + utf8::MAX_CHAR_WIDTH > self.w
            && !utf8::starts_with_full_char(&self.buf[self.r..self.w])
            && self.err.is_none()
            && self.buffered() < self.buf.len()
        {
            self.fill().await;
        }
        self.last_char_size = None;
        if self.r == self.w {
            return Err(self.err.unwrap_or(Error::Eof));
        }
        let (c, size) = match utf8::decode_first(&self.buf[self.r..self.w]) {
            utf8::Decoded::Char(c, size) => (c, size),
            _ => (char::REPLACEMENT_CHARACTER, 1),
        };
        self.r += size;
        self.last_byte = Some(self.buf[self.r - 1]);
        self.last_char_size = Some(size);
        Ok(c)
    }

    /// Make the last character read available again.
    pub fn unread_char(&mut self) -> Result<(), Error> {
        let Some(size) = self.last_char_size else {
            return Err(Error::InvalidUnreadChar);
        };
        if size > self.r {
            return Err(Error::InvalidUnreadChar);
        }
        self.r -= size;
        self.last_byte = None;
        self.last_char_size = None;
        Ok(())
    }

    /// Scan for `delim`, consuming and returning everything up to and
    /// including it; see [`crate::BufReader::read_slice`].
    pub async fn read_slice(&mut self, delim: u8) -> Result<&[u8], ShortRead<'_>> {
        let (range, err) = self.scan_to(delim).await;
        match err {
            None => Ok(&self.buf[range]),
            Some(error) => Err(ShortRead {
                bytes: &self.buf[range],
                error,
            }),
        }
    }

    async fn scan_to(&mut self, delim: u8) -> (Range<usize>, Option<Error>) {
        let mut scanned = 0;
        let (range, err) = loop {
            if let Some(i) = self.buf[self.r + scanned..self.w]
                .iter()
                .position(|&b| b == delim)
            {
                let end = self.r + scanned + i + 1;
                let range = self.r..end;
                self.r = end;
                break (range, None);
            }
            if let Some(err) = self.err {
                let range = self.r..self.w;
                self.r = self.w;
                break (range, Some(err));
            }
            if self.buffered() >= self.buf.len() {
                self.r = self.w;
                break (0..self.buf.len(), Some(Error::BufferFull));
            }
            scanned = self.buffered();
            self.fill().await;
        };
        if !range.is_empty() {
            self.last_byte = Some(self.buf[range.end - 1]);
            self.last_char_size = None;
        }
        (range, err)
    }

    /// Read one line, excluding the terminator; the flag marks a prefix
    /// fragment cut short by the buffer capacity.
    pub async fn read_line(&mut self) -> Result<(&[u8], bool), Error> {
        let (mut range, err) = self.scan_to(b'\n').await;
        match err {
            Some(Error::BufferFull) => {
                if self.buf[range.clone()].last() == Some(&b'\r') {
                    assert!(self.r > 0, "tried to rewind past start of buffer");
                    self.r -= 1;
                    range.end -= 1;
                }
                Ok((&self.buf[range], true))
            }
            Some(err) if range.is_empty() => Err(err),
            _ => {
                if self.buf[range.clone()].last() == Some(&b'\n') {
                    range.end -= 1;
                    if self.buf[range.clone()].last() == Some(&b'\r') {
                        range.end -= 1;
                    }
                }
                Ok((&self.buf[range], false))
            }
        }
    }

    /// Read until `delim` inclusive, appending to `out`; `Ok` if and only if
    /// the appended bytes end in `delim`.
    pub async fn read_until(&mut self, delim: u8, out: &mut Vec<u8>) -> Result<usize, Error> {
        let mut total = 0;
        loop {
            let (range, err) = self.scan_to(delim).await;
            total += range.len();
            out.extend_from_slice(&self.buf[range]);
            match err {
                None => return Ok(total),
                Some(Error::BufferFull) => {}
                Some(err) => return Err(err),
            }
        }
    }

    /// Read until `delim` inclusive, appending to `out` as UTF-8.
    pub async fn read_string(&mut self, delim: u8, out: &mut String) -> Result<usize, Error> {
        let mut bytes = Vec::new();
        let result = self.read_until(delim, &mut bytes).await;
        match core::str::from_utf8(&bytes) {
            Ok(s) => {
                out.push_str(s);
                result
            }
            Err(e) => {
                if let Ok(s) = core::str::from_utf8(&bytes[..e.valid_up_to()]) {
                    out.push_str(s);
                }
                Err(Error::InvalidUtf8)
            }
        }
    }
}

impl<T: Read> ErrorType for BufReader<T> {
    type Error = Error;
}

impl<T: Read> Read for BufReader<T> {
    async fn read(&mut self, out: &mut [u8]) -> Result<usize, Self::Error> {
        if out.is_empty() {
            if self.buffered() > 0 {
                return Ok(0);
            }
            return match self.err {
                Some(Error::Eof) | None => Ok(0),
                Some(err) => Err(err),
            };
        }

        if self.r == self.w {
            if let Some(err) = self.err {
                return if err == Error::Eof { Ok(0) } else { Err(err) };
            }
            if out.len() >= self.buf.len() {
                // Fast path - bypass the internal buffer for large
                // destinations.
                return match self.inner.read(out).await {
                    Ok(0) => {
                        self.err = Some(Error::Eof);
                        Ok(0)
                    }
                    Ok(n) => {
                        assert!(
                            n <= out.len(),
                            "endpoint reported more bytes than the buffer holds"
                        );
                        self.last_byte = Some(out[n - 1]);
                        self.last_char_size = None;
                        Ok(n)
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {
                        Err(Error::Io(ErrorKind::Interrupted))
                    }
                    Err(e) => {
                        let err = Error::Io(e.kind());
                        self.err = Some(err);
                        Err(err)
                    }
                };
            }
            self.r = 0;
            self.w = 0;
            match self.inner.read(&mut self.buf).await {
                Ok(0) => {
                    self.err = Some(Error::Eof);
                    return Ok(0);
                }
                Ok(n) => {
                    assert!(
                        n <= self.buf.len(),
                        "endpoint reported more bytes than the buffer holds"
                    );
                    self.w = n;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {
                    return Err(Error::Io(ErrorKind::Interrupted));
                }
                Err(e) => {
                    let err = Error::Io(e.kind());
                    self.err = Some(err);
                    return Err(err);
                }
            }
        }

        let n = usize::min(self.buffered(), out.len());
        out[..n].copy_from_slice(&self.buf[self.r..self.r + n]);
        self.r += n;
        self.last_byte = Some(self.buf[self.r - 1]);
        self.last_char_size = None;
        Ok(n)
    }
}

impl<T: Read> BufRead for BufReader<T> {
    async fn fill_buf(&mut self) -> Result<&[u8], Self::Error> {
        while self.r == self.w {
            match self.err {
                Some(Error::Eof) => break,
                Some(err) => return Err(err),
                None => self.fill().await,
            }
        }
        Ok(&self.buf[self.r..self.w])
    }

    fn consume(&mut self, amt: usize) {
        assert!(amt <= self.buffered());
        self.r += amt;
        self.last_byte = None;
        self.last_char_size = None;
    }
}
