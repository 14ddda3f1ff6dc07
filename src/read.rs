use core::ops::Range;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use embedded_io::Error as _;
use embedded_io::{BufRead, ErrorKind, ErrorType, Read};

use crate::error::{Error, ShortDiscard, ShortRead};
use crate::utf8;
use crate::{DEFAULT_BUF_SIZE, MAX_CONSECUTIVE_EMPTY_READS, MIN_READ_BUFFER_SIZE};

/// A buffered [`Read`]
///
/// The BufReader turns many small reads into few large reads against the
/// inner endpoint, and layers byte, `char` and delimiter oriented operations
/// on top of the buffered window. The first endpoint error is latched: once
/// the buffered bytes are drained, every later operation reports it until the
/// endpoint is re-bound with [`reset`](Self::reset).
pub struct BufReader<T> {
    inner: T,
    buf: Box<[u8]>,
    /// Index of the next unread byte.
    r: usize,
    /// Index one past the last filled byte.
    w: usize,
    err: Option<Error>,
    /// Last byte handed out by a byte-backed read, for `unread_byte`.
    last_byte: Option<u8>,
    /// Width of the last `read_char` result, for `unread_char`.
    last_char_size: Option<usize>,
}

impl<T: Read> BufReader<T> {
    /// Create a new buffered reader with the default capacity.
    pub fn new(inner: T) -> Self {
        Self::with_capacity(DEFAULT_BUF_SIZE, inner)
    }

    /// Create a new buffered reader with at least the given capacity.
    ///
    /// Capacities below [`MIN_READ_BUFFER_SIZE`] are raised to it.
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

    /// Rewrap with at least `capacity`.
    ///
    /// A reader whose buffer is already large enough is returned unchanged,
    /// so re-buffering an already-buffered reader is free. Otherwise the
    /// endpoint is re-wrapped in a larger buffer, carrying over the buffered
    /// bytes and the latched state.
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

    /// Number of bytes that can be read from the buffer without touching the
    /// inner endpoint.
    pub fn buffered(&self) -> usize {
        self.w - self.r
    }

    /// Get whether there are any bytes readily available
    pub fn is_empty(&self) -> bool {
        self.r == self.w
    }

    /// Discard buffered bytes, unread state and any latched error, and switch
    /// to reading from `inner`. Returns the previous endpoint.
    pub fn reset(&mut self, inner: T) -> T {
        self.r = 0;
        self.w = 0;
        self.err = None;
        self.last_byte = None;
        self.last_char_size = None;
        core::mem::replace(&mut self.inner, inner)
    }

    /// Release and get the inner reader
    ///
    /// Buffered bytes are dropped.
    pub fn release(self) -> T {
        self.inner
    }

    /// Read a new chunk into the buffer.
    ///
    /// Never called once an error is latched; panics if the buffer is already
    /// full, which would mean a caller lost track of the cursors.
    fn fill(&mut self) {
        if self.err.is_some() {
            return;
        }
        // Slide the unread window to the front to maximize the free tail.
        if self.r > 0 {
            self.buf.copy_within(self.r..self.w, 0);
            self.w -= self.r;
            self.r = 0;
        }
        assert!(self.w < self.buf.len(), "fill of a full buffer");

        let mut retries = MAX_CONSECUTIVE_EMPTY_READS;
        while retries > 0 {
            match self.inner.read(&mut self.buf[self.w..]) {
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
    /// The inner endpoint is read until `n` bytes are buffered, the buffer is
    /// full, or an error is latched. A short view is reported through
    /// [`ShortRead`], with [`Error::BufferFull`] when `n` exceeds the buffer
    /// capacity. The view is invalidated by the next call on the reader.
    ///
    /// Peeking makes the preceding byte ineligible for `unread_byte` /
    /// `unread_char`.
    pub fn peek(&mut self, n: usize) -> Result<&[u8], ShortRead<'_>> {
        self.last_byte = None;
        self.last_char_size = None;

        while self.buffered() < n && self.buffered() < self.buf.len() && self.err.is_none() {
            self.fill();
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

    /// Skip the next `n` bytes.
    ///
    /// Guaranteed not to touch the inner endpoint when `n` bytes are already
    /// buffered. On shortfall the error carries how far the skip got.
    pub fn discard(&mut self, n: usize) -> Result<usize, ShortDiscard> {
        if n == 0 {
            return Ok(0);
        }
        let mut remain = n;
        loop {
            let mut skip = self.buffered();
            if skip == 0 {
                self.fill();
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
    pub fn read_byte(&mut self) -> Result<u8, Error> {
        self.last_char_size = None;
        while self.r == self.w {
            if let Some(err) = self.err {
                return Err(err);
            }
            self.fill();
        }
        let byte = self.buf[self.r];
        self.r += 1;
        self.last_byte = Some(byte);
        Ok(byte)
    }

    /// Make the last byte read available again.
    ///
    /// Only the single most recently read byte can be unread, and only if the
    /// operation that produced it went through the buffer.
    pub fn unread_byte(&mut self) -> Result<(), Error> {
        let Some(byte) = self.last_byte else {
            return Err(Error::InvalidUnreadByte);
        };
        // r == 0 with bytes buffered means the last byte did not come out of
        // the current window; there is nowhere to put it back.
        if self.r == 0 && self.w > 0 {
            return Err(Error::InvalidUnreadByte);
        }
        if self.r > 0 {
            self.r -= 1;
        } else {
            // Fully drained buffer: re-expose a one byte window.
            self.w = 1;
        }
        self.buf[self.r] = byte;
        self.last_byte = None;
        self.last_char_size = None;
        Ok(())
    }

    /// Read a single UTF-8 encoded character.
    ///
    /// Bytes that do not decode yield `char::REPLACEMENT_CHARACTER`, consume
    /// exactly one byte, and are not an error; errors only come from the
    /// endpoint.
    pub fn read_char(&mut self) -> Result<char, Error> {
        while self.r + utf8::MAX_CHAR_WIDTH > self.w
            && !utf8::starts_with_full_char(&self.buf[self.r..self.w])
            && self.err.is_none()
            && self.buffered() < self.buf.len()
        {
            self.fill();
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
    ///
    /// Fails unless the most recent operation on the reader was a successful
    /// [`read_char`](Self::read_char).
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
    /// including it.
    ///
    /// The `Ok` view always ends in `delim`. If the delimiter does not show
    /// up before the endpoint fails, or before the buffer runs full, the
    /// bytes scanned so far are consumed and handed back in a [`ShortRead`]
    /// (with [`Error::BufferFull`] in the latter case). Either view borrows
    /// the internal buffer and dies at the next call on the reader.
    pub fn read_slice(&mut self, delim: u8) -> Result<&[u8], ShortRead<'_>> {
        let (range, err) = self.scan_to(delim);
        match err {
            None => Ok(&self.buf[range]),
            Some(error) => Err(ShortRead {
                bytes: &self.buf[range],
                error,
            }),
        }
    }

    /// Delimiter scan shared by `read_slice`, `read_line` and `read_until`.
    ///
    /// Returns the consumed range of `buf` and the error that stopped the
    /// scan, if any. Bytes are never re-scanned across refills: each round
    /// searches only beyond what the previous one covered.
    fn scan_to(&mut self, delim: u8) -> (Range<usize>, Option<Error>) {
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
            self.fill();
        };
        if !range.is_empty() {
            self.last_byte = Some(self.buf[range.end - 1]);
            self.last_char_size = None;
        }
        (range, err)
    }

    /// Read one line, excluding the terminator.
    ///
    /// The flag is true when the line was cut short by the buffer capacity;
    /// the remainder comes out of the following calls. A terminating `"\n"`
    /// or `"\r\n"` is stripped. A line and an error are never reported
    /// together: the error comes out of the call after the one returning the
    /// final bytes.
    pub fn read_line(&mut self) -> Result<(&[u8], bool), Error> {
        let (mut range, err) = self.scan_to(b'\n');
        match err {
            Some(Error::BufferFull) => {
                // A "\r\n" pair may straddle the buffer boundary; put the CR
                // back so the next call sees it in front of the LF.
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

    /// Read until `delim` inclusive, appending to `out`.
    ///
    /// Unlike [`read_slice`](Self::read_slice) the result is owned by the
    /// caller and not limited by the buffer capacity. Returns the number of
    /// bytes appended; `Ok` if and only if they end in `delim`. On `Err` the
    /// bytes read so far have still been appended.
    pub fn read_until(&mut self, delim: u8, out: &mut Vec<u8>) -> Result<usize, Error> {
        let mut total = 0;
        loop {
            let (range, err) = self.scan_to(delim);
            total += range.len();
            out.extend_from_slice(&self.buf[range]);
            match err {
                None => return Ok(total),
                // Full buffer without a delimiter: bank the fragment and
                // keep scanning.
                Some(Error::BufferFull) => {}
                Some(err) => return Err(err),
            }
        }
    }

    /// Read until `delim` inclusive, appending to `out` as UTF-8.
    ///
    /// Same contract as [`read_until`](Self::read_until), plus
    /// [`Error::InvalidUtf8`] when the bytes read do not decode; the valid
    /// prefix is still appended.
    pub fn read_string(&mut self, delim: u8, out: &mut String) -> Result<usize, Error> {
        let mut bytes = Vec::new();
        let result = self.read_until(delim, &mut bytes);
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
    /// Amortized read: served from the buffer when possible, with at most one
    /// endpoint read per call. A latched end of stream surfaces as `Ok(0)`
    /// per the trait contract; other latched errors repeat as `Err`.
    fn read(&mut self, out: &mut [u8]) -> Result<usize, Self::Error> {
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
                // Fast path - a destination at least as large as the buffer
                // is read directly, skipping the intermediate copy.
                return match self.inner.read(out) {
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
                        // Transient; surfaced but not latched.
                        Err(Error::Io(ErrorKind::Interrupted))
                    }
                    Err(e) => {
                        let err = Error::Io(e.kind());
                        self.err = Some(err);
                        Err(err)
                    }
                };
            }
            // One endpoint read, not a refill loop: a small destination must
            // not make the caller wait for a full buffer.
            self.r = 0;
            self.w = 0;
            match self.inner.read(&mut self.buf) {
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
    fn fill_buf(&mut self) -> Result<&[u8], Self::Error> {
        while self.r == self.w {
            match self.err {
                // EOF is the empty window, not an error, for this trait.
                Some(Error::Eof) => break,
                Some(err) => return Err(err),
                None => self.fill(),
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
