#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[cfg(feature = "async")]
pub mod asynch;

mod error;
mod read;
mod utf8;
mod write;

pub use error::{Error, ShortDiscard, ShortRead};
pub use read::BufReader;
pub use write::BufWriter;

/// Buffer capacity used by `new`; the writer also falls back to it when a
/// zero capacity is requested.
pub const DEFAULT_BUF_SIZE: usize = 4096;

/// Smallest reader buffer that is ever allocated; peeking and char decoding
/// need a few bytes of lookahead to be useful at all.
pub const MIN_READ_BUFFER_SIZE: usize = 16;

/// How many consecutive `ErrorKind::Interrupted` results the refill loop
/// tolerates from the inner endpoint before latching [`Error::NoProgress`].
pub(crate) const MAX_CONSECUTIVE_EMPTY_READS: usize = 100;
