//! Async variants of [`BufReader`](crate::BufReader) and
//! [`BufWriter`](crate::BufWriter) over `embedded-io-async` endpoints.
//!
//! Same buffer state machines and error latching as the blocking types, with
//! the endpoint calls awaited.

mod read;
mod write;

pub use read::BufReader;
pub use write::BufWriter;
