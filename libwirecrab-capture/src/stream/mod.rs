//! Decoding of the text output of an external decoder, one record at a time

use libwirecrab_dissect::ProtocolNode;

use crate::error::StreamError;

mod fields;
mod pdml;

pub use fields::*;
pub use pdml::*;

/// A lazy, unbounded sequence of decoded records
///
/// `Ok(None)` is the end of the stream, and is terminal. Errors for which
/// `StreamError::is_recoverable` is true concern only one record: the next call
/// continues with the following one.
pub trait StreamFrameParser: Send {
    fn next_node(&mut self) -> Result<Option<ProtocolNode>, StreamError>;
}
