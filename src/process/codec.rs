//! Line framing for the CLI's stdout and stderr streams.
//!
//! Wraps [`tokio_util::codec::AnyDelimiterCodec`] with a maximum line length
//! so a runaway process cannot make the reader buffer unbounded output.
//! Framing happens on raw bytes; each line is decoded lossily, so invalid
//! UTF-8 costs replacement characters, never the stream.
//!
//! # Usage
//!
//! Use [`NdjsonCodec`] with [`tokio_util::codec::FramedRead`], which calls
//! [`Decoder::decode_eof`] at end of stream so a trailing line without a
//! newline is still delivered.

use bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Decoder};

use crate::{AppError, Result};

/// Maximum accepted line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited text codec with a configurable length limit.
///
/// # Decoder
///
/// Each `\n`-terminated chunk becomes one `String` with a trailing `\r`
/// removed. Over-long lines yield [`AppError::Process`]; the codec then
/// discards input up to the next newline and keeps decoding. I/O failures
/// map to [`AppError::Io`].
#[derive(Debug)]
pub struct NdjsonCodec {
    inner: AnyDelimiterCodec,
    max_length: usize,
}

impl NdjsonCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec with a custom limit, for tests.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), Vec::new(), max_length),
            max_length,
        }
    }

    /// The line length limit this codec enforces.
    #[must_use]
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    fn map_error(&self, err: AnyDelimiterCodecError) -> AppError {
        match err {
            AnyDelimiterCodecError::MaxChunkLengthExceeded => AppError::Process(format!(
                "line too long: exceeded {} bytes",
                self.max_length
            )),
            AnyDelimiterCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
        }
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.inner.decode(src) {
            Ok(chunk) => Ok(chunk.map(|bytes| to_line(&bytes))),
            Err(err) => Err(self.map_error(err)),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.inner.decode_eof(src) {
            Ok(chunk) => Ok(chunk.map(|bytes| to_line(&bytes))),
            Err(err) => Err(self.map_error(err)),
        }
    }
}

fn to_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
