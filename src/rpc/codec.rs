//! NDJSON codec for the framed RPC stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! misbehaving peer cannot force unbounded buffering of a single frame.
//! Each newline-terminated UTF-8 line is one complete frame.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{ConduitError, Result};

/// Default maximum frame length accepted on the wire: 1 MiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1_048_576;

/// Line codec for the bidirectional RPC stream.
///
/// # Decoder
///
/// Inbound lines longer than the configured limit return
/// [`ConduitError::Framing`]`("line too long: …")` rather than allocating;
/// the stream itself stays decodable afterwards. I/O errors are mapped to
/// [`ConduitError::Io`].
///
/// # Encoder
///
/// Outbound strings are written as `item\n`. The length limit is a
/// decoder-side concern only.
#[derive(Debug)]
pub struct JsonLineCodec {
    inner: LinesCodec,
    max_frame_bytes: usize,
}

impl JsonLineCodec {
    /// Create a codec with the default frame limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_FRAME_BYTES)
    }

    /// Create a codec with an explicit per-frame byte limit.
    #[must_use]
    pub fn with_limit(max_frame_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_frame_bytes),
            max_frame_bytes,
        }
    }

    fn map_codec_error(&self, e: LinesCodecError) -> ConduitError {
        match e {
            LinesCodecError::MaxLineLengthExceeded => ConduitError::Framing(format!(
                "line too long: exceeded {} bytes",
                self.max_frame_bytes
            )),
            LinesCodecError::Io(io_err) => ConduitError::Io(io_err.to_string()),
        }
    }
}

impl Default for JsonLineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for JsonLineCodec {
    type Item = String;
    type Error = ConduitError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner.decode(src).map_err(|e| self.map_codec_error(e))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.inner
            .decode_eof(src)
            .map_err(|e| self.map_codec_error(e))
    }
}

impl Encoder<String> for JsonLineCodec {
    type Error = ConduitError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner
            .encode(item, dst)
            .map_err(|e| self.map_codec_error(e))
    }
}
