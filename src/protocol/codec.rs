use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::messages::Envelope;

/// Longest line accepted. Longer lines are skipped and reported as corrupted.
const MAX_LINE_LENGTH: usize = 64 * 1024;

/// How much of an oversize line is kept for the report.
const OVERSIZE_PREVIEW: usize = 80;


/// A received line from a port
#[derive(Clone, Debug)]
pub enum RxMessage {
    Envelope(Envelope),

    /// A line that could not be parsed as an envelope, or was too long to read.
    /// The stream stays usable.
    Corrupted {
        line: String,
        error: String,
    }
}

impl RxMessage {
    /// `Envelope` accessor helper
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            RxMessage::Envelope(envelope) => Some(envelope),
            RxMessage::Corrupted { .. } => None,
        }
    }
}


#[derive(Error, Debug)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("line exceeds {MAX_LINE_LENGTH} bytes")]
    LineTooLong,
    #[error("failed to serialize envelope: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<LinesCodecError> for CodecError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => CodecError::LineTooLong,
            LinesCodecError::Io(err) => CodecError::Io(err),
        }
    }
}


/// Newline delimited JSON envelopes.
pub struct EnvelopeCodec {
    lines: LinesCodec,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        EnvelopeCodec {
            lines: LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
        }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// `src` still starts with the oversize line when the line codec rejects it.
fn oversize(src: &BytesMut) -> RxMessage {
    let preview = &src[..src.len().min(OVERSIZE_PREVIEW)];

    RxMessage::Corrupted {
        line: format!("{}...", String::from_utf8_lossy(preview)),
        error: CodecError::LineTooLong.to_string(),
    }
}

fn parse_line(line: String) -> RxMessage {
    match serde_json::from_str(&line) {
        Ok(envelope) => RxMessage::Envelope(envelope),
        Err(err) => RxMessage::Corrupted { line, error: err.to_string() },
    }
}

impl Decoder for EnvelopeCodec {
    type Item = RxMessage;

    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = match self.lines.decode(src) {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => return Ok(Some(oversize(src))),
                Err(err) => return Err(err.into()),
            };

            // keep-alive blank lines
            if line.trim().is_empty() {
                continue;
            }

            tracing::trace!(%line, "rx");

            return Ok(Some(parse_line(line)))
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.lines.decode_eof(src) {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => return Ok(Some(parse_line(line))),
                Ok(None) => return Ok(None),
                Err(LinesCodecError::MaxLineLengthExceeded) => return Ok(Some(oversize(src))),
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, envelope: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = serde_json::to_vec(&envelope)?;

        tracing::trace!(line = %String::from_utf8_lossy(&line), "tx");

        dst.reserve(line.len() + 1);
        dst.put(&line[..]);
        dst.put_u8(b'\n');

        Ok(())
    }
}
