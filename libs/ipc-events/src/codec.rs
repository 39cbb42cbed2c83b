//! Frames [`Event`]s as single lines of UTF-8 JSON, wrapping
//! [`tokio_util::codec::LinesCodec`] the way the teacher wraps
//! `LengthDelimitedCodec` for its own (length-prefixed) framing — same
//! `Framed{Read,Write}` composition, different frame shape.

use thiserror::Error;
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{Decoder as _, Encoder as _, LinesCodec, LinesCodecError};

use crate::event::Event;

#[derive(Debug, Error)]
pub enum IpcCodecError {
    #[error("IPC frame exceeded the maximum line length")]
    LineTooLong,
    #[error("IPC stream I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed IPC frame: {0}")]
    Decode(#[from] serde_json::Error),
}

impl From<LinesCodecError> for IpcCodecError {
    fn from(error: LinesCodecError) -> Self {
        match error {
            LinesCodecError::MaxLineLengthExceeded => Self::LineTooLong,
            LinesCodecError::Io(e) => Self::Io(e),
        }
    }
}

pub struct Decoder {
    inner: LinesCodec,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            inner: LinesCodec::new(),
        }
    }
}

impl tokio_util::codec::Decoder for Decoder {
    type Error = IpcCodecError;
    type Item = Event;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Event>, IpcCodecError> {
        let Some(line) = self.inner.decode(buf)? else {
            return Ok(None);
        };
        if line.is_empty() {
            // Readers tolerate blank lines rather than treat them as a frame.
            return self.decode(buf);
        }
        Ok(Some(serde_json::from_str(&line)?))
    }
}

pub struct Encoder {
    inner: LinesCodec,
}

impl Default for Encoder {
    fn default() -> Self {
        Self {
            inner: LinesCodec::new(),
        }
    }
}

impl tokio_util::codec::Encoder<&Event> for Encoder {
    type Error = IpcCodecError;

    fn encode(&mut self, event: &Event, buf: &mut BytesMut) -> Result<(), IpcCodecError> {
        let line = serde_json::to_string(event)?;
        debug_assert!(!line.contains('\n'), "event serialization must never embed a newline");
        self.inner.encode(line, buf)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventData;
    use tokio_util::codec::{Decoder as _, Encoder as _};

    #[test]
    fn encode_then_decode_round_trips_one_frame() {
        let event = Event::with_data(
            "status",
            EventData {
                enabled: Some(true),
                ..Default::default()
            },
        );

        let mut buf = BytesMut::new();
        Encoder::default().encode(&event, &mut buf).unwrap();
        assert!(buf.ends_with(b"\n"));

        let decoded = Decoder::default().decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut buf = BytesMut::from(&b"{\"name\":\"status\""[..]);
        assert!(Decoder::default().decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_reports_malformed_json_without_losing_stream_sync() {
        let mut buf = BytesMut::from(&b"not json\n{\"name\":\"status\"}\n"[..]);
        let mut decoder = Decoder::default();
        assert!(decoder.decode(&mut buf).is_err());
        let recovered = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(recovered.name, "status");
    }
}
