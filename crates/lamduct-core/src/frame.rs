//! Wire framing.
//!
//! ```text
//! <ASCII decimal length>:<UTF-8 JSON object, exactly `length` bytes>
//! ```
//!
//! Example: `17:{"me":"duct-bot"}`. There is no delimiter after the payload;
//! the next frame's length prefix follows immediately.

use crate::{Message, TransportError};

/// Maximum frame payload size (64 MiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Longest accepted length prefix, separator excluded.
pub const MAX_HEADER_LEN: usize = 20;

const SEPARATOR: u8 = b':';

/// Encode a message into a complete frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, TransportError> {
    let payload = serde_json::to_vec(message)?;
    let header = format!("{}:", payload.len());
    let mut frame = Vec::with_capacity(header.len() + payload.len());
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Incremental frame decoder that handles partial reads.
///
/// Bytes are fed as they arrive; [`FrameDecoder::next_message`] yields a
/// message once a whole frame is buffered. Bytes beyond the end of a frame
/// stay buffered for the next one.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Payload length and payload offset once the header has been parsed.
    pending: Option<(usize, usize)>,
}

impl FrameDecoder {
    /// An empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw bytes from the stream.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes buffered but not yet consumed by a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete message, if one is buffered.
    ///
    /// # Errors
    ///
    /// Fails on a malformed length prefix, an oversized frame, or a payload
    /// that is not a UTF-8 JSON object.
    pub fn next_message(&mut self) -> Result<Option<Message>, TransportError> {
        let (length, offset) = match self.pending {
            Some(header) => header,
            None => match self.parse_header()? {
                Some(header) => {
                    self.pending = Some(header);
                    header
                }
                None => return Ok(None),
            },
        };

        let end = offset + length;
        if self.buf.len() < end {
            return Ok(None);
        }

        let payload = std::str::from_utf8(&self.buf[offset..end])?;
        let value: serde_json::Value = serde_json::from_str(payload)?;
        let message = Message::try_from(value)?;

        self.buf.drain(..end);
        self.pending = None;
        Ok(Some(message))
    }

    fn parse_header(&self) -> Result<Option<(usize, usize)>, TransportError> {
        let Some(colon) = self.buf.iter().position(|&b| b == SEPARATOR) else {
            if self.buf.len() > MAX_HEADER_LEN {
                return Err(TransportError::HeaderTooLong(MAX_HEADER_LEN));
            }
            return Ok(None);
        };

        let header = &self.buf[..colon];
        let invalid = || TransportError::InvalidLength(String::from_utf8_lossy(header).into_owned());
        if header.is_empty()
            || header.len() > MAX_HEADER_LEN
            || !header.iter().all(u8::is_ascii_digit)
        {
            return Err(invalid());
        }

        // All digits, so the only possible parse failure is overflow.
        let length: usize = std::str::from_utf8(header)?
            .parse()
            .map_err(|_| invalid())?;
        if length > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge(length));
        }

        Ok(Some((length, colon + 1)))
    }
}
