//! Framed message transport over any byte stream.
//!
//! The framing lives here once; the stream underneath is anything that can
//! read into a buffer and write a buffer. The variants used in practice:
//!
//! - TCP socket halves (server side)
//! - a child's stdout/stdin pipe pair (offline client side)
//! - in-memory duplex halves or byte slices (tests)

use crate::frame::{FrameDecoder, encode_frame};
use crate::{Message, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default size of a single read from the underlying stream.
pub const DEFAULT_READ_CHUNK: usize = 4096;

/// A transport whose halves are boxed trait objects.
pub type BoxedTransport = FramedTransport<
    Box<dyn AsyncRead + Send + Unpin>,
    Box<dyn AsyncWrite + Send + Unpin>,
>;

/// Bidirectional length-prefixed JSON message channel.
#[derive(Debug)]
pub struct FramedTransport<R, W> {
    reader: R,
    writer: W,
    decoder: FrameDecoder,
    read_chunk: usize,
    closed: bool,
}

impl<R, W> FramedTransport<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Frame messages over `reader` and `writer`.
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            decoder: FrameDecoder::new(),
            read_chunk: DEFAULT_READ_CHUNK,
            closed: false,
        }
    }

    /// Limit each read from the stream to `chunk` bytes (at least one).
    pub fn with_read_chunk(mut self, chunk: usize) -> Self {
        self.read_chunk = chunk.max(1);
        self
    }

    /// Send one message as a single frame.
    pub async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let frame = encode_frame(message)?;
        tracing::trace!("> {}", message);
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Receive the next message, reading until a whole frame is buffered.
    ///
    /// # Errors
    ///
    /// Fails with [`TransportError::UnexpectedEof`] if the stream ends before
    /// a frame completes, even when nothing at all was read.
    pub async fn receive(&mut self) -> Result<Message, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let mut chunk = vec![0u8; self.read_chunk];
        loop {
            if let Some(message) = self.decoder.next_message()? {
                tracing::trace!("< {}", message);
                return Ok(message);
            }

            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::UnexpectedEof {
                    buffered: self.decoder.buffered(),
                });
            }
            self.decoder.feed(&chunk[..n]);
        }
    }

    /// Shut down the write half. Safe to call more than once.
    pub async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await?;
        Ok(())
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl<R, W> FramedTransport<R, W>
where
    R: AsyncRead + Send + Unpin + 'static,
    W: AsyncWrite + Send + Unpin + 'static,
{
    /// Erase the stream types, e.g. to hold pipes and in-memory streams
    /// behind one type.
    pub fn boxed(self) -> BoxedTransport {
        FramedTransport {
            reader: Box::new(self.reader),
            writer: Box::new(self.writer),
            decoder: self.decoder,
            read_chunk: self.read_chunk,
            closed: self.closed,
        }
    }
}
