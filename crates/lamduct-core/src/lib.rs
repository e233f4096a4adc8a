//! Core protocol primitives for lamduct.
//!
//! This crate provides the message framing shared by both sides of the duct:
//! the punter server's TCP connection and the offline client's stdio pipes.
//! It knows nothing about sockets or processes; any byte stream will do.

mod error;
pub mod frame;
mod handshake;
mod message;
mod transport;

pub use error::TransportError;
pub use frame::{FrameDecoder, MAX_FRAME_SIZE, encode_frame};
pub use handshake::{Me, You};
pub use message::{Message, STATE_KEY, STOP_KEY, TIMEOUT_KEY};
pub use transport::{BoxedTransport, DEFAULT_READ_CHUNK, FramedTransport};
