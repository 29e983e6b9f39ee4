//! Wire types shared by the sending and receiving sides of a Zap transfer.
//!
//! - [`Message`]: the five message types carried over a peer channel.
//! - [`chunking`]: chunk size and index arithmetic.
//! - [`MessageSink`]: what the protocol needs from an open channel.

pub mod chunking;
mod message;
mod sink;

pub use chunking::{CHUNK_SIZE, chunk_range, total_chunks};
pub use message::{AckStatus, CodecError, Message};
pub use sink::{MessageSink, SinkError};
