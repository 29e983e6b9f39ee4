//! Byte-source abstraction for files offered to a peer.
//!
//! The sender reads files in fixed-size, index-addressed ranges, so a source
//! must support positional reads rather than a single consuming cursor.
//! Reads never change the observable state of the source: reading the same
//! range twice yields the same bytes.

use std::io;

/// A thread-safe, random-access source of bytes.
///
/// Contract:
/// - `len()` is the total length in bytes and does not change over the
///   lifetime of the object.
/// - `read_range(offset, len)` returns exactly `len` bytes starting at
///   `offset` when the range lies within `0..len()`, and an
///   [`io::ErrorKind::UnexpectedEof`] error otherwise.
pub trait Data: Send + Sync {
    /// Total length of the data in bytes.
    fn len(&self) -> u64;

    /// Checks if the data is empty (length is 0).
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads `len` bytes starting at `offset`.
    fn read_range(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

/// [`Data`] backed by an owned buffer.
#[derive(Clone, Default)]
pub struct InMemoryData {
    bytes: Vec<u8>,
}

impl InMemoryData {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

impl Data for InMemoryData {
    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_range(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::from(io::ErrorKind::UnexpectedEof))?;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "range {start}+{len} exceeds {} bytes",
                        self.bytes.len()
                    ),
                )
            })?;
        Ok(self.bytes[start..end].to_vec())
    }
}
