//! Chunk arithmetic shared by both ends of a transfer.

/// Default chunk size: 64 KiB keeps every `file-chunk` message well under
/// the per-message limits of browser-class data channels.
pub const CHUNK_SIZE: u64 = 64 * 1024;

/// Number of chunks a file of `file_size` bytes is split into.
///
/// An empty file has zero chunks. A `chunk_size` of zero is treated as one.
pub fn total_chunks(file_size: u64, chunk_size: u64) -> u64 {
    file_size.div_ceil(chunk_size.max(1))
}

/// Byte range `(offset, len)` covered by chunk `index`, or `None` when the
/// index is past the end of the file.
pub fn chunk_range(
    index: u64,
    file_size: u64,
    chunk_size: u64,
) -> Option<(u64, usize)> {
    let chunk_size = chunk_size.max(1);
    let offset = index.checked_mul(chunk_size)?;
    if offset >= file_size {
        return None;
    }
    let len = chunk_size.min(file_size - offset);
    Some((offset, usize::try_from(len).ok()?))
}
