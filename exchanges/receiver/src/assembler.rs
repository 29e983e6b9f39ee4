use std::{collections::HashMap, fmt, time::Instant};

use tracing::{debug, info, warn};
use zapx_common::{AckStatus, Message};

use crate::ReceiverConfig;

/// A fully reassembled file, ready to hand to the consumer.
#[derive(Clone, PartialEq, Eq)]
pub struct AssembledFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl AssembledFile {
    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for AssembledFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssembledFile")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Progress of one file still being received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingSnapshot {
    pub name: String,
    pub size: u64,
    pub received_chunks: u64,
    pub total_chunks: u64,
}

/// What the channel owner must do after one inbound message.
#[derive(Debug, Default)]
pub struct Outcome {
    /// Acknowledgements to send back on the same channel, in order.
    pub replies: Vec<Message>,
    pub completed: Option<AssembledFile>,
}

struct IncomingFile {
    size: u64,
    slots: Vec<Option<Vec<u8>>>,
    received_chunks: u64,
    received_bytes: u64,
    last_activity: Instant,
}

impl IncomingFile {
    fn total_chunks(&self) -> u64 {
        self.slots.len() as u64
    }

    /// Longest chunk any chunk size yielding this chunk count can produce.
    fn max_chunk_len(&self) -> u64 {
        match self.total_chunks() {
            0 => 0,
            1 => self.size,
            total => (self.size - 1) / (total - 1),
        }
    }

    fn is_complete(&self) -> bool {
        self.received_chunks == self.total_chunks()
            && self.slots.iter().all(Option::is_some)
    }
}

/// Per-channel reassembly state, keyed by file name.
///
/// The assembler never blocks and never performs I/O. The caller feeds it
/// every sender-to-receiver message from one channel together with the
/// current time, then writes out the returned replies.
pub struct Assembler {
    config: ReceiverConfig,
    files: HashMap<String, IncomingFile>,
}

impl Assembler {
    pub fn new(config: ReceiverConfig) -> Self {
        Self {
            config,
            files: HashMap::new(),
        }
    }

    pub fn handle(&mut self, message: Message, now: Instant) -> Outcome {
        match message {
            Message::FileStart {
                file_name,
                file_size,
                total_chunks,
            } => {
                self.on_start(file_name, file_size, total_chunks, now);
                Outcome::default()
            }
            Message::FileChunk {
                file_name,
                chunk_index,
                chunk,
            } => self.on_chunk(file_name, chunk_index, chunk, now),
            Message::FileEnd { file_name } => self.on_end(file_name, now),
            other => {
                debug!(kind = other.kind(), "Assembler ignoring message");
                Outcome::default()
            }
        }
    }

    fn on_start(
        &mut self,
        file_name: String,
        file_size: u64,
        total_chunks: u64,
        now: Instant,
    ) {
        if let Some(file) = self.files.get_mut(&file_name) {
            debug!(file = %file_name, "Duplicate file-start ignored");
            file.last_activity = now;
            return;
        }
        if file_size > self.config.max_file_size {
            warn!(
                file = %file_name,
                size = file_size,
                max = self.config.max_file_size,
                "Rejecting file-start: file too large"
            );
            return;
        }
        let plausible = if file_size == 0 {
            total_chunks == 0
        } else {
            total_chunks >= 1 && total_chunks <= file_size
        };
        if !plausible || total_chunks > self.config.max_chunks {
            warn!(
                file = %file_name,
                size = file_size,
                chunks = total_chunks,
                "Rejecting file-start: implausible chunk count"
            );
            return;
        }
        let Ok(slot_count) = usize::try_from(total_chunks) else {
            return;
        };

        info!(
            file = %file_name,
            size = file_size,
            chunks = total_chunks,
            "Receiving file"
        );
        self.files.insert(
            file_name,
            IncomingFile {
                size: file_size,
                slots: vec![None; slot_count],
                received_chunks: 0,
                received_bytes: 0,
                last_activity: now,
            },
        );
    }

    fn on_chunk(
        &mut self,
        file_name: String,
        chunk_index: u64,
        chunk: Vec<u8>,
        now: Instant,
    ) -> Outcome {
        let Some(file) = self.files.get_mut(&file_name) else {
            debug!(
                file = %file_name,
                chunk = chunk_index,
                "Chunk for untracked file"
            );
            return Outcome::default();
        };
        file.last_activity = now;
        let total = file.total_chunks();
        let max_len = file.max_chunk_len();
        let Some(slot) = usize::try_from(chunk_index)
            .ok()
            .and_then(|index| file.slots.get_mut(index))
        else {
            warn!(
                file = %file_name,
                chunk = chunk_index,
                total,
                "Chunk index out of range"
            );
            return Outcome::default();
        };
        if slot.is_some() {
            debug!(
                file = %file_name,
                chunk = chunk_index,
                "Duplicate chunk ignored"
            );
            return Outcome::default();
        }
        let len = chunk.len() as u64;
        if len > max_len || file.received_bytes + len > file.size {
            warn!(
                file = %file_name,
                chunk = chunk_index,
                len,
                max = max_len,
                "Chunk larger than the declared file allows"
            );
            return Outcome::default();
        }

        *slot = Some(chunk);
        file.received_chunks += 1;
        file.received_bytes += len;
        Outcome {
            replies: vec![Message::ChunkAck {
                file_name,
                chunk_index,
            }],
            completed: None,
        }
    }

    fn on_end(&mut self, file_name: String, now: Instant) -> Outcome {
        let Some(file) = self.files.get_mut(&file_name) else {
            warn!(file = %file_name, "file-end for untracked file");
            return Self::file_ack(file_name, AckStatus::Incomplete, None);
        };
        file.last_activity = now;
        if !file.is_complete() {
            warn!(
                file = %file_name,
                received = file.received_chunks,
                total = file.total_chunks(),
                "file-end before all chunks arrived"
            );
            return Self::file_ack(file_name, AckStatus::Incomplete, None);
        }

        let Some(file) = self.files.remove(&file_name) else {
            return Outcome::default();
        };
        let size = file.size;
        let mut bytes = Vec::with_capacity(usize::try_from(size).unwrap_or(0));
        for chunk in file.slots.into_iter().flatten() {
            bytes.extend_from_slice(&chunk);
        }
        if bytes.len() as u64 != size {
            warn!(
                file = %file_name,
                declared = size,
                assembled = bytes.len(),
                "Assembled size does not match file-start"
            );
            return Self::file_ack(file_name, AckStatus::Incomplete, None);
        }

        info!(file = %file_name, size, "File received");
        let completed = AssembledFile {
            name: file_name.clone(),
            bytes,
        };
        Self::file_ack(file_name, AckStatus::Complete, Some(completed))
    }

    fn file_ack(
        file_name: String,
        status: AckStatus,
        completed: Option<AssembledFile>,
    ) -> Outcome {
        Outcome {
            replies: vec![Message::FileAck { file_name, status }],
            completed,
        }
    }

    /// Drops incomplete files idle for longer than the configured limit and
    /// returns their names.
    pub fn evict_stale(&mut self, now: Instant) -> Vec<String> {
        let stale_after = self.config.stale_after();
        let mut evicted = Vec::new();
        self.files.retain(|name, file| {
            let idle = now.saturating_duration_since(file.last_activity);
            if idle >= stale_after {
                warn!(
                    file = %name,
                    received = file.received_chunks,
                    total = file.total_chunks(),
                    "Dropping stale incomplete file"
                );
                evicted.push(name.clone());
                false
            } else {
                true
            }
        });
        evicted.sort();
        evicted
    }

    /// Files currently being received, ordered by name.
    pub fn snapshot(&self) -> Vec<IncomingSnapshot> {
        let mut snapshots: Vec<IncomingSnapshot> = self
            .files
            .iter()
            .map(|(name, file)| IncomingSnapshot {
                name: name.clone(),
                size: file.size,
                received_chunks: file.received_chunks,
                total_chunks: file.total_chunks(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.files.contains_key(file_name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(ReceiverConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::{Rng, seq::SliceRandom};
    use rstest::rstest;
    use zapx_common::{CHUNK_SIZE, chunk_range, total_chunks};

    use super::*;

    fn start(name: &str, size: u64, chunk_size: u64) -> Message {
        Message::FileStart {
            file_name: name.into(),
            file_size: size,
            total_chunks: total_chunks(size, chunk_size),
        }
    }

    fn chunks(name: &str, bytes: &[u8], chunk_size: u64) -> Vec<Message> {
        let size = bytes.len() as u64;
        (0..total_chunks(size, chunk_size))
            .map(|index| {
                let (offset, len) =
                    chunk_range(index, size, chunk_size).unwrap();
                let offset = offset as usize;
                Message::FileChunk {
                    file_name: name.into(),
                    chunk_index: index,
                    chunk: bytes[offset..offset + len].to_vec(),
                }
            })
            .collect()
    }

    fn end(name: &str) -> Message {
        Message::FileEnd {
            file_name: name.into(),
        }
    }

    fn file_acks(outcome: &Outcome) -> Vec<AckStatus> {
        outcome
            .replies
            .iter()
            .filter_map(|reply| match reply {
                Message::FileAck { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    #[rstest]
    #[case::in_order(false)]
    #[case::shuffled(true)]
    fn reassembles_regardless_of_order(#[case] shuffle: bool) {
        let now = Instant::now();
        let bytes: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
        let mut assembler = Assembler::default();
        let mut messages = chunks("data.bin", &bytes, 1000);
        if shuffle {
            messages.shuffle(&mut rand::rng());
        }

        assembler.handle(start("data.bin", bytes.len() as u64, 1000), now);
        for message in messages {
            let outcome = assembler.handle(message, now);
            assert_eq!(outcome.replies.len(), 1);
            assert!(matches!(outcome.replies[0], Message::ChunkAck { .. }));
        }
        let outcome = assembler.handle(end("data.bin"), now);

        assert_eq!(file_acks(&outcome), vec![AckStatus::Complete]);
        assert_eq!(outcome.completed.unwrap().bytes, bytes);
        assert!(assembler.is_empty());
    }

    #[test]
    fn duplicate_chunk_is_not_counted_or_acked() {
        let now = Instant::now();
        let mut assembler = Assembler::default();
        assembler.handle(start("a", 10, 4), now);

        let first = assembler.handle(
            Message::FileChunk {
                file_name: "a".into(),
                chunk_index: 1,
                chunk: vec![1; 4],
            },
            now,
        );
        let again = assembler.handle(
            Message::FileChunk {
                file_name: "a".into(),
                chunk_index: 1,
                chunk: vec![9; 4],
            },
            now,
        );

        assert_eq!(first.replies.len(), 1);
        assert!(again.replies.is_empty());
        let snapshot = &assembler.snapshot()[0];
        assert_eq!(snapshot.received_chunks, 1);
        assert_eq!(snapshot.total_chunks, 3);
    }

    #[test]
    fn duplicate_start_keeps_progress() {
        let now = Instant::now();
        let mut assembler = Assembler::default();
        let bytes = vec![5u8; 8];
        assembler.handle(start("a", 8, 4), now);
        let mut parts = chunks("a", &bytes, 4).into_iter();
        assembler.handle(parts.next().unwrap(), now);
        assembler.handle(start("a", 8, 4), now);

        assert_eq!(assembler.snapshot()[0].received_chunks, 1);
    }

    #[test]
    fn early_end_keeps_entry_until_complete() {
        let now = Instant::now();
        let bytes: Vec<u8> = (0..12u8).collect();
        let mut assembler = Assembler::default();
        let mut parts = chunks("a", &bytes, 4);
        let last = parts.pop().unwrap();

        assembler.handle(start("a", 12, 4), now);
        for part in parts {
            assembler.handle(part, now);
        }
        let early = assembler.handle(end("a"), now);
        assert_eq!(file_acks(&early), vec![AckStatus::Incomplete]);
        assert!(early.completed.is_none());
        assert!(assembler.contains("a"));

        assembler.handle(last, now);
        let done = assembler.handle(end("a"), now);
        assert_eq!(file_acks(&done), vec![AckStatus::Complete]);
        assert_eq!(done.completed.unwrap().bytes, bytes);
    }

    #[test]
    fn end_for_unknown_file_is_incomplete() {
        let mut assembler = Assembler::default();
        let outcome = assembler.handle(end("ghost"), Instant::now());
        assert_eq!(file_acks(&outcome), vec![AckStatus::Incomplete]);
    }

    #[test]
    fn empty_file_completes_on_end() {
        let now = Instant::now();
        let mut assembler = Assembler::default();
        assembler.handle(start("empty", 0, CHUNK_SIZE), now);
        let outcome = assembler.handle(end("empty"), now);
        assert_eq!(file_acks(&outcome), vec![AckStatus::Complete]);
        assert!(outcome.completed.unwrap().is_empty());
    }

    #[rstest]
    #[case::too_large(8 * 1024, 1)]
    #[case::more_chunks_than_bytes(10, 11)]
    #[case::chunks_for_empty_file(0, 1)]
    #[case::no_chunks_for_data(10, 0)]
    fn rejects_implausible_start(#[case] size: u64, #[case] chunks: u64) {
        let mut assembler = Assembler::new(ReceiverConfig {
            max_file_size: 4 * 1024,
            ..ReceiverConfig::default()
        });
        assembler.handle(
            Message::FileStart {
                file_name: "x".into(),
                file_size: size,
                total_chunks: chunks,
            },
            Instant::now(),
        );
        assert!(assembler.is_empty());
    }

    #[test]
    fn out_of_range_chunk_is_ignored() {
        let now = Instant::now();
        let mut assembler = Assembler::default();
        assembler.handle(start("a", 8, 4), now);
        let outcome = assembler.handle(
            Message::FileChunk {
                file_name: "a".into(),
                chunk_index: 2,
                chunk: vec![0; 4],
            },
            now,
        );
        assert!(outcome.replies.is_empty());
        assert_eq!(assembler.snapshot()[0].received_chunks, 0);
    }

    #[rstest]
    #[case::whole_file_in_first_of_two(8, 2, vec![8], 0)]
    #[case::overflowing_total(8, 2, vec![7, 7], 1)]
    #[case::single_chunk_past_size(8, 1, vec![9], 0)]
    fn oversized_chunk_is_ignored(
        #[case] size: u64,
        #[case] total: u64,
        #[case] lens: Vec<usize>,
        #[case] accepted: usize,
    ) {
        let now = Instant::now();
        let mut assembler = Assembler::default();
        assembler.handle(
            Message::FileStart {
                file_name: "a".into(),
                file_size: size,
                total_chunks: total,
            },
            now,
        );
        let mut acked = 0;
        for (index, len) in lens.into_iter().enumerate() {
            let chunk = Message::FileChunk {
                file_name: "a".into(),
                chunk_index: index as u64,
                chunk: vec![1; len],
            };
            acked += assembler.handle(chunk, now).replies.len();
        }
        assert_eq!(acked, accepted);
        assert_eq!(assembler.snapshot()[0].received_chunks, accepted as u64);
    }

    #[rstest]
    #[case::even(8, 4)]
    #[case::short_tail(9, 4)]
    #[case::uneven_pair(8, 6)]
    fn accepts_every_chunk_of_a_real_split(
        #[case] size: u64,
        #[case] chunk_size: u64,
    ) {
        let now = Instant::now();
        let bytes: Vec<u8> = (0..size as u8).collect();
        let mut assembler = Assembler::default();
        assembler.handle(start("a", size, chunk_size), now);
        for part in chunks("a", &bytes, chunk_size) {
            assert_eq!(assembler.handle(part, now).replies.len(), 1);
        }
        let outcome = assembler.handle(end("a"), now);
        assert_eq!(outcome.completed.unwrap().bytes, bytes);
    }

    #[test]
    fn size_mismatch_is_reported_incomplete() {
        let now = Instant::now();
        let mut assembler = Assembler::default();
        assembler.handle(start("a", 8, 4), now);
        for index in 0..2 {
            assembler.handle(
                Message::FileChunk {
                    file_name: "a".into(),
                    chunk_index: index,
                    chunk: vec![0; 3],
                },
                now,
            );
        }
        let outcome = assembler.handle(end("a"), now);
        assert_eq!(file_acks(&outcome), vec![AckStatus::Incomplete]);
        assert!(outcome.completed.is_none());
        assert!(assembler.is_empty());
    }

    #[test]
    fn evicts_only_idle_files() {
        let start_time = Instant::now();
        let mut assembler = Assembler::new(ReceiverConfig {
            stale_after_ms: 1000,
            ..ReceiverConfig::default()
        });
        assembler.handle(start("idle", 8, 4), start_time);
        assembler.handle(start("busy", 8, 4), start_time);
        assembler.handle(
            Message::FileChunk {
                file_name: "busy".into(),
                chunk_index: 0,
                chunk: vec![0; 4],
            },
            start_time + Duration::from_millis(800),
        );

        let later = start_time + Duration::from_millis(1200);
        let evicted = assembler.evict_stale(later);
        assert_eq!(evicted, vec!["idle".to_string()]);
        assert!(assembler.contains("busy"));
    }

    #[test]
    fn ten_mebibytes_in_160_chunks_hash_equal() {
        let now = Instant::now();
        let mut source = vec![0u8; 10 * 1024 * 1024];
        rand::rng().fill(&mut source[..]);
        let mut assembler = Assembler::default();

        let begin = start("big.bin", source.len() as u64, CHUNK_SIZE);
        assert!(matches!(begin, Message::FileStart { total_chunks: 160, .. }));
        assembler.handle(begin, now);
        let mut acks = 0;
        for part in chunks("big.bin", &source, CHUNK_SIZE) {
            acks += assembler.handle(part, now).replies.len();
        }
        let outcome = assembler.handle(end("big.bin"), now);

        assert_eq!(acks, 160);
        assert_eq!(file_acks(&outcome), vec![AckStatus::Complete]);
        let received = outcome.completed.unwrap();
        assert_eq!(
            blake3::hash(&received.bytes),
            blake3::hash(&source)
        );
    }
}
