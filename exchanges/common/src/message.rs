//! Messages exchanged over an established channel.
//!
//! Every message is one JSON object carrying a `type` tag. Field names are
//! part of the wire contract and must match on both ends:
//!
//! | type         | fields                                   | direction |
//! |--------------|------------------------------------------|-----------|
//! | `file-start` | `fileName`, `fileSize`, `totalChunks`    | S → R     |
//! | `file-chunk` | `fileName`, `chunkIndex`, `chunk`        | S → R     |
//! | `file-end`   | `fileName`                               | S → R     |
//! | `chunk-ack`  | `fileName`, `chunkIndex`                 | R → S     |
//! | `file-ack`   | `fileName`, `status`                     | R → S     |
//!
//! `chunk` holds the raw bytes, base64-encoded inside the JSON document.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Outcome reported by the receiver in a `file-ack`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Complete,
    Incomplete,
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckStatus::Complete => f.write_str("complete"),
            AckStatus::Incomplete => f.write_str("incomplete"),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Message {
    #[serde(rename_all = "camelCase")]
    FileStart {
        file_name: String,
        file_size: u64,
        total_chunks: u64,
    },
    #[serde(rename_all = "camelCase")]
    FileChunk {
        file_name: String,
        chunk_index: u64,
        #[serde(with = "base64_bytes")]
        chunk: Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    FileEnd { file_name: String },
    #[serde(rename_all = "camelCase")]
    ChunkAck { file_name: String, chunk_index: u64 },
    #[serde(rename_all = "camelCase")]
    FileAck {
        file_name: String,
        status: AckStatus,
    },
}

impl Message {
    pub fn file_name(&self) -> &str {
        match self {
            Message::FileStart { file_name, .. }
            | Message::FileChunk { file_name, .. }
            | Message::FileEnd { file_name }
            | Message::ChunkAck { file_name, .. }
            | Message::FileAck { file_name, .. } => file_name,
        }
    }

    /// Wire tag of the message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::FileStart { .. } => "file-start",
            Message::FileChunk { .. } => "file-chunk",
            Message::FileEnd { .. } => "file-end",
            Message::ChunkAck { .. } => "chunk-ack",
            Message::FileAck { .. } => "file-ack",
        }
    }

    /// Whether the message travels from the sending side to the receiving
    /// side of a transfer.
    pub fn is_sender_to_receiver(&self) -> bool {
        matches!(
            self,
            Message::FileStart { .. }
                | Message::FileChunk { .. }
                | Message::FileEnd { .. }
        )
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

// Chunk payloads can be 64 KiB; keep them out of debug output.
impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::FileStart {
                file_name,
                file_size,
                total_chunks,
            } => f
                .debug_struct("FileStart")
                .field("file_name", file_name)
                .field("file_size", file_size)
                .field("total_chunks", total_chunks)
                .finish(),
            Message::FileChunk {
                file_name,
                chunk_index,
                chunk,
            } => f
                .debug_struct("FileChunk")
                .field("file_name", file_name)
                .field("chunk_index", chunk_index)
                .field("chunk_len", &chunk.len())
                .finish(),
            Message::FileEnd { file_name } => f
                .debug_struct("FileEnd")
                .field("file_name", file_name)
                .finish(),
            Message::ChunkAck {
                file_name,
                chunk_index,
            } => f
                .debug_struct("ChunkAck")
                .field("file_name", file_name)
                .field("chunk_index", chunk_index)
                .finish(),
            Message::FileAck { file_name, status } => f
                .debug_struct("FileAck")
                .field("file_name", file_name)
                .field("status", status)
                .finish(),
        }
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &[u8],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
