//! Minimal models shared by every Zap crate.
//!
//! This crate provides:
//! - `EndpointId`: the 4-character identifier peers use to address each
//!   other.
//! - `Data`: a trait for thread-safe, random-access byte sources.
//! - `File`: a named wrapper around an `Arc<dyn Data>`.
//!
//! Example:
//! ```rust
//! use zap_entities::{Data, EndpointId, File};
//!
//! let file = File::from_bytes("greeting.txt", b"hello".to_vec());
//! assert_eq!(file.len(), 5);
//! assert_eq!(file.data.read_range(1, 3).unwrap(), b"ell".to_vec());
//!
//! let id = EndpointId::parse_lenient("ab12").unwrap();
//! assert_eq!(id.as_str(), "AB12");
//! ```

mod data;
mod file;
mod id;

/// Re-export of the byte source trait and its in-memory implementation.
pub use data::{Data, InMemoryData};
/// Re-export of the file abstraction backed by `Data`.
pub use file::File;
/// Re-export of endpoint identity types.
pub use id::{EndpointId, ID_ALPHABET, ID_LEN, InvalidEndpointId};
