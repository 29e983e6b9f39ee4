use std::{hash::Hash, sync::Arc};

use crate::{Data, InMemoryData};

/// A named file offered for transfer.
///
/// Transfers are keyed by `name` together with the remote endpoint, so two
/// files with the same name cannot be in flight to the same peer at once.
#[derive(Clone)]
pub struct File {
    pub name: String,
    pub data: Arc<dyn Data>,
}

impl File {
    pub fn new(name: impl Into<String>, data: Arc<dyn Data>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn from_bytes(
        name: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(name, Arc::new(InMemoryData::new(bytes)))
    }

    pub fn len(&self) -> u64 {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("len", &self.data.len())
            .finish()
    }
}

impl Hash for File {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}
