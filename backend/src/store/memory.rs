//! In-memory artifact store, for tests and the one-shot CLI commands.

use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::{Arc, RwLock};

use super::{is_valid_file_id, ArtifactStore, NewArtifact};
use crate::error::{StoreError, StoreResult};
use crate::models::UploadedFile;

#[derive(Debug, Default, Clone)]
pub struct MemoryArtifactStore {
    artifacts: Arc<RwLock<HashMap<String, (UploadedFile, Arc<[u8]>)>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, file_id: &str) -> StoreResult<(UploadedFile, Arc<[u8]>)> {
        if !is_valid_file_id(file_id) {
            return Err(StoreError::NotFound(file_id.to_string()));
        }
        let artifacts = self.artifacts.read().map_err(|_| poisoned())?;
        artifacts
            .get(file_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(file_id.to_string()))
    }
}

fn poisoned() -> StoreError {
    StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "artifact map lock poisoned"))
}

impl ArtifactStore for MemoryArtifactStore {
    fn put(&self, bytes: &[u8], artifact: NewArtifact) -> StoreResult<UploadedFile> {
        let record = artifact.into_record(bytes.len() as u64);
        let mut artifacts = self.artifacts.write().map_err(|_| poisoned())?;
        artifacts.insert(record.file_id.clone(), (record.clone(), Arc::from(bytes)));
        Ok(record)
    }

    fn open(&self, file_id: &str) -> StoreResult<Box<dyn Read + Send>> {
        let (_, bytes) = self.get(file_id)?;
        Ok(Box::new(Cursor::new(bytes)))
    }

    fn metadata(&self, file_id: &str) -> StoreResult<UploadedFile> {
        self.get(file_id).map(|(record, _)| record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryArtifactStore::new();
        assert!(store.is_empty());

        let record = store.put(b"a\n1\n", NewArtifact::upload(Some("a.csv".into()), Some(1))).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.read_all(&record.file_id).unwrap(), b"a\n1\n");
        assert_eq!(store.metadata(&record.file_id).unwrap().original_name.as_deref(), Some("a.csv"));
        assert!(matches!(store.open("missing"), Err(StoreError::NotFound(_))));
    }
}
