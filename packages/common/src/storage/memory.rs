use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::error::StorageError;
use super::object_id::{LargeObjectFd, LargeObjectId, OpenMode};
use super::traits::LargeObjectStore;

/// Call counters kept by [`MemoryLargeObjects`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub opens: u64,
    pub writes: u64,
    pub reads: u64,
    pub unlinks: u64,
    /// Largest chunk handed to a single `write` call.
    pub largest_write: usize,
    /// Largest chunk returned by a single `read` call.
    pub largest_read: usize,
}

#[derive(Debug)]
struct Descriptor {
    oid: LargeObjectId,
    position: usize,
}

#[derive(Debug, Default)]
struct State {
    next_oid: u32,
    next_fd: i32,
    objects: HashMap<LargeObjectId, Vec<u8>>,
    descriptors: HashMap<LargeObjectFd, Descriptor>,
    stats: MemoryStats,
    fail_write_after: Option<u64>,
}

/// In-process large-object store.
///
/// Mirrors the server semantics closely enough to exercise the chunked
/// transfer code without a database, and records per-call statistics.
#[derive(Debug, Default)]
pub struct MemoryLargeObjects {
    state: Mutex<State>,
}

impl MemoryLargeObjects {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `write` after the first `n` successful ones fail.
    pub fn fail_writes_after(self, n: u64) -> Self {
        self.state().fail_write_after = Some(n);
        self
    }

    /// Number of live large objects.
    pub fn object_count(&self) -> usize {
        self.state().objects.len()
    }

    /// Number of descriptors that were opened and not yet closed.
    pub fn open_descriptors(&self) -> usize {
        self.state().descriptors.len()
    }

    pub fn stats(&self) -> MemoryStats {
        self.state().stats
    }

    /// Copy of an object's bytes, if it exists.
    pub fn contents(&self, oid: LargeObjectId) -> Option<Vec<u8>> {
        self.state().objects.get(&oid).cloned()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bad_descriptor(fd: LargeObjectFd) -> StorageError {
    StorageError::backend(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("invalid large-object descriptor {fd}"),
    ))
}

#[async_trait]
impl LargeObjectStore for MemoryLargeObjects {
    async fn create(&self) -> Result<LargeObjectId, StorageError> {
        let mut state = self.state();
        state.next_oid += 1;
        let oid = LargeObjectId::new(state.next_oid);
        state.objects.insert(oid, Vec::new());
        Ok(oid)
    }

    async fn open(
        &self,
        oid: LargeObjectId,
        _mode: OpenMode,
    ) -> Result<LargeObjectFd, StorageError> {
        let mut state = self.state();
        if !state.objects.contains_key(&oid) {
            return Err(StorageError::NotFound(oid));
        }
        state.stats.opens += 1;
        state.next_fd += 1;
        let fd = LargeObjectFd::new(state.next_fd);
        state.descriptors.insert(fd, Descriptor { oid, position: 0 });
        Ok(fd)
    }

    async fn write(&self, fd: LargeObjectFd, chunk: &[u8]) -> Result<usize, StorageError> {
        let mut state = self.state();
        if let Some(limit) = state.fail_write_after {
            if state.stats.writes >= limit {
                return Err(StorageError::backend(std::io::Error::other(
                    "injected write failure",
                )));
            }
        }

        let (oid, position) = state
            .descriptors
            .get(&fd)
            .map(|d| (d.oid, d.position))
            .ok_or_else(|| bad_descriptor(fd))?;
        let object = state
            .objects
            .get_mut(&oid)
            .ok_or(StorageError::NotFound(oid))?;

        let end = position + chunk.len();
        if object.len() < end {
            object.resize(end, 0);
        }
        object[position..end].copy_from_slice(chunk);

        if let Some(descriptor) = state.descriptors.get_mut(&fd) {
            descriptor.position = end;
        }
        state.stats.writes += 1;
        state.stats.largest_write = state.stats.largest_write.max(chunk.len());
        Ok(chunk.len())
    }

    async fn read(&self, fd: LargeObjectFd, len: usize) -> Result<Vec<u8>, StorageError> {
        let mut state = self.state();
        let (oid, position) = state
            .descriptors
            .get(&fd)
            .map(|d| (d.oid, d.position))
            .ok_or_else(|| bad_descriptor(fd))?;
        let object = state.objects.get(&oid).ok_or(StorageError::NotFound(oid))?;

        let start = position.min(object.len());
        let end = (start + len).min(object.len());
        let chunk = object[start..end].to_vec();

        if let Some(descriptor) = state.descriptors.get_mut(&fd) {
            descriptor.position = end;
        }
        state.stats.reads += 1;
        state.stats.largest_read = state.stats.largest_read.max(chunk.len());
        Ok(chunk)
    }

    async fn close(&self, fd: LargeObjectFd) -> Result<(), StorageError> {
        self.state()
            .descriptors
            .remove(&fd)
            .map(|_| ())
            .ok_or_else(|| bad_descriptor(fd))
    }

    async fn unlink(&self, oid: LargeObjectId) -> Result<bool, StorageError> {
        let mut state = self.state();
        let existed = state.objects.remove(&oid).is_some();
        if existed {
            state.stats.unlinks += 1;
            state.descriptors.retain(|_, d| d.oid != oid);
        }
        Ok(existed)
    }

    async fn exists(&self, oid: LargeObjectId) -> Result<bool, StorageError> {
        Ok(self.state().objects.contains_key(&oid))
    }
}
