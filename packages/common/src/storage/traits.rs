use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::error::StorageError;
use super::object_id::{LargeObjectFd, LargeObjectId, OpenMode};

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Server-side large-object primitives.
///
/// Descriptors returned by [`open`](Self::open) are only meaningful to the
/// same store instance, and for PostgreSQL only inside the transaction that
/// opened them.
#[async_trait]
pub trait LargeObjectStore: Send + Sync {
    /// Allocate a new, empty large object.
    async fn create(&self) -> Result<LargeObjectId, StorageError>;

    /// Open an existing large object.
    async fn open(&self, oid: LargeObjectId, mode: OpenMode)
    -> Result<LargeObjectFd, StorageError>;

    /// Append `chunk` at the descriptor's position; returns the bytes accepted.
    async fn write(&self, fd: LargeObjectFd, chunk: &[u8]) -> Result<usize, StorageError>;

    /// Read up to `len` bytes. An empty result means end of data.
    async fn read(&self, fd: LargeObjectFd, len: usize) -> Result<Vec<u8>, StorageError>;

    /// Release a descriptor. The object itself is untouched.
    async fn close(&self, fd: LargeObjectFd) -> Result<(), StorageError>;

    /// Delete a large object.
    ///
    /// Returns `true` if the object was deleted, `false` if it did not exist.
    async fn unlink(&self, oid: LargeObjectId) -> Result<bool, StorageError>;

    /// Check whether a large object exists.
    async fn exists(&self, oid: LargeObjectId) -> Result<bool, StorageError>;
}
