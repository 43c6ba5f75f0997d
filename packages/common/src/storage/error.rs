use thiserror::Error;

use super::object_id::LargeObjectId;

/// Boxed error raised by a large-object backend.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while moving bytes in or out of a large object.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The referenced large object does not exist.
    #[error("large object {0} not found")]
    NotFound(LargeObjectId),

    /// Reading the caller's source or writing the caller's sink failed.
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The large-object backend rejected an operation.
    #[error("large object backend error: {0}")]
    Backend(#[source] BoxError),

    /// The backend accepted fewer bytes than were handed to it.
    #[error("short write to large object ({written} of {expected} bytes)")]
    ShortWrite { expected: usize, written: usize },

    /// A value coming back from the backend is not a valid object id.
    #[error("invalid large object id: {0}")]
    InvalidObjectId(i64),
}

impl StorageError {
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Backend(Box::new(err))
    }
}
