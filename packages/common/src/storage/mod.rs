mod error;
mod object_id;
mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod stream;

pub use error::{BoxError, StorageError};
pub use object_id::{LargeObjectFd, LargeObjectId, OpenMode};
pub use stream::{DEFAULT_CHUNK_SIZE, TransferStats};
pub use traits::{BoxReader, LargeObjectStore};
