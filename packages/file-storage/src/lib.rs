pub mod config;
pub mod error;
pub mod large_object;
pub mod pool;
pub mod provider;
pub mod record;
pub mod schema;

pub use config::AppConfig;
pub use error::FileStorageError;
pub use pool::{ConnectionPool, PooledConnection};
pub use provider::FileStorageProvider;
pub use record::{FileRecord, ListFilter, RetrievedFile};
