use std::time::Duration;

use common::storage::StorageError;
use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by the file storage provider and its connection pool.
#[derive(Debug, Error)]
pub enum FileStorageError {
    /// The provider was used before `initialize` or after `shutdown`.
    #[error("file storage provider is not initialized")]
    NotInitialized,

    /// A document, large object, or listing page does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Moving bytes in or out of a large object failed partway.
    #[error("failed to {operation} large object for document {document_id}: {source}")]
    Transfer {
        operation: &'static str,
        document_id: Uuid,
        #[source]
        source: StorageError,
    },

    /// The pool or schema could not be set up.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No admission permit became free in time.
    #[error("timed out after {0:?} waiting for a database connection")]
    AcquireTimeout(Duration),

    /// Any other database failure.
    #[error("database error during {operation}{}: {source}", document_suffix(.document_id))]
    Database {
        operation: &'static str,
        document_id: Option<Uuid>,
        #[source]
        source: DbErr,
    },
}

fn document_suffix(document_id: &Option<Uuid>) -> String {
    document_id
        .map(|id| format!(" of document {id}"))
        .unwrap_or_default()
}

impl FileStorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether repeating the same call may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AcquireTimeout(_) | Self::Database { .. } => true,
            Self::Transfer { source, .. } => !matches!(source, StorageError::NotFound(_)),
            Self::NotInitialized | Self::NotFound(_) | Self::Configuration(_) => false,
        }
    }

    pub(crate) fn database(
        operation: &'static str,
        document_id: Option<Uuid>,
    ) -> impl FnOnce(DbErr) -> Self {
        move |source| Self::Database {
            operation,
            document_id,
            source,
        }
    }

    /// Translate a large-object failure, surfacing a missing object as not-found.
    pub(crate) fn transfer(
        operation: &'static str,
        document_id: Uuid,
    ) -> impl FnOnce(StorageError) -> Self {
        move |source| match source {
            StorageError::NotFound(oid) => Self::NotFound(format!(
                "large object {oid} for document {document_id} not found"
            )),
            source => Self::Transfer {
                operation,
                document_id,
                source,
            },
        }
    }

    pub(crate) fn document_not_found(document_id: Uuid) -> Self {
        Self::NotFound(format!("File for document {document_id} not found"))
    }
}
