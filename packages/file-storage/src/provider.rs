use std::io::Cursor;
use std::sync::{Arc, PoisonError, RwLock};

use common::config::StorageConfig;
use common::storage::{BoxReader, LargeObjectId, LargeObjectStore, stream};
use sea_orm::{ConnectionTrait, DbErr};
use tokio::io::AsyncWrite;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::validate_storage_config;
use crate::error::FileStorageError;
use crate::large_object::PgLargeObjects;
use crate::pool::ConnectionPool;
use crate::record::{FileRecord, ListFilter, RetrievedFile};
use crate::schema::{FileTable, NewContent, RowLock};

/// Attempts at the lock-then-insert/update sequence before giving up.
const MAX_UPSERT_ATTEMPTS: usize = 3;

/// Stores files as PostgreSQL large objects, one metadata row per document.
///
/// Every operation runs in a single transaction on a single pooled
/// connection. Large objects are created, replaced, and unlinked in the same
/// transaction as their metadata row, so a rollback (explicit, on error, or on
/// cancellation) never leaves a row without its object or an object without
/// its row.
pub struct FileStorageProvider {
    config: StorageConfig,
    table: FileTable,
    pool: RwLock<Option<Arc<ConnectionPool>>>,
}

impl FileStorageProvider {
    /// Create an uninitialized provider.
    pub fn new(config: StorageConfig) -> Result<Self, FileStorageError> {
        validate_storage_config(&config)?;
        Ok(Self {
            table: FileTable::new(&config),
            config,
            pool: RwLock::new(None),
        })
    }

    /// Bootstrap the schema and start serving operations from `pool`.
    pub async fn initialize(&self, pool: Arc<ConnectionPool>) -> Result<(), FileStorageError> {
        let conn = pool.acquire().await?;

        if self.config.ensure_lo_extension {
            conn.execute_unprepared("CREATE EXTENSION IF NOT EXISTS \"lo\"")
                .await
                .map_err(|e| {
                    FileStorageError::Configuration(format!("failed to enable lo extension: {e}"))
                })?;
        }
        self.table.ensure(&*conn).await.map_err(|e| {
            FileStorageError::Configuration(format!(
                "failed to create {}: {e}",
                self.table.qualified_name()
            ))
        })?;
        conn.commit()
            .await
            .map_err(FileStorageError::database("initialize", None))?;

        *self.pool.write().unwrap_or_else(PoisonError::into_inner) = Some(pool);
        info!("File provider successfully connected to Postgres database");
        Ok(())
    }

    /// Detach the pool. Later operations fail with `NotInitialized`.
    ///
    /// Returns the pool so the owner can close it.
    pub fn shutdown(&self) -> Option<Arc<ConnectionPool>> {
        self.pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_initialized(&self) -> bool {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn pool(&self) -> Result<Arc<ConnectionPool>, FileStorageError> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(FileStorageError::NotInitialized)
    }

    /// Store `content` under `document_id`, replacing any previous file.
    #[instrument(skip(self, content))]
    pub async fn store(
        &self,
        document_id: Uuid,
        file_name: &str,
        mut content: BoxReader,
        file_type: Option<&str>,
    ) -> Result<FileRecord, FileStorageError> {
        let pool = self.pool()?;
        let conn = pool.acquire().await?;
        let objects = PgLargeObjects::new(&*conn);

        let oid = objects
            .create()
            .await
            .map_err(FileStorageError::transfer("create", document_id))?;
        let written = stream::write_stream(&objects, oid, &mut content, self.config.chunk_size)
            .await
            .map_err(FileStorageError::transfer("write", document_id))?;

        let new_content = NewContent {
            document_id,
            file_name,
            blob_ref: oid.as_i64(),
            file_size: i64::try_from(written.bytes).unwrap_or(i64::MAX),
            file_type,
        };
        let (record, previous) = match self.upsert(&*conn, &new_content).await {
            Ok(result) => result,
            Err(err) => {
                if let Err(e) = objects.unlink(oid).await {
                    warn!(
                        %oid,
                        error = %e,
                        "Failed to unlink large object after metadata error"
                    );
                }
                return Err(err);
            }
        };

        if let Some(previous) = previous.filter(|previous| *previous != oid) {
            let unlinked = objects
                .unlink(previous)
                .await
                .map_err(FileStorageError::transfer("replace", document_id))?;
            if !unlinked {
                warn!(oid = %previous, "Superseded large object was already gone");
            }
        }

        conn.commit()
            .await
            .map_err(FileStorageError::database("store", Some(document_id)))?;

        debug!(
            %oid,
            bytes = written.bytes,
            chunks = written.chunks,
            replaced = previous.is_some(),
            "Stored file"
        );
        Ok(record)
    }

    /// [`store`](Self::store) for content already in memory.
    pub async fn store_bytes(
        &self,
        document_id: Uuid,
        file_name: &str,
        data: &[u8],
        file_type: Option<&str>,
    ) -> Result<FileRecord, FileStorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.store(document_id, file_name, reader, file_type).await
    }

    /// Lock the row (if any), then update it or insert a new one.
    ///
    /// Returns the written record and the large object it used to reference.
    async fn upsert<C>(
        &self,
        conn: &C,
        content: &NewContent<'_>,
    ) -> Result<(FileRecord, Option<LargeObjectId>), FileStorageError>
    where
        C: ConnectionTrait + Sync,
    {
        let document_id = content.document_id;
        let db_err = || FileStorageError::database("store", Some(document_id));

        for _ in 0..MAX_UPSERT_ATTEMPTS {
            let existing = conn
                .query_one_raw(self.table.select_record(document_id, RowLock::Update))
                .await
                .map_err(db_err())?;

            match existing {
                Some(row) => {
                    let previous = FileRecord::from_row(&row).map_err(db_err())?.blob_ref;
                    let updated = conn
                        .query_one_raw(self.table.update_record(content))
                        .await
                        .map_err(db_err())?;
                    if let Some(row) = updated {
                        let record = FileRecord::from_row(&row).map_err(db_err())?;
                        return Ok((record, Some(previous)));
                    }
                }
                None => {
                    let inserted = conn
                        .query_one_raw(self.table.insert_record(content))
                        .await
                        .map_err(db_err())?;
                    if let Some(row) = inserted {
                        let record = FileRecord::from_row(&row).map_err(db_err())?;
                        return Ok((record, None));
                    }
                    // A concurrent store inserted and committed first; its
                    // row is visible to the next lock attempt.
                    debug!(%document_id, "Lost insert race, retrying as update");
                }
            }
        }

        Err(db_err()(DbErr::Custom(format!(
            "document changed concurrently {MAX_UPSERT_ATTEMPTS} times"
        ))))
    }

    /// Read a file fully into memory.
    #[instrument(skip(self))]
    pub async fn retrieve(&self, document_id: Uuid) -> Result<RetrievedFile, FileStorageError> {
        let mut content = Vec::new();
        let record = self.retrieve_into(document_id, &mut content).await?;

        Ok(RetrievedFile {
            file_name: record.file_name,
            file_size: record.file_size,
            content: Box::new(Cursor::new(content)),
        })
    }

    /// Stream a file into `sink` one chunk at a time.
    ///
    /// The row is share-locked for the duration of the read, so a concurrent
    /// delete or replace waits until the read commits.
    #[instrument(skip(self, sink))]
    pub async fn retrieve_into<W>(
        &self,
        document_id: Uuid,
        sink: &mut W,
    ) -> Result<FileRecord, FileStorageError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let pool = self.pool()?;
        let conn = pool.acquire().await?;

        let record = self
            .find_record(&*conn, document_id, RowLock::Share, "retrieve")
            .await?
            .ok_or_else(|| FileStorageError::document_not_found(document_id))?;

        let objects = PgLargeObjects::new(&*conn);
        let read = stream::read_stream(&objects, record.blob_ref, sink, self.config.chunk_size)
            .await
            .map_err(FileStorageError::transfer("read", document_id))?;

        if read.bytes != record.file_size {
            return Err(FileStorageError::NotFound(format!(
                "large object {} for document {document_id} is inconsistent: expected {} bytes, read {}",
                record.blob_ref, record.file_size, read.bytes
            )));
        }

        conn.commit()
            .await
            .map_err(FileStorageError::database("retrieve", Some(document_id)))?;
        Ok(record)
    }

    /// Delete a file's metadata row and large object together.
    #[instrument(skip(self))]
    pub async fn delete(&self, document_id: Uuid) -> Result<bool, FileStorageError> {
        let pool = self.pool()?;
        let conn = pool.acquire().await?;

        let record = self
            .find_record(&*conn, document_id, RowLock::Update, "delete")
            .await?
            .ok_or_else(|| FileStorageError::document_not_found(document_id))?;

        let objects = PgLargeObjects::new(&*conn);
        let unlinked = objects
            .unlink(record.blob_ref)
            .await
            .map_err(FileStorageError::transfer("delete", document_id))?;
        if !unlinked {
            warn!(oid = %record.blob_ref, "Large object was already gone, removing row");
        }

        conn.execute_raw(self.table.delete_record(document_id))
            .await
            .map_err(FileStorageError::database("delete", Some(document_id)))?;
        conn.commit()
            .await
            .map_err(FileStorageError::database("delete", Some(document_id)))?;

        debug!(oid = %record.blob_ref, "Deleted file");
        Ok(true)
    }

    /// List file records, newest first.
    ///
    /// An empty page is `Ok(vec![])` unless `strict_listing` is configured,
    /// in which case it is `NotFound`.
    #[instrument(skip(self))]
    pub async fn list(&self, filter: &ListFilter) -> Result<Vec<FileRecord>, FileStorageError> {
        let pool = self.pool()?;
        let conn = pool.acquire().await?;

        let rows = conn
            .query_all_raw(self.table.list_records(filter))
            .await
            .map_err(FileStorageError::database("list", None))?;
        conn.commit()
            .await
            .map_err(FileStorageError::database("list", None))?;

        let records = rows
            .iter()
            .map(FileRecord::from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(FileStorageError::database("list", None))?;

        if records.is_empty() && self.config.strict_listing {
            return Err(FileStorageError::NotFound(
                "No files found with the given filters".into(),
            ));
        }
        Ok(records)
    }

    async fn find_record<C>(
        &self,
        conn: &C,
        document_id: Uuid,
        lock: RowLock,
        operation: &'static str,
    ) -> Result<Option<FileRecord>, FileStorageError>
    where
        C: ConnectionTrait + Sync,
    {
        let row = conn
            .query_one_raw(self.table.select_record(document_id, lock))
            .await
            .map_err(FileStorageError::database(operation, Some(document_id)))?;

        row.as_ref()
            .map(FileRecord::from_row)
            .transpose()
            .map_err(FileStorageError::database(operation, Some(document_id)))
    }
}
