use chrono::{DateTime, Utc};
use common::storage::LargeObjectId;
use sea_orm::{DbErr, QueryResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default page size for [`ListFilter`].
pub const DEFAULT_LIST_LIMIT: u64 = 100;

/// Metadata row describing one stored file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub document_id: Uuid,
    /// Original upload filename; not unique.
    pub file_name: String,
    /// Large object holding the content. Owned by this record alone.
    pub blob_ref: LargeObjectId,
    /// Exact byte count of the most recent write.
    pub file_size: u64,
    /// MIME type hint supplied by the caller.
    pub file_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    /// Map a row selected with [`crate::schema::RECORD_COLUMNS`].
    pub(crate) fn from_row(row: &QueryResult) -> Result<Self, DbErr> {
        let blob_ref: i64 = row.try_get("", "blob_ref")?;
        let file_size: i64 = row.try_get("", "file_size")?;

        Ok(Self {
            document_id: row.try_get("", "document_id")?,
            file_name: row.try_get("", "file_name")?,
            blob_ref: LargeObjectId::from_i64(blob_ref).map_err(|e| DbErr::Type(e.to_string()))?,
            file_size: u64::try_from(file_size)
                .map_err(|_| DbErr::Type(format!("negative file_size {file_size}")))?,
            file_type: row.try_get("", "file_type")?,
            created_at: row.try_get("", "created_at")?,
            updated_at: row.try_get("", "updated_at")?,
        })
    }
}

/// Content returned by [`crate::FileStorageProvider::retrieve`].
pub struct RetrievedFile {
    pub file_name: String,
    pub file_size: u64,
    pub content: common::storage::BoxReader,
}

/// Filters and pagination for listing stored files.
///
/// Filters combine with AND. An empty filter list is treated as no filter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListFilter {
    pub document_ids: Option<Vec<Uuid>>,
    pub file_names: Option<Vec<String>>,
    pub offset: u64,
    pub limit: u64,
}

impl Default for ListFilter {
    fn default() -> Self {
        Self {
            document_ids: None,
            file_names: None,
            offset: 0,
            limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl ListFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_ids(mut self, ids: impl IntoIterator<Item = Uuid>) -> Self {
        self.document_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn file_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.file_names = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn page(mut self, offset: u64, limit: u64) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    pub(crate) fn active_document_ids(&self) -> Option<&[Uuid]> {
        self.document_ids.as_deref().filter(|ids| !ids.is_empty())
    }

    pub(crate) fn active_file_names(&self) -> Option<&[String]> {
        self.file_names.as_deref().filter(|names| !names.is_empty())
    }
}
