//! SQL for the `file_storage` metadata table.
//!
//! The schema and table names come from configuration and are validated as
//! plain identifiers before any statement here is built.

use common::config::StorageConfig;
use sea_orm::{ConnectionTrait, DbBackend, DbErr, Statement, Value};
use tracing::info;
use uuid::Uuid;

use crate::record::ListFilter;

/// Column list every record-returning statement selects, in `FileRecord` order.
pub const RECORD_COLUMNS: &str = "document_id, file_name, blob_ref::int8 AS blob_ref, \
     file_size, file_type, created_at, updated_at";

/// Row lock taken when reading a record inside a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowLock {
    /// Blocks writers (store, delete) until commit.
    Share,
    /// Blocks readers that lock and all writers until commit.
    Update,
}

impl RowLock {
    fn clause(self) -> &'static str {
        match self {
            Self::Share => "FOR SHARE",
            Self::Update => "FOR UPDATE",
        }
    }
}

/// Fields written by a store.
pub struct NewContent<'a> {
    pub document_id: Uuid,
    pub file_name: &'a str,
    pub blob_ref: i64,
    pub file_size: i64,
    pub file_type: Option<&'a str>,
}

impl NewContent<'_> {
    fn values(&self) -> [Value; 5] {
        [
            self.document_id.into(),
            self.file_name.to_string().into(),
            self.blob_ref.into(),
            self.file_size.into(),
            self.file_type.map(str::to_string).into(),
        ]
    }
}

/// Fully qualified `file_storage` table.
#[derive(Clone, Debug)]
pub struct FileTable {
    schema: String,
    table: String,
}

impl FileTable {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            schema: config.project_name.clone(),
            table: config.table_name.clone(),
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.table)
    }

    /// Create the schema, table, and listing index if they are missing.
    pub async fn ensure<C>(&self, conn: &C) -> Result<(), DbErr>
    where
        C: ConnectionTrait + Sync,
    {
        conn.execute_unprepared(&format!(
            "CREATE SCHEMA IF NOT EXISTS \"{}\"",
            self.schema
        ))
        .await?;
        conn.execute_unprepared(&self.create_table_sql()).await?;
        conn.execute_unprepared(&format!(
            "CREATE INDEX IF NOT EXISTS \"{}_created_at_idx\" ON {} (created_at DESC)",
            self.table,
            self.qualified_name()
        ))
        .await?;

        info!(table = %self.qualified_name(), "File storage table ready");
        Ok(())
    }

    fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (
                document_id UUID PRIMARY KEY,
                file_name TEXT NOT NULL,
                blob_ref OID NOT NULL,
                file_size BIGINT NOT NULL,
                file_type TEXT,
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW()
            )",
            self.qualified_name()
        )
    }

    pub fn select_record(&self, document_id: Uuid, lock: RowLock) -> Statement {
        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "SELECT {RECORD_COLUMNS} FROM {} WHERE document_id = $1 {}",
                self.qualified_name(),
                lock.clause()
            ),
            [document_id.into()],
        )
    }

    /// Insert a new row; returns no row if the document already exists.
    pub fn insert_record(&self, content: &NewContent<'_>) -> Statement {
        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "INSERT INTO {} (document_id, file_name, blob_ref, file_size, file_type) \
                 VALUES ($1, $2, $3::oid, $4, $5) \
                 ON CONFLICT (document_id) DO NOTHING \
                 RETURNING {RECORD_COLUMNS}",
                self.qualified_name()
            ),
            content.values(),
        )
    }

    /// Replace content and metadata of an existing row, keeping `created_at`.
    pub fn update_record(&self, content: &NewContent<'_>) -> Statement {
        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "UPDATE {} SET file_name = $2, blob_ref = $3::oid, file_size = $4, \
                 file_type = $5, updated_at = NOW() \
                 WHERE document_id = $1 \
                 RETURNING {RECORD_COLUMNS}",
                self.qualified_name()
            ),
            content.values(),
        )
    }

    pub fn delete_record(&self, document_id: Uuid) -> Statement {
        Statement::from_sql_and_values(
            DbBackend::Postgres,
            format!(
                "DELETE FROM {} WHERE document_id = $1",
                self.qualified_name()
            ),
            [document_id.into()],
        )
    }

    pub fn list_records(&self, filter: &ListFilter) -> Statement {
        let mut values: Vec<Value> = Vec::new();
        let mut conditions = Vec::new();

        if let Some(ids) = filter.active_document_ids() {
            let placeholders = push_values(&mut values, ids.iter().map(|id| (*id).into()));
            conditions.push(format!("document_id IN ({placeholders})"));
        }
        if let Some(names) = filter.active_file_names() {
            let placeholders =
                push_values(&mut values, names.iter().map(|name| name.clone().into()));
            conditions.push(format!("file_name IN ({placeholders})"));
        }

        let mut sql = format!("SELECT {RECORD_COLUMNS} FROM {}", self.qualified_name());
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }

        values.push(clamp_i64(filter.offset).into());
        values.push(clamp_i64(filter.limit).into());
        sql.push_str(&format!(
            " ORDER BY created_at DESC, document_id OFFSET ${} LIMIT ${}",
            values.len() - 1,
            values.len()
        ));

        Statement::from_sql_and_values(DbBackend::Postgres, sql, values)
    }
}

/// Append values and return their `$n` placeholders, comma separated.
fn push_values(values: &mut Vec<Value>, new: impl Iterator<Item = Value>) -> String {
    let mut placeholders = Vec::new();
    for value in new {
        values.push(value);
        placeholders.push(format!("${}", values.len()));
    }
    placeholders.join(", ")
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
