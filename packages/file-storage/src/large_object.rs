use async_trait::async_trait;
use common::storage::{LargeObjectFd, LargeObjectId, LargeObjectStore, OpenMode, StorageError};
use sea_orm::{ConnectionTrait, DbErr, Statement, TryGetable, Value};

/// PostgreSQL server-side large-object functions on one connection.
///
/// Descriptors are only valid inside the transaction that opened them, so the
/// connection should be a transaction (see [`crate::pool::PooledConnection`]).
pub struct PgLargeObjects<'c, C> {
    conn: &'c C,
}

impl<'c, C> PgLargeObjects<'c, C>
where
    C: ConnectionTrait + Sync,
{
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    async fn query_value<T, I>(
        &self,
        sql: &str,
        values: I,
        column: &str,
    ) -> Result<Option<T>, DbErr>
    where
        T: TryGetable,
        I: IntoIterator<Item = Value>,
    {
        let stmt = Statement::from_sql_and_values(self.conn.get_database_backend(), sql, values);
        match self.conn.query_one_raw(stmt).await? {
            Some(row) => row.try_get("", column).map(Some),
            None => Ok(None),
        }
    }

    async fn query_required<T, I>(
        &self,
        sql: &str,
        values: I,
        column: &str,
    ) -> Result<T, StorageError>
    where
        T: TryGetable,
        I: IntoIterator<Item = Value>,
    {
        self.query_value(sql, values, column)
            .await
            .map_err(StorageError::backend)?
            .ok_or_else(|| {
                StorageError::backend(DbErr::RecordNotFound(format!(
                    "no result from `{sql}`"
                )))
            })
    }
}

#[async_trait]
impl<'c, C> LargeObjectStore for PgLargeObjects<'c, C>
where
    C: ConnectionTrait + Sync,
{
    async fn create(&self) -> Result<LargeObjectId, StorageError> {
        let oid: i64 = self
            .query_required("SELECT lo_create(0)::int8 AS oid", Vec::<Value>::new(), "oid")
            .await?;
        LargeObjectId::from_i64(oid)
    }

    async fn open(
        &self,
        oid: LargeObjectId,
        mode: OpenMode,
    ) -> Result<LargeObjectFd, StorageError> {
        let fd: i32 = self
            .query_required(
                "SELECT lo_open($1::oid, $2) AS fd",
                [oid.as_i64().into(), mode.flags().into()],
                "fd",
            )
            .await?;
        Ok(LargeObjectFd::new(fd))
    }

    async fn write(&self, fd: LargeObjectFd, chunk: &[u8]) -> Result<usize, StorageError> {
        let written: i32 = self
            .query_required(
                "SELECT lowrite($1, $2) AS written",
                [fd.as_i32().into(), chunk.to_vec().into()],
                "written",
            )
            .await?;
        Ok(usize::try_from(written).unwrap_or(0))
    }

    async fn read(&self, fd: LargeObjectFd, len: usize) -> Result<Vec<u8>, StorageError> {
        let len = i32::try_from(len).unwrap_or(i32::MAX);
        let chunk = self
            .query_value::<Option<Vec<u8>>, _>(
                "SELECT loread($1, $2) AS chunk",
                [fd.as_i32().into(), len.into()],
                "chunk",
            )
            .await
            .map_err(StorageError::backend)?;
        Ok(chunk.flatten().unwrap_or_default())
    }

    async fn close(&self, fd: LargeObjectFd) -> Result<(), StorageError> {
        let stmt = Statement::from_sql_and_values(
            self.conn.get_database_backend(),
            "SELECT lo_close($1)",
            [fd.as_i32().into()],
        );
        self.conn
            .execute_raw(stmt)
            .await
            .map(|_| ())
            .map_err(StorageError::backend)
    }

    async fn unlink(&self, oid: LargeObjectId) -> Result<bool, StorageError> {
        // Selecting through the catalog makes a missing object a no-op
        // instead of an error that would abort the transaction.
        let unlinked: Option<i32> = self
            .query_value(
                "SELECT lo_unlink(oid) AS unlinked FROM pg_largeobject_metadata WHERE oid = $1::oid",
                [oid.as_i64().into()],
                "unlinked",
            )
            .await
            .map_err(StorageError::backend)?;
        Ok(unlinked.is_some())
    }

    async fn exists(&self, oid: LargeObjectId) -> Result<bool, StorageError> {
        // pg_largeobject has no pages for an empty object; the metadata catalog does.
        self.query_required(
            "SELECT EXISTS(SELECT 1 FROM pg_largeobject_metadata WHERE oid = $1::oid) AS present",
            [oid.as_i64().into()],
            "present",
        )
        .await
    }
}
