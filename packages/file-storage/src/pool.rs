//! Database connection pool with an admission ceiling.
//!
//! The underlying sea-orm pool may hold up to `max_connections`, but callers
//! are admitted through a separate semaphore sized at `semaphore_fraction` of
//! that, keeping headroom below the server's hard connection limit.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use common::config::PoolConfig;
use sea_orm::{
    ConnectOptions, Database, DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::config::validate_pool_config;
use crate::error::FileStorageError;

pub struct ConnectionPool {
    db: DatabaseConnection,
    permits: Arc<Semaphore>,
    admission_limit: usize,
    acquire_timeout: Option<Duration>,
}

impl ConnectionPool {
    /// Connect to the database described by `config`.
    ///
    /// Fails with [`FileStorageError::Configuration`] if the pool cannot be
    /// established; no partially initialized pool is ever returned.
    pub async fn connect(config: &PoolConfig) -> Result<Self, FileStorageError> {
        validate_pool_config(config)?;

        let mut opt = ConnectOptions::new(config.url.clone());
        opt.max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect_timeout(config.connect_timeout())
            .idle_timeout(config.max_idle_lifetime())
            // Every chunk is its own statement; statement logging would flood the log.
            .sqlx_logging(false);

        let db = Database::connect(opt).await.map_err(|e| {
            FileStorageError::Configuration(format!("failed to connect to database: {e}"))
        })?;
        db.ping().await.map_err(|e| {
            FileStorageError::Configuration(format!("database did not answer ping: {e}"))
        })?;

        let admission_limit = config.admission_limit();
        info!(
            max_connections = config.max_connections,
            admission_limit, "Connected to Postgres and created connection pool"
        );

        Ok(Self::with_limits(
            db,
            admission_limit,
            config.acquire_timeout(),
        ))
    }

    /// Wrap an existing connection, admitting at most `admission_limit` callers.
    pub fn from_connection(db: DatabaseConnection, admission_limit: usize) -> Self {
        Self::with_limits(db, admission_limit, None)
    }

    /// Bound how long [`acquire`](Self::acquire) waits for a permit.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    fn with_limits(
        db: DatabaseConnection,
        admission_limit: usize,
        acquire_timeout: Option<Duration>,
    ) -> Self {
        let admission_limit = admission_limit.max(1);
        Self {
            db,
            permits: Arc::new(Semaphore::new(admission_limit)),
            admission_limit,
            acquire_timeout,
        }
    }

    /// Wait for an admission permit, then pin one connection in a transaction.
    ///
    /// The permit and the connection are released together when the returned
    /// [`PooledConnection`] is committed, rolled back, or dropped.
    pub async fn acquire(&self) -> Result<PooledConnection, FileStorageError> {
        let permits = self.permits.clone();
        let permit = match self.acquire_timeout {
            Some(limit) => tokio::time::timeout(limit, permits.acquire_owned())
                .await
                .map_err(|_| FileStorageError::AcquireTimeout(limit))?,
            None => permits.acquire_owned().await,
        }
        .map_err(|_| FileStorageError::NotInitialized)?;

        let txn = self
            .db
            .begin()
            .await
            .map_err(FileStorageError::database("acquire", None))?;

        Ok(PooledConnection {
            txn,
            _permit: permit,
        })
    }

    pub fn admission_limit(&self) -> usize {
        self.admission_limit
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Number of callers currently holding a connection.
    pub fn in_use(&self) -> usize {
        self.admission_limit
            .saturating_sub(self.permits.available_permits())
    }

    /// Stop admitting callers and close the underlying pool.
    ///
    /// Waiting and future `acquire` calls fail with `NotInitialized`.
    pub async fn close(&self) {
        self.permits.close();
        if let Err(e) = self.db.clone().close().await {
            warn!(error = %e, "Failed to close database pool cleanly");
        }
        info!("Connection pool closed");
    }
}

/// One pooled connection pinned inside a transaction, plus its admission permit.
pub struct PooledConnection {
    txn: DatabaseTransaction,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Commit the transaction and release the connection and permit.
    pub async fn commit(self) -> Result<(), DbErr> {
        let Self { txn, _permit } = self;
        txn.commit().await
    }

    /// Roll back explicitly. Dropping the connection has the same effect.
    pub async fn rollback(self) -> Result<(), DbErr> {
        let Self { txn, _permit } = self;
        txn.rollback().await
    }
}

impl Deref for PooledConnection {
    type Target = DatabaseTransaction;

    fn deref(&self) -> &Self::Target {
        &self.txn
    }
}
