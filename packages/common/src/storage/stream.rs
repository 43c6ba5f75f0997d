//! Chunked transfer between caller streams and server-side large objects.
//!
//! Both directions hold at most one chunk in memory, so peak usage is bounded
//! by the chunk size no matter how large the object is.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

use super::error::StorageError;
use super::object_id::{LargeObjectFd, LargeObjectId, OpenMode};
use super::traits::LargeObjectStore;

/// Canonical transfer chunk size (8 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

/// Byte and chunk counts for one completed transfer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes: u64,
    pub chunks: u64,
}

impl TransferStats {
    fn record(&mut self, len: usize) {
        self.bytes += len as u64;
        self.chunks += 1;
    }
}

/// Stream `reader` into the large object `oid` until EOF.
///
/// The object is expected to be freshly created for this write. If anything
/// fails, the descriptor is closed and the object unlinked (both best-effort)
/// before the original error is returned, so a failed write never leaves a
/// partial object behind.
pub async fn write_stream<S, R>(
    store: &S,
    oid: LargeObjectId,
    reader: &mut R,
    chunk_size: usize,
) -> Result<TransferStats, StorageError>
where
    S: LargeObjectStore + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    let fd = match store.open(oid, OpenMode::Write).await {
        Ok(fd) => fd,
        Err(err) => {
            discard(store, oid, None).await;
            return Err(err);
        }
    };

    let stats = match copy_in(store, fd, reader, chunk_size).await {
        Ok(stats) => stats,
        Err(err) => {
            discard(store, oid, Some(fd)).await;
            return Err(err);
        }
    };

    if let Err(err) = store.close(fd).await {
        discard(store, oid, None).await;
        return Err(err);
    }

    debug!(%oid, bytes = stats.bytes, chunks = stats.chunks, "large object written");
    Ok(stats)
}

/// Stream the large object `oid` into `sink`.
///
/// Fails with [`StorageError::NotFound`] before opening anything if the object
/// does not exist. The descriptor is closed on every return path; the object
/// itself is never modified.
pub async fn read_stream<S, W>(
    store: &S,
    oid: LargeObjectId,
    sink: &mut W,
    chunk_size: usize,
) -> Result<TransferStats, StorageError>
where
    S: LargeObjectStore + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    if !store.exists(oid).await? {
        return Err(StorageError::NotFound(oid));
    }

    let fd = store.open(oid, OpenMode::Read).await?;
    let result = copy_out(store, fd, sink, chunk_size).await;
    let closed = store.close(fd).await;

    match (result, closed) {
        (Ok(stats), Ok(())) => {
            debug!(%oid, bytes = stats.bytes, chunks = stats.chunks, "large object read");
            Ok(stats)
        }
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(%oid, error = %close_err, "Failed to close large object after read error");
            Err(err)
        }
        (Err(err), Ok(())) => Err(err),
    }
}

/// Read a whole large object into memory.
pub async fn read_to_vec<S>(
    store: &S,
    oid: LargeObjectId,
    chunk_size: usize,
) -> Result<Vec<u8>, StorageError>
where
    S: LargeObjectStore + ?Sized,
{
    let mut buf = Vec::new();
    read_stream(store, oid, &mut buf, chunk_size).await?;
    Ok(buf)
}

async fn copy_in<S, R>(
    store: &S,
    fd: LargeObjectFd,
    reader: &mut R,
    chunk_size: usize,
) -> Result<TransferStats, StorageError>
where
    S: LargeObjectStore + ?Sized,
    R: AsyncRead + Unpin + ?Sized,
{
    let chunk_size = chunk_size.max(1);
    let mut buf = vec![0u8; chunk_size];
    let mut stats = TransferStats::default();

    loop {
        let n = fill_chunk(reader, &mut buf).await?;
        if n == 0 {
            break;
        }

        let written = store.write(fd, &buf[..n]).await?;
        if written != n {
            return Err(StorageError::ShortWrite {
                expected: n,
                written,
            });
        }
        stats.record(n);

        // A partial chunk means the reader hit EOF while filling it.
        if n < chunk_size {
            break;
        }
    }

    Ok(stats)
}

async fn copy_out<S, W>(
    store: &S,
    fd: LargeObjectFd,
    sink: &mut W,
    chunk_size: usize,
) -> Result<TransferStats, StorageError>
where
    S: LargeObjectStore + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let chunk_size = chunk_size.max(1);
    let mut stats = TransferStats::default();

    loop {
        let chunk = store.read(fd, chunk_size).await?;
        if chunk.is_empty() {
            break;
        }

        sink.write_all(&chunk).await?;
        stats.record(chunk.len());

        if chunk.len() < chunk_size {
            break;
        }
    }

    sink.flush().await?;
    Ok(stats)
}

/// Read from `reader` until `buf` is full or EOF, coalescing short reads.
async fn fill_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

async fn discard<S>(store: &S, oid: LargeObjectId, fd: Option<LargeObjectFd>)
where
    S: LargeObjectStore + ?Sized,
{
    if let Some(fd) = fd {
        if let Err(e) = store.close(fd).await {
            warn!(%oid, error = %e, "Failed to close large object during cleanup");
        }
    }
    if let Err(e) = store.unlink(oid).await {
        warn!(%oid, error = %e, "Failed to unlink large object during cleanup");
    }
}
