//! Drive capability set and its variants.
//!
//! Every drive (raw backend, permission-wrapped, path-routed composite) is a
//! `dyn Drive`; callers depend only on the trait. Paths are expected in the
//! clean form produced by `path::clean_path`.

pub mod path;
pub mod entry;
pub mod upload;
pub mod memory;
pub mod local;
pub mod dispatcher;
pub mod permission_wrapper;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DriveResult;

pub use entry::{Entry, EntryJson, EntryKind, META_CAN_WRITE};
pub use upload::UploadPlan;
pub use memory::MemoryDrive;
pub use local::LocalDrive;
pub use dispatcher::{DispatcherDrive, Mount};
pub use permission_wrapper::{DriveOp, PermissionWrapperDrive};

/// Byte stream flowing into `save` or out of `read`.
pub type Content = Pin<Box<dyn AsyncRead + Send>>;

/// Receives cumulative transferred byte counts, in non-decreasing order, on
/// the calling task. A slow sink stalls the transfer.
pub trait ProgressSink: Send + Sync {
    fn report(&self, loaded: u64);
}

impl<F> ProgressSink for F
where
    F: Fn(u64) + Send + Sync,
{
    fn report(&self, loaded: u64) {
        self(loaded)
    }
}

/// Sink for callers that do not track progress.
pub fn no_progress(_loaded: u64) {}

pub fn content_from_bytes(bytes: Vec<u8>) -> Content {
    Box::pin(std::io::Cursor::new(bytes))
}

#[async_trait]
pub trait Drive: Send + Sync {
    /// Children of a directory; order is stable within one call.
    async fn list(&self, path: &str) -> DriveResult<Vec<Entry>>;

    async fn get(&self, path: &str) -> DriveResult<Entry>;

    async fn make_dir(&self, path: &str) -> DriveResult<Entry>;

    /// Copy `from` (recursively for directories) to `to`. Fails with Conflict
    /// when `to` exists and `overwrite` is false.
    async fn copy(&self, from: &Entry, to: &str, overwrite: bool, progress: &dyn ProgressSink) -> DriveResult<Entry>;

    async fn move_entry(&self, from: &str, to: &str) -> DriveResult<Entry>;

    /// Recursive for directories.
    async fn delete(&self, path: &str) -> DriveResult<()>;

    /// First phase of the upload handshake.
    async fn upload(&self, path: &str, size: i64, overwrite: bool) -> DriveResult<UploadPlan>;

    /// Direct write of `content` to `path`, replacing an existing file.
    async fn save(&self, path: &str, content: Content, progress: &dyn ProgressSink) -> DriveResult<Entry>;

    async fn read(&self, path: &str) -> DriveResult<Content>;
}

pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// Copy `reader` into `writer` chunk by chunk, reporting `base + copied` after
/// each chunk. Returns the number of bytes copied.
pub(crate) async fn pump<R, W>(reader: &mut R, writer: &mut W, base: u64, progress: &dyn ProgressSink) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 { break; }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
        progress.report(base + copied);
    }
    writer.flush().await?;
    Ok(copied)
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
