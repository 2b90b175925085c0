//! Byte-range access to the file being uploaded

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::io::{self, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Read-only, random-access view of the upload source.
///
/// Reads never mutate the source, so no locking is needed.
#[async_trait]
pub trait PartSource: Send + Sync {
    /// Total size in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `read_range` can be served. Streams such as pipes cannot.
    fn is_sliceable(&self) -> bool {
        true
    }

    /// Read `range`, clamped to the end of the source
    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes>;
}

/// A file on disk, opened per read
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
    sliceable: bool,
}

impl FileSource {
    /// Stat the file. Non-regular files (FIFOs, character devices) are opened
    /// but reported as not sliceable.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        let sliceable = metadata.is_file();
        let len = if sliceable { metadata.len() } else { 0 };
        Ok(Self {
            path,
            len,
            sliceable,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PartSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn is_sliceable(&self) -> bool {
        self.sliceable
    }

    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        let range = clamp(range, self.len);
        let size = (range.end - range.start) as usize;
        if size == 0 {
            return Ok(Bytes::new());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(range.start)).await?;

        let mut buffer = BytesMut::zeroed(size);
        file.read_exact(&mut buffer).await?;
        Ok(buffer.freeze())
    }
}

/// In-memory source
#[async_trait]
impl PartSource for Bytes {
    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }

    async fn read_range(&self, range: Range<u64>) -> io::Result<Bytes> {
        let range = clamp(range, PartSource::len(self));
        Ok(self.slice(range.start as usize..range.end as usize))
    }
}

fn clamp(range: Range<u64>, len: u64) -> Range<u64> {
    let end = range.end.min(len);
    range.start.min(end)..end
}
