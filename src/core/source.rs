//! Byte sources the engine uploads from.
//!
//! The engine never holds the whole payload — it asks the source for one
//! chunk's range at dispatch time, so a file-backed upload streams from
//! disk with at most three chunks in memory.

use bytes::Bytes;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

/// Byte-addressable blob with a known total size. Immutable for the
/// duration of the upload.
#[async_trait::async_trait]
pub trait ChunkSource: Send + Sync + 'static {
    fn size(&self) -> u64;

    /// Read the bytes in `[start, end)`. Called concurrently for
    /// different ranges, so implementations must not share a cursor.
    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes>;
}

/// In-memory source.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

#[async_trait::async_trait]
impl ChunkSource for MemorySource {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        if end > self.data.len() as u64 || start > end {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} outside source of {} bytes", self.data.len()),
            ));
        }
        Ok(self.data.slice(start as usize..end as usize))
    }
}

/// File-backed source. Each range read opens its own handle so
/// concurrent chunk reads never contend on a shared cursor.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    size: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let size = tokio::fs::metadata(&path).await?.len();
        Ok(Self { path, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl ChunkSource for FileSource {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read_range(&self, start: u64, end: u64) -> io::Result<Bytes> {
        if end > self.size || start > end {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} outside file of {} bytes", self.size),
            ));
        }
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(start)).await?;
        let mut buf = vec![0u8; (end - start) as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}
