//! Destinations and the sinks that write task output into them.
//!
//! A task owns exactly one destination: either a file the body is streamed
//! into, or a shared in-memory buffer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncWriteExt;

/// Growable in-memory buffer shared between a task and its caller
///
/// Cloning yields another handle to the same storage.
#[derive(Clone, Debug, Default)]
pub struct MemoryBuffer {
    data: Arc<Mutex<BytesMut>>,
}

impl MemoryBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes
    pub fn append(&self, chunk: &[u8]) {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
    }

    /// Current length in bytes
    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been written
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents
    pub fn snapshot(&self) -> Bytes {
        Bytes::copy_from_slice(&self.data.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Discard all contents
    pub fn clear(&self) {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Whether two handles share the same storage
    pub fn same_buffer(&self, other: &MemoryBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// Where a task writes the response body
#[derive(Clone, Debug)]
pub enum Destination {
    /// Stream bytes into a file (created or truncated on start)
    File(PathBuf),
    /// Accumulate bytes in memory
    Memory(MemoryBuffer),
}

impl Destination {
    /// File path, for file destinations
    pub fn path(&self) -> Option<&Path> {
        match self {
            Destination::File(path) => Some(path),
            Destination::Memory(_) => None,
        }
    }

    /// Buffer handle, for in-memory destinations
    pub fn buffer(&self) -> Option<&MemoryBuffer> {
        match self {
            Destination::File(_) => None,
            Destination::Memory(buffer) => Some(buffer),
        }
    }

    /// Discard everything written so far
    ///
    /// Removes the file (a missing file is not an error) or clears the buffer.
    pub async fn truncate(&self) -> std::io::Result<()> {
        match self {
            Destination::File(path) => match tokio::fs::remove_file(path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            },
            Destination::Memory(buffer) => {
                buffer.clear();
                Ok(())
            }
        }
    }
}

/// Open writer for one execution of a task
pub(crate) enum OutputSink {
    File(tokio::fs::File),
    Memory(MemoryBuffer),
}

impl OutputSink {
    /// Open the destination for a fresh attempt
    ///
    /// Files are created (with parent directories) and truncated; buffers are cleared.
    pub(crate) async fn open(destination: &Destination) -> std::io::Result<Self> {
        match destination {
            Destination::File(path) => {
                if let Some(parent) = path.parent()
                    && !parent.as_os_str().is_empty()
                {
                    tokio::fs::create_dir_all(parent).await.map_err(|e| {
                        std::io::Error::new(
                            e.kind(),
                            format!("Failed to create directory '{}': {}", parent.display(), e),
                        )
                    })?;
                }
                let file = tokio::fs::File::create(path).await.map_err(|e| {
                    std::io::Error::new(
                        e.kind(),
                        format!("Failed to create '{}': {}", path.display(), e),
                    )
                })?;
                Ok(OutputSink::File(file))
            }
            Destination::Memory(buffer) => {
                buffer.clear();
                Ok(OutputSink::Memory(buffer.clone()))
            }
        }
    }

    pub(crate) async fn append(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        match self {
            OutputSink::File(file) => file.write_all(chunk).await,
            OutputSink::Memory(buffer) => {
                buffer.append(chunk);
                Ok(())
            }
        }
    }

    /// Flush buffered writes
    pub(crate) async fn finish(&mut self) -> std::io::Result<()> {
        match self {
            OutputSink::File(file) => file.flush().await,
            OutputSink::Memory(_) => Ok(()),
        }
    }
}
