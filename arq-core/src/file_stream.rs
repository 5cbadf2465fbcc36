//! Chunked file access for the protocol engines. The engines only ever see
//! whole chunks; everything about paths, open modes and flushing lives here.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// The number of file bytes carried by one data packet. Smaller than the
/// wire maximum of 1023 so the LEN field never saturates.
pub const CHUNK_SIZE: usize = 1000;

/// What to do when a writer's target already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overwrite {
    /// Replace the existing file. Client-side download policy.
    Truncate,
    /// Fail with [`FileError::AlreadyExists`]. Server-side upload policy.
    Reject,
}

/// A file opened for chunked reading or writing.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    path: PathBuf,
}

impl FileStream {
    /// Opens `path` for reading.
    pub async fn reader(path: impl AsRef<Path>) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        match File::open(&path).await {
            Ok(file) => Ok(Self { file, path }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FileError::NotFound { path }),
            Err(e) => Err(e.into()),
        }
    }

    /// Creates `path` for writing under the given collision policy.
    pub async fn writer(path: impl AsRef<Path>, overwrite: Overwrite) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        options.write(true);
        match overwrite {
            Overwrite::Truncate => options.create(true).truncate(true),
            Overwrite::Reject => options.create_new(true),
        };
        match options.open(&path).await {
            Ok(file) => Ok(Self { file, path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                Err(FileError::AlreadyExists { path })
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the next chunk, up to [`CHUNK_SIZE`] bytes. An empty chunk
    /// means end of file.
    pub async fn read_chunk(&mut self) -> Result<Vec<u8>, FileError> {
        let mut chunk = vec![0u8; CHUNK_SIZE];
        let mut filled = 0;
        while filled < CHUNK_SIZE {
            let n = self.file.read(&mut chunk[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        chunk.truncate(filled);
        Ok(chunk)
    }

    /// Appends a chunk and flushes it to the OS.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FileError> {
        self.file.write_all(chunk).await?;
        self.file.flush().await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<(), FileError> {
        self.file.flush().await?;
        Ok(())
    }
}

#[derive(Debug, ThisError)]
pub enum FileError {
    #[error("{}: file not found", path.display())]
    NotFound { path: PathBuf },
    #[error("{}: file already exists", path.display())]
    AlreadyExists { path: PathBuf },
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("arq-file-stream-{name}-{}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn writes_then_reads_back_in_chunks() -> anyhow::Result<()> {
        let path = scratch_path("round-trip");
        let content: Vec<u8> = (0..2_500).map(|i| (i % 251) as u8).collect();

        let mut writer = FileStream::writer(&path, Overwrite::Reject).await?;
        for chunk in content.chunks(CHUNK_SIZE) {
            writer.write_chunk(chunk).await?;
        }
        writer.close().await?;

        let mut reader = FileStream::reader(&path).await?;
        let mut read_back = Vec::new();
        loop {
            let chunk = reader.read_chunk().await?;
            if chunk.is_empty() {
                break;
            }
            assert!(chunk.len() <= CHUNK_SIZE);
            read_back.extend_from_slice(&chunk);
        }
        assert_eq!(read_back, content);

        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[tokio::test]
    async fn missing_reader_target_is_not_found() {
        let path = scratch_path("missing");
        assert!(matches!(
            FileStream::reader(&path).await,
            Err(FileError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn reject_policy_refuses_collisions() -> anyhow::Result<()> {
        let path = scratch_path("collision");
        FileStream::writer(&path, Overwrite::Reject)
            .await?
            .close()
            .await?;
        assert!(matches!(
            FileStream::writer(&path, Overwrite::Reject).await,
            Err(FileError::AlreadyExists { .. })
        ));
        // The truncate policy takes the same path without complaint.
        FileStream::writer(&path, Overwrite::Truncate).await?;
        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[tokio::test]
    async fn empty_file_reads_as_immediate_eof() -> anyhow::Result<()> {
        let path = scratch_path("empty");
        FileStream::writer(&path, Overwrite::Reject)
            .await?
            .close()
            .await?;
        let mut reader = FileStream::reader(&path).await?;
        assert!(reader.read_chunk().await?.is_empty());
        std::fs::remove_file(&path)?;
        Ok(())
    }
}
