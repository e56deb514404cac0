//! Sources of part bytes for direct uploads

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use rand::RngCore;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{Result, UploadError};
use crate::plan::PartDescriptor;

/// Where the bytes of a part come from
#[derive(Debug, Clone)]
pub enum PayloadSource {
    /// Fresh random bytes for every part
    Random,
    /// The part's byte range of one local file
    FileRange(PathBuf),
    /// Part `n` is the whole of file `n - 1`
    Files(Arc<Vec<PathBuf>>),
}

impl PayloadSource {
    /// Load the bytes for `part`
    pub async fn read(&self, part: &PartDescriptor) -> Result<Bytes> {
        match self {
            PayloadSource::Random => {
                let mut buf = vec![0u8; part.size as usize];
                rand::thread_rng().fill_bytes(&mut buf);
                Ok(Bytes::from(buf))
            }
            PayloadSource::FileRange(path) => read_range(path, part.offset, part.size).await,
            PayloadSource::Files(paths) => {
                let path = (part.number as usize)
                    .checked_sub(1)
                    .and_then(|idx| paths.get(idx))
                    .ok_or_else(|| {
                        UploadError::transfer(part.number, "no source file for part")
                    })?;
                read_range(path, 0, part.size).await
            }
        }
    }
}

async fn read_range(path: &Path, offset: u64, size: u64) -> Result<Bytes> {
    let io_err = |source| UploadError::Io {
        path: path.display().to_string(),
        source,
    };

    let mut file = File::open(path).await.map_err(io_err)?;
    file.seek(SeekFrom::Start(offset)).await.map_err(io_err)?;

    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf).await.map_err(io_err)?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn part(number: u32, offset: u64, size: u64) -> PartDescriptor {
        PartDescriptor { number, offset, size }
    }

    #[tokio::test]
    async fn test_random_payload_size() {
        let data = PayloadSource::Random.read(&part(1, 0, 4096)).await.unwrap();
        assert_eq!(data.len(), 4096);
    }

    #[tokio::test]
    async fn test_file_range() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let source = PayloadSource::FileRange(file.path().to_path_buf());
        let data = source.read(&part(2, 4, 3)).await.unwrap();
        assert_eq!(&data[..], b"456");
    }

    #[tokio::test]
    async fn test_short_file_is_io_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"abc").unwrap();

        let source = PayloadSource::FileRange(file.path().to_path_buf());
        let err = source.read(&part(1, 0, 10)).await.unwrap_err();
        assert!(matches!(err, UploadError::Io { .. }));
    }

    #[tokio::test]
    async fn test_files_missing_index() {
        let source = PayloadSource::Files(Arc::new(Vec::new()));
        let err = source.read(&part(1, 0, 1)).await.unwrap_err();
        assert_eq!(err.part_number(), Some(1));
    }
}
