//! Local source trees for zarr uploads
//!
//! Generated files are named by the MD5 hex digest of their contents, so the
//! filename doubles as the etag announced to the service.

use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::Serialize;
use tracing::info;

use crate::error::{Result, UploadError};

/// One file of the source tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceFile {
    /// Path relative to the source root, `/`-separated
    pub path: String,
    pub etag: String,
    #[serde(skip)]
    pub size: u64,
}

fn io_error(path: &Path, source: std::io::Error) -> UploadError {
    UploadError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Directory for the file with index `index`: `12` -> `00/00/00/00/12`
pub fn index_dir(index: u64) -> String {
    let id = format!("{:010}", index);
    id.as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Write `count` files of `size` random bytes under `root`
pub async fn generate_source_files(root: &Path, count: u64, size: usize) -> Result<Vec<PathBuf>> {
    info!(
        "Generating {} files of {:.3} MB in {}",
        count,
        size as f64 / 1_000_000.0,
        root.display()
    );

    let mut paths = Vec::with_capacity(count as usize);
    for index in 0..count {
        let mut data = vec![0u8; size];
        rand::thread_rng().fill_bytes(&mut data);
        let checksum = format!("{:x}", md5::compute(&data));

        let dir = root.join(index_dir(index));
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        let path = dir.join(checksum);
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| io_error(&path, e))?;
        paths.push(path);
    }
    Ok(paths)
}

/// List every file under `root`, sorted by relative path
pub async fn scan_source_files(root: &Path) -> Result<Vec<SourceFile>> {
    info!("Scanning {} for upload", root.display());

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| io_error(&dir, e))?;

        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let path = entry.path();
            let meta = entry.metadata().await.map_err(|e| io_error(&path, e))?;
            if meta.is_dir() {
                pending.push(path);
                continue;
            }

            let relative = path.strip_prefix(root).map_err(|e| UploadError::Internal {
                message: format!("{} escaped the source root: {}", path.display(), e),
            })?;
            let etag = entry.file_name().to_string_lossy().into_owned();
            files.push(SourceFile {
                path: relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/"),
                etag,
                size: meta.len(),
            });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
