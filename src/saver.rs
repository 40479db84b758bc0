// src/saver.rs

use crate::integrity::StreamDigest;
use crate::models::{format_bytes, TaskId};
use crate::store::{StoreError, TaskStore};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no stored data for task {0}")]
    NotFound(TaskId),
}

/// What a finished save produced.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveReport {
    pub id: TaskId,
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Writes stored chunk records out as files.
///
/// Both the normal completion path and recovery go through [`DiskSaver::save`].
#[derive(Clone)]
pub struct DiskSaver {
    store: TaskStore,
    out_dir: PathBuf,
    grace: Duration,
}

impl DiskSaver {
    pub fn new(store: TaskStore, out_dir: impl Into<PathBuf>, grace: Duration) -> Self {
        Self { store, out_dir: out_dir.into(), grace }
    }

    /// Writes the record's chunks in order while hashing them, marks the task
    /// saved and deletes the record once the grace delay has passed.
    pub async fn save(&self, id: TaskId) -> Result<SaveReport, SaveError> {
        let record = self.store.get_chunks(id).await?.ok_or(SaveError::NotFound(id))?;

        tokio::fs::create_dir_all(&self.out_dir).await?;
        let (path, file) = create_unique(&self.out_dir, &record.filename).await?;
        debug!(
            task_id = id,
            path = %path.display(),
            mime_type = %record.mime_type,
            "writing file"
        );

        let mut writer = BufWriter::new(file);
        let mut digest = StreamDigest::default();
        for chunk in &record.chunks {
            writer.write_all(chunk).await?;
            digest.update(chunk);
        }
        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        let bytes = digest.bytes();
        let sha256 = digest.finish();

        self.store.mark_saved(id).await?;
        info!(
            task_id = id,
            path = %path.display(),
            size = %format_bytes(bytes),
            %sha256,
            "file saved"
        );

        if !self.grace.is_zero() {
            tokio::time::sleep(self.grace).await;
        }
        self.store.delete_chunks(id).await?;
        debug!(task_id = id, "stored chunks released");

        Ok(SaveReport { id, path, bytes, sha256 })
    }
}

/// Opens a new file named `filename` in `dir`, adding ` (1)`, ` (2)`, ... before
/// the extension while the name is taken.
async fn create_unique(dir: &Path, filename: &str) -> Result<(PathBuf, File), std::io::Error> {
    let name = Path::new(filename);
    let stem = name.file_stem().and_then(|s| s.to_str()).unwrap_or("video");
    let extension = name.extension().and_then(|s| s.to_str());

    let mut attempt = 0u32;
    loop {
        let candidate = match (attempt, extension) {
            (0, _) => filename.to_string(),
            (n, Some(ext)) => format!("{} ({}).{}", stem, n, ext),
            (n, None) => format!("{} ({})", stem, n),
        };
        let path = dir.join(candidate);
        match OpenOptions::new().write(true).create_new(true).open(&path).await {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}
