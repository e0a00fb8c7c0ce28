//! On-disk artifact exchange for task inputs and results.
//!
//! Layout is flat: one directory, every artifact named
//! `<task_id>.<kind>.<ext>`. Writes go to a writer-unique `.tmp` sibling
//! first and are renamed into place, so a reader either sees the whole
//! file or nothing and concurrent writers to one slot cannot mix bytes.
//! Re-uploading a task/kind slot overwrites; there is no deduplication.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use shutterq_core::error::CoreError;
use shutterq_core::files::{
    content_type_for_extension, validate_upload, FileKind, FileLimits, StoredFile,
};
use shutterq_core::types::TaskId;

/// Bounded-backoff policy for waiting on a referenced-but-unpublished
/// artifact. Defaults match the field-tuned upload-lag handling for slow
/// workstation transfers; the server configures a much shorter window so
/// requests stay inside their own timeout.
#[derive(Debug, Clone)]
pub struct FileWaitConfig {
    pub timeout: Duration,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for FileWaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(180),
            base_delay: Duration::from_secs(2),
            backoff_factor: 1.5,
            max_delay: Duration::from_secs(30),
        }
    }
}

pub struct FileExchange {
    root: PathBuf,
    limits: FileLimits,
    wait: FileWaitConfig,
}

impl FileExchange {
    pub async fn new(
        root: impl Into<PathBuf>,
        limits: FileLimits,
        wait: FileWaitConfig,
    ) -> Result<Self, CoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| CoreError::Internal(format!("creating exchange dir {root:?}: {e}")))?;
        Ok(Self { root, limits, wait })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn limits(&self) -> &FileLimits {
        &self.limits
    }

    /// Validate and store one artifact, publishing it atomically. Any
    /// previous artifact in the same task/kind slot is replaced, even if
    /// it carried a different extension.
    pub async fn store(
        &self,
        task_id: TaskId,
        kind: FileKind,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<StoredFile, CoreError> {
        let ext = validate_upload(kind, original_name, bytes.len() as u64, &self.limits)?;
        let stem = kind.stem(task_id);
        let final_name = format!("{stem}.{ext}");
        let final_path = self.root.join(&final_name);
        // Writer-unique tmp name: concurrent uploads into the same slot each
        // publish a complete file, and the last rename wins whole.
        let tmp_path = self
            .root
            .join(format!("{final_name}.{}.tmp", uuid::Uuid::now_v7()));

        // Clear out prior artifacts for this slot. In-flight .tmp files stay
        // untouched; stale ones wait for task-file removal.
        self.remove_matching(&stem, Some(&final_name), false).await?;

        if let Err(e) = tokio::fs::write(&tmp_path, bytes).await {
            return Err(CoreError::Internal(format!("writing {final_name}: {e}")));
        }
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(CoreError::Internal(format!("publishing {final_name}: {e}")));
        }

        debug!("Stored {final_name} ({} bytes)", bytes.len());
        Ok(StoredFile {
            file_name: final_name,
            size_bytes: bytes.len() as u64,
        })
    }

    /// Look up the published artifact for a task/kind slot, if any.
    /// In-flight `.tmp` files are invisible here.
    pub async fn resolve(
        &self,
        task_id: TaskId,
        kind: FileKind,
    ) -> Result<Option<StoredFile>, CoreError> {
        let prefix = format!("{}.", kind.stem(task_id));
        let mut dir = self.read_root().await?;
        while let Some(entry) = next_entry(&mut dir).await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(&prefix) && !name.ends_with(".tmp") {
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| CoreError::Internal(format!("stat {name}: {e}")))?;
                return Ok(Some(StoredFile {
                    file_name: name,
                    size_bytes: meta.len(),
                }));
            }
        }
        Ok(None)
    }

    /// Open a published artifact for streaming. Returns the file handle,
    /// its size, and a content type derived from the extension.
    pub async fn open(
        &self,
        file_name: &str,
    ) -> Result<(tokio::fs::File, u64, &'static str), CoreError> {
        guard_file_name(file_name)?;
        let path = self.root.join(file_name);

        let file = tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::NotFound {
                    entity: "file",
                    id: file_name.to_string(),
                }
            } else {
                CoreError::Internal(format!("opening {file_name}: {e}"))
            }
        })?;
        let size = file
            .metadata()
            .await
            .map_err(|e| CoreError::Internal(format!("stat {file_name}: {e}")))?
            .len();

        let ext = file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
        Ok((file, size, content_type_for_extension(ext)))
    }

    /// Poll for a slot's artifact with bounded exponential backoff,
    /// surfacing `FileNotReady` once the configured window lapses.
    pub async fn wait_ready(
        &self,
        task_id: TaskId,
        kind: FileKind,
    ) -> Result<StoredFile, CoreError> {
        let deadline = tokio::time::Instant::now() + self.wait.timeout;
        let mut delay = self.wait.base_delay;

        loop {
            if let Some(found) = self.resolve(task_id, kind).await? {
                return Ok(found);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(CoreError::FileNotReady(format!(
                    "{} not published within {:?}",
                    kind.stem(task_id),
                    self.wait.timeout
                )));
            }
            debug!("Waiting {delay:?} for {}", kind.stem(task_id));
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = delay.mul_f64(self.wait.backoff_factor).min(self.wait.max_delay);
        }
    }

    /// Delete every artifact belonging to a task, including stale `.tmp`
    /// leftovers from interrupted writes. Called when terminal tasks age
    /// out of the store.
    pub async fn remove_task_files(&self, task_id: TaskId) -> Result<usize, CoreError> {
        let removed = self
            .remove_matching(&task_id.to_string(), None, true)
            .await?;
        if removed > 0 {
            debug!("Removed {removed} exchange files for task {task_id}");
        }
        Ok(removed)
    }

    /// Remove files named `<stem>.*`, keeping `keep` if given. `.tmp`
    /// entries are only swept when `include_tmp` is set; the store path
    /// never deletes another writer's unpublished upload.
    async fn remove_matching(
        &self,
        stem: &str,
        keep: Option<&str>,
        include_tmp: bool,
    ) -> Result<usize, CoreError> {
        let prefix = format!("{stem}.");
        let mut removed = 0;
        let mut dir = self.read_root().await?;
        while let Some(entry) = next_entry(&mut dir).await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) || keep == Some(name.as_str()) {
                continue;
            }
            if !include_tmp && name.ends_with(".tmp") {
                continue;
            }
            tokio::fs::remove_file(entry.path())
                .await
                .map_err(|e| CoreError::Internal(format!("removing {name}: {e}")))?;
            removed += 1;
        }
        Ok(removed)
    }

    async fn read_root(&self) -> Result<tokio::fs::ReadDir, CoreError> {
        tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| CoreError::Internal(format!("reading exchange dir: {e}")))
    }
}

async fn next_entry(dir: &mut tokio::fs::ReadDir) -> Result<Option<tokio::fs::DirEntry>, CoreError> {
    dir.next_entry()
        .await
        .map_err(|e| CoreError::Internal(format!("reading exchange dir: {e}")))
}

/// Artifact names are always server-generated, but anything that reaches
/// `open` is checked against traversal anyway.
fn guard_file_name(file_name: &str) -> Result<(), CoreError> {
    let bad = file_name.is_empty()
        || file_name.contains('/')
        || file_name.contains('\\')
        || file_name.contains("..");
    if bad {
        return Err(CoreError::Validation(format!(
            "invalid artifact name '{file_name}'"
        )));
    }
    Ok(())
}
