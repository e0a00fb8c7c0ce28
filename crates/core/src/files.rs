//! File naming and upload validation for the exchange directory.
//!
//! Artifacts are addressed by task id and kind, never by their original
//! client-side name: the exchange stores `<task_id>.<kind>.<ext>` and only
//! the extension survives from the uploaded file name.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::TaskId;

// ---------------------------------------------------------------------------
// Kinds
// ---------------------------------------------------------------------------

/// The three artifact roles a task can own in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Photo,
    Preset,
    Result,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Photo => "photo",
            FileKind::Preset => "preset",
            FileKind::Result => "result",
        }
    }

    /// Stable stem an artifact of this kind is stored under. The extension
    /// is appended at store time, so lookups match on the stem alone.
    pub fn stem(&self, task_id: TaskId) -> String {
        format!("{task_id}.{}", self.as_str())
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(FileKind::Photo),
            "preset" => Ok(FileKind::Preset),
            "result" => Ok(FileKind::Result),
            other => Err(CoreError::Validation(format!(
                "unknown file kind '{other}' (expected photo, preset or result)"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Stored file reference
// ---------------------------------------------------------------------------

/// Reference to a fully published artifact in the exchange directory.
/// Returned from uploads and embedded in task payloads and results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    /// File name inside the exchange root, `<task_id>.<kind>.<ext>`.
    pub file_name: String,
    pub size_bytes: u64,
}

// ---------------------------------------------------------------------------
// Upload limits
// ---------------------------------------------------------------------------

/// Size ceiling and extension allow-lists enforced on every upload.
#[derive(Debug, Clone)]
pub struct FileLimits {
    pub max_file_bytes: u64,
    pub photo_extensions: Vec<String>,
    pub preset_extensions: Vec<String>,
}

impl FileLimits {
    /// Results are rendered images, so they share the photo allow-list.
    pub fn allowed_extensions(&self, kind: FileKind) -> &[String] {
        match kind {
            FileKind::Photo | FileKind::Result => &self.photo_extensions,
            FileKind::Preset => &self.preset_extensions,
        }
    }
}

/// Validate an upload against the configured limits and return the
/// normalized (lowercased) extension to store the artifact under.
pub fn validate_upload(
    kind: FileKind,
    file_name: &str,
    size_bytes: u64,
    limits: &FileLimits,
) -> Result<String, CoreError> {
    if size_bytes == 0 {
        return Err(CoreError::Validation(format!(
            "{kind} upload '{file_name}' is empty"
        )));
    }
    if size_bytes > limits.max_file_bytes {
        return Err(CoreError::Validation(format!(
            "{kind} upload '{file_name}' is {size_bytes} bytes, limit is {} bytes",
            limits.max_file_bytes
        )));
    }

    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .ok_or_else(|| {
            CoreError::Validation(format!(
                "{kind} upload '{file_name}' has no file extension"
            ))
        })?;

    let allowed = limits.allowed_extensions(kind);
    if !allowed.iter().any(|a| a == &ext) {
        return Err(CoreError::Validation(format!(
            "{kind} upload '{file_name}' has disallowed extension '{ext}' (allowed: {})",
            allowed.join(", ")
        )));
    }

    Ok(ext)
}

/// Best-effort content type for serving a stored artifact.
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "tif" | "tiff" => "image/tiff",
        "dng" => "image/x-adobe-dng",
        "xmp" => "application/rdf+xml",
        "json" => "application/json",
        "lua" => "text/x-lua",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> FileLimits {
        FileLimits {
            max_file_bytes: 1024,
            photo_extensions: vec!["jpg".into(), "png".into(), "dng".into()],
            preset_extensions: vec!["xmp".into(), "lua".into()],
        }
    }

    #[test]
    fn accepts_allowed_photo_and_normalizes_extension() {
        let ext = validate_upload(FileKind::Photo, "DSC_0042.JPG", 512, &limits()).unwrap();
        assert_eq!(ext, "jpg");
    }

    #[test]
    fn result_uploads_use_the_photo_allow_list() {
        let ext = validate_upload(FileKind::Result, "out.png", 100, &limits()).unwrap();
        assert_eq!(ext, "png");
        assert!(validate_upload(FileKind::Result, "out.xmp", 100, &limits()).is_err());
    }

    #[test]
    fn rejects_disallowed_extension() {
        let err = validate_upload(FileKind::Preset, "evil.exe", 10, &limits()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)), "got {err:?}");
    }

    #[test]
    fn rejects_missing_extension_and_empty_body() {
        assert!(validate_upload(FileKind::Photo, "noext", 10, &limits()).is_err());
        assert!(validate_upload(FileKind::Photo, "trailing.", 10, &limits()).is_err());
        assert!(validate_upload(FileKind::Photo, "a.jpg", 0, &limits()).is_err());
    }

    #[test]
    fn rejects_oversized_upload() {
        let err = validate_upload(FileKind::Photo, "big.jpg", 4096, &limits()).unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn kind_round_trips_through_path_segment() {
        for kind in [FileKind::Photo, FileKind::Preset, FileKind::Result] {
            assert_eq!(FileKind::from_str(kind.as_str()).unwrap(), kind);
        }
        assert!(FileKind::from_str("thumbnail").is_err());
    }

    #[test]
    fn stem_is_task_scoped() {
        let id = uuid::Uuid::now_v7();
        assert_eq!(FileKind::Result.stem(id), format!("{id}.result"));
    }
}
