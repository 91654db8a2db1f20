pub mod document;

use std::fs::{self, File, Permissions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::{MemoryError, Result};
use document::MemoryDocument;

/// Outcome of opening the memory document.
#[derive(Debug)]
pub struct LoadedDocument {
    pub document: MemoryDocument,
    /// Set when the file existed but could not be parsed and was reset.
    pub warning: Option<MemoryError>,
}

/// Load the memory document at `path`.
///
/// A missing file yields an empty document. A malformed one is reset to
/// empty (after being moved aside when `backup_corrupt` is set) and reported
/// through [`LoadedDocument::warning`]. Only OS-level read failures are errors.
pub fn load_document(path: impl AsRef<Path>, backup_corrupt: bool) -> Result<LoadedDocument> {
    let path = path.as_ref();

    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no memory document yet, starting empty");
            return Ok(LoadedDocument {
                document: MemoryDocument::default(),
                warning: None,
            });
        }
        Err(source) => {
            return Err(MemoryError::StoreUnavailable {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    match parse_document(&bytes) {
        Ok(document) => {
            tracing::debug!(
                path = %path.display(),
                file_access = document.file_access.len(),
                tools = document.tool_usage.len(),
                patterns = document.patterns.len(),
                "memory document loaded"
            );
            Ok(LoadedDocument {
                document,
                warning: None,
            })
        }
        Err(reason) => {
            tracing::warn!(path = %path.display(), %reason, "memory document is corrupt, resetting to empty");
            if backup_corrupt {
                backup_corrupt_document(path);
            }
            Ok(LoadedDocument {
                document: MemoryDocument::default(),
                warning: Some(MemoryError::StoreCorrupt {
                    path: path.to_path_buf(),
                    reason,
                }),
            })
        }
    }
}

fn parse_document(bytes: &[u8]) -> std::result::Result<MemoryDocument, String> {
    let mut document: MemoryDocument =
        serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    document.upgrade()?;
    Ok(document)
}

/// Move an unparseable document out of the way so it is not overwritten.
fn backup_corrupt_document(path: &Path) {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let backup = sibling_with_suffix(path, &format!("corrupt-{stamp}"));
    match fs::rename(path, &backup) {
        Ok(()) => tracing::info!(backup = %backup.display(), "corrupt memory document preserved"),
        Err(e) => tracing::warn!(error = %e, "could not preserve corrupt memory document"),
    }
}

/// Persist the document via write-to-temporary-then-rename.
pub fn write_document(path: impl AsRef<Path>, document: &MemoryDocument) -> Result<()> {
    let path = path.as_ref();
    let mut buf = serde_json::to_vec_pretty(document)
        .map_err(|e| MemoryError::RecordingFailure(format!("memory document: {e}")))?;
    buf.push(b'\n');
    write_atomic(path, &buf).map_err(|source| MemoryError::StoreUnavailable {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `contents` to `path` without ever exposing a partially written file.
///
/// The bytes go to a sibling temp file which is flushed, synced and closed
/// before being renamed over the target. The temp file is removed on failure.
pub fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    write_atomic_with_permissions(path, contents, None)
}

/// [`write_atomic`], applying `permissions` to the new file before it replaces
/// the target.
pub fn write_atomic_with_permissions(
    path: &Path,
    contents: &[u8],
    permissions: Option<&Permissions>,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = sibling_with_suffix(path, &format!("tmp.{}", std::process::id()));

    let written = (|| {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        writer.write_all(contents)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        if let Some(permissions) = permissions {
            file.set_permissions(permissions.clone())?;
        }
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, path)
    })();

    if written.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    written
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::ToolUsageStat;

    #[test]
    fn missing_file_loads_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let loaded = load_document(tmp.path().join("memory.json"), true).unwrap();
        assert!(loaded.document.is_empty());
        assert!(loaded.warning.is_none());
    }

    #[test]
    fn write_then_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("memory.json");

        let mut doc = MemoryDocument::default();
        doc.tool_usage.insert(
            "read_file".into(),
            ToolUsageStat {
                invocations: 2,
                successes: 1,
                ..Default::default()
            },
        );
        write_document(&path, &doc).unwrap();

        let loaded = load_document(&path, true).unwrap();
        assert!(loaded.warning.is_none());
        assert_eq!(loaded.document.tool_usage["read_file"].invocations, 2);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("memory.json");
        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"version\": 1}").unwrap();

        let entries: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"version\": 1}");
    }

    #[test]
    fn corrupt_file_resets_and_is_backed_up() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("memory.json");
        fs::write(&path, "{\"file_access\": [").unwrap();

        let loaded = load_document(&path, true).unwrap();
        assert!(loaded.document.is_empty());
        assert!(matches!(
            loaded.warning,
            Some(MemoryError::StoreCorrupt { .. })
        ));
        assert!(!path.exists(), "corrupt file should have been moved aside");

        let backups = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("corrupt-"))
            .count();
        assert_eq!(backups, 1);
    }

    #[test]
    fn corrupt_file_left_in_place_without_backup() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("memory.json");
        fs::write(&path, "not json").unwrap();

        let loaded = load_document(&path, false).unwrap();
        assert!(loaded.warning.is_some());
        assert!(path.exists());
    }
}
