//! The unit of work flowing through a pipeline.
//!
//! A [`ProcessableItem`] exclusively owns one file resource at a time, carries
//! at most one terminal [`ItemError`], arbitrary per-operation result
//! metadata, and a [`CleanupDirective`] that is applied when the caller
//! releases the run's output with [`free_resources`].

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use ff_core::{ItemId, ItemRef};
use serde::{Deserialize, Serialize};
use tempfile::TempPath;

/// Well-known terminal error codes set by the built-in operations.
pub mod codes {
    pub const FILE_TOO_BIG: &str = "file_too_big";
    pub const FILE_TOO_SMALL: &str = "file_too_small";
    pub const TYPE_NOT_ALLOWED: &str = "type_not_allowed";
    pub const FILE_TOO_OLD: &str = "file_too_old";
    pub const FILE_TOO_NEW: &str = "file_too_new";
    pub const EXEC_FAILED: &str = "exec_failed";
    pub const CONVERT_FAILED: &str = "convert_failed";
    pub const IO_ERROR: &str = "io_error";
}

// ---------------------------------------------------------------------------
// ItemError
// ---------------------------------------------------------------------------

/// A processing verdict on a single item. Once set it is never replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub code: String,
    pub message: String,
}

impl ItemError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

// ---------------------------------------------------------------------------
// CleanupDirective / FileResource
// ---------------------------------------------------------------------------

/// What to do with an item's file when the caller frees the run's resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupDirective {
    Keep,
    Remove,
}

/// The file an item owns.
#[derive(Debug)]
pub enum FileResource {
    /// A file that existed before the run (handed in or discovered on disk).
    Local(PathBuf),
    /// A file created by an operation; deleted on drop unless kept.
    Temp(TempPath),
}

impl FileResource {
    pub fn path(&self) -> &Path {
        match self {
            FileResource::Local(path) => path.as_path(),
            FileResource::Temp(temp) => &**temp,
        }
    }

    /// Apply a cleanup directive, consuming the resource.
    ///
    /// A file that is already gone counts as removed.
    pub fn release(self, directive: CleanupDirective) -> std::io::Result<()> {
        match (self, directive) {
            (FileResource::Local(_), CleanupDirective::Keep) => Ok(()),
            (FileResource::Temp(temp), CleanupDirective::Keep) => {
                temp.keep().map(|_| ()).map_err(|e| e.error)
            }
            (FileResource::Local(path), CleanupDirective::Remove) => {
                match std::fs::remove_file(&path) {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                    _ => Ok(()),
                }
            }
            (FileResource::Temp(temp), CleanupDirective::Remove) => match temp.close() {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// ProcessableItem
// ---------------------------------------------------------------------------

/// A file in flight through a pipeline.
#[derive(Debug)]
pub struct ProcessableItem {
    id: ItemId,
    file: FileResource,
    name: String,
    results: HashMap<String, serde_json::Value>,
    error: Option<ItemError>,
    cleanup: Option<CleanupDirective>,
    preserve_original: bool,
    original: Option<Box<ProcessableItem>>,
}

impl ProcessableItem {
    /// Create an item owning `file`, remembering `name` as its original filename.
    pub fn new(name: impl Into<String>, file: FileResource) -> Self {
        Self {
            id: ItemId::new(),
            file,
            name: name.into(),
            results: HashMap::new(),
            error: None,
            cleanup: None,
            preserve_original: false,
            original: None,
        }
    }

    /// Create an item for an existing file on disk.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(name, FileResource::Local(path))
    }

    /// Builder: snapshot the item before each file replacement.
    pub fn with_preserve_original(mut self, preserve: bool) -> Self {
        self.preserve_original = preserve;
        self
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    /// The original filename.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn file(&self) -> &FileResource {
        &self.file
    }

    /// Lowercased extension of the original filename, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    /// A storage-safe filename derived from the item id, keeping the original
    /// extension.
    pub fn output_file_name(&self) -> String {
        match self.extension() {
            Some(ext) => format!("{}.{ext}", self.id.storage_safe()),
            None => self.id.storage_safe(),
        }
    }

    pub fn error(&self) -> Option<&ItemError> {
        self.error.as_ref()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Set the terminal error. The first error wins; returns `false` if one
    /// was already set.
    pub fn set_error(&mut self, error: ItemError) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(error);
        true
    }

    pub fn cleanup(&self) -> Option<CleanupDirective> {
        self.cleanup
    }

    /// Set the cleanup directive. The first setter wins; returns `false` if
    /// one was already set.
    pub fn set_cleanup(&mut self, directive: CleanupDirective) -> bool {
        if self.cleanup.is_some() {
            return false;
        }
        self.cleanup = Some(directive);
        true
    }

    pub fn metadata(&self, key: &str) -> Option<&serde_json::Value> {
        self.results.get(key)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.results.insert(key.into(), value.into());
    }

    pub fn results(&self) -> &HashMap<String, serde_json::Value> {
        &self.results
    }

    pub fn preserve_original(&self) -> bool {
        self.preserve_original
    }

    pub fn set_preserve_original(&mut self, preserve: bool) {
        self.preserve_original = preserve;
    }

    /// The item's state before its most recent file replacement, if it was
    /// preserved.
    pub fn original(&self) -> Option<&ProcessableItem> {
        self.original.as_deref()
    }

    /// Replace the underlying file, optionally renaming the item.
    ///
    /// When `preserve_original` is set, the current state (including the old
    /// file) is moved into a snapshot reachable through [`original`](Self::original);
    /// otherwise the old file resource is dropped.
    pub fn replace_file(&mut self, file: FileResource, name: Option<String>) {
        let previous = std::mem::replace(&mut self.file, file);
        if self.preserve_original {
            let snapshot = ProcessableItem {
                id: self.id,
                file: previous,
                name: self.name.clone(),
                results: self.results.clone(),
                error: self.error.clone(),
                cleanup: self.cleanup,
                preserve_original: false,
                original: self.original.take(),
            };
            self.original = Some(Box::new(snapshot));
        }
        if let Some(name) = name {
            self.name = name;
        }
    }

    /// A cloneable description for notifications and error reports.
    pub fn to_ref(&self) -> ItemRef {
        ItemRef {
            id: self.id,
            name: self.name.clone(),
            path: self.path().to_path_buf(),
            error: self.error.as_ref().map(|e| e.code.clone()),
        }
    }

    /// Apply this item's cleanup directive (unset means keep), including any
    /// preserved snapshots.
    ///
    /// The current file is always released, even when a snapshot fails; the
    /// first error is returned.
    pub fn release(self) -> std::io::Result<CleanupDirective> {
        let directive = self.cleanup.unwrap_or(CleanupDirective::Keep);
        let current = self.file.release(directive);
        let snapshot = match self.original {
            Some(original) => original.release().map(|_| ()),
            None => Ok(()),
        };
        current.and(snapshot)?;
        Ok(directive)
    }
}

// ---------------------------------------------------------------------------
// free_resources
// ---------------------------------------------------------------------------

/// Outcome of [`free_resources`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReleaseSummary {
    pub kept: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Release every item's file according to its cleanup directive.
///
/// Failures are logged and counted; they never stop the remaining items from
/// being released.
pub fn free_resources(items: Vec<ProcessableItem>) -> ReleaseSummary {
    let mut summary = ReleaseSummary::default();
    for item in items {
        let id = item.id();
        match item.release() {
            Ok(CleanupDirective::Keep) => summary.kept += 1,
            Ok(CleanupDirective::Remove) => summary.removed += 1,
            Err(e) => {
                tracing::warn!("Failed to release item {id}: {e}");
                summary.failed += 1;
            }
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn temp_item(dir: &Path, name: &str) -> ProcessableItem {
        let path = dir.join(name);
        std::fs::write(&path, b"data").unwrap();
        ProcessableItem::from_path(path)
    }

    #[test]
    fn from_path_uses_file_name() {
        let item = ProcessableItem::from_path("/uploads/Photo.JPG");
        assert_eq!(item.name(), "Photo.JPG");
        assert_eq!(item.extension().as_deref(), Some("jpg"));
        assert_eq!(item.path(), Path::new("/uploads/Photo.JPG"));
    }

    #[test]
    fn output_file_name_is_id_derived() {
        let item = ProcessableItem::from_path("/uploads/report.final.pdf");
        let name = item.output_file_name();
        assert_eq!(name, format!("{}.pdf", item.id().storage_safe()));

        let bare = ProcessableItem::from_path("/uploads/README");
        assert_eq!(bare.output_file_name(), bare.id().storage_safe());
    }

    #[test]
    fn terminal_error_is_sticky() {
        let mut item = ProcessableItem::from_path("/tmp/a.bin");
        assert!(item.set_error(ItemError::new(codes::FILE_TOO_BIG, "too big")));
        assert!(!item.set_error(ItemError::new(codes::TYPE_NOT_ALLOWED, "bad type")));
        assert_eq!(item.error().unwrap().code, codes::FILE_TOO_BIG);
        assert_eq!(item.to_ref().error.as_deref(), Some(codes::FILE_TOO_BIG));
    }

    #[test]
    fn cleanup_first_setter_wins() {
        let mut item = ProcessableItem::from_path("/tmp/a.bin");
        assert_eq!(item.cleanup(), None);
        assert!(item.set_cleanup(CleanupDirective::Remove));
        assert!(!item.set_cleanup(CleanupDirective::Keep));
        assert_eq!(item.cleanup(), Some(CleanupDirective::Remove));
    }

    #[test]
    fn replace_without_preserve_drops_old_state() {
        let dir = tempdir().unwrap();
        let mut item = temp_item(dir.path(), "in.png");
        let replacement = dir.path().join("out.webp");
        std::fs::write(&replacement, b"converted").unwrap();

        item.replace_file(FileResource::Local(replacement.clone()), Some("in.webp".into()));
        assert_eq!(item.path(), replacement);
        assert_eq!(item.name(), "in.webp");
        assert!(item.original().is_none());
    }

    #[test]
    fn replace_with_preserve_snapshots_previous_state() {
        let dir = tempdir().unwrap();
        let mut item = temp_item(dir.path(), "in.png").with_preserve_original(true);
        let before = item.path().to_path_buf();
        item.set_metadata("size_validate.size", 4);

        let replacement = dir.path().join("out.webp");
        std::fs::write(&replacement, b"converted").unwrap();
        item.replace_file(FileResource::Local(replacement), Some("in.webp".into()));

        let original = item.original().expect("snapshot");
        assert_eq!(original.id(), item.id());
        assert_eq!(original.path(), before);
        assert_eq!(original.name(), "in.png");
        assert_eq!(original.metadata("size_validate.size"), Some(&serde_json::json!(4)));
    }

    #[test]
    fn release_applies_directive() {
        let dir = tempdir().unwrap();
        let keep = temp_item(dir.path(), "keep.txt");
        let mut remove = temp_item(dir.path(), "remove.txt");
        remove.set_cleanup(CleanupDirective::Remove);
        let keep_path = keep.path().to_path_buf();
        let remove_path = remove.path().to_path_buf();

        let summary = free_resources(vec![keep, remove]);
        assert_eq!(
            summary,
            ReleaseSummary {
                kept: 1,
                removed: 1,
                failed: 0
            }
        );
        assert!(keep_path.exists());
        assert!(!remove_path.exists());
    }

    #[test]
    fn release_temp_keep_persists_file() {
        let temp = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        let path = temp.to_path_buf();
        let mut item = ProcessableItem::new("out.bin", FileResource::Temp(temp));
        item.set_cleanup(CleanupDirective::Keep);
        item.release().unwrap();
        assert!(path.exists());
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn release_removes_preserved_snapshot() {
        let dir = tempdir().unwrap();
        let mut item = temp_item(dir.path(), "in.png").with_preserve_original(true);
        let before = item.path().to_path_buf();
        item.set_cleanup(CleanupDirective::Remove);
        let converted = dir.path().join("in.webp");
        std::fs::write(&converted, b"converted").unwrap();
        item.replace_file(FileResource::Local(converted.clone()), None);

        assert_eq!(item.release().unwrap(), CleanupDirective::Remove);
        assert!(!before.exists());
        assert!(!converted.exists());
    }

    #[test]
    fn failed_snapshot_still_releases_current_file() {
        let dir = tempdir().unwrap();
        // Removing a directory as a file fails.
        let unremovable = dir.path().join("subdir");
        std::fs::create_dir(&unremovable).unwrap();
        let mut item = ProcessableItem::from_path(&unremovable).with_preserve_original(true);
        item.set_cleanup(CleanupDirective::Remove);

        let converted = dir.path().join("converted.bin");
        std::fs::write(&converted, b"converted").unwrap();
        item.replace_file(FileResource::Local(converted.clone()), None);

        assert!(item.release().is_err());
        assert!(!converted.exists());
        assert!(unremovable.exists());
    }

    #[test]
    fn release_missing_file_is_not_an_error() {
        let mut item = ProcessableItem::from_path("/nonexistent/fileforge/gone.txt");
        item.set_cleanup(CleanupDirective::Remove);
        assert!(item.release().is_ok());
    }
}
