//! Local filesystem operations: discover files, write copies, remove files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ff_core::{Error, OperationError, Result};
use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::handler::{HandlerError, HandlerResult, OperationHandler, Sinks};
use crate::item::ProcessableItem;
use crate::params::ResolvedParams;

// ---------------------------------------------------------------------------
// filesystem_read
// ---------------------------------------------------------------------------

/// Source operation: appends an item for every file found under `path`.
///
/// `pattern` is a regular expression matched against file names;
/// `recursive` (default false) descends into subdirectories. Incoming items
/// pass through untouched, so this stage runs once per run, even with no
/// input.
#[derive(Debug)]
pub struct FilesystemRead {
    root: PathBuf,
    pattern: Option<Regex>,
    recursive: bool,
}

impl FilesystemRead {
    pub const NAME: &'static str = "filesystem_read";

    pub fn new(root: impl Into<PathBuf>, pattern: Option<Regex>, recursive: bool) -> Self {
        Self {
            root: root.into(),
            pattern,
            recursive,
        }
    }

    pub fn from_params(params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        let root = params.require("path")?;
        let pattern = params
            .optional("pattern")
            .map(Regex::new)
            .transpose()
            .map_err(|e| Error::config(format!("{}: invalid pattern: {e}", Self::NAME)))?;
        let recursive = params.bool("recursive")?.unwrap_or(false);
        Ok(Arc::new(Self::new(root, pattern, recursive)))
    }
}

fn scan(root: &Path, pattern: Option<&Regex>, recursive: bool) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::pipeline(
            FilesystemRead::NAME,
            format!("{} is not a directory", root.display()),
        ));
    }

    let mut walker = WalkDir::new(root).follow_links(true).sort_by_file_name();
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut found = Vec::new();
    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(pattern) = pattern {
            if !pattern.is_match(&entry.file_name().to_string_lossy()) {
                continue;
            }
        }
        found.push(entry.into_path());
    }
    Ok(found)
}

#[async_trait]
impl OperationHandler for FilesystemRead {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn handle(&self, mut items: Vec<ProcessableItem>, _sinks: &Sinks) -> HandlerResult {
        let root = self.root.clone();
        let pattern = self.pattern.clone();
        let recursive = self.recursive;
        let scanned =
            tokio::task::spawn_blocking(move || scan(&root, pattern.as_ref(), recursive)).await;

        match scanned {
            Ok(Ok(paths)) => {
                info!("Discovered {} file(s) in {}", paths.len(), self.root.display());
                items.extend(paths.into_iter().map(ProcessableItem::from_path));
                Ok(items)
            }
            Ok(Err(e)) => Err(HandlerError::new(e, items)),
            Err(e) => Err(HandlerError::new(
                Error::Internal(format!("directory scan failed: {e}")),
                items,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// filesystem_write
// ---------------------------------------------------------------------------

/// Copies each item's file into `path`, named after the item.
#[derive(Debug)]
pub struct FilesystemWrite {
    dir: PathBuf,
}

impl FilesystemWrite {
    pub const NAME: &'static str = "filesystem_write";

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_params(params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        Ok(Arc::new(Self::new(params.require("path")?)))
    }
}

#[async_trait]
impl OperationHandler for FilesystemWrite {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn allows_concurrency(&self) -> bool {
        true
    }

    async fn handle(&self, mut items: Vec<ProcessableItem>, sinks: &Sinks) -> HandlerResult {
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            return Err(HandlerError::new(e.into(), items));
        }

        for item in &mut items {
            let dest = self.dir.join(item.output_file_name());
            match tokio::fs::copy(item.path(), &dest).await {
                Ok(bytes) => {
                    debug!("Wrote {} ({bytes} bytes)", dest.display());
                    item.set_metadata("filesystem_write.path", dest.to_string_lossy().into_owned());
                }
                Err(e) => {
                    let error = OperationError::new(Self::NAME, e.into()).with_item(item.to_ref());
                    sinks.report(error).await;
                }
            }
        }
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// filesystem_remove
// ---------------------------------------------------------------------------

/// Deletes each item's file. A file that is already gone counts as removed.
#[derive(Debug, Default)]
pub struct FilesystemRemove;

impl FilesystemRemove {
    pub const NAME: &'static str = "filesystem_remove";

    pub fn from_params(_params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        Ok(Arc::new(Self))
    }
}

#[async_trait]
impl OperationHandler for FilesystemRemove {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn allows_concurrency(&self) -> bool {
        true
    }

    async fn handle(&self, mut items: Vec<ProcessableItem>, sinks: &Sinks) -> HandlerResult {
        for item in &mut items {
            match tokio::fs::remove_file(item.path()).await {
                Ok(()) => item.set_metadata("filesystem_remove.removed", true),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    item.set_metadata("filesystem_remove.removed", true)
                }
                Err(e) => {
                    let error = OperationError::new(Self::NAME, e.into()).with_item(item.to_ref());
                    sinks.report(error).await;
                }
            }
        }
        Ok(items)
    }
}
