//! Validation operations: size, content type and modification time.
//!
//! Validators never change files. A file that fails a check gets a terminal
//! error on its item and continues downstream, where the default routing
//! policy keeps it away from later handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ff_core::{Error, Result};
use image::ImageFormat;
use tokio::io::AsyncReadExt;

use crate::handler::{HandlerResult, OperationHandler, Sinks};
use crate::item::{codes, ItemError, ProcessableItem};
use crate::params::ResolvedParams;

/// Bytes inspected when sniffing a file's content type.
const SNIFF_LEN: usize = 512;

const OCTET_STREAM: &str = "application/octet-stream";

fn stat_error(item: &ProcessableItem, e: &std::io::Error) -> ItemError {
    ItemError::new(
        codes::IO_ERROR,
        format!("cannot read {}: {e}", item.path().display()),
    )
}

// ---------------------------------------------------------------------------
// size_validate
// ---------------------------------------------------------------------------

/// Rejects files larger than `max` or smaller than `min` (e.g. `5MB`).
#[derive(Debug)]
pub struct SizeValidate {
    max: Option<u64>,
    min: Option<u64>,
}

impl SizeValidate {
    pub const NAME: &'static str = "size_validate";

    pub fn new(max: Option<u64>, min: Option<u64>) -> Self {
        Self { max, min }
    }

    pub fn from_params(params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        let max = params.size("max")?;
        let min = params.size("min")?;
        if max.is_none() && min.is_none() {
            return Err(Error::missing_param(params.operation(), "max"));
        }
        Ok(Arc::new(Self::new(max, min)))
    }

    fn check(&self, size: u64) -> Option<ItemError> {
        if let Some(max) = self.max {
            if size > max {
                return Some(ItemError::new(
                    codes::FILE_TOO_BIG,
                    format!("{size} bytes exceeds the {max} byte limit"),
                ));
            }
        }
        if let Some(min) = self.min {
            if size < min {
                return Some(ItemError::new(
                    codes::FILE_TOO_SMALL,
                    format!("{size} bytes is below the {min} byte minimum"),
                ));
            }
        }
        None
    }
}

#[async_trait]
impl OperationHandler for SizeValidate {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn allows_concurrency(&self) -> bool {
        true
    }

    async fn handle(&self, mut items: Vec<ProcessableItem>, _sinks: &Sinks) -> HandlerResult {
        for item in &mut items {
            if item.has_error() {
                continue;
            }
            match tokio::fs::metadata(item.path()).await {
                Ok(meta) => {
                    let size = meta.len();
                    item.set_metadata("size_validate.size", size);
                    if let Some(error) = self.check(size) {
                        item.set_error(error);
                    }
                }
                Err(e) => {
                    let error = stat_error(item, &e);
                    item.set_error(error);
                }
            }
        }
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// type_validate
// ---------------------------------------------------------------------------

/// Rejects files whose sniffed content type is not in `allowed`.
///
/// `allowed` is a comma-separated list of MIME types; `image/*` style
/// wildcards match a whole top-level type.
#[derive(Debug)]
pub struct TypeValidate {
    allowed: Vec<String>,
}

impl TypeValidate {
    pub const NAME: &'static str = "type_validate";

    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    pub fn from_params(params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        let allowed = params.list("allowed");
        if allowed.is_empty() {
            return Err(Error::missing_param(params.operation(), "allowed"));
        }
        Ok(Arc::new(Self::new(allowed)))
    }

    fn is_allowed(&self, mime: &str) -> bool {
        let top_level = mime.split('/').next().unwrap_or_default();
        self.allowed.iter().any(|pattern| {
            pattern == "*/*"
                || pattern.eq_ignore_ascii_case(mime)
                || pattern
                    .strip_suffix("/*")
                    .is_some_and(|prefix| prefix.eq_ignore_ascii_case(top_level))
        })
    }
}

/// Best-effort content type from the file's leading bytes, falling back to
/// its extension.
pub(crate) async fn sniff_mime(path: &Path) -> std::io::Result<&'static str> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buf = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    let format = image::guess_format(&buf[..filled])
        .ok()
        .or_else(|| ImageFormat::from_path(path).ok());
    Ok(format.map_or(OCTET_STREAM, |f| f.to_mime_type()))
}

#[async_trait]
impl OperationHandler for TypeValidate {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn allows_concurrency(&self) -> bool {
        true
    }

    async fn handle(&self, mut items: Vec<ProcessableItem>, _sinks: &Sinks) -> HandlerResult {
        for item in &mut items {
            if item.has_error() {
                continue;
            }
            match sniff_mime(item.path()).await {
                Ok(mime) => {
                    item.set_metadata("type_validate.mime", mime);
                    if !self.is_allowed(mime) {
                        item.set_error(ItemError::new(
                            codes::TYPE_NOT_ALLOWED,
                            format!("content type {mime} is not allowed"),
                        ));
                    }
                }
                Err(e) => {
                    let error = stat_error(item, &e);
                    item.set_error(error);
                }
            }
        }
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// time_validate
// ---------------------------------------------------------------------------

/// Rejects files modified longer ago than `max_age_secs` or more recently
/// than `min_age_secs`.
#[derive(Debug)]
pub struct TimeValidate {
    max_age: Option<Duration>,
    min_age: Option<Duration>,
}

impl TimeValidate {
    pub const NAME: &'static str = "time_validate";

    pub fn new(max_age: Option<Duration>, min_age: Option<Duration>) -> Self {
        Self { max_age, min_age }
    }

    pub fn from_params(params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        let max_age = params.u64("max_age_secs")?.map(Duration::from_secs);
        let min_age = params.u64("min_age_secs")?.map(Duration::from_secs);
        if max_age.is_none() && min_age.is_none() {
            return Err(Error::missing_param(params.operation(), "max_age_secs"));
        }
        Ok(Arc::new(Self::new(max_age, min_age)))
    }

    fn check(&self, age: Duration) -> Option<ItemError> {
        if let Some(max) = self.max_age {
            if age > max {
                return Some(ItemError::new(
                    codes::FILE_TOO_OLD,
                    format!("modified {}s ago, limit is {}s", age.as_secs(), max.as_secs()),
                ));
            }
        }
        if let Some(min) = self.min_age {
            if age < min {
                return Some(ItemError::new(
                    codes::FILE_TOO_NEW,
                    format!("modified {}s ago, minimum is {}s", age.as_secs(), min.as_secs()),
                ));
            }
        }
        None
    }
}

#[async_trait]
impl OperationHandler for TimeValidate {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn allows_concurrency(&self) -> bool {
        true
    }

    async fn handle(&self, mut items: Vec<ProcessableItem>, _sinks: &Sinks) -> HandlerResult {
        let now = SystemTime::now();
        for item in &mut items {
            if item.has_error() {
                continue;
            }
            let modified = match tokio::fs::metadata(item.path()).await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    let error = stat_error(item, &e);
                    item.set_error(error);
                    continue;
                }
            };
            let stamp: DateTime<Utc> = modified.into();
            item.set_metadata("time_validate.modified", stamp.to_rfc3339());

            // Clock skew can put mtime in the future; treat that as age zero.
            let age = now.duration_since(modified).unwrap_or_default();
            if let Some(error) = self.check(age) {
                item.set_error(error);
            }
        }
        Ok(items)
    }
}
