//! Image operations: format conversion and metadata stripping.
//!
//! Both decode the whole image and encode it again into a temporary file
//! that replaces the item's file. Decoding and encoding run on the blocking
//! pool.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ff_core::{Error, Result};
use image::{DynamicImage, ImageFormat};
use tempfile::TempPath;

use crate::handler::{HandlerResult, OperationHandler, Sinks};
use crate::item::{codes, FileResource, ItemError, ProcessableItem};
use crate::params::ResolvedParams;

/// Decode `input` and encode it as `target`, or as its own format when
/// `target` is `None`. Re-encoding drops EXIF and other ancillary metadata.
fn reencode(input: &Path, target: Option<ImageFormat>) -> Result<(TempPath, ImageFormat)> {
    let data = std::fs::read(input)?;
    let source = image::guess_format(&data).map_err(|e| Error::Image(e.to_string()))?;
    let img = image::load_from_memory_with_format(&data, source)
        .map_err(|e| Error::Image(format!("failed to decode {}: {e}", input.display())))?;
    let format = target.unwrap_or(source);

    // JPEG has no alpha channel.
    let img = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()),
        _ => img,
    };

    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, format)
        .map_err(|e| Error::Image(format!("failed to encode as {format:?}: {e}")))?;

    let temp = tempfile::Builder::new()
        .prefix("fileforge-")
        .suffix(&format!(".{}", extension_of(format)))
        .tempfile()?
        .into_temp_path();
    std::fs::write(&temp, buf.into_inner())?;
    Ok((temp, format))
}

fn extension_of(format: ImageFormat) -> &'static str {
    format.extensions_str().first().copied().unwrap_or("img")
}

async fn reencode_blocking(
    input: PathBuf,
    target: Option<ImageFormat>,
) -> Result<(TempPath, ImageFormat)> {
    tokio::task::spawn_blocking(move || reencode(&input, target))
        .await
        .map_err(|e| Error::Internal(format!("image task failed: {e}")))?
}

// ---------------------------------------------------------------------------
// image_convert
// ---------------------------------------------------------------------------

/// Converts images to `format` (an extension such as `png`, `jpg`, `webp`).
///
/// The item is renamed to the new extension. With `preserve_original` the
/// pre-conversion file stays reachable through the item's original snapshot.
#[derive(Debug)]
pub struct ImageConvert {
    format: ImageFormat,
    preserve_original: bool,
}

impl ImageConvert {
    pub const NAME: &'static str = "image_convert";

    pub fn new(format: ImageFormat, preserve_original: bool) -> Self {
        Self {
            format,
            preserve_original,
        }
    }

    pub fn from_params(params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        let raw = params.require("format")?;
        let format = ImageFormat::from_extension(raw.trim().to_ascii_lowercase())
            .ok_or_else(|| Error::config(format!("{}: unsupported image format '{raw}'", Self::NAME)))?;
        let preserve_original = params.bool("preserve_original")?.unwrap_or(false);
        Ok(Arc::new(Self::new(format, preserve_original)))
    }

    async fn convert(&self, item: &mut ProcessableItem) -> Result<()> {
        let (temp, format) = reencode_blocking(item.path().to_path_buf(), Some(self.format)).await?;
        let extension = extension_of(format);
        let name = Path::new(item.name())
            .with_extension(extension)
            .to_string_lossy()
            .into_owned();

        if self.preserve_original {
            item.set_preserve_original(true);
        }
        item.replace_file(FileResource::Temp(temp), Some(name));
        item.set_metadata("image_convert.format", extension);
        Ok(())
    }
}

#[async_trait]
impl OperationHandler for ImageConvert {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn allows_concurrency(&self) -> bool {
        true
    }

    async fn handle(&self, mut items: Vec<ProcessableItem>, _sinks: &Sinks) -> HandlerResult {
        for item in &mut items {
            if let Err(e) = self.convert(item).await {
                item.set_error(ItemError::new(codes::CONVERT_FAILED, e.to_string()));
            }
        }
        Ok(items)
    }
}

// ---------------------------------------------------------------------------
// strip_metadata
// ---------------------------------------------------------------------------

/// Removes embedded metadata (EXIF, text chunks) by re-encoding the image in
/// its own format.
#[derive(Debug, Default)]
pub struct StripMetadata;

impl StripMetadata {
    pub const NAME: &'static str = "strip_metadata";

    pub fn from_params(_params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        Ok(Arc::new(Self))
    }
}

#[async_trait]
impl OperationHandler for StripMetadata {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn allows_concurrency(&self) -> bool {
        true
    }

    async fn handle(&self, mut items: Vec<ProcessableItem>, _sinks: &Sinks) -> HandlerResult {
        for item in &mut items {
            match reencode_blocking(item.path().to_path_buf(), None).await {
                Ok((temp, _)) => {
                    item.replace_file(FileResource::Temp(temp), None);
                    item.set_metadata("strip_metadata.stripped", true);
                }
                Err(e) => {
                    item.set_error(ItemError::new(codes::CONVERT_FAILED, e.to_string()));
                }
            }
        }
        Ok(items)
    }
}
