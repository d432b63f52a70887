//! Built-in operations.

mod exec;
mod filesystem;
mod forget;
mod images;
mod validate;

pub use exec::Exec;
pub use filesystem::{FilesystemRead, FilesystemRemove, FilesystemWrite};
pub use forget::Forget;
pub use images::{ImageConvert, StripMetadata};
pub use validate::{SizeValidate, TimeValidate, TypeValidate};

use crate::factory::HandlerRegistry;

pub(crate) fn register_builtins(registry: &mut HandlerRegistry) {
    registry.register(SizeValidate::NAME, SizeValidate::from_params);
    registry.register(TypeValidate::NAME, TypeValidate::from_params);
    registry.register(TimeValidate::NAME, TimeValidate::from_params);
    registry.register(ImageConvert::NAME, ImageConvert::from_params);
    registry.register(StripMetadata::NAME, StripMetadata::from_params);
    registry.register(FilesystemRead::NAME, FilesystemRead::from_params);
    registry.register(FilesystemWrite::NAME, FilesystemWrite::from_params);
    registry.register(FilesystemRemove::NAME, FilesystemRemove::from_params);
    registry.register(Exec::NAME, Exec::from_params);
    registry.register(Forget::NAME, Forget::from_params);
}
