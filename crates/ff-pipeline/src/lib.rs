//! # ff-pipeline
//!
//! The file-processing pipeline engine.
//!
//! This crate provides:
//!
//! - **[`ProcessableItem`]** -- a file in flight, with its terminal error,
//!   result metadata and cleanup directive.
//! - **[`OperationHandler`]** trait -- the work behind one named stage, plus
//!   the [`Sinks`] it reports errors and notifications on.
//! - **[`ParamResolver`]** -- resolves declared parameters (literal, env var,
//!   file, secret, request fields, key-value store) against an
//!   [`ExecutionContext`].
//! - **[`Processor`]** -- an ordered list of [`Operation`]s that runs either
//!   sequentially or with every stage active at once.
//! - **Built-in handlers** ([`handlers`]) -- validation, image conversion,
//!   filesystem I/O, external commands.
//! - **[`ServiceRegistry`]** -- loads service definitions and runs their
//!   pipelines by name.

pub mod context;
pub mod factory;
pub mod handler;
pub mod handlers;
pub mod item;
pub mod params;
pub mod processor;
mod scheduler;
pub mod service;
pub mod stage;

// Re-export key types at the crate root.
pub use context::{ExecutionContext, InboundRequest, KeyValueStore, LocalContext, RequestContext};
pub use factory::HandlerRegistry;
pub use handler::{HandlerError, HandlerResult, OperationHandler, Sinks};
pub use item::{free_resources, CleanupDirective, FileResource, ItemError, ProcessableItem};
pub use params::{ParamResolver, ParamSource, ResolvedParams, SourceType};
pub use processor::{Processor, RunFailure, SequentialResult};
pub use service::{PipelineDefinition, Service, ServiceDefinition, ServiceRegistry};
pub use stage::{CleanupPolicy, Operation, OperationDecl, TargetFiles};
