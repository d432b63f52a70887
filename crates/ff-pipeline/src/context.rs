//! Per-run execution context.
//!
//! The engine only uses the context to build a
//! [`ParamResolver`](crate::params::ParamResolver); it never branches on the
//! kind of context it was given.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

/// Default directory for `secret` parameter sources.
pub const DEFAULT_SECRETS_DIR: &str = "/run/secrets";

/// The inbound request that triggered a run, as seen by parameter sources.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    headers: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Builder: add a header. Header names are case-insensitive.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Builder: add a query-string parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Builder: add a form field.
    pub fn with_form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// A distributed key-value store that parameters can be read from.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> ff_core::Result<Option<String>>;
}

/// An in-process [`KeyValueStore`].
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(key.into(), value.into());
    }
}

#[async_trait]
impl KeyValueStore for MemoryKvStore {
    async fn get(&self, key: &str) -> ff_core::Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }
}

/// Environment supplied to a pipeline run.
pub trait ExecutionContext: Send + Sync {
    /// The request that triggered the run, if any.
    fn request(&self) -> Option<&InboundRequest> {
        None
    }

    /// The key-value store backing `etcd` parameters, if any.
    fn kv_store(&self) -> Option<Arc<dyn KeyValueStore>> {
        None
    }

    /// Directory that `secret` parameters are read from.
    fn secrets_dir(&self) -> &Path;
}

/// Context for runs started locally (CLI, worker loop).
#[derive(Clone)]
pub struct LocalContext {
    secrets_dir: PathBuf,
    kv: Option<Arc<dyn KeyValueStore>>,
}

impl LocalContext {
    pub fn new(secrets_dir: impl Into<PathBuf>) -> Self {
        Self {
            secrets_dir: secrets_dir.into(),
            kv: None,
        }
    }

    /// Builder: attach a key-value store.
    pub fn with_kv_store(mut self, kv: Arc<dyn KeyValueStore>) -> Self {
        self.kv = Some(kv);
        self
    }
}

impl Default for LocalContext {
    fn default() -> Self {
        Self::new(DEFAULT_SECRETS_DIR)
    }
}

impl ExecutionContext for LocalContext {
    fn kv_store(&self) -> Option<Arc<dyn KeyValueStore>> {
        self.kv.clone()
    }

    fn secrets_dir(&self) -> &Path {
        &self.secrets_dir
    }
}

/// Context for runs triggered by an inbound request.
#[derive(Clone)]
pub struct RequestContext {
    request: InboundRequest,
    local: LocalContext,
}

impl RequestContext {
    pub fn new(request: InboundRequest, local: LocalContext) -> Self {
        Self { request, local }
    }
}

impl ExecutionContext for RequestContext {
    fn request(&self) -> Option<&InboundRequest> {
        Some(&self.request)
    }

    fn kv_store(&self) -> Option<Arc<dyn KeyValueStore>> {
        self.local.kv_store()
    }

    fn secrets_dir(&self) -> &Path {
        self.local.secrets_dir()
    }
}
