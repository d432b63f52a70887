//! Operation parameters and their resolution.
//!
//! A service definition declares each parameter as a [`ParamSource`]: a
//! source kind plus a source string (a literal, a variable name, a path, a
//! key). [`ParamResolver`] turns those into plain strings before a handler is
//! constructed; handlers only ever see [`ResolvedParams`].

use std::collections::BTreeMap;
use std::path::Path;

use ff_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::context::ExecutionContext;

/// Where a parameter's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Value,
    EnvVar,
    File,
    Secret,
    HttpGet,
    HttpPost,
    HttpHeader,
    Etcd,
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSource {
    pub source_type: SourceType,
    pub source: String,
}

impl ParamSource {
    /// A literal value.
    pub fn value(value: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::Value,
            source: value.into(),
        }
    }

    pub fn env_var(name: impl Into<String>) -> Self {
        Self {
            source_type: SourceType::EnvVar,
            source: name.into(),
        }
    }
}

/// Declared parameters of one operation, keyed by parameter name.
pub type Params = BTreeMap<String, ParamSource>;

// ---------------------------------------------------------------------------
// ParamResolver
// ---------------------------------------------------------------------------

/// Resolves declared parameters against an [`ExecutionContext`].
pub struct ParamResolver<'a> {
    ctx: &'a dyn ExecutionContext,
}

impl<'a> ParamResolver<'a> {
    pub fn new(ctx: &'a dyn ExecutionContext) -> Self {
        Self { ctx }
    }

    /// Resolve a single parameter.
    pub async fn resolve(&self, name: &str, param: &ParamSource) -> Result<String> {
        let source = param.source.as_str();
        match param.source_type {
            SourceType::Value => Ok(source.to_string()),
            SourceType::EnvVar => std::env::var(source).map_err(|_| {
                Error::param(name, format!("environment variable {source} is not set"))
            }),
            SourceType::File => read_trimmed(name, Path::new(source)).await,
            SourceType::Secret => {
                if source.is_empty() || source.contains(['/', '\\']) || source == ".." {
                    return Err(Error::param(name, format!("invalid secret name '{source}'")));
                }
                read_trimmed(name, &self.ctx.secrets_dir().join(source)).await
            }
            SourceType::HttpGet => {
                let request = self.request(name)?;
                request.query.get(source).cloned().ok_or_else(|| {
                    Error::param(name, format!("query parameter '{source}' not present"))
                })
            }
            SourceType::HttpPost => {
                let request = self.request(name)?;
                request.form.get(source).cloned().ok_or_else(|| {
                    Error::param(name, format!("form field '{source}' not present"))
                })
            }
            SourceType::HttpHeader => {
                let request = self.request(name)?;
                request
                    .header(source)
                    .map(str::to_string)
                    .ok_or_else(|| Error::param(name, format!("header '{source}' not present")))
            }
            SourceType::Etcd => {
                let kv = self
                    .ctx
                    .kv_store()
                    .ok_or_else(|| Error::param(name, "no key-value store available"))?;
                kv.get(source)
                    .await
                    .map_err(|e| Error::param(name, e.to_string()))?
                    .ok_or_else(|| Error::param(name, format!("key '{source}' not found")))
            }
        }
    }

    /// Resolve every declared parameter of `operation`.
    pub async fn resolve_all(&self, operation: &str, params: &Params) -> Result<ResolvedParams> {
        let mut resolved = ResolvedParams::new(operation);
        for (name, param) in params {
            let value = self.resolve(name, param).await?;
            resolved.values.insert(name.clone(), value);
        }
        Ok(resolved)
    }

    fn request(&self, name: &str) -> Result<&'a crate::context::InboundRequest> {
        self.ctx
            .request()
            .ok_or_else(|| Error::param(name, "no inbound request available"))
    }
}

async fn read_trimmed(name: &str, path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::param(name, format!("failed to read {}: {e}", path.display())))
}

// ---------------------------------------------------------------------------
// ResolvedParams
// ---------------------------------------------------------------------------

/// Parameter values of one operation after resolution, with typed accessors.
#[derive(Debug, Clone, Default)]
pub struct ResolvedParams {
    operation: String,
    values: BTreeMap<String, String>,
}

impl ResolvedParams {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            values: BTreeMap::new(),
        }
    }

    /// Builder: set a value directly.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn optional(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// A value that must be present.
    pub fn require(&self, name: &str) -> Result<&str> {
        self.optional(name)
            .ok_or_else(|| Error::missing_param(&self.operation, name))
    }

    /// A byte size such as `5KB`, `1.5MB` or `2048`.
    pub fn size(&self, name: &str) -> Result<Option<u64>> {
        self.parsed(name, parse_size)
    }

    pub fn u64(&self, name: &str) -> Result<Option<u64>> {
        self.parsed(name, |s| s.trim().parse().ok())
    }

    pub fn bool(&self, name: &str) -> Result<Option<bool>> {
        self.parsed(name, |s| match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        })
    }

    /// A comma-separated list; empty entries are dropped.
    pub fn list(&self, name: &str) -> Vec<String> {
        self.optional(name)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn parsed<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Result<Option<T>> {
        match self.optional(name) {
            None => Ok(None),
            Some(raw) => parse(raw).map(Some).ok_or_else(|| {
                Error::config(format!(
                    "operation '{}': invalid value '{raw}' for parameter '{name}'",
                    self.operation
                ))
            }),
        }
    }
}

/// Parse a human-readable byte size. Units are binary (`1KB` = 1024 bytes).
pub fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: f64 = number.parse().ok()?;
    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1 << 10,
        "M" | "MB" | "MIB" => 1 << 20,
        "G" | "GB" | "GIB" => 1 << 30,
        _ => return None,
    };
    if number < 0.0 {
        return None;
    }
    Some((number * multiplier as f64).round() as u64)
}
