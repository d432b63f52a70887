//! Run an external command once per item.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ff_core::{Error, Result};
use tokio::process::Command;

use crate::handler::{HandlerError, HandlerResult, OperationHandler, Sinks};
use crate::item::{codes, FileResource, ItemError, ProcessableItem};
use crate::params::ResolvedParams;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Runs `command` with `args` for every item.
///
/// Arguments may contain the placeholders `{input}` (the item's file),
/// `{output}` (a fresh temporary file), `{id}` and `{name}`. When `{output}`
/// is used and the command leaves a non-empty file there, it replaces the
/// item's file. A non-zero exit marks the item with `exec_failed`; a command
/// that cannot be found fails the whole invocation.
#[derive(Debug)]
pub struct Exec {
    command: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Exec {
    pub const NAME: &'static str = "exec";

    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Builder: override the per-item timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn from_params(params: &ResolvedParams) -> Result<Arc<dyn OperationHandler>> {
        let command = params.require("command")?;
        let args = match params.optional("args") {
            Some(raw) => parse_args(raw)?,
            None => Vec::new(),
        };
        let timeout = params
            .u64("timeout_secs")?
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs);
        Ok(Arc::new(Self::new(command, args).with_timeout(timeout)))
    }

    fn writes_output(&self) -> bool {
        self.args.iter().any(|a| a.contains("{output}"))
    }

    fn render_args(&self, item: &ProcessableItem, output: &Path) -> Vec<String> {
        let input = item.path().to_string_lossy();
        let output = output.to_string_lossy();
        let id = item.id().to_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{input}", &input)
                    .replace("{output}", &output)
                    .replace("{id}", &id)
                    .replace("{name}", item.name())
            })
            .collect()
    }

    async fn run_one(&self, program: &Path, item: &mut ProcessableItem) -> Result<()> {
        let suffix = item.extension().map(|e| format!(".{e}")).unwrap_or_default();
        let output = tempfile::Builder::new()
            .prefix("fileforge-")
            .suffix(&suffix)
            .tempfile()?
            .into_temp_path();

        let mut cmd = Command::new(program);
        cmd.args(self.render_args(item, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::tool(&self.command, format!("failed to spawn: {e}")))?;

        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;
        let out = match result {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => {
                return Err(Error::tool(
                    &self.command,
                    format!("I/O error waiting for process: {e}"),
                ))
            }
            Err(_elapsed) => {
                return Err(Error::tool(
                    &self.command,
                    format!("timed out after {:?}", self.timeout),
                ))
            }
        };

        if !out.status.success() {
            return Err(Error::tool(
                &self.command,
                format!(
                    "exited with status {}: {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                ),
            ));
        }

        let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
        if !stdout.is_empty() {
            item.set_metadata("exec.stdout", stdout);
        }

        let produced = tokio::fs::metadata(&output)
            .await
            .map(|m| m.len() > 0)
            .unwrap_or(false);
        if self.writes_output() && produced {
            item.replace_file(FileResource::Temp(output), None);
        }
        Ok(())
    }
}

/// Arguments as a JSON array (`["-q", "{input}"]`) or whitespace-separated.
fn parse_args(raw: &str) -> Result<Vec<String>> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        serde_json::from_str(trimmed)
            .map_err(|e| Error::config(format!("{}: invalid args array: {e}", Exec::NAME)))
    } else {
        Ok(trimmed.split_whitespace().map(str::to_string).collect())
    }
}

fn locate(command: &str) -> Result<PathBuf> {
    which::which(command).map_err(|e| Error::tool(command, format!("not found: {e}")))
}

#[async_trait]
impl OperationHandler for Exec {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn allows_concurrency(&self) -> bool {
        true
    }

    async fn handle(&self, mut items: Vec<ProcessableItem>, _sinks: &Sinks) -> HandlerResult {
        let program = match locate(&self.command) {
            Ok(program) => program,
            Err(e) => return Err(HandlerError::new(e, items)),
        };

        for item in &mut items {
            if let Err(e) = self.run_one(&program, item).await {
                item.set_error(ItemError::new(codes::EXEC_FAILED, e.to_string()));
            }
        }
        Ok(items)
    }
}
