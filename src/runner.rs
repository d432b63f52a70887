//! Running a pipeline from the command line: sink draining, reporting and
//! resource release.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ff_core::config::RunMode;
use ff_core::{Notification, NotificationStatus, OperationError};
use ff_pipeline::{free_resources, ExecutionContext, ProcessableItem, Processor, Sinks};
use tokio::sync::mpsc;

/// Capacity of the error and notification channels.
const SINK_CAPACITY: usize = 256;

/// What a single run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub output: Vec<ProcessableItem>,
    pub errors: Vec<OperationError>,
    pub notifications: Vec<Notification>,
}

impl RunReport {
    pub fn failed_items(&self) -> usize {
        self.output.iter().filter(|i| i.has_error()).count()
    }

    pub fn skipped(&self) -> usize {
        self.notifications
            .iter()
            .filter(|n| n.status == NotificationStatus::Skipped)
            .count()
    }
}

/// Run `processor` once in the given mode.
///
/// In concurrent mode both sinks are drained on background tasks while the
/// run is in flight. Sequential runs emit no events; a handler failure
/// aborts them with an error after the items it handed back are released.
pub async fn run_once(
    processor: &mut Processor,
    ctx: &dyn ExecutionContext,
    items: Vec<ProcessableItem>,
    mode: RunMode,
) -> Result<RunReport> {
    match mode {
        RunMode::Sequential => {
            let output = match processor.run_sequential(ctx, items).await {
                Ok(output) => output,
                Err(failure) => {
                    release(failure.items);
                    return Err(anyhow::Error::new(failure.cause))
                        .with_context(|| format!("Pipeline '{}' failed", processor.name()));
                }
            };
            Ok(RunReport {
                output,
                ..RunReport::default()
            })
        }
        RunMode::Concurrent => {
            let (sinks, errors_rx, notes_rx) = Sinks::channel(SINK_CAPACITY);
            let errors = tokio::spawn(collect(errors_rx));
            let notifications = tokio::spawn(collect(notes_rx));

            let output = processor
                .run_concurrent(ctx, items, sinks)
                .await
                .with_context(|| format!("Pipeline '{}' failed", processor.name()))?;

            Ok(RunReport {
                output,
                errors: errors.await.context("Error collector panicked")?,
                notifications: notifications
                    .await
                    .context("Notification collector panicked")?,
            })
        }
    }
}

async fn collect<T>(mut rx: mpsc::Receiver<T>) -> Vec<T> {
    let mut collected = Vec::new();
    while let Some(event) = rx.recv().await {
        collected.push(event);
    }
    collected
}

/// Print one line per output item, then any operational errors.
pub fn print_report(report: &RunReport) {
    for item in &report.output {
        match item.error() {
            Some(error) => println!("✗ {} ({}): {}", item.name(), item.path().display(), error),
            None => println!("✓ {} ({})", item.name(), item.path().display()),
        }
    }
    for error in &report.errors {
        eprintln!("error: {}", error);
    }
    println!(
        "\n{} item(s) out, {} failed, {} skipped, {} operational error(s)",
        report.output.len(),
        report.failed_items(),
        report.skipped(),
        report.errors.len()
    );
}

/// Print the report as a single JSON document.
pub fn print_json(report: &RunReport) -> Result<()> {
    let output: Vec<_> = report
        .output
        .iter()
        .map(|item| {
            serde_json::json!({
                "item": item.to_ref(),
                "results": item.results(),
            })
        })
        .collect();
    let errors: Vec<String> = report.errors.iter().map(ToString::to_string).collect();

    let document = serde_json::json!({
        "output": output,
        "errors": errors,
        "notifications": report.notifications,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

/// Release the run's output according to each item's cleanup directive.
pub fn release(output: Vec<ProcessableItem>) {
    let summary = free_resources(output);
    tracing::debug!(
        "Released output: {} kept, {} removed, {} failed",
        summary.kept,
        summary.removed,
        summary.failed
    );
}

/// Run `processor` every `interval` until interrupted (or once).
pub async fn run_worker(
    mut processor: Processor,
    ctx: Arc<dyn ExecutionContext>,
    interval: Duration,
    mode: RunMode,
    once: bool,
) -> Result<()> {
    tracing::info!(
        "Worker started for pipeline '{}' (every {:?}, {:?} mode)",
        processor.name(),
        interval,
        mode
    );

    loop {
        match run_once(&mut processor, ctx.as_ref(), Vec::new(), mode).await {
            Ok(report) => {
                tracing::info!(
                    "Cycle finished: {} item(s), {} failed, {} error(s)",
                    report.output.len(),
                    report.failed_items(),
                    report.errors.len()
                );
                release(report.output);
            }
            Err(e) if once => return Err(e),
            Err(e) => tracing::error!("Cycle failed: {:#}", e),
        }

        if once {
            return Ok(());
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Worker shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
