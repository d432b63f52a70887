//! Concurrent execution of an initialized pipeline.
//!
//! Every stage gets a driver task for the lifetime of the run. A stage whose
//! handler allows concurrency takes items off its queue one at a time and
//! spawns a unit of work per item; any other stage waits for its predecessor
//! to complete and then processes its whole queue as one unit. Completion is
//! derived from each stage's counters: a stage is done once its predecessor
//! is done and everything it received has been accounted for.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use ff_core::{Error, ItemRef, Notification, NotificationStatus, OperationError};
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::handler::{OperationHandler, Sinks};
use crate::item::ProcessableItem;
use crate::stage::{CleanupPolicy, StagePhase, StageRuntime, TargetFiles};

/// Everything one stage needs while a run is in flight.
pub(crate) struct StageWorker {
    pub(crate) name: String,
    pub(crate) target_files: TargetFiles,
    pub(crate) cleanup_policy: CleanupPolicy,
    pub(crate) handler: Arc<dyn OperationHandler>,
    pub(crate) runtime: Arc<StageRuntime>,
    pub(crate) prev: Option<Arc<StageRuntime>>,
    pub(crate) next: Option<Arc<StageRuntime>>,
    pub(crate) output: mpsc::UnboundedSender<ProcessableItem>,
    pub(crate) sinks: Sinks,
}

/// Drive every stage to completion and collect what the last stage emitted.
pub(crate) async fn run_stages(
    workers: Vec<Arc<StageWorker>>,
    progress: &watch::Sender<u64>,
    mut output: mpsc::UnboundedReceiver<ProcessableItem>,
) -> Vec<ProcessableItem> {
    let mut drivers = JoinSet::new();
    for worker in workers {
        drivers.spawn(worker.drive(progress.subscribe()));
    }

    while let Some(joined) = drivers.join_next().await {
        if let Err(e) = joined {
            error!("Stage driver failed: {e}");
        }
    }

    // Units of work still holding a sender finish right after their last
    // accounting step; the channel closes once they are gone.
    let mut collected = Vec::new();
    while let Some(item) = output.recv().await {
        collected.push(item);
    }
    collected
}

impl StageWorker {
    async fn drive(self: Arc<Self>, progress: watch::Receiver<u64>) {
        if self.handler.allows_concurrency() {
            self.drive_items(progress).await;
        } else {
            self.drive_batch(progress).await;
        }
        debug!(stage = %self.name, state = ?self.runtime.snapshot(), "Stage completed");
    }

    /// Dequeue and dispatch one item at a time until the stage completes.
    async fn drive_items(self: &Arc<Self>, mut progress: watch::Receiver<u64>) {
        loop {
            progress.borrow_and_update();

            if self.runtime.is_completed() {
                return;
            }

            if self.upstream_exhausted() {
                let untouched = self.runtime.snapshot().phase == StagePhase::Pending;
                if self.runtime.complete() && untouched {
                    debug!(stage = %self.name, "No input will arrive; skipping stage");
                }
                return;
            }

            if let Some(item) = self.runtime.try_dequeue() {
                let unit = Arc::clone(self);
                tokio::spawn(async move { unit.process(vec![item]).await });
                continue;
            }

            if self.runtime.try_complete(self.prev.as_deref()) {
                return;
            }

            if progress.changed().await.is_err() {
                return;
            }
        }
    }

    /// Wait for the predecessor to complete, then process the whole queue as
    /// a single unit, even when it is empty.
    async fn drive_batch(&self, mut progress: watch::Receiver<u64>) {
        if let Some(prev) = &self.prev {
            loop {
                progress.borrow_and_update();
                if prev.is_completed() {
                    break;
                }
                if progress.changed().await.is_err() {
                    return;
                }
            }
        }

        let batch = self.runtime.drain();
        self.process(batch).await;
        self.runtime.complete();
    }

    /// Whether this stage can never receive (more) input.
    ///
    /// The first stage looks at its own input count; later stages look at
    /// whether their predecessor finished without producing anything.
    fn upstream_exhausted(&self) -> bool {
        match &self.prev {
            None => self.runtime.snapshot().in_count == 0,
            Some(prev) => {
                let prev = prev.snapshot();
                prev.is_completed() && prev.out_count == 0
            }
        }
    }

    /// One unit of work: route, invoke, forward, account, re-check completion.
    async fn process(&self, batch: Vec<ProcessableItem>) {
        let (targeted, skipped): (Vec<_>, Vec<_>) = batch
            .into_iter()
            .partition(|item| self.target_files.targets(item));

        if !skipped.is_empty() {
            for item in &skipped {
                let note = Notification::new(
                    &self.name,
                    NotificationStatus::Skipped,
                    format!("not targeted by {} policy", self.target_files),
                )
                .with_item(item.to_ref());
                self.sinks.notify(note).await;
            }
            let count = skipped.len();
            self.forward(skipped);
            self.runtime.account(count, count);
        }

        if !targeted.is_empty() || !self.handler.allows_concurrency() {
            let consumed = targeted.len();
            let produced = self.invoke(targeted).await;
            let count = produced.len();
            self.forward(produced);
            self.runtime.account(consumed, count);
        }

        if self.runtime.try_complete(self.prev.as_deref()) {
            debug!(stage = %self.name, "Stage input fully accounted for");
        }
    }

    /// Call the handler. Failures are reported, never propagated; whatever
    /// items the handler hands back continue downstream.
    async fn invoke(&self, items: Vec<ProcessableItem>) -> Vec<ProcessableItem> {
        let refs: Vec<ItemRef> = items.iter().map(ProcessableItem::to_ref).collect();
        self.sinks
            .status(
                &self.name,
                NotificationStatus::Started,
                format!("processing {} item(s)", refs.len()),
            )
            .await;

        let outcome = AssertUnwindSafe(self.handler.handle(items, &self.sinks))
            .catch_unwind()
            .await;

        let mut output = match outcome {
            Ok(Ok(items)) => {
                self.sinks
                    .status(
                        &self.name,
                        NotificationStatus::Finished,
                        format!("produced {} item(s)", items.len()),
                    )
                    .await;
                items
            }
            Ok(Err(failure)) => {
                self.sinks
                    .status(&self.name, NotificationStatus::Failed, failure.cause.to_string())
                    .await;
                self.sinks.report(self.operation_error(failure.cause, refs)).await;
                failure.items
            }
            Err(_) => {
                let lost: Vec<String> = refs.iter().map(|r| r.id.to_string()).collect();
                error!(stage = %self.name, lost = ?lost, "Handler panicked; its items are lost");
                self.sinks
                    .status(&self.name, NotificationStatus::Failed, "handler panicked")
                    .await;
                let cause = Error::Internal(format!(
                    "handler '{}' panicked; {} item(s) lost: {}",
                    self.name,
                    lost.len(),
                    lost.join(", ")
                ));
                self.sinks.report(self.operation_error(cause, refs)).await;
                Vec::new()
            }
        };

        let directive = self.cleanup_policy.directive();
        for item in &mut output {
            item.set_cleanup(directive);
        }
        output
    }

    fn operation_error(&self, cause: Error, mut refs: Vec<ItemRef>) -> OperationError {
        let error = OperationError::new(&self.name, cause);
        match refs.len() {
            0 => error,
            1 => match refs.pop() {
                Some(item) => error.with_item(item),
                None => error,
            },
            _ => error.with_batch(refs),
        }
    }

    /// Hand items to the next stage, or to the run's output after the last.
    fn forward(&self, items: Vec<ProcessableItem>) {
        if items.is_empty() {
            return;
        }
        match &self.next {
            Some(next) => next.enqueue(items),
            None => {
                for item in items {
                    if self.output.send(item).is_err() {
                        warn!(stage = %self.name, "Run output receiver dropped; discarding item");
                    }
                }
            }
        }
    }
}
