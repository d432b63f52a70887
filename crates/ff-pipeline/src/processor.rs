//! A named, ordered list of operations and the two ways of running it.

use std::sync::Arc;

use ff_core::{Error, Result, RunId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::factory::HandlerRegistry;
use crate::handler::{HandlerError, OperationHandler, Sinks};
use crate::item::ProcessableItem;
use crate::params::ParamResolver;
use crate::scheduler::{self, StageWorker};
use crate::stage::{Operation, OperationDecl};

/// A sequential run that stopped before its last operation.
///
/// `items` holds what the failing handler handed back, so the caller can
/// still release them. It is empty when the run failed before any handler
/// was invoked.
#[derive(Debug, thiserror::Error)]
#[error("{cause}")]
pub struct RunFailure {
    pub cause: Error,
    pub items: Vec<ProcessableItem>,
}

impl From<Error> for RunFailure {
    fn from(cause: Error) -> Self {
        Self {
            cause,
            items: Vec::new(),
        }
    }
}

/// Result of [`Processor::run_sequential`].
pub type SequentialResult = std::result::Result<Vec<ProcessableItem>, RunFailure>;

/// An executable pipeline.
///
/// Every run starts by re-initializing the operations, so one processor can
/// be run any number of times. Runs take `&mut self`; overlapping runs need
/// separate processors.
pub struct Processor {
    name: String,
    operations: Vec<Operation>,
    handlers: Arc<HandlerRegistry>,
    progress: Arc<watch::Sender<u64>>,
}

impl Processor {
    pub fn new(
        name: impl Into<String>,
        decls: Vec<OperationDecl>,
        handlers: Arc<HandlerRegistry>,
    ) -> Self {
        let (progress, _) = watch::channel(0);
        let progress = Arc::new(progress);
        let operations = decls
            .into_iter()
            .map(|decl| Operation::new(decl, Arc::clone(&progress)))
            .collect();
        Self {
            name: name.into(),
            operations,
            handlers,
            progress,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Prepare every operation for a fresh run.
    ///
    /// Resets runtime state, re-applies policy defaults, resolves parameters
    /// against `ctx`, constructs handlers and links neighbours. Calling it
    /// twice in a row leaves the processor in the same state as calling it
    /// once.
    ///
    /// # Errors
    ///
    /// Configuration errors from parameter resolution or handler
    /// construction (unknown operation, missing parameter).
    pub async fn initialize(&mut self, ctx: &dyn ExecutionContext) -> Result<()> {
        let (progress, _) = watch::channel(0);
        self.progress = Arc::new(progress);

        let last = self.operations.len().saturating_sub(1);
        for (index, op) in self.operations.iter_mut().enumerate() {
            op.reset(Arc::clone(&self.progress));
            op.prev = index.checked_sub(1);
            op.next = (index < last).then_some(index + 1);
        }

        let resolver = ParamResolver::new(ctx);
        for op in &mut self.operations {
            let params = resolver.resolve_all(op.name(), &op.decl.params).await?;
            op.handler = Some(self.handlers.create(op.name(), &params)?);
        }

        debug!(pipeline = %self.name, stages = self.operations.len(), "Initialized pipeline");
        Ok(())
    }

    /// Run each operation to completion, in order, over the whole item set.
    ///
    /// The first handler failure aborts the run. The returned [`RunFailure`]
    /// carries the items the failing handler handed back. No notifications
    /// are emitted.
    pub async fn run_sequential(
        &mut self,
        ctx: &dyn ExecutionContext,
        items: Vec<ProcessableItem>,
    ) -> SequentialResult {
        if self.operations.is_empty() {
            return Ok(Vec::new());
        }
        self.initialize(ctx).await?;

        let run_id = RunId::new();
        info!(pipeline = %self.name, run = %run_id, items = items.len(), "Starting sequential run");

        let sinks = Sinks::disabled();
        self.operations[0].runtime.enqueue(items);

        let mut output = Vec::new();
        for op in &self.operations {
            let handler = initialized_handler(op)?;
            let batch = op.runtime.drain();
            let consumed = batch.len();

            let directive = op.cleanup_policy.directive();
            let mut produced = match handler.handle(batch, &sinks).await {
                Ok(produced) => produced,
                Err(HandlerError { cause, mut items }) => {
                    warn!(
                        pipeline = %self.name,
                        stage = op.name(),
                        partial = items.len(),
                        "Sequential run aborted: {}",
                        cause
                    );
                    for item in &mut items {
                        item.set_cleanup(directive);
                    }
                    return Err(RunFailure { cause, items });
                }
            };

            for item in &mut produced {
                item.set_cleanup(directive);
            }
            op.runtime.account(consumed, produced.len());
            op.runtime.complete();

            match op.next {
                Some(next) => self.operations[next].runtime.enqueue(produced),
                None => output = produced,
            }
        }

        info!(pipeline = %self.name, run = %run_id, output = output.len(), "Sequential run finished");
        Ok(output)
    }

    /// Run all operations at once, streaming items between them.
    ///
    /// Handler failures are reported to `sinks` and never abort the run;
    /// only initialization errors are returned.
    pub async fn run_concurrent(
        &mut self,
        ctx: &dyn ExecutionContext,
        items: Vec<ProcessableItem>,
        sinks: Sinks,
    ) -> Result<Vec<ProcessableItem>> {
        if self.operations.is_empty() {
            return Ok(Vec::new());
        }
        self.initialize(ctx).await?;

        let run_id = RunId::new();
        info!(pipeline = %self.name, run = %run_id, items = items.len(), "Starting concurrent run");

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let workers = self
            .operations
            .iter()
            .map(|op| {
                Ok(Arc::new(StageWorker {
                    name: op.name().to_string(),
                    target_files: op.target_files,
                    cleanup_policy: op.cleanup_policy,
                    handler: initialized_handler(op)?,
                    runtime: Arc::clone(&op.runtime),
                    prev: op.prev.map(|i| Arc::clone(&self.operations[i].runtime)),
                    next: op.next.map(|i| Arc::clone(&self.operations[i].runtime)),
                    output: out_tx.clone(),
                    sinks: sinks.clone(),
                }))
            })
            .collect::<Result<Vec<_>>>()?;
        drop(out_tx);

        self.operations[0].runtime.enqueue(items);
        let output = scheduler::run_stages(workers, &self.progress, out_rx).await;

        info!(pipeline = %self.name, run = %run_id, output = output.len(), "Concurrent run finished");
        Ok(output)
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("name", &self.name)
            .field("operations", &self.operations)
            .finish_non_exhaustive()
    }
}

fn initialized_handler(op: &Operation) -> Result<Arc<dyn OperationHandler>> {
    op.handler
        .clone()
        .ok_or_else(|| Error::Internal(format!("operation '{}' is not initialized", op.name())))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use ff_core::{Notification, NotificationStatus, OperationError};
    use tempfile::TempDir;

    use super::*;
    use crate::context::LocalContext;
    use crate::handler::HandlerResult;
    use crate::item::{CleanupDirective, ItemError};
    use crate::params::ResolvedParams;
    use crate::stage::{CleanupPolicy, StagePhase, TargetFiles};

    /// What a [`Probe`] does with each item it sees.
    #[derive(Clone, Copy)]
    enum Behavior {
        Pass,
        FailItems,
        FailBatch,
        Panic,
        Drop,
    }

    struct Probe {
        name: String,
        concurrent: bool,
        behavior: Behavior,
        calls: Arc<AtomicUsize>,
        seen: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OperationHandler for Probe {
        fn name(&self) -> &str {
            &self.name
        }

        fn allows_concurrency(&self) -> bool {
            self.concurrent
        }

        async fn handle(&self, mut items: Vec<ProcessableItem>, _sinks: &Sinks) -> HandlerResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.fetch_add(items.len(), Ordering::SeqCst);
            tokio::task::yield_now().await;
            match self.behavior {
                Behavior::Pass => Ok(items),
                Behavior::FailItems => {
                    for item in &mut items {
                        item.set_error(ItemError::new("probe_failed", "rejected"));
                    }
                    Ok(items)
                }
                Behavior::FailBatch => Err(HandlerError::new(Error::tool("probe", "boom"), items)),
                Behavior::Panic => panic!("probe panicked"),
                Behavior::Drop => Ok(Vec::new()),
            }
        }
    }

    #[derive(Clone, Default)]
    struct Counters {
        calls: Arc<AtomicUsize>,
        seen: Arc<AtomicUsize>,
    }

    impl Counters {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn seen(&self) -> usize {
            self.seen.load(Ordering::SeqCst)
        }
    }

    fn register_probe(
        registry: &mut HandlerRegistry,
        name: &str,
        concurrent: bool,
        behavior: Behavior,
    ) -> Counters {
        let counters = Counters::default();
        let handle = counters.clone();
        let probe_name = name.to_string();
        registry.register(name, move |_params: &ResolvedParams| {
            Ok(Arc::new(Probe {
                name: probe_name.clone(),
                concurrent,
                behavior,
                calls: Arc::clone(&handle.calls),
                seen: Arc::clone(&handle.seen),
            }) as Arc<dyn OperationHandler>)
        });
        counters
    }

    fn items(n: usize) -> Vec<ProcessableItem> {
        (0..n)
            .map(|i| ProcessableItem::from_path(format!("/tmp/fileforge-test/item-{i}.bin")))
            .collect()
    }

    fn processor(registry: HandlerRegistry, decls: Vec<OperationDecl>) -> Processor {
        Processor::new("test", decls, Arc::new(registry))
    }

    async fn drain_sinks(
        sinks_rx: (mpsc::Receiver<OperationError>, mpsc::Receiver<Notification>),
    ) -> (Vec<OperationError>, Vec<Notification>) {
        let (mut errors_rx, mut notes_rx) = sinks_rx;
        let errors = tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(e) = errors_rx.recv().await {
                out.push(e);
            }
            out
        });
        let notes = tokio::spawn(async move {
            let mut out = Vec::new();
            while let Some(n) = notes_rx.recv().await {
                out.push(n);
            }
            out
        });
        (errors.await.unwrap(), notes.await.unwrap())
    }

    #[tokio::test]
    async fn zero_stages_returns_nothing() {
        let mut p = processor(HandlerRegistry::empty(), vec![]);
        let ctx = LocalContext::default();
        assert!(p.run_sequential(&ctx, items(3)).await.unwrap().is_empty());
        let out = p.run_concurrent(&ctx, items(3), Sinks::disabled()).await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn initialize_links_neighbours_and_is_idempotent() {
        let mut registry = HandlerRegistry::empty();
        for name in ["a", "b", "c"] {
            register_probe(&mut registry, name, true, Behavior::Pass);
        }
        let mut p = processor(
            registry,
            vec![OperationDecl::new("a"), OperationDecl::new("b"), OperationDecl::new("c")],
        );
        let ctx = LocalContext::default();

        for _ in 0..2 {
            p.initialize(&ctx).await.unwrap();
            let links: Vec<_> = p.operations().iter().map(|op| (op.prev(), op.next())).collect();
            assert_eq!(links, vec![(None, Some(1)), (Some(0), Some(2)), (Some(1), None)]);
            for op in p.operations() {
                assert!(op.handler().is_some());
                assert_eq!(op.snapshot(), Default::default());
                assert_eq!(op.target_files(), TargetFiles::WithoutErrors);
                assert_eq!(op.cleanup_policy(), CleanupPolicy::KeepFiles);
            }
        }
    }

    #[tokio::test]
    async fn initialize_resets_state_left_by_a_run() {
        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "a", true, Behavior::Pass);
        let mut p = processor(registry, vec![OperationDecl::new("a")]);
        let ctx = LocalContext::default();

        p.run_concurrent(&ctx, items(2), Sinks::disabled()).await.unwrap();
        let snap = p.operations()[0].snapshot();
        assert_eq!(snap.phase, StagePhase::Completed);
        assert_eq!(snap.out_count, 2);

        p.initialize(&ctx).await.unwrap();
        assert_eq!(p.operations()[0].snapshot(), Default::default());
    }

    #[tokio::test]
    async fn unknown_operation_fails_initialization() {
        let mut p = processor(HandlerRegistry::builtin(), vec![OperationDecl::new("nope")]);
        let err = p
            .run_concurrent(&LocalContext::default(), items(1), Sinks::disabled())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn concurrent_handler_is_called_once_per_item() {
        let mut registry = HandlerRegistry::empty();
        let a = register_probe(&mut registry, "a", true, Behavior::Pass);
        let b = register_probe(&mut registry, "b", true, Behavior::Pass);
        let mut p = processor(registry, vec![OperationDecl::new("a"), OperationDecl::new("b")]);

        let out = p
            .run_concurrent(&LocalContext::default(), items(5), Sinks::disabled())
            .await
            .unwrap();

        assert_eq!(out.len(), 5);
        assert_eq!((a.calls(), a.seen()), (5, 5));
        assert_eq!((b.calls(), b.seen()), (5, 5));
        for op in p.operations() {
            let snap = op.snapshot();
            assert!(snap.is_completed());
            assert_eq!(snap.in_count, 0);
            assert_eq!(snap.out_count, 5);
        }
    }

    #[tokio::test]
    async fn batch_handler_sees_everything_once() {
        let mut registry = HandlerRegistry::empty();
        let a = register_probe(&mut registry, "a", true, Behavior::Pass);
        let batch = register_probe(&mut registry, "batch", false, Behavior::Pass);
        let mut p = processor(registry, vec![OperationDecl::new("a"), OperationDecl::new("batch")]);

        let out = p
            .run_concurrent(&LocalContext::default(), items(4), Sinks::disabled())
            .await
            .unwrap();

        assert_eq!(out.len(), 4);
        assert_eq!(a.calls(), 4);
        assert_eq!((batch.calls(), batch.seen()), (1, 4));
    }

    #[tokio::test]
    async fn batch_stage_runs_with_empty_input() {
        let mut registry = HandlerRegistry::empty();
        let source = register_probe(&mut registry, "source", false, Behavior::Pass);
        let mut p = processor(registry, vec![OperationDecl::new("source")]);

        let out = p
            .run_concurrent(&LocalContext::default(), Vec::new(), Sinks::disabled())
            .await
            .unwrap();

        assert!(out.is_empty());
        assert_eq!((source.calls(), source.seen()), (1, 0));
    }

    #[tokio::test]
    async fn empty_input_skips_concurrent_stages() {
        let mut registry = HandlerRegistry::empty();
        let a = register_probe(&mut registry, "a", true, Behavior::Pass);
        let b = register_probe(&mut registry, "b", true, Behavior::Pass);
        let mut p = processor(registry, vec![OperationDecl::new("a"), OperationDecl::new("b")]);

        let out = p
            .run_concurrent(&LocalContext::default(), Vec::new(), Sinks::disabled())
            .await
            .unwrap();

        assert!(out.is_empty());
        assert_eq!((a.calls(), b.calls()), (0, 0));
        assert!(p.operations().iter().all(|op| op.snapshot().is_completed()));
    }

    #[tokio::test]
    async fn failed_items_skip_later_stages_with_notifications() {
        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "reject", true, Behavior::FailItems);
        let after = register_probe(&mut registry, "after", true, Behavior::Pass);
        let mut p = processor(
            registry,
            vec![OperationDecl::new("reject"), OperationDecl::new("after")],
        );

        let (sinks, errors_rx, notes_rx) = Sinks::channel(64);
        let out = p
            .run_concurrent(&LocalContext::default(), items(3), sinks)
            .await
            .unwrap();
        let (errors, notes) = drain_sinks((errors_rx, notes_rx)).await;

        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|i| i.error().map(|e| e.code.as_str()) == Some("probe_failed")));
        assert_eq!(after.calls(), 0);
        assert!(errors.is_empty());

        let skipped: Vec<_> = notes
            .iter()
            .filter(|n| n.stage == "after" && n.status == NotificationStatus::Skipped)
            .collect();
        assert_eq!(skipped.len(), 3);
        assert!(skipped.iter().all(|n| n.item.is_some()));
    }

    #[tokio::test]
    async fn with_errors_stage_only_sees_failed_items() {
        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "reject", true, Behavior::FailItems);
        let clean = register_probe(&mut registry, "clean", true, Behavior::Pass);
        let failed = register_probe(&mut registry, "failed", true, Behavior::Pass);
        let mut p = processor(
            registry,
            vec![
                OperationDecl::new("reject"),
                OperationDecl::new("clean"),
                OperationDecl::new("failed").target_files(TargetFiles::WithErrors),
            ],
        );

        let out = p
            .run_sequential(&LocalContext::default(), items(2))
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        // Sequential mode hands the whole set to each handler.
        assert_eq!(clean.seen(), 2);
        assert_eq!(failed.seen(), 2);

        let (clean2, failed2) = (clean.seen(), failed.seen());
        p.run_concurrent(&LocalContext::default(), items(2), Sinks::disabled())
            .await
            .unwrap();
        assert_eq!(clean.seen() - clean2, 0);
        assert_eq!(failed.seen() - failed2, 2);
    }

    #[tokio::test]
    async fn handler_failure_is_reported_and_items_continue() {
        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "flaky", true, Behavior::FailBatch);
        let after = register_probe(&mut registry, "after", true, Behavior::Pass);
        let mut p = processor(
            registry,
            vec![OperationDecl::new("flaky"), OperationDecl::new("after")],
        );

        let (sinks, errors_rx, notes_rx) = Sinks::channel(64);
        let out = p
            .run_concurrent(&LocalContext::default(), items(2), sinks)
            .await
            .unwrap();
        let (errors, notes) = drain_sinks((errors_rx, notes_rx)).await;

        assert_eq!(out.len(), 2);
        assert_eq!(after.seen(), 2);
        assert_eq!(errors.len(), 2);
        for error in &errors {
            assert_eq!(error.stage, "flaky");
            assert!(error.item.is_some());
            assert_matches!(error.cause, Error::Tool { .. });
        }
        assert_eq!(
            notes
                .iter()
                .filter(|n| n.stage == "flaky" && n.status == NotificationStatus::Failed)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn sequential_aborts_on_handler_failure() {
        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "flaky", true, Behavior::FailBatch);
        let after = register_probe(&mut registry, "after", true, Behavior::Pass);
        let mut p = processor(
            registry,
            vec![OperationDecl::new("flaky"), OperationDecl::new("after")],
        );

        let failure = p
            .run_sequential(&LocalContext::default(), items(2))
            .await
            .unwrap_err();
        assert_matches!(failure.cause, Error::Tool { .. });
        assert_eq!(after.calls(), 0);
    }

    #[tokio::test]
    async fn sequential_abort_hands_back_partial_items() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("kept.bin");
        std::fs::write(&kept, b"data").unwrap();

        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "flaky", true, Behavior::FailBatch);
        let after = register_probe(&mut registry, "after", true, Behavior::Pass);
        let mut p = processor(
            registry,
            vec![
                OperationDecl::new("flaky").cleanup_policy(CleanupPolicy::RemoveFiles),
                OperationDecl::new("after"),
            ],
        );

        let mut input = items(2);
        input.push(ProcessableItem::from_path(&kept));
        let failure = p
            .run_sequential(&LocalContext::default(), input)
            .await
            .unwrap_err();

        assert_matches!(failure.cause, Error::Tool { .. });
        assert_eq!(after.calls(), 0);
        assert_eq!(failure.items.len(), 3);
        assert!(failure
            .items
            .iter()
            .all(|i| i.cleanup() == Some(CleanupDirective::Remove)));
        assert!(kept.exists(), "items are released by the caller, not the run");
    }

    #[tokio::test]
    async fn sequential_configuration_error_has_no_items() {
        let mut p = processor(HandlerRegistry::builtin(), vec![OperationDecl::new("nope")]);
        let failure = p
            .run_sequential(&LocalContext::default(), items(2))
            .await
            .unwrap_err();
        assert!(failure.cause.is_configuration());
        assert!(failure.items.is_empty());
    }

    #[tokio::test]
    async fn batch_stage_after_empty_stage_still_runs_once() {
        let mut registry = HandlerRegistry::empty();
        let forget = register_probe(&mut registry, "forget", true, Behavior::Drop);
        let batch = register_probe(&mut registry, "batch", false, Behavior::Pass);
        let mut p = processor(
            registry,
            vec![OperationDecl::new("forget"), OperationDecl::new("batch")],
        );

        let out = p
            .run_concurrent(&LocalContext::default(), items(4), Sinks::disabled())
            .await
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(forget.calls(), 4);
        assert_eq!((batch.calls(), batch.seen()), (1, 0));
        assert!(p.operations().iter().all(|op| op.snapshot().is_completed()));
    }

    #[tokio::test]
    async fn panicking_handler_does_not_hang_the_run() {
        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "boom", true, Behavior::Panic);
        let after = register_probe(&mut registry, "after", true, Behavior::Pass);
        let mut p = processor(
            registry,
            vec![OperationDecl::new("boom"), OperationDecl::new("after")],
        );

        let (sinks, errors_rx, notes_rx) = Sinks::channel(64);
        let out = p
            .run_concurrent(&LocalContext::default(), items(2), sinks)
            .await
            .unwrap();
        let (errors, _) = drain_sinks((errors_rx, notes_rx)).await;

        assert!(out.is_empty());
        assert_eq!(after.calls(), 0);
        assert_eq!(errors.len(), 2);
        for error in &errors {
            assert_matches!(error.cause, Error::Internal(_));
            let item = error.item.as_ref().unwrap();
            let message = error.cause.to_string();
            assert!(message.contains("1 item(s) lost"), "got: {message}");
            assert!(message.contains(&item.id.to_string()), "got: {message}");
        }
    }

    #[tokio::test]
    async fn dropping_stage_ends_the_run() {
        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "a", true, Behavior::Pass);
        register_probe(&mut registry, "forget", true, Behavior::Drop);
        let after = register_probe(&mut registry, "after", true, Behavior::Pass);
        let mut p = processor(
            registry,
            vec![
                OperationDecl::new("a"),
                OperationDecl::new("forget"),
                OperationDecl::new("after"),
            ],
        );

        let out = p
            .run_concurrent(&LocalContext::default(), items(3), Sinks::disabled())
            .await
            .unwrap();
        assert!(out.is_empty());
        assert_eq!(after.calls(), 0);
        assert!(p.operations()[2].snapshot().is_completed());
    }

    #[tokio::test]
    async fn cleanup_policy_marks_stage_output() {
        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "a", true, Behavior::Pass);
        register_probe(&mut registry, "b", true, Behavior::Pass);
        let decls = vec![
            OperationDecl::new("a").cleanup_policy(CleanupPolicy::RemoveFiles),
            OperationDecl::new("b"),
        ];
        let mut p = processor(registry, decls);
        let ctx = LocalContext::default();

        let out = p.run_concurrent(&ctx, items(2), Sinks::disabled()).await.unwrap();
        assert!(out.iter().all(|i| i.cleanup() == Some(CleanupDirective::Remove)));

        let out = p.run_sequential(&ctx, items(2)).await.unwrap();
        assert!(out.iter().all(|i| i.cleanup() == Some(CleanupDirective::Remove)));
    }

    #[tokio::test]
    async fn default_cleanup_is_keep() {
        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "a", true, Behavior::Pass);
        let mut p = processor(registry, vec![OperationDecl::new("a")]);
        let out = p
            .run_concurrent(&LocalContext::default(), items(1), Sinks::disabled())
            .await
            .unwrap();
        assert_eq!(out[0].cleanup(), Some(CleanupDirective::Keep));
    }

    #[tokio::test]
    async fn sequential_and_concurrent_agree() {
        let mut registry = HandlerRegistry::empty();
        register_probe(&mut registry, "a", true, Behavior::Pass);
        register_probe(&mut registry, "batch", false, Behavior::Pass);
        register_probe(&mut registry, "b", true, Behavior::Pass);
        let mut p = processor(
            registry,
            vec![
                OperationDecl::new("a"),
                OperationDecl::new("batch"),
                OperationDecl::new("b"),
            ],
        );
        let ctx = LocalContext::default();

        let input = items(6);
        let mut expected: Vec<_> = input.iter().map(|i| i.name().to_string()).collect();
        expected.sort();

        let mut seq: Vec<_> = p
            .run_sequential(&ctx, input)
            .await
            .unwrap()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        seq.sort();

        let mut conc: Vec<_> = p
            .run_concurrent(&ctx, items(6), Sinks::disabled())
            .await
            .unwrap()
            .iter()
            .map(|i| i.name().to_string())
            .collect();
        conc.sort();

        assert_eq!(seq, expected);
        assert_eq!(conc, expected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn many_items_across_threads() {
        let mut registry = HandlerRegistry::empty();
        let a = register_probe(&mut registry, "a", true, Behavior::Pass);
        let batch = register_probe(&mut registry, "batch", false, Behavior::Pass);
        let c = register_probe(&mut registry, "c", true, Behavior::Pass);
        let mut p = processor(
            registry,
            vec![
                OperationDecl::new("a"),
                OperationDecl::new("batch"),
                OperationDecl::new("c"),
            ],
        );

        let out = p
            .run_concurrent(&LocalContext::default(), items(200), Sinks::disabled())
            .await
            .unwrap();
        assert_eq!(out.len(), 200);
        assert_eq!(a.calls(), 200);
        assert_eq!((batch.calls(), batch.seen()), (1, 200));
        assert_eq!(c.calls(), 200);
    }

    #[tokio::test]
    async fn builtin_pipeline_over_real_files() {
        let dir = TempDir::new().unwrap();
        let small = dir.path().join("small.txt");
        let big = dir.path().join("big.txt");
        std::fs::write(&small, vec![b'a'; 10]).unwrap();
        std::fs::write(&big, vec![b'a'; 4096]).unwrap();

        let mut p = processor(
            HandlerRegistry::builtin(),
            vec![OperationDecl::new("size_validate")
                .param("max", crate::params::ParamSource::value("1KB"))],
        );
        let mut out = p
            .run_concurrent(
                &LocalContext::default(),
                vec![
                    ProcessableItem::from_path(&small),
                    ProcessableItem::from_path(&big),
                ],
                Sinks::disabled(),
            )
            .await
            .unwrap();
        out.sort_by(|a, b| a.name().cmp(b.name()));

        assert_eq!(out[0].name(), "big.txt");
        assert_eq!(out[0].error().unwrap().code, "file_too_big");
        assert_eq!(out[1].name(), "small.txt");
        assert!(!out[1].has_error());
    }
}
