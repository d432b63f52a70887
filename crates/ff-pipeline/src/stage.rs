//! One position in a pipeline.
//!
//! An [`Operation`] pairs the static declaration of a stage (handler name,
//! parameters, routing and cleanup policy) with the runtime state a run
//! accumulates: the input queue, progress counters and the completion flag.
//! The runtime state lives behind a single lock per stage and moves through
//! [`StagePhase`]s monotonically.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::handler::OperationHandler;
use crate::item::{CleanupDirective, ProcessableItem};
use crate::params::Params;

// ---------------------------------------------------------------------------
// Policies
// ---------------------------------------------------------------------------

/// Which partition of a stage's input is passed to its handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetFiles {
    All,
    #[default]
    WithoutErrors,
    WithErrors,
}

impl TargetFiles {
    pub fn targets(&self, item: &ProcessableItem) -> bool {
        match self {
            TargetFiles::All => true,
            TargetFiles::WithoutErrors => !item.has_error(),
            TargetFiles::WithErrors => item.has_error(),
        }
    }
}

impl fmt::Display for TargetFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetFiles::All => "all",
            TargetFiles::WithoutErrors => "without_errors",
            TargetFiles::WithErrors => "with_errors",
        };
        f.write_str(s)
    }
}

/// Whether items a stage produced are kept or removed when the caller frees
/// the run's resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    #[default]
    KeepFiles,
    RemoveFiles,
}

impl CleanupPolicy {
    pub fn directive(&self) -> CleanupDirective {
        match self {
            CleanupPolicy::KeepFiles => CleanupDirective::Keep,
            CleanupPolicy::RemoveFiles => CleanupDirective::Remove,
        }
    }
}

// ---------------------------------------------------------------------------
// OperationDecl
// ---------------------------------------------------------------------------

/// A stage as written in a service definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDecl {
    pub name: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_files: Option<TargetFiles>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_policy: Option<CleanupPolicy>,
}

impl OperationDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Params::new(),
            target_files: None,
            cleanup_policy: None,
        }
    }

    /// Builder: add a parameter.
    pub fn param(mut self, name: impl Into<String>, source: crate::params::ParamSource) -> Self {
        self.params.insert(name.into(), source);
        self
    }

    /// Builder: set the target-file policy.
    pub fn target_files(mut self, target: TargetFiles) -> Self {
        self.target_files = Some(target);
        self
    }

    /// Builder: set the cleanup policy.
    pub fn cleanup_policy(mut self, policy: CleanupPolicy) -> Self {
        self.cleanup_policy = Some(policy);
        self
    }
}

// ---------------------------------------------------------------------------
// Runtime state
// ---------------------------------------------------------------------------

/// Lifecycle of a stage within one run. Only ever moves forward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum StagePhase {
    /// Nothing consumed yet.
    #[default]
    Pending,
    /// At least one item or batch has been taken from the queue.
    Draining,
    /// No more input will arrive and all received input is accounted for.
    Completed,
}

/// A point-in-time view of a stage's runtime state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageSnapshot {
    pub queued: usize,
    pub in_count: i64,
    pub out_count: i64,
    pub phase: StagePhase,
}

impl StageSnapshot {
    pub fn is_completed(&self) -> bool {
        self.phase == StagePhase::Completed
    }
}

#[derive(Debug, Default)]
struct StageState {
    queue: VecDeque<ProcessableItem>,
    in_count: i64,
    out_count: i64,
    phase: StagePhase,
}

/// Queue, counters and phase of one stage, shared between the stage's driver,
/// its units of work and its upstream neighbour.
///
/// Every state change bumps the run-wide progress signal so that drivers
/// waiting on a neighbour are woken.
#[derive(Debug)]
pub(crate) struct StageRuntime {
    state: Mutex<StageState>,
    progress: Arc<watch::Sender<u64>>,
}

impl StageRuntime {
    pub(crate) fn new(progress: Arc<watch::Sender<u64>>) -> Self {
        Self {
            state: Mutex::new(StageState::default()),
            progress,
        }
    }

    /// Append items to the queue, counting them as received.
    pub(crate) fn enqueue(&self, items: impl IntoIterator<Item = ProcessableItem>) {
        {
            let mut state = self.state.lock();
            let before = state.queue.len();
            state.queue.extend(items);
            let added = state.queue.len() - before;
            state.in_count += added as i64;
        }
        self.bump();
    }

    /// Take one item off the front of the queue.
    pub(crate) fn try_dequeue(&self) -> Option<ProcessableItem> {
        let mut state = self.state.lock();
        let item = state.queue.pop_front()?;
        state.phase = state.phase.max(StagePhase::Draining);
        Some(item)
    }

    /// Take the whole queue.
    pub(crate) fn drain(&self) -> Vec<ProcessableItem> {
        let mut state = self.state.lock();
        state.phase = state.phase.max(StagePhase::Draining);
        state.queue.drain(..).collect()
    }

    /// Record that `consumed` received items were handled and `produced`
    /// items were emitted.
    pub(crate) fn account(&self, consumed: usize, produced: usize) {
        {
            let mut state = self.state.lock();
            state.in_count -= consumed as i64;
            state.out_count += produced as i64;
        }
        self.bump();
    }

    /// Mark the stage completed. Returns `true` if this call completed it.
    pub(crate) fn complete(&self) -> bool {
        let transitioned = {
            let mut state = self.state.lock();
            let was = state.phase;
            state.phase = StagePhase::Completed;
            was != StagePhase::Completed
        };
        if transitioned {
            self.bump();
        }
        transitioned
    }

    /// Complete the stage if its predecessor (if any) is completed and all of
    /// its own input has been accounted for. Returns `true` if this call
    /// completed it.
    pub(crate) fn try_complete(&self, prev: Option<&StageRuntime>) -> bool {
        // The predecessor's phase is monotonic, so reading it before taking
        // our own lock is safe.
        let prev_done = prev.map_or(true, StageRuntime::is_completed);
        let transitioned = {
            let mut state = self.state.lock();
            if state.phase == StagePhase::Completed || !prev_done || state.in_count != 0 {
                false
            } else {
                state.phase = StagePhase::Completed;
                true
            }
        };
        if transitioned {
            self.bump();
        }
        transitioned
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.state.lock().phase == StagePhase::Completed
    }

    pub(crate) fn snapshot(&self) -> StageSnapshot {
        let state = self.state.lock();
        StageSnapshot {
            queued: state.queue.len(),
            in_count: state.in_count,
            out_count: state.out_count,
            phase: state.phase,
        }
    }

    fn bump(&self) {
        self.progress.send_modify(|v| *v = v.wrapping_add(1));
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// A configured stage of a [`Processor`](crate::processor::Processor).
pub struct Operation {
    pub(crate) decl: OperationDecl,
    pub(crate) target_files: TargetFiles,
    pub(crate) cleanup_policy: CleanupPolicy,
    pub(crate) handler: Option<Arc<dyn OperationHandler>>,
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
    pub(crate) runtime: Arc<StageRuntime>,
}

impl Operation {
    pub(crate) fn new(decl: OperationDecl, progress: Arc<watch::Sender<u64>>) -> Self {
        Self {
            target_files: decl.target_files.unwrap_or_default(),
            cleanup_policy: decl.cleanup_policy.unwrap_or_default(),
            decl,
            handler: None,
            prev: None,
            next: None,
            runtime: Arc::new(StageRuntime::new(progress)),
        }
    }

    /// Return the runtime state to its zero value and re-apply the policy
    /// defaults.
    pub(crate) fn reset(&mut self, progress: Arc<watch::Sender<u64>>) {
        self.runtime = Arc::new(StageRuntime::new(progress));
        self.handler = None;
        self.prev = None;
        self.next = None;
        self.target_files = self.decl.target_files.unwrap_or_default();
        self.cleanup_policy = self.decl.cleanup_policy.unwrap_or_default();
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn decl(&self) -> &OperationDecl {
        &self.decl
    }

    pub fn target_files(&self) -> TargetFiles {
        self.target_files
    }

    pub fn cleanup_policy(&self) -> CleanupPolicy {
        self.cleanup_policy
    }

    pub fn handler(&self) -> Option<&Arc<dyn OperationHandler>> {
        self.handler.as_ref()
    }

    /// Index of the previous stage, once initialized.
    pub fn prev(&self) -> Option<usize> {
        self.prev
    }

    /// Index of the next stage, once initialized.
    pub fn next(&self) -> Option<usize> {
        self.next
    }

    pub fn snapshot(&self) -> StageSnapshot {
        self.runtime.snapshot()
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.decl.name)
            .field("target_files", &self.target_files)
            .field("cleanup_policy", &self.cleanup_policy)
            .field("prev", &self.prev)
            .field("next", &self.next)
            .field("state", &self.runtime.snapshot())
            .finish_non_exhaustive()
    }
}
