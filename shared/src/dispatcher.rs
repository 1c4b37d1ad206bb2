use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capabilities::{
    NetworkConstraint, SchedulerError, TaskDescriptor, TaskId, TaskInput, TaskScheduler,
    WorkOutcome,
};
use crate::connectivity::ConnectivityMonitor;
use crate::error::SyncError;
use crate::guard::TaskGuard;
use crate::model::{CatalogList, MovieId};
use crate::runtime::FetchWorker;

/// Attempts granted to a task after its first run asks for a retry.
pub const RECONNECT_RETRIES: u32 = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("unknown movie list discriminator '{0}'")]
    UnknownListType(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchTask {
    FetchMovies(CatalogList),
    FetchDetails(MovieId),
}

impl FetchTask {
    pub fn descriptor(&self) -> TaskDescriptor {
        let input = match self {
            FetchTask::FetchMovies(list) => TaskInput::MovieTypes(list.discriminator().to_string()),
            FetchTask::FetchDetails(id) => TaskInput::MovieId(id.get()),
        };
        TaskDescriptor::new(input, NetworkConstraint::Connected)
    }

    pub fn from_descriptor(descriptor: &TaskDescriptor) -> Result<Self, DispatchError> {
        match &descriptor.input {
            TaskInput::MovieTypes(discriminator) => CatalogList::from_discriminator(discriminator)
                .map(FetchTask::FetchMovies)
                .ok_or_else(|| DispatchError::UnknownListType(discriminator.clone())),
            TaskInput::MovieId(id) => Ok(FetchTask::FetchDetails(MovieId(*id))),
        }
    }
}

/// Hands descriptors from the core's `Tasks` effects to the platform
/// scheduler. The core never observes whether a task ran; screens
/// re-derive from the store on their next pass.
#[derive(Clone)]
pub struct DeferredFetchDispatcher {
    scheduler: Arc<dyn TaskScheduler>,
}

impl DeferredFetchDispatcher {
    pub fn new(scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self { scheduler }
    }

    /// Fire-and-forget. A rejected enqueue is logged, never surfaced.
    pub fn enqueue(&self, descriptor: TaskDescriptor) -> Option<TaskId> {
        let task_id = descriptor.task_id.clone();
        let input = descriptor.input.clone();
        match self.scheduler.enqueue(descriptor) {
            Ok(()) => {
                debug!(task_id = %task_id, ?input, "fetch task enqueued");
                Some(task_id)
            }
            Err(e) => {
                warn!(?input, error = %e, "fetch task not enqueued");
                None
            }
        }
    }
}

pub(crate) fn outcome_for(result: Result<(), SyncError>) -> WorkOutcome {
    match result {
        Ok(()) => WorkOutcome::Success,
        Err(e) if e.is_retryable() => {
            info!(error = %e, "transient failure, asking for retry");
            WorkOutcome::Retry
        }
        Err(e) => {
            warn!(error = %e, kind = e.kind().code(), "fetch task failed");
            WorkOutcome::Failure
        }
    }
}

// ============================================================================
// In-process Queue
// ============================================================================

/// In-process scheduler for shells without a platform job scheduler.
///
/// Tasks run one at a time once connectivity is available. A `Retry`
/// outcome earns exactly one more run after connectivity is back.
#[derive(Clone)]
pub struct LocalTaskQueue {
    sender: mpsc::UnboundedSender<TaskDescriptor>,
}

/// Receiving half of a `LocalTaskQueue`, not yet draining.
pub struct QueuedTasks {
    receiver: mpsc::UnboundedReceiver<TaskDescriptor>,
}

impl LocalTaskQueue {
    pub fn new() -> (Self, QueuedTasks) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, QueuedTasks { receiver })
    }
}

impl TaskScheduler for LocalTaskQueue {
    fn enqueue(&self, descriptor: TaskDescriptor) -> Result<(), SchedulerError> {
        self.sender
            .send(descriptor)
            .map_err(|_| SchedulerError::Closed)
    }
}

impl QueuedTasks {
    /// Runs queued descriptors through `worker` until the returned guard is
    /// dropped; afterwards the queue rejects new tasks.
    pub fn drain_on(
        self,
        handle: &Handle,
        worker: FetchWorker,
        connectivity: ConnectivityMonitor,
    ) -> TaskGuard {
        TaskGuard::spawn_on(handle, drain(self.receiver, worker, connectivity))
    }
}

async fn drain(
    mut receiver: mpsc::UnboundedReceiver<TaskDescriptor>,
    worker: FetchWorker,
    connectivity: ConnectivityMonitor,
) {
    while let Some(descriptor) = receiver.recv().await {
        run_with_reconnect_retry(&worker, &connectivity, &descriptor).await;
    }
    debug!("local task queue closed");
}

async fn run_with_reconnect_retry(
    worker: &FetchWorker,
    connectivity: &ConnectivityMonitor,
    descriptor: &TaskDescriptor,
) -> WorkOutcome {
    let mut attempt = 0;
    loop {
        if descriptor.constraint.requires_network() {
            connectivity.wait_until_available().await;
        }

        let outcome = worker.run(descriptor).await;
        match outcome {
            WorkOutcome::Retry if attempt < RECONNECT_RETRIES => {
                attempt += 1;
                debug!(task_id = %descriptor.task_id, "retrying after reconnect");
            }
            WorkOutcome::Retry => {
                warn!(task_id = %descriptor.task_id, "giving up after reconnect retry");
                return outcome;
            }
            WorkOutcome::Success | WorkOutcome::Failure => return outcome,
        }
    }
}
