use crux_core::capability::{CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Identifier handed to the platform scheduler with each descriptor
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskInput {
    /// List discriminator: `"popular"` or `"top_ranked"`
    MovieTypes(String),
    MovieId(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkConstraint {
    Connected,
    None,
}

impl NetworkConstraint {
    pub fn requires_network(self) -> bool {
        matches!(self, NetworkConstraint::Connected)
    }
}

/// Payload handed to the platform's background job scheduler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub task_id: TaskId,
    pub input: TaskInput,
    pub constraint: NetworkConstraint,
}

impl TaskDescriptor {
    pub fn new(input: TaskInput, constraint: NetworkConstraint) -> Self {
        Self {
            task_id: TaskId::generate(),
            input,
            constraint,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("scheduler rejected task: {0}")]
    Rejected(String),

    #[error("scheduler is shut down")]
    Closed,
}

/// Platform background job scheduler. Enqueueing is fire-and-forget: the
/// platform owns execution, constraint checks and its reconnect retry.
pub trait TaskScheduler: Send + Sync {
    fn enqueue(&self, descriptor: TaskDescriptor) -> Result<(), SchedulerError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkOutcome {
    Success,
    /// Run again once the network constraint is met.
    Retry,
    Failure,
}

// ============================================================================
// Tasks Capability
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskOperation {
    /// Hand a descriptor to the platform scheduler.
    Enqueue(TaskDescriptor),
    /// Report how a delivered descriptor ended.
    Complete { task_id: TaskId, outcome: WorkOutcome },
}

impl Operation for TaskOperation {
    type Output = ();
}

#[derive(crux_core::macros::Capability)]
pub struct Tasks<Ev> {
    context: CapabilityContext<TaskOperation, Ev>,
}

impl<Ev> Tasks<Ev>
where
    Ev: Send + 'static,
{
    pub fn new(context: CapabilityContext<TaskOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn enqueue(&self, descriptor: TaskDescriptor) {
        self.notify(TaskOperation::Enqueue(descriptor));
    }

    pub fn complete(&self, task_id: TaskId, outcome: WorkOutcome) {
        self.notify(TaskOperation::Complete { task_id, outcome });
    }

    fn notify(&self, operation: TaskOperation) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context.notify_shell(operation).await;
        });
    }
}
