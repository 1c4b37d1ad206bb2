use std::future::Future;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;

/// Owns a spawned listener task and aborts it when dropped, so a listener
/// lives exactly as long as the scope holding the guard.
#[must_use = "dropping the guard stops the task"]
#[derive(Debug)]
pub struct TaskGuard {
    handle: JoinHandle<()>,
}

impl TaskGuard {
    /// Spawns on the ambient tokio runtime, or reports that there is none.
    pub fn spawn<F>(future: F) -> Result<Self, TryCurrentError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Ok(Self::spawn_on(&Handle::try_current()?, future))
    }

    pub fn spawn_on<F>(handle: &Handle, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            handle: handle.spawn(future),
        }
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
