//! Native shell: owns the Crux core and resolves its effects on tokio.
//!
//! `Http` goes through the platform's [`HttpTransport`], `Records` through
//! the [`RecordStore`], `Tasks` through the platform scheduler or the
//! in-process queue. Each resolved effect may yield more effects; the
//! runtime counts them in flight so callers can wait for the core to settle.

use crux_core::Core;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, instrument, warn};

use crate::capabilities::{
    into_http_result, Effect, HttpError, HttpTransport, TaskDescriptor, TaskId, TaskOperation,
    TaskScheduler, WorkOutcome,
};
use crate::catalog::CatalogClient;
use crate::config::{AppConfig, ConfigError};
use crate::connectivity::ConnectivityMonitor;
use crate::coordinator::{App, ViewModel};
use crate::dispatcher::{DeferredFetchDispatcher, LocalTaskQueue, QueuedTasks};
use crate::error::ErrorKind;
use crate::event::Event;
use crate::guard::TaskGuard;
use crate::store::{RecordStore, SqliteRecordStore, StoreError};

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("record store: {0}")]
    Store(#[from] StoreError),

    #[error("catalog client: {0}")]
    Http(#[from] HttpError),

    #[error("no tokio runtime to run on: {0}")]
    NoRuntime(#[from] TryCurrentError),
}

impl BootstrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BootstrapError::Config(_) | BootstrapError::Http(_) | BootstrapError::NoRuntime(_) => {
                ErrorKind::Configuration
            }
            BootstrapError::Store(_) => ErrorKind::Storage,
        }
    }
}

/// Services the embedding platform provides.
#[derive(Clone)]
pub struct Platform {
    http: Arc<dyn HttpTransport>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
}

impl Platform {
    /// Without a scheduler, deferred fetches run on an in-process queue.
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self {
            http,
            scheduler: None,
        }
    }

    #[cfg(feature = "native-http")]
    pub fn native(config: &crate::config::CatalogConfig) -> Result<Self, HttpError> {
        let timeout = std::time::Duration::from_millis(config.request_timeout_ms);
        Ok(Self::new(Arc::new(
            crate::capabilities::ReqwestTransport::new(timeout)?,
        )))
    }

    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

// ============================================================================
// Effect Resolution
// ============================================================================

struct Shell {
    core: Core<Effect, App>,
    handle: Handle,
    store: Arc<dyn RecordStore>,
    http: Arc<dyn HttpTransport>,
    dispatcher: DeferredFetchDispatcher,
    view: watch::Sender<ViewModel>,
    in_flight: watch::Sender<usize>,
    completions: Mutex<HashMap<TaskId, oneshot::Sender<WorkOutcome>>>,
}

impl Shell {
    fn process(self: &Arc<Self>, event: Event) {
        let effects = self.core.process_event(event);
        self.dispatch(effects);
    }

    fn dispatch(self: &Arc<Self>, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Render(_) => {
                    self.view.send_replace(self.core.view());
                }
                Effect::Http(mut request) => {
                    let pending = Pending::start(self);
                    self.handle.spawn(async move {
                        let shell = &pending.shell;
                        let result = into_http_result(shell.http.execute(&request.operation).await);
                        let effects = shell.core.resolve(&mut request, result);
                        shell.dispatch(effects);
                    });
                }
                Effect::Records(mut request) => {
                    let pending = Pending::start(self);
                    self.handle.spawn(async move {
                        let shell = &pending.shell;
                        let result = request.operation.clone().apply(shell.store.as_ref()).await;
                        let effects = shell.core.resolve(&mut request, result);
                        shell.dispatch(effects);
                    });
                }
                Effect::Tasks(request) => match request.operation {
                    TaskOperation::Enqueue(descriptor) => {
                        self.dispatcher.enqueue(descriptor);
                    }
                    TaskOperation::Complete { task_id, outcome } => {
                        self.complete(&task_id, outcome);
                    }
                },
            }
        }
    }

    fn complete(&self, task_id: &TaskId, outcome: WorkOutcome) {
        match self.completions().remove(task_id) {
            // The worker may have stopped waiting; nothing to report then.
            Some(waiter) => {
                let _ = waiter.send(outcome);
            }
            None => debug!(task_id = %task_id, ?outcome, "no worker waiting for task"),
        }
    }

    async fn settled(&self) {
        let mut in_flight = self.in_flight.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = in_flight.wait_for(|count| *count == 0).await;
    }

    fn completions(&self) -> MutexGuard<'_, HashMap<TaskId, oneshot::Sender<WorkOutcome>>> {
        self.completions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts one effect as in flight until dropped. Nested effects are counted
/// before their parent's guard drops, so the count only reaches zero once
/// the core is idle.
struct Pending {
    shell: Arc<Shell>,
}

impl Pending {
    fn start(shell: &Arc<Shell>) -> Self {
        shell.in_flight.send_modify(|count| *count += 1);
        Self {
            shell: Arc::clone(shell),
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        self.shell
            .in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// The wired core. Dropping it stops the connectivity observer and, when the
/// platform supplied no scheduler, the in-process task queue.
pub struct Runtime {
    shell: Arc<Shell>,
    connectivity: ConnectivityMonitor,
    worker: FetchWorker,
    _observer: TaskGuard,
    _queue: Option<TaskGuard>,
}

impl Runtime {
    /// Opens the store from `config` and wires every component. Fails with
    /// `NoRuntime` outside a tokio runtime.
    pub fn bootstrap(
        config: &AppConfig,
        platform: Platform,
        reachable: bool,
    ) -> Result<Self, BootstrapError> {
        let handle = Handle::try_current()?;
        config.validate()?;
        let store = Arc::new(SqliteRecordStore::open(&config.store.path)?);
        info!(path = %config.store.path.display(), "record store opened");
        Self::assemble(handle, config, platform, store, reachable)
    }

    /// As `bootstrap`, over a caller-provided store.
    pub fn with_store(
        config: &AppConfig,
        platform: Platform,
        store: Arc<dyn RecordStore>,
        reachable: bool,
    ) -> Result<Self, BootstrapError> {
        let handle = Handle::try_current()?;
        Self::assemble(handle, config, platform, store, reachable)
    }

    fn assemble(
        handle: Handle,
        config: &AppConfig,
        platform: Platform,
        store: Arc<dyn RecordStore>,
        reachable: bool,
    ) -> Result<Self, BootstrapError> {
        let catalog = CatalogClient::new(&config.catalog)?;
        let connectivity = ConnectivityMonitor::from_probe(reachable);

        let (scheduler, queued): (Arc<dyn TaskScheduler>, Option<QueuedTasks>) =
            match platform.scheduler {
                Some(scheduler) => (scheduler, None),
                None => {
                    let (queue, queued) = LocalTaskQueue::new();
                    info!("using in-process task queue");
                    (Arc::new(queue), Some(queued))
                }
            };

        let core = Core::new();
        let (view, _) = watch::channel(core.view());
        let (in_flight, _) = watch::channel(0);
        let shell = Arc::new(Shell {
            core,
            handle: handle.clone(),
            store,
            http: platform.http,
            dispatcher: DeferredFetchDispatcher::new(scheduler),
            view,
            in_flight,
            completions: Mutex::new(HashMap::new()),
        });

        // Subscribe before configuring so no transition falls in between.
        let observer = observe_connectivity(&handle, &shell, &connectivity);
        shell.process(Event::Configure {
            catalog: Box::new(catalog),
            connectivity: connectivity.current(),
        });

        let worker = FetchWorker {
            shell: Arc::clone(&shell),
            connectivity: connectivity.clone(),
        };
        let queue = queued.map(|queued| queued.drain_on(&handle, worker.clone(), connectivity.clone()));

        Ok(Self {
            shell,
            connectivity,
            worker,
            _observer: observer,
            _queue: queue,
        })
    }

    /// Feeds `event` to the core and waits until every effect it caused has
    /// been resolved.
    #[instrument(skip_all, fields(event = event.name()))]
    pub async fn update(&self, event: Event) {
        self.shell.process(event);
        self.shell.settled().await;
    }

    pub fn view(&self) -> ViewModel {
        self.shell.core.view()
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.shell.view.subscribe()
    }

    /// Where the shell reports reachability changes.
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Runs descriptors handed back by a platform scheduler.
    pub fn worker(&self) -> &FetchWorker {
        &self.worker
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.shell.store
    }
}

fn observe_connectivity(
    handle: &Handle,
    shell: &Arc<Shell>,
    monitor: &ConnectivityMonitor,
) -> TaskGuard {
    let mut transitions = monitor.subscribe();
    let monitor = monitor.clone();
    let shell = Arc::clone(shell);

    TaskGuard::spawn_on(handle, async move {
        loop {
            let connectivity = match transitions.recv().await {
                Ok(connectivity) => connectivity,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "connectivity observer lagged");
                    monitor.current()
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            shell.process(Event::ConnectivityChanged { connectivity });
        }
    })
}

// ============================================================================
// Background Work
// ============================================================================

/// Executes deferred fetch descriptors through the core.
///
/// The worker hands the core the monitor's connectivity at delivery time,
/// so a task never acts on a stale view of the network.
#[derive(Clone)]
pub struct FetchWorker {
    shell: Arc<Shell>,
    connectivity: ConnectivityMonitor,
}

impl FetchWorker {
    #[instrument(skip_all, fields(task_id = %descriptor.task_id))]
    pub async fn run(&self, descriptor: &TaskDescriptor) -> WorkOutcome {
        let (sender, receiver) = oneshot::channel();
        self.shell
            .completions()
            .insert(descriptor.task_id.clone(), sender);

        self.shell.process(Event::TaskDelivered {
            descriptor: descriptor.clone(),
            connectivity: self.connectivity.current(),
        });

        if let Ok(outcome) = receiver.await {
            outcome
        } else {
            warn!("task ended without an outcome");
            WorkOutcome::Failure
        }
    }
}
