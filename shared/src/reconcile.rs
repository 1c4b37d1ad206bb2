//! Decides what the list and detail screens show: cache, network, or nothing.
//!
//! A pass for `Popular`/`TopRated` evicts non-favorites from other lists,
//! merges a fresh page when online, and always answers from the store. If the
//! fetch fails after eviction the purge stays committed, leaving only
//! favorites cached until the next successful pass.
//!
//! Passes are step machines: each [`Step`] names the one effect the core
//! issues next, and its answer comes back through [`SyncQueue::advance`].
//! The queue runs one job at a time so store writes never interleave.

use std::collections::VecDeque;
use tracing::{debug, info, warn};

use crate::capabilities::{
    RecordsError, RecordsOperation, RecordsOutput, RecordsResult, TaskId, WorkOutcome,
};
use crate::catalog::CatalogError;
use crate::dispatcher::{outcome_for, FetchTask};
use crate::error::SyncError;
use crate::model::{CatalogList, ListKind, MovieId, MovieRecord};

/// Work accepted by the [`SyncQueue`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Job {
    /// A full reconciliation pass whose result feeds the list screen.
    Pass(ListKind),
    /// A background fetch delivered by the platform scheduler. Merges
    /// without evicting and reports only an outcome.
    Task { task_id: TaskId, task: FetchTask },
}

#[derive(Debug)]
pub enum Step {
    Records(RecordsOperation),
    FetchList(CatalogList),
    FetchDetails(MovieId),
    Finished(Finished),
}

#[derive(Debug)]
pub enum Finished {
    Listed {
        kind: ListKind,
        result: Result<Vec<MovieRecord>, SyncError>,
    },
    Worked {
        task_id: TaskId,
        outcome: WorkOutcome,
    },
}

/// The shell's answer to the last [`Step`].
#[derive(Debug)]
pub enum StepResult {
    Records(RecordsResult),
    List(Result<Vec<MovieRecord>, CatalogError>),
    Details(Result<MovieRecord, CatalogError>),
}

#[derive(Clone, Copy, Debug)]
enum Stage {
    Evict { list: CatalogList },
    FetchPage { list: CatalogList },
    Merge { list: CatalogList },
    Read,
    FetchDetails,
    StoreDetails,
    Done,
}

#[derive(Debug)]
struct Reconciliation {
    job: Job,
    online: bool,
    stage: Stage,
}

impl Reconciliation {
    fn start(job: Job, online: bool) -> (Self, Step) {
        let mut run = Self {
            job,
            online,
            stage: Stage::Done,
        };
        let step = match run.job.clone() {
            Job::Pass(kind) => match kind.catalog_list() {
                Some(list) => {
                    run.stage = Stage::Evict { list };
                    Step::Records(RecordsOperation::EvictStale { keep: list.tag() })
                }
                None => {
                    run.stage = Stage::Read;
                    Step::Records(RecordsOperation::ListFavorites)
                }
            },
            Job::Task { .. } if !online => run.finish(Err(SyncError::Offline)),
            Job::Task {
                task: FetchTask::FetchMovies(list),
                ..
            } => {
                run.stage = Stage::FetchPage { list };
                Step::FetchList(list)
            }
            Job::Task {
                task: FetchTask::FetchDetails(id),
                ..
            } => {
                run.stage = Stage::FetchDetails;
                Step::FetchDetails(id)
            }
        };
        (run, step)
    }

    fn advance(&mut self, result: StepResult) -> Step {
        match (self.stage, result) {
            (Stage::Evict { list }, StepResult::Records(Ok(RecordsOutput::Evicted(evicted)))) => {
                if evicted > 0 {
                    debug!(evicted, "evicted stale records");
                }
                if self.online {
                    self.stage = Stage::FetchPage { list };
                    Step::FetchList(list)
                } else {
                    info!(list = list.path(), "offline, serving cached listing");
                    self.read(list)
                }
            }
            (Stage::FetchPage { list }, StepResult::List(Ok(movies))) => {
                info!(list = list.path(), fetched = movies.len(), "merging fresh listing");
                self.stage = Stage::Merge { list };
                Step::Records(RecordsOperation::MergeListing {
                    tag: list.tag(),
                    movies,
                })
            }
            (Stage::Merge { list }, StepResult::Records(Ok(RecordsOutput::Merged(merged)))) => {
                match self.job {
                    Job::Pass(_) => self.read(list),
                    Job::Task { .. } => {
                        info!(merged, "background listing merged");
                        self.finish(Ok(Vec::new()))
                    }
                }
            }
            (Stage::Read, StepResult::Records(Ok(RecordsOutput::Movies(movies)))) => {
                let kind = match &self.job {
                    Job::Pass(kind) => *kind,
                    Job::Task { .. } => ListKind::Favorites,
                };
                if movies.is_empty() && !self.online && kind.catalog_list().is_some() {
                    self.finish(Err(SyncError::StaleCacheEmpty(kind)))
                } else {
                    self.finish(Ok(movies))
                }
            }
            (Stage::FetchDetails, StepResult::Details(Ok(movie))) => {
                self.stage = Stage::StoreDetails;
                Step::Records(RecordsOperation::RefreshDetails { movie })
            }
            (Stage::StoreDetails, StepResult::Records(Ok(RecordsOutput::Refreshed { favorite }))) => {
                debug!(updated = favorite.is_some(), "background details stored");
                self.finish(Ok(Vec::new()))
            }
            (_, StepResult::Records(Err(e))) => self.finish(Err(e.into())),
            (_, StepResult::List(Err(e)) | StepResult::Details(Err(e))) => {
                self.finish(Err(e.into()))
            }
            (stage, other) => {
                warn!(?stage, result = ?other, "step result does not match the pending step");
                self.finish(Err(SyncError::Store(RecordsError::UnexpectedOutput(
                    format!("{other:?}"),
                ))))
            }
        }
    }

    fn read(&mut self, list: CatalogList) -> Step {
        self.stage = Stage::Read;
        Step::Records(RecordsOperation::ListByTag { tag: list.tag() })
    }

    fn finish(&mut self, result: Result<Vec<MovieRecord>, SyncError>) -> Step {
        self.stage = Stage::Done;
        let finished = match &self.job {
            Job::Pass(kind) => Finished::Listed {
                kind: *kind,
                result,
            },
            Job::Task { task_id, .. } => Finished::Worked {
                task_id: task_id.clone(),
                outcome: outcome_for(result.map(|_| ())),
            },
        };
        Step::Finished(finished)
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Runs reconciliation jobs one at a time.
///
/// A job submitted while another runs waits its turn; resubmitting a job
/// that is already waiting only refreshes its connectivity snapshot.
#[derive(Debug, Default)]
pub struct SyncQueue {
    running: Option<Reconciliation>,
    waiting: VecDeque<(Job, bool)>,
}

impl SyncQueue {
    /// Starts `job` if the queue is idle and returns its first step.
    pub fn submit(&mut self, job: Job, online: bool) -> Option<Step> {
        if self.running.is_none() {
            return Some(self.begin(job, online));
        }
        if let Some(entry) = self.waiting.iter_mut().find(|(waiting, _)| *waiting == job) {
            debug!(?job, "job already queued");
            entry.1 = online;
        } else {
            self.waiting.push_back((job, online));
        }
        None
    }

    /// Feeds the answer to the running job's last step.
    pub fn advance(&mut self, result: StepResult) -> Option<Step> {
        let Some(running) = self.running.as_mut() else {
            warn!(?result, "step result with no job running");
            return None;
        };
        let step = running.advance(result);
        if matches!(step, Step::Finished(_)) {
            self.running = None;
        }
        Some(step)
    }

    /// Starts the next waiting job once the running one has finished.
    pub fn resume(&mut self) -> Option<Step> {
        if self.running.is_some() {
            return None;
        }
        let (job, online) = self.waiting.pop_front()?;
        Some(self.begin(job, online))
    }

    pub fn is_idle(&self) -> bool {
        self.running.is_none() && self.waiting.is_empty()
    }

    fn begin(&mut self, job: Job, online: bool) -> Step {
        let (run, step) = Reconciliation::start(job, online);
        if !matches!(step, Step::Finished(_)) {
            self.running = Some(run);
        }
        step
    }
}
