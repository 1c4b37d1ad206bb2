//! The presentation core: a Crux app that owns list and detail screen state.
//!
//! Every trigger restarts its screen at `Loading`. A list result is only
//! published while its kind is still the active one; results of passes
//! overtaken by a kind switch are dropped after their store writes land.
//! Detail answers carry the generation of the load that asked for them, so
//! a late answer for an abandoned selection is ignored.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::capabilities::{
    Capabilities, RecordsError, RecordsOperation, RecordsOutput, RecordsResult, TaskDescriptor,
    WorkOutcome,
};
use crate::catalog::{CatalogClient, CatalogError};
use crate::connectivity::Connectivity;
use crate::dispatcher::FetchTask;
use crate::error::SyncError;
use crate::event::Event;
use crate::model::{ListKind, MovieDetail, MovieId, MovieRecord, Review, Video};
use crate::reconcile::{Finished, Job, Step, StepResult, SyncQueue};

// ============================================================================
// View State
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ListViewState {
    #[default]
    Loading,
    Success(Vec<MovieRecord>),
    Error,
    NoConnectivity,
}

impl ListViewState {
    pub fn from_result(result: Result<Vec<MovieRecord>, SyncError>) -> Self {
        match result {
            Ok(movies) => ListViewState::Success(movies),
            Err(e) if e.is_connectivity() => ListViewState::NoConnectivity,
            Err(e @ SyncError::Store(_)) => {
                error!(error = %e, "reconciliation aborted by store failure");
                ListViewState::Error
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind().code(), "list fetch failed");
                ListViewState::Error
            }
        }
    }

    pub fn movies(&self) -> Option<&[MovieRecord]> {
        match self {
            ListViewState::Success(movies) => Some(movies),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DetailViewState {
    Loading,
    Success(Box<MovieDetail>),
    Error,
    NoConnectivity,
}

impl DetailViewState {
    pub fn detail(&self) -> Option<&MovieDetail> {
        match self {
            DetailViewState::Success(detail) => Some(detail),
            _ => None,
        }
    }
}

/// Snapshot rendered by the shell after every state change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewModel {
    pub list_kind: ListKind,
    pub list: ListViewState,
    pub detail: Option<DetailViewState>,
    pub online: bool,
}

// ============================================================================
// Model
// ============================================================================

/// One of the three catalog answers a detail screen waits for.
#[derive(Debug)]
pub enum DetailPart {
    Movie(Result<MovieRecord, CatalogError>),
    Reviews(Result<Vec<Review>, CatalogError>),
    Videos(Result<Vec<Video>, CatalogError>),
}

#[derive(Debug)]
struct DetailLoad {
    generation: u64,
    id: MovieId,
    movie: Option<Result<MovieRecord, CatalogError>>,
    reviews: Option<Result<Vec<Review>, CatalogError>>,
    videos: Option<Result<Vec<Video>, CatalogError>>,
    // Assembled detail waiting for the store to report its favorite flag.
    fetched: Option<MovieDetail>,
}

impl DetailLoad {
    fn new(generation: u64, id: MovieId) -> Self {
        Self {
            generation,
            id,
            movie: None,
            reviews: None,
            videos: None,
            fetched: None,
        }
    }

    fn accept(&mut self, part: DetailPart) {
        match part {
            DetailPart::Movie(result) => self.movie = Some(result),
            DetailPart::Reviews(result) => self.reviews = Some(result),
            DetailPart::Videos(result) => self.videos = Some(result),
        }
    }

    /// The assembled detail once all three answers are in.
    fn take_complete(&mut self) -> Option<Result<MovieDetail, CatalogError>> {
        if self.movie.is_none() || self.reviews.is_none() || self.videos.is_none() {
            return None;
        }
        let (movie, reviews, videos) = (self.movie.take()?, self.reviews.take()?, self.videos.take()?);
        Some(assemble(movie, reviews, videos))
    }
}

fn assemble(
    movie: Result<MovieRecord, CatalogError>,
    reviews: Result<Vec<Review>, CatalogError>,
    videos: Result<Vec<Video>, CatalogError>,
) -> Result<MovieDetail, CatalogError> {
    Ok(MovieDetail {
        movie: movie?,
        reviews: reviews?,
        videos: videos?,
        is_favorite: false,
    })
}

#[derive(Debug, Default)]
pub struct Model {
    list_kind: ListKind,
    list: ListViewState,
    selected: Option<MovieId>,
    detail: Option<DetailViewState>,
    connectivity: Connectivity,
    catalog: Option<CatalogClient>,
    sync: SyncQueue,
    loading: Option<DetailLoad>,
    detail_generation: u64,
}

// ============================================================================
// App
// ============================================================================

#[derive(Default)]
pub struct App;

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    #[instrument(skip_all, fields(event = event.name()))]
    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        match event {
            Event::Configure {
                catalog,
                connectivity,
            } => {
                model.catalog = Some(*catalog);
                model.connectivity = connectivity;
                info!(?connectivity, "core configured");
                caps.render.render();
            }
            Event::Started | Event::RefreshRequested => {
                Self::load_list(model.list_kind, model, caps);
            }
            Event::ListKindSelected { kind } => Self::load_list(kind, model, caps),
            Event::MovieSelected { id } => Self::load_detail(id, model, caps),
            Event::FavoriteToggled => Self::toggle_favorite(model, caps),
            Event::DetailDismissed => {
                model.selected = None;
                model.detail = None;
                model.loading = None;
                caps.render.render();
            }
            Event::ConnectivityChanged { connectivity } => {
                Self::connectivity_changed(connectivity, model, caps);
            }
            Event::TaskDelivered {
                descriptor,
                connectivity,
            } => Self::task_delivered(descriptor, connectivity, model, caps),
            Event::Synced(result) => {
                let next = model.sync.advance(result);
                Self::drive(next, model, caps);
            }
            Event::DetailFetched { generation, part } => {
                Self::detail_fetched(generation, part, model, caps);
            }
            Event::DetailStored { generation, result } => {
                Self::detail_stored(generation, result, model, caps);
            }
            Event::FavoriteStored {
                id,
                favorite,
                result,
            } => Self::favorite_stored(id, favorite, result, model, caps),
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        ViewModel {
            list_kind: model.list_kind,
            list: model.list.clone(),
            detail: model.detail.clone(),
            online: model.connectivity.is_available(),
        }
    }
}

impl App {
    fn load_list(kind: ListKind, model: &mut Model, caps: &Capabilities) {
        model.list_kind = kind;
        model.list = ListViewState::Loading;
        caps.render.render();

        let step = model
            .sync
            .submit(Job::Pass(kind), model.connectivity.is_available());
        Self::drive(step, model, caps);
    }

    /// Issues steps of the running reconciliation until one is waiting on
    /// the shell.
    fn drive(mut next: Option<Step>, model: &mut Model, caps: &Capabilities) {
        while let Some(step) = next.take() {
            next = match step {
                Step::Records(operation) => {
                    caps.records.run(operation, |result| {
                        Event::Synced(StepResult::Records(result))
                    });
                    None
                }
                Step::FetchList(list) => {
                    let issued = Self::catalog(model).and_then(|catalog| {
                        catalog.fetch_list(&caps.http, list, |result| {
                            Event::Synced(StepResult::List(result))
                        })
                    });
                    match issued {
                        Ok(()) => None,
                        Err(e) => model.sync.advance(StepResult::List(Err(e))),
                    }
                }
                Step::FetchDetails(id) => {
                    let issued = Self::catalog(model).and_then(|catalog| {
                        catalog.fetch_details(&caps.http, id, |result| {
                            Event::Synced(StepResult::Details(result))
                        })
                    });
                    match issued {
                        Ok(()) => None,
                        Err(e) => model.sync.advance(StepResult::Details(Err(e))),
                    }
                }
                Step::Finished(finished) => {
                    Self::finished(finished, model, caps);
                    model.sync.resume()
                }
            };
        }
    }

    fn finished(finished: Finished, model: &mut Model, caps: &Capabilities) {
        match finished {
            Finished::Listed { kind, result } => {
                if kind == model.list_kind {
                    model.list = ListViewState::from_result(result);
                    caps.render.render();
                } else {
                    debug!(%kind, active = %model.list_kind, "discarding result for inactive list");
                }
            }
            Finished::Worked { task_id, outcome } => {
                debug!(task_id = %task_id, ?outcome, "delivered task finished");
                caps.tasks.complete(task_id, outcome);
            }
        }
    }

    fn load_detail(id: MovieId, model: &mut Model, caps: &Capabilities) {
        model.detail_generation += 1;
        let generation = model.detail_generation;
        model.selected = Some(id);
        model.loading = None;

        if !model.connectivity.is_available() {
            debug!(movie_id = %id, "offline, deferring detail fetch");
            caps.tasks.enqueue(FetchTask::FetchDetails(id).descriptor());
            model.detail = Some(DetailViewState::NoConnectivity);
            caps.render.render();
            return;
        }

        let issued = Self::catalog(model).and_then(|catalog| {
            catalog.fetch_details(&caps.http, id, move |result| Event::DetailFetched {
                generation,
                part: DetailPart::Movie(result),
            })?;
            catalog.fetch_reviews(&caps.http, id, move |result| Event::DetailFetched {
                generation,
                part: DetailPart::Reviews(result),
            })?;
            catalog.fetch_videos(&caps.http, id, move |result| Event::DetailFetched {
                generation,
                part: DetailPart::Videos(result),
            })
        });

        let state = match issued {
            Ok(()) => {
                model.loading = Some(DetailLoad::new(generation, id));
                DetailViewState::Loading
            }
            Err(e) => {
                warn!(movie_id = %id, error = %e, "detail load failed");
                DetailViewState::Error
            }
        };
        model.detail = Some(state);
        caps.render.render();
    }

    fn detail_fetched(generation: u64, part: DetailPart, model: &mut Model, caps: &Capabilities) {
        let Some(load) = model
            .loading
            .as_mut()
            .filter(|load| load.generation == generation)
        else {
            debug!(generation, "dropping answer for an abandoned detail load");
            return;
        };

        load.accept(part);
        match load.take_complete() {
            None => {}
            Some(Ok(detail)) => {
                let movie = detail.movie.clone();
                load.fetched = Some(detail);
                caps.records.run(RecordsOperation::RefreshDetails { movie }, move |result| {
                    Event::DetailStored { generation, result }
                });
            }
            Some(Err(e)) => {
                warn!(movie_id = %load.id, error = %e, "detail load failed");
                model.loading = None;
                model.detail = Some(DetailViewState::Error);
                caps.render.render();
            }
        }
    }

    fn detail_stored(
        generation: u64,
        result: RecordsResult,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        if model.loading.as_ref().map(|load| load.generation) != Some(generation) {
            debug!(generation, "dropping store answer for an abandoned detail load");
            return;
        }
        let Some(DetailLoad {
            id,
            fetched: Some(mut detail),
            ..
        }) = model.loading.take()
        else {
            warn!(generation, "store answered before the detail was assembled");
            return;
        };

        let favorite = result.and_then(|output| match output {
            RecordsOutput::Refreshed { favorite } => Ok(favorite.unwrap_or(false)),
            other => Err(RecordsError::UnexpectedOutput(format!("{other:?}"))),
        });
        model.detail = Some(match favorite {
            Ok(favorite) => {
                detail.is_favorite = favorite;
                detail.movie.is_favorite = favorite;
                DetailViewState::Success(Box::new(detail))
            }
            Err(e) => {
                error!(movie_id = %id, error = %e, "storing details failed");
                DetailViewState::Error
            }
        });
        caps.render.render();
    }

    fn toggle_favorite(model: &Model, caps: &Capabilities) {
        let Some(detail) = model.detail.as_ref().and_then(DetailViewState::detail) else {
            debug!("favorite toggle without a loaded detail");
            return;
        };

        let id = detail.movie.id;
        let favorite = !detail.is_favorite;
        caps.records.run(
            RecordsOperation::SetFavorite {
                movie: detail.movie.clone(),
                favorite,
            },
            move |result| Event::FavoriteStored {
                id,
                favorite,
                result,
            },
        );
    }

    fn favorite_stored(
        id: MovieId,
        favorite: bool,
        result: RecordsResult,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let stored = result.and_then(|output| match output {
            RecordsOutput::FavoriteSet => Ok(()),
            other => Err(RecordsError::UnexpectedOutput(format!("{other:?}"))),
        });
        if let Err(e) = stored {
            error!(movie_id = %id, error = %e, "favorite toggle failed");
            if model.selected == Some(id) {
                model.detail = Some(DetailViewState::Error);
                caps.render.render();
            }
            return;
        }

        if let Some(DetailViewState::Success(shown)) = model.detail.as_mut() {
            if shown.movie.id == id {
                shown.is_favorite = favorite;
                shown.movie.is_favorite = favorite;
            }
        }
        caps.render.render();

        if model.list_kind == ListKind::Favorites {
            Self::load_list(ListKind::Favorites, model, caps);
        }
    }

    fn connectivity_changed(connectivity: Connectivity, model: &mut Model, caps: &Capabilities) {
        if connectivity == model.connectivity {
            debug!(?connectivity, "connectivity unchanged");
            return;
        }
        model.connectivity = connectivity;
        let kind = model.list_kind;

        match connectivity {
            Connectivity::Available => {
                let reload = if matches!(model.detail, Some(DetailViewState::NoConnectivity)) {
                    model.selected
                } else {
                    None
                };
                if let Some(list) = kind.catalog_list() {
                    caps.tasks.enqueue(FetchTask::FetchMovies(list).descriptor());
                }
                Self::load_list(kind, model, caps);
                if let Some(id) = reload {
                    Self::load_detail(id, model, caps);
                }
            }
            Connectivity::Unavailable => {
                if matches!(
                    model.detail,
                    Some(DetailViewState::Loading | DetailViewState::Error)
                ) {
                    model.detail = Some(DetailViewState::NoConnectivity);
                    model.loading = None;
                }
                Self::load_list(kind, model, caps);
            }
            Connectivity::Unknown => caps.render.render(),
        }
    }

    fn task_delivered(
        descriptor: TaskDescriptor,
        connectivity: Connectivity,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let task = match FetchTask::from_descriptor(&descriptor) {
            Ok(task) => task,
            Err(e) => {
                warn!(task_id = %descriptor.task_id, error = %e, "rejecting delivered task");
                caps.tasks.complete(descriptor.task_id, WorkOutcome::Failure);
                return;
            }
        };

        let job = Job::Task {
            task_id: descriptor.task_id,
            task,
        };
        let step = model.sync.submit(job, connectivity.is_available());
        Self::drive(step, model, caps);
    }

    fn catalog(model: &Model) -> Result<&CatalogClient, CatalogError> {
        model.catalog.as_ref().ok_or(CatalogError::NotConfigured)
    }
}
