use crux_core::capability::{CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::model::{ListTag, MovieId, MovieRecord};
use crate::store::{RecordStore, StoreError};

/// Local movie cache access requested by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecordsOperation {
    /// Removes every non-favorite whose tag differs from `keep`.
    EvictStale { keep: ListTag },
    MergeListing {
        tag: ListTag,
        movies: Vec<MovieRecord>,
    },
    ListByTag { tag: ListTag },
    ListFavorites,
    /// Updates catalog fields of a cached record and reports its favorite flag.
    RefreshDetails { movie: MovieRecord },
    /// Inserts `movie` untagged when favoriting an uncached movie; drops an
    /// un-favorited record that no listing holds.
    SetFavorite { movie: MovieRecord, favorite: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecordsOutput {
    Evicted(usize),
    Merged(usize),
    Movies(Vec<MovieRecord>),
    /// `favorite` is `None` when the movie is not cached.
    Refreshed { favorite: Option<bool> },
    FavoriteSet,
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum RecordsError {
    #[error("movie {0} not found")]
    NotFound(MovieId),

    #[error("record store failure: {0}")]
    Storage(String),

    #[error("shell answered with the wrong output: {0}")]
    UnexpectedOutput(String),
}

impl From<StoreError> for RecordsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => RecordsError::NotFound(id),
            other => RecordsError::Storage(other.to_string()),
        }
    }
}

pub type RecordsResult = Result<RecordsOutput, RecordsError>;

impl Operation for RecordsOperation {
    type Output = RecordsResult;
}

impl RecordsOperation {
    /// Performs the operation against `store`.
    pub async fn apply(self, store: &dyn RecordStore) -> RecordsResult {
        let output = match self {
            RecordsOperation::EvictStale { keep } => {
                RecordsOutput::Evicted(store.delete_stale_non_favorites(keep).await?)
            }
            RecordsOperation::MergeListing { tag, movies } => {
                store.replace_listing(tag, &movies).await?;
                RecordsOutput::Merged(movies.len())
            }
            RecordsOperation::ListByTag { tag } => {
                RecordsOutput::Movies(store.list_by_tag(tag).await?)
            }
            RecordsOperation::ListFavorites => RecordsOutput::Movies(store.list_favorites().await?),
            RecordsOperation::RefreshDetails { movie } => {
                let favorite = match store.get(movie.id).await {
                    Ok(cached) => Some(cached.is_favorite),
                    Err(StoreError::NotFound(_)) => None,
                    Err(e) => return Err(e.into()),
                };
                if favorite.is_some() {
                    store.refresh_details(&movie).await?;
                }
                RecordsOutput::Refreshed { favorite }
            }
            RecordsOperation::SetFavorite { movie, favorite } => {
                set_favorite(store, &movie, favorite).await?;
                RecordsOutput::FavoriteSet
            }
        };
        Ok(output)
    }
}

async fn set_favorite(
    store: &dyn RecordStore,
    movie: &MovieRecord,
    favorite: bool,
) -> Result<(), StoreError> {
    match store.set_favorite(movie.id, favorite).await {
        Ok(()) if favorite => info!(movie_id = %movie.id, "marked favorite"),
        Ok(()) => {
            if store.remove_if_stale(movie.id).await? {
                debug!(movie_id = %movie.id, "dropped uncached former favorite");
            }
            info!(movie_id = %movie.id, "removed favorite");
        }
        Err(StoreError::NotFound(_)) if favorite => {
            let record = MovieRecord {
                is_favorite: true,
                list_tag: ListTag::None,
                ..movie.clone()
            };
            store.upsert(&record).await?;
            info!(movie_id = %movie.id, "stored new favorite");
        }
        Err(StoreError::NotFound(_)) => {
            warn!(movie_id = %movie.id, "unfavorite for a movie that is not stored");
        }
        Err(e) => return Err(e),
    }
    Ok(())
}

#[derive(crux_core::macros::Capability)]
pub struct Records<Ev> {
    context: CapabilityContext<RecordsOperation, Ev>,
}

impl<Ev> Records<Ev>
where
    Ev: Send + 'static,
{
    pub fn new(context: CapabilityContext<RecordsOperation, Ev>) -> Self {
        Self { context }
    }

    pub fn run<F>(&self, operation: RecordsOperation, make_event: F)
    where
        F: FnOnce(RecordsResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context.request_from_shell(operation).await;
            context.update_app(make_event(result));
        });
    }
}
