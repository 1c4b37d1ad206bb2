use serde::{Deserialize, Serialize};

use crate::capabilities::{RecordsResult, TaskDescriptor};
use crate::catalog::CatalogClient;
use crate::connectivity::Connectivity;
use crate::coordinator::DetailPart;
use crate::model::{ListKind, MovieId};
use crate::reconcile::StepResult;

/// Inputs to the core. Shell events cross the bridge as JSON; the skipped
/// variants are answers to the core's own effects.
#[derive(Serialize, Deserialize, Debug)]
pub enum Event {
    // Lifecycle
    #[serde(skip)]
    Configure {
        catalog: Box<CatalogClient>,
        connectivity: Connectivity,
    },
    Started,

    // List screen
    ListKindSelected { kind: ListKind },
    RefreshRequested,

    // Detail screen
    MovieSelected { id: MovieId },
    FavoriteToggled,
    DetailDismissed,

    // Connectivity and background work
    ConnectivityChanged { connectivity: Connectivity },
    TaskDelivered {
        descriptor: TaskDescriptor,
        connectivity: Connectivity,
    },

    // Effect answers
    #[serde(skip)]
    Synced(StepResult),
    #[serde(skip)]
    DetailFetched { generation: u64, part: DetailPart },
    #[serde(skip)]
    DetailStored {
        generation: u64,
        result: RecordsResult,
    },
    #[serde(skip)]
    FavoriteStored {
        id: MovieId,
        favorite: bool,
        result: RecordsResult,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::Configure { .. } => "configure",
            Event::Started => "started",
            Event::ListKindSelected { .. } => "list_kind_selected",
            Event::RefreshRequested => "refresh_requested",
            Event::MovieSelected { .. } => "movie_selected",
            Event::FavoriteToggled => "favorite_toggled",
            Event::DetailDismissed => "detail_dismissed",
            Event::ConnectivityChanged { .. } => "connectivity_changed",
            Event::TaskDelivered { .. } => "task_delivered",
            Event::Synced(_) => "synced",
            Event::DetailFetched { .. } => "detail_fetched",
            Event::DetailStored { .. } => "detail_stored",
            Event::FavoriteStored { .. } => "favorite_stored",
        }
    }
}
