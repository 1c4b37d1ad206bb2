//! Shared core of the movie catalog client.
//!
//! [`coordinator::App`] is a Crux app: the shell feeds it [`event::Event`]s,
//! resolves the effects it asks for and renders [`coordinator::ViewModel`]
//! snapshots. Listings are served from the local [`store::RecordStore`] and
//! refreshed from the remote catalog while the network is available.
//! [`runtime::Runtime`] is a ready-made native shell that resolves every
//! effect on tokio.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod capabilities;
pub mod catalog;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod guard;
pub mod model;
pub mod reconcile;
pub mod runtime;
pub mod store;
pub mod telemetry;

pub use capabilities::{Capabilities, Effect};
pub use config::AppConfig;
pub use connectivity::{Connectivity, ConnectivityMonitor};
pub use coordinator::{App, DetailViewState, ListViewState, Model, ViewModel};
pub use error::{ErrorKind, SyncError};
pub use event::Event;
pub use model::{ListKind, MovieDetail, MovieId, MovieRecord};
pub use runtime::{BootstrapError, Platform, Runtime};
