#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use crux_http::protocol::{HttpRequest, HttpResponse};
use movies_shared::capabilities::{
    HttpError, HttpTransport, SchedulerError, TaskDescriptor, TaskScheduler,
    MAX_RESPONSE_BODY_SIZE,
};
use movies_shared::config::AppConfig;
use movies_shared::connectivity::ConnectivityMonitor;
use movies_shared::coordinator::{ListViewState, ViewModel};
use movies_shared::event::Event;
use movies_shared::model::ListKind;
use movies_shared::runtime::{Platform, Runtime};
use movies_shared::store::SqliteRecordStore;

pub const BASE_URL: &str = "https://api.themoviedb.org/3/movie/";
pub const API_KEY: &str = "test-key";

pub const POPULAR: &str = "/3/movie/popular";
pub const TOP_RATED: &str = "/3/movie/top_rated";

pub fn details_path(id: i64) -> String {
    format!("/3/movie/{id}")
}

pub fn reviews_path(id: i64) -> String {
    format!("/3/movie/{id}/reviews")
}

pub fn videos_path(id: i64) -> String {
    format!("/3/movie/{id}/videos")
}

// ============================================================================
// Fake catalog
// ============================================================================

#[derive(Clone)]
enum Route {
    Respond { status: u16, body: String },
    Unreachable,
    TooLarge,
}

/// Held request: `started` fires when the request arrives, the response is
/// sent once `release` is notified.
#[derive(Clone)]
pub struct Gate {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Scripted catalog server, routed by URL path. Unknown paths answer 404.
#[derive(Default)]
pub struct FakeCatalog {
    routes: Mutex<HashMap<String, Route>>,
    gates: Mutex<HashMap<String, Gate>>,
    requests: Mutex<Vec<String>>,
}

impl FakeCatalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: impl Into<String>, body: impl Into<String>) {
        self.respond_with(path, 200, body);
    }

    pub fn respond_with(&self, path: impl Into<String>, status: u16, body: impl Into<String>) {
        self.routes.lock().unwrap().insert(
            path.into(),
            Route::Respond {
                status,
                body: body.into(),
            },
        );
    }

    pub fn unreachable(&self, path: impl Into<String>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.into(), Route::Unreachable);
    }

    /// Answers `path` with a body over the transport's size limit.
    pub fn too_large(&self, path: impl Into<String>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.into(), Route::TooLarge);
    }

    /// Holds the next request to `path` until the gate is released.
    pub fn hold(&self, path: impl Into<String>) -> Gate {
        let gate = Gate {
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        };
        self.gates.lock().unwrap().insert(path.into(), gate.clone());
        gate
    }

    /// Full URLs of every request received, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url_path(url) == path)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn serve_movie(&self, movie: &Value) {
        let id = movie["id"].as_i64().unwrap();
        self.respond(details_path(id), movie.to_string());
        self.respond(reviews_path(id), page(&[review("r1", "critic")]));
        self.respond(
            videos_path(id),
            page(&[video("v1", "dQw4w9WgXcQ", "Trailer")]),
        );
    }
}

fn url_path(url: &str) -> &str {
    let without_query = url.split('?').next().unwrap();
    let after_scheme = without_query.split("://").nth(1).unwrap();
    after_scheme
        .find('/')
        .map_or("/", |index| &after_scheme[index..])
}

#[async_trait]
impl HttpTransport for FakeCatalog {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let path = url_path(&request.url).to_string();
        self.requests.lock().unwrap().push(request.url.clone());

        let gate = self.gates.lock().unwrap().remove(&path);
        if let Some(gate) = gate {
            gate.started.notify_one();
            gate.release.notified().await;
        }

        let route = self.routes.lock().unwrap().get(&path).cloned();
        match route {
            Some(Route::Respond { status, body }) => {
                Ok(HttpResponse::status(status).body(body.into_bytes()).build())
            }
            Some(Route::Unreachable) => Err(HttpError::ConnectionError {
                host: "api.themoviedb.org".into(),
                message: "connection refused".into(),
            }),
            Some(Route::TooLarge) => Err(HttpError::ResponseTooLarge {
                size: MAX_RESPONSE_BODY_SIZE + 1,
                max: MAX_RESPONSE_BODY_SIZE,
            }),
            None => Ok(HttpResponse::status(404)
                .body(
                    json!({ "status_code": 34, "status_message": "The resource you requested could not be found." })
                        .to_string()
                        .into_bytes(),
                )
                .build()),
        }
    }
}

// ============================================================================
// Payloads
// ============================================================================

pub fn movie(id: i64, title: &str) -> Value {
    json!({
        "id": id,
        "title": title,
        "poster_path": format!("/poster{id}.jpg"),
        "backdrop_path": format!("/backdrop{id}.jpg"),
        "release_date": "1999-10-15",
        "overview": format!("Overview of {title}"),
        "vote_average": 8.4
    })
}

pub fn detailed_movie(id: i64, title: &str) -> Value {
    let mut value = movie(id, title);
    value["genres"] = json!([{ "id": 18, "name": "Drama" }, { "id": 53, "name": "Thriller" }]);
    value["homepage"] = json!(format!("https://movies.example/{id}"));
    value["imdb_id"] = json!(format!("tt{id:07}"));
    value
}

pub fn review(id: &str, author: &str) -> Value {
    json!({
        "id": id,
        "author": author,
        "content": "Worth the runtime.",
        "url": format!("https://reviews.example/{id}")
    })
}

pub fn video(id: &str, key: &str, kind: &str) -> Value {
    json!({
        "id": id,
        "key": key,
        "name": format!("Official {kind}"),
        "site": "YouTube",
        "type": kind
    })
}

pub fn page(results: &[Value]) -> String {
    json!({ "page": 1, "results": results, "total_pages": 1 }).to_string()
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Default)]
pub struct RecordingScheduler {
    descriptors: Mutex<Vec<TaskDescriptor>>,
}

impl RecordingScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn descriptors(&self) -> Vec<TaskDescriptor> {
        self.descriptors.lock().unwrap().clone()
    }
}

impl TaskScheduler for RecordingScheduler {
    fn enqueue(&self, descriptor: TaskDescriptor) -> Result<(), SchedulerError> {
        self.descriptors.lock().unwrap().push(descriptor);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub fn test_config() -> AppConfig {
    AppConfig::from_toml_str(&format!(
        "[catalog]\nbase_url = \"{BASE_URL}\"\napi_key = \"{API_KEY}\"\n"
    ))
    .unwrap()
}

pub struct Harness {
    pub catalog: Arc<FakeCatalog>,
    pub store: Arc<SqliteRecordStore>,
    pub scheduler: Arc<RecordingScheduler>,
    pub runtime: Arc<Runtime>,
}

impl Harness {
    /// A runtime whose deferred fetches land in `scheduler`.
    pub fn new(online: bool) -> Self {
        Self::build(online, true)
    }

    /// A runtime that runs deferred fetches on its in-process queue.
    pub fn with_local_queue(online: bool) -> Self {
        Self::build(online, false)
    }

    fn build(online: bool, platform_scheduler: bool) -> Self {
        let catalog = FakeCatalog::new();
        let store = Arc::new(SqliteRecordStore::open_in_memory().unwrap());
        let scheduler = RecordingScheduler::new();

        let mut platform = Platform::new(catalog.clone());
        if platform_scheduler {
            platform = platform.with_scheduler(scheduler.clone());
        }
        let runtime = Runtime::with_store(&test_config(), platform, store.clone(), online).unwrap();

        Self {
            catalog,
            store,
            scheduler,
            runtime: Arc::new(runtime),
        }
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        self.runtime.connectivity()
    }

    pub fn view(&self) -> ViewModel {
        self.runtime.view()
    }

    pub async fn update(&self, event: Event) {
        self.runtime.update(event).await;
    }

    /// Selects `kind` and returns the list state once the pass settles.
    pub async fn show(&self, kind: ListKind) -> ListViewState {
        self.update(Event::ListKindSelected { kind }).await;
        self.view().list
    }
}

/// Waits until the runtime renders a view matching `predicate`.
pub async fn wait_for_view<F>(runtime: &Runtime, predicate: F) -> ViewModel
where
    F: Fn(&ViewModel) -> bool,
{
    let mut views = runtime.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let view = views.borrow_and_update().clone();
            if predicate(&view) {
                return view;
            }
            views.changed().await.unwrap();
        }
    })
    .await
    .expect("view never matched")
}

/// Polls `condition` until it holds.
pub async fn eventually<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition never held");
}
