//! Drives the Crux app directly: every effect is resolved by hand.

mod common;

use assert_matches::assert_matches;
use common::*;
use crux_core::testing::{AppTester, Update};
use crux_core::Request;
use crux_http::protocol::{HttpRequest, HttpResponse, HttpResult};
use std::collections::VecDeque;

use movies_shared::capabilities::{
    into_http_result, HttpError, NetworkConstraint, RecordsOperation, RecordsOutput,
    TaskDescriptor, TaskInput, TaskOperation, WorkOutcome, MAX_RESPONSE_BODY_SIZE,
};
use movies_shared::catalog::CatalogClient;
use movies_shared::config::CatalogConfig;
use movies_shared::connectivity::Connectivity;
use movies_shared::coordinator::{DetailViewState, ListViewState};
use movies_shared::dispatcher::FetchTask;
use movies_shared::model::{CatalogList, ListKind, ListTag, MovieId, MovieRecord};
use movies_shared::{App, Effect, Event, Model};

type Tester = AppTester<App, Effect>;

fn configured(online: bool) -> (Tester, Model) {
    let app = Tester::default();
    let mut model = Model::default();
    let catalog = CatalogClient::new(&CatalogConfig::new(BASE_URL, API_KEY)).unwrap();
    let connectivity = if online {
        Connectivity::Available
    } else {
        Connectivity::Unavailable
    };
    app.update(
        Event::Configure {
            catalog: Box::new(catalog),
            connectivity,
        },
        &mut model,
    );
    (app, model)
}

/// Feeds answer events back into the app and returns every non-render
/// effect it is left waiting on.
fn settle(app: &Tester, model: &mut Model, update: Update<Effect, Event>) -> Vec<Effect> {
    let mut effects = Vec::new();
    let mut pending = VecDeque::from([update]);
    while let Some(update) = pending.pop_front() {
        effects.extend(
            update
                .effects
                .into_iter()
                .filter(|effect| !matches!(effect, Effect::Render(_))),
        );
        for event in update.events {
            pending.push_back(app.update(event, model));
        }
    }
    effects
}

fn only(mut effects: Vec<Effect>) -> Effect {
    assert_eq!(effects.len(), 1, "expected exactly one effect");
    effects.remove(0)
}

fn records(effects: Vec<Effect>) -> Request<RecordsOperation> {
    assert_matches!(only(effects), Effect::Records(request) => request)
}

fn tasks(effects: Vec<Effect>) -> Request<TaskOperation> {
    assert_matches!(only(effects), Effect::Tasks(request) => request)
}

fn http(effects: Vec<Effect>) -> Vec<Request<HttpRequest>> {
    effects
        .into_iter()
        .map(|effect| assert_matches!(effect, Effect::Http(request) => request))
        .collect()
}

fn ok(body: String) -> HttpResult {
    HttpResult::Ok(HttpResponse::status(200).body(body.into_bytes()).build())
}

/// Answers a detail-screen request the way the catalog would for `id`.
fn detail_answer(request: &HttpRequest, id: i64, title: &str) -> HttpResult {
    let path = request.url.split('?').next().unwrap_or_default();
    if path.ends_with("/reviews") {
        ok(page(&[review("r1", "critic")]))
    } else if path.ends_with("/videos") {
        ok(page(&[video("v1", "abc", "Trailer")]))
    } else {
        ok(detailed_movie(id, title).to_string())
    }
}

fn resolve_records(
    app: &Tester,
    model: &mut Model,
    request: &mut Request<RecordsOperation>,
    output: RecordsOutput,
) -> Vec<Effect> {
    let update = app.resolve(request, Ok(output)).expect("records request resolves");
    settle(app, model, update)
}

fn resolve_http(
    app: &Tester,
    model: &mut Model,
    request: &mut Request<HttpRequest>,
    result: HttpResult,
) -> Vec<Effect> {
    let update = app.resolve(request, result).expect("http request resolves");
    settle(app, model, update)
}

#[test]
fn test_configure_renders_connectivity_only() {
    let (app, model) = configured(true);

    let view = app.view(&model);
    assert!(view.online);
    assert_eq!(view.list_kind, ListKind::Popular);
    assert_eq!(view.list, ListViewState::Loading);
    assert!(view.detail.is_none());
}

#[test]
fn test_started_offline_reads_cache_without_http() {
    let (app, mut model) = configured(false);

    let update = app.update(Event::Started, &mut model);
    let mut evict = records(settle(&app, &mut model, update));
    assert_eq!(
        evict.operation,
        RecordsOperation::EvictStale {
            keep: ListTag::Popular
        }
    );

    let mut read = records(resolve_records(&app, &mut model, &mut evict, RecordsOutput::Evicted(2)));
    assert_eq!(
        read.operation,
        RecordsOperation::ListByTag {
            tag: ListTag::Popular
        }
    );

    let effects = resolve_records(&app, &mut model, &mut read, RecordsOutput::Movies(vec![]));
    assert!(effects.is_empty());
    assert_eq!(app.view(&model).list, ListViewState::NoConnectivity);
}

#[test]
fn test_started_online_fetches_merges_and_reads_back() {
    let (app, mut model) = configured(true);

    let update = app.update(Event::Started, &mut model);
    let mut evict = records(settle(&app, &mut model, update));
    let mut requests = http(resolve_records(&app, &mut model, &mut evict, RecordsOutput::Evicted(0)));
    assert_eq!(requests.len(), 1);
    let mut fetch = requests.remove(0);
    assert_eq!(fetch.operation.method, "GET");
    assert_eq!(
        fetch.operation.url,
        "https://api.themoviedb.org/3/movie/popular?api_key=test-key"
    );

    let mut merge = records(resolve_http(
        &app,
        &mut model,
        &mut fetch,
        ok(page(&[movie(1, "Heat"), movie(2, "Ronin")])),
    ));
    assert_matches!(
        &merge.operation,
        RecordsOperation::MergeListing { tag: ListTag::Popular, movies }
            if movies.iter().map(|m| m.id).eq([MovieId(1), MovieId(2)])
    );

    let mut read = records(resolve_records(&app, &mut model, &mut merge, RecordsOutput::Merged(2)));
    let stored = vec![
        MovieRecord::new(MovieId(1), "Heat").with_tag(ListTag::Popular),
        MovieRecord::new(MovieId(2), "Ronin").with_tag(ListTag::Popular),
    ];
    let effects = resolve_records(&app, &mut model, &mut read, RecordsOutput::Movies(stored.clone()));

    assert!(effects.is_empty());
    assert_eq!(app.view(&model).list, ListViewState::Success(stored));
}

#[test]
fn test_inactive_list_result_is_discarded() {
    let (app, mut model) = configured(true);
    let update = app.update(Event::Started, &mut model);
    let mut evict = records(settle(&app, &mut model, update));

    // The favorites pass waits behind the running popular pass.
    let update = app.update(
        Event::ListKindSelected {
            kind: ListKind::Favorites,
        },
        &mut model,
    );
    assert!(settle(&app, &mut model, update).is_empty());
    assert_eq!(app.view(&model).list_kind, ListKind::Favorites);

    let mut fetch = http(resolve_records(&app, &mut model, &mut evict, RecordsOutput::Evicted(0))).remove(0);
    let mut merge = records(resolve_http(&app, &mut model, &mut fetch, ok(page(&[movie(1, "Slow")]))));
    let mut read = records(resolve_records(&app, &mut model, &mut merge, RecordsOutput::Merged(1)));
    let popular = vec![MovieRecord::new(MovieId(1), "Slow").with_tag(ListTag::Popular)];

    let mut favorites = records(resolve_records(&app, &mut model, &mut read, RecordsOutput::Movies(popular)));
    assert_eq!(favorites.operation, RecordsOperation::ListFavorites);
    assert_eq!(app.view(&model).list, ListViewState::Loading);

    let saved = vec![MovieRecord::new(MovieId(9), "Saved").with_favorite(true)];
    resolve_records(&app, &mut model, &mut favorites, RecordsOutput::Movies(saved.clone()));
    assert_eq!(app.view(&model).list, ListViewState::Success(saved));
}

#[test]
fn test_offline_selection_enqueues_detail_fetch() {
    let (app, mut model) = configured(false);

    let update = app.update(Event::MovieSelected { id: MovieId(550) }, &mut model);
    let request = tasks(settle(&app, &mut model, update));

    assert_matches!(
        &request.operation,
        TaskOperation::Enqueue(descriptor) if descriptor.input == TaskInput::MovieId(550)
    );
    assert_eq!(
        app.view(&model).detail,
        Some(DetailViewState::NoConnectivity)
    );
}

#[test]
fn test_detail_waits_for_three_answers_then_store() {
    let (app, mut model) = configured(true);

    let update = app.update(Event::MovieSelected { id: MovieId(550) }, &mut model);
    let requests = http(settle(&app, &mut model, update));
    assert_eq!(requests.len(), 3);
    assert_eq!(app.view(&model).detail, Some(DetailViewState::Loading));

    let mut remaining = Vec::new();
    for mut request in requests {
        let answer = detail_answer(&request.operation, 550, "Fight Club");
        remaining = resolve_http(&app, &mut model, &mut request, answer);
    }
    let mut refresh = records(remaining);
    assert_matches!(
        &refresh.operation,
        RecordsOperation::RefreshDetails { movie } if movie.title == "Fight Club"
    );

    resolve_records(
        &app,
        &mut model,
        &mut refresh,
        RecordsOutput::Refreshed {
            favorite: Some(true),
        },
    );
    let view = app.view(&model);
    let detail = view.detail.as_ref().and_then(DetailViewState::detail).unwrap();
    assert!(detail.is_favorite);
    assert!(detail.movie.is_favorite);
    assert_eq!(detail.reviews.len(), 1);
    assert_eq!(detail.trailers().count(), 1);
}

#[test]
fn test_late_detail_answers_are_dropped() {
    let (app, mut model) = configured(true);
    let update = app.update(Event::MovieSelected { id: MovieId(1) }, &mut model);
    let abandoned = http(settle(&app, &mut model, update));
    let update = app.update(Event::MovieSelected { id: MovieId(2) }, &mut model);
    let current = http(settle(&app, &mut model, update));

    for mut request in abandoned {
        let answer = detail_answer(&request.operation, 1, "Abandoned");
        assert!(resolve_http(&app, &mut model, &mut request, answer).is_empty());
    }
    assert_eq!(app.view(&model).detail, Some(DetailViewState::Loading));

    let mut remaining = Vec::new();
    for mut request in current {
        let answer = detail_answer(&request.operation, 2, "Chosen");
        remaining = resolve_http(&app, &mut model, &mut request, answer);
    }
    let mut refresh = records(remaining);
    resolve_records(
        &app,
        &mut model,
        &mut refresh,
        RecordsOutput::Refreshed { favorite: None },
    );

    let view = app.view(&model);
    let detail = view.detail.as_ref().and_then(DetailViewState::detail).unwrap();
    assert_eq!(detail.movie.title, "Chosen");
    assert!(!detail.is_favorite);
}

#[test]
fn test_repeated_connectivity_is_ignored() {
    let (app, mut model) = configured(true);

    let update = app.update(
        Event::ConnectivityChanged {
            connectivity: Connectivity::Available,
        },
        &mut model,
    );

    assert!(update.effects.is_empty());
    assert!(update.events.is_empty());
}

#[test]
fn test_task_delivered_offline_asks_for_retry() {
    let (app, mut model) = configured(true);
    let descriptor = FetchTask::FetchMovies(CatalogList::Popular).descriptor();

    let update = app.update(
        Event::TaskDelivered {
            descriptor: descriptor.clone(),
            connectivity: Connectivity::Unavailable,
        },
        &mut model,
    );
    let request = tasks(settle(&app, &mut model, update));

    assert_matches!(
        &request.operation,
        TaskOperation::Complete { task_id, outcome: WorkOutcome::Retry }
            if *task_id == descriptor.task_id
    );
}

#[test]
fn test_delivered_listing_merges_without_eviction() {
    let (app, mut model) = configured(true);
    let descriptor = FetchTask::FetchMovies(CatalogList::TopRated).descriptor();

    let update = app.update(
        Event::TaskDelivered {
            descriptor,
            connectivity: Connectivity::Available,
        },
        &mut model,
    );
    let mut fetch = http(settle(&app, &mut model, update)).remove(0);
    assert!(fetch.operation.url.contains("/top_rated?"));

    let mut merge = records(resolve_http(&app, &mut model, &mut fetch, ok(page(&[movie(3, "Late")]))));
    assert_matches!(
        merge.operation,
        RecordsOperation::MergeListing {
            tag: ListTag::TopRated,
            ..
        }
    );

    let request = tasks(resolve_records(&app, &mut model, &mut merge, RecordsOutput::Merged(1)));
    assert_matches!(
        request.operation,
        TaskOperation::Complete {
            outcome: WorkOutcome::Success,
            ..
        }
    );
    // Background work never touches the list screen.
    assert_eq!(app.view(&model).list, ListViewState::Loading);
}

#[test]
fn test_delivered_task_outcome_follows_transport_failure() {
    let cases = [
        (
            HttpError::ConnectionError {
                host: "api.themoviedb.org".into(),
                message: "connection refused".into(),
            },
            WorkOutcome::Retry,
        ),
        (
            HttpError::ResponseTooLarge {
                size: MAX_RESPONSE_BODY_SIZE + 1,
                max: MAX_RESPONSE_BODY_SIZE,
            },
            WorkOutcome::Failure,
        ),
    ];

    for (error, expected) in cases {
        let (app, mut model) = configured(true);
        let update = app.update(
            Event::TaskDelivered {
                descriptor: FetchTask::FetchDetails(MovieId(550)).descriptor(),
                connectivity: Connectivity::Available,
            },
            &mut model,
        );
        let mut fetch = http(settle(&app, &mut model, update)).remove(0);

        let request = tasks(resolve_http(
            &app,
            &mut model,
            &mut fetch,
            into_http_result(Err(error)),
        ));

        assert_matches!(
            request.operation,
            TaskOperation::Complete { outcome, .. } if outcome == expected
        );
    }
}

#[test]
fn test_unknown_task_fails_without_work() {
    let (app, mut model) = configured(true);
    let unknown = TaskDescriptor::new(
        TaskInput::MovieTypes("now_playing".into()),
        NetworkConstraint::Connected,
    );

    let update = app.update(
        Event::TaskDelivered {
            descriptor: unknown,
            connectivity: Connectivity::Available,
        },
        &mut model,
    );
    let request = tasks(settle(&app, &mut model, update));

    assert_matches!(
        request.operation,
        TaskOperation::Complete {
            outcome: WorkOutcome::Failure,
            ..
        }
    );
}
