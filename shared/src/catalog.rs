use crux_http::{Http, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::capabilities::{HttpError, ValidatedUrl};
use crate::config::CatalogConfig;
use crate::error::ErrorKind;
use crate::event::Event;
use crate::model::{CatalogList, MovieId, MovieRecord, Review, Video};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("transport error: {0}")]
    Transport(#[from] crux_http::HttpError),

    #[error("catalog responded with HTTP {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("malformed response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("could not build catalog request: {0}")]
    Request(#[from] HttpError),

    #[error("catalog client is not configured")]
    NotConfigured,
}

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Transport(_) => ErrorKind::Transport,
            CatalogError::Remote { status: 404, .. } => ErrorKind::NotFound,
            CatalogError::Remote { .. } | CatalogError::Decode { .. } => ErrorKind::Remote,
            CatalogError::Request(_) | CatalogError::NotConfigured => ErrorKind::Configuration,
        }
    }

    /// Only connection failures and timeouts; a shell-side rejection such as
    /// an oversized body arrives as `Url` and fails the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CatalogError::Transport(crux_http::HttpError::Io(_) | crux_http::HttpError::Timeout)
        )
    }
}

#[derive(Deserialize)]
struct Page<T> {
    results: Vec<T>,
}

#[derive(Deserialize)]
struct RemoteGenre {
    name: String,
}

#[derive(Deserialize)]
struct RemoteMovie {
    id: i64,
    #[serde(default)]
    title: String,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    release_date: Option<String>,
    overview: Option<String>,
    #[serde(default)]
    genres: Vec<RemoteGenre>,
    homepage: Option<String>,
    imdb_id: Option<String>,
}

impl From<RemoteMovie> for MovieRecord {
    fn from(remote: RemoteMovie) -> Self {
        Self {
            id: MovieId(remote.id),
            title: remote.title,
            poster_path: remote.poster_path,
            backdrop_path: remote.backdrop_path,
            release_date: remote.release_date.unwrap_or_default(),
            overview: remote.overview.unwrap_or_default(),
            genres: remote.genres.into_iter().map(|g| g.name).collect(),
            homepage: remote.homepage.filter(|h| !h.is_empty()),
            imdb_id: remote.imdb_id.filter(|i| !i.is_empty()),
            ..Self::default()
        }
    }
}

#[derive(Deserialize)]
struct RemoteErrorBody {
    status_message: String,
}

type RawResult = crux_http::Result<Response<Vec<u8>>>;

/// Builds catalog requests for the core's `Http` capability and decodes
/// their responses. Performs no retries.
#[derive(Clone, Debug)]
pub struct CatalogClient {
    base_url: Url,
    api_key: SecretString,
}

impl CatalogClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, HttpError> {
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).map_err(|e| HttpError::InvalidUrl {
            url: base.clone(),
            reason: e.to_string(),
        })?;
        ValidatedUrl::from_url(&base_url)?;

        Ok(Self {
            base_url,
            api_key: SecretString::new(config.api_key.expose_secret().clone()),
        })
    }

    /// First page of a listing, in catalog order.
    pub fn fetch_list<F>(
        &self,
        http: &Http<Event>,
        list: CatalogList,
        make_event: F,
    ) -> Result<(), CatalogError>
    where
        F: FnOnce(Result<Vec<MovieRecord>, CatalogError>) -> Event + Send + 'static,
    {
        self.get(http, list.path(), move |endpoint, raw| {
            let movies = decode::<Page<RemoteMovie>>(&endpoint, raw).map(|page| {
                debug!(%endpoint, count = page.results.len(), "listing fetched");
                page.results.into_iter().map(MovieRecord::from).collect()
            });
            make_event(movies)
        })
    }

    pub fn fetch_details<F>(
        &self,
        http: &Http<Event>,
        id: MovieId,
        make_event: F,
    ) -> Result<(), CatalogError>
    where
        F: FnOnce(Result<MovieRecord, CatalogError>) -> Event + Send + 'static,
    {
        self.get(http, &id.to_string(), move |endpoint, raw| {
            make_event(decode::<RemoteMovie>(&endpoint, raw).map(MovieRecord::from))
        })
    }

    pub fn fetch_reviews<F>(
        &self,
        http: &Http<Event>,
        id: MovieId,
        make_event: F,
    ) -> Result<(), CatalogError>
    where
        F: FnOnce(Result<Vec<Review>, CatalogError>) -> Event + Send + 'static,
    {
        self.get(http, &format!("{id}/reviews"), move |endpoint, raw| {
            make_event(decode::<Page<Review>>(&endpoint, raw).map(|page| page.results))
        })
    }

    pub fn fetch_videos<F>(
        &self,
        http: &Http<Event>,
        id: MovieId,
        make_event: F,
    ) -> Result<(), CatalogError>
    where
        F: FnOnce(Result<Vec<Video>, CatalogError>) -> Event + Send + 'static,
    {
        self.get(http, &format!("{id}/videos"), move |endpoint, raw| {
            make_event(decode::<Page<Video>>(&endpoint, raw).map(|page| page.results))
        })
    }

    fn endpoint(&self, path: &str) -> Result<ValidatedUrl, CatalogError> {
        let mut url = self.base_url.join(path).map_err(|e| HttpError::InvalidUrl {
            url: format!("{}{path}", self.base_url),
            reason: e.to_string(),
        })?;
        url.query_pairs_mut()
            .append_pair("api_key", self.api_key.expose_secret());
        Ok(ValidatedUrl::from_url(&url)?)
    }

    fn get<F>(&self, http: &Http<Event>, path: &str, make_event: F) -> Result<(), CatalogError>
    where
        F: FnOnce(String, RawResult) -> Event + Send + 'static,
    {
        let url = self.endpoint(path)?;
        let endpoint = url.redacted().to_string();
        debug!(%endpoint, "requesting catalog");

        http.get(url.as_str())
            .header("Accept", "application/json")
            .send(move |raw| make_event(endpoint, raw));
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, raw: RawResult) -> Result<T, CatalogError> {
    let mut response = match raw {
        Ok(response) => response,
        Err(crux_http::HttpError::Http { code, body, .. }) => {
            return Err(remote_failure(endpoint, code.into(), body.as_deref()));
        }
        Err(e) => {
            warn!(%endpoint, error = %e, "catalog unreachable");
            return Err(CatalogError::Transport(e));
        }
    };

    let status: u16 = response.status().into();
    let body = response.take_body().unwrap_or_default();
    if !(200..300).contains(&status) {
        return Err(remote_failure(endpoint, status, Some(&body)));
    }
    parse_body(endpoint, &body)
}

fn parse_body<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> Result<T, CatalogError> {
    serde_json::from_slice(body).map_err(|e| CatalogError::Decode {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

fn remote_failure(endpoint: &str, status: u16, body: Option<&[u8]>) -> CatalogError {
    let message = body
        .and_then(|body| serde_json::from_slice::<RemoteErrorBody>(body).ok())
        .map_or_else(|| format!("HTTP {status}"), |body| body.status_message);
    warn!(status, %endpoint, "catalog request failed");
    CatalogError::Remote { status, message }
}
