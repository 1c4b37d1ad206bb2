use serde::{Deserialize, Serialize};
use std::fmt;

pub const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p/";
pub const IMDB_TITLE_URL: &str = "https://www.imdb.com/title/";
pub const YOUTUBE_WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// Catalog-assigned movie identifier
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MovieId(pub i64);

impl MovieId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MovieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Marks a cached record as part of the latest fetched page of a list.
///
/// Stored as an integer column: 0 = none, 1 = popular, 2 = top rated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListTag {
    #[default]
    None,
    Popular,
    TopRated,
}

impl ListTag {
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        match self {
            ListTag::None => 0,
            ListTag::Popular => 1,
            ListTag::TopRated => 2,
        }
    }

    #[must_use]
    pub const fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(ListTag::None),
            1 => Some(ListTag::Popular),
            2 => Some(ListTag::TopRated),
            _ => None,
        }
    }
}

/// A remote listing the catalog can page through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogList {
    Popular,
    TopRated,
}

impl CatalogList {
    #[must_use]
    pub const fn tag(self) -> ListTag {
        match self {
            CatalogList::Popular => ListTag::Popular,
            CatalogList::TopRated => ListTag::TopRated,
        }
    }

    /// Path segment relative to the catalog base URL.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            CatalogList::Popular => "popular",
            CatalogList::TopRated => "top_rated",
        }
    }

    /// Discriminator carried by deferred fetch task descriptors.
    #[must_use]
    pub const fn discriminator(self) -> &'static str {
        match self {
            CatalogList::Popular => "popular",
            CatalogList::TopRated => "top_ranked",
        }
    }

    #[must_use]
    pub fn from_discriminator(value: &str) -> Option<Self> {
        match value {
            "popular" => Some(CatalogList::Popular),
            "top_ranked" => Some(CatalogList::TopRated),
            _ => None,
        }
    }
}

/// Which catalog view is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListKind {
    #[default]
    Popular,
    TopRated,
    Favorites,
}

impl ListKind {
    /// The remote listing backing this kind; `None` for favorites,
    /// which are served from the store alone.
    #[must_use]
    pub const fn catalog_list(self) -> Option<CatalogList> {
        match self {
            ListKind::Popular => Some(CatalogList::Popular),
            ListKind::TopRated => Some(CatalogList::TopRated),
            ListKind::Favorites => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ListKind::Popular => "popular",
            ListKind::TopRated => "top_rated",
            ListKind::Favorites => "favorites",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CatalogList> for ListKind {
    fn from(list: CatalogList) -> Self {
        match list {
            CatalogList::Popular => ListKind::Popular,
            CatalogList::TopRated => ListKind::TopRated,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageSize {
    Thumbnail,
    Poster,
    Backdrop,
}

impl ImageSize {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ImageSize::Thumbnail => "w92",
            ImageSize::Poster => "w500",
            ImageSize::Backdrop => "w1280",
        }
    }
}

fn image_url(size: ImageSize, path: &str) -> String {
    format!(
        "{IMAGE_BASE_URL}{}/{}",
        size.as_str(),
        path.trim_start_matches('/')
    )
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieRecord {
    pub id: MovieId,
    pub title: String,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub release_date: String,
    pub overview: String,
    pub genres: Vec<String>,
    pub homepage: Option<String>,
    pub imdb_id: Option<String>,
    pub is_favorite: bool,
    pub list_tag: ListTag,
}

impl MovieRecord {
    pub fn new(id: MovieId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_tag(mut self, tag: ListTag) -> Self {
        self.list_tag = tag;
        self
    }

    #[must_use]
    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.is_favorite = favorite;
        self
    }

    /// Neither favorited nor part of a latest listing page.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        !self.is_favorite && self.list_tag == ListTag::None
    }

    pub fn poster_url(&self, size: ImageSize) -> Option<String> {
        self.poster_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| image_url(size, p))
    }

    pub fn backdrop_url(&self) -> Option<String> {
        self.backdrop_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| image_url(ImageSize::Backdrop, p))
    }

    pub fn imdb_url(&self) -> Option<String> {
        self.imdb_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .map(|id| format!("{IMDB_TITLE_URL}{id}"))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: String,
    pub author: String,
    pub content: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: String,
    pub key: String,
    pub name: String,
    pub site: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

impl Video {
    pub fn watch_url(&self) -> Option<String> {
        if self.site.eq_ignore_ascii_case("youtube") && !self.key.is_empty() {
            Some(format!("{YOUTUBE_WATCH_URL}{}", self.key))
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_trailer(&self) -> bool {
        self.kind.eq_ignore_ascii_case("trailer")
    }
}

/// Everything the detail screen shows for one movie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieDetail {
    pub movie: MovieRecord,
    pub reviews: Vec<Review>,
    pub videos: Vec<Video>,
    pub is_favorite: bool,
}

impl MovieDetail {
    /// Trailers that can be opened in a player.
    pub fn trailers(&self) -> impl Iterator<Item = &Video> {
        self.videos
            .iter()
            .filter(|v| v.is_trailer() && v.watch_url().is_some())
    }
}
