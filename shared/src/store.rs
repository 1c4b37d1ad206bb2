use rusqlite::{params, Connection, OptionalExtension, Params, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::model::{ListTag, MovieId, MovieRecord};

/// Bumped whenever the table layout changes. Older databases are dropped
/// and rebuilt, since everything in them except favorites is re-fetchable.
pub const SCHEMA_VERSION: i64 = 5;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("movie {0} not found")]
    NotFound(MovieId),

    #[error("corrupted record {id}: {reason}")]
    Corrupted { id: i64, reason: String },

    #[error("schema version {found} is newer than supported {max}")]
    FutureSchema { found: i64, max: i64 },

    #[error("lock acquisition failed")]
    LockFailed,
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

// ============================================================================
// Store Contract
// ============================================================================

/// Keyed movie table with the two classification fields.
///
/// Every operation is atomic per record. `replace_listing` additionally runs
/// as one transaction so a listing never appears half-merged.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: MovieId) -> Result<MovieRecord, StoreError>;

    /// Writes every field of `record`, flags included.
    async fn upsert(&self, record: &MovieRecord) -> Result<(), StoreError>;

    async fn list_favorites(&self) -> Result<Vec<MovieRecord>, StoreError>;

    /// Records carrying `tag`, in the order of the page that tagged them.
    async fn list_by_tag(&self, tag: ListTag) -> Result<Vec<MovieRecord>, StoreError>;

    async fn set_favorite(&self, id: MovieId, favorite: bool) -> Result<(), StoreError>;

    async fn set_tag(&self, id: MovieId, tag: ListTag) -> Result<(), StoreError>;

    async fn clear_all_tags(&self) -> Result<(), StoreError>;

    /// Removes every non-favorite whose tag differs from `keep`.
    async fn delete_stale_non_favorites(&self, keep: ListTag) -> Result<usize, StoreError>;

    /// Merges a freshly fetched page. Records previously tagged `tag` that
    /// are missing from `records` fall back to `ListTag::None`; the rest are
    /// inserted or updated with `tag`. Favorite flags are never touched.
    async fn replace_listing(&self, tag: ListTag, records: &[MovieRecord])
        -> Result<(), StoreError>;

    /// Updates catalog fields of an existing record, leaving its flags alone.
    /// Returns `false` when the record is not cached.
    async fn refresh_details(&self, record: &MovieRecord) -> Result<bool, StoreError>;

    /// Deletes the record if it is neither a favorite nor tagged.
    async fn remove_if_stale(&self, id: MovieId) -> Result<bool, StoreError>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS movies (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    poster_path TEXT,
    backdrop_path TEXT,
    release_date TEXT NOT NULL DEFAULT '',
    overview TEXT NOT NULL DEFAULT '',
    genres TEXT NOT NULL DEFAULT '[]',
    homepage TEXT,
    imdb_id TEXT,
    is_favorite INTEGER NOT NULL DEFAULT 0,
    list_tag INTEGER NOT NULL DEFAULT 0,
    position INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_movies_list_tag ON movies(list_tag, position);
CREATE INDEX IF NOT EXISTS idx_movies_favorite ON movies(is_favorite);
";

const SELECT_COLUMNS: &str = "SELECT id, title, poster_path, backdrop_path, release_date, \
     overview, genres, homepage, imdb_id, is_favorite, list_tag FROM movies";

const UPSERT: &str = "
INSERT INTO movies (id, title, poster_path, backdrop_path, release_date, overview,
                    genres, homepage, imdb_id, is_favorite, list_tag)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    poster_path = excluded.poster_path,
    backdrop_path = excluded.backdrop_path,
    release_date = excluded.release_date,
    overview = excluded.overview,
    genres = excluded.genres,
    homepage = excluded.homepage,
    imdb_id = excluded.imdb_id,
    is_favorite = excluded.is_favorite,
    list_tag = excluded.list_tag";

// List responses carry no genres, home page or IMDB id; keep what detail
// fetches stored earlier.
const MERGE_LISTED: &str = "
INSERT INTO movies (id, title, poster_path, backdrop_path, release_date, overview,
                    genres, homepage, imdb_id, is_favorite, list_tag, position)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, ?11)
ON CONFLICT(id) DO UPDATE SET
    title = excluded.title,
    poster_path = excluded.poster_path,
    backdrop_path = excluded.backdrop_path,
    release_date = excluded.release_date,
    overview = excluded.overview,
    genres = CASE WHEN excluded.genres = '[]' THEN movies.genres ELSE excluded.genres END,
    homepage = COALESCE(excluded.homepage, movies.homepage),
    imdb_id = COALESCE(excluded.imdb_id, movies.imdb_id),
    list_tag = excluded.list_tag,
    position = excluded.position";

const REFRESH_DETAILS: &str = "
UPDATE movies SET
    title = ?2,
    poster_path = COALESCE(?3, poster_path),
    backdrop_path = COALESCE(?4, backdrop_path),
    release_date = ?5,
    overview = ?6,
    genres = ?7,
    homepage = ?8,
    imdb_id = ?9
WHERE id = ?1";

struct RawRow {
    record: MovieRecord,
    genres: String,
    list_tag: i64,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record: MovieRecord {
                id: MovieId(row.get(0)?),
                title: row.get(1)?,
                poster_path: row.get(2)?,
                backdrop_path: row.get(3)?,
                release_date: row.get(4)?,
                overview: row.get(5)?,
                genres: Vec::new(),
                homepage: row.get(7)?,
                imdb_id: row.get(8)?,
                is_favorite: row.get(9)?,
                list_tag: ListTag::None,
            },
            genres: row.get(6)?,
            list_tag: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<MovieRecord, StoreError> {
        let mut record = self.record;
        let id = record.id.get();
        record.genres = serde_json::from_str(&self.genres).map_err(|e| StoreError::Corrupted {
            id,
            reason: format!("genres: {e}"),
        })?;
        record.list_tag = ListTag::from_i64(self.list_tag).ok_or_else(|| StoreError::Corrupted {
            id,
            reason: format!("unknown list tag {}", self.list_tag),
        })?;
        Ok(record)
    }
}

/// SQLite-backed record store. One connection behind a mutex; the
/// composition root creates exactly one per database file.
pub struct SqliteRecordStore {
    conn: Mutex<Connection>,
}

impl SqliteRecordStore {
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path.as_ref())?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockFailed)
    }

    fn query_records<P: Params>(
        conn: &Connection,
        sql: &str,
        params: P,
    ) -> Result<Vec<MovieRecord>, StoreError> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawRow::read)?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let found: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if found > SCHEMA_VERSION {
        return Err(StoreError::FutureSchema {
            found,
            max: SCHEMA_VERSION,
        });
    }

    // Version 0 with an existing table predates versioning altogether.
    let outdated = if found == 0 {
        has_movies_table(conn)?
    } else {
        found < SCHEMA_VERSION
    };
    if outdated {
        warn!(found, current = SCHEMA_VERSION, "dropping outdated movie cache");
        conn.execute_batch("DROP TABLE IF EXISTS movies;")?;
    }

    conn.execute_batch(SCHEMA)?;
    if found != SCHEMA_VERSION {
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        info!(version = SCHEMA_VERSION, "movie store schema ready");
    }
    Ok(())
}

fn has_movies_table(conn: &Connection) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'movies'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn genres_json(record: &MovieRecord) -> Result<String, StoreError> {
    Ok(serde_json::to_string(&record.genres)?)
}

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    async fn get(&self, id: MovieId) -> Result<MovieRecord, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.get()],
                RawRow::read,
            )
            .optional()?;
        row.ok_or(StoreError::NotFound(id))?.into_record()
    }

    async fn upsert(&self, record: &MovieRecord) -> Result<(), StoreError> {
        let genres = genres_json(record)?;
        let conn = self.lock()?;
        conn.execute(
            UPSERT,
            params![
                record.id.get(),
                record.title,
                record.poster_path,
                record.backdrop_path,
                record.release_date,
                record.overview,
                genres,
                record.homepage,
                record.imdb_id,
                record.is_favorite,
                record.list_tag.as_i64(),
            ],
        )?;
        Ok(())
    }

    async fn list_favorites(&self) -> Result<Vec<MovieRecord>, StoreError> {
        let conn = self.lock()?;
        Self::query_records(
            &conn,
            &format!("{SELECT_COLUMNS} WHERE is_favorite = 1 ORDER BY id"),
            [],
        )
    }

    async fn list_by_tag(&self, tag: ListTag) -> Result<Vec<MovieRecord>, StoreError> {
        let conn = self.lock()?;
        Self::query_records(
            &conn,
            &format!("{SELECT_COLUMNS} WHERE list_tag = ?1 ORDER BY position, id"),
            params![tag.as_i64()],
        )
    }

    async fn set_favorite(&self, id: MovieId, favorite: bool) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE movies SET is_favorite = ?1 WHERE id = ?2",
            params![favorite, id.get()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn set_tag(&self, id: MovieId, tag: ListTag) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE movies SET list_tag = ?1 WHERE id = ?2",
            params![tag.as_i64(), id.get()],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn clear_all_tags(&self) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute("UPDATE movies SET list_tag = 0, position = 0", [])?;
        Ok(())
    }

    async fn delete_stale_non_favorites(&self, keep: ListTag) -> Result<usize, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM movies WHERE is_favorite = 0 AND list_tag != ?1",
            params![keep.as_i64()],
        )?;
        Ok(removed)
    }

    async fn replace_listing(
        &self,
        tag: ListTag,
        records: &[MovieRecord],
    ) -> Result<(), StoreError> {
        let genres = records
            .iter()
            .map(genres_json)
            .collect::<Result<Vec<_>, _>>()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE movies SET list_tag = 0, position = 0 WHERE list_tag = ?1",
            params![tag.as_i64()],
        )?;
        {
            let mut stmt = tx.prepare(MERGE_LISTED)?;
            for (position, (record, genres)) in records.iter().zip(&genres).enumerate() {
                stmt.execute(params![
                    record.id.get(),
                    record.title,
                    record.poster_path,
                    record.backdrop_path,
                    record.release_date,
                    record.overview,
                    genres,
                    record.homepage,
                    record.imdb_id,
                    tag.as_i64(),
                    i64::try_from(position).unwrap_or(i64::MAX),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn refresh_details(&self, record: &MovieRecord) -> Result<bool, StoreError> {
        let genres = genres_json(record)?;
        let conn = self.lock()?;
        let changed = conn.execute(
            REFRESH_DETAILS,
            params![
                record.id.get(),
                record.title,
                record.poster_path,
                record.backdrop_path,
                record.release_date,
                record.overview,
                genres,
                record.homepage,
                record.imdb_id,
            ],
        )?;
        Ok(changed > 0)
    }

    async fn remove_if_stale(&self, id: MovieId) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM movies WHERE id = ?1 AND is_favorite = 0 AND list_tag = 0",
            params![id.get()],
        )?;
        Ok(removed > 0)
    }
}
