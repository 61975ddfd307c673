//! Track persistence.
//!
//! `TrackStore` is the storage seam used by the batch writer and the CLI.
//! `SqliteTrackStore` keeps one row per record, keyed by the record key, so
//! re-importing a library updates rows in place.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::PersistenceError;
use crate::models::PersistedTrack;

pub trait TrackStore {
    /// Insert or replace the row for `track.record_key`. Single atomic statement.
    fn upsert(&mut self, track: &PersistedTrack) -> Result<(), PersistenceError>;

    fn get(&self, record_key: &str) -> Result<Option<PersistedTrack>, PersistenceError>;

    /// All rows in insertion order.
    fn all(&self) -> Result<Vec<PersistedTrack>, PersistenceError>;

    /// Remove every row, returning how many were deleted.
    fn delete_all(&mut self) -> Result<usize, PersistenceError>;
}

pub struct SqliteTrackStore {
    conn: Connection,
}

const SELECT_COLUMNS: &str = "SELECT id, record_key, title, artist, album, year, genre, \
     confidence, matched_title, matched_artist, matched_album FROM tracks";

impl SqliteTrackStore {
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tracks (
                id INTEGER PRIMARY KEY,
                record_key TEXT NOT NULL UNIQUE,
                title TEXT,
                artist TEXT,
                album TEXT,
                year INTEGER,
                genre TEXT,
                confidence REAL,
                matched_title TEXT,
                matched_artist TEXT,
                matched_album TEXT
            );",
        )?;
        Ok(Self { conn })
    }

    fn row_to_track(row: &Row) -> rusqlite::Result<PersistedTrack> {
        Ok(PersistedTrack {
            id: row.get(0)?,
            record_key: row.get(1)?,
            title: row.get(2)?,
            artist: row.get(3)?,
            album: row.get(4)?,
            year: row.get(5)?,
            genre: row.get(6)?,
            confidence: row.get(7)?,
            matched_title: row.get(8)?,
            matched_artist: row.get(9)?,
            matched_album: row.get(10)?,
        })
    }
}

impl TrackStore for SqliteTrackStore {
    fn upsert(&mut self, track: &PersistedTrack) -> Result<(), PersistenceError> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            INSERT INTO tracks (record_key, title, artist, album, year, genre,
                                confidence, matched_title, matched_artist, matched_album)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(record_key) DO UPDATE SET
              title=excluded.title,
              artist=excluded.artist,
              album=excluded.album,
              year=excluded.year,
              genre=excluded.genre,
              confidence=excluded.confidence,
              matched_title=excluded.matched_title,
              matched_artist=excluded.matched_artist,
              matched_album=excluded.matched_album
            "#,
        )?;
        stmt.execute(params![
            track.record_key,
            track.title,
            track.artist,
            track.album,
            track.year,
            track.genre,
            track.confidence,
            track.matched_title,
            track.matched_artist,
            track.matched_album,
        ])?;
        Ok(())
    }

    fn get(&self, record_key: &str) -> Result<Option<PersistedTrack>, PersistenceError> {
        let sql = format!("{} WHERE record_key = ?1", SELECT_COLUMNS);
        let track = self
            .conn
            .query_row(&sql, params![record_key], Self::row_to_track)
            .optional()?;
        Ok(track)
    }

    fn all(&self) -> Result<Vec<PersistedTrack>, PersistenceError> {
        let sql = format!("{} ORDER BY id", SELECT_COLUMNS);
        let mut stmt = self.conn.prepare(&sql)?;
        let tracks = stmt
            .query_map([], Self::row_to_track)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tracks)
    }

    fn delete_all(&mut self) -> Result<usize, PersistenceError> {
        Ok(self.conn.execute("DELETE FROM tracks", [])?)
    }
}
