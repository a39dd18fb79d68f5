pub mod models;
pub mod queries;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Malformed stored value: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        // WAL mode for better concurrent read performance
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "synchronous", "NORMAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.migrate()?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i32 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap_or(0);

        if version < 1 {
            self.migrate_v1()?;
        }

        self.conn.pragma_update(None, "user_version", 1)?;
        Ok(())
    }

    /// V1: tracks + audio_features + similarity_edges
    fn migrate_v1(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS tracks (
                id                  TEXT PRIMARY KEY,
                original_filename   TEXT NOT NULL,
                stored_path         TEXT NOT NULL,
                status              TEXT NOT NULL DEFAULT 'uploaded',
                sample_rate         INTEGER,
                duration            REAL,
                error_message       TEXT,
                has_similarity      INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_tracks_status ON tracks(status);
            CREATE INDEX IF NOT EXISTS idx_tracks_created ON tracks(created_at);

            CREATE TABLE IF NOT EXISTS audio_features (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                track_id            TEXT NOT NULL UNIQUE REFERENCES tracks(id) ON DELETE CASCADE,

                -- Baseline scalars
                rms                 REAL,
                spectral_centroid   REAL,
                peak_amplitude      REAL,

                -- Extended scalars (null when unavailable)
                bpm                 REAL,
                key                 TEXT,
                key_strength        REAL,
                spectral_flux       REAL,
                rolloff             REAL,
                flatness            REAL,

                -- Vector fields as JSON
                mfcc                TEXT NOT NULL,
                rms_envelope        TEXT NOT NULL,

                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at          TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_features_track ON audio_features(track_id);

            CREATE TABLE IF NOT EXISTS similarity_edges (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                source_track_id     TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                target_track_id     TEXT NOT NULL REFERENCES tracks(id) ON DELETE CASCADE,
                score               REAL NOT NULL,
                created_at          TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE(source_track_id, target_track_id)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_source ON similarity_edges(source_track_id);
            ",
        )?;
        Ok(())
    }
}
