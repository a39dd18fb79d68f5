use rusqlite::types::Type;
use rusqlite::{params, Row};

use crate::features::FeatureVector;

use super::models::{LibraryStats, NewTrack, SimilarityEdge, Track, TrackStatus};
use super::{Database, DbError, Result};

fn track_from_row(row: &Row) -> rusqlite::Result<Track> {
    let status: String = row.get(3)?;
    let status = status.parse::<TrackStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
    })?;
    Ok(Track {
        id: row.get(0)?,
        original_filename: row.get(1)?,
        stored_path: row.get(2)?,
        status,
        sample_rate: row.get(4)?,
        duration: row.get(5)?,
        error_message: row.get(6)?,
        has_similarity: row.get::<_, i64>(7)? != 0,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn features_from_row(row: &Row) -> rusqlite::Result<FeatureVector> {
    let mfcc_json: String = row.get(9)?;
    let envelope_json: String = row.get(10)?;
    let mfcc: Vec<f64> = serde_json::from_str(&mfcc_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, Type::Text, Box::new(e))
    })?;
    let rms_envelope: Vec<f64> = serde_json::from_str(&envelope_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e))
    })?;
    Ok(FeatureVector {
        rms: row.get(0)?,
        spectral_centroid: row.get(1)?,
        peak_amplitude: row.get(2)?,
        bpm: row.get(3)?,
        key: row.get(4)?,
        key_strength: row.get(5)?,
        spectral_flux: row.get(6)?,
        rolloff: row.get(7)?,
        flatness: row.get(8)?,
        mfcc,
        rms_envelope,
    })
}

const TRACK_COLUMNS: &str = "id, original_filename, stored_path, status, sample_rate, \
     duration, error_message, has_similarity, created_at, updated_at";

const FEATURE_COLUMNS: &str = "rms, spectral_centroid, peak_amplitude, bpm, key, key_strength, \
     spectral_flux, rolloff, flatness, mfcc, rms_envelope";

impl Database {
    /// Register a new track as `uploaded`. Idempotent per id.
    pub fn insert_track(&self, t: &NewTrack) -> Result<()> {
        self.conn.execute(
            "INSERT INTO tracks (id, original_filename, stored_path, status)
             VALUES (?1, ?2, ?3, 'uploaded')
             ON CONFLICT(id) DO NOTHING",
            params![t.id, t.original_filename, t.stored_path],
        )?;
        Ok(())
    }

    pub fn get_track(&self, id: &str) -> Result<Option<Track>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], track_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All tracks, most recently created first.
    pub fn list_tracks(&self) -> Result<Vec<Track>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRACK_COLUMNS} FROM tracks ORDER BY created_at DESC, id DESC"
        ))?;
        let tracks = stmt
            .query_map([], track_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tracks)
    }

    /// Decode success: record stream parameters and advance to `loaded`.
    pub fn mark_loaded(&self, id: &str, sample_rate: i64, duration: f64) -> Result<()> {
        self.conn.execute(
            "UPDATE tracks SET status = 'loaded', sample_rate = ?2, duration = ?3,
                 error_message = NULL, updated_at = datetime('now')
             WHERE id = ?1",
            params![id, sample_rate, duration],
        )?;
        Ok(())
    }

    /// Mark extraction in flight, so status polling observes progress.
    pub fn mark_extracting(&self, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE tracks SET status = 'extracting', error_message = NULL,
                 updated_at = datetime('now')
             WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    /// Stage failure: error status with a human-readable message.
    pub fn mark_error(&self, id: &str, message: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE tracks SET status = 'error', error_message = ?2,
                 updated_at = datetime('now')
             WHERE id = ?1",
            params![id, message],
        )?;
        Ok(())
    }

    pub fn set_has_similarity(&self, id: &str, value: bool) -> Result<()> {
        self.conn.execute(
            "UPDATE tracks SET has_similarity = ?2, updated_at = datetime('now')
             WHERE id = ?1",
            params![id, value as i64],
        )?;
        Ok(())
    }

    /// Write or overwrite the single feature row for a track and advance
    /// it to `features_ready`, as one transaction. Safe to re-run on an
    /// already-processed track.
    pub fn store_features_ready(&self, track_id: &str, fv: &FeatureVector) -> Result<()> {
        let mfcc_json = serde_json::to_string(&fv.mfcc)
            .map_err(|e| DbError::Malformed(e.to_string()))?;
        let envelope_json = serde_json::to_string(&fv.rms_envelope)
            .map_err(|e| DbError::Malformed(e.to_string()))?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO audio_features (
                track_id, rms, spectral_centroid, peak_amplitude,
                bpm, key, key_strength, spectral_flux, rolloff, flatness,
                mfcc, rms_envelope, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, datetime('now'))
            ON CONFLICT(track_id) DO UPDATE SET
                rms = excluded.rms,
                spectral_centroid = excluded.spectral_centroid,
                peak_amplitude = excluded.peak_amplitude,
                bpm = excluded.bpm,
                key = excluded.key,
                key_strength = excluded.key_strength,
                spectral_flux = excluded.spectral_flux,
                rolloff = excluded.rolloff,
                flatness = excluded.flatness,
                mfcc = excluded.mfcc,
                rms_envelope = excluded.rms_envelope,
                updated_at = datetime('now')",
            params![
                track_id,
                fv.rms,
                fv.spectral_centroid,
                fv.peak_amplitude,
                fv.bpm,
                fv.key,
                fv.key_strength,
                fv.spectral_flux,
                fv.rolloff,
                fv.flatness,
                mfcc_json,
                envelope_json,
            ],
        )?;
        tx.execute(
            "UPDATE tracks SET status = 'features_ready', error_message = NULL,
                 updated_at = datetime('now')
             WHERE id = ?1",
            params![track_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_features(&self, track_id: &str) -> Result<Option<FeatureVector>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FEATURE_COLUMNS} FROM audio_features WHERE track_id = ?1"
        ))?;
        let mut rows = stmt.query_map(params![track_id], features_from_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Every stored feature row except the given track's — the
    /// similarity scan. Isolated here so an indexed neighbor structure
    /// can replace the linear scan later.
    pub fn feature_rows_except(&self, track_id: &str) -> Result<Vec<(String, FeatureVector)>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT track_id, {FEATURE_COLUMNS} FROM audio_features
             WHERE track_id != ?1 ORDER BY track_id"
        ))?;
        let rows = stmt
            .query_map(params![track_id], |row| {
                let id: String = row.get(0)?;
                // Feature columns shifted by one
                let mfcc_json: String = row.get(10)?;
                let envelope_json: String = row.get(11)?;
                let mfcc: Vec<f64> = serde_json::from_str(&mfcc_json).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e))
                })?;
                let rms_envelope: Vec<f64> =
                    serde_json::from_str(&envelope_json).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(11, Type::Text, Box::new(e))
                    })?;
                Ok((
                    id,
                    FeatureVector {
                        rms: row.get(1)?,
                        spectral_centroid: row.get(2)?,
                        peak_amplitude: row.get(3)?,
                        bpm: row.get(4)?,
                        key: row.get(5)?,
                        key_strength: row.get(6)?,
                        spectral_flux: row.get(7)?,
                        rolloff: row.get(8)?,
                        flatness: row.get(9)?,
                        mfcc,
                        rms_envelope,
                    },
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Atomically replace the outgoing edge set for a source track.
    /// The immediate transaction holds SQLite's write lock for the whole
    /// delete+insert span — the single-writer guarantee per source.
    pub fn replace_edges(&self, source_id: &str, edges: &[(String, f64)]) -> Result<usize> {
        let tx = rusqlite::Transaction::new_unchecked(
            &self.conn,
            rusqlite::TransactionBehavior::Immediate,
        )?;
        tx.execute(
            "DELETE FROM similarity_edges WHERE source_track_id = ?1",
            params![source_id],
        )?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO similarity_edges (source_track_id, target_track_id, score)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (target, score) in edges {
                stmt.execute(params![source_id, target, score])?;
            }
        }
        tx.commit()?;
        Ok(edges.len())
    }

    /// Outgoing edges for a source, nearest first.
    pub fn edges_from(&self, source_id: &str) -> Result<Vec<SimilarityEdge>> {
        let mut stmt = self.conn.prepare(
            "SELECT source_track_id, target_track_id, score
             FROM similarity_edges WHERE source_track_id = ?1
             ORDER BY score ASC, target_track_id",
        )?;
        let edges = stmt
            .query_map(params![source_id], |row| {
                Ok(SimilarityEdge {
                    source_track_id: row.get(0)?,
                    target_track_id: row.get(1)?,
                    score: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(edges)
    }

    /// Library statistics.
    pub fn stats(&self) -> Result<LibraryStats> {
        let total_tracks: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM tracks", [], |row| row.get(0))?;
        let feature_rows: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM audio_features", [], |row| row.get(0))?;
        let edge_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM similarity_edges",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(
            "SELECT status, COUNT(*) FROM tracks GROUP BY status ORDER BY COUNT(*) DESC",
        )?;
        let by_status: Vec<(String, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(LibraryStats {
            total_tracks,
            by_status,
            feature_rows,
            edge_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::MFCC_LEN;

    fn test_track(id: &str) -> NewTrack {
        NewTrack {
            id: id.to_string(),
            original_filename: format!("{id}.wav"),
            stored_path: format!("/uploads/{id}.wav"),
        }
    }

    fn baseline_features(rms: f64) -> FeatureVector {
        FeatureVector {
            rms: Some(rms),
            spectral_centroid: Some(0.2),
            peak_amplitude: Some(0.9),
            ..FeatureVector::default()
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = Database::open_in_memory().unwrap();
        db.insert_track(&test_track("t1")).unwrap();

        let track = db.get_track("t1").unwrap().unwrap();
        assert_eq!(track.status, TrackStatus::Uploaded);
        assert_eq!(track.original_filename, "t1.wav");
        assert!(track.error_message.is_none());
        assert!(!track.has_similarity);

        assert!(db.get_track("missing").unwrap().is_none());
    }

    #[test]
    fn test_insert_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.insert_track(&test_track("t1")).unwrap();
        db.insert_track(&test_track("t1")).unwrap();
        assert_eq!(db.stats().unwrap().total_tracks, 1);
    }

    #[test]
    fn test_status_transitions_and_error_message() {
        let db = Database::open_in_memory().unwrap();
        db.insert_track(&test_track("t1")).unwrap();

        db.mark_loaded("t1", 44100, 2.0).unwrap();
        let track = db.get_track("t1").unwrap().unwrap();
        assert_eq!(track.status, TrackStatus::Loaded);
        assert_eq!(track.sample_rate, Some(44100));
        assert_eq!(track.duration, Some(2.0));

        db.mark_extracting("t1").unwrap();
        assert_eq!(
            db.get_track("t1").unwrap().unwrap().status,
            TrackStatus::Extracting
        );

        db.mark_error("t1", "decode blew up").unwrap();
        let track = db.get_track("t1").unwrap().unwrap();
        assert_eq!(track.status, TrackStatus::Error);
        assert_eq!(track.error_message.as_deref(), Some("decode blew up"));

        // Recovering clears the message — error_message set iff error
        db.mark_loaded("t1", 44100, 2.0).unwrap();
        assert!(db.get_track("t1").unwrap().unwrap().error_message.is_none());
    }

    #[test]
    fn test_feature_round_trip_and_overwrite() {
        let db = Database::open_in_memory().unwrap();
        db.insert_track(&test_track("t1")).unwrap();

        let fv = FeatureVector {
            bpm: Some(120.5),
            key: Some("A minor".into()),
            key_strength: Some(0.8),
            rms_envelope: vec![0.1, 0.2, 0.3],
            ..baseline_features(0.5)
        };
        db.store_features_ready("t1", &fv).unwrap();

        let stored = db.get_features("t1").unwrap().unwrap();
        assert_eq!(stored, fv);
        assert_eq!(stored.mfcc.len(), MFCC_LEN);
        assert_eq!(
            db.get_track("t1").unwrap().unwrap().status,
            TrackStatus::FeaturesReady
        );

        // Overwrite keeps a single row per track
        let fv2 = baseline_features(0.7);
        db.store_features_ready("t1", &fv2).unwrap();
        assert_eq!(db.get_features("t1").unwrap().unwrap(), fv2);
        assert_eq!(db.stats().unwrap().feature_rows, 1);
    }

    #[test]
    fn test_feature_rows_except_skips_source() {
        let db = Database::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            db.insert_track(&test_track(id)).unwrap();
            db.store_features_ready(id, &baseline_features(0.5)).unwrap();
        }

        let rows = db.feature_rows_except("a").unwrap();
        let ids: Vec<&str> = rows.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_replace_edges_atomically_rebuilds() {
        let db = Database::open_in_memory().unwrap();
        for id in ["a", "b", "c"] {
            db.insert_track(&test_track(id)).unwrap();
        }

        db.replace_edges("a", &[("b".into(), 0.5), ("c".into(), 0.7)])
            .unwrap();
        assert_eq!(db.edges_from("a").unwrap().len(), 2);

        // Recompute with a smaller set: old edges must be gone
        db.replace_edges("a", &[("b".into(), 0.4)]).unwrap();
        let edges = db.edges_from("a").unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_track_id, "b");
        assert!((edges[0].score - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_cascade_delete_removes_features_and_edges() {
        let db = Database::open_in_memory().unwrap();
        db.insert_track(&test_track("a")).unwrap();
        db.insert_track(&test_track("b")).unwrap();
        db.store_features_ready("a", &baseline_features(0.5)).unwrap();
        db.replace_edges("a", &[("b".into(), 0.1)]).unwrap();

        db.conn
            .execute("DELETE FROM tracks WHERE id = 'a'", [])
            .unwrap();
        assert!(db.get_features("a").unwrap().is_none());
        assert!(db.edges_from("a").unwrap().is_empty());
    }

    #[test]
    fn test_list_tracks_most_recent_first() {
        let db = Database::open_in_memory().unwrap();
        // Same created_at second is likely; id DESC breaks the tie
        db.insert_track(&test_track("t1")).unwrap();
        db.insert_track(&test_track("t2")).unwrap();
        let tracks = db.list_tracks().unwrap();
        assert_eq!(tracks.len(), 2);
        assert_eq!(tracks[0].id, "t2");
    }
}
