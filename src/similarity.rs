//! Pairwise similarity over stored feature vectors.
//!
//! Distance is a weighted Euclidean metric over the baseline scalars
//! plus a half-weighted MFCC term. Lower scores mean more similar.
//! Edges are directional: recomputing for a source track replaces its
//! whole outgoing edge set and never touches other sources' edges.

use thiserror::Error;

use crate::db::models::SimilarityEdge;
use crate::db::{Database, DbError};
use crate::features::FeatureVector;

const WEIGHT_RMS: f64 = 1.0;
const WEIGHT_CENTROID: f64 = 1.0;
const WEIGHT_PEAK: f64 = 1.0;
const WEIGHT_MFCC: f64 = 0.5;

#[derive(Error, Debug)]
pub enum SimilarityError {
    /// The source track has no feature row or is missing a baseline
    /// scalar. Nothing is written in this case.
    #[error("track '{0}' has no complete baseline features")]
    IncompleteFeatures(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Weighted distance between two feature vectors with complete
/// baselines. Candidates missing a baseline scalar are skipped by the
/// caller, so the zero fallbacks here are never load-bearing.
fn distance(a: &FeatureVector, b: &FeatureVector) -> f64 {
    let d_rms = a.rms.unwrap_or(0.0) - b.rms.unwrap_or(0.0);
    let d_centroid = a.spectral_centroid.unwrap_or(0.0) - b.spectral_centroid.unwrap_or(0.0);
    let d_peak = a.peak_amplitude.unwrap_or(0.0) - b.peak_amplitude.unwrap_or(0.0);

    // Overlapping prefix; stored vectors are normally the same fixed
    // length, with zero fill standing in for "unavailable".
    let n = a.mfcc.len().min(b.mfcc.len());
    let mfcc_sq: f64 = a.mfcc[..n]
        .iter()
        .zip(&b.mfcc[..n])
        .map(|(x, y)| (x - y) * (x - y))
        .sum();

    (WEIGHT_RMS * d_rms * d_rms
        + WEIGHT_CENTROID * d_centroid * d_centroid
        + WEIGHT_PEAK * d_peak * d_peak
        + WEIGHT_MFCC * mfcc_sq)
        .sqrt()
}

/// Recompute every outgoing edge for `source_id` against all other
/// tracks with stored features, replacing the previous edge set
/// atomically. Returns the number of edges written.
///
/// Linear scan over the library; fine at current scale, and the query
/// surface is shaped so an indexed neighbor search can slot in later.
pub fn recompute(db: &Database, source_id: &str) -> Result<usize, SimilarityError> {
    let source = db
        .get_features(source_id)?
        .filter(FeatureVector::has_baseline)
        .ok_or_else(|| SimilarityError::IncompleteFeatures(source_id.to_string()))?;

    let mut edges: Vec<(String, f64)> = db
        .feature_rows_except(source_id)?
        .into_iter()
        .filter(|(_, fv)| fv.has_baseline())
        .map(|(id, fv)| {
            let score = distance(&source, &fv);
            (id, score)
        })
        .collect();
    edges.sort_by(|a, b| a.1.total_cmp(&b.1));

    let written = db.replace_edges(source_id, &edges)?;
    log::debug!("Similarity for {source_id}: {written} edges");
    Ok(written)
}

/// Stored neighbors for a track, nearest first.
pub fn neighbors(db: &Database, source_id: &str) -> Result<Vec<SimilarityEdge>, SimilarityError> {
    Ok(db.edges_from(source_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::NewTrack;

    fn setup(ids: &[&str]) -> Database {
        let db = Database::open_in_memory().unwrap();
        for id in ids {
            db.insert_track(&NewTrack {
                id: id.to_string(),
                original_filename: format!("{id}.wav"),
                stored_path: format!("/uploads/{id}.wav"),
            })
            .unwrap();
        }
        db
    }

    fn baseline(rms: f64, centroid: f64, peak: f64) -> FeatureVector {
        FeatureVector {
            rms: Some(rms),
            spectral_centroid: Some(centroid),
            peak_amplitude: Some(peak),
            ..FeatureVector::default()
        }
    }

    #[test]
    fn test_three_track_baseline_distances() {
        let db = setup(&["a", "b", "c"]);
        db.store_features_ready("a", &baseline(0.1, 0.2, 0.3)).unwrap();
        db.store_features_ready("b", &baseline(0.1, 0.2, 0.3)).unwrap();
        db.store_features_ready("c", &baseline(0.4, 0.6, 0.3)).unwrap();

        let written = recompute(&db, "a").unwrap();
        assert_eq!(written, 2);

        let edges = neighbors(&db, "a").unwrap();
        assert_eq!(edges.len(), 2);
        // Identical vectors: zero distance, nearest first
        assert_eq!(edges[0].target_track_id, "b");
        assert!(edges[0].score.abs() < 1e-12);
        // MFCC placeholders are identical zeros, so the score reduces
        // to the plain three-term Euclidean distance
        let expected = (0.3f64 * 0.3 + 0.4 * 0.4).sqrt();
        assert_eq!(edges[1].target_track_id, "c");
        assert!((edges[1].score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_mfcc_term_is_half_weighted() {
        let mut a = baseline(0.5, 0.5, 0.5);
        let mut b = baseline(0.5, 0.5, 0.5);
        a.mfcc[0] = 1.0;
        b.mfcc[0] = 3.0;
        // 0.5 * (1 - 3)^2 = 2.0
        assert!((distance(&a, &b) - 2.0f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_mfcc_prefix_on_length_mismatch() {
        let mut a = baseline(0.0, 0.0, 0.0);
        let mut b = baseline(0.0, 0.0, 0.0);
        a.mfcc = vec![1.0, 2.0];
        b.mfcc = vec![1.0, 2.0, 99.0];
        assert!(distance(&a, &b).abs() < 1e-12);
    }

    #[test]
    fn test_recompute_is_idempotent_and_excludes_self() {
        let db = setup(&["a", "b"]);
        db.store_features_ready("a", &baseline(0.1, 0.1, 0.1)).unwrap();
        db.store_features_ready("b", &baseline(0.2, 0.2, 0.2)).unwrap();

        assert_eq!(recompute(&db, "a").unwrap(), 1);
        assert_eq!(recompute(&db, "a").unwrap(), 1);

        let edges = neighbors(&db, "a").unwrap();
        assert_eq!(edges.len(), 1);
        assert_ne!(edges[0].target_track_id, "a");
    }

    #[test]
    fn test_incomplete_source_writes_nothing() {
        let db = setup(&["a", "b"]);
        db.store_features_ready("b", &baseline(0.2, 0.2, 0.2)).unwrap();

        // No feature row at all for a
        let err = recompute(&db, "a").unwrap_err();
        assert!(matches!(err, SimilarityError::IncompleteFeatures(_)));
        assert!(neighbors(&db, "a").unwrap().is_empty());

        // A feature row missing a baseline scalar is also incomplete
        let partial = FeatureVector {
            rms: Some(0.1),
            ..FeatureVector::default()
        };
        db.store_features_ready("a", &partial).unwrap();
        let err = recompute(&db, "a").unwrap_err();
        assert!(matches!(err, SimilarityError::IncompleteFeatures(_)));
    }

    #[test]
    fn test_incomplete_candidates_are_skipped() {
        let db = setup(&["a", "b", "c"]);
        db.store_features_ready("a", &baseline(0.1, 0.1, 0.1)).unwrap();
        db.store_features_ready("b", &baseline(0.2, 0.2, 0.2)).unwrap();
        db.store_features_ready(
            "c",
            &FeatureVector {
                peak_amplitude: Some(0.9),
                ..FeatureVector::default()
            },
        )
        .unwrap();

        assert_eq!(recompute(&db, "a").unwrap(), 1);
        assert_eq!(neighbors(&db, "a").unwrap()[0].target_track_id, "b");
    }
}
