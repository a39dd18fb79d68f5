//! Track processing pipeline: decode, extract, similarity.
//!
//! Each stage reads its inputs from the database, does its work, and
//! persists results before the next stage is enqueued. A crash between
//! stages loses nothing but an enqueued job; re-submitting the job
//! repeats the stage against the persisted state.

pub mod queue;

use std::path::Path;

use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::models::NewTrack;
use crate::db::{self, Database};
use crate::decoder;
use crate::features::{extractor_for, DspCapability};
use crate::similarity::{self, SimilarityError};

pub use queue::{Job, JobQueue, WorkerPool};

/// Register a file for processing and return the new track id with the
/// decode job to enqueue. The file stays where it is; only its path is
/// recorded.
pub fn submit(db: &Database, path: &Path) -> db::Result<(String, Job)> {
    let id = Uuid::new_v4().to_string();
    let original_filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    db.insert_track(&NewTrack {
        id: id.clone(),
        original_filename,
        stored_path: path.display().to_string(),
    })?;
    log::info!("Registered {} as track {id}", path.display());
    Ok((id.clone(), Job::Decode(id)))
}

/// The job that would move a track forward from its current state, if
/// any. Used to resume work left unfinished by a crash or interrupt.
pub fn resume_job(track: &crate::db::models::Track) -> Option<Job> {
    use crate::db::models::TrackStatus;
    match track.status {
        TrackStatus::Uploaded => Some(Job::Decode(track.id.clone())),
        // Extracting means the stage was cut off mid-flight; the stage
        // is idempotent, so just run it again
        TrackStatus::Loaded | TrackStatus::Extracting => Some(Job::Extract(track.id.clone())),
        TrackStatus::FeaturesReady if !track.has_similarity => {
            Some(Job::Similarity(track.id.clone()))
        }
        TrackStatus::FeaturesReady | TrackStatus::Error => None,
    }
}

/// Execute one job and return its follow-up jobs. Domain failures are
/// persisted on the track; only infrastructure failures (the database
/// itself) end up in the log with no status change.
pub fn run_job(db: &Database, config: &AppConfig, capability: DspCapability, job: Job) -> Vec<Job> {
    let outcome = match &job {
        Job::Decode(id) => decode_stage(db, config, id),
        Job::Extract(id) => extract_stage(db, config, capability, id),
        Job::Similarity(id) => similarity_stage(db, id),
    };
    match outcome {
        Ok(next) => next.into_iter().collect(),
        Err(e) => {
            log::error!("{} stage for track {}: {e}", job.name(), job.track_id());
            Vec::new()
        }
    }
}

/// Run jobs to completion on the current thread, breadth-first.
pub fn drain(db: &Database, config: &AppConfig, capability: DspCapability, seed: Vec<Job>) {
    let mut pending: std::collections::VecDeque<Job> = seed.into();
    while let Some(job) = pending.pop_front() {
        pending.extend(run_job(db, config, capability, job));
    }
}

/// Validate that the file decodes, and record its stream parameters.
fn decode_stage(db: &Database, config: &AppConfig, id: &str) -> db::Result<Option<Job>> {
    let Some(track) = db.get_track(id)? else {
        // Redelivered job for a deleted track; not an error
        log::warn!("Decode job for unknown track {id}; dropping");
        return Ok(None);
    };
    match decoder::decode(Path::new(&track.stored_path), &config.ffmpeg) {
        Ok(audio) => {
            db.mark_loaded(id, audio.sample_rate as i64, audio.duration_secs())?;
            log::debug!(
                "Loaded {} ({} Hz, {:.2}s)",
                track.original_filename,
                audio.sample_rate,
                audio.duration_secs()
            );
            Ok(Some(Job::Extract(id.to_string())))
        }
        Err(e) => {
            log::warn!("Decode failed for {}: {e}", track.original_filename);
            db.mark_error(id, &e.to_string())?;
            Ok(None)
        }
    }
}

/// Decode again and compute the feature vector. Stages share no
/// memory, so the audio is re-read from the stored path.
fn extract_stage(
    db: &Database,
    config: &AppConfig,
    capability: DspCapability,
    id: &str,
) -> db::Result<Option<Job>> {
    let Some(track) = db.get_track(id)? else {
        log::warn!("Extract job for unknown track {id}; dropping");
        return Ok(None);
    };
    db.mark_extracting(id)?;
    let audio = match decoder::decode(Path::new(&track.stored_path), &config.ffmpeg) {
        Ok(audio) => audio,
        Err(e) => {
            log::warn!("Re-decode failed for {}: {e}", track.original_filename);
            db.mark_error(id, &e.to_string())?;
            return Ok(None);
        }
    };
    let features = extractor_for(capability).extract(&audio.samples, audio.sample_rate);
    db.store_features_ready(id, &features)?;
    log::debug!("Features ready for {}", track.original_filename);
    Ok(Some(Job::Similarity(id.to_string())))
}

/// Fire-and-forget: a similarity failure never degrades the track's
/// features_ready status, it only leaves has_similarity unset.
fn similarity_stage(db: &Database, id: &str) -> db::Result<Option<Job>> {
    match similarity::recompute(db, id) {
        Ok(count) => {
            db.set_has_similarity(id, true)?;
            log::info!("Similarity for track {id}: {count} edges");
        }
        Err(SimilarityError::IncompleteFeatures(_)) => {
            log::warn!("Skipping similarity for track {id}: features incomplete");
        }
        Err(SimilarityError::Db(e)) => return Err(e),
    }
    Ok(None)
}
