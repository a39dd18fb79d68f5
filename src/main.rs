use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use soundalike::db::models::{Track, TrackStatus};
use soundalike::db::Database;
use soundalike::features::DspCapability;
use soundalike::pipeline::{self, JobQueue, WorkerPool};

#[derive(Parser)]
#[command(name = "soundalike", version, about = "Audio similarity pipeline")]
struct Cli {
    /// Path to the SQLite database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest audio files: decode, extract features, compute similarity
    Process {
        /// Audio files to process
        files: Vec<PathBuf>,

        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Resume tracks left in non-terminal states (crash recovery)
    Worker {
        /// Number of parallel workers (0 = auto-detect from config)
        #[arg(short = 'j', long, default_value = "0")]
        jobs: usize,
    },

    /// Show track status (all tracks, or one by id prefix)
    Status {
        /// Track id (or unique prefix)
        id: Option<String>,
    },

    /// List tracks most similar to a given track
    Similar {
        /// Track id (or unique prefix)
        id: String,

        /// Number of results
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Recompute similarity edges for a track
    Recompute {
        /// Track id (or unique prefix)
        id: String,
    },

    /// Show library statistics
    Stats,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = soundalike::config::AppConfig::load();

    // Resolve database path: CLI > config > XDG default
    let db_path = cli
        .db_path
        .or(config.db_path.clone())
        .unwrap_or_else(soundalike::config::default_db_path);
    log::info!("Database: {}", db_path.display());

    let db = Database::open(&db_path).context("Failed to open database")?;

    match cli.command {
        Commands::Process { files, jobs } => {
            if files.is_empty() {
                anyhow::bail!("No files to process. Pass audio file paths as arguments.");
            }
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };

            let mut ids = Vec::with_capacity(files.len());
            let mut seed = Vec::with_capacity(files.len());
            for file in &files {
                let (id, job) = pipeline::submit(&db, file).context("Failed to register track")?;
                ids.push(id);
                seed.push(job);
            }

            drive_jobs(&db, &db_path, &config, workers, &ids, seed)?;

            let mut ready = 0usize;
            let mut failed = Vec::new();
            for id in &ids {
                if let Some(track) = db.get_track(id).context("Query failed")? {
                    match track.status {
                        TrackStatus::FeaturesReady => ready += 1,
                        TrackStatus::Error => failed.push(track),
                        _ => {}
                    }
                }
            }
            println!(
                "Processing complete: {} ready, {} failed",
                ready,
                failed.len()
            );
            for track in &failed {
                println!(
                    "  {}: {}",
                    track.original_filename,
                    track.error_message.as_deref().unwrap_or("unknown error")
                );
            }
        }

        Commands::Worker { jobs } => {
            let workers = if jobs > 0 { jobs } else { config.resolve_workers() };
            let tracks = db.list_tracks().context("Query failed")?;
            let mut ids = Vec::new();
            let mut seed = Vec::new();
            for track in &tracks {
                if let Some(job) = pipeline::resume_job(track) {
                    ids.push(track.id.clone());
                    seed.push(job);
                }
            }
            if seed.is_empty() {
                println!("Nothing to resume: all tracks are in a terminal state.");
                return Ok(());
            }
            let resumed = seed.len();
            drive_jobs(&db, &db_path, &config, workers, &ids, seed)?;
            println!("Worker pass complete: {} tracks resumed", resumed);
        }

        Commands::Status { id } => match id {
            Some(prefix) => {
                let track = resolve_track(&db, &prefix)?;
                print_track_detail(&track);
            }
            None => {
                let tracks = db.list_tracks().context("Query failed")?;
                if tracks.is_empty() {
                    println!("No tracks in the library.");
                    return Ok(());
                }
                print_track_table(&tracks);
            }
        },

        Commands::Similar { id, limit } => {
            let track = resolve_track(&db, &id)?;
            let edges = soundalike::similarity::neighbors(&db, &track.id)
                .context("Query failed")?;
            if edges.is_empty() {
                if track.has_similarity {
                    println!("No other tracks with features to compare against.");
                } else {
                    println!(
                        "No similarity data for \"{}\". Run `soundalike recompute {}` first.",
                        track.original_filename,
                        short_id(&track.id)
                    );
                }
                return Ok(());
            }

            println!("Tracks similar to \"{}\":", track.original_filename);
            println!();
            println!("{:<10} {:<40} {:>8}", "Id", "File", "Dist");
            println!("{}", "-".repeat(60));
            for edge in edges.iter().take(limit) {
                let name = db
                    .get_track(&edge.target_track_id)
                    .context("Query failed")?
                    .map(|t| t.original_filename)
                    .unwrap_or_else(|| "(deleted)".to_string());
                println!(
                    "{:<10} {:<40} {:>8.4}",
                    short_id(&edge.target_track_id),
                    truncate(&name, 40),
                    edge.score
                );
            }
            println!();
            println!("Dist = weighted feature distance (0 = identical, lower = more similar)");
        }

        Commands::Recompute { id } => {
            let track = resolve_track(&db, &id)?;
            match soundalike::similarity::recompute(&db, &track.id) {
                Ok(count) => {
                    db.set_has_similarity(&track.id, true)
                        .context("Failed to update track")?;
                    println!(
                        "Recompute complete: {} edges for \"{}\"",
                        count, track.original_filename
                    );
                }
                Err(soundalike::similarity::SimilarityError::IncompleteFeatures(_)) => {
                    anyhow::bail!(
                        "\"{}\" has no complete features yet (status: {}). Process it first.",
                        track.original_filename,
                        track.status
                    );
                }
                Err(e) => return Err(e).context("Recompute failed"),
            }
        }

        Commands::Stats => {
            let stats = db.stats().context("Failed to get stats")?;
            println!("Library Statistics");
            println!("==================");
            println!("Total tracks:     {}", stats.total_tracks);
            println!("Feature rows:     {}", stats.feature_rows);
            println!("Similarity edges: {}", stats.edge_count);
            if !stats.by_status.is_empty() {
                println!();
                println!("By status:");
                for (status, count) in &stats.by_status {
                    println!("  {:<16} {}", status, count);
                }
            }
        }
    }

    Ok(())
}

/// Run a batch of jobs through the worker pool, with a progress bar
/// tracking how many of the affected tracks have reached a terminal
/// state.
fn drive_jobs(
    db: &Database,
    db_path: &std::path::Path,
    config: &soundalike::config::AppConfig,
    workers: usize,
    ids: &[String],
    seed: Vec<soundalike::pipeline::Job>,
) -> Result<()> {
    let capability = DspCapability::detect(config);
    let queue = JobQueue::new();
    let pool = WorkerPool::spawn(
        Arc::clone(&queue),
        db_path.to_path_buf(),
        Arc::new(config.clone()),
        capability,
        workers,
    );
    for job in seed {
        queue.push(job);
    }

    let bar = ProgressBar::new(ids.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} tracks {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    while !queue.is_idle() {
        bar.set_position(count_terminal(db, ids)? as u64);
        std::thread::sleep(Duration::from_millis(150));
    }
    bar.set_position(count_terminal(db, ids)? as u64);
    bar.finish();
    pool.shutdown(&queue);
    Ok(())
}

fn count_terminal(db: &Database, ids: &[String]) -> Result<usize> {
    let mut done = 0;
    for id in ids {
        if let Some(track) = db.get_track(id).context("Query failed")? {
            if track.status.is_terminal() {
                done += 1;
            }
        }
    }
    Ok(done)
}

/// Look up a track by full id or unique id prefix.
fn resolve_track(db: &Database, prefix: &str) -> Result<Track> {
    if let Some(track) = db.get_track(prefix).context("Query failed")? {
        return Ok(track);
    }
    let mut matches = db
        .list_tracks()
        .context("Query failed")?
        .into_iter()
        .filter(|t| t.id.starts_with(prefix));
    match (matches.next(), matches.next()) {
        (Some(track), None) => Ok(track),
        (Some(_), Some(_)) => anyhow::bail!("Id prefix '{}' is ambiguous", prefix),
        (None, _) => anyhow::bail!("No track with id '{}'", prefix),
    }
}

fn print_track_detail(t: &Track) {
    println!("Track {}", t.id);
    println!("  File:       {}", t.original_filename);
    println!("  Path:       {}", t.stored_path);
    println!("  Status:     {}", t.status);
    if let Some(sr) = t.sample_rate {
        println!("  Sample rate: {} Hz", sr);
    }
    if let Some(d) = t.duration {
        println!("  Duration:   {:.2}s", d);
    }
    if let Some(msg) = &t.error_message {
        println!("  Error:      {}", msg);
    }
    println!("  Similarity: {}", if t.has_similarity { "computed" } else { "pending" });
    println!("  Created:    {}", t.created_at);
}

fn print_track_table(tracks: &[Track]) {
    println!(
        "{:<10} {:<30} {:<15} {:>8}  {}",
        "Id", "File", "Status", "Secs", "Error"
    );
    println!("{}", "-".repeat(80));
    for t in tracks {
        let duration = t
            .duration
            .map(|d| format!("{:.1}", d))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<30} {:<15} {:>8}  {}",
            short_id(&t.id),
            truncate(&t.original_filename, 30),
            t.status.to_string(),
            duration,
            t.error_message.as_deref().unwrap_or("")
        );
    }
}

/// Leading id characters for display. Tolerates ids shorter than the
/// display width (hand-edited databases).
fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_tolerates_short_ids() {
        assert_eq!(short_id("0192a3b4-f00d-4c5e-8a9b-0c1d2e3f4a5b"), "0192a3b4");
        assert_eq!(short_id("t1"), "t1");
        assert_eq!(short_id(""), "");
    }

    #[test]
    fn test_truncate_keeps_short_names() {
        assert_eq!(truncate("short.wav", 30), "short.wav");
        assert_eq!(truncate("a-very-long-file-name.wav", 10), "a-very-...");
    }
}
