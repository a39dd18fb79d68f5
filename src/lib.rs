pub mod config;
pub mod db;
pub mod decoder;
pub mod features;
pub mod pipeline;
pub mod similarity;

/// Audio file extensions we accept for ingest.
/// Anything else is rejected before a single decode attempt.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    // Native (hound)
    "wav",
    // Native (symphonia)
    "mp3", "flac", "ogg", "aif", "aiff",
];

/// Minimum decoded duration in seconds; shorter clips are rejected.
pub const MIN_DURATION_SECS: f64 = 0.5;

/// Application name for XDG paths
pub const APP_NAME: &str = "soundalike";
