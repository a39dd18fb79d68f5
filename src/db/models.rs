use std::fmt;
use std::str::FromStr;

/// Track processing status. Transitions are monotonic forward through
/// the pipeline, or jump to Error from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Uploaded,
    Loaded,
    Extracting,
    FeaturesReady,
    Error,
}

impl TrackStatus {
    /// FeaturesReady and Error are terminal for the per-track pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FeaturesReady | Self::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "uploaded",
            Self::Loaded => "loaded",
            Self::Extracting => "extracting",
            Self::FeaturesReady => "features_ready",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(Self::Uploaded),
            "loaded" => Ok(Self::Loaded),
            "extracting" => Ok(Self::Extracting),
            "features_ready" => Ok(Self::FeaturesReady),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown track status '{other}'")),
        }
    }
}

/// Data for registering a new track (upload boundary).
pub struct NewTrack {
    pub id: String,
    pub original_filename: String,
    pub stored_path: String,
}

/// A track row read from the database.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    pub original_filename: String,
    pub stored_path: String,
    pub status: TrackStatus,
    pub sample_rate: Option<i64>,
    pub duration: Option<f64>,
    pub error_message: Option<String>,
    pub has_similarity: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// One directional similarity edge.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityEdge {
    pub source_track_id: String,
    pub target_track_id: String,
    pub score: f64,
}

/// Library statistics for the stats command.
#[derive(Debug)]
pub struct LibraryStats {
    pub total_tracks: i64,
    pub by_status: Vec<(String, i64)>,
    pub feature_rows: i64,
    pub edge_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            TrackStatus::Uploaded,
            TrackStatus::Loaded,
            TrackStatus::Extracting,
            TrackStatus::FeaturesReady,
            TrackStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<TrackStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<TrackStatus>().is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TrackStatus::FeaturesReady.is_terminal());
        assert!(TrackStatus::Error.is_terminal());
        assert!(!TrackStatus::Uploaded.is_terminal());
        assert!(!TrackStatus::Extracting.is_terminal());
    }
}
