mod ffmpeg;
mod stream;
mod wav;

use std::path::Path;

use thiserror::Error;

use crate::config::FfmpegConfig;
use crate::MIN_DURATION_SECS;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported audio format '{ext}'. Supported formats: {}", crate::SUPPORTED_EXTENSIONS.join(", "))]
    UnsupportedFormat { ext: String },
    #[error("Unable to decode audio file {path}: {source}")]
    DecodeFailure {
        path: String,
        #[source]
        source: BackendError,
    },
    #[error("Decoded audio is empty")]
    EmptyAudio,
    #[error("Audio duration {0:.2}s is less than minimum {MIN_DURATION_SECS}s")]
    TooShort(f64),
}

/// Error from a single decode backend. Failure of one backend falls
/// through to the next; the last one is carried into `DecodeFailure`.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("hound: {0}")]
    Wav(String),
    #[error("symphonia: {0}")]
    Stream(String),
    #[error("ffmpeg: {0}")]
    Ffmpeg(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raw backend output: interleaved samples, not yet validated.
#[derive(Debug)]
pub(crate) struct RawAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Normalized decode result: mono f32 samples.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode an audio file to mono f32, trying backends in priority order:
/// hound (sample-accurate WAV), symphonia (streaming), ffmpeg subprocess.
/// First success wins; post-decode validation runs once on the winner.
pub fn decode(path: &Path, ffmpeg_config: &FfmpegConfig) -> Result<DecodedAudio, DecodeError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    if !crate::SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(DecodeError::UnsupportedFormat { ext });
    }

    if !path.exists() {
        return Err(DecodeError::DecodeFailure {
            path: path.display().to_string(),
            source: BackendError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "file not found",
            )),
        });
    }

    type Backend<'a> = (&'static str, Box<dyn Fn(&Path) -> Result<RawAudio, BackendError> + 'a>);
    let backends: Vec<Backend> = vec![
        ("hound", Box::new(wav::load)),
        ("symphonia", Box::new(stream::load)),
        ("ffmpeg", Box::new(|p: &Path| ffmpeg::load(p, ffmpeg_config))),
    ];

    let mut last_error: Option<BackendError> = None;
    for (name, backend) in backends {
        log::debug!("Attempting {} backend for {}", name, path.display());
        match backend(path) {
            Ok(raw) => {
                log::debug!(
                    "{} backend succeeded for {} (sr={}, frames={})",
                    name,
                    path.display(),
                    raw.sample_rate,
                    raw.samples.len() / raw.channels.max(1)
                );
                return post_process(raw);
            }
            Err(e) => {
                log::debug!("{} backend failed for {}: {}", name, path.display(), e);
                last_error = Some(e);
            }
        }
    }

    Err(DecodeError::DecodeFailure {
        path: path.display().to_string(),
        source: last_error.unwrap_or_else(|| {
            BackendError::Io(std::io::Error::other("no decode backend available"))
        }),
    })
}

/// Validation applied once, regardless of which backend succeeded:
/// downmix to mono (arithmetic mean of channels), reject empty or
/// too-short audio.
fn post_process(raw: RawAudio) -> Result<DecodedAudio, DecodeError> {
    if raw.samples.is_empty() || raw.sample_rate == 0 {
        return Err(DecodeError::EmptyAudio);
    }

    let samples = if raw.channels > 1 {
        downmix_to_mono(&raw.samples, raw.channels)
    } else {
        raw.samples
    };

    let duration = samples.len() as f64 / raw.sample_rate as f64;
    if duration <= 0.0 {
        return Err(DecodeError::EmptyAudio);
    }
    if duration < MIN_DURATION_SECS {
        return Err(DecodeError::TooShort(duration));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: raw.sample_rate,
    })
}

/// Downmix interleaved multi-channel audio to mono (mean of channels).
fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    let num_frames = interleaved.len() / channels;
    let scale = 1.0 / channels as f32;
    let mut mono = Vec::with_capacity(num_frames);

    for frame in 0..num_frames {
        let mut sum = 0.0f32;
        for ch in 0..channels {
            sum += interleaved[frame * channels + ch];
        }
        mono.push(sum * scale);
    }

    mono
}
