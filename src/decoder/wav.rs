//! Native WAV backend (hound): sample-accurate, no resampling.

use std::path::Path;

use super::{BackendError, RawAudio};

pub(crate) fn load(path: &Path) -> Result<RawAudio, BackendError> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| BackendError::Wav(e.to_string()))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| BackendError::Wav(e.to_string()))?,
        hound::SampleFormat::Int => {
            // Normalize by the full scale of the source bit depth.
            let full_scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / full_scale))
                .collect::<Result<_, _>>()
                .map_err(|e| BackendError::Wav(e.to_string()))?
        }
    };

    Ok(RawAudio {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels as usize,
    })
}
