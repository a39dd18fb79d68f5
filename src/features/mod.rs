mod baseline;
mod extended;
mod framing;

use thiserror::Error;

use crate::config::AppConfig;

/// MFCC vectors are always exactly this long; a zero-filled vector is
/// the "unavailable" placeholder, never a null or a shorter vector.
pub const MFCC_LEN: usize = 13;

/// Fixed-schema feature vector for one track. Every field is always
/// populated: extended scalars are `None` when the DSP capability is
/// missing or their family failed.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    // Baseline tier
    pub rms: Option<f64>,
    pub spectral_centroid: Option<f64>,
    pub peak_amplitude: Option<f64>,
    // Extended tier
    pub bpm: Option<f64>,
    pub key: Option<String>,
    pub key_strength: Option<f64>,
    pub spectral_flux: Option<f64>,
    pub rolloff: Option<f64>,
    pub flatness: Option<f64>,
    /// Always MFCC_LEN elements; all zero when unavailable.
    pub mfcc: Vec<f64>,
    /// Empty when unavailable.
    pub rms_envelope: Vec<f64>,
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self {
            rms: None,
            spectral_centroid: None,
            peak_amplitude: None,
            bpm: None,
            key: None,
            key_strength: None,
            spectral_flux: None,
            rolloff: None,
            flatness: None,
            mfcc: vec![0.0; MFCC_LEN],
            rms_envelope: Vec::new(),
        }
    }
}

impl FeatureVector {
    /// True when all three baseline scalars are present — the
    /// similarity precondition.
    pub fn has_baseline(&self) -> bool {
        self.rms.is_some() && self.spectral_centroid.is_some() && self.peak_amplitude.is_some()
    }
}

/// Failure of a single extended feature family. Absorbed inside the
/// extractor; never surfaced to callers.
#[derive(Error, Debug)]
#[error("{0}")]
pub(crate) struct FamilyError(pub String);

/// Process-lifetime DSP capability flag, resolved once at startup and
/// injected into extractor selection. Absence is a normal operating
/// mode, not an error.
#[derive(Debug, Clone, Copy)]
pub struct DspCapability {
    extended: bool,
}

impl DspCapability {
    /// Probe once: honor the config/env kill switches, then verify the
    /// spectral engine with a self-test.
    pub fn detect(config: &AppConfig) -> Self {
        if config.disable_dsp || std::env::var_os("SOUNDALIKE_DISABLE_DSP").is_some() {
            log::info!("Extended DSP tier disabled by configuration");
            return Self { extended: false };
        }
        let extended = extended::self_test();
        if extended {
            log::info!("Extended DSP tier available");
        } else {
            log::warn!("Spectral engine self-test failed; running baseline-only");
        }
        Self { extended }
    }

    pub fn baseline_only() -> Self {
        Self { extended: false }
    }

    pub fn full() -> Self {
        Self { extended: true }
    }

    pub fn has_extended(&self) -> bool {
        self.extended
    }
}

/// One extraction interface over both tiers. `extract` never fails:
/// feature families degrade to placeholders individually.
pub trait Extractor: Send + Sync {
    fn extract(&self, samples: &[f32], sample_rate: u32) -> FeatureVector;
}

/// Select the extractor implementation for the resolved capability.
pub fn extractor_for(capability: DspCapability) -> Box<dyn Extractor> {
    if capability.has_extended() {
        Box::new(ExtendedExtractor)
    } else {
        Box::new(BaselineExtractor)
    }
}

/// Compute one extended feature family; on failure log and leave the
/// placeholder in place.
fn family<T>(name: &str, f: impl FnOnce() -> Result<T, FamilyError>) -> Option<T> {
    match f() {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("Feature family '{name}' failed: {e}");
            None
        }
    }
}

/// Baseline-only extraction: O(n) amplitude statistics, mean |x| as the
/// spectral-centroid stand-in.
pub struct BaselineExtractor;

impl Extractor for BaselineExtractor {
    fn extract(&self, samples: &[f32], _sample_rate: u32) -> FeatureVector {
        let (rms, peak) = baseline::amplitude_stats(samples);
        FeatureVector {
            rms: Some(rms),
            spectral_centroid: Some(baseline::mean_abs(samples)),
            peak_amplitude: Some(peak),
            ..FeatureVector::default()
        }
    }
}

/// Full extraction: baseline plus the five extended families, each in
/// its own protected step.
pub struct ExtendedExtractor;

impl Extractor for ExtendedExtractor {
    fn extract(&self, samples: &[f32], sample_rate: u32) -> FeatureVector {
        let (rms, peak) = baseline::amplitude_stats(samples);

        let shape = family("spectral shape", || {
            extended::spectral_shape(samples, sample_rate)
        });
        let bpm = family("tempo", || extended::tempo_bpm(samples, sample_rate));
        let key = family("key", || extended::key_estimate(samples, sample_rate));
        let mfcc = family("mfcc", || extended::mfcc_mean(samples, sample_rate, MFCC_LEN));
        let envelope = family("rms envelope", || extended::rms_envelope(samples));

        // Centroid stays a baseline feature: if the spectral family
        // failed, fall back to the O(n) stand-in.
        let centroid = shape
            .as_ref()
            .map(|s| s.centroid_hz)
            .unwrap_or_else(|| baseline::mean_abs(samples));

        let (key_name, key_strength) = match key {
            Some((name, strength)) => (Some(name), Some(strength)),
            None => (None, None),
        };

        FeatureVector {
            rms: Some(rms),
            spectral_centroid: Some(centroid),
            peak_amplitude: Some(peak),
            bpm,
            key: key_name,
            key_strength,
            spectral_flux: shape.as_ref().map(|s| s.flux),
            rolloff: shape.as_ref().map(|s| s.rolloff_hz),
            flatness: shape.as_ref().map(|s| s.flatness),
            mfcc: mfcc.unwrap_or_else(|| vec![0.0; MFCC_LEN]),
            rms_envelope: envelope.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, secs: f64, sample_rate: u32) -> Vec<f32> {
        let n = (secs * sample_rate as f64) as usize;
        (0..n)
            .map(|i| {
                (2.0 * std::f64::consts::PI * freq * i as f64 / sample_rate as f64).sin() as f32
            })
            .collect()
    }

    #[test]
    fn test_baseline_extractor_populates_placeholders() {
        let samples = sine(440.0, 1.0, 44100);
        let fv = BaselineExtractor.extract(&samples, 44100);

        assert!(fv.rms.is_some());
        assert!(fv.spectral_centroid.is_some());
        assert!(fv.peak_amplitude.is_some());
        assert!(fv.has_baseline());

        // Extended tier absent, placeholders in place
        assert!(fv.bpm.is_none());
        assert!(fv.key.is_none());
        assert!(fv.key_strength.is_none());
        assert!(fv.spectral_flux.is_none());
        assert!(fv.rolloff.is_none());
        assert!(fv.flatness.is_none());
        assert_eq!(fv.mfcc, vec![0.0; MFCC_LEN]);
        assert!(fv.rms_envelope.is_empty());
    }

    #[test]
    fn test_extended_extractor_populates_every_field() {
        let samples = sine(440.0, 2.0, 44100);
        let fv = ExtendedExtractor.extract(&samples, 44100);

        assert!(fv.has_baseline());
        assert!(fv.key.is_some());
        assert!(fv.spectral_flux.is_some());
        assert!(fv.rolloff.is_some());
        assert!(fv.flatness.is_some());
        assert_eq!(fv.mfcc.len(), MFCC_LEN);
        assert!(!fv.rms_envelope.is_empty());
    }

    #[test]
    fn test_family_failure_degrades_only_that_family() {
        // ~0.11s of audio: enough for envelope (1024-sample frames) and
        // spectral shape, but too few flux frames for tempo estimation.
        let samples = sine(440.0, 5000.0 / 44100.0, 44100);
        let fv = ExtendedExtractor.extract(&samples, 44100);

        assert!(fv.bpm.is_none());
        assert!(fv.has_baseline());
        assert_eq!(fv.mfcc.len(), MFCC_LEN);
        assert!(!fv.rms_envelope.is_empty());
    }

    #[test]
    fn test_extract_never_fails_on_degenerate_input() {
        for samples in [vec![], vec![0.0f32; 10]] {
            let fv = ExtendedExtractor.extract(&samples, 44100);
            assert!(fv.rms.is_some());
            assert_eq!(fv.mfcc.len(), MFCC_LEN);
            assert!(fv.rms_envelope.is_empty());
        }
    }

    #[test]
    fn test_capability_selects_implementation() {
        let fv = extractor_for(DspCapability::baseline_only()).extract(&sine(440.0, 1.0, 44100), 44100);
        assert!(fv.bpm.is_none());
        assert!(fv.flatness.is_none());

        let fv = extractor_for(DspCapability::full()).extract(&sine(440.0, 1.0, 44100), 44100);
        assert!(fv.flatness.is_some());
    }
}
