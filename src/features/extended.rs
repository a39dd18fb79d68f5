//! Extended tier: FFT-based feature families (tempo, key, MFCC, RMS
//! envelope, spectral shape). Each family is computed in its own
//! protected step; a failure degrades that family to its placeholder
//! without touching the others.

use rustfft::{num_complex::Complex, FftPlanner};

use super::framing;
use super::FamilyError;

/// Framing for MFCC and the spectral-shape family.
pub(crate) const SPECTRAL_FRAME: usize = 2048;
pub(crate) const SPECTRAL_HOP: usize = 1024;
/// Framing for the RMS envelope.
pub(crate) const ENVELOPE_FRAME: usize = 1024;
pub(crate) const ENVELOPE_HOP: usize = 512;

const MEL_BANDS: usize = 26;
const ROLLOFF_FRACTION: f64 = 0.85;
const BPM_MIN: f64 = 50.0;
const BPM_MAX: f64 = 200.0;

/// Krumhansl-Kessler key profiles, C-rooted.
const KK_MAJOR: [f64; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const KK_MINOR: [f64; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];
const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// One-shot sanity probe for the spectral engine, run once at startup:
/// a pure sine must peak at its own FFT bin.
pub(crate) fn self_test() -> bool {
    let size = 1024;
    let bin = 8;
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(size);
    let mut buf: Vec<Complex<f32>> = (0..size)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * bin as f32 * i as f32 / size as f32;
            Complex {
                re: phase.sin(),
                im: 0.0,
            }
        })
        .collect();
    fft.process(&mut buf);

    let peak = (0..size / 2)
        .max_by(|&a, &b| buf[a].norm().total_cmp(&buf[b].norm()))
        .unwrap_or(0);
    peak == bin
}

/// Run `visit` over the one-sided magnitude spectrum of every complete
/// 2048/1024 Hann frame. Buffers are reused across frames.
/// Returns the number of frames visited.
fn for_each_spectrum(
    samples: &[f32],
    mut visit: impl FnMut(&[f32]),
) -> Result<usize, FamilyError> {
    let n_frames = framing::frame_count(samples.len(), SPECTRAL_FRAME, SPECTRAL_HOP);
    if n_frames == 0 {
        return Err(FamilyError(format!(
            "audio shorter than one {SPECTRAL_FRAME}-sample analysis frame"
        )));
    }

    let window = framing::hann_window(SPECTRAL_FRAME);
    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(SPECTRAL_FRAME);

    let mut windowed: Vec<f32> = Vec::with_capacity(SPECTRAL_FRAME);
    let mut buf: Vec<Complex<f32>> = vec![Complex { re: 0.0, im: 0.0 }; SPECTRAL_FRAME];
    let mut mag = vec![0.0f32; SPECTRAL_FRAME / 2 + 1];

    for frame in framing::frames(samples, SPECTRAL_FRAME, SPECTRAL_HOP) {
        framing::apply_window(frame, &window, &mut windowed);
        for (b, &x) in buf.iter_mut().zip(&windowed) {
            *b = Complex { re: x, im: 0.0 };
        }
        fft.process(&mut buf);
        for (k, m) in mag.iter_mut().enumerate() {
            *m = buf[k].norm();
        }
        visit(&mag);
    }

    Ok(n_frames)
}

pub(crate) struct SpectralShape {
    pub centroid_hz: f64,
    pub flux: f64,
    pub rolloff_hz: f64,
    pub flatness: f64,
}

/// Frame-averaged spectral centroid, flux, 85% rolloff, and flatness.
pub(crate) fn spectral_shape(samples: &[f32], sample_rate: u32) -> Result<SpectralShape, FamilyError> {
    let bin_hz = sample_rate as f64 / SPECTRAL_FRAME as f64;

    let mut centroid_sum = 0.0f64;
    let mut rolloff_sum = 0.0f64;
    let mut flatness_sum = 0.0f64;
    let mut flux_sum = 0.0f64;
    let mut flux_frames = 0usize;
    let mut prev_mag: Option<Vec<f32>> = None;

    let n_frames = for_each_spectrum(samples, |mag| {
        let total: f64 = mag.iter().map(|&m| m as f64).sum();

        // Centroid: magnitude-weighted mean bin
        let weighted: f64 = mag
            .iter()
            .enumerate()
            .map(|(k, &m)| k as f64 * m as f64)
            .sum();
        if total > 0.0 {
            centroid_sum += weighted / total * bin_hz;
        }

        // Rolloff: first bin where cumulative magnitude crosses 85%
        if total > 0.0 {
            let threshold = ROLLOFF_FRACTION * total;
            let mut cumulative = 0.0f64;
            for (k, &m) in mag.iter().enumerate() {
                cumulative += m as f64;
                if cumulative >= threshold {
                    rolloff_sum += k as f64 * bin_hz;
                    break;
                }
            }
        }

        // Flatness: geometric / arithmetic mean
        let eps = 1e-12f64;
        let log_sum: f64 = mag.iter().map(|&m| (m as f64 + eps).ln()).sum();
        let geometric = (log_sum / mag.len() as f64).exp();
        let arithmetic = (total + eps) / mag.len() as f64;
        flatness_sum += (geometric / arithmetic).clamp(0.0, 1.0);

        // Flux: rectified magnitude difference against the previous frame
        if let Some(prev) = &prev_mag {
            let f: f64 = mag
                .iter()
                .zip(prev)
                .map(|(&m, &p)| ((m - p).max(0.0)) as f64)
                .sum();
            flux_sum += f;
            flux_frames += 1;
        }
        prev_mag = Some(mag.to_vec());
    })?;

    Ok(SpectralShape {
        centroid_hz: centroid_sum / n_frames as f64,
        flux: if flux_frames > 0 {
            flux_sum / flux_frames as f64
        } else {
            0.0
        },
        rolloff_hz: rolloff_sum / n_frames as f64,
        flatness: flatness_sum / n_frames as f64,
    })
}

/// Tempo estimate from the autocorrelation of the spectral-flux curve,
/// searching 50-200 BPM.
pub(crate) fn tempo_bpm(samples: &[f32], sample_rate: u32) -> Result<f64, FamilyError> {
    let mut flux: Vec<f64> = Vec::new();
    let mut prev_mag: Option<Vec<f32>> = None;

    for_each_spectrum(samples, |mag| {
        if let Some(prev) = &prev_mag {
            let f: f64 = mag
                .iter()
                .zip(prev)
                .map(|(&m, &p)| ((m - p).max(0.0)) as f64)
                .sum();
            flux.push(f);
        }
        prev_mag = Some(mag.to_vec());
    })?;

    if flux.len() < 4 {
        return Err(FamilyError("too few frames for tempo estimation".into()));
    }
    if flux.iter().all(|&f| f <= 0.0) {
        return Err(FamilyError("flat spectral flux, no rhythmic content".into()));
    }

    // Frames per second of the flux curve
    let fps = sample_rate as f64 / SPECTRAL_HOP as f64;
    let min_lag = ((60.0 / BPM_MAX) * fps).floor().max(1.0) as usize;
    let max_lag = (((60.0 / BPM_MIN) * fps).ceil() as usize).min(flux.len() - 1);
    if min_lag >= max_lag {
        return Err(FamilyError("audio too short for the tempo search range".into()));
    }

    let mean = flux.iter().sum::<f64>() / flux.len() as f64;
    let centered: Vec<f64> = flux.iter().map(|&f| f - mean).collect();

    let mut best_lag = 0usize;
    let mut best_value = f64::MIN;
    for lag in min_lag..=max_lag {
        let mut sum = 0.0f64;
        for i in lag..centered.len() {
            sum += centered[i] * centered[i - lag];
        }
        let value = sum / (centered.len() - lag) as f64;
        if value > best_value {
            best_value = value;
            best_lag = lag;
        }
    }

    if best_lag == 0 || best_value <= 0.0 {
        return Err(FamilyError("no autocorrelation peak in tempo range".into()));
    }

    Ok(60.0 * fps / best_lag as f64)
}

/// Key estimate via chroma accumulation and Krumhansl profile
/// correlation. Returns ("A minor"-style name, correlation strength).
pub(crate) fn key_estimate(
    samples: &[f32],
    sample_rate: u32,
) -> Result<(String, f64), FamilyError> {
    let bin_hz = sample_rate as f64 / SPECTRAL_FRAME as f64;
    let mut chroma = [0.0f64; 12];

    for_each_spectrum(samples, |mag| {
        for (k, &m) in mag.iter().enumerate().skip(1) {
            let freq = k as f64 * bin_hz;
            if !(27.5..=5000.0).contains(&freq) {
                continue;
            }
            // MIDI note number; C maps to pitch class 0
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            let pc = (midi.round() as i64).rem_euclid(12) as usize;
            chroma[pc] += m as f64;
        }
    })?;

    if chroma.iter().all(|&c| c <= 0.0) {
        return Err(FamilyError("empty chroma, no tonal content".into()));
    }

    let mut best_root = 0usize;
    let mut best_major = true;
    let mut best_r = f64::MIN;
    for root in 0..12 {
        for (is_major, profile) in [(true, &KK_MAJOR), (false, &KK_MINOR)] {
            let rotated: Vec<f64> = (0..12).map(|i| chroma[(i + root) % 12]).collect();
            let r = pearson(&rotated, profile);
            if r > best_r {
                best_root = root;
                best_major = is_major;
                best_r = r;
            }
        }
    }

    let name = format!(
        "{} {}",
        NOTE_NAMES[best_root],
        if best_major { "major" } else { "minor" }
    );
    Ok((name, best_r.clamp(0.0, 1.0)))
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (&x, &y) in a.iter().zip(b) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a) * (x - mean_a);
        var_b += (y - mean_b) * (y - mean_b);
    }
    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        cov / denom
    }
}

/// Frame-windowed mean MFCC: 26-band mel filterbank on the power
/// spectrum, log, DCT-II, first `n_coeffs` coefficients.
pub(crate) fn mfcc_mean(
    samples: &[f32],
    sample_rate: u32,
    n_coeffs: usize,
) -> Result<Vec<f64>, FamilyError> {
    let filterbank = mel_filterbank(sample_rate, SPECTRAL_FRAME, MEL_BANDS);
    let mut sums = vec![0.0f64; n_coeffs];

    let n_frames = for_each_spectrum(samples, |mag| {
        // Mel band energies from the power spectrum
        let mut energies = [0.0f64; MEL_BANDS];
        for (band, filter) in filterbank.iter().enumerate() {
            let mut e = 0.0f64;
            for &(k, w) in filter {
                let m = mag[k] as f64;
                e += w * m * m;
            }
            energies[band] = (e + 1e-10).ln();
        }

        // DCT-II across the log energies
        for (c, sum) in sums.iter_mut().enumerate() {
            let mut acc = 0.0f64;
            for (n, &e) in energies.iter().enumerate() {
                acc += e
                    * (std::f64::consts::PI * c as f64 * (n as f64 + 0.5) / MEL_BANDS as f64)
                        .cos();
            }
            *sum += acc;
        }
    })?;

    Ok(sums.into_iter().map(|s| s / n_frames as f64).collect())
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filters as sparse (bin, weight) lists.
fn mel_filterbank(sample_rate: u32, fft_size: usize, bands: usize) -> Vec<Vec<(usize, f64)>> {
    let nyquist = sample_rate as f64 / 2.0;
    let mel_lo = hz_to_mel(20.0);
    let mel_hi = hz_to_mel(nyquist);
    let edges: Vec<f64> = (0..bands + 2)
        .map(|i| mel_to_hz(mel_lo + (mel_hi - mel_lo) * i as f64 / (bands + 1) as f64))
        .collect();
    let bin_hz = sample_rate as f64 / fft_size as f64;
    let n_bins = fft_size / 2 + 1;

    (0..bands)
        .map(|b| {
            let (lo, mid, hi) = (edges[b], edges[b + 1], edges[b + 2]);
            let mut filter = Vec::new();
            for k in 0..n_bins {
                let f = k as f64 * bin_hz;
                let w = if f <= lo || f >= hi {
                    0.0
                } else if f <= mid {
                    (f - lo) / (mid - lo)
                } else {
                    (hi - f) / (hi - mid)
                };
                if w > 0.0 {
                    filter.push((k, w));
                }
            }
            filter
        })
        .collect()
}

/// Per-frame RMS sequence at 1024/512 Hann framing.
pub(crate) fn rms_envelope(samples: &[f32]) -> Result<Vec<f64>, FamilyError> {
    let n_frames = framing::frame_count(samples.len(), ENVELOPE_FRAME, ENVELOPE_HOP);
    if n_frames == 0 {
        return Err(FamilyError(format!(
            "audio shorter than one {ENVELOPE_FRAME}-sample envelope frame"
        )));
    }

    let window = framing::hann_window(ENVELOPE_FRAME);
    let mut windowed: Vec<f32> = Vec::with_capacity(ENVELOPE_FRAME);
    let mut envelope = Vec::with_capacity(n_frames);

    for frame in framing::frames(samples, ENVELOPE_FRAME, ENVELOPE_HOP) {
        framing::apply_window(frame, &window, &mut windowed);
        let sum_sq: f64 = windowed.iter().map(|&x| (x as f64) * (x as f64)).sum();
        envelope.push((sum_sq / ENVELOPE_FRAME as f64).sqrt());
    }

    Ok(envelope)
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
    fn test_self_test_passes() {
        assert!(self_test());
    }

    #[test]
    fn test_centroid_tracks_sine_frequency() {
        let samples = sine(1000.0, 2.0, 44100);
        let shape = spectral_shape(&samples, 44100).unwrap();
        assert!(
            (shape.centroid_hz - 1000.0).abs() < 250.0,
            "centroid {} not near 1000 Hz",
            shape.centroid_hz
        );
        // A pure tone is maximally non-flat
        assert!(shape.flatness < 0.2);
    }

    #[test]
    fn test_rolloff_above_centroid_for_sine() {
        let samples = sine(500.0, 2.0, 44100);
        let shape = spectral_shape(&samples, 44100).unwrap();
        assert!(shape.rolloff_hz >= 400.0 && shape.rolloff_hz < 1500.0);
    }

    #[test]
    fn test_spectral_shape_too_short() {
        let samples = vec![0.1f32; 100];
        assert!(spectral_shape(&samples, 44100).is_err());
    }

    #[test]
    fn test_tempo_of_click_train() {
        // 120 BPM click train: one click every 0.5s
        let sample_rate = 44100u32;
        let mut samples = vec![0.0f32; sample_rate as usize * 10];
        let period = sample_rate as usize / 2;
        for start in (0..samples.len()).step_by(period) {
            for i in 0..256.min(samples.len() - start) {
                samples[start + i] = 0.9 * (1.0 - i as f32 / 256.0);
            }
        }
        let bpm = tempo_bpm(&samples, sample_rate).unwrap();
        // Accept octave-adjacent estimates around 120
        assert!(
            (bpm - 120.0).abs() < 10.0 || (bpm - 60.0).abs() < 5.0,
            "bpm estimate {bpm} not near 120"
        );
    }

    #[test]
    fn test_tempo_rejects_silence() {
        let samples = vec![0.0f32; 44100 * 2];
        assert!(tempo_bpm(&samples, 44100).is_err());
    }

    #[test]
    fn test_key_of_a_major_triad() {
        // A4 + C#5 + E5
        let sample_rate = 44100u32;
        let n = sample_rate as usize * 2;
        let samples: Vec<f32> = (0..n)
            .map(|i| {
                let t = i as f64 / sample_rate as f64;
                let two_pi = 2.0 * std::f64::consts::PI;
                (((two_pi * 440.0 * t).sin()
                    + (two_pi * 554.37 * t).sin()
                    + (two_pi * 659.25 * t).sin())
                    / 3.0) as f32
            })
            .collect();
        let (name, strength) = key_estimate(&samples, sample_rate).unwrap();
        assert!(name.starts_with('A'), "expected an A-rooted key, got {name}");
        assert!(strength > 0.0);
    }

    #[test]
    fn test_key_rejects_silence() {
        let samples = vec![0.0f32; 44100];
        assert!(key_estimate(&samples, 44100).is_err());
    }

    #[test]
    fn test_mfcc_has_requested_length() {
        let samples = sine(440.0, 1.0, 44100);
        let mfcc = mfcc_mean(&samples, 44100, 13).unwrap();
        assert_eq!(mfcc.len(), 13);
        assert!(mfcc.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_envelope_length_matches_framing() {
        let samples = vec![0.5f32; 1024 + 512 * 3];
        let env = rms_envelope(&samples).unwrap();
        assert_eq!(env.len(), 4);
        // Hann-windowed constant signal: rms = 0.5 * sqrt(3/8)
        let expected = 0.5 * (3.0f64 / 8.0).sqrt();
        assert!((env[0] - expected).abs() < 1e-3);
    }

    #[test]
    fn test_envelope_too_short() {
        assert!(rms_envelope(&[0.0f32; 100]).is_err());
    }
}
