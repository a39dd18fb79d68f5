//! Baseline tier: O(n) amplitude statistics, always computable.

/// One pass over the signal: (rms, peak_amplitude).
pub(crate) fn amplitude_stats(samples: &[f32]) -> (f64, f64) {
    let mut sum_sq = 0.0f64;
    let mut peak = 0.0f32;
    for &x in samples {
        let ax = x.abs();
        if ax > peak {
            peak = ax;
        }
        sum_sq += (x as f64) * (x as f64);
    }
    let rms = if samples.is_empty() {
        0.0
    } else {
        (sum_sq / samples.len() as f64).sqrt()
    };
    (rms, peak as f64)
}

/// Mean absolute amplitude — the spectral-centroid stand-in when no
/// spectral transform is available.
pub(crate) fn mean_abs(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|x| x.abs() as f64).sum::<f64>() / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amplitude_stats_constant_signal() {
        let samples = vec![0.5f32; 1000];
        let (rms, peak) = amplitude_stats(&samples);
        assert!((rms - 0.5).abs() < 1e-9);
        assert!((peak - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_amplitude_stats_empty() {
        let (rms, peak) = amplitude_stats(&[]);
        assert_eq!(rms, 0.0);
        assert_eq!(peak, 0.0);
    }

    #[test]
    fn test_peak_tracks_negative_extreme() {
        let samples = vec![0.1, -0.9, 0.3];
        let (_, peak) = amplitude_stats(&samples);
        assert!((peak - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_mean_abs() {
        let samples = vec![0.5, -0.5, 1.0, -1.0];
        assert!((mean_abs(&samples) - 0.75).abs() < 1e-9);
    }
}
